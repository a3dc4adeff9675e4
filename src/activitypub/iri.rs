//! IRIs and IRI sets

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;

/// An ActivityPub resource identifier
///
/// Kept as the raw string we received; parsing happens on demand so that
/// sentinel values like the public namespace stay representable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iri(String);

impl Iri {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as an absolute URL
    pub fn url(&self) -> Result<Url, AuthError> {
        Url::parse(&self.0)
            .map_err(|e| AuthError::BadRequest(format!("Invalid IRI {}: {}", self.0, e)))
    }

    /// The same IRI with any `#fragment` removed
    pub fn without_fragment(&self) -> Iri {
        match Url::parse(&self.0) {
            Ok(mut url) if url.fragment().is_some() => {
                url.set_fragment(None);
                Iri(url.to_string())
            }
            Ok(_) => self.clone(),
            Err(_) => Iri(self.0.split('#').next().unwrap_or(&self.0).to_string()),
        }
    }

    /// Lowercased host, if this IRI is a URL with a host
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.0)
            .ok()
            .and_then(|url| url.host_str().map(|h| h.to_ascii_lowercase()))
    }

    /// Whether `other` contains this IRI.
    ///
    /// Both sides must share host and explicit port, and `other`'s path must
    /// be a path-segment prefix of ours, so `https://bad.example` contains
    /// every resource on that host. Scheme is not compared. A bare host like
    /// `bad.example` contains that host and its subdomains. Anything else
    /// that is not a URL only contains itself.
    pub fn is_contained_by(&self, other: &Iri) -> bool {
        match (Url::parse(&self.0), Url::parse(&other.0)) {
            (Ok(this), Ok(that)) => {
                let same_host = match (this.host_str(), that.host_str()) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => false,
                };
                if !same_host || this.port() != that.port() {
                    return false;
                }
                path_has_prefix(this.path(), that.path())
            }
            (Ok(this), Err(_)) => this
                .host_str()
                .is_some_and(|host| host_is_within(host, &other.0)),
            _ => self.0.eq_ignore_ascii_case(&other.0),
        }
    }
}

fn host_is_within(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl std::fmt::Display for Iri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Iri {
    fn from(value: &str) -> Self {
        Iri(value.to_string())
    }
}

impl From<String> for Iri {
    fn from(value: String) -> Self {
        Iri(value)
    }
}

impl From<Url> for Iri {
    fn from(value: Url) -> Self {
        Iri(value.to_string())
    }
}

/// Hosts, instances or actors that must never be dereferenced or trusted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList(Vec<Iri>);

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when any entry contains `iri`
    pub fn matches(&self, iri: &Iri) -> bool {
        self.0.iter().any(|entry| iri.is_contained_by(entry))
    }
}

impl<I: Into<Iri>> FromIterator<I> for IgnoreList {
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        IgnoreList(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_fragment_strips_key_suffix() {
        let iri = Iri::from("https://example.com/users/jdoe#main-key");
        assert_eq!(iri.without_fragment().as_str(), "https://example.com/users/jdoe");

        let plain = Iri::from("https://example.com/users/jdoe/key");
        assert_eq!(plain.without_fragment(), plain);
    }

    #[test]
    fn blocked_host_contains_all_of_its_resources() {
        let blocked = Iri::from("https://bad.example");
        assert!(Iri::from("https://bad.example/users/eve#main-key").is_contained_by(&blocked));
        assert!(Iri::from("http://BAD.example/inbox").is_contained_by(&blocked));
        assert!(!Iri::from("https://good.example/users/eve").is_contained_by(&blocked));
    }

    #[test]
    fn path_containment_respects_segments() {
        let blocked = Iri::from("https://example.com/users/bob");
        assert!(Iri::from("https://example.com/users/bob").is_contained_by(&blocked));
        assert!(Iri::from("https://example.com/users/bob/key").is_contained_by(&blocked));
        assert!(Iri::from("https://example.com/users/bob#main-key").is_contained_by(&blocked));
        assert!(!Iri::from("https://example.com/users/bobby").is_contained_by(&blocked));
    }

    #[test]
    fn ports_must_match() {
        let blocked = Iri::from("https://example.com:8443");
        assert!(!Iri::from("https://example.com/users/bob").is_contained_by(&blocked));
        assert!(Iri::from("https://example.com:8443/users/bob").is_contained_by(&blocked));
    }

    #[test]
    fn bare_host_entries_match_on_label_boundary() {
        let list: IgnoreList = ["spam.example"].into_iter().collect();
        assert!(list.matches(&Iri::from("https://spam.example/users/x")));
        assert!(list.matches(&Iri::from("https://SPAM.example./users/x")));
        assert!(list.matches(&Iri::from("https://eu.spam.example/users/x")));
        assert!(!list.matches(&Iri::from("https://notspam.example/users/x")));
        assert!(!list.matches(&Iri::from("https://example.com/users/x")));
    }

    #[test]
    fn non_url_iris_only_contain_themselves() {
        assert!(Iri::from("not-a-url").is_contained_by(&Iri::from("NOT-A-URL")));
        assert!(!Iri::from("not-a-url").is_contained_by(&Iri::from("url")));
    }
}
