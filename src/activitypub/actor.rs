//! Actor and public key documents

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::Iri;

/// ActivityStreams public collection, used as the anonymous actor id
pub const PUBLIC_NS: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Object types that we accept as actors
pub const ACTOR_TYPES: &[&str] = &["Application", "Group", "Organization", "Person", "Service"];

/// A federated identity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: Iri,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub name_map: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
}

/// Public key material advertised by an actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: Iri,
    pub owner: Iri,
    pub public_key_pem: String,
}

impl Actor {
    pub fn new(id: impl Into<Iri>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: None,
            name_map: BTreeMap::new(),
            preferred_username: None,
            public_key: None,
        }
    }

    /// The "no authenticated actor" value
    pub fn anonymous() -> Self {
        Self {
            name: Some("Anonymous".to_string()),
            ..Self::new(PUBLIC_NS, "Person")
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.as_str() == PUBLIC_NS
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_public_key(mut self, key: PublicKey) -> Self {
        self.public_key = Some(key);
        self
    }

    /// Human readable name: `name`, then the first `nameMap` value, then `preferredUsername`
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.name_map.values().next().map(String::as_str))
            .or(self.preferred_username.as_deref())
    }

    pub(crate) fn from_object(object: &Map<String, Value>) -> Option<Self> {
        let id = object.get("id")?.as_str()?;
        let kind = type_names(object).into_iter().next()?;

        let name_map = object
            .get("nameMap")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(lang, v)| v.as_str().map(|s| (lang.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        // publicKey may be a single object or an array; a bare link is of no use here
        let public_key = match object.get("publicKey") {
            Some(Value::Object(key)) => PublicKey::from_object(key),
            Some(Value::Array(keys)) => keys
                .iter()
                .filter_map(Value::as_object)
                .find_map(PublicKey::from_object),
            _ => None,
        };

        Some(Self {
            id: Iri::from(id),
            kind: kind.to_string(),
            name: string_field(object, "name"),
            name_map,
            preferred_username: string_field(object, "preferredUsername"),
            public_key,
        })
    }
}

impl PublicKey {
    pub fn new(id: impl Into<Iri>, owner: impl Into<Iri>, public_key_pem: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            public_key_pem: public_key_pem.into(),
        }
    }

    pub(crate) fn from_object(object: &Map<String, Value>) -> Option<Self> {
        let pem = object.get("publicKeyPem")?.as_str()?;
        let owner = link_field(object, "owner").or_else(|| link_field(object, "controller"))?;
        let id = object.get("id").and_then(Value::as_str).unwrap_or_default();

        Some(Self {
            id: Iri::from(id),
            owner,
            public_key_pem: pem.to_string(),
        })
    }
}

/// `type` may be a single string or an array of strings
pub(crate) fn type_names(object: &Map<String, Value>) -> Vec<&str> {
    match object.get("type") {
        Some(Value::String(kind)) => vec![kind.as_str()],
        Some(Value::Array(kinds)) => kinds.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(str::to_string)
}

fn link_field(object: &Map<String, Value>, field: &str) -> Option<Iri> {
    match object.get(field)? {
        Value::String(iri) => Some(Iri::from(iri.as_str())),
        Value::Object(linked) => linked.get("id").and_then(Value::as_str).map(Iri::from),
        _ => None,
    }
}
