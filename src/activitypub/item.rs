//! Decoded ActivityPub documents
//!
//! Whether a document is an actor, a bare key, a collection or a link is
//! decided once here, when the JSON is decoded.

use serde_json::Value;

use super::actor::{ACTOR_TYPES, type_names};
use super::{Actor, Iri, PublicKey};
use crate::error::AuthError;

const COLLECTION_TYPES: &[&str] = &[
    "Collection",
    "OrderedCollection",
    "CollectionPage",
    "OrderedCollectionPage",
];

/// A document loaded from storage or from a remote server
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Actor(Box<Actor>),
    PublicKey(PublicKey),
    Collection(Vec<Item>),
    Link(Iri),
}

impl Item {
    /// Decode a JSON(-LD) body
    pub fn from_slice(body: &[u8]) -> Result<Self, AuthError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AuthError::RemoteParseFailed(format!("invalid JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, AuthError> {
        let object = match value {
            Value::String(iri) => return Ok(Item::Link(Iri::from(iri.as_str()))),
            Value::Object(object) => object,
            _ => {
                return Err(AuthError::RemoteParseFailed(
                    "document is not an object".to_string(),
                ));
            }
        };

        let types = type_names(object);
        if types.iter().any(|t| COLLECTION_TYPES.contains(t)) {
            let items = object
                .get("orderedItems")
                .or_else(|| object.get("items"))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| Item::from_value(item).ok())
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Item::Collection(items));
        }

        if types.iter().any(|t| ACTOR_TYPES.contains(t)) {
            return Actor::from_object(object)
                .map(|actor| Item::Actor(Box::new(actor)))
                .ok_or_else(|| AuthError::RemoteParseFailed("actor without id".to_string()));
        }

        if object.contains_key("publicKeyPem") {
            return PublicKey::from_object(object)
                .map(Item::PublicKey)
                .ok_or_else(|| AuthError::RemoteParseFailed("public key without owner".to_string()));
        }

        Err(AuthError::RemoteParseFailed(format!(
            "unrecognized document type {:?}",
            types
        )))
    }

    pub fn id(&self) -> Option<&Iri> {
        match self {
            Item::Actor(actor) => Some(&actor.id),
            Item::PublicKey(key) => Some(&key.id),
            Item::Link(iri) => Some(iri),
            Item::Collection(_) => None,
        }
    }

    /// Coerce to an actor, taking the first element of a collection
    pub fn into_actor(self) -> Result<Actor, AuthError> {
        match self {
            Item::Actor(actor) => Ok(*actor),
            Item::Collection(items) => items
                .into_iter()
                .next()
                .ok_or_else(|| AuthError::NotFound("empty collection".to_string()))?
                .into_actor(),
            Item::PublicKey(key) => Err(AuthError::NotFound(format!(
                "{} is a public key, not an actor",
                key.id
            ))),
            Item::Link(iri) => Err(AuthError::NotFound(format!(
                "{} is an unresolved link, not an actor",
                iri
            ))),
        }
    }
}

impl From<Actor> for Item {
    fn from(actor: Actor) -> Self {
        Item::Actor(Box::new(actor))
    }
}
