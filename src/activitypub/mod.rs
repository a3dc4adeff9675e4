//! ActivityPub object model
//!
//! Only the parts the authentication pipeline needs:
//! - IRIs and ignore lists
//! - Actors and their public keys
//! - Decoded documents (`Item`)

mod actor;
mod iri;
mod item;

pub use actor::{ACTOR_TYPES, Actor, PUBLIC_NS, PublicKey};
pub use iri::{IgnoreList, Iri};
pub use item::Item;
