//! Bearer token codec and identity lookup.

mod codec;
mod identity;

pub use codec::{DecodeError, TokenCodec};
pub use identity::{Identity, IdentityStore, StaticIdentities};
