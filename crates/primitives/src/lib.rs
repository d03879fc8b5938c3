//! Core masternode wire types and consensus serialization.

pub mod encoding;
pub mod hash;
pub mod netaddr;
pub mod outpoint;
pub mod uint;

pub use hash::{hash160, hash256_to_hex, sha256, sha256d};
pub use netaddr::{NetAddress, NetAddressError};
pub use outpoint::OutPoint;
