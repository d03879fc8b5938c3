//! Signed-message keys and P2PKH script helpers.

pub mod keys;
pub mod message;
mod secp;
pub mod standard;
