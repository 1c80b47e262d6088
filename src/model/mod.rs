//! Core value types: node hashes and nibble paths

mod hash;
mod nibbles;

pub use hash::Hash;
pub use nibbles::Nibbles;
