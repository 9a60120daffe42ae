//! Governance account model and decoder.
//!
//! Turns raw account bytes read from the chain into typed entities. Nothing in
//! this module performs I/O; identical bytes always decode to identical values.

/// Base58 account addresses
mod address;
/// Typed governance and SPL entities
pub mod accounts;
/// Versioned binary layouts
pub mod decoder;

pub use accounts::*;
pub use address::{ADDRESS_LEN, Address, AddressParseError};
pub use decoder::{DecodeError, DecodeErrorKind, decode, decode_any, encode, peek_header};
