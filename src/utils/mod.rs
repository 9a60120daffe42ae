//!
//! Formatting helpers shared by the engine and the binary.
/// Token amount formatting
pub mod format;

pub use format::format_token_amount;
