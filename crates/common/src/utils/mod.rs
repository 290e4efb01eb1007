/// Hex string helpers
pub mod strings;
