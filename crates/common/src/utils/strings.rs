use eyre::{eyre, Result};
use std::fmt::Write;

/// Decodes a hex string into a vector of bytes
///
/// ```
/// use evmlift_common::utils::strings::decode_hex;
///
/// let hex = "6001600201"; // PUSH1 01 PUSH1 02 ADD
/// let result = decode_hex(hex).expect("should decode hex");
/// assert_eq!(result, vec![0x60, 0x01, 0x60, 0x02, 0x01]);
/// ```
pub fn decode_hex(mut s: &str) -> Result<Vec<u8>> {
    // normalize
    s = s.trim_start_matches("0x").trim();

    if s.is_empty() {
        return Ok(vec![]);
    }
    if s.len() % 2 != 0 {
        return Err(eyre!("odd-length hex string: {}", s));
    }

    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| eyre!("invalid hex string: {}", s))
}

/// Encodes a vector of bytes into a hex string
///
/// ```
/// use evmlift_common::utils::strings::encode_hex;
///
/// let bytes = vec![0x60, 0x01, 0x60, 0x02, 0x01];
/// let result = encode_hex(&bytes);
/// assert_eq!(result, "6001600201");
/// ```
pub fn encode_hex(s: &[u8]) -> String {
    s.iter().fold(String::new(), |mut acc, b| {
        write!(acc, "{b:02x}").expect("unable to write");
        acc
    })
}
