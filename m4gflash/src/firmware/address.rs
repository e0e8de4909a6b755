//! Flash address literals.

use crate::error::ValidationError;

/// Parse a flash address: hex when prefixed `0x`/`0X`, decimal otherwise.
///
/// Surrounding whitespace is ignored. Anything else that is not a valid
/// `u32` is rejected.
pub fn parse_address(value: &str) -> Result<u32, ValidationError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    parsed.map_err(|source| ValidationError::InvalidAddress {
        value: value.to_string(),
        source,
    })
}
