//! Numeric operand parsing for addresses and data bytes.

use core::convert::TryFrom;

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("'{0}' is not a valid number")]
    Invalid(String),

    #[error("{value:#x} is larger than {max:#x}")]
    OutOfRange { value: u32, max: u32 },
}

/// Parse an integer literal, accepting `0x`, `0o` and `0b` prefixes
pub fn parse_int(text: &str) -> Result<u32, ArgumentError> {
    let invalid = || ArgumentError::Invalid(text.to_string());

    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();

    let (digits, radix) = if let Some(d) = cleaned.strip_prefix("0x") {
        (d, 16)
    } else if let Some(d) = cleaned.strip_prefix("0o") {
        (d, 8)
    } else if let Some(d) = cleaned.strip_prefix("0b") {
        (d, 2)
    } else {
        (cleaned.as_str(), 10)
    };

    // from_str_radix would otherwise accept a sign
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }

    // Decimal literals other than zero may not start with 0
    if radix == 10 && digits.starts_with('0') && digits.chars().any(|c| c != '0') {
        return Err(invalid());
    }

    u32::from_str_radix(digits, radix).map_err(|_| invalid())
}

/// Parse a data byte
pub fn parse_byte(text: &str) -> Result<u8, ArgumentError> {
    let value = parse_int(text)?;
    u8::try_from(value).map_err(|_| ArgumentError::OutOfRange {
        value,
        max: u8::MAX as u32,
    })
}

/// Parse a 16-bit EEPROM address
pub fn parse_address(text: &str) -> Result<u16, ArgumentError> {
    let value = parse_int(text)?;
    u16::try_from(value).map_err(|_| ArgumentError::OutOfRange {
        value,
        max: u16::MAX as u32,
    })
}
