use ethers::types::Address;
use ethers::utils::to_checksum;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address must be 40 hex digits, got {0}")]
    InvalidLength(usize),
    #[error("address is not valid hex: {0}")]
    InvalidHex(String),
}

impl AddressError {
    /// Empty values are what a syncing node returns; everything else is malformed.
    pub fn is_empty(&self) -> bool {
        matches!(self, AddressError::Empty)
    }
}

/// Parse a textual address, accepting any letter case and an optional `0x` prefix.
///
/// The zero address is reported as [`AddressError::Empty`].
pub fn parse_address(text: &str) -> Result<Address, AddressError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(AddressError::Empty);
    }
    if digits.len() != 40 {
        return Err(AddressError::InvalidLength(digits.len()));
    }

    let bytes = hex::decode(digits).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
    let address = Address::from_slice(&bytes);
    if address.is_zero() {
        return Err(AddressError::Empty);
    }
    Ok(address)
}

/// EIP-55 checksummed form used for every address we print
pub fn display_address(address: &Address) -> String {
    to_checksum(address, None)
}
