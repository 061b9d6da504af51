//! Direct decoding of the TCF v2 core segment.
//!
//! Conformant CMPs hand us the decoded purpose-1 bit in their callback
//! payload, so this decoder only runs as a fallback when a CMP supplies
//! the raw `tcString` without `purpose.consents`. Only the one bit the
//! grant decision needs is extracted; nothing else of the string is
//! interpreted.
//!
//! Core segment layout (fixed-width header, most-significant bit first):
//!
//! | field                    | bits |
//! |--------------------------|------|
//! | version                  | 6    |
//! | created                  | 36   |
//! | last updated             | 36   |
//! | cmp id                   | 12   |
//! | cmp version              | 12   |
//! | consent screen           | 6    |
//! | consent language         | 12   |
//! | vendor list version      | 12   |
//! | tcf policy version       | 6    |
//! | is service specific      | 1    |
//! | use non-standard stacks  | 1    |
//! | special feature opt-ins  | 12   |
//! | purposes consent         | 24   |
//!
//! The purposes-consent bitfield starts at absolute bit offset 152;
//! bit 0 of that field is purpose 1.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

/// Absolute bit offset of the 24-bit purposes-consent bitfield.
const PURPOSES_CONSENT_OFFSET: usize = 152;

/// Width of the purposes-consent bitfield.
const PURPOSES_CONSENT_BITS: usize = 24;

/// Bit width of the version header field.
const VERSION_BITS: usize = 6;

/// The only core-segment version this decoder understands.
const SUPPORTED_VERSION: u64 = 2;

/// Errors produced while decoding a TCF v2 consent string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TcfStringError {
    /// The consent string was empty.
    #[error("consent string is empty")]
    Empty,

    /// The core segment was not valid URL-safe base64.
    #[error("core segment is not valid base64: {0}")]
    InvalidBase64(String),

    /// The decoded segment is too short to contain the requested field.
    #[error("core segment truncated: need {needed} bits, have {available}")]
    Truncated {
        /// Bits required to read the field.
        needed: usize,
        /// Bits actually present in the segment.
        available: usize,
    },

    /// The segment declares a version other than 2.
    #[error("unsupported consent string version: {0}")]
    UnsupportedVersion(u64),

    /// The requested purpose number is outside 1..=24.
    #[error("purpose {0} out of range (1..=24)")]
    PurposeOutOfRange(u8),
}

/// Reads `count` bits starting at `offset` as a big-endian integer.
fn read_bits(data: &[u8], offset: usize, count: usize) -> Result<u64, TcfStringError> {
    debug_assert!(count <= 64);
    let available = data.len() * 8;
    if offset + count > available {
        return Err(TcfStringError::Truncated {
            needed: offset + count,
            available,
        });
    }
    let mut value = 0u64;
    for i in 0..count {
        let bit_index = offset + i;
        let byte = data[bit_index / 8];
        let bit = (byte >> (7 - (bit_index % 8))) & 1;
        value = (value << 1) | u64::from(bit);
    }
    Ok(value)
}

/// Decodes the core segment (everything before the first `.`) of a TCF
/// consent string into raw bytes.
fn core_segment(tc_string: &str) -> Result<Vec<u8>, TcfStringError> {
    let trimmed = tc_string.trim();
    if trimmed.is_empty() {
        return Err(TcfStringError::Empty);
    }
    let core = trimmed.split('.').next().unwrap_or(trimmed);
    // Some encoders emit padding even though the format forbids it.
    let core = core.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(core)
        .map_err(|e| TcfStringError::InvalidBase64(e.to_string()))
}

/// Extracts the consent bit for `purpose` (1-based) from a TCF v2
/// consent string.
///
/// # Errors
///
/// Returns [`TcfStringError`] if the string is empty, not base64, too
/// short, not version 2, or `purpose` is outside 1..=24.
pub fn purpose_consent(tc_string: &str, purpose: u8) -> Result<bool, TcfStringError> {
    if purpose == 0 || usize::from(purpose) > PURPOSES_CONSENT_BITS {
        return Err(TcfStringError::PurposeOutOfRange(purpose));
    }
    let data = core_segment(tc_string)?;
    let version = read_bits(&data, 0, VERSION_BITS)?;
    if version != SUPPORTED_VERSION {
        return Err(TcfStringError::UnsupportedVersion(version));
    }
    let bit_offset = PURPOSES_CONSENT_OFFSET + usize::from(purpose) - 1;
    Ok(read_bits(&data, bit_offset, 1)? == 1)
}
