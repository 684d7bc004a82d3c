//! Decoding 3BP responses from the Propeller.

use thiserror::Error;

// =============================================================================
// Public Interface
// =============================================================================

/// A 3BP response could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The response ended before four bytes were available.
    #[error("insufficient bytes")]
    InsufficientBytes,
    /// A byte outside the four valid response values was received.
    #[error("unexpected byte: {0:#04X}")]
    UnexpectedByte(u8),
}

/// Decodes one data byte from exactly four 3BP response bytes.
///
/// The bytes are assumed to come from the Propeller in response to four
/// `0xAD` transmission prompts. Each response byte carries two decoded bits,
/// LSB-first:
///
/// | response | bits |
/// |----------|------|
/// | `0xCE`   | `00` |
/// | `0xCF`   | `01` |
/// | `0xEE`   | `10` |
/// | `0xEF`   | `11` |
///
/// Used for decoding the chip version during the handshake.
pub fn decode_byte(bytes: &[u8]) -> Result<u8, DecodeError> {
    let mut decoded = 0u8;
    for pair_index in 0..4 {
        let byte = *bytes
            .get(pair_index)
            .ok_or(DecodeError::InsufficientBytes)?;
        let pair = match byte {
            0xCE => 0b00,
            0xCF => 0b01,
            0xEE => 0b10,
            0xEF => 0b11,
            other => return Err(DecodeError::UnexpectedByte(other)),
        };
        decoded |= pair << (2 * pair_index);
    }
    Ok(decoded)
}

// =============================================================================
// Unit Tests
// =============================================================================
