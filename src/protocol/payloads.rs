//! Verbatim wire tables for the bootloader handshake.
//!
//! These byte sequences are protocol constants. They were prepared for
//! transmission at up to 115200 bps and are only valid under that ceiling;
//! see [`Bit3Encoder::MAX_BAUDRATE`](super::Bit3Encoder::MAX_BAUDRATE).

/// Prepared data for initiating communications with the Propeller booter
/// program.
///
/// The first 70 bytes carry the two calibration pulses and the encoded host
/// authentication bits. The remaining 129 bytes are `0xAD` transmission
/// prompts: 125 pull back the Propeller authentication bytes
/// ([`PROP_AUTH_BYTES`]) and 4 pull back the chip version.
pub(crate) const INIT_BYTES: [u8; 199] = {
    const HEAD: [u8; 70] = [
        0xF9, 0x4A, 0x25, 0xD5, 0x4A, 0xD5, 0x92, 0x95, 0x4A, 0x92, 0xD5, 0x92, 0xCA, 0xCA, 0x4A,
        0x95, 0xCA, 0xD2, 0x92, 0xA5, 0xA9, 0xC9, 0x4A, 0x49, 0x49, 0x2A, 0x25, 0x49, 0xA5, 0x4A,
        0xAA, 0x2A, 0xA9, 0xCA, 0xAA, 0x55, 0x52, 0xAA, 0xA9, 0x29, 0x92, 0x92, 0x29, 0x25, 0x2A,
        0xAA, 0x92, 0x92, 0x55, 0xCA, 0x4A, 0xCA, 0xCA, 0x92, 0xCA, 0x92, 0x95, 0x55, 0xA9, 0x92,
        0x2A, 0xD2, 0x52, 0x92, 0x52, 0xCA, 0xD2, 0xCA, 0x2A, 0xFF,
    ];
    let mut bytes = [0xAD; 199];
    let mut i = 0;
    while i < HEAD.len() {
        bytes[i] = HEAD[i];
        i += 1;
    }
    bytes
};

/// The exact 125 bytes of encoded authentication bits the Propeller must
/// echo in response to [`INIT_BYTES`]. After these, four more response bytes
/// encode the 8-bit chip version.
pub(crate) const PROP_AUTH_BYTES: [u8; 125] = [
    0xEE, 0xCE, 0xCE, 0xCF, 0xEF, 0xCF, 0xEE, 0xEF, 0xCF, 0xCF, 0xEF, 0xEF, 0xCF, 0xCE, 0xEF,
    0xCF, 0xEE, 0xEE, 0xCE, 0xEE, 0xEF, 0xCF, 0xCE, 0xEE, 0xCE, 0xCF, 0xEE, 0xEE, 0xEF, 0xCF,
    0xEE, 0xCE, 0xEE, 0xCE, 0xEE, 0xCF, 0xEF, 0xEE, 0xEF, 0xCE, 0xEE, 0xEE, 0xCF, 0xEE, 0xCF,
    0xEE, 0xEE, 0xCF, 0xEF, 0xCE, 0xCF, 0xEE, 0xEF, 0xEE, 0xEE, 0xEE, 0xEE, 0xEF, 0xEE, 0xCF,
    0xCF, 0xEF, 0xEE, 0xCE, 0xEF, 0xEF, 0xEF, 0xEF, 0xCE, 0xEF, 0xEE, 0xEF, 0xCF, 0xEF, 0xCF,
    0xCF, 0xCE, 0xCE, 0xCE, 0xCF, 0xCF, 0xEF, 0xCE, 0xEE, 0xCF, 0xEE, 0xEF, 0xCE, 0xCE, 0xCE,
    0xEF, 0xEF, 0xCF, 0xCF, 0xEE, 0xEE, 0xEE, 0xCE, 0xCF, 0xCE, 0xCE, 0xCF, 0xCE, 0xEE, 0xEF,
    0xEE, 0xEF, 0xEF, 0xCF, 0xEF, 0xCE, 0xCE, 0xEF, 0xCE, 0xEE, 0xCE, 0xEF, 0xCE, 0xCE, 0xEE,
    0xCF, 0xCF, 0xCE, 0xCF, 0xCF,
];

/// The single-byte transmission prompt that cues the Propeller to send its
/// next status code.
pub(crate) const STATUS_PROMPT: u8 = 0x29;

/// The 3BP encoded command word 0: shutdown.
pub(crate) const ENCODED_SHUTDOWN: [u8; 11] = [
    0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0xF2,
];

/// The 3BP encoded command word 1: load the image into RAM and run it.
pub(crate) const ENCODED_LOAD_RAM: [u8; 11] = [
    0xC9, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0xF2,
];

/// The 3BP encoded command word 2: program the EEPROM, then shutdown.
pub(crate) const ENCODED_PROGRAM_EEPROM_THEN_SHUTDOWN: [u8; 11] = [
    0xCA, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0xF2,
];

/// The 3BP encoded command word 3: program the EEPROM, then run.
pub(crate) const ENCODED_PROGRAM_EEPROM_THEN_RUN: [u8; 11] = [
    0x25, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0xFE,
];

// =============================================================================
// Unit Tests
// =============================================================================
