//! Wire timing arithmetic and the fixed protocol intervals.
//!
//! Every byte on the wire is 10 bit times (start bit, eight data bits, stop
//! bit at 8N1), which makes transmission time a simple function of the
//! baudrate. The loader uses these estimates for drain-time accounting: a
//! write call returns once the bytes are buffered, long before they have
//! actually left the wire.

use std::time::Duration;

/// Approximately how often the loader checks whether the action has been
/// cancelled. Device-level read and write timeouts are set to this value, so
/// no single blocking call outlasts it. For efficiency this shouldn't be too
/// low, for responsiveness it shouldn't be too high.
pub(crate) const CANCELLATION_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout for getting the Propeller authentication and version bytes,
/// counted from the estimated drain time of the initial bytes. The Propeller
/// sends them simultaneously with the transmission prompts, so they should be
/// available as soon as the initial bytes have drained, plus some margin for
/// the hardware and drivers.
pub(crate) const INIT_BYTES_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long before the stage-4 drain deadline the loader stops waiting and
/// moves on to the checksum status poll.
///
/// Sending timely status prompts is critical: the Propeller takes roughly
/// 50 to 130 ms after the last image bit to compute the checksum, and then
/// waits only about 100 ms for a prompt before it aborts serial loading and
/// tries to boot from EEPROM. Returning early also covers the case of the
/// drain time being over-estimated.
pub(crate) const EARLY_STAGE4_RETURN: Duration = Duration::from_millis(100);

/// The interval between status transmission prompts.
///
/// The Propeller must receive a prompt within about 100 ms of becoming ready
/// to send a status code, otherwise it aborts the serial loading process.
/// There is some overhead and unpredictability in the sleeping and serial
/// functions, so 10-20 ms is about right.
pub(crate) const STATUS_PROMPT_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout for receiving a checksum status code, counted from the start of
/// the poll. 84 ms was observed between the last encoded image bit and the
/// checksum status at 13 MHz, implying a minimum safe timeout of 140 ms at
/// 8 MHz; the rest is margin for the drain-time estimate and
/// [`EARLY_STAGE4_RETURN`].
pub(crate) const CHECKSUM_STATUS_TIMEOUT: Duration = Duration::from_millis(1500);

/// Timeout for receiving an EEPROM programming status code. 3.4 s was
/// observed from the checksum status to the programming status at 13 MHz,
/// implying a minimum safe timeout of 5.6 s at 8 MHz.
pub(crate) const EEPROM_PROGRAMMING_STATUS_TIMEOUT: Duration = Duration::from_millis(6000);

/// Timeout for receiving an EEPROM verification status code. 1.2 s was
/// observed from the programming status to the verification status at
/// 13 MHz, implying a minimum safe timeout of 2.0 s at 8 MHz.
pub(crate) const EEPROM_VERIFICATION_STATUS_TIMEOUT: Duration = Duration::from_millis(2500);

/// Ratio applied to a transit duration to derive the write responsiveness
/// timeout (3/2, i.e. 1.5x). If write calls aren't keeping pace with the
/// baudrate then something is wrong with the port.
const RESPONSIVENESS_NUM: u32 = 3;
const RESPONSIVENESS_DEN: u32 = 2;

/// Lower bound for the write responsiveness timeout.
const MIN_RESPONSIVENESS_TIMEOUT: Duration = Duration::from_millis(1000);

/// The time taken to transmit `num_bytes` bytes at `baudrate`, assuming
/// transmission begins immediately and continues without interruption.
///
/// Never returns zero, so a drain deadline always lies in the future.
pub(crate) fn transit_duration(num_bytes: usize, baudrate: u32) -> Duration {
    let micros = (num_bytes as u64 * 10_000_000) / u64::from(baudrate);
    Duration::from_micros(micros.max(1))
}

/// The responsiveness timeout for a send of the given transit duration:
/// 1.5x the transit duration, with a floor of one second.
pub(crate) fn responsiveness_timeout(transit: Duration) -> Duration {
    let timeout = transit * RESPONSIVENESS_NUM / RESPONSIVENESS_DEN;
    if timeout < MIN_RESPONSIVENESS_TIMEOUT {
        MIN_RESPONSIVENESS_TIMEOUT
    } else {
        timeout
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
