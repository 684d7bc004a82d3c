//! Propcom programs and controls a Parallax Propeller P8X32A
//! microcontroller over an asynchronous serial link, by driving the chip's
//! on-die bootloader through its fixed multi-stage protocol: hardware
//! reset, handshake and authentication, command and image delivery, and
//! polled status collection.
//!
//! Five actions are available on the [`ActionRunner`]: restart, shutdown,
//! load an image into RAM, and program the EEPROM with or without running
//! the image afterwards. Every action runs on its own worker thread; the
//! calling thread gets progress through a [`StatusObserver`] and can
//! [`cancel`](ActionRunner::cancel) or [`wait`](ActionRunner::wait_until_finished)
//! from anywhere. Image data is serialized with the bootloader's
//! 3-Bit-Protocol ([`Bit3Encoder`]), which packs the protocol's timed low
//! pulses into ordinary 8N1 bytes at up to 115200 bps.
//!
//! The loading protocol itself is implemented as a state machine. State
//! machines here are built in terms of **states** and **transitions**
//! between them with the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * Shared data travels from state to state inside the transition
//!   **events**.
//! * Only explicitly defined transitions are permitted, and as many errors
//!   as possible are detected at **compile-time**.
//! * Transitioning consumes the original state; going back means creating
//!   a new one.
//!
//! The implementation of state transitions leverages the `From` and `Into`
//! pattern: converting an `event` into the next `state` is only possible
//! where the corresponding `From` implementation exists, so illegal
//! transitions do not compile.
//!
//! **Example**
//!
//! ```no_run
//! use propcom::ActionRunner;
//!
//! let runner = ActionRunner::open("/dev/ttyUSB0");
//! runner.load_ram(&std::fs::read("blink.binary").unwrap()).unwrap();
//! runner.wait_until_finished(std::time::Duration::ZERO).unwrap();
//! ```

mod loader;
mod port;
pub mod protocol;
mod runner;
mod settings;
#[cfg(test)]
mod testutil;
mod timing;

pub use loader::{
    Action, ActionError, ActionSummary, ErrorCode, InputError, Status, StatusObserver,
    TimeoutError,
};
pub use port::{LoaderPort, SystemPort};
pub use protocol::{Bit3Encoder, MAX_IMAGE_SIZE};
pub use runner::ActionRunner;
pub use settings::{ResetCallback, ResetLine, Settings, SettingsBuilder};
