//! Test doubles: a scripted serial port standing in for a Propeller, and an
//! observer that records every callback.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::loader::{Action, ActionSummary, ErrorCode, Status, StatusObserver};
use crate::port::LoaderPort;
use crate::timing::CANCELLATION_CHECK_INTERVAL;

// =============================================================================
// SimPort
// =============================================================================

/// A [`LoaderPort`] whose reads are fed from a scripted response queue and
/// whose writes are recorded.
///
/// Responses are queued up front; `flush_input` does not discard them, since
/// a simulated Propeller's replies aren't on the line until prompted. Writes
/// can be throttled (`set_write_limit`, `set_write_delay`) to hold the
/// worker inside a send long enough for a test to interact with it.
pub(crate) struct SimPort {
    inner: Arc<Mutex<SimInner>>,
}

/// A test-side handle onto a [`SimPort`] that has been moved into a runner.
pub(crate) struct SimHandle {
    inner: Arc<Mutex<SimInner>>,
}

struct SimInner {
    response_queue: VecDeque<u8>,
    written: Vec<u8>,
    open: bool,
    refuse_active: bool,
    reset_count: u32,
    input_flushes: u32,
    write_limit: usize,
    write_delay: Duration,
}

impl SimPort {
    pub fn new() -> Self {
        SimPort {
            inner: Arc::new(Mutex::new(SimInner {
                response_queue: VecDeque::new(),
                written: Vec::new(),
                open: false,
                refuse_active: false,
                reset_count: 0,
                input_flushes: 0,
                write_limit: usize::MAX,
                write_delay: Duration::ZERO,
            })),
        }
    }

    /// Appends bytes the simulated Propeller will return, in order.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().response_queue.extend(bytes);
    }

    /// Caps how many bytes a single write call accepts.
    pub fn set_write_limit(&self, limit: usize) {
        self.inner.lock().unwrap().write_limit = limit;
    }

    /// Adds a delay to every write call.
    pub fn set_write_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().write_delay = delay;
    }

    /// Makes `make_active` fail, as if another controller held the port.
    pub fn set_refuse_active(&self, refuse: bool) {
        self.inner.lock().unwrap().refuse_active = refuse;
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SimHandle {
    /// Everything the loader has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().written.clone()
    }

    /// How many times the reset line was asserted.
    pub fn reset_count(&self) -> u32 {
        self.inner.lock().unwrap().reset_count
    }

    /// How many times the input buffer was flushed.
    pub fn input_flushes(&self) -> u32 {
        self.inner.lock().unwrap().input_flushes
    }
}

impl SimInner {
    fn not_open() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "the port is not open")
    }
}

impl LoaderPort for SimPort {
    fn make_active(&mut self) -> serialport::Result<()> {
        if self.inner.lock().unwrap().refuse_active {
            return Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "the port is held by another controller",
            ));
        }
        Ok(())
    }

    fn release(&mut self) -> serialport::Result<()> {
        self.inner.lock().unwrap().open = false;
        Ok(())
    }

    fn ensure_open(&mut self) -> serialport::Result<()> {
        self.inner.lock().unwrap().open = true;
        Ok(())
    }

    fn flush_output(&mut self) -> serialport::Result<()> {
        Ok(())
    }

    fn flush_input(&mut self) -> serialport::Result<()> {
        self.inner.lock().unwrap().input_flushes += 1;
        Ok(())
    }

    fn set_baudrate(&mut self, _baudrate: u32) -> serialport::Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> serialport::Result<()> {
        Ok(())
    }

    fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
        Ok(())
    }

    fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> serialport::Result<()> {
        if level {
            self.inner.lock().unwrap().reset_count += 1;
        }
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> serialport::Result<()> {
        if level {
            self.inner.lock().unwrap().reset_count += 1;
        }
        Ok(())
    }

    fn bytes_to_read(&mut self) -> serialport::Result<u32> {
        Ok(self.inner.lock().unwrap().response_queue.len() as u32)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.open {
                return Err(SimInner::not_open());
            }
            if !inner.response_queue.is_empty() {
                let n = buf.len().min(inner.response_queue.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = inner.response_queue.pop_front().unwrap();
                }
                return Ok(n);
            }
        }
        // Nothing scripted: behave like a read that sat out its timeout.
        thread::sleep(CANCELLATION_CHECK_INTERVAL);
        Ok(0)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let delay;
        let n;
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.open {
                return Err(SimInner::not_open());
            }
            n = buf.len().min(inner.write_limit);
            inner.written.extend_from_slice(&buf[..n]);
            delay = inner.write_delay;
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(n)
    }
}

// =============================================================================
// RecordingObserver
// =============================================================================

/// One observer callback, as recorded.
#[derive(Debug, Clone)]
pub(crate) enum ObserverEvent {
    WillBegin(Action),
    Update(Status),
    Finished(ErrorCode, ActionSummary),
}

/// A [`StatusObserver`] that records callbacks in call order and lets tests
/// block until an action has finished.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
    finished: Condvar,
}

impl RecordingObserver {
    /// All callbacks recorded so far.
    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Blocks until the `count`-th finished callback has been recorded and
    /// returns its payload, or `None` on timeout.
    pub fn wait_for_finished(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Option<(ErrorCode, ActionSummary)> {
        let finished_events = |events: &[ObserverEvent]| {
            events
                .iter()
                .filter_map(|e| match e {
                    ObserverEvent::Finished(code, summary) => Some((*code, summary.clone())),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };

        let guard = self.events.lock().unwrap();
        let (guard, result) = self
            .finished
            .wait_timeout_while(guard, timeout, |events| {
                finished_events(events).len() < count
            })
            .unwrap();
        if result.timed_out() && finished_events(&guard).len() < count {
            return None;
        }
        finished_events(&guard).get(count - 1).cloned()
    }
}

impl StatusObserver for RecordingObserver {
    fn will_begin(&self, action: Action, _seconds_taken: f32, _estimated_total: f32) {
        self.events
            .lock()
            .unwrap()
            .push(ObserverEvent::WillBegin(action));
    }

    fn update(&self, status: Status, _seconds_taken: f32, _estimated_total: f32) {
        self.events
            .lock()
            .unwrap()
            .push(ObserverEvent::Update(status));
    }

    fn finished(&self, error_code: ErrorCode, _details: &str, summary: &ActionSummary) {
        self.events
            .lock()
            .unwrap()
            .push(ObserverEvent::Finished(error_code, summary.clone()));
        self.finished.notify_all();
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// The four 3BP response bytes the Propeller would send for the given chip
/// version.
pub(crate) fn version_response(version: u8) -> [u8; 4] {
    const PAIRS: [u8; 4] = [0xCE, 0xCF, 0xEE, 0xEF];
    let mut response = [0u8; 4];
    for (pair_index, byte) in response.iter_mut().enumerate() {
        *byte = PAIRS[usize::from((version >> (2 * pair_index)) & 0b11)];
    }
    response
}
