//! Per-stage timing and remaining-time estimation.

use std::time::{Duration, Instant};

use super::{Action, ErrorCode};
use crate::protocol::payloads::INIT_BYTES;

// =============================================================================
// Public Interface
// =============================================================================

/// Performance information about a loader action.
///
/// A summary is passed to
/// [`StatusObserver::finished`](super::StatusObserver::finished). Until the
/// action finishes the information is current up to the last completed
/// stage. Times are in floating point seconds.
#[derive(Debug, Clone, Default)]
pub struct ActionSummary {
    /// The action performed.
    pub action: Action,
    /// Whether the action was successful.
    pub was_successful: bool,
    /// The type of error if the action was unsuccessful.
    pub error_code: ErrorCode,
    /// The baudrate used when performing the action.
    pub baudrate: u32,
    /// The reset duration used when performing the action.
    pub reset_duration: Duration,
    /// The boot wait duration used when performing the action.
    pub boot_wait_duration: Duration,
    /// The size of the image, in bytes.
    pub image_size: usize,
    /// The number of bytes required to transmit the 3BP encoded image.
    pub encoded_image_size: usize,

    /// Sum of all stages.
    pub total_time: f32,
    /// Stage 1: preparation.
    pub stage1_time: f32,
    /// Stage 2: reset and wait (2a + 2b).
    pub stage2_time: f32,
    /// Stage 2a: reset.
    pub stage2a_time: f32,
    /// Stage 2b: wait after reset.
    pub stage2b_time: f32,
    /// Stage 3: establish communications.
    pub stage3_time: f32,
    /// Stage 4: send command and image (4a + 4b).
    pub stage4_time: f32,
    /// Stage 4a: send command.
    pub stage4a_time: f32,
    /// Stage 4b: send image.
    ///
    /// Stage 5 deliberately begins while the tail of the image is still on
    /// the wire (everything has been buffered), so this reads slightly short
    /// and `stage5_time` slightly long -- the deviation is approximately the
    /// early stage-4 return interval.
    pub stage4b_time: f32,
    /// Stage 5: wait for checksum status.
    pub stage5_time: f32,
    /// Stage 6: wait for EEPROM programming status.
    pub stage6_time: f32,
    /// Stage 7: wait for EEPROM verification status.
    pub stage7_time: f32,
    /// Image encoding, which happens before the worker spawns.
    pub encoding_time: f32,
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Tracks the performance of an action and estimates the time remaining.
///
/// The stage end functions must be called in protocol order; each one laps a
/// steady monotonic clock.
#[derive(Debug, Clone)]
pub(crate) struct Profiler {
    summary: ActionSummary,
    stage: Stage,
    stage_start: Instant,
    encoding_start: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Stage1,
    Stage2a,
    Stage2b,
    Stage3,
    Stage4a,
    Stage4b,
    Stage5,
    Stage6,
    Stage7,
    Finished,
}

impl Profiler {
    pub fn start(
        action: Action,
        baudrate: u32,
        reset_duration: Duration,
        boot_wait_duration: Duration,
    ) -> Self {
        Profiler {
            summary: ActionSummary {
                action,
                baudrate,
                reset_duration,
                boot_wait_duration,
                ..ActionSummary::default()
            },
            stage: Stage::Stage1,
            stage_start: Instant::now(),
            encoding_start: None,
        }
    }

    pub fn summary(&self) -> &ActionSummary {
        &self.summary
    }

    /// Called before encoding, if the action requires an image.
    pub fn will_start_encoding_image(&mut self, image_size: usize) {
        self.summary.image_size = image_size;
        self.encoding_start = Some(Instant::now());
    }

    /// Called after encoding. `encoded_image_size` is the size of the byte
    /// buffer holding the encoded image, not the size of the original.
    pub fn finished_encoding_image(&mut self, encoded_image_size: usize) {
        if let Some(start) = self.encoding_start.take() {
            self.summary.encoding_time = start.elapsed().as_secs_f32();
        }
        self.summary.encoded_image_size = encoded_image_size;
    }

    /// The estimated total time for completing the action, in seconds:
    /// time spent so far plus heuristic estimates for the remaining stages.
    ///
    /// Stage estimates use the wire time at the action's baudrate where one
    /// is computable and observed Propeller timings (at roughly 12 MHz)
    /// where not. Stages the action skips contribute nothing.
    pub fn estimated_total_time(&self) -> f32 {
        let s = &self.summary;
        let seconds_per_byte = 10.0 / s.baudrate as f32;
        let mut estimate = s.total_time;
        if self.stage <= Stage::Stage1 {
            // A token amount, so the estimate is never zero.
            estimate += 0.1;
        }
        if self.stage <= Stage::Stage2a {
            estimate += s.reset_duration.as_secs_f32();
            if s.action == Action::Restart {
                return estimate;
            }
        }
        if self.stage <= Stage::Stage2b {
            estimate += s.boot_wait_duration.as_secs_f32();
        }
        if self.stage <= Stage::Stage3 {
            estimate += INIT_BYTES.len() as f32 * seconds_per_byte;
        }
        if self.stage <= Stage::Stage4a {
            // The command itself is insignificant (eleven bytes).
            if s.action == Action::Shutdown {
                return estimate;
            }
        }
        if self.stage <= Stage::Stage4b {
            estimate += s.encoded_image_size as f32 * seconds_per_byte;
        }
        if self.stage <= Stage::Stage5 {
            estimate += 0.1;
            if s.action == Action::LoadRam {
                return estimate;
            }
        }
        if self.stage <= Stage::Stage6 {
            estimate += 3.7;
        }
        if self.stage <= Stage::Stage7 {
            estimate += 1.3;
        }
        estimate
    }

    pub fn end_stage1(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage1);
        self.stage = Stage::Stage2a;
        self.summary.stage1_time = self.lap();
        self.summary.total_time += self.summary.stage1_time;
    }

    pub fn end_stage2a(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage2a);
        self.stage = Stage::Stage2b;
        self.summary.stage2a_time = self.lap();
        self.summary.stage2_time = self.summary.stage2a_time;
        self.summary.total_time += self.summary.stage2a_time;
    }

    pub fn end_stage2b(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage2b);
        self.stage = Stage::Stage3;
        self.summary.stage2b_time = self.lap();
        self.summary.stage2_time += self.summary.stage2b_time;
        self.summary.total_time += self.summary.stage2b_time;
    }

    pub fn end_stage3(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage3);
        self.stage = Stage::Stage4a;
        self.summary.stage3_time = self.lap();
        self.summary.total_time += self.summary.stage3_time;
    }

    pub fn end_stage4a(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage4a);
        self.stage = Stage::Stage4b;
        self.summary.stage4a_time = self.lap();
        self.summary.stage4_time = self.summary.stage4a_time;
        self.summary.total_time += self.summary.stage4a_time;
    }

    pub fn end_stage4b(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage4b);
        self.stage = Stage::Stage5;
        self.summary.stage4b_time = self.lap();
        self.summary.stage4_time += self.summary.stage4b_time;
        self.summary.total_time += self.summary.stage4b_time;
    }

    pub fn end_stage5(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage5);
        self.stage = Stage::Stage6;
        self.summary.stage5_time = self.lap();
        self.summary.total_time += self.summary.stage5_time;
    }

    pub fn end_stage6(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage6);
        self.stage = Stage::Stage7;
        self.summary.stage6_time = self.lap();
        self.summary.total_time += self.summary.stage6_time;
    }

    pub fn end_stage7(&mut self) {
        debug_assert_eq!(self.stage, Stage::Stage7);
        self.summary.stage7_time = self.lap();
        self.summary.total_time += self.summary.stage7_time;
    }

    /// Marks the action successful. Either this or `end_with_error` is
    /// called, exactly once.
    pub fn end_ok(&mut self) {
        self.stage = Stage::Finished;
        self.summary.was_successful = true;
    }

    /// Closes out the stage the action failed in and records the error.
    pub fn end_with_error(&mut self, error_code: ErrorCode) {
        match self.stage {
            Stage::Stage1 => self.end_stage1(),
            Stage::Stage2a => self.end_stage2a(),
            Stage::Stage2b => self.end_stage2b(),
            Stage::Stage3 => self.end_stage3(),
            Stage::Stage4a => self.end_stage4a(),
            Stage::Stage4b => self.end_stage4b(),
            Stage::Stage5 => self.end_stage5(),
            Stage::Stage6 => self.end_stage6(),
            Stage::Stage7 => self.end_stage7(),
            Stage::Finished => {}
        }
        self.stage = Stage::Finished;
        self.summary.was_successful = false;
        self.summary.error_code = error_code;
    }

    /// Time since the last lap, like the lap feature of a stopwatch.
    fn lap(&mut self) -> f32 {
        let now = Instant::now();
        let time = (now - self.stage_start).as_secs_f32();
        self.stage_start = now;
        time
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
