//! Thermal camera trap
//!
//! Decides, frame by frame, when a thermal camera should record.
//!
//! # Architecture
//!
//! Frames flow one way through a single-threaded pipeline:
//!
//! 1. A source (`ingest`) hands the next frame to the `MotionProcessor`.
//! 2. The processor copies it into its pre-trigger `FrameLoop` and asks the
//!    `MotionDetector` whether anything warm moved.
//! 3. After `trigger_frames` consecutive motion frames, and only inside the
//!    `RecordingWindow`, the processor starts a `Recorder`, flushes the
//!    pre-trigger history and keeps writing until the recording is long
//!    enough.
//! 4. `ThrottledRecorder` limits how much gets recorded when an animal (or a
//!    swaying branch) keeps the trap triggered for hours.
//!
//! # Module Structure
//!
//! - `frame`: frames, telemetry and the preallocated `FrameLoop`
//! - `detect`: frame-differencing motion detection
//! - `processor`: the idle/recording state machine
//! - `recorder`: the `Recorder` contract and its implementations
//! - `window`: daily time-of-day recording window
//! - `clock`: wall/monotonic time, injectable for tests
//! - `ingest`: frame sources
//! - `config`: JSON + environment configuration

pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod processor;
pub mod recorder;
pub mod window;

use chrono::NaiveTime;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrapConfig;
pub use detect::{Detection, DiffMode, MotionConfig, MotionDetector};
pub use frame::{Frame, FrameLoop, FrameShape, Telemetry};
pub use ingest::{open_source, FileSource, FrameSource, SyntheticSource};
pub use processor::{MotionProcessor, ProcessorConfig, RecordingState};
pub use recorder::{
    MemoryRecorder, NoopRecorder, RawFileRecorder, Recorder, ThrottleConfig, ThrottledRecorder,
};
pub use window::RecordingWindow;

/// A recording was not started because the trap is not allowed to record
/// right now. Expected during normal operation; callers log it quietly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordingDenied {
    OutsideWindow { start: NaiveTime, end: NaiveTime },
    CannotRecord(String),
}

impl std::fmt::Display for RecordingDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingDenied::OutsideWindow { start, end } => write!(
                f,
                "outside recording window {}-{}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ),
            RecordingDenied::CannotRecord(reason) => write!(f, "recorder unavailable: {}", reason),
        }
    }
}

impl std::error::Error for RecordingDenied {}
