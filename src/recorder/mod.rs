//! Recording sinks.
//!
//! `MotionProcessor` drives a `Recorder` and never looks at how frames are
//! stored. Implementations:
//! - `NoopRecorder`: accepts and discards everything
//! - `MemoryRecorder`: keeps frame numbers in memory (tests, simulations)
//! - `ThrottledRecorder`: token-bucket admission in front of another recorder
//! - `RawFileRecorder`: one `.tframes` file per recording
//!
//! Recorders may block on I/O. Errors are reported to the caller, which logs
//! them and keeps consuming frames.

pub mod file;
mod memory;
pub mod throttle;

use anyhow::Result;

use crate::frame::Frame;

pub use file::RawFileRecorder;
pub use memory::{MemoryRecorder, RecordedClip};
pub use throttle::{ThrottleConfig, ThrottledRecorder, TokenBucket};

pub trait Recorder {
    /// External preconditions for starting a recording (e.g. free disk space).
    fn check_can_record(&mut self) -> Result<()>;

    fn start_recording(&mut self) -> Result<()>;

    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    fn stop_recording(&mut self) -> Result<()>;
}

impl<R: Recorder + ?Sized> Recorder for Box<R> {
    fn check_can_record(&mut self) -> Result<()> {
        (**self).check_can_record()
    }

    fn start_recording(&mut self) -> Result<()> {
        (**self).start_recording()
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn stop_recording(&mut self) -> Result<()> {
        (**self).stop_recording()
    }
}

/// Recorder that stores nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn check_can_record(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_recording(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        Ok(())
    }
}
