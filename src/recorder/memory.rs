use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::recorder::Recorder;

/// Frame numbers of one finished or in-progress recording.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordedClip {
    pub frames: Vec<u64>,
    pub finished: bool,
}

impl RecordedClip {
    pub fn first(&self) -> Option<u64> {
        self.frames.first().copied()
    }

    pub fn last(&self) -> Option<u64> {
        self.frames.last().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// In-memory recorder that keeps the telemetry frame number of every frame
/// it is given, grouped by recording.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    clips: Vec<RecordedClip>,
    recording: bool,
    deny_reason: Option<String>,
    fail_writes: bool,
    fail_starts: bool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `check_can_record` fail with `reason` (e.g. "disk full").
    pub fn deny_recording(&mut self, reason: Option<&str>) {
        self.deny_reason = reason.map(str::to_string);
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn fail_starts(&mut self, fail: bool) {
        self.fail_starts = fail;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn clips(&self) -> &[RecordedClip] {
        &self.clips
    }

    pub fn total_frames(&self) -> usize {
        self.clips.iter().map(RecordedClip::len).sum()
    }
}

impl Recorder for MemoryRecorder {
    fn check_can_record(&mut self) -> Result<()> {
        match &self.deny_reason {
            Some(reason) => Err(anyhow!("cannot record: {}", reason)),
            None => Ok(()),
        }
    }

    fn start_recording(&mut self) -> Result<()> {
        if self.fail_starts {
            return Err(anyhow!("start failed"));
        }
        if self.recording {
            return Err(anyhow!("already recording"));
        }
        self.recording = true;
        self.clips.push(RecordedClip::default());
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.fail_writes {
            return Err(anyhow!("write failed"));
        }
        match self.clips.last_mut() {
            Some(clip) if self.recording => {
                clip.frames.push(frame.status.frame_count);
                Ok(())
            }
            _ => Err(anyhow!("write_frame called while not recording")),
        }
    }

    fn stop_recording(&mut self) -> Result<()> {
        if !self.recording {
            return Err(anyhow!("stop_recording called while not recording"));
        }
        self.recording = false;
        if let Some(clip) = self.clips.last_mut() {
            clip.finished = true;
        }
        Ok(())
    }
}
