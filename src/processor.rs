//! The per-frame recording state machine.
//!
//! `MotionProcessor` keeps a pre-trigger buffer of recent frames, runs motion
//! detection on each new frame, and decides when a `Recorder` should start,
//! receive frames and stop:
//!
//! 1. copy the frame into the pre-trigger loop and run the detector on it
//! 2. motion while idle: count consecutive triggers, start once debounced
//! 3. motion while recording: extend the recording up to the maximum length
//! 4. while recording: write the frame
//! 5. advance the loop; stop once enough frames are written
//!
//! Recorder failures are logged and never stop frame ingestion.

use anyhow::Result;

use crate::detect::{Detection, MotionConfig, MotionDetector};
use crate::frame::{Frame, FrameLoop, FrameShape};
use crate::recorder::Recorder;
use crate::window::RecordingWindow;
use crate::RecordingDenied;

/// Recording lengths and debounce, all in frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Frames kept from before motion was detected.
    pub preview_frames: usize,
    /// Consecutive motion frames required to start a recording.
    pub trigger_frames: usize,
    pub min_frames: usize,
    pub max_frames: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

/// Logs only the first failure of a streak of consecutive failing frames.
#[derive(Clone, Debug, Default)]
struct LogLimiter {
    last_failure: Option<u64>,
}

impl LogLimiter {
    /// Record a failure at `frame`; returns whether it should be logged.
    fn note(&mut self, frame: u64) -> bool {
        let new_streak = self.last_failure.map_or(true, |last| frame > last + 1);
        self.last_failure = Some(frame);
        new_streak
    }
}

pub struct MotionProcessor<R: Recorder> {
    config: ProcessorConfig,
    frame_loop: FrameLoop,
    detector: MotionDetector,
    window: RecordingWindow,
    recorder: R,
    state: RecordingState,
    total_frames: u64,
    triggered: usize,
    frames_written: usize,
    write_until: usize,
    recordings_started: u64,
    start_errors: LogLimiter,
    write_errors: LogLimiter,
}

impl<R: Recorder> MotionProcessor<R> {
    pub fn new(
        config: ProcessorConfig,
        motion: MotionConfig,
        shape: FrameShape,
        window: RecordingWindow,
        recorder: R,
    ) -> Result<Self> {
        if config.trigger_frames == 0 {
            anyhow::bail!("trigger_frames must be at least 1");
        }
        if config.min_frames == 0 || config.max_frames < config.min_frames {
            anyhow::bail!(
                "recording length must satisfy 0 < min ({}) <= max ({})",
                config.min_frames,
                config.max_frames
            );
        }
        let frame_loop = FrameLoop::new(config.preview_frames + config.trigger_frames, shape)?;
        let detector = MotionDetector::new(motion, shape)?;
        Ok(Self {
            config,
            frame_loop,
            detector,
            window,
            recorder,
            state: RecordingState::Idle,
            total_frames: 0,
            triggered: 0,
            frames_written: 0,
            write_until: 0,
            recordings_started: 0,
            start_errors: LogLimiter::default(),
            write_errors: LogLimiter::default(),
        })
    }

    /// Feed one frame through the pipeline.
    pub fn process(&mut self, raw: &Frame) -> Detection {
        self.frame_loop.current_mut().copy_from(raw);
        self.total_frames += 1;

        let detection = self.detector.detect(self.frame_loop.current());
        if detection.has_motion() {
            self.triggered += 1;
            match self.state {
                RecordingState::Recording => {
                    self.write_until = (self.frames_written + self.config.min_frames)
                        .min(self.config.max_frames);
                }
                RecordingState::Idle if self.triggered < self.config.trigger_frames => {}
                RecordingState::Idle => {
                    if let Err(e) = self.start_recording() {
                        if self.start_errors.note(self.total_frames) {
                            if e.is::<RecordingDenied>() {
                                log::info!("not recording: {}", e);
                            } else {
                                log::error!("failed to start recording: {:#}", e);
                            }
                        }
                    }
                }
            }
        } else {
            self.triggered = 0;
        }

        if self.state == RecordingState::Recording {
            if let Err(e) = self.recorder.write_frame(self.frame_loop.current()) {
                if self.write_errors.note(self.total_frames) {
                    log::error!("failed to write frame: {:#}", e);
                }
            }
            self.frames_written += 1;
        }

        self.frame_loop.advance();

        if self.state == RecordingState::Recording && self.frames_written >= self.write_until {
            self.stop_recording();
        }
        detection
    }

    /// Close any recording in progress (e.g. on camera disconnect).
    pub fn finish(&mut self) {
        if self.state == RecordingState::Recording {
            self.stop_recording();
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn recordings_started(&self) -> u64 {
        self.recordings_started
    }

    /// Owned copy of the most recently processed frame.
    pub fn latest_frame(&self) -> Frame {
        self.frame_loop.copy_recent()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut R {
        &mut self.recorder
    }

    fn start_recording(&mut self) -> Result<()> {
        if !self.window.active() {
            return Err(RecordingDenied::OutsideWindow {
                start: self.window.start(),
                end: self.window.end(),
            }
            .into());
        }
        if let Err(e) = self.recorder.check_can_record() {
            return Err(RecordingDenied::CannotRecord(format!("{:#}", e)).into());
        }
        self.recorder.start_recording()?;

        self.state = RecordingState::Recording;
        self.recordings_started += 1;
        self.write_until = self.config.min_frames;
        log::info!(
            "motion detected, recording started (frame {})",
            self.total_frames
        );

        // The newest history frame is the current one; process() writes it.
        let history = self.frame_loop.history();
        let preview = history.len().saturating_sub(1);
        for frame in &history[..preview] {
            if let Err(e) = self.recorder.write_frame(frame) {
                log::error!("failed to write pre-trigger frame: {:#}", e);
                break;
            }
        }
        Ok(())
    }

    fn stop_recording(&mut self) {
        if let Err(e) = self.recorder.stop_recording() {
            log::error!("failed to stop recording: {:#}", e);
        }
        log::info!("recording stopped after {} frames", self.frames_written);
        self.frames_written = 0;
        self.write_until = 0;
        self.triggered = 0;
        self.state = RecordingState::Idle;
        // Frames up to here were recorded; a quick re-trigger must not replay them.
        self.frame_loop.set_as_oldest();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::DiffMode;
    use crate::recorder::{MemoryRecorder, NoopRecorder};
    use chrono::NaiveTime;

    fn config(trigger_frames: usize, min_frames: usize, max_frames: usize) -> ProcessorConfig {
        ProcessorConfig {
            preview_frames: 2,
            trigger_frames,
            min_frames,
            max_frames,
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn rejects_invalid_lengths() {
        for (trigger, min, max) in [(0, 5, 10), (1, 0, 10), (1, 10, 5)] {
            let result = MotionProcessor::new(
                config(trigger, min, max),
                MotionConfig::default(),
                FrameShape::new(4, 4),
                RecordingWindow::always(),
                NoopRecorder,
            );
            assert!(result.is_err());
        }
    }

    #[test]
    fn admission_failures_are_typed() {
        let clock = ManualClock::new(t(12, 0));
        let window = RecordingWindow::new(t(20, 0), t(6, 0), Box::new(clock.clone()));
        let mut processor = MotionProcessor::new(
            config(1, 5, 10),
            MotionConfig::default(),
            FrameShape::new(4, 4),
            window,
            MemoryRecorder::new(),
        )
        .unwrap();

        let err = processor.start_recording().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecordingDenied>(),
            Some(RecordingDenied::OutsideWindow { .. })
        ));

        clock.set_time_of_day(t(22, 0));
        processor.recorder_mut().deny_recording(Some("disk full"));
        let err = processor.start_recording().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecordingDenied>(),
            Some(RecordingDenied::CannotRecord(_))
        ));
        assert!(!processor.is_recording());

        processor.recorder_mut().deny_recording(None);
        processor.start_recording().unwrap();
        assert!(processor.is_recording());
        // a fresh loop only holds the current slot, so nothing is flushed
        assert!(processor.recorder().clips()[0].is_empty());
    }

    #[test]
    fn log_limiter_logs_once_per_streak() {
        let mut limiter = LogLimiter::default();
        assert!(limiter.note(10));
        assert!(!limiter.note(11));
        assert!(!limiter.note(12));
        // gap in failures starts a new streak
        assert!(limiter.note(20));
        assert!(!limiter.note(21));
    }

    #[test]
    fn long_failure_streak_is_logged_once() {
        let mut limiter = LogLimiter::default();
        let logged = (1..=10_000).filter(|&frame| limiter.note(frame)).count();
        assert_eq!(logged, 1);
        assert!(limiter.note(10_002));
    }

    #[test]
    fn denied_recordings_are_retried_every_motion_frame() {
        let clock = ManualClock::new(t(12, 0));
        let window = RecordingWindow::new(t(20, 0), t(6, 0), Box::new(clock.clone()));
        let motion = MotionConfig {
            temp_thresh: 0,
            delta_thresh: 10,
            count_thresh: 1,
            nonzero_max_percent: 100,
            frame_compare_gap: 1,
            use_one_diff_only: true,
            diff_mode: DiffMode::Absolute,
            verbose: false,
        };
        let shape = FrameShape::new(4, 4);
        let mut processor =
            MotionProcessor::new(config(1, 5, 10), motion, shape, window, MemoryRecorder::new())
                .unwrap();

        for n in 0..20u16 {
            let mut frame = Frame::new(shape);
            frame.pixels_mut().fill(1000 + 100 * (n % 2));
            processor.process(&frame);
        }
        assert!(!processor.is_recording());
        assert_eq!(processor.start_errors.last_failure, Some(20));

        // once the window opens the next motion frame starts a recording
        clock.set_time_of_day(t(22, 0));
        let mut frame = Frame::new(shape);
        frame.pixels_mut().fill(1000);
        processor.process(&frame);
        assert!(processor.is_recording());
    }
}
