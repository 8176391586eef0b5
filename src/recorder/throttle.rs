//! Token-bucket throttling of recordings.
//!
//! Two buckets, both counted in frames:
//! - the main bucket holds `throttle_after_secs * fps` frames of recording
//!   budget. Every written frame spends a token; tokens come back at
//!   `refill_rate * fps` per second while no recording is in progress.
//! - the sparse bucket measures how long motion has been throttled. Every
//!   frame offered while throttled adds a token. Once it holds
//!   `sparse_after_secs * fps` tokens, the next start receives a one-off
//!   bonus of `sparse_length_secs * fps` main tokens so that a short clip gets
//!   through even during endless triggering.
//!
//! Refusing a recording for lack of tokens is policy, not failure: the
//! recorder reports success and silently drops frames.

use anyhow::Result;
use std::time::Instant;

use crate::clock::Clock;
use crate::frame::Frame;
use crate::recorder::Recorder;

#[derive(Clone, Debug, PartialEq)]
pub struct ThrottleConfig {
    pub throttle_after_secs: u32,
    pub sparse_after_secs: u32,
    pub sparse_length_secs: u32,
    /// Seconds of recording budget regained per idle second.
    pub refill_rate: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            throttle_after_secs: 600,
            sparse_after_secs: 3600,
            sparse_length_secs: 30,
            refill_rate: 1.0,
        }
    }
}

/// Capacity-bounded token counter. Invariant: `0 <= tokens <= size`.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenBucket {
    tokens: f64,
    size: f64,
}

impl TokenBucket {
    pub fn full(size: f64) -> Self {
        let size = size.max(0.0);
        Self { tokens: size, size }
    }

    pub fn empty(size: f64) -> Self {
        Self {
            tokens: 0.0,
            size: size.max(0.0),
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn add(&mut self, tokens: f64) {
        self.tokens = (self.tokens + tokens.max(0.0)).min(self.size);
    }

    /// Take `tokens` if that many are available.
    pub fn remove(&mut self, tokens: f64) -> bool {
        if self.has(tokens) {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    pub fn has(&self, tokens: f64) -> bool {
        self.tokens >= tokens
    }

    pub fn is_full(&self) -> bool {
        self.tokens >= self.size
    }

    pub fn clear(&mut self) {
        self.tokens = 0.0;
    }
}

/// `Recorder` that only lets recordings through while budget remains.
pub struct ThrottledRecorder<R: Recorder> {
    inner: R,
    clock: Box<dyn Clock>,
    main: TokenBucket,
    sparse: TokenBucket,
    sparse_bonus: f64,
    min_tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    recording: bool,
    throttle_logged: bool,
    frames: u64,
    throttled_frames: u64,
    total_throttled: u64,
}

impl<R: Recorder> ThrottledRecorder<R> {
    /// `min_recording_frames` is the shortest recording worth starting.
    pub fn new(
        inner: R,
        config: &ThrottleConfig,
        fps: u32,
        min_recording_frames: usize,
        clock: Box<dyn Clock>,
    ) -> Self {
        let fps = f64::from(fps);
        let last_refill = clock.now();
        Self {
            inner,
            clock,
            main: TokenBucket::full(f64::from(config.throttle_after_secs) * fps),
            sparse: TokenBucket::empty(f64::from(config.sparse_after_secs) * fps),
            sparse_bonus: f64::from(config.sparse_length_secs) * fps,
            min_tokens: min_recording_frames as f64,
            refill_per_sec: config.refill_rate.max(0.0) * fps,
            last_refill,
            recording: false,
            throttle_logged: false,
            frames: 0,
            throttled_frames: 0,
            total_throttled: 0,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn main_bucket(&self) -> &TokenBucket {
        &self.main
    }

    pub fn sparse_bucket(&self) -> &TokenBucket {
        &self.sparse
    }

    /// Frames dropped since the throttler was created.
    pub fn total_throttled(&self) -> u64 {
        self.total_throttled
    }

    fn refill(&mut self) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        if !self.recording {
            self.main.add(elapsed.as_secs_f64() * self.refill_per_sec);
        }
    }

    fn drop_frame(&mut self) {
        self.throttled_frames += 1;
        self.total_throttled += 1;
    }
}

impl<R: Recorder> Recorder for ThrottledRecorder<R> {
    fn check_can_record(&mut self) -> Result<()> {
        self.inner.check_can_record()
    }

    fn start_recording(&mut self) -> Result<()> {
        if self.recording {
            return Ok(());
        }
        self.refill();

        let sparse_ready = self.sparse.size() > 0.0 && self.sparse.is_full();
        let bonus = if sparse_ready { self.sparse_bonus } else { 0.0 };
        let available = (self.main.tokens() + bonus).min(self.main.size());
        if available < self.min_tokens {
            if !self.throttle_logged {
                log::info!(
                    "recording throttled ({:.0} frames of budget, {:.0} needed)",
                    self.main.tokens(),
                    self.min_tokens
                );
                self.throttle_logged = true;
            }
            return Ok(());
        }

        // Buckets only change once the inner recorder has started.
        self.inner.start_recording()?;
        if sparse_ready {
            log::info!(
                "throttled for {:.0} frames, allowing a sparse recording",
                self.sparse.size()
            );
            self.main.add(bonus);
        }
        self.recording = true;
        self.throttle_logged = false;
        self.sparse.clear();
        self.frames = 0;
        self.throttled_frames = 0;
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.refill();
        if !self.recording {
            self.sparse.add(1.0);
            self.drop_frame();
            return Ok(());
        }
        if self.main.remove(1.0) {
            self.frames += 1;
            self.inner.write_frame(frame)
        } else {
            self.drop_frame();
            Ok(())
        }
    }

    fn stop_recording(&mut self) -> Result<()> {
        self.refill();
        if !self.recording {
            if self.throttled_frames > 0 {
                log::debug!("dropped {} frames while throttled", self.throttled_frames);
            }
            self.throttled_frames = 0;
            return Ok(());
        }

        self.recording = false;
        if self.throttled_frames > 0 {
            log::info!(
                "recording ran out of budget: {} frames written, {} throttled",
                self.frames,
                self.throttled_frames
            );
        }
        self.frames = 0;
        self.throttled_frames = 0;
        self.inner.stop_recording()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::FrameShape;
    use crate::recorder::MemoryRecorder;
    use std::time::Duration;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            throttle_after_secs: 10,
            sparse_after_secs: 5,
            sparse_length_secs: 3,
            refill_rate: 1.0,
        }
    }

    /// fps 1 so that seconds and frames line up.
    fn throttler(clock: &ManualClock) -> ThrottledRecorder<MemoryRecorder> {
        ThrottledRecorder::new(MemoryRecorder::new(), &config(), 1, 2, Box::new(clock.clone()))
    }

    fn write(throttler: &mut ThrottledRecorder<MemoryRecorder>, count: u64) {
        let mut frame = Frame::new(FrameShape::new(1, 1));
        for n in 0..count {
            frame.status.frame_count = n;
            throttler.write_frame(&frame).unwrap();
        }
    }

    fn exhaust(throttler: &mut ThrottledRecorder<MemoryRecorder>) {
        throttler.start_recording().unwrap();
        write(throttler, 15);
        throttler.stop_recording().unwrap();
    }

    #[test]
    fn bucket_clamps_and_refuses_overdraw() {
        let mut bucket = TokenBucket::full(5.0);
        bucket.add(10.0);
        assert_eq!(bucket.tokens(), 5.0);
        assert!(bucket.remove(5.0));
        assert!(!bucket.remove(1.0));
        assert_eq!(bucket.tokens(), 0.0);
        bucket.add(-3.0);
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn recording_limited_to_bucket_size() {
        let clock = ManualClock::default();
        let mut throttler = throttler(&clock);
        exhaust(&mut throttler);

        let clips = throttler.inner().clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].frames, (0..10).collect::<Vec<u64>>());
        assert_eq!(throttler.total_throttled(), 5);
        assert_eq!(throttler.main_bucket().tokens(), 0.0);
    }

    #[test]
    fn denied_start_is_silent() {
        let clock = ManualClock::default();
        let mut throttler = throttler(&clock);
        exhaust(&mut throttler);

        assert!(throttler.start_recording().is_ok());
        assert!(!throttler.is_recording());
        write(&mut throttler, 3);
        assert!(throttler.stop_recording().is_ok());
        assert_eq!(throttler.inner().clips().len(), 1);
    }

    #[test]
    fn sustained_throttling_earns_one_sparse_recording() {
        let clock = ManualClock::default();
        let mut throttler = throttler(&clock);
        exhaust(&mut throttler);

        // throttled motion fills the sparse bucket
        throttler.start_recording().unwrap();
        write(&mut throttler, 5);
        throttler.stop_recording().unwrap();
        assert!(throttler.sparse_bucket().is_full());

        throttler.start_recording().unwrap();
        assert!(throttler.is_recording());
        assert_eq!(throttler.sparse_bucket().tokens(), 0.0);
        write(&mut throttler, 5);
        throttler.stop_recording().unwrap();
        assert_eq!(throttler.inner().clips()[1].len(), 3);

        // the bonus is not granted again until the sparse bucket refills
        throttler.start_recording().unwrap();
        assert!(!throttler.is_recording());
    }

    #[test]
    fn failed_start_keeps_sparse_bonus() {
        let clock = ManualClock::default();
        let mut throttler = throttler(&clock);
        exhaust(&mut throttler);
        throttler.start_recording().unwrap();
        write(&mut throttler, 5);
        throttler.stop_recording().unwrap();
        assert!(throttler.sparse_bucket().is_full());

        throttler.inner_mut().fail_starts(true);
        assert!(throttler.start_recording().is_err());
        assert!(!throttler.is_recording());
        assert!(throttler.sparse_bucket().is_full());
        assert_eq!(throttler.main_bucket().tokens(), 0.0);

        throttler.inner_mut().fail_starts(false);
        throttler.start_recording().unwrap();
        assert!(throttler.is_recording());
        write(&mut throttler, 5);
        throttler.stop_recording().unwrap();
        assert_eq!(throttler.inner().clips()[1].len(), 3);
    }

    #[test]
    fn idle_time_refills_main_bucket() {
        let clock = ManualClock::default();
        let mut throttler = throttler(&clock);
        exhaust(&mut throttler);

        clock.advance(Duration::from_secs(4));
        throttler.start_recording().unwrap();
        assert!(throttler.is_recording());
        write(&mut throttler, 6);
        throttler.stop_recording().unwrap();
        assert_eq!(throttler.inner().clips()[1].len(), 4);

        clock.advance(Duration::from_secs(1000));
        throttler.start_recording().unwrap();
        assert_eq!(throttler.main_bucket().tokens(), 10.0);
    }

    #[test]
    fn no_refill_while_recording() {
        let clock = ManualClock::default();
        let mut throttler = throttler(&clock);
        throttler.start_recording().unwrap();
        write(&mut throttler, 5);
        clock.advance(Duration::from_secs(100));
        write(&mut throttler, 10);
        throttler.stop_recording().unwrap();
        assert_eq!(throttler.inner().total_frames(), 10);

        clock.advance(Duration::from_secs(3));
        throttler.start_recording().unwrap();
        assert_eq!(throttler.main_bucket().tokens(), 3.0);
    }

    #[test]
    fn too_little_budget_for_minimum_length() {
        let clock = ManualClock::default();
        let mut throttler = throttler(&clock);
        exhaust(&mut throttler);
        clock.advance(Duration::from_secs(1));
        throttler.start_recording().unwrap();
        assert!(!throttler.is_recording());
        assert_eq!(throttler.main_bucket().tokens(), 1.0);
    }
}
