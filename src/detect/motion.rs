use anyhow::{bail, Result};

use crate::detect::result::Detection;
use crate::frame::{Frame, FrameLoop, FrameShape};

/// How two floored frames are compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffMode {
    /// `|a - b|`
    Absolute,
    /// `max(0, a - b)`: only newly warm pixels count, so an animal leaving
    /// the frame does not trigger.
    WarmerOnly,
}

#[derive(Clone, Debug)]
pub struct MotionConfig {
    /// Pixels colder than this are raised to it before comparison.
    pub temp_thresh: u16,
    /// Minimum per-pixel change that counts.
    pub delta_thresh: u16,
    /// Changed pixels needed to report motion.
    pub count_thresh: usize,
    /// Percentage of pixels that may differ before the frame is treated as a
    /// recalibration instead of motion.
    pub nonzero_max_percent: u8,
    /// Frames between a frame and the one it is compared against.
    pub frame_compare_gap: usize,
    /// Evaluate a single diff instead of requiring a change in two
    /// consecutive diffs.
    pub use_one_diff_only: bool,
    pub diff_mode: DiffMode,
    /// Log per-frame pixel statistics at debug level.
    pub verbose: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            temp_thresh: 2900,
            delta_thresh: 50,
            count_thresh: 3,
            nonzero_max_percent: 50,
            frame_compare_gap: 45,
            use_one_diff_only: true,
            diff_mode: DiffMode::WarmerOnly,
            verbose: false,
        }
    }
}

/// Thresholded frame-differencing motion detector.
///
/// Each frame is floored and compared with the floored frame
/// `frame_compare_gap` frames earlier, so the first `frame_compare_gap`
/// frames report `NoData` and frame `frame_compare_gap + 1` is the first
/// measurement. Filling the history counts as priming: its diffs are left
/// empty, which makes the first two-diff measurement 0. After a
/// recalibration the first comparison against the new baseline only primes
/// the detector and reports `NoData`.
pub struct MotionDetector {
    config: MotionConfig,
    floored: FrameLoop,
    diffs: FrameLoop,
    /// Floored frames written so far, saturating at the ring size.
    seen: usize,
    primed: bool,
    nonzero_limit: usize,
}

impl MotionDetector {
    pub fn new(config: MotionConfig, shape: FrameShape) -> Result<Self> {
        if config.frame_compare_gap == 0 {
            bail!("frame_compare_gap must be at least 1");
        }
        if config.nonzero_max_percent == 0 || config.nonzero_max_percent > 100 {
            bail!(
                "nonzero_max_percent must be in 1..=100 (got {})",
                config.nonzero_max_percent
            );
        }
        let floored = FrameLoop::new(config.frame_compare_gap + 1, shape)?;
        let diffs = FrameLoop::new(2, shape)?;
        let nonzero_limit = shape.pixel_count() * config.nonzero_max_percent as usize / 100;
        Ok(Self {
            config,
            floored,
            diffs,
            seen: 0,
            primed: false,
            nonzero_limit,
        })
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Pixel count above which a change is treated as recalibration.
    pub fn nonzero_limit(&self) -> usize {
        self.nonzero_limit
    }

    pub fn detect(&mut self, frame: &Frame) -> Detection {
        floor_into(frame, self.floored.current_mut(), self.config.temp_thresh);
        self.seen = (self.seen + 1).min(self.floored.size());
        let comparable =
            self.floored.oldest_marker().is_some() || self.seen == self.floored.size();

        if comparable {
            let current = self.floored.current();
            let compare = self.floored.oldest();
            let diff = self.diffs.current_mut();
            match self.config.diff_mode {
                DiffMode::Absolute => abs_diff_into(current, compare, diff),
                DiffMode::WarmerOnly => warmer_diff_into(current, compare, diff),
            }
        } else {
            self.diffs.current_mut().fill(0);
            self.primed = true;
        }
        self.diffs.advance();

        let detection = if !comparable {
            Detection::NoData
        } else if !self.primed {
            self.primed = true;
            Detection::NoData
        } else {
            self.evaluate()
        };

        // Must happen after evaluate: a recalibration marks the slot just written.
        self.floored.advance();
        detection
    }

    fn evaluate(&mut self) -> Detection {
        let latest = self.diffs.recent();
        let (changed, nonzero) = if self.config.use_one_diff_only {
            count_one(latest, self.config.delta_thresh)
        } else {
            count_two(latest, self.diffs.current(), self.config.delta_thresh)
        };

        if self.config.verbose {
            log::debug!(
                "motion: changed={} nonzero={} limit={}",
                changed,
                nonzero,
                self.nonzero_limit
            );
        }

        if nonzero > self.nonzero_limit {
            log::debug!(
                "motion: {} pixels changed at once, assuming sensor recalibration",
                nonzero
            );
            self.floored.set_as_oldest();
            self.primed = false;
            return Detection::Recalibration { nonzero };
        }

        Detection::Measured {
            changed,
            motion: changed >= self.config.count_thresh,
        }
    }
}

fn floor_into(src: &Frame, dst: &mut Frame, floor: u16) {
    dst.copy_from(src);
    for pixel in dst.pixels_mut() {
        *pixel = (*pixel).max(floor);
    }
}

fn abs_diff_into(a: &Frame, b: &Frame, out: &mut Frame) {
    for ((o, &x), &y) in out.pixels_mut().iter_mut().zip(a.pixels()).zip(b.pixels()) {
        *o = x.abs_diff(y);
    }
}

fn warmer_diff_into(a: &Frame, b: &Frame, out: &mut Frame) {
    for ((o, &x), &y) in out.pixels_mut().iter_mut().zip(a.pixels()).zip(b.pixels()) {
        *o = x.saturating_sub(y);
    }
}

/// (pixels above `delta`, nonzero pixels) for a single diff.
fn count_one(diff: &Frame, delta: u16) -> (usize, usize) {
    diff.pixels()
        .iter()
        .filter(|&&v| v > 0)
        .fold((0, 0), |(changed, nonzero), &v| {
            (changed + usize::from(v > delta), nonzero + 1)
        })
}

/// Pixels above `delta` in both diffs, and pixels nonzero in either.
fn count_two(latest: &Frame, previous: &Frame, delta: u16) -> (usize, usize) {
    latest
        .pixels()
        .iter()
        .zip(previous.pixels())
        .filter(|&(&a, &b)| a > 0 || b > 0)
        .fold((0, 0), |(changed, nonzero), (&a, &b)| {
            (changed + usize::from(a > delta && b > delta), nonzero + 1)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKGROUND: u16 = 3300;
    const DOT: u16 = 3500;

    fn shape() -> FrameShape {
        FrameShape::new(10, 10)
    }

    fn config(gap: usize, one_diff: bool, mode: DiffMode) -> MotionConfig {
        MotionConfig {
            temp_thresh: 3000,
            delta_thresh: 50,
            count_thresh: 4,
            nonzero_max_percent: 30,
            frame_compare_gap: gap,
            use_one_diff_only: one_diff,
            diff_mode: mode,
            verbose: false,
        }
    }

    fn background() -> Frame {
        let mut frame = Frame::new(shape());
        frame.fill(BACKGROUND);
        frame
    }

    /// 3x3 warm dot at rows 2..=4 whose left column is `k + 1`.
    fn dot_frame(k: usize) -> Frame {
        let mut frame = background();
        for row in 2..=4 {
            for col in k + 1..=k + 3 {
                frame.set(row, col, DOT);
            }
        }
        frame
    }

    fn run(detector: &mut MotionDetector, frames: &[Frame]) -> Vec<Detection> {
        frames.iter().map(|f| detector.detect(f)).collect()
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(MotionDetector::new(config(0, true, DiffMode::Absolute), shape()).is_err());
        let mut cfg = config(3, true, DiffMode::Absolute);
        cfg.nonzero_max_percent = 0;
        assert!(MotionDetector::new(cfg, shape()).is_err());
    }

    #[test]
    fn no_data_for_first_gap_frames() {
        let mut detector =
            MotionDetector::new(config(3, false, DiffMode::Absolute), shape()).unwrap();
        let frames: Vec<Frame> = (1..=6).map(dot_frame).collect();
        let results = run(&mut detector, &frames);
        assert!(results[..3].iter().all(|r| *r == Detection::NoData));
        // frame gap + 1 is measured; its previous diff is still empty
        assert_eq!(
            results[3],
            Detection::Measured {
                changed: 0,
                motion: false
            }
        );
        assert!(results[4..].iter().all(|r| r.has_motion()));
    }

    #[test]
    fn moving_dot_two_diff_absolute() {
        let mut detector =
            MotionDetector::new(config(3, false, DiffMode::Absolute), shape()).unwrap();
        let frames: Vec<Frame> = (1..=6).map(dot_frame).collect();
        let stats: Vec<i64> = run(&mut detector, &frames)
            .iter()
            .map(|r| r.pixel_stat())
            .collect();
        // old and new dot positions never overlap with a gap of 3, so each diff
        // covers 6 columns; consecutive diffs share 5 of them
        assert_eq!(stats, vec![-1, -1, -1, 0, 15, 15]);
    }

    /// Warm pixels that switch on at a given frame and stay warm.
    fn spreading_frames(count: u64) -> Vec<Frame> {
        let patches: [(u64, &[(usize, usize)]); 3] = [
            (4, &[(1, 1), (1, 2), (2, 1), (2, 2)]),
            (6, &[(5, 0), (5, 1), (5, 2), (5, 3), (5, 4)]),
            (7, &[(7, 7), (7, 8), (8, 7), (8, 8)]),
        ];
        (1..=count)
            .map(|n| {
                let mut frame = background();
                for (on_at, pixels) in patches {
                    if n >= on_at {
                        for &(row, col) in pixels {
                            frame.set(row, col, DOT);
                        }
                    }
                }
                frame
            })
            .collect()
    }

    #[test]
    fn two_diff_counts_pixels_changed_in_consecutive_diffs() {
        let mut detector =
            MotionDetector::new(config(3, false, DiffMode::Absolute), shape()).unwrap();
        let results = run(&mut detector, &spreading_frames(10));
        let stats: Vec<i64> = results.iter().map(|r| r.pixel_stat()).collect();
        let flags: Vec<bool> = results.iter().map(|r| r.has_motion()).collect();

        assert_eq!(stats, vec![-1, -1, -1, 0, 4, 4, 5, 9, 4, 0]);
        assert_eq!(
            flags[3..8].to_vec(),
            vec![false, true, true, true, true]
        );
        assert!(flags[8]);
        assert!(!flags[9]);
    }

    #[test]
    fn moving_dot_one_diff_absolute() {
        let mut detector =
            MotionDetector::new(config(3, true, DiffMode::Absolute), shape()).unwrap();
        let frames: Vec<Frame> = (1..=6).map(dot_frame).collect();
        let results = run(&mut detector, &frames);
        assert_eq!(results[2], Detection::NoData);
        for result in &results[3..5] {
            assert_eq!(
                *result,
                Detection::Measured {
                    changed: 18,
                    motion: true
                }
            );
        }
    }

    #[test]
    fn warmer_only_ignores_cooling_pixels() {
        let mut one =
            MotionDetector::new(config(3, true, DiffMode::WarmerOnly), shape()).unwrap();
        let mut two =
            MotionDetector::new(config(3, false, DiffMode::WarmerOnly), shape()).unwrap();
        let frames: Vec<Frame> = (1..=6).map(dot_frame).collect();
        assert_eq!(run(&mut one, &frames)[5].pixel_stat(), 9);
        assert_eq!(run(&mut two, &frames)[5].pixel_stat(), 6);
    }

    #[test]
    fn stationary_dot_is_not_motion() {
        let mut detector =
            MotionDetector::new(config(2, false, DiffMode::Absolute), shape()).unwrap();
        let frames: Vec<Frame> = (0..8).map(|_| dot_frame(3)).collect();
        let results = run(&mut detector, &frames);
        assert!(results[2..].iter().all(|r| *r
            == Detection::Measured {
                changed: 0,
                motion: false
            }));
    }

    #[test]
    fn noise_below_floor_is_ignored() {
        let mut detector =
            MotionDetector::new(config(1, true, DiffMode::Absolute), shape()).unwrap();
        for i in 0..10u16 {
            let mut frame = Frame::new(shape());
            frame.fill(2000 + (i % 3) * 300);
            let result = detector.detect(&frame);
            assert!(!result.has_motion());
            if i >= 1 {
                assert_eq!(result.pixel_stat(), 0);
            }
        }
    }

    #[test]
    fn recalibration_jump_resets_baseline() {
        let mut detector =
            MotionDetector::new(config(3, false, DiffMode::Absolute), shape()).unwrap();
        let mut frames: Vec<Frame> = (0..6).map(|_| background()).collect();
        for _ in 0..8 {
            let mut jumped = background();
            jumped.fill(BACKGROUND + 100);
            frames.push(jumped);
        }
        let results = run(&mut detector, &frames);

        assert!(results[..3].iter().all(|r| *r == Detection::NoData));
        for result in &results[3..6] {
            assert_eq!(result.pixel_stat(), 0);
        }
        // frame 7: every pixel jumped
        assert_eq!(results[6], Detection::Recalibration { nonzero: 100 });
        // frame 8 compares against the jump frame but only re-primes
        assert_eq!(results[7], Detection::NoData);
        for result in &results[8..] {
            assert_eq!(
                *result,
                Detection::Measured {
                    changed: 0,
                    motion: false
                }
            );
        }
    }

    #[test]
    fn motion_after_recalibration_is_still_seen() {
        let mut detector =
            MotionDetector::new(config(3, true, DiffMode::Absolute), shape()).unwrap();
        let mut frames: Vec<Frame> = (0..5).map(|_| background()).collect();
        let mut jumped = background();
        jumped.fill(BACKGROUND + 100);
        frames.push(jumped.clone());
        frames.push(jumped.clone());
        let mut with_dot = jumped;
        for row in 0..3 {
            for col in 0..3 {
                with_dot.set(row, col, DOT + 200);
            }
        }
        frames.push(with_dot);
        let results = run(&mut detector, &frames);
        assert!(matches!(results[5], Detection::Recalibration { .. }));
        assert_eq!(results[6], Detection::NoData);
        assert_eq!(
            results[7],
            Detection::Measured {
                changed: 9,
                motion: true
            }
        );
    }
}
