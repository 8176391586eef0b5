//! Scripted thermal scenes for `stub://` sources.
//!
//! A scene is a flat background with a little sensor noise. During scripted
//! activity periods a warm square walks across the image, bouncing off the
//! edges one column per frame. Scripted recalibrations shift the whole image
//! up or down, the way a flat field correction does on a real sensor.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::time::Duration;

use super::{FrameSource, SourceStats};
use crate::frame::{Frame, FrameShape};

#[derive(Clone, Debug, PartialEq)]
pub struct Scene {
    pub background: u16,
    pub blob_temp: u16,
    /// Side length of the warm square, in pixels.
    pub blob_size: usize,
    /// Upper bound of the per-pixel noise added to every frame.
    pub noise: u16,
    /// Frame ranges (1-based, end exclusive) with an animal in view.
    pub activity: Vec<Range<u64>>,
    /// Frames at which the sensor recalibrates.
    pub recalibrations: Vec<u64>,
    pub recalibration_step: u16,
    /// Replay the script every `cycle` frames; 0 plays it once.
    pub cycle: u64,
    /// Total frames produced, `None` for an endless source.
    pub length: Option<u64>,
    pub seed: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            background: 2950,
            blob_temp: 3400,
            blob_size: 4,
            noise: 8,
            activity: Vec::new(),
            recalibrations: Vec::new(),
            recalibration_step: 150,
            cycle: 0,
            length: None,
            seed: 7,
        }
    }
}

impl Scene {
    /// Built-in scenes, timed in seconds at `fps`:
    /// - `quiet`: nothing moves, recalibration every three minutes
    /// - `busy`: an animal in view all the time
    /// - `periodic`: a 15 s visit every two minutes plus one recalibration
    pub fn named(name: &str, fps: u32) -> Result<Self> {
        let fps = u64::from(fps.max(1));
        let scene = match name {
            "quiet" => Self {
                recalibrations: vec![180 * fps],
                cycle: 180 * fps,
                ..Self::default()
            },
            "busy" => Self {
                activity: vec![1..u64::MAX],
                ..Self::default()
            },
            "periodic" => Self {
                activity: vec![20 * fps..35 * fps],
                recalibrations: vec![80 * fps],
                cycle: 120 * fps,
                ..Self::default()
            },
            other => bail!(
                "unknown synthetic scene {:?} (expected quiet, busy or periodic)",
                other
            ),
        };
        Ok(scene)
    }

    /// Position of frame `n` inside the script.
    fn script_position(&self, n: u64) -> u64 {
        if self.cycle == 0 {
            n
        } else {
            (n - 1) % self.cycle + 1
        }
    }

    /// Start of the activity period covering frame `n`, if any.
    fn activity_start(&self, n: u64) -> Option<u64> {
        let pos = self.script_position(n);
        self.activity
            .iter()
            .find(|range| range.contains(&pos))
            .map(|range| range.start)
    }

    fn is_recalibration(&self, n: u64) -> bool {
        self.recalibrations.contains(&self.script_position(n))
    }

    /// Recalibrations up to and including frame `n`.
    fn recalibrations_before(&self, n: u64) -> u64 {
        let pos = self.script_position(n);
        let in_cycle = self.recalibrations.iter().filter(|&&r| r <= pos).count() as u64;
        if self.cycle == 0 {
            in_cycle
        } else {
            (n - 1) / self.cycle * self.recalibrations.len() as u64 + in_cycle
        }
    }
}

pub struct SyntheticSource {
    name: String,
    shape: FrameShape,
    fps: u32,
    scene: Scene,
    rng: StdRng,
    frame_count: u64,
    last_ffc: Duration,
}

impl SyntheticSource {
    /// Source for a built-in scene; `name` may carry the `stub://` prefix.
    pub fn new(name: &str, shape: FrameShape, fps: u32) -> Result<Self> {
        let name = name.strip_prefix("stub://").unwrap_or(name);
        let scene = Scene::named(name, fps)?;
        Self::with_scene(name, shape, fps, scene)
    }

    pub fn with_scene(name: &str, shape: FrameShape, fps: u32, scene: Scene) -> Result<Self> {
        if shape.pixel_count() == 0 {
            bail!("synthetic frames need non-zero dimensions");
        }
        if fps == 0 {
            bail!("synthetic source fps must be >= 1");
        }
        let rng = StdRng::seed_from_u64(scene.seed);
        Ok(Self {
            name: name.to_string(),
            shape,
            fps,
            scene,
            rng,
            frame_count: 0,
            last_ffc: Duration::ZERO,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    fn render(&mut self, n: u64) -> Frame {
        let mut frame = Frame::new(self.shape);
        let offset = if self.scene.recalibrations_before(n) % 2 == 1 {
            self.scene.recalibration_step
        } else {
            0
        };
        let noise = self.scene.noise;
        let base = self.scene.background.saturating_add(offset);
        for pixel in frame.pixels_mut() {
            *pixel = base.saturating_add(self.rng.gen_range(0..=noise));
        }

        if let Some(start) = self.scene.activity_start(n) {
            let size = self.scene.blob_size.min(self.shape.rows).min(self.shape.cols);
            let step = (self.scene.script_position(n) - start) as usize;
            let col = bounce(step, self.shape.cols - size);
            let row = (self.shape.rows - size) / 2;
            let temp = self.scene.blob_temp.saturating_add(offset);
            for r in row..row + size {
                for c in col..col + size {
                    frame.set(r, c, temp);
                }
            }
        }

        // Camera telemetry has millisecond resolution.
        let time_on = Duration::from_millis(n * 1000 / u64::from(self.fps));
        let ffc = self.scene.is_recalibration(n);
        if ffc {
            self.last_ffc = time_on;
        }
        frame.status.frame_count = n;
        frame.status.time_on = time_on;
        frame.status.last_ffc_time = self.last_ffc;
        frame.status.ffc_in_progress = ffc;
        frame
    }
}

/// Column after `step` moves back and forth over `0..=span`.
fn bounce(step: usize, span: usize) -> usize {
    if span == 0 {
        return 0;
    }
    let p = step % (2 * span);
    if p <= span {
        p
    } else {
        2 * span - p
    }
}

impl FrameSource for SyntheticSource {
    fn shape(&self) -> FrameShape {
        self.shape
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if matches!(self.scene.length, Some(length) if self.frame_count >= length) {
            return Ok(None);
        }
        self.frame_count += 1;
        Ok(Some(self.render(self.frame_count)))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> FrameShape {
        FrameShape::new(12, 16)
    }

    fn warm_pixels(frame: &Frame, scene: &Scene) -> usize {
        frame
            .pixels()
            .iter()
            .filter(|&&p| p >= scene.blob_temp)
            .count()
    }

    #[test]
    fn unknown_scene_is_rejected() {
        assert!(SyntheticSource::new("stub://nope", shape(), 9).is_err());
        assert!(SyntheticSource::new("stub://quiet", FrameShape::new(0, 4), 9).is_err());
    }

    #[test]
    fn blob_only_during_activity() {
        let scene = Scene {
            activity: vec![3..5],
            length: Some(6),
            ..Scene::default()
        };
        let mut source = SyntheticSource::with_scene("t", shape(), 9, scene.clone()).unwrap();
        let mut warm = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            warm.push(warm_pixels(&frame, &scene));
        }
        assert_eq!(warm, vec![0, 0, 16, 16, 0, 0]);
        assert_eq!(source.stats().frames_captured, 6);
    }

    #[test]
    fn blob_bounces_between_edges() {
        assert_eq!(bounce(0, 3), 0);
        assert_eq!(bounce(3, 3), 3);
        assert_eq!(bounce(4, 3), 2);
        assert_eq!(bounce(6, 3), 0);
        assert_eq!(bounce(5, 0), 0);
    }

    #[test]
    fn recalibration_shifts_background_and_sets_telemetry() {
        let scene = Scene {
            noise: 0,
            recalibrations: vec![3],
            cycle: 4,
            ..Scene::default()
        };
        let mut source = SyntheticSource::with_scene("t", shape(), 2, scene).unwrap();
        let frames: Vec<Frame> = (0..8)
            .map(|_| source.next_frame().unwrap().unwrap())
            .collect();
        let levels: Vec<u16> = frames.iter().map(|f| f.get(0, 0)).collect();
        assert_eq!(levels, vec![2950, 2950, 3100, 3100, 3100, 3100, 2950, 2950]);
        assert!(frames[2].status.ffc_in_progress);
        assert_eq!(frames[2].status.last_ffc_time, Duration::from_millis(1500));
        assert_eq!(frames[7].status.time_on, Duration::from_secs(4));
    }

    #[test]
    fn same_seed_gives_same_frames() {
        let mut a = SyntheticSource::new("periodic", shape(), 9).unwrap();
        let mut b = SyntheticSource::new("stub://periodic", shape(), 9).unwrap();
        for _ in 0..20 {
            assert_eq!(a.next_frame().unwrap(), b.next_frame().unwrap());
        }
    }
}
