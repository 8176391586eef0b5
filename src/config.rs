use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::clock::Clock;
use crate::detect::{DiffMode, MotionConfig};
use crate::frame::{FrameShape, DEFAULT_COLS, DEFAULT_ROWS};
use crate::processor::ProcessorConfig;
use crate::recorder::ThrottleConfig;
use crate::window::{parse_window, RecordingWindow};

const DEFAULT_FPS: u32 = 9;
const DEFAULT_TEMP_THRESH: u16 = 2900;
const DEFAULT_DELTA_THRESH: u16 = 50;
const DEFAULT_COUNT_THRESH: usize = 3;
const DEFAULT_NONZERO_MAX_PERCENT: u8 = 50;
const DEFAULT_FRAME_COMPARE_GAP: usize = 45;
const DEFAULT_TRIGGER_FRAMES: usize = 2;
const DEFAULT_PREVIEW_SECS: u32 = 3;
const DEFAULT_MIN_SECS: u32 = 10;
const DEFAULT_MAX_SECS: u32 = 600;
const DEFAULT_OUTPUT_DIR: &str = "recordings";
const DEFAULT_MIN_DISK_SPACE_MB: u64 = 200;
const DEFAULT_THROTTLE_AFTER_SECS: u32 = 600;
const DEFAULT_SPARSE_AFTER_SECS: u32 = 3600;
const DEFAULT_SPARSE_LENGTH_SECS: u32 = 30;
const DEFAULT_REFILL_RATE: f64 = 1.0;

#[derive(Debug, Deserialize, Default)]
struct TrapConfigFile {
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
    recorder: Option<RecorderConfigFile>,
    throttler: Option<ThrottlerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    fps: Option<u32>,
    rows: Option<usize>,
    cols: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    temp_thresh: Option<u16>,
    delta_thresh: Option<u16>,
    count_thresh: Option<usize>,
    nonzero_max_percent: Option<u8>,
    frame_compare_gap: Option<usize>,
    use_one_diff_only: Option<bool>,
    warmer_only: Option<bool>,
    trigger_frames: Option<usize>,
    verbose: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    preview_secs: Option<u32>,
    min_secs: Option<u32>,
    max_secs: Option<u32>,
    window_start: Option<String>,
    window_end: Option<String>,
    output_dir: Option<PathBuf>,
    min_disk_space_mb: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ThrottlerConfigFile {
    apply: Option<bool>,
    throttle_after_secs: Option<u32>,
    sparse_after_secs: Option<u32>,
    sparse_length_secs: Option<u32>,
    refill_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TrapConfig {
    pub camera: CameraSettings,
    pub motion: MotionSettings,
    pub recorder: RecorderSettings,
    pub throttler: ThrottlerSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub fps: u32,
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub temp_thresh: u16,
    pub delta_thresh: u16,
    pub count_thresh: usize,
    pub nonzero_max_percent: u8,
    pub frame_compare_gap: usize,
    pub use_one_diff_only: bool,
    pub warmer_only: bool,
    pub trigger_frames: usize,
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub preview_secs: u32,
    pub min_secs: u32,
    pub max_secs: u32,
    /// "HH:MM"; empty together with `window_end` for no restriction.
    pub window_start: String,
    pub window_end: String,
    pub output_dir: PathBuf,
    pub min_disk_space_mb: u64,
}

#[derive(Debug, Clone)]
pub struct ThrottlerSettings {
    pub apply: bool,
    pub throttle_after_secs: u32,
    pub sparse_after_secs: u32,
    pub sparse_length_secs: u32,
    pub refill_rate: f64,
}

impl TrapConfig {
    /// Defaults, then the JSON file named by `THERMAL_TRAP_CONFIG`, then
    /// `THERMAL_TRAP_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("THERMAL_TRAP_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a JSON document; the environment is not consulted.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: TrapConfigFile =
            serde_json::from_str(json).map_err(|e| anyhow!("invalid config: {}", e))?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrapConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let recorder = file.recorder.unwrap_or_default();
        let throttler = file.throttler.unwrap_or_default();
        Self {
            camera: CameraSettings {
                fps: camera.fps.unwrap_or(DEFAULT_FPS),
                rows: camera.rows.unwrap_or(DEFAULT_ROWS),
                cols: camera.cols.unwrap_or(DEFAULT_COLS),
            },
            motion: MotionSettings {
                temp_thresh: motion.temp_thresh.unwrap_or(DEFAULT_TEMP_THRESH),
                delta_thresh: motion.delta_thresh.unwrap_or(DEFAULT_DELTA_THRESH),
                count_thresh: motion.count_thresh.unwrap_or(DEFAULT_COUNT_THRESH),
                nonzero_max_percent: motion
                    .nonzero_max_percent
                    .unwrap_or(DEFAULT_NONZERO_MAX_PERCENT),
                frame_compare_gap: motion
                    .frame_compare_gap
                    .unwrap_or(DEFAULT_FRAME_COMPARE_GAP),
                use_one_diff_only: motion.use_one_diff_only.unwrap_or(true),
                warmer_only: motion.warmer_only.unwrap_or(true),
                trigger_frames: motion.trigger_frames.unwrap_or(DEFAULT_TRIGGER_FRAMES),
                verbose: motion.verbose.unwrap_or(false),
            },
            recorder: RecorderSettings {
                preview_secs: recorder.preview_secs.unwrap_or(DEFAULT_PREVIEW_SECS),
                min_secs: recorder.min_secs.unwrap_or(DEFAULT_MIN_SECS),
                max_secs: recorder.max_secs.unwrap_or(DEFAULT_MAX_SECS),
                window_start: recorder.window_start.unwrap_or_default(),
                window_end: recorder.window_end.unwrap_or_default(),
                output_dir: recorder
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                min_disk_space_mb: recorder
                    .min_disk_space_mb
                    .unwrap_or(DEFAULT_MIN_DISK_SPACE_MB),
            },
            throttler: ThrottlerSettings {
                apply: throttler.apply.unwrap_or(true),
                throttle_after_secs: throttler
                    .throttle_after_secs
                    .unwrap_or(DEFAULT_THROTTLE_AFTER_SECS),
                sparse_after_secs: throttler
                    .sparse_after_secs
                    .unwrap_or(DEFAULT_SPARSE_AFTER_SECS),
                sparse_length_secs: throttler
                    .sparse_length_secs
                    .unwrap_or(DEFAULT_SPARSE_LENGTH_SECS),
                refill_rate: throttler.refill_rate.unwrap_or(DEFAULT_REFILL_RATE),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("THERMAL_TRAP_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.recorder.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(window) = std::env::var("THERMAL_TRAP_WINDOW") {
            if !window.trim().is_empty() {
                let (start, end) = window.split_once('-').ok_or_else(|| {
                    anyhow!("THERMAL_TRAP_WINDOW must look like HH:MM-HH:MM")
                })?;
                self.recorder.window_start = start.trim().to_string();
                self.recorder.window_end = end.trim().to_string();
            }
        }
        if let Ok(throttle) = std::env::var("THERMAL_TRAP_THROTTLE") {
            self.throttler.apply = parse_bool(&throttle)
                .ok_or_else(|| anyhow!("THERMAL_TRAP_THROTTLE must be true or false"))?;
        }
        if let Ok(fps) = std::env::var("THERMAL_TRAP_FPS") {
            self.camera.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("THERMAL_TRAP_FPS must be a whole number of frames"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.camera.rows == 0 || self.camera.cols == 0 {
            return Err(anyhow!(
                "camera frame size must be non-zero (got {}x{})",
                self.camera.rows,
                self.camera.cols
            ));
        }

        let motion = &self.motion;
        if motion.trigger_frames == 0 {
            return Err(anyhow!("motion trigger_frames must be at least 1"));
        }
        if motion.frame_compare_gap == 0 {
            return Err(anyhow!("motion frame_compare_gap must be at least 1"));
        }
        if motion.nonzero_max_percent == 0 || motion.nonzero_max_percent > 100 {
            return Err(anyhow!(
                "motion nonzero_max_percent must be between 1 and 100"
            ));
        }

        let recorder = &self.recorder;
        if recorder.min_secs == 0 {
            return Err(anyhow!("recorder min_secs must be greater than zero"));
        }
        if recorder.max_secs <= recorder.min_secs {
            return Err(anyhow!(
                "recorder max_secs ({}) must be greater than min_secs ({})",
                recorder.max_secs,
                recorder.min_secs
            ));
        }
        parse_window(&recorder.window_start, &recorder.window_end)?;

        let throttler = &self.throttler;
        if !throttler.refill_rate.is_finite() || throttler.refill_rate < 0.0 {
            return Err(anyhow!("throttler refill_rate must be zero or positive"));
        }
        if throttler.apply && throttler.throttle_after_secs < recorder.min_secs {
            return Err(anyhow!(
                "throttler throttle_after_secs ({}) must allow at least one minimum length recording ({}s)",
                throttler.throttle_after_secs,
                recorder.min_secs
            ));
        }
        Ok(())
    }

    pub fn shape(&self) -> FrameShape {
        FrameShape::new(self.camera.rows, self.camera.cols)
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        self.recorder
            .processor_config(self.camera.fps, self.motion.trigger_frames)
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        self.throttler.throttle_config()
    }

    pub fn window(&self, clock: Box<dyn Clock>) -> Result<RecordingWindow> {
        RecordingWindow::from_strings(&self.recorder.window_start, &self.recorder.window_end, clock)
    }
}

impl MotionSettings {
    pub fn motion_config(&self) -> MotionConfig {
        MotionConfig {
            temp_thresh: self.temp_thresh,
            delta_thresh: self.delta_thresh,
            count_thresh: self.count_thresh,
            nonzero_max_percent: self.nonzero_max_percent,
            frame_compare_gap: self.frame_compare_gap,
            use_one_diff_only: self.use_one_diff_only,
            diff_mode: if self.warmer_only {
                DiffMode::WarmerOnly
            } else {
                DiffMode::Absolute
            },
            verbose: self.verbose,
        }
    }
}

impl RecorderSettings {
    /// Recording lengths converted to frame counts at `fps`.
    pub fn processor_config(&self, fps: u32, trigger_frames: usize) -> ProcessorConfig {
        let frames = |secs: u32| secs as usize * fps as usize;
        ProcessorConfig {
            preview_frames: frames(self.preview_secs),
            trigger_frames,
            min_frames: frames(self.min_secs),
            max_frames: frames(self.max_secs),
        }
    }
}

impl ThrottlerSettings {
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            throttle_after_secs: self.throttle_after_secs,
            sparse_after_secs: self.sparse_after_secs,
            sparse_length_secs: self.sparse_length_secs,
            refill_rate: self.refill_rate,
        }
    }
}

fn read_config_file(path: &Path) -> Result<TrapConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = TrapConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.camera.fps, 9);
        assert_eq!(cfg.shape(), FrameShape::new(120, 160));
        assert_eq!(cfg.motion.frame_compare_gap, 45);
        assert!(cfg.throttler.apply);
        assert_eq!(cfg.recorder.output_dir, PathBuf::from("recordings"));

        let motion = cfg.motion.motion_config();
        assert_eq!(motion.diff_mode, DiffMode::WarmerOnly);
        assert_eq!(motion.count_thresh, 3);
    }

    #[test]
    fn seconds_become_frames() {
        let cfg = TrapConfig::from_json_str(r#"{"camera": {"fps": 10}}"#).unwrap();
        assert_eq!(
            cfg.processor_config(),
            ProcessorConfig {
                preview_frames: 30,
                trigger_frames: 2,
                min_frames: 100,
                max_frames: 6000,
            }
        );
    }

    #[test]
    fn rejects_inconsistent_lengths() {
        let err = TrapConfig::from_json_str(r#"{"recorder": {"min_secs": 30, "max_secs": 30}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("max_secs"));
        assert!(TrapConfig::from_json_str(r#"{"recorder": {"min_secs": 0}}"#).is_err());
    }

    #[test]
    fn rejects_throttle_smaller_than_one_recording() {
        let json = r#"{"recorder": {"min_secs": 20}, "throttler": {"throttle_after_secs": 10}}"#;
        assert!(TrapConfig::from_json_str(json).is_err());
        let json = r#"{"recorder": {"min_secs": 20},
                       "throttler": {"apply": false, "throttle_after_secs": 10}}"#;
        assert!(TrapConfig::from_json_str(json).is_ok());
    }

    #[test]
    fn rejects_bad_motion_and_window_values() {
        assert!(TrapConfig::from_json_str(r#"{"motion": {"trigger_frames": 0}}"#).is_err());
        assert!(TrapConfig::from_json_str(r#"{"motion": {"nonzero_max_percent": 101}}"#).is_err());
        assert!(TrapConfig::from_json_str(r#"{"recorder": {"window_start": "21:00"}}"#).is_err());
        assert!(TrapConfig::from_json_str(r#"{"throttler": {"refill_rate": -1.0}}"#).is_err());
    }

    #[test]
    fn parses_boolean_words() {
        assert_eq!(parse_bool(" On "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
