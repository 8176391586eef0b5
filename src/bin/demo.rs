//! demo - simulated night at the trap
//!
//! Runs a scripted thermal scene through the full pipeline on a manual clock,
//! so an hour of camera time takes seconds. Recordings go to memory (the
//! default) or to `.tframes` files with `--out`.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use thermal_trap::ingest::Scene;
use thermal_trap::window::{parse_time_of_day, parse_window};
use thermal_trap::{
    Detection, FrameSource, ManualClock, MemoryRecorder, MotionProcessor, RawFileRecorder,
    Recorder, RecordingWindow, SyntheticSource, ThrottledRecorder, TrapConfig,
};

#[path = "../ui.rs"]
mod ui;

/// Short recordings and a small budget so throttling shows up within the hour.
const DEMO_CONFIG: &str = r#"{
    "camera": { "fps": 9, "rows": 60, "cols": 80 },
    "motion": { "frame_compare_gap": 18 },
    "recorder": { "preview_secs": 3, "min_secs": 10, "max_secs": 120 },
    "throttler": {
        "throttle_after_secs": 120,
        "sparse_after_secs": 300,
        "sparse_length_secs": 20,
        "refill_rate": 0.1
    }
}"#;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Simulated minutes of camera time.
    #[arg(long, default_value_t = 50)]
    minutes: u64,
    /// Time of day the simulation starts at (HH:MM).
    #[arg(long, default_value = "21:30")]
    start: String,
    /// Only record inside this window (HH:MM-HH:MM).
    #[arg(long)]
    window: Option<String>,
    /// Write recordings to this directory instead of keeping them in memory.
    #[arg(long)]
    out: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Debug, Default)]
struct RunStats {
    motion_frames: u64,
    recalibrations: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load demo config");
        TrapConfig::from_json_str(DEMO_CONFIG)?
    };
    let fps = cfg.camera.fps;
    let clock = ManualClock::new(parse_time_of_day(&args.start)?);
    let window = match args.window.as_deref() {
        Some(window) => {
            let (start, end) = window
                .split_once('-')
                .ok_or_else(|| anyhow!("--window must look like HH:MM-HH:MM"))?;
            let (start, end) = parse_window(start.trim(), end.trim())?;
            RecordingWindow::new(start, end, Box::new(clock.clone()))
        }
        None => RecordingWindow::always(),
    };
    let source = SyntheticSource::with_scene("demo", cfg.shape(), fps, demo_scene(fps, args.minutes))?;

    match &args.out {
        Some(dir) => {
            let recorder =
                RawFileRecorder::new(dir, cfg.shape(), cfg.recorder.min_disk_space_mb);
            let processor = simulate(&ui, &cfg, &clock, window, source, recorder)?;
            let _stage = ui.stage("Summary");
            print_throttle_summary(processor.recorder());
            println!("files written to {}:", dir.display());
            for path in processor.recorder().inner().saved() {
                println!("  {}", path.display());
            }
        }
        None => {
            let processor = simulate(&ui, &cfg, &clock, window, source, MemoryRecorder::new())?;
            let _stage = ui.stage("Summary");
            print_throttle_summary(processor.recorder());
            for (i, clip) in processor.recorder().inner().clips().iter().enumerate() {
                let (Some(first), Some(last)) = (clip.first(), clip.last()) else {
                    continue;
                };
                println!(
                    "  recording {:>2}: frames {:>6}..={:<6} {:>5} frames ({:.1}s)",
                    i + 1,
                    first,
                    last,
                    clip.len(),
                    clip.len() as f64 / f64::from(fps)
                );
            }
        }
    }
    Ok(())
}

/// Two short visits, a long stay that runs into the throttle, and two
/// recalibrations.
fn demo_scene(fps: u32, minutes: u64) -> Scene {
    let at = |mins: u64, secs: u64| (mins * 60 + secs) * u64::from(fps) + 1;
    Scene {
        activity: vec![at(2, 0)..at(2, 20), at(2, 40)..at(2, 50), at(10, 0)..at(40, 0)],
        recalibrations: vec![at(5, 0), at(45, 0)],
        length: Some(minutes * 60 * u64::from(fps)),
        ..Scene::default()
    }
}

fn simulate<R: Recorder>(
    ui: &ui::Ui,
    cfg: &TrapConfig,
    clock: &ManualClock,
    window: RecordingWindow,
    mut source: SyntheticSource,
    recorder: R,
) -> Result<MotionProcessor<ThrottledRecorder<R>>> {
    let fps = cfg.camera.fps;
    let processor_cfg = cfg.processor_config();
    let throttled = ThrottledRecorder::new(
        recorder,
        &cfg.throttle_config(),
        fps,
        processor_cfg.min_frames,
        Box::new(clock.clone()),
    );
    let mut processor = MotionProcessor::new(
        processor_cfg,
        cfg.motion.motion_config(),
        cfg.shape(),
        window,
        throttled,
    )?;

    let total = source.scene().length.unwrap_or_default();
    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(fps));
    let mut stats = RunStats::default();
    {
        let mut progress = ui.frames("Simulate", total);
        while let Some(frame) = source.next_frame()? {
            match processor.process(&frame) {
                Detection::Recalibration { .. } => stats.recalibrations += 1,
                detection if detection.has_motion() => stats.motion_frames += 1,
                _ => {}
            }
            clock.advance(frame_interval);
            progress.tick(processor.recordings_started());
        }
        processor.finish();
    }

    println!(
        "simulated {} frames ({:.0} min): {} with motion, {} recalibrations, {} recordings started",
        processor.total_frames(),
        processor.total_frames() as f64 / f64::from(fps) / 60.0,
        stats.motion_frames,
        stats.recalibrations,
        processor.recordings_started()
    );
    Ok(processor)
}

fn print_throttle_summary<R: Recorder>(throttled: &ThrottledRecorder<R>) {
    println!(
        "throttled frames: {} (budget left {:.0} frames)",
        throttled.total_throttled(),
        throttled.main_bucket().tokens()
    );
}
