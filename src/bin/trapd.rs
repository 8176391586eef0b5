//! trapd - thermal camera trap daemon
//!
//! This daemon:
//! 1. Loads configuration (THERMAL_TRAP_CONFIG + THERMAL_TRAP_* overrides)
//! 2. Builds the recorder chain (raw file recorder, throttled if enabled)
//! 3. Pulls frames from a source at the camera frame rate
//! 4. Feeds every frame to the motion processor
//! 5. Closes any open recording on Ctrl-C or when the source runs dry

use anyhow::Result;
use clap::Parser;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use thermal_trap::{
    open_source, MotionProcessor, RawFileRecorder, Recorder, SystemClock, ThrottledRecorder,
    TrapConfig,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "trapd", about = "Thermal camera trap daemon")]
struct Args {
    /// Frame source: stub://quiet, stub://busy, stub://periodic or a .tframes file
    #[arg(long, env = "THERMAL_TRAP_SOURCE", default_value = "stub://periodic")]
    source: String,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Process frames as fast as possible instead of at the camera frame rate
    #[arg(long)]
    no_pace: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = TrapConfig::load()?;
    let fps = cfg.camera.fps;

    let mut source = open_source(&args.source, cfg.shape(), fps)?;
    let shape = source.shape();
    if shape != cfg.shape() {
        log::warn!(
            "source frames are {}x{}, configured camera is {}x{}",
            shape.rows,
            shape.cols,
            cfg.camera.rows,
            cfg.camera.cols
        );
    }

    let processor_cfg = cfg.processor_config();
    let file_recorder =
        RawFileRecorder::new(&cfg.recorder.output_dir, shape, cfg.recorder.min_disk_space_mb);
    let recorder: Box<dyn Recorder> = if cfg.throttler.apply {
        Box::new(ThrottledRecorder::new(
            file_recorder,
            &cfg.throttle_config(),
            fps,
            processor_cfg.min_frames,
            Box::new(SystemClock),
        ))
    } else {
        Box::new(file_recorder)
    };

    let window = cfg.window(Box::new(SystemClock))?;
    if !window.is_unrestricted() {
        log::info!(
            "recording window {}-{}",
            window.start().format("%H:%M"),
            window.end().format("%H:%M")
        );
    }

    let mut processor = MotionProcessor::new(
        processor_cfg,
        cfg.motion.motion_config(),
        shape,
        window,
        recorder,
    )?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!(
        "trapd running: source={} fps={} output={} throttle={}",
        args.source,
        fps,
        cfg.recorder.output_dir.display(),
        cfg.throttler.apply
    );

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(fps));
    let mut next_deadline = Instant::now();
    let mut last_health_log = Instant::now();

    loop {
        if rx.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break;
        }
        if matches!(args.frames, Some(limit) if processor.total_frames() >= limit) {
            log::info!("frame limit reached");
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("source exhausted");
                break;
            }
            Err(e) => {
                log::error!("frame source failed: {:#}", e);
                break;
            }
        };
        processor.process(&frame);

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = source.stats();
            log::info!(
                "health: frames={} recordings={} recording={} source={}",
                stats.frames_captured,
                processor.recordings_started(),
                processor.is_recording(),
                stats.source
            );
            last_health_log = Instant::now();
        }

        if !args.no_pace {
            next_deadline += frame_interval;
            let now = Instant::now();
            if next_deadline > now {
                std::thread::sleep(next_deadline - now);
            } else if now - next_deadline > Duration::from_secs(1) {
                log::debug!("falling behind the frame rate, resetting pacing");
                next_deadline = now;
            }
        }
    }

    processor.finish();
    log::info!(
        "trapd stopped after {} frames, {} recordings started",
        processor.total_frames(),
        processor.recordings_started()
    );
    Ok(())
}
