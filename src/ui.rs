use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// Terminal output for the demo: spinners and a frame bar on a tty, plain
/// `==>` lines otherwise.
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// `ui_flag` is `plain`, `pretty` or anything else for auto; auto stays
    /// plain when `disable_pretty` is set (e.g. stdout is piped).
    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let pretty = is_tty
            && match ui_flag {
                Some("plain") => false,
                Some("pretty") => true,
                _ => !disable_pretty,
            };
        Self { pretty }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.pretty {
            let spinner = stderr_bar(ProgressBar::new_spinner(), "{spinner} {msg}");
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            recordings: None,
        }
    }

    /// Stage with a frame counter; `total` frames are expected.
    pub fn frames(&self, name: &str, total: u64) -> FrameProgress {
        let bar = if self.pretty {
            let bar = stderr_bar(
                ProgressBar::new(total),
                "{msg} [{bar:30}] {pos}/{len} frames ({per_sec})",
            );
            bar.set_message(name.to_string());
            Some(bar)
        } else {
            eprintln!("==> {} ({} frames)", name, total);
            None
        };
        FrameProgress {
            stage: StageGuard {
                name: name.to_string(),
                start: Instant::now(),
                spinner: None,
                recordings: Some(0),
            },
            bar,
        }
    }
}

fn stderr_bar(bar: ProgressBar, template: &str) -> ProgressBar {
    bar.set_draw_target(ProgressDrawTarget::stderr());
    match ProgressStyle::with_template(template) {
        Ok(style) => bar.set_style(style.progress_chars("=> ")),
        Err(e) => log::debug!("progress template {:?}: {}", template, e),
    }
    bar
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    recordings: Option<u64>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = match self.recordings {
            Some(n) => format!("✔ {} ({} recordings, {})", self.name, n, format_duration(elapsed)),
            None => format!("✔ {} ({})", self.name, format_duration(elapsed)),
        };
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// Progress over simulated frames; clears its bar before the stage line prints.
pub struct FrameProgress {
    bar: Option<ProgressBar>,
    stage: StageGuard,
}

impl FrameProgress {
    pub fn tick(&mut self, recordings: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            if Some(recordings) != self.stage.recordings {
                bar.set_message(format!("{} ({} recordings)", self.stage.name, recordings));
            }
        }
        self.stage.recordings = Some(recordings);
    }
}

impl Drop for FrameProgress {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
