//! Frame ingestion sources.
//!
//! - `SyntheticSource`: scripted thermal scenes (`stub://quiet`, `stub://busy`,
//!   `stub://periodic`) for tests and bench runs
//! - `FileSource`: replay of a `.tframes` recording
//!
//! Sources hand frames out by value. A source returning `Ok(None)` is
//! exhausted; an error means the camera connection is gone.

pub mod file;
pub mod synthetic;

use anyhow::Result;

use crate::frame::{Frame, FrameShape};

pub use file::FileSource;
pub use synthetic::{Scene, SyntheticSource};

pub trait FrameSource {
    fn shape(&self) -> FrameShape;

    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Open `source`: `stub://<scene>` or a path to a `.tframes` file.
///
/// `shape` and `fps` only apply to synthetic sources; a file carries its own
/// dimensions.
pub fn open_source(source: &str, shape: FrameShape, fps: u32) -> Result<Box<dyn FrameSource>> {
    if source.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::new(source, shape, fps)?))
    } else {
        Ok(Box::new(FileSource::open(source)?))
    }
}
