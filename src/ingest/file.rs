//! Replay of recorded `.tframes` files.
//!
//! Frames come back exactly as `RawFileRecorder` wrote them, telemetry
//! included, so a recording can be pushed through the pipeline again (for
//! tuning the detector, for example).

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::{Frame, FrameShape};
use crate::recorder::file::{read_frame_record, read_header};

pub struct FileSource {
    path: PathBuf,
    reader: BufReader<File>,
    shape: FrameShape,
    frames_read: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !is_local_file_path(&path.to_string_lossy()) {
            return Err(anyhow!(
                "file replay only supports local paths (got {})",
                path.display()
            ));
        }
        let file =
            File::open(path).with_context(|| format!("open recording {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let shape = read_header(&mut reader)
            .with_context(|| format!("read header of {}", path.display()))?;
        log::info!(
            "FileSource: replaying {} ({}x{})",
            path.display(),
            shape.rows,
            shape.cols
        );
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            shape,
            frames_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FileSource {
    fn shape(&self) -> FrameShape {
        self.shape
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = read_frame_record(&mut self.reader, self.shape).with_context(|| {
            format!(
                "read frame {} of {}",
                self.frames_read + 1,
                self.path.display()
            )
        })?;
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_read,
            source: self.path.display().to_string(),
        }
    }
}

pub(crate) fn is_local_file_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_urls_and_missing_files() {
        assert!(FileSource::open("http://camera/clip.tframes").is_err());
        assert!(FileSource::open("").is_err());
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSource::open(dir.path().join("missing.tframes")).is_err());
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.tframes");
        std::fs::write(&path, b"hello, world").unwrap();
        assert!(FileSource::open(&path).is_err());
    }
}
