//! File-backed recorder.
//!
//! Each recording becomes one `.tframes` file in the output directory. The
//! layout is deliberately plain (no delta coding or compression):
//!
//! ```text
//! header:  "TTRP" | version u8 | rows u16 | cols u16
//! frame:   frame_count u64 | time_on_ms u64 | last_ffc_ms u64 | ffc u8 | pixels u16 * rows * cols
//! ```
//!
//! All integers are little-endian. Frames are written to `<name>.tmp` and the
//! file is renamed into place when the recording stops, so readers never see
//! a half-written recording under its final name. A recording that cannot be
//! finished is deleted.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::{Frame, FrameShape, Telemetry};
use crate::recorder::Recorder;

pub const MAGIC: &[u8; 4] = b"TTRP";
pub const FORMAT_VERSION: u8 = 1;
pub const FILE_EXTENSION: &str = "tframes";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Writes one `.tframes` file per recording.
pub struct RawFileRecorder {
    dir: PathBuf,
    shape: FrameShape,
    min_free_bytes: u64,
    active: Option<ActiveFile>,
    saved: Vec<PathBuf>,
}

struct ActiveFile {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    frames: u64,
}

impl RawFileRecorder {
    pub fn new(dir: impl Into<PathBuf>, shape: FrameShape, min_free_mb: u64) -> Self {
        Self {
            dir: dir.into(),
            shape,
            min_free_bytes: min_free_mb.saturating_mul(BYTES_PER_MB),
            active: None,
            saved: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files completed by this recorder, oldest first.
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    fn next_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut path = self.dir.join(format!("{}.{}", stamp, FILE_EXTENSION));
        let mut n = 1;
        while path.exists() || path.with_extension("tmp").exists() {
            path = self
                .dir
                .join(format!("{}-{}.{}", stamp, n, FILE_EXTENSION));
            n += 1;
        }
        path
    }
}

impl Recorder for RawFileRecorder {
    fn check_can_record(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating output directory {}", self.dir.display()))?;
        let free = available_bytes(&self.dir)?;
        if free < self.min_free_bytes {
            bail!(
                "only {} MB free in {}, {} MB required",
                free / BYTES_PER_MB,
                self.dir.display(),
                self.min_free_bytes / BYTES_PER_MB
            );
        }
        Ok(())
    }

    fn start_recording(&mut self) -> Result<()> {
        if self.active.is_some() {
            bail!("recording already in progress");
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating output directory {}", self.dir.display()))?;
        let final_path = self.next_path();
        let tmp_path = final_path.with_extension("tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, self.shape)?;
        log::info!("recording to {}", final_path.display());
        self.active = Some(ActiveFile {
            writer,
            tmp_path,
            final_path,
            frames: 0,
        });
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| anyhow!("write_frame called while not recording"))?;
        if frame.shape() != self.shape {
            bail!(
                "frame is {}x{}, recorder expects {}x{}",
                frame.shape().rows,
                frame.shape().cols,
                self.shape.rows,
                self.shape.cols
            );
        }
        write_frame_record(&mut active.writer, frame)?;
        active.frames += 1;
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        let ActiveFile {
            writer,
            tmp_path,
            final_path,
            frames,
        } = self
            .active
            .take()
            .ok_or_else(|| anyhow!("stop_recording called while not recording"))?;
        if let Err(e) = finish_file(writer, &tmp_path, &final_path) {
            match fs::remove_file(&tmp_path) {
                Ok(()) => log::error!("discarded unfinished {}", tmp_path.display()),
                Err(rm) => log::error!("left {} behind: {}", tmp_path.display(), rm),
            }
            return Err(e);
        }
        log::info!("saved {} ({} frames)", final_path.display(), frames);
        self.saved.push(final_path);
        Ok(())
    }
}

fn finish_file(writer: BufWriter<File>, tmp_path: &Path, final_path: &Path) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(|e| anyhow!("flushing {}: {}", tmp_path.display(), e.error()))?;
    file.sync_all()
        .with_context(|| format!("syncing {}", tmp_path.display()))?;
    fs::rename(tmp_path, final_path)
        .with_context(|| format!("renaming {}", tmp_path.display()))?;
    Ok(())
}

impl Drop for RawFileRecorder {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.stop_recording() {
                log::error!("failed to close recording: {:#}", e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Format helpers (shared with ingest::FileSource)
// ----------------------------------------------------------------------------

pub(crate) fn write_header(w: &mut impl Write, shape: FrameShape) -> Result<()> {
    let rows = u16::try_from(shape.rows).map_err(|_| anyhow!("too many rows: {}", shape.rows))?;
    let cols = u16::try_from(shape.cols).map_err(|_| anyhow!("too many columns: {}", shape.cols))?;
    w.write_all(MAGIC)?;
    w.write_all(&[FORMAT_VERSION])?;
    w.write_all(&rows.to_le_bytes())?;
    w.write_all(&cols.to_le_bytes())?;
    Ok(())
}

pub(crate) fn read_header(r: &mut impl Read) -> Result<FrameShape> {
    let mut header = [0u8; 9];
    r.read_exact(&mut header)
        .context("reading recording header")?;
    if &header[..4] != MAGIC {
        bail!("not a tframes recording (bad magic)");
    }
    if header[4] != FORMAT_VERSION {
        bail!("unsupported tframes version {}", header[4]);
    }
    let rows = u16::from_le_bytes([header[5], header[6]]) as usize;
    let cols = u16::from_le_bytes([header[7], header[8]]) as usize;
    if rows == 0 || cols == 0 {
        bail!("recording header has empty frame size {}x{}", rows, cols);
    }
    Ok(FrameShape::new(rows, cols))
}

pub(crate) fn write_frame_record(w: &mut impl Write, frame: &Frame) -> Result<()> {
    let status = &frame.status;
    let mut buf = Vec::with_capacity(25 + frame.pixels().len() * 2);
    buf.extend_from_slice(&status.frame_count.to_le_bytes());
    buf.extend_from_slice(&millis(status.time_on).to_le_bytes());
    buf.extend_from_slice(&millis(status.last_ffc_time).to_le_bytes());
    buf.push(u8::from(status.ffc_in_progress));
    for pixel in frame.pixels() {
        buf.extend_from_slice(&pixel.to_le_bytes());
    }
    w.write_all(&buf)?;
    Ok(())
}

/// Read the next frame, or `None` at a clean end of file.
pub(crate) fn read_frame_record(r: &mut impl Read, shape: FrameShape) -> Result<Option<Frame>> {
    let mut status = [0u8; 25];
    if !read_exact_or_eof(r, &mut status)? {
        return Ok(None);
    }
    let mut pixel_bytes = vec![0u8; shape.pixel_count() * 2];
    r.read_exact(&mut pixel_bytes)
        .context("truncated frame record")?;
    let pixels = pixel_bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();

    let mut frame = Frame::from_pixels(shape, pixels)?;
    frame.status = Telemetry {
        frame_count: u64_at(&status, 0),
        time_on: Duration::from_millis(u64_at(&status, 8)),
        last_ffc_time: Duration::from_millis(u64_at(&status, 16)),
        ffc_in_progress: status[24] != 0,
    };
    Ok(Some(frame))
}

fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => bail!("truncated frame record"),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn u64_at(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(target_os = "linux")]
fn available_bytes(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| anyhow!("path contains a NUL byte: {}", path.display()))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(anyhow!(std::io::Error::last_os_error()))
            .with_context(|| format!("statvfs {}", path.display()));
    }
    Ok(u64::from(stat.f_bavail).saturating_mul(u64::from(stat.f_frsize)))
}

#[cfg(not(target_os = "linux"))]
fn available_bytes(_path: &Path) -> Result<u64> {
    Ok(u64::MAX)
}
