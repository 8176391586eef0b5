//! Thermal frames and the fixed-capacity frame loop.
//!
//! - `Frame`: a rows × cols grid of `u16` samples plus camera telemetry.
//! - `FrameLoop`: preallocated ring of frames with "oldest relevant" tracking.
//!
//! Frames are expensive to allocate, so every slot of a `FrameLoop` is
//! allocated once and then overwritten in place. References handed out by a
//! loop borrow it, so they cannot outlive the next mutating call.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;

/// Resolution of the Lepton 3 sensor.
pub const DEFAULT_ROWS: usize = 120;
pub const DEFAULT_COLS: usize = 160;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Frame dimensions. Fixed for the lifetime of a camera connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameShape {
    pub rows: usize,
    pub cols: usize,
}

impl FrameShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }
}

impl Default for FrameShape {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

/// Camera-reported status for a frame. Passed through unmodified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Telemetry {
    /// Sensor frame counter.
    pub frame_count: u64,
    /// Time since the camera powered on.
    pub time_on: Duration,
    /// `time_on` value of the last flat field correction.
    pub last_ffc_time: Duration,
    pub ffc_in_progress: bool,
}

/// One thermal image sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    shape: FrameShape,
    pixels: Vec<u16>,
    pub status: Telemetry,
}

impl Frame {
    /// All-zero frame.
    pub fn new(shape: FrameShape) -> Self {
        Self {
            shape,
            pixels: vec![0; shape.pixel_count()],
            status: Telemetry::default(),
        }
    }

    /// Build a frame from row-major pixel data.
    pub fn from_pixels(shape: FrameShape, pixels: Vec<u16>) -> Result<Self> {
        if pixels.len() != shape.pixel_count() {
            return Err(anyhow!(
                "frame data has {} pixels, expected {}x{}",
                pixels.len(),
                shape.rows,
                shape.cols
            ));
        }
        Ok(Self {
            shape,
            pixels,
            status: Telemetry::default(),
        })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u16] {
        &mut self.pixels
    }

    pub fn row(&self, row: usize) -> &[u16] {
        let start = row * self.shape.cols;
        &self.pixels[start..start + self.shape.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> u16 {
        self.pixels[row * self.shape.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u16) {
        self.pixels[row * self.shape.cols + col] = value;
    }

    pub fn fill(&mut self, value: u16) {
        self.pixels.fill(value);
    }

    /// Overwrite this frame with `other`, reusing the existing allocation
    /// when the shapes agree.
    pub fn copy_from(&mut self, other: &Frame) {
        self.shape = other.shape;
        self.pixels.clone_from(&other.pixels);
        self.status.clone_from(&other.status);
    }
}

// ----------------------------------------------------------------------------
// FrameLoop
// ----------------------------------------------------------------------------

/// Fixed-size circular store of preallocated frames.
///
/// The loop tracks the write cursor (`current`), whether it has wrapped at
/// least once, and an optional "oldest" marker. While the marker is set, only
/// the frames from the marker up to the cursor count as history; the marker
/// is dropped once the cursor comes back around to it.
///
/// A loop that has never been written still reports its zeroed current slot
/// as a one-frame history. Callers that care (the pre-trigger flush) skip the
/// newest history frame anyway, so this is left as is.
pub struct FrameLoop {
    frames: Vec<Frame>,
    current: usize,
    oldest: Option<usize>,
    buffer_full: bool,
}

impl FrameLoop {
    pub fn new(size: usize, shape: FrameShape) -> Result<Self> {
        if size == 0 {
            bail!("frame loop needs at least one slot");
        }
        Ok(Self {
            frames: (0..size).map(|_| Frame::new(shape)).collect(),
            current: 0,
            oldest: None,
            buffer_full: false,
        })
    }

    pub fn size(&self) -> usize {
        self.frames.len()
    }

    /// True once the cursor has wrapped past the last slot.
    pub fn is_full(&self) -> bool {
        self.buffer_full
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn oldest_marker(&self) -> Option<usize> {
        self.oldest
    }

    /// Slot at the write cursor.
    pub fn current(&self) -> &Frame {
        &self.frames[self.current]
    }

    /// Slot at the write cursor, for filling in place.
    pub fn current_mut(&mut self) -> &mut Frame {
        &mut self.frames[self.current]
    }

    /// Advance the cursor one slot and return the new current slot.
    pub fn advance(&mut self) -> &mut Frame {
        self.current += 1;
        if self.current == self.frames.len() {
            self.current = 0;
            self.buffer_full = true;
        }
        if self.oldest == Some(self.current) {
            self.oldest = None;
        }
        &mut self.frames[self.current]
    }

    /// The slot written just before the cursor.
    pub fn recent(&self) -> &Frame {
        &self.frames[self.previous_index()]
    }

    /// Owned copy of the most recently written slot.
    pub fn copy_recent(&self) -> Frame {
        self.recent().clone()
    }

    /// Oldest frame still considered relevant.
    ///
    /// Without a marker this is the slot `advance` will move to next, i.e.
    /// the frame written `size - 1` moves ago.
    pub fn oldest(&self) -> &Frame {
        &self.frames[self.oldest_index()]
    }

    /// Treat the current slot as the start of history.
    pub fn set_as_oldest(&mut self) {
        self.oldest = Some(self.current);
    }

    /// Relevant frames, oldest first, ending with the current slot.
    pub fn history(&self) -> Vec<&Frame> {
        let start = self.history_start();
        if start <= self.current {
            self.frames[start..=self.current].iter().collect()
        } else {
            self.frames[start..]
                .iter()
                .chain(self.frames[..=self.current].iter())
                .collect()
        }
    }

    pub fn history_len(&self) -> usize {
        let start = self.history_start();
        if start <= self.current {
            self.current - start + 1
        } else {
            self.frames.len() - start + self.current + 1
        }
    }

    fn history_start(&self) -> usize {
        match self.oldest {
            Some(index) => index,
            None if self.buffer_full => self.next_index(),
            None => 0,
        }
    }

    fn oldest_index(&self) -> usize {
        self.oldest.unwrap_or_else(|| self.next_index())
    }

    fn next_index(&self) -> usize {
        (self.current + 1) % self.frames.len()
    }

    fn previous_index(&self) -> usize {
        (self.current + self.frames.len() - 1) % self.frames.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
