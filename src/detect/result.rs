/// `pixel_stat` value reported while the detector lacks comparison history.
pub const NO_DATA: i64 = -1;
/// `pixel_stat` value reported for a suspected sensor recalibration.
pub const RECALIBRATING: i64 = -2;

/// Outcome of running motion detection on one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Detection {
    /// Not enough history for a valid comparison yet.
    NoData,
    /// Too many pixels changed at once; treated as a global sensor jump.
    Recalibration {
        /// Pixels that differed from the comparison frame.
        nonzero: usize,
    },
    /// A normal measurement.
    Measured {
        /// Pixels whose change exceeded the delta threshold.
        changed: usize,
        motion: bool,
    },
}

impl Detection {
    pub fn has_motion(&self) -> bool {
        matches!(self, Detection::Measured { motion: true, .. })
    }

    /// Diagnostic pixel count, with negative sentinels for the non-measured cases.
    pub fn pixel_stat(&self) -> i64 {
        match self {
            Detection::NoData => NO_DATA,
            Detection::Recalibration { .. } => RECALIBRATING,
            Detection::Measured { changed, .. } => *changed as i64,
        }
    }
}
