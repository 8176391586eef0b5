mod motion;
mod result;

pub use motion::{DiffMode, MotionConfig, MotionDetector};
pub use result::{Detection, NO_DATA, RECALIBRATING};
