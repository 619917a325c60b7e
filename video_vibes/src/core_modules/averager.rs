// THEORY:
// The `averager` is the unit of work the pool fans out: one frame in, one color
// out. It is a pure function with no shared state, which is what lets the pool
// run any number of them side by side.
//
// Sums are kept in `f64`. A 4K frame has ~8.3M pixels, so a byte-channel sum
// stays far below 2^53 and every partial sum is exact; the result is therefore
// independent of the order the pixels are visited in.

use crate::core_modules::color::color::{ChannelSums, Color};
use crate::core_modules::frame::frame::Frame;
use crate::error::{PipelineError, Result};

/// Computes the rounded, opaque mean RGB color of a frame.
pub fn average_color(frame: &Frame) -> Result<Color> {
    if frame.pixel_count() == 0 {
        return Err(PipelineError::invalid_frame(format!(
            "{}x{} frame has no pixels",
            frame.width(),
            frame.height()
        )));
    }

    let mut sums = ChannelSums::default();
    for [red, green, blue] in frame.rgb_pixels() {
        sums.add_rgb(red, green, blue);
    }

    sums.mean()
        .ok_or_else(|| PipelineError::invalid_frame("frame buffer yielded no pixels"))
}
