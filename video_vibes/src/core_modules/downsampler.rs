// THEORY:
// The `downsampler` maps an arbitrarily long color sequence onto exactly `width`
// output colors, one per pixel column of the barcode.
//
// The sequence is cut into `width` windows of `floor(len / width)` entries.
// Column `p` averages the entries starting at `p * window` and running for
// `window * smoothing` entries, clipped at the end of the sequence. With
// `smoothing == 1` the windows are disjoint; larger values let each column bleed
// into the following windows, blurring hard cuts. A clipped tail is averaged
// over the entries it actually covers.
//
// Any remainder `len % width` past the last window is only reachable through
// smoothing; with `smoothing == 1` it is dropped.

use crate::core_modules::color::color::{ChannelSums, Color};
use crate::error::{PipelineError, Result};

/// Averages `colors` into `width` windowed columns.
pub fn downsample(colors: &[Color], width: usize, smoothing: usize) -> Result<Vec<Color>> {
    if width == 0 {
        return Err(PipelineError::InvalidConfig("output width must be at least 1".into()));
    }
    if smoothing == 0 {
        return Err(PipelineError::InvalidConfig("smoothing must be at least 1".into()));
    }
    if colors.len() < width {
        return Err(PipelineError::InsufficientFrames {
            frames: colors.len(),
            width,
        });
    }

    let window = colors.len() / width;
    let span = window.saturating_mul(smoothing);

    (0..width)
        .map(|position| {
            let start = position * window;
            let end = start.saturating_add(span).min(colors.len());
            // start < len because position < width and window = floor(len / width).
            colors[start..end]
                .iter()
                .collect::<ChannelSums>()
                .mean()
                .ok_or_else(|| PipelineError::InsufficientFrames {
                    frames: colors.len(),
                    width,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red_ramp(len: usize) -> Vec<Color> {
        (0..len).map(|i| Color::opaque(i as u8, 0, 0)).collect()
    }

    #[test]
    fn uniform_input_yields_uniform_columns() {
        let gray = Color::opaque(128, 128, 128);
        for len in [7, 10, 33, 100] {
            let out = downsample(&vec![gray; len], 7, 1).unwrap();
            assert_eq!(out, vec![gray; 7]);
        }
    }

    #[test]
    fn disjoint_windows_average_their_own_entries() {
        let out = downsample(&red_ramp(8), 4, 1).unwrap();
        // windows [0,1] [2,3] [4,5] [6,7] -> 0.5, 2.5, 4.5, 6.5 rounded away from zero
        let reds: Vec<u8> = out.iter().map(|c| c.red).collect();
        assert_eq!(reds, vec![1, 3, 5, 7]);
    }

    #[test]
    fn smoothing_keeps_increasing_trend() {
        let out = downsample(&red_ramp(100), 10, 2).unwrap();
        assert_eq!(out.len(), 10);
        let reds: Vec<u8> = out.iter().map(|c| c.red).collect();
        assert!(reds.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", reds);
    }

    #[test]
    fn clipped_tail_divides_by_actual_span() {
        // window = 2, span = 6. Column 2 covers only [4, 6): reds 4 and 5.
        let out = downsample(&red_ramp(6), 3, 3).unwrap();
        assert_eq!(out[0].red, 3); // [0, 6) -> 2.5
        assert_eq!(out[1].red, 4); // [2, 6) -> 3.5
        assert_eq!(out[2].red, 5); // [4, 6) -> 4.5
    }

    #[test]
    fn remainder_is_dropped_without_smoothing() {
        // len 10, width 3 -> window 3; entry 9 is never read.
        let mut colors = vec![Color::BLACK; 9];
        colors.push(Color::WHITE);
        assert_eq!(downsample(&colors, 3, 1).unwrap(), vec![Color::BLACK; 3]);
    }

    #[test]
    fn fewer_colors_than_columns_is_an_error() {
        match downsample(&red_ramp(3), 4, 1) {
            Err(PipelineError::InsufficientFrames { frames, width }) => {
                assert_eq!((frames, width), (3, 4));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            downsample(&[], 1, 1),
            Err(PipelineError::InsufficientFrames { frames: 0, width: 1 })
        ));
    }

    #[test]
    fn zero_width_or_smoothing_is_rejected() {
        assert!(matches!(
            downsample(&red_ramp(4), 0, 1),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            downsample(&red_ramp(4), 2, 0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
