// THEORY:
// The `Color` module is the most fundamental unit of the barcode. It is a "dumb"
// value type: four bytes, copied freely between tasks, never mutated once built.
// Everything the engine produces (a frame's mean, a window's mean, a pixel
// column of the final image) is a `Color`.
//
// Key principles:
// 1.  **Opaque by construction**: every derived color carries alpha 255. The
//     source's alpha channel never leaks into the barcode.
// 2.  **One averaging rule**: both the per-frame worker and the downsampler fold
//     values through `ChannelSums`, which accumulates in `f64` and rounds half
//     away from zero. Keeping a single accumulator guarantees both stages agree
//     on what "average" means.
// 3.  **Stable wire names**: the serialized form uses the keys `R`, `G`, `B`,
//     `A`, so frame-data files written by earlier tooling load unchanged.

pub mod color {
    use serde::{Deserialize, Serialize};

    pub type Channel = u8;

    pub const OPAQUE: Channel = u8::MAX;

    /// A single RGBA color value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Color {
        /// The red channel value (0-255).
        #[serde(rename = "R")]
        pub red: Channel,
        /// The green channel value (0-255).
        #[serde(rename = "G")]
        pub green: Channel,
        /// The blue channel value (0-255).
        #[serde(rename = "B")]
        pub blue: Channel,
        /// The alpha channel value; always 255 for derived colors.
        #[serde(rename = "A")]
        pub alpha: Channel,
    }

    impl Color {
        pub const BLACK: Color = Color::opaque(0, 0, 0);
        pub const WHITE: Color = Color::opaque(255, 255, 255);
        pub const RED: Color = Color::opaque(255, 0, 0);
        pub const GREEN: Color = Color::opaque(0, 255, 0);
        pub const BLUE: Color = Color::opaque(0, 0, 255);

        pub const fn opaque(red: Channel, green: Channel, blue: Channel) -> Self {
            Color {
                red,
                green,
                blue,
                alpha: OPAQUE,
            }
        }

        pub fn to_rgba(self) -> [Channel; 4] {
            [self.red, self.green, self.blue, self.alpha]
        }
    }

    impl From<image::Rgba<u8>> for Color {
        fn from(pixel: image::Rgba<u8>) -> Self {
            let [red, green, blue, alpha] = pixel.0;
            Color {
                red,
                green,
                blue,
                alpha,
            }
        }
    }

    impl From<Color> for image::Rgba<u8> {
        fn from(color: Color) -> Self {
            image::Rgba(color.to_rgba())
        }
    }

    /// Running per-channel sums used to compute rounded means.
    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    pub struct ChannelSums {
        red: f64,
        green: f64,
        blue: f64,
        count: u64,
    }

    impl ChannelSums {
        #[inline]
        pub fn add_rgb(&mut self, red: Channel, green: Channel, blue: Channel) {
            self.red += f64::from(red);
            self.green += f64::from(green);
            self.blue += f64::from(blue);
            self.count += 1;
        }

        #[inline]
        pub fn add(&mut self, color: &Color) {
            self.add_rgb(color.red, color.green, color.blue);
        }

        /// The rounded opaque mean, or `None` when nothing was added.
        pub fn mean(&self) -> Option<Color> {
            if self.count == 0 {
                return None;
            }
            let n = self.count as f64;
            // Channel inputs are 0..=255, so every mean already fits a byte.
            let round = |sum: f64| (sum / n).round() as Channel;
            Some(Color::opaque(
                round(self.red),
                round(self.green),
                round(self.blue),
            ))
        }
    }

    impl<'a> FromIterator<&'a Color> for ChannelSums {
        fn from_iter<I: IntoIterator<Item = &'a Color>>(iter: I) -> Self {
            let mut sums = ChannelSums::default();
            for color in iter {
                sums.add(color);
            }
            sums
        }
    }
}
