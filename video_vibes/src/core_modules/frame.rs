// THEORY:
// The `Frame` module is the engine's view of one decoded video image. It is a
// "dumb", immutable raster: dimensions, a pixel layout, and a flat byte buffer.
// Decoding is somebody else's problem; by the time a `Frame` exists the bytes
// are plain 8-bit RGB or RGBA.
//
// Ownership is the contract here. A `Frame` is moved into exactly one averaging
// task and dropped when that task ends, so the engine can never hold on to a
// buffer the source wants back.

pub mod frame {
    use crate::error::{PipelineError, Result};
    use image::{DynamicImage, RgbImage, RgbaImage};

    /// How the bytes of a single pixel are laid out in the buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PixelLayout {
        Rgb8,
        Rgba8,
    }

    impl PixelLayout {
        pub const fn channels(self) -> usize {
            match self {
                PixelLayout::Rgb8 => 3,
                PixelLayout::Rgba8 => 4,
            }
        }
    }

    /// An immutable, decoded raster frame.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Frame {
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    }

    impl Frame {
        /// Wraps a raw buffer, checking that it holds exactly
        /// `width * height` pixels of the given layout.
        pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
            let expected = (width as usize)
                .checked_mul(height as usize)
                .and_then(|pixels| pixels.checked_mul(layout.channels()))
                .ok_or_else(|| {
                    PipelineError::invalid_frame(format!("{}x{} frame overflows memory", width, height))
                })?;
            if data.len() != expected {
                return Err(PipelineError::invalid_frame(format!(
                    "{}x{} {:?} frame needs {} bytes, got {}",
                    width,
                    height,
                    layout,
                    expected,
                    data.len()
                )));
            }
            Ok(Self {
                width,
                height,
                layout,
                data,
            })
        }

        /// A frame where every pixel has the same RGB value.
        pub fn solid(width: u32, height: u32, red: u8, green: u8, blue: u8) -> Self {
            let pixels = width as usize * height as usize;
            let data = [red, green, blue].repeat(pixels);
            Self {
                width,
                height,
                layout: PixelLayout::Rgb8,
                data,
            }
        }

        pub fn width(&self) -> u32 {
            self.width
        }

        pub fn height(&self) -> u32 {
            self.height
        }

        pub fn layout(&self) -> PixelLayout {
            self.layout
        }

        pub fn pixel_count(&self) -> usize {
            self.width as usize * self.height as usize
        }

        pub fn data(&self) -> &[u8] {
            &self.data
        }

        /// Iterates `[r, g, b]` for each of the `width * height` pixels,
        /// skipping any alpha byte.
        pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
            let len = self.pixel_count() * self.layout.channels();
            self.data[..len.min(self.data.len())]
                .chunks_exact(self.layout.channels())
                .map(|pixel| [pixel[0], pixel[1], pixel[2]])
        }
    }

    impl Frame {
        /// Takes an `image` buffer's bytes, dropping any slack past the last
        /// pixel; `ImageBuffer` allows an oversized container.
        fn from_raw_parts(width: u32, height: u32, layout: PixelLayout, mut data: Vec<u8>) -> Self {
            let len = width as usize * height as usize * layout.channels();
            data.truncate(len);
            Self {
                width,
                height,
                layout,
                data,
            }
        }
    }

    impl From<RgbImage> for Frame {
        fn from(image: RgbImage) -> Self {
            let (width, height) = image.dimensions();
            Self::from_raw_parts(width, height, PixelLayout::Rgb8, image.into_raw())
        }
    }

    impl From<RgbaImage> for Frame {
        fn from(image: RgbaImage) -> Self {
            let (width, height) = image.dimensions();
            Self::from_raw_parts(width, height, PixelLayout::Rgba8, image.into_raw())
        }
    }

    impl From<DynamicImage> for Frame {
        fn from(image: DynamicImage) -> Self {
            match image {
                DynamicImage::ImageRgb8(rgb) => rgb.into(),
                DynamicImage::ImageRgba8(rgba) => rgba.into(),
                other if other.color().has_alpha() => other.into_rgba8().into(),
                other => other.into_rgb8().into(),
            }
        }
    }
}
