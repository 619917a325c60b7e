pub mod image_helper {
    use crate::core_modules::color::color::Color;
    use crate::core_modules::sequence::ColorSequence;
    use crate::error::{PipelineError, Result};
    use crate::pipeline::BarcodeConfig;
    use image::{ImageEncoder, RgbaImage};
    use std::io::BufWriter;
    use std::path::Path;

    /// Rasterizes one pixel column per color, repeated down every row.
    pub fn render_barcode(columns: &[Color], height: u32) -> Result<RgbaImage> {
        if columns.is_empty() || height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "cannot render a {}x{} barcode",
                columns.len(),
                height
            )));
        }
        let width = u32::try_from(columns.len())
            .map_err(|_| PipelineError::InvalidConfig(format!("{} columns is too wide", columns.len())))?;

        Ok(RgbaImage::from_fn(width, height, |x, _| columns[x as usize].into()))
    }

    /// Downsamples a drained sequence to `config.width` columns and renders it.
    pub fn render_sequence(sequence: &ColorSequence, config: &BarcodeConfig) -> Result<RgbaImage> {
        config.validate()?;
        let columns = sequence.downsample(config.width as usize, config.smoothing)?;
        render_barcode(&columns, config.height)
    }

    pub fn save_png(path: impl AsRef<Path>, image: &RgbaImage) -> Result<()> {
        let output = BufWriter::new(std::fs::File::create(path.as_ref())?);
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )?;

        tracing::info!(
            path = %path.as_ref().display(),
            width = image.width(),
            height = image.height(),
            "barcode written"
        );
        Ok(())
    }
}
