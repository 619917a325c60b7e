// THEORY:
// A `ColorSequence` is what the pipeline leaves behind once it has drained: one
// mean color per successfully averaged frame, in the order chosen by the
// collector. It has no mutating API. The collector builds the inner vector and
// hands the finished sequence out by value, so after drain it can be read from
// anywhere without locks.
//
// Persistence is a convenience, not a contract: a plain JSON array of
// `{"R","G","B","A"}` objects, so a long video only has to be averaged once and
// the barcode can be re-rendered at other sizes later.

use crate::core_modules::color::color::Color;
use crate::core_modules::downsampler;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// The finalized, immutable per-frame color list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorSequence {
    colors: Vec<Color>,
}

impl ColorSequence {
    pub(crate) fn from_colors(colors: Vec<Color>) -> Self {
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn as_slice(&self) -> &[Color] {
        &self.colors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Color> {
        self.colors.iter()
    }

    pub fn into_inner(self) -> Vec<Color> {
        self.colors
    }

    /// Folds the sequence into `width` window averages.
    pub fn downsample(&self, width: usize, smoothing: usize) -> Result<Vec<Color>> {
        downsampler::downsample(&self.colors, width, smoothing)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        tracing::debug!(path = %path.as_ref().display(), colors = self.len(), "frame data written");
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let sequence: ColorSequence = serde_json::from_reader(reader)?;
        tracing::debug!(path = %path.as_ref().display(), colors = sequence.len(), "frame data loaded");
        Ok(sequence)
    }
}

impl From<Vec<Color>> for ColorSequence {
    fn from(colors: Vec<Color>) -> Self {
        Self::from_colors(colors)
    }
}

impl<'a> IntoIterator for &'a ColorSequence {
    type Item = &'a Color;
    type IntoIter = std::slice::Iter<'a, Color>;

    fn into_iter(self) -> Self::IntoIter {
        self.colors.iter()
    }
}
