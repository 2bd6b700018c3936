use crate::error::{Result, WaveError};
use crate::grid::Cell;
use crate::wavefield::Wavefield;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Divisor applied to displacement before it is mapped to a pixel.
///
/// Free-running fields live in [-1, 1] and use 1.0; audio-driven fields track
/// 16-bit PCM amplitudes and use 32768.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Normalization(pub f64);

impl Normalization {
    pub const RAW: Normalization = Normalization(1.0);
    pub const PCM16: Normalization = Normalization(32768.0);

    pub fn normalize(self, value: f64) -> f64 {
        value / self.0
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::RAW
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    #[default]
    Grayscale,
    /// Red-yellow-blue diverging map, troughs red and crests blue.
    Diverging,
}

/// Pure red, written over the probe cell.
pub const PROBE_MARKER: [u8; 3] = [255, 0, 0];

/// `(normalized + 1) * 255 / 2`, truncated and clamped to a byte.
#[inline]
pub fn intensity(normalized: f64) -> u8 {
    // f64 -> u8 casts truncate toward zero and saturate, NaN maps to 0
    ((normalized + 1.0) * 255.0 / 2.0) as u8
}

/// One RGBA raster, row-major, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl OutputFrame {
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y * self.width + x) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

/// Maps displacement to pixels. Never touches the simulation state.
pub struct WavefieldVisualiser {
    normalization: Normalization,
    palette: Palette,
    marker: Option<Cell>,
    gradient: Box<dyn colorgrad::Gradient + Send + Sync>,
}

impl WavefieldVisualiser {
    pub fn new(normalization: Normalization, palette: Palette) -> Self {
        Self {
            normalization,
            palette,
            marker: None,
            gradient: Box::new(colorgrad::preset::rd_yl_bu()),
        }
    }

    /// Paint `cell` with [`PROBE_MARKER`] after the colour pass.
    pub fn with_marker(mut self, cell: Option<Cell>) -> Self {
        self.marker = cell;
        self
    }

    fn value_to_rgb(&self, value: f64) -> [u8; 3] {
        let normalized = self.normalization.normalize(value);
        match self.palette {
            Palette::Grayscale => {
                let level = intensity(normalized);
                [level, level, level]
            }
            Palette::Diverging => {
                let t = ((normalized + 1.0) / 2.0).clamp(0.0, 1.0);
                let rgba = self.gradient.at(t as f32).to_rgba8();
                [rgba[0], rgba[1], rgba[2]]
            }
        }
    }

    pub fn render(&self, field: &Wavefield) -> Result<OutputFrame> {
        let (width, height) = field.dim();
        let len = width * height * 4;
        let mut pixels: Vec<u8> = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| WaveError::Allocation {
                what: "output frame",
                cells: width * height,
            })?;
        pixels.resize(len, 0);

        if len == 0 {
            return Ok(OutputFrame {
                width,
                height,
                pixels,
            });
        }

        let displacement = &field.displacement;
        pixels
            .par_chunks_mut(width * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let [r, g, b] = self.value_to_rgb(displacement[[y, x]]);
                    px[0] = r;
                    px[1] = g;
                    px[2] = b;
                    px[3] = 255;
                }
            });

        if let Some(cell) = self.marker {
            if cell.x < width && cell.y < height {
                let i = (cell.y * width + cell.x) * 4;
                pixels[i..i + 3].copy_from_slice(&PROBE_MARKER);
            }
        }

        Ok(OutputFrame {
            width,
            height,
            pixels,
        })
    }
}

/// Consumer of rendered frames, one call per scheduled frame in order.
pub trait FrameSink: Send {
    fn write_frame(&mut self, index: usize, frame: OutputFrame) -> Result<()>;
}

/// Keeps every frame in memory.
impl FrameSink for Vec<OutputFrame> {
    fn write_frame(&mut self, _index: usize, frame: OutputFrame) -> Result<()> {
        self.push(frame);
        Ok(())
    }
}

/// Writes `<dir>/<prefix>-NNN.png`, one file per frame.
pub struct PngFrameWriter {
    output_dir: PathBuf,
    prefix: String,
}

impl PngFrameWriter {
    pub fn new(output_dir: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        std::fs::create_dir_all(output_dir.as_ref())?;
        Ok(Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
        })
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}-{:03}.png", self.prefix, index))
    }
}

impl FrameSink for PngFrameWriter {
    fn write_frame(&mut self, index: usize, frame: OutputFrame) -> Result<()> {
        let path = self.frame_path(index);
        let image = image::RgbaImage::from_raw(frame.width as u32, frame.height as u32, frame.pixels)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame {} does not match its {}x{} size", index, frame.width, frame.height),
                )
            })?;
        image.save(&path)?;
        debug!(path = %path.display(), "saved frame");
        Ok(())
    }
}
