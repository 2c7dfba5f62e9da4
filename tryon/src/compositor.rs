//! Local fallback compositor.
//!
//! Produces a placeholder try-on result by pasting the garment photo onto the person photo with
//! fixed geometry: the garment is scaled to a fraction of the person's width (keeping its aspect
//! ratio), centred horizontally, and dropped a fraction of the person's height from the top. The
//! garment's own alpha channel is the blend mask, so transparent cut-outs composite cleanly and
//! opaque product shots cover a rectangle.
//!
//! Everything in here is synchronous and CPU-bound; callers run it on the blocking pool.

use image::{DynamicImage, ImageFormat, ImageReader, Limits, RgbaImage, imageops, imageops::FilterType};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Garments taller or wider than this ratio are rejected rather than stretched across the canvas.
pub const MAX_GARMENT_ASPECT_RATIO: f64 = 20.0;

/// Decoder allocation ceiling per image.
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("failed to decode {which} image")]
    Decode {
        which: &'static str,
        #[source]
        source: image::ImageError,
    },

    #[error("{which} image has zero width or height")]
    EmptyImage { which: &'static str },

    #[error("garment image is {width}x{height}, beyond the supported aspect ratio")]
    UnsupportedAspectRatio { width: u32, height: u32 },

    #[error("failed to encode composite")]
    Encode(#[source] image::ImageError),
}

/// Fixed heuristics deciding where and how large the garment is pasted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayGeometry {
    /// Garment width as a fraction of the person width
    pub width_fraction: f64,
    /// Top edge of the garment as a fraction of the person height
    pub vertical_fraction: f64,
    /// Constant pixel offset added to the vertical position
    #[serde(default)]
    pub vertical_bias_px: i64,
}

impl OverlayGeometry {
    /// Half the person's width, a quarter of the way down.
    pub const CLASSIC: Self = Self {
        width_fraction: 0.5,
        vertical_fraction: 0.25,
        vertical_bias_px: 0,
    };

    /// Wider garment sitting lower on the torso.
    pub const FITTED: Self = Self {
        width_fraction: 0.6,
        vertical_fraction: 0.35,
        vertical_bias_px: 10,
    };

    /// Compute the resized garment size and its paste offset for the given image dimensions.
    pub fn place(&self, person: (u32, u32), garment: (u32, u32)) -> Placement {
        let (person_width, person_height) = person;
        let (garment_width, garment_height) = garment;

        let width = ((person_width as f64 * self.width_fraction).floor() as u32).max(1);
        let aspect_ratio = garment_height as f64 / garment_width as f64;
        let height = ((width as f64 * aspect_ratio).floor() as u32).max(1);

        let x = (person_width as i64 - width as i64).div_euclid(2);
        let y = (person_height as f64 * self.vertical_fraction).floor() as i64 + self.vertical_bias_px;

        Placement { width, height, x, y }
    }
}

impl Default for OverlayGeometry {
    fn default() -> Self {
        Self::CLASSIC
    }
}

/// Where the resized garment lands on the person canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub x: i64,
    pub y: i64,
}

impl Placement {
    /// Rows of the resized garment that land on a canvas of the given height, as
    /// `(first_row, row_count)`. `None` when the garment misses the canvas entirely.
    pub fn visible_rows(&self, canvas_height: u32) -> Option<(u32, u32)> {
        let top = (-self.y).max(0);
        let bottom = (canvas_height as i64 - self.y).min(self.height as i64);
        if bottom <= top {
            return None;
        }
        Some((top as u32, (bottom - top) as u32))
    }
}

/// Paste `garment` onto a copy of `person`.
///
/// The result always has the person's dimensions. Only the garment rows that land on the canvas
/// are resampled, so a tall garment never costs more than the canvas itself.
pub fn compose(person: &DynamicImage, garment: &DynamicImage, geometry: &OverlayGeometry) -> Result<RgbaImage, ComposeError> {
    let mut canvas = person.to_rgba8();
    let garment = garment.to_rgba8();

    if canvas.width() == 0 || canvas.height() == 0 {
        return Err(ComposeError::EmptyImage { which: "person" });
    }
    if garment.width() == 0 || garment.height() == 0 {
        return Err(ComposeError::EmptyImage { which: "garment" });
    }

    let aspect_ratio = garment.height() as f64 / garment.width() as f64;
    if !(1.0 / MAX_GARMENT_ASPECT_RATIO..=MAX_GARMENT_ASPECT_RATIO).contains(&aspect_ratio) {
        return Err(ComposeError::UnsupportedAspectRatio {
            width: garment.width(),
            height: garment.height(),
        });
    }

    let placement = geometry.place(canvas.dimensions(), garment.dimensions());

    tracing::debug!(
        person_width = canvas.width(),
        person_height = canvas.height(),
        garment_width = placement.width,
        garment_height = placement.height,
        x = placement.x,
        y = placement.y,
        "Compositing garment overlay"
    );

    let Some((first_row, rows)) = placement.visible_rows(canvas.height()) else {
        return Ok(canvas);
    };

    // Source rows feeding the visible target rows, rounded outwards.
    let scale = garment.height() as f64 / placement.height as f64;
    let src_top = ((first_row as f64 * scale).floor() as u32).min(garment.height() - 1);
    let src_bottom = (((first_row + rows) as f64 * scale).ceil() as u32).clamp(src_top + 1, garment.height());

    let source = imageops::crop_imm(&garment, 0, src_top, garment.width(), src_bottom - src_top).to_image();
    let resized = imageops::resize(&source, placement.width, rows, FilterType::CatmullRom);

    imageops::overlay(&mut canvas, &resized, placement.x, placement.y + first_row as i64);
    Ok(canvas)
}

fn decode(bytes: &[u8], which: &'static str) -> Result<DynamicImage, ComposeError> {
    let mut limits = Limits::default();
    limits.max_alloc = Some(MAX_DECODE_ALLOC);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ComposeError::Decode {
            which,
            source: image::ImageError::IoError(e),
        })?;
    reader.limits(limits);
    reader.decode().map_err(|source| ComposeError::Decode { which, source })
}

/// Decode both uploads, composite them and encode the result as PNG.
pub fn compose_png(person: &[u8], garment: &[u8], geometry: &OverlayGeometry) -> Result<Vec<u8>, ComposeError> {
    let person = decode(person, "person")?;
    let garment = decode(garment, "garment")?;

    let composite = compose(&person, &garment, geometry)?;

    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(composite)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(ComposeError::Encode)?;
    Ok(buf)
}
