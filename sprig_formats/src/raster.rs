use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Largest edge, in pixels, a derived raster may have.
pub const MAX_RASTER_EDGE: u32 = 4096;

/// Edge used when a vector source does not declare its extent.
pub const DEFAULT_RASTER_EDGE: u32 = 32;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("vector source is not valid UTF-8")]
    NotText,
    #[error("vector source has no <svg> root element")]
    MissingRoot,
    #[error("vector extent {width}x{height} exceeds the {MAX_RASTER_EDGE}px limit")]
    TooLarge { width: u32, height: u32 },
    #[error("building extent pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Decoded RGBA8 pixel buffer derived from an image's vector source.
///
/// Never persisted; rebuilt from the source bytes whenever a definition is
/// loaded or a script rewrites the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Raster {
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 4;
        Raster {
            width,
            height,
            pixels: vec![0; len],
        }
    }

    /// Replaces the buffer in place, resizing it to the incoming extent.
    pub fn replace_with(&mut self, other: Raster) {
        self.width = other.width;
        self.height = other.height;
        self.pixels.clear();
        self.pixels.extend_from_slice(&other.pixels);
    }
}

/// Turns vector-image bytes into a raster handle.
pub trait Rasterizer {
    fn rasterize(&self, source: &[u8]) -> Result<Raster, RasterError>;
}

/// Sizes a transparent buffer from the declared extent of an SVG root.
///
/// Drawing the vector content is left to the renderer; the frame loop only
/// needs a correctly sized handle to swap when a script rewrites its image.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtentRasterizer;

impl Rasterizer for ExtentRasterizer {
    fn rasterize(&self, source: &[u8]) -> Result<Raster, RasterError> {
        let text = std::str::from_utf8(source).map_err(|_| RasterError::NotText)?;
        let root = root_regex()?
            .find(text)
            .ok_or(RasterError::MissingRoot)?
            .as_str();

        let (mut width, mut height) = (None, None);
        if let Some(caps) = view_box_regex()?.captures(root) {
            width = parse_length(&caps[1]);
            height = parse_length(&caps[2]);
        }
        if let Some(caps) = attribute_regex("width")?.captures(root) {
            width = parse_length(&caps[1]).or(width);
        }
        if let Some(caps) = attribute_regex("height")?.captures(root) {
            height = parse_length(&caps[1]).or(height);
        }

        let width = width.unwrap_or(DEFAULT_RASTER_EDGE);
        let height = height.unwrap_or(DEFAULT_RASTER_EDGE);
        if width > MAX_RASTER_EDGE || height > MAX_RASTER_EDGE {
            return Err(RasterError::TooLarge { width, height });
        }
        Ok(Raster::blank(width.max(1), height.max(1)))
    }
}

fn parse_length(raw: &str) -> Option<u32> {
    let trimmed = raw.trim().trim_end_matches("px");
    let value: f64 = trimmed.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.ceil() as u32)
}

type PatternCell = OnceLock<Result<Regex, regex::Error>>;

fn cached(cell: &'static PatternCell, pattern: impl FnOnce() -> String) -> Result<&'static Regex, RasterError> {
    cell.get_or_init(|| Regex::new(&pattern()))
        .as_ref()
        .map_err(|err| RasterError::Pattern(err.clone()))
}

fn root_regex() -> Result<&'static Regex, RasterError> {
    static ROOT: PatternCell = OnceLock::new();
    cached(&ROOT, || r"(?s)<svg\b[^>]*>".to_string())
}

fn view_box_regex() -> Result<&'static Regex, RasterError> {
    static VIEW_BOX: PatternCell = OnceLock::new();
    cached(&VIEW_BOX, || {
        r#"viewBox\s*=\s*["']\s*[-\d.]+[\s,]+[-\d.]+[\s,]+([\d.]+)[\s,]+([\d.]+)\s*["']"#.to_string()
    })
}

fn attribute_regex(name: &str) -> Result<&'static Regex, RasterError> {
    static WIDTH: PatternCell = OnceLock::new();
    static HEIGHT: PatternCell = OnceLock::new();
    let cell = if name == "width" { &WIDTH } else { &HEIGHT };
    cached(cell, || format!(r#"\s{name}\s*=\s*["']([\d.]+(?:px)?)["']"#))
}
