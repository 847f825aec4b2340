//! Drawing surfaces.
//!
//! [`Surface`] mirrors the handful of 2D canvas operations the renderer needs. The
//! [`CanvasSurface`] implementation draws into an RGBA buffer, cleared pixels are fully
//! transparent.
use std::path::Path;

use image::{imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;
use lazy_static::lazy_static;
use rusttype::{Font, Scale};
use serde::Serialize;

/// Pixel size of overlay labels.
pub const FONT_SIZE: f32 = 20.0;

/// Text colors used by the overlay.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Red,
}

impl Color {
    pub fn rgba(&self) -> Rgba<u8> {
        match self {
            Color::Green => Rgba([0, 128, 0, 255]),
            Color::Red => Rgba([255, 0, 0, 255]),
        }
    }
}

/// Drawable region.
pub trait Surface: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Resize and clear.
    fn resize(&mut self, width: u32, height: u32);

    fn clear_rect(&mut self, x: u32, y: u32, width: u32, height: u32);

    /// Draw `image` stretched into the given rectangle.
    fn draw_image(&mut self, image: &RgbaImage, x: u32, y: u32, width: u32, height: u32);

    /// Draw `text` with its baseline starting at `(x, y)`.
    fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Color);

    /// Current pixels, if the surface keeps any.
    fn snapshot(&self) -> Option<RgbaImage> {
        None
    }

    /// Clear the whole surface.
    fn clear(&mut self) {
        let (width, height) = self.dimensions();
        self.clear_rect(0, 0, width, height);
    }
}

lazy_static! {
    static ref DEJAVU_MONO: Font<'static> = {
        let font_data: &[u8] = include_bytes!("../../resources/DejaVuSansMono.ttf");
        let font: Font<'static> = Font::try_from_bytes(font_data).expect("failed to load font");
        font
    };
}

/// Load a TrueType font from disk.
pub fn load_font(path: &Path) -> Option<Font<'static>> {
    let data = std::fs::read(path).ok()?;
    let font = Font::try_from_vec(data);
    if font.is_some() {
        log::debug!("Loaded font {}", path.display());
    }
    font
}

/// Font at `path` if given and loadable, the built-in font otherwise.
pub fn font_or_default(path: Option<&Path>) -> Font<'static> {
    if let Some(path) = path {
        match load_font(path) {
            Some(font) => return font,
            None => log::warn!("Could not load font {}, using built-in font", path.display()),
        }
    }
    DEJAVU_MONO.clone()
}

/// RGBA canvas.
pub struct CanvasSurface {
    pixels: RgbaImage,
    font: Font<'static>,
}

impl CanvasSurface {
    /// Blank canvas drawing labels with `font`, or the built-in font if `None`.
    pub fn new(width: u32, height: u32, font: Option<Font<'static>>) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
            font: font.unwrap_or_else(|| DEJAVU_MONO.clone()),
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

impl Surface for CanvasSurface {
    fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.pixels = RgbaImage::new(width, height);
    }

    fn clear_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let (surface_width, surface_height) = self.pixels.dimensions();
        let x_end = x.saturating_add(width).min(surface_width);
        let y_end = y.saturating_add(height).min(surface_height);

        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.pixels.put_pixel(px, py, Rgba([0, 0, 0, 0]));
            }
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let scaled;
        let image = match image.dimensions() == (width, height) {
            true => image,
            false => {
                scaled = image::imageops::resize(image, width, height, FilterType::Triangle);
                &scaled
            }
        };
        image::imageops::overlay(&mut self.pixels, image, x as i64, y as i64);
    }

    fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Color) {
        // imageproc positions the top of the glyph box, the canvas API the baseline
        let top = y - FONT_SIZE as i32;
        draw_text_mut(
            &mut self.pixels,
            color.rgba(),
            x,
            top,
            Scale::uniform(FONT_SIZE),
            &self.font,
            text,
        );
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        Some(self.pixels.clone())
    }
}

/// Flatten an RGBA snapshot onto black, for JPEG encoding.
pub fn flatten(image: RgbaImage) -> image::RgbImage {
    let mut flat = image::RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let scale = |c: u8| (c as u16 * a as u16 / 255) as u8;
        flat.put_pixel(x, y, image::Rgb([scale(r), scale(g), scale(b)]));
    }
    flat
}

/// Decode an encoded image (JPEG, PNG, ...) into RGBA pixels.
pub fn decode_rgba(data: &[u8]) -> Result<RgbaImage, image::ImageError> {
    image::load_from_memory(data).map(DynamicImage::into_rgba8)
}
