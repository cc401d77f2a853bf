use nalgebra::{Point2, Vector2};

use crate::CameraModel;

/// Borrowed 8-bit grayscale frame.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    /// Row-major, `width * height` bytes.
    pub data: &'a [u8],
}

impl GrayImageView<'_> {
    /// Pixel at `(x, y)`, or 0 outside the frame.
    #[inline]
    pub fn pixel(&self, x: i64, y: i64) -> u8 {
        let inside = (0..self.width as i64).contains(&x) && (0..self.height as i64).contains(&y);
        if !inside {
            return 0;
        }
        self.data
            .get(y as usize * self.width + x as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Owned 8-bit grayscale frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

/// Bilinear sample at a sub-pixel position. Taps outside the image read
/// as black.
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let (xf, yf) = (x.floor(), y.floor());
    let (tx, ty) = (x - xf, y - yf);
    let (x0, y0) = (xf as i64, yf as i64);

    let top = lerp(src.pixel(x0, y0), src.pixel(x0 + 1, y0), tx);
    let bottom = lerp(src.pixel(x0, y0 + 1), src.pixel(x0 + 1, y0 + 1), tx);
    top + ty * (bottom - top)
}

#[inline]
fn lerp(a: u8, b: u8, t: f32) -> f32 {
    let a = f32::from(a);
    a + t * (f32::from(b) - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}

/// Remove lens distortion from a whole frame, keeping the same intrinsics.
///
/// Each output pixel is treated as an ideal pinhole observation, pushed
/// through the distortion model and sampled bilinearly from `src`.
/// Pixels that land outside the source come out black.
pub fn undistort_image(src: &GrayImageView<'_>, camera: &CameraModel) -> GrayImage {
    if camera.distortion().is_identity() {
        return GrayImage {
            width: src.width,
            height: src.height,
            data: src.data.to_vec(),
        };
    }

    let mut out = GrayImage::new(src.width, src.height);
    for y in 0..src.height {
        for x in 0..src.width {
            let ideal: Vector2<f64> = camera.pixel_to_normalized(Point2::new(x as f64, y as f64));
            let d = camera.distort_normalized(ideal);
            out.data[y * src.width + x] = sample_bilinear_u8(src, d.x as f32, d.y as f32);
        }
    }
    out
}
