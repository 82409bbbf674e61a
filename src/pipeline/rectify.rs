//! Perspective correction: map a photographed quadrilateral onto an upright
//! rectangle.
//!
//! The output size is taken from the quad itself: width is the longer of the
//! top and bottom edges, height the longer of the left and right edges. A
//! homography is solved from the four corner correspondences and the output
//! is filled by inverse mapping each destination pixel back into the source
//! image with bilinear sampling. Samples falling outside the source are black.
//!
//! Pure CPU work; [`rectify_in_background`] moves it onto the blocking pool so
//! a large photo never stalls the async workers serving other batches.

use crate::error::IngestError;
use crate::model::{Point, Quad, RectifiedPage};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// JPEG quality for rectified pages.
const JPEG_QUALITY: u8 = 90;

/// Refuse outputs above this many pixels (≈ 12 000 × 12 000).
const MAX_OUTPUT_PIXELS: u64 = 150_000_000;

/// A 3×3 projective transform, row-major, with `m[8] == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography([f64; 9]);

impl Homography {
    /// Solve the transform taking each `from[i]` to `to[i]`.
    ///
    /// Fails with [`IngestError::Geometry`] when the correspondences are
    /// degenerate (three or more collinear points on either side).
    pub fn from_correspondences(from: &[Point; 4], to: &[Point; 4]) -> Result<Self, IngestError> {
        let mut a = [[0.0f64; 9]; 8];
        for (i, (src, dst)) in from.iter().zip(to.iter()).enumerate() {
            let (u, v, x, y) = (src.x, src.y, dst.x, dst.y);
            a[2 * i] = [u, v, 1.0, 0.0, 0.0, 0.0, -u * x, -v * x, x];
            a[2 * i + 1] = [0.0, 0.0, 0.0, u, v, 1.0, -u * y, -v * y, y];
        }
        let h = solve_8x8(a)
            .ok_or_else(|| IngestError::Geometry("quad corners are collinear".into()))?;
        let m = Self([h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0]);
        if m.normalised_determinant() < 1e-12 {
            return Err(IngestError::Geometry("quad does not span an area".into()));
        }
        Ok(m)
    }

    /// |det| divided by the product of the row norms; 0 for a singular matrix,
    /// at most 1 by Hadamard's inequality.
    fn normalised_determinant(&self) -> f64 {
        let m = &self.0;
        let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
            + m[2] * (m[3] * m[7] - m[4] * m[6]);
        let norms: f64 = m
            .chunks(3)
            .map(|r| (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt())
            .product();
        if norms == 0.0 {
            0.0
        } else {
            det.abs() / norms
        }
    }

    /// Map a point through the transform. `None` at the line at infinity.
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.0;
        let w = m[6] * x + m[7] * y + m[8];
        if w.abs() < f64::EPSILON {
            return None;
        }
        Some((
            (m[0] * x + m[1] * y + m[2]) / w,
            (m[3] * x + m[4] * y + m[5]) / w,
        ))
    }
}

/// Gaussian elimination with partial pivoting on an augmented 8×9 system.
fn solve_8x8(mut a: [[f64; 9]; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-10 {
            return None;
        }
        a.swap(col, pivot);

        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut x = [0.0; 8];
    for (i, xi) in x.iter_mut().enumerate() {
        *xi = a[i][8] / a[i][i];
        if !xi.is_finite() {
            return None;
        }
    }
    Some(x)
}

/// Rectify `image` to the region bounded by `quad`.
///
/// # Errors
/// * [`IngestError::Validation`]: the bytes are not a decodable image
/// * [`IngestError::Geometry`]: the quad has (rounded) zero width/height or
///   is not invertible
pub fn rectify(image: &[u8], quad: &Quad) -> Result<RectifiedPage, IngestError> {
    let source = image::load_from_memory(image)
        .map_err(|_| IngestError::Validation("invalid image data".into()))?
        .to_rgb8();

    let (width, height) = quad.output_size();
    let out_w = width.round();
    let out_h = height.round();
    if out_w < 1.0 || out_h < 1.0 {
        return Err(IngestError::Geometry(format!(
            "quad collapses to {out_w}×{out_h} px"
        )));
    }
    if out_w * out_h > MAX_OUTPUT_PIXELS as f64 {
        return Err(IngestError::Validation(format!(
            "rectified page would be {out_w}×{out_h} px, larger than allowed"
        )));
    }
    let (out_w, out_h) = (out_w as u32, out_h as u32);

    let (span_x, span_y) = (pixel_span(width), pixel_span(height));
    let target = [
        Point::new(0.0, 0.0),
        Point::new(span_x, 0.0),
        Point::new(span_x, span_y),
        Point::new(0.0, span_y),
    ];
    // Solve destination → source so every output pixel is sampled once.
    let inverse = Homography::from_correspondences(&target, quad.corners())?;

    let warped = RgbImage::from_fn(out_w, out_h, |x, y| {
        inverse
            .apply(x as f64, y as f64)
            .and_then(|(sx, sy)| sample_bilinear(&source, sx, sy))
            .unwrap_or(Rgb([0, 0, 0]))
    });

    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(warped)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))
        .map_err(|e| IngestError::Internal(format!("failed to encode rectified page: {e}")))?;

    debug!(
        "Rectified {}x{} source → {}x{} px ({} bytes)",
        source.width(),
        source.height(),
        out_w,
        out_h,
        bytes.len()
    );

    Ok(RectifiedPage {
        bytes,
        width: out_w,
        height: out_h,
        format: ImageFormat::Jpeg,
    })
}

/// Rectify when a quad is given; otherwise hand the bytes back untouched.
///
/// The pass-through path only reads the image header, to learn its format and
/// size, and fails with [`IngestError::Validation`] if that header is invalid.
pub fn rectify_page(image: Vec<u8>, quad: Option<&Quad>) -> Result<RectifiedPage, IngestError> {
    match quad {
        Some(q) => rectify(&image, q),
        None => {
            let format = image::guess_format(&image)
                .map_err(|_| IngestError::Validation("invalid image data".into()))?;
            let (width, height) = ImageReader::with_format(Cursor::new(&image), format)
                .into_dimensions()
                .map_err(|_| IngestError::Validation("invalid image data".into()))?;
            Ok(RectifiedPage {
                bytes: image,
                width,
                height,
                format,
            })
        }
    }
}

/// [`rectify_page`] on the blocking thread pool.
pub async fn rectify_in_background(
    image: Vec<u8>,
    quad: Option<Quad>,
) -> Result<RectifiedPage, IngestError> {
    tokio::task::spawn_blocking(move || rectify_page(image, quad.as_ref()))
        .await
        .map_err(|e| IngestError::Internal(format!("Rectify task panicked: {}", e)))?
}

/// Distance between the first and last pixel centres along an edge of
/// `len` px. A one-pixel edge has no such distance, so it keeps its length.
fn pixel_span(len: f64) -> f64 {
    if len - 1.0 > 1e-6 {
        len - 1.0
    } else {
        len
    }
}

fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Option<Rgb<u8>> {
    let max_x = (img.width() - 1) as f64;
    let max_y = (img.height() - 1) as f64;
    if !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
        return None;
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as u32, y0 as u32);
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}
