//! Image decoding and pixel-buffer operations.
//!
//! All downstream stages consume `BgrImage`: an owned width x height x 3
//! buffer in BGR byte order, the convention the detector and embedder models
//! were trained with.

use crate::error::PipelineError;
use std::io::Cursor;

#[derive(Debug, Clone)]
pub struct BgrImage {
    width: u32,
    height: u32,
    /// Row-major BGR bytes, length = width * height * 3.
    data: Vec<u8>,
    orientation_applied: bool,
}

impl BgrImage {
    /// Decode JPEG/PNG bytes, honoring EXIF orientation tags 3, 6 and 8.
    ///
    /// EXIF parse failures fall back to a plain decode without rotation;
    /// only an undecodable payload is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, PipelineError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::InvalidImage(e.to_string()))?;

        let (rotated, applied) = match exif_orientation(bytes) {
            Some(3) => (decoded.rotate180(), true),
            Some(6) => (decoded.rotate90(), true),
            Some(8) => (decoded.rotate270(), true),
            _ => (decoded, false),
        };

        let rgb = rotated.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut data = vec![0u8; width as usize * height as usize * 3];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let i = (y as usize * width as usize + x as usize) * 3;
            data[i] = pixel[2];
            data[i + 1] = pixel[1];
            data[i + 2] = pixel[0];
        }

        Ok(Self {
            width,
            height,
            data,
            orientation_applied: applied,
        })
    }

    /// Build an image from raw BGR bytes.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self, PipelineError> {
        if data.len() != width as usize * height as usize * 3 {
            return Err(PipelineError::InvalidImage(format!(
                "buffer length {} does not match {}x{}x3",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            orientation_applied: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn orientation_applied(&self) -> bool {
        self.orientation_applied
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// BGR bytes at (x, y). Coordinates must be in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// One channel at a fractional position, bilinear-interpolated, zero
    /// outside the image.
    pub fn sample_bilinear(&self, x: f32, y: f32, channel: usize) -> f32 {
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let sample = |sx: i64, sy: i64| -> f32 {
            if sx >= 0 && sx < self.width as i64 && sy >= 0 && sy < self.height as i64 {
                let i = (sy as usize * self.width as usize + sx as usize) * 3 + channel;
                self.data[i] as f32
            } else {
                0.0
            }
        };

        sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + sample(x0 + 1, y0) * fx * (1.0 - fy)
            + sample(x0, y0 + 1) * (1.0 - fx) * fy
            + sample(x0 + 1, y0 + 1) * fx * fy
    }

    /// Bilinear resize to the given dimensions.
    pub fn resize(&self, new_width: u32, new_height: u32) -> BgrImage {
        let mut data = vec![0u8; new_width as usize * new_height as usize * 3];
        let scale_x = self.width as f32 / new_width.max(1) as f32;
        let scale_y = self.height as f32 / new_height.max(1) as f32;

        for y in 0..new_height {
            let src_y = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (self.height - 1) as f32);
            for x in 0..new_width {
                let src_x = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (self.width - 1) as f32);
                let i = (y as usize * new_width as usize + x as usize) * 3;
                for c in 0..3 {
                    data[i + c] = self
                        .sample_bilinear(src_x, src_y, c)
                        .round()
                        .clamp(0.0, 255.0) as u8;
                }
            }
        }

        BgrImage {
            width: new_width,
            height: new_height,
            data,
            orientation_applied: self.orientation_applied,
        }
    }

    /// Crop the rectangle [x1, x2) x [y1, y2), clamped to image bounds.
    ///
    /// Returns an empty 0x0 image when the clamped region is degenerate.
    pub fn crop(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> BgrImage {
        let x1 = x1.clamp(0, self.width as i32) as u32;
        let y1 = y1.clamp(0, self.height as i32) as u32;
        let x2 = x2.clamp(0, self.width as i32) as u32;
        let y2 = y2.clamp(0, self.height as i32) as u32;

        if x2 <= x1 || y2 <= y1 {
            return BgrImage {
                width: 0,
                height: 0,
                data: Vec::new(),
                orientation_applied: self.orientation_applied,
            };
        }

        let (w, h) = (x2 - x1, y2 - y1);
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for y in y1..y2 {
            let start = (y as usize * self.width as usize + x1 as usize) * 3;
            let end = start + w as usize * 3;
            data.extend_from_slice(&self.data[start..end]);
        }

        BgrImage {
            width: w,
            height: h,
            data,
            orientation_applied: self.orientation_applied,
        }
    }
}

/// EXIF orientation tag value, if the payload carries parseable EXIF.
fn exif_orientation(bytes: &[u8]) -> Option<u32> {
    let reader = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = reader.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

    fn encode_png(img: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Encode as JPEG and splice in an APP1 segment holding a minimal TIFF
    /// structure whose only IFD0 entry is the Orientation tag.
    fn jpeg_with_orientation(img: ImageBuffer<Rgb<u8>, Vec<u8>>, orientation: u8) -> Vec<u8> {
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        // Little-endian TIFF header, IFD0 at offset 8 with one entry:
        // tag 0x0112 (Orientation), type SHORT, count 1.
        let mut tiff = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        tiff.extend_from_slice(&[0x01, 0x00]);
        tiff.extend_from_slice(&[0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00]);
        tiff.extend_from_slice(&[orientation, 0x00, 0x00, 0x00]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&tiff);
        let segment_len = (payload.len() + 2) as u16;

        // Splice the APP1 segment directly after SOI.
        let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
        out.extend_from_slice(&jpeg[..2]);
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&segment_len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    /// 64x32 test card: left half red, right half blue.
    fn half_red_half_blue() -> ImageBuffer<Rgb<u8>, Vec<u8>> {
        ImageBuffer::from_fn(64, 32, |x, _| {
            if x < 32 {
                Rgb([255u8, 0u8, 0u8])
            } else {
                Rgb([0u8, 0u8, 255u8])
            }
        })
    }

    fn assert_red(pixel: [u8; 3]) {
        // JPEG is lossy; check channel dominance. BGR order: red is high B=2.
        assert!(pixel[2] > 180 && pixel[0] < 100, "expected red, got {pixel:?}");
    }

    fn assert_blue(pixel: [u8; 3]) {
        assert!(pixel[0] > 180 && pixel[2] < 100, "expected blue, got {pixel:?}");
    }

    #[test]
    fn decode_produces_bgr_order() {
        // A pure-red RGB image must decode to B=0, G=0, R=255.
        let img = ImageBuffer::from_fn(4, 4, |_, _| Rgb([255u8, 0u8, 0u8]));
        let decoded = BgrImage::decode(&encode_png(img)).unwrap();
        assert_eq!(decoded.width(), 4);
        assert_eq!(decoded.height(), 4);
        assert!(!decoded.orientation_applied());
        assert_eq!(decoded.pixel(0, 0), [0, 0, 255]);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = BgrImage::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn decode_without_exif_applies_no_rotation() {
        let img = ImageBuffer::from_fn(6, 2, |_, _| Rgb([10u8, 20u8, 30u8]));
        let decoded = BgrImage::decode(&encode_png(img)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (6, 2));
        assert!(!decoded.orientation_applied());
    }

    #[test]
    fn exif_orientation_6_rotates_90_clockwise() {
        let bytes = jpeg_with_orientation(half_red_half_blue(), 6);
        let decoded = BgrImage::decode(&bytes).unwrap();

        assert!(decoded.orientation_applied());
        // 64x32 becomes 32x64.
        assert_eq!((decoded.width(), decoded.height()), (32, 64));
        // The red left half rotates onto the top half.
        assert_red(decoded.pixel(16, 8));
        assert_blue(decoded.pixel(16, 56));
    }

    #[test]
    fn exif_orientation_8_rotates_90_counterclockwise() {
        let bytes = jpeg_with_orientation(half_red_half_blue(), 8);
        let decoded = BgrImage::decode(&bytes).unwrap();

        assert!(decoded.orientation_applied());
        assert_eq!((decoded.width(), decoded.height()), (32, 64));
        // The red left half rotates onto the bottom half.
        assert_blue(decoded.pixel(16, 8));
        assert_red(decoded.pixel(16, 56));
    }

    #[test]
    fn exif_orientation_3_rotates_180() {
        let bytes = jpeg_with_orientation(half_red_half_blue(), 3);
        let decoded = BgrImage::decode(&bytes).unwrap();

        assert!(decoded.orientation_applied());
        // Dimensions are unchanged, halves swap sides.
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        assert_blue(decoded.pixel(8, 16));
        assert_red(decoded.pixel(56, 16));
    }

    #[test]
    fn exif_orientation_1_is_left_untouched() {
        let bytes = jpeg_with_orientation(half_red_half_blue(), 1);
        let decoded = BgrImage::decode(&bytes).unwrap();

        assert!(!decoded.orientation_applied());
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        assert_red(decoded.pixel(8, 16));
        assert_blue(decoded.pixel(56, 16));
    }

    #[test]
    fn crop_clamps_to_bounds() {
        let img = BgrImage::from_bgr(10, 10, vec![7u8; 10 * 10 * 3]).unwrap();
        let crop = img.crop(-5, -5, 20, 4);
        assert_eq!((crop.width(), crop.height()), (10, 4));
        assert_eq!(crop.pixel(0, 0), [7, 7, 7]);
    }

    #[test]
    fn degenerate_crop_is_empty() {
        let img = BgrImage::from_bgr(10, 10, vec![0u8; 300]).unwrap();
        let crop = img.crop(8, 8, 8, 9);
        assert_eq!((crop.width(), crop.height()), (0, 0));
    }

    #[test]
    fn resize_preserves_flat_color() {
        let img = BgrImage::from_bgr(8, 8, vec![100u8; 8 * 8 * 3]).unwrap();
        let resized = img.resize(4, 4);
        assert_eq!((resized.width(), resized.height()), (4, 4));
        assert_eq!(resized.pixel(1, 1), [100, 100, 100]);
        assert_eq!(resized.pixel(3, 3), [100, 100, 100]);
    }

    #[test]
    fn bilinear_sample_is_zero_outside() {
        let img = BgrImage::from_bgr(2, 2, vec![200u8; 12]).unwrap();
        assert_eq!(img.sample_bilinear(-10.0, 0.0, 0), 0.0);
        assert_eq!(img.sample_bilinear(0.0, 10.0, 1), 0.0);
        assert!((img.sample_bilinear(0.0, 0.0, 2) - 200.0).abs() < 1e-3);
    }

    #[test]
    fn from_bgr_validates_length() {
        assert!(BgrImage::from_bgr(3, 3, vec![0u8; 5]).is_err());
    }
}
