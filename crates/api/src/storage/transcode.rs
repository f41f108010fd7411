//! WebP conversion for uploaded images

use image::imageops::FilterType;
use image::{DynamicImage, ImageResult, RgbImage};

/// Wider images are scaled down to this width
pub const MAX_WIDTH: u32 = 1200;

/// Decode an image, flatten transparency onto white, cap its width and
/// re-encode as lossy WebP at `quality` (1-100).
///
/// Lossy output is not always smaller than an already-compressed source;
/// callers compare sizes before replacing the original.
pub fn convert_to_webp(bytes: &[u8], max_width: u32, quality: u8) -> ImageResult<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let flattened = flatten_onto_white(&decoded);
    let resized = cap_width(flattened, max_width);

    let (width, height) = resized.dimensions();
    let quality = f32::from(quality.clamp(1, 100));
    let encoded = webp::Encoder::from_rgb(resized.as_raw(), width, height).encode(quality);
    Ok(encoded.to_vec())
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |channel: u8| -> u8 {
            let value = (u16::from(channel) * alpha + 255 * (255 - alpha)) / 255;
            value as u8
        };
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

fn cap_width(image: RgbImage, max_width: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width <= max_width || max_width == 0 {
        return image;
    }

    let new_height = ((u64::from(height) * u64::from(max_width)) / u64::from(width)).max(1) as u32;
    image::imageops::resize(&image, max_width, new_height, FilterType::Lanczos3)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageFormat, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(image: RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Gradient with per-pixel noise, roughly photo-like for the encoders
    pub(crate) fn noisy_photo(width: u32, height: u32) -> RgbImage {
        let mut seed: u32 = 0x9e37_79b9;
        RgbImage::from_fn(width, height, |x, y| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let noise = (seed % 48) as u8;
            let r = ((x * 255) / width.max(1)) as u8;
            let g = ((y * 255) / height.max(1)) as u8;
            Rgb([
                r.saturating_add(noise),
                g.saturating_add(noise / 2),
                128u8.saturating_add(noise),
            ])
        })
    }

    pub(crate) fn jpeg_bytes(image: &RgbImage, quality: u8) -> Vec<u8> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(image)
            .unwrap();
        out
    }

    #[test]
    fn test_wide_image_is_scaled_to_max_width() {
        let source = png_bytes(RgbaImage::from_pixel(2400, 100, Rgba([10, 20, 30, 255])));

        let webp = convert_to_webp(&source, MAX_WIDTH, 85).unwrap();
        assert_eq!(image::guess_format(&webp).unwrap(), ImageFormat::WebP);

        let decoded = image::load_from_memory(&webp).unwrap();
        assert_eq!(decoded.width(), 1200);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let source = png_bytes(RgbaImage::from_pixel(64, 32, Rgba([200, 0, 0, 255])));
        let decoded =
            image::load_from_memory(&convert_to_webp(&source, MAX_WIDTH, 85).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[test]
    fn test_transparency_becomes_white() {
        let source = png_bytes(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0])));
        let decoded = image::load_from_memory(&convert_to_webp(&source, MAX_WIDTH, 100).unwrap())
            .unwrap()
            .to_rgb8();
        // Lossy, so allow a little drift from pure white
        assert!(decoded.get_pixel(8, 8).0.iter().all(|c| *c >= 250));
    }

    #[test]
    fn test_photo_jpeg_shrinks() {
        let jpeg = jpeg_bytes(&noisy_photo(800, 600), 95);
        let webp = convert_to_webp(&jpeg, MAX_WIDTH, 85).unwrap();
        assert!(
            webp.len() < jpeg.len(),
            "webp {} bytes, jpeg {} bytes",
            webp.len(),
            jpeg.len()
        );
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let jpeg = jpeg_bytes(&noisy_photo(400, 300), 95);
        let high = convert_to_webp(&jpeg, MAX_WIDTH, 95).unwrap();
        let low = convert_to_webp(&jpeg, MAX_WIDTH, 20).unwrap();
        assert!(low.len() < high.len(), "q20 {} bytes, q95 {} bytes", low.len(), high.len());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(convert_to_webp(b"definitely not an image", MAX_WIDTH, 85).is_err());
    }
}
