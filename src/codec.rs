use std::io::Cursor;

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;

use crate::error::{Result, StorageError};

/// JPEG quality used for every served `.jpg`.
pub const JPEG_QUALITY: u8 = 99;

/// Format every stored image is normalized into.
pub const CANONICAL_FORMAT: ImageFormat = ImageFormat::WebP;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Gif,
    Png,
    Jpeg,
    WebP,
}

impl ImageFormat {
    /// Maps a requested file extension (with its leading dot) to an output format.
    /// An empty extension selects JPEG.
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "" | ".jpg" | ".jpeg" => Ok(ImageFormat::Jpeg),
            ".png" => Ok(ImageFormat::Png),
            ".gif" => Ok(ImageFormat::Gif),
            ".webp" => Ok(ImageFormat::WebP),
            _ => Err(StorageError::UnsupportedExtension(ext.to_string())),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Gif => "image/gif",
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Gif => "gif",
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::WebP => "webp",
        }
    }

    fn as_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::WebP => image::ImageFormat::WebP,
        }
    }
}

/// Detects the input format from magic bytes. Anything that is not one of the
/// ingestible formats yields `None`.
pub fn sniff(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(ImageFormat::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageFormat::Jpeg);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(ImageFormat::WebP);
    }
    None
}

pub fn decode(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    let image = image::load_from_memory_with_format(bytes, format.as_image_format())?;
    Ok(image)
}

/// Encodes with the fixed per-format settings: lossless WebP, the GIF
/// encoder's 256-colour quantizer, lossless PNG and JPEG at [`JPEG_QUALITY`].
pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    match format {
        ImageFormat::WebP => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut output))?;
        }
        ImageFormat::Jpeg => {
            // no alpha channel in JPEG
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY))?;
        }
        ImageFormat::Gif => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_to(&mut Cursor::new(&mut output), image::ImageFormat::Gif)?;
        }
        ImageFormat::Png => {
            image.write_to(&mut Cursor::new(&mut output), image::ImageFormat::Png)?;
        }
    }
    Ok(output)
}

/// Decodes an uploaded payload and re-encodes it into the canonical format.
/// Returns the decoded image together with its canonical bytes.
pub fn canonicalize(bytes: &[u8]) -> Result<(DynamicImage, Vec<u8>)> {
    let format = sniff(bytes).ok_or(StorageError::UnsupportedMimeType)?;
    let image = decode(bytes, format).map_err(|err| {
        tracing::debug!("decoding {} upload failed: {}", format.mime_type(), err);
        StorageError::UnsupportedMimeType
    })?;
    let canonical = encode(&image, CANONICAL_FORMAT)?;
    Ok((image, canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let buffer = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8, 255])
        });
        DynamicImage::ImageRgba8(buffer)
    }

    #[test]
    fn test_sniff_known_formats() {
        let image = gradient(4, 4);
        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Gif, ImageFormat::WebP] {
            let bytes = encode(&image, format).unwrap();
            assert_eq!(sniff(&bytes), Some(format));
        }
        assert_eq!(sniff(b"hello, world"), None);
        assert_eq!(sniff(&[]), None);
        assert_eq!(sniff(b"RIFF\0\0\0\0WAVE"), None);
    }

    #[test]
    fn test_canonical_encoding_is_lossless() {
        let image = gradient(8, 6);
        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Gif, ImageFormat::WebP] {
            let input = encode(&image, format).unwrap();
            let decoded = decode(&input, format).unwrap();
            let (canonical_image, canonical) = canonicalize(&input).unwrap();
            assert_eq!(canonical_image.to_rgba8(), decoded.to_rgba8());

            let round_trip = decode(&canonical, CANONICAL_FORMAT).unwrap();
            assert_eq!(round_trip.dimensions(), (8, 6));
            assert_eq!(round_trip.to_rgba8(), decoded.to_rgba8(), "{format:?}");
        }
    }

    #[test]
    fn test_canonicalize_rejects_garbage() {
        assert!(matches!(
            canonicalize(b"plain text upload"),
            Err(StorageError::UnsupportedMimeType)
        ));
        // right magic, broken body
        let mut truncated = b"\x89PNG\r\n\x1a\n".to_vec();
        truncated.extend_from_slice(&[0; 8]);
        assert!(matches!(
            canonicalize(&truncated),
            Err(StorageError::UnsupportedMimeType)
        ));
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(ImageFormat::from_extension("").unwrap(), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_extension(".jpg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_extension(".PNG").unwrap(), ImageFormat::Png);
        assert_eq!(ImageFormat::from_extension(".gif").unwrap(), ImageFormat::Gif);
        assert_eq!(ImageFormat::from_extension(".webp").unwrap(), ImageFormat::WebP);
        assert!(matches!(
            ImageFormat::from_extension(".bmp"),
            Err(StorageError::UnsupportedExtension(ext)) if ext == ".bmp"
        ));
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(CANONICAL_FORMAT.extension(), "webp");
    }
}
