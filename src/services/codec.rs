//! Image codec service
//!
//! Converts between wire representations (upload bytes or base64 text,
//! optionally wrapped in a data URI) and [`PixelBuffer`].

use crate::{
    config::ImageLimits,
    error::{InpaintError, Result},
    types::{Mask, PixelBuffer},
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// MIME types accepted for multipart uploads
pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Prefix of every encoded output
const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Where a request's image came from, resolved once at the API boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Raw bytes from a multipart upload with the declared content type
    Upload {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    /// Raw base64 or a `data:image/<fmt>;base64,` URI
    Base64(String),
}

impl ImageSource {
    /// Short description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Upload {
                bytes,
                content_type,
            } => format!(
                "upload ({} bytes, {})",
                bytes.len(),
                content_type.as_deref().unwrap_or("no content type")
            ),
            Self::Base64(text) => format!("base64 ({} chars)", text.len()),
        }
    }
}

/// Decoder and encoder bound to a set of size limits
#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    limits: ImageLimits,
}

impl ImageCodec {
    #[must_use]
    pub fn new(limits: ImageLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> ImageLimits {
        self.limits
    }

    /// Decode any image source into an RGB pixel buffer
    ///
    /// # Errors
    /// - `UnsupportedFormat` for an upload whose content type is not JPEG, PNG or WebP
    /// - Anything returned by [`Self::decode_base64`] or [`Self::decode_bytes`]
    pub fn decode(&self, source: &ImageSource) -> Result<PixelBuffer> {
        match source {
            ImageSource::Upload {
                bytes,
                content_type,
            } => {
                let content_type = content_type.as_deref().unwrap_or("unknown");
                if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
                    return Err(InpaintError::unsupported_format(format!(
                        "Unsupported image type: {content_type}"
                    )));
                }
                self.decode_bytes(bytes)
            },
            ImageSource::Base64(text) => {
                let bytes = self.decode_base64(text)?;
                self.decode_bytes(&bytes)
            },
        }
    }

    /// Decode base64 text to raw bytes, accepting a data-URI wrapper
    ///
    /// # Errors
    /// - `InvalidInput` for empty text, a malformed data URI or invalid base64
    /// - `FileTooLarge` when the decoded size exceeds the limit
    pub fn decode_base64(&self, text: &str) -> Result<Vec<u8>> {
        let payload = Self::strip_data_uri(text.trim())?;
        if payload.is_empty() {
            return Err(InpaintError::invalid_input("image_data cannot be empty"));
        }

        // Reject obviously oversized payloads before allocating the decoded buffer
        let estimated = payload.len() / 4 * 3;
        if estimated > self.limits.max_file_size.saturating_add(3) {
            return Err(InpaintError::FileTooLarge {
                size: estimated,
                limit: self.limits.max_file_size,
            });
        }

        let bytes = B64
            .decode(payload.as_bytes())
            .map_err(|e| InpaintError::invalid_input(format!("Invalid base64 encoding: {e}")))?;
        self.check_size(bytes.len())?;
        Ok(bytes)
    }

    /// Decode encoded image bytes into an RGB buffer, downsampling if too large
    ///
    /// # Errors
    /// - `FileTooLarge` when the payload exceeds the byte limit
    /// - `UnsupportedFormat` when the bytes are not JPEG, PNG or WebP
    /// - `InvalidInput` when the bytes cannot be decoded
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<PixelBuffer> {
        self.check_size(bytes.len())?;

        let format = image::guess_format(bytes)
            .map_err(|_| InpaintError::unsupported_format("Unrecognized image data"))?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) {
            return Err(InpaintError::unsupported_format(format!(
                "Unsupported image format: {format:?}. Supported: JPEG, PNG, WebP"
            )));
        }

        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| InpaintError::invalid_input(format!("Failed to decode image: {e}")))?;
        let rgb = Self::downsample(image.to_rgb8(), self.limits.max_dimension);

        PixelBuffer::from_rgb(rgb)
    }

    /// Encode a pixel buffer as a PNG data URI
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn encode_image(image: &PixelBuffer) -> Result<String> {
        Self::encode_png(&DynamicImage::ImageRgb8(image.as_rgb().clone()))
    }

    /// Encode a mask as a greyscale PNG data URI, 255 where set
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn encode_mask(mask: &Mask) -> Result<String> {
        Self::encode_png(&DynamicImage::ImageLuma8(mask.to_luma()))
    }

    /// Remove a `data:...;base64,` prefix if present
    ///
    /// # Errors
    /// - `InvalidInput` for a `data:` string without a comma separator
    pub fn strip_data_uri(text: &str) -> Result<&str> {
        if !text.starts_with("data:") {
            return Ok(text);
        }
        match text.split_once(',') {
            Some((_, payload)) => Ok(payload),
            None => Err(InpaintError::invalid_input("Invalid data URL format")),
        }
    }

    /// Scale `image` so its largest side is at most `max_dimension`, keeping aspect ratio
    #[must_use]
    pub fn downsample(image: RgbImage, max_dimension: u32) -> RgbImage {
        let (width, height) = image.dimensions();
        let largest = width.max(height);
        if largest <= max_dimension {
            return image;
        }

        let scale = |side: u32| -> u32 {
            let scaled = (u64::from(side) * u64::from(max_dimension) + u64::from(largest) / 2)
                / u64::from(largest);
            (scaled as u32).clamp(1, max_dimension)
        };
        let (new_width, new_height) = if width >= height {
            (max_dimension, scale(height))
        } else {
            (scale(width), max_dimension)
        };

        tracing::debug!(
            from = %format!("{width}x{height}"),
            to = %format!("{new_width}x{new_height}"),
            "Downsampling oversized image"
        );
        image::imageops::resize(&image, new_width, new_height, FilterType::Lanczos3)
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.limits.max_file_size {
            return Err(InpaintError::FileTooLarge {
                size,
                limit: self.limits.max_file_size,
            });
        }
        Ok(())
    }

    fn encode_png(image: &DynamicImage) -> Result<String> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(format!("{PNG_DATA_URI_PREFIX}{}", B64.encode(bytes)))
    }
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self::new(ImageLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn payload_of(data_uri: &str) -> Vec<u8> {
        let payload = data_uri.strip_prefix(PNG_DATA_URI_PREFIX).unwrap();
        B64.decode(payload).unwrap()
    }

    #[test]
    fn test_decode_each_supported_format() {
        let codec = ImageCodec::default();
        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP] {
            let buffer = codec.decode_bytes(&encoded(40, 30, format)).unwrap();
            assert_eq!(buffer.dimensions(), (40, 30), "{format:?}");
        }
    }

    #[test]
    fn test_decode_converts_alpha_and_grey_to_rgb() {
        let codec = ImageCodec::default();
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(image::GrayImage::new(8, 6))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        assert_eq!(codec.decode_bytes(&bytes).unwrap().dimensions(), (8, 6));

        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image::RgbaImage::new(5, 7))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        assert_eq!(codec.decode_bytes(&bytes).unwrap().dimensions(), (5, 7));
    }

    #[test]
    fn test_data_uri_and_raw_base64_decode_alike() {
        let codec = ImageCodec::default();
        let raw = B64.encode(encoded(12, 9, ImageFormat::Png));
        let uri = format!("data:image/png;base64,{raw}");

        let a = codec.decode(&ImageSource::Base64(raw)).unwrap();
        let b = codec.decode(&ImageSource::Base64(uri)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_base64_is_invalid_input() {
        let codec = ImageCodec::default();
        for text in ["not base64!!", "", "data:image/png;base64", "data:image/png;base64,"] {
            let err = codec.decode(&ImageSource::Base64(text.to_string())).unwrap_err();
            assert_eq!(err.error_code(), "InvalidInput", "text={text:?}");
        }
    }

    #[test]
    fn test_file_too_large() {
        let codec = ImageCodec::new(ImageLimits {
            max_dimension: 2048,
            max_file_size: 64,
        });
        let bytes = encoded(64, 64, ImageFormat::Png);
        assert!(bytes.len() > 64);
        assert!(matches!(
            codec.decode_bytes(&bytes),
            Err(InpaintError::FileTooLarge { limit: 64, .. })
        ));
        assert!(matches!(
            codec.decode(&ImageSource::Base64(B64.encode(&bytes))),
            Err(InpaintError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_unsupported_formats() {
        let codec = ImageCodec::default();
        let mut gif = b"GIF89a".to_vec();
        gif.extend_from_slice(&[1, 0, 1, 0, 0, 0, 0, 0x3b]);
        let err = codec.decode_bytes(&gif).unwrap_err();
        assert!(matches!(err, InpaintError::UnsupportedFormat(_)));
        assert_eq!(err.error_code(), "InvalidInput");

        let err = codec.decode_bytes(b"plain text, not an image").unwrap_err();
        assert!(matches!(err, InpaintError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_upload_content_type_restricted() {
        let codec = ImageCodec::default();
        let bytes = encoded(4, 4, ImageFormat::Png);
        let ok = ImageSource::Upload {
            bytes: bytes.clone(),
            content_type: Some("image/png".to_string()),
        };
        assert!(codec.decode(&ok).is_ok());

        for content_type in [Some("image/gif".to_string()), Some("text/plain".to_string()), None] {
            let source = ImageSource::Upload {
                bytes: bytes.clone(),
                content_type,
            };
            assert_eq!(codec.decode(&source).unwrap_err().error_code(), "InvalidInput");
        }
    }

    #[test]
    fn test_downsample_largest_side_equals_limit() {
        let codec = ImageCodec::new(ImageLimits {
            max_dimension: 100,
            max_file_size: 10_485_760,
        });
        let wide = codec.decode_bytes(&encoded(400, 300, ImageFormat::Png)).unwrap();
        assert_eq!(wide.dimensions(), (100, 75));

        let tall = codec.decode_bytes(&encoded(90, 301, ImageFormat::Png)).unwrap();
        assert_eq!(tall.height(), 100);
        assert_eq!(tall.width(), 30);

        let small = codec.decode_bytes(&encoded(100, 20, ImageFormat::Png)).unwrap();
        assert_eq!(small.dimensions(), (100, 20));
    }

    #[test]
    fn test_encode_round_trip_preserves_dimensions() {
        let codec = ImageCodec::default();
        let buffer = codec.decode_bytes(&encoded(33, 21, ImageFormat::Jpeg)).unwrap();
        let uri = ImageCodec::encode_image(&buffer).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let again = codec.decode(&ImageSource::Base64(uri)).unwrap();
        assert_eq!(again.dimensions(), (33, 21));
    }

    #[test]
    fn test_encode_mask_scales_to_255() {
        let mask = Mask::from_fn(4, 2, |x, _| x < 2);
        let bytes = payload_of(&ImageCodec::encode_mask(&mask).unwrap());
        let decoded = image::load_from_memory(&bytes).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(decoded.get_pixel(0, 0)[0], 255);
        assert_eq!(decoded.get_pixel(3, 1)[0], 0);
    }
}
