//! Image Payloads
//!
//! Camera frames and query images arrive from the browser as base64 strings,
//! usually wrapped in a data URL (`data:image/jpeg;base64,...`). This module
//! turns them into validated `ImageFrame`s that every collaborator accepts.

use base64::Engine;
use bytes::Bytes;
use std::fmt;

/// Raised when an inbound image payload cannot be turned into an image.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    Base64(String),
    #[error("image payload is not a supported image format")]
    UnsupportedFormat,
}

/// The image container formats a frame may be encoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    /// Identifies the format from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

/// A decoded image, ready to be handed to a `Responder`.
///
/// The bytes are reference counted, so cloning a frame is cheap. This matters
/// because the latest camera frame is shared between a session's dispatcher
/// and its monitoring task.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageFrame {
    bytes: Bytes,
    format: ImageFormat,
}

impl ImageFrame {
    /// Validates raw image bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let format = ImageFormat::sniff(&bytes).ok_or(DecodeError::UnsupportedFormat)?;
        Ok(Self { bytes, format })
    }

    /// Decodes a base64 payload, with or without a `data:` URL prefix.
    pub fn from_base64(payload: &str) -> Result<Self, DecodeError> {
        // Browsers send `data:image/jpeg;base64,<data>`; only the part after
        // the first comma is base64.
        let encoded = match payload.split_once(',') {
            Some((_, data)) => data,
            None => payload,
        }
        .trim();
        if encoded.is_empty() {
            return Err(DecodeError::Empty);
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Re-encodes the frame as a data URL, the form vision chat APIs accept.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

// Frames can be megabytes; never dump the bytes into logs.
impl fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFrame")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest byte sequence that passes the PNG signature check.
    pub(crate) const PNG_HEADER: [u8; 12] = [
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];

    fn png_base64() -> String {
        base64::engine::general_purpose::STANDARD.encode(PNG_HEADER)
    }

    #[test]
    fn test_decode_plain_base64() {
        let frame = ImageFrame::from_base64(&png_base64()).unwrap();
        assert_eq!(frame.format(), ImageFormat::Png);
        assert_eq!(frame.len(), PNG_HEADER.len());
    }

    #[test]
    fn test_decode_strips_data_url_prefix() {
        let payload = format!("data:image/png;base64,{}", png_base64());
        let frame = ImageFrame::from_base64(&payload).unwrap();
        assert_eq!(frame.bytes().as_ref(), &PNG_HEADER);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = ImageFrame::from_base64("not base64 at all!!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"hello world");
        assert_eq!(
            ImageFrame::from_base64(&payload).unwrap_err(),
            DecodeError::UnsupportedFormat
        );
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        assert_eq!(ImageFrame::from_base64("").unwrap_err(), DecodeError::Empty);
        assert_eq!(
            ImageFrame::from_base64("data:image/png;base64,").unwrap_err(),
            DecodeError::Empty
        );
    }

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"BM\0\0"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::sniff(b"\0\0"), None);
    }

    #[test]
    fn test_data_url_uses_sniffed_mime() {
        let frame = ImageFrame::from_bytes(PNG_HEADER.to_vec()).unwrap();
        assert!(frame.to_data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_debug_does_not_dump_bytes() {
        let frame = ImageFrame::from_bytes(PNG_HEADER.to_vec()).unwrap();
        let debug = format!("{:?}", frame);
        assert!(debug.contains("Png"));
        assert!(debug.contains("len: 12"));
    }
}
