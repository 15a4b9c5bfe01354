use image::ImageFormat;
use imgvault_core::constants::{UNKNOWN_CONTENT_TYPE, UNKNOWN_EXTENSION};
use serde::Serialize;

/// Format sniffed from an image's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectedFormat {
    pub extension: &'static str,
    pub mime: &'static str,
    #[serde(skip)]
    pub format: Option<ImageFormat>,
}

impl DetectedFormat {
    pub fn unknown() -> Self {
        Self {
            extension: UNKNOWN_EXTENSION,
            mime: UNKNOWN_CONTENT_TYPE,
            format: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.format.is_some()
    }
}

/// Identify the format of `data` from its magic bytes.
///
/// Unrecognized data maps to `bin` / `application/octet-stream`.
pub fn detect_format(data: &[u8]) -> DetectedFormat {
    match image::guess_format(data) {
        Ok(format) => DetectedFormat {
            extension: format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or(UNKNOWN_EXTENSION),
            mime: format.to_mime_type(),
            format: Some(format),
        },
        Err(_) => DetectedFormat::unknown(),
    }
}

/// Fraction of the original size saved: `1 - optimized / original`.
///
/// Zero when the original is empty. Negative when the output grew.
pub fn compression_ratio(original_bytes: u64, optimized_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    1.0 - optimized_bytes as f64 / original_bytes as f64
}
