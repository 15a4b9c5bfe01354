//! Image optimizer: bounded resize plus lossy WebP re-encode.
//!
//! The optimizer never fails outright. Any problem (undecodable input, a decoded size
//! over the pixel budget, an encoder error, or output that is not smaller than the
//! input) yields [`OptimizationOutcome::Failed`] carrying the original bytes, so the
//! caller can store them unchanged.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use imgvault_core::constants::{OPTIMIZED_CONTENT_TYPE, OPTIMIZED_EXTENSION};
use imgvault_core::{OptimizerSettings, RawImage};
use std::io::Cursor;
use thiserror::Error;

use crate::format::{compression_ratio, detect_format, DetectedFormat};

/// Optimizer parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub max_dimension: u32,
    pub quality: u8,
    pub max_pixels: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerSettings::default().into()
    }
}

impl From<OptimizerSettings> for OptimizerConfig {
    fn from(s: OptimizerSettings) -> Self {
        Self {
            max_dimension: s.max_dimension,
            quality: s.quality,
            max_pixels: s.max_pixels,
        }
    }
}

impl From<&OptimizerSettings> for OptimizerConfig {
    fn from(s: &OptimizerSettings) -> Self {
        s.clone().into()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizeError {
    #[error("empty input")]
    Empty,

    #[error("unsupported or unrecognized image format")]
    UnsupportedFormat,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("image of {width}x{height} exceeds the {max_pixels} pixel budget")]
    PixelBudget {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("WebP encoding failed: {0}")]
    Encode(String),

    #[error("optimized output ({optimized} bytes) is not smaller than the original ({original} bytes)")]
    NotSmaller { original: u64, optimized: u64 },
}

/// A successfully optimized image.
#[derive(Debug, Clone)]
pub struct OptimizedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub original_size_bytes: u64,
    pub source_format: DetectedFormat,
}

impl OptimizedImage {
    pub fn content_type(&self) -> &'static str {
        OPTIMIZED_CONTENT_TYPE
    }

    pub fn extension(&self) -> &'static str {
        OPTIMIZED_EXTENSION
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.original_size_bytes, self.size_bytes())
    }
}

#[derive(Debug, Clone)]
pub enum OptimizationOutcome {
    Optimized(OptimizedImage),
    /// Optimization was not possible; `original` is the input, byte for byte.
    Failed {
        original: Bytes,
        format: DetectedFormat,
        reason: OptimizeError,
    },
}

impl OptimizationOutcome {
    pub fn is_optimized(&self) -> bool {
        matches!(self, OptimizationOutcome::Optimized(_))
    }
}

/// Longest-side bound preserving aspect ratio. Never upscales.
///
/// The longer side becomes exactly `max_dimension`; the shorter side is rounded and
/// kept at least one pixel.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dimension || max_dimension == 0 {
        return (width, height);
    }
    let scale = |side: u32| -> u32 {
        let scaled = (side as u64 * max_dimension as u64 + longer as u64 / 2) / longer as u64;
        (scaled as u32).max(1)
    };
    if width >= height {
        (max_dimension, scale(height))
    } else {
        (scale(width), max_dimension)
    }
}

/// Stateless optimizer bound to one configuration.
#[derive(Debug, Clone, Default)]
pub struct ImageOptimizer {
    config: OptimizerConfig,
}

impl ImageOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(&self, raw: &RawImage) -> OptimizationOutcome {
        let format = detect_format(&raw.data);
        match self.try_optimize(&raw.data, format) {
            Ok(optimized) => {
                tracing::debug!(
                    source_format = format.extension,
                    original_size = optimized.original_size_bytes,
                    optimized_size = optimized.size_bytes(),
                    width = optimized.width,
                    height = optimized.height,
                    "Image optimized"
                );
                OptimizationOutcome::Optimized(optimized)
            }
            Err(reason) => {
                tracing::warn!(
                    source_format = format.extension,
                    size_bytes = raw.data.len(),
                    reason = %reason,
                    "Image optimization failed; keeping original bytes"
                );
                OptimizationOutcome::Failed {
                    original: raw.data.clone(),
                    format,
                    reason,
                }
            }
        }
    }

    fn try_optimize(&self, data: &Bytes, format: DetectedFormat) -> Result<OptimizedImage, OptimizeError> {
        if data.is_empty() {
            return Err(OptimizeError::Empty);
        }
        let image_format = format.format.ok_or(OptimizeError::UnsupportedFormat)?;

        // Check the header-declared size before allocating the full bitmap.
        let (width, height) = ImageReader::with_format(Cursor::new(data.as_ref()), image_format)
            .into_dimensions()
            .map_err(|e| OptimizeError::Decode(e.to_string()))?;
        if width as u64 * height as u64 > self.config.max_pixels {
            return Err(OptimizeError::PixelBudget {
                width,
                height,
                max_pixels: self.config.max_pixels,
            });
        }

        let decoded = ImageReader::with_format(Cursor::new(data.as_ref()), image_format)
            .decode()
            .map_err(|e| OptimizeError::Decode(e.to_string()))?;

        let (target_w, target_h) = target_dimensions(width, height, self.config.max_dimension);
        let resized = if (target_w, target_h) != decoded.dimensions() {
            decoded.resize_exact(target_w, target_h, FilterType::Lanczos3)
        } else {
            decoded
        };

        let encoded = encode_webp(&resized, self.config.quality)?;
        let original_size = data.len() as u64;
        if encoded.len() as u64 >= original_size {
            return Err(OptimizeError::NotSmaller {
                original: original_size,
                optimized: encoded.len() as u64,
            });
        }

        let (out_w, out_h) = resized.dimensions();
        Ok(OptimizedImage {
            data: encoded,
            width: out_w,
            height: out_h,
            original_width: width,
            original_height: height,
            original_size_bytes: original_size,
            source_format: format,
        })
    }
}

fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Bytes, OptimizeError> {
    let (width, height) = img.dimensions();
    let quality = quality.clamp(1, 100) as f32;

    let memory = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        webp::Encoder::from_rgba(&rgba, width, height)
            .encode_simple(false, quality)
            .map_err(|e| OptimizeError::Encode(format!("{:?}", e)))?
    } else {
        let rgb = img.to_rgb8();
        webp::Encoder::from_rgb(&rgb, width, height)
            .encode_simple(false, quality)
            .map_err(|e| OptimizeError::Encode(format!("{:?}", e)))?
    };

    Ok(Bytes::copy_from_slice(&memory))
}

/// Optimize with explicit parameters and the default pixel budget.
pub fn optimize(raw: &RawImage, max_dimension: u32, quality: u8) -> OptimizationOutcome {
    ImageOptimizer::new(OptimizerConfig {
        max_dimension,
        quality,
        ..OptimizerConfig::default()
    })
    .optimize(raw)
}
