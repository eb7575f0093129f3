//! DCT perceptual hashing
//!
//! A hash is computed the same way for every image that is ever compared:
//! - grayscale with ITU-R 601 luma weights
//! - Lanczos resample to 32x32
//! - 2-D DCT-II, keeping the 8x8 low-frequency corner
//! - one bit per coefficient, set when above the corner's median
//!
//! Bits are packed row-major, most significant first, so the hex form is
//! stable across stores and tools.

use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Side of the low-frequency DCT block (bits = HASH_SIZE²)
pub const HASH_SIZE: usize = 8;

/// Side of the resampled image fed to the DCT
const SAMPLE_SIZE: usize = HASH_SIZE * 4;

/// Number of hex characters in a rendered hash
pub const HASH_HEX_LEN: usize = HASH_SIZE * HASH_SIZE / 4;

/// Errors from hash parsing or computation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid perceptual hash {0:?}: expected {HASH_HEX_LEN} hex characters")]
    InvalidHex(String),

    #[error("cannot hash an empty image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// A 64-bit perceptual hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Parse the 16-character hex form
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let trimmed = hex.trim();
        if trimmed.len() != HASH_HEX_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(hex.to_string()));
        }
        u64::from_str_radix(trimmed, 16)
            .map(Self)
            .map_err(|_| HashError::InvalidHex(hex.to_string()))
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// Number of differing bits
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        hamming_distance(*self, *other)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PerceptualHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PerceptualHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PerceptualHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// XOR popcount over the fixed-length hash
pub fn hamming_distance(a: PerceptualHash, b: PerceptualHash) -> u32 {
    (a.0 ^ b.0).count_ones()
}

/// Fractional crop rectangle, each edge relative to the image size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl CropRect {
    /// Top-left region where issuers print their logo
    pub const LOGO: CropRect = CropRect {
        left: 0.02,
        top: 0.02,
        right: 0.25,
        bottom: 0.18,
    };

    /// Pixel bounds `(x, y, width, height)`; edges truncate toward zero
    pub fn pixel_bounds(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let w = width as f64;
        let h = height as f64;
        let x0 = (w * self.left) as u32;
        let y0 = (h * self.top) as u32;
        let x1 = ((w * self.right) as u32).min(width);
        let y1 = ((h * self.bottom) as u32).min(height);
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

impl Default for CropRect {
    fn default() -> Self {
        Self::LOGO
    }
}

/// Crop a fractional region out of an image
pub fn crop_region(image: &DynamicImage, rect: &CropRect) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (x, y, w, h) = rect.pixel_bounds(width, height);
    image.crop_imm(x, y, w, h)
}

/// Compute the perceptual hash of a whole image
pub fn compute_phash(image: &DynamicImage) -> Result<PerceptualHash, HashError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(HashError::EmptyImage { width, height });
    }

    let gray = luma_601(image);
    let small = image::imageops::resize(
        &gray,
        SAMPLE_SIZE as u32,
        SAMPLE_SIZE as u32,
        FilterType::Lanczos3,
    );

    let mut pixels = [[0.0f64; SAMPLE_SIZE]; SAMPLE_SIZE];
    for (x, y, px) in small.enumerate_pixels() {
        pixels[y as usize][x as usize] = px.0[0] as f64;
    }

    let coeffs = low_frequency_dct(&pixels);
    let mut sorted: Vec<f64> = coeffs.iter().flatten().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = (sorted[mid - 1] + sorted[mid]) / 2.0;

    let mut bits = 0u64;
    for row in &coeffs {
        for &c in row {
            bits = (bits << 1) | u64::from(c > median);
        }
    }

    Ok(PerceptualHash(bits))
}

/// Compute the perceptual hash of a fractional region
pub fn compute_region_phash(
    image: &DynamicImage,
    rect: &CropRect,
) -> Result<PerceptualHash, HashError> {
    compute_phash(&crop_region(image, rect))
}

fn luma_601(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
        Luma([l as u8])
    })
}

/// Unnormalised DCT-II along columns then rows, first HASH_SIZE terms only
fn low_frequency_dct(
    pixels: &[[f64; SAMPLE_SIZE]; SAMPLE_SIZE],
) -> [[f64; HASH_SIZE]; HASH_SIZE] {
    let n = SAMPLE_SIZE as f64;
    let basis = |k: usize, i: usize| {
        (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos()
    };

    let mut cols = [[0.0f64; SAMPLE_SIZE]; HASH_SIZE];
    for (k, out_row) in cols.iter_mut().enumerate() {
        for (x, out) in out_row.iter_mut().enumerate() {
            *out = 2.0
                * (0..SAMPLE_SIZE)
                    .map(|y| pixels[y][x] * basis(k, y))
                    .sum::<f64>();
        }
    }

    let mut out = [[0.0f64; HASH_SIZE]; HASH_SIZE];
    for (k, row) in cols.iter().enumerate() {
        for (l, coeff) in out[k].iter_mut().enumerate() {
            *coeff = 2.0
                * row
                    .iter()
                    .enumerate()
                    .map(|(x, v)| v * basis(l, x))
                    .sum::<f64>();
        }
    }
    out
}
