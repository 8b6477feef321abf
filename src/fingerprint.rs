//! Difference-hash fingerprints and Hamming similarity.
//!
//! Frames and reference images are reduced to luma, bounded to the working
//! resolution, then squeezed onto a 17×16 grid. Each of the 16×16 bits records
//! whether a cell is brighter than its right-hand neighbour, so a uniform
//! exposure shift leaves the fingerprint unchanged.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

pub const HASH_GRID: u32 = 16;
pub const FINGERPRINT_BITS: usize = (HASH_GRID * HASH_GRID) as usize;
const WORDS: usize = FINGERPRINT_BITS / 64;

/// Longest side, in pixels, of the canonical working resolution.
pub const DEFAULT_WORKING_RESOLUTION: u32 = 512;

/// 256-bit difference hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    bits: [u64; WORDS],
}

impl Fingerprint {
    pub fn from_words(bits: [u64; WORDS]) -> Self {
        Self { bits }
    }

    pub fn words(&self) -> &[u64; WORDS] {
        &self.bits
    }

    /// Number of bits that differ from `other`.
    #[inline]
    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Fraction of matching bits, in `[0, 1]`.
    #[inline]
    pub fn similarity(&self, other: &Fingerprint) -> f32 {
        hamming_similarity(self, other)
    }

    #[inline]
    fn set(&mut self, index: usize) {
        self.bits[index / 64] |= 1u64 << (index % 64);
    }
}

/// Fraction of matching bits between two fingerprints.
#[inline]
pub fn hamming_similarity(a: &Fingerprint, b: &Fingerprint) -> f32 {
    let differing = a.hamming_distance(b) as f32;
    1.0 - differing / FINGERPRINT_BITS as f32
}

/// Reduce an image to luma with its longest side bounded by `max_side`.
///
/// Images already within bounds are converted but not resampled.
pub fn downsample(image: &DynamicImage, max_side: u32) -> GrayImage {
    let luma = image.to_luma8();
    let (w, h) = luma.dimensions();
    let longest = w.max(h);
    if longest <= max_side || longest == 0 {
        return luma;
    }

    let scale = max_side as f64 / longest as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(&luma, new_w, new_h, FilterType::Triangle)
}

/// Compute the difference hash of a luma image.
///
/// Returns `None` for an image with a zero dimension.
pub fn difference_hash(luma: &GrayImage) -> Option<Fingerprint> {
    let (w, h) = luma.dimensions();
    if w == 0 || h == 0 {
        return None;
    }

    let grid = imageops::resize(luma, HASH_GRID + 1, HASH_GRID, FilterType::Triangle);
    let mut fingerprint = Fingerprint::default();

    for y in 0..HASH_GRID {
        for x in 0..HASH_GRID {
            let left = grid.get_pixel(x, y).0[0];
            let right = grid.get_pixel(x + 1, y).0[0];
            if left > right {
                fingerprint.set((y * HASH_GRID + x) as usize);
            }
        }
    }

    Some(fingerprint)
}

/// Downsample then hash; the one path used for both templates and frames.
pub fn fingerprint_image(image: &DynamicImage, max_side: u32) -> Option<Fingerprint> {
    difference_hash(&downsample(image, max_side))
}

/// Index and similarity of the closest candidate.
///
/// Ties keep the earliest candidate. An empty candidate set yields `None`.
pub fn best_match<'a, I>(query: &Fingerprint, candidates: I) -> Option<(usize, f32)>
where
    I: IntoIterator<Item = &'a Fingerprint>,
{
    candidates
        .into_iter()
        .map(|candidate| hamming_similarity(query, candidate))
        .enumerate()
        .fold(None, |best, (idx, sim)| match best {
            Some((_, best_sim)) if best_sim >= sim => best,
            _ => Some((idx, sim)),
        })
}
