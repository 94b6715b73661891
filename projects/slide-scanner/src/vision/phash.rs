use image::{imageops::FilterType, DynamicImage};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const HASH_BITS: u32 = 64;

const GRID_WIDTH: u32 = 9;
const GRID_HEIGHT: u32 = 8;

/// 64-bit difference hash. Bit 63 is row 0, column 0; rendering is row-major
/// as a string of `'0'`/`'1'` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    #[cfg(test)]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[cfg(test)]
    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:064b}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_BITS as usize {
            return Err(format!("expected {} characters, got {}", HASH_BITS, s.len()));
        }
        u64::from_str_radix(s, 2)
            .map(Self)
            .map_err(|e| format!("not a binary hash: {}", e))
    }
}

impl Serialize for PerceptualHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Computes the difference hash of an image.
///
/// The image is force-fit to 9x8 (aspect ratio ignored) and converted to
/// grayscale with an unweighted channel average. Each of the 8x8 outputs is
/// `1` when a pixel is brighter than its right neighbour. Averages are compared
/// through their channel sums, which orders identically to `(R+G+B)/3`.
pub fn dhash(image: &DynamicImage) -> PerceptualHash {
    let grid = image
        .resize_exact(GRID_WIDTH, GRID_HEIGHT, FilterType::Triangle)
        .to_rgb8();

    let intensity = |x: u32, y: u32| -> u16 {
        let p = grid.get_pixel(x, y);
        u16::from(p[0]) + u16::from(p[1]) + u16::from(p[2])
    };

    let mut bits = 0u64;
    for row in 0..GRID_HEIGHT {
        for col in 0..GRID_WIDTH - 1 {
            if intensity(col, row) > intensity(col + 1, row) {
                let index = row * (GRID_WIDTH - 1) + col;
                bits |= 1 << (HASH_BITS - 1 - index);
            }
        }
    }
    PerceptualHash(bits)
}

/// Hamming distance between two optional hashes. A missing hash carries no
/// information, so it is treated as maximally distant.
pub fn hamming_distance(a: Option<&PerceptualHash>, b: Option<&PerceptualHash>) -> u32 {
    match (a, b) {
        (Some(a), Some(b)) => a.distance(b),
        _ => HASH_BITS,
    }
}

/// Hamming distance over wire-format hash strings, as received from clients.
/// Absent or length-mismatched hashes return the maximum distance.
pub fn hamming_distance_str(a: Option<&str>, b: Option<&str>) -> u32 {
    match (a, b) {
        (Some(a), Some(b)) if a.len() == b.len() => {
            a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count() as u32
        }
        _ => HASH_BITS,
    }
}
