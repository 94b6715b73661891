use image::{DynamicImage, RgbaImage};
use serde::Serialize;

/// Fraction of the frame ignored on each side (player chrome, letterboxing).
const MARGIN: f64 = 0.1;
const STRIDE: usize = 2;
const EDGE_THRESHOLD: f32 = 30.0;
const BLANK_RATIO: f64 = 0.0005;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EdgeDensity {
    pub density_ratio: f64,
    pub is_blank: bool,
}

pub fn analyze_image(image: &DynamicImage) -> EdgeDensity {
    analyze(&image.to_rgba8())
}

/// Counts edge pixels in the central 80% of the frame, sampling every second
/// pixel on both axes. A pixel is an edge when the absolute intensity change
/// to its right and lower neighbours sums above the threshold.
pub fn analyze(img: &RgbaImage) -> EdgeDensity {
    let (width, height) = img.dimensions();
    let x0 = (f64::from(width) * MARGIN) as u32;
    let x1 = (f64::from(width) * (1.0 - MARGIN)) as u32;
    let y0 = (f64::from(height) * MARGIN) as u32;
    let y1 = (f64::from(height) * (1.0 - MARGIN)) as u32;

    let gray = |x: u32, y: u32| -> f32 {
        let p = img.get_pixel(x, y);
        (f32::from(p[0]) + f32::from(p[1]) + f32::from(p[2])) / 3.0
    };

    let mut sampled = 0usize;
    let mut edges = 0usize;
    for y in (y0..y1).step_by(STRIDE) {
        if y + 1 >= height {
            break;
        }
        for x in (x0..x1).step_by(STRIDE) {
            if x + 1 >= width {
                break;
            }
            let g = gray(x, y);
            let diff = (g - gray(x + 1, y)).abs() + (g - gray(x, y + 1)).abs();
            if diff > EDGE_THRESHOLD {
                edges += 1;
            }
            sampled += 1;
        }
    }

    let density_ratio = if sampled == 0 {
        0.0
    } else {
        edges as f64 / sampled as f64
    };

    EdgeDensity {
        density_ratio,
        is_blank: density_ratio < BLANK_RATIO,
    }
}
