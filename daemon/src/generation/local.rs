//! Offline texture generation. Always produces an image.

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use std::io::Cursor;

use super::GenerationError;

pub const PLACEHOLDER_SIZE: u32 = 512;
pub const PLACEHOLDER_COLOR: Rgb<u8> = Rgb([100, 50, 150]);

/// Sobel gradient magnitude above which a pixel counts as an edge.
const EDGE_THRESHOLD: f32 = 200.0;
const SATURATION_GAIN: f32 = 1.5;
const VALUE_GAIN: f32 = 1.2;
const IMAGE_WEIGHT: f32 = 0.7;
const EDGE_WEIGHT: f32 = 0.3;

/// Cyclic dusk palette: dark purple through violet and pale cyan to rose.
const PALETTE: [(u8, [u8; 3]); 5] = [
    (0, [30, 15, 50]),
    (64, [85, 60, 170]),
    (128, [180, 200, 225]),
    (192, [190, 80, 110]),
    (255, [30, 15, 50]),
];

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, GenerationError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

pub fn placeholder() -> RgbImage {
    RgbImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, PLACEHOLDER_COLOR)
}

pub fn placeholder_png() -> Result<Vec<u8>, GenerationError> {
    encode_png(&DynamicImage::ImageRgb8(placeholder()))
}

/// Neon restyle of `source`: false-color remap with boosted saturation,
/// blended with a hot-colored edge overlay.
pub fn stylize(source: &DynamicImage) -> RgbImage {
    let gray = source.to_luma8();
    let edges = edge_map(&gray);

    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let Luma([level]) = *gray.get_pixel(x, y);
        let Luma([edge]) = *edges.get_pixel(x, y);
        let base = boost(false_color(level));
        let overlay = hot(edge);

        let mut out = [0u8; 3];
        for c in 0..3 {
            let mixed = IMAGE_WEIGHT * base[c] as f32 + EDGE_WEIGHT * overlay[c] as f32;
            out[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

pub fn stylize_png(source: &DynamicImage) -> Result<Vec<u8>, GenerationError> {
    encode_png(&DynamicImage::ImageRgb8(stylize(source)))
}

/// Binary edge map from the Sobel gradient magnitude. Border pixels are never edges.
fn edge_map(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut edges = GrayImage::new(width, height);
    if width < 3 || height < 3 {
        return edges;
    }

    let at = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f32;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            if (gx * gx + gy * gy).sqrt() > EDGE_THRESHOLD {
                edges.put_pixel(x, y, Luma([255]));
            }
        }
    }
    edges
}

fn false_color(level: u8) -> [u8; 3] {
    for pair in PALETTE.windows(2) {
        let (lo, lo_color) = pair[0];
        let (hi, hi_color) = pair[1];
        if level <= hi {
            let t = (level - lo) as f32 / (hi - lo) as f32;
            let mut out = [0u8; 3];
            for c in 0..3 {
                let v = lo_color[c] as f32 + t * (hi_color[c] as f32 - lo_color[c] as f32);
                out[c] = v.round() as u8;
            }
            return out;
        }
    }
    PALETTE[PALETTE.len() - 1].1
}

/// Black through red and yellow to white.
fn hot(level: u8) -> [u8; 3] {
    let v = level as f32 / 255.0;
    let channel = |start: f32| (((v - start) * 3.0).clamp(0.0, 1.0) * 255.0).round() as u8;
    [channel(0.0), channel(1.0 / 3.0), channel(2.0 / 3.0)]
}

/// Scale saturation and value in HSV space, keeping hue.
fn boost(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    let s = (saturation * SATURATION_GAIN).min(1.0);
    let v = (max * VALUE_GAIN).min(1.0);

    let chroma = v * s;
    let x = chroma * (1.0 - ((hue / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - chroma;
    let (r1, g1, b1) = match (hue / 60.0) as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };

    [r1, g1, b1].map(|c| ((c + m) * 255.0).round().clamp(0.0, 255.0) as u8)
}
