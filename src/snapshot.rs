//! Snapshot images: capturing, saving, loading and comparing framebuffers.
//!
//! This module's `Image` type is a rectangular block of RGBA pixels, one byte
//! per channel. Pixels read back from a framebuffer arrive bottom row first,
//! the way `glReadPixels` returns them; `Image::flipped` records that, and the
//! PNG writer and the comparison both take it into account.

use image::png::PngEncoder;
use image::{ColorType, ImageResult};
use std::{fs, io, path};

/// Bytes per pixel. Everything here is RGBA, eight bits per channel.
const CHANNELS: usize = 4;

pub struct Image {
    /// Width of the image, in pixels.
    pub width: u32,

    /// Height of the image, in pixels.
    pub height: u32,

    /// True if the first row in `pixels` is the bottom row of the image.
    pub flipped: bool,

    /// The actual pixel content, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

impl Image {
    /// Return a new black, transparent image.
    pub fn new(width: u32, height: u32, flipped: bool) -> Image {
        Image {
            width,
            height,
            flipped,
            pixels: vec![0; width as usize * height as usize * CHANNELS],
        }
    }

    pub fn read_png<P: AsRef<path::Path>>(path: P) -> ImageResult<Image> {
        let rgba = image::open(path)?.into_rgba8();
        Ok(Image {
            width: rgba.width(),
            height: rgba.height(),
            flipped: false,
            pixels: rgba.into_raw(),
        })
    }

    pub fn write_png<P: AsRef<path::Path>>(&self, path: P) -> ImageResult<()> {
        let mut top_down = Vec::with_capacity(self.pixels.len());
        for y in 0..self.height as usize {
            top_down.extend_from_slice(self.row(y));
        }

        let file = io::BufWriter::new(fs::File::create(path)?);
        PngEncoder::new(file).encode(&top_down, self.width, self.height, ColorType::Rgba8)
    }

    fn stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    /// Return row `y` of the image, counting from the top.
    pub fn row(&self, y: usize) -> &[u8] {
        let stored = if self.flipped {
            self.height as usize - 1 - y
        } else {
            y
        };
        let stride = self.stride();
        &self.pixels[stored * stride..(stored + 1) * stride]
    }

    /// Return the average precision, in bits, to which `self` matches
    /// `reference`.
    ///
    /// Identical images of size `w`×`h` score `log2(w * h * 4 * 255² * 2)`
    /// bits; each differing channel lowers the score. Images of different
    /// sizes don't match at all, and score zero.
    pub fn compare(&self, reference: &Image) -> f64 {
        if self.width != reference.width || self.height != reference.height {
            return 0.0;
        }

        let mut error: u64 = 0;
        for y in 0..self.height as usize {
            for (&a, &b) in self.row(y).iter().zip(reference.row(y)) {
                let delta = a as i64 - b as i64;
                error += (delta * delta) as u64;
            }
        }

        let numerator = error as f64 * 2.0 + 1.0;
        let denominator =
            self.width as f64 * self.height as f64 * CHANNELS as f64 * 255.0 * 255.0 * 2.0;
        -(numerator / denominator).log2()
    }
}

/// Return the name of the snapshot file for the frame ending at call `call_no`.
pub fn snapshot_file_name(prefix: &str, call_no: u32) -> String {
    format!("{}{:010}.png", prefix, call_no)
}

#[cfg(test)]
fn gradient(width: u32, height: u32) -> Image {
    let mut image = Image::new(width, height, false);
    for (i, pixel) in image.pixels.chunks_mut(CHANNELS).enumerate() {
        let (x, y) = (i as u32 % width, i as u32 / width);
        pixel.copy_from_slice(&[(x * 16) as u8, (y * 16) as u8, 128, 255]);
    }
    image
}

#[test]
fn test_snapshot_file_name() {
    assert_eq!(snapshot_file_name("/tmp/out", 42), "/tmp/out0000000042.png");
    assert_eq!(snapshot_file_name("", 0), "0000000000.png");
    assert_eq!(snapshot_file_name("ref-", u32::MAX), "ref-4294967295.png");
}

#[test]
fn test_compare() {
    let a = gradient(8, 4);

    let identical = gradient(8, 4);
    let exact = a.compare(&identical);
    assert!((exact - (8.0 * 4.0 * 4.0 * 255.0 * 255.0 * 2.0_f64).log2()).abs() < 1e-9);

    let mut one_off = gradient(8, 4);
    one_off.pixels[5] ^= 1;
    let mut far_off = gradient(8, 4);
    far_off.pixels[5] ^= 0x80;
    assert!(a.compare(&one_off) < exact);
    assert!(a.compare(&far_off) < a.compare(&one_off));

    assert_eq!(a.compare(&gradient(4, 8)), 0.0);
}

#[test]
fn test_compare_respects_flipping() {
    let upright = gradient(3, 5);

    // The same picture, stored bottom row first.
    let mut flipped = Image::new(3, 5, true);
    for y in 0..5 {
        let stride = 3 * CHANNELS;
        flipped.pixels[(4 - y) * stride..(5 - y) * stride].copy_from_slice(upright.row(y));
    }

    assert_eq!(flipped.row(0), upright.row(0));
    assert_eq!(flipped.compare(&upright), upright.compare(&upright));
}

#[test]
fn test_png_round_trip_unflips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap.png");

    let mut captured = Image::new(2, 2, true);
    // Bottom row red, top row blue.
    captured.pixels[..8].copy_from_slice(&[255, 0, 0, 255, 255, 0, 0, 255]);
    captured.pixels[8..].copy_from_slice(&[0, 0, 255, 255, 0, 0, 255, 255]);
    captured.write_png(&path).unwrap();

    let loaded = Image::read_png(&path).unwrap();
    assert!(!loaded.flipped);
    assert_eq!((loaded.width, loaded.height), (2, 2));
    assert_eq!(loaded.row(0), &[0, 0, 255, 255, 0, 0, 255, 255]);
    assert_eq!(loaded.row(1), &[255, 0, 0, 255, 255, 0, 0, 255]);
    assert_eq!(loaded.compare(&captured), captured.compare(&captured));
}

#[test]
fn test_read_missing_png() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Image::read_png(dir.path().join("absent.png")).is_err());
}
