//! Placeholder frames for hosts running without a hardware renderer.

use crate::config::DisplayGeometry;
use guesthost_stream::{Frame, StreamError};

/// A moving gradient. Pixel `(x, y)` of frame `n` is
/// `((x + n), (y + n), ((x + y) / 2 + 2n), 255)`, each channel mod 256.
pub struct TestPattern {
    width: u32,
    height: u32,
    counter: u32,
    pixels: Vec<u8>,
}

impl TestPattern {
    pub fn new(geometry: DisplayGeometry) -> Self {
        let len = geometry.rgba_stride() as usize * geometry.height as usize;
        Self {
            width: geometry.width,
            height: geometry.height,
            counter: 0,
            pixels: vec![0u8; len],
        }
    }

    /// Number of frames produced so far.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn next_frame(&mut self) -> Result<Frame<'_>, StreamError> {
        let n = self.counter;
        let stride = self.width as usize * 4;
        for y in 0..self.height {
            let row = &mut self.pixels[y as usize * stride..(y as usize + 1) * stride];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let x = x as u32;
                px[0] = x.wrapping_add(n) as u8;
                px[1] = y.wrapping_add(n) as u8;
                px[2] = ((x + y) / 2).wrapping_add(n.wrapping_mul(2)) as u8;
                px[3] = 255;
            }
        }
        self.counter = self.counter.wrapping_add(1);
        Frame::rgba(&self.pixels, self.width, self.height, stride as u32)
    }
}
