//! Preview overlays.

use image::{Rgb, RgbImage};

/// Default channel level above which a preview pixel counts as clipped.
pub const DEFAULT_CLIPPING_THRESHOLD: u8 = 245;

/// Dark blue used to paint clipped pixels.
pub const DEFAULT_CLIPPING_COLOR: Rgb<u8> = Rgb([0, 0, 155]);

/// Paint every pixel with any channel above `threshold` in `color`.
///
/// Returns the number of painted pixels.
pub fn highlight_clipping(preview: &mut RgbImage, threshold: u8, color: Rgb<u8>) -> usize {
    let mut clipped = 0;
    for pixel in preview.pixels_mut() {
        if pixel.0.iter().any(|&channel| channel > threshold) {
            *pixel = color;
            clipped += 1;
        }
    }
    clipped
}
