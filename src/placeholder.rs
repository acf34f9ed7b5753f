//! Synthetic placeholder frames
//!
//! Pre-rendered JPEG stills shown when no live frames are available: a
//! "waiting" frame seeded into new streams, a "stopped" frame dispatched
//! after a publisher leaves, and a plain dark frame used as an egress
//! keep-alive. Messages are rasterized with a built-in 5×7 bitmap face;
//! the crate ships no font assets.

use std::sync::OnceLock;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

const MESSAGE_FRAME_WIDTH: u32 = 640;
const MESSAGE_FRAME_HEIGHT: u32 = 480;
const KEEPALIVE_FRAME_WIDTH: u32 = 320;
const KEEPALIVE_FRAME_HEIGHT: u32 = 240;
const JPEG_QUALITY: u8 = 75;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const TEXT_SCALE: u32 = 4;

static WAITING: OnceLock<Bytes> = OnceLock::new();
static STOPPED: OnceLock<Bytes> = OnceLock::new();
static KEEPALIVE: OnceLock<Bytes> = OnceLock::new();

/// Frame seeded into a freshly attached stream.
pub fn waiting_frame() -> Bytes {
    WAITING
        .get_or_init(|| render_message("Waiting for video..."))
        .clone()
}

/// Frame dispatched while a channel has no running stream.
pub fn stopped_frame() -> Bytes {
    STOPPED
        .get_or_init(|| render_message("Stream Stopped"))
        .clone()
}

/// Plain dark frame keeping an idle egress connection warm.
pub fn keepalive_frame() -> Bytes {
    KEEPALIVE
        .get_or_init(|| {
            let img = RgbImage::from_pixel(
                KEEPALIVE_FRAME_WIDTH,
                KEEPALIVE_FRAME_HEIGHT,
                Rgb([0, 0, 0]),
            );
            encode_jpeg(&img)
        })
        .clone()
}

fn render_message(message: &str) -> Bytes {
    let mut img = RgbImage::from_pixel(
        MESSAGE_FRAME_WIDTH,
        MESSAGE_FRAME_HEIGHT,
        Rgb([0, 0, 0]),
    );
    draw_text(&mut img, message);
    encode_jpeg(&img)
}

fn encode_jpeg(img: &RgbImage) -> Bytes {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .encode_image(img)
        .expect("encoding a generated image is infallible");
    Bytes::from(out)
}

/// Draw `message` centered, white on the current background.
fn draw_text(img: &mut RgbImage, message: &str) {
    let advance = (GLYPH_WIDTH + 1) * TEXT_SCALE;
    let text_width = advance * message.chars().count() as u32;
    let x0 = img.width().saturating_sub(text_width) / 2;
    let y0 = img.height().saturating_sub(GLYPH_HEIGHT * TEXT_SCALE) / 2;

    for (index, ch) in message.chars().enumerate() {
        let Some(rows) = glyph(ch.to_ascii_uppercase()) else {
            continue;
        };
        let gx = x0 + index as u32 * advance;
        for (row_index, row) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if row & (0x10 >> col) == 0 {
                    continue;
                }
                fill_block(
                    img,
                    gx + col * TEXT_SCALE,
                    y0 + row_index as u32 * TEXT_SCALE,
                );
            }
        }
    }
}

fn fill_block(img: &mut RgbImage, x: u32, y: u32) {
    for dy in 0..TEXT_SCALE {
        for dx in 0..TEXT_SCALE {
            let (px, py) = (x + dx, y + dy);
            if px < img.width() && py < img.height() {
                img.put_pixel(px, py, Rgb([255, 255, 255]));
            }
        }
    }
}

/// 5×7 bitmap rows for the supported characters, MSB-first in the low
/// five bits of each row byte.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => return None,
    };
    Some(rows)
}
