//! Box and label overlay for detections

use crate::frame::Frame;
use image::{Rgb, RgbImage};
use pipewatch_core::Detection;

const DEFAULT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const GLYPH_ADVANCE: i32 = 6;
const LABEL_HEIGHT: i32 = 11;

/// Overlay colour for a defect class; unknown classes are green.
pub fn class_color(class_name: &str) -> Rgb<u8> {
    match class_name.to_ascii_lowercase().as_str() {
        "foreign_object" => Rgb([255, 0, 0]),
        "crack" => Rgb([255, 165, 0]),
        "rust" => Rgb([255, 140, 0]),
        "corrosion" => Rgb([255, 255, 0]),
        "sediment" => Rgb([139, 69, 19]),
        "leak" => Rgb([0, 0, 255]),
        _ => DEFAULT_COLOR,
    }
}

/// `"<class>: NN%"`
pub fn label_for(detection: &Detection) -> String {
    format!(
        "{}: {:.0}%",
        detection.class_name,
        detection.confidence * 100.0
    )
}

/// Render boxes and labels onto a copy of `frame`.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Frame {
    let mut image = frame.image.clone();
    if image.width() == 0 || image.height() == 0 {
        return Frame::with_timestamp(image, frame.captured_at);
    }

    for det in detections {
        let color = class_color(&det.class_name);
        let b = &det.bbox;
        draw_rectangle(&mut image, b.x1, b.y1, b.x2, b.y2, color);
        if b.x2 - b.x1 >= 2 && b.y2 - b.y1 >= 2 {
            draw_rectangle(&mut image, b.x1 + 1, b.y1 + 1, b.x2 - 1, b.y2 - 1, color);
        }

        let label = label_for(det);
        let text_width = label.chars().count() as i32 * GLYPH_ADVANCE;
        let top = if b.y1 >= LABEL_HEIGHT {
            b.y1 - LABEL_HEIGHT
        } else {
            b.y1.max(0)
        };
        fill_rect(&mut image, b.x1, top, b.x1 + text_width + 2, top + LABEL_HEIGHT - 1, color);
        draw_label(&mut image, b.x1 + 2, top + 2, &label, TEXT_COLOR);
    }

    Frame::with_timestamp(image, frame.captured_at)
}

fn clamp_to(image: &RgbImage, x: i32, y: i32) -> (i32, i32) {
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    (x.clamp(0, max_x), y.clamp(0, max_y))
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let (left, top) = clamp_to(image, left, top);
    let (right, bottom) = clamp_to(image, right, bottom);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let (left, top) = clamp_to(image, left, top);
    let (right, bottom) = clamp_to(image, right, bottom);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

// 5x7 bitmap font, one byte per row, MSB-first in the low five bits.
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}
