use image::{Rgba, RgbaImage};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const PADDING: u32 = 2;

// 5x7 bitmaps, one byte per row, most significant of the low five bits on the left.
fn glyph(ch: char) -> Option<[u8; 7]> {
	match ch {
		'A' => Some([0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11]),
		'B' => Some([0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E]),
		'C' => Some([0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E]),
		'1' => Some([0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E]),
		'2' => Some([0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F]),
		'3' => Some([0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E]),
		_ => None,
	}
}

/// Draws `label` white-on-black with its top-left corner at `(x, y)`. Characters without a glyph
/// leave a blank cell. Pixels outside the canvas are clipped.
pub(crate) fn draw_label(canvas: &mut RgbaImage, label: &str, x: u32, y: u32, scale: u32) {
	let scale = scale.max(1);
	let chars = label.chars().count() as u32;
	let box_width = (chars * (GLYPH_WIDTH + 1) + 1 + PADDING) * scale;
	let box_height = (GLYPH_HEIGHT + 2 + PADDING) * scale;

	fill_rect(canvas, x, y, box_width, box_height, Rgba([0, 0, 0, 255]));

	for (index, ch) in label.chars().enumerate() {
		let Some(rows) = glyph(ch) else { continue };
		let origin_x = x + (PADDING / 2 + 1 + index as u32 * (GLYPH_WIDTH + 1)) * scale;
		let origin_y = y + (PADDING / 2 + 1) * scale;

		for (row, bits) in rows.iter().enumerate() {
			for col in 0..GLYPH_WIDTH {
				if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
					continue;
				}

				fill_rect(
					canvas,
					origin_x + col * scale,
					origin_y + row as u32 * scale,
					scale,
					scale,
					Rgba([255, 255, 255, 255]),
				);
			}
		}
	}
}

pub(crate) fn fill_rect(canvas: &mut RgbaImage, x: u32, y: u32, width: u32, height: u32, color: Rgba<u8>) {
	let x_end = x.saturating_add(width).min(canvas.width());
	let y_end = y.saturating_add(height).min(canvas.height());

	for py in y..y_end {
		for px in x..x_end {
			canvas.put_pixel(px, py, color);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn label_pixels_are_drawn_and_clipped() {
		let mut canvas = RgbaImage::from_pixel(20, 20, Rgba([10, 10, 10, 255]));

		draw_label(&mut canvas, "A1", 0, 0, 1);

		// Top row of "A" starts one column in: 0x0E lights columns 1..=3.
		assert_eq!(*canvas.get_pixel(3, 2), Rgba([255, 255, 255, 255]));
		assert_eq!(*canvas.get_pixel(2, 2), Rgba([0, 0, 0, 255]));
		// Background outside the label box is untouched.
		assert_eq!(*canvas.get_pixel(19, 19), Rgba([10, 10, 10, 255]));
	}
}
