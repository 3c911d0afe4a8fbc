use image::{GrayImage, Rgba};

use crate::buffer::{mask_value, Paint, PixelBuffer, Point};

/// Where the stamp for pointer position `at` reads from: the clone source
/// moved by the same delta the pointer has moved since the gesture began.
pub fn source_for(clone_source: Point, gesture_start: Point, at: Point) -> Point {
    Point::new(
        clone_source.x + (at.x - gesture_start.x),
        clone_source.y + (at.y - gesture_start.y),
    )
}

/// Top-left of a `size`-wide block centred on `p`.
fn block_origin(p: Point, size: u32) -> (i64, i64) {
    let half = (size / 2) as i64;
    (p.x.round() as i64 - half, p.y.round() as i64 - half)
}

/// Copy a `size`×`size` block centred at `from` in `source` to the block
/// centred at `to` in `dst`. Pixels are replaced, not blended. Source pixels
/// outside `source` are skipped.
pub fn stamp(
    dst: &mut PixelBuffer,
    source: &PixelBuffer,
    from: Point,
    to: Point,
    size: u32,
    mask: Option<&GrayImage>,
) -> bool {
    let (sx0, sy0) = block_origin(from, size);
    let (dx0, dy0) = block_origin(to, size);
    let mut changed = false;

    for j in 0..size as i64 {
        for i in 0..size as i64 {
            let (sx, sy) = (sx0 + i, sy0 + j);
            let (dx, dy) = (dx0 + i, dy0 + j);
            if sx < 0 || sy < 0 || dx < 0 || dy < 0 {
                continue;
            }
            let Some(px) = source.pixel(sx as u32, sy as u32) else {
                continue;
            };
            let (dx, dy) = (dx as u32, dy as u32);
            if dst.pixel(dx, dy).is_none() || mask_value(mask, dx, dy) < 0.5 {
                continue;
            }
            if dst.pixel(dx, dy) != Some(px) {
                dst.put_pixel(dx, dy, px);
                changed = true;
            }
        }
    }
    changed
}

/// Healing stamp: texture from `from`, tone from the destination.
///
/// The source block's mean colour is shifted onto the destination block's
/// mean colour and the result is blended in with a soft circular falloff.
pub fn heal(
    dst: &mut PixelBuffer,
    source: &PixelBuffer,
    from: Point,
    to: Point,
    size: u32,
    mask: Option<&GrayImage>,
) -> bool {
    let (sx0, sy0) = block_origin(from, size);
    let (dx0, dy0) = block_origin(to, size);
    let (Some(src_mean), Some(dst_mean)) = (
        mean_color(source, sx0, sy0, size),
        mean_color(dst, dx0, dy0, size),
    ) else {
        return false;
    };

    let radius = (size as f32 / 2.0).max(0.5);
    let centre = (size as f32 - 1.0) / 2.0;
    let mut changed = false;

    for j in 0..size as i64 {
        for i in 0..size as i64 {
            let (sx, sy) = (sx0 + i, sy0 + j);
            let (dx, dy) = (dx0 + i, dy0 + j);
            if sx < 0 || sy < 0 || dx < 0 || dy < 0 {
                continue;
            }
            let Some(px) = source.pixel(sx as u32, sy as u32) else {
                continue;
            };
            let dist = ((i as f32 - centre).powi(2) + (j as f32 - centre).powi(2)).sqrt();
            let falloff = (1.0 - (dist / radius).powi(2)).clamp(0.0, 1.0);
            if falloff <= 0.0 {
                continue;
            }

            let mut shifted = [0u8; 4];
            for c in 0..3 {
                let v = px[c] as f32 - src_mean[c] + dst_mean[c];
                shifted[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            shifted[3] = px[3];
            let paint = Paint::solid(Rgba(shifted));
            changed |= dst.paint_pixel(dx as u32, dy as u32, falloff, paint, mask);
        }
    }
    changed
}

/// Mean RGB of the opaque-ish pixels inside a block, if any.
fn mean_color(buffer: &PixelBuffer, x0: i64, y0: i64, size: u32) -> Option<[f32; 3]> {
    let mut sum = [0.0f32; 3];
    let mut count = 0.0f32;
    for j in 0..size as i64 {
        for i in 0..size as i64 {
            let (x, y) = (x0 + i, y0 + j);
            if x < 0 || y < 0 {
                continue;
            }
            if let Some(px) = buffer.pixel(x as u32, y as u32) {
                if px[3] == 0 {
                    continue;
                }
                for c in 0..3 {
                    sum[c] += px[c] as f32;
                }
                count += 1.0;
            }
        }
    }
    (count > 0.0).then(|| [sum[0] / count, sum[1] / count, sum[2] / count])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h).unwrap();
        for y in 0..h {
            for x in 0..w {
                buf.put_pixel(x, y, Rgba([x as u8, y as u8, 7, 255]));
            }
        }
        buf
    }

    #[test]
    fn test_source_follows_pointer_delta() {
        let src = source_for(Point::new(10.0, 10.0), Point::new(50.0, 50.0), Point::new(60.0, 60.0));
        assert_eq!(src, Point::new(20.0, 20.0));
    }

    #[test]
    fn test_stamp_copies_block_unchanged() {
        let source = gradient(100, 100);
        let mut dst = source.clone();
        assert!(stamp(&mut dst, &source, Point::new(20.0, 20.0), Point::new(60.0, 60.0), 4, None));
        for j in 0..4 {
            for i in 0..4 {
                assert_eq!(dst.pixel(58 + i, 58 + j), source.pixel(18 + i, 18 + j));
            }
        }
        assert_eq!(dst.pixel(57, 57), source.pixel(57, 57));
    }

    #[test]
    fn test_stamp_skips_out_of_bounds_source() {
        let source = gradient(10, 10);
        let mut dst = PixelBuffer::filled(10, 10, Rgba([1, 1, 1, 255])).unwrap();
        stamp(&mut dst, &source, Point::new(0.0, 0.0), Point::new(5.0, 5.0), 4, None);
        // Rows/cols that would read from x<0 or y<0 keep their colour.
        assert_eq!(dst.pixel(3, 3), Some(Rgba([1, 1, 1, 255])));
        assert_eq!(dst.pixel(5, 5), source.pixel(0, 0));
    }

    #[test]
    fn test_heal_matches_destination_tone() {
        // Striped bright texture on the right, flat dark area on the left.
        let mut source = PixelBuffer::filled(40, 40, Rgba([60, 60, 60, 255])).unwrap();
        for x in 20..40 {
            let v = if x % 2 == 0 { 180 } else { 220 };
            source.fill_rect(x, 0, 1, 40, Rgba([v, v, v, 255]));
        }
        let mut dst = source.clone();
        assert!(heal(&mut dst, &source, Point::new(30.0, 20.0), Point::new(10.0, 20.0), 8, None));
        let px = dst.pixel(10, 20).unwrap();
        // A plain clone would have brought over 180.
        assert!(px[0] < 100, "got {:?}", px);
        assert_ne!(px, Rgba([60, 60, 60, 255]));
    }
}
