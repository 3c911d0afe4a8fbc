use image::{GrayImage, Luma};

use crate::buffer::{Paint, PixelBuffer};

/// Pixels 4-connected to `(seed_x, seed_y)` whose colour is within
/// `tolerance` (max per-channel difference, 0..=255) of the seed colour.
/// Returns a 0/255 mask, or `None` if the seed is outside the buffer.
pub fn flood_region(buffer: &PixelBuffer, seed_x: u32, seed_y: u32, tolerance: u8) -> Option<GrayImage> {
    let (w, h) = buffer.dimensions();
    let target = buffer.pixel(seed_x, seed_y)?.0;
    let flat = buffer.as_raw();
    let wu = w as usize;

    #[inline(always)]
    fn pix(flat: &[u8], idx: usize) -> [u8; 4] {
        let o = idx * 4;
        [flat[o], flat[o + 1], flat[o + 2], flat[o + 3]]
    }

    let tol = tolerance as i16;
    let matches = |p: [u8; 4]| {
        // Any two fully transparent pixels are the same colour.
        if target[3] == 0 && p[3] == 0 {
            return true;
        }
        (0..4).all(|c| (target[c] as i16 - p[c] as i16).abs() <= tol)
    };

    // mask doubles as the visited set
    let mut mask = GrayImage::new(w, h);
    let mut stack: Vec<u32> = Vec::with_capacity(4096);
    let seed = seed_y as usize * wu + seed_x as usize;
    mask.put_pixel(seed_x, seed_y, Luma([255]));
    stack.push(seed as u32);

    while let Some(idx) = stack.pop() {
        let x = (idx as usize % wu) as u32;
        let y = (idx as usize / wu) as u32;

        let neighbours = [
            (x > 0).then(|| (x - 1, y)),
            (x + 1 < w).then(|| (x + 1, y)),
            (y > 0).then(|| (x, y - 1)),
            (y + 1 < h).then(|| (x, y + 1)),
        ];
        for (nx, ny) in neighbours.into_iter().flatten() {
            if mask.get_pixel(nx, ny).0[0] != 0 {
                continue;
            }
            let ni = ny as usize * wu + nx as usize;
            if matches(pix(flat, ni)) {
                mask.put_pixel(nx, ny, Luma([255]));
                stack.push(ni as u32);
            }
        }
    }

    Some(mask)
}

/// Paint every pixel of `region` with `paint`, clipped by `selection`.
pub fn fill_region(
    buffer: &mut PixelBuffer,
    region: &GrayImage,
    paint: Paint,
    selection: Option<&GrayImage>,
) -> bool {
    let mut changed = false;
    for (x, y, v) in region.enumerate_pixels() {
        if v.0[0] == 0 {
            continue;
        }
        let coverage = v.0[0] as f32 / 255.0;
        changed |= buffer.paint_pixel(x, y, coverage, paint, selection);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn boxed() -> PixelBuffer {
        // White canvas with a black square outline from (2,2) to (7,7).
        let mut buf = PixelBuffer::filled(10, 10, Rgba([255, 255, 255, 255])).unwrap();
        for i in 2..=7 {
            buf.put_pixel(i, 2, Rgba([0, 0, 0, 255]));
            buf.put_pixel(i, 7, Rgba([0, 0, 0, 255]));
            buf.put_pixel(2, i, Rgba([0, 0, 0, 255]));
            buf.put_pixel(7, i, Rgba([0, 0, 0, 255]));
        }
        buf
    }

    #[test]
    fn test_flood_stays_inside_outline() {
        let buf = boxed();
        let region = flood_region(&buf, 4, 4, 0).unwrap();
        let filled = region.pixels().filter(|p| p.0[0] > 0).count();
        assert_eq!(filled, 16);
        assert_eq!(region.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_tolerance_bridges_similar_colours() {
        let mut buf = boxed();
        buf.put_pixel(4, 4, Rgba([250, 250, 250, 255]));
        let strict = flood_region(&buf, 3, 3, 0).unwrap();
        assert_eq!(strict.get_pixel(4, 4).0[0], 0);
        let loose = flood_region(&buf, 3, 3, 10).unwrap();
        assert_eq!(loose.get_pixel(4, 4).0[0], 255);
    }

    #[test]
    fn test_out_of_bounds_seed() {
        assert!(flood_region(&boxed(), 10, 0, 0).is_none());
    }

    #[test]
    fn test_fill_region_paints_only_region() {
        let mut buf = boxed();
        let region = flood_region(&buf, 4, 4, 0).unwrap();
        assert!(fill_region(&mut buf, &region, Paint::solid(Rgba([255, 0, 0, 255])), None));
        assert_eq!(buf.pixel(4, 4), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(buf.pixel(0, 0), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(buf.pixel(2, 2), Some(Rgba([0, 0, 0, 255])));
    }
}
