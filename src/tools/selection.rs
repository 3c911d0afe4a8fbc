use image::{GrayImage, Luma};

use crate::buffer::Point;

/// Region mask limiting where painting tools may write. 255 = fully
/// selected, 0 = protected; feathered edges hold intermediate values.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    mask: GrayImage,
}

impl Selection {
    /// Axis-aligned rectangle between two drag points. `None` when the drag
    /// encloses no pixel centre.
    pub fn rectangle(width: u32, height: u32, a: Point, b: Point, feather: f32) -> Option<Self> {
        let (min_x, max_x) = (a.x.min(b.x), a.x.max(b.x));
        let (min_y, max_y) = (a.y.min(b.y), a.y.max(b.y));
        let mut mask = GrayImage::new(width, height);
        let mut any = false;
        for (x, y, px) in mask.enumerate_pixels_mut() {
            let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
            if cx >= min_x && cx < max_x && cy >= min_y && cy < max_y {
                *px = Luma([255]);
                any = true;
            }
        }
        any.then(|| Self::from_mask(mask, feather))
    }

    /// Free-form polygon (even-odd rule). Needs at least three points.
    pub fn lasso(width: u32, height: u32, points: &[Point], feather: f32) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let mut mask = GrayImage::new(width, height);
        let mut any = false;
        let mut crossings: Vec<f32> = Vec::new();

        for y in 0..height {
            let cy = y as f32 + 0.5;
            crossings.clear();
            for (i, a) in points.iter().enumerate() {
                let b = points[(i + 1) % points.len()];
                if (a.y <= cy && b.y > cy) || (b.y <= cy && a.y > cy) {
                    let t = (cy - a.y) / (b.y - a.y);
                    crossings.push(a.x + t * (b.x - a.x));
                }
            }
            crossings.sort_by(|l, r| l.total_cmp(r));
            for span in crossings.chunks_exact(2) {
                let start = (span[0] - 0.5).ceil().max(0.0) as u32;
                let end = (span[1] - 0.5).ceil().max(0.0) as u32;
                for x in start..end.min(width) {
                    mask.put_pixel(x, y, Luma([255]));
                    any = true;
                }
            }
        }
        any.then(|| Self::from_mask(mask, feather))
    }

    /// Wrap an existing mask, softening its edge by `feather` pixels.
    pub fn from_mask(mask: GrayImage, feather: f32) -> Self {
        let mask = if feather > 0.0 {
            image::imageops::blur(&mask, feather)
        } else {
            mask
        };
        Self { mask }
    }

    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.mask
            .get_pixel_checked(x, y)
            .map(|p| p.0[0] > 0)
            .unwrap_or(false)
    }

    /// Number of (partially) selected pixels.
    pub fn area(&self) -> usize {
        self.mask.pixels().filter(|p| p.0[0] > 0).count()
    }
}
