use image::{GrayImage, ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::EditorError;

/// Largest edge length we agree to allocate.
pub const MAX_DIMENSION: u32 = 16_384;

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// How painted coverage combines with what is already in the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompositeOp {
    /// Paint over existing pixels (straight alpha "over").
    #[default]
    SourceOver,
    /// Remove existing alpha in proportion to coverage.
    DestinationOut,
}

/// Fill/stroke parameters, the equivalent of a 2D context's style state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Paint {
    pub color: Rgba<u8>,
    /// Global alpha in 0.0..=1.0.
    pub alpha: f32,
    pub op: CompositeOp,
}

impl Paint {
    pub fn solid(color: Rgba<u8>) -> Self {
        Self {
            color,
            alpha: 1.0,
            op: CompositeOp::SourceOver,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn erase(alpha: f32) -> Self {
        Self {
            color: Rgba([0, 0, 0, 255]),
            alpha: alpha.clamp(0.0, 1.0),
            op: CompositeOp::DestinationOut,
        }
    }
}

/// On/off dash pattern in pixels along a path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dash {
    pub on: f32,
    pub off: f32,
}

/// Fixed-size RGBA8 raster surface. Owned by exactly one layer.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    image: RgbaImage,
}

impl PixelBuffer {
    /// Allocate a fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Result<Self, EditorError> {
        Self::filled(width, height, Rgba([0, 0, 0, 0]))
    }

    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Result<Self, EditorError> {
        let fail = || EditorError::Allocation { width, height };
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            tracing::error!("Refusing buffer allocation of {}x{}", width, height);
            return Err(fail());
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(fail)?;

        let mut data: Vec<u8> = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            tracing::error!("Out of memory allocating {}x{} buffer", width, height);
            return Err(fail());
        }
        for _ in 0..(len / 4) {
            data.extend_from_slice(&color.0);
        }
        let image = ImageBuffer::from_raw(width, height, data).ok_or_else(fail)?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbaImage) -> Result<Self, EditorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(EditorError::Allocation { width, height });
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        self.image.get_pixel_checked(x, y).copied()
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, px: Rgba<u8>) {
        if x < self.width() && y < self.height() {
            self.image.put_pixel(x, y, px);
        }
    }

    pub fn clear(&mut self) {
        for px in self.image.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    /// Overwrite all pixels from another buffer of identical size.
    pub fn copy_from(&mut self, other: &PixelBuffer) -> bool {
        if self.dimensions() != other.dimensions() {
            return false;
        }
        self.image.copy_from_slice(other.as_raw());
        true
    }

    /// Resample to new dimensions (triangle filter).
    pub fn resized(&self, width: u32, height: u32) -> Result<Self, EditorError> {
        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }
        // Validate before letting the resampler allocate.
        Self::new(width, height)?;
        let image = image::imageops::resize(
            &self.image,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        Ok(Self { image })
    }

    /// Fill an anti-aliased disc.
    pub fn fill_circle(
        &mut self,
        center: Point,
        radius: f32,
        paint: Paint,
        mask: Option<&GrayImage>,
    ) -> bool {
        let radius = radius.max(0.5);
        let Some((x0, y0, x1, y1)) = self.clip_bounds(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
        ) else {
            return false;
        };

        let mut changed = false;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let d = Point::new(x as f32 + 0.5, y as f32 + 0.5).distance(center);
                let coverage = (radius - d + 0.5).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    changed |= self.paint_pixel(x, y, coverage, paint, mask);
                }
            }
        }
        changed
    }

    /// Stroke a polyline with round caps and joins. Each pixel is painted once
    /// per call, using the nearest (dash-visible) segment.
    pub fn stroke_polyline(
        &mut self,
        points: &[Point],
        closed: bool,
        line_width: f32,
        paint: Paint,
        dash: Option<Dash>,
        mask: Option<&GrayImage>,
    ) -> bool {
        if points.is_empty() {
            return false;
        }
        let half = (line_width / 2.0).max(0.5);

        let mut segments: Vec<(Point, Point, f32)> = Vec::with_capacity(points.len());
        let mut travelled = 0.0;
        let mut push = |a: Point, b: Point| {
            segments.push((a, b, travelled));
            travelled += a.distance(b);
        };
        if points.len() == 1 {
            push(points[0], points[0]);
        }
        for pair in points.windows(2) {
            push(pair[0], pair[1]);
        }
        if closed && points.len() > 2 {
            push(points[points.len() - 1], points[0]);
        }

        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let Some((x0, y0, x1, y1)) =
            self.clip_bounds(min_x - half, min_y - half, max_x + half, max_y + half)
        else {
            return false;
        };

        let mut changed = false;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let p = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                let mut nearest = f32::MAX;
                for &(a, b, start) in &segments {
                    let (d, t) = distance_to_segment(p, a, b);
                    if let Some(dash) = dash {
                        let period = dash.on + dash.off;
                        let along = start + t * a.distance(b);
                        if period > 0.0 && along % period >= dash.on {
                            continue;
                        }
                    }
                    nearest = nearest.min(d);
                }
                let coverage = (half - nearest + 0.5).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    changed |= self.paint_pixel(x, y, coverage, paint, mask);
                }
            }
        }
        changed
    }

    /// Axis-aligned rectangle fill, used for placeholders and backgrounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
        let x1 = x.saturating_add(w).min(self.width());
        let y1 = y.saturating_add(h).min(self.height());
        for py in y..y1 {
            for px in x..x1 {
                self.image.put_pixel(px, py, color);
            }
        }
    }

    fn clip_bounds(&self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Option<(u32, u32, u32, u32)> {
        let w = self.width() as f32;
        let h = self.height() as f32;
        if max_x < 0.0 || max_y < 0.0 || min_x >= w || min_y >= h {
            return None;
        }
        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil() as u32).min(self.width() - 1);
        let y1 = (max_y.ceil() as u32).min(self.height() - 1);
        Some((x0, y0, x1, y1))
    }

    /// Blend `paint` into one pixel with the given coverage, scaled by the
    /// selection mask. Returns whether the pixel changed.
    pub(crate) fn paint_pixel(
        &mut self,
        x: u32,
        y: u32,
        coverage: f32,
        paint: Paint,
        mask: Option<&GrayImage>,
    ) -> bool {
        if x >= self.width() || y >= self.height() {
            return false;
        }
        let a = paint.alpha * coverage * mask_value(mask, x, y);
        if a <= 0.0 {
            return false;
        }
        let dst = self.image.get_pixel_mut(x, y);
        let before = *dst;
        *dst = match paint.op {
            CompositeOp::SourceOver => over(before, paint.color, a),
            CompositeOp::DestinationOut => {
                let remaining = before[3] as f32 * (1.0 - a);
                Rgba([before[0], before[1], before[2], remaining.round() as u8])
            }
        };
        *dst != before
    }
}

/// Straight-alpha "source over" of `src` with extra alpha factor `a`.
fn over(dst: Rgba<u8>, src: Rgba<u8>, a: f32) -> Rgba<u8> {
    let sa = a * src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Selection weight at a pixel in 0.0..=1.0; no mask means everywhere.
pub fn mask_value(mask: Option<&GrayImage>, x: u32, y: u32) -> f32 {
    match mask {
        None => 1.0,
        Some(m) => m
            .get_pixel_checked(x, y)
            .map(|p| p.0[0] as f32 / 255.0)
            .unwrap_or(0.0),
    }
}

/// Distance from `p` to segment `ab`, plus the clamped projection parameter.
fn distance_to_segment(p: Point, a: Point, b: Point) -> (f32, f32) {
    let (vx, vy) = (b.x - a.x, b.y - a.y);
    let len_sq = vx * vx + vy * vy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((p.x - a.x) * vx + (p.y - a.y) * vy) / len_sq).clamp(0.0, 1.0)
    };
    let proj = Point::new(a.x + t * vx, a.y + t * vy);
    (p.distance(proj), t)
}

/// Parse `#rrggbb` / `#rgb` (leading `#` optional) into an opaque color.
pub fn parse_hex_color(s: &str) -> Option<Rgba<u8>> {
    let hex = s.trim().trim_start_matches('#');
    let channel = |i: usize, len: usize| u8::from_str_radix(hex.get(i..i + len)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0, 2)?, channel(2, 2)?, channel(4, 2)?, 255])),
        3 => {
            let expand = |v: u8| v * 17;
            Some(Rgba([
                expand(channel(0, 1)?),
                expand(channel(1, 1)?),
                expand(channel(2, 1)?),
                255,
            ]))
        }
        _ => None,
    }
}
