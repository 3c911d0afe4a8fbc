use image::GrayImage;
use std::f32::consts::PI;

use crate::buffer::{Dash, Paint, PixelBuffer, Point};

/// Dash pattern for the rubber-band preview.
pub const PREVIEW_DASH: Dash = Dash { on: 6.0, off: 4.0 };
/// Alpha of the rubber-band preview.
pub const PREVIEW_ALPHA: f32 = 0.5;

const ARROW_HEAD_ANGLE: f32 = PI / 6.0;
const MIN_ARROW_HEAD: f32 = 15.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Line,
    Arrow,
    Triangle,
}

/// One stroked path of a shape outline.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    pub points: Vec<Point>,
    pub closed: bool,
}

/// Outline of a shape dragged from `start` to `end`.
pub fn outline(kind: ShapeKind, start: Point, end: Point, brush_size: f32) -> Vec<Path> {
    match kind {
        ShapeKind::Rectangle => vec![Path {
            points: vec![
                start,
                Point::new(end.x, start.y),
                end,
                Point::new(start.x, end.y),
            ],
            closed: true,
        }],
        ShapeKind::Circle => {
            let center = Point::new((start.x + end.x) / 2.0, (start.y + end.y) / 2.0);
            let radius = start.distance(end) / 2.0;
            let steps = ((2.0 * PI * radius / 3.0).ceil() as usize).clamp(24, 720);
            let points = (0..steps)
                .map(|i| {
                    let a = i as f32 / steps as f32 * 2.0 * PI;
                    Point::new(center.x + radius * a.cos(), center.y + radius * a.sin())
                })
                .collect();
            vec![Path {
                points,
                closed: true,
            }]
        }
        ShapeKind::Line => vec![Path {
            points: vec![start, end],
            closed: false,
        }],
        ShapeKind::Arrow => {
            let angle = (end.y - start.y).atan2(end.x - start.x);
            let head = MIN_ARROW_HEAD.max(brush_size * 2.0);
            let barb = |offset: f32| {
                Point::new(
                    end.x - head * (angle + offset).cos(),
                    end.y - head * (angle + offset).sin(),
                )
            };
            vec![
                Path {
                    points: vec![start, end],
                    closed: false,
                },
                Path {
                    points: vec![barb(-ARROW_HEAD_ANGLE), end, barb(ARROW_HEAD_ANGLE)],
                    closed: false,
                },
            ]
        }
        ShapeKind::Triangle => {
            let (min_x, max_x) = (start.x.min(end.x), start.x.max(end.x));
            let (min_y, max_y) = (start.y.min(end.y), start.y.max(end.y));
            vec![Path {
                points: vec![
                    Point::new((min_x + max_x) / 2.0, min_y),
                    Point::new(min_x, max_y),
                    Point::new(max_x, max_y),
                ],
                closed: true,
            }]
        }
    }
}

/// Stroke every path of an outline into `buffer`.
pub fn draw(
    buffer: &mut PixelBuffer,
    paths: &[Path],
    line_width: f32,
    paint: Paint,
    dash: Option<Dash>,
    mask: Option<&GrayImage>,
) -> bool {
    let mut changed = false;
    for path in paths {
        changed |= buffer.stroke_polyline(&path.points, path.closed, line_width, paint, dash, mask);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_triangle_uses_bounding_box_points() {
        let paths = outline(ShapeKind::Triangle, Point::new(40.0, 30.0), Point::new(10.0, 0.0), 2.0);
        assert_eq!(
            paths[0].points,
            vec![Point::new(25.0, 0.0), Point::new(10.0, 30.0), Point::new(40.0, 30.0)]
        );
        assert!(paths[0].closed);
    }

    #[test]
    fn test_circle_radius_is_half_the_diagonal() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(30.0, 40.0);
        let paths = outline(ShapeKind::Circle, start, end, 1.0);
        let center = Point::new(15.0, 20.0);
        for p in &paths[0].points {
            assert!((p.distance(center) - 25.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_arrow_head_barbs_at_thirty_degrees() {
        let paths = outline(ShapeKind::Arrow, Point::new(0.0, 0.0), Point::new(100.0, 0.0), 1.0);
        assert_eq!(paths.len(), 2);
        let head = &paths[1].points;
        let left = head[0];
        let right = head[2];
        assert!((left.x - (100.0 - 15.0 * (PI / 6.0).cos())).abs() < 1e-3);
        assert!((left.y + right.y).abs() < 1e-3);
        assert!((left.y.abs() - 7.5).abs() < 1e-3);
    }

    #[test]
    fn test_rectangle_outline_leaves_interior_empty() {
        let mut buf = PixelBuffer::new(40, 40).unwrap();
        let paths = outline(ShapeKind::Rectangle, Point::new(5.0, 5.0), Point::new(35.0, 35.0), 2.0);
        assert!(draw(&mut buf, &paths, 2.0, Paint::solid(Rgba([0, 0, 0, 255])), None, None));
        assert_eq!(buf.pixel(20, 20).unwrap()[3], 0);
        assert_eq!(buf.pixel(20, 5).unwrap()[3], 255);
    }
}
