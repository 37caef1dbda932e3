//! Planar geometry in millimetres

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, `min` inclusive and `max` inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Box with its origin at `(x, y)`
    pub fn from_origin(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0.0 && self.height() == 0.0
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Whether the box lies entirely outside `0..=width` × `0..=height`
    pub fn is_outside(&self, width: f64, height: f64) -> bool {
        self.max_x < 0.0 || self.max_y < 0.0 || self.min_x > width || self.min_y > height
    }

    /// Clamp to `0..=width` × `0..=height`
    pub fn clip(&self, width: f64, height: f64) -> BoundingBox {
        BoundingBox::new(
            self.min_x.max(0.0),
            self.min_y.max(0.0),
            self.max_x.min(width),
            self.max_y.min(height),
        )
    }

    pub fn translate(&self, dx: f64, dy: f64) -> BoundingBox {
        BoundingBox::new(self.min_x + dx, self.min_y + dy, self.max_x + dx, self.max_y + dy)
    }

    /// Closed outline: min corner, then counter-clockwise in screen axes
    pub fn outline(&self) -> Vec<Point> {
        vec![
            Point::new(self.min_x, self.min_y),
            Point::new(self.max_x, self.min_y),
            Point::new(self.max_x, self.max_y),
            Point::new(self.min_x, self.max_y),
            Point::new(self.min_x, self.min_y),
        ]
    }
}

/// Bounding box of a point set, `None` when empty
pub fn bounds_of(points: &[Point]) -> Option<BoundingBox> {
    let first = points.first()?;
    let init = BoundingBox::new(first.x, first.y, first.x, first.y);
    Some(points.iter().fold(init, |acc, p| {
        acc.union(&BoundingBox::new(p.x, p.y, p.x, p.y))
    }))
}

fn cross(o: &Point, a: &Point, b: &Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull by Andrew's monotone chain
///
/// Returns the hull vertices without repeating the first one. Collinear
/// points on the hull edges are dropped.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut sorted: Vec<Point> = points
        .iter()
        .copied()
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .collect();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut lower: Vec<Point> = Vec::with_capacity(sorted.len());
    for p in &sorted {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point> = Vec::with_capacity(sorted.len());
    for p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Repeat the first point at the end if it is not already there
pub fn close(mut points: Vec<Point>) -> Vec<Point> {
    if let (Some(first), Some(last)) = (points.first().copied(), points.last()) {
        if *last != first {
            points.push(first);
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_clip() {
        let a = BoundingBox::from_origin(10.0, 10.0, 40.0, 40.0);
        let b = BoundingBox::from_origin(20.0, 5.0, 10.0, 10.0);
        let merged = a.union(&b);
        assert_eq!(merged, BoundingBox::new(10.0, 5.0, 50.0, 50.0));

        let clipped = BoundingBox::new(-5.0, -1.0, 320.0, 100.0).clip(300.0, 200.0);
        assert_eq!(clipped, BoundingBox::new(0.0, 0.0, 300.0, 100.0));
        assert!(BoundingBox::new(301.0, 0.0, 310.0, 5.0).is_outside(300.0, 200.0));
    }

    #[test]
    fn test_convex_hull_drops_interior_points() {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 5.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(5.0, 0.0),
            Point::new(0.0, 0.0),
        ];
        let hull = convex_hull(&points);
        assert_eq!(
            hull,
            vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ]
        );
    }

    #[test]
    fn test_degenerate_hulls() {
        assert!(convex_hull(&[]).is_empty());
        assert_eq!(convex_hull(&[Point::new(1.0, 1.0)]).len(), 1);
        let line = convex_hull(&[Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)]);
        assert_eq!(line, vec![Point::new(0.0, 0.0), Point::new(2.0, 2.0)]);
    }

    #[test]
    fn test_close() {
        let closed = close(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]);
        assert_eq!(closed.len(), 3);
        assert_eq!(close(closed.clone()), closed);
        assert!(close(Vec::new()).is_empty());
    }
}
