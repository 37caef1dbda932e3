//! Fixed geometry for command-line framing
//!
//! The CLI has no document; the outline to trace is a rectangle given on
//! the command line.

use async_trait::async_trait;
use beamctl_framing::{BoundingBox, Element, GeometrySource, Layer, Point};

/// One rectangle on a single visible layer
#[derive(Debug, Clone, PartialEq)]
pub struct StaticDocument {
    bbox: BoundingBox,
}

impl StaticDocument {
    /// Rectangle spanned by two opposite corners, in any order
    pub fn rectangle(a: Point, b: Point) -> Self {
        Self {
            bbox: BoundingBox::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bbox
    }
}

#[async_trait]
impl GeometrySource for StaticDocument {
    async fn layers(&self) -> Vec<Layer> {
        vec![Layer {
            name: "Frame".to_string(),
            visible: true,
            repeat: 1,
            elements: vec![Element::shape(self.bbox)],
        }]
    }

    async fn silhouette(&self) -> Vec<Point> {
        self.bbox.outline()
    }

    async fn last_job_bounds(&self) -> Option<BoundingBox> {
        Some(self.bbox)
    }

    async fn contour(&self) -> Vec<Point> {
        self.bbox.outline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamctl_framing::{compute_polygon, FramingKind, PolygonContext};

    #[tokio::test]
    async fn test_rectangle_frames_and_hulls() {
        let doc = StaticDocument::rectangle(Point::new(50.0, 40.0), Point::new(10.0, 5.0));
        assert_eq!(doc.bounds(), BoundingBox::new(10.0, 5.0, 50.0, 40.0));

        let ctx = PolygonContext {
            workarea_width: 400.0,
            workarea_height: 375.0,
            job_origin: None,
            rotary_y: None,
        };
        let framing = compute_polygon(FramingKind::Framing, &doc, &ctx).await;
        assert_eq!(framing.points, doc.bounds().outline());

        let hull = compute_polygon(FramingKind::Hull, &doc, &ctx).await;
        assert_eq!(hull.points.len(), 5);
        assert!(!hull.is_out_of_bounds);
    }
}
