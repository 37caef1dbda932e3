//! Target polygons
//!
//! Computes the outline a framing run traces, from document geometry
//! supplied by a [`GeometrySource`]. Computation never fails: missing
//! content yields an empty polygon and the caller reports "add content
//! first".
//!
//! Polygons are cached per kind. The cache is keyed by work area and is
//! dropped explicitly or when the work area changes; documents with
//! variable text bypass it.

use crate::geometry::{self, BoundingBox, Point};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What a framing run traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingKind {
    /// Bounding box of the visible content
    Framing,
    /// Bounding box traced with the rotary engaged
    RotateFraming,
    /// Convex hull of the rendered content
    Hull,
    /// Bounds of the last job sent to the device
    AreaCheck,
    /// Line along the rotary axis
    RotateAxis,
    /// Contour outline of the content
    Contour,
}

impl fmt::Display for FramingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramingKind::Framing => "framing",
            FramingKind::RotateFraming => "rotate framing",
            FramingKind::Hull => "hull",
            FramingKind::AreaCheck => "area check",
            FramingKind::RotateAxis => "rotate axis",
            FramingKind::Contour => "contour",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for FramingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "framing" => Ok(FramingKind::Framing),
            "rotate_framing" => Ok(FramingKind::RotateFraming),
            "hull" => Ok(FramingKind::Hull),
            "area_check" | "areacheck" => Ok(FramingKind::AreaCheck),
            "rotate_axis" => Ok(FramingKind::RotateAxis),
            "contour" => Ok(FramingKind::Contour),
            other => Err(format!("unknown framing kind: {}", other)),
        }
    }
}

/// Drawable element of a layer
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Bounds in mm
    pub bbox: BoundingBox,
    /// Whether the element is a group
    pub is_group: bool,
}

impl Element {
    pub fn shape(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            is_group: false,
        }
    }
}

/// Document layer
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    /// Number of passes; 0 excludes the layer from the job
    pub repeat: u32,
    pub elements: Vec<Element>,
}

/// Document geometry consumed by polygon computation
#[async_trait]
pub trait GeometrySource: Send + Sync {
    /// Layers with their element bounds in mm
    async fn layers(&self) -> Vec<Layer>;

    /// Sample points of the rendered content in mm
    async fn silhouette(&self) -> Vec<Point>;

    /// Convex hull of the rendered content
    async fn convex_hull(&self) -> Vec<Point> {
        geometry::convex_hull(&self.silhouette().await)
    }

    /// Bounds reported for the last job sent to the device
    async fn last_job_bounds(&self) -> Option<BoundingBox>;

    /// Contour outline in mm
    async fn contour(&self) -> Vec<Point> {
        Vec::new()
    }

    /// Whether the document contains text that changes between renders
    fn has_variable_text(&self) -> bool {
        false
    }

    /// Firmware-ready task for galvo framing
    async fn task_blob(&self) -> Option<String> {
        None
    }
}

/// Closed outline to trace
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPolygon {
    pub kind: FramingKind,
    /// Points in mm; first point repeated last
    pub points: Vec<Point>,
    /// Some geometry lies below the work area zero line
    pub is_out_of_bounds: bool,
}

impl TargetPolygon {
    pub fn empty(kind: FramingKind) -> Self {
        Self {
            kind,
            points: Vec::new(),
            is_out_of_bounds: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// At least two distinct points to move between
    pub fn is_traceable(&self) -> bool {
        match self.points.split_first() {
            Some((first, rest)) => rest.iter().any(|p| p != first),
            None => false,
        }
    }

    /// Copy with every point moved inside `y >= 0`
    pub fn clamped(&self) -> TargetPolygon {
        TargetPolygon {
            kind: self.kind,
            points: self
                .points
                .iter()
                .map(|p| Point::new(p.x, p.y.max(0.0)))
                .collect(),
            is_out_of_bounds: false,
        }
    }
}

/// Inputs of a polygon computation besides the document
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonContext {
    pub workarea_width: f64,
    pub workarea_height: f64,
    /// Job origin offset applied to last-job bounds
    pub job_origin: Option<Point>,
    /// Y of the rotary axis
    pub rotary_y: Option<f64>,
}

/// Bounding box of visible, non-empty content clipped to the work area
pub fn content_bounds(layers: &[Layer], width: f64, height: f64) -> Option<BoundingBox> {
    layers
        .iter()
        .filter(|layer| layer.visible && layer.repeat > 0)
        .flat_map(|layer| layer.elements.iter())
        .filter(|el| !el.bbox.is_outside(width, height))
        .filter(|el| !(el.is_group && el.bbox.is_empty()))
        .map(|el| el.bbox)
        .reduce(|acc, b| acc.union(&b))
        .map(|b| b.clip(width, height))
}

/// Compute the polygon of `kind`
pub async fn compute_polygon(
    kind: FramingKind,
    source: &dyn GeometrySource,
    ctx: &PolygonContext,
) -> TargetPolygon {
    let mut polygon = TargetPolygon::empty(kind);
    match kind {
        FramingKind::Framing | FramingKind::RotateFraming => {
            let layers = source.layers().await;
            if let Some(bounds) = content_bounds(&layers, ctx.workarea_width, ctx.workarea_height) {
                polygon.points = bounds.outline();
            }
        }
        FramingKind::Hull => {
            let hull = source.convex_hull().await;
            if !hull.is_empty() {
                polygon.is_out_of_bounds = hull.iter().any(|p| p.y < 0.0);
                polygon.points = geometry::close(hull);
            }
        }
        FramingKind::AreaCheck => {
            if let Some(bounds) = source.last_job_bounds().await {
                let origin = ctx.job_origin.unwrap_or_default();
                polygon.points = bounds.translate(origin.x, origin.y).outline();
            }
        }
        FramingKind::RotateAxis => {
            if let Some(y) = ctx.rotary_y {
                let w = ctx.workarea_width;
                polygon.points = vec![
                    Point::new(0.0, y),
                    Point::new(w, y),
                    Point::new(w, y),
                    Point::new(0.0, y),
                    Point::new(0.0, y),
                ];
            }
        }
        FramingKind::Contour => {
            let contour = source.contour().await;
            if !contour.is_empty() {
                polygon.is_out_of_bounds = contour.iter().any(|p| p.y < 0.0);
                polygon.points = geometry::close(contour);
            }
        }
    }
    tracing::debug!("Computed {} polygon with {} points", kind, polygon.points.len());
    polygon
}

/// Per-kind polygon cache
#[derive(Debug, Default)]
pub struct PolygonCache {
    workarea: Option<(f64, f64)>,
    entries: HashMap<FramingKind, TargetPolygon>,
}

impl PolygonCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached polygon, if computed for the same work area
    pub fn get(&self, kind: FramingKind, ctx: &PolygonContext) -> Option<TargetPolygon> {
        if self.workarea != Some((ctx.workarea_width, ctx.workarea_height)) {
            return None;
        }
        self.entries.get(&kind).cloned()
    }

    /// Store a non-empty polygon; a work area change drops older entries
    pub fn insert(&mut self, polygon: TargetPolygon, ctx: &PolygonContext) {
        if polygon.is_empty() {
            return;
        }
        let key = (ctx.workarea_width, ctx.workarea_height);
        if self.workarea != Some(key) {
            self.entries.clear();
            self.workarea = Some(key);
        }
        self.entries.insert(polygon.kind, polygon);
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.workarea = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
