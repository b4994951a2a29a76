use crate::geometry::Point2D;
use serde::Serialize;

pub type LaneId = u32;

const EDGE_EPSILON: f64 = 1e-9;

/// A lane region in image pixel space
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lane {
    pub id: LaneId,
    pub name: String,
    pub polygon: Vec<Point2D>,
}

impl Lane {
    pub fn new(id: LaneId, name: impl Into<String>, polygon: Vec<Point2D>) -> Self {
        Self {
            id,
            name: name.into(),
            polygon,
        }
    }

    /// Boundary-inclusive containment test
    ///
    /// Points on an edge or vertex count as inside. Everything else goes
    /// through crossing-number ray casting.
    pub fn contains(&self, point: Point2D) -> bool {
        let n = self.polygon.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.polygon[i];
            let b = self.polygon[j];
            if on_segment(point, a, b) {
                return true;
            }
            if (a.y > point.y) != (b.y > point.y) {
                let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if point.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

fn on_segment(p: Point2D, a: Point2D, b: Point2D) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let scale = (b.x - a.x).abs().max((b.y - a.y).abs()).max(1.0);
    if cross.abs() > EDGE_EPSILON * scale {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

/// Returns the id of the first lane, in configured order, whose polygon contains the point
pub fn assign(point: Point2D, lanes: &[Lane]) -> Option<LaneId> {
    lanes.iter().find(|lane| lane.contains(point)).map(|lane| lane.id)
}

/// Like [`assign`], falling back to the vertical band the point's x falls in.
///
/// The band count is the number of configured lanes, or `auto_lane_count`
/// when none are configured. The result is the 1-based band index.
pub fn assign_with_fallback(
    point: Point2D,
    lanes: &[Lane],
    frame_width: f64,
    auto_lane_count: usize,
) -> LaneId {
    if let Some(id) = assign(point, lanes) {
        return id;
    }
    let count = if lanes.is_empty() {
        auto_lane_count
    } else {
        lanes.len()
    };
    band_index(point.x, frame_width, count)
}

/// Canonical vertical partition: band `k` (1-based) covers
/// `[(k-1) * w/n, k * w/n)`, and out-of-frame x clamps to the edge bands.
pub fn band_index(x: f64, frame_width: f64, count: usize) -> LaneId {
    let count = count.max(1);
    if frame_width <= 0.0 || !x.is_finite() {
        return 1;
    }
    let step = frame_width / count as f64;
    let band = (x / step).floor() + 1.0;
    band.clamp(1.0, count as f64) as LaneId
}

/// Splits the frame into `n` equal-width full-height lanes, ids `1..=n`
///
/// Band edges are the same ones [`band_index`] uses.
pub fn auto_split(frame_width: f64, frame_height: f64, n: usize) -> Vec<Lane> {
    let n = n.max(1);
    let step = frame_width / n as f64;
    let bottom = (frame_height - 1.0).max(0.0);
    (0..n)
        .map(|i| {
            let x0 = i as f64 * step;
            let x1 = (i + 1) as f64 * step;
            let id = (i + 1) as LaneId;
            Lane::new(
                id,
                format!("Lane {id}"),
                vec![
                    Point2D::new(x0, bottom),
                    Point2D::new(x1, bottom),
                    Point2D::new(x1, 0.0),
                    Point2D::new(x0, 0.0),
                ],
            )
        })
        .collect()
}
