use rstar::{AABB, Envelope};

use crate::domain::position::{Position, ViewportBounds};

/// Viewport rectangle grown outward by a fraction of each axis extent.
///
/// Edges are taken as given: a viewport whose south edge lies above its north
/// edge, or whose west edge lies east of its east edge, contains nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedViewport {
    envelope: Option<AABB<[f64; 2]>>, // [latitude, longitude]
}

impl PaddedViewport {
    pub fn new(bounds: &ViewportBounds, padding: f64) -> Self {
        let lat_pad = (bounds.north - bounds.south) * padding;
        let lng_pad = (bounds.east - bounds.west) * padding;
        let lower = [bounds.south - lat_pad, bounds.west - lng_pad];
        let upper = [bounds.north + lat_pad, bounds.east + lng_pad];

        // from_corners would reorder inverted edges into a valid box
        let envelope = (lower[0] <= upper[0] && lower[1] <= upper[1])
            .then(|| AABB::from_corners(lower, upper));
        Self { envelope }
    }

    pub fn contains(&self, position: &Position) -> bool {
        self.envelope.as_ref().is_some_and(|envelope| {
            envelope.contains_point(&[position.latitude, position.longitude])
        })
    }

    pub fn is_empty(&self) -> bool {
        self.envelope.is_none()
    }
}

/// Whether `position` lies inside the padded viewport. Without bounds every
/// position counts as visible.
pub fn classify(position: &Position, bounds: Option<&ViewportBounds>, padding: f64) -> bool {
    match bounds {
        Some(bounds) => PaddedViewport::new(bounds, padding).contains(position),
        None => true,
    }
}

/// Split positions into (inside, outside) the padded viewport, keeping the
/// input order within each side.
pub fn partition(
    positions: &[Position],
    bounds: Option<&ViewportBounds>,
    padding: f64,
) -> (Vec<Position>, Vec<Position>) {
    let Some(bounds) = bounds else {
        return (positions.to_vec(), Vec::new());
    };

    let viewport = PaddedViewport::new(bounds, padding);
    positions
        .iter()
        .cloned()
        .partition(|position| viewport.contains(position))
}
