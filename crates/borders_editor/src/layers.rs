use std::collections::BTreeMap;

use serde::Serialize;

use crate::geometry::{Geometry, LonLat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OverlayId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayKind {
    SplitLine,
    ParentPreview,
    CandidateParent,
    Subregions,
    Clusters,
    PointMarker,
    CrossingSegments,
    CrossingRepair,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum OverlayContent {
    Shapes(Vec<Geometry>),
    Polyline(Vec<LonLat>),
    Marker(LonLat),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub kind: OverlayKind,
    pub content: OverlayContent,
}

/// Drawing objects layered over the borders: previews, markers, candidate
/// outlines. Edit workflows own the overlays they add and remove them on
/// cancel or commit.
#[derive(Debug, Clone, Default)]
pub struct MapLayers {
    next_id: u64,
    overlays: BTreeMap<OverlayId, Overlay>,
}

impl MapLayers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: OverlayKind, content: OverlayContent) -> OverlayId {
        self.next_id = self.next_id.saturating_add(1);
        let id = OverlayId(self.next_id);
        self.overlays.insert(id, Overlay { kind, content });
        id
    }

    /// Swaps the content of a live overlay. Returns false if it was removed.
    pub fn update(&mut self, id: OverlayId, content: OverlayContent) -> bool {
        match self.overlays.get_mut(&id) {
            Some(overlay) => {
                overlay.content = content;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: OverlayId) -> Option<Overlay> {
        self.overlays.remove(&id)
    }

    /// Removes an optional overlay handle, leaving `None` behind.
    pub fn remove_slot(&mut self, slot: &mut Option<OverlayId>) {
        if let Some(id) = slot.take() {
            self.overlays.remove(&id);
        }
    }

    #[must_use]
    pub fn get(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OverlayId, &Overlay)> {
        self.overlays.iter().map(|(id, overlay)| (*id, overlay))
    }

    #[must_use]
    pub fn count_of(&self, kind: OverlayKind) -> usize {
        self.overlays
            .values()
            .filter(|overlay| overlay.kind == kind)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }
}
