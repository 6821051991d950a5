use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{ApiRequest, SmallRing};
use crate::command::Purpose;
use crate::entity::SimplificationLevel;
use crate::geometry::{BBox, Geometry};

/// Visible map area and zoom after a pan or zoom settled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub bbox: BBox,
    pub zoom: f64,
}

impl Viewport {
    #[must_use]
    pub fn simplification(&self) -> SimplificationLevel {
        SimplificationLevel::for_zoom(self.zoom)
    }
}

/// Drives border fetches from viewport settles.
///
/// Every settle or refresh starts a new generation; a response is applied
/// only if it was issued for the current generation, so a slow response for
/// an old viewport can never overwrite a newer one.
#[derive(Debug, Clone, Default)]
pub struct ViewportSync {
    current: Option<Viewport>,
    generation: u64,
    min_fetch_zoom: f64,
    small_markers_enabled: bool,
    small_markers: Vec<SmallRing>,
    legacy_table: Option<String>,
    legacy_enabled: bool,
    legacy_borders: Vec<Geometry>,
}

impl ViewportSync {
    #[must_use]
    pub fn new(min_fetch_zoom: f64) -> Self {
        Self {
            min_fetch_zoom,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.current
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Records a settle and plans the fetches for it.
    pub fn settle(&mut self, viewport: Viewport) -> Vec<(Purpose, ApiRequest)> {
        self.current = Some(viewport);
        self.refresh()
    }

    /// Re-plans the fetches for the current viewport under a new generation.
    /// Nothing is planned before the first settle.
    pub fn refresh(&mut self) -> Vec<(Purpose, ApiRequest)> {
        self.generation = self.generation.saturating_add(1);
        self.small_markers.clear();
        let Some(viewport) = self.current else {
            return Vec::new();
        };
        if viewport.zoom < self.min_fetch_zoom {
            debug!(
                target: "borders.viewport",
                zoom = viewport.zoom,
                min_zoom = self.min_fetch_zoom,
                "zoom below fetch floor"
            );
            return Vec::new();
        }

        let generation = self.generation;
        let simplify = viewport.simplification();
        let mut plan = vec![(
            Purpose::Borders { generation },
            ApiRequest::Bbox {
                bbox: viewport.bbox,
                simplify,
                table: None,
            },
        )];
        if self.small_markers_enabled {
            plan.push((
                Purpose::SmallMarkers { generation },
                ApiRequest::Small {
                    bbox: viewport.bbox,
                },
            ));
        }
        if self.legacy_enabled
            && let Some(table) = &self.legacy_table
        {
            plan.push((
                Purpose::LegacyBorders { generation },
                ApiRequest::Bbox {
                    bbox: viewport.bbox,
                    simplify,
                    table: Some(table.clone()),
                },
            ));
        }
        debug!(
            target: "borders.viewport",
            generation,
            bbox = %viewport.bbox,
            zoom = viewport.zoom,
            simplify = simplify.as_param(),
            requests = plan.len(),
            "planned viewport fetch"
        );
        plan
    }

    /// Too-small markers follow the topology filter.
    pub fn set_small_markers_enabled(&mut self, enabled: bool) {
        self.small_markers_enabled = enabled;
        if !enabled {
            self.small_markers.clear();
        }
    }

    #[must_use]
    pub fn small_markers_enabled(&self) -> bool {
        self.small_markers_enabled
    }

    /// Returns false when the markers are stale or the layer is off.
    pub fn accept_small_markers(&mut self, generation: u64, rings: Vec<SmallRing>) -> bool {
        if !self.is_current(generation) || !self.small_markers_enabled {
            return false;
        }
        self.small_markers = rings;
        true
    }

    #[must_use]
    pub fn small_markers(&self) -> &[SmallRing] {
        &self.small_markers
    }

    pub fn set_legacy_table(&mut self, table: Option<String>) {
        if table.is_none() {
            self.legacy_enabled = false;
            self.legacy_borders.clear();
        }
        self.legacy_table = table;
    }

    #[must_use]
    pub fn legacy_table(&self) -> Option<&str> {
        self.legacy_table.as_deref()
    }

    /// Returns false when no legacy table is known.
    pub fn set_legacy_enabled(&mut self, enabled: bool) -> bool {
        if enabled && self.legacy_table.is_none() {
            return false;
        }
        self.legacy_enabled = enabled;
        if !enabled {
            self.legacy_borders.clear();
        }
        true
    }

    #[must_use]
    pub fn legacy_enabled(&self) -> bool {
        self.legacy_enabled
    }

    pub fn accept_legacy_borders(&mut self, generation: u64, borders: Vec<Geometry>) -> bool {
        if !self.is_current(generation) || !self.legacy_enabled {
            return false;
        }
        self.legacy_borders = borders;
        true
    }

    #[must_use]
    pub fn legacy_borders(&self) -> &[Geometry] {
        &self.legacy_borders
    }
}

#[cfg(test)]
mod tests {
    use super::{Viewport, ViewportSync};
    use crate::api::{ApiRequest, SmallRing};
    use crate::command::Purpose;
    use crate::entity::{BorderId, SimplificationLevel};
    use crate::geometry::BBox;

    fn viewport(zoom: f64) -> Viewport {
        Viewport {
            bbox: BBox::new(10.0, 50.0, 11.0, 51.0).expect("bbox"),
            zoom,
        }
    }

    fn ring() -> SmallRing {
        SmallRing {
            id: BorderId(3),
            name: None,
            lat: 50.5,
            lon: 10.5,
            area: 1.0,
        }
    }

    #[test]
    fn simplification_coarsens_as_zoom_drops() {
        assert_eq!(viewport(5.0).simplification(), SimplificationLevel::Coarse);
        assert_eq!(viewport(7.0).simplification(), SimplificationLevel::Medium);
        assert_eq!(viewport(10.9).simplification(), SimplificationLevel::Medium);
        assert_eq!(viewport(11.0).simplification(), SimplificationLevel::Full);
    }

    #[test]
    fn every_settle_starts_a_new_generation() {
        let mut sync = ViewportSync::new(0.0);
        assert!(sync.refresh().is_empty());

        let first = sync.settle(viewport(12.0));
        let second = sync.settle(viewport(6.0));
        let Purpose::Borders { generation: old } = first[0].0 else {
            panic!("expected borders fetch");
        };
        assert!(!sync.is_current(old));
        assert!(matches!(
            second[0].1,
            ApiRequest::Bbox {
                simplify: SimplificationLevel::Coarse,
                table: None,
                ..
            }
        ));
    }

    #[test]
    fn small_markers_only_fetched_while_enabled_and_cleared_per_settle() {
        let mut sync = ViewportSync::new(0.0);
        assert_eq!(sync.settle(viewport(9.0)).len(), 1);

        sync.set_small_markers_enabled(true);
        let plan = sync.settle(viewport(9.0));
        assert_eq!(plan.len(), 2);
        let Purpose::SmallMarkers { generation } = plan[1].0 else {
            panic!("expected small marker fetch");
        };
        assert!(sync.accept_small_markers(generation, vec![ring()]));
        assert_eq!(sync.small_markers().len(), 1);

        sync.settle(viewport(9.0));
        assert!(sync.small_markers().is_empty());
        assert!(!sync.accept_small_markers(generation, vec![ring()]));
    }

    #[test]
    fn legacy_overlay_needs_a_table() {
        let mut sync = ViewportSync::new(0.0);
        assert!(!sync.set_legacy_enabled(true));

        sync.set_legacy_table(Some("borders_2019".to_string()));
        assert!(sync.set_legacy_enabled(true));
        let plan = sync.settle(viewport(12.0));
        assert!(plan.iter().any(|(purpose, request)| matches!(
            (purpose, request),
            (Purpose::LegacyBorders { .. }, ApiRequest::Bbox { table: Some(table), .. })
                if table == "borders_2019"
        )));
    }

    #[test]
    fn zoom_floor_skips_fetches() {
        let mut sync = ViewportSync::new(4.0);
        assert!(sync.settle(viewport(3.0)).is_empty());
        assert_eq!(sync.settle(viewport(4.0)).len(), 1);
    }
}
