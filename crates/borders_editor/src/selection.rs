use serde::Serialize;

use crate::cache::BorderCache;
use crate::entity::{BorderEntity, BorderId};

/// What the operator clicked on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Border(BorderId),
    /// A too-small marker pinned to its region; resolves to the region.
    SmallMarker { region: BorderId },
    Empty,
}

impl ClickTarget {
    #[must_use]
    pub fn resolve(self) -> Option<BorderId> {
        match self {
            Self::Border(id) | Self::SmallMarker { region: id } => Some(id),
            Self::Empty => None,
        }
    }
}

/// Attributes of the selected border, as shown in the side panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BorderDetails {
    pub id: BorderId,
    pub name: String,
    pub admin_level: Option<u8>,
    pub parent: String,
    pub node_size_mb: i64,
    pub estimated_size_mb: Option<i64>,
    pub node_count_thousands: i64,
    pub point_count: Option<u64>,
    pub area_km2: f64,
    pub modified: Option<String>,
    pub comment: String,
    pub disabled: bool,
}

impl BorderDetails {
    #[must_use]
    pub fn from_entity(entity: &BorderEntity, bytes_per_node: i64) -> Self {
        let node_bytes = entity.estimated_node_bytes(bytes_per_node) as f64;
        Self {
            id: entity.id,
            name: entity.name.clone(),
            admin_level: entity.admin_level,
            parent: entity.parent_label(false),
            node_size_mb: (node_bytes / 1024.0 / 1024.0).round() as i64,
            estimated_size_mb: entity
                .estimated_output_size
                .map(|kb| (kb / 1024.0).round() as i64),
            node_count_thousands: entity.node_count_thousands,
            point_count: entity.point_count,
            area_km2: entity.area / 1_000_000.0,
            modified: entity.modified.clone(),
            comment: entity.comment.clone(),
            disabled: entity.disabled,
        }
    }

    /// `(4)` for leveled regions, empty otherwise.
    #[must_use]
    pub fn admin_level_label(&self) -> String {
        self.admin_level
            .map(|level| format!("({level})"))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionController {
    selected: Option<BorderId>,
}

impl SelectionController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn selected(&self) -> Option<BorderId> {
        self.selected
    }

    /// Moves the single selection to `target`. An id the cache does not hold
    /// clears the selection.
    pub fn select(
        &mut self,
        target: Option<BorderId>,
        cache: &mut BorderCache,
        bytes_per_node: i64,
    ) -> Option<BorderDetails> {
        if let Some(previous) = self.selected.take() {
            cache.set_selected(previous, false);
        }
        let id = target.filter(|id| cache.contains(*id))?;
        cache.set_selected(id, true);
        self.selected = Some(id);
        cache
            .entity(id)
            .map(|entity| BorderDetails::from_entity(entity, bytes_per_node))
    }

    /// Re-applies selection styling after a reconcile, or clears the
    /// selection when the border is gone.
    pub fn reselect(
        &mut self,
        cache: &mut BorderCache,
        bytes_per_node: i64,
    ) -> Option<BorderDetails> {
        self.select(self.selected, cache, bytes_per_node)
    }

    /// Forgets the selection without touching styles, for a cleared cache.
    pub fn forget(&mut self) {
        self.selected = None;
    }
}
