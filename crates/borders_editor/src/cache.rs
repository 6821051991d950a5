use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::classify::{ColorToken, FilterMode, Thresholds, classify};
use crate::entity::{BorderEntity, BorderId};

pub const SELECTED_STROKE: &str = "#ff3";

/// Stroke and fill the render layer applies to a border's drawing object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayStyle {
    pub stroke: &'static str,
    pub fill_opacity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedBorder {
    pub entity: BorderEntity,
    pub color: ColorToken,
    pub selected: bool,
    style_dirty: bool,
}

impl CachedBorder {
    fn new(entity: BorderEntity, mode: FilterMode, thresholds: &Thresholds) -> Self {
        let color = classify(&entity, mode, thresholds);
        Self {
            entity,
            color,
            selected: false,
            style_dirty: true,
        }
    }

    #[must_use]
    pub fn style(&self) -> DisplayStyle {
        let (stroke, fill_opacity) = if self.selected {
            (SELECTED_STROKE, 0.75)
        } else {
            (self.color.css(), 0.1)
        };
        DisplayStyle {
            stroke,
            fill_opacity: if self.entity.disabled {
                0.01
            } else {
                fill_opacity
            },
        }
    }

    #[must_use]
    pub fn needs_style_refresh(&self) -> bool {
        self.style_dirty
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Every held border, fetch order first, a retained protected border last.
    pub render: Vec<BorderId>,
    pub removed: Vec<BorderId>,
    pub upserted: usize,
    pub protected_kept: Option<BorderId>,
}

/// Local copy of the server's borders for the current viewport.
#[derive(Debug, Clone, Default)]
pub struct BorderCache {
    entries: BTreeMap<BorderId, CachedBorder>,
}

impl BorderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held set with `fetched`. The `protected` border is never
    /// evicted or overwritten, whether or not the fetch returned it.
    pub fn reconcile(
        &mut self,
        fetched: Vec<BorderEntity>,
        protected: Option<BorderId>,
        mode: FilterMode,
        thresholds: &Thresholds,
    ) -> ReconcileReport {
        let fetched_ids: BTreeSet<BorderId> = fetched.iter().map(|entity| entity.id).collect();
        let held_protected = protected.filter(|id| self.entries.contains_key(id));

        let removed: Vec<BorderId> = self
            .entries
            .keys()
            .copied()
            .filter(|id| !fetched_ids.contains(id) && Some(*id) != held_protected)
            .collect();
        for id in &removed {
            self.entries.remove(id);
        }

        let mut render = Vec::with_capacity(fetched.len() + 1);
        let mut upserted = 0;
        for entity in fetched {
            let id = entity.id;
            if render.contains(&id) {
                continue;
            }
            render.push(id);
            if Some(id) == held_protected {
                continue;
            }
            self.entries
                .insert(id, CachedBorder::new(entity, mode, thresholds));
            upserted += 1;
        }
        if let Some(id) = held_protected
            && !render.contains(&id)
        {
            render.push(id);
        }

        debug!(
            target: "borders.cache",
            held = self.entries.len(),
            removed = removed.len(),
            upserted,
            protected = ?held_protected,
            "reconciled viewport fetch"
        );

        ReconcileReport {
            render,
            removed,
            upserted,
            protected_kept: held_protected,
        }
    }

    #[must_use]
    pub fn get(&self, id: BorderId) -> Option<&CachedBorder> {
        self.entries.get(&id)
    }

    #[must_use]
    pub fn entity(&self, id: BorderId) -> Option<&BorderEntity> {
        self.entries.get(&id).map(|cached| &cached.entity)
    }

    #[must_use]
    pub fn contains(&self, id: BorderId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachedBorder> {
        self.entries.values()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<BorderId> {
        self.entries.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recomputes every color for a new filter or threshold set.
    pub fn recolor(&mut self, mode: FilterMode, thresholds: &Thresholds) {
        for cached in self.entries.values_mut() {
            let color = classify(&cached.entity, mode, thresholds);
            if color != cached.color {
                cached.color = color;
                cached.style_dirty = true;
            }
        }
    }

    /// Returns false when the border is not held.
    pub fn set_selected(&mut self, id: BorderId, selected: bool) -> bool {
        match self.entries.get_mut(&id) {
            Some(cached) => {
                if cached.selected != selected {
                    cached.selected = selected;
                    cached.style_dirty = true;
                }
                true
            }
            None => false,
        }
    }

    /// Borders whose drawing objects need restyling, clearing the marks.
    pub fn take_style_refresh(&mut self) -> Vec<BorderId> {
        self.entries
            .iter_mut()
            .filter(|(_, cached)| cached.style_dirty)
            .map(|(id, cached)| {
                cached.style_dirty = false;
                *id
            })
            .collect()
    }

    /// Drops a border after a successful delete/merge/split commit.
    pub fn remove(&mut self, id: BorderId) -> Option<BorderEntity> {
        self.entries.remove(&id).map(|cached| cached.entity)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
