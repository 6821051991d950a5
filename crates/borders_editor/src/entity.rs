use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;

/// Server-assigned region id. Stable across sessions; negative for regions
/// that do not originate from the OSM source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BorderId(pub i64);

impl fmt::Display for BorderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BorderId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Geometry detail tier, keyed to zoom. The numeric value is the `simplify`
/// query parameter understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SimplificationLevel {
    Full = 0,
    Medium = 1,
    Coarse = 2,
}

impl SimplificationLevel {
    #[must_use]
    pub fn for_zoom(zoom: f64) -> Self {
        if zoom < 7.0 {
            Self::Coarse
        } else if zoom < 11.0 {
            Self::Medium
        } else {
            Self::Full
        }
    }

    #[must_use]
    pub fn as_param(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Feature<P> {
    pub geometry: Option<Geometry>,
    pub properties: P,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureCollection<P> {
    #[serde(default = "Vec::new")]
    pub features: Vec<Feature<P>>,
}

impl<P> Default for FeatureCollection<P> {
    fn default() -> Self {
        Self {
            features: Vec::new(),
        }
    }
}

impl<P> FeatureCollection<P> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Per-feature properties of a `bbox` response, as the server spells them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BorderProperties {
    pub id: BorderId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin_level: Option<u8>,
    #[serde(default)]
    pub parent_id: Option<BorderId>,
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub parent_admin_level: Option<u8>,
    #[serde(default)]
    pub count_k: Option<i64>,
    #[serde(default)]
    pub nodes: Option<u64>,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub mwm_size_est: Option<f64>,
    #[serde(default)]
    pub country_name: Option<String>,
}

/// One region as held client-side.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderEntity {
    pub id: BorderId,
    pub name: String,
    pub admin_level: Option<u8>,
    pub parent_id: Option<BorderId>,
    pub parent_name: Option<String>,
    pub parent_admin_level: Option<u8>,
    pub geometry: Geometry,
    pub node_count_thousands: i64,
    pub point_count: Option<u64>,
    /// Square meters.
    pub area: f64,
    pub disabled: bool,
    /// Empty means no comment.
    pub comment: String,
    pub modified: Option<String>,
    /// Kilobytes, as predicted by the server.
    pub estimated_output_size: Option<f64>,
    pub country_name: Option<String>,
    pub simplification_level: SimplificationLevel,
}

impl BorderEntity {
    /// Builds an entity from a fetched feature. Features without geometry are
    /// not renderable and yield `None`.
    #[must_use]
    pub fn from_feature(
        feature: Feature<BorderProperties>,
        simplification_level: SimplificationLevel,
    ) -> Option<Self> {
        let geometry = feature.geometry?;
        let props = feature.properties;
        Some(Self {
            id: props.id,
            name: props.name.unwrap_or_default(),
            admin_level: props.admin_level,
            parent_id: props.parent_id,
            parent_name: props.parent_name,
            parent_admin_level: props.parent_admin_level,
            geometry,
            node_count_thousands: props.count_k.unwrap_or(0),
            point_count: props.nodes,
            area: props.area.unwrap_or(0.0),
            disabled: props.disabled,
            comment: props.comment.unwrap_or_default(),
            modified: props.modified,
            estimated_output_size: props.mwm_size_est,
            country_name: props.country_name.filter(|name| !name.is_empty()),
            simplification_level,
        })
    }

    #[must_use]
    pub fn estimated_node_bytes(&self, bytes_per_node: i64) -> i64 {
        self.node_count_thousands.saturating_mul(bytes_per_node)
    }

    #[must_use]
    pub fn has_comment(&self) -> bool {
        !self.comment.is_empty()
    }

    /// Parent label: `name`, or the id when unnamed; `long` appends `[id]`
    /// to named parents; the parent admin level follows in parentheses.
    #[must_use]
    pub fn parent_label(&self, long: bool) -> String {
        let Some(parent_id) = self.parent_id else {
            return String::new();
        };
        let named = self.parent_name.as_deref().filter(|name| !name.is_empty());
        let mut label = named.map_or_else(|| parent_id.to_string(), str::to_string);
        if long && named.is_some() {
            label.push_str(&format!(" [{parent_id}]"));
        }
        if let Some(level) = self.parent_admin_level {
            label.push_str(&format!(" ({level})"));
        }
        label
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{BorderEntity, BorderId, SimplificationLevel};
    use crate::geometry::Geometry;

    pub(crate) fn square() -> Geometry {
        Geometry::Polygon(vec![vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 1.0],
            [0.0, 0.0],
        ]])
    }

    pub(crate) fn entity(id: i64, name: &str) -> BorderEntity {
        BorderEntity {
            id: BorderId(id),
            name: name.to_string(),
            admin_level: Some(4),
            parent_id: None,
            parent_name: None,
            parent_admin_level: None,
            geometry: square(),
            node_count_thousands: 100,
            point_count: Some(5),
            area: 1_000_000.0,
            disabled: false,
            comment: String::new(),
            modified: None,
            estimated_output_size: None,
            country_name: None,
            simplification_level: SimplificationLevel::Coarse,
        }
    }
}
