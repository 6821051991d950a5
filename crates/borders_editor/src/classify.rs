//! Display color for a border under the active filter.
//!
//! [`classify`] is a pure function of the entity, the filter mode and the
//! size thresholds; it owns no state, so the cache can recolor everything
//! on a filter switch without touching any entity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::BorderEntity;
use crate::error::{EditorError, Result};

/// Bytes per thousand nodes used by the node-count size estimate.
pub const DEFAULT_BYTES_PER_NODE: i64 = 8;

const MIB: f64 = 1024.0 * 1024.0;

/// Ordered palette for the country filter.
pub const COUNTRY_PALETTE: [&str; 14] = [
    "red", "orange", "yellow", "lime", "green", "olive", "cyan", "darkcyan", "blue", "navy",
    "magenta", "purple", "deeppink", "brown",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    #[default]
    Plain,
    SizeByNodes,
    SizeByEstimate,
    Topology,
    Charset,
    CommentPresent,
    Country,
}

impl FilterMode {
    pub const ALL: [Self; 7] = [
        Self::Plain,
        Self::SizeByNodes,
        Self::SizeByEstimate,
        Self::Topology,
        Self::Charset,
        Self::CommentPresent,
        Self::Country,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::SizeByNodes => "size-by-nodes",
            Self::SizeByEstimate => "size-by-estimate",
            Self::Topology => "topology",
            Self::Charset => "charset",
            Self::CommentPresent => "comment-present",
            Self::Country => "country",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterMode {
    type Err = EditorError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == raw.trim())
            .ok_or_else(|| EditorError::invalid(format!("unknown filter mode: {raw}")))
    }
}

/// Size thresholds in megabytes: below `good` is too small, above `bad` too big.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub good_mb: f64,
    pub bad_mb: f64,
    pub bytes_per_node: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_output_limit_kb(70.0 * 1024.0, DEFAULT_BYTES_PER_NODE)
    }
}

impl Thresholds {
    /// Derives both thresholds from the server's output size limit (KB):
    /// `bad` is the limit in MB, `good` is 70% of it rounded to tens.
    #[must_use]
    pub fn from_output_limit_kb(limit_kb: f64, bytes_per_node: i64) -> Self {
        let bad_mb = (limit_kb / 1024.0).round();
        let good_mb = (bad_mb * 0.7 / 10.0).round() * 10.0;
        Self {
            good_mb,
            bad_mb,
            bytes_per_node,
        }
    }

    /// Operator-entered thresholds; non-positive `good` becomes 10 and a
    /// `bad` not above `good` becomes ten times `good`.
    #[must_use]
    pub fn normalized(good_mb: f64, bad_mb: f64, bytes_per_node: i64) -> Self {
        let good_mb = if good_mb > 0.0 { good_mb } else { 10.0 };
        let bad_mb = if bad_mb > good_mb {
            bad_mb
        } else {
            good_mb * 10.0
        };
        Self {
            good_mb,
            bad_mb,
            bytes_per_node,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorToken {
    Neutral,
    Zero,
    TooSmall,
    TooBig,
    Country(usize),
    NoCountry,
}

impl ColorToken {
    /// Stroke color the render layer draws for this token.
    #[must_use]
    pub fn css(self) -> &'static str {
        match self {
            Self::Neutral => "#03f",
            Self::Zero | Self::NoCountry => "black",
            Self::TooSmall => "#0f0",
            Self::TooBig => "#800",
            Self::Country(index) => COUNTRY_PALETTE[index % COUNTRY_PALETTE.len()],
        }
    }
}

impl fmt::Display for ColorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neutral => f.write_str("neutral"),
            Self::Zero => f.write_str("zero"),
            Self::TooSmall => f.write_str("too-small"),
            Self::TooBig => f.write_str("too-big"),
            Self::Country(_) => write!(f, "country:{}", self.css()),
            Self::NoCountry => f.write_str("no-country"),
        }
    }
}

#[must_use]
pub fn classify(entity: &BorderEntity, mode: FilterMode, thresholds: &Thresholds) -> ColorToken {
    match mode {
        FilterMode::Plain => ColorToken::Neutral,
        FilterMode::SizeByNodes => {
            if entity.node_count_thousands <= 0 {
                return ColorToken::Zero;
            }
            let bytes = entity.estimated_node_bytes(thresholds.bytes_per_node) as f64;
            size_band(bytes, thresholds.good_mb * MIB, thresholds.bad_mb * MIB)
        }
        FilterMode::SizeByEstimate => match entity.estimated_output_size {
            Some(kb) if kb > 0.0 => size_band(
                kb,
                thresholds.good_mb * 1024.0,
                thresholds.bad_mb * 1024.0,
            ),
            _ => ColorToken::Zero,
        },
        FilterMode::Topology => {
            let rings = entity.geometry.ring_count();
            if rings.inner > 0 {
                ColorToken::TooBig
            } else if rings.outer == 1 {
                ColorToken::TooSmall
            } else if rings.outer == 0 {
                ColorToken::Zero
            } else {
                ColorToken::Neutral
            }
        }
        FilterMode::Charset => {
            if !entity.name.chars().all(|c| ('\u{20}'..='\u{7f}').contains(&c)) {
                ColorToken::TooBig
            } else if !entity.name.contains(' ') {
                ColorToken::TooSmall
            } else {
                ColorToken::Neutral
            }
        }
        FilterMode::CommentPresent => {
            if entity.has_comment() {
                ColorToken::TooBig
            } else {
                ColorToken::Neutral
            }
        }
        FilterMode::Country => country_color(entity.country_name.as_deref()),
    }
}

fn size_band(value: f64, good: f64, bad: f64) -> ColorToken {
    if value < good {
        ColorToken::TooSmall
    } else if value > bad {
        ColorToken::TooBig
    } else {
        ColorToken::Neutral
    }
}

/// Sum of the first two UTF-16 code units, modulo the palette.
#[must_use]
pub fn country_color(country_name: Option<&str>) -> ColorToken {
    let Some(name) = country_name.filter(|name| !name.is_empty()) else {
        return ColorToken::NoCountry;
    };
    let hash: usize = name.encode_utf16().take(2).map(usize::from).sum();
    ColorToken::Country(hash % COUNTRY_PALETTE.len())
}
