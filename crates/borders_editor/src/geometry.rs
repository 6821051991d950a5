use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};
use crate::util::format_num;

/// GeoJSON position: `[lon, lat]`.
pub type Position = [f64; 2];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    #[must_use]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Map bounds in degrees, west/south/east/north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self> {
        if !(xmin.is_finite() && ymin.is_finite() && xmax.is_finite() && ymax.is_finite()) {
            return Err(EditorError::invalid("bounding box must be finite"));
        }
        if xmin > xmax || ymin > ymax {
            return Err(EditorError::invalid(format!(
                "bounding box is inverted: {xmin},{ymin},{xmax},{ymax}"
            )));
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    /// Bounds as returned by the search endpoint: `[xmin, ymin, xmax, ymax]`.
    pub fn from_search_bounds(bounds: &[f64]) -> Option<Self> {
        match bounds {
            [xmin, ymin, xmax, ymax] => Self::new(*xmin, *ymin, *xmax, *ymax).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn center(&self) -> LonLat {
        LonLat::new(
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("xmin", self.xmin.to_string()),
            ("xmax", self.xmax.to_string()),
            ("ymin", self.ymin.to_string()),
            ("ymax", self.ymax.to_string()),
        ]
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

impl FromStr for BBox {
    type Err = EditorError;

    fn from_str(raw: &str) -> Result<Self> {
        let parts = raw
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| EditorError::invalid(format!("invalid bounding box: {raw}")))
            })
            .collect::<Result<Vec<_>>>()?;
        match parts.as_slice() {
            [xmin, ymin, xmax, ymax] => Self::new(*xmin, *ymin, *xmax, *ymax),
            _ => Err(EditorError::invalid(format!(
                "bounding box needs four comma-separated numbers: {raw}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingCount {
    pub outer: usize,
    pub inner: usize,
}

impl Geometry {
    /// Outer rings and holes across a (multi)polygon. Non-areal geometry has none.
    #[must_use]
    pub fn ring_count(&self) -> RingCount {
        fn polygon(rings: &[Vec<Position>], acc: &mut RingCount) {
            if let Some((_, holes)) = rings.split_first() {
                acc.outer += 1;
                acc.inner += holes.len();
            }
        }

        let mut count = RingCount::default();
        match self {
            Self::Polygon(rings) => polygon(rings, &mut count),
            Self::MultiPolygon(polygons) => {
                for rings in polygons {
                    polygon(rings, &mut count);
                }
            }
            Self::Point(_)
            | Self::LineString(_)
            | Self::MultiLineString(_)
            | Self::Unsupported => {}
        }
        count
    }

    #[must_use]
    pub fn is_areal(&self) -> bool {
        matches!(self, Self::Polygon(_) | Self::MultiPolygon(_))
    }
}

/// `LINESTRING(lon lat,lon lat,...)` with six-decimal coordinates.
#[must_use]
pub fn linestring_wkt(points: &[LonLat]) -> String {
    let body = points
        .iter()
        .map(|point| format!("{} {}", format_num(point.lon, 6), format_num(point.lat, 6)))
        .collect::<Vec<_>>()
        .join(",");
    format!("LINESTRING({body})")
}
