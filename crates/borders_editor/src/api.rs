use std::fmt;
use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::entity::{BorderId, BorderProperties, Feature, FeatureCollection, SimplificationLevel};
use crate::error::{EditorError, Result};
use crate::geometry::{BBox, LonLat};
use crate::settings::Settings;
use crate::util::normalize_base_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Parameters shared by `divide_preview` and `divide`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivideParams {
    pub next_level: Option<u8>,
    pub auto_divide: bool,
    /// Output size limit in MB; sent to the server in KB.
    pub output_limit_mb: Option<u32>,
    pub apply_to_similar: bool,
}

/// Crossing segment id, opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawSegmentId")]
pub struct SegmentId(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSegmentId {
    Number(i64),
    Text(String),
}

impl From<RawSegmentId> for SegmentId {
    fn from(raw: RawSegmentId) -> Self {
        match raw {
            RawSegmentId::Number(value) => Self(value.to_string()),
            RawSegmentId::Text(value) => Self(value),
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One server endpoint call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    Config,
    Bbox {
        bbox: BBox,
        simplify: SimplificationLevel,
        table: Option<String>,
    },
    Small {
        bbox: BBox,
    },
    Search {
        query: String,
    },
    Border {
        id: BorderId,
        simplify: SimplificationLevel,
    },
    Crossing {
        bbox: BBox,
        points: bool,
    },
    Rename {
        id: BorderId,
        new_name: String,
    },
    Disable {
        id: BorderId,
    },
    Enable {
        id: BorderId,
    },
    Delete {
        id: BorderId,
    },
    Comment {
        id: BorderId,
        comment: String,
    },
    Split {
        id: BorderId,
        line_wkt: String,
        save_region: bool,
    },
    Join {
        id1: BorderId,
        id2: BorderId,
    },
    JoinToParent {
        id: BorderId,
    },
    SetParent {
        id: BorderId,
        parent_id: Option<BorderId>,
    },
    PotentialParents {
        id: BorderId,
    },
    Divide {
        id: BorderId,
        params: DivideParams,
        preview: bool,
    },
    SimpleSplit {
        id: BorderId,
    },
    ChopLargest {
        id: BorderId,
    },
    Hull {
        id: BorderId,
    },
    Point {
        at: LonLat,
    },
    FromOsm {
        id: BorderId,
        name: String,
    },
    AutoDivideCountry {
        id: BorderId,
    },
    FixCrossing {
        region: BorderId,
        segments: Vec<SegmentId>,
        preview: bool,
    },
    BackupList,
    Backup,
    Restore {
        timestamp: String,
    },
    BackupDelete {
        timestamp: String,
    },
    StartOver,
    /// Osmosis `.poly` export of the whole dataset or one bbox.
    Poly {
        bbox: Option<BBox>,
    },
    /// OSM XML export handed to an external editor.
    Josm {
        bbox: BBox,
        table: Option<String>,
    },
}

fn flag(value: bool) -> String {
    value.to_string()
}

impl ApiRequest {
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Bbox { .. } => "bbox",
            Self::Small { .. } => "small",
            Self::Search { .. } => "search",
            Self::Border { .. } => "border",
            Self::Crossing { .. } => "crossing",
            Self::Rename { .. } => "rename",
            Self::Disable { .. } => "disable",
            Self::Enable { .. } => "enable",
            Self::Delete { .. } => "delete",
            Self::Comment { .. } => "comment",
            Self::Split { .. } => "split",
            Self::Join { .. } => "join",
            Self::JoinToParent { .. } => "join_to_parent",
            Self::SetParent { .. } => "set_parent",
            Self::PotentialParents { .. } => "potential_parents",
            Self::Divide { preview: true, .. } => "divide_preview",
            Self::Divide { preview: false, .. } => "divide",
            Self::SimpleSplit { .. } => "simple_split",
            Self::ChopLargest { .. } => "chop1",
            Self::Hull { .. } => "hull",
            Self::Point { .. } => "point",
            Self::FromOsm { .. } => "from_osm",
            Self::AutoDivideCountry { .. } => "auto_divide_country",
            Self::FixCrossing { .. } => "fixcrossing",
            Self::BackupList => "backlist",
            Self::Backup => "backup",
            Self::Restore { .. } => "restore",
            Self::BackupDelete { .. } => "backdelete",
            Self::StartOver => "start_over",
            Self::Poly { .. } => "poly",
            Self::Josm { .. } => "josm",
        }
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        match self {
            Self::Comment { .. } => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }

    /// Whether the call changes server state. Only reads are retried.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        match self {
            Self::Config
            | Self::Bbox { .. }
            | Self::Small { .. }
            | Self::Search { .. }
            | Self::Border { .. }
            | Self::Crossing { .. }
            | Self::PotentialParents { .. }
            | Self::Point { .. }
            | Self::BackupList
            | Self::Poly { .. }
            | Self::Josm { .. } => false,
            Self::Divide { preview, .. } | Self::FixCrossing { preview, .. } => !preview,
            _ => true,
        }
    }

    #[must_use]
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Config | Self::BackupList | Self::Backup | Self::StartOver => Vec::new(),
            Self::Bbox {
                bbox,
                simplify,
                table,
            } => {
                let mut params = vec![("simplify", simplify.as_param().to_string())];
                params.extend(bbox.query_pairs());
                if let Some(table) = table {
                    params.push(("table", table.clone()));
                }
                params
            }
            Self::Small { bbox } => bbox.query_pairs(),
            Self::Poly { bbox } => bbox.map(|bbox| bbox.query_pairs()).unwrap_or_default(),
            Self::Josm { bbox, table } => {
                let mut params = bbox.query_pairs();
                if let Some(table) = table {
                    params.push(("table", table.clone()));
                }
                params
            }
            Self::Search { query } => vec![("q", query.clone())],
            Self::Border { id, simplify } => vec![
                ("id", id.to_string()),
                ("simplify", simplify.as_param().to_string()),
            ],
            Self::Crossing { bbox, points } => {
                let mut params = bbox.query_pairs();
                params.push(("points", u8::from(*points).to_string()));
                params
            }
            Self::Rename { id, new_name } => {
                vec![("id", id.to_string()), ("new_name", new_name.clone())]
            }
            Self::Disable { id }
            | Self::Enable { id }
            | Self::Delete { id }
            | Self::JoinToParent { id }
            | Self::PotentialParents { id }
            | Self::SimpleSplit { id }
            | Self::ChopLargest { id }
            | Self::Hull { id }
            | Self::AutoDivideCountry { id } => vec![("id", id.to_string())],
            Self::Comment { id, comment } => {
                vec![("id", id.to_string()), ("comment", comment.clone())]
            }
            Self::Split {
                id,
                line_wkt,
                save_region,
            } => vec![
                ("id", id.to_string()),
                ("line", line_wkt.clone()),
                ("save_region", flag(*save_region)),
            ],
            Self::Join { id1, id2 } => vec![("id1", id1.to_string()), ("id2", id2.to_string())],
            Self::SetParent { id, parent_id } => vec![
                ("id", id.to_string()),
                (
                    "parent_id",
                    parent_id.map(|parent| parent.to_string()).unwrap_or_default(),
                ),
            ],
            Self::Divide { id, params, .. } => {
                let mut pairs = vec![
                    ("id", id.to_string()),
                    (
                        "next_level",
                        params
                            .next_level
                            .map(|level| level.to_string())
                            .unwrap_or_default(),
                    ),
                    ("auto_divide", flag(params.auto_divide)),
                    ("apply_to_similar", flag(params.apply_to_similar)),
                ];
                if params.auto_divide
                    && let Some(limit) = params.output_limit_mb
                {
                    pairs.push(("mwm_size_thr", (u64::from(limit) * 1024).to_string()));
                }
                pairs
            }
            Self::Point { at } => vec![("lat", at.lat.to_string()), ("lon", at.lon.to_string())],
            Self::FromOsm { id, name } => vec![("name", name.clone()), ("id", id.to_string())],
            Self::FixCrossing {
                region,
                segments,
                preview,
            } => {
                let mut pairs = Vec::with_capacity(3);
                if *preview {
                    pairs.push(("preview", "1".to_string()));
                }
                pairs.push(("region", region.to_string()));
                pairs.push((
                    "ids",
                    segments
                        .iter()
                        .map(|segment| segment.0.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                ));
                pairs
            }
            Self::Restore { timestamp } | Self::BackupDelete { timestamp } => {
                vec![("timestamp", timestamp.clone())]
            }
        }
    }
}

/// Status envelope of every mutating response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StatusReply {
    /// A response without a status field is treated as accepted.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.as_deref().is_none_or(|status| status == "ok")
    }

    /// Ok with the warnings, or the verbatim rejection token.
    pub fn into_result(self, endpoint: &str) -> Result<Vec<String>> {
        if self.is_ok() {
            Ok(self.warnings)
        } else {
            Err(EditorError::Rejected {
                endpoint: endpoint.to_string(),
                status: self.status.unwrap_or_default(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub osm: bool,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub crossing: bool,
    /// Output size limit in KB.
    #[serde(default = "default_output_limit_kb")]
    pub mwm_size_thr: f64,
}

fn default_output_limit_kb() -> f64 {
    70.0 * 1024.0
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            osm: false,
            tables: Vec::new(),
            backup: false,
            readonly: false,
            crossing: false,
            mwm_size_thr: default_output_limit_kb(),
        }
    }
}

impl ServerCapabilities {
    #[must_use]
    pub fn legacy_table(&self) -> Option<&str> {
        self.tables.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BboxReply {
    #[serde(default)]
    pub geojson: FeatureCollection<BorderProperties>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SmallRing {
    pub id: BorderId,
    #[serde(default)]
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    /// Square kilometers.
    #[serde(default)]
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SmallReply {
    #[serde(default)]
    pub rings: Vec<SmallRing>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchReply {
    #[serde(default)]
    pub bounds: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BorderReply {
    pub geojson: Feature<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandidateProperties {
    pub id: BorderId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PotentialParentsReply {
    #[serde(default)]
    pub parents: Vec<Feature<CandidateProperties>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DividePreviewReply {
    #[serde(default)]
    pub subregions: FeatureCollection<Value>,
    #[serde(default)]
    pub clusters: Option<FeatureCollection<Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PointMatch {
    pub id: BorderId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub admin_level: Option<u8>,
    /// Square kilometers.
    #[serde(default)]
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointReply {
    #[serde(default)]
    pub borders: Vec<PointMatch>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CrossingProperties {
    pub id: SegmentId,
    #[serde(default)]
    pub region: Option<BorderId>,
}

pub type CrossingReply = FeatureCollection<CrossingProperties>;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackupEntry {
    pub timestamp: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackupListReply {
    #[serde(default)]
    pub backups: Vec<BackupEntry>,
}

/// Decodes a reply body into its typed shape.
pub fn decode<T: DeserializeOwned>(endpoint: &str, body: Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|error| EditorError::invalid(format!("malformed {endpoint} response: {error}")))
}

/// Transport seam between the session runtime and the border server.
pub trait BordersApi {
    /// Performs one call and returns the decoded JSON body. Errors mean the
    /// request did not complete; a non-ok `status` is still `Ok`.
    fn call(&mut self, request: &ApiRequest) -> Result<Value>;

    /// Absolute URL of a GET call, for links handed to other programs.
    fn url_for(&self, request: &ApiRequest) -> Result<String>;
}

#[derive(Debug)]
pub struct HttpBordersApi {
    client: Client,
    base_url: String,
    retries: u32,
}

impl HttpBordersApi {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(&settings.api_url),
            retries: settings.retries,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    fn call_once(&self, request: &ApiRequest) -> Result<Value> {
        let url = self.endpoint_url(request.endpoint());
        let params = request.params();
        let builder = match request.method() {
            HttpMethod::Get => self.client.get(&url).query(&params),
            HttpMethod::Post => self.client.post(&url).form(&params),
        };
        let response_text = builder.send()?.error_for_status()?.text()?;
        if response_text.trim().is_empty() {
            return Err(EditorError::invalid(format!(
                "empty response for {}",
                request.endpoint()
            )));
        }
        Ok(serde_json::from_str(&response_text)?)
    }
}

impl BordersApi for HttpBordersApi {
    fn call(&mut self, request: &ApiRequest) -> Result<Value> {
        let max_attempts = if request.is_mutation() {
            1
        } else {
            self.retries.saturating_add(1)
        };
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            debug!(target: "borders.api", endpoint = request.endpoint(), attempt, "request");
            match self.call_once(request) {
                Ok(body) => return Ok(body),
                Err(error) => {
                    if attempt >= max_attempts || !error.is_transport() {
                        return Err(error);
                    }
                    let backoff_ms = 100_u64.saturating_mul(1_u64 << (attempt - 1).min(6));
                    warn!(
                        target: "borders.api",
                        endpoint = request.endpoint(),
                        attempt,
                        backoff_ms,
                        %error,
                        "retrying read request"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                }
            }
        }
    }

    fn url_for(&self, request: &ApiRequest) -> Result<String> {
        let endpoint = self.endpoint_url(request.endpoint());
        let params = request.params();
        let parsed = if params.is_empty() {
            Url::parse(&endpoint)
        } else {
            Url::parse_with_params(&endpoint, params)
        };
        let url =
            parsed.map_err(|error| EditorError::invalid(format!("invalid server url: {error}")))?;
        Ok(url.to_string())
    }
}
