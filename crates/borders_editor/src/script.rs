//! Gesture scripts for `replay`: one JSON object per line, `#` comments and
//! blank lines skipped.
//!
//! ```text
//! {"gesture": "settle", "bbox": [10, 50, 11, 51], "zoom": 9}
//! {"gesture": "select", "id": 42}
//! {"gesture": "begin-split"}
//! {"gesture": "split-point", "lon": 10.5, "lat": 50.0}
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::api::DivideParams;
use crate::classify::FilterMode;
use crate::command::Cmd;
use crate::entity::BorderId;
use crate::error::{EditorError, Result};
use crate::geometry::{BBox, LonLat};
use crate::selection::ClickTarget;
use crate::session::EditorSession;
use crate::util::ensure_exists;
use crate::viewport::Viewport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gesture", rename_all = "kebab-case")]
pub enum Gesture {
    Settle {
        #[serde(with = "bbox_array")]
        bbox: BBox,
        zoom: f64,
    },
    Refresh,
    Select {
        id: Option<BorderId>,
    },
    /// `id` absent clicks empty map.
    Click {
        id: Option<BorderId>,
        #[serde(default)]
        small_marker: bool,
    },
    Filter {
        mode: FilterMode,
    },
    Thresholds {
        good_mb: f64,
        bad_mb: f64,
    },
    LegacyOverlay {
        enabled: bool,
    },
    Search {
        query: String,
    },
    ToggleDisabled,
    Delete {
        #[serde(default)]
        confirmed: bool,
    },
    Comment {
        text: String,
    },
    ClearComment,
    SimpleSplit,
    ChopLargest,
    Hull,
    Cancel,
    StartOver,
    BeginRename,
    RenameDraft {
        name: String,
    },
    CommitRename,
    BeginSplit,
    SplitPoint {
        lon: f64,
        lat: f64,
    },
    RestartSplit,
    SplitSaveRegion {
        save: bool,
    },
    CommitSplit,
    BeginJoin,
    CommitJoin,
    BeginJoinToParent,
    PreviewJoinToParent,
    CommitJoinToParent,
    BeginChooseParent,
    ShowParent {
        id: BorderId,
    },
    AssignParent {
        id: BorderId,
    },
    BeginDivide,
    DivideParams {
        #[serde(flatten)]
        params: DivideParams,
    },
    PreviewDivide,
    CommitDivide,
    BeginPointPick {
        #[serde(default)]
        lon: Option<f64>,
        #[serde(default)]
        lat: Option<f64>,
    },
    MoveMarker {
        lon: f64,
        lat: f64,
    },
    NameTemplate {
        template: String,
    },
    ListMatches,
    AcceptMatch {
        id: BorderId,
    },
    AutoDivideCountry {
        id: BorderId,
    },
    BeginFixCrossings,
    ToggleSegment {
        id: String,
    },
    PreviewCrossingFix,
    CommitCrossingFix,
    OpenBackups,
    SaveBackup,
    RestoreBackup {
        timestamp: String,
    },
    DeleteBackup {
        timestamp: String,
    },
}

impl Gesture {
    /// Kebab-case name, used as the label of refused gestures.
    #[must_use]
    pub fn label(&self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|value| value.get("gesture")?.as_str().map(str::to_string))
            .unwrap_or_else(|| "gesture".to_string())
    }

    /// Applies the gesture to `session`.
    pub fn apply(self, session: &mut EditorSession) -> Result<Cmd> {
        match self {
            Self::Settle { bbox, zoom } => Ok(session.settle_viewport(Viewport { bbox, zoom })),
            Self::Refresh => Ok(session.refresh()),
            Self::Select { id } => {
                session.select(id);
                Ok(Cmd::none())
            }
            Self::Click { id, small_marker } => {
                let target = match (id, small_marker) {
                    (Some(region), true) => ClickTarget::SmallMarker { region },
                    (Some(id), false) => ClickTarget::Border(id),
                    (None, _) => ClickTarget::Empty,
                };
                Ok(session.click(target))
            }
            Self::Filter { mode } => Ok(session.set_filter(mode)),
            Self::Thresholds { good_mb, bad_mb } => Ok(session.set_thresholds(good_mb, bad_mb)),
            Self::LegacyOverlay { enabled } => session.set_legacy_overlay(enabled),
            Self::Search { query } => Ok(session.search(&query)),
            Self::ToggleDisabled => session.toggle_disabled(),
            Self::Delete { confirmed } => session.delete_selected(confirmed),
            Self::Comment { text } => session.set_comment(&text),
            Self::ClearComment => session.clear_comment(),
            Self::SimpleSplit => session.simple_split(),
            Self::ChopLargest => session.chop_largest(),
            Self::Hull => session.hull(),
            Self::Cancel => Ok(session.cancel()),
            Self::StartOver => session.start_over(),
            Self::BeginRename => session.begin_rename(),
            Self::RenameDraft { name } => session.set_rename_draft(&name).map(|()| Cmd::none()),
            Self::CommitRename => session.commit_rename(),
            Self::BeginSplit => session.begin_split(),
            Self::SplitPoint { lon, lat } => session
                .add_split_point(LonLat::new(lon, lat))
                .map(|()| Cmd::none()),
            Self::RestartSplit => session.restart_split_line().map(|()| Cmd::none()),
            Self::SplitSaveRegion { save } => {
                session.set_split_save_region(save).map(|()| Cmd::none())
            }
            Self::CommitSplit => session.commit_split(),
            Self::BeginJoin => session.begin_join(),
            Self::CommitJoin => session.commit_join(),
            Self::BeginJoinToParent => session.begin_join_to_parent(),
            Self::PreviewJoinToParent => session.preview_join_to_parent(),
            Self::CommitJoinToParent => session.commit_join_to_parent(),
            Self::BeginChooseParent => session.begin_choose_parent(),
            Self::ShowParent { id } => session.show_parent_candidate(id),
            Self::AssignParent { id } => session.assign_parent(id),
            Self::BeginDivide => session.begin_divide(),
            Self::DivideParams { params } => {
                session.set_divide_params(params).map(|()| Cmd::none())
            }
            Self::PreviewDivide => session.preview_divide(),
            Self::CommitDivide => session.commit_divide(),
            Self::BeginPointPick { lon, lat } => {
                let at = lon.zip(lat).map(|(lon, lat)| LonLat::new(lon, lat));
                session.begin_point_pick(at)
            }
            Self::MoveMarker { lon, lat } => session
                .move_point_marker(LonLat::new(lon, lat))
                .map(|()| Cmd::none()),
            Self::NameTemplate { template } => session
                .set_point_name_template(&template)
                .map(|()| Cmd::none()),
            Self::ListMatches => session.list_point_matches(),
            Self::AcceptMatch { id } => session.accept_point_match(id),
            Self::AutoDivideCountry { id } => session.auto_divide_country(id),
            Self::BeginFixCrossings => session.begin_fix_crossings(),
            Self::ToggleSegment { id } => session.toggle_crossing_segment(&id).map(|_| Cmd::none()),
            Self::PreviewCrossingFix => session.preview_crossing_fix(),
            Self::CommitCrossingFix => session.commit_crossing_fix(),
            Self::OpenBackups => session.open_backups(),
            Self::SaveBackup => session.save_backup(),
            Self::RestoreBackup { timestamp } => session.restore_backup(&timestamp),
            Self::DeleteBackup { timestamp } => session.delete_backup(&timestamp),
        }
    }
}

pub fn parse_script(content: &str) -> Result<Vec<Gesture>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str::<Gesture>(line.trim()).map_err(|error| {
                EditorError::invalid(format!("script line {}: {error}", index + 1))
            })
        })
        .collect()
}

pub fn load_script(path: &Path) -> Result<Vec<Gesture>> {
    ensure_exists(path)?;
    let content = fs::read_to_string(path)?;
    parse_script(&content)
}

mod bbox_array {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::geometry::BBox;

    pub fn serialize<S: Serializer>(bbox: &BBox, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq([bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax])
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BBox, D::Error> {
        let [xmin, ymin, xmax, ymax] = <[f64; 4]>::deserialize(deserializer)?;
        BBox::new(xmin, ymin, xmax, ymax).map_err(serde::de::Error::custom)
    }
}
