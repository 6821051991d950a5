use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::api::{BackupEntry, DivideParams, PointMatch, SegmentId};
use crate::entity::BorderId;
use crate::geometry::{Geometry, LonLat};
use crate::layers::{MapLayers, OverlayId};

/// Name template substituted with the matched region name on accept.
pub const NAME_PLACEHOLDER: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeKind {
    None,
    Renaming,
    Splitting,
    Joining,
    JoinToParent,
    ChoosingParent,
    Dividing,
    PointPicking,
    FixingCrossings,
    BackupBrowsing,
}

impl ModeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Renaming => "renaming",
            Self::Splitting => "splitting",
            Self::Joining => "joining",
            Self::JoinToParent => "join-to-parent",
            Self::ChoosingParent => "choosing-parent",
            Self::Dividing => "dividing",
            Self::PointPicking => "point-picking",
            Self::FixingCrossings => "fixing-crossings",
            Self::BackupBrowsing => "backup-browsing",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenameState {
    pub target: BorderId,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitState {
    pub target: BorderId,
    pub line: Vec<LonLat>,
    pub save_region: bool,
    pub line_overlay: Option<OverlayId>,
}

impl SplitState {
    #[must_use]
    pub fn can_commit(&self) -> bool {
        self.line.len() >= 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinState {
    pub first: BorderId,
    pub second: Option<BorderId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinToParentState {
    pub target: BorderId,
    pub parent: BorderId,
    pub parent_overlay: Option<OverlayId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentCandidate {
    pub id: BorderId,
    pub name: String,
    pub admin_level: Option<u8>,
    #[serde(skip)]
    pub geometry: Option<Geometry>,
    /// Accepting the current parent unassigns it.
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChooseParentState {
    pub target: BorderId,
    pub current_parent: Option<BorderId>,
    pub candidates: Vec<ParentCandidate>,
    pub loaded: bool,
    pub previewed: Option<BorderId>,
    pub candidate_overlay: Option<OverlayId>,
}

impl ChooseParentState {
    #[must_use]
    pub fn candidate(&self, id: BorderId) -> Option<&ParentCandidate> {
        self.candidates.iter().find(|candidate| candidate.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DividePreview {
    pub subregions: usize,
    pub clusters: usize,
}

impl DividePreview {
    #[must_use]
    pub fn can_commit(&self) -> bool {
        self.subregions >= 2 || self.clusters >= 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DivideState {
    pub target: BorderId,
    pub params: DivideParams,
    /// False for regions without an admin level; auto-divide and
    /// apply-to-similar stay off then.
    pub leveled: bool,
    pub preview: Option<DividePreview>,
    pub subregion_overlay: Option<OverlayId>,
    pub cluster_overlay: Option<OverlayId>,
}

impl DivideState {
    #[must_use]
    pub fn can_commit(&self) -> bool {
        self.preview.is_some_and(|preview| preview.can_commit())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointPickState {
    pub marker: LonLat,
    pub name_template: String,
    pub matches: Vec<PointMatch>,
    pub marker_overlay: Option<OverlayId>,
}

impl PointPickState {
    #[must_use]
    pub fn find(&self, id: BorderId) -> Option<&PointMatch> {
        self.matches.iter().find(|entry| entry.id == id)
    }

    /// Name for a new region cut from `matched`: the first placeholder in the
    /// template is replaced by the matched name.
    #[must_use]
    pub fn region_name(&self, matched: &PointMatch) -> String {
        self.name_template.replacen(NAME_PLACEHOLDER, &matched.name, 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossingSegment {
    pub id: SegmentId,
    pub region: Option<BorderId>,
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixCrossingsState {
    pub target: BorderId,
    pub segments: Vec<CrossingSegment>,
    pub selected: BTreeSet<SegmentId>,
    pub segment_overlay: Option<OverlayId>,
    pub repair_overlay: Option<OverlayId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackupState {
    pub backups: Vec<BackupEntry>,
    pub loaded: bool,
}

impl BackupState {
    #[must_use]
    pub fn find(&self, timestamp: &str) -> Option<(usize, &BackupEntry)> {
        self.backups
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.timestamp == timestamp)
    }

    /// Every backup but the newest may be deleted.
    #[must_use]
    pub fn can_delete(&self, timestamp: &str) -> bool {
        self.find(timestamp).is_some_and(|(index, _)| index > 0)
    }
}

/// The single active multi-step workflow.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EditMode {
    #[default]
    None,
    Renaming(RenameState),
    Splitting(SplitState),
    Joining(JoinState),
    JoinToParent(JoinToParentState),
    ChoosingParent(ChooseParentState),
    Dividing(DivideState),
    PointPicking(PointPickState),
    FixingCrossings(FixCrossingsState),
    BackupBrowsing(BackupState),
}

impl EditMode {
    #[must_use]
    pub fn kind(&self) -> ModeKind {
        match self {
            Self::None => ModeKind::None,
            Self::Renaming(_) => ModeKind::Renaming,
            Self::Splitting(_) => ModeKind::Splitting,
            Self::Joining(_) => ModeKind::Joining,
            Self::JoinToParent(_) => ModeKind::JoinToParent,
            Self::ChoosingParent(_) => ModeKind::ChoosingParent,
            Self::Dividing(_) => ModeKind::Dividing,
            Self::PointPicking(_) => ModeKind::PointPicking,
            Self::FixingCrossings(_) => ModeKind::FixingCrossings,
            Self::BackupBrowsing(_) => ModeKind::BackupBrowsing,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The border under edit. A viewport refresh never evicts or replaces it.
    #[must_use]
    pub fn target(&self) -> Option<BorderId> {
        match self {
            Self::Renaming(state) => Some(state.target),
            Self::Splitting(state) => Some(state.target),
            Self::Joining(state) => Some(state.first),
            Self::JoinToParent(state) => Some(state.target),
            Self::ChoosingParent(state) => Some(state.target),
            Self::Dividing(state) => Some(state.target),
            Self::FixingCrossings(state) => Some(state.target),
            Self::None | Self::PointPicking(_) | Self::BackupBrowsing(_) => None,
        }
    }

    /// Drops every overlay the workflow added to the map.
    fn release_overlays(&mut self, layers: &mut MapLayers) {
        match self {
            Self::Splitting(state) => layers.remove_slot(&mut state.line_overlay),
            Self::JoinToParent(state) => layers.remove_slot(&mut state.parent_overlay),
            Self::ChoosingParent(state) => layers.remove_slot(&mut state.candidate_overlay),
            Self::Dividing(state) => {
                layers.remove_slot(&mut state.subregion_overlay);
                layers.remove_slot(&mut state.cluster_overlay);
            }
            Self::PointPicking(state) => layers.remove_slot(&mut state.marker_overlay),
            Self::FixingCrossings(state) => {
                layers.remove_slot(&mut state.segment_overlay);
                layers.remove_slot(&mut state.repair_overlay);
            }
            Self::None | Self::Renaming(_) | Self::Joining(_) | Self::BackupBrowsing(_) => {}
        }
    }
}

/// Holds the active mode and the epochs that tag its in-flight requests.
///
/// Opening a mode first cancels the open one, so two workflows can never be
/// open together. Every transition bumps both epochs; responses tagged with
/// an older epoch belong to an abandoned workflow. The preview epoch also
/// moves when a workflow's preview inputs change, which leaves commits
/// already in flight alone.
#[derive(Debug, Clone, Default)]
pub struct EditSession {
    mode: EditMode,
    epoch: u64,
    preview_epoch: u64,
}

impl EditSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mode(&self) -> &EditMode {
        &self.mode
    }

    pub fn mode_mut(&mut self) -> &mut EditMode {
        &mut self.mode
    }

    #[must_use]
    pub fn kind(&self) -> ModeKind {
        self.mode.kind()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn preview_epoch(&self) -> u64 {
        self.preview_epoch
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.mode.is_none()
    }

    /// Cancels the open mode, if any, then opens `next`. Returns the kind of
    /// the mode that was cancelled.
    pub fn open(&mut self, next: EditMode, layers: &mut MapLayers) -> ModeKind {
        let cancelled = self.close(layers);
        self.epoch = self.epoch.saturating_add(1);
        self.preview_epoch = self.preview_epoch.saturating_add(1);
        debug!(
            target: "borders.session",
            mode = next.kind().as_str(),
            epoch = self.epoch,
            "opened edit mode"
        );
        self.mode = next;
        cancelled
    }

    /// Cancels the open mode, releasing its overlays. Closing with nothing
    /// open changes nothing and returns `ModeKind::None`.
    pub fn close(&mut self, layers: &mut MapLayers) -> ModeKind {
        if self.mode.is_none() {
            return ModeKind::None;
        }
        let mut previous = std::mem::take(&mut self.mode);
        previous.release_overlays(layers);
        self.epoch = self.epoch.saturating_add(1);
        self.preview_epoch = self.preview_epoch.saturating_add(1);
        debug!(
            target: "borders.session",
            mode = previous.kind().as_str(),
            epoch = self.epoch,
            "closed edit mode"
        );
        previous.kind()
    }

    /// Orphans every preview read in flight for the open mode. Called when
    /// the inputs those reads were issued for have changed.
    pub fn invalidate_previews(&mut self) {
        self.preview_epoch = self.preview_epoch.saturating_add(1);
        debug!(
            target: "borders.session",
            mode = self.mode.kind().as_str(),
            preview_epoch = self.preview_epoch,
            "invalidated in-flight previews"
        );
    }
}
