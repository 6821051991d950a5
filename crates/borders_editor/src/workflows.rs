//! Per-mode gestures: enter, preview, commit. Cancel is shared and lives on
//! the session.
//!
//! Every `begin_*` opens its mode through the session, which cancels the
//! mode that was open before. Commits never close the mode themselves; the
//! session does that when the server accepts the mutation.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::api::{
    ApiRequest, BackupListReply, BorderReply, CrossingReply, DivideParams, DividePreviewReply,
    PointReply, PotentialParentsReply, decode,
};
use crate::command::{Cmd, CommitKind, PreviewStep};
use crate::entity::{BorderId, SimplificationLevel};
use crate::error::{EditorError, Result};
use crate::geometry::{Geometry, LonLat, linestring_wkt};
use crate::layers::{OverlayContent, OverlayKind};
use crate::modes::{
    BackupState, ChooseParentState, CrossingSegment, DividePreview, DivideState, EditMode,
    FixCrossingsState, JoinState, JoinToParentState, ModeKind, NAME_PLACEHOLDER,
    ParentCandidate, PointPickState, RenameState, SplitState,
};
use crate::session::EditorSession;

/// Crossing segments are fetched as points below this zoom.
const CROSSING_POINTS_BELOW_ZOOM: f64 = 10.0;

impl EditorSession {
    fn current_simplification(&self) -> SimplificationLevel {
        self.viewport
            .viewport()
            .map_or(SimplificationLevel::Full, |viewport| viewport.simplification())
    }

    // ---- renaming ----

    pub fn begin_rename(&mut self) -> Result<Cmd> {
        let entity = self.require_selection()?;
        let state = RenameState {
            target: entity.id,
            draft: entity.name.clone(),
        };
        self.require_writable()?;
        Ok(self.open_mode(EditMode::Renaming(state)))
    }

    pub fn set_rename_draft(&mut self, name: &str) -> Result<()> {
        let expected = self.wrong_mode(ModeKind::Renaming);
        let EditMode::Renaming(state) = self.edit.mode_mut() else {
            return Err(expected);
        };
        state.draft = name.to_string();
        Ok(())
    }

    pub fn commit_rename(&mut self) -> Result<Cmd> {
        let EditMode::Renaming(state) = self.edit.mode() else {
            return Err(self.wrong_mode(ModeKind::Renaming));
        };
        let new_name = state.draft.trim().to_string();
        if new_name.is_empty() {
            return Err(EditorError::invalid("new name cannot be empty"));
        }
        let request = ApiRequest::Rename {
            id: state.target,
            new_name,
        };
        self.issue_commit(CommitKind::Rename, request)
    }

    // ---- splitting ----

    pub fn begin_split(&mut self) -> Result<Cmd> {
        let target = self.require_selection()?.id;
        self.require_writable()?;
        let overlay = self
            .layers
            .add(OverlayKind::SplitLine, OverlayContent::Polyline(Vec::new()));
        Ok(self.open_mode(EditMode::Splitting(SplitState {
            target,
            line: Vec::new(),
            save_region: false,
            line_overlay: Some(overlay),
        })))
    }

    fn split_state(&mut self) -> Result<&mut SplitState> {
        let expected = self.wrong_mode(ModeKind::Splitting);
        match self.edit.mode_mut() {
            EditMode::Splitting(state) => Ok(state),
            _ => Err(expected),
        }
    }

    fn redraw_split_line(&mut self) -> Result<()> {
        let state = self.split_state()?;
        let overlay = state.line_overlay;
        let line = state.line.clone();
        if let Some(overlay) = overlay {
            self.layers.update(overlay, OverlayContent::Polyline(line));
        }
        Ok(())
    }

    /// Appends a vertex to the split line.
    pub fn add_split_point(&mut self, point: LonLat) -> Result<()> {
        self.split_state()?.line.push(point);
        self.redraw_split_line()
    }

    /// Discards the drawn line and starts over without leaving the mode.
    pub fn restart_split_line(&mut self) -> Result<()> {
        self.split_state()?.line.clear();
        self.redraw_split_line()
    }

    /// Keep the original region as parent of the pieces instead of replacing it.
    pub fn set_split_save_region(&mut self, save_region: bool) -> Result<()> {
        self.split_state()?.save_region = save_region;
        Ok(())
    }

    pub fn commit_split(&mut self) -> Result<Cmd> {
        let state = self.split_state()?;
        if !state.can_commit() {
            return Err(EditorError::invalid("split line needs at least two points"));
        }
        let kind = CommitKind::Split {
            target: state.target,
            keep_original: state.save_region,
        };
        let request = ApiRequest::Split {
            id: state.target,
            line_wkt: linestring_wkt(&state.line),
            save_region: state.save_region,
        };
        self.issue_commit(kind, request)
    }

    // ---- joining ----

    pub fn begin_join(&mut self) -> Result<Cmd> {
        let first = self.require_selection()?.id;
        self.require_writable()?;
        Ok(self.open_mode(EditMode::Joining(JoinState {
            first,
            second: None,
        })))
    }

    /// Picks the region to merge into the first one. It must be held and
    /// differ from the first.
    pub fn pick_join_partner(&mut self, id: BorderId) -> Result<()> {
        let expected = self.wrong_mode(ModeKind::Joining);
        let held = self.cache.contains(id);
        let EditMode::Joining(state) = self.edit.mode_mut() else {
            return Err(expected);
        };
        if id == state.first {
            return Err(EditorError::invalid("cannot join a region with itself"));
        }
        if !held {
            return Err(EditorError::invalid(format!("region {id} is not loaded")));
        }
        state.second = Some(id);
        Ok(())
    }

    pub fn commit_join(&mut self) -> Result<Cmd> {
        let EditMode::Joining(state) = self.edit.mode() else {
            return Err(self.wrong_mode(ModeKind::Joining));
        };
        let Some(second) = state.second else {
            return Err(EditorError::invalid("pick the second region first"));
        };
        let request = ApiRequest::Join {
            id1: state.first,
            id2: second,
        };
        self.issue_commit(CommitKind::Join { absorbed: second }, request)
    }

    // ---- join to parent ----

    pub fn begin_join_to_parent(&mut self) -> Result<Cmd> {
        let entity = self.require_selection()?;
        let Some(parent) = entity.parent_id else {
            return Err(EditorError::invalid(format!(
                "region {} is top-level and has no parent",
                entity.id
            )));
        };
        let target = entity.id;
        self.require_writable()?;
        let simplify = self.current_simplification();
        let cmd = self.open_mode(EditMode::JoinToParent(JoinToParentState {
            target,
            parent,
            parent_overlay: None,
        }));
        Ok(cmd.and(self.issue_preview(
            PreviewStep::ParentBorder,
            ApiRequest::Border {
                id: parent,
                simplify,
            },
        )))
    }

    /// Refetches the parent outline that shows what the merge produces.
    pub fn preview_join_to_parent(&mut self) -> Result<Cmd> {
        let simplify = self.current_simplification();
        let expected = self.wrong_mode(ModeKind::JoinToParent);
        let EditMode::JoinToParent(state) = self.edit.mode_mut() else {
            return Err(expected);
        };
        let parent = state.parent;
        self.layers.remove_slot(&mut state.parent_overlay);
        Ok(self.issue_preview(
            PreviewStep::ParentBorder,
            ApiRequest::Border {
                id: parent,
                simplify,
            },
        ))
    }

    /// Needs the parent outline on the map first.
    pub fn commit_join_to_parent(&mut self) -> Result<Cmd> {
        let EditMode::JoinToParent(state) = self.edit.mode() else {
            return Err(self.wrong_mode(ModeKind::JoinToParent));
        };
        if state.parent_overlay.is_none() {
            return Err(EditorError::invalid(format!(
                "outline of parent {} has not loaded yet",
                state.parent
            )));
        }
        let target = state.target;
        self.issue_commit(
            CommitKind::JoinToParent { target },
            ApiRequest::JoinToParent { id: target },
        )
    }

    // ---- choosing a parent ----

    pub fn begin_choose_parent(&mut self) -> Result<Cmd> {
        let entity = self.require_selection()?;
        let state = ChooseParentState {
            target: entity.id,
            current_parent: entity.parent_id,
            candidates: Vec::new(),
            loaded: false,
            previewed: None,
            candidate_overlay: None,
        };
        self.require_writable()?;
        let target = state.target;
        let cmd = self.open_mode(EditMode::ChoosingParent(state));
        Ok(cmd.and(self.issue_preview(
            PreviewStep::CandidateParents,
            ApiRequest::PotentialParents { id: target },
        )))
    }

    /// Shows one candidate's outline, replacing the previous one. Candidates
    /// listed without geometry are fetched.
    pub fn show_parent_candidate(&mut self, candidate: BorderId) -> Result<Cmd> {
        let simplify = self.current_simplification();
        let expected = self.wrong_mode(ModeKind::ChoosingParent);
        let EditMode::ChoosingParent(state) = self.edit.mode_mut() else {
            return Err(expected);
        };
        let Some(found) = state.candidate(candidate) else {
            return Err(EditorError::invalid(format!(
                "region {candidate} is not a candidate parent"
            )));
        };
        let geometry = found.geometry.clone();
        self.layers.remove_slot(&mut state.candidate_overlay);
        state.previewed = Some(candidate);
        match geometry {
            Some(geometry) => {
                let overlay = self.layers.add(
                    OverlayKind::CandidateParent,
                    OverlayContent::Shapes(vec![geometry]),
                );
                state.candidate_overlay = Some(overlay);
                Ok(Cmd::none())
            }
            None => Ok(self.issue_preview(
                PreviewStep::CandidateBorder { candidate },
                ApiRequest::Border {
                    id: candidate,
                    simplify,
                },
            )),
        }
    }

    /// Assigns `candidate` as the new parent; choosing the current parent
    /// unassigns it instead.
    pub fn assign_parent(&mut self, candidate: BorderId) -> Result<Cmd> {
        let EditMode::ChoosingParent(state) = self.edit.mode() else {
            return Err(self.wrong_mode(ModeKind::ChoosingParent));
        };
        let Some(found) = state.candidate(candidate) else {
            return Err(EditorError::invalid(format!(
                "region {candidate} is not a candidate parent"
            )));
        };
        let parent_id = if found.is_current {
            None
        } else {
            Some(found.id)
        };
        let request = ApiRequest::SetParent {
            id: state.target,
            parent_id,
        };
        self.issue_commit(CommitKind::SetParent, request)
    }

    // ---- dividing ----

    pub fn begin_divide(&mut self) -> Result<Cmd> {
        let entity = self.require_selection()?;
        let target = entity.id;
        let next_level = entity.admin_level.map(|level| level.saturating_add(1));
        self.require_writable()?;
        if !self.capabilities.osm {
            return Err(EditorError::unavailable("osm source data"));
        }
        let params = DivideParams {
            next_level,
            auto_divide: false,
            output_limit_mb: Some(self.thresholds.bad_mb.max(0.0).round() as u32),
            apply_to_similar: false,
        };
        Ok(self.open_mode(EditMode::Dividing(DivideState {
            target,
            params,
            leveled: next_level.is_some(),
            preview: None,
            subregion_overlay: None,
            cluster_overlay: None,
        })))
    }

    fn divide_state(&mut self) -> Result<&mut DivideState> {
        let expected = self.wrong_mode(ModeKind::Dividing);
        match self.edit.mode_mut() {
            EditMode::Dividing(state) => Ok(state),
            _ => Err(expected),
        }
    }

    fn clear_divide_preview(&mut self) -> Result<()> {
        let expected = self.wrong_mode(ModeKind::Dividing);
        let EditMode::Dividing(state) = self.edit.mode_mut() else {
            return Err(expected);
        };
        state.preview = None;
        self.layers.remove_slot(&mut state.subregion_overlay);
        self.layers.remove_slot(&mut state.cluster_overlay);
        Ok(())
    }

    /// Replaces the division parameters and discards the current preview.
    /// Unleveled regions keep auto-divide and apply-to-similar off.
    pub fn set_divide_params(&mut self, mut params: DivideParams) -> Result<()> {
        let state = self.divide_state()?;
        if !state.leveled {
            params.auto_divide = false;
            params.apply_to_similar = false;
        }
        state.params = params;
        self.clear_divide_preview()?;
        self.edit.invalidate_previews();
        Ok(())
    }

    pub fn preview_divide(&mut self) -> Result<Cmd> {
        let state = self.divide_state()?;
        let (target, params) = (state.target, state.params.clone());
        validate_divide_params(&params)?;
        self.clear_divide_preview()?;
        Ok(self.issue_preview(
            PreviewStep::Subdivision,
            ApiRequest::Divide {
                id: target,
                params,
                preview: true,
            },
        ))
    }

    /// Needs a preview with at least two subregions or one cluster.
    pub fn commit_divide(&mut self) -> Result<Cmd> {
        let state = self.divide_state()?;
        if !state.can_commit() {
            return Err(EditorError::invalid(
                "division preview needs at least two subregions or one cluster",
            ));
        }
        let request = ApiRequest::Divide {
            id: state.target,
            params: state.params.clone(),
            preview: false,
        };
        self.issue_commit(CommitKind::Divide, request)
    }

    // ---- point picking ----

    /// Places the marker at `at`, or the viewport center. Clears the selection.
    pub fn begin_point_pick(&mut self, at: Option<LonLat>) -> Result<Cmd> {
        self.require_writable()?;
        if !self.capabilities.osm {
            return Err(EditorError::unavailable("osm source data"));
        }
        let marker = match at {
            Some(point) => point,
            None => self.require_viewport()?.bbox.center(),
        };
        self.select(None);
        let overlay = self
            .layers
            .add(OverlayKind::PointMarker, OverlayContent::Marker(marker));
        Ok(self.open_mode(EditMode::PointPicking(PointPickState {
            marker,
            name_template: NAME_PLACEHOLDER.to_string(),
            matches: Vec::new(),
            marker_overlay: Some(overlay),
        })))
    }

    fn point_state(&mut self) -> Result<&mut PointPickState> {
        let expected = self.wrong_mode(ModeKind::PointPicking);
        match self.edit.mode_mut() {
            EditMode::PointPicking(state) => Ok(state),
            _ => Err(expected),
        }
    }

    /// Drags the marker. The previous match list no longer applies.
    pub fn move_point_marker(&mut self, to: LonLat) -> Result<()> {
        let state = self.point_state()?;
        state.marker = to;
        state.matches.clear();
        let overlay = state.marker_overlay;
        if let Some(overlay) = overlay {
            self.layers.update(overlay, OverlayContent::Marker(to));
        }
        self.edit.invalidate_previews();
        Ok(())
    }

    pub fn set_point_name_template(&mut self, template: &str) -> Result<()> {
        self.point_state()?.name_template = template.to_string();
        Ok(())
    }

    /// Lists the source regions containing the marker.
    pub fn list_point_matches(&mut self) -> Result<Cmd> {
        let marker = self.point_state()?.marker;
        Ok(self.issue_preview(PreviewStep::PointLookup, ApiRequest::Point { at: marker }))
    }

    /// Creates a region from the listed source region `id`.
    pub fn accept_point_match(&mut self, id: BorderId) -> Result<Cmd> {
        let state = self.point_state()?;
        let Some(matched) = state.find(id) else {
            return Err(EditorError::invalid(format!("region {id} is not listed")));
        };
        let name = state.region_name(matched);
        self.issue_commit(CommitKind::FromOsm, ApiRequest::FromOsm { id, name })
    }

    /// Divides a whole country. Only offered for admin level 2 matches.
    pub fn auto_divide_country(&mut self, id: BorderId) -> Result<Cmd> {
        let state = self.point_state()?;
        let Some(matched) = state.find(id) else {
            return Err(EditorError::invalid(format!("region {id} is not listed")));
        };
        if matched.admin_level != Some(2) {
            return Err(EditorError::invalid(format!(
                "region {id} is not a country"
            )));
        }
        self.issue_commit(
            CommitKind::AutoDivideCountry,
            ApiRequest::AutoDivideCountry { id },
        )
    }

    // ---- fixing crossings ----

    pub fn begin_fix_crossings(&mut self) -> Result<Cmd> {
        let target = self.require_selection()?.id;
        self.require_writable()?;
        if !self.capabilities.crossing {
            return Err(EditorError::unavailable("crossing segments"));
        }
        let viewport = self.require_viewport()?;
        let cmd = self.open_mode(EditMode::FixingCrossings(FixCrossingsState {
            target,
            segments: Vec::new(),
            selected: BTreeSet::new(),
            segment_overlay: None,
            repair_overlay: None,
        }));
        Ok(cmd.and(self.issue_preview(
            PreviewStep::CrossingSegments,
            ApiRequest::Crossing {
                bbox: viewport.bbox,
                points: viewport.zoom < CROSSING_POINTS_BELOW_ZOOM,
            },
        )))
    }

    fn crossings_state(&mut self) -> Result<&mut FixCrossingsState> {
        let expected = self.wrong_mode(ModeKind::FixingCrossings);
        match self.edit.mode_mut() {
            EditMode::FixingCrossings(state) => Ok(state),
            _ => Err(expected),
        }
    }

    /// Flips one segment in the local selection and drops the repair preview
    /// drawn for the old selection. Returns whether it is now selected.
    pub fn toggle_crossing_segment(&mut self, id: &str) -> Result<bool> {
        let state = self.crossings_state()?;
        let Some(segment) = state.segments.iter().find(|segment| segment.id.0 == id) else {
            return Err(EditorError::invalid(format!("segment {id} is not loaded")));
        };
        let segment_id = segment.id.clone();
        let selected = if state.selected.remove(&segment_id) {
            false
        } else {
            state.selected.insert(segment_id);
            true
        };
        let mut repair_overlay = state.repair_overlay.take();
        self.layers.remove_slot(&mut repair_overlay);
        self.edit.invalidate_previews();
        Ok(selected)
    }

    pub fn preview_crossing_fix(&mut self) -> Result<Cmd> {
        let expected = self.wrong_mode(ModeKind::FixingCrossings);
        let EditMode::FixingCrossings(state) = self.edit.mode_mut() else {
            return Err(expected);
        };
        let request = ApiRequest::FixCrossing {
            region: state.target,
            segments: state.selected.iter().cloned().collect(),
            preview: true,
        };
        self.layers.remove_slot(&mut state.repair_overlay);
        Ok(self.issue_preview(PreviewStep::CrossingRepair, request))
    }

    pub fn commit_crossing_fix(&mut self) -> Result<Cmd> {
        let state = self.crossings_state()?;
        if state.selected.is_empty() {
            return Err(EditorError::invalid("no crossing segments selected"));
        }
        let request = ApiRequest::FixCrossing {
            region: state.target,
            segments: state.selected.iter().cloned().collect(),
            preview: false,
        };
        self.issue_commit(CommitKind::FixCrossing, request)
    }

    // ---- backups ----

    pub fn open_backups(&mut self) -> Result<Cmd> {
        self.require_writable()?;
        if !self.capabilities.backup {
            return Err(EditorError::unavailable("backups"));
        }
        let cmd = self.open_mode(EditMode::BackupBrowsing(BackupState::default()));
        Ok(cmd.and(self.issue_preview(PreviewStep::BackupList, ApiRequest::BackupList)))
    }

    fn backup_state(&self) -> Result<&BackupState> {
        match self.edit.mode() {
            EditMode::BackupBrowsing(state) => Ok(state),
            _ => Err(self.wrong_mode(ModeKind::BackupBrowsing)),
        }
    }

    pub fn save_backup(&mut self) -> Result<Cmd> {
        self.backup_state()?;
        self.issue_commit(CommitKind::BackupSave, ApiRequest::Backup)
    }

    pub fn restore_backup(&mut self, timestamp: &str) -> Result<Cmd> {
        if self.backup_state()?.find(timestamp).is_none() {
            return Err(EditorError::invalid(format!("no backup at {timestamp}")));
        }
        self.issue_commit(
            CommitKind::BackupRestore,
            ApiRequest::Restore {
                timestamp: timestamp.to_string(),
            },
        )
    }

    /// The newest backup cannot be deleted.
    pub fn delete_backup(&mut self, timestamp: &str) -> Result<Cmd> {
        if !self.backup_state()?.can_delete(timestamp) {
            return Err(EditorError::invalid(format!(
                "backup {timestamp} cannot be deleted"
            )));
        }
        self.issue_commit(
            CommitKind::BackupDelete,
            ApiRequest::BackupDelete {
                timestamp: timestamp.to_string(),
            },
        )
    }

    // ---- preview responses ----

    /// Applies a preview response for the open mode. The caller has already
    /// checked the epoch.
    pub(crate) fn apply_preview(
        &mut self,
        step: PreviewStep,
        endpoint: &str,
        body: Value,
    ) -> Result<Cmd> {
        debug!(target: "borders.session", endpoint, ?step, "preview response");
        match step {
            PreviewStep::ParentBorder => {
                let reply: BorderReply = decode(endpoint, body)?;
                let EditMode::JoinToParent(state) = self.edit.mode_mut() else {
                    return Ok(Cmd::none());
                };
                self.layers.remove_slot(&mut state.parent_overlay);
                if let Some(geometry) = reply.geojson.geometry {
                    state.parent_overlay = Some(self.layers.add(
                        OverlayKind::ParentPreview,
                        OverlayContent::Shapes(vec![geometry]),
                    ));
                }
            }
            PreviewStep::CandidateParents => {
                let reply: PotentialParentsReply = decode(endpoint, body)?;
                let EditMode::ChoosingParent(state) = self.edit.mode_mut() else {
                    return Ok(Cmd::none());
                };
                let current = state.current_parent;
                state.candidates = reply
                    .parents
                    .into_iter()
                    .map(|feature| {
                        let props = feature.properties;
                        ParentCandidate {
                            id: props.id,
                            name: props
                                .name
                                .filter(|name| !name.is_empty())
                                .unwrap_or_else(|| props.id.to_string()),
                            admin_level: props.admin_level,
                            geometry: feature.geometry,
                            is_current: Some(props.id) == current,
                        }
                    })
                    .collect();
                state.loaded = true;
            }
            PreviewStep::CandidateBorder { candidate } => {
                let reply: BorderReply = decode(endpoint, body)?;
                let EditMode::ChoosingParent(state) = self.edit.mode_mut() else {
                    return Ok(Cmd::none());
                };
                if state.previewed != Some(candidate) {
                    return Ok(Cmd::none());
                }
                if let Some(geometry) = reply.geojson.geometry {
                    if let Some(entry) = state
                        .candidates
                        .iter_mut()
                        .find(|entry| entry.id == candidate)
                    {
                        entry.geometry = Some(geometry.clone());
                    }
                    self.layers.remove_slot(&mut state.candidate_overlay);
                    state.candidate_overlay = Some(self.layers.add(
                        OverlayKind::CandidateParent,
                        OverlayContent::Shapes(vec![geometry]),
                    ));
                }
            }
            PreviewStep::Subdivision => {
                let reply: DividePreviewReply = decode(endpoint, body)?;
                let EditMode::Dividing(state) = self.edit.mode_mut() else {
                    return Ok(Cmd::none());
                };
                self.layers.remove_slot(&mut state.subregion_overlay);
                self.layers.remove_slot(&mut state.cluster_overlay);
                let subregions = shapes(reply.subregions.features);
                let clusters = reply
                    .clusters
                    .map(|clusters| shapes(clusters.features))
                    .unwrap_or_default();
                state.preview = Some(DividePreview {
                    subregions: subregions.len(),
                    clusters: clusters.len(),
                });
                if !subregions.is_empty() {
                    state.subregion_overlay = Some(
                        self.layers
                            .add(OverlayKind::Subregions, OverlayContent::Shapes(subregions)),
                    );
                }
                if !clusters.is_empty() {
                    state.cluster_overlay = Some(
                        self.layers
                            .add(OverlayKind::Clusters, OverlayContent::Shapes(clusters)),
                    );
                }
            }
            PreviewStep::PointLookup => {
                let reply: PointReply = decode(endpoint, body)?;
                if let EditMode::PointPicking(state) = self.edit.mode_mut() {
                    state.matches = reply.borders;
                }
            }
            PreviewStep::CrossingSegments => {
                let reply: CrossingReply = decode(endpoint, body)?;
                let EditMode::FixingCrossings(state) = self.edit.mode_mut() else {
                    return Ok(Cmd::none());
                };
                let target = state.target;
                state.segments = reply
                    .features
                    .into_iter()
                    .map(|feature| CrossingSegment {
                        id: feature.properties.id,
                        region: feature.properties.region,
                        geometry: feature.geometry,
                    })
                    .collect();
                state.selected = state
                    .segments
                    .iter()
                    .filter(|segment| segment.region == Some(target))
                    .map(|segment| segment.id.clone())
                    .collect();
                let drawn: Vec<Geometry> = state
                    .segments
                    .iter()
                    .filter_map(|segment| segment.geometry.clone())
                    .collect();
                self.layers.remove_slot(&mut state.segment_overlay);
                state.segment_overlay = Some(
                    self.layers
                        .add(OverlayKind::CrossingSegments, OverlayContent::Shapes(drawn)),
                );
            }
            PreviewStep::CrossingRepair => {
                // A repair that changes nothing comes back without geometry.
                let geometry = match body.get("geometry") {
                    Some(raw) => decode::<Option<Geometry>>(endpoint, raw.clone())?,
                    None => None,
                };
                let EditMode::FixingCrossings(state) = self.edit.mode_mut() else {
                    return Ok(Cmd::none());
                };
                self.layers.remove_slot(&mut state.repair_overlay);
                if let Some(geometry) = geometry {
                    state.repair_overlay = Some(self.layers.add(
                        OverlayKind::CrossingRepair,
                        OverlayContent::Shapes(vec![geometry]),
                    ));
                }
            }
            PreviewStep::BackupList => {
                let reply: BackupListReply = decode(endpoint, body)?;
                if let EditMode::BackupBrowsing(state) = self.edit.mode_mut() {
                    state.backups = reply.backups;
                    state.loaded = true;
                }
            }
        }
        Ok(Cmd::none())
    }
}

fn validate_divide_params(params: &DivideParams) -> Result<()> {
    if params.next_level.is_none() {
        return Err(EditorError::invalid("next admin level is required"));
    }
    if params.auto_divide && params.output_limit_mb.is_none_or(|limit| limit == 0) {
        return Err(EditorError::invalid(
            "auto-divide needs an output size threshold",
        ));
    }
    Ok(())
}

fn shapes<P>(features: Vec<crate::entity::Feature<P>>) -> Vec<Geometry> {
    features
        .into_iter()
        .filter_map(|feature| feature.geometry)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::api::DivideParams;
    use crate::command::{Cmd, Ticket};
    use crate::entity::BorderId;
    use crate::error::EditorError;
    use crate::geometry::{BBox, LonLat};
    use crate::layers::OverlayKind;
    use crate::modes::{EditMode, ModeKind};
    use crate::session::{EditorSession, SessionOptions};
    use crate::viewport::Viewport;

    fn feature(id: i64, parent: Option<i64>, level: Option<u8>) -> serde_json::Value {
        json!({
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]},
            "properties": {"id": id, "name": format!("R{id}"), "parent_id": parent, "admin_level": level, "count_k": 5}
        })
    }

    fn shape() -> serde_json::Value {
        json!({"geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]}, "properties": {}})
    }

    fn ticket(cmd: &Cmd) -> Ticket {
        *cmd.tickets().last().expect("request issued")
    }

    fn session_with(capabilities: serde_json::Value) -> EditorSession {
        let mut session = EditorSession::new(SessionOptions::default());
        let cmd = session.init();
        session.deliver(ticket(&cmd), Ok(capabilities));
        let cmd = session.settle_viewport(Viewport {
            bbox: BBox::new(0.0, 0.0, 2.0, 2.0).expect("bbox"),
            zoom: 8.0,
        });
        let features = vec![
            feature(1, Some(10), Some(4)),
            feature(2, None, Some(4)),
            feature(3, None, None),
        ];
        session.deliver(
            ticket(&cmd),
            Ok(json!({"geojson": {"features": features}})),
        );
        session
    }

    fn session() -> EditorSession {
        session_with(json!({"osm": true, "backup": true, "crossing": true}))
    }

    #[test]
    fn split_line_is_drawn_redrawn_and_submitted_as_wkt() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        session.begin_split().expect("split");
        session.add_split_point(LonLat::new(0.5, 0.0)).expect("point");
        assert!(matches!(
            session.commit_split(),
            Err(EditorError::InvalidArgument { .. })
        ));

        session.add_split_point(LonLat::new(0.5, 1.0)).expect("point");
        session.restart_split_line().expect("restart");
        assert!(session.commit_split().is_err());

        session.add_split_point(LonLat::new(0.25, 0.0)).expect("point");
        session.add_split_point(LonLat::new(0.25, 1.0)).expect("point");
        let cmd = session.commit_split().expect("commit");
        let Cmd::Request { request, .. } = cmd else {
            panic!("expected request");
        };
        assert!(request.params().contains(&(
            "line",
            "LINESTRING(0.25 0,0.25 1)".to_string()
        )));
    }

    #[test]
    fn join_to_parent_requires_a_parent_and_previews_it() {
        let mut session = session();
        session.select(Some(BorderId(2)));
        assert!(matches!(
            session.begin_join_to_parent(),
            Err(EditorError::InvalidArgument { .. })
        ));

        session.select(Some(BorderId(1)));
        let cmd = session.begin_join_to_parent().expect("join to parent");
        let Cmd::Request { ticket: fetch, request } = &cmd else {
            panic!("expected the parent outline fetch");
        };
        assert!(request.params().contains(&("id", "10".to_string())));
        session.deliver(*fetch, Ok(json!({"status": "ok", "geojson": shape()})));
        assert_eq!(session.layers().count_of(OverlayKind::ParentPreview), 1);

        let cmd = session.preview_join_to_parent().expect("preview");
        assert_eq!(session.layers().count_of(OverlayKind::ParentPreview), 0);
        session.deliver(ticket(&cmd), Ok(json!({"status": "ok", "geojson": shape()})));
        assert_eq!(session.layers().count_of(OverlayKind::ParentPreview), 1);

        session.cancel();
        assert!(session.layers().is_empty());
    }

    #[test]
    fn join_to_parent_waits_for_the_parent_outline() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        let cmd = session.begin_join_to_parent().expect("join to parent");
        assert!(matches!(
            session.commit_join_to_parent(),
            Err(EditorError::InvalidArgument { .. })
        ));

        session.deliver(ticket(&cmd), Ok(json!({"status": "ok", "geojson": shape()})));
        let commit = session.commit_join_to_parent().expect("commit");
        let Cmd::Request { request, .. } = commit else {
            panic!("expected request");
        };
        assert_eq!(request.endpoint(), "join_to_parent");
    }

    #[test]
    fn choosing_the_current_parent_unassigns_it() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        let cmd = session.begin_choose_parent().expect("choose");
        session.deliver(
            ticket(&cmd),
            Ok(json!({"parents": [
                {"geometry": null, "properties": {"id": 10, "name": "Old", "admin_level": 3}},
                {"geometry": null, "properties": {"id": 11, "admin_level": 3}}
            ]})),
        );
        let EditMode::ChoosingParent(state) = session.mode() else {
            panic!("expected choosing parent");
        };
        assert_eq!(state.candidates[1].name, "11");

        let cmd = session.assign_parent(BorderId(10)).expect("unassign");
        let Cmd::Request { request, .. } = cmd else {
            panic!("expected request");
        };
        assert!(request.params().contains(&("parent_id", String::new())));
    }

    #[test]
    fn unleveled_regions_cannot_auto_divide() {
        let mut session = session();
        session.select(Some(BorderId(3)));
        session.begin_divide().expect("divide");
        session
            .set_divide_params(DivideParams {
                next_level: Some(5),
                auto_divide: true,
                output_limit_mb: Some(50),
                apply_to_similar: true,
            })
            .expect("params");
        let EditMode::Dividing(state) = session.mode() else {
            panic!("expected dividing");
        };
        assert!(!state.params.auto_divide);
        assert!(!state.params.apply_to_similar);
    }

    #[test]
    fn changing_divide_params_discards_the_preview() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        session.begin_divide().expect("divide");
        let cmd = session.preview_divide().expect("preview");
        session.deliver(
            ticket(&cmd),
            Ok(json!({"subregions": {"features": [shape(), shape()]}})),
        );
        assert_eq!(session.layers().count_of(OverlayKind::Subregions), 1);

        let commit = session.commit_divide().expect("commit");
        let cmd = session.deliver(ticket(&commit), Ok(json!({"status": "no_subregions"})));
        assert_eq!(cmd.notices().len(), 1);
        assert_eq!(session.mode_kind(), ModeKind::Dividing);

        let EditMode::Dividing(state) = session.mode() else {
            panic!("expected dividing");
        };
        let params = state.params.clone();
        session.set_divide_params(params).expect("params");
        assert!(session.commit_divide().is_err());
        assert_eq!(session.layers().count_of(OverlayKind::Subregions), 0);
    }

    #[test]
    fn divide_preview_for_replaced_params_is_ignored() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        session.begin_divide().expect("divide");
        let stale = session.preview_divide().expect("preview");
        session
            .set_divide_params(DivideParams {
                next_level: Some(8),
                auto_divide: false,
                output_limit_mb: None,
                apply_to_similar: false,
            })
            .expect("params");

        let cmd = session.deliver(
            ticket(&stale),
            Ok(json!({"subregions": {"features": [shape(), shape()]}})),
        );
        assert!(cmd.is_none());
        let EditMode::Dividing(state) = session.mode() else {
            panic!("expected dividing");
        };
        assert_eq!(state.preview, None);
        assert!(session.commit_divide().is_err());
        assert_eq!(session.layers().count_of(OverlayKind::Subregions), 0);

        let fresh = session.preview_divide().expect("preview");
        session.deliver(
            ticket(&fresh),
            Ok(json!({"subregions": {"features": [shape(), shape()]}})),
        );
        assert!(session.commit_divide().is_ok());
    }

    #[test]
    fn point_matches_for_the_old_marker_are_ignored() {
        let mut session = session();
        session
            .begin_point_pick(Some(LonLat::new(0.1, 0.1)))
            .expect("point");
        let stale = session.list_point_matches().expect("list");
        session
            .move_point_marker(LonLat::new(1.9, 1.9))
            .expect("move");
        session.deliver(
            ticket(&stale),
            Ok(json!({"borders": [{"id": -5, "name": "Old spot", "admin_level": 6, "area": 1.0}]})),
        );

        let EditMode::PointPicking(state) = session.mode() else {
            panic!("expected point picking");
        };
        assert!(state.matches.is_empty());
        assert!(session.accept_point_match(BorderId(-5)).is_err());
    }

    #[test]
    fn point_pick_lists_matches_and_names_from_template() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        session.begin_point_pick(None).expect("point");
        assert_eq!(session.selected(), None);
        let cmd = session.list_point_matches().expect("list");
        session.deliver(
            ticket(&cmd),
            Ok(json!({"borders": [
                {"id": -5, "name": "France", "admin_level": 2, "area": 5.0},
                {"id": -6, "name": "Paris", "admin_level": 8, "area": 1.0}
            ]})),
        );
        session.set_point_name_template("* region").expect("template");
        assert!(session.auto_divide_country(BorderId(-6)).is_err());

        let cmd = session.accept_point_match(BorderId(-6)).expect("accept");
        let Cmd::Request { request, .. } = cmd else {
            panic!("expected request");
        };
        assert!(request.params().contains(&("name", "Paris region".to_string())));
    }

    #[test]
    fn crossing_segments_of_the_target_are_preselected() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        let cmd = session.begin_fix_crossings().expect("crossings");
        session.deliver(
            ticket(&cmd),
            Ok(json!({"features": [
                {"geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}, "properties": {"id": 7, "region": 1}},
                {"geometry": {"type": "LineString", "coordinates": [[1.0, 0.0], [0.0, 1.0]]}, "properties": {"id": 8, "region": 2}}
            ]})),
        );
        let EditMode::FixingCrossings(state) = session.mode() else {
            panic!("expected fixing crossings");
        };
        assert_eq!(state.selected.len(), 1);
        assert!(session.toggle_crossing_segment("8").expect("toggle"));
        assert!(!session.toggle_crossing_segment("7").expect("toggle"));

        let cancel = session.cancel();
        assert_eq!(session.mode_kind(), ModeKind::None);
        assert_eq!(cancel.tickets().len(), 1);
    }

    #[test]
    fn repair_preview_follows_the_segment_selection() {
        let mut session = session();
        session.select(Some(BorderId(1)));
        let cmd = session.begin_fix_crossings().expect("crossings");
        session.deliver(
            ticket(&cmd),
            Ok(json!({"features": [
                {"geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}, "properties": {"id": 7, "region": 1}},
                {"geometry": {"type": "LineString", "coordinates": [[1.0, 0.0], [0.0, 1.0]]}, "properties": {"id": 8, "region": 2}}
            ]})),
        );
        let repair = json!({"geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}});

        let cmd = session.preview_crossing_fix().expect("preview");
        session.deliver(ticket(&cmd), Ok(repair.clone()));
        assert_eq!(session.layers().count_of(OverlayKind::CrossingRepair), 1);
        session.toggle_crossing_segment("8").expect("toggle");
        assert_eq!(session.layers().count_of(OverlayKind::CrossingRepair), 0);

        let stale = session.preview_crossing_fix().expect("preview");
        session.toggle_crossing_segment("8").expect("toggle");
        let cmd = session.deliver(ticket(&stale), Ok(repair));
        assert!(cmd.is_none());
        assert_eq!(session.layers().count_of(OverlayKind::CrossingRepair), 0);
        assert_eq!(session.layers().count_of(OverlayKind::CrossingSegments), 1);
    }

    #[test]
    fn backups_require_server_support_and_protect_the_newest() {
        let mut plain = session_with(json!({"osm": true}));
        assert!(matches!(
            plain.open_backups(),
            Err(EditorError::Unavailable { .. })
        ));

        let mut session = session();
        let cmd = session.open_backups().expect("backups");
        session.deliver(
            ticket(&cmd),
            Ok(json!({"backups": [
                {"timestamp": "2024-02-01", "text": "Feb", "count": 10},
                {"timestamp": "2024-01-01", "text": "Jan", "count": 9}
            ]})),
        );
        assert!(session.delete_backup("2024-02-01").is_err());
        assert!(session.delete_backup("2024-01-01").is_ok());
    }

    #[test]
    fn read_only_server_refuses_every_workflow() {
        let mut session = session_with(json!({"readonly": true, "osm": true}));
        session.select(Some(BorderId(1)));
        assert!(matches!(session.begin_split(), Err(EditorError::ReadOnly)));
        assert!(matches!(session.begin_rename(), Err(EditorError::ReadOnly)));
        assert!(matches!(
            session.begin_point_pick(None),
            Err(EditorError::ReadOnly)
        ));
        assert_eq!(session.mode_kind(), ModeKind::None);
    }
}
