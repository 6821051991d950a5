//! The editing session: one explicit object owning the border cache, the
//! selection, the viewport sync and the active edit mode.
//!
//! Gestures mutate local state synchronously and return a [`Cmd`] with the
//! requests to issue. Responses come back through [`EditorSession::deliver`]
//! with the [`Ticket`] they were issued under; stale ones are dropped there.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{
    ApiRequest, BboxReply, SearchReply, ServerCapabilities, SmallReply, SmallRing, StatusReply,
    decode,
};
use crate::cache::BorderCache;
use crate::classify::{FilterMode, Thresholds};
use crate::command::{ActionKind, Cmd, CommitKind, Notice, PreviewStep, Purpose, Ticket};
use crate::entity::{BorderEntity, BorderId, SimplificationLevel};
use crate::error::{EditorError, Result};
use crate::geometry::{BBox, Geometry};
use crate::layers::MapLayers;
use crate::modes::{EditMode, EditSession, ModeKind};
use crate::selection::{BorderDetails, ClickTarget, SelectionController};
use crate::settings::Settings;
use crate::viewport::{Viewport, ViewportSync};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub bytes_per_node: i64,
    pub min_fetch_zoom: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SessionOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            bytes_per_node: settings.bytes_per_node,
            min_fetch_zoom: settings.min_fetch_zoom,
        }
    }
}

#[derive(Debug)]
pub struct EditorSession {
    pub(crate) bytes_per_node: i64,
    pub(crate) capabilities: ServerCapabilities,
    pub(crate) thresholds: Thresholds,
    pub(crate) filter: FilterMode,
    pub(crate) cache: BorderCache,
    pub(crate) render: Vec<BorderId>,
    pub(crate) selection: SelectionController,
    pub(crate) details: Option<BorderDetails>,
    pub(crate) viewport: ViewportSync,
    pub(crate) layers: MapLayers,
    pub(crate) edit: EditSession,
    next_seq: u64,
    pending: BTreeMap<u64, &'static str>,
    commit_in_flight: Option<u64>,
}

impl EditorSession {
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        let capabilities = ServerCapabilities::default();
        let thresholds =
            Thresholds::from_output_limit_kb(capabilities.mwm_size_thr, options.bytes_per_node);
        Self {
            bytes_per_node: options.bytes_per_node,
            capabilities,
            thresholds,
            filter: FilterMode::default(),
            cache: BorderCache::new(),
            render: Vec::new(),
            selection: SelectionController::new(),
            details: None,
            viewport: ViewportSync::new(options.min_fetch_zoom),
            layers: MapLayers::new(),
            edit: EditSession::new(),
            next_seq: 0,
            pending: BTreeMap::new(),
            commit_in_flight: None,
        }
    }

    /// Asks the server for its capabilities.
    pub fn init(&mut self) -> Cmd {
        self.issue(Purpose::Capabilities, ApiRequest::Config)
    }

    // ---- read access for the render layer ----

    #[must_use]
    pub fn cache(&self) -> &BorderCache {
        &self.cache
    }

    /// Border ids in drawing order after the last applied fetch.
    #[must_use]
    pub fn render_order(&self) -> &[BorderId] {
        &self.render
    }

    #[must_use]
    pub fn selected(&self) -> Option<BorderId> {
        self.selection.selected()
    }

    #[must_use]
    pub fn details(&self) -> Option<&BorderDetails> {
        self.details.as_ref()
    }

    #[must_use]
    pub fn mode(&self) -> &EditMode {
        self.edit.mode()
    }

    #[must_use]
    pub fn mode_kind(&self) -> ModeKind {
        self.edit.kind()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.edit.epoch()
    }

    #[must_use]
    pub fn layers(&self) -> &MapLayers {
        &self.layers
    }

    #[must_use]
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    #[must_use]
    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport.viewport()
    }

    #[must_use]
    pub fn viewport_generation(&self) -> u64 {
        self.viewport.generation()
    }

    #[must_use]
    pub fn small_markers(&self) -> &[SmallRing] {
        self.viewport.small_markers()
    }

    #[must_use]
    pub fn legacy_borders(&self) -> &[Geometry] {
        self.viewport.legacy_borders()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.capabilities.readonly
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn commit_in_flight(&self) -> bool {
        self.commit_in_flight.is_some()
    }

    // ---- request plumbing ----

    pub(crate) fn issue(&mut self, purpose: Purpose, request: ApiRequest) -> Cmd {
        self.next_seq = self.next_seq.saturating_add(1);
        let ticket = Ticket {
            seq: self.next_seq,
            purpose,
        };
        self.pending.insert(ticket.seq, request.endpoint());
        Cmd::Request { ticket, request }
    }

    /// Issues a preview read tagged with the current preview epoch.
    pub(crate) fn issue_preview(&mut self, step: PreviewStep, request: ApiRequest) -> Cmd {
        let epoch = self.edit.preview_epoch();
        self.issue(Purpose::Preview { epoch, step }, request)
    }

    /// Issues a workflow commit. Only one mutation may be in flight.
    pub(crate) fn issue_commit(&mut self, kind: CommitKind, request: ApiRequest) -> Result<Cmd> {
        self.require_no_commit()?;
        let epoch = self.edit.epoch();
        let cmd = self.issue(Purpose::Commit { epoch, kind }, request);
        self.commit_in_flight = Some(self.next_seq);
        Ok(cmd)
    }

    fn issue_action(&mut self, kind: ActionKind, request: ApiRequest) -> Result<Cmd> {
        self.require_no_commit()?;
        let cmd = self.issue(Purpose::Action { kind }, request);
        self.commit_in_flight = Some(self.next_seq);
        Ok(cmd)
    }

    pub(crate) fn require_selection(&self) -> Result<&BorderEntity> {
        self.selection
            .selected()
            .and_then(|id| self.cache.entity(id))
            .ok_or(EditorError::NoSelection)
    }

    pub(crate) fn require_writable(&self) -> Result<()> {
        if self.capabilities.readonly {
            return Err(EditorError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn require_no_commit(&self) -> Result<()> {
        if self.commit_in_flight.is_some() {
            return Err(EditorError::Busy);
        }
        Ok(())
    }

    /// The error for a gesture that belongs to `expected` but arrived in the
    /// open mode.
    pub(crate) fn wrong_mode(&self, expected: ModeKind) -> EditorError {
        EditorError::WrongMode {
            expected: expected.as_str(),
            active: self.edit.kind().as_str(),
        }
    }

    // ---- viewport ----

    /// A pan or zoom settled.
    pub fn settle_viewport(&mut self, viewport: Viewport) -> Cmd {
        let plan = self.viewport.settle(viewport);
        self.issue_plan(plan)
    }

    /// Re-fetches the current viewport, superseding any fetch in flight.
    pub fn refresh(&mut self) -> Cmd {
        let plan = self.viewport.refresh();
        self.issue_plan(plan)
    }

    fn issue_plan(&mut self, plan: Vec<(Purpose, ApiRequest)>) -> Cmd {
        let cmds = plan
            .into_iter()
            .map(|(purpose, request)| self.issue(purpose, request))
            .collect();
        Cmd::batch(cmds)
    }

    /// Switches the coloring rule. Entities are not touched; only colors.
    pub fn set_filter(&mut self, filter: FilterMode) -> Cmd {
        self.filter = filter;
        self.cache.recolor(filter, &self.thresholds);
        self.viewport
            .set_small_markers_enabled(filter == FilterMode::Topology);
        self.refresh()
    }

    /// Operator-entered size thresholds in MB, normalized before use.
    pub fn set_thresholds(&mut self, good_mb: f64, bad_mb: f64) -> Cmd {
        self.thresholds = Thresholds::normalized(good_mb, bad_mb, self.bytes_per_node);
        self.cache.recolor(self.filter, &self.thresholds);
        self.refresh()
    }

    pub fn set_legacy_overlay(&mut self, enabled: bool) -> Result<Cmd> {
        if !self.viewport.set_legacy_enabled(enabled) {
            return Err(EditorError::unavailable("legacy borders table"));
        }
        Ok(self.refresh())
    }

    /// Looks up a place by name. One-character queries are not sent.
    pub fn search(&mut self, query: &str) -> Cmd {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Cmd::none();
        }
        self.issue(
            Purpose::Search,
            ApiRequest::Search {
                query: query.to_string(),
            },
        )
    }

    // ---- selection ----

    /// Moves the selection; an id the cache does not hold clears it.
    /// Selecting anything but the region whose parent is being chosen
    /// cancels that mode first.
    pub fn select(&mut self, id: Option<BorderId>) -> Option<&BorderDetails> {
        if self.edit.kind() == ModeKind::ChoosingParent && id != self.edit.mode().target() {
            self.edit.close(&mut self.layers);
        }
        self.details = self
            .selection
            .select(id, &mut self.cache, self.bytes_per_node);
        self.details.as_ref()
    }

    /// Routes a map click. While joining, a click picks the second region.
    pub fn click(&mut self, target: ClickTarget) -> Cmd {
        let resolved = target.resolve();
        if self.edit.kind() == ModeKind::Joining {
            if let Some(id) = resolved
                && let Err(error) = self.pick_join_partner(id)
            {
                debug!(target: "borders.session", %error, "ignored join pick");
            }
            return Cmd::none();
        }
        self.select(resolved);
        Cmd::none()
    }

    // ---- one-shot actions on the selection ----

    fn selection_for_action(&self) -> Result<BorderId> {
        let entity = self.require_selection()?;
        self.require_writable()?;
        Ok(entity.id)
    }

    /// Disables an enabled region, enables a disabled one.
    pub fn toggle_disabled(&mut self) -> Result<Cmd> {
        let id = self.selection_for_action()?;
        let disabled = self.require_selection()?.disabled;
        if disabled {
            self.issue_action(ActionKind::Enable, ApiRequest::Enable { id })
        } else {
            self.issue_action(ActionKind::Disable, ApiRequest::Disable { id })
        }
    }

    pub fn delete_selected(&mut self, confirmed: bool) -> Result<Cmd> {
        let id = self.selection_for_action()?;
        if !confirmed {
            return Err(EditorError::invalid(format!(
                "deleting region {id} needs confirmation"
            )));
        }
        self.issue_action(
            ActionKind::Delete { target: id },
            ApiRequest::Delete { id },
        )
    }

    /// Sets the selection's comment; an empty comment clears it.
    pub fn set_comment(&mut self, comment: &str) -> Result<Cmd> {
        let id = self.selection_for_action()?;
        self.issue_action(
            ActionKind::Comment,
            ApiRequest::Comment {
                id,
                comment: comment.to_string(),
            },
        )
    }

    pub fn clear_comment(&mut self) -> Result<Cmd> {
        self.set_comment("")
    }

    pub fn simple_split(&mut self) -> Result<Cmd> {
        let id = self.selection_for_action()?;
        self.issue_action(ActionKind::SimpleSplit, ApiRequest::SimpleSplit { id })
    }

    /// Keeps only the largest ring of the selection.
    pub fn chop_largest(&mut self) -> Result<Cmd> {
        let id = self.selection_for_action()?;
        self.issue_action(ActionKind::ChopLargest, ApiRequest::ChopLargest { id })
    }

    pub fn hull(&mut self) -> Result<Cmd> {
        let id = self.selection_for_action()?;
        self.issue_action(ActionKind::Hull, ApiRequest::Hull { id })
    }

    // ---- mode lifecycle ----

    /// Cancels the open mode; a no-op when none is open. Abandoning a
    /// crossing fix re-fetches the viewport.
    pub fn cancel(&mut self) -> Cmd {
        let cancelled = self.edit.close(&mut self.layers);
        self.after_cancel(cancelled)
    }

    /// Opens `mode`, cancelling the open one first.
    pub(crate) fn open_mode(&mut self, mode: EditMode) -> Cmd {
        let cancelled = self.edit.open(mode, &mut self.layers);
        self.after_cancel(cancelled)
    }

    fn after_cancel(&mut self, cancelled: ModeKind) -> Cmd {
        if cancelled == ModeKind::FixingCrossings {
            self.refresh()
        } else {
            Cmd::none()
        }
    }

    /// Abandons every local edit: cancels the open mode, clears the selection
    /// and the cache, asks the server to drop pending edits, then re-fetches.
    pub fn start_over(&mut self) -> Result<Cmd> {
        self.require_writable()?;
        self.require_no_commit()?;
        let cancelled = self.edit.close(&mut self.layers);
        self.selection.forget();
        self.details = None;
        self.cache.clear();
        self.render.clear();
        info!(
            target: "borders.session",
            cancelled = cancelled.as_str(),
            "starting over"
        );
        let cmd = self.issue(Purpose::StartOver, ApiRequest::StartOver);
        self.commit_in_flight = Some(self.next_seq);
        Ok(cmd)
    }

    /// `.poly` export of the whole dataset, or of the visible area.
    pub fn poly_download(&self, use_viewport: bool) -> Result<ApiRequest> {
        let bbox = if use_viewport {
            Some(self.require_viewport()?.bbox)
        } else {
            None
        };
        Ok(ApiRequest::Poly { bbox })
    }

    /// OSM export of the visible area, from the legacy table if asked.
    pub fn osm_export(&self, legacy: bool) -> Result<ApiRequest> {
        let bbox = self.require_viewport()?.bbox;
        let table = if legacy {
            Some(
                self.viewport
                    .legacy_table()
                    .ok_or_else(|| EditorError::unavailable("legacy borders table"))?
                    .to_string(),
            )
        } else {
            None
        };
        Ok(ApiRequest::Josm { bbox, table })
    }

    pub(crate) fn require_viewport(&self) -> Result<Viewport> {
        self.viewport
            .viewport()
            .ok_or_else(|| EditorError::invalid("the map has no viewport yet"))
    }

    // ---- responses ----

    /// Applies the response to a request issued under `ticket`.
    pub fn deliver(&mut self, ticket: Ticket, result: Result<Value>) -> Cmd {
        let Some(endpoint) = self.pending.remove(&ticket.seq) else {
            warn!(target: "borders.session", seq = ticket.seq, "response for unknown ticket");
            return Cmd::none();
        };
        if self.commit_in_flight == Some(ticket.seq) {
            self.commit_in_flight = None;
        }

        match ticket.purpose {
            Purpose::Capabilities => match result.and_then(|body| decode(endpoint, body)) {
                Ok(capabilities) => {
                    self.apply_capabilities(capabilities);
                    Cmd::none()
                }
                Err(error) => failure(endpoint, &error),
            },
            Purpose::Borders { generation } => self.on_borders(endpoint, generation, result),
            Purpose::SmallMarkers { generation } => {
                if !self.viewport.is_current(generation) {
                    return Cmd::none();
                }
                match result.and_then(|body| decode::<SmallReply>(endpoint, body)) {
                    Ok(reply) => {
                        self.viewport.accept_small_markers(generation, reply.rings);
                        Cmd::none()
                    }
                    Err(error) => failure(endpoint, &error),
                }
            }
            Purpose::LegacyBorders { generation } => {
                if !self.viewport.is_current(generation) {
                    return Cmd::none();
                }
                match result.and_then(|body| decode::<BboxReply>(endpoint, body)) {
                    Ok(reply) => {
                        let shapes = reply
                            .geojson
                            .features
                            .into_iter()
                            .filter_map(|feature| feature.geometry)
                            .collect();
                        self.viewport.accept_legacy_borders(generation, shapes);
                        Cmd::none()
                    }
                    Err(error) => failure(endpoint, &error),
                }
            }
            Purpose::Search => match result.and_then(|body| decode::<SearchReply>(endpoint, body)) {
                Ok(reply) => reply
                    .bounds
                    .as_deref()
                    .and_then(BBox::from_search_bounds)
                    .map_or_else(Cmd::none, |bbox| Cmd::notice(Notice::FitBounds { bbox })),
                Err(error) => failure(endpoint, &error),
            },
            Purpose::Preview { epoch, step } => {
                if epoch != self.edit.preview_epoch() {
                    debug!(
                        target: "borders.session",
                        endpoint,
                        epoch,
                        current = self.edit.preview_epoch(),
                        "dropping stale preview"
                    );
                    return Cmd::none();
                }
                match result.and_then(|body| self.apply_preview(step, endpoint, body)) {
                    Ok(cmd) => cmd,
                    Err(error) => failure(endpoint, &error),
                }
            }
            Purpose::Commit { epoch, kind } => self.on_commit(endpoint, epoch, kind, result),
            Purpose::Action { kind } => self.on_action(endpoint, kind, result),
            Purpose::StartOver => {
                let outcome = result.and_then(|body| status_of(endpoint, body));
                let notice = match outcome {
                    Ok(warnings) => warnings_notice(endpoint, warnings),
                    Err(error) => failure(endpoint, &error),
                };
                notice.and(self.refresh())
            }
        }
    }

    fn apply_capabilities(&mut self, capabilities: ServerCapabilities) {
        self.thresholds =
            Thresholds::from_output_limit_kb(capabilities.mwm_size_thr, self.bytes_per_node);
        self.viewport
            .set_legacy_table(capabilities.legacy_table().map(str::to_string));
        self.cache.recolor(self.filter, &self.thresholds);
        info!(
            target: "borders.session",
            readonly = capabilities.readonly,
            osm = capabilities.osm,
            backup = capabilities.backup,
            good_mb = self.thresholds.good_mb,
            bad_mb = self.thresholds.bad_mb,
            "server capabilities"
        );
        self.capabilities = capabilities;
    }

    fn on_borders(&mut self, endpoint: &str, generation: u64, result: Result<Value>) -> Cmd {
        if !self.viewport.is_current(generation) {
            debug!(
                target: "borders.viewport",
                generation,
                current = self.viewport.generation(),
                "discarding stale border fetch"
            );
            return Cmd::none();
        }
        let reply = match result.and_then(|body| decode::<BboxReply>(endpoint, body)) {
            Ok(reply) => reply,
            Err(error) => return failure(endpoint, &error),
        };
        let level = self
            .viewport
            .viewport()
            .map_or(SimplificationLevel::Full, |viewport| viewport.simplification());
        let fetched = reply
            .geojson
            .features
            .into_iter()
            .filter_map(|feature| BorderEntity::from_feature(feature, level))
            .collect();
        let report = self.cache.reconcile(
            fetched,
            self.edit.mode().target(),
            self.filter,
            &self.thresholds,
        );
        self.render = report.render;
        self.details = self
            .selection
            .reselect(&mut self.cache, self.bytes_per_node);
        Cmd::none()
    }

    fn on_commit(
        &mut self,
        endpoint: &str,
        epoch: u64,
        kind: CommitKind,
        result: Result<Value>,
    ) -> Cmd {
        let warnings = match result.and_then(|body| status_of(endpoint, body)) {
            Ok(warnings) => warnings,
            Err(error) => return failure(endpoint, &error),
        };
        info!(target: "borders.session", endpoint, ?kind, "commit accepted");

        let closes = epoch == self.edit.epoch();
        if closes {
            self.edit.close(&mut self.layers);
        }
        match kind {
            CommitKind::Split {
                target,
                keep_original: false,
            }
            | CommitKind::JoinToParent { target } => self.evict(target),
            CommitKind::Join { absorbed } => self.evict(absorbed),
            _ => {}
        }
        warnings_notice(endpoint, warnings).and(self.refresh())
    }

    fn on_action(&mut self, endpoint: &str, kind: ActionKind, result: Result<Value>) -> Cmd {
        let outcome = result.and_then(|body| status_of(endpoint, body));
        let notice = match outcome {
            Ok(warnings) => {
                if let ActionKind::Delete { target } = kind {
                    self.evict(target);
                }
                warnings_notice(endpoint, warnings)
            }
            Err(error) if error.is_transport() => return failure(endpoint, &error),
            Err(error) => failure(endpoint, &error),
        };
        notice.and(self.refresh())
    }

    /// Drops a border the server no longer has, unless a workflow holds it.
    fn evict(&mut self, id: BorderId) {
        if self.edit.mode().target() == Some(id) {
            return;
        }
        if self.cache.remove(id).is_some() {
            self.render.retain(|held| *held != id);
            self.details = self
                .selection
                .reselect(&mut self.cache, self.bytes_per_node);
        }
    }
}

pub(crate) fn status_of(endpoint: &str, body: Value) -> Result<Vec<String>> {
    decode::<StatusReply>(endpoint, body)?.into_result(endpoint)
}

/// Rejections verbatim; anything else as a generic failure.
pub(crate) fn failure(endpoint: &str, error: &EditorError) -> Cmd {
    match error {
        EditorError::Rejected { endpoint, status } => Cmd::notice(Notice::Rejected {
            endpoint: endpoint.clone(),
            status: status.clone(),
        }),
        other => {
            warn!(target: "borders.session", endpoint, error = %other, "request failed");
            Cmd::notice(Notice::Failure {
                endpoint: endpoint.to_string(),
                message: other.to_string(),
            })
        }
    }
}

pub(crate) fn warnings_notice(endpoint: &str, warnings: Vec<String>) -> Cmd {
    if warnings.is_empty() {
        Cmd::none()
    } else {
        Cmd::notice(Notice::Warnings {
            endpoint: endpoint.to_string(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{EditorSession, SessionOptions};
    use crate::api::ApiRequest;
    use crate::classify::FilterMode;
    use crate::command::{Cmd, Notice, Purpose, Ticket};
    use crate::entity::BorderId;
    use crate::error::EditorError;
    use crate::geometry::BBox;
    use crate::selection::ClickTarget;
    use crate::viewport::Viewport;

    fn square(id: i64, name: &str) -> serde_json::Value {
        json!({
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]},
            "properties": {"id": id, "name": name, "admin_level": 4, "count_k": 10}
        })
    }

    fn bbox_body(ids: &[i64]) -> serde_json::Value {
        let features: Vec<_> = ids.iter().map(|id| square(*id, &format!("R{id}"))).collect();
        json!({"status": "ok", "geojson": {"type": "FeatureCollection", "features": features}})
    }

    fn first_ticket(cmd: &Cmd) -> Ticket {
        cmd.tickets()[0]
    }

    fn viewport(zoom: f64) -> Viewport {
        Viewport {
            bbox: BBox::new(0.0, 0.0, 2.0, 2.0).expect("bbox"),
            zoom,
        }
    }

    fn loaded(ids: &[i64]) -> EditorSession {
        let mut session = EditorSession::new(SessionOptions::default());
        let cmd = session.settle_viewport(viewport(12.0));
        session.deliver(first_ticket(&cmd), Ok(bbox_body(ids)));
        session
    }

    #[test]
    fn init_requests_capabilities_and_applies_thresholds() {
        let mut session = EditorSession::new(SessionOptions::default());
        let cmd = session.init();
        let ticket = first_ticket(&cmd);
        assert_eq!(ticket.purpose, Purpose::Capabilities);

        let cmd = session.deliver(
            ticket,
            Ok(json!({"readonly": true, "mwm_size_thr": 102400, "tables": []})),
        );
        assert!(cmd.is_none());
        assert!(session.is_read_only());
        assert_eq!(session.thresholds().bad_mb, 100.0);
        assert_eq!(session.thresholds().good_mb, 70.0);
        assert_eq!(session.pending_requests(), 0);
    }

    #[test]
    fn stale_viewport_fetch_is_discarded() {
        let mut session = EditorSession::new(SessionOptions::default());
        let old = first_ticket(&session.settle_viewport(viewport(12.0)));
        let new = first_ticket(&session.settle_viewport(viewport(12.5)));

        session.deliver(new, Ok(bbox_body(&[1, 2])));
        session.deliver(old, Ok(bbox_body(&[9])));
        assert_eq!(session.render_order(), &[BorderId(1), BorderId(2)]);
        assert!(!session.cache().contains(BorderId(9)));
    }

    #[test]
    fn transport_failure_on_fetch_becomes_failure_notice() {
        let mut session = EditorSession::new(SessionOptions::default());
        let ticket = first_ticket(&session.settle_viewport(viewport(12.0)));
        let cmd = session.deliver(ticket, Err(EditorError::invalid("connection reset")));
        assert!(matches!(
            cmd.notices()[..],
            [Notice::Failure { endpoint, .. }] if endpoint == "bbox"
        ));
    }

    #[test]
    fn selection_survives_refresh_and_clears_when_border_leaves() {
        let mut session = loaded(&[1, 2]);
        session.click(ClickTarget::Border(BorderId(2)));
        assert_eq!(session.details().map(|details| details.id), Some(BorderId(2)));

        let cmd = session.refresh();
        session.deliver(first_ticket(&cmd), Ok(bbox_body(&[2])));
        assert_eq!(session.selected(), Some(BorderId(2)));

        let cmd = session.refresh();
        session.deliver(first_ticket(&cmd), Ok(bbox_body(&[1])));
        assert_eq!(session.selected(), None);
        assert!(session.details().is_none());
    }

    #[test]
    fn search_skips_short_queries_and_fits_found_bounds() {
        let mut session = EditorSession::new(SessionOptions::default());
        assert!(session.search(" a ").is_none());

        let ticket = first_ticket(&session.search("Hesse"));
        let cmd = session.deliver(ticket, Ok(json!({"status": "ok", "bounds": [8.0, 49.0, 10.0, 51.0]})));
        assert!(matches!(cmd.notices()[..], [Notice::FitBounds { .. }]));

        let ticket = first_ticket(&session.search("Nowhere"));
        assert!(session.deliver(ticket, Ok(json!({"status": "not found"}))).is_none());
    }

    #[test]
    fn topology_filter_adds_small_marker_fetch() {
        let mut session = loaded(&[1]);
        let cmd = session.set_filter(FilterMode::Topology);
        let purposes: Vec<_> = cmd.tickets().iter().map(|ticket| ticket.purpose).collect();
        assert!(matches!(purposes[..], [Purpose::Borders { .. }, Purpose::SmallMarkers { .. }]));

        let cmd = session.set_filter(FilterMode::Plain);
        assert_eq!(cmd.tickets().len(), 1);
    }

    #[test]
    fn one_shot_actions_need_a_selection_and_a_writable_server() {
        let mut session = loaded(&[1]);
        assert!(matches!(session.hull(), Err(EditorError::NoSelection)));

        session.select(Some(BorderId(1)));
        assert!(matches!(
            session.delete_selected(false),
            Err(EditorError::InvalidArgument { .. })
        ));
        let cmd = session.delete_selected(true).expect("delete");
        assert!(matches!(session.hull(), Err(EditorError::Busy)));

        let cmd = session.deliver(first_ticket(&cmd), Ok(json!({"status": "ok"})));
        assert!(!session.cache().contains(BorderId(1)));
        assert_eq!(session.selected(), None);
        assert!(matches!(cmd.tickets()[0].purpose, Purpose::Borders { .. }));
    }

    #[test]
    fn start_over_clears_local_state_and_refetches_on_any_outcome() {
        let mut session = loaded(&[1, 2]);
        session.select(Some(BorderId(1)));
        let cmd = session.start_over().expect("start over");
        assert!(session.cache().is_empty());
        assert_eq!(session.selected(), None);

        let cmd = session.deliver(first_ticket(&cmd), Ok(json!({"status": "db_locked"})));
        assert!(matches!(
            cmd.notices()[..],
            [Notice::Rejected { status, .. }] if status == "db_locked"
        ));
        assert_eq!(cmd.tickets().len(), 1);
    }

    #[test]
    fn export_requests_follow_the_viewport() {
        let mut session = EditorSession::new(SessionOptions::default());
        assert_eq!(
            session.poly_download(false).expect("whole dataset"),
            ApiRequest::Poly { bbox: None }
        );
        assert!(session.poly_download(true).is_err());

        session.settle_viewport(viewport(12.0));
        let bbox = BBox::new(0.0, 0.0, 2.0, 2.0).expect("bbox");
        assert_eq!(
            session.poly_download(true).expect("visible area"),
            ApiRequest::Poly { bbox: Some(bbox) }
        );
        assert_eq!(
            session.osm_export(false).expect("josm"),
            ApiRequest::Josm { bbox, table: None }
        );
        assert!(matches!(
            session.osm_export(true),
            Err(EditorError::Unavailable { .. })
        ));
    }

    #[test]
    fn unknown_ticket_is_ignored() {
        let mut session = EditorSession::new(SessionOptions::default());
        let ticket = Ticket {
            seq: 77,
            purpose: Purpose::Search,
        };
        assert!(session.deliver(ticket, Ok(json!({}))).is_none());
    }
}
