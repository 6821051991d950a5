//! Effects returned by the session core.
//!
//! Gestures and responses never perform I/O themselves. They return a
//! [`Cmd`] describing the requests to issue and the notices to show; the
//! runtime executes it and routes every response back with its [`Ticket`].

use std::{fmt, mem};

use serde::Serialize;

use crate::api::ApiRequest;
use crate::entity::BorderId;
use crate::geometry::BBox;

/// Reads issued while a workflow is open. Dropped when the preview epoch
/// moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewStep {
    ParentBorder,
    CandidateParents,
    CandidateBorder { candidate: BorderId },
    Subdivision,
    PointLookup,
    CrossingSegments,
    CrossingRepair,
    BackupList,
}

/// Mutations that close a workflow on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CommitKind {
    Rename,
    Split { target: BorderId, keep_original: bool },
    Join { absorbed: BorderId },
    JoinToParent { target: BorderId },
    SetParent,
    Divide,
    FromOsm,
    AutoDivideCountry,
    FixCrossing,
    BackupSave,
    BackupRestore,
    BackupDelete,
}

/// Mutations on the selection that need no workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionKind {
    Disable,
    Enable,
    Delete { target: BorderId },
    Comment,
    SimpleSplit,
    ChopLargest,
    Hull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "for", rename_all = "kebab-case")]
pub enum Purpose {
    Capabilities,
    Borders { generation: u64 },
    SmallMarkers { generation: u64 },
    LegacyBorders { generation: u64 },
    Search,
    Preview { epoch: u64, step: PreviewStep },
    Commit { epoch: u64, kind: CommitKind },
    Action { kind: ActionKind },
    StartOver,
}

/// Identifies an in-flight request and what its response is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub seq: u64,
    pub purpose: Purpose,
}

/// Something the operator should be told.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "kebab-case")]
pub enum Notice {
    /// The request never completed. State is kept for a retry.
    Failure { endpoint: String, message: String },
    /// The server answered with a status other than `ok`.
    Rejected { endpoint: String, status: String },
    /// Advisory text accompanying a completed operation.
    Warnings {
        endpoint: String,
        warnings: Vec<String>,
    },
    /// Move the map to these bounds.
    FitBounds { bbox: BBox },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure { endpoint, message } => {
                write!(f, "request to {endpoint} failed: {message}")
            }
            Self::Rejected { endpoint, status } => write!(f, "{endpoint}: {status}"),
            Self::Warnings { endpoint, warnings } => {
                write!(f, "{endpoint} warnings: {}", warnings.join("; "))
            }
            Self::FitBounds { bbox } => write!(f, "fit map to {bbox}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cmd {
    #[default]
    None,
    Batch(Vec<Cmd>),
    Request {
        ticket: Ticket,
        request: ApiRequest,
    },
    Notice(Notice),
}

impl Cmd {
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::None
    }

    #[inline]
    #[must_use]
    pub fn notice(notice: Notice) -> Self {
        Self::Notice(notice)
    }

    /// Create a batch, dropping no-ops and collapsing single entries.
    #[must_use]
    pub fn batch(cmds: Vec<Self>) -> Self {
        let mut cmds: Vec<Self> = cmds.into_iter().filter(|cmd| !cmd.is_none()).collect();
        match cmds.len() {
            0 => Self::None,
            1 => cmds.pop().unwrap_or_default(),
            _ => Self::Batch(cmds),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Appends `other`, keeping issue order.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::batch(vec![self, other])
    }

    /// Flattens nested batches into issue order.
    #[must_use]
    pub fn into_effects(self) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut stack = vec![self];
        while let Some(cmd) = stack.pop() {
            match cmd {
                Self::None => {}
                Self::Batch(mut cmds) => {
                    cmds.reverse();
                    stack.append(&mut cmds);
                }
                Self::Request { ticket, request } => {
                    effects.push(Effect::Request { ticket, request });
                }
                Self::Notice(notice) => effects.push(Effect::Notice(notice)),
            }
        }
        effects
    }

    /// Tickets of every request in the command, in issue order.
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        let mut tickets = Vec::new();
        collect_tickets(self, &mut tickets);
        tickets
    }

    /// Notices in the command, in issue order.
    #[must_use]
    pub fn notices(&self) -> Vec<&Notice> {
        let mut notices = Vec::new();
        collect_notices(self, &mut notices);
        notices
    }

    /// Takes the command out, leaving `None`.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }
}

fn collect_tickets(cmd: &Cmd, out: &mut Vec<Ticket>) {
    match cmd {
        Cmd::Batch(cmds) => cmds.iter().for_each(|cmd| collect_tickets(cmd, out)),
        Cmd::Request { ticket, .. } => out.push(*ticket),
        Cmd::None | Cmd::Notice(_) => {}
    }
}

fn collect_notices<'a>(cmd: &'a Cmd, out: &mut Vec<&'a Notice>) {
    match cmd {
        Cmd::Batch(cmds) => cmds.iter().for_each(|cmd| collect_notices(cmd, out)),
        Cmd::Notice(notice) => out.push(notice),
        Cmd::None | Cmd::Request { .. } => {}
    }
}

/// A flattened single effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Request { ticket: Ticket, request: ApiRequest },
    Notice(Notice),
}
