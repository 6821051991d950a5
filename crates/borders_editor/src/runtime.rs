//! The single cooperative loop that executes session commands.
//!
//! Requests run one at a time in issue order. Each result is handed back to
//! the session, and whatever it asks for next goes to the back of the queue.

use std::collections::VecDeque;

use tracing::debug;

use crate::api::{ApiRequest, BordersApi};
use crate::command::{Cmd, Effect, Notice, Ticket};
use crate::error::Result;
use crate::session::EditorSession;

/// Receives what the operator should see while the loop runs.
pub trait NoticeSink {
    fn notice(&mut self, notice: &Notice);

    /// Called after each request completed, successfully or not.
    fn exchanged(&mut self, _ticket: &Ticket, _request: &ApiRequest, _ok: bool) {}
}

impl NoticeSink for Vec<Notice> {
    fn notice(&mut self, notice: &Notice) {
        self.push(notice.clone());
    }
}

/// Counters for one drained command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub requests: usize,
    pub failed: usize,
    pub notices: usize,
}

impl RunStats {
    pub fn absorb(&mut self, other: Self) {
        self.requests += other.requests;
        self.failed += other.failed;
        self.notices += other.notices;
    }
}

#[derive(Debug)]
pub struct Runtime<A> {
    session: EditorSession,
    api: A,
}

impl<A: BordersApi> Runtime<A> {
    #[must_use]
    pub fn new(session: EditorSession, api: A) -> Self {
        Self { session, api }
    }

    #[must_use]
    pub fn session(&self) -> &EditorSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut EditorSession {
        &mut self.session
    }

    #[must_use]
    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn into_parts(self) -> (EditorSession, A) {
        (self.session, self.api)
    }

    /// Requests capabilities and waits for them.
    pub fn start(&mut self, sink: &mut impl NoticeSink) -> RunStats {
        let cmd = self.session.init();
        self.run(cmd, sink)
    }

    /// Executes `cmd` and everything it leads to.
    pub fn run(&mut self, cmd: Cmd, sink: &mut impl NoticeSink) -> RunStats {
        let mut stats = RunStats::default();
        let mut queue: VecDeque<Effect> = cmd.into_effects().into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Notice(notice) => {
                    stats.notices += 1;
                    sink.notice(&notice);
                }
                Effect::Request { ticket, request } => {
                    stats.requests += 1;
                    let result = self.api.call(&request);
                    let ok = result.is_ok();
                    if !ok {
                        stats.failed += 1;
                    }
                    debug!(
                        target: "borders.runtime",
                        seq = ticket.seq,
                        endpoint = request.endpoint(),
                        ok,
                        "request completed"
                    );
                    sink.exchanged(&ticket, &request, ok);
                    let next = self.session.deliver(ticket, result);
                    queue.extend(next.into_effects());
                }
            }
        }
        stats
    }

    /// Applies one gesture and drains the resulting command. A refused
    /// gesture is reported through the sink and the loop keeps going.
    pub fn dispatch<F>(&mut self, label: &str, gesture: F, sink: &mut impl NoticeSink) -> RunStats
    where
        F: FnOnce(&mut EditorSession) -> Result<Cmd>,
    {
        match gesture(&mut self.session) {
            Ok(cmd) => self.run(cmd, sink),
            Err(error) => {
                debug!(target: "borders.runtime", gesture = label, %error, "gesture refused");
                sink.notice(&Notice::Failure {
                    endpoint: label.to_string(),
                    message: error.to_string(),
                });
                RunStats {
                    notices: 1,
                    ..RunStats::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::{Value, json};

    use super::{NoticeSink, Runtime};
    use crate::api::{ApiRequest, BordersApi};
    use crate::command::Notice;
    use crate::entity::BorderId;
    use crate::error::{EditorError, Result};
    use crate::geometry::BBox;
    use crate::session::{EditorSession, SessionOptions};
    use crate::viewport::Viewport;

    #[derive(Default)]
    struct Canned {
        replies: VecDeque<Result<Value>>,
        seen: Vec<&'static str>,
    }

    impl BordersApi for Canned {
        fn call(&mut self, request: &ApiRequest) -> Result<Value> {
            self.seen.push(request.endpoint());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(EditorError::invalid("no canned reply")))
        }

        fn url_for(&self, request: &ApiRequest) -> Result<String> {
            Ok(format!("http://test/{}", request.endpoint()))
        }
    }

    fn bbox_reply(ids: &[i64]) -> Value {
        let features: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]},
                    "properties": {"id": id, "name": format!("R{id}")}
                })
            })
            .collect();
        json!({"geojson": {"features": features}})
    }

    fn viewport() -> Viewport {
        Viewport {
            bbox: BBox::new(0.0, 0.0, 1.0, 1.0).expect("bbox"),
            zoom: 9.0,
        }
    }

    #[test]
    fn action_response_triggers_follow_up_fetch_in_same_run() {
        let api = Canned {
            replies: VecDeque::from(vec![
                Ok(json!({})),
                Ok(bbox_reply(&[1, 2])),
                Ok(json!({"status": "ok", "warnings": ["hole removed"]})),
                Ok(bbox_reply(&[1, 2])),
            ]),
            ..Canned::default()
        };
        let mut runtime = Runtime::new(EditorSession::new(SessionOptions::default()), api);
        let mut notices: Vec<Notice> = Vec::new();
        runtime.start(&mut notices);
        runtime.dispatch("settle", |session| Ok(session.settle_viewport(viewport())), &mut notices);
        runtime.session_mut().select(Some(BorderId(2)));

        let stats = runtime.dispatch("hull", EditorSession::hull, &mut notices);
        assert_eq!(stats.requests, 2);
        assert_eq!(runtime.api().seen, vec!["config", "bbox", "hull", "bbox"]);
        assert!(matches!(notices[..], [Notice::Warnings { .. }]));
    }

    #[test]
    fn refused_gesture_becomes_failure_notice() {
        let mut runtime = Runtime::new(
            EditorSession::new(SessionOptions::default()),
            Canned::default(),
        );
        let mut notices: Vec<Notice> = Vec::new();
        let stats = runtime.dispatch("split", EditorSession::begin_split, &mut notices);
        assert_eq!(stats.requests, 0);
        assert!(matches!(
            notices[..],
            [Notice::Failure { ref endpoint, .. }] if endpoint == "split"
        ));
    }

    struct Exchanges(Vec<bool>);

    impl NoticeSink for Exchanges {
        fn notice(&mut self, _notice: &Notice) {}

        fn exchanged(&mut self, _ticket: &crate::command::Ticket, _request: &ApiRequest, ok: bool) {
            self.0.push(ok);
        }
    }

    #[test]
    fn transport_failures_are_counted_and_reported() {
        let mut runtime = Runtime::new(
            EditorSession::new(SessionOptions::default()),
            Canned::default(),
        );
        let mut sink = Exchanges(Vec::new());
        let stats = runtime.start(&mut sink);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.notices, 1);
        assert_eq!(sink.0, vec![false]);
    }
}
