use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::ApiRequest;
use crate::command::{Notice, Ticket};
use crate::error::{EditorError, Result};
use crate::runtime::NoticeSink;
use crate::util::{append_line, now_utc_iso};

/// One line of a replay transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "kebab-case")]
pub enum JournalEntry {
    Gesture {
        timestamp: String,
        index: usize,
        gesture: String,
    },
    Request {
        timestamp: String,
        seq: u64,
        endpoint: String,
        purpose: serde_json::Value,
        params: Vec<(String, String)>,
        ok: bool,
    },
    Notice {
        timestamp: String,
        notice: serde_json::Value,
    },
}

impl JournalEntry {
    pub fn append_jsonl(&self, path: &Path) -> Result<()> {
        let line = serde_json::to_string(self)?;
        append_line(path, &line)
    }
}

/// Writes a JSON-lines transcript while keeping the notices for the
/// caller. Without a path it only collects.
#[derive(Debug, Default)]
pub struct Journal {
    path: Option<PathBuf>,
    notices: Vec<Notice>,
    lines: usize,
    write_error: Option<String>,
}

impl Journal {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    #[must_use]
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn gesture(&mut self, index: usize, gesture: &str) {
        self.write(&JournalEntry::Gesture {
            timestamp: now_utc_iso(),
            index,
            gesture: gesture.to_string(),
        });
    }

    fn write(&mut self, entry: &JournalEntry) {
        let Some(path) = &self.path else {
            return;
        };
        if self.write_error.is_some() {
            return;
        }
        match entry.append_jsonl(path) {
            Ok(()) => self.lines += 1,
            Err(error) => self.write_error = Some(error.to_string()),
        }
    }

    /// Surfaces the first write failure, if any.
    pub fn finish(self) -> Result<Vec<Notice>> {
        match self.write_error {
            Some(message) => Err(EditorError::invalid(format!(
                "failed to write transcript: {message}"
            ))),
            None => Ok(self.notices),
        }
    }
}

impl NoticeSink for Journal {
    fn notice(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
        let notice = serde_json::to_value(notice).unwrap_or_default();
        self.write(&JournalEntry::Notice {
            timestamp: now_utc_iso(),
            notice,
        });
    }

    fn exchanged(&mut self, ticket: &Ticket, request: &ApiRequest, ok: bool) {
        let purpose = serde_json::to_value(ticket.purpose).unwrap_or_default();
        self.write(&JournalEntry::Request {
            timestamp: now_utc_iso(),
            seq: ticket.seq,
            endpoint: request.endpoint().to_string(),
            purpose,
            params: request
                .params()
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
            ok,
        });
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{Journal, JournalEntry};
    use crate::api::ApiRequest;
    use crate::command::{Notice, Purpose, Ticket};
    use crate::entity::BorderId;
    use crate::runtime::NoticeSink;

    #[test]
    fn transcript_has_one_json_object_per_line() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("out/transcript.jsonl");
        let mut journal = Journal::new(Some(path.clone()));

        journal.gesture(0, "hull");
        journal.exchanged(
            &Ticket {
                seq: 3,
                purpose: Purpose::Search,
            },
            &ApiRequest::Hull { id: BorderId(4) },
            true,
        );
        journal.notice(&Notice::Rejected {
            endpoint: "hull".to_string(),
            status: "no_geometry".to_string(),
        });
        assert_eq!(journal.lines(), 3);

        let notices = journal.finish().expect("finish");
        assert_eq!(notices.len(), 1);

        let content = std::fs::read_to_string(&path).expect("read transcript");
        let entries: Vec<JournalEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("entry"))
            .collect();
        assert!(matches!(entries[0], JournalEntry::Gesture { index: 0, .. }));
        match &entries[1] {
            JournalEntry::Request { seq, params, ok, .. } => {
                assert_eq!(*seq, 3);
                assert_eq!(params, &vec![("id".to_string(), "4".to_string())]);
                assert!(*ok);
            }
            other => panic!("expected request entry, got {other:?}"),
        }
        assert!(content.lines().nth(2).expect("notice").contains("\"status\":\"no_geometry\""));
    }

    #[test]
    fn journal_without_path_only_collects() {
        let mut journal = Journal::new(None);
        journal.notice(&Notice::Failure {
            endpoint: "bbox".to_string(),
            message: "timed out".to_string(),
        });
        assert_eq!(journal.lines(), 0);
        assert_eq!(journal.finish().expect("finish").len(), 1);
    }
}
