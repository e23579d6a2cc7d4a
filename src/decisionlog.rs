//! Append-only decision log (spec.md §6.4).
//!
//! One JSON-Lines record per evaluated decision. Writes are append-only and
//! never rewrite or reorder prior entries; ordering within a single writer
//! is guaranteed by serializing appends behind a mutex, matching spec.md §5
//! "totally ordered before any subsequent log entry by the same component".

use crate::policy::model::{Decision, Effect};
use crate::utility::set_secure_file_permissions;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::task;

#[derive(Debug, Serialize)]
struct DecisionLogEntry<'a> {
    ts: chrono::DateTime<chrono::Utc>,
    user: &'a str,
    profile: &'a str,
    mode: &'a str,
    effect: &'static str,
    rule_index: Option<usize>,
    fingerprint: Option<&'a str>,
    request_id: Option<&'a str>,
    session_id: Option<&'a str>,
    notes: Option<&'a str>,
}

fn effect_str(effect: Effect) -> &'static str {
    match effect {
        Effect::Allow => "allow",
        Effect::Deny => "deny",
        Effect::RequireApproval => "require_approval",
        Effect::RequireBreakglass => "require_breakglass",
        Effect::RequireServer => "require_server",
        Effect::RequireServerSession => "require_server_session",
    }
}

/// Extra fields not carried on `Decision` itself that a particular vending
/// outcome adds to its log line.
#[derive(Debug, Default, Clone)]
pub struct DecisionLogExtras {
    pub fingerprint: Option<String>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
}

/// Append-only writer. Internally single-writer: a process-local mutex
/// serializes appends so concurrent `Vend` calls never interleave partial
/// JSON lines.
pub struct DecisionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DecisionLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Append one decision. Blocking file I/O is moved to a blocking thread
    /// pool to keep the async runtime responsive (mirrors the registry's
    /// `spawn_blocking` pattern).
    pub async fn append(&self, decision: &Decision, extras: &DecisionLogExtras) -> Result<()> {
        let line = render_line(decision, extras)?;
        let path = self.path.clone();
        task::spawn_blocking(move || append_line(&path, &line))
            .await
            .context("decision log append task panicked")??;
        Ok(())
    }
}

fn render_line(decision: &Decision, extras: &DecisionLogExtras) -> Result<String> {
    let entry = DecisionLogEntry {
        ts: decision.timestamp,
        user: &decision.request_echo.user,
        profile: &decision.request_echo.profile,
        mode: decision.request_echo.mode.as_str(),
        effect: effect_str(decision.effect),
        rule_index: decision.matched_rule_index,
        fingerprint: extras.fingerprint.as_deref(),
        request_id: extras.request_id.as_deref(),
        session_id: extras.session_id.as_deref(),
        notes: decision.notes.as_deref(),
    };
    let mut line = serde_json::to_string(&entry).context("serializing decision log entry")?;
    line.push('\n');
    Ok(line)
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let is_new = !path.exists();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("creating decision log directory")?;
        }
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening decision log at {}", path.display()))?;
    if is_new {
        set_secure_file_permissions(path).context("hardening decision log permissions")?;
    }
    file.write_all(line.as_bytes())
        .context("writing decision log entry")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::{Effect, Mode, Request};
    use chrono::Utc;

    fn sample_decision() -> Decision {
        Decision {
            effect: Effect::Allow,
            matched_rule_index: Some(2),
            matched_rule_digest: Some("abc123".to_string()),
            request_echo: Request {
                user: "alice".to_string(),
                profile: "prod".to_string(),
                time: Utc::now(),
                mode: Mode::Cli,
                device_posture: None,
            },
            timestamp: Utc::now(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn appends_one_json_line_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::new(dir.path().join("decisions.jsonl"));

        log.append(&sample_decision(), &DecisionLogExtras::default()).await.unwrap();
        log.append(&sample_decision(), &DecisionLogExtras::default()).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("decisions.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["user"], "alice");
            assert_eq!(value["effect"], "allow");
        }
    }

    #[tokio::test]
    async fn extras_are_embedded_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::new(dir.path().join("decisions.jsonl"));
        let extras = DecisionLogExtras {
            fingerprint: Some("sentinel:alice:direct:deadbeef".to_string()),
            request_id: Some("deadbeef".to_string()),
            session_id: Some("s1".to_string()),
        };
        log.append(&sample_decision(), &extras).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("decisions.jsonl")).unwrap();
        let value: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(value["fingerprint"], "sentinel:alice:direct:deadbeef");
        assert_eq!(value["session_id"], "s1");
    }
}
