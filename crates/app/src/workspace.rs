use anyhow::Context;
use lettrage_core::DateRange;
use lettrage_engine::{LettrageSession, ProjectSnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The CLI's session between invocations: the project blob plus the
/// selected period, which a project blob does not carry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedWorkspace {
    period: DateRange,
    project: ProjectSnapshot,
}

/// Loads the session from `path`, or starts an empty one for the current
/// year when the file does not exist yet.
pub fn load(path: &Path, scope: &str, event_throttle: Duration) -> anyhow::Result<LettrageSession> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LettrageSession::default()
                .with_scope(scope)
                .with_event_throttle(event_throttle));
        }
        Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
    };

    let saved: SavedWorkspace = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid session file", path.display()))?;
    let mut session = LettrageSession::new(saved.period)
        .with_scope(scope)
        .with_event_throttle(event_throttle);
    session.restore(Some(saved.project));
    Ok(session)
}

pub fn save(path: &Path, session: &LettrageSession) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let saved = SavedWorkspace {
        period: session.selected_period(),
        project: session.snapshot(),
    };
    let json = serde_json::to_string_pretty(&saved)?;
    // Write then rename so an interrupted save never truncates the session.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("cannot write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}
