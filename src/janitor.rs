/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/janitor.rs
 * Responsibility: The Janitor. Clears command/response files orphaned by a crashed or timed-out session.
 */

use crate::command::is_bridge_file_name;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Removes every bridge-named file in `directory`. Never fails: a missing
/// or unreadable directory is simply an empty sweep.
pub fn sweep(directory: &Path) -> SweepReport {
    sweep_matching(directory, |_| true)
}

/// Like [`sweep`], but only touches files last modified more than `max_age`
/// ago, so it can run while commands are in flight.
pub fn sweep_stale(directory: &Path, max_age: Duration) -> SweepReport {
    let now = SystemTime::now();
    sweep_matching(directory, |path| {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= max_age)
    })
}

fn sweep_matching(directory: &Path, should_remove: impl Fn(&Path) -> bool) -> SweepReport {
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(directory = ?directory, error = %e, "Nothing to sweep");
            return report;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_bridge_file_name(name) {
            continue;
        }

        let path = entry.path();
        if !path.is_file() || !should_remove(&path) {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                report.failed += 1;
                debug!(path = ?path, error = %e, "Could not remove orphaned file");
            }
        }
    }

    if report.removed > 0 || report.failed > 0 {
        info!(
            directory = ?directory,
            removed = report.removed,
            failed = report.failed,
            "Swept orphaned bridge files"
        );
    }
    report
}

/// Idle-time sweeping for long-running processes.
pub async fn run_janitor_loop(directory: PathBuf, interval: Duration, max_age: Duration) {
    info!(directory = ?directory, interval_secs = interval.as_secs(), "Janitor on duty");

    loop {
        sleep(interval).await;

        let dir = directory.clone();
        match tokio::task::spawn_blocking(move || sweep_stale(&dir, max_age)).await {
            Ok(report) => debug!(removed = report.removed, "Janitor pass complete"),
            Err(e) => warn!(error = %e, "Janitor pass aborted"),
        }
    }
}
