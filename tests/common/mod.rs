//! A stand-in for the host-side executor: scans the shared directory for
//! command files and answers each one at most once.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn pending_commands(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.strip_prefix("cmd_").map(|id| (id.to_string(), e.path()))
        })
        .collect()
}

pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// `respond(id, script)` returns the response file body, or `None` to stay
/// silent for that command. Bodies are written byte for byte.
pub fn spawn_host<F, B>(dir: PathBuf, respond: F) -> JoinHandle<()>
where
    F: Fn(&str, &str) -> Option<B> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    tokio::spawn(async move {
        let mut seen = HashSet::new();
        loop {
            for (id, path) in pending_commands(&dir) {
                if seen.contains(&id) {
                    continue;
                }
                let Ok(script) = fs::read_to_string(&path) else {
                    continue;
                };
                seen.insert(id.clone());
                if let Some(body) = respond(&id, &script) {
                    let _ = fs::write(dir.join(format!("res_{}", id)), body);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}
