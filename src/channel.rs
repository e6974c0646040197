/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/channel.rs
 * Responsibility: One request/response cycle over the shared directory: validate, dispatch, await, resolve, clean up.
 */

use crate::command::{Command, CommandPaths, EpochTracker};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::response::Response;
use crate::security::SecurityPolicy;
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Apply the pattern blocklist. The size ceiling applies either way.
    pub validate: bool,
    /// Logical slot for epoch tagging; a newer call in the same slot
    /// supersedes this one.
    pub slot: Option<String>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            validate: true,
            slot: None,
        }
    }
}

impl SendOptions {
    pub fn validated() -> Self {
        Self::default()
    }

    /// Size check only. Reserved for running caller-authored scripts.
    pub fn unchecked() -> Self {
        Self {
            validate: false,
            slot: None,
        }
    }

    pub fn in_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }
}

/// The bridge's calling side. Holds no directory or timeout of its own;
/// those arrive with every call.
#[derive(Debug)]
pub struct CommandChannel {
    policy: SecurityPolicy,
    epochs: EpochTracker,
    watches: WatchRegistry,
    poll_interval: Duration,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(SecurityPolicy::default())
    }
}

impl CommandChannel {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy,
            epochs: EpochTracker::new(),
            watches: WatchRegistry::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Runs `script` through the host and returns its response.
    ///
    /// Only validation and pre-dispatch I/O failures are `Err`. Timeouts,
    /// unparsable responses, host-reported failures and superseded slots
    /// all come back as `Ok` with `success: false`.
    pub async fn send(
        &self,
        script: &str,
        config: &BridgeConfig,
        options: &SendOptions,
    ) -> BridgeResult<Response> {
        self.policy.validate(script, options.validate)?;

        ensure_directory(&config.directory).await?;
        let command = Command::new(script);
        let paths = command.paths(&config.directory);

        // Watch before dispatch so a fast host cannot slip past us.
        let waiter = ResponseWaiter {
            response: &paths.response,
            poll_interval: self.poll_interval,
            subscription: self.watches.subscribe(&config.directory, &paths.response),
        };

        // Released on every exit, including errors and cancellation.
        let slot = options
            .slot
            .as_deref()
            .map(|slot| self.epochs.begin(slot, command.id.epoch()));
        write_command(&command, &paths).await?;
        info!(id = %command.id, bytes = script.len(), validated = options.validate, "Command dispatched");

        let (response, timed_out) = match waiter.wait(config.timeout()).await {
            Some(content) => match &slot {
                Some(guard) if !guard.is_current() => {
                    warn!(id = %command.id, slot = %guard.slot(), "Discarding response superseded by a newer request");
                    (Response::superseded(guard.slot()), false)
                }
                _ => (Response::parse_bytes(&content), false),
            },
            None => {
                warn!(id = %command.id, timeout_ms = config.timeout_ms, "No response from host before timeout");
                (Response::timed_out(config.timeout_ms), true)
            }
        };

        if response.success {
            debug!(id = %command.id, "Command resolved successfully");
        } else if !timed_out {
            debug!(id = %command.id, error = ?response.error, "Command resolved with failure");
        }

        cleanup(&paths, timed_out && config.keep_timed_out_commands).await;
        Ok(response)
    }
}

/// Creates the shared directory owner-only if it is missing.
pub(crate) async fn ensure_directory(directory: &Path) -> BridgeResult<()> {
    if fs::metadata(directory).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(directory)
        .await
        .map_err(|e| BridgeError::io("Failed to create bridge directory", directory, e))
}

/// Stage then rename so the host never picks up a half-written script.
async fn write_command(command: &Command, paths: &CommandPaths) -> BridgeResult<()> {
    if let Err(e) = fs::write(&paths.staging, &command.script).await {
        remove_quietly(&paths.staging).await;
        return Err(BridgeError::io("Failed to write command file", &paths.staging, e));
    }
    if let Err(e) = fs::rename(&paths.staging, &paths.command).await {
        remove_quietly(&paths.staging).await;
        return Err(BridgeError::io("Failed to publish command file", &paths.command, e));
    }
    Ok(())
}

async fn cleanup(paths: &CommandPaths, keep_command: bool) {
    if keep_command {
        debug!(path = ?paths.command, "Keeping timed-out command file for diagnostics");
    } else {
        remove_quietly(&paths.command).await;
    }
    remove_quietly(&paths.response).await;
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => debug!(path = ?path, error = %e, "Ignoring cleanup failure"),
    }
}

fn is_relevant_fs_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

type Subscribers = Arc<Mutex<HashMap<OsString, mpsc::Sender<()>>>>;

/// One notify watcher per shared directory, fanned out to the calls
/// waiting on it by response file name.
#[derive(Default)]
struct WatchRegistry {
    directories: Mutex<HashMap<PathBuf, DirectoryWatch>>,
}

struct DirectoryWatch {
    subscribers: Subscribers,
    _watcher: RecommendedWatcher,
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let directories = self.directories.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("WatchRegistry")
            .field("directories", &directories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WatchRegistry {
    /// A subscription whose receiver is woken when `response` changes. If the
    /// directory cannot be watched the receiver never fires and the waiter
    /// polls only; the next call retries.
    fn subscribe(&self, directory: &Path, response: &Path) -> Subscription {
        let (wake_tx, wake_rx) = mpsc::channel(8);
        let Some(file_name) = response.file_name() else {
            return Subscription { wake_rx, registration: None };
        };

        let mut directories = self.directories.lock().unwrap_or_else(|e| e.into_inner());
        let watch = match directories.entry(directory.to_path_buf()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match DirectoryWatch::start(directory) {
                Ok(watch) => {
                    debug!(directory = ?directory, "Watching bridge directory");
                    entry.insert(watch)
                }
                Err(e) => {
                    debug!(error = %e, "Filesystem notifications unavailable, polling only");
                    return Subscription { wake_rx, registration: None };
                }
            },
        };

        watch
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_name.to_os_string(), wake_tx);
        Subscription {
            wake_rx,
            registration: Some((watch.subscribers.clone(), file_name.to_os_string())),
        }
    }
}

impl DirectoryWatch {
    fn start(directory: &Path) -> notify::Result<Self> {
        let subscribers: Subscribers = Arc::default();
        let routes = subscribers.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if !is_relevant_fs_event(&event.kind) {
                return;
            }
            let routes = routes.lock().unwrap_or_else(|e| e.into_inner());
            for name in event.paths.iter().filter_map(|p| p.file_name()) {
                if let Some(wake_tx) = routes.get(name) {
                    let _ = wake_tx.try_send(());
                }
            }
        })?;
        watcher.watch(directory, RecursiveMode::NonRecursive)?;

        Ok(Self {
            subscribers,
            _watcher: watcher,
        })
    }
}

/// Unregisters from the directory watch when the call finishes.
struct Subscription {
    wake_rx: mpsc::Receiver<()>,
    registration: Option<(Subscribers, OsString)>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some((subscribers, file_name)) = &self.registration {
            subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(file_name.as_os_str());
        }
    }
}

/// Waits for one response file. Filesystem notifications wake it early;
/// the fixed polling tick runs regardless, so a platform without
/// notifications only pays latency.
struct ResponseWaiter<'a> {
    response: &'a Path,
    poll_interval: Duration,
    subscription: Subscription,
}

impl ResponseWaiter<'_> {
    /// `None` on timeout. Content that is not yet valid JSON is re-read until
    /// it stops changing, so a response caught mid-write is not misreported.
    async fn wait(mut self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen: Option<(Vec<u8>, Instant)> = None;

        loop {
            // An empty file may be a write that has not landed yet.
            if let Some(content) = read_response(self.response).await.filter(|c| !is_blank(c)) {
                let stable_for = match &last_seen {
                    Some((previous, since)) if *previous == content => Some(since.elapsed()),
                    _ => None,
                };
                if is_settled(&content, stable_for, self.poll_interval) {
                    return Some(content);
                }
                if stable_for.is_none() {
                    last_seen = Some((content, Instant::now()));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {},
                Some(()) = self.subscription.wake_rx.recv() => {},
            }
        }

        // The host may have finished right at the deadline. A file that
        // exists by now is the host's answer, even when it is empty.
        read_response(self.response)
            .await
            .or(last_seen.map(|(content, _)| content))
    }
}

/// Valid JSON is final. Anything else must hold still for a full poll
/// interval before it is reported as a parse failure.
fn is_settled(content: &[u8], stable_for: Option<Duration>, poll_interval: Duration) -> bool {
    serde_json::from_slice::<serde_json::Value>(content).is_ok()
        || stable_for.is_some_and(|elapsed| elapsed >= poll_interval)
}

fn is_blank(content: &[u8]) -> bool {
    content.iter().all(u8::is_ascii_whitespace)
}

/// Raw bytes; decoding happens in `Response::parse_bytes`. A missing file
/// is simply not written yet.
async fn read_response(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            debug!(path = ?path, error = %e, "Response file not readable yet");
            None
        }
    }
}
