/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/command.rs
 * Responsibility: Command identity, file naming, and per-slot epochs
 */

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub const COMMAND_PREFIX: &str = "cmd_";
pub const RESPONSE_PREFIX: &str = "res_";
pub const STAGING_PREFIX: &str = ".pending_";

// Shared by every channel in the process so ids never repeat.
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

static BRIDGE_FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:cmd|res|\.pending)_[A-Za-z0-9-]+$").expect("bridge file pattern is valid")
});

/// `<unix millis>-<epoch>-<random>`. The epoch is a process-wide sequence
/// number, strictly increasing in generation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandId {
    raw: String,
    epoch: u64,
}

impl CommandId {
    pub fn generate() -> Self {
        let epoch = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        let raw = format!("{}-{}-{}", Utc::now().timestamp_millis(), epoch, &suffix[..8]);
        Self { raw, epoch }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn command_file_name(&self) -> String {
        format!("{}{}", COMMAND_PREFIX, self.raw)
    }

    pub fn response_file_name(&self) -> String {
        format!("{}{}", RESPONSE_PREFIX, self.raw)
    }

    pub fn staging_file_name(&self) -> String {
        format!("{}{}", STAGING_PREFIX, self.raw)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One script bound for the host, with its freshly generated id.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: CommandId,
    pub script: String,
}

impl Command {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            id: CommandId::generate(),
            script: script.into(),
        }
    }

    pub fn paths(&self, directory: &Path) -> CommandPaths {
        CommandPaths {
            staging: directory.join(self.id.staging_file_name()),
            command: directory.join(self.id.command_file_name()),
            response: directory.join(self.id.response_file_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPaths {
    pub staging: PathBuf,
    pub command: PathBuf,
    pub response: PathBuf,
}

/// Whether `name` follows the command, response, or staging convention.
pub fn is_bridge_file_name(name: &str) -> bool {
    BRIDGE_FILE_NAME.is_match(name)
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    latest: u64,
    in_flight: usize,
}

/// Latest epoch issued per logical slot. A call whose epoch is no longer the
/// latest for its slot has been superseded and its response is discarded.
/// A slot is forgotten once no call in it is in flight.
#[derive(Debug, Default)]
pub struct EpochTracker {
    slots: Mutex<HashMap<String, SlotState>>,
}

impl EpochTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-flight call; the slot entry lives until every guard
    /// for it is dropped.
    pub fn begin<'a>(&'a self, slot: &str, epoch: u64) -> SlotGuard<'a> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let state = slots.entry(slot.to_string()).or_insert(SlotState {
            latest: epoch,
            in_flight: 0,
        });
        state.in_flight += 1;
        if epoch > state.latest {
            state.latest = epoch;
        }
        SlotGuard {
            tracker: self,
            slot: slot.to_string(),
            epoch,
        }
    }

    pub fn is_current(&self, slot: &str, epoch: u64) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(slot).is_none_or(|state| state.latest == epoch)
    }

    pub fn tracked_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn finish(&self, slot: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = slots.get_mut(slot) {
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.in_flight == 0 {
                slots.remove(slot);
            }
        }
    }
}

/// One in-flight call in a slot. Dropping it releases the slot entry, also
/// when the call is cancelled mid-wait.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    tracker: &'a EpochTracker,
    slot: String,
    epoch: u64,
}

impl SlotGuard<'_> {
    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn is_current(&self) -> bool {
        self.tracker.is_current(&self.slot, self.epoch)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish(&self.slot);
    }
}
