//! Background maintenance worker
//!
//! Rotation hands work to a single named thread over an unbounded channel:
//! compress the file that was just closed, then run a retention sweep. Tasks
//! run strictly in the order they were queued, so no rotation is skipped.
//! At startup the worker also compresses rotated files an earlier run left
//! uncompressed. Failures are reported through `tracing` and never reach the
//! write path.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, FixedOffset};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::compress;
use super::alias::TEMP_LINK_SUFFIX;
use super::policy::{RotationPolicy, ARCHIVE_EXTENSION};
use super::sweep::{self, LOCK_SUFFIX};
use crate::error::RotateError;

/// Emitted once per rotation (and once at startup with no previous file)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEvent {
    /// File that was just closed; `None` when the controller starts up
    pub previous: Option<PathBuf>,
    /// File now receiving writes
    pub current: PathBuf,
    pub rotated_at: DateTime<FixedOffset>,
}

/// Work items for the maintenance thread
#[derive(Debug)]
pub enum Task {
    Rotated(RotationEvent),
    /// Run a retention sweep outside of a rotation
    Sweep,
    /// Report an error that happened while the state lock was held
    Report(RotateError),
}

pub type TaskSender = mpsc::UnboundedSender<Task>;
pub type TaskReceiver = mpsc::UnboundedReceiver<Task>;

/// Spawn the maintenance thread for one policy
///
/// The thread exits once every sender is dropped and the queue is drained.
pub fn spawn(policy: Arc<RotationPolicy>) -> std::io::Result<(TaskSender, JoinHandle<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Worker {
        policy,
        current: None,
    };
    let handle = thread::Builder::new()
        .name("rotalog-maintenance".to_string())
        .spawn(move || worker.run(rx))?;
    Ok((tx, handle))
}

struct Worker {
    policy: Arc<RotationPolicy>,
    current: Option<PathBuf>,
}

impl Worker {
    fn run(mut self, mut rx: TaskReceiver) {
        while let Some(task) = rx.blocking_recv() {
            self.handle(task);
        }
        debug!(
            target: "rotalog::maintenance",
            base = %self.policy.base_path().display(),
            "Maintenance worker stopped"
        );
    }

    fn handle(&mut self, task: Task) {
        match task {
            Task::Rotated(event) => self.on_rotated(event),
            Task::Sweep => self.sweep(),
            Task::Report(err) => warn!(
                target: "rotalog::maintenance",
                base = %self.policy.base_path().display(),
                disk = ?err.disk_kind(),
                "{}",
                err
            ),
        }
    }

    fn on_rotated(&mut self, event: RotationEvent) {
        self.current = Some(event.current);
        let Some(previous) = event.previous else {
            if self.policy.compress() && self.compress_leftovers() > 0 {
                self.sweep();
            }
            return;
        };

        if self.policy.compress() {
            match compress::compress(&previous) {
                Ok(archive) => debug!(
                    target: "rotalog::maintenance",
                    archive = %archive.display(),
                    "Compressed rotated log"
                ),
                Err(err) => {
                    error!(
                        target: "rotalog::maintenance",
                        file = %previous.display(),
                        disk = ?err.disk_kind(),
                        "{}",
                        err
                    );
                    return;
                }
            }
        }

        self.sweep();
    }

    /// Compress rotated files other than the active one; returns how many
    fn compress_leftovers(&self) -> usize {
        let pattern = self.policy.rotated_glob();
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => {
                error!(target: "rotalog::maintenance", pattern = %pattern, "{}", e);
                return 0;
            }
        };

        let mut compressed = 0;
        for path in entries.flatten() {
            if !self.is_leftover(&path) {
                continue;
            }
            match compress::compress(&path) {
                Ok(archive) => {
                    compressed += 1;
                    debug!(
                        target: "rotalog::maintenance",
                        archive = %archive.display(),
                        "Compressed log left by an earlier run"
                    );
                }
                Err(err) => warn!(
                    target: "rotalog::maintenance",
                    file = %path.display(),
                    disk = ?err.disk_kind(),
                    "{}",
                    err
                ),
            }
        }
        compressed
    }

    fn is_leftover(&self, path: &Path) -> bool {
        if path == self.policy.base_path() || Some(path) == self.current.as_deref() {
            return false;
        }
        if path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION) {
            return false;
        }
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if name.ends_with(LOCK_SUFFIX) || name.ends_with(TEMP_LINK_SUFFIX) {
            return false;
        }
        fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_file())
    }

    fn sweep(&self) {
        let pattern = self.policy.sweep_glob();
        let mut protected: Vec<&Path> = vec![self.policy.base_path()];
        if let Some(current) = &self.current {
            protected.push(current);
        }

        match sweep::sweep(&pattern, &self.policy.retention(), &protected) {
            Ok(report) if report.selected > 0 => info!(
                target: "rotalog::maintenance",
                pattern = %pattern,
                deleted = report.deleted,
                failed = report.failed,
                "Pruned old log archives"
            ),
            Ok(_) => {}
            Err(err) => error!(
                target: "rotalog::maintenance",
                pattern = %pattern,
                "{}",
                err
            ),
        }
    }
}
