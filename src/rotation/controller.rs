//! Rotating log file
//!
//! [`RotatingFile`] owns the active log file. Every write first checks the
//! time and size triggers; when one fires the file is swapped under the same
//! lock as the write, so each write lands whole in exactly one file and files
//! are filled in strict chronological order.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use chrono::{DateTime, FixedOffset};

use super::alias;
use super::clock::{Clock, SystemClock};
use super::compress::archive_path;
use super::maintenance::{self, RotationEvent, Task, TaskSender};
use super::policy::{with_sequence, RotationPolicy, MAX_SEQUENCE};
use crate::error::RotateError;

/// The file currently receiving writes
struct ActiveFile {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Start of the rotation period this file belongs to
    period: DateTime<FixedOffset>,
    bytes_written: u64,
}

enum Slot {
    Active(ActiveFile),
    /// A rotation failed and the previous file could not be reopened
    Broken(String),
    Closed,
}

struct State {
    slot: Slot,
    tasks: Option<TaskSender>,
}

impl State {
    fn submit(&self, task: Task) {
        if let Some(tasks) = &self.tasks {
            // Worker gone means we are shutting down
            let _ = tasks.send(task);
        }
    }
}

/// A log file that rotates itself by time and/or size
///
/// Writers on any thread serialize on one internal lock. Nothing is logged
/// while that lock is held, since the log subscriber may be writing into this
/// very file; diagnostics are queued for the maintenance worker instead.
pub struct RotatingFile {
    policy: Arc<RotationPolicy>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RotatingFile {
    /// Open the log file for the current period using the system clock
    pub fn new(policy: RotationPolicy) -> Result<Self, RotateError> {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Open the log file for the current period using `clock`
    ///
    /// An existing file for the current period is appended to.
    pub fn with_clock(policy: RotationPolicy, clock: Arc<dyn Clock>) -> Result<Self, RotateError> {
        alias::ensure_replaceable(policy.base_path())?;
        if let Some(parent) = policy.base_path().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| RotateError::io("create directory", parent, e))?;
            }
        }

        let policy = Arc::new(policy);
        let (tasks, worker) = maintenance::spawn(Arc::clone(&policy))
            .map_err(|e| RotateError::io("spawn maintenance for", policy.base_path(), e))?;

        let this = Self {
            policy,
            clock,
            state: Mutex::new(State {
                slot: Slot::Closed,
                tasks: Some(tasks),
            }),
            worker: Mutex::new(Some(worker)),
        };

        {
            let mut state = this.lock_state();
            this.open_current(&mut state)?;
        }
        Ok(this)
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Path of the file currently receiving writes
    pub fn current_path(&self) -> Option<PathBuf> {
        match &self.lock_state().slot {
            Slot::Active(active) => Some(active.path.clone()),
            _ => None,
        }
    }

    /// Write `buf` in full, rotating first if a trigger fired
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock_state();
        let now = self.clock.now();

        let rotate = match &state.slot {
            Slot::Active(active) => self.should_rotate(active, buf.len() as u64, now),
            Slot::Broken(reason) => return Err(RotateError::Unavailable(reason.clone()).into()),
            Slot::Closed => return Err(RotateError::Closed.into()),
        };
        if rotate {
            self.rotate(&mut state, now)?;
        }

        let Slot::Active(active) = &mut state.slot else {
            return Err(RotateError::Closed.into());
        };
        active.writer.write_all(buf)?;
        active.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Flush buffered bytes to the active file
    pub fn flush(&self) -> io::Result<()> {
        match &mut self.lock_state().slot {
            Slot::Active(active) => active.writer.flush(),
            _ => Ok(()),
        }
    }

    /// Close the current file and open a fresh one
    ///
    /// Recovers from the broken state left by a failed rotation. On a healthy
    /// file this forces a rotation.
    pub fn reopen(&self) -> Result<(), RotateError> {
        let mut state = self.lock_state();
        let now = self.clock.now();
        let broken = match &state.slot {
            Slot::Active(_) => false,
            Slot::Broken(_) => true,
            Slot::Closed => return Err(RotateError::Closed),
        };
        if broken {
            self.open_current(&mut state)
        } else {
            self.rotate(&mut state, now)
        }
    }

    /// Queue a retention sweep on the maintenance worker
    ///
    /// The sweep runs after any compression already queued.
    pub fn sweep_now(&self) {
        self.lock_state().submit(Task::Sweep);
    }

    /// Flush and close the file, then wait for queued maintenance to finish
    ///
    /// Later writes fail. Calling `close` twice is harmless.
    pub fn close(&self) -> Result<(), RotateError> {
        let (flushed, tasks) = {
            let mut state = self.lock_state();
            let flushed = match std::mem::replace(&mut state.slot, Slot::Closed) {
                Slot::Active(mut active) => active
                    .writer
                    .flush()
                    .map_err(|e| RotateError::io("flush", &active.path, e)),
                _ => Ok(()),
            };
            (flushed, state.tasks.take())
        };

        drop(tasks);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                return Err(RotateError::Unavailable(
                    "maintenance worker panicked".to_string(),
                ));
            }
        }
        flushed
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn should_rotate(&self, active: &ActiveFile, incoming: u64, now: DateTime<FixedOffset>) -> bool {
        if self.policy.rotation_interval().is_some() && self.policy.period_start(now) > active.period {
            return true;
        }
        match self.policy.max_size_bytes() {
            Some(max) => active.bytes_written > 0 && active.bytes_written + incoming > max,
            None => false,
        }
    }

    /// Open (or append to) the file for the current period
    fn open_current(&self, state: &mut State) -> Result<(), RotateError> {
        let now = self.clock.now();
        let period = self.policy.period_start(now);
        let path = self.resume_name(self.policy.file_name_at(period))?;
        let active = self.open_active(path, period)?;

        let current = active.path.clone();
        state.slot = Slot::Active(active);
        if let Err(err) = alias::repoint(self.policy.base_path(), &current) {
            state.submit(Task::Report(err));
        }
        state.submit(Task::Rotated(RotationEvent {
            previous: None,
            current,
            rotated_at: now,
        }));
        Ok(())
    }

    /// Swap the active file for a new one
    ///
    /// On failure the previous file is reopened when possible; otherwise the
    /// controller is left broken until [`RotatingFile::reopen`] succeeds.
    fn rotate(&self, state: &mut State, now: DateTime<FixedOffset>) -> Result<(), RotateError> {
        let Slot::Active(mut old) = std::mem::replace(&mut state.slot, Slot::Closed) else {
            return Err(RotateError::Closed);
        };
        if let Err(e) = old.writer.flush() {
            state.submit(Task::Report(RotateError::io("flush", &old.path, e)));
        }
        let ActiveFile {
            writer,
            path: previous,
            period: previous_period,
            ..
        } = old;
        drop(writer);

        let period = self.policy.period_start(now);
        let opened = self
            .next_free_name(self.policy.file_name_at(period), &previous)
            .and_then(|target| self.open_active(target, period));

        let active = match opened {
            Ok(active) => active,
            Err(err) => {
                state.slot = match self.open_active(previous.clone(), previous_period) {
                    Ok(reopened) => Slot::Active(reopened),
                    Err(reopen_err) => Slot::Broken(format!(
                        "{}; reopening {} also failed: {}",
                        err,
                        previous.display(),
                        reopen_err
                    )),
                };
                return Err(err);
            }
        };

        let current = active.path.clone();
        state.slot = Slot::Active(active);
        if let Err(err) = alias::repoint(self.policy.base_path(), &current) {
            state.submit(Task::Report(err));
        }
        state.submit(Task::Rotated(RotationEvent {
            previous: Some(previous),
            current,
            rotated_at: now,
        }));
        Ok(())
    }

    /// Name to open at startup for the period named `candidate`
    ///
    /// Appends to the period's newest file if it is still uncompressed;
    /// anything already archived moves the name on to the next free sequence.
    fn resume_name(&self, candidate: PathBuf) -> Result<PathBuf, RotateError> {
        let mut newest: Option<PathBuf> = None;
        for seq in 0..=MAX_SEQUENCE {
            let name = match seq {
                0 => candidate.clone(),
                n => with_sequence(&candidate, n),
            };
            if !name.exists() && !archive_path(&name).exists() {
                return Ok(match newest {
                    Some(newest) if newest.exists() && !archive_path(&newest).exists() => newest,
                    _ => name,
                });
            }
            newest = Some(name);
        }
        Err(sequence_exhausted(&candidate))
    }

    /// Never reuse a name at rotation: add `_001`, `_002`, ... until free
    fn next_free_name(&self, candidate: PathBuf, previous: &Path) -> Result<PathBuf, RotateError> {
        let taken = |p: &Path| p == previous || p.exists() || archive_path(p).exists();
        if !taken(&candidate) {
            return Ok(candidate);
        }
        (1..=MAX_SEQUENCE)
            .map(|seq| with_sequence(&candidate, seq))
            .find(|next| !taken(next))
            .ok_or_else(|| sequence_exhausted(&candidate))
    }

    fn open_active(&self, path: PathBuf, period: DateTime<FixedOffset>) -> Result<ActiveFile, RotateError> {
        let file = open_log_file(&path)?;
        let bytes_written = file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| RotateError::io("stat", &path, e))?;
        Ok(ActiveFile {
            writer: BufWriter::with_capacity(self.policy.buffer_capacity(), file),
            path,
            period,
            bytes_written,
        })
    }
}

impl Drop for RotatingFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn sequence_exhausted(candidate: &Path) -> RotateError {
    RotateError::Unavailable(format!(
        "more than {} rotations within one period for {}",
        MAX_SEQUENCE,
        candidate.display()
    ))
}

/// Open for append, creating the parent directory if needed
fn open_log_file(path: &Path) -> Result<File, RotateError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);

    match options.open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|e| RotateError::io("create directory", parent, e))?;
            }
            options
                .open(path)
                .map_err(|e| RotateError::io("open", path, e))
        }
        Err(e) => Err(RotateError::io("open", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::clock::ManualClock;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn start() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
            .unwrap()
    }

    fn minutely(dir: &TempDir) -> RotationPolicy {
        RotationPolicy::builder(dir.path().join("app.log"))
            .rotation_interval(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    fn read_any(path: &Path) -> Vec<u8> {
        if path.extension().is_some_and(|e| e == "gz") {
            let mut out = Vec::new();
            GzDecoder::new(File::open(path).unwrap())
                .read_to_end(&mut out)
                .unwrap();
            out
        } else {
            fs::read(path).unwrap()
        }
    }

    /// All rotated/archived/active files in name order, alias excluded
    fn log_files(dir: &TempDir) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().unwrap() != "app.log")
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_startup_creates_file_and_alias() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(minutely(&dir), clock).unwrap();

        let expected = dir.path().join("app.202401011000.log");
        assert_eq!(file.current_path(), Some(expected.clone()));

        file.write(b"hello\n").unwrap();
        assert_eq!(fs::read(&expected).unwrap(), b"hello\n");
        #[cfg(unix)]
        assert_eq!(fs::read(dir.path().join("app.log")).unwrap(), b"hello\n");
        file.close().unwrap();
    }

    #[test]
    fn test_startup_appends_to_existing_period_file() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("app.202401011000.log");
        fs::write(&existing, b"before restart\n").unwrap();

        let clock = Arc::new(ManualClock::new(start() + ChronoDuration::seconds(30)));
        let file = RotatingFile::with_clock(minutely(&dir), clock).unwrap();
        file.write(b"after restart\n").unwrap();
        file.close().unwrap();

        assert_eq!(
            fs::read(&existing).unwrap(),
            b"before restart\nafter restart\n"
        );
    }

    #[test]
    fn test_restart_in_same_period_keeps_earlier_archives() {
        let dir = TempDir::new().unwrap();
        let policy = || {
            RotationPolicy::builder(dir.path().join("app.log"))
                .rotation_interval(Duration::from_secs(3600))
                .max_size_bytes(10)
                .compress(true)
                .build()
                .unwrap()
        };
        let clock = Arc::new(ManualClock::new(start() + ChronoDuration::hours(4)));

        let first_run = RotatingFile::with_clock(policy(), clock.clone()).unwrap();
        first_run.write(b"RUN1-FIRST\n").unwrap();
        first_run.write(b"RUN1-SECOND\n").unwrap();
        first_run.close().unwrap();

        // Same hour: resume the newest uncompressed file of the period
        clock.advance(ChronoDuration::minutes(30));
        let second_run = RotatingFile::with_clock(policy(), clock.clone()).unwrap();
        assert_eq!(
            second_run.current_path(),
            Some(dir.path().join("app.202401011400_001.log"))
        );
        second_run.write(b"RUN2\n").unwrap();
        clock.advance(ChronoDuration::minutes(31));
        second_run.write(b"RUN3\n").unwrap();
        second_run.close().unwrap();

        assert_eq!(
            read_any(&dir.path().join("app.202401011400.log.gz")),
            b"RUN1-FIRST\n"
        );
        assert_eq!(
            read_any(&dir.path().join("app.202401011400_001.log.gz")),
            b"RUN1-SECOND\n"
        );
        assert_eq!(
            read_any(&dir.path().join("app.202401011400_002.log.gz")),
            b"RUN2\n"
        );
        assert_eq!(
            fs::read(dir.path().join("app.202401011500.log")).unwrap(),
            b"RUN3\n"
        );
    }

    #[test]
    fn test_restart_skips_archived_period_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.202401011000.log.gz"), b"archived").unwrap();

        let clock = Arc::new(ManualClock::new(start() + ChronoDuration::seconds(30)));
        let file = RotatingFile::with_clock(minutely(&dir), clock).unwrap();
        assert_eq!(
            file.current_path(),
            Some(dir.path().join("app.202401011000_001.log"))
        );
        file.close().unwrap();
        assert_eq!(
            fs::read(dir.path().join("app.202401011000.log.gz")).unwrap(),
            b"archived"
        );
    }

    #[test]
    fn test_restart_compresses_file_left_by_previous_run() {
        let dir = TempDir::new().unwrap();
        let policy = || {
            RotationPolicy::builder(dir.path().join("app.log"))
                .rotation_interval(Duration::from_secs(60))
                .compress(true)
                .build()
                .unwrap()
        };
        let clock = Arc::new(ManualClock::new(start()));

        let first_run = RotatingFile::with_clock(policy(), clock.clone()).unwrap();
        first_run.write(b"before shutdown\n").unwrap();
        first_run.close().unwrap();

        clock.advance(ChronoDuration::minutes(5));
        let second_run = RotatingFile::with_clock(policy(), clock).unwrap();
        second_run.write(b"after restart\n").unwrap();
        second_run.close().unwrap();

        assert!(!dir.path().join("app.202401011000.log").exists());
        assert_eq!(
            read_any(&dir.path().join("app.202401011000.log.gz")),
            b"before shutdown\n"
        );
        assert_eq!(
            fs::read(dir.path().join("app.202401011005.log")).unwrap(),
            b"after restart\n"
        );
    }

    #[test]
    fn test_rotation_fails_when_sequence_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(minutely(&dir), clock.clone()).unwrap();
        file.write(b"kept\n").unwrap();

        let next = dir.path().join("app.202401011001.log");
        fs::write(&next, b"").unwrap();
        for seq in 1..=MAX_SEQUENCE {
            fs::write(with_sequence(&next, seq), b"").unwrap();
        }
        clock.advance(ChronoDuration::minutes(1));

        let err = file.write(b"no room\n").unwrap_err();
        assert!(err.to_string().contains("rotations within one period"));
        let current = dir.path().join("app.202401011000.log");
        assert_eq!(file.current_path(), Some(current.clone()));
        file.close().unwrap();
        assert_eq!(fs::read(&current).unwrap(), b"kept\n");
        assert!(!dir.path().join("app.202401011001_1000.log").exists());
    }

    #[test]
    fn test_sweep_now_prunes_old_archives() {
        let dir = TempDir::new().unwrap();
        for minute in 0..3 {
            let name = format!("app.2023010100{:02}.log.gz", minute);
            fs::write(dir.path().join(name), b"old").unwrap();
        }
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .rotation_interval(Duration::from_secs(60))
            .compress(true)
            .max_count(1)
            .build()
            .unwrap();
        let file = RotatingFile::with_clock(policy, Arc::new(ManualClock::new(start()))).unwrap();

        file.sweep_now();
        file.close().unwrap();

        let names: Vec<String> = log_files(&dir)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["app.202301010002.log.gz", "app.202401011000.log"]
        );
    }

    #[test]
    fn test_time_rotation_at_boundary() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start() + ChronoDuration::seconds(59)));
        let file = RotatingFile::with_clock(minutely(&dir), clock.clone()).unwrap();

        file.write(b"old\n").unwrap();
        clock.set(start() + ChronoDuration::seconds(60));
        file.write(b"boundary\n").unwrap();
        file.close().unwrap();

        let old = dir.path().join("app.202401011000.log");
        let new = dir.path().join("app.202401011001.log");
        assert_eq!(fs::read(&old).unwrap(), b"old\n");
        assert_eq!(fs::read(&new).unwrap(), b"boundary\n");
    }

    #[test]
    fn test_clock_going_backwards_does_not_rotate() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(minutely(&dir), clock.clone()).unwrap();

        clock.set(start() - ChronoDuration::minutes(5));
        file.write(b"late\n").unwrap();
        assert_eq!(
            file.current_path(),
            Some(dir.path().join("app.202401011000.log"))
        );
        file.close().unwrap();
    }

    #[test]
    fn test_size_rotation_uses_sequence_suffix() {
        let dir = TempDir::new().unwrap();
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .rotation_interval(Duration::from_secs(3600))
            .max_size_bytes(10)
            .build()
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(policy, clock).unwrap();

        file.write(b"12345678").unwrap();
        file.write(b"abcdef").unwrap();
        file.write(b"ghij").unwrap();
        file.write(b"k").unwrap();
        file.close().unwrap();

        assert_eq!(
            fs::read(dir.path().join("app.202401011000.log")).unwrap(),
            b"12345678"
        );
        assert_eq!(
            fs::read(dir.path().join("app.202401011000_001.log")).unwrap(),
            b"abcdefghij"
        );
        assert_eq!(
            fs::read(dir.path().join("app.202401011000_002.log")).unwrap(),
            b"k"
        );
    }

    #[test]
    fn test_oversized_write_is_not_split() {
        let dir = TempDir::new().unwrap();
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .max_size_bytes(4)
            .build()
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(policy, clock).unwrap();

        file.write(b"0123456789").unwrap();
        file.write(b"ab").unwrap();
        file.close().unwrap();

        let files = log_files(&dir);
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(&files[0]).unwrap(), b"0123456789");
        assert_eq!(fs::read(&files[1]).unwrap(), b"ab");
    }

    #[test]
    fn test_bytes_survive_many_rotations() {
        let dir = TempDir::new().unwrap();
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .rotation_interval(Duration::from_secs(60))
            .max_size_bytes(64)
            .compress(true)
            .buffer_capacity(32)
            .build()
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(policy, clock.clone()).unwrap();

        let mut expected = Vec::new();
        for i in 0..200 {
            let line = format!("record {:04}\n", i);
            file.write(line.as_bytes()).unwrap();
            expected.extend_from_slice(line.as_bytes());
            if i % 25 == 24 {
                clock.advance(ChronoDuration::seconds(61));
            }
        }
        file.close().unwrap();

        let files = log_files(&dir);
        assert!(files.len() > 8);
        let active = files
            .iter()
            .filter(|p| p.extension().map_or(true, |e| e != "gz"))
            .count();
        assert_eq!(active, 1, "only the last file stays uncompressed");

        // Rotated names sort in rotation order once the .gz suffix is ignored
        let mut ordered = files.clone();
        ordered.sort_by_key(|p| p.to_string_lossy().trim_end_matches(".gz").to_string());
        let joined: Vec<u8> = ordered.iter().flat_map(|p| read_any(p)).collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn test_rotation_compresses_previous_file() {
        let dir = TempDir::new().unwrap();
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .rotation_interval(Duration::from_secs(60))
            .compress(true)
            .build()
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(policy, clock.clone()).unwrap();

        file.write(b"first\n").unwrap();
        clock.advance(ChronoDuration::minutes(1));
        file.write(b"second\n").unwrap();
        file.close().unwrap();

        let archived = dir.path().join("app.202401011000.log.gz");
        assert!(!dir.path().join("app.202401011000.log").exists());
        assert_eq!(read_any(&archived), b"first\n");
        assert_eq!(
            fs::read(dir.path().join("app.202401011001.log")).unwrap(),
            b"second\n"
        );
    }

    #[test]
    fn test_count_retention_after_rotations() {
        let dir = TempDir::new().unwrap();
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .rotation_interval(Duration::from_secs(60))
            .compress(true)
            .max_count(2)
            .build()
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(policy, clock.clone()).unwrap();

        for minute in 0..6 {
            file.write(format!("minute {}\n", minute).as_bytes()).unwrap();
            clock.advance(ChronoDuration::minutes(1));
        }
        file.write(b"last\n").unwrap();
        file.close().unwrap();

        let names: Vec<String> = log_files(&dir)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "app.202401011004.log.gz",
                "app.202401011005.log.gz",
                "app.202401011006.log",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_alias_follows_rotation() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(minutely(&dir), clock.clone()).unwrap();
        let alias = dir.path().join("app.log");

        file.write(b"a").unwrap();
        assert_eq!(fs::read(&alias).unwrap(), b"a");

        clock.advance(ChronoDuration::minutes(1));
        file.write(b"b").unwrap();
        assert_eq!(fs::read_link(&alias).unwrap(), PathBuf::from("app.202401011001.log"));
        assert_eq!(fs::read(&alias).unwrap(), b"b");
        file.close().unwrap();
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let file = RotatingFile::with_clock(minutely(&dir), Arc::new(ManualClock::new(start()))).unwrap();
        file.close().unwrap();
        file.close().unwrap();

        let err = file.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(file.current_path().is_none());
    }

    #[test]
    fn test_refuses_regular_file_at_alias() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.log"), b"legacy").unwrap();
        let err = RotatingFile::with_clock(minutely(&dir), Arc::new(ManualClock::new(start())))
            .err()
            .unwrap();
        assert!(matches!(err, RotateError::Config(_)));
    }

    #[test]
    fn test_rotation_skips_taken_name() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(minutely(&dir), clock.clone()).unwrap();
        file.write(b"kept\n").unwrap();

        // Leftover archive from an earlier run occupies the next name
        fs::write(dir.path().join("app.202401011001.log.gz"), b"stale").unwrap();
        clock.advance(ChronoDuration::minutes(1));

        file.write(b"next\n").unwrap();
        assert_eq!(
            file.current_path(),
            Some(dir.path().join("app.202401011001_001.log"))
        );
        file.close().unwrap();
        assert_eq!(
            fs::read(dir.path().join("app.202401011001.log.gz")).unwrap(),
            b"stale"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_rotation_falls_back_then_breaks_then_recovers() {
        let dir = TempDir::new().unwrap();
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .rotation_interval(Duration::from_secs(60))
            .name_pattern(format!("{}/%Y%m%d%H%M/app.log", dir.path().display()))
            .build()
            .unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(policy, clock.clone()).unwrap();
        let first = dir.path().join("202401011000/app.log");
        file.write(b"kept\n").unwrap();

        // A plain file where the next period's directory should be
        let blocker = dir.path().join("202401011001");
        fs::write(&blocker, b"").unwrap();
        clock.advance(ChronoDuration::minutes(1));

        // The write fails, the previous file is reopened and stays intact
        assert!(file.write(b"lost\n").is_err());
        assert_eq!(file.current_path(), Some(first.clone()));
        assert_eq!(fs::read(&first).unwrap(), b"kept\n");

        // Previous file unreachable as well: the controller breaks
        fs::remove_dir_all(dir.path().join("202401011000")).unwrap();
        fs::write(dir.path().join("202401011000"), b"").unwrap();
        assert!(file.write(b"lost\n").is_err());
        assert!(file.current_path().is_none());
        let err = file.write(b"still broken\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);

        // External fix, then explicit reopen
        fs::remove_file(&blocker).unwrap();
        file.reopen().unwrap();
        file.write(b"recovered\n").unwrap();
        file.close().unwrap();
        assert_eq!(
            fs::read(dir.path().join("202401011001/app.log")).unwrap(),
            b"recovered\n"
        );
    }

    #[test]
    fn test_reopen_forces_rotation() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let file = RotatingFile::with_clock(minutely(&dir), clock).unwrap();
        file.write(b"one").unwrap();
        file.reopen().unwrap();
        file.write(b"two").unwrap();
        file.close().unwrap();

        assert_eq!(
            fs::read(dir.path().join("app.202401011000.log")).unwrap(),
            b"one"
        );
        assert_eq!(
            fs::read(dir.path().join("app.202401011000_001.log")).unwrap(),
            b"two"
        );
    }

    #[test]
    fn test_concurrent_writers_never_interleave_records() {
        let dir = TempDir::new().unwrap();
        let policy = RotationPolicy::builder(dir.path().join("app.log"))
            .max_size_bytes(256)
            .build()
            .unwrap();
        let file = Arc::new(
            RotatingFile::with_clock(policy, Arc::new(ManualClock::new(start()))).unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let file = Arc::clone(&file);
                thread::spawn(move || {
                    for i in 0..100 {
                        file.write(format!("t{}-{:03}\n", t, i).as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        file.close().unwrap();

        let mut lines: Vec<String> = log_files(&dir)
            .iter()
            .flat_map(|p| {
                String::from_utf8(fs::read(p).unwrap())
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(lines.len(), 400);
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 400);
        for file in log_files(&dir) {
            assert!(fs::metadata(&file).unwrap().len() <= 256);
        }
    }
}
