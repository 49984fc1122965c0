//! Checkpoints are frozen forks of the debuggee. A checkpoint is created by
//! forking; the child stops itself with SIGSTOP and stays stopped until the
//! supervisor resurrects it with SIGCONT, at which point it carries on as
//! the debuggee from the exact instant it was forked.
//!
//! The id -> pid registry lives on disk so that it survives the debuggee
//! being replaced. So does the id counter: a resurrected image carries the
//! memory of its own past, and would otherwise hand out ids again.

use crate::{
    log::LogLevel::{LogDebug, LogWarn},
    script::interp::clear_keyboard_interrupt,
    util::ensure_dir,
    wait_status::WaitStatus,
};
use libc::{pid_t, EAGAIN, ECHILD, EINTR, SIGSTOP};
use nix::{
    errno::{errno, Errno},
    sys::{
        signal::{kill, Signal},
        stat::Mode,
    },
    unistd::{getpid, Pid},
};
use serde::{Deserialize, Serialize};
use std::{
    env,
    error::Error,
    fmt::{self, Display, Formatter},
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

pub type CheckpointId = u64;

#[derive(Debug)]
pub enum CheckpointError {
    Fork(Errno),
    Wait(pid_t, Errno),
    /// The freshly forked image did not stop.
    NotFrozen(pid_t, WaitStatus),
    Registry(io::Error),
    NegativeId(i64),
    NotRegistered(i64),
    ImageGone(i64, pid_t),
    Signal(pid_t, Errno),
}

impl Display for CheckpointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Fork(e) => write!(f, "Failed to fork checkpoint: {}", e),
            CheckpointError::Wait(pid, e) => {
                write!(f, "Failed to wait for checkpoint process {}: {}", pid, e)
            }
            CheckpointError::NotFrozen(pid, status) => write!(
                f,
                "Checkpoint process {} did not stop; status {}",
                pid, status
            ),
            CheckpointError::Registry(e) => write!(f, "Checkpoint registry error: {}", e),
            CheckpointError::NegativeId(id) => {
                write!(f, "Invalid checkpoint {}: identifiers start at 0", id)
            }
            CheckpointError::NotRegistered(id) => write!(f, "No checkpoint {}", id),
            CheckpointError::ImageGone(id, pid) => write!(
                f,
                "Checkpoint {} (process {}) no longer exists",
                id, pid
            ),
            CheckpointError::Signal(pid, e) => {
                write!(f, "Could not signal checkpoint process {}: {}", pid, e)
            }
        }
    }
}

impl Error for CheckpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointError::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        CheckpointError::Registry(e)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: CheckpointId,
    pub pid: pid_t,
}

/// `<state dir>/session-<supervisor pid>/checkpoints`, one `<id>.json` per
/// checkpoint plus the `next_id` counter.
#[derive(Clone, Debug)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn for_session(state_dir: &Path, supervisor: pid_t) -> Registry {
        Registry {
            dir: session_dir(state_dir, supervisor).join("checkpoints"),
        }
    }

    fn from_dir(dir: PathBuf) -> Registry {
        Registry { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn create_dirs(&self) -> io::Result<()> {
        ensure_dir(&self.dir, "checkpoint registry", Mode::S_IRWXU)
    }

    fn entry_path(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn counter_path(&self) -> PathBuf {
        self.dir.join("next_id")
    }

    /// Hand out the next identifier of the session. The first is 0. Only the
    /// live debuggee allocates, so there is a single writer.
    pub fn allocate_id(&self) -> io::Result<CheckpointId> {
        let path = self.counter_path();
        let id = match fs::read_to_string(&path) {
            Ok(s) => s.trim().parse::<CheckpointId>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: {}", path.display(), e),
                )
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, (id + 1).to_string())?;
        fs::rename(&tmp, &path)?;
        Ok(id)
    }

    /// Register `entry`, returning whatever was registered under its id
    /// before.
    pub fn record(&self, entry: RegistryEntry) -> io::Result<Option<RegistryEntry>> {
        let previous = self.lookup(entry.id)?;
        let path = self.entry_path(entry.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        fs::rename(&tmp, &path)?;
        Ok(previous)
    }

    pub fn lookup(&self, id: CheckpointId) -> io::Result<Option<RegistryEntry>> {
        match fs::read(self.entry_path(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn remove(&self, id: CheckpointId) -> io::Result<()> {
        match fs::remove_file(self.entry_path(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Every registered checkpoint, lowest id first. Unreadable entries are
    /// skipped.
    pub fn entries(&self) -> io::Result<Vec<RegistryEntry>> {
        let mut entries = Vec::new();
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };
        for dirent in dir {
            let path = dirent?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|b| serde_json::from_slice(&b).map_err(|e| e.to_string()))
            {
                Ok(entry) => entries.push(entry),
                Err(e) => log!(LogWarn, "Skipping registry entry {}: {}", path.display(), e),
            }
        }
        entries.sort_by_key(|e: &RegistryEntry| e.id);
        Ok(entries)
    }

    /// Wake checkpoint `id`. The woken process is the new debuggee.
    pub fn resurrect(&self, id: i64) -> Result<pid_t, CheckpointError> {
        if id < 0 {
            return Err(CheckpointError::NegativeId(id));
        }
        let entry = match self.lookup(id as CheckpointId)? {
            Some(entry) => entry,
            None => return Err(CheckpointError::NotRegistered(id)),
        };
        if !is_frozen_image(entry.pid) {
            return Err(CheckpointError::ImageGone(id, entry.pid));
        }
        log!(LogDebug, "resurrecting checkpoint {} (pid {})", id, entry.pid);
        kill(Pid::from_raw(entry.pid), Signal::SIGCONT)
            .map_err(|e| CheckpointError::Signal(entry.pid, e))?;
        Ok(entry.pid)
    }

    /// Kill and reap every frozen image of this session, then delete the
    /// session directory.
    pub fn release_all(&self) -> io::Result<()> {
        for entry in self.entries()? {
            discard_image(entry.pid);
        }
        let session = self.dir.parent().unwrap_or(&self.dir);
        match fs::remove_dir_all(session) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

pub fn session_dir(state_dir: &Path, supervisor: pid_t) -> PathBuf {
    state_dir.join(format!("session-{}", supervisor))
}

/// Remove every session under `state_dir`, killing frozen images that are
/// still around.
pub fn clear_all(state_dir: &Path) -> io::Result<()> {
    let dir = match fs::read_dir(state_dir) {
        Ok(dir) => dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for dirent in dir {
        let path = dirent?.path();
        let is_session = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with("session-"));
        if !is_session || !path.is_dir() {
            continue;
        }
        log!(LogDebug, "clearing stale session {}", path.display());
        Registry::from_dir(path.join("checkpoints")).release_all()?;
    }
    Ok(())
}

/// True if `pid` is a stopped process running this executable.
pub fn is_frozen_image(pid: pid_t) -> bool {
    if pid <= 0 {
        return false;
    }
    let stat = match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(s) => s,
        Err(_) => return false,
    };
    // The state follows the parenthesised command name, which may itself
    // contain parentheses.
    let stopped = stat
        .rfind(')')
        .and_then(|i| stat[i + 1..].trim_start().chars().next())
        .map_or(false, |state| state == 'T' || state == 't');
    if !stopped {
        return false;
    }
    match (
        fs::read_link(format!("/proc/{}/exe", pid)),
        env::current_exe(),
    ) {
        (Ok(exe), Ok(ours)) => exe == ours,
        _ => false,
    }
}

/// SIGKILL `pid` if it is one of our frozen images, and reap it if it is
/// our child.
fn discard_image(pid: pid_t) {
    if !is_frozen_image(pid) {
        return;
    }
    log!(LogDebug, "discarding frozen image {}", pid);
    kill(Pid::from_raw(pid), Signal::SIGKILL).unwrap_or(());
    reap(pid);
}

/// Blocking waitpid on `pid`. Not our child is fine.
fn reap(pid: pid_t) {
    loop {
        let mut raw_status: i32 = 0;
        let ret = unsafe { libc::waitpid(pid, &mut raw_status, 0) };
        if ret >= 0 || errno() != EINTR {
            if ret < 0 && errno() != ECHILD {
                log!(LogWarn, "waitpid({}) failed: {}", pid, Errno::last());
            }
            return;
        }
    }
}

/// Debuggee-side handle: hands out identifiers and freezes images.
pub struct CheckpointStore {
    registry: Registry,
    /// Images more than this many ids older than the newest are discarded.
    /// 0 keeps everything.
    max_checkpoints: u64,
}

impl CheckpointStore {
    pub fn new(registry: Registry, max_checkpoints: u64) -> CheckpointStore {
        CheckpointStore {
            registry,
            max_checkpoints,
        }
    }

    /// Freeze the current process. Returns the new checkpoint's id, both
    /// here and, later, in the image if it is ever resurrected. Ids grow by
    /// one per call across the whole session, rewinds included.
    pub fn create(&mut self) -> Result<CheckpointId, CheckpointError> {
        let id = self.registry.allocate_id()?;
        self.freeze(id)?;
        Ok(id)
    }

    fn freeze(&self, id: CheckpointId) -> Result<(), CheckpointError> {
        loop {
            io::stdout().flush().unwrap_or(());
            io::stderr().flush().unwrap_or(());

            let mut pid: pid_t;
            loop {
                pid = unsafe { libc::fork() };
                // fork() can fail with EAGAIN due to temporary load issues.
                if pid >= 0 || errno() != EAGAIN {
                    break;
                }
            }
            if pid < 0 {
                return Err(CheckpointError::Fork(Errno::last()));
            }

            if pid == 0 {
                unsafe {
                    libc::raise(SIGSTOP);
                }
                // Resurrected. Anything delivered while stopped is stale.
                clear_keyboard_interrupt();
                log!(LogDebug, "checkpoint {} resumed as {}", id, getpid());
                // Leave a fresh frozen copy behind so `id` can be revisited.
                continue;
            }

            let status = wait_for_stop(pid)?;
            if status.stop_sig() != Some(SIGSTOP) {
                return Err(CheckpointError::NotFrozen(pid, status));
            }

            let previous = self.registry.record(RegistryEntry { id, pid })?;
            if let Some(old) = previous {
                if old.pid != pid && old.pid != getpid().as_raw() {
                    log!(
                        LogDebug,
                        "checkpoint {}: replacing image {} with {}",
                        id,
                        old.pid,
                        pid
                    );
                    discard_image(old.pid);
                }
            }
            log!(LogDebug, "checkpoint {} frozen as {}", id, pid);
            self.evict(id)?;
            return Ok(());
        }
    }

    fn evict(&self, newest: CheckpointId) -> io::Result<()> {
        if self.max_checkpoints == 0 || newest < self.max_checkpoints {
            return Ok(());
        }
        let oldest_kept = newest + 1 - self.max_checkpoints;
        for entry in self.registry.entries()? {
            if entry.id >= oldest_kept {
                break;
            }
            log!(LogDebug, "evicting checkpoint {}", entry.id);
            if entry.pid != getpid().as_raw() {
                discard_image(entry.pid);
            }
            self.registry.remove(entry.id)?;
        }
        Ok(())
    }
}

fn wait_for_stop(pid: pid_t) -> Result<WaitStatus, CheckpointError> {
    loop {
        let mut raw_status: i32 = 0;
        let ret = unsafe { libc::waitpid(pid, &mut raw_status, libc::WUNTRACED) };
        if ret >= 0 {
            return Ok(WaitStatus::new(raw_status));
        }
        if errno() != EINTR {
            return Err(CheckpointError::Wait(pid, Errno::last()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trip_and_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::for_session(tmp.path(), 77);
        registry.create_dirs().unwrap();
        assert!(registry.dir().ends_with("session-77/checkpoints"));

        assert_eq!(None, registry.lookup(0).unwrap());
        assert_eq!(None, registry.record(RegistryEntry { id: 0, pid: 10 }).unwrap());
        assert_eq!(
            Some(RegistryEntry { id: 0, pid: 10 }),
            registry.record(RegistryEntry { id: 0, pid: 11 }).unwrap()
        );
        registry.record(RegistryEntry { id: 2, pid: 12 }).unwrap();
        registry.record(RegistryEntry { id: 1, pid: 13 }).unwrap();
        let ids: Vec<_> = registry.entries().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(vec![0, 1, 2], ids);

        let json = fs::read_to_string(registry.dir().join("2.json")).unwrap();
        assert_eq!(r#"{"id":2,"pid":12}"#, json);

        // The counter is not an entry.
        registry.allocate_id().unwrap();
        assert_eq!(3, registry.entries().unwrap().len());

        registry.remove(1).unwrap();
        registry.remove(1).unwrap();
        assert_eq!(None, registry.lookup(1).unwrap());
    }

    #[test]
    fn ids_are_allocated_once_per_session() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::for_session(tmp.path(), 80);
        registry.create_dirs().unwrap();
        assert_eq!(0, registry.allocate_id().unwrap());
        assert_eq!(1, registry.allocate_id().unwrap());

        // Another handle on the same session, as held by a resurrected image,
        // carries on from the shared counter.
        let other = Registry::for_session(tmp.path(), 80);
        assert_eq!(2, other.allocate_id().unwrap());
        assert_eq!(3, registry.allocate_id().unwrap());
        assert_eq!(
            "4",
            fs::read_to_string(registry.dir().join("next_id")).unwrap()
        );

        // Sessions do not share counters.
        let fresh = Registry::for_session(tmp.path(), 81);
        fresh.create_dirs().unwrap();
        assert_eq!(0, fresh.allocate_id().unwrap());

        fs::write(registry.dir().join("next_id"), "x").unwrap();
        assert_eq!(
            io::ErrorKind::InvalidData,
            registry.allocate_id().unwrap_err().kind()
        );
    }

    #[test]
    fn resurrect_rejects_bad_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::for_session(tmp.path(), 78);
        registry.create_dirs().unwrap();
        match registry.resurrect(-1) {
            Err(CheckpointError::NegativeId(-1)) => (),
            other => panic!("unexpected {:?}", other),
        }
        match registry.resurrect(5) {
            Err(CheckpointError::NotRegistered(5)) => (),
            other => panic!("unexpected {:?}", other),
        }
        // Our own pid is running, not stopped.
        registry
            .record(RegistryEntry {
                id: 3,
                pid: getpid().as_raw(),
            })
            .unwrap();
        match registry.resurrect(3) {
            Err(CheckpointError::ImageGone(3, _)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn release_all_removes_the_session() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Registry::for_session(tmp.path(), 79);
        registry.create_dirs().unwrap();
        registry
            .record(RegistryEntry {
                id: 0,
                pid: getpid().as_raw(),
            })
            .unwrap();
        registry.release_all().unwrap();
        assert!(!session_dir(tmp.path(), 79).exists());
        // Idempotent.
        registry.release_all().unwrap();
    }

    #[test]
    fn clear_all_only_touches_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        for pid in &[1, 2] {
            Registry::for_session(tmp.path(), *pid).create_dirs().unwrap();
        }
        fs::create_dir(tmp.path().join("unrelated")).unwrap();
        clear_all(tmp.path()).unwrap();
        assert!(!session_dir(tmp.path(), 1).exists());
        assert!(!session_dir(tmp.path(), 2).exists());
        assert!(tmp.path().join("unrelated").exists());
        clear_all(&tmp.path().join("missing")).unwrap();
    }

    #[test]
    fn not_frozen() {
        assert!(!is_frozen_image(getpid().as_raw()));
        assert!(!is_frozen_image(0));
        assert!(!is_frozen_image(-5));
    }
}
