//! The supervisor side of a debugging session: spawns the debuggee, waits
//! for it to exit, and replaces it with resurrected checkpoints for as long
//! as the handoff slot asks for one.

use crate::{
    checkpoint::{CheckpointError, Registry},
    handoff::{Handoff, HandoffSlot},
    log::LogLevel::{LogDebug, LogInfo, LogWarn},
    script::interp::request_keyboard_interrupt,
    wait_status::WaitStatus,
};
use libc::{pid_t, EAGAIN, EINTR};
use nix::{
    errno::{errno, Errno},
    sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io::{self, Write},
    process,
    sync::atomic::{AtomicBool, Ordering},
};

static SUPERVISOR_INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub enum SessionError {
    Fork(Errno),
    Wait(pid_t, Errno),
    Subreaper(Errno),
    Signal(Errno),
    Io(io::Error),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Fork(e) => write!(f, "Failed to fork debuggee: {}", e),
            SessionError::Wait(pid, e) => write!(f, "Failed to wait for debuggee {}: {}", pid, e),
            SessionError::Subreaper(e) => write!(f, "Could not become a child subreaper: {}", e),
            SessionError::Signal(e) => write!(f, "Could not install SIGINT handler: {}", e),
            SessionError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// A debuggee is alive.
    Running,
    /// The debuggee exited; the handoff slot says what next.
    AwaitingHandoff,
    Restoring(i64),
    Done(i32),
}

/// Where to go once the debuggee has exited with `status` leaving `handoff`
/// in the slot.
pub fn next_state(handoff: &Handoff, status: WaitStatus) -> SessionState {
    match handoff {
        Handoff::Stop => SessionState::Done(status.shell_status().unwrap_or(1)),
        Handoff::Resurrect(id) => SessionState::Restoring(*id),
        Handoff::Malformed(_) => SessionState::Done(1),
    }
}

/// The process currently running the program.
#[derive(Debug)]
pub struct Debuggee {
    pid: pid_t,
}

impl Debuggee {
    /// Fork; the child runs `main` and exits with its result.
    pub fn spawn<F: FnOnce() -> i32>(main: F) -> Result<Debuggee, SessionError> {
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
            return Err(SessionError::Fork(Errno::last()));
        }
        if pid == 0 {
            let status = main();
            io::stdout().flush().unwrap_or(());
            io::stderr().flush().unwrap_or(());
            process::exit(status);
        }
        log!(LogDebug, "spawned debuggee {}", pid);
        Ok(Debuggee { pid })
    }

    /// The frozen image behind checkpoint `id`, woken up.
    pub fn resurrect(registry: &Registry, id: i64) -> Result<Debuggee, CheckpointError> {
        let pid = registry.resurrect(id)?;
        Ok(Debuggee { pid })
    }

    pub fn wait(&self) -> Result<WaitStatus, SessionError> {
        loop {
            let mut raw_status: i32 = 0;
            let ret = unsafe { libc::waitpid(self.pid, &mut raw_status, 0) };
            if ret >= 0 {
                let status = WaitStatus::new(raw_status);
                log!(LogDebug, "debuggee {} finished: {}", self.pid, status);
                return Ok(status);
            }
            if errno() != EINTR {
                return Err(SessionError::Wait(self.pid, Errno::last()));
            }
            if SUPERVISOR_INTERRUPTED.swap(false, Ordering::SeqCst) {
                log!(LogInfo, "SIGINT while waiting for debuggee {}", self.pid);
            }
        }
    }
}

extern "C" fn on_sigint(_: libc::c_int) {
    SUPERVISOR_INTERRUPTED.store(true, Ordering::SeqCst);
    request_keyboard_interrupt();
}

/// SIGINT sets a flag instead of killing us. Inherited across fork, where it
/// turns into `KeyboardInterrupt` in the program.
pub fn install_sigint_handler() -> Result<(), SessionError> {
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let result = unsafe { sigaction(Signal::SIGINT, &action) };
    result.map(|_| ()).map_err(SessionError::Signal)
}

/// Orphaned descendants (frozen checkpoints among them) get reparented to us
/// rather than to init.
fn become_subreaper() -> Result<(), SessionError> {
    let ret = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if ret < 0 {
        return Err(SessionError::Subreaper(Errno::last()));
    }
    Ok(())
}

/// Reap any children that have already exited.
fn reap_strays() {
    loop {
        let mut raw_status: i32 = 0;
        let ret = unsafe { libc::waitpid(-1, &mut raw_status, libc::WNOHANG) };
        if ret > 0 {
            log!(LogDebug, "reaped stray {}: {}", ret, WaitStatus::new(raw_status));
            continue;
        }
        if ret < 0 && errno() == EINTR {
            continue;
        }
        return;
    }
}

pub struct Supervisor {
    registry: Registry,
    slot: HandoffSlot,
}

impl Supervisor {
    pub fn new(registry: Registry, slot: HandoffSlot) -> Supervisor {
        Supervisor { registry, slot }
    }

    /// Run the session to completion and return its exit status.
    /// `debuggee_main` runs in the first debuggee.
    pub fn run<F: FnOnce() -> i32>(&mut self, debuggee_main: F) -> Result<i32, SessionError> {
        become_subreaper()?;
        install_sigint_handler()?;
        self.registry.create_dirs()?;
        self.slot.clear()?;

        let mut debuggee = Debuggee::spawn(debuggee_main)?;
        let mut status = WaitStatus::default();
        let mut state = SessionState::Running;
        let code = loop {
            log!(LogDebug, "session state {:?}", state);
            state = match state {
                SessionState::Running => {
                    status = debuggee.wait()?;
                    reap_strays();
                    SessionState::AwaitingHandoff
                }
                SessionState::AwaitingHandoff => {
                    let handoff = self.slot.pop()?;
                    if let Handoff::Malformed(contents) = &handoff {
                        eprintln!(
                            "Malformed handoff {:?} in {}",
                            contents,
                            self.slot.path().display()
                        );
                    }
                    next_state(&handoff, status)
                }
                SessionState::Restoring(id) => match Debuggee::resurrect(&self.registry, id) {
                    Ok(d) => {
                        debuggee = d;
                        SessionState::Running
                    }
                    Err(e) => {
                        println!("{}", e);
                        SessionState::Done(1)
                    }
                },
                SessionState::Done(code) => break code,
            };
        };

        if let Err(e) = self.registry.release_all() {
            log!(LogWarn, "Could not release checkpoints: {}", e);
        }
        reap_strays();
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use nix::unistd::getpid;
    use std::{
        fs,
        path::Path,
        sync::{Mutex, MutexGuard},
    };

    lazy_static! {
        /// `reap_strays` would otherwise collect another test's debuggee.
        static ref FORK_LOCK: Mutex<()> = Mutex::new(());
    }

    fn fork_lock() -> MutexGuard<'static, ()> {
        FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn transitions() {
        let exited = WaitStatus::for_exit_code(0);
        assert_eq!(
            SessionState::Restoring(4),
            next_state(&Handoff::Resurrect(4), exited)
        );
        assert_eq!(
            SessionState::Restoring(-1),
            next_state(&Handoff::Resurrect(-1), exited)
        );
        assert_eq!(SessionState::Done(0), next_state(&Handoff::Stop, exited));
        assert_eq!(
            SessionState::Done(1),
            next_state(&Handoff::Stop, WaitStatus::for_exit_code(1))
        );
        assert_eq!(
            SessionState::Done(128 + libc::SIGKILL),
            next_state(&Handoff::Stop, WaitStatus::for_fatal_sig(libc::SIGKILL))
        );
        assert_eq!(
            SessionState::Done(1),
            next_state(&Handoff::Malformed("x".into()), exited)
        );
    }

    #[test]
    fn debuggee_exit_status_is_reported() {
        let _lock = fork_lock();
        let d = Debuggee::spawn(|| 3).unwrap();
        assert_eq!(Some(3), d.wait().unwrap().exit_code());
    }

    fn supervise<F: FnOnce(&HandoffSlot) -> i32>(f: F) -> i32 {
        let _lock = fork_lock();
        let tmp = tempfile::tempdir().unwrap();
        let slot = HandoffSlot::new(&tmp.path().join("rewind.handoff"));
        let registry = Registry::for_session(tmp.path(), nix::unistd::getpid().as_raw());
        let child_slot = slot.clone();
        let mut supervisor = Supervisor::new(registry, slot);
        supervisor.run(move || f(&child_slot)).unwrap()
    }

    #[test]
    fn empty_slot_ends_with_debuggee_status() {
        assert_eq!(0, supervise(|_| 0));
        assert_eq!(5, supervise(|_| 5));
    }

    #[test]
    fn bad_handoffs_end_with_status_1() {
        assert_eq!(
            1,
            supervise(|slot| {
                std::fs::write(slot.path(), "garbage").unwrap();
                0
            })
        );
        // Nothing is registered under 9.
        assert_eq!(
            1,
            supervise(|slot| {
                slot.write(9).unwrap();
                0
            })
        );
    }

    /// Like `supervise`, but the debuggee checkpoints into the session's
    /// registry and notes what each image saw in a file that outlives it.
    fn supervise_store<F>(max_checkpoints: u64, f: F) -> (i32, Vec<String>)
    where
        F: FnOnce(&mut CheckpointStore, &HandoffSlot, &Path) -> i32,
    {
        let _lock = fork_lock();
        let tmp = tempfile::tempdir().unwrap();
        let slot = HandoffSlot::new(&tmp.path().join("rewind.handoff"));
        let registry = Registry::for_session(tmp.path(), getpid().as_raw());
        let notes = tmp.path().join("notes");
        let mut store = CheckpointStore::new(registry.clone(), max_checkpoints);
        let child_slot = slot.clone();
        let child_notes = notes.clone();
        let mut supervisor = Supervisor::new(registry, slot);
        let code = supervisor
            .run(move || f(&mut store, &child_slot, child_notes.as_path()))
            .unwrap();
        let seen = fs::read_to_string(&notes)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect();
        (code, seen)
    }

    /// Append a line to `path`; returns how many lines it has now.
    fn note(path: &Path, line: &str) -> usize {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(f, "{}", line).unwrap();
        fs::read_to_string(path).unwrap().lines().count()
    }

    #[test]
    fn resurrected_images_keep_numbering_the_session() {
        let (code, seen) = supervise_store(0, |store, slot, notes| {
            let first = store.create().unwrap();
            if note(notes, &first.to_string()) == 1 {
                let second = store.create().unwrap();
                note(notes, &second.to_string());
                slot.write(first).unwrap();
                return 0;
            }
            // Back at `first`, with the memory of that instant.
            let third = store.create().unwrap();
            note(notes, &third.to_string());
            7
        });
        assert_eq!(7, code);
        assert_eq!(vec!["0", "1", "0", "2"], seen);
    }

    #[test]
    fn a_checkpoint_can_be_revisited() {
        let (code, seen) = supervise_store(0, |store, slot, notes| {
            let id = store.create().unwrap();
            let visits = note(notes, &id.to_string());
            if visits < 3 {
                slot.write(id).unwrap();
            }
            0
        });
        assert_eq!(0, code);
        assert_eq!(vec!["0", "0", "0"], seen);
    }

    #[test]
    fn evicted_checkpoints_cannot_be_resurrected() {
        let (code, seen) = supervise_store(2, |store, slot, notes| {
            for _ in 0..3 {
                let id = store.create().unwrap();
                note(notes, &id.to_string());
            }
            slot.write(0).unwrap();
            0
        });
        assert_eq!(1, code);
        assert_eq!(vec!["0", "1", "2"], seen);
    }
}
