use crate::kernel_metadata::signal_name;
use libc::{WEXITSTATUS, WIFCONTINUED, WIFEXITED, WIFSIGNALED, WIFSTOPPED, WSTOPSIG, WTERMSIG};
use std::fmt::{self, Display, Formatter};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WaitType {
    Exit,
    FatalSignal,
    /// Only seen with WUNTRACED, i.e. while freezing a checkpoint.
    SignalStop,
    Continued,
}

/// Decoded `waitpid()` status of a debuggee or a frozen checkpoint image.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct WaitStatus {
    status: i32,
}

impl WaitStatus {
    pub fn new(status: i32) -> WaitStatus {
        WaitStatus { status }
    }

    pub fn wait_type(&self) -> WaitType {
        if self.exit_code().is_some() {
            WaitType::Exit
        } else if self.fatal_sig().is_some() {
            WaitType::FatalSignal
        } else if self.stop_sig().is_some() {
            WaitType::SignalStop
        } else if WIFCONTINUED(self.status) {
            WaitType::Continued
        } else {
            fatal!("Status {:#x} not understood", self.status);
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        if WIFEXITED(self.status) {
            Some(WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    pub fn fatal_sig(&self) -> Option<i32> {
        let sig = WTERMSIG(self.status);
        if WIFSIGNALED(self.status) && sig > 0 {
            Some(sig)
        } else {
            None
        }
    }

    pub fn stop_sig(&self) -> Option<i32> {
        if WIFSTOPPED(self.status) {
            Some(WSTOPSIG(self.status) & 0x7f)
        } else {
            None
        }
    }

    /// What a shell would report for this status: the exit code, or 128 plus
    /// the signal number for a process killed by a signal.
    pub fn shell_status(&self) -> Option<i32> {
        self.exit_code()
            .or_else(|| self.fatal_sig().map(|sig| 128 + sig))
    }
}

#[cfg(test)]
impl WaitStatus {
    pub fn for_exit_code(code: i32) -> WaitStatus {
        debug_assert!((0..0x100).contains(&code));
        WaitStatus { status: code << 8 }
    }

    pub fn for_fatal_sig(sig: i32) -> WaitStatus {
        debug_assert!((1..0x80).contains(&sig));
        WaitStatus { status: sig }
    }

    pub fn for_stop_sig(sig: i32) -> WaitStatus {
        debug_assert!((1..0x80).contains(&sig));
        WaitStatus {
            status: (sig << 8) | 0x7f,
        }
    }
}

impl Display for WaitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.status)?;
        match self.wait_type() {
            WaitType::Exit => write!(f, " (EXIT-{})", self.exit_code().unwrap_or(0)),
            WaitType::FatalSignal => {
                write!(f, " (FATAL-{})", signal_name(self.fatal_sig().unwrap_or(0)))
            }
            WaitType::SignalStop => {
                write!(f, " (STOP-{})", signal_name(self.stop_sig().unwrap_or(0)))
            }
            WaitType::Continued => write!(f, " (CONTINUED)"),
        }
    }
}
