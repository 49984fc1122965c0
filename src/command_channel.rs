//! Turns raw keystrokes at a pause point into a navigation command.

use crate::{
    log::LogLevel::{LogDebug, LogWarn},
    util::is_tty,
};
use nix::{
    errno::Errno,
    sys::termios::{cfmakeraw, tcgetattr, tcsetattr, OutputFlags, SetArg, Termios},
    unistd,
};
use std::{
    fmt,
    io::{self, Write},
    os::unix::io::RawFd,
};

const ENTER: &[u8] = b"\r\n";
const ERASE: &[u8] = &[0x08, 0x7f];
const INTERRUPT: &[u8] = &[0x03, 0x1b];

/// A u64 can always hold this many decimal digits.
const MAX_DIGITS: usize = 18;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Command {
    Continue,
    Rewind,
    Jump(u64),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Continue => write!(f, "CONTINUE"),
            Command::Rewind => write!(f, "REWIND"),
            Command::Jump(n) => write!(f, "JUMP({})", n),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Keystroke {
    Command(Command),
    /// Ctrl-C, Escape or end of input. Not navigable.
    Interrupt,
}

/// Decode one command from `next_byte`, echoing to `out`.
///
/// `next_byte` yields `None` at end of input.
pub fn decode<F>(prompt: &str, mut next_byte: F, out: &mut dyn Write) -> io::Result<Keystroke>
where
    F: FnMut() -> io::Result<Option<u8>>,
{
    out.write_all(prompt.as_bytes())?;
    out.flush()?;

    let mut digits = String::new();
    loop {
        let c = match next_byte()? {
            Some(c) => c,
            None => {
                out.write_all(b"\n")?;
                out.flush()?;
                return Ok(Keystroke::Interrupt);
            }
        };

        if ENTER.contains(&c) {
            out.write_all("\x08 \x08".repeat(digits.len()).as_bytes())?;
            out.write_all(b"\n")?;
            out.flush()?;
            if digits.is_empty() {
                return Ok(Keystroke::Command(Command::Continue));
            }
            return match digits.parse::<u64>() {
                Ok(n) => Ok(Keystroke::Command(Command::Jump(n))),
                Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            };
        } else if ERASE.contains(&c) {
            if digits.pop().is_none() {
                out.write_all(b"\n")?;
                out.flush()?;
                return Ok(Keystroke::Command(Command::Rewind));
            }
            out.write_all(b"\x08 \x08")?;
        } else if INTERRUPT.contains(&c) {
            out.write_all(b"\n")?;
            out.flush()?;
            return Ok(Keystroke::Interrupt);
        } else if c.is_ascii_digit() {
            if digits.len() < MAX_DIGITS {
                digits.push(c as char);
                out.write_all(&[c])?;
            }
        } else {
            continue;
        }
        out.flush()?;
    }
}

/// Puts a terminal in raw mode (keeping newline translation on output) until
/// dropped.
pub struct RawMode {
    fd: RawFd,
    saved: Termios,
}

impl RawMode {
    pub fn new(fd: RawFd) -> io::Result<RawMode> {
        let saved = tcgetattr(fd)?;
        let mut raw = saved.clone();
        cfmakeraw(&mut raw);
        raw.output_flags |= OutputFlags::OPOST | OutputFlags::ONLCR;
        tcsetattr(fd, SetArg::TCSADRAIN, &raw)?;
        Ok(RawMode { fd, saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(self.fd, SetArg::TCSADRAIN, &self.saved) {
            log!(LogWarn, "Could not restore terminal attributes: {}", e);
        }
    }
}

/// One byte straight from `fd`, bypassing any userspace buffering.
fn read_byte(fd: RawFd) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match unistd::read(fd, &mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Block on stdin until the user enters a command.
pub fn await_command(prompt: &str) -> io::Result<Keystroke> {
    let fd = libc::STDIN_FILENO;
    let _raw = if is_tty(fd) {
        Some(RawMode::new(fd)?)
    } else {
        None
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = decode(prompt, || read_byte(fd), &mut out);
    log!(LogDebug, "decoded keystroke {:?}", result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[u8]) -> (Keystroke, Vec<u8>) {
        let mut bytes = input.iter().copied();
        let mut out = Vec::new();
        let k = decode("", || Ok(bytes.next()), &mut out).unwrap();
        (k, out)
    }

    #[test]
    fn digits_then_enter_jump() {
        let (k, out) = run(b"12\r");
        assert_eq!(Keystroke::Command(Command::Jump(12)), k);
        assert_eq!(b"12\x08 \x08\x08 \x08\n".to_vec(), out);
    }

    #[test]
    fn erase_on_empty_rewinds() {
        assert_eq!(Keystroke::Command(Command::Rewind), run(&[0x7f]).0);
        let (k, out) = run(&[0x08]);
        assert_eq!(Keystroke::Command(Command::Rewind), k);
        assert_eq!(b"\n".to_vec(), out);
    }

    #[test]
    fn enter_on_empty_continues() {
        assert_eq!(Keystroke::Command(Command::Continue), run(b"\n").0);
        assert_eq!(Keystroke::Command(Command::Continue), run(b"\r").0);
    }

    #[test]
    fn erase_removes_last_digit() {
        let (k, out) = run(&[b'1', 0x7f, b'\r']);
        assert_eq!(Keystroke::Command(Command::Continue), k);
        assert_eq!(b"1\x08 \x08\n".to_vec(), out);
        assert_eq!(
            Keystroke::Command(Command::Jump(3)),
            run(&[b'1', 0x08, b'3', b'\n']).0
        );
    }

    #[test]
    fn interrupt_keys_and_eof() {
        assert_eq!(Keystroke::Interrupt, run(&[0x03]).0);
        assert_eq!(Keystroke::Interrupt, run(&[b'4', 0x1b]).0);
        assert_eq!(Keystroke::Interrupt, run(b"").0);
        assert_eq!(Keystroke::Interrupt, run(b"77").0);
    }

    #[test]
    fn other_bytes_and_excess_digits_are_ignored() {
        let (k, out) = run(b"a1-2 \r");
        assert_eq!(Keystroke::Command(Command::Jump(12)), k);
        assert_eq!(b"12\x08 \x08\x08 \x08\n".to_vec(), out);

        let (k, _) = run(b"1234567890123456789999\r");
        assert_eq!(Keystroke::Command(Command::Jump(123456789012345678)), k);
    }

    #[test]
    fn prompt_is_written_first() {
        let mut bytes = b"\r".iter().copied();
        let mut out = Vec::new();
        decode("> ", || Ok(bytes.next()), &mut out).unwrap();
        assert_eq!(b"> \n".to_vec(), out);
    }
}
