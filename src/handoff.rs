//! The file a dying debuggee leaves behind to say which checkpoint the
//! supervisor should resurrect next.

use crate::log::LogLevel::LogDebug;
use std::{
    fmt::{self, Display, Formatter},
    fs, io,
    path::{Path, PathBuf},
};

/// What the supervisor found in the slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Handoff {
    /// Empty slot: the session is over.
    Stop,
    /// Resurrect this checkpoint. May be negative; the store rejects it.
    Resurrect(i64),
    Malformed(String),
}

impl Handoff {
    pub fn parse(contents: &str) -> Handoff {
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Handoff::Stop;
        }
        match trimmed.parse::<i64>() {
            Ok(id) => Handoff::Resurrect(id),
            Err(_) => Handoff::Malformed(contents.to_owned()),
        }
    }
}

impl Display for Handoff {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Handoff::Stop => write!(f, "<empty>"),
            Handoff::Resurrect(id) => write!(f, "{}", id),
            Handoff::Malformed(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HandoffSlot {
    path: PathBuf,
}

impl HandoffSlot {
    pub fn new(path: &Path) -> HandoffSlot {
        HandoffSlot {
            path: path.to_owned(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites whatever the slot held.
    pub fn write(&self, id: u64) -> io::Result<()> {
        log!(LogDebug, "handoff <- {}", id);
        fs::write(&self.path, id.to_string())
    }

    pub fn clear(&self) -> io::Result<()> {
        fs::write(&self.path, "")
    }

    /// Read the slot, then clear it. A missing file reads as empty.
    pub fn pop(&self) -> io::Result<Handoff> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        self.clear()?;
        let handoff = Handoff::parse(&contents);
        log!(LogDebug, "handoff -> {}", handoff);
        Ok(handoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_pop_empties_the_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let slot = HandoffSlot::new(&tmp.path().join("rewind.handoff"));
        slot.write(7).unwrap();
        assert_eq!(Handoff::Resurrect(7), slot.pop().unwrap());
        assert_eq!(Handoff::Stop, slot.pop().unwrap());
        assert_eq!("", fs::read_to_string(slot.path()).unwrap());
    }

    #[test]
    fn write_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let slot = HandoffSlot::new(&tmp.path().join("h"));
        slot.write(123).unwrap();
        slot.write(4).unwrap();
        assert_eq!(Handoff::Resurrect(4), slot.pop().unwrap());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let slot = HandoffSlot::new(&tmp.path().join("absent"));
        assert_eq!(Handoff::Stop, slot.pop().unwrap());
    }

    #[test]
    fn parsing() {
        assert_eq!(Handoff::Stop, Handoff::parse(""));
        assert_eq!(Handoff::Stop, Handoff::parse(" \n"));
        assert_eq!(Handoff::Resurrect(-1), Handoff::parse("-1"));
        assert_eq!(Handoff::Resurrect(42), Handoff::parse("42\n"));
        assert_eq!(
            Handoff::Malformed("forty".to_owned()),
            Handoff::parse("forty")
        );
    }
}
