use nix::{
    sys::stat::Mode,
    unistd::{access, isatty, AccessFlags},
};
use std::{
    env,
    fs,
    io::{self, Write},
    os::unix::{fs::PermissionsExt, io::RawFd},
    path::{Path, PathBuf},
};

/// Directory holding checkpoint registries: `explicit` if given, else
/// $REWIND_STATE_DIR, else `<cwd>/.rewind`.
pub fn state_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return absolute(dir);
    }
    match env::var_os("REWIND_STATE_DIR") {
        Some(dir) if !dir.is_empty() => absolute(Path::new(&dir)),
        _ => cwd().join(".rewind"),
    }
}

/// `<cwd>`, or `.` if the working directory has gone away.
pub fn cwd() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// `p` made absolute against the working directory. Does not touch the
/// filesystem, so `p` need not exist.
pub fn absolute(p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_owned()
    } else {
        cwd().join(p)
    }
}

/// Create directory `dir`, creating parent directories as needed.
/// `dir_type` is used in error messages. Fails if the resulting directory
/// is not writeable.
pub fn ensure_dir(dir: &Path, dir_type: &str, mode: Mode) -> io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Can't create {} `{}': {}", dir_type, dir.display(), e),
            )
        })?;
        fs::set_permissions(dir, fs::Permissions::from_mode(mode.bits()))?;
    }

    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} `{}' is not a directory", dir_type, dir.display()),
        ));
    }

    access(dir, AccessFlags::W_OK).map_err(|e| {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("Can't write to {} `{}': {}", dir_type, dir.display(), e),
        )
    })
}

pub fn is_tty(fd: RawFd) -> bool {
    isatty(fd).unwrap_or(false)
}

/// Move the cursor up over `amount` lines and clear them.
pub fn erase_lines_from_terminal(out: &mut dyn Write, amount: usize) -> io::Result<()> {
    for _ in 0..amount {
        out.write_all(b"\x1b[F\x1b[K")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_state_dir_wins() {
        assert_eq!(
            PathBuf::from("/var/tmp/rw"),
            state_dir(Some(Path::new("/var/tmp/rw")))
        );
        assert!(state_dir(Some(Path::new("rel"))).is_absolute());
    }

    #[test]
    fn ensure_dir_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested, "test dir", Mode::S_IRWXU).unwrap();
        assert!(nested.is_dir());
        // Existing directories are fine.
        ensure_dir(&nested, "test dir", Mode::S_IRWXU).unwrap();
    }

    #[test]
    fn ensure_dir_rejects_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(ensure_dir(&file, "test dir", Mode::S_IRWXU).is_err());
    }

    #[test]
    fn erase_sequence() {
        let mut out = Vec::new();
        erase_lines_from_terminal(&mut out, 2).unwrap();
        assert_eq!(b"\x1b[F\x1b[K\x1b[F\x1b[K".to_vec(), out);
    }
}
