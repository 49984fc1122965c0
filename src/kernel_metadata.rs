use nix::sys::signal::Signal;
use std::convert::TryFrom;

/// Printable name of a signal number, for logs and session reports.
pub fn signal_name(sig: i32) -> String {
    if libc::SIGRTMIN() <= sig && sig <= libc::SIGRTMAX() {
        return format!("SIGRT{}", sig);
    }
    match Signal::try_from(sig) {
        Ok(s) => AsRef::<str>::as_ref(&s).to_owned(),
        Err(_) => format!("signal({})", sig),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!("SIGINT", signal_name(libc::SIGINT));
        assert_eq!("SIGSTOP", signal_name(libc::SIGSTOP));
        assert_eq!(format!("SIGRT{}", libc::SIGRTMIN()), signal_name(libc::SIGRTMIN()));
        assert_eq!("signal(0)", signal_name(0));
        assert_eq!("signal(99)", signal_name(99));
    }
}
