use backtrace::Backtrace;
use nix::{
    errno::{errno, Errno},
    unistd::getpid,
};
use std::{
    collections::HashMap,
    env,
    env::var_os,
    fs::File,
    io::{self, Result, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

#[derive(Clone)]
struct LogModule {
    name: String,
    level: LogLevel,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    log_modules_cache: HashMap<String, LogModule>,
    /// Unbuffered, so a fork never duplicates pending lines.
    log_file: Box<dyn Write + Send>,
    default_level: LogLevel,
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let log_file: Box<dyn Write + Send> = match var_os("REWIND_LOG_FILE") {
            Some(filename) => Box::new(File::create(&filename).unwrap_or_else(|e| panic!("Error. Could not create filename `{:?}' specified in environment variable REWIND_LOG_FILE: {:?}", filename, e))),
            None => Box::new(io::stderr()),
        };

        let (default_level, level_map) = match env::var("REWIND_LOG") {
            Ok(rewind_log) => init_log_levels(&rewind_log),
            Err(_) => (LogError, HashMap::new())
        };

        Mutex::new(LogGlobals {
            level_map,
            log_modules_cache: HashMap::new(),
            log_file,
            default_level,
        })
    };
}

fn log_level_string_to_level(log_level_string: &str) -> LogLevel {
    match log_level_string {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "info" => LogInfo,
        "debug" => LogDebug,
        _ => LogWarn,
    }
}

/// `REWIND_LOG` looks like `all:warn,session:debug,checkpoint:info`.
fn init_log_levels(rewind_log: &str) -> (LogLevel, HashMap<String, LogLevel>) {
    let mut hm: HashMap<String, LogLevel> = HashMap::new();
    let mut default_level = LogDebug;
    for mod_colon_level in rewind_log.split(',') {
        let res: Vec<&str> = mod_colon_level.splitn(2, ':').collect();
        if res.len() == 2 {
            let mod_name = res[0].trim();
            let log_level_string = res[1].trim();
            if mod_name == "all" {
                default_level = log_level_string_to_level(log_level_string);
            } else {
                hm.insert(
                    mod_name.to_owned(),
                    log_level_string_to_level(log_level_string),
                );
            }
        }
    }
    (default_level, hm)
}

/// Given a module name, what is its log level?
fn get_log_level(module_name: &str, l: &MutexGuard<'_, LogGlobals>) -> LogLevel {
    // We DONT lowercase here as filenames are usually case sensitive on Linux.
    match l.level_map.get(module_name) {
        Some(log_level) => *log_level,
        None => l.default_level,
    }
}

/// Given a filename what is the corresponding module name?
fn filename_to_module_name(filename: &str) -> String {
    // Note: DONT lowercase this.
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_owned())
}

/// Given the filename get the corresponding LogModule.
fn get_log_module(filename: &str, l: &mut MutexGuard<'_, LogGlobals>) -> LogModule {
    if let Some(log_module) = l.log_modules_cache.get(filename) {
        log_module.to_owned()
    } else {
        let name = filename_to_module_name(filename);
        let level = get_log_level(&name, l);
        let m = LogModule { level, name };
        l.log_modules_cache.insert(filename.to_owned(), m.clone());
        m
    }
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

pub struct NewLineTerminatingOstream {
    enabled: bool,
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        always_enabled: bool,
    ) -> Option<NewLineTerminatingOstream> {
        let mut lock = match LOG_GLOBALS.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        let m = get_log_module(filename, &mut lock);
        let enabled = always_enabled || level <= m.level;
        if enabled {
            let mut stream = NewLineTerminatingOstream {
                message: Vec::new(),
                enabled,
                lock,
            };
            write_prefix(&mut stream, level, &m.name, filename, line);
            Some(stream)
        } else {
            None
        }
    }
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        if self.enabled {
            self.write(b"\n").unwrap_or(0);
            // Hands self.message to the log file in one write.
            self.flush().unwrap_or(());
        }
    }
}

impl Write for NewLineTerminatingOstream {
    /// Write the text stored in the `message` member to the log file.
    fn flush(&mut self) -> Result<()> {
        if !self.message.is_empty() && self.enabled {
            self.lock.log_file.write_all(&self.message)?;
        }
        self.message.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.enabled {
            self.message.extend_from_slice(buf);
        }

        // Need to pretend these were written even if buffer was not enabled.
        Ok(buf.len())
    }
}

/// Supervisor, debuggee and resurrected images share one sink, so every
/// prefix carries the pid.
fn write_prefix(
    stream: &mut dyn Write,
    level: LogLevel,
    module_name: &str,
    filename: &str,
    line: u32,
) {
    if level == LogDebug {
        write!(stream, "[{} {}] ", module_name, getpid()).unwrap_or(());
        return;
    }
    write!(
        stream,
        "[{} {} {}:{}",
        log_name(level),
        getpid(),
        filename,
        line
    )
    .unwrap_or(());

    let err = errno();
    if level <= LogWarn && err != 0 {
        write!(stream, " errno: {:?}", Errno::from_i32(err)).unwrap_or(());
    }
    write!(stream, "] ").unwrap_or(());
}

/// This is almost always not the method you want. Use log!() macro instead
pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    always_enabled: bool,
) -> Option<NewLineTerminatingOstream> {
    NewLineTerminatingOstream::new(log_level, filename, line, always_enabled)
}

/// Outputs to the log file (or stderr if no log file was specified).
/// After this program continues normally.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use std::io::Write;
            let maybe_stream = crate::log::log(
                $log_level,
                file!(),
                line!(),
                false
            );
            match maybe_stream {
                Some(mut stream) => write!(stream, $($args)+).unwrap_or(()),
                None => ()
            }
        }
    };
}

/// Outputs to the log file (or stderr if no log file was specified).
/// Prints out the backtrace to stderr and aborts.
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use std::io::Write;
                use crate::log::LogFatal;
                let maybe_stream = crate::log::log(
                    LogFatal,
                    file!(),
                    line!(),
                    true
                );
                match maybe_stream {
                   Some(mut stream) => write!(stream, $($args)+).unwrap_or(()),
                   None => ()
                }
            }
            crate::log::notifying_abort(backtrace::Backtrace::new());
            unreachable!();
        }
    };
}

/// Dump the stacktrace and abort.
pub fn notifying_abort(bt: Backtrace) {
    dump_rewind_stack(bt);
    std::process::abort();
}

/// Write the backtrace to stderr.
fn dump_rewind_stack(bt: Backtrace) {
    eprintln!("=== Start rewind backtrace:");
    eprintln!("{:?}", bt);
    eprintln!("=== End rewind backtrace");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_module_levels() {
        let (default_level, levels) = init_log_levels("all:warn, session:debug,checkpoint:info");
        assert_eq!(LogWarn, default_level);
        assert_eq!(Some(&LogDebug), levels.get("session"));
        assert_eq!(Some(&LogInfo), levels.get("checkpoint"));
        assert_eq!(None, levels.get("tracer"));
    }

    #[test]
    fn unknown_level_strings_fall_back_to_warn() {
        let (default_level, levels) = init_log_levels("tracer:chatty");
        assert_eq!(LogDebug, default_level);
        assert_eq!(Some(&LogWarn), levels.get("tracer"));
    }

    fn prefix(level: LogLevel) -> String {
        let mut out = Vec::new();
        write_prefix(&mut out, level, "session", "src/session.rs", 42);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn prefixes_carry_the_pid() {
        assert_eq!(format!("[session {}] ", getpid()), prefix(LogDebug));
        assert_eq!(
            format!("[INFO {} src/session.rs:42] ", getpid()),
            prefix(LogInfo)
        );
        let warn = prefix(LogWarn);
        assert!(
            warn.starts_with(&format!("[WARN {} src/session.rs:42", getpid())),
            "{}",
            warn
        );
        assert!(warn.ends_with("] "));
    }

    #[test]
    fn module_name_is_file_stem() {
        assert_eq!("session", filename_to_module_name("src/session.rs"));
        assert_eq!("interp", filename_to_module_name("src/script/interp.rs"));
    }
}
