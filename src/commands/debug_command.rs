use crate::{
    checkpoint::{clear_all, CheckpointStore, Registry},
    commands::{exit_result::ExitResult, RewindCommand},
    flags::{Flags, Mode},
    handoff::HandoffSlot,
    log::LogLevel::{LogDebug, LogError, LogInfo},
    script::{
        ast::Module,
        interp::{Interpreter, Unwind},
        parser::parse_module,
        value::ExceptionKind,
    },
    session::Supervisor,
    step_io::{BatchIo, InteractiveIo, StepIo},
    tracer::Tracer,
    util::{erase_lines_from_terminal, is_tty},
};
use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::{
    errno::Errno,
    unistd::{getpid, read},
};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

pub struct DebugCommand {
    flags: Flags,
}

impl DebugCommand {
    pub fn new(flags: &Flags) -> DebugCommand {
        DebugCommand {
            flags: flags.clone(),
        }
    }

    fn search_dir(&self) -> PathBuf {
        self.flags
            .script
            .parent()
            .map(Path::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ask for whatever the command line left open, then erase the questions.
    fn resolve_choices(&self) -> io::Result<(Mode, bool)> {
        let mut asked = 0;
        let mode = match self.flags.mode {
            Some(mode) => mode,
            None => {
                asked += 1;
                if ask("Step through? ")?.is_empty() {
                    Mode::Batch
                } else {
                    Mode::Interactive
                }
            }
        };
        let wipe = match self.flags.wipe {
            Some(wipe) => wipe,
            None => {
                asked += 1;
                !ask("Wipe checkpoint state? ")?.is_empty()
            }
        };
        if asked > 0 && is_tty(STDOUT_FILENO) {
            erase_lines_from_terminal(&mut io::stdout(), asked)?;
        }
        Ok((mode, wipe))
    }

    fn supervise<S: StepIo>(&self, module: Module, io: S) -> ExitResult<()> {
        let mut tracer = match Tracer::load(&self.flags.script, io, self.flags.scope_filter) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("{}", e);
                return ExitResult::Status(1);
            }
        };
        let registry = Registry::for_session(&self.flags.state_dir, getpid().as_raw());
        let slot = HandoffSlot::new(&self.flags.handoff_file);
        log!(
            LogInfo,
            "checkpoints in {}, handoff through {}",
            registry.dir().display(),
            slot.path().display()
        );

        let search_dir = self.search_dir();
        let mut supervisor = Supervisor::new(registry, slot);
        match supervisor.run(move || run_debuggee(module, &search_dir, &mut tracer)) {
            Ok(0) => ExitResult::Ok(()),
            Ok(code) => ExitResult::Status(code),
            Err(e) => ExitResult::err_from(e, 1),
        }
    }
}

impl RewindCommand for DebugCommand {
    fn run(&mut self) -> ExitResult<()> {
        let script = &self.flags.script;
        if !script.is_file() {
            println!(
                "Error: File \"{}\" does not exist or is a directory.",
                script.display()
            );
            return ExitResult::Status(1);
        }
        let source = match fs::read_to_string(script) {
            Ok(s) => s,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        let module = match parse_module(&source, script) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("{}", e);
                return ExitResult::Status(1);
            }
        };

        let (mode, wipe) = match self.resolve_choices() {
            Ok(choices) => choices,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        log!(LogDebug, "mode {:?}, wipe {}", mode, wipe);
        if wipe {
            if let Err(e) = clear_all(&self.flags.state_dir) {
                return ExitResult::err_from(e, 1);
            }
        }

        match mode {
            Mode::Interactive => {
                // The store records into this session's registry, which is
                // keyed by our pid: the supervisor's.
                let registry = Registry::for_session(&self.flags.state_dir, getpid().as_raw());
                let store = CheckpointStore::new(registry, self.flags.max_checkpoints);
                let slot = HandoffSlot::new(&self.flags.handoff_file);
                self.supervise(module, InteractiveIo::new(store, slot))
            }
            Mode::Batch => {
                let transcript = self.flags.output_file(".trace.txt");
                self.supervise(module, BatchIo::new(&transcript))
            }
        }
    }
}

/// Runs in the debuggee. Returns its exit status.
fn run_debuggee<S: StepIo>(module: Module, search_dir: &Path, tracer: &mut Tracer<S>) -> i32 {
    let status = {
        let mut interp = Interpreter::new(search_dir);
        let mut guard = interp.use_trace(tracer);
        match guard.run_main(module) {
            Ok(()) => 0,
            Err(Unwind::Halt(h)) => {
                log!(LogDebug, "halted with {}: {}", h.status, h.reason);
                h.status
            }
            Err(Unwind::Raise(exc)) if exc.kind == ExceptionKind::KeyboardInterrupt => {
                println!();
                1
            }
            Err(Unwind::Raise(exc)) => {
                eprintln!("{}", guard.format_traceback(&exc));
                1
            }
        }
    };
    if let Err(e) = tracer.io_mut().finalize() {
        log!(LogError, "Could not write the transcript: {}", e);
        return 1;
    }
    status
}

/// Print `question` and read one line from the terminal. Reads stdin one byte
/// at a time so nothing past the newline is taken from later readers.
fn ask(question: &str) -> io::Result<String> {
    let mut out = io::stdout();
    write!(out, "{}", question)?;
    out.flush()?;

    let mut answer = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match read(STDIN_FILENO, &mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => answer.push(byte[0]),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(String::from_utf8_lossy(&answer).trim().to_owned())
}
