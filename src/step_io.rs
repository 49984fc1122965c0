//! Where narration goes, and how pause points are resolved: straight to the
//! terminal with a prompt (interactive) or into a transcript file (batch).

use crate::{
    checkpoint::{CheckpointError, CheckpointId, CheckpointStore},
    command_channel::{await_command, Command, Keystroke},
    handoff::HandoffSlot,
    log::LogLevel::{LogDebug, LogInfo},
};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// How the debuggee proceeds after a pause point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    Continue,
    /// A checkpoint id is in the handoff slot; exit so the supervisor can
    /// resurrect it.
    HandOff,
    Interrupt,
}

pub trait StepIo {
    fn print_step(&mut self, text: &str) -> io::Result<()>;

    /// Take a checkpoint for the pause point about to be shown, if this
    /// sink takes checkpoints at all.
    fn checkpoint(&mut self) -> Result<Option<CheckpointId>, CheckpointError>;

    /// Show a pause point and decide how to go on.
    fn input_step(&mut self, text: &str) -> io::Result<Step>;

    /// Called once on the way out, whatever the exit path.
    fn finalize(&mut self) -> io::Result<()>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Destination {
    /// Carry on from the pause point being shown.
    Here,
    Checkpoint(CheckpointId),
    /// Refused; prompt again.
    Nowhere(&'static str),
}

/// Where `command` leads from the pause point holding checkpoint `current`.
fn destination(current: Option<CheckpointId>, command: Command) -> Destination {
    match command {
        Command::Continue => Destination::Here,
        Command::Jump(n) => Destination::Checkpoint(n),
        Command::Rewind => match current {
            Some(id) if id > 0 => Destination::Checkpoint(id - 1),
            _ => Destination::Nowhere("cannot rewind past the start"),
        },
    }
}

pub struct InteractiveIo {
    store: CheckpointStore,
    slot: HandoffSlot,
    /// Checkpoint taken for the pause point being shown.
    current: Option<CheckpointId>,
}

impl InteractiveIo {
    pub fn new(store: CheckpointStore, slot: HandoffSlot) -> InteractiveIo {
        InteractiveIo {
            store,
            slot,
            current: None,
        }
    }
}

impl StepIo for InteractiveIo {
    fn print_step(&mut self, text: &str) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", text)?;
        out.flush()
    }

    fn checkpoint(&mut self) -> Result<Option<CheckpointId>, CheckpointError> {
        let id = self.store.create()?;
        self.current = Some(id);
        Ok(Some(id))
    }

    fn input_step(&mut self, text: &str) -> io::Result<Step> {
        let mut prompt = text;
        loop {
            let command = match await_command(prompt)? {
                Keystroke::Interrupt => return Ok(Step::Interrupt),
                Keystroke::Command(c) => c,
            };
            log!(LogDebug, "at checkpoint {:?}: {}", self.current, command);
            match destination(self.current, command) {
                Destination::Here => return Ok(Step::Continue),
                Destination::Checkpoint(target) => {
                    self.slot.write(target)?;
                    return Ok(Step::HandOff);
                }
                Destination::Nowhere(why) => {
                    self.print_step(why)?;
                    prompt = "";
                }
            }
        }
    }

    fn finalize(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// Accumulates the whole transcript in memory and writes it out once, on
/// `finalize`. Dropping a `BatchIo` writes nothing.
pub struct BatchIo {
    buffer: String,
    output_file: PathBuf,
    finalized: bool,
}

impl BatchIo {
    pub fn new(output_file: &Path) -> BatchIo {
        BatchIo {
            buffer: String::new(),
            output_file: output_file.to_owned(),
            finalized: false,
        }
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &str {
        &self.buffer
    }
}

impl StepIo for BatchIo {
    fn print_step(&mut self, text: &str) -> io::Result<()> {
        self.buffer.push_str(text);
        self.buffer.push('\n');
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<Option<CheckpointId>, CheckpointError> {
        Ok(None)
    }

    fn input_step(&mut self, text: &str) -> io::Result<Step> {
        self.print_step(text)?;
        Ok(Step::Continue)
    }

    fn finalize(&mut self) -> io::Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        log!(
            LogInfo,
            "writing {} bytes of transcript to {}",
            self.buffer.len(),
            self.output_file.display()
        );
        fs::write(&self.output_file, self.buffer.as_bytes())
    }
}
