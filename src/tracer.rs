//! The trace hook: narrates scope changes for the program's own files and
//! stops at every line for the user.

use crate::{
    log::LogLevel::{LogDebug, LogError},
    scope::{diff_scope, pretty, render, snapshot, ChangeSet, ScopeFilter, ScopeSnapshot},
    script::{
        interp::{format_tb, ActivationId, FrameView, Halt, TraceEvent, TraceHook, Tracing},
        value::TracebackEntry,
    },
    source_index::{find_imports, SourceError, SourceIndex, SourceLine},
    step_io::{Step, StepIo},
};
use serde::Serialize;
use std::{
    collections::{BTreeSet, HashMap},
    fmt::Display,
    path::{Path, PathBuf},
};

/// Last observed (globals, locals) of one activation.
type Snapshots = (ScopeSnapshot, ScopeSnapshot);

#[derive(Serialize)]
struct ChangePayload<'a> {
    filename: &'a str,
    activation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'a str>,
    #[serde(skip_serializing_if = "ChangeSet::is_empty")]
    globals: ChangeSet,
    #[serde(skip_serializing_if = "ChangeSet::is_empty")]
    locals: ChangeSet,
}

#[derive(Serialize)]
struct PausePayload<'a> {
    filename: &'a str,
    activation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'a str>,
    lineno: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    segment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<u64>,
}

pub fn marker(event: &str) -> String {
    format!("{:-^50}", format!(" {} ", event))
}

pub struct Tracer<S: StepIo> {
    io: S,
    files: BTreeSet<PathBuf>,
    sources: HashMap<PathBuf, SourceIndex>,
    activations: HashMap<PathBuf, HashMap<ActivationId, Snapshots>>,
    filter: ScopeFilter,
}

/// Log a tracer failure and stop the debuggee with status 1.
fn tracer_failure<E: Display>(what: &str, e: E) -> Halt {
    log!(LogError, "{}: {}", what, e);
    Halt::new(1, format!("{}: {}", what, e))
}

impl<S: StepIo> Tracer<S> {
    /// Trace `entry` and every local module it imports.
    pub fn load(entry: &Path, io: S, filter: ScopeFilter) -> Result<Tracer<S>, SourceError> {
        let files = find_imports(entry)?;
        let mut sources = HashMap::new();
        for file in &files {
            sources.insert(file.clone(), SourceIndex::load(file)?);
        }
        log!(LogDebug, "tracing {:?}", files);
        Ok(Tracer::new(files, sources, io, filter))
    }

    pub fn new(
        files: BTreeSet<PathBuf>,
        sources: HashMap<PathBuf, SourceIndex>,
        io: S,
        filter: ScopeFilter,
    ) -> Tracer<S> {
        Tracer {
            io,
            files,
            sources,
            activations: HashMap::new(),
            filter,
        }
    }

    #[cfg(test)]
    pub fn io(&self) -> &S {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut S {
        &mut self.io
    }

    fn print(&mut self, text: &str) -> Result<(), Halt> {
        self.io
            .print_step(text)
            .map_err(|e| tracer_failure("Narration failed", e))
    }

    fn narrate_changes(
        &mut self,
        frame: &FrameView<'_>,
        filename: &str,
        function: Option<&str>,
        current: &Snapshots,
    ) -> Result<(), Halt> {
        let (globals, locals) = match self
            .activations
            .get(frame.file)
            .and_then(|table| table.get(&frame.activation))
        {
            Some((old_globals, old_locals)) => {
                let locals = if frame.locals.is_some() {
                    diff_scope(old_locals, &current.1)
                } else {
                    ChangeSet::new()
                };
                (diff_scope(old_globals, &current.0), locals)
            }
            None => (ChangeSet::new(), ChangeSet::new()),
        };
        if globals.is_empty() && locals.is_empty() {
            return Ok(());
        }
        let payload = ChangePayload {
            filename,
            activation: frame.activation.0,
            function,
            globals,
            locals,
        };
        self.print(&pretty(&payload))
    }

    fn pause(
        &mut self,
        frame: &FrameView<'_>,
        filename: &str,
        function: Option<&str>,
    ) -> Result<(), Halt> {
        let checkpoint = self
            .io
            .checkpoint()
            .map_err(|e| tracer_failure("Checkpoint failed", e))?;

        let source = self
            .sources
            .get(frame.file)
            .and_then(|index| index.get(frame.line));
        let (segment, line) = match source {
            Some(SourceLine::Segment(s)) => (Some(s.as_str()), None),
            Some(SourceLine::Line(l)) => (None, Some(l.as_str())),
            None => (None, Some("")),
        };
        let text = pretty(&PausePayload {
            filename,
            activation: frame.activation.0,
            function,
            lineno: frame.line,
            segment,
            line,
            checkpoint,
        });

        match self.io.input_step(&text) {
            Ok(Step::Continue) => Ok(()),
            Ok(Step::HandOff) => Err(Halt::new(0, "handed off to another checkpoint")),
            Ok(Step::Interrupt) => Err(Halt::new(1, "interrupted")),
            Err(e) => Err(tracer_failure("Reading a command failed", e)),
        }
    }

    fn format_exception_tb(&self, exc_tb: &[TracebackEntry]) -> String {
        format_tb(exc_tb, |file, line| {
            self.sources
                .get(file)
                .and_then(|index| index.raw_line(line))
                .map(|l| l.to_owned())
        })
    }
}

impl<S: StepIo> TraceHook for Tracer<S> {
    fn on_event(
        &mut self,
        frame: &FrameView<'_>,
        event: TraceEvent<'_>,
    ) -> Result<Tracing, Halt> {
        if !self.files.contains(frame.file) {
            return Ok(Tracing::Stop);
        }

        let filename = frame
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let code_name = frame.code_name.to_owned();
        let is_module = frame.locals.is_none();
        let target = if is_module {
            filename.clone()
        } else {
            code_name.clone()
        };
        let function = if is_module || code_name.starts_with('<') {
            None
        } else {
            Some(code_name.as_str())
        };

        let current: Snapshots = (
            self.filter.apply(snapshot(frame.globals)),
            match frame.locals {
                Some(locals) => self.filter.apply(snapshot(locals)),
                None => ScopeSnapshot::new(),
            },
        );

        if let TraceEvent::Line | TraceEvent::Return(_) = event {
            self.narrate_changes(frame, &filename, function, &current)?;
        }

        self.print(&marker(event.name()))?;

        match event {
            TraceEvent::Line => {
                let result = self.pause(frame, &filename, function);
                self.activations
                    .entry(frame.file.to_owned())
                    .or_default()
                    .insert(frame.activation, current);
                result?;
                Ok(Tracing::Keep)
            }
            TraceEvent::Call => {
                self.print(&format!("calling {}", target))?;
                if !current.1.is_empty() {
                    self.print(&pretty(&render(&current.1)))?;
                }
                self.activations
                    .entry(frame.file.to_owned())
                    .or_default()
                    .entry(frame.activation)
                    .or_insert(current);
                Ok(Tracing::Keep)
            }
            TraceEvent::Return(value) => {
                self.print(&format!("{} returned {}", target, value.to_str()))?;
                if let Some(table) = self.activations.get_mut(frame.file) {
                    table.remove(&frame.activation);
                }
                Ok(Tracing::Keep)
            }
            TraceEvent::Exception(exc) => {
                let tb = self.format_exception_tb(&exc.traceback.borrow());
                self.print(&tb)?;
                self.print(&format!("{}: {}", exc.kind.name(), exc.message()))?;
                Ok(Tracing::Keep)
            }
        }
    }
}
