use crate::{
    commands::rewind_options::RewindOptions,
    scope::ScopeFilter,
    util::{absolute, cwd, state_dir},
};
use std::path::PathBuf;

/// Narrate to the terminal and stop at every line, or write a transcript.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Mode {
    Interactive,
    Batch,
}

/// Settings for one run. Anything left as `None` is asked for at startup.
#[derive(Clone, Debug)]
pub struct Flags {
    pub script: PathBuf,
    pub mode: Option<Mode>,
    /// Clear leftover checkpoint state before starting.
    pub wipe: Option<bool>,
    pub scope_filter: ScopeFilter,
    /// Retention window for checkpoints; 0 keeps everything.
    pub max_checkpoints: u64,
    pub state_dir: PathBuf,
    pub handoff_file: PathBuf,
    pub dump_ast: bool,
}

impl Flags {
    pub fn from_options(options: &RewindOptions) -> Flags {
        let mode = if options.interactive {
            Some(Mode::Interactive)
        } else if options.batch {
            Some(Mode::Batch)
        } else {
            None
        };
        let wipe = if options.wipe {
            Some(true)
        } else if options.keep {
            Some(false)
        } else {
            None
        };

        Flags {
            script: absolute(&options.script),
            mode,
            wipe,
            scope_filter: if options.hide_dunders {
                ScopeFilter::HideDunders
            } else {
                ScopeFilter::KeepAll
            },
            max_checkpoints: options.max_checkpoints,
            state_dir: state_dir(options.state_dir.as_deref()),
            handoff_file: match &options.handoff_file {
                Some(f) => absolute(f),
                None => cwd().join("rewind.handoff"),
            },
            dump_ast: options.dump_ast,
        }
    }

    /// `<cwd>/<script stem><suffix>`
    pub fn output_file(&self, suffix: &str) -> PathBuf {
        let stem = self
            .script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        cwd().join(format!("{}{}", stem, suffix))
    }
}
