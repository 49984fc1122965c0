use std::{error::Error, path::PathBuf};
use structopt::{clap, clap::AppSettings, StructOpt};

const DEFAULT_MAX_CHECKPOINTS: &str = "512";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "rewind",
    about = "Step forwards and backwards through a script",
    after_help = "Use REWIND_LOG to control logging; e.g. REWIND_LOG=all:warn,session:debug\n\
    REWIND_STATE_DIR sets the default checkpoint state directory."
)]
#[structopt(global_settings = &[AppSettings::UnifiedHelpMessage])]
pub struct RewindOptions {
    /// Step through the program interactively without asking first.
    #[structopt(short = "i", long, conflicts_with = "batch")]
    pub interactive: bool,

    /// Write the whole narration to `<script stem>.trace.txt` without asking
    /// first.
    #[structopt(short = "b", long)]
    pub batch: bool,

    /// Clear checkpoint state left over from earlier sessions without asking
    /// first.
    #[structopt(short = "w", long, conflicts_with = "keep")]
    pub wipe: bool,

    /// Keep checkpoint state left over from earlier sessions without asking
    /// first.
    #[structopt(short = "k", long)]
    pub keep: bool,

    #[structopt(
        long,
        help = "Leave `__dunder__` names out of scope changes."
    )]
    pub hide_dunders: bool,

    /// Only the newest <max-checkpoints> checkpoints stay restorable. 0 keeps
    /// every checkpoint.
    #[structopt(
        long,
        default_value = DEFAULT_MAX_CHECKPOINTS,
        parse(try_from_str = parse_max_checkpoints)
    )]
    pub max_checkpoints: u64,

    /// Where checkpoint registries live. Defaults to $REWIND_STATE_DIR, else
    /// `.rewind` in the current directory.
    #[structopt(long, parse(from_os_str))]
    pub state_dir: Option<PathBuf>,

    /// The file a debuggee uses to tell the supervisor which checkpoint to
    /// resurrect. Defaults to `rewind.handoff` in the current directory.
    #[structopt(long, parse(from_os_str))]
    pub handoff_file: Option<PathBuf>,

    #[structopt(
        long,
        help = "Write the parsed syntax tree of <script> to `<script stem>.ast.txt` and exit."
    )]
    pub dump_ast: bool,

    /// The program to debug.
    #[structopt(parse(from_os_str))]
    pub script: PathBuf,
}

fn parse_max_checkpoints(s: &str) -> Result<u64, Box<dyn Error>> {
    if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() {
        Ok(s.parse::<u64>()?)
    } else {
        Err(Box::new(clap::Error::with_description(
            "Only an unsigned integer is valid here",
            clap::ErrorKind::InvalidValue,
        )))
    }
}
