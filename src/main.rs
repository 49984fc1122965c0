#[macro_use]
extern crate lazy_static;

#[macro_use]
mod log;
mod checkpoint;
mod command_channel;
mod commands;
mod flags;
mod handoff;
mod kernel_metadata;
mod scope;
mod script;
mod session;
mod source_index;
mod step_io;
mod tracer;
mod util;
mod wait_status;

use crate::{
    commands::{
        debug_command::DebugCommand,
        dump_ast_command::DumpAstCommand,
        exit_result::ExitResult,
        rewind_options::RewindOptions,
        RewindCommand,
    },
    flags::Flags,
};
use structopt::StructOpt;

fn main() -> ExitResult<()> {
    let options = RewindOptions::from_args();
    let flags = Flags::from_options(&options);

    if flags.dump_ast {
        DumpAstCommand::new(&flags).run()
    } else {
        DebugCommand::new(&flags).run()
    }
}
