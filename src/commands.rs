use exit_result::ExitResult;

pub mod debug_command;
pub mod dump_ast_command;
pub mod exit_result;
pub mod rewind_options;

pub trait RewindCommand {
    fn run(&mut self) -> ExitResult<()>;
}
