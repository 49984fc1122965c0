use crate::{
    commands::{exit_result::ExitResult, RewindCommand},
    flags::Flags,
    log::LogLevel::LogInfo,
    script::parser::parse_module,
};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Writes the parsed syntax tree of the script next to the working directory
/// as `<stem>.ast.txt`.
pub struct DumpAstCommand {
    script: PathBuf,
    output_file: PathBuf,
}

impl DumpAstCommand {
    pub fn new(flags: &Flags) -> DumpAstCommand {
        DumpAstCommand {
            script: flags.script.clone(),
            output_file: flags.output_file(".ast.txt"),
        }
    }

    fn dump(&self, source: &str, f: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
        let module = parse_module(source, &self.script)?;
        writeln!(f, "{:#?}", module)?;
        Ok(())
    }
}

fn script_name(script: &Path) -> String {
    script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| script.display().to_string())
}

impl RewindCommand for DumpAstCommand {
    fn run(&mut self) -> ExitResult<()> {
        if !self.script.is_file() {
            println!(
                "Error: File \"{}\" does not exist or is a directory.",
                self.script.display()
            );
            return ExitResult::Status(1);
        }
        let source = match fs::read_to_string(&self.script) {
            Ok(s) => s,
            Err(e) => return ExitResult::err_from(e, 1),
        };

        let mut out = Vec::new();
        if let Err(e) = self.dump(&source, &mut out) {
            eprintln!("Could not parse {}:\n{}", script_name(&self.script), e);
            return ExitResult::Status(1);
        }
        let written = fs::File::create(&self.output_file).and_then(|mut f| {
            f.write_all(&out)?;
            f.flush()
        });
        match written {
            Ok(()) => {
                log!(
                    LogInfo,
                    "wrote the syntax tree of {} to {}",
                    self.script.display(),
                    self.output_file.display()
                );
                ExitResult::Ok(())
            }
            Err(e) => ExitResult::err_from(
                io::Error::new(
                    e.kind(),
                    format!("Can't write `{}': {}", self.output_file.display(), e),
                ),
                1,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_shows_the_tree() {
        let cmd = DumpAstCommand {
            script: PathBuf::from("/tmp/prog.py"),
            output_file: PathBuf::from("/tmp/prog.ast.txt"),
        };
        let mut out = Vec::new();
        cmd.dump("x = 1\n", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Module {"));
        assert!(text.contains("prog.py"));
    }

    #[test]
    fn dump_reports_syntax_errors() {
        let cmd = DumpAstCommand {
            script: PathBuf::from("/tmp/bad.py"),
            output_file: PathBuf::from("/tmp/bad.ast.txt"),
        };
        let mut out = Vec::new();
        assert!(cmd.dump("def (:\n", &mut out).is_err());
        assert_eq!("bad.py", script_name(&cmd.script));
    }
}
