use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
};

/// A lexing or parsing failure. Reported before anything runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub file: PathBuf,
    pub line: u32,
    pub message: String,
}

impl ParseError {
    pub fn new<S: Into<String>>(file: &Path, line: u32, message: S) -> ParseError {
        ParseError {
            file: file.to_owned(),
            line,
            message: message.into(),
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  File \"{}\", line {}\nSyntaxError: {}",
            self.file.display(),
            self.line,
            self.message
        )
    }
}

impl Error for ParseError {}
