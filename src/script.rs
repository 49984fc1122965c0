//! The interpreter for the Python-flavoured scripts being debugged.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;
