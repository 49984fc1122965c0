use crate::script::error::ParseError;
use std::path::Path;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Keyword {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Break,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
}

impl Keyword {
    fn from_name(name: &str) -> Option<Keyword> {
        let kw = match name {
            "False" => Keyword::False,
            "None" => Keyword::None,
            "True" => Keyword::True,
            "and" => Keyword::And,
            "as" => Keyword::As,
            "assert" => Keyword::Assert,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "def" => Keyword::Def,
            "del" => Keyword::Del,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "except" => Keyword::Except,
            "finally" => Keyword::Finally,
            "for" => Keyword::For,
            "from" => Keyword::From,
            "global" => Keyword::Global,
            "if" => Keyword::If,
            "import" => Keyword::Import,
            "in" => Keyword::In,
            "is" => Keyword::Is,
            "not" => Keyword::Not,
            "or" => Keyword::Or,
            "pass" => Keyword::Pass,
            "raise" => Keyword::Raise,
            "return" => Keyword::Return,
            "try" => Keyword::Try,
            "while" => Keyword::While,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Name(String),
    Keyword(Keyword),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    EndOfFile,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    /// Byte offsets into the source.
    pub start: usize,
    pub end: usize,
}

/// Longest operators first so that prefix matching picks `**=` over `**`.
const OPERATORS: [&str; 33] = [
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@",
];

const TAB_STOP: usize = 8;

/// Blocks nest at most this deep.
const MAX_INDENT_LEVELS: usize = 100;

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    file: &'a Path,
    pos: usize,
    line: u32,
    indents: Vec<usize>,
    /// Bracket nesting. Newlines and indentation are insignificant while > 0.
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

pub fn tokenize(src: &str, file: &Path) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        src,
        bytes: src.as_bytes(),
        file,
        pos: 0,
        line: 1,
        indents: vec![0],
        depth: 0,
        at_line_start: true,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

impl<'a> Lexer<'a> {
    fn error<S: Into<String>>(&self, message: S) -> ParseError {
        ParseError::new(self.file, self.line, message)
    }

    fn push(&mut self, tok: Tok, start: usize, end: usize) {
        self.tokens.push(Token {
            tok,
            line: self.line,
            start,
            end,
        });
    }

    fn push_newline(&mut self) {
        match self.tokens.last() {
            None => (),
            Some(t) if t.tok == Tok::Newline => (),
            Some(_) => self.push(Tok::Newline, self.pos, self.pos),
        }
    }

    fn run(&mut self) -> Result<(), ParseError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.indentation()? {
                    continue;
                }
            }
            if self.pos >= self.bytes.len() {
                break;
            }
            let c = self.bytes[self.pos];
            match c {
                b' ' | b'\t' | b'\x0c' | b'\r' => self.pos += 1,
                b'\n' => {
                    if self.depth == 0 {
                        self.push_newline();
                        self.at_line_start = true;
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                b'#' => self.skip_comment(),
                b'\\' => {
                    let rest = &self.bytes[self.pos + 1..];
                    if rest.starts_with(b"\n") {
                        self.pos += 2;
                    } else if rest.starts_with(b"\r\n") {
                        self.pos += 3;
                    } else {
                        return Err(
                            self.error("unexpected character after line continuation character")
                        );
                    }
                    self.line += 1;
                }
                b'\'' | b'"' => self.string(c)?,
                b'0'..=b'9' => self.number()?,
                b'.' if self
                    .bytes
                    .get(self.pos + 1)
                    .map_or(false, |d| d.is_ascii_digit()) =>
                {
                    self.number()?
                }
                c if is_ident_start(c) => self.name(),
                _ => self.operator()?,
            }
        }

        if self.depth > 0 {
            return Err(self.error("unexpected EOF while parsing"));
        }
        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, self.pos, self.pos);
        }
        self.push(Tok::EndOfFile, self.pos, self.pos);
        Ok(())
    }

    /// Measure the indentation of a fresh logical line. Returns false if the
    /// line turned out to be blank (or a comment) and was consumed.
    fn indentation(&mut self) -> Result<bool, ParseError> {
        let mut col = 0;
        let mut p = self.pos;
        while p < self.bytes.len() {
            match self.bytes[p] {
                b' ' => col += 1,
                b'\t' => col = (col / TAB_STOP + 1) * TAB_STOP,
                b'\x0c' => col = 0,
                _ => break,
            }
            p += 1;
        }
        self.pos = p;
        if p >= self.bytes.len() {
            self.at_line_start = false;
            return Ok(true);
        }
        match self.bytes[p] {
            b'\n' => {
                self.pos += 1;
                self.line += 1;
                return Ok(false);
            }
            b'\r' => {
                self.pos += 1;
                return Ok(false);
            }
            b'#' => {
                self.skip_comment();
                return Ok(false);
            }
            _ => (),
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        if col > current {
            if self.indents.len() > MAX_INDENT_LEVELS {
                return Err(self.error("too many levels of indentation"));
            }
            self.indents.push(col);
            self.push(Tok::Indent, p, p);
        } else {
            while col < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(Tok::Dedent, p, p);
            }
            if col != self.indents.last().copied().unwrap_or(0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
            self.pos += 1;
        }
    }

    fn name(&mut self) {
        let start = self.pos;
        while self.pos < self.bytes.len() && is_ident_continue(self.bytes[self.pos]) {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        let tok = match Keyword::from_name(text) {
            Some(kw) => Tok::Keyword(kw),
            None => Tok::Name(text.to_owned()),
        };
        self.push(tok, start, self.pos);
    }

    fn operator(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let rest = &self.bytes[start..];
        let op = match OPERATORS.iter().find(|op| rest.starts_with(op.as_bytes())) {
            Some(op) => *op,
            None => {
                let ch = self.src[start..].chars().next().unwrap_or('?');
                return Err(self.error(format!("invalid character '{}'", ch)));
            }
        };
        match op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => {
                if self.depth == 0 {
                    return Err(self.error(format!("unmatched '{}'", op)));
                }
                self.depth -= 1;
            }
            _ => (),
        }
        self.pos += op.len();
        self.push(Tok::Op(op), start, self.pos);
        Ok(())
    }

    fn number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let rest = &self.bytes[start..];
        let radix = if rest.len() > 1 && rest[0] == b'0' {
            match rest[1] {
                b'x' | b'X' => 16,
                b'o' | b'O' => 8,
                b'b' | b'B' => 2,
                _ => 10,
            }
        } else {
            10
        };

        if radix != 10 {
            self.pos += 2;
            while self.pos < self.bytes.len()
                && (self.bytes[self.pos].is_ascii_hexdigit() || self.bytes[self.pos] == b'_')
            {
                self.pos += 1;
            }
            let digits: String = self.src[start + 2..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.error("invalid or too large integer literal"))?;
            self.push(Tok::Int(value), start, self.pos);
            return Ok(());
        }

        let mut is_float = false;
        self.digits();
        if self.peek_is(b'.') {
            is_float = true;
            self.pos += 1;
            self.digits();
        }
        if self.peek_is(b'e') || self.peek_is(b'E') {
            let mut p = self.pos + 1;
            if matches!(self.bytes.get(p), Some(b'+') | Some(b'-')) {
                p += 1;
            }
            if self.bytes.get(p).map_or(false, |d| d.is_ascii_digit()) {
                is_float = true;
                self.pos = p;
                self.digits();
            }
        }
        if self.pos < self.bytes.len() && is_ident_start(self.bytes[self.pos]) {
            return Err(self.error("invalid decimal literal"));
        }

        let text: String = self.src[start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        let tok = if is_float {
            Tok::Float(
                text.parse::<f64>()
                    .map_err(|_| self.error("invalid float literal"))?,
            )
        } else {
            Tok::Int(
                text.parse::<i64>()
                    .map_err(|_| self.error("integer literal is too large"))?,
            )
        };
        self.push(tok, start, self.pos);
        Ok(())
    }

    fn digits(&mut self) {
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_digit() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
    }

    fn peek_is(&self, c: u8) -> bool {
        self.bytes.get(self.pos) == Some(&c)
    }

    fn string(&mut self, quote: u8) -> Result<(), ParseError> {
        let start = self.pos;
        let start_line = self.line;
        let delimiter = [quote; 3];
        let triple = self.bytes[start..].starts_with(&delimiter);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            if self.pos >= self.bytes.len() {
                return Err(ParseError::new(
                    self.file,
                    start_line,
                    "unterminated string literal",
                ));
            }
            let c = self.bytes[self.pos];
            if triple && self.bytes[self.pos..].starts_with(&delimiter) {
                self.pos += 3;
                break;
            }
            if !triple && c == quote {
                self.pos += 1;
                break;
            }
            match c {
                b'\n' => {
                    if !triple {
                        return Err(ParseError::new(
                            self.file,
                            start_line,
                            "unterminated string literal",
                        ));
                    }
                    out.push('\n');
                    self.pos += 1;
                    self.line += 1;
                }
                b'\\' => {
                    self.pos += 1;
                    match self.bytes.get(self.pos) {
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'r') => out.push('\r'),
                        Some(b'0') => out.push('\0'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'\'') => out.push('\''),
                        Some(b'"') => out.push('"'),
                        Some(b'\n') => self.line += 1,
                        _ => {
                            // Unknown escapes keep their backslash; the
                            // escaped character is handled by the next round.
                            out.push('\\');
                            continue;
                        }
                    }
                    self.pos += 1;
                }
                _ => match self.src[self.pos..].chars().next() {
                    Some(ch) => {
                        out.push(ch);
                        self.pos += ch.len_utf8();
                    }
                    None => self.pos += 1,
                },
            }
        }
        // Tokens are stamped with the line they start on.
        let end_line = self.line;
        self.line = start_line;
        self.push(Tok::Str(out), start, self.pos);
        self.line = end_line;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src, Path::new("t.py"))
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let t = toks("if x:\n    y = 1\nz\n");
        assert_eq!(
            t,
            vec![
                Tok::Keyword(Keyword::If),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Newline,
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let t = toks("a\n\n   # note\n\nb # trailing\n");
        assert_eq!(
            t,
            vec![
                Tok::Name("a".into()),
                Tok::Newline,
                Tok::Name("b".into()),
                Tok::Newline,
                Tok::EndOfFile
            ]
        );
    }

    #[test]
    fn brackets_join_lines() {
        let t = toks("x = [1,\n     2]\n");
        assert!(!t[..t.len() - 2].contains(&Tok::Newline));
    }

    #[test]
    fn backslash_continues_a_line() {
        let tokens = tokenize("x = 1 + \\\n    2\ny\n", Path::new("t.py")).unwrap();
        let y = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("y".into()))
            .unwrap();
        assert_eq!(3, y.line);
        assert!(!tokens.iter().any(|t| t.tok == Tok::Indent));
    }

    #[test]
    fn string_literals_and_escapes() {
        let t = toks("'a\\n' \"b'c\" '''x\ny''' '\\d'\n");
        assert_eq!(Tok::Str("a\n".into()), t[0]);
        assert_eq!(Tok::Str("b'c".into()), t[1]);
        assert_eq!(Tok::Str("x\ny".into()), t[2]);
        assert_eq!(Tok::Str("\\d".into()), t[3]);
    }

    #[test]
    fn numbers() {
        let t = toks("10 1_000 0x1f 2.5 .5 1e3 7\n");
        assert_eq!(
            &t[..7],
            &[
                Tok::Int(10),
                Tok::Int(1000),
                Tok::Int(31),
                Tok::Float(2.5),
                Tok::Float(0.5),
                Tok::Float(1000.0),
                Tok::Int(7)
            ]
        );
    }

    #[test]
    fn tabs_advance_to_multiple_of_eight() {
        // A tab and eight spaces are the same indentation level.
        let t = toks("if x:\n\ty\n        z\n");
        assert_eq!(1, t.iter().filter(|t| **t == Tok::Indent).count());
    }

    #[test]
    fn indentation_depth_is_bounded() {
        let nest = |levels: usize| {
            let mut src = String::new();
            for level in 0..levels {
                src.push_str(&" ".repeat(level));
                src.push_str("if x:\n");
            }
            src.push_str(&" ".repeat(levels));
            src.push_str("pass\n");
            src
        };
        assert!(tokenize(&nest(99), Path::new("t.py")).is_ok());
        let err = tokenize(&nest(150), Path::new("t.py")).unwrap_err();
        assert_eq!("too many levels of indentation", err.message);
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n    y\n  z\n", Path::new("t.py")).unwrap_err();
        assert_eq!(3, err.line);
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn unterminated_string_reports_start_line() {
        let err = tokenize("x = 1\ny = 'abc\n", Path::new("t.py")).unwrap_err();
        assert_eq!(2, err.line);
    }

    #[test]
    fn token_spans_cover_source() {
        let src = "value = 'hi'\n";
        let tokens = tokenize(src, Path::new("t.py")).unwrap();
        assert_eq!("value", &src[tokens[0].start..tokens[0].end]);
        assert_eq!("'hi'", &src[tokens[2].start..tokens[2].end]);
    }
}
