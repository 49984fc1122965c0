use crate::script::{
    ast::*,
    error::ParseError,
    lexer::{tokenize, Keyword, Tok, Token},
};
use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

/// Deepest expression nesting accepted. Parsing and evaluation both recurse
/// once per level.
const MAX_NESTING: usize = 100;

/// Parse a whole file.
pub fn parse_module(source: &str, file: &Path) -> Result<Module, ParseError> {
    let tokens = tokenize(source, file)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        prev_end: 0,
        file,
        function_depth: 0,
        loop_depth: 0,
        nesting: 0,
    };
    let mut body = Vec::new();
    while !parser.check(&Tok::EndOfFile) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(Module {
        file: PathBuf::from(file),
        source: Rc::from(source),
        body,
    })
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    /// End offset of the last token consumed that carries source text.
    prev_end: usize,
    file: &'a Path,
    function_depth: usize,
    /// Loops enclosing the current statement within the current function.
    loop_depth: usize,
    /// Subexpressions enclosing the one being parsed.
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with EndOfFile.
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_tok(&self) -> &Tok {
        &self.peek().tok
    }

    fn peek_nth_tok(&self, n: usize) -> &Tok {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].tok
    }

    fn line(&self) -> u32 {
        self.peek().line
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        match t.tok {
            Tok::Newline | Tok::Indent | Tok::Dedent | Tok::EndOfFile => (),
            _ => self.prev_end = t.end,
        }
        t
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek_tok() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek_tok(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<Token, ParseError> {
        if self.check_op(op) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        self.peek_tok() == &Tok::Keyword(kw)
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        self.eat(&Tok::Keyword(kw))
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<Token, ParseError> {
        if self.check_kw(kw) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected '{}'", format!("{:?}", kw).to_lowercase())))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek_tok().clone() {
            Tok::Name(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn expect_end_of_statement(&mut self) -> Result<(), ParseError> {
        if self.eat(&Tok::Newline) || self.check(&Tok::EndOfFile) {
            Ok(())
        } else {
            Err(self.error("invalid syntax"))
        }
    }

    fn error<S: Into<String>>(&self, message: S) -> ParseError {
        ParseError::new(self.file, self.line(), message)
    }

    /// Parse with `f` one nesting level deeper.
    fn nested<T, F>(&mut self, too_deep: &str, f: F) -> Result<T, ParseError>
    where
        F: FnOnce(&mut Self) -> Result<T, ParseError>,
    {
        if self.nesting >= MAX_NESTING {
            return Err(self.error(too_deep));
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    fn stmt(&self, kind: StmtKind, line: u32, start: usize) -> Stmt {
        Stmt {
            kind,
            line,
            span: Span {
                start,
                end: self.prev_end,
            },
        }
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let compound = match self.peek_tok() {
            Tok::Keyword(Keyword::If) => Some(self.if_statement()?),
            Tok::Keyword(Keyword::While) => Some(self.while_statement()?),
            Tok::Keyword(Keyword::For) => Some(self.for_statement()?),
            Tok::Keyword(Keyword::Def) => Some(self.function_def()?),
            Tok::Keyword(Keyword::Try) => Some(self.try_statement()?),
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => None,
        };
        match compound {
            Some(stmt) => Ok(vec![stmt]),
            None => self.simple_statements(),
        }
    }

    /// One or more `;`-separated small statements ending the line.
    fn simple_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if self.check(&Tok::Newline) || self.check(&Tok::EndOfFile) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        self.expect_end_of_statement()?;
        Ok(stmts)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.check(&Tok::EndOfFile) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn loop_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        // Entered on either `if` or `elif`.
        let t = self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.check_kw(Keyword::Elif) {
            vec![self.if_statement()?]
        } else if self.eat_kw(Keyword::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(self.stmt(StmtKind::If { test, body, orelse }, t.line, t.start))
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        let t = self.advance();
        let test = self.test()?;
        let body = self.loop_body()?;
        if self.check_kw(Keyword::Else) {
            return Err(self.error("'else' after a loop is not supported"));
        }
        Ok(self.stmt(StmtKind::While { test, body }, t.line, t.start))
    }

    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        let t = self.advance();
        let target_line = self.line();
        let mut targets = vec![self.postfix()?];
        while self.eat_op(",") {
            if self.check_kw(Keyword::In) {
                break;
            }
            targets.push(self.postfix()?);
        }
        let target_expr = if targets.len() == 1 {
            targets.remove(0)
        } else {
            Expr {
                kind: ExprKind::Tuple(targets),
                line: target_line,
            }
        };
        let target = self.to_target(target_expr)?;
        self.expect_kw(Keyword::In)?;
        let iter = self.expr_list()?;
        let body = self.loop_body()?;
        if self.check_kw(Keyword::Else) {
            return Err(self.error("'else' after a loop is not supported"));
        }
        Ok(self.stmt(StmtKind::For { target, iter, body }, t.line, t.start))
    }

    fn function_def(&mut self) -> Result<Stmt, ParseError> {
        let t = self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.check_op(")") {
            let param_name = self.expect_name()?;
            if params.iter().any(|p| p.name == param_name) {
                return Err(self.error(format!(
                    "duplicate argument '{}' in function definition",
                    param_name
                )));
            }
            if self.eat_op(":") {
                // Annotations are parsed and dropped.
                self.test()?;
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            params.push(Param {
                name: param_name,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let saved_loop_depth = self.loop_depth;
        self.function_depth += 1;
        self.loop_depth = 0;
        let body = self.block();
        self.function_depth -= 1;
        self.loop_depth = saved_loop_depth;
        let body = body?;
        let def = FunctionDef {
            name,
            params,
            body,
            line: t.line,
        };
        Ok(self.stmt(StmtKind::FunctionDef(Rc::new(def)), t.line, t.start))
    }

    fn try_statement(&mut self) -> Result<Stmt, ParseError> {
        let t = self.advance();
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.check_kw(Keyword::Except) {
            let h = self.advance();
            let (kind, name) = if self.check_op(":") {
                (None, None)
            } else {
                let kind = self.test()?;
                let name = if self.eat_kw(Keyword::As) {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let handler_body = self.block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                line: h.line,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw(Keyword::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw(Keyword::Finally) {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(self.stmt(
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            t.line,
            t.start,
        ))
    }

    fn small_statement(&mut self) -> Result<Stmt, ParseError> {
        let first = self.peek().clone();
        let (line, start) = (first.line, first.start);
        let kind = match first.tok {
            Tok::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Keyword(Keyword::Break) | Tok::Keyword(Keyword::Continue) => {
                if self.loop_depth == 0 {
                    let word = if first.tok == Tok::Keyword(Keyword::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    return Err(self.error(format!("'{}' outside loop", word)));
                }
                self.advance();
                if first.tok == Tok::Keyword(Keyword::Break) {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            Tok::Keyword(Keyword::Return) => {
                if self.function_depth == 0 {
                    return Err(self.error("'return' outside function"));
                }
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expr_list()?))
                }
            }
            Tok::Keyword(Keyword::Raise) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise(None)
                } else {
                    StmtKind::Raise(Some(self.test()?))
                }
            }
            Tok::Keyword(Keyword::Global) => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            Tok::Keyword(Keyword::Del) => {
                self.advance();
                let mut targets = Vec::new();
                loop {
                    let e = self.postfix()?;
                    targets.push(self.to_target(e)?);
                    if !self.eat_op(",") || self.at_statement_end() {
                        break;
                    }
                }
                StmtKind::Delete(targets)
            }
            Tok::Keyword(Keyword::Assert) => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Tok::Keyword(Keyword::Import) => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let path = self.dotted_name()?;
                    let alias = if self.eat_kw(Keyword::As) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push(ImportName { path, alias });
                    if !self.eat_op(",") {
                        break;
                    }
                }
                StmtKind::Import(names)
            }
            Tok::Keyword(Keyword::From) => {
                self.advance();
                if self.check_op(".") {
                    return Err(self.error("relative imports are not supported"));
                }
                let module = self.dotted_name()?;
                self.expect_kw(Keyword::Import)?;
                if self.check_op("*") {
                    return Err(self.error("wildcard imports are not supported"));
                }
                let parenthesized = self.eat_op("(");
                let mut names = Vec::new();
                loop {
                    let name = self.expect_name()?;
                    let alias = if self.eat_kw(Keyword::As) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat_op(",") {
                        break;
                    }
                    if parenthesized && self.check_op(")") {
                        break;
                    }
                }
                if parenthesized {
                    self.expect_op(")")?;
                }
                StmtKind::ImportFrom { module, names }
            }
            _ => self.expression_statement()?,
        };
        Ok(self.stmt(kind, line, start))
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek_tok(), Tok::Newline | Tok::EndOfFile) || self.check_op(";")
    }

    fn dotted_name(&mut self) -> Result<Vec<String>, ParseError> {
        let mut path = vec![self.expect_name()?];
        while self.eat_op(".") {
            path.push(self.expect_name()?);
        }
        Ok(path)
    }

    fn expression_statement(&mut self) -> Result<StmtKind, ParseError> {
        let first = self.expr_list()?;
        if let Tok::Op(op) = self.peek_tok() {
            let aug = match *op {
                "+=" => Some(BinOp::Add),
                "-=" => Some(BinOp::Sub),
                "*=" => Some(BinOp::Mul),
                "/=" => Some(BinOp::Div),
                "//=" => Some(BinOp::FloorDiv),
                "%=" => Some(BinOp::Mod),
                "**=" => Some(BinOp::Pow),
                _ => None,
            };
            if let Some(op) = aug {
                self.advance();
                let target = self.to_target(first)?;
                if let Target::Tuple(_) = target {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                let value = self.expr_list()?;
                return Ok(StmtKind::AugAssign { target, op, value });
            }
        }

        if !self.check_op("=") {
            return Ok(StmtKind::Expr(first));
        }
        let mut exprs = vec![first];
        while self.eat_op("=") {
            exprs.push(self.expr_list()?);
        }
        let value = exprs.pop().ok_or_else(|| self.error("invalid syntax"))?;
        let mut targets = Vec::new();
        for e in exprs {
            targets.push(self.to_target(e)?);
        }
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, e: Expr) -> Result<Target, ParseError> {
        match e.kind {
            ExprKind::Name(n) => Ok(Target::Name(n)),
            ExprKind::Subscript { value, index } => Ok(Target::Subscript {
                value: *value,
                index: *index,
            }),
            ExprKind::Attribute { value, attr } => Ok(Target::Attribute {
                value: *value,
                attr,
            }),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let mut targets = Vec::new();
                for item in items {
                    targets.push(self.to_target(item)?);
                }
                Ok(Target::Tuple(targets))
            }
            _ => Err(ParseError::new(
                self.file,
                e.line,
                "cannot assign to expression",
            )),
        }
    }

    /// `a, b, c` with an optional trailing comma becomes a tuple.
    fn expr_list(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let first = self.test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.starts_expression() {
                items.push(self.test()?);
            } else {
                break;
            }
        }
        Ok(Expr {
            kind: ExprKind::Tuple(items),
            line,
        })
    }

    fn starts_expression(&self) -> bool {
        match self.peek_tok() {
            Tok::Name(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => true,
            Tok::Keyword(kw) => matches!(
                kw,
                Keyword::None | Keyword::True | Keyword::False | Keyword::Not
            ),
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    fn test(&mut self) -> Result<Expr, ParseError> {
        self.nested("too many nested parentheses", Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let body = self.or_test()?;
        if !self.eat_kw(Keyword::If) {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw(Keyword::Else)?;
        let orelse = self.test()?;
        Ok(Expr {
            kind: ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            line,
        })
    }

    fn or_test(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_test()?;
        while self.check_kw(Keyword::Or) {
            let line = self.advance().line;
            let right = self.and_test()?;
            left = Expr {
                kind: ExprKind::BoolOp {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_test()?;
        while self.check_kw(Keyword::And) {
            let line = self.advance().line;
            let right = self.not_test()?;
            left = Expr {
                kind: ExprKind::BoolOp {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ParseError> {
        if self.check_kw(Keyword::Not) {
            let line = self.advance().line;
            let operand = self.nested("too many nested operators", Self::not_test)?;
            return Ok(Expr {
                kind: ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek_tok() {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            Tok::Keyword(Keyword::In) => CmpOp::In,
            Tok::Keyword(Keyword::Not)
                if self.peek_nth_tok(1) == &Tok::Keyword(Keyword::In) =>
            {
                self.advance();
                CmpOp::NotIn
            }
            Tok::Keyword(Keyword::Is) => {
                if self.peek_nth_tok(1) == &Tok::Keyword(Keyword::Not) {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let left = self.arith()?;
        let mut ops = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr {
            kind: ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            line,
        })
    }

    fn binary(left: Expr, op: BinOp, right: Expr, line: u32) -> Expr {
        Expr {
            kind: ExprKind::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            line,
        }
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_tok() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => return Ok(left),
            };
            let line = self.advance().line;
            let right = self.term()?;
            left = Self::binary(left, op, right, line);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_tok() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => return Ok(left),
            };
            let line = self.advance().line;
            let right = self.factor()?;
            left = Self::binary(left, op, right, line);
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_tok() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            _ => return self.power(),
        };
        let line = self.advance().line;
        let operand = self.nested("too many nested operators", Self::factor)?;
        Ok(Expr {
            kind: ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            line,
        })
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.check_op("**") {
            let line = self.advance().line;
            // Right associative, and binds tighter than a unary minus on its left.
            let exponent = self.nested("too many nested operators", Self::factor)?;
            return Ok(Self::binary(base, BinOp::Pow, exponent, line));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.atom()?;
        loop {
            let line = self.line();
            if self.eat_op("(") {
                let (args, keywords) = self.call_arguments()?;
                e = Expr {
                    kind: ExprKind::Call {
                        func: Box::new(e),
                        args,
                        keywords,
                    },
                    line,
                };
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                e = Expr {
                    kind: ExprKind::Subscript {
                        value: Box::new(e),
                        index: Box::new(index),
                    },
                    line,
                };
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                e = Expr {
                    kind: ExprKind::Attribute {
                        value: Box::new(e),
                        attr,
                    },
                    line,
                };
            } else {
                return Ok(e);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut keywords: Vec<(String, Expr)> = Vec::new();
        while !self.check_op(")") {
            let is_keyword = matches!(self.peek_tok(), Tok::Name(_))
                && self.peek_nth_tok(1) == &Tok::Op("=");
            if is_keyword {
                let name = self.expect_name()?;
                self.advance();
                if keywords.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                keywords.push((name, self.test()?));
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.test()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, keywords))
    }

    fn subscript(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let lower = if self.check_op(":") {
            None
        } else {
            let e = self.test()?;
            if !self.check_op(":") {
                return Ok(e);
            }
            Some(Box::new(e))
        };
        self.expect_op(":")?;
        let upper = if self.check_op(":") || self.check_op("]") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.check_op("]") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr {
            kind: ExprKind::Slice { lower, upper, step },
            line,
        })
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let t = self.peek().clone();
        let line = t.line;
        let kind = match t.tok {
            Tok::Name(n) => {
                self.advance();
                ExprKind::Name(n)
            }
            Tok::Int(i) => {
                self.advance();
                ExprKind::Constant(Constant::Int(i))
            }
            Tok::Float(f) => {
                self.advance();
                ExprKind::Constant(Constant::Float(f))
            }
            Tok::Str(_) => {
                let mut s = String::new();
                while let Tok::Str(part) = self.peek_tok() {
                    s.push_str(part);
                    self.advance();
                }
                ExprKind::Constant(Constant::Str(Rc::from(s)))
            }
            Tok::Keyword(Keyword::None) => {
                self.advance();
                ExprKind::Constant(Constant::None)
            }
            Tok::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Constant(Constant::Bool(true))
            }
            Tok::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Constant(Constant::Bool(false))
            }
            Tok::Op("(") => {
                self.advance();
                if self.eat_op(")") {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let inner = self.expr_list()?;
                    self.expect_op(")")?;
                    return Ok(inner);
                }
            }
            Tok::Op("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.check_op("]") {
                    items.push(self.test()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                ExprKind::List(items)
            }
            Tok::Op("{") => {
                self.advance();
                let mut pairs = Vec::new();
                while !self.check_op("}") {
                    let key = self.test()?;
                    if !self.check_op(":") {
                        return Err(self.error("set literals are not supported"));
                    }
                    self.advance();
                    let value = self.test()?;
                    pairs.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                ExprKind::Dict(pairs)
            }
            Tok::Indent => return Err(self.error("unexpected indent")),
            Tok::Newline | Tok::EndOfFile => {
                return Err(self.error("invalid syntax"));
            }
            _ => return Err(self.error("invalid syntax")),
        };
        Ok(Expr { kind, line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Module {
        parse_module(src, Path::new("t.py")).unwrap()
    }

    fn segment<'a>(m: &'a Module, stmt: &Stmt) -> &'a str {
        &m.source[stmt.span.start..stmt.span.end]
    }

    #[test]
    fn simple_statements_and_spans() {
        let m = parse("x = 1\ny = x + 2; print(y)\n");
        assert_eq!(3, m.body.len());
        assert_eq!("x = 1", segment(&m, &m.body[0]));
        assert_eq!("y = x + 2", segment(&m, &m.body[1]));
        assert_eq!("print(y)", segment(&m, &m.body[2]));
        assert_eq!(2, m.body[2].line);
    }

    #[test]
    fn compound_statement_span_covers_body() {
        let src = "def f(a, b=2):\n    c = a + b\n    return c\n\nf(1)\n";
        let m = parse(src);
        assert_eq!(
            "def f(a, b=2):\n    c = a + b\n    return c",
            segment(&m, &m.body[0])
        );
        match &m.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!("f", def.name);
                assert_eq!(2, def.params.len());
                assert!(def.params[1].default.is_some());
                assert_eq!(2, def.body.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn elif_nests_in_orelse() {
        let m = parse("if a:\n    x\nelif b:\n    y\nelse:\n    z\n");
        match &m.body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert_eq!(1, orelse.len());
                assert_eq!(3, orelse[0].line);
                match &orelse[0].kind {
                    StmtKind::If { orelse, .. } => assert_eq!(1, orelse.len()),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn precedence() {
        let m = parse("-2 ** 2 + 3 * 4\n");
        match &m.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::BinOp { left, op, .. },
                ..
            }) => {
                assert_eq!(BinOp::Add, *op);
                match &left.kind {
                    ExprKind::UnaryOp { op, operand } => {
                        assert_eq!(UnaryOp::Neg, *op);
                        assert!(matches!(
                            operand.kind,
                            ExprKind::BinOp { op: BinOp::Pow, .. }
                        ));
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn chained_comparisons_and_membership() {
        let m = parse("1 < x <= 3\na not in b\nc is not None\n");
        match &m.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Compare { ops, .. },
                ..
            }) => assert_eq!(vec![CmpOp::Lt, CmpOp::LtE], ops.iter().map(|o| o.0).collect::<Vec<_>>()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &m.body[1].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Compare { ops, .. }, .. }) if ops[0].0 == CmpOp::NotIn
        ));
        assert!(matches!(
            &m.body[2].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Compare { ops, .. }, .. }) if ops[0].0 == CmpOp::IsNot
        ));
    }

    #[test]
    fn assignment_forms() {
        let m = parse("a = b = 1\nx, y = 1, 2\nd['k'] += 1\n");
        assert!(matches!(&m.body[0].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
        assert!(matches!(
            &m.body[1].kind,
            StmtKind::Assign { targets, value: Expr { kind: ExprKind::Tuple(_), .. } }
                if matches!(targets[0], Target::Tuple(_))
        ));
        assert!(matches!(
            &m.body[2].kind,
            StmtKind::AugAssign { target: Target::Subscript { .. }, op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn imports() {
        let m = parse("import a.b as c, d\nfrom e.f import (g, h as i)\n");
        match &m.body[0].kind {
            StmtKind::Import(names) => {
                assert_eq!(vec!["a", "b"], names[0].path);
                assert_eq!(Some("c".to_owned()), names[0].alias);
                assert_eq!(vec!["d"], names[1].path);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &m.body[1].kind {
            StmtKind::ImportFrom { module, names } => {
                assert_eq!(vec!["e".to_owned(), "f".to_owned()], *module);
                assert_eq!(("h".to_owned(), Some("i".to_owned())), names[1]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn try_except_finally() {
        let m = parse(
            "try:\n    x\nexcept (KeyError, IndexError) as e:\n    y\nexcept:\n    z\nfinally:\n    w\n",
        );
        match &m.body[0].kind {
            StmtKind::Try {
                handlers,
                finalbody,
                ..
            } => {
                assert_eq!(2, handlers.len());
                assert_eq!(Some("e".to_owned()), handlers[0].name);
                assert!(handlers[1].kind.is_none());
                assert_eq!(5, handlers[1].line);
                assert_eq!(1, finalbody.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn keyword_arguments_and_slices() {
        let m = parse("print(a, b, sep='-')\nx[1:]\nx[::2]\n");
        assert!(matches!(
            &m.body[0].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Call { args, keywords, .. }, .. })
                if args.len() == 2 && keywords[0].0 == "sep"
        ));
        assert!(matches!(
            &m.body[2].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Subscript { index, .. }, .. })
                if matches!(index.kind, ExprKind::Slice { lower: None, upper: None, step: Some(_) })
        ));
    }

    #[test]
    fn syntax_errors_carry_line() {
        let err = parse_module("x = 1\ny = (\n", Path::new("bad.py")).unwrap_err();
        assert_eq!(Path::new("bad.py"), err.file);
        let err = parse_module("x = 1\n1 = y\n", Path::new("bad.py")).unwrap_err();
        assert_eq!(2, err.line);
        assert_eq!("cannot assign to expression", err.message);
        assert!(parse_module("def f(:\n  pass\n", Path::new("bad.py")).is_err());
    }

    #[test]
    fn misplaced_control_flow() {
        let err = parse_module("return 1\n", Path::new("t.py")).unwrap_err();
        assert_eq!("'return' outside function", err.message);
        let err = parse_module("while x:\n    def f():\n        break\n", Path::new("t.py"))
            .unwrap_err();
        assert_eq!("'break' outside loop", err.message);
        assert!(parse_module("def f():\n    for i in x:\n        continue\n    return i\n", Path::new("t.py")).is_ok());
    }

    #[test]
    fn single_line_block() {
        let m = parse("if x: y = 1\nz = 2\n");
        assert_eq!(2, m.body.len());
        match &m.body[0].kind {
            StmtKind::If { body, .. } => assert_eq!(1, body.len()),
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Parse on a thread with room for the deepest accepted nesting, as the
    /// main thread has.
    fn parse_deep(src: String) -> Result<(), ParseError> {
        std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(move || parse_module(&src, Path::new("deep.py")).map(|_| ()))
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn nesting_is_bounded() {
        let parens = |n: usize| format!("x = {}1{}\n", "(".repeat(n), ")".repeat(n));
        assert!(parse_deep(parens(50)).is_ok());
        let err = parse_deep(parens(1000)).unwrap_err();
        assert_eq!("too many nested parentheses", err.message);
        assert_eq!(1, err.line);

        let err = parse_deep(format!("x = {}1\n", "-".repeat(3000))).unwrap_err();
        assert_eq!("too many nested operators", err.message);
        let err = parse_deep(format!("x = {}y\n", "not ".repeat(3000))).unwrap_err();
        assert_eq!("too many nested operators", err.message);
        let err = parse_deep(format!("x = 2{}\n", "**2".repeat(3000))).unwrap_err();
        assert_eq!("too many nested operators", err.message);
        assert!(parse_deep(format!("x = {}1\n", "-".repeat(50))).is_ok());
    }
}
