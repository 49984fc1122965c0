use crate::{
    log::LogLevel::{LogDebug, LogWarn},
    script::{
        ast::{self, Constant, Expr, ExprKind, FunctionDef, Stmt, StmtKind, Target},
        builtins::{self, Index},
        parser::parse_module,
        value::{
            Dict, ExceptionKind, ExceptionObject, Function, FunctionScope, ModuleObject,
            Namespace, TracebackEntry, Value,
        },
    },
};
use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Display, Formatter, Write as FmtWrite},
    fs,
    io::{self, Write},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    rc::Rc,
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
};

/// Frames deeper than this raise `RecursionError`.
pub const DEFAULT_RECURSION_LIMIT: usize = 200;

static KEYBOARD_INTERRUPT: AtomicBool = AtomicBool::new(false);

/// Async-signal-safe: only stores to an atomic. The next statement to run
/// raises `KeyboardInterrupt`.
pub fn request_keyboard_interrupt() {
    KEYBOARD_INTERRUPT.store(true, AtomicOrdering::SeqCst);
}

pub fn clear_keyboard_interrupt() {
    KEYBOARD_INTERRUPT.store(false, AtomicOrdering::SeqCst);
}

/// Identity of one live invocation of a function or of a module's top level.
/// Never reused within a process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ActivationId(pub u64);

impl Display for ActivationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug)]
pub enum TraceEvent<'a> {
    Call,
    Line,
    Return(&'a Value),
    Exception(&'a ExceptionObject),
}

impl<'a> TraceEvent<'a> {
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::Call => "call",
            TraceEvent::Line => "line",
            TraceEvent::Return(_) => "return",
            TraceEvent::Exception(_) => "exception",
        }
    }
}

/// A hook's answer to a `call` event. Ignored for every other event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tracing {
    Keep,
    Stop,
}

/// Returned by a hook to stop the program outright. The engine unwinds
/// without running `except`/`finally` blocks or delivering more events.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Halt {
    pub status: i32,
    pub reason: String,
}

impl Halt {
    pub fn new<S: Into<String>>(status: i32, reason: S) -> Halt {
        Halt {
            status,
            reason: reason.into(),
        }
    }
}

/// What a hook gets to look at.
pub struct FrameView<'a> {
    pub file: &'a Path,
    pub activation: ActivationId,
    /// Function name, or `<module>` for top-level code.
    pub code_name: &'a str,
    pub line: u32,
    pub globals: &'a Namespace,
    /// None for top-level code.
    pub locals: Option<&'a Namespace>,
}

pub trait TraceHook {
    fn on_event(&mut self, frame: &FrameView<'_>, event: TraceEvent<'_>)
        -> Result<Tracing, Halt>;
}

/// Why execution stopped early.
#[derive(Debug)]
pub enum Unwind {
    Raise(Rc<ExceptionObject>),
    Halt(Halt),
}

pub type Exec<T> = Result<T, Unwind>;

pub fn raise(kind: ExceptionKind, args: Vec<Value>) -> Unwind {
    Unwind::Raise(Rc::new(ExceptionObject::new(kind, args)))
}

pub fn raise_msg<S: Into<String>>(kind: ExceptionKind, message: S) -> Unwind {
    raise(kind, vec![Value::from(message.into())])
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    file: Rc<Path>,
    code_name: Rc<str>,
    activation: ActivationId,
    globals: Rc<Namespace>,
    locals: Option<Rc<Namespace>>,
    scope: Option<Rc<FunctionScope>>,
    line: u32,
    traced: bool,
    /// Exceptions being handled by enclosing `except` blocks, innermost last.
    handling: Vec<Rc<ExceptionObject>>,
}

impl Frame {
    fn uses_locals(&self, name: &str) -> bool {
        match &self.scope {
            Some(scope) => !scope.declared_global.contains(name),
            None => false,
        }
    }

    fn assigns_locally(&self, name: &str) -> bool {
        match &self.scope {
            Some(scope) => scope.assigned.contains(name),
            None => false,
        }
    }
}

pub struct Interpreter<'h> {
    hook: Option<&'h mut dyn TraceHook>,
    /// Imports resolve against this directory.
    search_dir: PathBuf,
    modules: HashMap<String, Rc<ModuleObject>>,
    sources: HashMap<PathBuf, Rc<str>>,
    next_activation: u64,
    depth: usize,
    recursion_limit: usize,
    output: Box<dyn Write + 'h>,
}

/// Restores the previously installed hook when dropped.
pub struct TraceGuard<'i, 'h> {
    interp: &'i mut Interpreter<'h>,
    previous: Option<&'h mut dyn TraceHook>,
}

impl<'i, 'h> Deref for TraceGuard<'i, 'h> {
    type Target = Interpreter<'h>;

    fn deref(&self) -> &Interpreter<'h> {
        self.interp
    }
}

impl<'i, 'h> DerefMut for TraceGuard<'i, 'h> {
    fn deref_mut(&mut self) -> &mut Interpreter<'h> {
        self.interp
    }
}

impl<'i, 'h> Drop for TraceGuard<'i, 'h> {
    fn drop(&mut self) {
        self.interp.hook = self.previous.take();
    }
}

/// Python `traceback.format_tb` layout.
pub fn format_tb<F: Fn(&Path, u32) -> Option<String>>(
    entries: &[TracebackEntry],
    source_line: F,
) -> String {
    let mut out = String::new();
    for entry in entries {
        writeln!(
            out,
            "  File \"{}\", line {}, in {}",
            entry.file.display(),
            entry.line,
            entry.name
        )
        .unwrap_or(());
        if let Some(line) = source_line(&entry.file, entry.line) {
            let line = line.trim();
            if !line.is_empty() {
                writeln!(out, "    {}", line).unwrap_or(());
            }
        }
    }
    out
}

fn constant_value(c: &Constant) -> Value {
    match c {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::Str(s.clone()),
    }
}

fn collect_target_names(target: &Target, names: &mut HashSet<String>) {
    match target {
        Target::Name(n) => {
            names.insert(n.clone());
        }
        Target::Tuple(items) => {
            for t in items {
                collect_target_names(t, names);
            }
        }
        Target::Subscript { .. } | Target::Attribute { .. } => (),
    }
}

fn collect_scope(body: &[Stmt], scope: &mut FunctionScope) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for t in targets {
                    collect_target_names(t, &mut scope.assigned);
                }
            }
            StmtKind::AugAssign { target, .. } => collect_target_names(target, &mut scope.assigned),
            StmtKind::Delete(targets) => {
                for t in targets {
                    collect_target_names(t, &mut scope.assigned);
                }
            }
            StmtKind::For { target, body, .. } => {
                collect_target_names(target, &mut scope.assigned);
                collect_scope(body, scope);
            }
            StmtKind::While { body, .. } => collect_scope(body, scope),
            StmtKind::If { body, orelse, .. } => {
                collect_scope(body, scope);
                collect_scope(orelse, scope);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_scope(body, scope);
                for h in handlers {
                    if let Some(name) = &h.name {
                        scope.assigned.insert(name.clone());
                    }
                    collect_scope(&h.body, scope);
                }
                collect_scope(orelse, scope);
                collect_scope(finalbody, scope);
            }
            StmtKind::FunctionDef(def) => {
                scope.assigned.insert(def.name.clone());
            }
            StmtKind::Import(names) => {
                for n in names {
                    let bound = match &n.alias {
                        Some(alias) => alias.clone(),
                        None => n.path[0].clone(),
                    };
                    scope.assigned.insert(bound);
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for (name, alias) in names {
                    scope
                        .assigned
                        .insert(alias.clone().unwrap_or_else(|| name.clone()));
                }
            }
            StmtKind::Global(names) => {
                for n in names {
                    scope.declared_global.insert(n.clone());
                }
            }
            _ => (),
        }
    }
}

fn function_scope(def: &FunctionDef) -> FunctionScope {
    let mut scope = FunctionScope::default();
    for p in &def.params {
        scope.assigned.insert(p.name.clone());
    }
    collect_scope(&def.body, &mut scope);
    for g in &scope.declared_global {
        scope.assigned.remove(g);
    }
    scope
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn quoted_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    match quoted.len() {
        0 => String::new(),
        1 => quoted[0].clone(),
        2 => format!("{} and {}", quoted[0], quoted[1]),
        n => format!("{}, and {}", quoted[..n - 1].join(", "), quoted[n - 1]),
    }
}

impl<'h> Interpreter<'h> {
    pub fn new(search_dir: &Path) -> Interpreter<'h> {
        Interpreter::with_output(search_dir, Box::new(io::stdout()))
    }

    /// `print` writes to `output`.
    pub fn with_output(search_dir: &Path, output: Box<dyn Write + 'h>) -> Interpreter<'h> {
        Interpreter {
            hook: None,
            search_dir: search_dir.to_owned(),
            modules: HashMap::new(),
            sources: HashMap::new(),
            next_activation: 1,
            depth: 0,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            output,
        }
    }

    #[cfg(test)]
    pub fn set_recursion_limit(&mut self, limit: usize) {
        self.recursion_limit = limit;
    }

    /// Install `hook` for as long as the returned guard lives.
    pub fn use_trace(&mut self, hook: &'h mut dyn TraceHook) -> TraceGuard<'_, 'h> {
        let previous = self.hook.replace(hook);
        TraceGuard {
            interp: self,
            previous,
        }
    }

    #[cfg(test)]
    pub fn is_tracing(&self) -> bool {
        self.hook.is_some()
    }

    pub(crate) fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    /// Run `module` as `__main__`.
    pub fn run_main(&mut self, module: ast::Module) -> Exec<()> {
        let module = Rc::new(module);
        self.sources
            .insert(module.file.clone(), module.source.clone());
        let result = self.exec_module("__main__", &module).map(|_| ());
        self.output.flush().unwrap_or(());
        result
    }

    /// A full Python-style report for an exception that escaped `run_main`.
    pub fn format_traceback(&self, exc: &ExceptionObject) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        out.push_str(&format_tb(&exc.traceback.borrow(), |file, line| {
            self.source_line(file, line)
        }));
        let message = exc.message();
        if message.is_empty() {
            out.push_str(exc.kind.name());
        } else {
            write!(out, "{}: {}", exc.kind.name(), message).unwrap_or(());
        }
        out
    }

    fn source_line(&self, file: &Path, line: u32) -> Option<String> {
        let source = self.sources.get(file)?;
        source
            .lines()
            .nth(line.checked_sub(1)? as usize)
            .map(|l| l.to_owned())
    }

    fn new_activation(&mut self) -> ActivationId {
        let id = ActivationId(self.next_activation);
        self.next_activation += 1;
        id
    }

    fn fire(&mut self, frame: &Frame, event: TraceEvent<'_>) -> Result<Tracing, Halt> {
        let hook = match self.hook.as_mut() {
            Some(hook) => hook,
            None => return Ok(Tracing::Stop),
        };
        let view = FrameView {
            file: &frame.file,
            activation: frame.activation,
            code_name: &frame.code_name,
            line: frame.line,
            globals: &frame.globals,
            locals: frame.locals.as_deref(),
        };
        hook.on_event(&view, event)
    }

    fn line_event(&mut self, frame: &mut Frame, line: u32) -> Exec<()> {
        frame.line = line;
        if frame.traced {
            self.fire(frame, TraceEvent::Line).map_err(Unwind::Halt)?;
        }
        Ok(())
    }

    /// Record `frame` in the traceback and report the exception to the hook,
    /// once per frame the exception passes through.
    fn note_exception(&mut self, frame: &Frame, exc: &Rc<ExceptionObject>) -> Exec<()> {
        if exc.noted_in.get() == Some(frame.activation.0) {
            return Ok(());
        }
        exc.noted_in.set(Some(frame.activation.0));
        exc.traceback.borrow_mut().insert(
            0,
            TracebackEntry {
                file: frame.file.clone(),
                line: frame.line,
                name: frame.code_name.clone(),
            },
        );
        if frame.traced {
            self.fire(frame, TraceEvent::Exception(exc))
                .map_err(Unwind::Halt)?;
        }
        Ok(())
    }

    /// Delivers call/return events around `body`.
    fn run_frame(&mut self, frame: &mut Frame, body: &[Stmt]) -> Exec<Value> {
        self.depth += 1;
        let result = self.run_frame_inner(frame, body);
        self.depth -= 1;
        result
    }

    fn run_frame_inner(&mut self, frame: &mut Frame, body: &[Stmt]) -> Exec<Value> {
        frame.traced = match self.fire(frame, TraceEvent::Call) {
            Ok(tracing) => tracing == Tracing::Keep,
            Err(halt) => return Err(Unwind::Halt(halt)),
        };
        let value = match self.exec_block(frame, body) {
            Ok(Flow::Return(v)) => v,
            Ok(_) => Value::None,
            Err(Unwind::Raise(exc)) => {
                if frame.traced {
                    self.fire(frame, TraceEvent::Return(&Value::None))
                        .map_err(Unwind::Halt)?;
                }
                return Err(Unwind::Raise(exc));
            }
            Err(halt) => return Err(halt),
        };
        if frame.traced {
            self.fire(frame, TraceEvent::Return(&value))
                .map_err(Unwind::Halt)?;
        }
        Ok(value)
    }

    fn exec_module(&mut self, name: &str, module: &ast::Module) -> Exec<Rc<ModuleObject>> {
        let globals = Rc::new(Namespace::new());
        globals.set("__name__", Value::from(name));
        globals.set("__file__", Value::from(module.file.display().to_string()));
        let object = Rc::new(ModuleObject {
            name: name.to_owned(),
            file: Some(module.file.clone()),
            globals: globals.clone(),
        });
        // Registered before running so that circular imports see the partial module.
        self.modules.insert(name.to_owned(), object.clone());
        let mut frame = Frame {
            file: Rc::from(module.file.as_path()),
            code_name: Rc::from("<module>"),
            activation: self.new_activation(),
            globals,
            locals: None,
            scope: None,
            line: 0,
            traced: false,
            handling: Vec::new(),
        };
        log!(LogDebug, "running module {} ({})", name, module.file.display());
        match self.run_frame(&mut frame, &module.body) {
            Ok(_) => Ok(object),
            Err(e) => {
                self.modules.remove(name);
                Err(e)
            }
        }
    }

    fn exec_block(&mut self, frame: &mut Frame, body: &[Stmt]) -> Exec<Flow> {
        for stmt in body {
            match self.exec_stmt(frame, stmt)? {
                Flow::Normal => (),
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, frame: &mut Frame, stmt: &Stmt) -> Exec<Flow> {
        match self.exec_stmt_inner(frame, stmt) {
            Err(Unwind::Raise(exc)) => {
                self.note_exception(frame, &exc)?;
                Err(Unwind::Raise(exc))
            }
            other => other,
        }
    }

    fn exec_stmt_inner(&mut self, frame: &mut Frame, stmt: &Stmt) -> Exec<Flow> {
        if KEYBOARD_INTERRUPT.swap(false, AtomicOrdering::SeqCst) {
            frame.line = stmt.line;
            return Err(raise(ExceptionKind::KeyboardInterrupt, Vec::new()));
        }
        self.line_event(frame, stmt.line)?;

        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(frame, e)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(frame, value)?;
                for t in targets {
                    self.assign(frame, t, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.aug_assign(frame, target, *op, value)?;
            }
            StmtKind::If { test, body, orelse } => {
                return if self.eval(frame, test)?.truthy() {
                    self.exec_block(frame, body)
                } else {
                    self.exec_block(frame, orelse)
                };
            }
            StmtKind::While { test, body } => {
                let mut first = true;
                loop {
                    if !first {
                        self.line_event(frame, stmt.line)?;
                    }
                    first = false;
                    if !self.eval(frame, test)?.truthy() {
                        break;
                    }
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => (),
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(frame, iter)?;
                let mut items = builtins::iter_of(&iterable)?;
                let mut first = true;
                loop {
                    if !first {
                        self.line_event(frame, stmt.line)?;
                    }
                    first = false;
                    let item = match items.next() {
                        Some(item) => item,
                        None => break,
                    };
                    self.assign(frame, target, item)?;
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => (),
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass | StmtKind::Global(_) => (),
            StmtKind::FunctionDef(def) => {
                let mut defaults = Vec::new();
                for p in &def.params {
                    if let Some(d) = &p.default {
                        defaults.push(self.eval(frame, d)?);
                    }
                }
                let function = Function {
                    def: def.clone(),
                    defaults,
                    globals: frame.globals.clone(),
                    file: frame.file.clone(),
                    scope: Rc::new(function_scope(def)),
                };
                self.store_name(frame, &def.name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(e) => {
                let value = match e {
                    Some(e) => self.eval(frame, e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Import(names) => {
                for name in names {
                    let leaf = self.import_module(&name.path)?;
                    match &name.alias {
                        Some(alias) => self.store_name(frame, alias, Value::Module(leaf)),
                        None => {
                            let top = match self.modules.get(&name.path[0]) {
                                Some(top) => top.clone(),
                                None => leaf,
                            };
                            self.store_name(frame, &name.path[0], Value::Module(top));
                        }
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let m = self.import_module(module)?;
                for (name, alias) in names {
                    let value = match m.globals.get(name) {
                        Some(v) => v,
                        None => {
                            let mut path = module.clone();
                            path.push(name.clone());
                            match self.import_module(&path) {
                                Ok(sub) => Value::Module(sub),
                                Err(Unwind::Raise(e))
                                    if e.kind == ExceptionKind::ModuleNotFoundError =>
                                {
                                    return Err(raise_msg(
                                        ExceptionKind::ImportError,
                                        format!(
                                            "cannot import name '{}' from '{}'",
                                            name,
                                            module.join(".")
                                        ),
                                    ));
                                }
                                Err(e) => return Err(e),
                            }
                        }
                    };
                    let bound = alias.as_ref().unwrap_or(name);
                    self.store_name(frame, bound, value);
                }
            }
            StmtKind::Delete(targets) => {
                for t in targets {
                    self.delete(frame, t)?;
                }
            }
            StmtKind::Raise(e) => {
                let exc = match e {
                    None => match frame.handling.last() {
                        Some(exc) => exc.clone(),
                        None => {
                            return Err(raise_msg(
                                ExceptionKind::RuntimeError,
                                "No active exception to reraise",
                            ))
                        }
                    },
                    Some(e) => match self.eval(frame, e)? {
                        Value::ExceptionType(kind) => Rc::new(ExceptionObject::new(kind, Vec::new())),
                        Value::Exception(exc) => exc,
                        _ => {
                            return Err(raise_msg(
                                ExceptionKind::TypeError,
                                "exceptions must derive from BaseException",
                            ))
                        }
                    },
                };
                return Err(Unwind::Raise(exc));
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(frame, body, handlers, orelse, finalbody),
            StmtKind::Assert { test, msg } => {
                if !self.eval(frame, test)?.truthy() {
                    let args = match msg {
                        Some(m) => vec![self.eval(frame, m)?],
                        None => Vec::new(),
                    };
                    return Err(raise(ExceptionKind::AssertionError, args));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        frame: &mut Frame,
        body: &[Stmt],
        handlers: &[ast::ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Exec<Flow> {
        let result = match self.exec_block(frame, body) {
            Err(Unwind::Raise(exc)) => self.handle_exception(frame, exc, handlers),
            Ok(Flow::Normal) if !orelse.is_empty() => self.exec_block(frame, orelse),
            other => other,
        };
        if finalbody.is_empty() {
            return result;
        }
        if let Err(Unwind::Halt(_)) = result {
            return result;
        }
        match self.exec_block(frame, finalbody)? {
            Flow::Normal => result,
            // A jump out of `finally` wins over whatever was pending.
            flow => Ok(flow),
        }
    }

    fn handle_exception(
        &mut self,
        frame: &mut Frame,
        exc: Rc<ExceptionObject>,
        handlers: &[ast::ExceptHandler],
    ) -> Exec<Flow> {
        for handler in handlers {
            self.line_event(frame, handler.line)?;
            let matches = match &handler.kind {
                None => true,
                Some(kind) => {
                    let kind = self.eval(frame, kind)?;
                    builtins::exception_matches(&exc, &kind)?
                }
            };
            if !matches {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(frame, name, Value::Exception(exc.clone()));
            }
            frame.handling.push(exc.clone());
            let result = self.exec_block(frame, &handler.body);
            frame.handling.pop();
            if let Some(name) = &handler.name {
                self.unbind_name(frame, name);
            }
            return result;
        }
        Err(Unwind::Raise(exc))
    }

    fn import_module(&mut self, path: &[String]) -> Exec<Rc<ModuleObject>> {
        let mut parent: Option<Rc<ModuleObject>> = None;
        for i in 0..path.len() {
            let dotted = path[..=i].join(".");
            let module = match self.modules.get(&dotted) {
                Some(m) => m.clone(),
                None => self.load_module(&path[..=i], &dotted)?,
            };
            if let Some(p) = &parent {
                p.globals.set(path[i].clone(), Value::Module(module.clone()));
            }
            parent = Some(module);
        }
        match parent {
            Some(m) => Ok(m),
            None => Err(raise_msg(ExceptionKind::ImportError, "empty module name")),
        }
    }

    fn load_module(&mut self, path: &[String], dotted: &str) -> Exec<Rc<ModuleObject>> {
        if dotted == "math" {
            let m = Rc::new(builtins::math_module());
            self.modules.insert(dotted.to_owned(), m.clone());
            return Ok(m);
        }

        let mut base = self.search_dir.clone();
        for part in path {
            base.push(part);
        }
        let file = base.with_extension("py");
        if file.is_file() {
            let source = match fs::read_to_string(&file) {
                Ok(s) => s,
                Err(e) => {
                    log!(LogWarn, "could not read {}: {:?}", file.display(), e);
                    return Err(raise_msg(
                        ExceptionKind::ImportError,
                        format!("could not read module '{}'", dotted),
                    ));
                }
            };
            let module = parse_module(&source, &file).map_err(|e| {
                raise_msg(
                    ExceptionKind::SyntaxError,
                    format!("{} ({}, line {})", e.message, file.display(), e.line),
                )
            })?;
            self.sources.insert(file.clone(), module.source.clone());
            return self.exec_module(dotted, &module);
        }
        if base.is_dir() {
            let globals = Rc::new(Namespace::new());
            globals.set("__name__", Value::from(dotted));
            let m = Rc::new(ModuleObject {
                name: dotted.to_owned(),
                file: None,
                globals,
            });
            self.modules.insert(dotted.to_owned(), m.clone());
            return Ok(m);
        }
        Err(raise_msg(
            ExceptionKind::ModuleNotFoundError,
            format!("No module named '{}'", dotted),
        ))
    }

    fn load_name(&mut self, frame: &Frame, name: &str) -> Exec<Value> {
        if frame.uses_locals(name) {
            if let Some(locals) = &frame.locals {
                if let Some(v) = locals.get(name) {
                    return Ok(v);
                }
            }
            if frame.assigns_locally(name) {
                return Err(raise_msg(
                    ExceptionKind::UnboundLocalError,
                    format!("local variable '{}' referenced before assignment", name),
                ));
            }
        }
        if let Some(v) = frame.globals.get(name) {
            return Ok(v);
        }
        if let Some(v) = builtins::lookup(name) {
            return Ok(v);
        }
        Err(raise_msg(
            ExceptionKind::NameError,
            format!("name '{}' is not defined", name),
        ))
    }

    fn scope_for<'f>(&self, frame: &'f Frame, name: &str) -> &'f Namespace {
        match &frame.locals {
            Some(locals) if frame.uses_locals(name) => locals,
            _ => &frame.globals,
        }
    }

    fn store_name(&mut self, frame: &Frame, name: &str, value: Value) {
        self.scope_for(frame, name).set(name, value);
    }

    fn unbind_name(&mut self, frame: &Frame, name: &str) {
        self.scope_for(frame, name).remove(name);
    }

    fn assign(&mut self, frame: &mut Frame, target: &Target, value: Value) -> Exec<()> {
        match target {
            Target::Name(name) => {
                self.store_name(frame, name, value);
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(frame, container)?;
                let index = self.eval_index(frame, index)?;
                builtins::set_item(&container, index, value)
            }
            Target::Attribute { value: obj, attr } => {
                let obj = self.eval(frame, obj)?;
                builtins::set_attribute(&obj, attr, value)
            }
            Target::Tuple(targets) => {
                let items = builtins::collect(&value)?;
                if items.len() < targets.len() {
                    return Err(raise_msg(
                        ExceptionKind::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    ));
                }
                if items.len() > targets.len() {
                    return Err(raise_msg(
                        ExceptionKind::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    ));
                }
                for (t, v) in targets.iter().zip(items.into_iter()) {
                    self.assign(frame, t, v)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(
        &mut self,
        frame: &mut Frame,
        target: &Target,
        op: ast::BinOp,
        value: &Expr,
    ) -> Exec<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(frame, name)?;
                let rhs = self.eval(frame, value)?;
                let updated = builtins::inplace_op(op, &current, &rhs)?;
                self.store_name(frame, name, updated);
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(frame, container)?;
                let index = self.eval_index(frame, index)?;
                let current = builtins::get_item(&container, &index)?;
                let rhs = self.eval(frame, value)?;
                let updated = builtins::inplace_op(op, &current, &rhs)?;
                builtins::set_item(&container, index, updated)
            }
            Target::Attribute { value: obj, attr } => {
                let obj = self.eval(frame, obj)?;
                let current = builtins::get_attribute(&obj, attr)?;
                let rhs = self.eval(frame, value)?;
                let updated = builtins::inplace_op(op, &current, &rhs)?;
                builtins::set_attribute(&obj, attr, updated)
            }
            Target::Tuple(_) => Err(raise_msg(
                ExceptionKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn delete(&mut self, frame: &mut Frame, target: &Target) -> Exec<()> {
        match target {
            Target::Name(name) => match self.scope_for(frame, name).remove(name) {
                Some(_) => Ok(()),
                None => Err(raise_msg(
                    ExceptionKind::NameError,
                    format!("name '{}' is not defined", name),
                )),
            },
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(frame, container)?;
                let index = self.eval_index(frame, index)?;
                builtins::del_item(&container, &index)
            }
            Target::Attribute { value: obj, attr } => {
                let obj = self.eval(frame, obj)?;
                match &obj {
                    Value::Module(m) if m.globals.remove(attr).is_some() => Ok(()),
                    _ => Err(raise_msg(
                        ExceptionKind::AttributeError,
                        format!("'{}' object has no attribute '{}'", obj.type_name(), attr),
                    )),
                }
            }
            Target::Tuple(targets) => {
                for t in targets {
                    self.delete(frame, t)?;
                }
                Ok(())
            }
        }
    }

    fn eval_all(&mut self, frame: &mut Frame, exprs: &[Expr]) -> Exec<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for e in exprs {
            values.push(self.eval(frame, e)?);
        }
        Ok(values)
    }

    fn eval_index(&mut self, frame: &mut Frame, index: &Expr) -> Exec<Index> {
        match &index.kind {
            ExprKind::Slice { lower, upper, step } => {
                let mut bounds = [None, None, None];
                for (slot, e) in bounds.iter_mut().zip([lower, upper, step].iter()) {
                    if let Some(e) = e {
                        *slot = match self.eval(frame, e)? {
                            Value::None => None,
                            v => match v.as_int() {
                                Some(i) => Some(i),
                                None => {
                                    return Err(raise_msg(
                                        ExceptionKind::TypeError,
                                        "slice indices must be integers or None",
                                    ))
                                }
                            },
                        };
                    }
                }
                Ok(Index::Slice(bounds[0], bounds[1], bounds[2]))
            }
            _ => Ok(Index::Item(self.eval(frame, index)?)),
        }
    }

    fn eval(&mut self, frame: &mut Frame, e: &Expr) -> Exec<Value> {
        match &e.kind {
            ExprKind::Constant(c) => Ok(constant_value(c)),
            ExprKind::Name(name) => self.load_name(frame, name),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(frame, items)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(frame, items)?)),
            ExprKind::Dict(pairs) => {
                let mut d = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(frame, k)?;
                    builtins::check_hashable(&key)?;
                    let value = self.eval(frame, v)?;
                    d.set(key, value);
                }
                Ok(Value::dict(d))
            }
            ExprKind::BinOp { left, op, right } => {
                let l = self.eval(frame, left)?;
                let r = self.eval(frame, right)?;
                builtins::binary_op(*op, &l, &r)
            }
            ExprKind::UnaryOp { op, operand } => {
                let v = self.eval(frame, operand)?;
                builtins::unary_op(*op, &v)
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.eval(frame, left)?;
                let short_circuit = match op {
                    ast::BoolOp::And => !l.truthy(),
                    ast::BoolOp::Or => l.truthy(),
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(frame, right)
                }
            }
            ExprKind::Compare { left, ops } => {
                let mut l = self.eval(frame, left)?;
                for (op, right) in ops {
                    let r = self.eval(frame, right)?;
                    if !builtins::compare(*op, &l, &r)? {
                        return Ok(Value::Bool(false));
                    }
                    l = r;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(frame, test)?.truthy() {
                    self.eval(frame, body)
                } else {
                    self.eval(frame, orelse)
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let f = self.eval(frame, func)?;
                let args = self.eval_all(frame, args)?;
                let mut kwargs = Vec::with_capacity(keywords.len());
                for (name, value) in keywords {
                    kwargs.push((name.clone(), self.eval(frame, value)?));
                }
                self.call_value(&f, args, kwargs)
            }
            ExprKind::Attribute { value, attr } => {
                let v = self.eval(frame, value)?;
                builtins::get_attribute(&v, attr)
            }
            ExprKind::Subscript { value, index } => {
                let v = self.eval(frame, value)?;
                let index = self.eval_index(frame, index)?;
                builtins::get_item(&v, &index)
            }
            ExprKind::Slice { .. } => Err(raise_msg(
                ExceptionKind::SyntaxError,
                "slice outside of a subscript",
            )),
        }
    }

    pub(crate) fn call_value(
        &mut self,
        f: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match f {
            Value::Function(func) => self.call_function(func, args, kwargs),
            Value::Builtin(b) => builtins::call(self, *b, args, kwargs),
            Value::BoundMethod(m) => builtins::call_method(m, args, kwargs),
            Value::ExceptionType(kind) => {
                if !kwargs.is_empty() {
                    return Err(raise_msg(
                        ExceptionKind::TypeError,
                        format!("{}() takes no keyword arguments", kind.name()),
                    ));
                }
                Ok(Value::Exception(Rc::new(ExceptionObject::new(*kind, args))))
            }
            other => Err(raise_msg(
                ExceptionKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(
        &mut self,
        func: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        if self.depth >= self.recursion_limit {
            return Err(raise_msg(
                ExceptionKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let def = &func.def;
        let params = &def.params;
        if args.len() > params.len() {
            return Err(raise_msg(
                ExceptionKind::TypeError,
                format!(
                    "{}() takes {} positional argument{} but {} {} given",
                    def.name,
                    params.len(),
                    plural(params.len()),
                    args.len(),
                    if args.len() == 1 { "was" } else { "were" }
                ),
            ));
        }

        let locals = Rc::new(Namespace::new());
        for (param, arg) in params.iter().zip(args.into_iter()) {
            locals.set(param.name.clone(), arg);
        }
        for (name, value) in kwargs {
            if !params.iter().any(|p| p.name == name) {
                return Err(raise_msg(
                    ExceptionKind::TypeError,
                    format!("{}() got an unexpected keyword argument '{}'", def.name, name),
                ));
            }
            if locals.get(&name).is_some() {
                return Err(raise_msg(
                    ExceptionKind::TypeError,
                    format!("{}() got multiple values for argument '{}'", def.name, name),
                ));
            }
            locals.set(name, value);
        }
        let first_default = params.len() - func.defaults.len();
        let mut missing = Vec::new();
        for (i, param) in params.iter().enumerate() {
            if locals.get(&param.name).is_some() {
                continue;
            }
            if i >= first_default {
                locals.set(param.name.clone(), func.defaults[i - first_default].clone());
            } else {
                missing.push(param.name.clone());
            }
        }
        if !missing.is_empty() {
            return Err(raise_msg(
                ExceptionKind::TypeError,
                format!(
                    "{}() missing {} required positional argument{}: {}",
                    def.name,
                    missing.len(),
                    plural(missing.len()),
                    quoted_list(&missing)
                ),
            ));
        }

        let mut frame = Frame {
            file: func.file.clone(),
            code_name: Rc::from(def.name.as_str()),
            activation: self.new_activation(),
            globals: func.globals.clone(),
            locals: Some(locals),
            scope: Some(func.scope.clone()),
            line: def.line,
            traced: false,
            handling: Vec::new(),
        };
        self.run_frame(&mut frame, &def.body)
    }
}
