use crate::script::ast::FunctionDef;
use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::{BTreeMap, HashSet},
    fmt::Write,
    path::{Path, PathBuf},
    rc::Rc,
};

/// Built-in exception classes. User code cannot define new ones.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ExceptionKind {
    BaseException,
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    KeyError,
    KeyboardInterrupt,
    LookupError,
    ModuleNotFoundError,
    NameError,
    OverflowError,
    RecursionError,
    RuntimeError,
    SyntaxError,
    TypeError,
    UnboundLocalError,
    ValueError,
    ZeroDivisionError,
}

use ExceptionKind::*;

pub const ALL_EXCEPTION_KINDS: [ExceptionKind; 20] = [
    BaseException,
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    ImportError,
    IndexError,
    KeyError,
    KeyboardInterrupt,
    LookupError,
    ModuleNotFoundError,
    NameError,
    OverflowError,
    RecursionError,
    RuntimeError,
    SyntaxError,
    TypeError,
    UnboundLocalError,
    ValueError,
    ZeroDivisionError,
];

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        match self {
            BaseException => "BaseException",
            Exception => "Exception",
            ArithmeticError => "ArithmeticError",
            AssertionError => "AssertionError",
            AttributeError => "AttributeError",
            ImportError => "ImportError",
            IndexError => "IndexError",
            KeyError => "KeyError",
            KeyboardInterrupt => "KeyboardInterrupt",
            LookupError => "LookupError",
            ModuleNotFoundError => "ModuleNotFoundError",
            NameError => "NameError",
            OverflowError => "OverflowError",
            RecursionError => "RecursionError",
            RuntimeError => "RuntimeError",
            SyntaxError => "SyntaxError",
            TypeError => "TypeError",
            UnboundLocalError => "UnboundLocalError",
            ValueError => "ValueError",
            ZeroDivisionError => "ZeroDivisionError",
        }
    }

    pub fn parent(self) -> Option<ExceptionKind> {
        match self {
            BaseException => None,
            Exception | KeyboardInterrupt => Some(BaseException),
            ModuleNotFoundError => Some(ImportError),
            KeyError | IndexError => Some(LookupError),
            OverflowError | ZeroDivisionError => Some(ArithmeticError),
            RecursionError => Some(RuntimeError),
            UnboundLocalError => Some(NameError),
            _ => Some(Exception),
        }
    }

    pub fn is_subclass_of(self, other: ExceptionKind) -> bool {
        let mut k = Some(self);
        while let Some(kind) = k {
            if kind == other {
                return true;
            }
            k = kind.parent();
        }
        false
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TracebackEntry {
    pub file: Rc<Path>,
    pub line: u32,
    pub name: Rc<str>,
}

#[derive(Debug)]
pub struct ExceptionObject {
    pub kind: ExceptionKind,
    pub args: Vec<Value>,
    /// Outermost frame first, like a Python traceback.
    pub traceback: RefCell<Vec<TracebackEntry>>,
    /// Activation that most recently recorded a traceback entry.
    pub noted_in: Cell<Option<u64>>,
}

impl ExceptionObject {
    pub fn new(kind: ExceptionKind, args: Vec<Value>) -> ExceptionObject {
        ExceptionObject {
            kind,
            args,
            traceback: RefCell::new(Vec::new()),
            noted_in: Cell::new(None),
        }
    }

    pub fn message(&self) -> String {
        match self.args.len() {
            0 => String::new(),
            1 if self.kind == KeyError => self.args[0].repr(),
            1 => self.args[0].to_str(),
            _ => Value::tuple(self.args.clone()).repr(),
        }
    }
}

/// Globals of a module or locals of a call.
#[derive(Debug, Default)]
pub struct Namespace {
    vars: RefCell<BTreeMap<String, Value>>,
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set<S: Into<String>>(&self, name: S, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    /// A point-in-time copy of the bindings.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.vars
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug)]
pub struct ModuleObject {
    pub name: String,
    /// None for built-in modules and namespace packages.
    pub file: Option<PathBuf>,
    pub globals: Rc<Namespace>,
}

/// Names a function body binds locally, and the ones it declares `global`.
#[derive(Debug, Default)]
pub struct FunctionScope {
    pub assigned: HashSet<String>,
    pub declared_global: HashSet<String>,
}

#[derive(Debug)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// One value per trailing parameter that has a default.
    pub defaults: Vec<Value>,
    pub globals: Rc<Namespace>,
    pub file: Rc<Path>,
    pub scope: Rc<FunctionScope>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Str,
    Repr,
    Int,
    Float,
    Bool,
    List,
    Tuple,
    Dict,
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Enumerate,
    Zip,
    Round,
    MathSqrt,
    MathFloor,
    MathCeil,
}

pub const GLOBAL_BUILTINS: [Builtin; 19] = [
    Builtin::Print,
    Builtin::Len,
    Builtin::Range,
    Builtin::Str,
    Builtin::Repr,
    Builtin::Int,
    Builtin::Float,
    Builtin::Bool,
    Builtin::List,
    Builtin::Tuple,
    Builtin::Dict,
    Builtin::Abs,
    Builtin::Min,
    Builtin::Max,
    Builtin::Sum,
    Builtin::Sorted,
    Builtin::Enumerate,
    Builtin::Zip,
    Builtin::Round,
];

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Repr => "repr",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Sorted => "sorted",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Round => "round",
            Builtin::MathSqrt => "sqrt",
            Builtin::MathFloor => "floor",
            Builtin::MathCeil => "ceil",
        }
    }

    /// Builtins that are classes in Python rather than plain functions.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Builtin::Range
                | Builtin::Str
                | Builtin::Int
                | Builtin::Float
                | Builtin::Bool
                | Builtin::List
                | Builtin::Tuple
                | Builtin::Dict
                | Builtin::Enumerate
                | Builtin::Zip
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Method {
    Append,
    Pop,
    Extend,
    Insert,
    Get,
    Keys,
    Values,
    Items,
    Upper,
    Lower,
    Strip,
    Split,
    Join,
    Replace,
    Startswith,
    Endswith,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Append => "append",
            Method::Pop => "pop",
            Method::Extend => "extend",
            Method::Insert => "insert",
            Method::Get => "get",
            Method::Keys => "keys",
            Method::Values => "values",
            Method::Items => "items",
            Method::Upper => "upper",
            Method::Lower => "lower",
            Method::Strip => "strip",
            Method::Split => "split",
            Method::Join => "join",
            Method::Replace => "replace",
            Method::Startswith => "startswith",
            Method::Endswith => "endswith",
        }
    }

    /// Look up `attr` on a receiver of the given type.
    pub fn lookup(receiver: &Value, attr: &str) -> Option<Method> {
        let m = match (receiver, attr) {
            (Value::List(_), "append") => Method::Append,
            (Value::List(_), "pop") | (Value::Dict(_), "pop") => Method::Pop,
            (Value::List(_), "extend") => Method::Extend,
            (Value::List(_), "insert") => Method::Insert,
            (Value::Dict(_), "get") => Method::Get,
            (Value::Dict(_), "keys") => Method::Keys,
            (Value::Dict(_), "values") => Method::Values,
            (Value::Dict(_), "items") => Method::Items,
            (Value::Str(_), "upper") => Method::Upper,
            (Value::Str(_), "lower") => Method::Lower,
            (Value::Str(_), "strip") => Method::Strip,
            (Value::Str(_), "split") => Method::Split,
            (Value::Str(_), "join") => Method::Join,
            (Value::Str(_), "replace") => Method::Replace,
            (Value::Str(_), "startswith") => Method::Startswith,
            (Value::Str(_), "endswith") => Method::Endswith,
            _ => return None,
        };
        Some(m)
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Method,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> i64 {
        if self.step > 0 && self.start < self.stop {
            (self.stop - self.start - 1) / self.step + 1
        } else if self.step < 0 && self.start > self.stop {
            (self.start - self.stop - 1) / (-self.step) + 1
        } else {
            0
        }
    }

    pub fn get(&self, i: i64) -> i64 {
        self.start + i * self.step
    }
}

/// Insertion-ordered mapping. Keys are compared with Python equality.
#[derive(Debug, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Dict {
        Dict::default()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.py_eq(key))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries[i].1.clone())
    }

    pub fn set(&mut self, key: Value, value: Value) {
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Range(RangeValue),
    Function(Rc<Function>),
    Builtin(Builtin),
    BoundMethod(Rc<BoundMethod>),
    Module(Rc<ModuleObject>),
    ExceptionType(ExceptionKind),
    Exception(Rc<ExceptionObject>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(Rc::from(s))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

/// Python's float repr: shortest round-trip digits, always with a `.` or an
/// exponent, switching to exponent form outside [1e-4, 1e16).
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let abs = f.abs();
    if abs != 0.0 && (abs >= 1e16 || abs < 1e-4) {
        let s = format!("{:e}", f);
        match s.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().unwrap_or(0);
                format!(
                    "{}e{}{:02}",
                    mantissa,
                    if exp < 0 { '-' } else { '+' },
                    exp.abs()
                )
            }
            None => s,
        }
    } else {
        let s = format!("{}", f);
        if s.contains('.') {
            s
        } else {
            format!("{}.0", s)
        }
    }
}

fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                write!(out, "\\x{:02x}", c as u32).unwrap_or(());
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(d: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(d)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(b) if b.is_type() => "type",
            Value::Builtin(_) | Value::BoundMethod(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::ExceptionType(_) => "type",
            Value::Exception(e) => e.kind.name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => d.borrow().len() != 0,
            Value::Range(r) => r.len() != 0,
            _ => true,
        }
    }

    pub fn is_hashable(&self) -> bool {
        match self {
            Value::List(_) | Value::Dict(_) => false,
            Value::Tuple(items) => items.iter().all(|v| v.is_hashable()),
            _ => true,
        }
    }

    /// Numeric view used for mixed int/float/bool arithmetic and comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// `str(value)`
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message(),
            _ => self.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    fn write_repr(&self, out: &mut String, seen: &mut Vec<*const ()>) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => write!(out, "{}", i).unwrap_or(()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&repr_str(s)),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if seen.contains(&ptr) {
                    out.push_str("[...]");
                    return;
                }
                seen.push(ptr);
                out.push('[');
                for (i, v) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    v.write_repr(out, seen);
                }
                out.push(']');
                seen.pop();
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    v.write_repr(out, seen);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(d) => {
                let ptr = Rc::as_ptr(d) as *const ();
                if seen.contains(&ptr) {
                    out.push_str("{...}");
                    return;
                }
                seen.push(ptr);
                out.push('{');
                for (i, (k, v)) in d.borrow().entries().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, seen);
                    out.push_str(": ");
                    v.write_repr(out, seen);
                }
                out.push('}');
                seen.pop();
            }
            Value::Range(r) => {
                if r.step == 1 {
                    write!(out, "range({}, {})", r.start, r.stop).unwrap_or(())
                } else {
                    write!(out, "range({}, {}, {})", r.start, r.stop, r.step).unwrap_or(())
                }
            }
            Value::Function(f) => write!(out, "<function {}>", f.def.name).unwrap_or(()),
            Value::Builtin(b) if b.is_type() => write!(out, "<class '{}'>", b.name()).unwrap_or(()),
            Value::Builtin(b) => write!(out, "<built-in function {}>", b.name()).unwrap_or(()),
            Value::BoundMethod(m) => write!(
                out,
                "<built-in method {} of {} object>",
                m.method.name(),
                m.receiver.type_name()
            )
            .unwrap_or(()),
            Value::Module(m) => match &m.file {
                Some(file) => {
                    write!(out, "<module '{}' from '{}'>", m.name, file.display()).unwrap_or(())
                }
                None => write!(out, "<module '{}'>", m.name).unwrap_or(()),
            },
            Value::ExceptionType(k) => write!(out, "<class '{}'>", k.name()).unwrap_or(()),
            Value::Exception(e) => {
                out.push_str(e.kind.name());
                out.push('(');
                for (i, v) in e.args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    v.write_repr(out, seen);
                }
                out.push(')');
            }
        }
    }

    /// `==`
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a
                        .entries()
                        .iter()
                        .all(|(k, v)| b.get(k).map_or(false, |bv| bv.py_eq(v)))
            }
            (Value::Range(a), Value::Range(b)) => {
                let (la, lb) = (a.len(), b.len());
                la == lb && (la == 0 || (a.start == b.start && (la == 1 || a.step == b.step)))
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => match (a.as_int(), b.as_int()) {
                    (Some(i), Some(j)) => i == j,
                    _ => x == y,
                },
                _ => false,
            },
        }
    }

    /// `is`
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Float(_), Value::Float(_)) | (Value::Range(_), Value::Range(_)) => false,
            _ => self.py_eq(other),
        }
    }

    /// Ordering for `<` and friends, or None if the types don't compare.
    pub fn py_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b),
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(i), Some(j)) => Some(i.cmp(&j)),
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            },
        }
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if !x.py_eq(y) {
            return x.py_cmp(y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formatting_matches_python() {
        assert_eq!("1.0", format_float(1.0));
        assert_eq!("0.1", format_float(0.1));
        assert_eq!("-0.0", format_float(-0.0));
        assert_eq!("1e+16", format_float(1e16));
        assert_eq!("1.5e-05", format_float(1.5e-5));
        assert_eq!("inf", format_float(f64::INFINITY));
        assert_eq!("2.5", format_float(2.5));
    }

    #[test]
    fn repr_and_str() {
        let l = Value::list(vec![
            Value::Int(1),
            Value::from("a"),
            Value::tuple(vec![Value::None]),
            Value::Float(2.0),
        ]);
        assert_eq!("[1, 'a', (None,), 2.0]", l.repr());
        assert_eq!("it's", Value::from("it's").to_str());
        assert_eq!("\"it's\"", Value::from("it's").repr());
        assert_eq!("'a\\nb'", Value::from("a\nb").repr());
        assert_eq!("True", Value::Bool(true).to_str());
        let mut d = Dict::new();
        d.set(Value::from("k"), Value::Int(1));
        assert_eq!("{'k': 1}", Value::dict(d).repr());
    }

    #[test]
    fn cyclic_list_repr_terminates() {
        let l = Value::list(vec![Value::Int(1)]);
        if let Value::List(inner) = &l {
            inner.borrow_mut().push(l.clone());
        }
        assert_eq!("[1, [...]]", l.repr());
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(1).py_eq(&Value::from("1")));
        assert!(Value::tuple(vec![Value::Int(1)]).py_eq(&Value::tuple(vec![Value::Float(1.0)])));
    }

    #[test]
    fn ordering() {
        assert_eq!(Some(Ordering::Less), Value::Int(1).py_cmp(&Value::Float(1.5)));
        assert_eq!(
            Some(Ordering::Greater),
            Value::list(vec![Value::Int(2)]).py_cmp(&Value::list(vec![Value::Int(1), Value::Int(9)]))
        );
        assert_eq!(None, Value::Int(1).py_cmp(&Value::from("a")));
    }

    #[test]
    fn exception_hierarchy() {
        assert!(KeyError.is_subclass_of(LookupError));
        assert!(KeyError.is_subclass_of(Exception));
        assert!(!KeyboardInterrupt.is_subclass_of(Exception));
        assert!(KeyboardInterrupt.is_subclass_of(BaseException));
        assert!(RecursionError.is_subclass_of(RuntimeError));
    }

    #[test]
    fn key_error_message_uses_repr() {
        let e = ExceptionObject::new(KeyError, vec![Value::from("missing")]);
        assert_eq!("'missing'", e.message());
        let e = ExceptionObject::new(ValueError, vec![Value::from("bad")]);
        assert_eq!("bad", e.message());
    }

    #[test]
    fn range_length() {
        assert_eq!(3, RangeValue { start: 0, stop: 3, step: 1 }.len());
        assert_eq!(2, RangeValue { start: 0, stop: 3, step: 2 }.len());
        assert_eq!(3, RangeValue { start: 5, stop: 2, step: -1 }.len());
        assert_eq!(0, RangeValue { start: 3, stop: 0, step: 1 }.len());
    }

    #[test]
    fn dict_keeps_insertion_order() {
        let mut d = Dict::new();
        d.set(Value::from("b"), Value::Int(1));
        d.set(Value::from("a"), Value::Int(2));
        d.set(Value::from("b"), Value::Int(3));
        let keys: Vec<String> = d.entries().iter().map(|(k, _)| k.to_str()).collect();
        assert_eq!(vec!["b", "a"], keys);
        assert_eq!(Some(3), d.get(&Value::from("b")).and_then(|v| v.as_int()));
    }
}
