//! Built-in functions, methods and operators.

use crate::script::{
    ast::{BinOp, CmpOp, UnaryOp},
    interp::{raise, raise_msg, Exec, Interpreter, Unwind},
    value::{
        BoundMethod, Builtin, Dict, ExceptionKind, ExceptionObject, Method, ModuleObject,
        Namespace, RangeValue, Value, ALL_EXCEPTION_KINDS, GLOBAL_BUILTINS,
    },
};
use std::{cell::RefCell, cmp::Ordering, convert::TryFrom, rc::Rc};

use ExceptionKind::{
    AttributeError, IndexError, KeyError, OverflowError, TypeError, ValueError, ZeroDivisionError,
};

/// A subscript: `x[i]` or `x[lo:hi:step]`.
#[derive(Debug)]
pub enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

/// Iteration over a value. Lists are walked live so that appending while
/// looping behaves the way it does in Python.
pub enum Iter {
    List {
        items: Rc<RefCell<Vec<Value>>>,
        next: usize,
    },
    Items(std::vec::IntoIter<Value>),
    Range {
        range: RangeValue,
        next: i64,
    },
}

impl Iterator for Iter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Iter::List { items, next } => {
                let v = items.borrow().get(*next).cloned();
                *next += 1;
                v
            }
            Iter::Items(it) => it.next(),
            Iter::Range { range, next } => {
                if *next < range.len() {
                    let v = range.get(*next);
                    *next += 1;
                    Some(Value::Int(v))
                } else {
                    None
                }
            }
        }
    }
}

pub fn iter_of(v: &Value) -> Exec<Iter> {
    let it = match v {
        Value::List(items) => Iter::List {
            items: items.clone(),
            next: 0,
        },
        Value::Tuple(items) => Iter::Items(items.to_vec().into_iter()),
        Value::Str(s) => Iter::Items(
            s.chars()
                .map(|c| Value::from(c.to_string()))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Dict(d) => Iter::Items(
            d.borrow()
                .entries()
                .iter()
                .map(|(k, _)| k.clone())
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Range(r) => Iter::Range {
            range: *r,
            next: 0,
        },
        other => {
            return Err(raise_msg(
                TypeError,
                format!("'{}' object is not iterable", other.type_name()),
            ))
        }
    };
    Ok(it)
}

pub fn collect(v: &Value) -> Exec<Vec<Value>> {
    Ok(iter_of(v)?.collect())
}

/// Resolve a name that is neither local nor global.
pub fn lookup(name: &str) -> Option<Value> {
    if let Some(b) = GLOBAL_BUILTINS.iter().find(|b| b.name() == name) {
        return Some(Value::Builtin(*b));
    }
    ALL_EXCEPTION_KINDS
        .iter()
        .find(|k| k.name() == name)
        .map(|k| Value::ExceptionType(*k))
}

pub fn math_module() -> ModuleObject {
    let globals = Namespace::new();
    globals.set("__name__", Value::from("math"));
    globals.set("pi", Value::Float(std::f64::consts::PI));
    globals.set("e", Value::Float(std::f64::consts::E));
    globals.set("tau", Value::Float(std::f64::consts::TAU));
    globals.set("inf", Value::Float(f64::INFINITY));
    globals.set("nan", Value::Float(f64::NAN));
    globals.set("sqrt", Value::Builtin(Builtin::MathSqrt));
    globals.set("floor", Value::Builtin(Builtin::MathFloor));
    globals.set("ceil", Value::Builtin(Builtin::MathCeil));
    ModuleObject {
        name: "math".to_owned(),
        file: None,
        globals: Rc::new(globals),
    }
}

pub fn check_hashable(v: &Value) -> Exec<()> {
    if v.is_hashable() {
        Ok(())
    } else {
        Err(raise_msg(
            TypeError,
            format!("unhashable type: '{}'", v.type_name()),
        ))
    }
}

pub fn exception_matches(exc: &ExceptionObject, kind: &Value) -> Exec<bool> {
    match kind {
        Value::ExceptionType(k) => Ok(exc.kind.is_subclass_of(*k)),
        Value::Tuple(kinds) => {
            for k in kinds.iter() {
                if exception_matches(exc, k)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(raise_msg(
            TypeError,
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

pub fn get_attribute(v: &Value, attr: &str) -> Exec<Value> {
    match v {
        Value::Module(m) => m.globals.get(attr).ok_or_else(|| {
            raise_msg(
                AttributeError,
                format!("module '{}' has no attribute '{}'", m.name, attr),
            )
        }),
        Value::Exception(e) if attr == "args" => Ok(Value::tuple(e.args.clone())),
        _ => match Method::lookup(v, attr) {
            Some(method) => Ok(Value::BoundMethod(Rc::new(BoundMethod {
                receiver: v.clone(),
                method,
            }))),
            None => Err(raise_msg(
                AttributeError,
                format!("'{}' object has no attribute '{}'", v.type_name(), attr),
            )),
        },
    }
}

pub fn set_attribute(v: &Value, attr: &str, value: Value) -> Exec<()> {
    match v {
        Value::Module(m) => {
            m.globals.set(attr, value);
            Ok(())
        }
        _ => Err(raise_msg(
            AttributeError,
            format!("'{}' object has no attribute '{}'", v.type_name(), attr),
        )),
    }
}

fn int_pair(l: &Value, r: &Value) -> Option<(i64, i64)> {
    match (l, r) {
        (Value::Int(_), _) | (Value::Bool(_), _) => Some((l.as_int()?, r.as_int()?)),
        _ => None,
    }
}

fn float_pair(l: &Value, r: &Value) -> Option<(f64, f64)> {
    Some((l.as_f64()?, r.as_f64()?))
}

fn overflow() -> Unwind {
    raise_msg(OverflowError, "integer overflow")
}

fn unsupported(op: &str, l: &Value, r: &Value) -> Unwind {
    raise_msg(
        TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            l.type_name(),
            r.type_name()
        ),
    )
}

fn repeat(items: &[Value], n: i64) -> Vec<Value> {
    let mut out = Vec::new();
    for _ in 0..n.max(0) {
        out.extend_from_slice(items);
    }
    out
}

fn floor_div(a: i64, b: i64) -> Exec<i64> {
    if b == 0 {
        return Err(raise_msg(
            ZeroDivisionError,
            "integer division or modulo by zero",
        ));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn int_mod(a: i64, b: i64) -> Exec<i64> {
    if b == 0 {
        return Err(raise_msg(
            ZeroDivisionError,
            "integer division or modulo by zero",
        ));
    }
    let m = a.checked_rem(b).unwrap_or(0);
    if m != 0 && ((m < 0) != (b < 0)) {
        Ok(m + b)
    } else {
        Ok(m)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m != 0.0 && ((m < 0.0) != (b < 0.0)) {
        m + b
    } else {
        m
    }
}

pub fn binary_op(op: BinOp, l: &Value, r: &Value) -> Exec<Value> {
    if let Some((a, b)) = int_pair(l, r) {
        let v = match op {
            BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
            BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
            BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
            BinOp::Div => {
                if b == 0 {
                    return Err(raise_msg(ZeroDivisionError, "division by zero"));
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
            BinOp::FloorDiv => floor_div(a, b)?,
            BinOp::Mod => int_mod(a, b)?,
            BinOp::Pow => {
                if b < 0 {
                    return Ok(Value::Float((a as f64).powf(b as f64)));
                }
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                a.checked_pow(exp).ok_or_else(overflow)?
            }
        };
        return Ok(Value::Int(v));
    }
    if let Some((a, b)) = float_pair(l, r) {
        let v = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if b == 0.0 {
                    return Err(raise_msg(ZeroDivisionError, "float division by zero"));
                }
                a / b
            }
            BinOp::FloorDiv => {
                if b == 0.0 {
                    return Err(raise_msg(
                        ZeroDivisionError,
                        "float floor division by zero",
                    ));
                }
                (a / b).floor()
            }
            BinOp::Mod => {
                if b == 0.0 {
                    return Err(raise_msg(ZeroDivisionError, "float modulo"));
                }
                float_mod(a, b)
            }
            BinOp::Pow => {
                if a == 0.0 && b < 0.0 {
                    return Err(raise_msg(
                        ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                a.powf(b)
            }
        };
        return Ok(Value::Float(v));
    }

    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::from(s))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Add, Value::Str(_), _)
        | (BinOp::Add, Value::List(_), _)
        | (BinOp::Add, Value::Tuple(_), _) => Err(raise_msg(
            TypeError,
            format!(
                "can only concatenate {} (not \"{}\") to {}",
                l.type_name(),
                r.type_name(),
                l.type_name()
            ),
        )),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let count = n.as_int().unwrap_or(0).max(0) as usize;
            Ok(Value::from(s.repeat(count)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            Ok(Value::list(repeat(&items.borrow(), n.as_int().unwrap_or(0))))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if n.as_int().is_some() =>
        {
            Ok(Value::tuple(repeat(items, n.as_int().unwrap_or(0))))
        }
        _ => Err(unsupported(op.symbol(), l, r)),
    }
}

/// `target op= value`. Lists grow in place; everything else rebinds.
pub fn inplace_op(op: BinOp, current: &Value, rhs: &Value) -> Exec<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, current) {
        let extra = collect(rhs)?;
        items.borrow_mut().extend(extra);
        return Ok(current.clone());
    }
    binary_op(op, current, rhs)
}

pub fn unary_op(op: UnaryOp, v: &Value) -> Exec<Value> {
    match (op, v) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, Value::Int(_)) | (UnaryOp::Neg, Value::Bool(_)) => v
            .as_int()
            .and_then(|i| i.checked_neg())
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Pos, Value::Int(_)) | (UnaryOp::Pos, Value::Bool(_)) => {
            Ok(Value::Int(v.as_int().unwrap_or(0)))
        }
        (op, v) => Err(raise_msg(
            TypeError,
            format!(
                "bad operand type for unary {}: '{}'",
                if op == UnaryOp::Neg { "-" } else { "+" },
                v.type_name()
            ),
        )),
    }
}

pub fn contains(container: &Value, item: &Value) -> Exec<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => Err(raise_msg(
                TypeError,
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            )),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(d) => {
            check_hashable(item)?;
            Ok(d.borrow().contains(item))
        }
        Value::Range(r) => Ok(match item.as_int() {
            Some(i) => (0..r.len()).any(|n| r.get(n) == i),
            None => false,
        }),
        other => Err(raise_msg(
            TypeError,
            format!("argument of type '{}' is not iterable", other.type_name()),
        )),
    }
}

pub fn compare(op: CmpOp, l: &Value, r: &Value) -> Exec<bool> {
    let ordering = match op {
        CmpOp::Eq => return Ok(l.py_eq(r)),
        CmpOp::NotEq => return Ok(!l.py_eq(r)),
        CmpOp::Is => return Ok(l.is_identical(r)),
        CmpOp::IsNot => return Ok(!l.is_identical(r)),
        CmpOp::In => return contains(r, l),
        CmpOp::NotIn => return contains(r, l).map(|b| !b),
        _ => l.py_cmp(r),
    };
    let ordering = match ordering {
        Some(o) => o,
        // NaN compares false with everything.
        None if l.as_f64().is_some() && r.as_f64().is_some() => return Ok(false),
        None => {
            return Err(raise_msg(
                TypeError,
                format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    l.type_name(),
                    r.type_name()
                ),
            ))
        }
    };
    Ok(match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::LtE => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Python's slice clamping.
fn slice_indices(
    len: i64,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Exec<Vec<i64>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(raise_msg(ValueError, "slice step cannot be zero"));
    }
    let clamp = |v: Option<i64>, default: i64| match v {
        None => default,
        Some(v) => {
            let v = if v < 0 { v + len } else { v };
            if step > 0 {
                v.max(0).min(len)
            } else {
                v.max(-1).min(len - 1)
            }
        }
    };
    let (start, stop) = if step > 0 {
        (clamp(lower, 0), clamp(upper, len))
    } else {
        (clamp(lower, len - 1), clamp(upper, -1))
    };
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i);
        i += step;
    }
    Ok(out)
}

fn normalize_index(v: &Value, len: usize, what: &str) -> Exec<usize> {
    let i = match v.as_int() {
        Some(i) => i,
        None => {
            return Err(raise_msg(
                TypeError,
                format!(
                    "{} indices must be integers or slices, not {}",
                    what,
                    v.type_name()
                ),
            ))
        }
    };
    let len = len as i64;
    let j = if i < 0 { i + len } else { i };
    if j < 0 || j >= len {
        return Err(raise_msg(IndexError, format!("{} index out of range", what)));
    }
    Ok(j as usize)
}

fn key_error(key: &Value) -> Unwind {
    raise(KeyError, vec![key.clone()])
}

pub fn get_item(v: &Value, index: &Index) -> Exec<Value> {
    match (v, index) {
        (Value::List(items), Index::Item(i)) => {
            let items = items.borrow();
            Ok(items[normalize_index(i, items.len(), "list")?].clone())
        }
        (Value::List(items), Index::Slice(lo, hi, step)) => {
            let items = items.borrow();
            let picked = slice_indices(items.len() as i64, *lo, *hi, *step)?;
            Ok(Value::list(
                picked.into_iter().map(|i| items[i as usize].clone()).collect(),
            ))
        }
        (Value::Tuple(items), Index::Item(i)) => {
            Ok(items[normalize_index(i, items.len(), "tuple")?].clone())
        }
        (Value::Tuple(items), Index::Slice(lo, hi, step)) => {
            let picked = slice_indices(items.len() as i64, *lo, *hi, *step)?;
            Ok(Value::tuple(
                picked.into_iter().map(|i| items[i as usize].clone()).collect(),
            ))
        }
        (Value::Str(s), Index::Item(i)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::from(
                chars[normalize_index(i, chars.len(), "string")?].to_string(),
            ))
        }
        (Value::Str(s), Index::Slice(lo, hi, step)) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len() as i64, *lo, *hi, *step)?;
            Ok(Value::from(
                picked
                    .into_iter()
                    .map(|i| chars[i as usize])
                    .collect::<String>(),
            ))
        }
        (Value::Range(r), Index::Item(i)) => {
            let j = normalize_index(i, r.len() as usize, "range object")?;
            Ok(Value::Int(r.get(j as i64)))
        }
        (Value::Range(r), Index::Slice(lo, hi, step)) => {
            let picked = slice_indices(r.len(), *lo, *hi, *step)?;
            let step = r.step * step.unwrap_or(1);
            let start = picked.first().map_or(r.start, |&i| r.get(i));
            Ok(Value::Range(RangeValue {
                start,
                stop: start + picked.len() as i64 * step,
                step,
            }))
        }
        (Value::Dict(d), Index::Item(key)) => {
            check_hashable(key)?;
            d.borrow().get(key).ok_or_else(|| key_error(key))
        }
        (Value::Dict(_), Index::Slice(..)) => Err(raise_msg(TypeError, "unhashable type: 'slice'")),
        (other, _) => Err(raise_msg(
            TypeError,
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

pub fn set_item(container: &Value, index: Index, value: Value) -> Exec<()> {
    match (container, index) {
        (Value::List(items), Index::Item(i)) => {
            let mut items = items.borrow_mut();
            let j = normalize_index(&i, items.len(), "list")?;
            items[j] = value;
            Ok(())
        }
        (Value::List(items), Index::Slice(lo, hi, step)) => {
            let new_items = collect(&value)?;
            let mut items = items.borrow_mut();
            let picked = slice_indices(items.len() as i64, lo, hi, step)?;
            if step.unwrap_or(1) == 1 {
                let start = match (picked.first(), lo) {
                    (Some(&i), _) => i as usize,
                    (None, Some(lo)) => {
                        let len = items.len() as i64;
                        (if lo < 0 { lo + len } else { lo }).max(0).min(len) as usize
                    }
                    (None, None) => 0,
                };
                let end = start + picked.len();
                items.splice(start..end, new_items);
                return Ok(());
            }
            if picked.len() != new_items.len() {
                return Err(raise_msg(
                    ValueError,
                    format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        new_items.len(),
                        picked.len()
                    ),
                ));
            }
            for (i, v) in picked.into_iter().zip(new_items.into_iter()) {
                items[i as usize] = v;
            }
            Ok(())
        }
        (Value::Dict(d), Index::Item(key)) => {
            check_hashable(&key)?;
            d.borrow_mut().set(key, value);
            Ok(())
        }
        (other, _) => Err(raise_msg(
            TypeError,
            format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ),
        )),
    }
}

pub fn del_item(container: &Value, index: &Index) -> Exec<()> {
    match (container, index) {
        (Value::List(items), Index::Item(i)) => {
            let mut items = items.borrow_mut();
            let j = normalize_index(i, items.len(), "list")?;
            items.remove(j);
            Ok(())
        }
        (Value::List(items), Index::Slice(lo, hi, step)) => {
            let mut items = items.borrow_mut();
            let mut picked = slice_indices(items.len() as i64, *lo, *hi, *step)?;
            picked.sort_unstable();
            for i in picked.into_iter().rev() {
                items.remove(i as usize);
            }
            Ok(())
        }
        (Value::Dict(d), Index::Item(key)) => {
            check_hashable(key)?;
            d.borrow_mut()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| key_error(key))
        }
        (other, _) => Err(raise_msg(
            TypeError,
            format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ),
        )),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Exec<()> {
    let n = args.len();
    if n >= min && n <= max {
        return Ok(());
    }
    let message = if min == max {
        format!(
            "{}() takes exactly {} argument{} ({} given)",
            name,
            min,
            if min == 1 { "" } else { "s" },
            n
        )
    } else if n < min {
        format!("{} expected at least {} argument{}, got {}", name, min, if min == 1 { "" } else { "s" }, n)
    } else {
        format!("{} expected at most {} arguments, got {}", name, max, n)
    };
    Err(raise_msg(TypeError, message))
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> Exec<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(raise_msg(
            TypeError,
            format!("{}() takes no keyword arguments", name),
        ))
    }
}

/// Split `kwargs` into the values for `accepted` names, rejecting any other.
fn keyword_args(
    name: &str,
    kwargs: Vec<(String, Value)>,
    accepted: &[&str],
) -> Exec<Vec<Option<Value>>> {
    let mut out = vec![None; accepted.len()];
    for (k, v) in kwargs {
        match accepted.iter().position(|a| *a == k) {
            Some(i) => out[i] = Some(v),
            None => {
                return Err(raise_msg(
                    TypeError,
                    format!("'{}' is an invalid keyword argument for {}()", k, name),
                ))
            }
        }
    }
    Ok(out)
}

fn int_arg(v: &Value) -> Exec<i64> {
    v.as_int().ok_or_else(|| {
        raise_msg(
            TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                v.type_name()
            ),
        )
    })
}

fn str_arg(v: &Value) -> Exec<Rc<str>> {
    match v {
        Value::Str(s) => Ok(s.clone()),
        other => Err(raise_msg(
            TypeError,
            format!("must be str, not {}", other.type_name()),
        )),
    }
}

fn float_to_int(f: f64) -> Exec<i64> {
    if f.is_nan() {
        return Err(raise_msg(ValueError, "cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(raise_msg(
            OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    if f >= 9.223_372_036_854_775_807e18 || f < -9.223_372_036_854_775_808e18 {
        return Err(overflow());
    }
    Ok(f as i64)
}

fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

/// Orders two values for sorting, min and max.
fn order(a: &Value, b: &Value) -> Exec<Ordering> {
    match a.py_cmp(b) {
        Some(o) => Ok(o),
        None if a.as_f64().is_some() && b.as_f64().is_some() => Ok(Ordering::Equal),
        None => Err(raise_msg(
            TypeError,
            format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ),
        )),
    }
}

fn sort_keys(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<Value>,
) -> Exec<Vec<(Value, Value)>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = match &key {
            Some(f) if !f.is_none() => interp.call_value(f, vec![item.clone()], Vec::new())?,
            _ => item.clone(),
        };
        keyed.push((k, item));
    }
    Ok(keyed)
}

fn min_max(
    interp: &mut Interpreter<'_>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    wanted: Ordering,
) -> Exec<Value> {
    let mut kw = keyword_args(name, kwargs, &["key"])?;
    arity(name, &args, 1, usize::MAX)?;
    let items = if args.len() == 1 {
        collect(&args[0])?
    } else {
        args
    };
    let keyed = sort_keys(interp, items, kw[0].take())?;
    let mut best: Option<(Value, Value)> = None;
    for (k, v) in keyed {
        best = match best {
            None => Some((k, v)),
            Some((bk, bv)) => {
                if order(&k, &bk)? == wanted {
                    Some((k, v))
                } else {
                    Some((bk, bv))
                }
            }
        };
    }
    best.map(|(_, v)| v).ok_or_else(|| {
        raise_msg(
            ValueError,
            format!("{}() arg is an empty sequence", name),
        )
    })
}

/// Call a built-in function.
pub fn call(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Print => {
            let kw = keyword_args(name, kwargs, &["sep", "end"])?;
            let text_of = |v: &Option<Value>, default: &str| -> Exec<String> {
                match v {
                    None | Some(Value::None) => Ok(default.to_owned()),
                    Some(Value::Str(s)) => Ok(s.to_string()),
                    Some(other) => Err(raise_msg(
                        TypeError,
                        format!("sep must be None or a string, not {}", other.type_name()),
                    )),
                }
            };
            let sep = text_of(&kw[0], " ")?;
            let end = text_of(&kw[1], "\n")?;
            let line: Vec<String> = args.iter().map(|v| v.to_str()).collect();
            let out = interp.output();
            write!(out, "{}{}", line.join(&sep), end).unwrap_or(());
            out.flush().unwrap_or(());
            Ok(Value::None)
        }
        Builtin::Len => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(d) => d.borrow().len(),
                Value::Range(r) => r.len() as usize,
                other => {
                    return Err(raise_msg(
                        TypeError,
                        format!("object of type '{}' has no len()", other.type_name()),
                    ))
                }
            };
            Ok(Value::Int(n as i64))
        }
        Builtin::Range => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(int_arg).collect::<Exec<Vec<i64>>>()?;
            let (start, stop, step) = match ints.len() {
                1 => (0, ints[0], 1),
                2 => (ints[0], ints[1], 1),
                _ => (ints[0], ints[1], ints[2]),
            };
            if step == 0 {
                return Err(raise_msg(ValueError, "range() arg 3 must not be zero"));
            }
            Ok(Value::Range(RangeValue { start, stop, step }))
        }
        Builtin::Str => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            Ok(Value::from(args.get(0).map_or_else(String::new, |v| v.to_str())))
        }
        Builtin::Repr => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            Ok(Value::from(args[0].repr()))
        }
        Builtin::Int => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 2)?;
            let base = match args.get(1) {
                Some(b) => Some(int_arg(b)?),
                None => None,
            };
            match (args.get(0), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => {
                    let base = base.unwrap_or(10);
                    if base < 2 || base > 36 {
                        return Err(raise_msg(
                            ValueError,
                            "int() base must be >= 2 and <= 36, or 0",
                        ));
                    }
                    let digits = s.trim().replace('_', "");
                    i64::from_str_radix(&digits, base as u32)
                        .map(Value::Int)
                        .map_err(|_| {
                            raise_msg(
                                ValueError,
                                format!(
                                    "invalid literal for int() with base {}: {}",
                                    base,
                                    Value::Str(s.clone()).repr()
                                ),
                            )
                        })
                }
                (Some(_), Some(_)) => Err(raise_msg(
                    TypeError,
                    "int() can't convert non-string with explicit base",
                )),
                (Some(Value::Float(f)), None) => Ok(Value::Int(float_to_int(*f)?)),
                (Some(v), None) => v.as_int().map(Value::Int).ok_or_else(|| {
                    raise_msg(
                        TypeError,
                        format!(
                            "int() argument must be a string or a number, not '{}'",
                            v.type_name()
                        ),
                    )
                }),
            }
        }
        Builtin::Float => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            match args.get(0) {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => s
                    .trim()
                    .replace('_', "")
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| {
                        raise_msg(
                            ValueError,
                            format!(
                                "could not convert string to float: {}",
                                Value::Str(s.clone()).repr()
                            ),
                        )
                    }),
                Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
                    raise_msg(
                        TypeError,
                        format!(
                            "float() argument must be a string or a number, not '{}'",
                            v.type_name()
                        ),
                    )
                }),
            }
        }
        Builtin::Bool => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.get(0).map_or(false, |v| v.truthy())))
        }
        Builtin::List => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            match args.get(0) {
                None => Ok(Value::list(Vec::new())),
                Some(v) => Ok(Value::list(collect(v)?)),
            }
        }
        Builtin::Tuple => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 0, 1)?;
            match args.get(0) {
                None => Ok(Value::tuple(Vec::new())),
                Some(Value::Tuple(t)) => Ok(Value::Tuple(t.clone())),
                Some(v) => Ok(Value::tuple(collect(v)?)),
            }
        }
        Builtin::Dict => {
            arity(name, &args, 0, 1)?;
            let mut d = Dict::new();
            match args.get(0) {
                None => (),
                Some(Value::Dict(src)) => {
                    for (k, v) in src.borrow().entries() {
                        d.set(k.clone(), v.clone());
                    }
                }
                Some(v) => {
                    for (i, pair) in collect(v)?.into_iter().enumerate() {
                        let kv = collect(&pair)?;
                        if kv.len() != 2 {
                            return Err(raise_msg(
                                ValueError,
                                format!(
                                    "dictionary update sequence element #{} has length {}; 2 is required",
                                    i,
                                    kv.len()
                                ),
                            ));
                        }
                        check_hashable(&kv[0])?;
                        d.set(kv[0].clone(), kv[1].clone());
                    }
                }
            }
            for (k, v) in kwargs {
                d.set(Value::from(k), v);
            }
            Ok(Value::dict(d))
        }
        Builtin::Abs => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v => match v.as_int() {
                    Some(i) => i.checked_abs().map(Value::Int).ok_or_else(overflow),
                    None => Err(raise_msg(
                        TypeError,
                        format!("bad operand type for abs(): '{}'", v.type_name()),
                    )),
                },
            }
        }
        Builtin::Min => min_max(interp, name, args, kwargs, Ordering::Less),
        Builtin::Max => min_max(interp, name, args, kwargs, Ordering::Greater),
        Builtin::Sum => {
            let kw = keyword_args(name, kwargs, &["start"])?;
            arity(name, &args, 1, 2)?;
            let start = args
                .get(1)
                .cloned()
                .or_else(|| kw[0].clone())
                .unwrap_or(Value::Int(0));
            if let Value::Str(_) = start {
                return Err(raise_msg(
                    TypeError,
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            let mut total = start;
            for v in iter_of(&args[0])? {
                total = binary_op(BinOp::Add, &total, &v)?;
            }
            Ok(total)
        }
        Builtin::Sorted => {
            let mut kw = keyword_args(name, kwargs, &["key", "reverse"])?;
            arity(name, &args, 1, 1)?;
            let reverse = kw[1].as_ref().map_or(false, |v| v.truthy());
            let items = collect(&args[0])?;
            let mut keyed = sort_keys(interp, items, kw[0].take())?;
            let mut failure = None;
            keyed.sort_by(|a, b| {
                let (x, y) = if reverse { (&b.0, &a.0) } else { (&a.0, &b.0) };
                match order(x, y) {
                    Ok(o) => o,
                    Err(e) => {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    }
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            Ok(Value::list(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        Builtin::Enumerate => {
            let kw = keyword_args(name, kwargs, &["start"])?;
            arity(name, &args, 1, 2)?;
            let mut n = match args.get(1).or_else(|| kw[0].as_ref()) {
                Some(v) => int_arg(v)?,
                None => 0,
            };
            let mut out = Vec::new();
            for v in iter_of(&args[0])? {
                out.push(Value::tuple(vec![Value::Int(n), v]));
                n += 1;
            }
            Ok(Value::list(out))
        }
        Builtin::Zip => {
            no_kwargs(name, &kwargs)?;
            let columns = args.iter().map(collect).collect::<Exec<Vec<_>>>()?;
            let len = columns.iter().map(|c| c.len()).min().unwrap_or(0);
            let rows = (0..len)
                .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                .collect();
            Ok(Value::list(rows))
        }
        Builtin::Round => {
            let kw = keyword_args(name, kwargs, &["ndigits"])?;
            arity(name, &args, 1, 2)?;
            let ndigits = args.get(1).cloned().or_else(|| kw[0].clone());
            let x = &args[0];
            match (x, ndigits) {
                (Value::Float(f), None) | (Value::Float(f), Some(Value::None)) => {
                    Ok(Value::Int(float_to_int(round_half_even(*f))?))
                }
                (Value::Float(f), Some(n)) => {
                    let scale = 10f64.powi(int_arg(&n)? as i32);
                    Ok(Value::Float(round_half_even(f * scale) / scale))
                }
                (v, _) => v.as_int().map(Value::Int).ok_or_else(|| {
                    raise_msg(
                        TypeError,
                        format!(
                            "type {} doesn't define __round__ method",
                            v.type_name()
                        ),
                    )
                }),
            }
        }
        Builtin::MathSqrt => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            let x = args[0].as_f64().ok_or_else(|| {
                raise_msg(
                    TypeError,
                    format!("must be real number, not {}", args[0].type_name()),
                )
            })?;
            if x < 0.0 {
                return Err(raise_msg(ValueError, "math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        Builtin::MathFloor | Builtin::MathCeil => {
            no_kwargs(name, &kwargs)?;
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => {
                    let r = if builtin == Builtin::MathFloor {
                        f.floor()
                    } else {
                        f.ceil()
                    };
                    Ok(Value::Int(float_to_int(r)?))
                }
                v => v.as_int().map(Value::Int).ok_or_else(|| {
                    raise_msg(
                        TypeError,
                        format!("must be real number, not {}", v.type_name()),
                    )
                }),
            }
        }
    }
}

fn prefix_matches(s: &str, prefix: &Value, at_start: bool) -> Exec<bool> {
    let candidates = match prefix {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    for c in candidates {
        let c = str_arg(&c)?;
        let hit = if at_start {
            s.starts_with(&*c)
        } else {
            s.ends_with(&*c)
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Call a method bound to a list, dict or str.
pub fn call_method(
    bound: &BoundMethod,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<Value> {
    let name = bound.method.name();
    no_kwargs(name, &kwargs)?;
    match (&bound.receiver, bound.method) {
        (Value::List(items), Method::Append) => {
            arity(name, &args, 1, 1)?;
            items.borrow_mut().push(args[0].clone());
            Ok(Value::None)
        }
        (Value::List(items), Method::Extend) => {
            arity(name, &args, 1, 1)?;
            let extra = collect(&args[0])?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        (Value::List(items), Method::Insert) => {
            arity(name, &args, 2, 2)?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let i = int_arg(&args[0])?;
            let i = if i < 0 { i + len } else { i };
            items.insert(i.max(0).min(len) as usize, args[1].clone());
            Ok(Value::None)
        }
        (Value::List(items), Method::Pop) => {
            arity(name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(raise_msg(IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let i = match args.get(0) {
                Some(v) => int_arg(v)?,
                None => -1,
            };
            let j = if i < 0 { i + len } else { i };
            if j < 0 || j >= len {
                return Err(raise_msg(IndexError, "pop index out of range"));
            }
            Ok(items.remove(j as usize))
        }
        (Value::Dict(d), Method::Pop) => {
            arity(name, &args, 1, 2)?;
            check_hashable(&args[0])?;
            match d.borrow_mut().remove(&args[0]) {
                Some(v) => Ok(v),
                None => args.get(1).cloned().ok_or_else(|| key_error(&args[0])),
            }
        }
        (Value::Dict(d), Method::Get) => {
            arity(name, &args, 1, 2)?;
            check_hashable(&args[0])?;
            Ok(d
                .borrow()
                .get(&args[0])
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::None))
        }
        (Value::Dict(d), Method::Keys) | (Value::Dict(d), Method::Values) | (Value::Dict(d), Method::Items) => {
            arity(name, &args, 0, 0)?;
            let d = d.borrow();
            let out = d
                .entries()
                .iter()
                .map(|(k, v)| match bound.method {
                    Method::Keys => k.clone(),
                    Method::Values => v.clone(),
                    _ => Value::tuple(vec![k.clone(), v.clone()]),
                })
                .collect();
            Ok(Value::list(out))
        }
        (Value::Str(s), Method::Upper) => {
            arity(name, &args, 0, 0)?;
            Ok(Value::from(s.to_uppercase()))
        }
        (Value::Str(s), Method::Lower) => {
            arity(name, &args, 0, 0)?;
            Ok(Value::from(s.to_lowercase()))
        }
        (Value::Str(s), Method::Strip) => {
            arity(name, &args, 0, 1)?;
            match args.get(0) {
                None | Some(Value::None) => Ok(Value::from(s.trim())),
                Some(chars) => {
                    let chars = str_arg(chars)?;
                    Ok(Value::from(s.trim_matches(|c: char| chars.contains(c))))
                }
            }
        }
        (Value::Str(s), Method::Split) => {
            arity(name, &args, 0, 1)?;
            let parts: Vec<Value> = match args.get(0) {
                None | Some(Value::None) => s.split_whitespace().map(Value::from).collect(),
                Some(sep) => {
                    let sep = str_arg(sep)?;
                    if sep.is_empty() {
                        return Err(raise_msg(ValueError, "empty separator"));
                    }
                    s.split(&*sep).map(Value::from).collect()
                }
            };
            Ok(Value::list(parts))
        }
        (Value::Str(s), Method::Join) => {
            arity(name, &args, 1, 1)?;
            let mut pieces = Vec::new();
            for (i, v) in iter_of(&args[0])?.enumerate() {
                match v {
                    Value::Str(p) => pieces.push(p.to_string()),
                    other => {
                        return Err(raise_msg(
                            TypeError,
                            format!(
                                "sequence item {}: expected str instance, {} found",
                                i,
                                other.type_name()
                            ),
                        ))
                    }
                }
            }
            Ok(Value::from(pieces.join(&**s)))
        }
        (Value::Str(s), Method::Replace) => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(&args[0])?;
            let new = str_arg(&args[1])?;
            let count = match args.get(2) {
                Some(c) => int_arg(c)?,
                None => -1,
            };
            if count >= 0 {
                Ok(Value::from(s.replacen(&*old, &new, count as usize)))
            } else {
                Ok(Value::from(s.replace(&*old, &new)))
            }
        }
        (Value::Str(s), Method::Startswith) => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(prefix_matches(s, &args[0], true)?))
        }
        (Value::Str(s), Method::Endswith) => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(prefix_matches(s, &args[0], false)?))
        }
        (receiver, method) => Err(raise_msg(
            AttributeError,
            format!(
                "'{}' object has no attribute '{}'",
                receiver.type_name(),
                method.name()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io, path::Path};

    fn err_kind(r: Exec<Value>) -> (ExceptionKind, String) {
        match r {
            Err(Unwind::Raise(e)) => (e.kind, e.message()),
            other => panic!("expected an exception, got {:?}", other),
        }
    }

    fn ints(v: &Value) -> Vec<i64> {
        collect(v).unwrap().iter().map(|v| v.as_int().unwrap()).collect()
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        let div = |a, b| binary_op(BinOp::FloorDiv, &Value::Int(a), &Value::Int(b)).unwrap();
        let rem = |a, b| binary_op(BinOp::Mod, &Value::Int(a), &Value::Int(b)).unwrap();
        assert_eq!(Some(-4), div(-7, 2).as_int());
        assert_eq!(Some(-4), div(7, -2).as_int());
        assert_eq!(Some(1), rem(-7, 2).as_int());
        assert_eq!(Some(-1), rem(7, -2).as_int());
        let f = binary_op(BinOp::Mod, &Value::Float(-1.0), &Value::Float(3.0)).unwrap();
        assert_eq!(Some(2.0), f.as_f64());
    }

    #[test]
    fn division_by_zero_messages() {
        assert_eq!(
            (ZeroDivisionError, "division by zero".to_owned()),
            err_kind(binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)))
        );
        assert_eq!(
            (ZeroDivisionError, "integer division or modulo by zero".to_owned()),
            err_kind(binary_op(BinOp::Mod, &Value::Int(1), &Value::Int(0)))
        );
        assert_eq!(
            (ZeroDivisionError, "float division by zero".to_owned()),
            err_kind(binary_op(BinOp::Div, &Value::Float(1.0), &Value::Int(0)))
        );
    }

    #[test]
    fn integer_overflow_is_an_exception() {
        let (kind, _) = err_kind(binary_op(
            BinOp::Mul,
            &Value::Int(i64::MAX),
            &Value::Int(2),
        ));
        assert_eq!(OverflowError, kind);
        let (kind, _) = err_kind(binary_op(BinOp::Pow, &Value::Int(10), &Value::Int(40)));
        assert_eq!(OverflowError, kind);
    }

    #[test]
    fn mixed_type_errors() {
        let (kind, msg) = err_kind(binary_op(BinOp::Add, &Value::Int(1), &Value::from("a")));
        assert_eq!(TypeError, kind);
        assert_eq!("unsupported operand type(s) for +: 'int' and 'str'", msg);
        let (_, msg) = err_kind(binary_op(BinOp::Add, &Value::from("a"), &Value::Int(1)));
        assert_eq!("can only concatenate str (not \"int\") to str", msg);
        match compare(CmpOp::Lt, &Value::Int(1), &Value::from("a")) {
            Err(Unwind::Raise(e)) => assert_eq!(
                "'<' not supported between instances of 'int' and 'str'",
                e.message()
            ),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
    }

    #[test]
    fn slicing() {
        let l = Value::list((0..6).map(Value::Int).collect());
        let s = |lo, hi, step| get_item(&l, &Index::Slice(lo, hi, step)).unwrap();
        assert_eq!(vec![1, 2], ints(&s(Some(1), Some(3), None)));
        assert_eq!(vec![5, 4, 3, 2, 1, 0], ints(&s(None, None, Some(-1))));
        assert_eq!(vec![4, 5], ints(&s(Some(-2), None, None)));
        assert_eq!(vec![0, 2, 4], ints(&s(None, None, Some(2))));
        assert!(ints(&s(Some(10), Some(20), None)).is_empty());
        let r = Value::Range(RangeValue {
            start: 0,
            stop: 10,
            step: 1,
        });
        assert_eq!(
            vec![8, 6],
            ints(&get_item(&r, &Index::Slice(Some(-2), Some(5), Some(-2))).unwrap())
        );
    }

    #[test]
    fn slice_assignment_and_deletion() {
        let l = Value::list((0..5).map(Value::Int).collect());
        set_item(
            &l,
            Index::Slice(Some(1), Some(3), None),
            Value::list(vec![Value::Int(9)]),
        )
        .unwrap();
        assert_eq!(vec![0, 9, 3, 4], ints(&l));
        del_item(&l, &Index::Slice(None, None, Some(2))).unwrap();
        assert_eq!(vec![9, 4], ints(&l));
        let (kind, msg) = err_kind(get_item(&l, &Index::Item(Value::Int(5))));
        assert_eq!((IndexError, "list index out of range".to_owned()), (kind, msg));
    }

    #[test]
    fn dict_lookup_failures() {
        let d = Value::dict(Dict::new());
        assert_eq!(
            (KeyError, "'k'".to_owned()),
            err_kind(get_item(&d, &Index::Item(Value::from("k"))))
        );
        let (kind, msg) = err_kind(get_item(&d, &Index::Item(Value::list(Vec::new()))));
        assert_eq!((TypeError, "unhashable type: 'list'".to_owned()), (kind, msg));
    }

    #[test]
    fn builtins_with_keywords() {
        let mut interp = Interpreter::with_output(Path::new("/"), Box::new(io::sink()));
        let words = Value::list(vec![Value::from("ccc"), Value::from("a"), Value::from("bb")]);
        let sorted = call(
            &mut interp,
            Builtin::Sorted,
            vec![words.clone()],
            vec![
                ("key".to_owned(), Value::Builtin(Builtin::Len)),
                ("reverse".to_owned(), Value::Bool(true)),
            ],
        )
        .unwrap();
        assert_eq!("['ccc', 'bb', 'a']", sorted.repr());
        let shortest = call(
            &mut interp,
            Builtin::Min,
            vec![words],
            vec![("key".to_owned(), Value::Builtin(Builtin::Len))],
        )
        .unwrap();
        assert_eq!("a", shortest.to_str());
        let (kind, _) = err_kind(call(
            &mut interp,
            Builtin::Sorted,
            vec![Value::list(vec![Value::Int(1), Value::from("x")])],
            Vec::new(),
        ));
        assert_eq!(TypeError, kind);
    }

    #[test]
    fn conversions() {
        let mut interp = Interpreter::with_output(Path::new("/"), Box::new(io::sink()));
        let mut one = |b, v: Value| call(&mut interp, b, vec![v], Vec::new());
        assert_eq!(Some(-3), one(Builtin::Int, Value::Float(-3.9)).unwrap().as_int());
        assert_eq!(Some(42), one(Builtin::Int, Value::from(" 42 ")).unwrap().as_int());
        assert_eq!(
            (
                ValueError,
                "invalid literal for int() with base 10: 'x'".to_owned()
            ),
            err_kind(one(Builtin::Int, Value::from("x")))
        );
        assert_eq!(Some(2), one(Builtin::Round, Value::Float(2.5)).unwrap().as_int());
        assert_eq!(Some(4), one(Builtin::Round, Value::Float(3.5)).unwrap().as_int());
        assert_eq!(Some(3), one(Builtin::Len, Value::from("héé")).unwrap().as_int());
    }

    #[test]
    fn string_methods() {
        let m = |recv: &str, method: Method, args: Vec<Value>| {
            call_method(
                &BoundMethod {
                    receiver: Value::from(recv),
                    method,
                },
                args,
                Vec::new(),
            )
            .unwrap()
        };
        assert_eq!("['a', 'b', '']", m("a,b,", Method::Split, vec![Value::from(",")]).repr());
        assert_eq!("['x', 'y']", m("  x \t y ", Method::Split, Vec::new()).repr());
        assert_eq!(
            "1-2",
            m(
                "-",
                Method::Join,
                vec![Value::list(vec![Value::from("1"), Value::from("2")])]
            )
            .to_str()
        );
        assert!(m(
            "main.py",
            Method::Endswith,
            vec![Value::tuple(vec![Value::from(".txt"), Value::from(".py")])]
        )
        .truthy());
    }

    #[test]
    fn list_iteration_is_live() {
        let l = Value::list(vec![Value::Int(1)]);
        let mut it = iter_of(&l).unwrap();
        assert_eq!(Some(1), it.next().and_then(|v| v.as_int()));
        if let Value::List(items) = &l {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(Some(2), it.next().and_then(|v| v.as_int()));
        assert!(it.next().is_none());
    }
}
