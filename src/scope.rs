//! Scope snapshots and the minimal diff between two of them.

use crate::script::value::{format_float, Dict, Namespace, Value};
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Map, Number, Serializer, Value as Json};
use std::collections::{BTreeMap, HashSet};

/// Identifier → deep copy of the value bound at the instant the snapshot was
/// taken.
pub type ScopeSnapshot = BTreeMap<String, Value>;

/// Identifier → new value (or [`DELETED`]) for bindings that differ,
/// rendered for display.
pub type ChangeSet = BTreeMap<String, Json>;

pub const DELETED: &str = "<deleted>";

/// Containers nested deeper than this are shared rather than copied, compared
/// by identity, and render as their fallback token.
const MAX_DEPTH: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScopeFilter {
    KeepAll,
    /// Drop `__dunder__` names before diffing.
    HideDunders,
}

impl Default for ScopeFilter {
    fn default() -> Self {
        ScopeFilter::KeepAll
    }
}

impl ScopeFilter {
    pub fn apply(self, scope: ScopeSnapshot) -> ScopeSnapshot {
        match self {
            ScopeFilter::KeepAll => scope,
            ScopeFilter::HideDunders => filter_scope(scope),
        }
    }
}

pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__")
}

pub fn filter_scope(scope: ScopeSnapshot) -> ScopeSnapshot {
    scope.into_iter().filter(|(k, _)| !is_reserved(k)).collect()
}

fn deep_copy_at(v: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return v.clone();
    }
    match v {
        Value::List(items) => Value::list(
            items
                .borrow()
                .iter()
                .map(|item| deep_copy_at(item, depth + 1))
                .collect(),
        ),
        Value::Tuple(items) => Value::tuple(
            items
                .iter()
                .map(|item| deep_copy_at(item, depth + 1))
                .collect(),
        ),
        Value::Dict(d) => {
            let mut copy = Dict::new();
            for (k, item) in d.borrow().entries() {
                copy.set(deep_copy_at(k, depth + 1), deep_copy_at(item, depth + 1));
            }
            Value::dict(copy)
        }
        // Everything else is immutable from the program's point of view.
        _ => v.clone(),
    }
}

/// A copy of `v` that later mutation of `v` cannot reach.
pub fn deep_copy(v: &Value) -> Value {
    deep_copy_at(v, 0)
}

fn same_value_at(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return a.is_identical(b);
    }
    match (a, b) {
        // A NaN that stays NaN is not a change.
        (Value::Float(x), Value::Float(y)) if x.is_nan() && y.is_nan() => true,
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            same_items(&x, &y, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => same_items(x, y, depth),
        (Value::Dict(x), Value::Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.entries().iter().all(|(k, v)| {
                    y.get(k)
                        .map_or(false, |other| same_value_at(v, &other, depth + 1))
                })
        }
        _ => a.py_eq(b),
    }
}

fn same_items(a: &[Value], b: &[Value], depth: usize) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| same_value_at(x, y, depth + 1))
}

/// `a == b` as the program would see it, except that self-referencing
/// containers terminate.
pub fn same_value(a: &Value, b: &Value) -> bool {
    same_value_at(a, b, 0)
}

fn fallback(v: &Value) -> Json {
    Json::String(format!("<{}>", v.type_name()))
}

/// Object key for a dict key, in the manner of `json.dumps`.
fn dict_key(k: &Value) -> String {
    match k {
        Value::Str(s) => s.to_string(),
        Value::None => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        other => other.repr(),
    }
}

fn dict_to_json(d: &Dict, depth: usize) -> Json {
    let keys: Vec<String> = d.entries().iter().map(|(k, _)| dict_key(k)).collect();
    let distinct = keys.iter().collect::<HashSet<_>>().len() == keys.len();
    if distinct {
        let mut m = Map::new();
        for (key, (_, item)) in keys.into_iter().zip(d.entries()) {
            m.insert(key, to_json_at(item, depth + 1));
        }
        return Json::Object(m);
    }
    // `{1: 'a', '1': 'b'}` has no object rendering that keeps both entries.
    Json::Array(
        d.entries()
            .iter()
            .map(|(k, item)| {
                Json::Array(vec![to_json_at(k, depth + 1), to_json_at(item, depth + 1)])
            })
            .collect(),
    )
}

fn to_json_at(v: &Value, depth: usize) -> Json {
    if depth > MAX_DEPTH {
        return fallback(v);
    }
    match v {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map_or_else(|| fallback(v), Json::Number),
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(|item| to_json_at(item, depth + 1))
                .collect(),
        ),
        Value::Tuple(items) => {
            Json::Array(items.iter().map(|item| to_json_at(item, depth + 1)).collect())
        }
        Value::Dict(d) => dict_to_json(&d.borrow(), depth),
        _ => fallback(v),
    }
}

/// Deep rendering of an engine value. Values with no JSON shape become
/// `"<TypeName>"`.
pub fn to_json(v: &Value) -> Json {
    to_json_at(v, 0)
}

pub fn snapshot(ns: &Namespace) -> ScopeSnapshot {
    ns.entries()
        .into_iter()
        .map(|(k, v)| (k, deep_copy(&v)))
        .collect()
}

/// A whole snapshot rendered for display.
pub fn render(scope: &ScopeSnapshot) -> BTreeMap<String, Json> {
    scope.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()
}

/// Keys whose value differs between `old` and `new`; keys missing from `new`
/// map to [`DELETED`].
pub fn diff_scope(old: &ScopeSnapshot, new: &ScopeSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for (k, v) in new {
        let unchanged = old.get(k).map_or(false, |before| same_value(before, v));
        if !unchanged {
            changes.insert(k.clone(), to_json(v));
        }
    }
    for k in old.keys() {
        if !new.contains_key(k) {
            changes.insert(k.clone(), Json::String(DELETED.to_owned()));
        }
    }
    changes
}

/// JSON with a 4-space indent.
pub fn pretty<T: Serialize + ?Sized>(v: &T) -> String {
    let mut out = Vec::new();
    let mut ser = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    match v.serialize(&mut ser) {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(e) => format!("<unrepresentable: {}>", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Builtin;
    use serde_json::json;

    fn scope(pairs: &[(&str, Value)]) -> ScopeSnapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn changes(pairs: &[(&str, Json)]) -> ChangeSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn int_list(items: &[i64]) -> Value {
        Value::list(items.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn diff_reports_changed_added_and_deleted() {
        let a = scope(&[
            ("x", Value::Int(1)),
            ("y", Value::from("s")),
            ("z", int_list(&[1])),
        ]);
        let b = scope(&[("x", Value::Int(2)), ("z", int_list(&[1])), ("w", Value::None)]);
        assert_eq!(
            changes(&[("x", json!(2)), ("y", json!(DELETED)), ("w", json!(null))]),
            diff_scope(&a, &b)
        );
        // Not symmetric.
        let back = diff_scope(&b, &a);
        assert_eq!(Some(&json!(DELETED)), back.get("w"));
        assert_eq!(Some(&json!("s")), back.get("y"));
    }

    #[test]
    fn diff_with_self_is_empty() {
        let mut d = Dict::new();
        d.set(Value::from("k"), int_list(&[1, 2]));
        let a = scope(&[("x", Value::dict(d)), ("__name__", Value::from("__main__"))]);
        assert!(diff_scope(&a, &a).is_empty());
        assert!(diff_scope(&ScopeSnapshot::new(), &ScopeSnapshot::new()).is_empty());
    }

    #[test]
    fn numeric_equality_is_not_a_change() {
        let one = scope(&[("x", Value::Int(1))]);
        let float = scope(&[("x", Value::Float(1.0))]);
        let truth = scope(&[("x", Value::Bool(true))]);
        assert!(diff_scope(&one, &float).is_empty());
        assert!(diff_scope(&float, &truth).is_empty());
        let nan = scope(&[("x", Value::Float(f64::NAN))]);
        assert!(diff_scope(&nan, &nan).is_empty());
        assert_eq!(
            changes(&[("x", json!(2))]),
            diff_scope(&one, &scope(&[("x", Value::Int(2))]))
        );
    }

    #[test]
    fn values_without_json_shape_are_still_compared() {
        let ns = Namespace::new();
        ns.set("f", Value::Builtin(Builtin::Len));
        let before = snapshot(&ns);
        ns.set("f", Value::Builtin(Builtin::Abs));
        let after = snapshot(&ns);
        // Same rendering, different value.
        assert_eq!(to_json(&before["f"]), to_json(&after["f"]));
        assert_eq!(
            changes(&[("f", json!("<builtin_function_or_method>"))]),
            diff_scope(&before, &after)
        );
        assert!(diff_scope(&after, &snapshot(&ns)).is_empty());
    }

    #[test]
    fn snapshots_are_deep_copies() {
        let ns = Namespace::new();
        let list = int_list(&[1]);
        ns.set("l", Value::tuple(vec![list.clone()]));
        let before = snapshot(&ns);
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        let after = snapshot(&ns);
        assert_eq!(changes(&[("l", json!([[1, 2]]))]), diff_scope(&before, &after));
        assert_eq!(json!([[1]]), to_json(&before["l"]));
    }

    #[test]
    fn fallback_tokens() {
        assert_eq!(
            json!("<builtin_function_or_method>"),
            to_json(&Value::Builtin(Builtin::Len))
        );
        assert_eq!(json!("<float>"), to_json(&Value::Float(f64::NAN)));
        assert_eq!(json!(1.5), to_json(&Value::Float(1.5)));
        let mut d = Dict::new();
        d.set(Value::Int(1), Value::tuple(vec![Value::None, Value::Bool(true)]));
        assert_eq!(json!({"1": [null, true]}), to_json(&Value::dict(d)));
    }

    #[test]
    fn colliding_dict_keys_keep_every_entry() {
        let mut d = Dict::new();
        d.set(Value::Int(1), Value::from("a"));
        d.set(Value::from("1"), Value::from("b"));
        assert_eq!(json!([[1, "a"], ["1", "b"]]), to_json(&Value::dict(d)));
    }

    fn cyclic_list() -> Value {
        let l = Value::list(Vec::new());
        if let Value::List(items) = &l {
            items.borrow_mut().push(l.clone());
        }
        l
    }

    #[test]
    fn cyclic_list_terminates() {
        let l = cyclic_list();
        let mut depth = 0;
        let mut cur = to_json(&l);
        loop {
            match cur {
                Json::Array(mut items) => {
                    depth += 1;
                    cur = items.pop().unwrap();
                }
                other => {
                    assert_eq!(json!("<list>"), other);
                    break;
                }
            }
        }
        assert_eq!(MAX_DEPTH + 1, depth);

        let copy = deep_copy(&l);
        assert!(same_value(&l, &copy));
        assert!(!same_value(&copy, &cyclic_list()));
    }

    #[test]
    fn scope_filter_policies() {
        let a = scope(&[("__name__", Value::from("__main__")), ("x", Value::Int(1))]);
        let names = |s: &ScopeSnapshot| s.keys().cloned().collect::<Vec<_>>();
        assert_eq!(vec!["__name__", "x"], names(&ScopeFilter::KeepAll.apply(a.clone())));
        assert_eq!(vec!["x"], names(&ScopeFilter::HideDunders.apply(a)));
        assert!(is_reserved("__file__"));
        assert!(!is_reserved("_private"));
    }

    #[test]
    fn pretty_uses_four_spaces() {
        let x = scope(&[("x", Value::Int(1))]);
        assert_eq!("{\n    \"x\": 1\n}", pretty(&render(&x)));
        assert_eq!("{}", pretty(&render(&ScopeSnapshot::new())));
    }
}
