//! The shared value model.
//!
//! Both execution backends operate on `Value`; formatting, truthiness,
//! arithmetic, comparison and member access live here so output parity
//! between backends is structural rather than accidental.
//!
//! The `Undefined` variant is the built-in undefined sentinel: it formats as
//! the empty string, propagates through attribute access without failing,
//! and is falsy. Policies may substitute any other `Value` for undefined
//! lookups through `Config::undefined_variable`.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{RuntimeError, RuntimeResult};
use crate::loops::LoopRef;

/// Name→value mapping used throughout the runtime.
pub type ValueMap = FxHashMap<String, Value>;

/// A native callable exposed to templates.
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    func: Rc<dyn Fn(&[Value]) -> RuntimeResult<Value>>,
}

impl NativeFunction {
    pub fn new(name: &str, func: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static) -> Self {
        NativeFunction {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: &[Value]) -> RuntimeResult<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    Map(Rc<ValueMap>),
    Function(NativeFunction),
    /// Shared handle to a live loop context.
    Loop(LoopRef),
    /// Undefined sentinel carrying the name it stands in for.
    Undefined(Rc<str>),
}

impl Value {
    pub fn int(v: i64) -> Self {
        Value::Int(v)
    }

    pub fn float(v: f64) -> Self {
        Value::Float(v)
    }

    pub fn str(v: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(v.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn map(entries: ValueMap) -> Self {
        Value::Map(Rc::new(entries))
    }

    pub fn function(name: &str, func: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static) -> Self {
        Value::Function(NativeFunction::new(name, func))
    }

    pub fn undefined(name: &str) -> Self {
        Value::Undefined(Rc::from(name))
    }

    /// The value's type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Loop(_) => "loop",
            Value::Undefined(_) => "undefined",
        }
    }

    /// Truthiness: empty, zero, none and undefined are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None | Value::Undefined(_) => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Function(_) | Value::Loop(_) => true,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined(_))
    }

    /// Materialize the value into an iterator, failing with `NotIterable`
    /// for scalar values. Map iteration yields keys in sorted order so both
    /// backends observe the same sequence.
    pub fn try_iter(&self) -> RuntimeResult<ValueIter> {
        match self {
            Value::List(items) | Value::Tuple(items) => Ok(ValueIter::shared(items.clone())),
            Value::Str(s) => Ok(ValueIter::from_values(
                s.chars().map(|c| Value::str(c.to_string())).collect(),
            )),
            Value::Map(entries) => {
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                Ok(ValueIter::from_values(
                    keys.into_iter().map(Value::str).collect(),
                ))
            }
            other => Err(RuntimeError::NotIterable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Attribute access. Misses produce an undefined value, never an error;
    /// access on an undefined value propagates it unchanged.
    pub fn get_attr(&self, attr: &str) -> Value {
        match self {
            Value::Map(entries) => entries
                .get(attr)
                .cloned()
                .unwrap_or_else(|| Value::undefined(attr)),
            Value::Loop(state) => state
                .borrow_mut()
                .attr(attr)
                .unwrap_or_else(|| Value::undefined(attr)),
            Value::Undefined(hint) => Value::Undefined(hint.clone()),
            _ => Value::undefined(attr),
        }
    }

    /// Subscript access. Same lenient contract as `get_attr`.
    pub fn get_item(&self, index: &Value) -> Value {
        match (self, index) {
            (Value::List(items), Value::Int(i)) | (Value::Tuple(items), Value::Int(i)) => {
                seq_index(items, *i).unwrap_or_else(|| Value::undefined(&i.to_string()))
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as i64;
                let idx = if *i < 0 { i + len } else { *i };
                if (0..len).contains(&idx) {
                    Value::str(chars[idx as usize].to_string())
                } else {
                    Value::undefined(&i.to_string())
                }
            }
            (Value::Map(entries), Value::Str(key)) => entries
                .get(key.as_ref())
                .cloned()
                .unwrap_or_else(|| Value::undefined(key)),
            (Value::Undefined(hint), _) => Value::Undefined(hint.clone()),
            (_, Value::Str(key)) => self.get_attr(key),
            _ => Value::undefined(&index.to_string()),
        }
    }

    /// Invoke the value as a callable.
    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        match self {
            Value::Function(f) => f.invoke(args),
            Value::Loop(state) => state.borrow_mut().call(args),
            other => Err(RuntimeError::NotCallable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Membership: `needle in self`.
    pub fn contains(&self, needle: &Value) -> RuntimeResult<bool> {
        match (self, needle) {
            (Value::Str(hay), Value::Str(n)) => Ok(hay.contains(n.as_ref())),
            (Value::List(items), _) | (Value::Tuple(items), _) => {
                Ok(items.iter().any(|v| v == needle))
            }
            (Value::Map(entries), Value::Str(key)) => Ok(entries.contains_key(key.as_ref())),
            _ => Err(RuntimeError::NotIterable {
                type_name: self.type_name(),
            }),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn add(&self, other: &Value) -> RuntimeResult<Value> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            return Ok(Value::Int(a.wrapping_add(b)));
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return Ok(Value::Float(a + b));
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Ok(Value::str(s))
            }
            (Value::List(a), Value::List(b)) => {
                let mut items = a.as_ref().clone();
                items.extend(b.iter().cloned());
                Ok(Value::list(items))
            }
            _ => Err(binop_error("+", self, other)),
        }
    }

    pub fn sub(&self, other: &Value) -> RuntimeResult<Value> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            return Ok(Value::Int(a.wrapping_sub(b)));
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return Ok(Value::Float(a - b));
        }
        Err(binop_error("-", self, other))
    }

    pub fn mul(&self, other: &Value) -> RuntimeResult<Value> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            return Ok(Value::Int(a.wrapping_mul(b)));
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return Ok(Value::Float(a * b));
        }
        match (self, other) {
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                Ok(Value::str(s.repeat((*n).max(0) as usize)))
            }
            _ => Err(binop_error("*", self, other)),
        }
    }

    /// True division: always produces a float.
    pub fn div(&self, other: &Value) -> RuntimeResult<Value> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => {
                if b == 0.0 {
                    Err(RuntimeError::DivisionByZero)
                } else {
                    Ok(Value::Float(a / b))
                }
            }
            _ => Err(binop_error("/", self, other)),
        }
    }

    /// Floor division, rounding toward negative infinity.
    pub fn floordiv(&self, other: &Value) -> RuntimeResult<Value> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            let q = a.wrapping_div(b);
            let r = a.wrapping_rem(b);
            let q = if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q };
            return Ok(Value::Int(q));
        }
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => {
                if b == 0.0 {
                    Err(RuntimeError::DivisionByZero)
                } else {
                    Ok(Value::Float((a / b).floor()))
                }
            }
            _ => Err(binop_error("//", self, other)),
        }
    }

    /// Modulo with the divisor's sign, matching floor division.
    pub fn rem(&self, other: &Value) -> RuntimeResult<Value> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            let r = a.wrapping_rem(b);
            let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
            return Ok(Value::Int(r));
        }
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => {
                if b == 0.0 {
                    Err(RuntimeError::DivisionByZero)
                } else {
                    Ok(Value::Float(a - b * (a / b).floor()))
                }
            }
            _ => Err(binop_error("%", self, other)),
        }
    }

    pub fn pow(&self, other: &Value) -> RuntimeResult<Value> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            if b >= 0 {
                if let Ok(exp) = u32::try_from(b) {
                    if let Some(v) = a.checked_pow(exp) {
                        return Ok(Value::Int(v));
                    }
                }
            }
        }
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
            _ => Err(binop_error("**", self, other)),
        }
    }

    pub fn neg(&self) -> RuntimeResult<Value> {
        match self {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(-i64::from(*b))),
            other => Err(RuntimeError::unsupported(format!(
                "cannot negate `{}`",
                other.type_name()
            ))),
        }
    }

    pub fn pos(&self) -> RuntimeResult<Value> {
        match self {
            Value::Int(_) | Value::Float(_) => Ok(self.clone()),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            other => Err(RuntimeError::unsupported(format!(
                "cannot apply unary plus to `{}`",
                other.type_name()
            ))),
        }
    }

    /// Ordering comparison. `None` when the operand types have no ordering.
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn seq_index(items: &[Value], i: i64) -> Option<Value> {
    let len = items.len() as i64;
    let idx = if i < 0 { i + len } else { i };
    if (0..len).contains(&idx) {
        Some(items[idx as usize].clone())
    } else {
        None
    }
}

fn binop_error(op: &str, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::unsupported(format!(
        "unsupported operand types for `{op}`: `{}` and `{}`",
        left.type_name(),
        right.type_name()
    ))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.func, &b.func),
            (Value::Loop(a), Value::Loop(b)) => Rc::ptr_eq(a, b),
            (Value::Undefined(a), Value::Undefined(b)) => a == b,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => write!(f, "List({items:?})"),
            Value::Tuple(items) => write!(f, "Tuple({items:?})"),
            Value::Map(entries) => write!(f, "Map({entries:?})"),
            Value::Function(func) => write!(f, "{func:?}"),
            Value::Loop(_) => f.write_str("Loop(..)"),
            Value::Undefined(hint) => write!(f, "Undefined({hint:?})"),
        }
    }
}

/// Rendered form of a value, used for template output. `None` and undefined
/// render empty; integral floats keep one decimal place.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None | Value::Undefined(_) => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Map(entries) => {
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {}", entries[key])?;
                }
                f.write_str("}")
            }
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Loop(_) => f.write_str("<loop>"),
        }
    }
}

/// Iterator over a materialized or single-pass value sequence.
///
/// Sequences carry a known length; dynamic sources may not, which is what
/// forces the loop context's lookahead buffer.
pub struct ValueIter {
    repr: IterRepr,
}

enum IterRepr {
    Seq {
        items: Rc<Vec<Value>>,
        pos: usize,
    },
    Dyn {
        iter: Box<dyn Iterator<Item = Value>>,
        len: Option<usize>,
    },
}

impl ValueIter {
    /// Iterator over an owned sequence (known length).
    pub fn from_values(items: Vec<Value>) -> Self {
        ValueIter {
            repr: IterRepr::Seq {
                items: Rc::new(items),
                pos: 0,
            },
        }
    }

    /// Iterator over a shared sequence without copying it.
    pub fn shared(items: Rc<Vec<Value>>) -> Self {
        ValueIter {
            repr: IterRepr::Seq { items, pos: 0 },
        }
    }

    /// Iterator over a dynamic source; `len` is the remaining count if the
    /// source knows it.
    pub fn dynamic(iter: impl Iterator<Item = Value> + 'static, len: Option<usize>) -> Self {
        ValueIter {
            repr: IterRepr::Dyn {
                iter: Box::new(iter),
                len,
            },
        }
    }

    /// Remaining length, when known.
    pub fn known_len(&self) -> Option<usize> {
        match &self.repr {
            IterRepr::Seq { items, pos } => Some(items.len().saturating_sub(*pos)),
            IterRepr::Dyn { len, .. } => *len,
        }
    }
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match &mut self.repr {
            IterRepr::Seq { items, pos } => {
                let item = items.get(*pos).cloned();
                if item.is_some() {
                    *pos += 1;
                }
                item
            }
            IterRepr::Dyn { iter, len } => {
                let item = iter.next();
                if item.is_some() {
                    *len = len.map(|n| n.saturating_sub(1));
                }
                item
            }
        }
    }
}
