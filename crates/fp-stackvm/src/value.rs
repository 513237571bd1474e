use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use fp_bytecode::{CodeObject, Const};

use crate::builtins::Builtin;
use crate::error::{Exception, ExceptionKind};
use crate::methods::Method;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type CellRef = Rc<RefCell<Value>>;

/// A runtime value. Mutable containers are shared by reference.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Slice(Rc<Slice>),
    Range(Range),
    Iterator(Rc<RefCell<IterState>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    BoundMethod(Rc<BoundMethod>),
    Cell(CellRef),
    Instance(Rc<Instance>),
    Exception(Rc<Exception>),
    ExceptionType(ExceptionKind),
    Code(Arc<CodeObject>),
    /// Contents of a local or cell that has not been assigned yet.
    Unbound,
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: Set) -> Self {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn iterator(state: IterState) -> Self {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    pub fn new_cell(value: Value) -> CellRef {
        Rc::new(RefCell::new(value))
    }

    pub fn from_const(constant: &Const) -> Self {
        match constant {
            Const::None => Value::None,
            Const::Bool(value) => Value::Bool(*value),
            Const::Int(value) => Value::Int(*value),
            Const::Float(value) => Value::Float(*value),
            Const::Str(value) => Value::str(value),
            Const::Tuple(items) => Value::tuple(items.iter().map(Value::from_const).collect()),
            Const::Code(code) => Value::Code(code.clone()),
        }
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
            Value::Set(_) => "set",
            Value::Slice(_) => "slice",
            Value::Range(_) => "xrange",
            Value::Iterator(_) => "iterator",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::BoundMethod(_) => "builtin_function_or_method",
            Value::Cell(_) => "cell",
            Value::Instance(_) => "namespace",
            Value::Exception(exception) => exception.kind.name(),
            Value::ExceptionType(_) => "type",
            Value::Code(_) => "code",
            Value::Unbound => "unbound",
        }
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self, Value::Unbound)
    }

    /// Identity comparison used by `is`. Immutable scalars compare by value.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Code(a), Value::Code(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(value) => Some(f64::from(u8::from(*value))),
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(value) => Some(i64::from(*value)),
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Structural equality as `==` sees it: numbers compare across int, float and bool.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (left, right) => match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => left.is_same(right),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::object::repr(self))
    }
}

/// Insertion-ordered mapping keyed by value equality.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Dict) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|found| found == value))
    }
}

/// Insertion-ordered set keyed by value equality.
#[derive(Debug, Clone, Default)]
pub struct Set {
    items: Vec<Value>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.iter().any(|item| item == value)
    }

    pub fn insert(&mut self, value: Value) {
        if !self.contains(&value) {
            self.items.push(value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Set) -> bool {
        self.len() == other.len() && self.items.iter().all(|item| other.contains(item))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            self.stop.saturating_sub(self.start)
        } else {
            self.start.saturating_sub(self.stop)
        };
        if span <= 0 {
            return 0;
        }
        let step = self.step.unsigned_abs();
        ((span.unsigned_abs() + step - 1) / step) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value - self.start) % self.step == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        Some(self.start + self.step * index as i64)
    }
}

#[derive(Debug)]
pub struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

/// Cursor state behind an iterator value.
#[derive(Debug)]
pub enum IterState {
    /// Live view over a list; sees appends made during iteration.
    List { list: ListRef, index: usize },
    /// Snapshot of a tuple, string, dict or set.
    Items { items: Vec<Value>, index: usize },
    Range { next: i64, stop: i64, step: i64 },
    Enumerate { inner: Value, count: i64 },
    Exhausted,
}

/// A user-defined function: code plus the environment it closes over.
pub struct Function {
    pub name: String,
    pub code: Arc<CodeObject>,
    pub globals: Globals,
    pub defaults: Vec<Value>,
    pub closure: Vec<CellRef>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Method,
}

/// A plain attribute namespace.
#[derive(Debug, Default)]
pub struct Instance {
    pub attrs: RefCell<Vec<(String, Value)>>,
}

impl Instance {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs
            .borrow()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    pub fn set(&self, name: &str, value: Value) {
        let mut attrs = self.attrs.borrow_mut();
        match attrs.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut attrs = self.attrs.borrow_mut();
        let before = attrs.len();
        attrs.retain(|(key, _)| key != name);
        attrs.len() != before
    }
}

/// Module-level name bindings shared by every function defined in the module.
#[derive(Clone, Default)]
pub struct Globals(Rc<RefCell<HashMap<String, Value>>>);

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.0.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let globals = self.0.borrow();
        let mut names: Vec<_> = globals.keys().collect();
        names.sort();
        f.debug_set().entries(names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::Int(1), Value::str("1"));
    }

    #[test]
    fn range_length_and_membership() {
        let range = Range {
            start: 10,
            stop: 0,
            step: -3,
        };
        assert_eq!(range.len(), 4);
        assert_eq!(range.get(3), Some(1));
        assert!(range.contains(4));
        assert!(!range.contains(5));
    }

    #[test]
    fn dict_keeps_insertion_order() {
        let mut dict = Dict::new();
        dict.insert(Value::str("b"), Value::Int(1));
        dict.insert(Value::str("a"), Value::Int(2));
        dict.insert(Value::str("b"), Value::Int(3));
        let keys: Vec<_> = dict.keys().cloned().collect();
        assert_eq!(keys, vec![Value::str("b"), Value::str("a")]);
        assert_eq!(dict.get(&Value::str("b")), Some(&Value::Int(3)));
    }
}
