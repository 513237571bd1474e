//! The narrow object-model interface both engines issue their operations against.
//!
//! Every function here either completes or fails without side effects on its operands, except
//! for the documented in-place mutations (`set_item`, `inplace` on lists, `list_append`).

use std::rc::Rc;

use fp_bytecode::{CompareOp, Opcode};
use itertools::Itertools;
use strum::{FromRepr, IntoStaticStr};

use crate::builtins::call_builtin;
use crate::error::{Exception, ExceptionKind, VmError};
use crate::methods::{call_method, Method};
use crate::raise;
use crate::value::{Dict, IterState, Set, Slice, Value};
use crate::FunctionRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum BinaryOp {
    #[strum(serialize = "**")]
    Power,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Modulo,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "//")]
    FloorDivide,
    #[strum(serialize = "/")]
    TrueDivide,
    #[strum(serialize = "<<")]
    Lshift,
    #[strum(serialize = ">>")]
    Rshift,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "^")]
    Xor,
    #[strum(serialize = "|")]
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        self.into()
    }

    pub fn from_arg(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(Self::from_repr)
    }

    /// Maps `BINARY_*`/`INPLACE_*` opcodes to their operator; the flag is set for the in-place
    /// forms.
    pub fn from_opcode(opcode: Opcode) -> Option<(Self, bool)> {
        let mapped = match opcode {
            Opcode::BinaryPower => (BinaryOp::Power, false),
            Opcode::BinaryMultiply => (BinaryOp::Multiply, false),
            Opcode::BinaryDivide => (BinaryOp::Divide, false),
            Opcode::BinaryModulo => (BinaryOp::Modulo, false),
            Opcode::BinaryAdd => (BinaryOp::Add, false),
            Opcode::BinarySubtract => (BinaryOp::Subtract, false),
            Opcode::BinaryFloorDivide => (BinaryOp::FloorDivide, false),
            Opcode::BinaryTrueDivide => (BinaryOp::TrueDivide, false),
            Opcode::BinaryLshift => (BinaryOp::Lshift, false),
            Opcode::BinaryRshift => (BinaryOp::Rshift, false),
            Opcode::BinaryAnd => (BinaryOp::And, false),
            Opcode::BinaryXor => (BinaryOp::Xor, false),
            Opcode::BinaryOr => (BinaryOp::Or, false),
            Opcode::InplacePower => (BinaryOp::Power, true),
            Opcode::InplaceMultiply => (BinaryOp::Multiply, true),
            Opcode::InplaceDivide => (BinaryOp::Divide, true),
            Opcode::InplaceModulo => (BinaryOp::Modulo, true),
            Opcode::InplaceAdd => (BinaryOp::Add, true),
            Opcode::InplaceSubtract => (BinaryOp::Subtract, true),
            Opcode::InplaceFloorDivide => (BinaryOp::FloorDivide, true),
            Opcode::InplaceTrueDivide => (BinaryOp::TrueDivide, true),
            Opcode::InplaceLshift => (BinaryOp::Lshift, true),
            Opcode::InplaceRshift => (BinaryOp::Rshift, true),
            Opcode::InplaceAnd => (BinaryOp::And, true),
            Opcode::InplaceXor => (BinaryOp::Xor, true),
            Opcode::InplaceOr => (BinaryOp::Or, true),
            _ => return None,
        };
        Some(mapped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum UnaryOp {
    #[strum(serialize = "+")]
    Positive,
    #[strum(serialize = "-")]
    Negative,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "repr")]
    Convert,
    #[strum(serialize = "~")]
    Invert,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        self.into()
    }

    pub fn from_arg(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(Self::from_repr)
    }

    pub fn from_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::UnaryPositive => Some(UnaryOp::Positive),
            Opcode::UnaryNegative => Some(UnaryOp::Negative),
            Opcode::UnaryNot => Some(UnaryOp::Not),
            Opcode::UnaryConvert => Some(UnaryOp::Convert),
            Opcode::UnaryInvert => Some(UnaryOp::Invert),
            _ => None,
        }
    }
}

fn overflow() -> VmError {
    VmError::exception(ExceptionKind::OverflowError, "integer overflow")
}

fn unsupported_operands(op: BinaryOp, left: &Value, right: &Value) -> VmError {
    VmError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::None | Value::Unbound => false,
        Value::Bool(value) => *value,
        Value::Int(value) => *value != 0,
        Value::Float(value) => *value != 0.0,
        Value::Str(text) => !text.is_empty(),
        Value::List(items) => !items.borrow().is_empty(),
        Value::Tuple(items) => !items.is_empty(),
        Value::Dict(dict) => !dict.borrow().is_empty(),
        Value::Set(set) => !set.borrow().is_empty(),
        Value::Range(range) => !range.is_empty(),
        _ => true,
    }
}

fn floor_div_int(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        raise!(ZeroDivisionError, "integer division or modulo by zero");
    }
    let quotient = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

fn modulo_int(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        raise!(ZeroDivisionError, "integer division or modulo by zero");
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}

/// Integer arithmetic with overflow and division checks; `None` when the operator has no
/// integer meaning for these operands.
pub fn int_binary(op: BinaryOp, a: i64, b: i64) -> Result<Option<Value>, VmError> {
    let value = match op {
        BinaryOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinaryOp::Subtract => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinaryOp::Multiply => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinaryOp::Divide | BinaryOp::FloorDivide => Value::Int(floor_div_int(a, b)?),
        BinaryOp::Modulo => Value::Int(modulo_int(a, b)?),
        BinaryOp::TrueDivide => {
            if b == 0 {
                raise!(ZeroDivisionError, "division by zero");
            }
            Value::Float(a as f64 / b as f64)
        }
        BinaryOp::Power => {
            if b < 0 {
                if a == 0 {
                    raise!(ZeroDivisionError, "0.0 cannot be raised to a negative power");
                }
                Value::Float((a as f64).powf(b as f64))
            } else {
                let exponent = u32::try_from(b).map_err(|_| overflow())?;
                Value::Int(a.checked_pow(exponent).ok_or_else(overflow)?)
            }
        }
        BinaryOp::Lshift => {
            if b < 0 {
                raise!(ValueError, "negative shift count");
            }
            if a == 0 {
                Value::Int(0)
            } else if b >= 64 {
                return Err(overflow());
            } else {
                let shifted = i128::from(a) << b;
                Value::Int(i64::try_from(shifted).map_err(|_| overflow())?)
            }
        }
        BinaryOp::Rshift => {
            if b < 0 {
                raise!(ValueError, "negative shift count");
            }
            Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinaryOp::And => Value::Int(a & b),
        BinaryOp::Xor => Value::Int(a ^ b),
        BinaryOp::Or => Value::Int(a | b),
    };
    Ok(Some(value))
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Result<Option<Value>, VmError> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide | BinaryOp::TrueDivide => {
            if b == 0.0 {
                raise!(ZeroDivisionError, "float division by zero");
            }
            a / b
        }
        BinaryOp::FloorDivide => {
            if b == 0.0 {
                raise!(ZeroDivisionError, "float divmod()");
            }
            (a / b).floor()
        }
        BinaryOp::Modulo => {
            if b == 0.0 {
                raise!(ZeroDivisionError, "float modulo");
            }
            let remainder = a % b;
            if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
                remainder + b
            } else {
                remainder
            }
        }
        BinaryOp::Power => {
            if a == 0.0 && b < 0.0 {
                raise!(ZeroDivisionError, "0.0 cannot be raised to a negative power");
            }
            a.powf(b)
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

fn repeat<T: Clone>(items: &[T], count: i64) -> Vec<T> {
    if count <= 0 {
        return Vec::new();
    }
    let mut repeated = Vec::with_capacity(items.len() * count as usize);
    for _ in 0..count {
        repeated.extend_from_slice(items);
    }
    repeated
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, VmError> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        if let Some(value) = int_binary(op, *a, *b)? {
            return Ok(value);
        }
    }
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        match op {
            BinaryOp::And => return Ok(Value::Bool(a & b)),
            BinaryOp::Or => return Ok(Value::Bool(a | b)),
            BinaryOp::Xor => return Ok(Value::Bool(a ^ b)),
            _ => {}
        }
    }
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if let Some(value) = int_binary(op, a, b)? {
            return Ok(value);
        }
    }
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        if let Some(value) = float_binary(op, a, b)? {
            return Ok(value);
        }
        return Err(unsupported_operands(op, left, right));
    }
    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinaryOp::Multiply, Value::Str(text), count) | (BinaryOp::Multiply, count, Value::Str(text))
            if count.as_i64().is_some() =>
        {
            let count = count.as_i64().unwrap_or(0);
            Ok(Value::str(text.repeat(count.max(0) as usize)))
        }
        (BinaryOp::Multiply, Value::List(items), count)
        | (BinaryOp::Multiply, count, Value::List(items))
            if count.as_i64().is_some() =>
        {
            let count = count.as_i64().unwrap_or(0);
            Ok(Value::list(repeat(&items.borrow(), count)))
        }
        (BinaryOp::Multiply, Value::Tuple(items), count)
        | (BinaryOp::Multiply, count, Value::Tuple(items))
            if count.as_i64().is_some() =>
        {
            let count = count.as_i64().unwrap_or(0);
            Ok(Value::tuple(repeat(items, count)))
        }
        (BinaryOp::Modulo, Value::Str(template), args) => format_percent(template, args),
        _ => Err(unsupported_operands(op, left, right)),
    }
}

/// `INPLACE_*` semantics: lists extend in place, everything else falls back to `binary`.
pub fn inplace(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, VmError> {
    if let (BinaryOp::Add, Value::List(items)) = (op, left) {
        let extra = collect(right)?;
        items.borrow_mut().extend(extra);
        return Ok(left.clone());
    }
    binary(op, left, right)
}

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, VmError> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!truthy(value))),
        (UnaryOp::Convert, value) => Ok(Value::str(repr(value))),
        (UnaryOp::Positive, Value::Float(value)) => Ok(Value::Float(*value)),
        (UnaryOp::Negative, Value::Float(value)) => Ok(Value::Float(-value)),
        (UnaryOp::Positive, value) if value.as_i64().is_some() => {
            Ok(Value::Int(value.as_i64().unwrap_or(0)))
        }
        (UnaryOp::Negative, value) if value.as_i64().is_some() => value
            .as_i64()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Invert, value) if value.as_i64().is_some() => {
            Ok(Value::Int(!value.as_i64().unwrap_or(0)))
        }
        (op, value) => raise!(
            TypeError,
            "bad operand type for unary {}: '{}'",
            op.symbol(),
            value.type_name()
        ),
    }
}

fn unorderable(op: &str, left: &Value, right: &Value) -> VmError {
    VmError::type_error(format!(
        "unorderable types: {}() {} {}()",
        left.type_name(),
        op,
        right.type_name()
    ))
}

fn sequence_less(left: &[Value], right: &[Value]) -> Result<bool, VmError> {
    for (a, b) in left.iter().zip(right) {
        if a != b {
            return less_than(a, b);
        }
    }
    Ok(left.len() < right.len())
}

/// The `<` ordering used by comparisons, `sorted`, `min` and `max`.
pub fn less_than(left: &Value, right: &Value) -> Result<bool, VmError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a < b),
        (Value::Str(a), Value::Str(b)) => Ok(a < b),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            sequence_less(&a, &b)
        }
        (Value::Tuple(a), Value::Tuple(b)) => sequence_less(a, b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(a < b),
            _ => Err(unorderable("<", left, right)),
        },
    }
}

fn exception_matches(value: &Value, pattern: &Value) -> Result<bool, VmError> {
    let kind = match value {
        Value::Exception(exception) => exception.kind,
        Value::ExceptionType(kind) => *kind,
        other => raise!(
            TypeError,
            "exception match on non-exception {}",
            other.type_name()
        ),
    };
    match pattern {
        Value::ExceptionType(base) => Ok(kind.is_subclass_of(*base)),
        Value::Tuple(bases) => {
            for base in bases.iter() {
                if exception_matches(value, base)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => raise!(
            TypeError,
            "catching {} that does not inherit from Exception is not allowed",
            other.type_name()
        ),
    }
}

pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<Value, VmError> {
    let result = match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        CompareOp::Lt => less_than(left, right).map_err(|_| unorderable("<", left, right))?,
        CompareOp::Gt => less_than(right, left).map_err(|_| unorderable(">", left, right))?,
        CompareOp::Le => {
            left == right || less_than(left, right).map_err(|_| unorderable("<=", left, right))?
        }
        CompareOp::Ge => {
            left == right || less_than(right, left).map_err(|_| unorderable(">=", left, right))?
        }
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
        CompareOp::Is => left.is_same(right),
        CompareOp::IsNot => !left.is_same(right),
        CompareOp::ExceptionMatch => exception_matches(left, right)?,
    };
    Ok(Value::Bool(result))
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> Result<bool, VmError> {
    match container {
        Value::List(items) => Ok(items.borrow().iter().any(|candidate| candidate == item)),
        Value::Tuple(items) => Ok(items.iter().any(|candidate| candidate == item)),
        Value::Dict(dict) => {
            check_hashable(item)?;
            Ok(dict.borrow().contains_key(item))
        }
        Value::Set(set) => {
            check_hashable(item)?;
            Ok(set.borrow().contains(item))
        }
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(needle.as_ref())),
            other => raise!(
                TypeError,
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ),
        },
        Value::Range(range) => Ok(item.as_i64().is_some_and(|value| range.contains(value))),
        other => raise!(
            TypeError,
            "argument of type '{}' is not iterable",
            other.type_name()
        ),
    }
}

pub fn check_hashable(value: &Value) -> Result<(), VmError> {
    match value {
        Value::List(_) | Value::Dict(_) | Value::Set(_) => {
            raise!(TypeError, "unhashable type: '{}'", value.type_name())
        }
        Value::Tuple(items) => items.iter().try_for_each(check_hashable),
        _ => Ok(()),
    }
}

pub fn len(value: &Value) -> Result<usize, VmError> {
    match value {
        Value::Str(text) => Ok(text.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Dict(dict) => Ok(dict.borrow().len()),
        Value::Set(set) => Ok(set.borrow().len()),
        Value::Range(range) => Ok(range.len()),
        other => raise!(TypeError, "object of type '{}' has no len()", other.type_name()),
    }
}

/// Resolves a possibly negative index; `Ok(None)` when it falls outside `0..len`.
pub fn normalize_index(index: &Value, len: usize, what: &str) -> Result<Option<usize>, VmError> {
    let Some(index) = index.as_i64() else {
        raise!(
            TypeError,
            "{} must be integers, not {}",
            what,
            index.type_name()
        );
    };
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        Ok(None)
    } else {
        Ok(Some(resolved as usize))
    }
}

fn slice_bound(value: &Value) -> Result<Option<i64>, VmError> {
    match value {
        Value::None => Ok(None),
        other => match other.as_i64() {
            Some(bound) => Ok(Some(bound)),
            None => raise!(
                TypeError,
                "slice indices must be integers or None, not {}",
                other.type_name()
            ),
        },
    }
}

/// Positions selected by a slice over a sequence of `len` items.
fn slice_indices(slice: &Slice, len: usize) -> Result<Vec<usize>, VmError> {
    let step = slice_bound(&slice.step)?.unwrap_or(1);
    if step == 0 {
        raise!(ValueError, "slice step cannot be zero");
    }
    let len = len as i64;
    let clamp = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(bound) if bound < 0 => {
                let bound = bound + len;
                if step < 0 {
                    bound.max(-1)
                } else {
                    bound.max(0)
                }
            }
            Some(bound) => {
                if step < 0 {
                    bound.min(len - 1)
                } else {
                    bound.min(len)
                }
            }
        }
    };
    let (start, stop) = if step > 0 {
        (clamp(slice_bound(&slice.start)?, 0), clamp(slice_bound(&slice.stop)?, len))
    } else {
        (
            clamp(slice_bound(&slice.start)?, len - 1),
            clamp(slice_bound(&slice.stop)?, -1),
        )
    };
    let mut indices = Vec::new();
    let mut cursor = start;
    while (step > 0 && cursor < stop) || (step < 0 && cursor > stop) {
        indices.push(cursor as usize);
        cursor += step;
    }
    Ok(indices)
}

pub fn get_item(container: &Value, key: &Value) -> Result<Value, VmError> {
    match (container, key) {
        (Value::List(items), Value::Slice(slice)) => {
            let items = items.borrow();
            let picked = slice_indices(slice, items.len())?;
            Ok(Value::list(picked.into_iter().map(|index| items[index].clone()).collect()))
        }
        (Value::Tuple(items), Value::Slice(slice)) => {
            let picked = slice_indices(slice, items.len())?;
            Ok(Value::tuple(picked.into_iter().map(|index| items[index].clone()).collect()))
        }
        (Value::Str(text), Value::Slice(slice)) => {
            let chars: Vec<char> = text.chars().collect();
            let picked = slice_indices(slice, chars.len())?;
            Ok(Value::str(picked.into_iter().map(|index| chars[index]).collect::<String>()))
        }
        (Value::List(items), key) => {
            let items = items.borrow();
            match normalize_index(key, items.len(), "list indices")? {
                Some(index) => Ok(items[index].clone()),
                None => raise!(IndexError, "list index out of range"),
            }
        }
        (Value::Tuple(items), key) => match normalize_index(key, items.len(), "tuple indices")? {
            Some(index) => Ok(items[index].clone()),
            None => raise!(IndexError, "tuple index out of range"),
        },
        (Value::Str(text), key) => {
            let count = text.chars().count();
            match normalize_index(key, count, "string indices")? {
                Some(index) => Ok(Value::str(
                    text.chars().nth(index).map(String::from).unwrap_or_default(),
                )),
                None => raise!(IndexError, "string index out of range"),
            }
        }
        (Value::Range(range), key) => match normalize_index(key, range.len(), "xrange indices")? {
            Some(index) => Ok(range.get(index).map(Value::Int).unwrap_or(Value::None)),
            None => raise!(IndexError, "xrange object index out of range"),
        },
        (Value::Dict(dict), key) => {
            check_hashable(key)?;
            match dict.borrow().get(key) {
                Some(value) => Ok(value.clone()),
                None => raise!(KeyError, "{}", repr(key)),
            }
        }
        (other, _) => raise!(TypeError, "'{}' object is not subscriptable", other.type_name()),
    }
}

pub fn set_item(container: &Value, key: &Value, value: Value) -> Result<(), VmError> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            match normalize_index(key, len, "list indices")? {
                Some(index) => {
                    items[index] = value;
                    Ok(())
                }
                None => raise!(IndexError, "list assignment index out of range"),
            }
        }
        Value::Dict(dict) => {
            check_hashable(key)?;
            dict.borrow_mut().insert(key.clone(), value);
            Ok(())
        }
        other => raise!(
            TypeError,
            "'{}' object does not support item assignment",
            other.type_name()
        ),
    }
}

pub fn del_item(container: &Value, key: &Value) -> Result<(), VmError> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            match normalize_index(key, len, "list indices")? {
                Some(index) => {
                    items.remove(index);
                    Ok(())
                }
                None => raise!(IndexError, "list assignment index out of range"),
            }
        }
        Value::Dict(dict) => {
            check_hashable(key)?;
            match dict.borrow_mut().remove(key) {
                Some(_) => Ok(()),
                None => raise!(KeyError, "{}", repr(key)),
            }
        }
        other => raise!(
            TypeError,
            "'{}' object doesn't support item deletion",
            other.type_name()
        ),
    }
}

fn no_attribute(value: &Value, name: &str) -> VmError {
    VmError::exception(
        ExceptionKind::AttributeError,
        format!("'{}' object has no attribute '{}'", value.type_name(), name),
    )
}

pub fn get_attr(value: &Value, name: &str) -> Result<Value, VmError> {
    match value {
        Value::Instance(instance) => instance.get(name).ok_or_else(|| no_attribute(value, name)),
        Value::Function(function) if name == "__name__" => Ok(Value::str(&function.name)),
        Value::Exception(exception) if name == "message" => Ok(Value::str(&exception.message)),
        Value::Exception(exception) if name == "args" => {
            let args = if exception.message.is_empty() {
                Vec::new()
            } else {
                vec![Value::str(&exception.message)]
            };
            Ok(Value::tuple(args))
        }
        _ => match Method::lookup(value, name) {
            Some(method) => Ok(method.bind(value.clone())),
            None => Err(no_attribute(value, name)),
        },
    }
}

pub fn set_attr(target: &Value, name: &str, value: Value) -> Result<(), VmError> {
    match target {
        Value::Instance(instance) => {
            instance.set(name, value);
            Ok(())
        }
        other => Err(no_attribute(other, name)),
    }
}

pub fn del_attr(target: &Value, name: &str) -> Result<(), VmError> {
    match target {
        Value::Instance(instance) if instance.remove(name) => Ok(()),
        other => Err(no_attribute(other, name)),
    }
}

/// Fast path behind `list.append`; any other receiver goes through attribute lookup and a call.
pub fn list_append(runner: &dyn FunctionRunner, list: &Value, item: Value) -> Result<(), VmError> {
    match list {
        Value::List(items) => {
            items.borrow_mut().push(item);
            Ok(())
        }
        other => {
            let method = get_attr(other, "append")?;
            call(runner, &method, vec![item], Vec::new()).map(|_| ())
        }
    }
}

pub fn get_iter(value: &Value) -> Result<Value, VmError> {
    let state = match value {
        Value::Iterator(_) => return Ok(value.clone()),
        Value::List(list) => IterState::List {
            list: list.clone(),
            index: 0,
        },
        Value::Tuple(items) => IterState::Items {
            items: items.as_ref().clone(),
            index: 0,
        },
        Value::Str(text) => IterState::Items {
            items: text.chars().map(|c| Value::str(c.to_string())).collect(),
            index: 0,
        },
        Value::Dict(dict) => IterState::Items {
            items: dict.borrow().keys().cloned().collect(),
            index: 0,
        },
        Value::Set(set) => IterState::Items {
            items: set.borrow().iter().cloned().collect(),
            index: 0,
        },
        Value::Range(range) => IterState::Range {
            next: range.start,
            stop: range.stop,
            step: range.step,
        },
        other => raise!(TypeError, "'{}' object is not iterable", other.type_name()),
    };
    Ok(Value::iterator(state))
}

/// Advances an iterator; `Ok(None)` once it is exhausted.
pub fn iter_next(iterator: &Value) -> Result<Option<Value>, VmError> {
    let Value::Iterator(state) = iterator else {
        raise!(TypeError, "'{}' object is not an iterator", iterator.type_name());
    };
    let mut guard = state.borrow_mut();
    let (inner, position) = match &mut *guard {
        IterState::List { list, index } => {
            let item = list.borrow().get(*index).cloned();
            if item.is_some() {
                *index += 1;
            } else {
                *guard = IterState::Exhausted;
            }
            return Ok(item);
        }
        IterState::Items { items, index } => {
            let item = items.get(*index).cloned();
            if item.is_some() {
                *index += 1;
            } else {
                *guard = IterState::Exhausted;
            }
            return Ok(item);
        }
        IterState::Range { next, stop, step } => {
            let more = if *step > 0 { *next < *stop } else { *next > *stop };
            if !more {
                *guard = IterState::Exhausted;
                return Ok(None);
            }
            let current = *next;
            *next = next.saturating_add(*step);
            return Ok(Some(Value::Int(current)));
        }
        IterState::Enumerate { inner, count } => {
            let position = *count;
            *count += 1;
            (inner.clone(), position)
        }
        IterState::Exhausted => return Ok(None),
    };
    drop(guard);
    match iter_next(&inner)? {
        Some(item) => Ok(Some(Value::tuple(vec![Value::Int(position), item]))),
        None => {
            *state.borrow_mut() = IterState::Exhausted;
            Ok(None)
        }
    }
}

/// Drains any iterable into a vector.
pub fn collect(value: &Value) -> Result<Vec<Value>, VmError> {
    match value {
        Value::List(items) => return Ok(items.borrow().clone()),
        Value::Tuple(items) => return Ok(items.as_ref().clone()),
        _ => {}
    }
    let iterator = get_iter(value)?;
    let mut items = Vec::new();
    while let Some(item) = iter_next(&iterator)? {
        items.push(item);
    }
    Ok(items)
}

/// `UNPACK_SEQUENCE`: exactly `count` items in source order.
pub fn unpack_sequence(value: &Value, count: usize) -> Result<Vec<Value>, VmError> {
    let items = match value {
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Iterator(_) | Value::Range(_)
        | Value::Dict(_) | Value::Set(_) => collect(value)?,
        other => raise!(TypeError, "'{}' object is not iterable", other.type_name()),
    };
    if items.len() > count {
        raise!(ValueError, "too many values to unpack");
    }
    if items.len() < count {
        raise!(
            ValueError,
            "need more than {} value{} to unpack",
            items.len(),
            if items.len() == 1 { "" } else { "s" }
        );
    }
    Ok(items)
}

pub fn build_set(items: Vec<Value>) -> Result<Value, VmError> {
    let mut set = Set::new();
    for item in items {
        check_hashable(&item)?;
        set.insert(item);
    }
    Ok(Value::set(set))
}

pub fn build_map() -> Value {
    Value::dict(Dict::new())
}

pub fn build_slice(start: Value, stop: Value, step: Value) -> Value {
    Value::Slice(Rc::new(Slice { start, stop, step }))
}

/// Calls any callable with positional and keyword arguments.
pub fn call(
    runner: &dyn FunctionRunner,
    callee: &Value,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, VmError> {
    match callee {
        Value::Function(function) => runner.call_function(function, args, kwargs),
        Value::Builtin(builtin) => call_builtin(*builtin, args, kwargs),
        Value::BoundMethod(bound) => call_method(&bound.receiver, bound.method, args, kwargs),
        Value::ExceptionType(kind) => {
            if !kwargs.is_empty() {
                raise!(TypeError, "{}() takes no keyword arguments", kind.name());
            }
            let message = match args.as_slice() {
                [] => String::new(),
                [single] => to_str(single),
                many => repr(&Value::tuple(many.to_vec())),
            };
            Ok(Value::Exception(Rc::new(Exception::new(*kind, message))))
        }
        other => raise!(TypeError, "'{}' object is not callable", other.type_name()),
    }
}

/// Turns the operand of `RAISE_VARARGS` into the error it raises.
pub fn raise_value(value: &Value) -> VmError {
    match value {
        Value::Exception(exception) => VmError::Exception(exception.as_ref().clone()),
        Value::ExceptionType(kind) => VmError::exception(*kind, ""),
        other => VmError::type_error(format!(
            "exceptions must be derived from Exception, not {}",
            other.type_name()
        )),
    }
}

pub fn to_int(value: &Value, base: u32) -> Result<Value, VmError> {
    match value {
        Value::Bool(value) => Ok(Value::Int(i64::from(*value))),
        Value::Int(value) => Ok(Value::Int(*value)),
        Value::Float(value) => {
            if value.is_nan() {
                raise!(ValueError, "cannot convert float NaN to integer");
            }
            if value.is_infinite() {
                raise!(OverflowError, "cannot convert float infinity to integer");
            }
            let truncated = value.trunc();
            if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                return Err(overflow());
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(text) => i64::from_str_radix(text.trim(), base)
            .map(Value::Int)
            .map_err(|_| {
                VmError::value_error(format!(
                    "invalid literal for int() with base {}: {}",
                    base,
                    repr(value)
                ))
            }),
        other => raise!(
            TypeError,
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ),
    }
}

pub fn to_float(value: &Value) -> Result<Value, VmError> {
    match value {
        Value::Str(text) => text.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            VmError::value_error(format!("could not convert string to float: {}", text))
        }),
        other => match other.as_f64() {
            Some(value) => Ok(Value::Float(value)),
            None => raise!(
                TypeError,
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ),
        },
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{:?}", value)
    }
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

pub fn repr(value: &Value) -> String {
    match value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => format_float(*value),
        Value::Str(text) => quote(text),
        Value::List(items) => format!("[{}]", items.borrow().iter().map(repr).join(", ")),
        Value::Tuple(items) if items.len() == 1 => format!("({},)", repr(&items[0])),
        Value::Tuple(items) => format!("({})", items.iter().map(repr).join(", ")),
        Value::Dict(dict) => format!(
            "{{{}}}",
            dict.borrow()
                .iter()
                .map(|(key, value)| format!("{}: {}", repr(key), repr(value)))
                .join(", ")
        ),
        Value::Set(set) => format!("set([{}])", set.borrow().iter().map(repr).join(", ")),
        Value::Slice(slice) => format!(
            "slice({}, {}, {})",
            repr(&slice.start),
            repr(&slice.stop),
            repr(&slice.step)
        ),
        Value::Range(range) if range.step == 1 => {
            format!("xrange({}, {})", range.start, range.stop)
        }
        Value::Range(range) => format!("xrange({}, {}, {})", range.start, range.stop, range.step),
        Value::Iterator(_) => "<iterator>".to_string(),
        Value::Function(function) => format!("<function {}>", function.name),
        Value::Builtin(builtin) => format!("<built-in function {}>", builtin.name()),
        Value::BoundMethod(bound) => format!(
            "<built-in method {} of {} object>",
            bound.method.name(),
            bound.receiver.type_name()
        ),
        Value::Cell(cell) => format!("<cell: {}>", repr(&cell.borrow())),
        Value::Instance(instance) => format!(
            "namespace({})",
            instance
                .attrs
                .borrow()
                .iter()
                .map(|(name, value)| format!("{}={}", name, repr(value)))
                .join(", ")
        ),
        Value::Exception(exception) if exception.message.is_empty() => {
            format!("{}()", exception.kind)
        }
        Value::Exception(exception) => {
            format!("{}({})", exception.kind, quote(&exception.message))
        }
        Value::ExceptionType(kind) => format!("<class '{}'>", kind),
        Value::Code(code) => format!("<code object {}>", code.name),
        Value::Unbound => "<unbound>".to_string(),
    }
}

/// `str()` conversion: strings are unquoted, exceptions render their message.
pub fn to_str(value: &Value) -> String {
    match value {
        Value::Str(text) => text.to_string(),
        Value::Exception(exception) => exception.message.clone(),
        other => repr(other),
    }
}

/// `%`-formatting of a string template with `%s`, `%r`, `%d`, `%i`, `%f` and `%%`.
pub fn format_percent(template: &str, args: &Value) -> Result<Value, VmError> {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mut remaining = values.into_iter();
    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            output.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(digit) = chars.peek().filter(|c| c.is_ascii_digit()) {
                digits.push(*digit);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }
        let Some(spec) = chars.next() else {
            raise!(ValueError, "incomplete format");
        };
        if spec == '%' {
            output.push('%');
            continue;
        }
        let Some(value) = remaining.next() else {
            raise!(TypeError, "not enough arguments for format string");
        };
        match spec {
            's' => output.push_str(&to_str(&value)),
            'r' => output.push_str(&repr(&value)),
            'd' | 'i' => match to_int(&value, 10)? {
                Value::Int(number) => output.push_str(&number.to_string()),
                _ => raise!(TypeError, "%d format: a number is required"),
            },
            'f' => match value.as_f64() {
                Some(number) => {
                    output.push_str(&format!("{:.*}", precision.unwrap_or(6), number))
                }
                None => raise!(
                    TypeError,
                    "float argument required, not {}",
                    value.type_name()
                ),
            },
            other => raise!(ValueError, "unsupported format character '{}'", other),
        }
    }
    if remaining.next().is_some() {
        raise!(TypeError, "not all arguments converted during string formatting");
    }
    Ok(Value::str(output))
}
