use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{ExceptionKind, VmError};
use crate::object::{self, BinaryOp};
use crate::raise;
use crate::value::{Dict, Instance, IterState, Range, Value};

/// Functions reachable from the builtin namespace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Range,
    Xrange,
    Len,
    Abs,
    Min,
    Max,
    Sum,
    Int,
    Float,
    Str,
    Bool,
    List,
    Tuple,
    Dict,
    Set,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Namespace,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Resolves a name that is not bound in the module globals.
pub fn lookup_builtin(name: &str) -> Option<Value> {
    match name {
        "True" => return Some(Value::Bool(true)),
        "False" => return Some(Value::Bool(false)),
        "None" => return Some(Value::None),
        _ => {}
    }
    if let Ok(builtin) = name.parse::<Builtin>() {
        return Some(Value::Builtin(builtin));
    }
    ExceptionKind::from_name(name).map(Value::ExceptionType)
}

fn no_keywords(builtin: Builtin, kwargs: &[(String, Value)]) -> Result<(), VmError> {
    if !kwargs.is_empty() {
        raise!(TypeError, "{}() takes no keyword arguments", builtin.name());
    }
    Ok(())
}

fn arity(builtin: Builtin, args: &[Value], min: usize, max: usize) -> Result<(), VmError> {
    if args.len() < min {
        raise!(
            TypeError,
            "{}() takes at least {} argument{} ({} given)",
            builtin.name(),
            min,
            if min == 1 { "" } else { "s" },
            args.len()
        );
    }
    if args.len() > max {
        raise!(
            TypeError,
            "{}() takes at most {} argument{} ({} given)",
            builtin.name(),
            max,
            if max == 1 { "" } else { "s" },
            args.len()
        );
    }
    Ok(())
}

fn int_arg(builtin: Builtin, value: &Value) -> Result<i64, VmError> {
    match value.as_i64() {
        Some(value) => Ok(value),
        None => raise!(
            TypeError,
            "{}() integer argument expected, got {}",
            builtin.name(),
            value.type_name()
        ),
    }
}

pub fn call_builtin(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, VmError> {
    match builtin {
        Builtin::Range | Builtin::Xrange => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 1, 3)?;
            let (start, stop, step) = match args.as_slice() {
                [stop] => (0, int_arg(builtin, stop)?, 1),
                [start, stop] => (int_arg(builtin, start)?, int_arg(builtin, stop)?, 1),
                [start, stop, step] => (
                    int_arg(builtin, start)?,
                    int_arg(builtin, stop)?,
                    int_arg(builtin, step)?,
                ),
                _ => unreachable!("arity checked above"),
            };
            if step == 0 {
                raise!(ValueError, "{}() step argument must not be zero", builtin.name());
            }
            let range = Range { start, stop, step };
            if builtin == Builtin::Xrange {
                return Ok(Value::Range(range));
            }
            let items = (0..range.len())
                .filter_map(|index| range.get(index))
                .map(Value::Int)
                .collect();
            Ok(Value::list(items))
        }
        Builtin::Len => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 1, 1)?;
            object::len(&args[0]).map(|len| Value::Int(len as i64))
        }
        Builtin::Abs => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::Bool(value) => Ok(Value::Int(i64::from(*value))),
                Value::Int(value) => value
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| VmError::exception(ExceptionKind::OverflowError, "integer overflow")),
                Value::Float(value) => Ok(Value::Float(value.abs())),
                other => raise!(
                    TypeError,
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ),
            }
        }
        Builtin::Min | Builtin::Max => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 1, usize::MAX)?;
            let candidates = if args.len() == 1 {
                object::collect(&args[0])?
            } else {
                args
            };
            let mut best: Option<Value> = None;
            for candidate in candidates {
                best = Some(match best {
                    None => candidate,
                    Some(current) => {
                        let replace = if builtin == Builtin::Min {
                            object::less_than(&candidate, &current)?
                        } else {
                            object::less_than(&current, &candidate)?
                        };
                        if replace {
                            candidate
                        } else {
                            current
                        }
                    }
                });
            }
            match best {
                Some(value) => Ok(value),
                None => raise!(ValueError, "{}() arg is an empty sequence", builtin.name()),
            }
        }
        Builtin::Sum => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                raise!(TypeError, "sum() can't sum strings [use ''.join(seq) instead]");
            }
            for item in object::collect(&args[0])? {
                total = object::binary(BinaryOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Int => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 0, 2)?;
            match args.as_slice() {
                [] => Ok(Value::Int(0)),
                [value] => object::to_int(value, 10),
                [value, base] => {
                    let Value::Str(_) = value else {
                        raise!(TypeError, "int() can't convert non-string with explicit base");
                    };
                    let base = int_arg(builtin, base)?;
                    if !(2..=36).contains(&base) {
                        raise!(ValueError, "int() base must be >= 2 and <= 36");
                    }
                    object::to_int(value, base as u32)
                }
                _ => unreachable!("arity checked above"),
            }
        }
        Builtin::Float => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(value) => object::to_float(value),
            }
        }
        Builtin::Str => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 0, 1)?;
            Ok(Value::str(args.first().map(object::to_str).unwrap_or_default()))
        }
        Builtin::Bool => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(object::truthy)))
        }
        Builtin::List => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(value) => Ok(Value::list(object::collect(value)?)),
            }
        }
        Builtin::Tuple => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::tuple(Vec::new())),
                Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
                Some(value) => Ok(Value::tuple(object::collect(value)?)),
            }
        }
        Builtin::Set => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 0, 1)?;
            let items = match args.first() {
                None => Vec::new(),
                Some(value) => object::collect(value)?,
            };
            object::build_set(items)
        }
        Builtin::Dict => {
            arity(builtin, &args, 0, 1)?;
            let mut dict = Dict::new();
            if let Some(source) = args.first() {
                let pairs: Vec<(Value, Value)> = match source {
                    Value::Dict(other) => other.borrow().iter().cloned().collect(),
                    other => object::collect(other)?
                        .iter()
                        .map(|pair| {
                            let parts = object::unpack_sequence(pair, 2)?;
                            Ok((parts[0].clone(), parts[1].clone()))
                        })
                        .collect::<Result<_, VmError>>()?,
                };
                for (key, value) in pairs {
                    object::check_hashable(&key)?;
                    dict.insert(key, value);
                }
            }
            for (key, value) in kwargs {
                dict.insert(Value::str(key), value);
            }
            Ok(Value::dict(dict))
        }
        Builtin::Sorted => {
            arity(builtin, &args, 1, 1)?;
            let mut reverse = false;
            for (name, value) in &kwargs {
                match name.as_str() {
                    "reverse" => reverse = object::truthy(value),
                    other => raise!(
                        TypeError,
                        "'{}' is an invalid keyword argument for this function",
                        other
                    ),
                }
            }
            let mut items = object::collect(&args[0])?;
            sort_values(&mut items)?;
            if reverse {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        Builtin::Reversed => {
            no_keywords(builtin, &kwargs)?;
            arity(builtin, &args, 1, 1)?;
            let mut items = match &args[0] {
                Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) => {
                    object::collect(&args[0])?
                }
                other => raise!(
                    TypeError,
                    "argument to reversed() must be a sequence, not {}",
                    other.type_name()
                ),
            };
            items.reverse();
            Ok(Value::iterator(IterState::Items { items, index: 0 }))
        }
        Builtin::Enumerate => {
            arity(builtin, &args, 1, 2)?;
            let mut start = args.get(1).cloned();
            for (name, value) in kwargs {
                match name.as_str() {
                    "start" => start = Some(value),
                    other => raise!(
                        TypeError,
                        "'{}' is an invalid keyword argument for this function",
                        other
                    ),
                }
            }
            let count = match start {
                Some(value) => int_arg(builtin, &value)?,
                None => 0,
            };
            let inner = object::get_iter(&args[0])?;
            Ok(Value::iterator(IterState::Enumerate { inner, count }))
        }
        Builtin::Zip => {
            no_keywords(builtin, &kwargs)?;
            let columns = args
                .iter()
                .map(object::collect)
                .collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let zipped = (0..rows)
                .map(|row| Value::tuple(columns.iter().map(|column| column[row].clone()).collect()))
                .collect();
            Ok(Value::list(zipped))
        }
        Builtin::Namespace => {
            if !args.is_empty() {
                raise!(TypeError, "namespace() takes no positional arguments");
            }
            let instance = Instance {
                attrs: RefCell::new(kwargs),
            };
            Ok(Value::Instance(Rc::new(instance)))
        }
    }
}

/// Stable sort using `<`; the first failed comparison is reported.
pub fn sort_values(items: &mut [Value]) -> Result<(), VmError> {
    let mut failure = None;
    items.sort_by(|left, right| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        match object::less_than(left, right) {
            Ok(true) => Ordering::Less,
            Ok(false) => match object::less_than(right, left) {
                Ok(true) => Ordering::Greater,
                Ok(false) => Ordering::Equal,
                Err(err) => {
                    failure = Some(err);
                    Ordering::Equal
                }
            },
            Err(err) => {
                failure = Some(err);
                Ordering::Equal
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
