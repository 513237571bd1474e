//! Bound methods of the built-in container and string types.

use std::rc::Rc;

use strum::IntoStaticStr;

use crate::error::{ExceptionKind, VmError};
use crate::object::{self, repr};
use crate::raise;
use crate::value::{BoundMethod, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum Method {
    #[strum(serialize = "append")]
    ListAppend,
    #[strum(serialize = "pop")]
    ListPop,
    #[strum(serialize = "extend")]
    ListExtend,
    #[strum(serialize = "insert")]
    ListInsert,
    #[strum(serialize = "index")]
    ListIndex,
    #[strum(serialize = "count")]
    ListCount,
    #[strum(serialize = "reverse")]
    ListReverse,
    #[strum(serialize = "get")]
    DictGet,
    #[strum(serialize = "keys")]
    DictKeys,
    #[strum(serialize = "values")]
    DictValues,
    #[strum(serialize = "items")]
    DictItems,
    #[strum(serialize = "pop")]
    DictPop,
    #[strum(serialize = "setdefault")]
    DictSetdefault,
    #[strum(serialize = "update")]
    DictUpdate,
    #[strum(serialize = "upper")]
    StrUpper,
    #[strum(serialize = "lower")]
    StrLower,
    #[strum(serialize = "strip")]
    StrStrip,
    #[strum(serialize = "split")]
    StrSplit,
    #[strum(serialize = "join")]
    StrJoin,
    #[strum(serialize = "startswith")]
    StrStartswith,
    #[strum(serialize = "endswith")]
    StrEndswith,
    #[strum(serialize = "replace")]
    StrReplace,
}

impl Method {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn lookup(receiver: &Value, name: &str) -> Option<Method> {
        let method = match (receiver, name) {
            (Value::List(_), "append") => Method::ListAppend,
            (Value::List(_), "pop") => Method::ListPop,
            (Value::List(_), "extend") => Method::ListExtend,
            (Value::List(_), "insert") => Method::ListInsert,
            (Value::List(_), "index") => Method::ListIndex,
            (Value::List(_), "count") => Method::ListCount,
            (Value::List(_), "reverse") => Method::ListReverse,
            (Value::Dict(_), "get") => Method::DictGet,
            (Value::Dict(_), "keys") => Method::DictKeys,
            (Value::Dict(_), "values") => Method::DictValues,
            (Value::Dict(_), "items") => Method::DictItems,
            (Value::Dict(_), "pop") => Method::DictPop,
            (Value::Dict(_), "setdefault") => Method::DictSetdefault,
            (Value::Dict(_), "update") => Method::DictUpdate,
            (Value::Str(_), "upper") => Method::StrUpper,
            (Value::Str(_), "lower") => Method::StrLower,
            (Value::Str(_), "strip") => Method::StrStrip,
            (Value::Str(_), "split") => Method::StrSplit,
            (Value::Str(_), "join") => Method::StrJoin,
            (Value::Str(_), "startswith") => Method::StrStartswith,
            (Value::Str(_), "endswith") => Method::StrEndswith,
            (Value::Str(_), "replace") => Method::StrReplace,
            _ => return None,
        };
        Some(method)
    }

    pub fn bind(self, receiver: Value) -> Value {
        Value::BoundMethod(Rc::new(BoundMethod {
            receiver,
            method: self,
        }))
    }
}

fn arity(method: Method, args: &[Value], min: usize, max: usize) -> Result<(), VmError> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let expected = match (min, max) {
        (0, 0) => "no arguments".to_string(),
        (1, 1) => "exactly one argument".to_string(),
        (min, max) if min == max => format!("exactly {} arguments", min),
        (0, max) => format!("at most {} arguments", max),
        (min, _) => format!("at least {} arguments", min),
    };
    raise!(
        TypeError,
        "{}() takes {} ({} given)",
        method.name(),
        expected,
        args.len()
    )
}

fn str_arg<'a>(method: Method, value: &'a Value) -> Result<&'a str, VmError> {
    match value {
        Value::Str(text) => Ok(text.as_ref()),
        other => raise!(
            TypeError,
            "{}() argument must be str, not {}",
            method.name(),
            other.type_name()
        ),
    }
}

pub fn call_method(
    receiver: &Value,
    method: Method,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, VmError> {
    if !kwargs.is_empty() {
        raise!(TypeError, "{}() takes no keyword arguments", method.name());
    }
    match receiver {
        Value::List(_) => call_list_method(receiver, method, args),
        Value::Dict(_) => call_dict_method(receiver, method, args),
        Value::Str(text) => call_str_method(text, method, args),
        other => Err(VmError::runtime(format!(
            "method {} bound to {}",
            method.name(),
            other.type_name()
        ))),
    }
}

fn call_list_method(receiver: &Value, method: Method, args: Vec<Value>) -> Result<Value, VmError> {
    let Value::List(list) = receiver else {
        return Err(VmError::runtime("list method on non-list"));
    };
    match method {
        Method::ListAppend => {
            arity(method, &args, 1, 1)?;
            list.borrow_mut().push(args[0].clone());
            Ok(Value::None)
        }
        Method::ListPop => {
            arity(method, &args, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                raise!(IndexError, "pop from empty list");
            }
            let index = match args.first() {
                Some(index) => object::normalize_index(index, items.len(), "pop index")?
                    .ok_or_else(|| VmError::exception(ExceptionKind::IndexError, "pop index out of range"))?,
                None => items.len() - 1,
            };
            Ok(items.remove(index))
        }
        Method::ListExtend => {
            arity(method, &args, 1, 1)?;
            let extra = object::collect(&args[0])?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        Method::ListInsert => {
            arity(method, &args, 2, 2)?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let Some(index) = args[0].as_i64() else {
                raise!(TypeError, "an integer is required");
            };
            let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(index as usize, args[1].clone());
            Ok(Value::None)
        }
        Method::ListIndex => {
            arity(method, &args, 1, 1)?;
            let items = list.borrow();
            match items.iter().position(|item| *item == args[0]) {
                Some(index) => Ok(Value::Int(index as i64)),
                None => raise!(ValueError, "{} is not in list", repr(&args[0])),
            }
        }
        Method::ListCount => {
            arity(method, &args, 1, 1)?;
            let count = list.borrow().iter().filter(|item| **item == args[0]).count();
            Ok(Value::Int(count as i64))
        }
        Method::ListReverse => {
            arity(method, &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        other => Err(VmError::runtime(format!("{} is not a list method", other.name()))),
    }
}

fn call_dict_method(receiver: &Value, method: Method, args: Vec<Value>) -> Result<Value, VmError> {
    let Value::Dict(dict) = receiver else {
        return Err(VmError::runtime("dict method on non-dict"));
    };
    match method {
        Method::DictGet => {
            arity(method, &args, 1, 2)?;
            let found = dict.borrow().get(&args[0]).cloned();
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        Method::DictKeys => {
            arity(method, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().keys().cloned().collect()))
        }
        Method::DictValues => {
            arity(method, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().values().cloned().collect()))
        }
        Method::DictItems => {
            arity(method, &args, 0, 0)?;
            let items = dict
                .borrow()
                .iter()
                .map(|(key, value)| Value::tuple(vec![key.clone(), value.clone()]))
                .collect();
            Ok(Value::list(items))
        }
        Method::DictPop => {
            arity(method, &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0]);
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => raise!(KeyError, "{}", repr(&args[0])),
            }
        }
        Method::DictSetdefault => {
            arity(method, &args, 1, 2)?;
            object::check_hashable(&args[0])?;
            let mut dict = dict.borrow_mut();
            if let Some(existing) = dict.get(&args[0]) {
                return Ok(existing.clone());
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            dict.insert(args[0].clone(), default.clone());
            Ok(default)
        }
        Method::DictUpdate => {
            arity(method, &args, 1, 1)?;
            let pairs: Vec<(Value, Value)> = match &args[0] {
                Value::Dict(other) => other.borrow().iter().cloned().collect(),
                other => object::collect(other)?
                    .iter()
                    .map(|pair| {
                        let parts = object::unpack_sequence(pair, 2)?;
                        Ok((parts[0].clone(), parts[1].clone()))
                    })
                    .collect::<Result<_, VmError>>()?,
            };
            let mut dict = dict.borrow_mut();
            for (key, value) in pairs {
                object::check_hashable(&key)?;
                dict.insert(key, value);
            }
            Ok(Value::None)
        }
        other => Err(VmError::runtime(format!("{} is not a dict method", other.name()))),
    }
}

fn call_str_method(text: &str, method: Method, args: Vec<Value>) -> Result<Value, VmError> {
    match method {
        Method::StrUpper => {
            arity(method, &args, 0, 0)?;
            Ok(Value::str(text.to_uppercase()))
        }
        Method::StrLower => {
            arity(method, &args, 0, 0)?;
            Ok(Value::str(text.to_lowercase()))
        }
        Method::StrStrip => {
            arity(method, &args, 0, 1)?;
            match args.first() {
                None | Some(Value::None) => Ok(Value::str(text.trim())),
                Some(chars) => {
                    let chars = str_arg(method, chars)?;
                    Ok(Value::str(text.trim_matches(|c: char| chars.contains(c))))
                }
            }
        }
        Method::StrSplit => {
            arity(method, &args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => text.split_whitespace().map(Value::str).collect(),
                Some(separator) => {
                    let separator = str_arg(method, separator)?;
                    if separator.is_empty() {
                        raise!(ValueError, "empty separator");
                    }
                    text.split(separator).map(Value::str).collect()
                }
            };
            Ok(Value::list(parts))
        }
        Method::StrJoin => {
            arity(method, &args, 1, 1)?;
            let mut parts = Vec::new();
            for (index, item) in object::collect(&args[0])?.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => raise!(
                        TypeError,
                        "sequence item {}: expected string, {} found",
                        index,
                        other.type_name()
                    ),
                }
            }
            Ok(Value::str(parts.join(text)))
        }
        Method::StrStartswith => {
            arity(method, &args, 1, 1)?;
            Ok(Value::Bool(text.starts_with(str_arg(method, &args[0])?)))
        }
        Method::StrEndswith => {
            arity(method, &args, 1, 1)?;
            Ok(Value::Bool(text.ends_with(str_arg(method, &args[0])?)))
        }
        Method::StrReplace => {
            arity(method, &args, 2, 2)?;
            let from = str_arg(method, &args[0])?;
            let to = str_arg(method, &args[1])?;
            Ok(Value::str(text.replace(from, to)))
        }
        other => Err(VmError::runtime(format!("{} is not a str method", other.name()))),
    }
}
