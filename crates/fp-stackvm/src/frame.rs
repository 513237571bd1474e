//! Call binding shared by the stack and register engines.

use fp_bytecode::CodeObject;

use crate::error::VmError;
use crate::object;
use crate::raise;
use crate::value::{CellRef, Dict, Function, Value};

/// Initial local and cell state of an activation.
#[derive(Debug)]
pub struct Frame {
    pub locals: Vec<Value>,
    /// `cellvars` followed by `freevars`.
    pub cells: Vec<CellRef>,
}

/// Frame for module-level code: every local unbound, fresh cells, no free variables.
pub fn module_frame(code: &CodeObject) -> Frame {
    Frame {
        locals: vec![Value::Unbound; code.num_locals()],
        cells: code
            .cellvars
            .iter()
            .map(|_| Value::new_cell(Value::Unbound))
            .collect(),
    }
}

/// Appends one value per constant of `code`.
///
/// An activation materialises its constants once, so every `LOAD_CONST` of an index yields
/// the same object and `is` sees one tuple, not a fresh copy per load.
pub fn seed_constants(code: &CodeObject, into: &mut Vec<Value>) {
    into.extend(code.consts.iter().map(Value::from_const));
}

fn arity_error(function: &Function, given: usize) -> VmError {
    let code = &function.code;
    let argcount = code.argcount as usize;
    let required = argcount - function.defaults.len().min(argcount);
    let (qualifier, expected) = if code.has_varargs() {
        ("at least", required)
    } else if required == argcount {
        ("exactly", argcount)
    } else if given < required {
        ("at least", required)
    } else {
        ("at most", argcount)
    };
    VmError::type_error(format!(
        "{}() takes {} {} argument{} ({} given)",
        function.name,
        qualifier,
        expected,
        if expected == 1 { "" } else { "s" },
        given
    ))
}

/// Binds positional and keyword arguments to the parameters of `function`.
pub fn bind_arguments(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Frame, VmError> {
    let code = &function.code;
    let argcount = code.argcount as usize;
    let mut locals = vec![Value::Unbound; code.num_locals()];
    let mut slot = argcount;
    let varargs_slot = code.has_varargs().then(|| {
        slot += 1;
        slot - 1
    });
    let varkw_slot = code.has_varkeywords().then_some(slot);
    if locals.len() < slot + usize::from(varkw_slot.is_some()) {
        return Err(VmError::runtime(format!(
            "code {} declares fewer locals than parameters",
            code.name
        )));
    }

    let positional_given = args.len();
    let mut args = args.into_iter();
    for local in locals.iter_mut().take(argcount) {
        match args.next() {
            Some(value) => *local = value,
            None => break,
        }
    }
    let extra: Vec<Value> = args.collect();
    match varargs_slot {
        Some(index) => locals[index] = Value::tuple(extra),
        None if !extra.is_empty() => return Err(arity_error(function, positional_given)),
        None => {}
    }

    let mut extra_kwargs = Dict::new();
    let mut keyword_given = 0;
    for (name, value) in kwargs {
        let position = code.varnames.iter().take(argcount).position(|param| *param == name);
        match position {
            Some(index) if !locals[index].is_unbound() => {
                raise!(
                    TypeError,
                    "{}() got multiple values for keyword argument '{}'",
                    function.name,
                    name
                );
            }
            Some(index) => {
                locals[index] = value;
                keyword_given += 1;
            }
            None if varkw_slot.is_some() => extra_kwargs.insert(Value::str(&name), value),
            None => raise!(
                TypeError,
                "{}() got an unexpected keyword argument '{}'",
                function.name,
                name
            ),
        }
    }
    if let Some(index) = varkw_slot {
        locals[index] = Value::dict(extra_kwargs);
    }

    let first_default = argcount.saturating_sub(function.defaults.len());
    for index in 0..argcount {
        if !locals[index].is_unbound() {
            continue;
        }
        if index >= first_default {
            locals[index] = function.defaults[index - first_default].clone();
        } else {
            return Err(arity_error(function, positional_given + keyword_given));
        }
    }

    let mut cells: Vec<CellRef> = code
        .cellvars
        .iter()
        .map(|name| {
            let initial = code
                .varnames
                .iter()
                .position(|local| local == name)
                .map(|index| locals[index].clone())
                .unwrap_or(Value::Unbound);
            Value::new_cell(initial)
        })
        .collect();
    if function.closure.len() != code.freevars.len() {
        return Err(VmError::runtime(format!(
            "function {} expects {} free variables but closes over {}",
            function.name,
            code.freevars.len(),
            function.closure.len()
        )));
    }
    cells.extend(function.closure.iter().cloned());

    Ok(Frame { locals, cells })
}

/// Flattens the operands of the `CALL_FUNCTION` family into positional and keyword arguments.
///
/// `keywords` holds alternating name/value operands as they sit on the stack.
pub fn gather_call_args(
    positional: Vec<Value>,
    keywords: Vec<Value>,
    star: Option<Value>,
    star_star: Option<Value>,
) -> Result<(Vec<Value>, Vec<(String, Value)>), VmError> {
    let mut args = positional;
    let mut kwargs: Vec<(String, Value)> = Vec::with_capacity(keywords.len() / 2);
    let mut pairs = keywords.into_iter();
    while let (Some(name), Some(value)) = (pairs.next(), pairs.next()) {
        let Value::Str(name) = name else {
            raise!(TypeError, "keywords must be strings");
        };
        kwargs.push((name.to_string(), value));
    }
    if let Some(star) = star {
        match &star {
            Value::List(_) | Value::Tuple(_) | Value::Iterator(_) | Value::Range(_)
            | Value::Str(_) | Value::Dict(_) | Value::Set(_) => args.extend(object::collect(&star)?),
            other => raise!(
                TypeError,
                "argument after * must be a sequence, not {}",
                other.type_name()
            ),
        }
    }
    if let Some(star_star) = star_star {
        let Value::Dict(extra) = &star_star else {
            raise!(
                TypeError,
                "argument after ** must be a mapping, not {}",
                star_star.type_name()
            );
        };
        for (key, value) in extra.borrow().iter() {
            let Value::Str(name) = key else {
                raise!(TypeError, "keywords must be strings");
            };
            if kwargs.iter().any(|(existing, _)| existing.as_str() == &**name) {
                raise!(TypeError, "got multiple values for keyword argument '{}'", name);
            }
            kwargs.push((name.to_string(), value.clone()));
        }
    }
    Ok((args, kwargs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_bytecode::CodeBuilder;
    use std::sync::Arc;

    use crate::value::Globals;

    fn function(params: &[&str], defaults: Vec<Value>, varargs: bool) -> Function {
        let mut builder = CodeBuilder::new("f").params(params);
        if varargs {
            builder = builder.varargs("rest");
        }
        builder.load_none().ret();
        Function {
            name: "f".to_string(),
            code: Arc::new(builder.build().unwrap()),
            globals: Globals::new(),
            defaults,
            closure: Vec::new(),
        }
    }

    #[test]
    fn defaults_and_keywords_fill_parameters() {
        let f = function(&["a", "b", "c"], vec![Value::Int(30)], false);
        let frame = bind_arguments(
            &f,
            vec![Value::Int(1)],
            vec![("b".to_string(), Value::Int(2))],
        )
        .unwrap();
        assert_eq!(frame.locals, vec![Value::Int(1), Value::Int(2), Value::Int(30)]);
    }

    #[test]
    fn surplus_positionals_land_in_varargs() {
        let f = function(&["a"], Vec::new(), true);
        let frame = bind_arguments(&f, vec![Value::Int(1), Value::Int(2), Value::Int(3)], Vec::new())
            .unwrap();
        assert_eq!(
            frame.locals[1],
            Value::tuple(vec![Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn arity_errors_read_like_the_classic_runtime() {
        let f = function(&["a", "b"], Vec::new(), false);
        let err = bind_arguments(&f, vec![Value::Int(1)], Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: f() takes exactly 2 arguments (1 given)");
        let err = bind_arguments(
            &f,
            vec![Value::Int(1), Value::Int(2)],
            vec![("a".to_string(), Value::Int(3))],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: f() got multiple values for keyword argument 'a'"
        );
    }

    #[test]
    fn gathers_star_arguments() {
        let (args, kwargs) = gather_call_args(
            vec![Value::Int(1)],
            vec![Value::str("k"), Value::Int(2)],
            Some(Value::tuple(vec![Value::Int(3)])),
            None,
        )
        .unwrap();
        assert_eq!(args, vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(kwargs, vec![("k".to_string(), Value::Int(2))]);
    }
}
