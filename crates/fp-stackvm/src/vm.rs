use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use fp_bytecode::{decode_at, CallArgs, CodeObject, CompareOp, Instruction, Opcode};
use tracing::trace;

use crate::builtins::lookup_builtin;
use crate::error::{ExceptionKind, VmError};
use crate::frame::{bind_arguments, gather_call_args, module_frame, seed_constants, Frame};
use crate::object::{self, BinaryOp, UnaryOp};
use crate::raise;
use crate::value::{CellRef, Function, Globals, Value};
use crate::{ExecLimits, FunctionRunner, DEFAULT_MAX_DEPTH};

#[derive(Debug, Clone)]
pub struct StackVmOptions {
    /// Total instructions one top-level invocation may execute.
    pub instruction_limit: Option<u64>,
    pub max_depth: usize,
}

impl Default for StackVmOptions {
    fn default() -> Self {
        Self {
            instruction_limit: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Stand-alone stack interpreter: every function call is executed by `execute`.
pub struct StackVm {
    limits: ExecLimits,
    output: RefCell<String>,
}

impl StackVm {
    pub fn new(options: StackVmOptions) -> Self {
        Self {
            limits: ExecLimits::new(options.instruction_limit, options.max_depth),
            output: RefCell::new(String::new()),
        }
    }

    pub fn run_module(&self, code: &Arc<CodeObject>, globals: &Globals) -> Result<Value, VmError> {
        execute(self, code, globals, module_frame(code))
    }

    pub fn call(
        &self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError> {
        object::call(self, callee, args, kwargs)
    }

    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }

    pub fn executed(&self) -> u64 {
        self.limits.executed()
    }
}

impl Default for StackVm {
    fn default() -> Self {
        Self::new(StackVmOptions::default())
    }
}

impl FunctionRunner for StackVm {
    fn call_function(
        &self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError> {
        let frame = bind_arguments(function, args, kwargs)?;
        execute(self, &function.code, &function.globals, frame)
    }

    fn limits(&self) -> &ExecLimits {
        &self.limits
    }

    fn write_output(&self, text: &str) {
        self.output.borrow_mut().push_str(text);
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopBlock {
    /// Offset `BREAK_LOOP` continues at.
    exit: usize,
    stack_level: usize,
}

struct Activation<'a> {
    runner: &'a dyn FunctionRunner,
    code: &'a CodeObject,
    globals: &'a Globals,
    consts: Vec<Value>,
    locals: Vec<Value>,
    cells: Vec<CellRef>,
    stack: Vec<Value>,
    blocks: Vec<LoopBlock>,
    softspace: bool,
}

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
}

/// Runs one activation of `code` on the value stack.
pub fn execute(
    runner: &dyn FunctionRunner,
    code: &CodeObject,
    globals: &Globals,
    frame: Frame,
) -> Result<Value, VmError> {
    let _depth = runner.limits().enter()?;
    trace!(code = %code.name, "stack vm enter");
    let mut consts = Vec::with_capacity(code.consts.len());
    seed_constants(code, &mut consts);
    let mut activation = Activation {
        runner,
        code,
        globals,
        consts,
        locals: frame.locals,
        cells: frame.cells,
        stack: Vec::new(),
        blocks: Vec::new(),
        softspace: false,
    };
    let mut pc = 0usize;
    loop {
        runner.limits().step()?;
        let instr = decode_at(&code.code, pc).map_err(|err| VmError::runtime(err.to_string()))?;
        match activation.step(&instr)? {
            Flow::Next => pc = instr.next,
            Flow::Jump(target) => pc = target,
            Flow::Return(value) => return Ok(value),
        }
    }
}

pub fn unbound_local(name: &str) -> VmError {
    VmError::exception(
        ExceptionKind::UnboundLocalError,
        format!("local variable '{}' referenced before assignment", name),
    )
}

/// Error for reading an empty cell; cellvars come before freevars.
pub fn unbound_cell(code: &CodeObject, index: usize) -> VmError {
    let name = code.cell_name_at(index as u32).unwrap_or("?");
    if index < code.cellvars.len() {
        unbound_local(name)
    } else {
        VmError::exception(
            ExceptionKind::NameError,
            format!(
                "free variable '{}' referenced before assignment in enclosing scope",
                name
            ),
        )
    }
}

/// Global lookup falling back to builtins.
pub fn load_global(globals: &Globals, name: &str) -> Result<Value, VmError> {
    match globals.get(name).or_else(|| lookup_builtin(name)) {
        Some(value) => Ok(value),
        None => raise!(NameError, "global name '{}' is not defined", name),
    }
}

pub fn load_name(globals: &Globals, name: &str) -> Result<Value, VmError> {
    match globals.get(name).or_else(|| lookup_builtin(name)) {
        Some(value) => Ok(value),
        None => raise!(NameError, "name '{}' is not defined", name),
    }
}

/// `MAKE_FUNCTION`/`MAKE_CLOSURE`: wraps a code constant with its defaults and closure cells.
pub fn make_function(
    code: &Value,
    globals: &Globals,
    defaults: Vec<Value>,
    closure: Option<&Value>,
) -> Result<Value, VmError> {
    let Value::Code(code) = code else {
        return Err(VmError::runtime(format!(
            "MAKE_FUNCTION expects a code object, got {}",
            code.type_name()
        )));
    };
    let closure = match closure {
        None => Vec::new(),
        Some(Value::Tuple(cells)) => cells
            .iter()
            .map(|cell| match cell {
                Value::Cell(cell) => Ok(cell.clone()),
                other => Err(VmError::runtime(format!(
                    "closure item is {}, not a cell",
                    other.type_name()
                ))),
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(VmError::runtime(format!(
                "MAKE_CLOSURE expects a tuple of cells, got {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Function(Rc::new(Function {
        name: code.name.clone(),
        code: code.clone(),
        globals: globals.clone(),
        defaults,
        closure,
    })))
}

/// `RAISE_VARARGS` with its operands in stack order.
pub fn raise_varargs(operands: &[Value]) -> VmError {
    match operands {
        [] => VmError::type_error(
            "exceptions must be old-style classes or derived from BaseException, not NoneType",
        ),
        [value] => object::raise_value(value),
        [kind, value, ..] => match kind {
            Value::ExceptionType(kind) => {
                let message = match value {
                    Value::None => String::new(),
                    other => object::to_str(other),
                };
                VmError::exception(*kind, message)
            }
            other => object::raise_value(other),
        },
    }
}

impl Activation<'_> {
    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::runtime(format!("stack underflow in {}", self.code.name)))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, VmError> {
        if self.stack.len() < count {
            return Err(VmError::runtime(format!(
                "stack underflow in {}: need {} values, have {}",
                self.code.name,
                count,
                self.stack.len()
            )));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn top(&self) -> Result<&Value, VmError> {
        self.stack
            .last()
            .ok_or_else(|| VmError::runtime(format!("stack underflow in {}", self.code.name)))
    }

    fn name(&self, index: u32) -> Result<&str, VmError> {
        self.code
            .name_at(index)
            .ok_or_else(|| VmError::runtime(format!("name index {} out of range", index)))
    }

    fn cell(&self, index: u32) -> Result<&CellRef, VmError> {
        self.cells
            .get(index as usize)
            .ok_or_else(|| VmError::runtime(format!("cell index {} out of range", index)))
    }

    fn local(&mut self, index: u32) -> Result<&mut Value, VmError> {
        self.locals
            .get_mut(index as usize)
            .ok_or_else(|| VmError::runtime(format!("local index {} out of range", index)))
    }

    fn local_name(&self, index: usize) -> &str {
        self.code.varname_at(index as u32).unwrap_or("?")
    }

    fn step(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let arg = instr.arg;
        if let Some((op, in_place)) = BinaryOp::from_opcode(instr.opcode) {
            let right = self.pop()?;
            let left = self.pop()?;
            let result = if in_place {
                object::inplace(op, &left, &right)?
            } else {
                object::binary(op, &left, &right)?
            };
            self.stack.push(result);
            return Ok(Flow::Next);
        }
        if let Some(op) = UnaryOp::from_opcode(instr.opcode) {
            let value = self.pop()?;
            self.stack.push(object::unary(op, &value)?);
            return Ok(Flow::Next);
        }

        match instr.opcode {
            Opcode::Nop => {}
            Opcode::PopTop => {
                self.pop()?;
            }
            Opcode::RotTwo => return self.rotate(instr, 2),
            Opcode::RotThree => return self.rotate(instr, 3),
            Opcode::RotFour => return self.rotate(instr, 4),
            Opcode::DupTop => {
                let top = self.top()?.clone();
                self.stack.push(top);
            }
            Opcode::DupTopx => {
                let count = arg as usize;
                if count > self.stack.len() {
                    return Err(VmError::runtime("DUP_TOPX past the bottom of the stack"));
                }
                let start = self.stack.len() - count;
                self.stack.extend_from_within(start..);
            }
            Opcode::LoadConst => {
                let constant = self.consts.get(arg as usize).cloned().ok_or_else(|| {
                    VmError::runtime(format!("constant index {} out of range", arg))
                })?;
                self.stack.push(constant);
            }
            Opcode::LoadFast => {
                let value = self.local(arg)?;
                if value.is_unbound() {
                    return Err(unbound_local(self.local_name(arg as usize)));
                }
                let value = value.clone();
                self.stack.push(value);
            }
            Opcode::StoreFast => {
                let value = self.pop()?;
                *self.local(arg)? = value;
            }
            Opcode::DeleteFast => {
                let slot = self.local(arg)?;
                if slot.is_unbound() {
                    return Err(unbound_local(self.local_name(arg as usize)));
                }
                *slot = Value::Unbound;
            }
            Opcode::LoadName => {
                let value = load_name(self.globals, self.name(arg)?)?;
                self.stack.push(value);
            }
            Opcode::StoreName | Opcode::StoreGlobal => {
                let value = self.pop()?;
                let name = self.name(arg)?.to_string();
                self.globals.set(&name, value);
            }
            Opcode::DeleteName | Opcode::DeleteGlobal => {
                let name = self.name(arg)?;
                if self.globals.remove(name).is_none() {
                    raise!(NameError, "name '{}' is not defined", name);
                }
            }
            Opcode::LoadGlobal => {
                let value = load_global(self.globals, self.name(arg)?)?;
                self.stack.push(value);
            }
            Opcode::LoadAttr => {
                let target = self.pop()?;
                let value = object::get_attr(&target, self.name(arg)?)?;
                self.stack.push(value);
            }
            Opcode::StoreAttr => {
                let target = self.pop()?;
                let value = self.pop()?;
                object::set_attr(&target, self.name(arg)?, value)?;
            }
            Opcode::DeleteAttr => {
                let target = self.pop()?;
                object::del_attr(&target, self.name(arg)?)?;
            }
            Opcode::LoadClosure => {
                let cell = self.cell(arg)?.clone();
                self.stack.push(Value::Cell(cell));
            }
            Opcode::LoadDeref => {
                let value = self.cell(arg)?.borrow().clone();
                if value.is_unbound() {
                    return Err(unbound_cell(self.code, arg as usize));
                }
                self.stack.push(value);
            }
            Opcode::StoreDeref => {
                let value = self.pop()?;
                *self.cell(arg)?.borrow_mut() = value;
            }
            Opcode::BinarySubscr => {
                let key = self.pop()?;
                let container = self.pop()?;
                self.stack.push(object::get_item(&container, &key)?);
            }
            Opcode::StoreSubscr => {
                let key = self.pop()?;
                let container = self.pop()?;
                let value = self.pop()?;
                object::set_item(&container, &key, value)?;
            }
            Opcode::DeleteSubscr => {
                let key = self.pop()?;
                let container = self.pop()?;
                object::del_item(&container, &key)?;
            }
            Opcode::CompareOp => {
                let op = CompareOp::from_arg(arg)
                    .ok_or_else(|| VmError::runtime(format!("bad comparison {}", arg)))?;
                let right = self.pop()?;
                let left = self.pop()?;
                self.stack.push(object::compare(op, &left, &right)?);
            }
            Opcode::BuildTuple => {
                let items = self.pop_n(arg as usize)?;
                self.stack.push(Value::tuple(items));
            }
            Opcode::BuildList => {
                let items = self.pop_n(arg as usize)?;
                self.stack.push(Value::list(items));
            }
            Opcode::BuildSet => {
                let items = self.pop_n(arg as usize)?;
                self.stack.push(object::build_set(items)?);
            }
            Opcode::BuildMap => self.stack.push(object::build_map()),
            Opcode::StoreMap => {
                let key = self.pop()?;
                let value = self.pop()?;
                object::set_item(self.top()?, &key, value)?;
            }
            Opcode::BuildSlice => {
                let mut parts = self.pop_n(arg as usize)?;
                let step = if parts.len() == 3 {
                    parts.pop().unwrap_or(Value::None)
                } else {
                    Value::None
                };
                let stop = parts.pop().unwrap_or(Value::None);
                let start = parts.pop().unwrap_or(Value::None);
                self.stack.push(object::build_slice(start, stop, step));
            }
            Opcode::UnpackSequence => {
                let sequence = self.pop()?;
                let items = object::unpack_sequence(&sequence, arg as usize)?;
                self.stack.extend(items.into_iter().rev());
            }
            Opcode::ListAppend => {
                let item = self.pop()?;
                let depth = arg as usize;
                if depth == 0 || depth > self.stack.len() {
                    return Err(VmError::runtime("LIST_APPEND past the bottom of the stack"));
                }
                let list = self.stack[self.stack.len() - depth].clone();
                object::list_append(self.runner, &list, item)?;
            }
            Opcode::CallFunction
            | Opcode::CallFunctionVar
            | Opcode::CallFunctionKw
            | Opcode::CallFunctionVarKw => {
                let counts = CallArgs::unpack(arg);
                let star_star = if matches!(
                    instr.opcode,
                    Opcode::CallFunctionKw | Opcode::CallFunctionVarKw
                ) {
                    Some(self.pop()?)
                } else {
                    None
                };
                let star = if matches!(
                    instr.opcode,
                    Opcode::CallFunctionVar | Opcode::CallFunctionVarKw
                ) {
                    Some(self.pop()?)
                } else {
                    None
                };
                let keywords = self.pop_n(2 * counts.keyword)?;
                let positional = self.pop_n(counts.positional)?;
                let callee = self.pop()?;
                let (args, kwargs) = gather_call_args(positional, keywords, star, star_star)?;
                let result = object::call(self.runner, &callee, args, kwargs)?;
                self.stack.push(result);
            }
            Opcode::MakeFunction => {
                let code = self.pop()?;
                let defaults = self.pop_n(arg as usize)?;
                let function = make_function(&code, self.globals, defaults, None)?;
                self.stack.push(function);
            }
            Opcode::MakeClosure => {
                let code = self.pop()?;
                let closure = self.pop()?;
                let defaults = self.pop_n(arg as usize)?;
                let function = make_function(&code, self.globals, defaults, Some(&closure))?;
                self.stack.push(function);
            }
            Opcode::RaiseVarargs => {
                let operands = self.pop_n(arg as usize)?;
                return Err(raise_varargs(&operands));
            }
            Opcode::GetIter => {
                let iterable = self.pop()?;
                self.stack.push(object::get_iter(&iterable)?);
            }
            Opcode::ForIter => {
                let next = object::iter_next(self.top()?)?;
                match next {
                    Some(value) => self.stack.push(value),
                    None => {
                        self.pop()?;
                        return Ok(Flow::Jump(self.target(instr)?));
                    }
                }
            }
            Opcode::JumpForward | Opcode::JumpAbsolute | Opcode::ContinueLoop => {
                return Ok(Flow::Jump(self.target(instr)?));
            }
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let condition = object::truthy(&self.pop()?);
                if condition == (instr.opcode == Opcode::PopJumpIfTrue) {
                    return Ok(Flow::Jump(self.target(instr)?));
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let condition = object::truthy(self.top()?);
                if condition == (instr.opcode == Opcode::JumpIfTrueOrPop) {
                    return Ok(Flow::Jump(self.target(instr)?));
                }
                self.pop()?;
            }
            Opcode::SetupLoop => {
                let exit = self.target(instr)?;
                self.blocks.push(LoopBlock {
                    exit,
                    stack_level: self.stack.len(),
                });
            }
            Opcode::PopBlock => {
                self.blocks
                    .pop()
                    .ok_or_else(|| VmError::runtime("POP_BLOCK without an active block"))?;
            }
            Opcode::BreakLoop => {
                let block = self
                    .blocks
                    .pop()
                    .ok_or_else(|| VmError::runtime("BREAK_LOOP outside a loop"))?;
                self.stack.truncate(block.stack_level);
                return Ok(Flow::Jump(block.exit));
            }
            Opcode::ReturnValue => return Ok(Flow::Return(self.pop()?)),
            Opcode::PrintItem => {
                let value = self.pop()?;
                if self.softspace {
                    self.runner.write_output(" ");
                }
                self.runner.write_output(&object::to_str(&value));
                self.softspace = true;
            }
            Opcode::PrintNewline => {
                self.runner.write_output("\n");
                self.softspace = false;
            }
            other => {
                return Err(VmError::Unsupported {
                    message: format!("{} at offset {} in {}", other, instr.offset, self.code.name),
                })
            }
        }
        Ok(Flow::Next)
    }

    fn target(&self, instr: &Instruction) -> Result<usize, VmError> {
        instr
            .jump_target()
            .ok_or_else(|| VmError::runtime(format!("{} has no branch target", instr.opcode)))
    }

    /// Moves the top of stack below the next `depth - 1` values.
    fn rotate(&mut self, instr: &Instruction, depth: usize) -> Result<Flow, VmError> {
        if self.stack.len() < depth {
            return Err(VmError::runtime(format!(
                "{} past the bottom of the stack",
                instr.opcode
            )));
        }
        let start = self.stack.len() - depth;
        self.stack[start..].rotate_right(1);
        Ok(Flow::Next)
    }
}
