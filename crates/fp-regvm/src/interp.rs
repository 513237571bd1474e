//! Threaded register interpreter.
//!
//! Dispatch goes through a 256-entry table of handler functions indexed by opcode byte. The
//! register file is laid out as constants, then locals, then temporaries, matching the
//! compiler's numbering. Every handler reads all of its inputs before it writes its
//! destination, which is what lets register compaction reuse an input's register.

use std::cell::RefCell;

use fp_bytecode::{CallArgs, CompareOp};
use fp_stackvm::object::{self, BinaryOp, UnaryOp};
use fp_stackvm::value::CellRef;
use fp_stackvm::vm::{
    load_global, load_name, make_function, raise_varargs, unbound_cell, unbound_local,
};
use fp_stackvm::{
    gather_call_args, seed_constants, Frame, FunctionRunner, Globals, Value, VmError,
};
use tracing::trace;

use crate::encode::{read_instr, RawInstr, RegisterCode};
use crate::opcode::RegOpcode;
use crate::optimize::INPLACE_FLAG;

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
}

type Handler = fn(&mut Activation<'_>, &RawInstr<'_>) -> Result<Flow, VmError>;

struct Activation<'a> {
    runner: &'a dyn FunctionRunner,
    code: &'a RegisterCode,
    globals: &'a Globals,
    registers: Vec<Value>,
    cells: Vec<CellRef>,
}

/// Register files kept for reuse by later activations on this thread.
const POOLED_REGISTER_FILES: usize = 32;

thread_local! {
    static REGISTER_POOL: RefCell<Vec<Vec<Value>>> = const { RefCell::new(Vec::new()) };
}

fn take_register_file(size: usize) -> Vec<Value> {
    let pooled = REGISTER_POOL
        .try_with(|pool| pool.borrow_mut().pop())
        .ok()
        .flatten();
    let mut registers = pooled.unwrap_or_default();
    registers.reserve(size);
    registers
}

fn recycle_register_file(mut registers: Vec<Value>) {
    registers.clear();
    let _ = REGISTER_POOL.try_with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < POOLED_REGISTER_FILES {
            pool.push(registers);
        }
    });
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        recycle_register_file(std::mem::take(&mut self.registers));
    }
}

impl Activation<'_> {
    #[inline]
    fn get(&self, instr: &RawInstr<'_>, slot: usize) -> &Value {
        &self.registers[instr.reg(slot)]
    }

    #[inline]
    fn set_dest(&mut self, instr: &RawInstr<'_>, value: Value) {
        self.registers[instr.dest()] = value;
    }

    /// Values of the first `count` slots.
    fn operands(&self, instr: &RawInstr<'_>, count: usize) -> Vec<Value> {
        (0..count).map(|slot| self.get(instr, slot).clone()).collect()
    }

    fn name(&self, index: u32) -> Result<&str, VmError> {
        self.code
            .code
            .name_at(index)
            .ok_or_else(|| VmError::runtime(format!("name index {} out of range", index)))
    }

    fn cell(&self, index: u32) -> Result<&CellRef, VmError> {
        self.cells
            .get(index as usize)
            .ok_or_else(|| VmError::runtime(format!("cell index {} out of range", index)))
    }
}

/// Runs one activation of compiled `code`.
pub fn execute(
    runner: &dyn FunctionRunner,
    code: &RegisterCode,
    globals: &Globals,
    frame: Frame,
) -> Result<Value, VmError> {
    let _depth = runner.limits().enter()?;
    trace!(code = %code.code.name, registers = code.num_registers, "register vm enter");
    if frame.locals.len() != code.num_locals as usize {
        return Err(VmError::runtime(format!(
            "frame for {} has {} locals, expected {}",
            code.code.name,
            frame.locals.len(),
            code.num_locals
        )));
    }

    let mut registers = take_register_file(code.num_registers as usize);
    seed_constants(&code.code, &mut registers);
    registers.extend(frame.locals);
    registers.resize(code.num_registers as usize, Value::Unbound);
    let mut activation = Activation {
        runner,
        code,
        globals,
        registers,
        cells: frame.cells,
    };

    let mut pc = code.entry();
    loop {
        runner.limits().step()?;
        let Some(instr) = read_instr(&code.bytes, pc) else {
            return Err(VmError::runtime(format!(
                "malformed register code in {} at byte {}",
                code.code.name, pc
            )));
        };
        match HANDLERS[instr.opcode as usize](&mut activation, &instr)? {
            Flow::Next => pc = instr.next,
            Flow::Jump(label) => pc = label,
            Flow::Return(value) => return Ok(value),
        }
    }
}

static HANDLERS: [Handler; 256] = build_handlers();

const fn build_handlers() -> [Handler; 256] {
    let mut table: [Handler; 256] = [op_invalid; 256];
    table[RegOpcode::Move as usize] = op_copy;
    table[RegOpcode::LoadConst as usize] = op_copy;
    table[RegOpcode::LoadFast as usize] = op_copy;
    table[RegOpcode::StoreFast as usize] = op_copy;
    table[RegOpcode::CheckLocal as usize] = op_check_local;
    table[RegOpcode::LoadGlobal as usize] = op_load_global;
    table[RegOpcode::StoreGlobal as usize] = op_store_global;
    table[RegOpcode::LoadName as usize] = op_load_name;
    table[RegOpcode::StoreName as usize] = op_store_global;
    table[RegOpcode::LoadAttr as usize] = op_load_attr;
    table[RegOpcode::StoreAttr as usize] = op_store_attr;
    table[RegOpcode::DeleteAttr as usize] = op_delete_attr;
    table[RegOpcode::LoadClosure as usize] = op_load_closure;
    table[RegOpcode::LoadDeref as usize] = op_load_deref;
    table[RegOpcode::StoreDeref as usize] = op_store_deref;
    table[RegOpcode::UnaryOp as usize] = op_unary;
    table[RegOpcode::BinaryOp as usize] = op_binary;
    table[RegOpcode::InplaceOp as usize] = op_inplace;
    table[RegOpcode::CompareOp as usize] = op_compare;
    table[RegOpcode::BinarySubscr as usize] = op_subscr;
    table[RegOpcode::StoreSubscr as usize] = op_store_subscr;
    table[RegOpcode::DeleteSubscr as usize] = op_delete_subscr;
    table[RegOpcode::BuildMap as usize] = op_build_map;
    table[RegOpcode::StoreMap as usize] = op_store_subscr;
    table[RegOpcode::GetIter as usize] = op_get_iter;
    table[RegOpcode::ListAppend as usize] = op_list_append;
    table[RegOpcode::UnpackSequence as usize] = op_unpack_sequence;
    table[RegOpcode::UnpackItem as usize] = op_unpack_item;
    table[RegOpcode::ReturnValue as usize] = op_return;
    table[RegOpcode::IntAdd as usize] = op_int_add;
    table[RegOpcode::IntSub as usize] = op_int_sub;
    table[RegOpcode::IntMul as usize] = op_int_mul;
    table[RegOpcode::IntCompare as usize] = op_int_compare;
    table[RegOpcode::ListSubscr as usize] = op_list_subscr;
    table[RegOpcode::DictSubscr as usize] = op_dict_subscr;
    table[RegOpcode::StoreListSubscr as usize] = op_store_list_subscr;
    table[RegOpcode::StoreDictSubscr as usize] = op_store_dict_subscr;
    table[RegOpcode::ListContains as usize] = op_list_contains;
    table[RegOpcode::DictContains as usize] = op_dict_contains;
    table[RegOpcode::Jump as usize] = op_jump;
    table[RegOpcode::JumpIfFalse as usize] = op_jump_if_false;
    table[RegOpcode::JumpIfTrue as usize] = op_jump_if_true;
    table[RegOpcode::ForIter as usize] = op_for_iter;
    table[RegOpcode::BuildTuple as usize] = op_build_tuple;
    table[RegOpcode::BuildList as usize] = op_build_list;
    table[RegOpcode::BuildSet as usize] = op_build_set;
    table[RegOpcode::BuildSlice as usize] = op_build_slice;
    table[RegOpcode::CallFunction as usize] = op_call;
    table[RegOpcode::CallFunctionVar as usize] = op_call;
    table[RegOpcode::CallFunctionKw as usize] = op_call;
    table[RegOpcode::CallFunctionVarKw as usize] = op_call;
    table[RegOpcode::MakeFunction as usize] = op_make_function;
    table[RegOpcode::MakeClosure as usize] = op_make_closure;
    table[RegOpcode::RaiseVarargs as usize] = op_raise;
    table
}

fn op_invalid(_: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    Err(VmError::runtime(format!(
        "invalid register opcode {}",
        instr.opcode
    )))
}

fn op_copy(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = vm.get(instr, 0).clone();
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_check_local(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    if vm.get(instr, 0).is_unbound() {
        let name = vm.code.code.varname_at(instr.arg).unwrap_or("?");
        return Err(unbound_local(name));
    }
    Ok(Flow::Next)
}

fn op_load_global(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = load_global(vm.globals, vm.name(instr.arg)?)?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_load_name(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = load_name(vm.globals, vm.name(instr.arg)?)?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_store_global(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = vm.get(instr, 0).clone();
    vm.globals.set(vm.name(instr.arg)?, value);
    Ok(Flow::Next)
}

fn op_load_attr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = object::get_attr(vm.get(instr, 0), vm.name(instr.arg)?)?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_store_attr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = vm.get(instr, 1).clone();
    object::set_attr(vm.get(instr, 0), vm.name(instr.arg)?, value)?;
    Ok(Flow::Next)
}

fn op_delete_attr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    object::del_attr(vm.get(instr, 0), vm.name(instr.arg)?)?;
    Ok(Flow::Next)
}

fn op_load_closure(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let cell = vm.cell(instr.arg)?.clone();
    vm.set_dest(instr, Value::Cell(cell));
    Ok(Flow::Next)
}

fn op_load_deref(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = vm.cell(instr.arg)?.borrow().clone();
    if value.is_unbound() {
        return Err(unbound_cell(&vm.code.code, instr.arg as usize));
    }
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_store_deref(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = vm.get(instr, 0).clone();
    *vm.cell(instr.arg)?.borrow_mut() = value;
    Ok(Flow::Next)
}

fn binary_op(arg: u32) -> Result<BinaryOp, VmError> {
    BinaryOp::from_arg(arg).ok_or_else(|| VmError::runtime(format!("bad binary operator {}", arg)))
}

fn op_unary(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let op = UnaryOp::from_arg(instr.arg)
        .ok_or_else(|| VmError::runtime(format!("bad unary operator {}", instr.arg)))?;
    let value = object::unary(op, vm.get(instr, 0))?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_binary(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = object::binary(binary_op(instr.arg)?, vm.get(instr, 0), vm.get(instr, 1))?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_inplace(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = object::inplace(binary_op(instr.arg)?, vm.get(instr, 0), vm.get(instr, 1))?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn compare_op(arg: u32) -> Result<CompareOp, VmError> {
    CompareOp::from_arg(arg).ok_or_else(|| VmError::runtime(format!("bad comparison {}", arg)))
}

fn op_compare(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = object::compare(compare_op(instr.arg)?, vm.get(instr, 0), vm.get(instr, 1))?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_subscr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = object::get_item(vm.get(instr, 0), vm.get(instr, 1))?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

/// `STORE_SUBSCR [container, key, value]`; `STORE_MAP` shares the layout.
fn op_store_subscr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = vm.get(instr, 2).clone();
    object::set_item(vm.get(instr, 0), vm.get(instr, 1), value)?;
    Ok(Flow::Next)
}

fn op_delete_subscr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    object::del_item(vm.get(instr, 0), vm.get(instr, 1))?;
    Ok(Flow::Next)
}

fn op_build_map(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    vm.set_dest(instr, object::build_map());
    Ok(Flow::Next)
}

fn op_get_iter(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let value = object::get_iter(vm.get(instr, 0))?;
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_list_append(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let item = vm.get(instr, 1).clone();
    object::list_append(vm.runner, vm.get(instr, 0), item)?;
    vm.set_dest(instr, Value::None);
    Ok(Flow::Next)
}

fn op_unpack_sequence(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let items = object::unpack_sequence(vm.get(instr, 0), instr.arg as usize)?;
    vm.set_dest(instr, Value::tuple(items));
    Ok(Flow::Next)
}

fn op_unpack_item(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let Value::Tuple(items) = vm.get(instr, 0) else {
        return Err(VmError::runtime("UNPACK_ITEM expects an unpacked tuple"));
    };
    let item = items
        .get(instr.arg as usize)
        .cloned()
        .ok_or_else(|| VmError::runtime(format!("unpacked item {} missing", instr.arg)))?;
    vm.set_dest(instr, item);
    Ok(Flow::Next)
}

fn op_return(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    Ok(Flow::Return(vm.get(instr, 0).clone()))
}

fn int_arith(
    vm: &mut Activation<'_>,
    instr: &RawInstr<'_>,
    op: BinaryOp,
) -> Result<Flow, VmError> {
    let left = vm.get(instr, 0);
    let right = vm.get(instr, 1);
    let fast = match (left, right) {
        (Value::Int(a), Value::Int(b)) => object::int_binary(op, *a, *b)?,
        _ => None,
    };
    let value = match fast {
        Some(value) => value,
        None if instr.arg & INPLACE_FLAG != 0 => object::inplace(op, left, right)?,
        None => object::binary(op, left, right)?,
    };
    vm.set_dest(instr, value);
    Ok(Flow::Next)
}

fn op_int_add(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    int_arith(vm, instr, BinaryOp::Add)
}

fn op_int_sub(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    int_arith(vm, instr, BinaryOp::Subtract)
}

fn op_int_mul(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    int_arith(vm, instr, BinaryOp::Multiply)
}

fn op_int_compare(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let op = compare_op(instr.arg)?;
    let fast = match (vm.get(instr, 0), vm.get(instr, 1)) {
        (Value::Int(a), Value::Int(b)) => match op {
            CompareOp::Lt => Some(a < b),
            CompareOp::Le => Some(a <= b),
            CompareOp::Eq => Some(a == b),
            CompareOp::Ne => Some(a != b),
            CompareOp::Gt => Some(a > b),
            CompareOp::Ge => Some(a >= b),
            _ => None,
        },
        _ => None,
    };
    match fast {
        Some(result) => {
            vm.set_dest(instr, Value::Bool(result));
            Ok(Flow::Next)
        }
        None => op_compare(vm, instr),
    }
}

fn op_list_subscr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let fast = match (vm.get(instr, 0), vm.get(instr, 1)) {
        (Value::List(items), key @ Value::Int(_)) => {
            let items = items.borrow();
            object::normalize_index(key, items.len(), "list indices")?
                .map(|index| items[index].clone())
        }
        _ => None,
    };
    match fast {
        Some(value) => {
            vm.set_dest(instr, value);
            Ok(Flow::Next)
        }
        None => op_subscr(vm, instr),
    }
}

fn op_dict_subscr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let fast = match (vm.get(instr, 0), vm.get(instr, 1)) {
        (Value::Dict(dict), key @ (Value::Int(_) | Value::Str(_))) => dict.borrow().get(key).cloned(),
        _ => None,
    };
    match fast {
        Some(value) => {
            vm.set_dest(instr, value);
            Ok(Flow::Next)
        }
        None => op_subscr(vm, instr),
    }
}

fn op_store_list_subscr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    if let (Value::List(items), key @ Value::Int(_)) = (vm.get(instr, 0), vm.get(instr, 1)) {
        let len = items.borrow().len();
        if let Some(index) = object::normalize_index(key, len, "list indices")? {
            let value = vm.get(instr, 2).clone();
            items.borrow_mut()[index] = value;
            return Ok(Flow::Next);
        }
    }
    op_store_subscr(vm, instr)
}

fn op_store_dict_subscr(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    if let (Value::Dict(dict), key @ (Value::Int(_) | Value::Str(_))) =
        (vm.get(instr, 0), vm.get(instr, 1))
    {
        let value = vm.get(instr, 2).clone();
        dict.borrow_mut().insert(key.clone(), value);
        return Ok(Flow::Next);
    }
    op_store_subscr(vm, instr)
}

fn contains_result(arg: u32, found: bool) -> Value {
    Value::Bool(if arg == CompareOp::NotIn as u32 {
        !found
    } else {
        found
    })
}

fn op_list_contains(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let found = match vm.get(instr, 1) {
        Value::List(items) => {
            let needle = vm.get(instr, 0);
            Some(items.borrow().iter().any(|candidate| candidate == needle))
        }
        _ => None,
    };
    match found {
        Some(found) => {
            vm.set_dest(instr, contains_result(instr.arg, found));
            Ok(Flow::Next)
        }
        None => op_compare(vm, instr),
    }
}

fn op_dict_contains(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let found = match (vm.get(instr, 0), vm.get(instr, 1)) {
        (key @ (Value::Int(_) | Value::Str(_)), Value::Dict(dict)) => {
            Some(dict.borrow().contains_key(key))
        }
        _ => None,
    };
    match found {
        Some(found) => {
            vm.set_dest(instr, contains_result(instr.arg, found));
            Ok(Flow::Next)
        }
        None => op_compare(vm, instr),
    }
}

fn op_jump(_: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    Ok(Flow::Jump(instr.label as usize))
}

fn op_jump_if_false(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    if object::truthy(vm.get(instr, 0)) {
        Ok(Flow::Next)
    } else {
        Ok(Flow::Jump(instr.label as usize))
    }
}

fn op_jump_if_true(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    if object::truthy(vm.get(instr, 0)) {
        Ok(Flow::Jump(instr.label as usize))
    } else {
        Ok(Flow::Next)
    }
}

fn op_for_iter(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    match object::iter_next(vm.get(instr, 0))? {
        Some(item) => {
            vm.set_dest(instr, item);
            Ok(Flow::Next)
        }
        None => Ok(Flow::Jump(instr.label as usize)),
    }
}

fn op_build_tuple(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let items = vm.operands(instr, instr.count() - 1);
    vm.set_dest(instr, Value::tuple(items));
    Ok(Flow::Next)
}

fn op_build_list(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let items = vm.operands(instr, instr.count() - 1);
    vm.set_dest(instr, Value::list(items));
    Ok(Flow::Next)
}

fn op_build_set(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let items = vm.operands(instr, instr.count() - 1);
    vm.set_dest(instr, object::build_set(items)?);
    Ok(Flow::Next)
}

fn op_build_slice(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let start = vm.get(instr, 0).clone();
    let stop = vm.get(instr, 1).clone();
    let step = if instr.count() == 4 {
        vm.get(instr, 2).clone()
    } else {
        Value::None
    };
    vm.set_dest(instr, object::build_slice(start, stop, step));
    Ok(Flow::Next)
}

fn op_call(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let counts = CallArgs::unpack(instr.arg);
    let (star, star_star) = match RegOpcode::from_byte(instr.opcode) {
        Some(RegOpcode::CallFunctionVar) => (true, false),
        Some(RegOpcode::CallFunctionKw) => (false, true),
        Some(RegOpcode::CallFunctionVarKw) => (true, true),
        _ => (false, false),
    };
    let callee = vm.get(instr, 0).clone();
    let mut slot = 1;
    let positional = (slot..slot + counts.positional)
        .map(|index| vm.get(instr, index).clone())
        .collect();
    slot += counts.positional;
    let keywords = (slot..slot + 2 * counts.keyword)
        .map(|index| vm.get(instr, index).clone())
        .collect();
    slot += 2 * counts.keyword;
    let star = star.then(|| {
        slot += 1;
        vm.get(instr, slot - 1).clone()
    });
    let star_star = star_star.then(|| vm.get(instr, slot).clone());

    let (args, kwargs) = gather_call_args(positional, keywords, star, star_star)?;
    let result = object::call(vm.runner, &callee, args, kwargs)?;
    vm.set_dest(instr, result);
    Ok(Flow::Next)
}

fn op_make_function(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let defaults = (1..instr.count() - 1)
        .map(|slot| vm.get(instr, slot).clone())
        .collect();
    let function = make_function(vm.get(instr, 0), vm.globals, defaults, None)?;
    vm.set_dest(instr, function);
    Ok(Flow::Next)
}

fn op_make_closure(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let defaults = (2..instr.count() - 1)
        .map(|slot| vm.get(instr, slot).clone())
        .collect();
    let function = make_function(
        vm.get(instr, 0),
        vm.globals,
        defaults,
        Some(vm.get(instr, 1)),
    )?;
    vm.set_dest(instr, function);
    Ok(Flow::Next)
}

fn op_raise(vm: &mut Activation<'_>, instr: &RawInstr<'_>) -> Result<Flow, VmError> {
    let operands = vm.operands(instr, instr.count());
    Err(raise_varargs(&operands))
}
