//! Assembler for stack-machine code objects.
//!
//! `CodeBuilder` interns constants, names and local variables, and resolves forward labels when
//! the code object is finished. It is the way tests and demos produce bytecode without a front
//! end.

use std::collections::HashMap;
use std::sync::Arc;

use crate::code::{CodeObject, Const, CO_VARARGS, CO_VARKEYWORDS};
use crate::opcode::{CallArgs, CompareOp, JumpKind, Opcode};
use crate::BytecodeError;

/// A jump target that may be bound after it is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug)]
struct Fixup {
    /// Offset of the jump instruction.
    at: usize,
    label: Label,
}

#[derive(Debug)]
pub struct CodeBuilder {
    name: String,
    argcount: u32,
    flags: u32,
    code: Vec<u8>,
    consts: Vec<Const>,
    names: Vec<String>,
    name_map: HashMap<String, u32>,
    varnames: Vec<String>,
    varname_map: HashMap<String, u32>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argcount: 0,
            flags: 0,
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            name_map: HashMap::new(),
            varnames: Vec::new(),
            varname_map: HashMap::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Declares positional parameters. Must be called before any other local is referenced.
    pub fn params(mut self, params: &[&str]) -> Self {
        for param in params {
            self.local(param);
        }
        self.argcount = params.len() as u32;
        self
    }

    /// Declares a `*args` parameter after the positional ones.
    pub fn varargs(mut self, name: &str) -> Self {
        self.local(name);
        self.flags |= CO_VARARGS;
        self
    }

    /// Declares a `**kwargs` parameter after the positional and `*args` ones.
    pub fn varkeywords(mut self, name: &str) -> Self {
        self.local(name);
        self.flags |= CO_VARKEYWORDS;
        self
    }

    pub fn cellvars(mut self, names: &[&str]) -> Self {
        self.cellvars = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn freevars(mut self, names: &[&str]) -> Self {
        self.freevars = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn add_const(&mut self, value: Const) -> u32 {
        if let Some(index) = self.consts.iter().position(|existing| same_const(existing, &value)) {
            return index as u32;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    pub fn name(&mut self, name: &str) -> u32 {
        if let Some(index) = self.name_map.get(name) {
            return *index;
        }
        let index = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_map.insert(name.to_string(), index);
        index
    }

    pub fn local(&mut self, name: &str) -> u32 {
        if let Some(index) = self.varname_map.get(name) {
            return *index;
        }
        let index = self.varnames.len() as u32;
        self.varnames.push(name.to_string());
        self.varname_map.insert(name.to_string(), index);
        index
    }

    fn cell(&self, name: &str) -> Result<u32, BytecodeError> {
        self.cellvars
            .iter()
            .chain(self.freevars.iter())
            .position(|cell| cell == name)
            .map(|index| index as u32)
            .ok_or_else(|| BytecodeError::Assembly {
                message: format!("{} is neither a cell nor a free variable", name),
            })
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0 as usize] = Some(self.code.len());
        self
    }

    /// Emits an argument-less instruction.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        debug_assert!(!opcode.has_argument(), "{} requires an argument", opcode);
        self.code.push(opcode.as_byte());
        self
    }

    /// Emits an instruction with a raw argument, prefixing `EXTENDED_ARG` when needed.
    pub fn op_arg(&mut self, opcode: Opcode, arg: u32) -> &mut Self {
        debug_assert!(opcode.has_argument(), "{} takes no argument", opcode);
        if arg > u32::from(u16::MAX) {
            self.code.push(Opcode::ExtendedArg.as_byte());
            self.code.extend_from_slice(&((arg >> 16) as u16).to_le_bytes());
        }
        self.code.push(opcode.as_byte());
        self.code.extend_from_slice(&(arg as u16).to_le_bytes());
        self
    }

    /// Emits a branch to `label`; the argument is patched in `build`.
    pub fn jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        debug_assert!(opcode.jump_kind().is_some(), "{} is not a branch", opcode);
        self.fixups.push(Fixup {
            at: self.code.len(),
            label,
        });
        self.code.push(opcode.as_byte());
        self.code.extend_from_slice(&[0, 0]);
        self
    }

    pub fn load_const(&mut self, value: Const) -> &mut Self {
        let index = self.add_const(value);
        self.op_arg(Opcode::LoadConst, index)
    }

    pub fn load_int(&mut self, value: i64) -> &mut Self {
        self.load_const(Const::Int(value))
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(Const::None)
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.op_arg(Opcode::LoadFast, index)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.op_arg(Opcode::StoreFast, index)
    }

    pub fn delete_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.op_arg(Opcode::DeleteFast, index)
    }

    /// Emits an opcode whose argument indexes `co_names`.
    pub fn named(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        debug_assert!(opcode.uses_name(), "{} does not take a name", opcode);
        let index = self.name(name);
        self.op_arg(opcode, index)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadGlobal, name)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        self.named(Opcode::LoadAttr, name)
    }

    /// Emits an opcode whose argument indexes the cell/free variables.
    pub fn deref(&mut self, opcode: Opcode, name: &str) -> Result<&mut Self, BytecodeError> {
        debug_assert!(opcode.uses_cell(), "{} does not take a cell", opcode);
        let index = self.cell(name)?;
        Ok(self.op_arg(opcode, index))
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.op_arg(Opcode::CompareOp, op as u32)
    }

    pub fn call(&mut self, positional: usize) -> &mut Self {
        self.op_arg(Opcode::CallFunction, CallArgs::pack(positional, 0))
    }

    pub fn call_kw(&mut self, positional: usize, keyword: usize) -> &mut Self {
        self.op_arg(Opcode::CallFunction, CallArgs::pack(positional, keyword))
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op(Opcode::ReturnValue)
    }

    /// Resolves labels and produces the code object.
    pub fn build(&mut self) -> Result<CodeObject, BytecodeError> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0 as usize].ok_or_else(|| {
                BytecodeError::Assembly {
                    message: format!("label {} used at offset {} is never bound", fixup.label.0, fixup.at),
                }
            })?;
            let opcode = Opcode::from_byte(self.code[fixup.at]).ok_or_else(|| {
                BytecodeError::Assembly {
                    message: format!("fixup at offset {} is not an instruction", fixup.at),
                }
            })?;
            let arg = match opcode.jump_kind() {
                Some(JumpKind::Relative) => {
                    let next = fixup.at + opcode.size();
                    target.checked_sub(next).ok_or_else(|| BytecodeError::Assembly {
                        message: format!(
                            "{} at offset {} cannot jump backwards to {}",
                            opcode, fixup.at, target
                        ),
                    })?
                }
                _ => target,
            };
            let arg = u16::try_from(arg).map_err(|_| BytecodeError::Assembly {
                message: format!("jump argument {} at offset {} exceeds 16 bits", arg, fixup.at),
            })?;
            self.code[fixup.at + 1..fixup.at + 3].copy_from_slice(&arg.to_le_bytes());
        }
        self.fixups.clear();

        Ok(CodeObject {
            name: self.name.clone(),
            argcount: self.argcount,
            nlocals: self.varnames.len() as u32,
            flags: self.flags,
            code: self.code.clone(),
            consts: self.consts.clone(),
            names: self.names.clone(),
            varnames: self.varnames.clone(),
            cellvars: self.cellvars.clone(),
            freevars: self.freevars.clone(),
        })
    }

    pub fn build_arc(&mut self) -> Result<Arc<CodeObject>, BytecodeError> {
        self.build().map(Arc::new)
    }
}

/// Constants are interned by kind and value; `1`, `1.0` and `True` stay distinct.
fn same_const(left: &Const, right: &Const) -> bool {
    match (left, right) {
        (Const::None, Const::None) => true,
        (Const::Bool(a), Const::Bool(b)) => a == b,
        (Const::Int(a), Const::Int(b)) => a == b,
        (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
        (Const::Str(a), Const::Str(b)) => a == b,
        (Const::Tuple(a), Const::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(l, r)| same_const(l, r))
        }
        (Const::Code(a), Const::Code(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}
