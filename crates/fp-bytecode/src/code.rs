use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const CO_VARARGS: u32 = 0x04;
pub const CO_VARKEYWORDS: u32 = 0x08;

/// A compile-time constant referenced by `LOAD_CONST`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Const>),
    Code(Arc<CodeObject>),
}

/// A compiled function body in stack-machine form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    pub argcount: u32,
    pub nlocals: u32,
    pub flags: u32,
    pub code: Vec<u8>,
    pub consts: Vec<Const>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
}

impl CodeObject {
    pub fn num_consts(&self) -> usize {
        self.consts.len()
    }

    pub fn num_locals(&self) -> usize {
        self.nlocals as usize
    }

    pub fn num_cells(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    pub fn has_varargs(&self) -> bool {
        self.flags & CO_VARARGS != 0
    }

    pub fn has_varkeywords(&self) -> bool {
        self.flags & CO_VARKEYWORDS != 0
    }

    pub fn name_at(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn varname_at(&self, index: u32) -> Option<&str> {
        self.varnames.get(index as usize).map(String::as_str)
    }

    /// Cell or free variable name; cellvars come first.
    pub fn cell_name_at(&self, index: u32) -> Option<&str> {
        let index = index as usize;
        if index < self.cellvars.len() {
            Some(self.cellvars[index].as_str())
        } else {
            self.freevars
                .get(index - self.cellvars.len())
                .map(String::as_str)
        }
    }

    /// Nested code objects in constant-pool order.
    pub fn nested_code(&self) -> impl Iterator<Item = &Arc<CodeObject>> {
        self.consts.iter().filter_map(|constant| match constant {
            Const::Code(code) => Some(code),
            _ => None,
        })
    }
}
