pub mod builder;
pub mod code;
pub mod decode;
pub mod format;
pub mod opcode;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use builder::{CodeBuilder, Label};
pub use code::{CodeObject, Const, CO_VARARGS, CO_VARKEYWORDS};
pub use decode::{decode_at, instructions, jump_targets, Instruction, Instructions};
pub use format::{format_code, format_const};
pub use opcode::{CallArgs, CompareOp, JumpKind, Opcode, HAVE_ARGUMENT};

pub const BYTECODE_MAGIC: [u8; 4] = *b"FPBC";
pub const BYTECODE_VERSION: u32 = 2;

/// Serialized module: the top-level code object plus its nested functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytecodeFile {
    pub version: u32,
    pub module: CodeObject,
}

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("bytecode assembly failed: {message}")]
    Assembly { message: String },
    #[error("bytecode encode failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("bytecode decode failed: {0}")]
    Decode(bincode::Error),
    #[error("bytecode format error: {message}")]
    Format { message: String },
}

pub fn encode_file(module: &CodeObject) -> Result<Vec<u8>, BytecodeError> {
    let file = BytecodeFile {
        version: BYTECODE_VERSION,
        module: module.clone(),
    };
    let mut encoded = Vec::new();
    encoded.extend_from_slice(&BYTECODE_MAGIC);
    encoded.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
    encoded.extend_from_slice(&bincode::serialize(&file)?);
    Ok(encoded)
}

pub fn decode_file(bytes: &[u8]) -> Result<BytecodeFile, BytecodeError> {
    if bytes.len() < 8 {
        return Err(BytecodeError::Format {
            message: "bytecode header too short".to_string(),
        });
    }
    let magic = &bytes[..4];
    if magic != BYTECODE_MAGIC {
        return Err(BytecodeError::Format {
            message: "invalid bytecode magic".to_string(),
        });
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != BYTECODE_VERSION {
        return Err(BytecodeError::Format {
            message: format!(
                "unsupported bytecode version {}, expected {}",
                version, BYTECODE_VERSION
            ),
        });
    }
    let file: BytecodeFile = bincode::deserialize(&bytes[8..]).map_err(BytecodeError::Decode)?;
    if file.version != BYTECODE_VERSION {
        return Err(BytecodeError::Format {
            message: format!(
                "bytecode payload version {} does not match expected {}",
                file.version, BYTECODE_VERSION
            ),
        });
    }
    validate_code(&file.module)?;
    Ok(file)
}

/// Checks that every operand indexes an existing table and every branch lands on an
/// instruction boundary. Nested code objects are validated recursively.
pub fn validate_code(code: &CodeObject) -> Result<(), BytecodeError> {
    if code.argcount as usize > code.num_locals() {
        return Err(BytecodeError::Format {
            message: format!(
                "code {} has {} params but only {} locals",
                code.name, code.argcount, code.nlocals
            ),
        });
    }
    if code.varnames.len() != code.num_locals() {
        return Err(BytecodeError::Format {
            message: format!(
                "code {} declares {} locals but names {}",
                code.name,
                code.nlocals,
                code.varnames.len()
            ),
        });
    }

    let mut starts = HashSet::new();
    let mut branches = Vec::new();
    for instr in instructions(&code.code) {
        let instr = instr?;
        starts.insert(instr.offset);
        validate_operand(code, &instr)?;
        if let Some(target) = instr.jump_target() {
            branches.push((instr.offset, target));
        }
    }
    for (offset, target) in branches {
        if !starts.contains(&target) {
            return Err(BytecodeError::Format {
                message: format!(
                    "code {}: branch at offset {} targets {} which is not an instruction",
                    code.name, offset, target
                ),
            });
        }
    }

    for nested in code.nested_code() {
        validate_code(nested)?;
    }
    Ok(())
}

fn validate_operand(code: &CodeObject, instr: &Instruction) -> Result<(), BytecodeError> {
    let (table, len) = if instr.opcode.uses_const() {
        ("const", code.num_consts())
    } else if instr.opcode.uses_name() {
        ("name", code.names.len())
    } else if instr.opcode.uses_local() {
        ("local", code.num_locals())
    } else if instr.opcode.uses_cell() {
        ("cell", code.num_cells())
    } else {
        return Ok(());
    };
    if instr.arg as usize >= len {
        return Err(BytecodeError::Format {
            message: format!(
                "code {}: {} at offset {} uses {} {} out of bounds",
                code.name, instr.opcode, instr.offset, table, instr.arg
            ),
        });
    }
    Ok(())
}
