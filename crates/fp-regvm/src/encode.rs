//! Lowering of the register IR into the byte stream the interpreter executes.
//!
//! The stream starts with a 12-byte prelude (`FPRG`, the register count, flags). Every
//! instruction is `op:u8 count:u8 arg:u32`, followed by `label:u32` for branch-shaped
//! opcodes, followed by `count` little-endian `u16` register numbers with the destination
//! last. A label is the absolute byte offset of the target block and is never 0, since the
//! prelude occupies the start of the stream.

use std::fmt::Write as _;
use std::sync::Arc;

use fp_bytecode::CodeObject;
use itertools::Itertools;

use crate::error::CompileError;
use crate::ir::CompilerState;
use crate::opcode::{RegOpcode, Shape, MAX_BRANCH_REGISTERS, MAX_FIXED_REGISTERS, OP_TABLE};
use crate::{compile_bail, compile_ensure};

pub const MAGIC: &[u8; 4] = b"FPRG";
pub const PRELUDE_SIZE: usize = 12;
const HEADER_SIZE: usize = 6;
const LABEL_SIZE: usize = 4;

/// Summary of one compilation, kept alongside the artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub source_instructions: usize,
    pub blocks: usize,
    pub ops: usize,
    pub optimizer_changes: usize,
}

/// A compiled function: immutable once built and shareable between threads.
#[derive(Debug, Clone)]
pub struct RegisterCode {
    pub bytes: Vec<u8>,
    pub num_registers: u32,
    pub num_consts: u32,
    pub num_locals: u32,
    pub num_cells: u32,
    pub code: Arc<CodeObject>,
    pub stats: CompileStats,
}

impl RegisterCode {
    /// First instruction after the prelude.
    pub fn entry(&self) -> usize {
        PRELUDE_SIZE
    }

    pub fn instructions(&self) -> Result<Vec<DecodedInstr>, CompileError> {
        decode_all(&self.bytes)
    }
}

/// Zero-copy view of one encoded instruction.
#[derive(Debug, Clone, Copy)]
pub struct RawInstr<'a> {
    pub opcode: u8,
    pub arg: u32,
    pub label: u32,
    regs: &'a [u8],
    pub next: usize,
}

impl RawInstr<'_> {
    pub fn count(&self) -> usize {
        self.regs.len() / 2
    }

    #[inline]
    pub fn reg(&self, index: usize) -> usize {
        u16::from_le_bytes([self.regs[2 * index], self.regs[2 * index + 1]]) as usize
    }

    /// The destination register: always the last slot.
    #[inline]
    pub fn dest(&self) -> usize {
        self.reg(self.count() - 1)
    }

    pub fn regs(&self) -> impl Iterator<Item = usize> + '_ {
        self.regs
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as usize)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(slice.try_into().ok()?))
}

/// Reads the instruction at `offset`; `None` if it is truncated or the opcode is unknown.
#[inline]
pub fn read_instr(bytes: &[u8], offset: usize) -> Option<RawInstr<'_>> {
    let opcode = *bytes.get(offset)?;
    let count = *bytes.get(offset + 1)? as usize;
    let arg = read_u32(bytes, offset + 2)?;
    let info = OP_TABLE[opcode as usize]?;
    let (label, start) = if info.shape == Shape::Branch {
        (
            read_u32(bytes, offset + HEADER_SIZE)?,
            offset + HEADER_SIZE + LABEL_SIZE,
        )
    } else {
        (0, offset + HEADER_SIZE)
    };
    let end = start + 2 * count;
    Some(RawInstr {
        opcode,
        arg,
        label,
        regs: bytes.get(start..end)?,
        next: end,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstr {
    pub offset: usize,
    pub opcode: RegOpcode,
    pub arg: u32,
    pub label: Option<u32>,
    pub registers: Vec<u32>,
    pub next: usize,
}

pub fn decode_all(bytes: &[u8]) -> Result<Vec<DecodedInstr>, CompileError> {
    compile_ensure!(
        bytes.len() >= PRELUDE_SIZE && &bytes[..4] == MAGIC,
        "register code has no prelude"
    );
    let mut offset = PRELUDE_SIZE;
    let mut decoded = Vec::new();
    while offset < bytes.len() {
        let Some(raw) = read_instr(bytes, offset) else {
            compile_bail!("malformed register instruction at byte {}", offset);
        };
        let Some(opcode) = RegOpcode::from_byte(raw.opcode) else {
            compile_bail!("unknown register opcode {} at byte {}", raw.opcode, offset);
        };
        decoded.push(DecodedInstr {
            offset,
            opcode,
            arg: raw.arg,
            label: (opcode.shape() == Shape::Branch).then_some(raw.label),
            registers: raw.regs().map(|reg| reg as u32).collect(),
            next: raw.next,
        });
        offset = raw.next;
    }
    Ok(decoded)
}

/// Lays out the live blocks in order and resolves branch labels.
pub fn lower(
    state: &mut CompilerState,
    verify_layout: bool,
) -> Result<RegisterCode, CompileError> {
    state.check_exits()?;
    let ids = state.live_block_ids();
    compile_ensure!(
        ids.first() == Some(&state.entry),
        "entry block {} is not laid out first",
        state.entry
    );
    for (position, &id) in ids.iter().enumerate() {
        let block = &state.blocks[id];
        if block.falls_through() {
            compile_ensure!(
                ids.get(position + 1) == block.exits.first(),
                "block {} falls through to {:?} but is followed by {:?}",
                id,
                block.exits.first(),
                ids.get(position + 1)
            );
        }
    }
    compile_ensure!(
        state.num_registers <= u32::from(u16::MAX) + 1,
        "{} registers do not fit the encoding",
        state.num_registers
    );

    let mut bytes = Vec::with_capacity(PRELUDE_SIZE + state.op_count() * 10);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&state.num_registers.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    let mut patches = Vec::new();
    for &id in &ids {
        state.blocks[id].encoded_offset = bytes.len();
        let block = &state.blocks[id];
        let live: Vec<_> = block.live_ops().collect();
        for (index, op) in live.iter().enumerate() {
            let registers: Vec<u32> = op.registers().collect();
            let limit = match op.opcode.shape() {
                Shape::Fixed => MAX_FIXED_REGISTERS,
                Shape::Branch => MAX_BRANCH_REGISTERS,
                Shape::Varargs => u8::MAX as usize,
            };
            compile_ensure!(
                registers.len() <= limit,
                "{} has {} registers, at most {} fit",
                op.opcode,
                registers.len(),
                limit
            );
            compile_ensure!(
                op.has_dest() == op.opcode.has_dest(),
                "{} in block {} has the wrong destination shape",
                op.opcode,
                id
            );

            bytes.push(op.opcode as u8);
            bytes.push(registers.len() as u8);
            bytes.extend_from_slice(&op.arg.to_le_bytes());
            if op.opcode.shape() == Shape::Branch {
                compile_ensure!(
                    index + 1 == live.len(),
                    "branch {} is not the last op of block {}",
                    op.opcode,
                    id
                );
                let target = if op.opcode.is_conditional() {
                    block.exits.get(1)
                } else {
                    block.exits.first()
                };
                let Some(&target) = target else {
                    compile_bail!("branch {} in block {} has no target", op.opcode, id);
                };
                patches.push((bytes.len(), target));
                bytes.extend_from_slice(&0u32.to_le_bytes());
            }
            for reg in registers {
                compile_ensure!(
                    reg < state.num_registers,
                    "register r{} out of range in block {}",
                    reg,
                    id
                );
                bytes.extend_from_slice(&(reg as u16).to_le_bytes());
            }
        }
    }

    for (position, target) in patches {
        let label = state.blocks[target].encoded_offset;
        compile_ensure!(
            label != 0 && !state.blocks[target].dead,
            "branch to block {} has no resolved label",
            target
        );
        bytes[position..position + LABEL_SIZE].copy_from_slice(&(label as u32).to_le_bytes());
    }

    let code = RegisterCode {
        bytes,
        num_registers: state.num_registers,
        num_consts: state.num_consts,
        num_locals: state.num_locals,
        num_cells: state.code.num_cells() as u32,
        code: state.code.clone(),
        stats: CompileStats {
            source_instructions: 0,
            blocks: ids.len(),
            ops: state.op_count(),
            optimizer_changes: 0,
        },
    };
    if verify_layout {
        verify(&code)?;
    }
    Ok(code)
}

/// Decodes the whole stream and checks every label lands on an instruction.
pub fn verify(code: &RegisterCode) -> Result<(), CompileError> {
    let decoded = decode_all(&code.bytes)?;
    let starts: std::collections::HashSet<usize> =
        decoded.iter().map(|instr| instr.offset).collect();
    for instr in &decoded {
        if let Some(label) = instr.label {
            compile_ensure!(
                starts.contains(&(label as usize)),
                "label {} of {} at byte {} is not an instruction",
                label,
                instr.opcode,
                instr.offset
            );
        }
        for &reg in &instr.registers {
            compile_ensure!(
                reg < code.num_registers,
                "register r{} at byte {} exceeds {}",
                reg,
                instr.offset,
                code.num_registers
            );
        }
    }
    match decoded.last() {
        Some(last) => compile_ensure!(
            last.opcode.is_terminal(),
            "register code ends with {}",
            last.opcode
        ),
        None => compile_bail!("register code is empty"),
    }
    Ok(())
}

/// Disassembly listing, one instruction per line.
pub fn format_register_code(code: &RegisterCode) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: {} registers ({} consts, {} locals)",
        code.code.name, code.num_registers, code.num_consts, code.num_locals
    );
    match code.instructions() {
        Ok(decoded) => {
            for instr in decoded {
                let registers = instr
                    .registers
                    .iter()
                    .map(|reg| format!("r{}", reg))
                    .join(", ");
                let _ = match instr.label {
                    Some(label) => writeln!(
                        out,
                        "{:>6}  {:<20} {:<6} -> {:<6} [{}]",
                        instr.offset, instr.opcode, instr.arg, label, registers
                    ),
                    None => writeln!(
                        out,
                        "{:>6}  {:<20} {:<6}           [{}]",
                        instr.offset, instr.opcode, instr.arg, registers
                    ),
                };
            }
        }
        Err(err) => {
            let _ = writeln!(out, "  <{}>", err);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registerize::registerize;
    use fp_bytecode::{CodeBuilder, Opcode};
    use pretty_assertions::assert_eq;

    fn lowered(builder: &mut CodeBuilder) -> RegisterCode {
        let code = Arc::new(builder.build().unwrap());
        let mut state = registerize(&code).unwrap();
        state.mark_entries();
        lower(&mut state, true).unwrap()
    }

    #[test]
    fn prelude_and_fixed_instruction_layout() {
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        builder.load_fast("a").ret();
        let code = lowered(&mut builder);
        assert_eq!(&code.bytes[..4], MAGIC);
        assert_eq!(
            u32::from_le_bytes(code.bytes[4..8].try_into().unwrap()),
            code.num_registers
        );
        // RETURN_VALUE with one register: op, count, arg, then the local's register
        let local = (code.num_consts as u16).to_le_bytes();
        assert_eq!(
            &code.bytes[PRELUDE_SIZE..],
            &[RegOpcode::ReturnValue as u8, 1, 0, 0, 0, 0, local[0], local[1]]
        );
    }

    #[test]
    fn labels_point_at_block_starts() {
        let mut builder = CodeBuilder::new("f").params(&["a"]);
        let other = builder.new_label();
        builder.load_fast("a");
        builder.jump(Opcode::PopJumpIfFalse, other);
        builder.load_int(1).ret();
        builder.bind(other);
        builder.load_int(2).ret();
        let code = lowered(&mut builder);
        let decoded = code.instructions().unwrap();
        let branch = &decoded[0];
        assert_eq!(branch.opcode, RegOpcode::JumpIfFalse);
        assert_eq!(branch.label, Some(decoded[2].offset as u32));
        assert_eq!(decoded[1].opcode, RegOpcode::ReturnValue);
        let listing = format_register_code(&code);
        assert!(listing.contains("JUMP_IF_FALSE"), "{listing}");
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let mut builder = CodeBuilder::new("f");
        builder.load_none().ret();
        let code = lowered(&mut builder);
        let truncated = &code.bytes[..code.bytes.len() - 1];
        assert!(decode_all(truncated).is_err());
        assert!(decode_all(b"NOPE").is_err());
    }
}
