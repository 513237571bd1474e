use crate::opcode::{JumpKind, Opcode};
use crate::BytecodeError;

/// One decoded stack-machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the first byte, including any `EXTENDED_ARG` prefix.
    pub offset: usize,
    pub opcode: Opcode,
    pub arg: u32,
    /// Offset of the following instruction.
    pub next: usize,
}

impl Instruction {
    /// Branch target encoded by this instruction, if it has one.
    pub fn jump_target(&self) -> Option<usize> {
        match self.opcode.jump_kind()? {
            JumpKind::Relative => Some(self.next + self.arg as usize),
            JumpKind::Absolute => Some(self.arg as usize),
        }
    }
}

/// Decodes the instruction starting at `offset`.
pub fn decode_at(code: &[u8], offset: usize) -> Result<Instruction, BytecodeError> {
    let mut cursor = offset;
    let mut high: u32 = 0;
    loop {
        let byte = *code.get(cursor).ok_or_else(|| BytecodeError::Format {
            message: format!("instruction offset {} past end of code ({})", cursor, code.len()),
        })?;
        let opcode = Opcode::from_byte(byte).ok_or_else(|| BytecodeError::Format {
            message: format!("unknown opcode {} at offset {}", byte, cursor),
        })?;
        let mut arg = 0u32;
        if opcode.has_argument() {
            if cursor + 2 >= code.len() {
                return Err(BytecodeError::Format {
                    message: format!("truncated argument for {} at offset {}", opcode, cursor),
                });
            }
            arg = u32::from(u16::from_le_bytes([code[cursor + 1], code[cursor + 2]]));
        }
        let next = cursor + opcode.size();
        if opcode == Opcode::ExtendedArg {
            if high != 0 {
                return Err(BytecodeError::Format {
                    message: format!("chained EXTENDED_ARG at offset {}", cursor),
                });
            }
            high = arg << 16;
            cursor = next;
            continue;
        }
        return Ok(Instruction {
            offset,
            opcode,
            arg: high | arg,
            next,
        });
    }
}

/// Linear iterator over every instruction of a code buffer.
pub struct Instructions<'a> {
    code: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for Instructions<'_> {
    type Item = Result<Instruction, BytecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.code.len() {
            return None;
        }
        match decode_at(self.code, self.offset) {
            Ok(instr) => {
                self.offset = instr.next;
                Some(Ok(instr))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

pub fn instructions(code: &[u8]) -> Instructions<'_> {
    Instructions::new(code)
}

/// Offsets that some instruction can branch to.
pub fn jump_targets(code: &[u8]) -> Result<Vec<usize>, BytecodeError> {
    let mut targets = Vec::new();
    for instr in instructions(code) {
        if let Some(target) = instr?.jump_target() {
            targets.push(target);
        }
    }
    targets.sort_unstable();
    targets.dedup();
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_argument_and_relative_target() {
        // JUMP_FORWARD 3 ; NOP ; NOP ; NOP ; RETURN_VALUE
        let code = [110, 3, 0, 9, 9, 9, 83];
        let instr = decode_at(&code, 0).unwrap();
        assert_eq!(instr.opcode, Opcode::JumpForward);
        assert_eq!(instr.next, 3);
        assert_eq!(instr.jump_target(), Some(6));
    }

    #[test]
    fn extended_arg_supplies_high_bits() {
        let code = [145, 1, 0, 100, 2, 0];
        let instr = decode_at(&code, 0).unwrap();
        assert_eq!(instr.opcode, Opcode::LoadConst);
        assert_eq!(instr.arg, 0x0001_0002);
        assert_eq!(instr.offset, 0);
        assert_eq!(instr.next, 6);
    }

    #[test]
    fn rejects_truncated_argument() {
        let code = [100, 1];
        assert!(decode_at(&code, 0).is_err());
    }

    #[test]
    fn collects_unique_jump_targets() {
        // POP_JUMP_IF_FALSE 7 ; JUMP_ABSOLUTE 7 ; LOAD_CONST 0 ; RETURN_VALUE
        let code = [114, 7, 0, 113, 7, 0, 9, 100, 0, 0, 83];
        assert_eq!(jump_targets(&code).unwrap(), vec![7]);
    }
}
