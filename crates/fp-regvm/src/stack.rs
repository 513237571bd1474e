use crate::compile_ensure;
use crate::error::CompileError;
use crate::ir::Reg;

/// An active `SETUP_LOOP` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFrame {
    /// Offset `BREAK_LOOP` continues at.
    pub target: usize,
    /// Operand stack depth when the loop was entered.
    pub level: usize,
}

/// The virtual operand stack: symbolic registers instead of values.
///
/// Cloning copies both the register list and the frame stack, so the arms of a branch never
/// share state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterStack {
    registers: Vec<Reg>,
    frames: Vec<LoopFrame>,
}

impl RegisterStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn registers(&self) -> &[Reg] {
        &self.registers
    }

    pub fn push(&mut self, reg: Reg) -> Reg {
        self.registers.push(reg);
        reg
    }

    pub fn pop(&mut self) -> Result<Reg, CompileError> {
        match self.registers.pop() {
            Some(reg) => Ok(reg),
            None => crate::compile_bail!("pop from an empty register stack"),
        }
    }

    /// `k`-th register from the top; `peek(1)` is the top.
    pub fn peek(&self, k: usize) -> Result<Reg, CompileError> {
        compile_ensure!(
            k >= 1 && k <= self.registers.len(),
            "peek({}) on a register stack of depth {}",
            k,
            self.registers.len()
        );
        Ok(self.registers[self.registers.len() - k])
    }

    /// Pops `count` registers, returned in push order.
    pub fn fill_array(&mut self, count: usize) -> Result<Vec<Reg>, CompileError> {
        compile_ensure!(
            count <= self.registers.len(),
            "need {} registers from a register stack of depth {}",
            count,
            self.registers.len()
        );
        Ok(self.registers.split_off(self.registers.len() - count))
    }

    /// Moves the top register below the next `depth - 1`.
    pub fn rotate(&mut self, depth: usize) -> Result<(), CompileError> {
        compile_ensure!(
            depth <= self.registers.len(),
            "rotate of {} on a register stack of depth {}",
            depth,
            self.registers.len()
        );
        let start = self.registers.len() - depth;
        self.registers[start..].rotate_right(1);
        Ok(())
    }

    pub fn truncate(&mut self, level: usize) {
        self.registers.truncate(level);
    }

    /// Rewrites every slot holding `from`.
    pub fn replace(&mut self, from: Reg, to: Reg) {
        for slot in self.registers.iter_mut().filter(|slot| **slot == from) {
            *slot = to;
        }
    }

    pub fn set(&mut self, index: usize, reg: Reg) {
        self.registers[index] = reg;
    }

    pub fn push_frame(&mut self, target: usize) {
        let level = self.registers.len();
        self.frames.push(LoopFrame { target, level });
    }

    pub fn pop_frame(&mut self) -> Result<LoopFrame, CompileError> {
        match self.frames.pop() {
            Some(frame) => Ok(frame),
            None => crate::compile_bail!("block pop without an active loop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_array_keeps_source_order() {
        let mut stack = RegisterStack::new();
        for reg in [3, 4, 5, 6] {
            stack.push(reg);
        }
        assert_eq!(stack.fill_array(3).unwrap(), vec![4, 5, 6]);
        assert_eq!(stack.registers(), &[3]);
        assert!(stack.fill_array(2).is_err());
    }

    #[test]
    fn peek_is_one_indexed() {
        let mut stack = RegisterStack::new();
        stack.push(1);
        stack.push(2);
        assert_eq!(stack.peek(1).unwrap(), 2);
        assert_eq!(stack.peek(2).unwrap(), 1);
        assert!(stack.peek(0).is_err());
        assert!(stack.peek(3).is_err());
    }

    #[test]
    fn clones_do_not_share_frames() {
        let mut stack = RegisterStack::new();
        stack.push(7);
        stack.push_frame(40);
        let mut arm = stack.clone();
        arm.pop_frame().unwrap();
        arm.pop().unwrap();
        assert_eq!(stack.pop_frame().unwrap(), LoopFrame { target: 40, level: 1 });
        assert_eq!(stack.len(), 1);
        assert!(arm.pop_frame().is_err());
    }

    #[test]
    fn rotate_three_moves_top_down() {
        let mut stack = RegisterStack::new();
        for reg in [1, 2, 3] {
            stack.push(reg);
        }
        stack.rotate(3).unwrap();
        assert_eq!(stack.registers(), &[3, 1, 2]);
    }
}
