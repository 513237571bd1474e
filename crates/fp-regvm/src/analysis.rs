//! Definite assignment of fast locals over the stack-machine control-flow graph.
//!
//! A `LOAD_FAST` of a local that is not assigned on every path reaching it keeps an explicit
//! `CHECK_LOCAL`, so an unbound read fails at the same instruction as on the stack machine.

use fp_bytecode::{decode_at, CodeObject, Opcode};

use crate::error::CompileError;

/// Fixed-size bit set over register or local slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSet {
    words: Vec<u64>,
}

impl LocalSet {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn insert(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    pub fn remove(&mut self, index: usize) {
        self.words[index / 64] &= !(1 << (index % 64));
    }

    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn union_with(&mut self, other: &LocalSet) {
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word |= other;
        }
    }

    pub fn subtract(&mut self, other: &LocalSet) {
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word &= !other;
        }
    }

    /// Keeps only members of `other`; returns whether anything was removed.
    pub fn intersect_with(&mut self, other: &LocalSet) -> bool {
        let mut changed = false;
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            let next = *word & other;
            changed |= next != *word;
            *word = next;
        }
        changed
    }
}

#[derive(Debug)]
pub struct DefiniteAssignment {
    /// Locals assigned on every path to each reachable instruction offset.
    assigned: Vec<Option<LocalSet>>,
}

impl DefiniteAssignment {
    pub fn analyze(code: &CodeObject) -> Result<Self, CompileError> {
        let num_locals = code.num_locals();
        let mut entry = LocalSet::new(num_locals);
        let params = code.argcount as usize
            + usize::from(code.has_varargs())
            + usize::from(code.has_varkeywords());
        for index in 0..params.min(num_locals) {
            entry.insert(index);
        }

        let mut assigned: Vec<Option<LocalSet>> = vec![None; code.code.len()];
        let mut worklist = Vec::new();
        if !code.code.is_empty() {
            assigned[0] = Some(entry);
            worklist.push(0usize);
        }

        while let Some(offset) = worklist.pop() {
            let instr = decode_at(&code.code, offset)?;
            let Some(mut out) = assigned[offset].clone() else {
                continue;
            };
            match instr.opcode {
                Opcode::StoreFast if (instr.arg as usize) < num_locals => {
                    out.insert(instr.arg as usize)
                }
                Opcode::DeleteFast if (instr.arg as usize) < num_locals => {
                    out.remove(instr.arg as usize)
                }
                _ => {}
            }

            // SETUP_LOOP's target stands in for every BREAK_LOOP inside the loop: locals only
            // grow along a path, so the set at the setup is a safe under-approximation.
            let fallthrough = (!instr.opcode.is_terminal()).then_some(instr.next);
            let successors = fallthrough.into_iter().chain(instr.jump_target());
            for successor in successors {
                if successor >= assigned.len() {
                    continue;
                }
                match &mut assigned[successor] {
                    slot @ None => {
                        *slot = Some(out.clone());
                        worklist.push(successor);
                    }
                    Some(existing) => {
                        if existing.intersect_with(&out) {
                            worklist.push(successor);
                        }
                    }
                }
            }
        }

        Ok(Self { assigned })
    }

    /// Whether `local` holds a value whenever control reaches `offset`.
    pub fn is_assigned(&self, offset: usize, local: usize) -> bool {
        self.assigned
            .get(offset)
            .and_then(Option::as_ref)
            .is_some_and(|set| set.contains(local))
    }
}
