use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    bytecode::{
        emit_error::EmitError,
        op::{Instruction, Opcode, Operand},
        program::{Chunk, Program},
    },
    ir::{
        cfg::{BasicBlock, Cfg, FullIR},
        steps::{AbsAddress, AddrTag, Op, Step},
    },
};

/// Translates lowered IR into a bytecode program. All or nothing.
pub fn emit(ir: &FullIR) -> Result<Program, EmitError> {
    let mut emitter = Emitter::new(ir.constants.len());
    let mut chunks = Vec::with_capacity(ir.cfg_list.len());

    for (function, cfg) in ir.cfg_list.iter().enumerate() {
        let chunk = emitter.emit_function(function, cfg).inspect_err(|e| {
            log::error!("{}", e);
        })?;
        log::debug!("function #{} emitted {} instructions", function, chunk.len());
        chunks.push(chunk);
    }

    Ok(Program {
        chunks,
        constants: ir.constants.clone(),
        entry_id: ir.main_id,
    })
}

pub struct Emitter {
    constant_count: usize,

    // Per-function state, reset by `emit_function`.
    function: usize,
    chunk: Chunk,
    /// Positions of jumps whose target is filled in later.
    patches: Vec<usize>,
    slots: HashMap<i16, u16>,
    next_slot: u16,
}

impl Emitter {
    pub fn new(constant_count: usize) -> Self {
        Self {
            constant_count,
            function: 0,
            chunk: Chunk::new(),
            patches: Vec::new(),
            slots: HashMap::new(),
            next_slot: 0,
        }
    }

    fn reset(&mut self, function: usize, param_count: u16) {
        self.function = function;
        self.chunk = Chunk::new();
        self.patches.clear();
        self.slots = (0..param_count).map(|p| (p as i16, p)).collect();
        self.next_slot = param_count;
    }

    pub fn emit_function(&mut self, function: usize, cfg: &Cfg) -> Result<Chunk, EmitError> {
        self.reset(function, cfg.param_count);

        // Lowest pending id first: every edge points forward, so this walks
        // blocks in the order lowering laid them out.
        let mut pending = BTreeSet::from([0]);
        let mut visited = HashSet::new();

        while let Some(id) = pending.pop_first() {
            if !visited.insert(id) {
                continue;
            }
            let block = cfg.get_bb(id).ok_or(EmitError::MissingBlock {
                function,
                from: id,
                to: id,
            })?;

            self.emit_block(block)?;

            for succ in block.successors() {
                if cfg.get_bb(succ).is_none() {
                    return Err(EmitError::MissingBlock {
                        function,
                        from: id,
                        to: succ,
                    });
                }
                if !visited.contains(&succ) {
                    pending.insert(succ);
                }
            }
        }

        if !self.patches.is_empty() {
            return Err(EmitError::UnbalancedPatches {
                function,
                pending: self.patches.len(),
            });
        }

        Ok(std::mem::take(&mut self.chunk))
    }

    fn emit_block(&mut self, block: &BasicBlock) -> Result<(), EmitError> {
        for step in &block.steps {
            self.emit_step(step)?;
        }
        Ok(())
    }

    fn emit_step(&mut self, step: &Step) -> Result<(), EmitError> {
        match *step {
            Step::TacUnary {
                dest,
                op: Op::Nop,
                arg0,
            } => {
                let src = self.resolve(arg0)?;
                let dest = self.resolve_dest(dest)?;
                self.push_ins(Instruction::binary(Opcode::Mov, dest, src))
            }
            Step::TacUnary {
                dest,
                op: Op::Neg,
                arg0,
            } => {
                let src = self.resolve(arg0)?;
                let dest = self.resolve_dest(dest)?;
                if dest != src {
                    self.push_ins(Instruction::binary(Opcode::Mov, dest, src))?;
                }
                self.push_ins(Instruction::unary(Opcode::Neg, dest))
            }
            Step::TacBinary {
                dest,
                op,
                arg0,
                arg1,
            } => {
                let opcode = value_opcode(op).ok_or_else(|| self.unsupported(step))?;
                let lhs = self.resolve(arg0)?;
                self.push_ins(Instruction::unary(Opcode::Push, lhs))?;
                let rhs = self.resolve(arg1)?;
                self.push_ins(Instruction::unary(Opcode::Push, rhs))?;
                self.push_ins(Instruction::nonary(opcode))?;

                // The result leaves the stack before its destination is
                // allocated, so a fresh temp reuses the freed slot.
                let store = Instruction::binary(Opcode::Mov, Operand::reg(0), Operand::stack());
                self.adjust(store.stack_delta())?;
                let dest = self.resolve_dest(dest)?;
                self.chunk
                    .push(Instruction::binary(Opcode::Mov, dest, Operand::stack()));
                Ok(())
            }
            Step::OperNonary { op } => self.emit_nonary(op, step),
            Step::OperUnary { op, arg0 } => {
                let opcode = match op {
                    Op::Jump => Opcode::Jump,
                    Op::Ret => Opcode::Ret,
                    _ => return Err(self.unsupported(step)),
                };
                let a = self.resolve(arg0)?;
                self.push_ins(Instruction::unary(opcode, a))
            }
            Step::OperBinary { op, arg0, arg1 } => {
                let opcode = match op {
                    Op::JumpElse => Opcode::JumpElse,
                    Op::JumpIf => Opcode::JumpIf,
                    Op::Call => Opcode::Call,
                    Op::NativeCall => Opcode::NativeCall,
                    _ => return Err(self.unsupported(step)),
                };
                let a = self.resolve(arg0)?;
                let b = self.resolve(arg1)?;
                self.push_ins(Instruction::binary(opcode, a, b))
            }
            Step::TacUnary { .. } => Err(self.unsupported(step)),
        }
    }

    fn emit_nonary(&mut self, op: Op, step: &Step) -> Result<(), EmitError> {
        match op {
            Op::Nop => self.push_ins(Instruction::nonary(Opcode::Nop)),
            Op::Halt => self.push_ins(Instruction::nonary(Opcode::Halt)),
            Op::MetaCondensed => Ok(()),
            Op::MetaSavePatch => {
                let pos = self.chunk.len().checked_sub(1).ok_or_else(|| {
                    EmitError::internal("save patch marker before any instruction")
                })?;
                self.patches.push(pos);
                Ok(())
            }
            Op::MetaShufflePatch => {
                let n = self.patches.len();
                if n < 2 {
                    return Err(EmitError::PatchUnderflow {
                        function: self.function,
                        marker: op.name(),
                    });
                }
                self.patches.swap(n - 1, n - 2);
                Ok(())
            }
            Op::MetaPatchJmp => self.patch_top(op, Opcode::Jump, 0),
            Op::MetaPatchJmpElse => self.patch_top(op, Opcode::JumpElse, 1),
            _ => Err(self.unsupported(step)),
        }
    }

    /// Points the most recently saved jump at the last emitted instruction.
    fn patch_top(&mut self, marker: Op, expected: Opcode, slot: usize) -> Result<(), EmitError> {
        let function = self.function;
        let pos = self.patches.pop().ok_or(EmitError::PatchUnderflow {
            function,
            marker: marker.name(),
        })?;
        let target = self
            .chunk
            .len()
            .checked_sub(1)
            .ok_or_else(|| EmitError::internal("patch marker before any instruction"))?;
        let target = i16::try_from(target).map_err(|_| EmitError::OperandOverflow {
            function,
            value: target,
        })?;

        let ins = self
            .chunk
            .get_mut(pos)
            .ok_or_else(|| EmitError::internal("saved patch position out of range"))?;
        let kind_ok = ins.op == expected
            || (expected == Opcode::JumpElse && ins.op == Opcode::JumpIf);
        if !kind_ok {
            return Err(EmitError::PatchMismatch {
                function,
                expected,
                found: ins.op,
            });
        }
        ins.args[slot] = target;
        log::trace!(
            "patched {} at {} -> {} ({})",
            expected.mnemonic(),
            pos,
            target,
            if target as usize > pos { "forward" } else { "backward" }
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operands and slot bookkeeping
    // ------------------------------------------------------------------

    fn push_ins(&mut self, ins: Instruction) -> Result<(), EmitError> {
        self.adjust(ins.stack_delta())?;
        self.chunk.push(ins);
        Ok(())
    }

    fn adjust(&mut self, delta: i32) -> Result<(), EmitError> {
        let next = i32::from(self.next_slot) + delta;
        self.next_slot = u16::try_from(next).map_err(|_| {
            if next < 0 {
                EmitError::internal(format!("slot counter underflow in function #{}", self.function))
            } else {
                EmitError::SlotExhausted {
                    function: self.function,
                }
            }
        })?;
        Ok(())
    }

    fn slot_of(&mut self, temp: i16) -> Result<u16, EmitError> {
        if let Some(slot) = self.slots.get(&temp) {
            return Ok(*slot);
        }
        let slot = self.next_slot;
        self.next_slot = slot.checked_add(1).ok_or(EmitError::SlotExhausted {
            function: self.function,
        })?;
        self.slots.insert(temp, slot);
        Ok(slot)
    }

    fn resolve(&mut self, addr: AbsAddress) -> Result<Operand, EmitError> {
        match addr.tag {
            AddrTag::Immediate => Ok(Operand::imm(addr.id)),
            AddrTag::Constant => {
                let in_pool = usize::try_from(addr.id).is_ok_and(|id| id < self.constant_count);
                if !in_pool {
                    return Err(EmitError::unresolved(self.function, addr));
                }
                Ok(Operand::constant(addr.id))
            }
            AddrTag::Heap => Ok(Operand::heap(addr.id)),
            AddrTag::Temp => {
                let slot = self.slot_of(addr.id)?;
                let slot = i16::try_from(slot).map_err(|_| EmitError::OperandOverflow {
                    function: self.function,
                    value: slot as usize,
                })?;
                Ok(Operand::reg(slot))
            }
        }
    }

    fn resolve_dest(&mut self, addr: AbsAddress) -> Result<Operand, EmitError> {
        if addr.tag != AddrTag::Temp {
            return Err(EmitError::unresolved(self.function, addr));
        }
        self.resolve(addr)
    }

    fn unsupported(&self, step: &Step) -> EmitError {
        EmitError::unsupported(self.function, step)
    }
}

fn value_opcode(op: Op) -> Option<Opcode> {
    match op {
        Op::Mul => Some(Opcode::Mul),
        Op::Div => Some(Opcode::Div),
        Op::Mod => Some(Opcode::Mod),
        Op::Add => Some(Opcode::Add),
        Op::Sub => Some(Opcode::Sub),
        Op::Equ => Some(Opcode::Equ),
        Op::Neq => Some(Opcode::Neq),
        Op::Lt => Some(Opcode::Lt),
        Op::Gt => Some(Opcode::Gt),
        Op::Lte => Some(Opcode::Lte),
        Op::Gte => Some(Opcode::Gte),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::ArgMode;
    use crate::lang::value::Value;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn t(id: i16) -> AbsAddress {
        AbsAddress::temp(id)
    }

    fn c(id: i16) -> AbsAddress {
        AbsAddress::constant(id)
    }

    fn imm(id: i16) -> AbsAddress {
        AbsAddress::immediate(id)
    }

    fn nonary(op: Op) -> Step {
        Step::OperNonary { op }
    }

    fn ir_of(blocks: Vec<Vec<Step>>, links: &[(usize, usize)], constants: Vec<Value>) -> FullIR {
        let mut cfg = Cfg::new();
        for steps in blocks {
            let id = cfg.add_bb();
            if let Some(block) = cfg.get_bb_mut(id) {
                block.steps = steps;
            }
        }
        for &(from, to) in links {
            cfg.link_bb(from, to);
        }
        FullIR {
            cfg_list: vec![cfg],
            constants,
            main_id: Some(0),
        }
    }

    fn ops(chunk: &Chunk) -> Vec<Opcode> {
        chunk.iter().map(|ins| ins.op).collect()
    }

    // ============================================================
    // Value steps
    // ============================================================

    #[test]
    fn test_binary_step_pushes_operands() {
        let ir = ir_of(
            vec![vec![
                Step::TacBinary {
                    dest: t(0),
                    op: Op::Mul,
                    arg0: c(0),
                    arg1: c(1),
                },
                Step::OperUnary {
                    op: Op::Ret,
                    arg0: t(0),
                },
            ]],
            &[],
            vec![Value::Int(3), Value::Int(4)],
        );

        let program = emit(&ir).expect("emission should succeed");
        let chunk = &program.chunks[0];
        assert_eq!(
            ops(chunk),
            vec![
                Opcode::Push,
                Opcode::Push,
                Opcode::Mul,
                Opcode::Mov,
                Opcode::Ret
            ]
        );
        assert_eq!(chunk[3].operand(0), Some(Operand::reg(0)));
        assert_eq!(chunk[3].mode(1), Some(ArgMode::Stack));
        assert_eq!(program.entry_id, Some(0));
    }

    #[test]
    fn test_temps_get_stack_ordered_slots() {
        let ir = ir_of(
            vec![vec![
                Step::TacBinary {
                    dest: t(0),
                    op: Op::Mul,
                    arg0: c(0),
                    arg1: c(1),
                },
                Step::TacBinary {
                    dest: t(1),
                    op: Op::Add,
                    arg0: c(0),
                    arg1: t(0),
                },
                Step::TacUnary {
                    dest: t(2),
                    op: Op::Nop,
                    arg0: t(1),
                },
            ]],
            &[],
            vec![Value::Int(3), Value::Int(4)],
        );

        let chunk = &emit(&ir).expect("emission should succeed").chunks[0];
        assert_eq!(chunk[3].operand(0), Some(Operand::reg(0)));
        assert_eq!(chunk[5].operand(0), Some(Operand::reg(0)));
        assert_eq!(chunk[7].operand(0), Some(Operand::reg(1)));
        assert_eq!(
            chunk[8],
            Instruction::binary(Opcode::Mov, Operand::reg(2), Operand::reg(1))
        );
    }

    #[test]
    fn test_neg_copies_then_negates_in_place() {
        let ir = ir_of(
            vec![vec![Step::TacUnary {
                dest: t(0),
                op: Op::Neg,
                arg0: c(0),
            }]],
            &[],
            vec![Value::Int(5)],
        );

        let chunk = &emit(&ir).expect("emission should succeed").chunks[0];
        assert_eq!(
            chunk.as_slice(),
            &[
                Instruction::binary(Opcode::Mov, Operand::reg(0), Operand::constant(0)),
                Instruction::unary(Opcode::Neg, Operand::reg(0)),
            ]
        );
    }

    #[test]
    fn test_params_are_prebound() {
        let mut ir = ir_of(
            vec![vec![Step::OperUnary {
                op: Op::Ret,
                arg0: t(1),
            }]],
            &[],
            vec![],
        );
        ir.cfg_list[0].param_count = 2;

        let chunk = &emit(&ir).expect("emission should succeed").chunks[0];
        assert_eq!(chunk[0], Instruction::unary(Opcode::Ret, Operand::reg(1)));
    }

    #[test]
    fn test_condensed_steps_emit_nothing() {
        let ir = ir_of(
            vec![vec![nonary(Op::MetaCondensed), nonary(Op::Halt)]],
            &[],
            vec![],
        );

        let chunk = &emit(&ir).expect("emission should succeed").chunks[0];
        assert_eq!(ops(chunk), vec![Opcode::Halt]);
    }

    // ============================================================
    // Jump patching
    // ============================================================

    fn if_else_blocks() -> Vec<Vec<Step>> {
        vec![
            vec![
                Step::OperBinary {
                    op: Op::JumpElse,
                    arg0: c(0),
                    arg1: imm(0),
                },
                nonary(Op::MetaSavePatch),
            ],
            vec![
                Step::OperUnary {
                    op: Op::Ret,
                    arg0: c(0),
                },
                Step::OperUnary {
                    op: Op::Jump,
                    arg0: imm(0),
                },
                nonary(Op::MetaSavePatch),
                nonary(Op::MetaShufflePatch),
            ],
            vec![
                nonary(Op::Nop),
                nonary(Op::MetaPatchJmpElse),
                Step::OperUnary {
                    op: Op::Ret,
                    arg0: c(0),
                },
            ],
            vec![nonary(Op::Nop), nonary(Op::MetaPatchJmp)],
        ]
    }

    #[test]
    fn test_if_else_patches_both_jumps() {
        let ir = ir_of(
            if_else_blocks(),
            &[(0, 1), (0, 2), (1, 3), (2, 3)],
            vec![Value::Bool(true)],
        );

        let chunk = &emit(&ir).expect("emission should succeed").chunks[0];
        assert_eq!(
            ops(chunk),
            vec![
                Opcode::JumpElse,
                Opcode::Ret,
                Opcode::Jump,
                Opcode::Nop,
                Opcode::Ret,
                Opcode::Nop
            ]
        );
        assert_eq!(chunk[0].args[1], 3);
        assert_eq!(chunk[2].args[0], 5);
    }

    #[test]
    fn test_patched_jumps_point_forward() {
        let ir = ir_of(
            if_else_blocks(),
            &[(0, 1), (0, 2), (1, 3), (2, 3)],
            vec![Value::Bool(true)],
        );

        let chunk = &emit(&ir).expect("emission should succeed").chunks[0];
        for (pos, ins) in chunk.iter().enumerate() {
            let target = match ins.op {
                Opcode::Jump => ins.args[0],
                Opcode::JumpElse | Opcode::JumpIf => ins.args[1],
                _ => continue,
            };
            assert!(target as usize > pos, "{} at {}", ins, pos);
        }
    }

    #[test]
    fn test_missing_successor_fails_cleanly() {
        let ir = ir_of(vec![vec![nonary(Op::Halt)]], &[(0, 5)], vec![]);

        let err = emit(&ir).expect_err("emission should fail");
        assert_eq!(
            err,
            EmitError::MissingBlock {
                function: 0,
                from: 0,
                to: 5
            }
        );
    }

    #[test]
    fn test_unbalanced_save_fails() {
        let ir = ir_of(
            vec![vec![
                Step::OperUnary {
                    op: Op::Jump,
                    arg0: imm(0),
                },
                nonary(Op::MetaSavePatch),
            ]],
            &[],
            vec![],
        );

        let err = emit(&ir).expect_err("emission should fail");
        assert_eq!(
            err,
            EmitError::UnbalancedPatches {
                function: 0,
                pending: 1
            }
        );
    }

    #[test]
    fn test_patch_without_save_fails() {
        let ir = ir_of(
            vec![vec![nonary(Op::Nop), nonary(Op::MetaPatchJmp)]],
            &[],
            vec![],
        );

        assert!(matches!(
            emit(&ir),
            Err(EmitError::PatchUnderflow { .. })
        ));
    }

    #[test]
    fn test_patch_kind_mismatch_fails() {
        let ir = ir_of(
            vec![vec![
                Step::OperUnary {
                    op: Op::Jump,
                    arg0: imm(0),
                },
                nonary(Op::MetaSavePatch),
                nonary(Op::Nop),
                nonary(Op::MetaPatchJmpElse),
            ]],
            &[],
            vec![],
        );

        assert!(matches!(
            emit(&ir),
            Err(EmitError::PatchMismatch {
                expected: Opcode::JumpElse,
                found: Opcode::Jump,
                ..
            })
        ));
    }

    // ============================================================
    // Operand resolution
    // ============================================================

    #[test]
    fn test_constant_outside_pool_fails() {
        let ir = ir_of(
            vec![vec![Step::OperUnary {
                op: Op::Ret,
                arg0: c(3),
            }]],
            &[],
            vec![Value::Int(0)],
        );

        assert!(matches!(
            emit(&ir),
            Err(EmitError::UnresolvedOperand { .. })
        ));
    }

    #[test]
    fn test_constant_destination_fails() {
        let ir = ir_of(
            vec![vec![Step::TacUnary {
                dest: c(0),
                op: Op::Nop,
                arg0: imm(1),
            }]],
            &[],
            vec![Value::Int(0)],
        );

        assert!(emit(&ir).is_err());
    }

    #[test]
    fn test_control_op_in_value_shape_fails() {
        let ir = ir_of(
            vec![vec![Step::TacBinary {
                dest: t(0),
                op: Op::Jump,
                arg0: imm(0),
                arg1: imm(0),
            }]],
            &[],
            vec![],
        );

        assert!(matches!(emit(&ir), Err(EmitError::UnsupportedStep { .. })));
    }

    #[test]
    fn test_slot_exhaustion_fails() {
        let mut ir = ir_of(
            vec![vec![Step::OperUnary {
                op: Op::Ret,
                arg0: t(-1),
            }]],
            &[],
            vec![],
        );
        ir.cfg_list[0].param_count = u16::MAX;

        assert!(matches!(
            emit(&ir),
            Err(EmitError::SlotExhausted { function: 0 })
        ));
    }
}
