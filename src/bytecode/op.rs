use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// OPCODE - Bytecode operations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop,
    Mov,
    Push,
    Neg,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Equ,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    Jump,
    JumpIf,
    JumpElse,
    Call,
    NativeCall,
    Ret,
    Halt,
}

pub const OPCODE_COUNT: usize = 22;

const _: () = assert!(Opcode::Halt as usize + 1 == OPCODE_COUNT);

/// Slots each opcode leaves on the operand stack, indexed by opcode.
///
/// Stack-mode operands pop on top of this, see [`Instruction::stack_delta`].
const STACK_DELTAS: [i32; OPCODE_COUNT] = [
    0,  // nop
    0,  // mov
    1,  // push
    0,  // neg
    -1, // mul
    -1, // div
    -1, // mod
    -1, // add
    -1, // sub
    -1, // equ
    -1, // neq
    -1, // lt
    -1, // gt
    -1, // lte
    -1, // gte
    0,  // jump
    0,  // jump_if
    0,  // jump_else
    0,  // call
    0,  // native_call
    0,  // ret
    0,  // halt
];

impl Opcode {
    pub fn stack_delta(self) -> i32 {
        STACK_DELTAS[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Mov => "mov",
            Opcode::Push => "push",
            Opcode::Neg => "neg",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Equ => "equ",
            Opcode::Neq => "neq",
            Opcode::Lt => "lt",
            Opcode::Gt => "gt",
            Opcode::Lte => "lte",
            Opcode::Gte => "gte",
            Opcode::Jump => "jump",
            Opcode::JumpIf => "jump_if",
            Opcode::JumpElse => "jump_else",
            Opcode::Call => "call",
            Opcode::NativeCall => "native_call",
            Opcode::Ret => "ret",
            Opcode::Halt => "halt",
        }
    }
}

// =============================================================================
// OPERANDS
// =============================================================================

/// Where an operand value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ArgMode {
    Immediate,
    Constant,
    /// Register file slot relative to the frame base.
    Register,
    /// Top of the operand stack; reading it pops.
    Stack,
    Heap,
}

impl ArgMode {
    const BITS: u16 = 3;
    const MASK: u16 = 0b111;

    fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0 => Some(ArgMode::Immediate),
            1 => Some(ArgMode::Constant),
            2 => Some(ArgMode::Register),
            3 => Some(ArgMode::Stack),
            4 => Some(ArgMode::Heap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub mode: ArgMode,
    pub value: i16,
}

impl Operand {
    pub fn imm(value: i16) -> Self {
        Self {
            mode: ArgMode::Immediate,
            value,
        }
    }

    pub fn constant(value: i16) -> Self {
        Self {
            mode: ArgMode::Constant,
            value,
        }
    }

    pub fn reg(value: i16) -> Self {
        Self {
            mode: ArgMode::Register,
            value,
        }
    }

    pub fn stack() -> Self {
        Self {
            mode: ArgMode::Stack,
            value: 0,
        }
    }

    pub fn heap(value: i16) -> Self {
        Self {
            mode: ArgMode::Heap,
            value,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ArgMode::Immediate => write!(f, "#{}", self.value),
            ArgMode::Constant => write!(f, "c{}", self.value),
            ArgMode::Register => write!(f, "r{}", self.value),
            ArgMode::Stack => write!(f, "pop"),
            ArgMode::Heap => write!(f, "h{}", self.value),
        }
    }
}

// =============================================================================
// INSTRUCTION
// =============================================================================

/// Fixed-shape instruction.
///
/// `metadata` packs the arity into bits 0-1 and a 3-bit [`ArgMode`] for each
/// meaningful slot starting at bit 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub args: [i16; 3],
    pub metadata: u16,
}

impl Instruction {
    const ARITY_MASK: u16 = 0b11;
    const MODES_SHIFT: u16 = 2;

    pub fn new(op: Opcode, operands: &[Operand]) -> Self {
        let mut args = [0; 3];
        let mut metadata = 0;

        for (slot, operand) in operands.iter().take(3).enumerate() {
            args[slot] = operand.value;
            metadata |= (operand.mode as u16) << (Self::MODES_SHIFT + ArgMode::BITS * slot as u16);
        }
        metadata |= operands.len().min(3) as u16;

        Self { op, args, metadata }
    }

    pub fn nonary(op: Opcode) -> Self {
        Self::new(op, &[])
    }

    pub fn unary(op: Opcode, a: Operand) -> Self {
        Self::new(op, &[a])
    }

    pub fn binary(op: Opcode, a: Operand, b: Operand) -> Self {
        Self::new(op, &[a, b])
    }

    pub fn arity(&self) -> usize {
        (self.metadata & Self::ARITY_MASK) as usize
    }

    /// Addressing mode of `slot`, or `None` past the arity or for bad bits.
    pub fn mode(&self, slot: usize) -> Option<ArgMode> {
        if slot >= self.arity() {
            return None;
        }
        let shift = Self::MODES_SHIFT + ArgMode::BITS * slot as u16;
        ArgMode::from_bits((self.metadata >> shift) & ArgMode::MASK)
    }

    pub fn operand(&self, slot: usize) -> Option<Operand> {
        self.mode(slot).map(|mode| Operand {
            mode,
            value: self.args[slot],
        })
    }

    /// Operand stack effect: the opcode's table entry minus one per
    /// stack-mode operand it pops.
    pub fn stack_delta(&self) -> i32 {
        let pops = (0..self.arity())
            .filter(|&slot| self.mode(slot) == Some(ArgMode::Stack))
            .count() as i32;
        self.op.stack_delta() - pops
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.mnemonic())?;
        for slot in 0..self.arity() {
            let sep = if slot == 0 { " " } else { ", " };
            match self.operand(slot) {
                Some(operand) => write!(f, "{}{}", sep, operand)?,
                None => write!(f, "{}?{}", sep, self.args[slot])?,
            }
        }
        Ok(())
    }
}
