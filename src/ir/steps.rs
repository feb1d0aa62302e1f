use std::fmt;

/// Storage class of an abstract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrTag {
    /// Literal numeric id, e.g. a function id or an argument count.
    Immediate,
    /// Index into the shared constant pool.
    Constant,
    /// Function-scoped virtual register.
    Temp,
    /// Heap store slot.
    Heap,
}

/// Symbolic operand produced by lowering, resolved to a location by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbsAddress {
    pub tag: AddrTag,
    pub id: i16,
}

impl AbsAddress {
    pub fn immediate(id: i16) -> Self {
        Self {
            tag: AddrTag::Immediate,
            id,
        }
    }

    pub fn constant(id: i16) -> Self {
        Self {
            tag: AddrTag::Constant,
            id,
        }
    }

    pub fn temp(id: i16) -> Self {
        Self {
            tag: AddrTag::Temp,
            id,
        }
    }

    pub fn heap(id: i16) -> Self {
        Self {
            tag: AddrTag::Heap,
            id,
        }
    }

    pub fn is_temp(&self) -> bool {
        self.tag == AddrTag::Temp
    }
}

impl fmt::Display for AbsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.tag {
            AddrTag::Immediate => "#",
            AddrTag::Constant => "c",
            AddrTag::Temp => "t",
            AddrTag::Heap => "h",
        };
        write!(f, "{}{}", prefix, self.id)
    }
}

/// IR operation codes. `Meta*` ops steer the emitter and never reach bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
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
    MetaSavePatch,
    MetaShufflePatch,
    MetaPatchJmpElse,
    MetaPatchJmp,
    /// A step neutralized by the condenser.
    MetaCondensed,
}

impl Op {
    pub fn is_binary_value_op(self) -> bool {
        matches!(
            self,
            Op::Mul
                | Op::Div
                | Op::Mod
                | Op::Add
                | Op::Sub
                | Op::Equ
                | Op::Neq
                | Op::Lt
                | Op::Gt
                | Op::Lte
                | Op::Gte
        )
    }

    pub fn is_call(self) -> bool {
        matches!(self, Op::Call | Op::NativeCall)
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::Neg => "neg",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Mod => "mod",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Equ => "equ",
            Op::Neq => "neq",
            Op::Lt => "lt",
            Op::Gt => "gt",
            Op::Lte => "lte",
            Op::Gte => "gte",
            Op::Jump => "jump",
            Op::JumpIf => "jump_if",
            Op::JumpElse => "jump_else",
            Op::Call => "call",
            Op::NativeCall => "native_call",
            Op::Ret => "ret",
            Op::Halt => "halt",
            Op::MetaSavePatch => "meta_save_patch",
            Op::MetaShufflePatch => "meta_shuffle_patch",
            Op::MetaPatchJmpElse => "meta_patch_jmp_else",
            Op::MetaPatchJmp => "meta_patch_jmp",
            Op::MetaCondensed => "meta_condensed",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One IR step. Only the two `Tac*` shapes produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    TacUnary {
        dest: AbsAddress,
        op: Op,
        arg0: AbsAddress,
    },
    TacBinary {
        dest: AbsAddress,
        op: Op,
        arg0: AbsAddress,
        arg1: AbsAddress,
    },
    OperNonary {
        op: Op,
    },
    OperUnary {
        op: Op,
        arg0: AbsAddress,
    },
    OperBinary {
        op: Op,
        arg0: AbsAddress,
        arg1: AbsAddress,
    },
}

impl Step {
    pub fn op(&self) -> Op {
        match self {
            Step::TacUnary { op, .. }
            | Step::TacBinary { op, .. }
            | Step::OperNonary { op }
            | Step::OperUnary { op, .. }
            | Step::OperBinary { op, .. } => *op,
        }
    }

    pub fn dest(&self) -> Option<AbsAddress> {
        match self {
            Step::TacUnary { dest, .. } | Step::TacBinary { dest, .. } => Some(*dest),
            _ => None,
        }
    }

    /// Operands read by this step, in order.
    pub fn args(&self) -> Vec<AbsAddress> {
        match self {
            Step::TacUnary { arg0, .. } | Step::OperUnary { arg0, .. } => vec![*arg0],
            Step::TacBinary { arg0, arg1, .. } | Step::OperBinary { arg0, arg1, .. } => {
                vec![*arg0, *arg1]
            }
            Step::OperNonary { .. } => Vec::new(),
        }
    }

    /// A plain `dest = src` copy.
    pub fn is_copy(&self) -> bool {
        matches!(self, Step::TacUnary { op: Op::Nop, .. })
    }

    pub fn condensed() -> Self {
        Step::OperNonary {
            op: Op::MetaCondensed,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::TacUnary { dest, op, arg0 } => write!(f, "{} = {} {}", dest, op, arg0),
            Step::TacBinary {
                dest,
                op,
                arg0,
                arg1,
            } => write!(f, "{} = {} {} {}", dest, arg0, op, arg1),
            Step::OperNonary { op } => write!(f, "{}", op),
            Step::OperUnary { op, arg0 } => write!(f, "{} {}", op, arg0),
            Step::OperBinary { op, arg0, arg1 } => write!(f, "{} {}, {}", op, arg0, arg1),
        }
    }
}
