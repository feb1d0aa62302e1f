use std::fmt;

use crate::bytecode::op::Opcode;

#[derive(Debug, Clone, PartialEq)]
pub enum EmitError {
    /// An operand that cannot be mapped to a location
    UnresolvedOperand { function: usize, operand: String },
    /// A step shape / op pairing the emitter has no encoding for
    UnsupportedStep { function: usize, step: String },
    /// A successor id that does not name a block of the same CFG
    MissingBlock {
        function: usize,
        from: usize,
        to: usize,
    },
    /// The register slot counter ran out
    SlotExhausted { function: usize },
    /// A value that does not fit a 16-bit operand slot
    OperandOverflow { function: usize, value: usize },
    /// A patch marker with no saved position to resolve
    PatchUnderflow { function: usize, marker: &'static str },
    /// A patch marker pointing at the wrong kind of jump
    PatchMismatch {
        function: usize,
        expected: Opcode,
        found: Opcode,
    },
    /// Saved patch positions left over at the end of a function
    UnbalancedPatches { function: usize, pending: usize },
    /// Slot bookkeeping went out of range
    Internal(String),
}

impl EmitError {
    pub fn unresolved(function: usize, operand: impl fmt::Display) -> Self {
        EmitError::UnresolvedOperand {
            function,
            operand: operand.to_string(),
        }
    }

    pub fn unsupported(function: usize, step: impl fmt::Display) -> Self {
        EmitError::UnsupportedStep {
            function,
            step: step.to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EmitError::Internal(msg.into())
    }
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "emit error: ")?;
        match self {
            EmitError::UnresolvedOperand { function, operand } => {
                write!(f, "cannot resolve operand '{}' in function #{}", operand, function)
            }
            EmitError::UnsupportedStep { function, step } => {
                write!(f, "no encoding for step '{}' in function #{}", step, function)
            }
            EmitError::MissingBlock { function, from, to } => write!(
                f,
                "bb{} of function #{} links to missing bb{}",
                from, function, to
            ),
            EmitError::SlotExhausted { function } => {
                write!(f, "function #{} ran out of register slots", function)
            }
            EmitError::OperandOverflow { function, value } => write!(
                f,
                "value {} does not fit an operand in function #{}",
                value, function
            ),
            EmitError::PatchUnderflow { function, marker } => write!(
                f,
                "'{}' in function #{} has no saved jump to patch",
                marker, function
            ),
            EmitError::PatchMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "patch in function #{} expected '{}' but found '{}'",
                function,
                expected.mnemonic(),
                found.mnemonic()
            ),
            EmitError::UnbalancedPatches { function, pending } => write!(
                f,
                "function #{} ends with {} unpatched jump(s)",
                function, pending
            ),
            EmitError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for EmitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_block_display() {
        let err = EmitError::MissingBlock {
            function: 2,
            from: 0,
            to: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("bb0"));
        assert!(msg.contains("bb7"));
        assert!(msg.contains("#2"));
    }

    #[test]
    fn test_patch_mismatch_uses_mnemonics() {
        let err = EmitError::PatchMismatch {
            function: 0,
            expected: Opcode::JumpElse,
            found: Opcode::Jump,
        };
        let msg = err.to_string();
        assert!(msg.contains("'jump_else'"));
        assert!(msg.contains("'jump'"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = EmitError::internal("test");
        let _: &dyn std::error::Error = &err;
    }
}
