use std::fmt;

/// Terminal state of an engine run. The numeric codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ExecStatus {
    #[default]
    Ok = 0,
    /// No valid entry function.
    EntryError = 1,
    /// Unimplemented or malformed instruction.
    OpError = 2,
    /// Operand of the wrong kind for its instruction.
    ArgError = 3,
    /// Out-of-bounds or unresolved storage access.
    MemError = 4,
    /// Division or modulo by zero.
    MathError = 5,
    /// The program ran cleanly but `main` did not return 0.
    UserError = 6,
    AnyError = 7,
}

impl ExecStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExecStatus::Ok),
            1 => Some(ExecStatus::EntryError),
            2 => Some(ExecStatus::OpError),
            3 => Some(ExecStatus::ArgError),
            4 => Some(ExecStatus::MemError),
            5 => Some(ExecStatus::MathError),
            6 => Some(ExecStatus::UserError),
            7 => Some(ExecStatus::AnyError),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ExecStatus::Ok
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecStatus::Ok => "ok",
            ExecStatus::EntryError => "entry_error",
            ExecStatus::OpError => "op_error",
            ExecStatus::ArgError => "arg_error",
            ExecStatus::MemError => "mem_error",
            ExecStatus::MathError => "math_error",
            ExecStatus::UserError => "user_error",
            ExecStatus::AnyError => "any_error",
        }
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 0..8 {
            let status = ExecStatus::from_code(code).expect("known code");
            assert_eq!(status.code(), code);
        }
        assert_eq!(ExecStatus::from_code(8), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ExecStatus::MathError.to_string(), "math_error (5)");
    }
}
