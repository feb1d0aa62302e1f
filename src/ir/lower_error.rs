use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LowerError {
    /// An identifier that is neither a native, a function, nor a local
    UnknownName { name: String, snippet: String },
    /// An operator that has no meaning in the position it was used
    InvalidOperator {
        symbol: &'static str,
        snippet: String,
        hint: Option<String>,
    },
    /// A construct that is valid but appeared in an invalid position
    InvalidPosition {
        what: String,
        name: Option<String>,
        reason: String,
        hint: Option<String>,
    },
    /// A local defined twice in the same function
    Redefinition { name: String, snippet: String },
    /// A literal whose text cannot be turned into a value
    BadLiteral { lexeme: String, reason: String },
    /// Allocation or bookkeeping failure inside the lowerer
    Internal(String),
}

impl LowerError {
    pub fn unknown_name(name: &str, snippet: &str) -> Self {
        LowerError::UnknownName {
            name: name.to_string(),
            snippet: snippet.to_string(),
        }
    }

    pub fn invalid_unary(symbol: &'static str, snippet: &str) -> Self {
        LowerError::InvalidOperator {
            symbol,
            snippet: snippet.to_string(),
            hint: Some("only '-' can be used as a prefix operator".to_string()),
        }
    }

    pub fn invalid_binary(symbol: &'static str, snippet: &str) -> Self {
        LowerError::InvalidOperator {
            symbol,
            snippet: snippet.to_string(),
            hint: None,
        }
    }

    /// A statement other than a declaration at the top level
    pub fn stmt_at_top_level(what: &str) -> Self {
        LowerError::InvalidPosition {
            what: what.to_string(),
            name: None,
            reason: "only declarations may appear at the top level".to_string(),
            hint: Some("move the statement into a function body".to_string()),
        }
    }

    pub fn nested_function(name: &str) -> Self {
        LowerError::InvalidPosition {
            what: "function".to_string(),
            name: Some(name.to_string()),
            reason: "functions cannot be declared inside other functions".to_string(),
            hint: Some("declare the function at the top level".to_string()),
        }
    }

    pub fn native_as_value(name: &str) -> Self {
        LowerError::InvalidPosition {
            what: "native".to_string(),
            name: Some(name.to_string()),
            reason: "native procedures can only be called".to_string(),
            hint: None,
        }
    }

    pub fn bad_callee(snippet: &str) -> Self {
        LowerError::InvalidPosition {
            what: "call".to_string(),
            name: Some(snippet.to_string()),
            reason: "only named functions and natives can be called".to_string(),
            hint: None,
        }
    }

    pub fn bad_assign_target(snippet: &str) -> Self {
        LowerError::InvalidPosition {
            what: "assignment".to_string(),
            name: Some(snippet.to_string()),
            reason: "the left side must name a local variable".to_string(),
            hint: None,
        }
    }

    pub fn unknown_native_stub(name: &str) -> Self {
        LowerError::InvalidPosition {
            what: "native stub".to_string(),
            name: Some(name.to_string()),
            reason: "no native procedure with this name is registered".to_string(),
            hint: None,
        }
    }

    pub fn redefinition(name: &str, snippet: &str) -> Self {
        LowerError::Redefinition {
            name: name.to_string(),
            snippet: snippet.to_string(),
        }
    }

    pub fn bad_literal(lexeme: &str, reason: impl Into<String>) -> Self {
        LowerError::BadLiteral {
            lexeme: lexeme.to_string(),
            reason: reason.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        LowerError::Internal(msg.into())
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowerError::UnknownName { name, snippet } => {
                write!(f, "lower error: unknown name '{}'", name)?;
                if !snippet.is_empty() {
                    write!(f, "\n  source: {}", snippet)?;
                }
                Ok(())
            }
            LowerError::InvalidOperator {
                symbol,
                snippet,
                hint,
            } => {
                write!(f, "lower error: invalid operator '{}'", symbol)?;
                if !snippet.is_empty() {
                    write!(f, "\n  source: {}", snippet)?;
                }
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
            LowerError::InvalidPosition {
                what,
                name,
                reason,
                hint,
            } => {
                write!(f, "lower error: ")?;
                match name {
                    Some(n) => write!(f, "{} '{}': {}", what, n, reason)?,
                    None => write!(f, "{}: {}", what, reason)?,
                }
                if let Some(h) = hint {
                    write!(f, "\n  hint: {}", h)?;
                }
                Ok(())
            }
            LowerError::Redefinition { name, snippet } => {
                write!(f, "lower error: invalid re-definition of local '{}'", name)?;
                if !snippet.is_empty() {
                    write!(f, "\n  source: {}", snippet)?;
                }
                Ok(())
            }
            LowerError::BadLiteral { lexeme, reason } => {
                write!(f, "lower error: bad literal '{}': {}", lexeme, reason)
            }
            LowerError::Internal(msg) => write!(f, "lower error: internal error: {}", msg),
        }
    }
}

impl std::error::Error for LowerError {}

/// Every diagnostic collected while lowering a forest that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct LowerFailure {
    pub errors: Vec<LowerError>,
}

impl fmt::Display for LowerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lowering failed with {} error(s)", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for LowerFailure {}
