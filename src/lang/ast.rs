use crate::ir::steps::Op;

/// Lexical category of a token the core needs to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Int,
    Float,
    True,
    False,
    Identifier,
}

/// A token is only a span: its text lives in the source unit it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub len: usize,
}

impl Token {
    pub fn new(kind: TokenKind, start: usize, len: usize) -> Self {
        Self { kind, start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Source text of this token, or `""` when the span is out of range.
    pub fn lexeme<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end()).unwrap_or("")
    }
}

/// Operators the parser can attach to unary and binary expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Access,
    Negate,
    Mul,
    Div,
    Modulo,
    Add,
    Sub,
    Equality,
    Inequality,
    Lesser,
    Greater,
    AtMost,
    AtLeast,
    Assign,
}

impl Operator {
    /// IR operation for a binary use of this operator, if it has one.
    pub fn to_ir_op(self) -> Option<Op> {
        match self {
            Operator::Mul => Some(Op::Mul),
            Operator::Div => Some(Op::Div),
            Operator::Modulo => Some(Op::Mod),
            Operator::Add => Some(Op::Add),
            Operator::Sub => Some(Op::Sub),
            Operator::Equality => Some(Op::Equ),
            Operator::Inequality => Some(Op::Neq),
            Operator::Lesser => Some(Op::Lt),
            Operator::Greater => Some(Op::Gt),
            Operator::AtMost => Some(Op::Lte),
            Operator::AtLeast => Some(Op::Gte),
            Operator::Access | Operator::Negate | Operator::Assign => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Access => ".",
            Operator::Negate => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Modulo => "%",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Equality => "==",
            Operator::Inequality => "!=",
            Operator::Lesser => "<",
            Operator::Greater => ">",
            Operator::AtMost => "<=",
            Operator::AtLeast => ">=",
            Operator::Assign => "=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Token),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: Operator,
        inner: Box<Expr>,
    },
    Binary {
        op: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

/// Expression node with the source span it covers (end exclusive).
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub start: usize,
    pub end: usize,
}

impl Expr {
    pub fn literal(token: Token) -> Self {
        Self {
            kind: ExprKind::Literal(token),
            start: token.start,
            end: token.end(),
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        let start = callee.start;
        let end = args.last().map_or(callee.end, |arg| arg.end);
        Self {
            kind: ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            start,
            end,
        }
    }

    pub fn unary(op: Operator, inner: Expr) -> Self {
        let (start, end) = (inner.start, inner.end);
        Self {
            kind: ExprKind::Unary {
                op,
                inner: Box::new(inner),
            },
            start,
            end,
        }
    }

    pub fn binary(op: Operator, left: Expr, right: Expr) -> Self {
        let (start, end) = (left.start, right.end);
        Self {
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            start,
            end,
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        let (start, end) = (target.start, value.end);
        Self {
            kind: ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            start,
            end,
        }
    }

    /// Source text covered by this expression.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    LocalDef {
        name: Token,
        init: Expr,
    },
    If {
        cond: Expr,
        then_body: Box<Stmt>,
        else_body: Option<Box<Stmt>>,
    },
    Return(Expr),
    Block(Vec<Stmt>),
    Function {
        name: Token,
        params: Vec<Token>,
        body: Box<Stmt>,
    },
    /// Imports are resolved by the frontend; the core only tolerates them.
    Import(Token),
    /// Declares a procedure provided by the native table.
    NativeStub {
        name: Token,
        params: Vec<Token>,
    },
}

impl Stmt {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::Expr(_) => "expression statement",
            Stmt::LocalDef { .. } => "local definition",
            Stmt::If { .. } => "if",
            Stmt::Return(_) => "return",
            Stmt::Block(_) => "block",
            Stmt::Function { .. } => "function",
            Stmt::Import(_) => "import",
            Stmt::NativeStub { .. } => "native stub",
        }
    }
}

/// A top-level statement tagged with the index of its source text.
pub type SourceUnit = (Stmt, usize);

/// Accumulates a source text while handing out tokens that span into it.
///
/// Frontends that synthesize code, and tests, use it to build AST forests
/// whose lexemes resolve against the produced text.
#[derive(Debug, Default)]
pub struct SourceBuilder {
    text: String,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&mut self, kind: TokenKind, lexeme: &str) -> Token {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        let start = self.text.len();
        self.text.push_str(lexeme);
        Token::new(kind, start, lexeme.len())
    }

    pub fn ident(&mut self, name: &str) -> Token {
        self.token(TokenKind::Identifier, name)
    }

    pub fn int(&mut self, value: i64) -> Expr {
        let token = self.token(TokenKind::Int, &value.to_string());
        Expr::literal(token)
    }

    pub fn float(&mut self, lexeme: &str) -> Expr {
        let token = self.token(TokenKind::Float, lexeme);
        Expr::literal(token)
    }

    pub fn boolean(&mut self, value: bool) -> Expr {
        let (kind, lexeme) = if value {
            (TokenKind::True, "true")
        } else {
            (TokenKind::False, "false")
        };
        let token = self.token(kind, lexeme);
        Expr::literal(token)
    }

    pub fn name(&mut self, name: &str) -> Expr {
        let token = self.ident(name);
        Expr::literal(token)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> String {
        self.text
    }
}
