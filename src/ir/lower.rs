use std::collections::HashMap;

use crate::{
    ir::{
        cfg::{BlockId, Cfg, FullIR},
        lower_error::{LowerError, LowerFailure},
        steps::{AbsAddress, AddrTag, Op, Step},
    },
    lang::{
        ast::{Expr, ExprKind, Operator, SourceUnit, Stmt, Token, TokenKind},
        value::Value,
    },
    runtime::natives::NativeRegistry,
};

/// Lowers an AST forest into one CFG per function.
///
/// `sources` holds the text every [`SourceUnit`] index refers to. Diagnostics
/// are logged as they occur and returned together on failure.
pub fn lower(
    forest: &[SourceUnit],
    sources: &[String],
    natives: &NativeRegistry,
) -> Result<FullIR, LowerFailure> {
    Lowerer::new(natives).run(forest, sources)
}

/// Where a call lands once its callee name is resolved.
enum CallTarget {
    Function(i16),
    Native(i16),
}

pub struct Lowerer<'n> {
    natives: &'n NativeRegistry,

    /// Functions and interned literals, shared by every function.
    globals: HashMap<String, AbsAddress>,

    /// Parameters and locals of the function being lowered.
    locals: HashMap<String, AbsAddress>,

    constants: Vec<Value>,
    cfg_list: Vec<Cfg>,
    current: Option<Cfg>,

    /// Edges requested while a function body is lowered, applied on exit.
    pending_links: Vec<(BlockId, BlockId)>,

    next_temp: i16,
    next_function: i16,
    main_id: Option<usize>,
    errors: Vec<LowerError>,
}

impl<'n> Lowerer<'n> {
    pub fn new(natives: &'n NativeRegistry) -> Self {
        Self {
            natives,
            globals: HashMap::new(),
            locals: HashMap::new(),
            constants: Vec::new(),
            cfg_list: Vec::new(),
            current: None,
            pending_links: Vec::new(),
            next_temp: 0,
            next_function: 0,
            main_id: None,
            errors: Vec::new(),
        }
    }

    pub fn run(mut self, forest: &[SourceUnit], sources: &[String]) -> Result<FullIR, LowerFailure> {
        // Pass 1: reserve function ids so forward and recursive calls resolve.
        for (stmt, source_id) in forest {
            if let Stmt::Function { name, .. } = stmt {
                let source = source_text(sources, *source_id);
                if let Err(e) = self.declare_function(name.lexeme(source)) {
                    self.report(e);
                }
            }
        }

        // Pass 2: lower bodies. A failing statement does not stop the others.
        for (stmt, source_id) in forest {
            let source = source_text(sources, *source_id);
            if let Err(e) = self.lower_top_level(stmt, source) {
                self.report(e);
            }
        }

        if !self.errors.is_empty() {
            return Err(LowerFailure {
                errors: self.errors,
            });
        }

        Ok(FullIR {
            cfg_list: self.cfg_list,
            constants: self.constants,
            main_id: self.main_id,
        })
    }

    fn report(&mut self, err: LowerError) {
        log::error!("{} (#{})", err, self.errors.len() + 1);
        self.errors.push(err);
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn declare_function(&mut self, name: &str) -> Result<(), LowerError> {
        let id = self.next_function;
        self.next_function = id
            .checked_add(1)
            .ok_or_else(|| LowerError::internal("too many functions"))?;

        if name == "main" && self.main_id.is_none() {
            self.main_id = Some(id as usize);
        }

        if self.globals.contains_key(name) {
            log::warn!(
                "function '{}' is declared more than once, keeping the first declaration",
                name
            );
            return Ok(());
        }

        self.globals
            .insert(name.to_string(), AbsAddress::immediate(id));
        Ok(())
    }

    fn lower_top_level(&mut self, stmt: &Stmt, source: &str) -> Result<(), LowerError> {
        match stmt {
            Stmt::Function { params, body, .. } => {
                let result = self
                    .enter_function(params, source)
                    .and_then(|()| self.lower_stmt(body, source));
                self.exit_function(result)
            }
            Stmt::Import(_) => Ok(()),
            Stmt::NativeStub { name, .. } => {
                let name = name.lexeme(source);
                if self.natives.contains(name) {
                    Ok(())
                } else {
                    Err(LowerError::unknown_native_stub(name))
                }
            }
            other => Err(LowerError::stmt_at_top_level(other.kind_name())),
        }
    }

    fn enter_function(&mut self, params: &[Token], source: &str) -> Result<(), LowerError> {
        let mut cfg = Cfg::new();
        cfg.add_bb();
        self.current = Some(cfg);
        self.locals.clear();
        self.pending_links.clear();
        self.next_temp = 0;

        for param in params {
            let name = param.lexeme(source);
            let temp = self.gen_temp()?;
            if self.locals.insert(name.to_string(), temp).is_some() {
                return Err(LowerError::redefinition(name, name));
            }
        }

        let param_count = self.next_temp as u16;
        if let Some(cfg) = self.current.as_mut() {
            cfg.param_count = param_count;
        }
        Ok(())
    }

    /// Applies deferred edges and stores the CFG whether or not the body
    /// lowered, so function ids stay positional.
    fn exit_function(&mut self, body: Result<(), LowerError>) -> Result<(), LowerError> {
        let mut cfg = self.current.take().unwrap_or_default();
        let mut result = body;

        if result.is_ok() {
            for (from, to) in self.pending_links.drain(..) {
                if !cfg.link_bb(from, to) {
                    result = Err(LowerError::internal(format!(
                        "cannot link bb{} to bb{}",
                        from, to
                    )));
                    break;
                }
            }
        }

        self.cfg_list.push(cfg);
        self.pending_links.clear();
        self.locals.clear();
        self.next_temp = 0;
        result
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn gen_temp(&mut self) -> Result<AbsAddress, LowerError> {
        let id = self.next_temp;
        self.next_temp = id
            .checked_add(1)
            .ok_or_else(|| LowerError::internal("temporary id overflow"))?;
        Ok(AbsAddress::temp(id))
    }

    fn cfg_mut(&mut self) -> Result<&mut Cfg, LowerError> {
        self.current
            .as_mut()
            .ok_or_else(|| LowerError::internal("no function is being lowered"))
    }

    fn add_bb(&mut self) -> Result<BlockId, LowerError> {
        Ok(self.cfg_mut()?.add_bb())
    }

    fn newest_id(&mut self) -> Result<BlockId, LowerError> {
        self.cfg_mut()?
            .newest_id()
            .ok_or_else(|| LowerError::internal("function has no basic block"))
    }

    fn push_step(&mut self, step: Step) -> Result<(), LowerError> {
        let block = self
            .cfg_mut()?
            .newest_bb_mut()
            .ok_or_else(|| LowerError::internal("function has no basic block"))?;
        block.steps.push(step);
        Ok(())
    }

    fn push_nonary(&mut self, op: Op) -> Result<(), LowerError> {
        self.push_step(Step::OperNonary { op })
    }

    fn intern_constant(&mut self, lexeme: &str, value: Value) -> Result<AbsAddress, LowerError> {
        if let Some(addr) = self.globals.get(lexeme) {
            return Ok(*addr);
        }

        let id = i16::try_from(self.constants.len())
            .map_err(|_| LowerError::internal("constant pool overflow"))?;
        let addr = AbsAddress::constant(id);
        self.constants.push(value);
        self.globals.insert(lexeme.to_string(), addr);
        Ok(addr)
    }

    fn lookup_name(&self, name: &str) -> Option<AbsAddress> {
        self.globals
            .get(name)
            .or_else(|| self.locals.get(name))
            .copied()
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_stmt(&mut self, stmt: &Stmt, source: &str) -> Result<(), LowerError> {
        match stmt {
            Stmt::Expr(expr) => self.lower_expr(expr, source).map(|_| ()),
            Stmt::LocalDef { name, init } => self.lower_local_def(name, init, source),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.lower_if(cond, then_body, else_body.as_deref(), source),
            Stmt::Return(expr) => {
                let result = self.lower_expr(expr, source)?;
                self.push_step(Step::OperUnary {
                    op: Op::Ret,
                    arg0: result,
                })
            }
            Stmt::Block(items) => {
                for item in items {
                    self.lower_stmt(item, source)?;
                }
                Ok(())
            }
            Stmt::Function { name, .. } => Err(LowerError::nested_function(name.lexeme(source))),
            Stmt::Import(_) | Stmt::NativeStub { .. } => {
                Err(LowerError::stmt_at_top_level(stmt.kind_name()))
            }
        }
    }

    fn lower_local_def(&mut self, name: &Token, init: &Expr, source: &str) -> Result<(), LowerError> {
        let init_addr = self.lower_expr(init, source)?;
        let dest = self.gen_temp()?;

        self.push_step(Step::TacUnary {
            dest,
            op: Op::Nop,
            arg0: init_addr,
        })?;

        let var_name = name.lexeme(source);
        if self.locals.contains_key(var_name) {
            let snippet = source.get(name.start..init.end).unwrap_or(var_name);
            return Err(LowerError::redefinition(var_name, snippet));
        }
        self.locals.insert(var_name.to_string(), dest);
        Ok(())
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_body: &Stmt,
        else_body: Option<&Stmt>,
        source: &str,
    ) -> Result<(), LowerError> {
        let cond_addr = self.lower_expr(cond, source)?;
        let pre_id = self.newest_id()?;

        self.push_step(Step::OperBinary {
            op: Op::JumpElse,
            arg0: cond_addr,
            arg1: AbsAddress::immediate(0),
        })?;
        self.push_nonary(Op::MetaSavePatch)?;

        let then_id = self.add_bb()?;
        self.lower_stmt(then_body, source)?;
        let then_tail = self.newest_id()?;
        self.pending_links.push((pre_id, then_id));

        match else_body {
            Some(else_body) => {
                self.push_step(Step::OperUnary {
                    op: Op::Jump,
                    arg0: AbsAddress::immediate(0),
                })?;
                self.push_nonary(Op::MetaSavePatch)?;
                // The skip over the then-branch must resolve first.
                self.push_nonary(Op::MetaShufflePatch)?;

                let else_id = self.add_bb()?;
                self.push_nonary(Op::Nop)?;
                self.push_nonary(Op::MetaPatchJmpElse)?;
                self.lower_stmt(else_body, source)?;
                let else_tail = self.newest_id()?;
                self.pending_links.push((pre_id, else_id));

                let post_id = self.add_bb()?;
                self.push_nonary(Op::Nop)?;
                self.push_nonary(Op::MetaPatchJmp)?;
                self.pending_links.push((then_tail, post_id));
                self.pending_links.push((else_tail, post_id));
            }
            None => {
                let post_id = self.add_bb()?;
                self.push_nonary(Op::Nop)?;
                self.push_nonary(Op::MetaPatchJmpElse)?;
                self.pending_links.push((then_tail, post_id));
                self.pending_links.push((pre_id, post_id));
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr, source: &str) -> Result<AbsAddress, LowerError> {
        match &expr.kind {
            ExprKind::Literal(token) => self.lower_literal(token, source),
            ExprKind::Call { callee, args } => self.lower_call(expr, callee, args, source),
            ExprKind::Unary { op, inner } => {
                if *op != Operator::Negate {
                    return Err(LowerError::invalid_unary(op.symbol(), expr.text(source)));
                }
                let arg0 = self.lower_expr(inner, source)?;
                let dest = self.gen_temp()?;
                self.push_step(Step::TacUnary {
                    dest,
                    op: Op::Neg,
                    arg0,
                })?;
                Ok(dest)
            }
            ExprKind::Binary { op, left, right } => {
                let arg0 = self.lower_expr(left, source)?;
                let arg1 = self.lower_expr(right, source)?;
                let ir_op = op
                    .to_ir_op()
                    .ok_or_else(|| LowerError::invalid_binary(op.symbol(), expr.text(source)))?;
                let dest = self.gen_temp()?;
                self.push_step(Step::TacBinary {
                    dest,
                    op: ir_op,
                    arg0,
                    arg1,
                })?;
                Ok(dest)
            }
            ExprKind::Assign { target, value } => {
                let dest = match &target.kind {
                    ExprKind::Literal(token) if token.kind == TokenKind::Identifier => {
                        self.lower_literal(token, source)?
                    }
                    _ => return Err(LowerError::bad_assign_target(target.text(source))),
                };
                if dest.tag != AddrTag::Temp {
                    return Err(LowerError::bad_assign_target(target.text(source)));
                }
                let arg0 = self.lower_expr(value, source)?;
                self.push_step(Step::TacUnary {
                    dest,
                    op: Op::Nop,
                    arg0,
                })?;
                Ok(dest)
            }
        }
    }

    fn lower_literal(&mut self, token: &Token, source: &str) -> Result<AbsAddress, LowerError> {
        let lexeme = token.lexeme(source);

        match token.kind {
            TokenKind::True => self.intern_constant(lexeme, Value::Bool(true)),
            TokenKind::False => self.intern_constant(lexeme, Value::Bool(false)),
            TokenKind::Int => {
                let value = lexeme
                    .parse::<i32>()
                    .map_err(|_| LowerError::bad_literal(lexeme, "not a 32-bit integer"))?;
                self.intern_constant(lexeme, Value::Int(value))
            }
            TokenKind::Float => {
                let value = lexeme
                    .parse::<f64>()
                    .map_err(|_| LowerError::bad_literal(lexeme, "not a float"))?;
                self.intern_constant(lexeme, Value::Float(value))
            }
            TokenKind::Identifier => {
                if self.natives.contains(lexeme) {
                    return Err(LowerError::native_as_value(lexeme));
                }
                self.lookup_name(lexeme)
                    .ok_or_else(|| LowerError::unknown_name(lexeme, lexeme))
            }
        }
    }

    fn resolve_callee(&self, callee: &Expr, source: &str) -> Result<CallTarget, LowerError> {
        let ExprKind::Literal(token) = &callee.kind else {
            return Err(LowerError::bad_callee(callee.text(source)));
        };
        if token.kind != TokenKind::Identifier {
            return Err(LowerError::bad_callee(callee.text(source)));
        }

        let name = token.lexeme(source);
        if let Some(id) = self.natives.id_of(name) {
            let id = i16::try_from(id).map_err(|_| LowerError::internal("native id overflow"))?;
            return Ok(CallTarget::Native(id));
        }

        match self.lookup_name(name) {
            Some(addr) if addr.tag == AddrTag::Immediate => Ok(CallTarget::Function(addr.id)),
            Some(_) => Err(LowerError::bad_callee(name)),
            None => Err(LowerError::unknown_name(name, callee.text(source))),
        }
    }

    fn lower_call(
        &mut self,
        call: &Expr,
        callee: &Expr,
        args: &[Expr],
        source: &str,
    ) -> Result<AbsAddress, LowerError> {
        let target = self.resolve_callee(callee, source)?;

        let mut arg_addrs = Vec::with_capacity(args.len().max(1));
        for arg in args {
            arg_addrs.push(self.lower_expr(arg, source)?);
        }
        // The first argument slot doubles as the return slot, so a call
        // without arguments still reserves one.
        if arg_addrs.is_empty() {
            arg_addrs.push(AbsAddress::immediate(0));
        }

        let argc = i16::try_from(arg_addrs.len())
            .map_err(|_| LowerError::internal(format!("too many arguments in '{}'", call.text(source))))?;

        for arg0 in arg_addrs {
            let dest = self.gen_temp()?;
            self.push_step(Step::TacUnary {
                dest,
                op: Op::Nop,
                arg0,
            })?;
        }

        let (op, callee_id) = match target {
            CallTarget::Function(id) => (Op::Call, id),
            CallTarget::Native(id) => (Op::NativeCall, id),
        };
        self.push_step(Step::OperBinary {
            op,
            arg0: AbsAddress::immediate(callee_id),
            arg1: AbsAddress::immediate(argc),
        })?;

        Ok(AbsAddress::temp(self.next_temp - argc))
    }
}

fn source_text(sources: &[String], id: usize) -> &str {
    sources.get(id).map_or("", String::as_str)
}
