use crate::bytecode::op::{ArgMode, Instruction, Opcode, Operand};
use crate::bytecode::program::Program;
use crate::lang::value::Value;
use crate::runtime::heap::HeapStore;
use crate::runtime::natives::NativeTable;
use crate::runtime::status::ExecStatus;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Slots in the register file shared by every frame.
    pub register_file_limit: usize,
    /// Values the operand stack may hold for saved special registers.
    pub operand_stack_limit: usize,
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            register_file_limit: 4096,
            operand_stack_limit: 256,
            max_call_depth: 256,
            max_steps: None,
        }
    }
}

/// Caller state saved by `call` and restored by `ret`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub func: usize,
    pub ret_ip: usize,
    pub base: usize,
    pub top: usize,
}

/// Snapshot of the scalar registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scalars {
    pub rfi: usize,
    pub rip: usize,
    pub rbp: usize,
    pub top: usize,
    pub res: ExecStatus,
    pub rfv: bool,
}

/// Register-file virtual machine.
///
/// Registers named by instructions are relative to `rbp`. `top` is one past
/// the highest slot in use; `push` and stack-mode operands work at `top`.
pub struct Engine {
    config: EngineConfig,
    program: Program,
    natives: NativeTable,
    heap: HeapStore,

    memory: Vec<Value>,
    operand_stack: Vec<Value>,
    frames: Vec<CallFrame>,

    rfi: usize,
    rip: usize,
    rbp: usize,
    top: usize,
    res: ExecStatus,
    rfv: bool,

    halted: bool,
    steps: usize,
}

impl Engine {
    pub fn new(config: EngineConfig, program: Program) -> Self {
        Self::with_natives(config, program, NativeTable::standard())
    }

    pub fn with_natives(config: EngineConfig, program: Program, natives: NativeTable) -> Self {
        let memory = vec![Value::Dud; config.register_file_limit];
        Self {
            config,
            program,
            natives,
            heap: HeapStore::new(),
            memory,
            operand_stack: Vec::new(),
            frames: Vec::new(),
            rfi: 0,
            rip: 0,
            rbp: 0,
            top: 0,
            res: ExecStatus::Ok,
            rfv: false,
            halted: false,
            steps: 0,
        }
    }

    // Accessors

    pub fn status(&self) -> ExecStatus {
        self.res
    }

    /// Absolute register file slot.
    pub fn register(&self, index: usize) -> Option<Value> {
        self.memory.get(index).copied()
    }

    pub fn scalars(&self) -> Scalars {
        Scalars {
            rfi: self.rfi,
            rip: self.rip,
            rbp: self.rbp,
            top: self.top,
            res: self.res,
            rfv: self.rfv,
        }
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn operand_stack(&self) -> &[Value] {
        &self.operand_stack
    }

    pub fn heap(&self) -> &HeapStore {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut HeapStore {
        &mut self.heap
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    // Running

    /// Resets all state and enters the entry function.
    pub fn begin(&mut self) -> ExecStatus {
        self.memory.fill(Value::Dud);
        self.operand_stack.clear();
        self.frames.clear();
        self.heap = HeapStore::new();
        self.rip = 0;
        self.rbp = 0;
        self.top = 0;
        self.res = ExecStatus::Ok;
        self.rfv = false;
        self.halted = false;
        self.steps = 0;

        let entry = match self.program.entry_id {
            Some(id) if id < self.program.chunks.len() => id,
            other => {
                log::error!("no runnable entry function (entry id {:?})", other);
                self.res = ExecStatus::EntryError;
                return self.res;
            }
        };
        self.rfi = entry;

        // The entry function gets a frame like any callee, so its `ret` is
        // handled the same way.
        if let Err(status) = self.save_specials() {
            self.res = status;
            return self.res;
        }
        self.frames.push(CallFrame {
            func: entry,
            ret_ip: 0,
            base: 0,
            top: 0,
        });
        self.res
    }

    /// Dispatches one instruction. Returns false once the run is over.
    pub fn step(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }

        if let Some(max) = self.config.max_steps {
            if self.steps >= max {
                log::error!("execution step limit exceeded ({})", max);
                self.res = ExecStatus::AnyError;
                return false;
            }
        }
        self.steps += 1;

        let (func, ip) = (self.rfi, self.rip);
        let outcome = self.fetch().and_then(|ins| {
            log::trace!("{}:{:04} {}", func, ip, ins);
            self.dispatch(ins)
        });

        match outcome {
            Ok(()) => self.is_running(),
            Err(status) => {
                log::error!("{} at function #{} ip {}", status, func, ip);
                self.res = status;
                false
            }
        }
    }

    /// Runs the entry function to completion and returns the machine status.
    pub fn execute(&mut self) -> ExecStatus {
        if !self.begin().is_ok() {
            return self.res;
        }
        while self.step() {}
        self.res
    }

    /// Like [`Engine::execute`], but a clean run whose entry function did
    /// not return `0` reports [`ExecStatus::UserError`].
    pub fn run(&mut self) -> ExecStatus {
        let status = self.execute();
        if status.is_ok() && self.register(0) != Some(Value::Int(0)) {
            log::warn!(
                "entry function returned {}",
                self.register(0).unwrap_or_default()
            );
            self.res = ExecStatus::UserError;
        }
        self.res
    }

    fn is_running(&self) -> bool {
        !self.halted && !self.frames.is_empty() && self.res.is_ok()
    }

    fn fetch(&self) -> Result<Instruction, ExecStatus> {
        self.program
            .chunk(self.rfi)
            .and_then(|chunk| chunk.get(self.rip))
            .copied()
            .ok_or(ExecStatus::MemError)
    }

    fn dispatch(&mut self, ins: Instruction) -> Result<(), ExecStatus> {
        match ins.op {
            Opcode::Nop => {}
            Opcode::Mov => {
                let dest = operand(&ins, 0)?;
                let value = self.load(operand(&ins, 1)?)?;
                self.store(dest, value)?;
            }
            Opcode::Push => {
                let value = self.load(operand(&ins, 0)?)?;
                self.push(value)?;
            }
            Opcode::Neg => {
                let dest = operand(&ins, 0)?;
                if dest.mode != ArgMode::Register {
                    return Err(ExecStatus::ArgError);
                }
                let value = self.load(dest)?.neg();
                if value.is_dud() {
                    return Err(ExecStatus::ArgError);
                }
                self.store(dest, value)?;
            }
            Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Equ
            | Opcode::Neq
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Lte
            | Opcode::Gte => self.binary(ins.op)?,
            Opcode::Jump => {
                self.rip = self.jump_target(operand(&ins, 0)?)?;
                return Ok(());
            }
            Opcode::JumpIf | Opcode::JumpElse => {
                let cond = self
                    .load(operand(&ins, 0)?)?
                    .truthy()
                    .ok_or(ExecStatus::ArgError)?;
                let target = self.jump_target(operand(&ins, 1)?)?;
                self.rfv = cond;
                if cond == (ins.op == Opcode::JumpIf) {
                    self.rip = target;
                    return Ok(());
                }
            }
            Opcode::Call => {
                let func = self.count(operand(&ins, 0)?)?;
                let argc = self.count(operand(&ins, 1)?)?;
                return self.call(func, argc);
            }
            Opcode::NativeCall => {
                let id = self.count(operand(&ins, 0)?)?;
                let argc = self.count(operand(&ins, 1)?)?;
                let native = self.natives.get(id).ok_or(ExecStatus::ArgError)?;
                let argc = u16::try_from(argc).map_err(|_| ExecStatus::ArgError)?;
                log::debug!(
                    "native {} with {} arg(s)",
                    self.natives.name_of(id).unwrap_or("?"),
                    argc
                );
                native(self, argc)?;
            }
            Opcode::Ret => {
                let value = self.load(operand(&ins, 0)?)?;
                return self.ret(value);
            }
            Opcode::Halt => {
                self.halted = true;
                return Ok(());
            }
        }
        self.rip += 1;
        Ok(())
    }

    fn binary(&mut self, op: Opcode) -> Result<(), ExecStatus> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match op {
            Opcode::Mul => lhs.mul(rhs),
            Opcode::Div => lhs.div(rhs),
            Opcode::Mod => lhs.rem(rhs),
            Opcode::Add => lhs.add(rhs),
            Opcode::Sub => lhs.sub(rhs),
            Opcode::Equ => lhs.equ(rhs),
            Opcode::Neq => lhs.neq(rhs),
            Opcode::Lt => lhs.lt(rhs),
            Opcode::Gt => lhs.gt(rhs),
            Opcode::Lte => lhs.lte(rhs),
            Opcode::Gte => lhs.gte(rhs),
            _ => return Err(ExecStatus::OpError),
        };

        match result {
            Value::Dud => {
                let zero_divisor = matches!(op, Opcode::Div | Opcode::Mod)
                    && lhs.type_name() == rhs.type_name()
                    && rhs.is_zero();
                Err(if zero_divisor {
                    ExecStatus::MathError
                } else {
                    ExecStatus::ArgError
                })
            }
            Value::Bool(flag) => {
                self.rfv = flag;
                self.push(result)
            }
            _ => self.push(result),
        }
    }

    fn call(&mut self, func: usize, argc: usize) -> Result<(), ExecStatus> {
        if self.program.chunk(func).is_none() {
            return Err(ExecStatus::ArgError);
        }
        if self.frames.len() >= self.config.max_call_depth {
            log::error!("call depth limit exceeded ({})", self.config.max_call_depth);
            return Err(ExecStatus::MemError);
        }
        if argc > self.top - self.rbp {
            return Err(ExecStatus::MemError);
        }

        self.save_specials()?;
        self.frames.push(CallFrame {
            func: self.rfi,
            ret_ip: self.rip + 1,
            base: self.rbp,
            top: self.top,
        });
        log::debug!(
            "call #{} with {} arg(s), depth {}",
            func,
            argc,
            self.frames.len()
        );

        self.rbp = self.top - argc;
        self.rfi = func;
        self.rip = 0;
        Ok(())
    }

    fn ret(&mut self, value: Value) -> Result<(), ExecStatus> {
        *self.memory.get_mut(self.rbp).ok_or(ExecStatus::MemError)? = value;

        let frame = self.frames.pop().ok_or(ExecStatus::MemError)?;
        log::debug!("ret {} from #{} to #{}", value, self.rfi, frame.func);
        self.rfi = frame.func;
        self.rip = frame.ret_ip;
        self.rbp = frame.base;
        self.top = frame.top;

        let rfv = self.operand_stack.pop().ok_or(ExecStatus::MemError)?;
        let res = self.operand_stack.pop().ok_or(ExecStatus::MemError)?;
        self.rfv = rfv.truthy().unwrap_or(false);
        self.res = match res {
            Value::Int(code) => ExecStatus::from_code(code).unwrap_or(ExecStatus::AnyError),
            _ => ExecStatus::AnyError,
        };
        Ok(())
    }

    fn save_specials(&mut self) -> Result<(), ExecStatus> {
        if self.operand_stack.len() + 2 > self.config.operand_stack_limit {
            log::error!(
                "operand stack limit exceeded ({})",
                self.config.operand_stack_limit
            );
            return Err(ExecStatus::MemError);
        }
        self.operand_stack.push(Value::Int(self.res.code()));
        self.operand_stack.push(Value::Bool(self.rfv));
        Ok(())
    }

    // Operands

    fn load(&mut self, operand: Operand) -> Result<Value, ExecStatus> {
        match operand.mode {
            ArgMode::Immediate => Ok(Value::Int(i32::from(operand.value))),
            ArgMode::Constant => usize::try_from(operand.value)
                .ok()
                .and_then(|id| self.program.constants.get(id))
                .copied()
                .ok_or(ExecStatus::MemError),
            ArgMode::Register => {
                let index = self.slot(operand.value)?;
                self.memory.get(index).copied().ok_or(ExecStatus::MemError)
            }
            ArgMode::Stack => self.pop(),
            ArgMode::Heap => u32::try_from(operand.value)
                .map(Value::Heap)
                .map_err(|_| ExecStatus::MemError),
        }
    }

    fn store(&mut self, dest: Operand, value: Value) -> Result<(), ExecStatus> {
        if dest.mode != ArgMode::Register {
            return Err(ExecStatus::ArgError);
        }
        let index = self.slot(dest.value)?;
        *self.memory.get_mut(index).ok_or(ExecStatus::MemError)? = value;
        self.top = self.top.max(index + 1);
        Ok(())
    }

    fn slot(&self, offset: i16) -> Result<usize, ExecStatus> {
        usize::try_from(offset)
            .map(|offset| self.rbp + offset)
            .map_err(|_| ExecStatus::MemError)
    }

    fn push(&mut self, value: Value) -> Result<(), ExecStatus> {
        *self.memory.get_mut(self.top).ok_or(ExecStatus::MemError)? = value;
        self.top += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, ExecStatus> {
        if self.top <= self.rbp {
            return Err(ExecStatus::MemError);
        }
        self.top -= 1;
        Ok(self.memory[self.top])
    }

    /// Non-negative integer operand such as a function id or an argument count.
    fn count(&mut self, operand: Operand) -> Result<usize, ExecStatus> {
        match self.load(operand)? {
            Value::Int(n) => usize::try_from(n).map_err(|_| ExecStatus::ArgError),
            _ => Err(ExecStatus::ArgError),
        }
    }

    fn jump_target(&mut self, operand: Operand) -> Result<usize, ExecStatus> {
        if operand.mode != ArgMode::Immediate {
            return Err(ExecStatus::ArgError);
        }
        self.count(operand)
    }

    // Native support

    /// Argument `index` of a native call with `argc` arguments.
    pub fn native_arg(&self, argc: u16, index: u16) -> Result<Value, ExecStatus> {
        if index >= argc {
            return Err(ExecStatus::ArgError);
        }
        let first = self.native_base(argc)?;
        Ok(self.memory[first + index as usize])
    }

    /// Writes a native's result into the first argument slot.
    pub fn native_return(&mut self, value: Value, argc: u16) -> Result<(), ExecStatus> {
        if argc == 0 {
            return Err(ExecStatus::MemError);
        }
        let first = self.native_base(argc)?;
        self.memory[first] = value;
        Ok(())
    }

    fn native_base(&self, argc: u16) -> Result<usize, ExecStatus> {
        let argc = argc as usize;
        if self.top < self.rbp + argc {
            return Err(ExecStatus::MemError);
        }
        Ok(self.top - argc)
    }
}

fn operand(ins: &Instruction, slot: usize) -> Result<Operand, ExecStatus> {
    ins.operand(slot).ok_or(ExecStatus::OpError)
}
