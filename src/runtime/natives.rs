use std::collections::HashMap;
use std::io::{self, BufRead};

use crate::lang::value::{HeapRef, Value};
use crate::runtime::heap::{HeapObject, Sequence};
use crate::runtime::status::ExecStatus;
use crate::runtime::vm::Engine;

/// A native procedure receives the engine and the argument count of the call.
/// Arguments sit in the top `argc` registers; the result goes in the first.
pub type NativeFn = fn(&mut Engine, u16) -> Result<(), ExecStatus>;

/// Native procedure names visible to lowering, mapped to table ids.
#[derive(Debug, Clone, Default)]
pub struct NativeRegistry {
    ids: HashMap<String, u16>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry matching [`NativeTable::standard`].
    pub fn standard() -> Self {
        NativeTable::standard().registry()
    }

    pub fn insert(&mut self, name: &str, id: u16) {
        self.ids.insert(name.to_string(), id);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Native procedures indexed by id.
#[derive(Clone, Default)]
pub struct NativeTable {
    procs: Vec<(&'static str, NativeFn)>,
}

impl NativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register("print", native_print);
        table.register("prompt_int", native_prompt_int);
        table.register("prompt_float", native_prompt_float);
        table.register("len_of", native_len_of);
        table.register("make_list", native_make_list);
        table.register("make_tuple", native_make_tuple);
        table.register("list_push", native_list_push);
        table.register("list_pop", native_list_pop);
        table.register("list_pop_front", native_list_pop_front);
        table.register("list_concat", native_list_concat);
        table.register("list_get", native_list_get);
        table.register("list_free", native_list_free);
        table
    }

    /// Appends a procedure and returns its id.
    pub fn register(&mut self, name: &'static str, proc_fn: NativeFn) -> u16 {
        self.procs.push((name, proc_fn));
        (self.procs.len() - 1) as u16
    }

    pub fn get(&self, id: usize) -> Option<NativeFn> {
        self.procs.get(id).map(|(_, f)| *f)
    }

    pub fn name_of(&self, id: usize) -> Option<&'static str> {
        self.procs.get(id).map(|(name, _)| *name)
    }

    pub fn registry(&self) -> NativeRegistry {
        let mut registry = NativeRegistry::new();
        for (id, (name, _)) in self.procs.iter().enumerate() {
            registry.insert(name, id as u16);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn heap_ref(value: Value) -> Result<HeapRef, ExecStatus> {
    match value {
        Value::Heap(id) => Ok(id),
        _ => Err(ExecStatus::ArgError),
    }
}

fn sequence_mut(vm: &mut Engine, id: HeapRef) -> Result<&mut Sequence, ExecStatus> {
    vm.heap_mut()
        .get_mut(id)
        .and_then(HeapObject::as_sequence_mut)
        .ok_or(ExecStatus::MemError)
}

fn sequence(vm: &Engine, id: HeapRef) -> Result<&Sequence, ExecStatus> {
    vm.heap()
        .get(id)
        .and_then(HeapObject::as_sequence)
        .ok_or(ExecStatus::MemError)
}

fn store_new(vm: &mut Engine, seq: Sequence) -> Result<Value, ExecStatus> {
    vm.heap_mut()
        .create(HeapObject::Sequence(seq))
        .map(Value::Heap)
        .ok_or(ExecStatus::MemError)
}

fn read_stdin_line() -> Result<String, ExecStatus> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|_| ExecStatus::AnyError)?;
    Ok(line.trim().to_string())
}

// -----------------------------------------------------------------------------
// Standard natives
// -----------------------------------------------------------------------------

fn native_print(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let value = vm.native_arg(argc, 0)?;
    match value {
        Value::Heap(id) => match vm.heap().get(id) {
            Some(object) => println!("{}", object),
            None => println!("{}", value),
        },
        _ => println!("{}", value),
    }
    Ok(())
}

fn native_prompt_int(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let line = read_stdin_line()?;
    let value = line.parse::<i32>().map_or(Value::Dud, Value::Int);
    vm.native_return(value, argc)
}

fn native_prompt_float(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let line = read_stdin_line()?;
    let value = line.parse::<f64>().map_or(Value::Dud, Value::Float);
    vm.native_return(value, argc)
}

fn native_len_of(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let id = heap_ref(vm.native_arg(argc, 0)?)?;
    let len = sequence(vm, id)?.len();
    let len = i32::try_from(len).map_err(|_| ExecStatus::MemError)?;
    vm.native_return(Value::Int(len), argc)
}

/// `make_list(_)`: a new empty list. The argument only reserves the result slot.
fn native_make_list(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let list = store_new(vm, Sequence::new())?;
    vm.native_return(list, argc)
}

fn native_make_tuple(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let items = (0..argc)
        .map(|i| vm.native_arg(argc, i))
        .collect::<Result<Vec<_>, _>>()?;
    let tuple = store_new(vm, Sequence::tuple(items))?;
    vm.native_return(tuple, argc)
}

/// `list_push(list, value)` answers the new length.
fn native_list_push(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let id = heap_ref(vm.native_arg(argc, 0)?)?;
    let value = vm.native_arg(argc, 1)?;
    let seq = sequence_mut(vm, id)?;
    if !seq.push(value) {
        return Err(ExecStatus::ArgError);
    }
    let len = i32::try_from(seq.len()).map_err(|_| ExecStatus::MemError)?;
    vm.native_return(Value::Int(len), argc)
}

fn native_list_pop(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let id = heap_ref(vm.native_arg(argc, 0)?)?;
    let value = sequence_mut(vm, id)?.pop().ok_or(ExecStatus::ArgError)?;
    vm.native_return(value, argc)
}

fn native_list_pop_front(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let id = heap_ref(vm.native_arg(argc, 0)?)?;
    let first = sequence_mut(vm, id)?
        .pop_front()
        .ok_or(ExecStatus::ArgError)?;
    vm.native_return(first, argc)
}

/// `list_concat(target, source)` appends the items of `source` to `target`.
fn native_list_concat(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let target = heap_ref(vm.native_arg(argc, 0)?)?;
    let source = heap_ref(vm.native_arg(argc, 1)?)?;
    let items = sequence(vm, source)?.items().to_vec();
    let seq = sequence_mut(vm, target)?;
    for item in items {
        if !seq.push(item) {
            return Err(ExecStatus::ArgError);
        }
    }
    vm.native_return(Value::Heap(target), argc)
}

fn native_list_get(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let id = heap_ref(vm.native_arg(argc, 0)?)?;
    let index = match vm.native_arg(argc, 1)? {
        Value::Int(n) => usize::try_from(n).map_err(|_| ExecStatus::MemError)?,
        _ => return Err(ExecStatus::ArgError),
    };
    let value = sequence(vm, id)?.get(index).ok_or(ExecStatus::MemError)?;
    vm.native_return(value, argc)
}

fn native_list_free(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
    let id = heap_ref(vm.native_arg(argc, 0)?)?;
    let destroyed = vm.heap_mut().destroy(id);
    vm.native_return(Value::Bool(destroyed), argc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::{Instruction, Opcode, Operand};
    use crate::bytecode::program::Program;
    use crate::runtime::vm::EngineConfig;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn mov(slot: i16, src: Operand) -> Instruction {
        Instruction::binary(Opcode::Mov, Operand::reg(slot), src)
    }

    fn native(name: &str, argc: i16) -> Instruction {
        let id = NativeRegistry::standard()
            .id_of(name)
            .expect("standard native") as i16;
        Instruction::binary(Opcode::NativeCall, Operand::imm(id), Operand::imm(argc))
    }

    /// Runs `body` after `r0 = make_list(0)` and returns the engine
    fn run_with_list(body: Vec<Instruction>) -> Engine {
        let mut chunk = vec![mov(0, Operand::imm(0)), native("make_list", 1)];
        chunk.extend(body);
        let program = Program {
            chunks: vec![chunk],
            constants: vec![],
            entry_id: Some(0),
        };
        let mut vm = Engine::new(EngineConfig::default(), program);
        vm.execute();
        vm
    }

    fn ret(slot: i16) -> Instruction {
        Instruction::unary(Opcode::Ret, Operand::reg(slot))
    }

    // ============================================================
    // Tables
    // ============================================================

    #[test]
    fn test_registry_matches_table_ids() {
        let table = NativeTable::standard();
        let registry = table.registry();

        assert_eq!(registry.len(), table.len());
        for name in ["print", "len_of", "list_push", "list_free"] {
            let id = registry.id_of(name).expect("registered") as usize;
            assert_eq!(table.name_of(id), Some(name));
        }
    }

    #[test]
    fn test_unknown_names_are_absent() {
        let registry = NativeRegistry::standard();
        assert!(!registry.contains("main"));
        assert_eq!(registry.id_of("launch"), None);
    }

    #[test]
    fn test_custom_registration() {
        fn answer(vm: &mut Engine, argc: u16) -> Result<(), ExecStatus> {
            vm.native_return(Value::Int(42), argc)
        }

        let mut table = NativeTable::new();
        assert_eq!(table.register("answer", answer), 0);
        assert!(table.get(0).is_some());
        assert!(table.get(1).is_none());
    }

    // ============================================================
    // Sequences
    // ============================================================

    #[test]
    fn test_push_then_pop() {
        let vm = run_with_list(vec![
            mov(1, Operand::reg(0)),
            mov(2, Operand::imm(8)),
            native("list_push", 2),
            mov(3, Operand::reg(0)),
            native("list_pop", 1),
            ret(3),
        ]);
        assert_eq!(vm.status(), ExecStatus::Ok);
        assert_eq!(vm.register(0), Some(Value::Int(8)));
    }

    #[test]
    fn test_pop_from_empty_list() {
        let vm = run_with_list(vec![
            mov(1, Operand::reg(0)),
            native("list_pop", 1),
            ret(1),
        ]);
        assert_eq!(vm.status(), ExecStatus::ArgError);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let vm = run_with_list(vec![
            mov(1, Operand::reg(0)),
            mov(2, Operand::imm(0)),
            native("list_get", 2),
            ret(1),
        ]);
        assert_eq!(vm.status(), ExecStatus::MemError);
    }

    #[test]
    fn test_tuple_is_frozen() {
        let vm = run_with_list(vec![
            mov(1, Operand::imm(1)),
            mov(2, Operand::imm(2)),
            native("make_tuple", 2),
            mov(3, Operand::reg(1)),
            mov(4, Operand::imm(3)),
            native("list_push", 2),
            ret(3),
        ]);
        assert_eq!(vm.status(), ExecStatus::ArgError);
    }

    #[test]
    fn test_pop_front_and_concat() {
        // r1 = make_list(0); list_push(r1, 5); list_concat(r0, r1);
        // list_pop_front(r0)
        let vm = run_with_list(vec![
            mov(1, Operand::imm(0)),
            native("make_list", 1),
            mov(2, Operand::reg(1)),
            mov(3, Operand::imm(5)),
            native("list_push", 2),
            mov(4, Operand::reg(0)),
            mov(5, Operand::reg(1)),
            native("list_concat", 2),
            mov(6, Operand::reg(0)),
            native("list_pop_front", 1),
            ret(6),
        ]);
        assert_eq!(vm.status(), ExecStatus::Ok);
        assert_eq!(vm.register(0), Some(Value::Int(5)));
        assert_eq!(vm.heap().live_count(), 2);
    }

    #[test]
    fn test_pop_front_keeps_list_references() {
        let program = Program {
            chunks: vec![vec![
                mov(0, Operand::imm(0)),
                native("make_list", 1),
                mov(1, Operand::reg(0)),
                mov(2, Operand::imm(5)),
                native("list_push", 2),
                mov(3, Operand::reg(0)),
                native("list_pop_front", 1),
                ret(3),
            ]],
            constants: vec![],
            entry_id: Some(0),
        };
        let mut vm = Engine::new(EngineConfig::default(), program);
        assert_eq!(vm.begin(), ExecStatus::Ok);
        for _ in 0..5 {
            assert!(vm.step());
        }
        assert!(vm.heap_mut().retain(0));
        assert!(vm.heap_mut().retain(0));

        assert!(vm.step());
        assert!(vm.step());
        assert_eq!(vm.status(), ExecStatus::Ok);
        assert_eq!(vm.register(3), Some(Value::Int(5)));

        let list = vm.heap().get(0).expect("list still stored");
        assert_eq!(list.ref_count(), 2);
        assert_eq!(list.size(), 0);
    }

    #[test]
    fn test_pop_front_from_tuple() {
        let vm = run_with_list(vec![
            mov(1, Operand::imm(1)),
            native("make_tuple", 1),
            mov(2, Operand::reg(1)),
            native("list_pop_front", 1),
            ret(2),
        ]);
        assert_eq!(vm.status(), ExecStatus::ArgError);
    }

    #[test]
    fn test_free_releases_the_slot() {
        let vm = run_with_list(vec![
            mov(1, Operand::reg(0)),
            native("list_free", 1),
            mov(2, Operand::reg(0)),
            native("list_free", 1),
            mov(3, Operand::reg(1)),
            ret(3),
        ]);
        assert_eq!(vm.status(), ExecStatus::Ok);
        assert_eq!(vm.register(0), Some(Value::Bool(true)));
        assert_eq!(vm.register(2), Some(Value::Bool(false)));
        assert_eq!(vm.heap().live_count(), 0);
    }

    #[test]
    fn test_len_of_non_sequence() {
        let vm = run_with_list(vec![
            mov(1, Operand::imm(4)),
            native("len_of", 1),
            ret(1),
        ]);
        assert_eq!(vm.status(), ExecStatus::ArgError);
    }
}
