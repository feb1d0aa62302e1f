//! Property-based tests using proptest
//!
//! Invariants of the value model and the engine that should hold for all
//! operands:
//! 1. Integer division and remainder reassemble the dividend
//! 2. Float division is undone by multiplication within tolerance
//! 3. Mixed-tag arithmetic fails closed to `dud`, and the engine reports it

use minuet::bytecode::{Instruction, Opcode, Operand, Program};
use minuet::lang::value::Value;
use minuet::runtime::{Engine, EngineConfig, ExecStatus};
use proptest::prelude::*;

fn numeric_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
    ]
}

fn any_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Dud),
        any::<bool>().prop_map(Value::Bool),
        numeric_value(),
        (0u32..64).prop_map(Value::Heap),
    ]
}

fn binary_ops() -> [fn(Value, Value) -> Value; 11] {
    [
        Value::add,
        Value::sub,
        Value::mul,
        Value::div,
        Value::rem,
        Value::equ,
        Value::neq,
        Value::lt,
        Value::gt,
        Value::lte,
        Value::gte,
    ]
}

/// `push c0; push c1; <op>; mov r0, pop; ret r0`
fn binop_program(op: Opcode, lhs: Value, rhs: Value) -> Program {
    Program {
        chunks: vec![vec![
            Instruction::unary(Opcode::Push, Operand::constant(0)),
            Instruction::unary(Opcode::Push, Operand::constant(1)),
            Instruction::nonary(op),
            Instruction::binary(Opcode::Mov, Operand::reg(0), Operand::stack()),
            Instruction::unary(Opcode::Ret, Operand::reg(0)),
        ]],
        constants: vec![lhs, rhs],
        entry_id: Some(0),
    }
}

proptest! {
    #[test]
    fn int_division_round_trips(a in any::<i32>(), b in any::<i32>().prop_filter("nonzero", |b| *b != 0)) {
        let q = Value::Int(a).div(Value::Int(b));
        let r = Value::Int(a).rem(Value::Int(b));
        prop_assert_eq!(q.mul(Value::Int(b)).add(r), Value::Int(a));
    }

    #[test]
    fn float_division_round_trips(a in -1.0e9f64..1.0e9, b in -1.0e9f64..1.0e9) {
        prop_assume!(b.abs() > 1.0e-6);
        match Value::Float(a).div(Value::Float(b)).mul(Value::Float(b)) {
            Value::Float(back) => {
                let tolerance = 1.0e-9 * a.abs().max(1.0);
                prop_assert!((back - a).abs() <= tolerance, "{} vs {}", back, a);
            }
            other => prop_assert!(false, "expected a float, got {}", other),
        }
    }

    #[test]
    fn mixed_tags_fail_closed(lhs in any_value(), rhs in any_value()) {
        prop_assume!(lhs.type_name() != rhs.type_name());
        for op in binary_ops() {
            prop_assert_eq!(op(lhs, rhs), Value::Dud);
        }
    }

    #[test]
    fn engine_rejects_mixed_numeric_tags(a in any::<i32>(), b in -1.0e6f64..1.0e6) {
        for op in [Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::Lt, Opcode::Equ] {
            let mut vm = Engine::new(EngineConfig::default(), binop_program(op, Value::Int(a), Value::Float(b)));
            prop_assert_eq!(vm.execute(), ExecStatus::ArgError);
        }
    }

    #[test]
    fn engine_int_arithmetic_matches_value_model(a in any::<i32>(), b in any::<i32>()) {
        let cases = [
            (Opcode::Add, Value::Int(a).add(Value::Int(b))),
            (Opcode::Sub, Value::Int(a).sub(Value::Int(b))),
            (Opcode::Mul, Value::Int(a).mul(Value::Int(b))),
        ];
        for (op, expected) in cases {
            let mut vm = Engine::new(EngineConfig::default(), binop_program(op, Value::Int(a), Value::Int(b)));
            prop_assert_eq!(vm.execute(), ExecStatus::Ok);
            prop_assert_eq!(vm.register(0), Some(expected));
        }
    }
}
