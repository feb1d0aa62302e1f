use serde::{Deserialize, Serialize};

/// Slot id of an object in the heap store.
pub type HeapRef = u32;

/// Runtime value in the Minuet language.
///
/// Every operator is total: a mismatched tag or a zero divisor produces
/// [`Value::Dud`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// The failed / absent value.
    #[default]
    Dud,

    Bool(bool),

    /// 32-bit signed integer with wrapping arithmetic.
    Int(i32),

    Float(f64),

    /// Reference to a heap store slot.
    Heap(HeapRef),
}

impl Value {
    pub fn is_dud(&self) -> bool {
        matches!(self, Value::Dud)
    }

    /// True for numeric zero of either tag.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Int(n) => *n == 0,
            Value::Float(x) => *x == 0.0,
            _ => false,
        }
    }

    /// Truthiness used by conditional jumps. `None` when the value has none.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            Value::Float(x) => Some(*x != 0.0),
            Value::Dud | Value::Heap(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Dud => "dud",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Heap(_) => "heap",
        }
    }

    pub fn neg(self) -> Value {
        match self {
            Value::Bool(b) => Value::Bool(!b),
            Value::Int(n) => Value::Int(n.wrapping_neg()),
            Value::Float(x) => Value::Float(-x),
            _ => Value::Dud,
        }
    }

    pub fn add(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
            _ => Value::Dud,
        }
    }

    pub fn sub(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a - b),
            _ => Value::Dud,
        }
    }

    pub fn mul(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(b)),
            (Value::Float(a), Value::Float(b)) => Value::Float(a * b),
            _ => Value::Dud,
        }
    }

    pub fn div(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Int(_), Value::Int(0)) => Value::Dud,
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_div(b)),
            (Value::Float(_), Value::Float(b)) if b == 0.0 => Value::Dud,
            (Value::Float(a), Value::Float(b)) => Value::Float(a / b),
            _ => Value::Dud,
        }
    }

    /// Integer remainder. Floats have no modulo.
    pub fn rem(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Int(_), Value::Int(0)) => Value::Dud,
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_rem(b)),
            _ => Value::Dud,
        }
    }

    pub fn equ(self, rhs: Value) -> Value {
        match (self, rhs) {
            (Value::Bool(a), Value::Bool(b)) => Value::Bool(a == b),
            (Value::Int(a), Value::Int(b)) => Value::Bool(a == b),
            (Value::Float(a), Value::Float(b)) => Value::Bool(a == b),
            (Value::Heap(a), Value::Heap(b)) => Value::Bool(a == b),
            _ => Value::Dud,
        }
    }

    pub fn neq(self, rhs: Value) -> Value {
        self.equ(rhs).neg()
    }

    pub fn lt(self, rhs: Value) -> Value {
        self.ordered(rhs, |a, b| a < b, |a, b| a < b)
    }

    pub fn gt(self, rhs: Value) -> Value {
        self.ordered(rhs, |a, b| a > b, |a, b| a > b)
    }

    pub fn lte(self, rhs: Value) -> Value {
        self.ordered(rhs, |a, b| a <= b, |a, b| a <= b)
    }

    pub fn gte(self, rhs: Value) -> Value {
        self.ordered(rhs, |a, b| a >= b, |a, b| a >= b)
    }

    fn ordered(
        self,
        rhs: Value,
        int_cmp: fn(i32, i32) -> bool,
        float_cmp: fn(f64, f64) -> bool,
    ) -> Value {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Value::Bool(int_cmp(a, b)),
            (Value::Float(a), Value::Float(b)) => Value::Bool(float_cmp(a, b)),
            _ => Value::Dud,
        }
    }
}

impl std::fmt::Display for Value {
    /// Format a value using Minuet surface syntax.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Dud => write!(f, "dud"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Heap(id) => write!(f, "<seq #{}>", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i32) -> Value {
        Value::Int(n)
    }

    fn float(x: f64) -> Value {
        Value::Float(x)
    }

    // ============================================================
    // Arithmetic
    // ============================================================

    #[test]
    fn test_int_arithmetic() {
        assert_eq!(int(2).add(int(3)), int(5));
        assert_eq!(int(2).sub(int(3)), int(-1));
        assert_eq!(int(4).mul(int(3)), int(12));
        assert_eq!(int(7).div(int(2)), int(3));
        assert_eq!(int(-7).rem(int(2)), int(-1));
    }

    #[test]
    fn test_int_arithmetic_wraps() {
        assert_eq!(int(i32::MAX).add(int(1)), int(i32::MIN));
        assert_eq!(int(i32::MIN).div(int(-1)), int(i32::MIN));
        assert_eq!(int(i32::MIN).neg(), int(i32::MIN));
    }

    #[test]
    fn test_float_arithmetic() {
        assert_eq!(float(1.5).add(float(2.0)), float(3.5));
        assert_eq!(float(3.0).div(float(2.0)), float(1.5));
    }

    #[test]
    fn test_division_by_zero_is_dud() {
        assert!(int(5).div(int(0)).is_dud());
        assert!(int(5).rem(int(0)).is_dud());
        assert!(float(5.0).div(float(0.0)).is_dud());
    }

    #[test]
    fn test_float_modulo_is_dud() {
        assert!(float(5.0).rem(float(2.0)).is_dud());
    }

    // ============================================================
    // Fail-closed typing
    // ============================================================

    #[test]
    fn test_mismatched_tags_are_dud() {
        let ops: [fn(Value, Value) -> Value; 11] = [
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
        ];

        for op in ops {
            assert!(op(int(1), float(1.0)).is_dud());
            assert!(op(Value::Bool(true), int(1)).is_dud());
            assert!(op(Value::Dud, Value::Dud).is_dud());
            assert!(op(Value::Heap(0), int(0)).is_dud());
        }
    }

    #[test]
    fn test_bool_ordering_is_dud() {
        assert!(Value::Bool(true).lt(Value::Bool(false)).is_dud());
        assert_eq!(Value::Bool(true).equ(Value::Bool(true)), Value::Bool(true));
    }

    // ============================================================
    // Comparison / negation / truthiness
    // ============================================================

    #[test]
    fn test_comparisons() {
        assert_eq!(int(1).lt(int(2)), Value::Bool(true));
        assert_eq!(int(2).lte(int(2)), Value::Bool(true));
        assert_eq!(int(1).gt(int(2)), Value::Bool(false));
        assert_eq!(float(2.5).gte(float(2.5)), Value::Bool(true));
        assert_eq!(int(1).neq(int(2)), Value::Bool(true));
    }

    #[test]
    fn test_neg() {
        assert_eq!(int(3).neg(), int(-3));
        assert_eq!(float(1.5).neg(), float(-1.5));
        assert_eq!(Value::Bool(true).neg(), Value::Bool(false));
        assert!(Value::Heap(1).neg().is_dud());
    }

    #[test]
    fn test_truthy() {
        assert_eq!(int(0).truthy(), Some(false));
        assert_eq!(int(-4).truthy(), Some(true));
        assert_eq!(Value::Bool(true).truthy(), Some(true));
        assert_eq!(Value::Dud.truthy(), None);
        assert_eq!(Value::Heap(0).truthy(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(int(14).to_string(), "14");
        assert_eq!(float(1.0).to_string(), "1.0");
        assert_eq!(Value::Dud.to_string(), "dud");
        assert_eq!(Value::Heap(3).to_string(), "<seq #3>");
    }
}
