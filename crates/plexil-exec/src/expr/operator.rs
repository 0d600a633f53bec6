//! [`Operator`]: the closed set of n-ary functions an `Operator` expression
//! node may compute. Every operator honors three-valued logic — an Unknown
//! operand makes the result Unknown unless the operator's algebra
//! short-circuits around it (`And(false, Unknown) = false`, mirroring the
//! original's boolean short-circuit semantics).

use plexil_value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    Not,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    /// True/false, never Unknown — the one operator that can observe an
    /// Unknown operand and still answer definitively.
    IsKnown,
}

impl Operator {
    pub fn eval(&self, args: &[Value], result_type: ValueType) -> Value {
        use Operator::*;
        match self {
            And => and(args),
            Or => or(args),
            Not => not(&args[0]),
            Eq => bool_or_unknown(args, |a, b| a == b),
            Neq => bool_or_unknown(args, |a, b| a != b),
            Lt => ordering(args, |o| o == std::cmp::Ordering::Less),
            Lte => ordering(args, |o| o != std::cmp::Ordering::Greater),
            Gt => ordering(args, |o| o == std::cmp::Ordering::Greater),
            Gte => ordering(args, |o| o != std::cmp::Ordering::Less),
            Add => arithmetic(args, result_type, |a, b| a + b, |a, b| a.checked_add(b)),
            Sub => arithmetic(args, result_type, |a, b| a - b, |a, b| a.checked_sub(b)),
            Mul => arithmetic(args, result_type, |a, b| a * b, |a, b| a.checked_mul(b)),
            Div => divide(args, result_type),
            IsKnown => Value::Boolean(args[0].is_known()),
        }
    }
}

/// Three-valued AND: a known `false` dominates regardless of the other
/// operand's knowledge; otherwise any Unknown operand makes the whole
/// expression Unknown.
fn and(args: &[Value]) -> Value {
    let mut saw_unknown = false;
    for a in args {
        match a {
            Value::Boolean(false) => return Value::Boolean(false),
            Value::Boolean(true) => {}
            _ => saw_unknown = true,
        }
    }
    if saw_unknown {
        Value::unknown(ValueType::Boolean)
    } else {
        Value::Boolean(true)
    }
}

/// Mirror of [`and`]: a known `true` dominates.
fn or(args: &[Value]) -> Value {
    let mut saw_unknown = false;
    for a in args {
        match a {
            Value::Boolean(true) => return Value::Boolean(true),
            Value::Boolean(false) => {}
            _ => saw_unknown = true,
        }
    }
    if saw_unknown {
        Value::unknown(ValueType::Boolean)
    } else {
        Value::Boolean(false)
    }
}

fn not(a: &Value) -> Value {
    match a.as_bool() {
        Some(b) => Value::Boolean(!b),
        None => Value::unknown(ValueType::Boolean),
    }
}

fn bool_or_unknown(args: &[Value], f: impl Fn(&Value, &Value) -> bool) -> Value {
    if !args[0].is_known() || !args[1].is_known() {
        return Value::unknown(ValueType::Boolean);
    }
    Value::Boolean(f(&args[0], &args[1]))
}

/// A runtime comparison between incomparable types is a kernel assertion
/// per §4.B ("a runtime get of the wrong type asserts") — plan
/// construction is expected to have rejected it already.
fn ordering(args: &[Value], f: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    if !args[0].is_known() || !args[1].is_known() {
        return Value::unknown(ValueType::Boolean);
    }
    let ord = args[0]
        .try_cmp(&args[1])
        .expect("comparison operator applied to incomparable or unordered values");
    Value::Boolean(f(ord))
}

fn arithmetic(
    args: &[Value],
    result_type: ValueType,
    real_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
) -> Value {
    if !args[0].is_known() || !args[1].is_known() {
        return Value::unknown(result_type);
    }
    if result_type == ValueType::Integer {
        if let (Value::Integer(a), Value::Integer(b)) = (&args[0], &args[1]) {
            return match int_op(*a, *b) {
                Some(r) => Value::Integer(r),
                None => Value::unknown(ValueType::Integer),
            };
        }
    }
    let (a, b) = (args[0].as_f64(), args[1].as_f64());
    match (a, b) {
        (Some(a), Some(b)) => Value::Real(real_op(a, b)),
        _ => Value::unknown(ValueType::Real),
    }
}

/// Integer division by zero is Unknown rather than a panic — a plan bug
/// should fail the node, not the process. Real division follows IEEE 754
/// (division by zero yields infinity, not Unknown).
fn divide(args: &[Value], result_type: ValueType) -> Value {
    if !args[0].is_known() || !args[1].is_known() {
        return Value::unknown(result_type);
    }
    if result_type == ValueType::Integer {
        if let (Value::Integer(a), Value::Integer(b)) = (&args[0], &args[1]) {
            return if *b == 0 { Value::unknown(ValueType::Integer) } else { Value::Integer(a / b) };
        }
    }
    match (args[0].as_f64(), args[1].as_f64()) {
        (Some(a), Some(b)) => Value::Real(a / b),
        _ => Value::unknown(ValueType::Real),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_short_circuits_on_known_false() {
        let unknown = Value::unknown(ValueType::Boolean);
        let result = Operator::And.eval(&[Value::Boolean(false), unknown], ValueType::Boolean);
        assert_eq!(result, Value::Boolean(false));
    }

    #[test]
    fn and_is_unknown_when_no_short_circuit_and_an_operand_is_unknown() {
        let unknown = Value::unknown(ValueType::Boolean);
        let result = Operator::And.eval(&[Value::Boolean(true), unknown], ValueType::Boolean);
        assert!(!result.is_known());
    }

    #[test]
    fn or_short_circuits_on_known_true() {
        let unknown = Value::unknown(ValueType::Boolean);
        let result = Operator::Or.eval(&[Value::Boolean(true), unknown], ValueType::Boolean);
        assert_eq!(result, Value::Boolean(true));
    }

    #[test]
    fn comparison_with_unknown_operand_is_unknown() {
        let result = Operator::Gt.eval(&[Value::unknown(ValueType::Real), Value::Real(1.0)], ValueType::Boolean);
        assert!(!result.is_known());
    }

    #[test]
    fn integer_division_by_zero_is_unknown_not_a_panic() {
        let result = Operator::Div.eval(&[Value::Integer(1), Value::Integer(0)], ValueType::Integer);
        assert!(!result.is_known());
    }

    #[test]
    fn mixed_integer_real_arithmetic_widens_to_real() {
        let result = Operator::Add.eval(&[Value::Integer(1), Value::Real(2.5)], ValueType::Real);
        assert_eq!(result, Value::Real(3.5));
    }

    #[test]
    fn is_known_never_returns_unknown_itself() {
        assert_eq!(Operator::IsKnown.eval(&[Value::unknown(ValueType::Integer)], ValueType::Boolean), Value::Boolean(false));
        assert_eq!(Operator::IsKnown.eval(&[Value::Integer(3)], ValueType::Boolean), Value::Boolean(true));
    }
}
