//! Numeric simulator
//!
//! Typed binary arithmetic for instrumented expressions. Every operation is
//! counted against its precision class before it is computed, so a precise
//! division fault still shows up in the report. Approximate execution
//! tolerates division by zero instead of faulting: floating kinds yield NaN,
//! integral kinds yield zero.

use crate::runtime::Runtime;

/// Numeric width requested by the instrumented expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Int,
    Byte,
    Double,
    Float,
    Long,
    Short,
}

impl NumberKind {
    /// Stable label used in operation counter keys (`INT+`, `DOUBLE/`, ...).
    pub fn label(&self) -> &'static str {
        match self {
            NumberKind::Int => "INT",
            NumberKind::Byte => "BYTE",
            NumberKind::Double => "DOUBLE",
            NumberKind::Float => "FLOAT",
            NumberKind::Long => "LONG",
            NumberKind::Short => "SHORT",
        }
    }
}

/// Binary operator at an instrumented site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Bitxor,
}

impl ArithOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOperator::Plus => "+",
            ArithOperator::Minus => "-",
            ArithOperator::Multiply => "*",
            ArithOperator::Divide => "/",
            ArithOperator::Bitxor => "^",
        }
    }
}

/// A number at one of the simulated widths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Double(f64),
    Float(f32),
    Long(i64),
    Int(i32),
    Short(i16),
    Byte(i8),
}

impl Default for Number {
    fn default() -> Self {
        Number::Int(0)
    }
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Double(v) => v,
            Number::Float(v) => v as f64,
            Number::Long(v) => v as f64,
            Number::Int(v) => v as f64,
            Number::Short(v) => v as f64,
            Number::Byte(v) => v as f64,
        }
    }

    pub fn as_f32(self) -> f32 {
        self.as_f64() as f32
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Number::Double(v) => v as i64,
            Number::Float(v) => v as i64,
            Number::Long(v) => v,
            Number::Int(v) => v as i64,
            Number::Short(v) => v as i64,
            Number::Byte(v) => v as i64,
        }
    }

    pub fn as_i32(self) -> i32 {
        self.as_i64() as i32
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Double(v) => v == 0.0,
            Number::Float(v) => v == 0.0,
            Number::Long(v) => v == 0,
            Number::Int(v) => v == 0,
            Number::Short(v) => v == 0,
            Number::Byte(v) => v == 0,
        }
    }

    /// Narrow or widen to the slot's declared kind (used when storing a
    /// compound-assignment result back into a typed location).
    pub fn coerce(self, kind: NumberKind) -> Number {
        match kind {
            NumberKind::Double => Number::Double(self.as_f64()),
            NumberKind::Float => Number::Float(self.as_f32()),
            NumberKind::Long => Number::Long(self.as_i64()),
            NumberKind::Int => Number::Int(self.as_i32()),
            NumberKind::Short => Number::Short(self.as_i64() as i16),
            NumberKind::Byte => Number::Byte(self.as_i64() as i8),
        }
    }
}

/// Compute `lhs op rhs` at the requested width.
///
/// The approximate-mode divide-by-zero special case is resolved here, before
/// any arithmetic runs. Precise-mode integral division by zero is left to
/// fault normally. Bitwise xor is always computed (and returned) at integer
/// width regardless of the requested kind.
pub fn apply(
    lhs: Number,
    rhs: Number,
    op: ArithOperator,
    kind: NumberKind,
    approx: bool,
) -> Number {
    if approx && op == ArithOperator::Divide && rhs.is_zero() {
        return match kind {
            NumberKind::Double => Number::Double(f64::NAN),
            NumberKind::Float => Number::Float(f32::NAN),
            NumberKind::Long => Number::Long(0),
            NumberKind::Int | NumberKind::Short | NumberKind::Byte => Number::Int(0),
        };
    }

    if op == ArithOperator::Bitxor {
        return Number::Int(lhs.as_i32() ^ rhs.as_i32());
    }

    match kind {
        NumberKind::Double => {
            let (a, b) = (lhs.as_f64(), rhs.as_f64());
            Number::Double(match op {
                ArithOperator::Plus => a + b,
                ArithOperator::Minus => a - b,
                ArithOperator::Multiply => a * b,
                ArithOperator::Divide => a / b,
                ArithOperator::Bitxor => unreachable!("xor handled above"),
            })
        }
        NumberKind::Float => {
            let (a, b) = (lhs.as_f32(), rhs.as_f32());
            Number::Float(match op {
                ArithOperator::Plus => a + b,
                ArithOperator::Minus => a - b,
                ArithOperator::Multiply => a * b,
                ArithOperator::Divide => a / b,
                ArithOperator::Bitxor => unreachable!("xor handled above"),
            })
        }
        NumberKind::Long => {
            let (a, b) = (lhs.as_i64(), rhs.as_i64());
            Number::Long(match op {
                ArithOperator::Plus => a.wrapping_add(b),
                ArithOperator::Minus => a.wrapping_sub(b),
                ArithOperator::Multiply => a.wrapping_mul(b),
                // wrapping_div still faults on zero, which is the precise-mode
                // contract; it only absorbs the MIN / -1 overflow.
                ArithOperator::Divide => a.wrapping_div(b),
                ArithOperator::Bitxor => unreachable!("xor handled above"),
            })
        }
        // Byte and short arithmetic runs at int width, like the narrow
        // integer kinds it models.
        NumberKind::Int | NumberKind::Short | NumberKind::Byte => {
            let (a, b) = (lhs.as_i32(), rhs.as_i32());
            Number::Int(match op {
                ArithOperator::Plus => a.wrapping_add(b),
                ArithOperator::Minus => a.wrapping_sub(b),
                ArithOperator::Multiply => a.wrapping_mul(b),
                ArithOperator::Divide => a.wrapping_div(b),
                ArithOperator::Bitxor => unreachable!("xor handled above"),
            })
        }
    }
}

impl Runtime {
    /// Count and compute a binary arithmetic operation.
    pub fn binary_op(
        &self,
        lhs: Number,
        rhs: Number,
        op: ArithOperator,
        kind: NumberKind,
        approx: bool,
    ) -> Number {
        self.counters()
            .count_operation(&format!("{}{}", kind.label(), op.symbol()), approx);
        apply(lhs, rhs, op, kind, approx)
    }

    /// Pass-through that counts an always-precise logical operation. Never
    /// toggles precision.
    pub fn count_logical_op<T>(&self, value: T) -> T {
        self.counters().count_operation("INTlogic", false);
        value
    }
}
