//! Checked arithmetic
//!
//! Integer operations never wrap and float operations never produce or
//! consume NaN or infinities: both surface a [`ValueError`] instead.

use super::Value;
use crate::error::ValueError;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::time::Duration;
use tern_bytecode::BinaryOperator;

// =============================================================================
// Integers
// =============================================================================

/// `a + b`
pub fn int_add(a: i64, b: i64) -> Result<i64, ValueError> {
    a.checked_add(b).ok_or(if b > 0 {
        ValueError::IntOverflow
    } else {
        ValueError::IntUnderflow
    })
}

/// `a - b`
pub fn int_sub(a: i64, b: i64) -> Result<i64, ValueError> {
    a.checked_sub(b).ok_or(if b < 0 {
        ValueError::IntOverflow
    } else {
        ValueError::IntUnderflow
    })
}

/// `a * b`
pub fn int_mul(a: i64, b: i64) -> Result<i64, ValueError> {
    a.checked_mul(b).ok_or(if (a > 0) == (b > 0) {
        ValueError::IntOverflow
    } else {
        ValueError::IntUnderflow
    })
}

/// `a / b`
pub fn int_div(a: i64, b: i64) -> Result<i64, ValueError> {
    if b == 0 {
        return Err(ValueError::IntDivisionByZero);
    }
    // i64::MIN / -1
    a.checked_div(b).ok_or(ValueError::IntOverflow)
}

/// Apply an operator to two integers
pub fn int_bin(op: BinaryOperator, a: i64, b: i64) -> Result<Value, ValueError> {
    Ok(match op {
        BinaryOperator::Add => Value::Int(int_add(a, b)?),
        BinaryOperator::Sub => Value::Int(int_sub(a, b)?),
        BinaryOperator::Mul => Value::Int(int_mul(a, b)?),
        BinaryOperator::Div => Value::Int(int_div(a, b)?),
        BinaryOperator::Less => Value::Bool(a < b),
        BinaryOperator::LessOrEqual => Value::Bool(a <= b),
        BinaryOperator::Greater => Value::Bool(a > b),
        BinaryOperator::GreaterOrEqual => Value::Bool(a >= b),
    })
}

// =============================================================================
// Floats
// =============================================================================

fn finite_result(result: f64) -> Result<f64, ValueError> {
    if result.is_finite() {
        Ok(result)
    } else {
        Err(ValueError::NanOrInfinityResult)
    }
}

/// Apply an operator to two floats
pub fn float_bin(op: BinaryOperator, a: f64, b: f64) -> Result<Value, ValueError> {
    if !a.is_finite() || !b.is_finite() {
        return Err(ValueError::NanOrInfinityOperand);
    }
    Ok(match op {
        BinaryOperator::Add => Value::Float(finite_result(a + b)?),
        BinaryOperator::Sub => Value::Float(finite_result(a - b)?),
        BinaryOperator::Mul => Value::Float(finite_result(a * b)?),
        BinaryOperator::Div => Value::Float(finite_result(a / b)?),
        BinaryOperator::Less => Value::Bool(a < b),
        BinaryOperator::LessOrEqual => Value::Bool(a <= b),
        BinaryOperator::Greater => Value::Bool(a > b),
        BinaryOperator::GreaterOrEqual => Value::Bool(a >= b),
    })
}

/// Integer operation when the left operand is an integer, float operation otherwise
pub fn num_bin(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, ValueError> {
    match left {
        Value::Int(a) => int_bin(op, *a, right.as_int()?),
        Value::Float(a) => float_bin(op, *a, right.as_float()?),
        other => Err(ValueError::mismatch("int or float", other)),
    }
}

/// Unary minus
pub fn negate(value: &Value) -> Result<Value, ValueError> {
    match value {
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(ValueError::NegationWithOverflow),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(ValueError::NanOrInfinityOperand);
            }
            Ok(Value::Float(-f))
        }
        other => Err(ValueError::mismatch("int or float", other)),
    }
}

// =============================================================================
// Durations & datetimes
// =============================================================================

fn shift(date: &DateTime<Utc>, duration: &Duration, forward: bool) -> Result<Value, ValueError> {
    let delta = chrono::Duration::from_std(*duration)
        .map_err(|_| ValueError::InvalidOperation("duration too large".to_string()))?;
    let shifted = if forward {
        date.checked_add_signed(delta)
    } else {
        date.checked_sub_signed(delta)
    };
    shifted
        .map(Value::DateTime)
        .ok_or_else(|| ValueError::InvalidOperation("datetime out of range".to_string()))
}

/// `+` on durations and datetimes
pub fn pseudo_add(left: &Value, right: &Value) -> Result<Value, ValueError> {
    match (left, right) {
        (Value::Duration(a), Value::Duration(b)) => a
            .checked_add(*b)
            .map(Value::Duration)
            .ok_or(ValueError::IntOverflow),
        (Value::DateTime(date), Value::Duration(d)) | (Value::Duration(d), Value::DateTime(date)) => {
            shift(date, d, true)
        }
        _ => Err(ValueError::InvalidOperation(format!(
            "cannot add {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// `-` on durations and datetimes. Subtracting two datetimes is not
/// supported since the result could be negative.
pub fn pseudo_sub(left: &Value, right: &Value) -> Result<Value, ValueError> {
    match (left, right) {
        (Value::Duration(a), Value::Duration(b)) => a
            .checked_sub(*b)
            .map(Value::Duration)
            .ok_or_else(|| ValueError::InvalidOperation("negative duration".to_string())),
        (Value::DateTime(date), Value::Duration(d)) => shift(date, d, false),
        _ => Err(ValueError::InvalidOperation(format!(
            "cannot subtract {} from {}",
            right.type_name(),
            left.type_name()
        ))),
    }
}

/// Apply an operator to durations and datetimes
pub fn pseudo_arith(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, ValueError> {
    match op {
        BinaryOperator::Add => pseudo_add(left, right),
        BinaryOperator::Sub => pseudo_sub(left, right),
        BinaryOperator::Less => Ok(Value::Bool(left.compare(right)? == Ordering::Less)),
        BinaryOperator::LessOrEqual => Ok(Value::Bool(left.compare(right)? != Ordering::Greater)),
        BinaryOperator::Greater => Ok(Value::Bool(left.compare(right)? == Ordering::Greater)),
        BinaryOperator::GreaterOrEqual => Ok(Value::Bool(left.compare(right)? != Ordering::Less)),
        BinaryOperator::Mul | BinaryOperator::Div => Err(ValueError::InvalidOperation(format!(
            "operator {} is not defined on {}",
            op.symbol(),
            left.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_int_add_limits() {
        assert_eq!(int_add(1, 2), Ok(3));
        assert_eq!(int_add(i64::MAX, 1), Err(ValueError::IntOverflow));
        assert_eq!(int_add(i64::MIN, -1), Err(ValueError::IntUnderflow));
    }

    #[test]
    fn test_int_sub_limits() {
        assert_eq!(int_sub(i64::MIN, 1), Err(ValueError::IntUnderflow));
        assert_eq!(int_sub(i64::MAX, -1), Err(ValueError::IntOverflow));
        assert_eq!(int_sub(0, i64::MAX), Ok(-i64::MAX));
    }

    #[test]
    fn test_int_mul_limits() {
        assert_eq!(int_mul(i64::MAX, 2), Err(ValueError::IntOverflow));
        assert_eq!(int_mul(i64::MIN, 2), Err(ValueError::IntUnderflow));
        assert_eq!(int_mul(-3, 4), Ok(-12));
    }

    #[test]
    fn test_int_div() {
        assert_eq!(int_div(7, 2), Ok(3));
        assert_eq!(int_div(1, 0), Err(ValueError::IntDivisionByZero));
        assert_eq!(int_div(i64::MIN, -1), Err(ValueError::IntOverflow));
    }

    #[test]
    fn test_float_operands_checked_before_result() {
        assert_eq!(
            float_bin(BinaryOperator::Add, f64::NAN, 1.0),
            Err(ValueError::NanOrInfinityOperand)
        );
        assert_eq!(
            float_bin(BinaryOperator::Less, 1.0, f64::INFINITY),
            Err(ValueError::NanOrInfinityOperand)
        );
        assert_eq!(
            float_bin(BinaryOperator::Div, 1.0, 0.0),
            Err(ValueError::NanOrInfinityResult)
        );
        assert_eq!(
            float_bin(BinaryOperator::Mul, f64::MAX, 2.0),
            Err(ValueError::NanOrInfinityResult)
        );
        assert_eq!(float_bin(BinaryOperator::Sub, 1.5, 0.5), Ok(Value::Float(1.0)));
    }

    #[test]
    fn test_num_bin_dispatch() {
        assert_eq!(
            num_bin(BinaryOperator::Add, &Value::Int(1), &Value::Int(2)),
            Ok(Value::Int(3))
        );
        assert_eq!(
            num_bin(BinaryOperator::Greater, &Value::Float(1.0), &Value::Float(2.0)),
            Ok(Value::Bool(false))
        );
        assert!(num_bin(BinaryOperator::Add, &Value::Int(1), &Value::Float(2.0)).is_err());
    }

    #[test]
    fn test_negation() {
        assert_eq!(negate(&Value::Int(i64::MIN)), Err(ValueError::NegationWithOverflow));
        assert_eq!(negate(&Value::Int(3)), Ok(Value::Int(-3)));
        assert_eq!(negate(&Value::Float(1.5)), Ok(Value::Float(-1.5)));
    }

    #[test]
    fn test_durations_and_datetimes() {
        let second = Value::Duration(Duration::from_secs(1));
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(
            pseudo_add(&second, &second),
            Ok(Value::Duration(Duration::from_secs(2)))
        );
        assert_eq!(
            pseudo_sub(&Value::DateTime(date), &second),
            Ok(Value::DateTime(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()))
        );
        assert!(pseudo_sub(&Value::Duration(Duration::ZERO), &second).is_err());
        assert!(pseudo_sub(&Value::DateTime(date), &Value::DateTime(date)).is_err());
    }
}
