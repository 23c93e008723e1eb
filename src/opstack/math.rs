//! Constant folding and numeric fact tracking for arithmetic instructions.
//!
//! Folding follows JVM semantics: integer arithmetic wraps, shift distances are masked,
//! and float remainders truncate. A fold that cannot be performed (division by zero,
//! mismatched constant types) yields an unknown value of the result type.

use std::ops::{Add, Div, Mul, Rem, Sub};

use crate::ir::{ArithmeticOp, Comparison, Conversion, NumericType};
use crate::item::{Constant, Item, SpecialKind};

pub(super) fn binary(numeric: NumericType, op: ArithmeticOp, left: &Item, right: &Item) -> Item {
    match numeric {
        NumericType::Int | NumericType::Long => integral(numeric, op, left, right),
        NumericType::Float | NumericType::Double => {
            let folded = match (left.constant(), right.constant()) {
                (Some(Constant::Float(a)), Some(Constant::Float(b))) => {
                    fold_floating(op, *a, *b).map(Item::float)
                }
                (Some(Constant::Double(a)), Some(Constant::Double(b))) => {
                    fold_floating(op, *a, *b).map(Item::double)
                }
                _ => None,
            };
            folded
                .unwrap_or_else(|| Item::new(numeric.signature()))
                .with_special_kind(SpecialKind::FloatMath)
        }
    }
}

fn integral(numeric: NumericType, op: ArithmeticOp, left: &Item, right: &Item) -> Item {
    if left.constant().is_some() && right.constant().is_some() {
        let folded = match numeric {
            NumericType::Int => fold_int(op, left, right).map(Item::int),
            _ => fold_long(op, left, right).map(Item::long),
        };
        return folded.unwrap_or_else(|| Item::new(numeric.signature()));
    }
    Item::new(numeric.signature()).with_special_kind(integral_kind(op, left, right))
}

fn integral_kind(op: ArithmeticOp, left: &Item, right: &Item) -> SpecialKind {
    let low_byte_clear = |item: &Item| integral_value(item).is_some_and(|value| value & 0xff == 0);
    match op {
        ArithmeticOp::And if low_byte_clear(left) || low_byte_clear(right) => {
            SpecialKind::Low8BitsClear
        }
        ArithmeticOp::Shl if right.int_constant().is_some_and(|amount| amount >= 8) => {
            SpecialKind::Low8BitsClear
        }
        ArithmeticOp::Add
            if left.constant().is_none()
                && right.constant().is_none()
                && left.special_kind() == SpecialKind::NotSpecial
                && right.special_kind() == SpecialKind::NotSpecial =>
        {
            SpecialKind::IntegerSum
        }
        ArithmeticOp::Rem => match left.special_kind() {
            SpecialKind::HashcodeInt => SpecialKind::HashcodeIntRemainder,
            SpecialKind::RandomInt => SpecialKind::RandomIntRemainder,
            _ => SpecialKind::NotSpecial,
        },
        ArithmeticOp::Div
            if left.special_kind() == SpecialKind::IntegerSum
                && integral_value(right) == Some(2) =>
        {
            SpecialKind::AverageComputedUsingDivision
        }
        ArithmeticOp::Shr
            if left.special_kind() == SpecialKind::IntegerSum
                && right.int_constant() == Some(1) =>
        {
            SpecialKind::AverageComputedUsingDivision
        }
        _ => SpecialKind::NotSpecial,
    }
}

fn integral_value(item: &Item) -> Option<i64> {
    match item.constant()? {
        Constant::Int(value) => Some(*value as i64),
        Constant::Long(value) => Some(*value),
        _ => None,
    }
}

fn fold_int(op: ArithmeticOp, left: &Item, right: &Item) -> Option<i32> {
    let a = left.int_constant()?;
    let b = right.int_constant()?;
    Some(match op {
        ArithmeticOp::Add => a.wrapping_add(b),
        ArithmeticOp::Sub => a.wrapping_sub(b),
        ArithmeticOp::Mul => a.wrapping_mul(b),
        ArithmeticOp::Div if b == 0 => return None,
        ArithmeticOp::Div => a.wrapping_div(b),
        ArithmeticOp::Rem if b == 0 => return None,
        ArithmeticOp::Rem => a.wrapping_rem(b),
        ArithmeticOp::And => a & b,
        ArithmeticOp::Or => a | b,
        ArithmeticOp::Xor => a ^ b,
        ArithmeticOp::Shl => a.wrapping_shl(b as u32),
        ArithmeticOp::Shr => a.wrapping_shr(b as u32),
        ArithmeticOp::Ushr => (a as u32).wrapping_shr(b as u32) as i32,
    })
}

fn fold_long(op: ArithmeticOp, left: &Item, right: &Item) -> Option<i64> {
    let a = left.long_constant()?;
    if op.is_shift() {
        // Long shifts take an int distance.
        let distance = right.int_constant()? as u32;
        return Some(match op {
            ArithmeticOp::Shl => a.wrapping_shl(distance),
            ArithmeticOp::Shr => a.wrapping_shr(distance),
            _ => (a as u64).wrapping_shr(distance) as i64,
        });
    }
    let b = right.long_constant()?;
    Some(match op {
        ArithmeticOp::Add => a.wrapping_add(b),
        ArithmeticOp::Sub => a.wrapping_sub(b),
        ArithmeticOp::Mul => a.wrapping_mul(b),
        ArithmeticOp::Div if b == 0 => return None,
        ArithmeticOp::Div => a.wrapping_div(b),
        ArithmeticOp::Rem if b == 0 => return None,
        ArithmeticOp::Rem => a.wrapping_rem(b),
        ArithmeticOp::And => a & b,
        ArithmeticOp::Or => a | b,
        ArithmeticOp::Xor => a ^ b,
        ArithmeticOp::Shl | ArithmeticOp::Shr | ArithmeticOp::Ushr => return None,
    })
}

fn fold_floating<T>(op: ArithmeticOp, a: T, b: T) -> Option<T>
where
    T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Rem<Output = T>,
{
    match op {
        ArithmeticOp::Add => Some(a + b),
        ArithmeticOp::Sub => Some(a - b),
        ArithmeticOp::Mul => Some(a * b),
        ArithmeticOp::Div => Some(a / b),
        ArithmeticOp::Rem => Some(a % b),
        _ => None,
    }
}

pub(super) fn negate(numeric: NumericType, value: &Item) -> Item {
    let folded = match value.constant() {
        Some(Constant::Int(v)) if numeric == NumericType::Int => Some(Item::int(v.wrapping_neg())),
        Some(Constant::Long(v)) if numeric == NumericType::Long => {
            Some(Item::long(v.wrapping_neg()))
        }
        Some(Constant::Float(v)) if numeric == NumericType::Float => Some(Item::float(-v)),
        Some(Constant::Double(v)) if numeric == NumericType::Double => Some(Item::double(-v)),
        _ => None,
    };
    let item = folded.unwrap_or_else(|| Item::new(numeric.signature()));
    if value.special_kind() == SpecialKind::FloatMath {
        item.with_special_kind(SpecialKind::FloatMath)
    } else {
        item
    }
}

pub(super) fn convert(conversion: Conversion, value: &Item) -> Item {
    let signature = match conversion {
        Conversion::I2L | Conversion::F2L | Conversion::D2L => "J",
        Conversion::I2F | Conversion::L2F | Conversion::D2F => "F",
        Conversion::I2D | Conversion::L2D | Conversion::F2D => "D",
        Conversion::L2I
        | Conversion::F2I
        | Conversion::D2I
        | Conversion::I2B
        | Conversion::I2C
        | Conversion::I2S => "I",
    };
    let item = match value.constant().and_then(|c| fold_conversion(conversion, c)) {
        Some(constant) => Item::with_constant(signature, constant),
        None => Item::new(signature),
    };
    match conversion {
        Conversion::I2B => item.with_special_kind(SpecialKind::SignedByte),
        Conversion::I2L => item.with_special_kind(value.special_kind()),
        _ => item,
    }
}

fn fold_conversion(conversion: Conversion, constant: &Constant) -> Option<Constant> {
    Some(match (conversion, constant) {
        (Conversion::I2L, Constant::Int(v)) => Constant::Long(*v as i64),
        (Conversion::I2F, Constant::Int(v)) => Constant::Float(*v as f32),
        (Conversion::I2D, Constant::Int(v)) => Constant::Double(*v as f64),
        (Conversion::I2B, Constant::Int(v)) => Constant::Int(*v as i8 as i32),
        (Conversion::I2C, Constant::Int(v)) => Constant::Int(*v as u16 as i32),
        (Conversion::I2S, Constant::Int(v)) => Constant::Int(*v as i16 as i32),
        (Conversion::L2I, Constant::Long(v)) => Constant::Int(*v as i32),
        (Conversion::L2F, Constant::Long(v)) => Constant::Float(*v as f32),
        (Conversion::L2D, Constant::Long(v)) => Constant::Double(*v as f64),
        // `as` saturates and maps NaN to zero, matching the JVM.
        (Conversion::F2I, Constant::Float(v)) => Constant::Int(*v as i32),
        (Conversion::F2L, Constant::Float(v)) => Constant::Long(*v as i64),
        (Conversion::F2D, Constant::Float(v)) => Constant::Double(*v as f64),
        (Conversion::D2I, Constant::Double(v)) => Constant::Int(*v as i32),
        (Conversion::D2L, Constant::Double(v)) => Constant::Long(*v as i64),
        (Conversion::D2F, Constant::Double(v)) => Constant::Float(*v as f32),
        _ => return None,
    })
}

pub(super) fn compare(comparison: Comparison, left: &Item, right: &Item) -> Item {
    let result = match (comparison, left.constant(), right.constant()) {
        (Comparison::Lcmp, Some(Constant::Long(a)), Some(Constant::Long(b))) => {
            Some(a.cmp(b) as i32)
        }
        (
            Comparison::Fcmpl | Comparison::Fcmpg,
            Some(Constant::Float(a)),
            Some(Constant::Float(b)),
        ) => Some(floating_compare(
            *a as f64,
            *b as f64,
            comparison == Comparison::Fcmpg,
        )),
        (
            Comparison::Dcmpl | Comparison::Dcmpg,
            Some(Constant::Double(a)),
            Some(Constant::Double(b)),
        ) => Some(floating_compare(*a, *b, comparison == Comparison::Dcmpg)),
        _ => None,
    };
    result.map(Item::int).unwrap_or_else(|| Item::new("I"))
}

fn floating_compare(a: f64, b: f64, nan_is_greater: bool) -> i32 {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering as i32,
        None if nan_is_greater => 1,
        None => -1,
    }
}
