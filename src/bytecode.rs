use anyhow::{Context, Result};

use crate::ir::{
    ArithmeticOp, ArrayType, CallKind, CallSite, Comparison, Condition, Conversion, FieldRef,
    Instruction, InstructionKind, LoadableConstant, NumericType, ValueType,
};
use crate::opcodes;

/// Owner, name and descriptor of a field or method reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Constant pool lookups the decoder needs to resolve operands.
pub(crate) trait ConstantResolver {
    fn class_name(&self, index: u16) -> Result<String>;
    fn member(&self, index: u16) -> Result<MemberRef>;
    /// Name and descriptor of an `invokedynamic` call site.
    fn dynamic_call(&self, index: u16) -> Result<(String, String)>;
    fn loadable(&self, index: u16) -> Result<LoadableConstant>;
}

const VALUE_TYPES: [ValueType; 5] = [
    ValueType::Int,
    ValueType::Long,
    ValueType::Float,
    ValueType::Double,
    ValueType::Reference,
];

const NUMERIC_TYPES: [NumericType; 4] = [
    NumericType::Int,
    NumericType::Long,
    NumericType::Float,
    NumericType::Double,
];

const ARRAY_TYPES: [ArrayType; 8] = [
    ArrayType::Int,
    ArrayType::Long,
    ArrayType::Float,
    ArrayType::Double,
    ArrayType::Reference,
    ArrayType::Byte,
    ArrayType::Char,
    ArrayType::Short,
];

const CONVERSIONS: [Conversion; 15] = [
    Conversion::I2L,
    Conversion::I2F,
    Conversion::I2D,
    Conversion::L2I,
    Conversion::L2F,
    Conversion::L2D,
    Conversion::F2I,
    Conversion::F2L,
    Conversion::F2D,
    Conversion::D2I,
    Conversion::D2L,
    Conversion::D2F,
    Conversion::I2B,
    Conversion::I2C,
    Conversion::I2S,
];

const COMPARISONS: [Comparison; 5] = [
    Comparison::Lcmp,
    Comparison::Fcmpl,
    Comparison::Fcmpg,
    Comparison::Dcmpl,
    Comparison::Dcmpg,
];

const CONDITIONS: [Condition; 6] = [
    Condition::Eq,
    Condition::Ne,
    Condition::Lt,
    Condition::Ge,
    Condition::Gt,
    Condition::Le,
];

/// Decode a method's `Code` bytes into instructions in program order.
pub(crate) fn decode_code(
    code: &[u8],
    resolver: &dyn ConstantResolver,
) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let (kind, length) = decode_instruction(code, offset, resolver)
            .with_context(|| format!("failed to decode instruction at offset {offset}"))?;
        let inst = Instruction {
            offset: offset as u32,
            opcode: code[offset],
            length: length as u32,
            kind,
        };
        offset = inst.next_offset() as usize;
        instructions.push(inst);
    }
    Ok(instructions)
}

fn decode_instruction(
    code: &[u8],
    offset: usize,
    resolver: &dyn ConstantResolver,
) -> Result<(InstructionKind, usize)> {
    let opcode = read_u8(code, offset)?;
    let decoded = match opcode {
        opcodes::NOP => (InstructionKind::Nop, 1),
        opcodes::ACONST_NULL => (InstructionKind::AconstNull, 1),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => (
            InstructionKind::IntConst(opcode as i32 - opcodes::ICONST_0 as i32),
            1,
        ),
        opcodes::LCONST_0 | opcodes::LCONST_1 => (
            InstructionKind::LongConst((opcode - opcodes::LCONST_0) as i64),
            1,
        ),
        opcodes::FCONST_0..=opcodes::FCONST_2 => (
            InstructionKind::FloatConst((opcode - opcodes::FCONST_0) as f32),
            1,
        ),
        opcodes::DCONST_0 | opcodes::DCONST_1 => (
            InstructionKind::DoubleConst((opcode - opcodes::DCONST_0) as f64),
            1,
        ),
        opcodes::BIPUSH => (
            InstructionKind::IntConst(read_u8(code, offset + 1)? as i8 as i32),
            2,
        ),
        opcodes::SIPUSH => (InstructionKind::IntConst(read_i16(code, offset + 1)? as i32), 3),
        opcodes::LDC => {
            let index = read_u8(code, offset + 1)? as u16;
            (InstructionKind::Ldc(resolver.loadable(index)?), 2)
        }
        opcodes::LDC_W | opcodes::LDC2_W => {
            let index = read_u16(code, offset + 1)?;
            (InstructionKind::Ldc(resolver.loadable(index)?), 3)
        }
        opcodes::ILOAD..=opcodes::ALOAD => {
            let index = read_u8(code, offset + 1)? as u16;
            (
                InstructionKind::Load(value_type(opcode - opcodes::ILOAD), index),
                2,
            )
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let n = opcode - opcodes::ILOAD_0;
            (InstructionKind::Load(value_type(n / 4), (n % 4) as u16), 1)
        }
        opcodes::IALOAD..=opcodes::SALOAD => (
            InstructionKind::ArrayLoad(ARRAY_TYPES[(opcode - opcodes::IALOAD) as usize]),
            1,
        ),
        opcodes::ISTORE..=opcodes::ASTORE => {
            let index = read_u8(code, offset + 1)? as u16;
            (
                InstructionKind::Store(value_type(opcode - opcodes::ISTORE), index),
                2,
            )
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let n = opcode - opcodes::ISTORE_0;
            (InstructionKind::Store(value_type(n / 4), (n % 4) as u16), 1)
        }
        opcodes::IASTORE..=opcodes::SASTORE => (
            InstructionKind::ArrayStore(ARRAY_TYPES[(opcode - opcodes::IASTORE) as usize]),
            1,
        ),
        opcodes::POP => (InstructionKind::Pop, 1),
        opcodes::POP2 => (InstructionKind::Pop2, 1),
        opcodes::DUP => (InstructionKind::Dup, 1),
        opcodes::DUP_X1 => (InstructionKind::DupX1, 1),
        opcodes::DUP_X2 => (InstructionKind::DupX2, 1),
        opcodes::DUP2 => (InstructionKind::Dup2, 1),
        opcodes::DUP2_X1 => (InstructionKind::Dup2X1, 1),
        opcodes::DUP2_X2 => (InstructionKind::Dup2X2, 1),
        opcodes::SWAP => (InstructionKind::Swap, 1),
        opcodes::IADD..=opcodes::DREM => {
            let n = (opcode - opcodes::IADD) as usize;
            let op = [
                ArithmeticOp::Add,
                ArithmeticOp::Sub,
                ArithmeticOp::Mul,
                ArithmeticOp::Div,
                ArithmeticOp::Rem,
            ][n / 4];
            (InstructionKind::Arithmetic(NUMERIC_TYPES[n % 4], op), 1)
        }
        opcodes::INEG..=opcodes::DNEG => (
            InstructionKind::Negate(NUMERIC_TYPES[(opcode - opcodes::INEG) as usize]),
            1,
        ),
        opcodes::ISHL..=opcodes::LUSHR => {
            let n = (opcode - opcodes::ISHL) as usize;
            let op = [ArithmeticOp::Shl, ArithmeticOp::Shr, ArithmeticOp::Ushr][n / 2];
            (InstructionKind::Arithmetic(NUMERIC_TYPES[n % 2], op), 1)
        }
        opcodes::IAND..=opcodes::LXOR => {
            let n = (opcode - opcodes::IAND) as usize;
            let op = [ArithmeticOp::And, ArithmeticOp::Or, ArithmeticOp::Xor][n / 2];
            (InstructionKind::Arithmetic(NUMERIC_TYPES[n % 2], op), 1)
        }
        opcodes::IINC => (
            InstructionKind::Iinc {
                index: read_u8(code, offset + 1)? as u16,
                delta: read_u8(code, offset + 2)? as i8 as i32,
            },
            3,
        ),
        opcodes::I2L..=opcodes::I2S => (
            InstructionKind::Convert(CONVERSIONS[(opcode - opcodes::I2L) as usize]),
            1,
        ),
        opcodes::LCMP..=opcodes::DCMPG => (
            InstructionKind::Compare(COMPARISONS[(opcode - opcodes::LCMP) as usize]),
            1,
        ),
        opcodes::IFEQ..=opcodes::IFLE => (
            InstructionKind::If {
                condition: CONDITIONS[(opcode - opcodes::IFEQ) as usize],
                target: short_target(code, offset)?,
            },
            3,
        ),
        opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE => (
            InstructionKind::IfCompare {
                condition: CONDITIONS[(opcode - opcodes::IF_ICMPEQ) as usize],
                target: short_target(code, offset)?,
            },
            3,
        ),
        opcodes::IF_ACMPEQ | opcodes::IF_ACMPNE => (
            InstructionKind::IfCompare {
                condition: if opcode == opcodes::IF_ACMPEQ {
                    Condition::RefEq
                } else {
                    Condition::RefNe
                },
                target: short_target(code, offset)?,
            },
            3,
        ),
        opcodes::IFNULL | opcodes::IFNONNULL => (
            InstructionKind::If {
                condition: if opcode == opcodes::IFNULL {
                    Condition::Null
                } else {
                    Condition::NonNull
                },
                target: short_target(code, offset)?,
            },
            3,
        ),
        opcodes::GOTO => (InstructionKind::Goto(short_target(code, offset)?), 3),
        opcodes::JSR => (InstructionKind::Jsr(short_target(code, offset)?), 3),
        opcodes::GOTO_W => (InstructionKind::Goto(wide_target(code, offset)?), 5),
        opcodes::JSR_W => (InstructionKind::Jsr(wide_target(code, offset)?), 5),
        opcodes::RET => (InstructionKind::Ret(read_u8(code, offset + 1)? as u16), 2),
        opcodes::TABLESWITCH => tableswitch(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch(code, offset)?,
        opcodes::IRETURN..=opcodes::ARETURN => (
            InstructionKind::Return(Some(value_type(opcode - opcodes::IRETURN))),
            1,
        ),
        opcodes::RETURN => (InstructionKind::Return(None), 1),
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = resolver.member(read_u16(code, offset + 1)?)?;
            let field = FieldRef {
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
            };
            let kind = match opcode {
                opcodes::GETSTATIC => InstructionKind::GetStatic(field),
                opcodes::PUTSTATIC => InstructionKind::PutStatic(field),
                opcodes::GETFIELD => InstructionKind::GetField(field),
                _ => InstructionKind::PutField(field),
            };
            (kind, 3)
        }
        opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => {
            let member = resolver.member(read_u16(code, offset + 1)?)?;
            let (kind, length) = match opcode {
                opcodes::INVOKEVIRTUAL => (CallKind::Virtual, 3),
                opcodes::INVOKESPECIAL => (CallKind::Special, 3),
                opcodes::INVOKESTATIC => (CallKind::Static, 3),
                _ => (CallKind::Interface, 5),
            };
            let call = CallSite {
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                kind,
                offset: offset as u32,
            };
            (InstructionKind::Invoke(call), length)
        }
        opcodes::INVOKEDYNAMIC => {
            let (name, descriptor) = resolver.dynamic_call(read_u16(code, offset + 1)?)?;
            (InstructionKind::InvokeDynamic { name, descriptor }, 5)
        }
        opcodes::NEW => (
            InstructionKind::New(resolver.class_name(read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::NEWARRAY => (
            InstructionKind::NewArray(primitive_array_element(read_u8(code, offset + 1)?)?),
            2,
        ),
        opcodes::ANEWARRAY => (
            InstructionKind::ANewArray(resolver.class_name(read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::ARRAYLENGTH => (InstructionKind::ArrayLength, 1),
        opcodes::ATHROW => (InstructionKind::Athrow, 1),
        opcodes::CHECKCAST => (
            InstructionKind::CheckCast(resolver.class_name(read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::INSTANCEOF => (
            InstructionKind::InstanceOf(resolver.class_name(read_u16(code, offset + 1)?)?),
            3,
        ),
        opcodes::MONITORENTER => (InstructionKind::MonitorEnter, 1),
        opcodes::MONITOREXIT => (InstructionKind::MonitorExit, 1),
        opcodes::WIDE => wide(code, offset)?,
        opcodes::MULTIANEWARRAY => (
            InstructionKind::MultiANewArray {
                class: resolver.class_name(read_u16(code, offset + 1)?)?,
                dimensions: read_u8(code, offset + 3)?,
            },
            4,
        ),
        opcodes::BREAKPOINT | opcodes::IMPDEP1 | opcodes::IMPDEP2 => {
            (InstructionKind::Reserved(opcode), 1)
        }
        _ => anyhow::bail!("unknown opcode 0x{opcode:02x}"),
    };
    Ok(decoded)
}

fn value_type(index: u8) -> ValueType {
    VALUE_TYPES[index as usize]
}

fn wide(code: &[u8], offset: usize) -> Result<(InstructionKind, usize)> {
    let opcode = read_u8(code, offset + 1)?;
    let index = read_u16(code, offset + 2)?;
    let kind = match opcode {
        opcodes::IINC => {
            let delta = read_i16(code, offset + 4)? as i32;
            return Ok((InstructionKind::Iinc { index, delta }, 6));
        }
        opcodes::ILOAD..=opcodes::ALOAD => {
            InstructionKind::Load(value_type(opcode - opcodes::ILOAD), index)
        }
        opcodes::ISTORE..=opcodes::ASTORE => {
            InstructionKind::Store(value_type(opcode - opcodes::ISTORE), index)
        }
        opcodes::RET => InstructionKind::Ret(index),
        _ => anyhow::bail!("opcode 0x{opcode:02x} cannot be widened"),
    };
    Ok((kind, 4))
}

fn tableswitch(code: &[u8], offset: usize) -> Result<(InstructionKind, usize)> {
    let base = offset + 1 + padding(offset);
    let default = jump(offset, read_i32(code, base)?)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .and_then(|v| usize::try_from(v).ok())
        .context("invalid tableswitch range")?;
    let mut index = base + 12;
    check_table_fits(code, index, count, 4)?;
    let mut targets = Vec::new();
    for _ in 0..count {
        targets.push(jump(offset, read_i32(code, index)?)?);
        index += 4;
    }
    Ok((InstructionKind::Switch { default, targets }, index - offset))
}

fn lookupswitch(code: &[u8], offset: usize) -> Result<(InstructionKind, usize)> {
    let base = offset + 1 + padding(offset);
    let default = jump(offset, read_i32(code, base)?)?;
    let pairs = usize::try_from(read_i32(code, base + 4)?).context("invalid lookupswitch size")?;
    let mut index = base + 8;
    check_table_fits(code, index, pairs, 8)?;
    let mut targets = Vec::new();
    for _ in 0..pairs {
        targets.push(jump(offset, read_i32(code, index + 4)?)?);
        index += 8;
    }
    Ok((InstructionKind::Switch { default, targets }, index - offset))
}

/// Rejects a switch table whose declared size runs past the end of the code.
fn check_table_fits(code: &[u8], start: usize, entries: usize, width: usize) -> Result<()> {
    let available = code.len().saturating_sub(start) / width;
    if entries > available {
        anyhow::bail!("switch table of {entries} entries overruns the code at {start}");
    }
    Ok(())
}

fn primitive_array_element(atype: u8) -> Result<char> {
    Ok(match atype {
        4 => 'Z',
        5 => 'C',
        6 => 'F',
        7 => 'D',
        8 => 'B',
        9 => 'S',
        10 => 'I',
        11 => 'J',
        _ => anyhow::bail!("invalid newarray type {atype}"),
    })
}

fn short_target(code: &[u8], offset: usize) -> Result<u32> {
    jump(offset, read_i16(code, offset + 1)? as i32)
}

fn wide_target(code: &[u8], offset: usize) -> Result<u32> {
    jump(offset, read_i32(code, offset + 1)?)
}

fn jump(offset: usize, delta: i32) -> Result<u32> {
    u32::try_from(offset as i64 + delta as i64)
        .with_context(|| format!("branch from {offset} by {delta} leaves the method"))
}

/// Alignment bytes after a switch opcode so its operands start on a 4-byte boundary.
fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset)
        .copied()
        .with_context(|| format!("bytecode truncated at {offset}"))
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .with_context(|| format!("bytecode truncated at {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let bytes = code
        .get(offset..offset + 4)
        .with_context(|| format!("bytecode truncated at {offset}"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    let value = read_u16(code, offset)?;
    Ok(i16::from_be_bytes(value.to_be_bytes()))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let value = read_u32(code, offset)?;
    Ok(i32::from_be_bytes(value.to_be_bytes()))
}
