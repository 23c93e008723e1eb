/// Intermediate representation for parsed JVM classes and methods.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) methods: Vec<Method>,
    pub(crate) artifact_index: i64,
    pub(crate) is_analysis_target: bool,
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    /// True when any branch jumps to an earlier (or the same) offset.
    pub(crate) fn has_backward_branch(&self) -> bool {
        self.instructions.iter().any(|inst| {
            inst.kind
                .branch_targets()
                .into_iter()
                .any(|target| target <= inst.offset)
        })
    }
}

/// Method access flags that affect frame seeding.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MethodAccess {
    pub(crate) is_static: bool,
}

/// Exception handler metadata from the Code attribute.
#[derive(Clone, Debug)]
pub(crate) struct ExceptionHandler {
    pub(crate) handler_pc: u32,
    pub(crate) catch_type: Option<String>,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) length: u32,
    pub(crate) kind: InstructionKind,
}

impl Instruction {
    pub(crate) fn next_offset(&self) -> u32 {
        self.offset + self.length
    }
}

/// Value category of a typed load, store, or return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ValueType {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ValueType {
    /// Descriptor used for values of this category on the operand stack.
    pub(crate) fn signature(self) -> &'static str {
        match self {
            ValueType::Int => "I",
            ValueType::Long => "J",
            ValueType::Float => "F",
            ValueType::Double => "D",
            ValueType::Reference => "Ljava/lang/Object;",
        }
    }
}

/// Numeric width of an arithmetic instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum NumericType {
    Int,
    Long,
    Float,
    Double,
}

impl NumericType {
    pub(crate) fn signature(self) -> &'static str {
        match self {
            NumericType::Int => "I",
            NumericType::Long => "J",
            NumericType::Float => "F",
            NumericType::Double => "D",
        }
    }
}

/// Element kind of an array load or store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ArrayType {
    Int,
    Long,
    Float,
    Double,
    Reference,
    /// `baload`/`bastore`, shared by `byte[]` and `boolean[]`.
    Byte,
    Char,
    Short,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl ArithmeticOp {
    pub(crate) fn is_shift(self) -> bool {
        matches!(self, ArithmeticOp::Shl | ArithmeticOp::Shr | ArithmeticOp::Ushr)
    }
}

/// Primitive conversion instructions (`i2l` .. `i2s`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Conversion {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Comparison {
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
}

/// Branch condition; `If` compares against zero/null, `IfCompare` pops two operands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    Null,
    NonNull,
    RefEq,
    RefNe,
}

/// Constant pushed by `ldc`, `ldc_w` or `ldc2_w`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LoadableConstant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    MethodType,
    MethodHandle,
    Dynamic(String),
}

/// Resolved field reference operand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Closed set of instruction forms the operand stack understands.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum InstructionKind {
    Nop,
    AconstNull,
    IntConst(i32),
    LongConst(i64),
    FloatConst(f32),
    DoubleConst(f64),
    Ldc(LoadableConstant),
    Load(ValueType, u16),
    Store(ValueType, u16),
    ArrayLoad(ArrayType),
    ArrayStore(ArrayType),
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Arithmetic(NumericType, ArithmeticOp),
    Negate(NumericType),
    Iinc { index: u16, delta: i32 },
    Convert(Conversion),
    Compare(Comparison),
    If { condition: Condition, target: u32 },
    IfCompare { condition: Condition, target: u32 },
    Goto(u32),
    Jsr(u32),
    Ret(u16),
    Switch { default: u32, targets: Vec<u32> },
    Return(Option<ValueType>),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(CallSite),
    InvokeDynamic { name: String, descriptor: String },
    New(String),
    /// `newarray` with the primitive element descriptor (`I`, `Z`, ...).
    NewArray(char),
    ANewArray(String),
    ArrayLength,
    Athrow,
    CheckCast(String),
    InstanceOf(String),
    MonitorEnter,
    MonitorExit,
    MultiANewArray { class: String, dimensions: u8 },
    /// `breakpoint`, `impdep1`, `impdep2`.
    Reserved(u8),
}

impl InstructionKind {
    /// Every address control may transfer to, excluding fall-through.
    pub(crate) fn branch_targets(&self) -> Vec<u32> {
        match self {
            InstructionKind::If { target, .. }
            | InstructionKind::IfCompare { target, .. }
            | InstructionKind::Goto(target)
            | InstructionKind::Jsr(target) => vec![*target],
            InstructionKind::Switch { default, targets } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.push(*default);
                all.extend(targets.iter().copied());
                all
            }
            _ => Vec::new(),
        }
    }

    /// True when the next instruction cannot be reached by falling through.
    pub(crate) fn ends_linear_flow(&self) -> bool {
        matches!(
            self,
            InstructionKind::Goto(_)
                | InstructionKind::Ret(_)
                | InstructionKind::Switch { .. }
                | InstructionKind::Return(_)
                | InstructionKind::Athrow
        )
    }
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
    pub(crate) offset: u32,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}
