use std::any::Any;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::descriptor::slot_size;

pub(crate) const OBJECT_SIGNATURE: &str = "Ljava/lang/Object;";

/// Constant value known for an operand at analysis time.
#[derive(Clone, Debug)]
pub(crate) enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Class literal, by internal name.
    Class(String),
}

impl PartialEq for Constant {
    // Floating-point constants compare by bit pattern, so NaN equals itself.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            (Constant::Class(a), Constant::Class(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Long(value) => write!(f, "{value}L"),
            Constant::Float(value) => write!(f, "{value}f"),
            Constant::Double(value) => write!(f, "{value}d"),
            Constant::String(value) => write!(f, "{value:?}"),
            Constant::Class(name) => write!(f, "{name}.class"),
        }
    }
}

/// Provenance or shape fact tracked for an operand.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub(crate) enum SpecialKind {
    #[default]
    NotSpecial,
    /// Loaded from a `byte[]`, or narrowed with `i2b`.
    SignedByte,
    RandomInt,
    Low8BitsClear,
    HashcodeInt,
    IntegerSum,
    AverageComputedUsingDivision,
    FloatMath,
    RandomIntRemainder,
    HashcodeIntRemainder,
}

impl SpecialKind {
    fn label(self) -> Option<&'static str> {
        match self {
            SpecialKind::NotSpecial => None,
            SpecialKind::SignedByte => Some("signed_byte"),
            SpecialKind::RandomInt => Some("random_int"),
            SpecialKind::Low8BitsClear => Some("low8clear"),
            SpecialKind::HashcodeInt => Some("hashcode_int"),
            SpecialKind::IntegerSum => Some("int_sum"),
            SpecialKind::AverageComputedUsingDivision => Some("average_by_division"),
            SpecialKind::FloatMath => Some("float_math"),
            SpecialKind::RandomIntRemainder => Some("random_int_rem"),
            SpecialKind::HashcodeIntRemainder => Some("hashcode_int_rem"),
        }
    }
}

/// Field an operand was loaded from.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct FieldOrigin {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) is_static: bool,
}

impl fmt::Display for FieldOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class_name, self.name, self.signature)
    }
}

/// Opaque annotation a detector attaches to an operand.
///
/// The engine never looks inside; two values are equal only when they are the same
/// allocation. This is the one place where items are not compared structurally.
#[derive(Clone)]
#[allow(dead_code)]
pub(crate) struct UserValue(Arc<dyn Any + Send + Sync>);

#[allow(dead_code)]
impl UserValue {
    pub(crate) fn new<T: Any + Send + Sync>(value: T) -> Self {
        UserValue(Arc::new(value))
    }

    pub(crate) fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl PartialEq for UserValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for UserValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserValue({:p})", Arc::as_ptr(&self.0))
    }
}

/// Abstract value occupying one operand stack entry or local variable slot.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Item {
    signature: String,
    constant: Option<Constant>,
    special_kind: SpecialKind,
    field: Option<FieldOrigin>,
    register: Option<u16>,
    is_null: bool,
    is_initial_parameter: bool,
    could_be_zero: bool,
    user_value: Option<UserValue>,
}

static UNKNOWN: LazyLock<Item> = LazyLock::new(|| Item::new(OBJECT_SIGNATURE));

impl Item {
    /// Value of the given type with nothing else known.
    pub(crate) fn new(signature: impl Into<String>) -> Self {
        Item {
            signature: signature.into(),
            constant: None,
            special_kind: SpecialKind::NotSpecial,
            field: None,
            register: None,
            is_null: false,
            is_initial_parameter: false,
            could_be_zero: false,
            user_value: None,
        }
    }

    /// Value with a known constant; integral constants also record low-byte and zero facts.
    pub(crate) fn with_constant(signature: impl Into<String>, constant: Constant) -> Self {
        let mut item = Item::new(signature);
        match constant {
            Constant::Int(value) => item.note_integral(value as i64, value & 0xff == 0),
            Constant::Long(value) => item.note_integral(value, value & 0xff == 0),
            _ => {}
        }
        item.constant = Some(constant);
        item
    }

    fn note_integral(&mut self, value: i64, low_byte_clear: bool) {
        if value == 0 {
            self.could_be_zero = true;
        } else if low_byte_clear {
            self.special_kind = SpecialKind::Low8BitsClear;
        }
    }

    pub(crate) fn int(value: i32) -> Self {
        Item::with_constant("I", Constant::Int(value))
    }

    pub(crate) fn long(value: i64) -> Self {
        Item::with_constant("J", Constant::Long(value))
    }

    pub(crate) fn float(value: f32) -> Self {
        Item::with_constant("F", Constant::Float(value))
    }

    pub(crate) fn double(value: f64) -> Self {
        Item::with_constant("D", Constant::Double(value))
    }

    /// The `null` reference.
    pub(crate) fn null() -> Self {
        let mut item = Item::new(OBJECT_SIGNATURE);
        item.is_null = true;
        item
    }

    /// Value loaded from a field.
    pub(crate) fn from_field(field: FieldOrigin) -> Self {
        let mut item = Item::new(field.signature.clone());
        item.field = Some(field);
        item
    }

    /// Shared sentinel returned for queries the engine cannot answer.
    pub(crate) fn unknown() -> &'static Item {
        &UNKNOWN
    }

    pub(crate) fn signature(&self) -> &str {
        &self.signature
    }

    pub(crate) fn constant(&self) -> Option<&Constant> {
        self.constant.as_ref()
    }

    pub(crate) fn int_constant(&self) -> Option<i32> {
        match self.constant {
            Some(Constant::Int(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn long_constant(&self) -> Option<i64> {
        match self.constant {
            Some(Constant::Long(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn special_kind(&self) -> SpecialKind {
        self.special_kind
    }

    pub(crate) fn register(&self) -> Option<u16> {
        self.register
    }

    /// Number of local slots the value occupies.
    pub(crate) fn size(&self) -> usize {
        slot_size(&self.signature)
    }

    pub(crate) fn is_wide(&self) -> bool {
        self.size() == 2
    }

    pub(crate) fn is_array(&self) -> bool {
        self.signature.starts_with('[')
    }

    pub(crate) fn is_primitive(&self) -> bool {
        !self.signature.starts_with('L') && !self.is_array()
    }

    /// Component type of an array, one dimension removed; `Object` when unknown.
    pub(crate) fn component_signature(&self) -> &str {
        match self.signature.strip_prefix('[') {
            Some(component) if !component.is_empty() => component,
            _ => OBJECT_SIGNATURE,
        }
    }

    pub(crate) fn with_special_kind(mut self, kind: SpecialKind) -> Self {
        self.special_kind = kind;
        self
    }

    pub(crate) fn with_register(mut self, register: Option<u16>) -> Self {
        self.register = register;
        self
    }

    pub(crate) fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub(crate) fn as_initial_parameter(mut self, register: u16) -> Self {
        self.register = Some(register);
        self.is_initial_parameter = true;
        self
    }

    /// Same slot and type with every derived fact dropped.
    pub(crate) fn forget_value(&self) -> Self {
        Item::new(self.signature.clone()).with_register(self.register)
    }

    /// Join of two values reaching the same program point.
    ///
    /// Facts survive only where both sides agree. Two different special kinds widen to
    /// `FloatMath` when either side is `FloatMath`, and to `NotSpecial` otherwise.
    pub(crate) fn merge(a: &Item, b: &Item) -> Item {
        if a == b {
            return a.clone();
        }
        let signature = if a.signature == b.signature {
            a.signature.clone()
        } else {
            OBJECT_SIGNATURE.to_string()
        };
        let special_kind = if a.special_kind == b.special_kind {
            a.special_kind
        } else if a.special_kind == SpecialKind::FloatMath
            || b.special_kind == SpecialKind::FloatMath
        {
            SpecialKind::FloatMath
        } else {
            SpecialKind::NotSpecial
        };
        Item {
            signature,
            constant: agreed(&a.constant, &b.constant),
            special_kind,
            field: agreed(&a.field, &b.field),
            register: if a.register == b.register {
                a.register
            } else {
                None
            },
            is_null: a.is_null && b.is_null,
            is_initial_parameter: a.is_initial_parameter && b.is_initial_parameter,
            could_be_zero: a.could_be_zero || b.could_be_zero,
            user_value: agreed(&a.user_value, &b.user_value),
        }
    }
}

// Facts read by detectors through the stack queries; the bundled rules use only some.
#[allow(dead_code)]
impl Item {
    pub(crate) fn field(&self) -> Option<&FieldOrigin> {
        self.field.as_ref()
    }

    pub(crate) fn is_null(&self) -> bool {
        self.is_null
    }

    pub(crate) fn is_initial_parameter(&self) -> bool {
        self.is_initial_parameter
    }

    pub(crate) fn could_be_zero(&self) -> bool {
        self.could_be_zero
    }

    pub(crate) fn user_value(&self) -> Option<&UserValue> {
        self.user_value.as_ref()
    }

    pub(crate) fn with_user_value(mut self, value: Option<UserValue>) -> Self {
        self.user_value = value;
        self
    }
}

fn agreed<T: Clone + PartialEq>(a: &Option<T>, b: &Option<T>) -> Option<T> {
    if a == b { a.clone() } else { None }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "< {}", self.signature)?;
        if let Some(label) = self.special_kind.label() {
            write!(f, ", {label}")?;
        }
        if let Some(constant) = &self.constant {
            write!(f, ", {constant}")?;
        }
        if let Some(field) = &self.field {
            write!(f, ", {field}")?;
        }
        if self.is_initial_parameter {
            write!(f, ", IP")?;
        }
        if self.is_null {
            write!(f, ", isNull")?;
        }
        if self.could_be_zero {
            write!(f, ", cbz")?;
        }
        if let Some(register) = self.register {
            write!(f, ", r{register}")?;
        }
        write!(f, " >")
    }
}
