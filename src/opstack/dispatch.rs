use crate::descriptor::{array_of_class, class_name_to_descriptor, parse_method_descriptor};
use crate::ir::{
    ArithmeticOp, ArrayType, CallKind, CallSite, FieldRef, Instruction, InstructionKind,
    LoadableConstant, NumericType, ValueType,
};
use crate::item::{Constant, FieldOrigin, Item, OBJECT_SIGNATURE, SpecialKind};

use super::{OpcodeStack, StackError, math};

const RANDOM_OWNERS: [&str; 3] = [
    "java/util/Random",
    "java/security/SecureRandom",
    "java/util/concurrent/ThreadLocalRandom",
];

impl OpcodeStack {
    pub(super) fn dispatch(&mut self, inst: &Instruction) -> Result<(), StackError> {
        let at = inst.offset;
        match &inst.kind {
            InstructionKind::Nop => {}
            InstructionKind::AconstNull => self.push(Item::null()),
            InstructionKind::IntConst(value) => self.push(Item::int(*value)),
            InstructionKind::LongConst(value) => self.push(Item::long(*value)),
            InstructionKind::FloatConst(value) => self.push(Item::float(*value)),
            InstructionKind::DoubleConst(value) => self.push(Item::double(*value)),
            InstructionKind::Ldc(constant) => self.push(loadable_item(constant)),
            InstructionKind::Load(value_type, index) => self.load_local(*value_type, *index),
            InstructionKind::Store(_, index) => {
                let value = self.pop(at)?;
                self.store_local(*index, value);
            }
            InstructionKind::ArrayLoad(array_type) => self.load_element(at, *array_type)?,
            InstructionKind::ArrayStore(_) => {
                self.pop_n(at, 3)?;
            }
            InstructionKind::Pop => {
                self.pop(at)?;
            }
            InstructionKind::Pop2 => {
                if !self.pop(at)?.is_wide() {
                    self.pop(at)?;
                }
            }
            InstructionKind::Dup => {
                let top = self.peek(0).cloned().ok_or(StackError::Underflow {
                    offset: at,
                    needed: 1,
                    depth: 0,
                })?;
                self.push(top);
            }
            InstructionKind::DupX1 => {
                let v1 = self.pop(at)?;
                let v2 = self.pop(at)?;
                self.push_all([v1.clone(), v2, v1]);
            }
            InstructionKind::DupX2 => {
                let v1 = self.pop(at)?;
                let v2 = self.pop(at)?;
                if v2.is_wide() {
                    self.push_all([v1.clone(), v2, v1]);
                } else {
                    let v3 = self.pop(at)?;
                    self.push_all([v1.clone(), v3, v2, v1]);
                }
            }
            InstructionKind::Dup2 => {
                let v1 = self.pop(at)?;
                if v1.is_wide() {
                    self.push_all([v1.clone(), v1]);
                } else {
                    let v2 = self.pop(at)?;
                    self.push_all([v2.clone(), v1.clone(), v2, v1]);
                }
            }
            InstructionKind::Dup2X1 => {
                let v1 = self.pop(at)?;
                let v2 = self.pop(at)?;
                if v1.is_wide() {
                    self.push_all([v1.clone(), v2, v1]);
                } else {
                    let v3 = self.pop(at)?;
                    self.push_all([v2.clone(), v1.clone(), v3, v2, v1]);
                }
            }
            InstructionKind::Dup2X2 => self.dup2_x2(at)?,
            InstructionKind::Swap => {
                let v1 = self.pop(at)?;
                let v2 = self.pop(at)?;
                self.push_all([v1, v2]);
            }
            InstructionKind::Arithmetic(numeric, op) => {
                let right = self.pop(at)?;
                let left = self.pop(at)?;
                self.push(math::binary(*numeric, *op, &left, &right));
            }
            InstructionKind::Negate(numeric) => {
                let value = self.pop(at)?;
                self.push(math::negate(*numeric, &value));
            }
            InstructionKind::Iinc { index, delta } => {
                let current = self
                    .local(*index)
                    .cloned()
                    .unwrap_or_else(|| Item::new("I"));
                let updated = math::binary(
                    NumericType::Int,
                    ArithmeticOp::Add,
                    &current,
                    &Item::int(*delta),
                );
                self.store_local(*index, updated);
            }
            InstructionKind::Convert(conversion) => {
                let value = self.pop(at)?;
                self.push(math::convert(*conversion, &value));
            }
            InstructionKind::Compare(comparison) => {
                let right = self.pop(at)?;
                let left = self.pop(at)?;
                self.push(math::compare(*comparison, &left, &right));
            }
            InstructionKind::If { target, .. } => {
                self.pop(at)?;
                self.add_jump_value(*target);
            }
            InstructionKind::IfCompare { target, .. } => {
                self.pop_n(at, 2)?;
                self.add_jump_value(*target);
            }
            InstructionKind::Goto(target) => self.add_jump_value(*target),
            InstructionKind::Jsr(target) => {
                // Only the subroutine entry sees the return address.
                self.push(Item::new(OBJECT_SIGNATURE));
                self.add_jump_value(*target);
                self.pop(at)?;
            }
            InstructionKind::Ret(_) => {}
            InstructionKind::Switch { default, targets } => {
                self.pop(at)?;
                self.add_jump_value(*default);
                for target in targets {
                    self.add_jump_value(*target);
                }
            }
            InstructionKind::Return(value_type) => {
                if value_type.is_some() {
                    self.pop(at)?;
                }
            }
            InstructionKind::GetStatic(field) => self.push(field_item(field, true)),
            InstructionKind::PutStatic(_) => {
                self.pop(at)?;
            }
            InstructionKind::GetField(field) => {
                self.pop(at)?;
                self.push(field_item(field, false));
            }
            InstructionKind::PutField(_) => {
                self.pop_n(at, 2)?;
            }
            InstructionKind::Invoke(call) => self.invoke(at, call)?,
            InstructionKind::InvokeDynamic { descriptor, .. } => {
                self.pop_arguments_and_push_result(at, descriptor, None)?;
            }
            InstructionKind::New(class) => self.push(Item::new(class_name_to_descriptor(class))),
            InstructionKind::NewArray(element) => {
                self.pop(at)?;
                self.push(Item::new(format!("[{element}")));
            }
            InstructionKind::ANewArray(class) => {
                self.pop(at)?;
                self.push(Item::new(array_of_class(class)));
            }
            InstructionKind::ArrayLength => {
                self.pop(at)?;
                self.push(Item::new("I"));
            }
            InstructionKind::Athrow => {
                self.pop(at)?;
            }
            InstructionKind::CheckCast(class) => {
                let value = self.pop(at)?;
                let target = class_name_to_descriptor(class);
                if value.signature() == target {
                    self.push(value);
                } else {
                    self.push(value.with_signature(target));
                }
            }
            InstructionKind::InstanceOf(_) => {
                self.pop(at)?;
                self.push(Item::new("I"));
            }
            InstructionKind::MonitorEnter | InstructionKind::MonitorExit => {
                self.pop(at)?;
            }
            InstructionKind::MultiANewArray { class, dimensions } => {
                self.pop_n(at, *dimensions as usize)?;
                self.push(Item::new(class_name_to_descriptor(class)));
            }
            InstructionKind::Reserved(opcode) => {
                return Err(StackError::Unsupported {
                    offset: at,
                    opcode: *opcode,
                });
            }
        }
        Ok(())
    }

    fn push_all<const N: usize>(&mut self, items: [Item; N]) {
        self.stack.extend(items);
    }

    fn dup2_x2(&mut self, at: u32) -> Result<(), StackError> {
        let v1 = self.pop(at)?;
        let v2 = self.pop(at)?;
        match (v1.is_wide(), v2.is_wide()) {
            (true, true) => self.push_all([v1.clone(), v2, v1]),
            (true, false) => {
                let v3 = self.pop(at)?;
                self.push_all([v1.clone(), v3, v2, v1]);
            }
            (false, _) => {
                let v3 = self.pop(at)?;
                if v3.is_wide() {
                    self.push_all([v2.clone(), v1.clone(), v3, v2, v1]);
                } else {
                    let v4 = self.pop(at)?;
                    self.push_all([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                }
            }
        }
        Ok(())
    }

    fn load_local(&mut self, value_type: ValueType, index: u16) {
        let item = match self.local(index) {
            Some(current) if fits(value_type, current.signature()) => {
                current.clone().with_register(Some(index))
            }
            _ => Item::new(value_type.signature()).with_register(Some(index)),
        };
        self.push(item);
    }

    /// Writes `value` to a local slot and detaches stack items still naming that slot.
    fn store_local(&mut self, index: u16, value: Item) {
        for item in &mut self.stack {
            if item.register() == Some(index) {
                *item = item.clone().with_register(None);
            }
        }
        self.set_local(index, value.with_register(Some(index)));
    }

    fn load_element(&mut self, at: u32, array_type: ArrayType) -> Result<(), StackError> {
        self.pop(at)?;
        let array = self.pop(at)?;
        let item = match array_type {
            ArrayType::Int | ArrayType::Char | ArrayType::Short => Item::new("I"),
            ArrayType::Byte if array.signature() == "[Z" => Item::new("I"),
            ArrayType::Byte => Item::new("I").with_special_kind(SpecialKind::SignedByte),
            ArrayType::Long => Item::new("J"),
            ArrayType::Float => Item::new("F"),
            ArrayType::Double => Item::new("D"),
            ArrayType::Reference => {
                if array.is_primitive() {
                    return Err(StackError::UnexpectedOperand {
                        offset: at,
                        detail: format!("aaload from {}", array.signature()),
                    });
                }
                Item::new(array.component_signature())
            }
        };
        self.push(item);
        Ok(())
    }

    fn invoke(&mut self, at: u32, call: &CallSite) -> Result<(), StackError> {
        let has_receiver = call.kind != CallKind::Static;
        self.pop_arguments_and_push_result(at, &call.descriptor, Some((call, has_receiver)))
    }

    fn pop_arguments_and_push_result(
        &mut self,
        at: u32,
        descriptor: &str,
        call: Option<(&CallSite, bool)>,
    ) -> Result<(), StackError> {
        let parsed =
            parse_method_descriptor(descriptor).map_err(|err| StackError::UnexpectedOperand {
                offset: at,
                detail: err.to_string(),
            })?;
        let receiver = call.is_some_and(|(_, has_receiver)| has_receiver);
        self.pop_n(at, parsed.parameters.len() + usize::from(receiver))?;
        if parsed.return_type == "V" {
            return Ok(());
        }
        let kind = call
            .map(|(site, _)| result_kind(site))
            .unwrap_or_default();
        self.push(Item::new(parsed.return_type).with_special_kind(kind));
        Ok(())
    }
}

/// Whether a local holding `signature` can be read by a load of `value_type`.
fn fits(value_type: ValueType, signature: &str) -> bool {
    match value_type {
        ValueType::Int => matches!(signature, "I" | "Z" | "B" | "C" | "S"),
        ValueType::Long => signature == "J",
        ValueType::Float => signature == "F",
        ValueType::Double => signature == "D",
        ValueType::Reference => signature.starts_with('L') || signature.starts_with('['),
    }
}

fn result_kind(call: &CallSite) -> SpecialKind {
    match (call.owner.as_str(), call.name.as_str(), call.descriptor.as_str()) {
        (_, "hashCode", "()I")
        | ("java/lang/System", "identityHashCode", "(Ljava/lang/Object;)I")
        | ("java/util/Objects", "hashCode", "(Ljava/lang/Object;)I") => SpecialKind::HashcodeInt,
        (owner, "nextInt", "()I") | (owner, "nextLong", "()J")
            if RANDOM_OWNERS.contains(&owner) =>
        {
            SpecialKind::RandomInt
        }
        _ => SpecialKind::NotSpecial,
    }
}

fn loadable_item(constant: &LoadableConstant) -> Item {
    match constant {
        LoadableConstant::Int(value) => Item::int(*value),
        LoadableConstant::Float(value) => Item::float(*value),
        LoadableConstant::Long(value) => Item::long(*value),
        LoadableConstant::Double(value) => Item::double(*value),
        LoadableConstant::String(value) => {
            Item::with_constant("Ljava/lang/String;", Constant::String(value.clone()))
        }
        LoadableConstant::Class(name) => {
            Item::with_constant("Ljava/lang/Class;", Constant::Class(name.clone()))
        }
        LoadableConstant::MethodType => Item::new("Ljava/lang/invoke/MethodType;"),
        LoadableConstant::MethodHandle => Item::new("Ljava/lang/invoke/MethodHandle;"),
        LoadableConstant::Dynamic(descriptor) => Item::new(descriptor.clone()),
    }
}

fn field_item(field: &FieldRef, is_static: bool) -> Item {
    Item::from_field(FieldOrigin {
        class_name: field.owner.clone(),
        name: field.name.clone(),
        signature: field.descriptor.clone(),
        is_static,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Condition, Conversion};
    use crate::testing::method;

    fn replay(descriptor: &str, kinds: Vec<InstructionKind>) -> OpcodeStack {
        let method = method(descriptor, true, kinds);
        let mut stack = OpcodeStack::new();
        stack
            .reset_for_method("com/example/Sample", &method)
            .expect("reset");
        for inst in &method.instructions {
            stack.process(inst).expect("process");
        }
        stack
    }

    fn signatures(stack: &OpcodeStack) -> Vec<String> {
        (0..stack.stack_depth())
            .rev()
            .map(|offset| stack.stack_item(offset).signature().to_string())
            .collect()
    }

    fn constants(stack: &OpcodeStack) -> Vec<Option<i32>> {
        (0..stack.stack_depth())
            .rev()
            .map(|offset| stack.stack_item(offset).int_constant())
            .collect()
    }

    #[test]
    fn stack_effects_match_instruction_categories() {
        let cases: Vec<(Vec<InstructionKind>, usize)> = vec![
            (vec![InstructionKind::AconstNull], 1),
            (vec![InstructionKind::LongConst(1)], 1),
            (
                vec![
                    InstructionKind::IntConst(1),
                    InstructionKind::IntConst(2),
                    InstructionKind::Arithmetic(NumericType::Int, ArithmeticOp::Mul),
                ],
                1,
            ),
            (
                vec![
                    InstructionKind::IntConst(1),
                    InstructionKind::Store(ValueType::Int, 0),
                ],
                0,
            ),
            (
                vec![
                    InstructionKind::IntConst(3),
                    InstructionKind::NewArray('I'),
                    InstructionKind::IntConst(0),
                    InstructionKind::IntConst(9),
                    InstructionKind::ArrayStore(ArrayType::Int),
                ],
                0,
            ),
            (
                vec![
                    InstructionKind::IntConst(1),
                    InstructionKind::If {
                        condition: Condition::Eq,
                        target: 2,
                    },
                ],
                0,
            ),
            (
                vec![
                    InstructionKind::DoubleConst(1.0),
                    InstructionKind::DoubleConst(2.0),
                    InstructionKind::Compare(crate::ir::Comparison::Dcmpl),
                ],
                1,
            ),
            (
                vec![
                    InstructionKind::IntConst(2),
                    InstructionKind::IntConst(3),
                    InstructionKind::MultiANewArray {
                        class: "[[I".to_string(),
                        dimensions: 2,
                    },
                ],
                1,
            ),
        ];

        for (kinds, depth) in cases {
            let stack = replay("()V", kinds.clone());
            assert_eq!(stack.stack_depth(), depth, "{kinds:?}");
        }
    }

    #[test]
    fn dup_forms_respect_wide_values() {
        let dup2_wide = replay(
            "()V",
            vec![InstructionKind::LongConst(5), InstructionKind::Dup2],
        );
        assert_eq!(signatures(&dup2_wide), vec!["J", "J"]);

        let dup_x1 = replay(
            "()V",
            vec![
                InstructionKind::IntConst(1),
                InstructionKind::IntConst(2),
                InstructionKind::DupX1,
            ],
        );
        assert_eq!(constants(&dup_x1), vec![Some(2), Some(1), Some(2)]);

        let dup_x2_wide = replay(
            "()V",
            vec![
                InstructionKind::LongConst(5),
                InstructionKind::IntConst(2),
                InstructionKind::DupX2,
            ],
        );
        assert_eq!(signatures(&dup_x2_wide), vec!["I", "J", "I"]);

        let dup2_x1 = replay(
            "()V",
            vec![
                InstructionKind::IntConst(1),
                InstructionKind::IntConst(2),
                InstructionKind::IntConst(3),
                InstructionKind::Dup2X1,
            ],
        );
        assert_eq!(
            constants(&dup2_x1),
            vec![Some(2), Some(3), Some(1), Some(2), Some(3)]
        );

        let dup2_x2 = replay(
            "()V",
            vec![
                InstructionKind::IntConst(1),
                InstructionKind::IntConst(2),
                InstructionKind::IntConst(3),
                InstructionKind::IntConst(4),
                InstructionKind::Dup2X2,
            ],
        );
        assert_eq!(
            constants(&dup2_x2),
            vec![Some(3), Some(4), Some(1), Some(2), Some(3), Some(4)]
        );

        let dup2_x2_wide = replay(
            "()V",
            vec![
                InstructionKind::LongConst(1),
                InstructionKind::DoubleConst(2.0),
                InstructionKind::Dup2X2,
            ],
        );
        assert_eq!(signatures(&dup2_x2_wide), vec!["D", "J", "D"]);

        let pop2_wide = replay(
            "()V",
            vec![
                InstructionKind::IntConst(1),
                InstructionKind::LongConst(1),
                InstructionKind::Pop2,
            ],
        );
        assert_eq!(signatures(&pop2_wide), vec!["I"]);
    }

    #[test]
    fn swap_exchanges_top_two() {
        let stack = replay(
            "()V",
            vec![
                InstructionKind::IntConst(1),
                InstructionKind::IntConst(2),
                InstructionKind::Swap,
            ],
        );

        assert_eq!(constants(&stack), vec![Some(2), Some(1)]);
    }

    #[test]
    fn loads_carry_register_and_store_detaches_stale_copies() {
        let stack = replay(
            "(I)V",
            vec![
                InstructionKind::Load(ValueType::Int, 0),
                InstructionKind::Iinc { index: 0, delta: 1 },
                InstructionKind::Load(ValueType::Int, 0),
            ],
        );

        assert_eq!(stack.stack_item(1).register(), None);
        assert!(stack.stack_item(1).is_initial_parameter());
        assert_eq!(stack.stack_item(0).register(), Some(0));
        assert!(!stack.stack_item(0).is_initial_parameter());
    }

    #[test]
    fn iinc_folds_constant_locals() {
        let stack = replay(
            "()V",
            vec![
                InstructionKind::IntConst(5),
                InstructionKind::Store(ValueType::Int, 1),
                InstructionKind::Iinc { index: 1, delta: -2 },
            ],
        );

        assert_eq!(stack.local_item(1).int_constant(), Some(3));
        assert_eq!(stack.local_item(1).register(), Some(1));
    }

    #[test]
    fn load_of_unwritten_local_uses_instruction_type() {
        let stack = replay(
            "()V",
            vec![
                InstructionKind::Load(ValueType::Reference, 3),
                InstructionKind::Load(ValueType::Double, 4),
            ],
        );

        assert_eq!(signatures(&stack), vec![OBJECT_SIGNATURE, "D"]);
        assert_eq!(stack.stack_item(1).register(), Some(3));
    }

    #[test]
    fn byte_array_loads_are_signed_bytes_but_boolean_arrays_are_not() {
        let bytes = replay(
            "([B)V",
            vec![
                InstructionKind::Load(ValueType::Reference, 0),
                InstructionKind::IntConst(0),
                InstructionKind::ArrayLoad(ArrayType::Byte),
            ],
        );
        let booleans = replay(
            "([Z)V",
            vec![
                InstructionKind::Load(ValueType::Reference, 0),
                InstructionKind::IntConst(0),
                InstructionKind::ArrayLoad(ArrayType::Byte),
            ],
        );

        assert_eq!(bytes.stack_item(0).special_kind(), SpecialKind::SignedByte);
        assert_eq!(booleans.stack_item(0).special_kind(), SpecialKind::NotSpecial);
    }

    #[test]
    fn reference_array_load_strips_one_dimension() {
        let stack = replay(
            "([[Ljava/lang/String;)V",
            vec![
                InstructionKind::Load(ValueType::Reference, 0),
                InstructionKind::IntConst(0),
                InstructionKind::ArrayLoad(ArrayType::Reference),
            ],
        );

        assert_eq!(stack.stack_item(0).signature(), "[Ljava/lang/String;");
    }

    #[test]
    fn anewarray_prefixes_component() {
        let stack = replay(
            "()V",
            vec![
                InstructionKind::IntConst(2),
                InstructionKind::ANewArray("java/lang/String".to_string()),
                InstructionKind::IntConst(2),
                InstructionKind::ANewArray("[I".to_string()),
            ],
        );

        assert_eq!(signatures(&stack), vec!["[Ljava/lang/String;", "[[I"]);
    }

    #[test]
    fn invocations_pop_arguments_and_mark_results() {
        let hash = CallSite {
            owner: "java/lang/Object".to_string(),
            name: "hashCode".to_string(),
            descriptor: "()I".to_string(),
            kind: CallKind::Virtual,
            offset: 1,
        };
        let format = CallSite {
            owner: "java/lang/String".to_string(),
            name: "valueOf".to_string(),
            descriptor: "(J)Ljava/lang/String;".to_string(),
            kind: CallKind::Static,
            offset: 3,
        };
        let stack = replay(
            "(Ljava/lang/Object;J)V",
            vec![
                InstructionKind::Load(ValueType::Reference, 0),
                InstructionKind::Invoke(hash),
                InstructionKind::Load(ValueType::Long, 1),
                InstructionKind::Invoke(format),
            ],
        );

        assert_eq!(signatures(&stack), vec!["I", "Ljava/lang/String;"]);
        assert_eq!(stack.stack_item(1).special_kind(), SpecialKind::HashcodeInt);
        assert_eq!(stack.stack_item(0).special_kind(), SpecialKind::NotSpecial);
    }

    #[test]
    fn ldc_class_pushes_class_literal() {
        let stack = replay(
            "()V",
            vec![InstructionKind::Ldc(LoadableConstant::Class(
                "java/util/List".to_string(),
            ))],
        );

        assert_eq!(stack.stack_item(0).signature(), "Ljava/lang/Class;");
        assert_eq!(
            stack.stack_item(0).constant(),
            Some(&Constant::Class("java/util/List".to_string()))
        );
    }

    #[test]
    fn field_loads_record_provenance() {
        let field = FieldRef {
            owner: "com/example/Config".to_string(),
            name: "LIMIT".to_string(),
            descriptor: "J".to_string(),
        };
        let stack = replay("()V", vec![InstructionKind::GetStatic(field)]);

        let origin = stack.stack_item(0).field().expect("field provenance");
        assert_eq!(origin.name, "LIMIT");
        assert!(origin.is_static);
        assert!(stack.stack_item(0).is_wide());
    }

    #[test]
    fn checkcast_retypes_value() {
        let stack = replay(
            "(Ljava/lang/Object;)V",
            vec![
                InstructionKind::Load(ValueType::Reference, 0),
                InstructionKind::CheckCast("java/lang/String".to_string()),
            ],
        );

        assert_eq!(stack.stack_item(0).signature(), "Ljava/lang/String;");
        assert!(stack.stack_item(0).is_initial_parameter());
    }

    #[test]
    fn i2b_marks_signed_byte() {
        let stack = replay(
            "(I)V",
            vec![
                InstructionKind::Load(ValueType::Int, 0),
                InstructionKind::Convert(Conversion::I2B),
            ],
        );

        assert_eq!(stack.stack_item(0).special_kind(), SpecialKind::SignedByte);
    }

    #[test]
    fn recovery_resets_state_without_ragged_stack() {
        let stack = replay(
            "(I)V",
            vec![
                InstructionKind::IntConst(1),
                InstructionKind::Arithmetic(NumericType::Int, ArithmeticOp::Add),
                InstructionKind::IntConst(8),
            ],
        );

        assert_eq!(stack.stack_depth(), 1);
        assert_eq!(stack.stack_item(0).int_constant(), Some(8));
        assert!(std::ptr::eq(stack.local_item(0), Item::unknown()));
    }
}
