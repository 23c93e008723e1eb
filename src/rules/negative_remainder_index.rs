use serde_sarif::sarif::Result as SarifResult;

use crate::ir::{Class, Instruction, InstructionKind, Method};
use crate::item::SpecialKind;
use crate::opstack::OpcodeStack;
use crate::rules::{Rule, RuleMetadata, instruction_result};

/// Rule that detects array indexes derived from the remainder of a hash code or
/// random number, both of which can be negative.
pub(crate) struct NegativeRemainderIndexRule;

impl Rule for NegativeRemainderIndexRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NEGATIVE_REMAINDER_INDEX",
            name: "Possibly negative remainder used as array index",
            description: "Array index is the remainder of a signed hash code or random int",
        }
    }

    fn visit(
        &self,
        class: &Class,
        method: &Method,
        inst: &Instruction,
        stack: &OpcodeStack,
        results: &mut Vec<SarifResult>,
    ) {
        let index = match inst.kind {
            InstructionKind::ArrayLoad(_) => stack.stack_item(0),
            InstructionKind::ArrayStore(_) => stack.stack_item(1),
            _ => return,
        };
        let source = match index.special_kind() {
            SpecialKind::HashcodeIntRemainder => "hash code",
            SpecialKind::RandomIntRemainder => "random int",
            _ => return,
        };
        results.push(instruction_result(
            self.metadata().id,
            class,
            method,
            inst.offset,
            format!("Array index is the remainder of a {source} and may be negative"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArithmeticOp, ArrayType, CallKind, CallSite, NumericType, ValueType};
    use crate::testing::{class_with_methods, method, run_rule};

    fn call(owner: &str, name: &str, descriptor: &str) -> InstructionKind {
        InstructionKind::Invoke(CallSite {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind: CallKind::Virtual,
            offset: 2,
        })
    }

    /// `buckets[receiver.<call>() % 16]`
    fn bucket_lookup(invoke: InstructionKind) -> Vec<SarifResult> {
        let method = method(
            "([ILjava/lang/Object;)I",
            true,
            vec![
                InstructionKind::Load(ValueType::Reference, 0),
                InstructionKind::Load(ValueType::Reference, 1),
                invoke,
                InstructionKind::IntConst(16),
                InstructionKind::Arithmetic(NumericType::Int, ArithmeticOp::Rem),
                InstructionKind::ArrayLoad(ArrayType::Int),
                InstructionKind::Return(Some(ValueType::Int)),
            ],
        );
        let class = class_with_methods("com/example/Table", vec![method]);
        run_rule(Box::new(NegativeRemainderIndexRule), class)
    }

    #[test]
    fn reports_hash_code_remainder() {
        let results = bucket_lookup(call("java/lang/Object", "hashCode", "()I"));

        assert_eq!(1, results.len());
        let message = results[0].message.text.as_deref().unwrap_or("");
        assert!(message.contains("remainder of a hash code"));
    }

    #[test]
    fn reports_random_remainder() {
        let results = bucket_lookup(call("java/util/Random", "nextInt", "()I"));

        assert_eq!(1, results.len());
        let message = results[0].message.text.as_deref().unwrap_or("");
        assert!(message.contains("remainder of a random int"));
    }

    #[test]
    fn ignores_remainder_of_plain_int() {
        let results = bucket_lookup(call("java/util/List", "size", "()I"));

        assert!(results.is_empty());
    }
}
