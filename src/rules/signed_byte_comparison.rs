use serde_sarif::sarif::Result as SarifResult;

use crate::ir::{Class, Condition, Instruction, InstructionKind, Method};
use crate::item::{Item, SpecialKind};
use crate::opstack::OpcodeStack;
use crate::rules::{Rule, RuleMetadata, instruction_result};

/// Rule that detects signed bytes compared against constants a byte can never hold.
pub(crate) struct SignedByteComparisonRule;

impl Rule for SignedByteComparisonRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "SIGNED_BYTE_COMPARISON",
            name: "Signed byte compared with out-of-range constant",
            description: "Bytes range over -128..=127, \
                          so comparing one with a larger constant has a fixed outcome",
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
        let InstructionKind::IfCompare { condition, .. } = inst.kind else {
            return;
        };
        if matches!(condition, Condition::RefEq | Condition::RefNe) {
            return;
        }
        let left = stack.stack_item(1);
        let right = stack.stack_item(0);
        let constant = out_of_range_constant(left, right).or(out_of_range_constant(right, left));
        if let Some(value) = constant {
            results.push(instruction_result(
                self.metadata().id,
                class,
                method,
                inst.offset,
                format!("Signed byte compared with {value}, which no byte can equal"),
            ));
        }
    }
}

fn out_of_range_constant(byte: &Item, other: &Item) -> Option<i32> {
    if byte.special_kind() != SpecialKind::SignedByte {
        return None;
    }
    other
        .int_constant()
        .filter(|value| !(i8::MIN as i32..=i8::MAX as i32).contains(value))
}
