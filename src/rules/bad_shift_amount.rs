use serde_sarif::sarif::Result as SarifResult;

use crate::ir::{Class, Instruction, InstructionKind, Method, NumericType};
use crate::opstack::OpcodeStack;
use crate::rules::{Rule, RuleMetadata, instruction_result};

/// Rule that detects shifts by a constant the JVM masks to a different distance.
pub(crate) struct BadShiftAmountRule;

impl Rule for BadShiftAmountRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "BAD_SHIFT_AMOUNT",
            name: "Shift amount out of range",
            description:
                "Int shifts use only the low 5 bits of the distance and long shifts the low 6",
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
        let InstructionKind::Arithmetic(numeric, op) = inst.kind else {
            return;
        };
        if !op.is_shift() {
            return;
        }
        let (width, mask) = match numeric {
            NumericType::Int => ("int", 31),
            NumericType::Long => ("long", 63),
            _ => return,
        };
        let Some(amount) = stack.stack_item(0).int_constant() else {
            return;
        };
        if !(0..=mask).contains(&amount) {
            results.push(instruction_result(
                self.metadata().id,
                class,
                method,
                inst.offset,
                format!("Shift of {width} by {amount} actually shifts by {}", amount & mask),
            ));
        }
    }
}
