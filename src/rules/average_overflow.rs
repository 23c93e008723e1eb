use serde_sarif::sarif::Result as SarifResult;

use crate::ir::{Class, Instruction, InstructionKind, Method};
use crate::item::SpecialKind;
use crate::opstack::OpcodeStack;
use crate::rules::{Rule, RuleMetadata, instruction_result};

/// Rule that detects array indexes computed as `(low + high) / 2`.
pub(crate) struct AverageOverflowRule;

impl Rule for AverageOverflowRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "AVERAGE_OVERFLOW",
            name: "Overflowing average used as array index",
            description:
                "Array index computed as (a + b) / 2, which is negative when the sum overflows",
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
        if index.special_kind() == SpecialKind::AverageComputedUsingDivision {
            results.push(instruction_result(
                self.metadata().id,
                class,
                method,
                inst.offset,
                "Array index is an average computed by signed division; use (a + b) >>> 1",
            ));
        }
    }
}
