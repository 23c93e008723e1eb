use serde_sarif::sarif::{Location, LogicalLocation, Message, Result as SarifResult};

use crate::ir::{Class, Instruction, Method};
use crate::opstack::OpcodeStack;

pub(crate) mod average_overflow;
pub(crate) mod bad_shift_amount;
pub(crate) mod negative_remainder_index;
pub(crate) mod signed_byte_comparison;

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Rule interface for analysis execution.
///
/// The engine replays each method once and offers every instruction to every rule,
/// together with the state flowing into it.
pub(crate) trait Rule {
    fn metadata(&self) -> RuleMetadata;
    fn visit(
        &self,
        class: &Class,
        method: &Method,
        inst: &Instruction,
        stack: &OpcodeStack,
        results: &mut Vec<SarifResult>,
    );
}

/// Every rule the CLI runs, in report order.
pub(crate) fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(average_overflow::AverageOverflowRule),
        Box::new(negative_remainder_index::NegativeRemainderIndexRule),
        Box::new(signed_byte_comparison::SignedByteComparisonRule),
        Box::new(bad_shift_amount::BadShiftAmountRule),
    ]
}

pub(crate) fn method_location(class_name: &str, method_name: &str, descriptor: &str) -> Location {
    let logical = method_logical_location(class_name, method_name, descriptor);
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn method_logical_location(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
) -> LogicalLocation {
    LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

/// Result anchored at one instruction of `method`.
pub(crate) fn instruction_result(
    rule_id: &str,
    class: &Class,
    method: &Method,
    offset: u32,
    text: impl Into<String>,
) -> SarifResult {
    let message = result_message(format!("{} (offset {offset})", text.into()));
    let location = method_location(&class.name, &method.name, &method.descriptor);
    SarifResult::builder()
        .rule_id(rule_id)
        .message(message)
        .locations(vec![location])
        .build()
}
