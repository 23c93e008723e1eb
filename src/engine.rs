use anyhow::{Context, Result};
use log::debug;
use serde_sarif::sarif::Result as SarifResult;

use crate::ir::{Class, Instruction, Method};
use crate::opstack::{OpcodeStack, StackConfig, compute_jump_info};
use crate::rules::Rule;

/// Parsed classes plus the settings every rule replays methods with.
pub(crate) struct AnalysisContext {
    pub(crate) classes: Vec<Class>,
    pub(crate) config: StackConfig,
}

impl AnalysisContext {
    pub(crate) fn new(classes: Vec<Class>, config: StackConfig) -> Self {
        AnalysisContext { classes, config }
    }

    pub(crate) fn analysis_targets(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter().filter(|class| class.is_analysis_target)
    }

    /// Replays every method of every analysis target, calling `visitor` before each
    /// instruction is applied.
    pub(crate) fn replay_targets<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Class, &Method, &Instruction, &OpcodeStack),
    {
        for class in self.analysis_targets() {
            for method in &class.methods {
                replay_method(&class.name, method, self.config, |inst, stack| {
                    visitor(class, method, inst, stack)
                })?;
            }
        }
        Ok(())
    }
}

/// Runs one method through the operand stack model.
///
/// Methods with a backward branch first get a jump table from up to `max_passes - 1`
/// learning passes. The final pass hands the visitor the merged state flowing into
/// each instruction, before its effect is applied.
pub(crate) fn replay_method<F>(
    class_name: &str,
    method: &Method,
    config: StackConfig,
    mut visitor: F,
) -> Result<()>
where
    F: FnMut(&Instruction, &OpcodeStack),
{
    if method.instructions.is_empty() {
        return Ok(());
    }

    let mut stack = OpcodeStack::new();
    stack.reset_for_method(class_name, method).with_context(|| {
        format!("failed to seed {class_name}.{}{}", method.name, method.descriptor)
    })?;
    if config.max_passes > 1 && method.has_backward_branch() {
        let jump_info = compute_jump_info(class_name, method, config.max_passes - 1)?;
        stack.learn_from(jump_info);
        if stack.has_jump_info() {
            debug!("replaying {class_name}.{} with a learned jump table", method.name);
        }
    }

    for inst in &method.instructions {
        stack.prepare(inst);
        visitor(inst, &stack);
        stack.process(inst).with_context(|| {
            format!(
                "failed to replay {class_name}.{}{}",
                method.name, method.descriptor
            )
        })?;
    }
    Ok(())
}

/// Replays every method once, offering each instruction to all rules, and
/// concatenates the results in rule order.
pub(crate) fn run_rules(
    context: &AnalysisContext,
    rules: &[Box<dyn Rule>],
) -> Result<Vec<SarifResult>> {
    let mut found: Vec<Vec<SarifResult>> = rules.iter().map(|_| Vec::new()).collect();
    context.replay_targets(|class, method, inst, stack| {
        for (rule, results) in rules.iter().zip(found.iter_mut()) {
            rule.visit(class, method, inst, stack, results);
        }
    })?;

    let mut results = Vec::new();
    for (rule, found) in rules.iter().zip(found) {
        debug!("rule {} reported {} result(s)", rule.metadata().id, found.len());
        results.extend(found);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::classfile::parse_class;
    use crate::ir::InstructionKind;
    use crate::item::{Constant, SpecialKind};
    use crate::rules::{RuleMetadata, default_rules, instruction_result};
    use crate::testing::{ACC_PUBLIC, ACC_STATIC, ClassFileBuilder, class_with_methods, method};

    /// Logs every visit and reports each instruction it sees.
    struct Recorder {
        id: &'static str,
        log: Rc<RefCell<Vec<(&'static str, u32)>>>,
    }

    impl Rule for Recorder {
        fn metadata(&self) -> RuleMetadata {
            RuleMetadata {
                id: self.id,
                name: "Recorder",
                description: "Reports every instruction",
            }
        }

        fn visit(
            &self,
            class: &Class,
            method: &Method,
            inst: &Instruction,
            _stack: &OpcodeStack,
            results: &mut Vec<SarifResult>,
        ) {
            self.log.borrow_mut().push((self.id, inst.offset));
            results.push(instruction_result(self.id, class, method, inst.offset, "seen"));
        }
    }

    fn sample_class() -> Class {
        let mut builder = ClassFileBuilder::new("com/example/Search");
        // static int mid(int low, int high) { return (low + high) / 2; }
        builder.method(
            ACC_PUBLIC | ACC_STATIC,
            "mid",
            "(II)I",
            &[0x1a, 0x1b, 0x60, 0x05, 0x6c, 0xac],
            &[],
        );
        // static void spin() { int i = 0; while (i < 10) i++; }
        builder.method(
            ACC_PUBLIC | ACC_STATIC,
            "spin",
            "()V",
            &[
                0x03, 0x3b, 0x1a, 0x10, 0x0a, 0xa2, 0x00, 0x09, 0x84, 0x00, 0x01, 0xa7, 0xff,
                0xf7, 0xb1,
            ],
            &[],
        );
        parse_class(&builder.build(), 0, true).expect("parse class")
    }

    #[test]
    fn visitor_sees_state_before_each_instruction() {
        let class = sample_class();
        let mut depths = Vec::new();
        let mut returned = None;

        replay_method(&class.name, &class.methods[0], StackConfig::default(), |inst, stack| {
            depths.push((inst.offset, stack.stack_depth()));
            if inst.opcode == 0xac {
                returned = Some(stack.stack_item(0).special_kind());
            }
        })
        .expect("replay");

        assert_eq!(depths, vec![(0, 0), (1, 1), (2, 2), (3, 1), (4, 2), (5, 1)]);
        assert_eq!(returned, Some(SpecialKind::AverageComputedUsingDivision));
    }

    #[test]
    fn loop_head_forgets_counter_only_with_learning_pass() {
        let class = sample_class();
        let spin = &class.methods[1];
        let counter_at_head = |passes: usize| {
            let mut seen = None;
            replay_method(&class.name, spin, StackConfig { max_passes: passes }, |inst, stack| {
                if inst.offset == 2 {
                    seen = Some(stack.local_item(0).constant().cloned());
                }
            })
            .expect("replay");
            seen.expect("loop head visited")
        };

        assert_eq!(counter_at_head(1), Some(Constant::Int(0)));
        assert_eq!(counter_at_head(2), None);
    }

    #[test]
    fn reserved_opcode_fails_replay_with_method_name() {
        let mut builder = ClassFileBuilder::new("com/example/Debug");
        builder.method(ACC_PUBLIC | ACC_STATIC, "trap", "()V", &[0xca, 0xb1], &[]);
        let class = parse_class(&builder.build(), 0, true).expect("parse class");

        let err = replay_method(&class.name, &class.methods[0], StackConfig::default(), |_, _| {})
            .expect_err("breakpoint is unsupported");

        assert!(format!("{err:#}").contains("com/example/Debug.trap()V"));
    }

    #[test]
    fn bodiless_methods_are_skipped() {
        let mut visited = 0;
        let abstract_method = method("()V", false, Vec::new());

        replay_method("com/example/Shape", &abstract_method, StackConfig::default(), |_, _| {
            visited += 1
        })
        .expect("replay");

        assert_eq!(visited, 0);
    }

    #[test]
    fn classpath_classes_are_not_replayed() {
        let mut library = sample_class();
        library.is_analysis_target = false;
        let target = class_with_methods("com/example/App", Vec::new());
        let context = AnalysisContext::new(vec![library, target], StackConfig::default());

        let mut visited = 0;
        context
            .replay_targets(|_, _, _, _| visited += 1)
            .expect("replay targets");

        assert_eq!(visited, 0);
        assert_eq!(context.analysis_targets().count(), 1);
    }

    #[test]
    fn default_rules_report_average_index() {
        let mut builder = ClassFileBuilder::new("com/example/Search");
        // static int pick(int[] values, int low, int high) { return values[(low + high) / 2]; }
        builder.method(
            ACC_PUBLIC | ACC_STATIC,
            "pick",
            "([III)I",
            &[0x2a, 0x1b, 0x1c, 0x60, 0x05, 0x6c, 0x2e, 0xac],
            &[],
        );
        let class = parse_class(&builder.build(), 0, true).expect("parse class");
        let context = AnalysisContext::new(vec![class], StackConfig::default());

        let results = run_rules(&context, &default_rules()).expect("run rules");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id.as_deref(), Some("AVERAGE_OVERFLOW"));
    }

    #[test]
    fn one_replay_feeds_every_rule_in_turn() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let rules: Vec<Box<dyn Rule>> = vec![
            Box::new(Recorder {
                id: "FIRST",
                log: log.clone(),
            }),
            Box::new(Recorder {
                id: "SECOND",
                log: log.clone(),
            }),
        ];
        let body = vec![InstructionKind::IntConst(1), InstructionKind::Return(None)];
        let class = class_with_methods("com/example/App", vec![method("()V", true, body)]);
        let context = AnalysisContext::new(vec![class], StackConfig::default());

        let results = run_rules(&context, &rules).expect("run rules");

        assert_eq!(
            *log.borrow(),
            vec![("FIRST", 0), ("SECOND", 0), ("FIRST", 1), ("SECOND", 1)]
        );
        let ids: Vec<_> = results.iter().filter_map(|result| result.rule_id.as_deref()).collect();
        assert_eq!(ids, vec!["FIRST", "FIRST", "SECOND", "SECOND"]);
    }
}
