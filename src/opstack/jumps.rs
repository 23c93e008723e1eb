use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::debug;

use crate::ir::Method;
use crate::item::Item;

use super::OpcodeStack;

/// State recorded for branch targets: locals per target, plus the operand stack for
/// targets reached with values still pending.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct JumpInfo {
    locals: BTreeMap<u32, Vec<Option<Item>>>,
    stacks: BTreeMap<u32, Vec<Item>>,
}

impl JumpInfo {
    pub(crate) fn is_empty(&self) -> bool {
        self.locals.is_empty() && self.stacks.is_empty()
    }

    pub(crate) fn locals_at(&self, offset: u32) -> Option<&[Option<Item>]> {
        self.locals.get(&offset).map(Vec::as_slice)
    }

    pub(crate) fn stack_at(&self, offset: u32) -> Option<&[Item]> {
        self.stacks.get(&offset).map(Vec::as_slice)
    }

    pub(super) fn clear_stack_entries(&mut self) {
        self.stacks.clear();
    }
}

/// Merges `from` into `into` slot by slot; the result keeps the shorter length.
fn merge_locals(into: &mut Vec<Option<Item>>, from: &[Option<Item>]) {
    into.truncate(from.len());
    for (slot, incoming) in into.iter_mut().zip(from) {
        *slot = match (slot.as_ref(), incoming) {
            (Some(current), Some(incoming)) => Some(Item::merge(current, incoming)),
            _ => None,
        };
    }
}

fn merge_stack(into: &mut [Item], from: &[Item]) {
    for (current, incoming) in into.iter_mut().zip(from) {
        *current = Item::merge(current, incoming);
    }
}

impl OpcodeStack {
    /// Records the current state as flowing into `target`.
    pub(super) fn add_jump_value(&mut self, target: u32) {
        match self.jump_info.locals.get_mut(&target) {
            Some(entry) => merge_locals(entry, &self.locals),
            None => {
                self.jump_info.locals.insert(target, self.locals.clone());
            }
        }
        if self.stack.is_empty() {
            return;
        }
        match self.jump_info.stacks.get_mut(&target) {
            Some(entry) if entry.len() == self.stack.len() => merge_stack(entry, &self.stack),
            Some(entry) => debug!(
                "stack depth {} does not match {} recorded for {target}",
                self.stack.len(),
                entry.len()
            ),
            None => {
                self.jump_info.stacks.insert(target, self.stack.clone());
            }
        }
    }

    /// Folds the recorded entry for `offset` into the current state.
    pub(super) fn merge_jumps(&mut self, offset: u32) {
        let reach_only_by_branch = std::mem::take(&mut self.reach_only_by_branch);
        match self.jump_info.locals_at(offset) {
            Some(entry) if reach_only_by_branch => {
                self.locals = entry.to_vec();
                self.stack = self
                    .jump_info
                    .stack_at(offset)
                    .map(<[Item]>::to_vec)
                    .unwrap_or_default();
            }
            Some(entry) => {
                merge_locals(&mut self.locals, entry);
                if let Some(saved) = self.jump_info.stack_at(offset) {
                    if saved.len() == self.stack.len() {
                        merge_stack(&mut self.stack, saved);
                    } else {
                        debug!(
                            "falling into {offset} with depth {} but {} was recorded",
                            self.stack.len(),
                            saved.len()
                        );
                    }
                }
            }
            None if reach_only_by_branch => {
                self.stack.clear();
                for slot in self.locals.iter_mut().flatten() {
                    *slot = slot.forget_value();
                }
            }
            None => {}
        }
    }
}

/// Runs up to `max_passes` passes over `method`, each seeded with the jump table of
/// the previous one, and stops early once a pass reproduces its input table.
pub(crate) fn compute_jump_info(
    class_name: &str,
    method: &Method,
    max_passes: usize,
) -> Result<JumpInfo> {
    let mut info = JumpInfo::default();
    for pass in 1..=max_passes.max(1) {
        let mut stack = OpcodeStack::new();
        stack.reset_for_method(class_name, method)?;
        stack.learn_from(info.clone());
        for inst in &method.instructions {
            stack.process(inst).with_context(|| {
                format!("failed to replay {class_name}.{}{}", method.name, method.descriptor)
            })?;
        }
        let next = stack.into_jump_info();
        let settled = next == info;
        info = next;
        if settled {
            debug!(
                "jump table of {class_name}.{} settled after {pass} pass(es)",
                method.name
            );
            break;
        }
    }
    Ok(info)
}
