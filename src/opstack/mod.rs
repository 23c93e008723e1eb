//! Symbolic operand stack and local variable model for one method body.
//!
//! The engine replays instructions in program order. At every branch it records the
//! current locals (and a non-empty stack) for the target; when control reaches that
//! target again the recorded state is merged in, or replaces the current one when the
//! target can only be reached by branching.

mod dispatch;
mod jumps;
mod math;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use log::debug;

use crate::descriptor::{class_name_to_descriptor, parse_method_descriptor};
use crate::ir::{Instruction, Method};
use crate::item::{Item, UserValue};

pub(crate) use jumps::{JumpInfo, compute_jump_info};

const THROWABLE_SIGNATURE: &str = "Ljava/lang/Throwable;";

/// Settings for replaying a method.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct StackConfig {
    /// Upper bound on interpretation passes for methods with loops; `1` disables
    /// iterative mode.
    pub(crate) max_passes: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig { max_passes: 2 }
    }
}

/// Failure raised while applying a single instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum StackError {
    Underflow {
        offset: u32,
        needed: usize,
        depth: usize,
    },
    UnexpectedOperand {
        offset: u32,
        detail: String,
    },
    Unsupported {
        offset: u32,
        opcode: u8,
    },
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::Underflow {
                offset,
                needed,
                depth,
            } => write!(
                f,
                "stack underflow at {offset}: needed {needed} operand(s), depth {depth}"
            ),
            StackError::UnexpectedOperand { offset, detail } => {
                write!(f, "unexpected operand at {offset}: {detail}")
            }
            StackError::Unsupported { offset, opcode } => {
                write!(f, "unsupported opcode 0x{opcode:02x} at {offset}")
            }
        }
    }
}

impl std::error::Error for StackError {}

/// Abstract frame state of the method being replayed.
#[derive(Debug, Default)]
pub(crate) struct OpcodeStack {
    stack: Vec<Item>,
    locals: Vec<Option<Item>>,
    jump_info: JumpInfo,
    reach_only_by_branch: bool,
    /// Handler offset to the descriptor of the exception it receives.
    handlers: BTreeMap<u32, String>,
    /// Offset whose incoming state has already been merged.
    prepared_at: Option<u32>,
}

impl OpcodeStack {
    pub(crate) fn new() -> Self {
        OpcodeStack::default()
    }

    /// Drops all state and seeds locals with `this` and the declared parameters.
    ///
    /// Returns the number of local slots the parameters occupy.
    pub(crate) fn reset_for_method(&mut self, class_name: &str, method: &Method) -> Result<usize> {
        let descriptor = parse_method_descriptor(&method.descriptor)?;
        self.stack.clear();
        self.locals.clear();
        self.jump_info = JumpInfo::default();
        self.reach_only_by_branch = false;
        self.prepared_at = None;

        self.handlers.clear();
        for handler in &method.exception_handlers {
            let signature = handler
                .catch_type
                .as_deref()
                .map(class_name_to_descriptor)
                .unwrap_or_else(|| THROWABLE_SIGNATURE.to_string());
            self.handlers
                .entry(handler.handler_pc)
                .and_modify(|existing| {
                    if *existing != signature {
                        *existing = THROWABLE_SIGNATURE.to_string();
                    }
                })
                .or_insert(signature);
        }

        let mut register: u16 = 0;
        if !method.access.is_static {
            let this = Item::new(class_name_to_descriptor(class_name)).as_initial_parameter(0);
            self.set_local(0, this);
            register = 1;
        }
        for parameter in descriptor.parameters {
            let item = Item::new(parameter).as_initial_parameter(register);
            let size = item.size() as u16;
            self.set_local(register, item);
            register += size;
        }
        Ok(register as usize)
    }

    /// Seeds the jump table with entries learned by an earlier pass.
    pub(crate) fn learn_from(&mut self, jump_info: JumpInfo) {
        self.jump_info = jump_info;
    }

    /// Merges the state flowing into `inst` without applying it.
    ///
    /// Detectors that inspect the stack before an instruction call this first;
    /// `process` skips the merge when it already happened for the same offset.
    pub(crate) fn prepare(&mut self, inst: &Instruction) {
        if self.prepared_at == Some(inst.offset) {
            return;
        }
        self.merge_jumps(inst.offset);
        if let Some(signature) = self.handlers.get(&inst.offset) {
            self.stack.clear();
            self.stack.push(Item::new(signature.clone()));
        }
        self.prepared_at = Some(inst.offset);
    }

    /// Applies one instruction to the abstract state.
    ///
    /// Recoverable failures reset the frame and are only logged; an unsupported
    /// instruction is returned to the caller.
    pub(crate) fn process(&mut self, inst: &Instruction) -> Result<(), StackError> {
        self.prepare(inst);
        self.prepared_at = None;
        let result = self.dispatch(inst);
        self.reach_only_by_branch = inst.kind.ends_linear_flow();
        match result {
            Ok(()) => Ok(()),
            Err(err @ StackError::Unsupported { .. }) => {
                self.clear();
                Err(err)
            }
            Err(err) => {
                debug!("recovering from {err}; clearing frame state");
                self.clear();
                Ok(())
            }
        }
    }

    fn clear(&mut self) {
        self.stack.clear();
        self.locals.clear();
        self.jump_info.clear_stack_entries();
    }

    pub(crate) fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Item `offset` entries below the top; the unknown sentinel when out of range.
    pub(crate) fn stack_item(&self, offset: usize) -> &Item {
        self.peek(offset).unwrap_or(Item::unknown())
    }

    /// Current value of a local slot; the unknown sentinel when never written.
    #[allow(dead_code)]
    pub(crate) fn local_item(&self, index: u16) -> &Item {
        self.local(index).unwrap_or(Item::unknown())
    }

    pub(crate) fn has_jump_info(&self) -> bool {
        !self.jump_info.is_empty()
    }

    #[allow(dead_code)]
    pub(crate) fn jump_info(&self) -> &JumpInfo {
        &self.jump_info
    }

    pub(crate) fn into_jump_info(self) -> JumpInfo {
        self.jump_info
    }

    /// Attaches `value` to the item `offset` entries below the top.
    #[allow(dead_code)]
    pub(crate) fn set_user_value(&mut self, offset: usize, value: UserValue) -> bool {
        let Some(index) = self.stack.len().checked_sub(offset + 1) else {
            return false;
        };
        let item = self.stack[index].clone();
        self.stack[index] = item.with_user_value(Some(value));
        true
    }

    fn peek(&self, offset: usize) -> Option<&Item> {
        let index = self.stack.len().checked_sub(offset + 1)?;
        self.stack.get(index)
    }

    fn local(&self, index: u16) -> Option<&Item> {
        self.locals.get(index as usize).and_then(Option::as_ref)
    }

    fn push(&mut self, item: Item) {
        self.stack.push(item);
    }

    fn pop(&mut self, offset: u32) -> Result<Item, StackError> {
        self.stack.pop().ok_or(StackError::Underflow {
            offset,
            needed: 1,
            depth: 0,
        })
    }

    /// Removes `count` items, returned in push order.
    fn pop_n(&mut self, offset: u32, count: usize) -> Result<Vec<Item>, StackError> {
        let depth = self.stack.len();
        let start = depth.checked_sub(count).ok_or(StackError::Underflow {
            offset,
            needed: count,
            depth,
        })?;
        Ok(self.stack.split_off(start))
    }

    /// Writes a local slot, invalidating whatever the write overlaps.
    fn set_local(&mut self, index: u16, item: Item) {
        let index = index as usize;
        let end = index + item.size();
        if self.locals.len() < end {
            self.locals.resize(end, None);
        }
        if index > 0 && self.locals[index - 1].as_ref().is_some_and(Item::is_wide) {
            self.locals[index - 1] = None;
        }
        if item.is_wide() {
            self.locals[index + 1] = None;
        }
        self.locals[index] = Some(item);
    }
}
