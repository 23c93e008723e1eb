//! Builders shared by unit tests: IR methods from instruction kinds, and minimal class
//! files assembled byte by byte.

use std::collections::BTreeMap;

use serde_sarif::sarif::Result as SarifResult;

use crate::engine::{AnalysisContext, run_rules};
use crate::ir::{Class, Instruction, InstructionKind, Method, MethodAccess};
use crate::opstack::StackConfig;
use crate::rules::Rule;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_STATIC: u16 = 0x0008;

/// Method whose instructions sit at consecutive offsets starting at zero.
pub(crate) fn method(descriptor: &str, is_static: bool, kinds: Vec<InstructionKind>) -> Method {
    let instructions = kinds
        .into_iter()
        .enumerate()
        .map(|(index, kind)| Instruction {
            offset: index as u32,
            opcode: 0,
            length: 1,
            kind,
        })
        .collect();
    Method {
        name: "sample".to_string(),
        descriptor: descriptor.to_string(),
        access: MethodAccess { is_static },
        instructions,
        exception_handlers: Vec::new(),
    }
}

/// Reassigns instruction offsets, e.g. to mirror real branch distances.
pub(crate) fn with_offsets(mut method: Method, offsets: &[u32]) -> Method {
    for (inst, offset) in method.instructions.iter_mut().zip(offsets) {
        inst.offset = *offset;
    }
    method
}

pub(crate) fn class_with_methods(name: &str, methods: Vec<Method>) -> Class {
    Class {
        name: name.to_string(),
        methods,
        artifact_index: 0,
        is_analysis_target: true,
    }
}

/// Runs a single rule over one analysis target class with default settings.
pub(crate) fn run_rule(rule: Box<dyn Rule>, class: Class) -> Vec<SarifResult> {
    let context = AnalysisContext::new(vec![class], StackConfig::default());
    run_rules(&context, &[rule]).expect("run rule")
}

/// Assembles a version 52 class file with the given methods.
pub(crate) struct ClassFileBuilder {
    pool: Vec<u8>,
    pool_count: u16,
    utf8: BTreeMap<String, u16>,
    this_class: u16,
    super_class: u16,
    methods: Vec<Vec<u8>>,
}

impl ClassFileBuilder {
    pub(crate) fn new(name: &str) -> Self {
        let mut builder = ClassFileBuilder {
            pool: Vec::new(),
            pool_count: 1,
            utf8: BTreeMap::new(),
            this_class: 0,
            super_class: 0,
            methods: Vec::new(),
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class("java/lang/Object");
        builder
    }

    fn entry(&mut self, bytes: &[u8], slots: u16) -> u16 {
        let index = self.pool_count;
        self.pool.extend_from_slice(bytes);
        self.pool_count += slots;
        index
    }

    pub(crate) fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8.get(value) {
            return *index;
        }
        let mut bytes = vec![1];
        bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(value.as_bytes());
        let index = self.entry(&bytes, 1);
        self.utf8.insert(value.to_string(), index);
        index
    }

    pub(crate) fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut bytes = vec![7];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        self.entry(&bytes, 1)
    }

    pub(crate) fn integer(&mut self, value: i32) -> u16 {
        let mut bytes = vec![3];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.entry(&bytes, 1)
    }

    pub(crate) fn long(&mut self, value: i64) -> u16 {
        let mut bytes = vec![5];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.entry(&bytes, 2)
    }

    pub(crate) fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        let mut bytes = vec![8];
        bytes.extend_from_slice(&string_index.to_be_bytes());
        self.entry(&bytes, 1)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut bytes = vec![12];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        bytes.extend_from_slice(&descriptor_index.to_be_bytes());
        self.entry(&bytes, 1)
    }

    fn member(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let nat_index = self.name_and_type(name, descriptor);
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&class_index.to_be_bytes());
        bytes.extend_from_slice(&nat_index.to_be_bytes());
        self.entry(&bytes, 1)
    }

    pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member(9, owner, name, descriptor)
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member(10, owner, name, descriptor)
    }

    /// Adds a method with a `Code` attribute; handlers are `(start, end, handler, catch)`.
    pub(crate) fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: &[u8],
        handlers: &[(u16, u16, u16, u16)],
    ) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let code_name = self.utf8("Code");

        let mut attribute = Vec::new();
        attribute.extend_from_slice(&16u16.to_be_bytes());
        attribute.extend_from_slice(&16u16.to_be_bytes());
        attribute.extend_from_slice(&(code.len() as u32).to_be_bytes());
        attribute.extend_from_slice(code);
        attribute.extend_from_slice(&(handlers.len() as u16).to_be_bytes());
        for (start, end, handler, catch_type) in handlers {
            for value in [start, end, handler, catch_type] {
                attribute.extend_from_slice(&value.to_be_bytes());
            }
        }
        attribute.extend_from_slice(&0u16.to_be_bytes());

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&access.to_be_bytes());
        bytes.extend_from_slice(&name_index.to_be_bytes());
        bytes.extend_from_slice(&descriptor_index.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&code_name.to_be_bytes());
        bytes.extend_from_slice(&(attribute.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&attribute);
        self.methods.push(bytes);
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&52u16.to_be_bytes());
        bytes.extend_from_slice(&self.pool_count.to_be_bytes());
        bytes.extend_from_slice(&self.pool);
        bytes.extend_from_slice(&(ACC_PUBLIC | 0x0020).to_be_bytes());
        bytes.extend_from_slice(&self.this_class.to_be_bytes());
        bytes.extend_from_slice(&self.super_class.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            bytes.extend_from_slice(method);
        }
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes
    }
}
