use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use jclassfile::methods::MethodFlags;

use crate::bytecode::{ConstantResolver, MemberRef, decode_code};
use crate::ir::{Class, ExceptionHandler, LoadableConstant, Method, MethodAccess};

/// Parse class file bytes into the IR used by the analysis engine.
///
/// Methods without a `Code` attribute (abstract or native) are kept with no instructions.
pub(crate) fn parse_class(
    data: &[u8],
    artifact_index: i64,
    is_analysis_target: bool,
) -> Result<Class> {
    let class_file = class_file::parse(data).context("failed to parse class file")?;
    let pool = PoolResolver {
        pool: class_file.constant_pool(),
    };
    let name = pool.class_name(class_file.this_class())?;

    let mut methods = Vec::new();
    for method in class_file.methods() {
        let method_name = pool.utf8(method.name_index())?;
        let descriptor = pool.utf8(method.descriptor_index())?;
        let mut instructions = Vec::new();
        let mut exception_handlers = Vec::new();
        for attribute in method.attributes() {
            if let Attribute::Code {
                code,
                exception_table,
                ..
            } = attribute
            {
                instructions = decode_code(code, &pool)
                    .with_context(|| format!("failed to decode {name}.{method_name}{descriptor}"))?;
                for entry in exception_table {
                    let catch_type = match entry.catch_type() {
                        0 => None,
                        index => Some(pool.class_name(index)?),
                    };
                    exception_handlers.push(ExceptionHandler {
                        handler_pc: entry.handler_pc() as u32,
                        catch_type,
                    });
                }
            }
        }
        methods.push(Method {
            name: method_name,
            descriptor,
            access: MethodAccess {
                is_static: method.access_flags().contains(MethodFlags::ACC_STATIC),
            },
            instructions,
            exception_handlers,
        });
    }

    Ok(Class {
        name,
        methods,
        artifact_index,
        is_analysis_target,
    })
}

struct PoolResolver<'a> {
    pool: &'a [ConstantPool],
}

impl PoolResolver<'_> {
    fn entry(&self, index: u16) -> Result<&ConstantPool> {
        self.pool
            .get(index as usize)
            .with_context(|| format!("constant pool index {index} out of range"))
    }

    fn utf8(&self, index: u16) -> Result<String> {
        match self.entry(index)? {
            ConstantPool::Utf8 { value } => Ok(value.clone()),
            _ => anyhow::bail!("expected utf8 at {index}"),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => anyhow::bail!("expected name and type at {index}"),
        }
    }
}

impl ConstantResolver for PoolResolver<'_> {
    fn class_name(&self, index: u16) -> Result<String> {
        match self.entry(index)? {
            ConstantPool::Class { name_index } => self.utf8(*name_index),
            _ => anyhow::bail!("expected class at {index}"),
        }
    }

    fn member(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type_index) = match self.entry(index)? {
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => anyhow::bail!("expected member reference at {index}"),
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner: self.class_name(class_index)?,
            name,
            descriptor,
        })
    }

    fn dynamic_call(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            ConstantPool::InvokeDynamic {
                name_and_type_index,
                ..
            } => self.name_and_type(*name_and_type_index),
            _ => anyhow::bail!("expected invokedynamic at {index}"),
        }
    }

    fn loadable(&self, index: u16) -> Result<LoadableConstant> {
        Ok(match self.entry(index)? {
            ConstantPool::Integer { value } => LoadableConstant::Int(*value),
            ConstantPool::Float { value } => LoadableConstant::Float(*value),
            ConstantPool::Long { value } => LoadableConstant::Long(*value),
            ConstantPool::Double { value } => LoadableConstant::Double(*value),
            ConstantPool::String { string_index } => {
                LoadableConstant::String(self.utf8(*string_index)?)
            }
            ConstantPool::Class { name_index } => LoadableConstant::Class(self.utf8(*name_index)?),
            ConstantPool::MethodType { .. } => LoadableConstant::MethodType,
            ConstantPool::MethodHandle { .. } => LoadableConstant::MethodHandle,
            ConstantPool::Dynamic {
                name_and_type_index,
                ..
            } => LoadableConstant::Dynamic(self.name_and_type(*name_and_type_index)?.1),
            _ => anyhow::bail!("constant at {index} is not loadable"),
        })
    }
}
