use anyhow::{Result, anyhow};
use jdescriptor::TypeDescriptor;

/// Parameter and return descriptors of a method, rendered as field descriptor strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodDescriptor {
    pub(crate) parameters: Vec<String>,
    pub(crate) return_type: String,
}

pub(crate) fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor> {
    let parsed: jdescriptor::MethodDescriptor = descriptor
        .parse()
        .map_err(|_| anyhow!("invalid method descriptor: {descriptor}"))?;
    Ok(MethodDescriptor {
        parameters: parsed.parameter_types().iter().map(render).collect(),
        return_type: render(parsed.return_type()),
    })
}

fn render(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Byte => "B".to_string(),
        TypeDescriptor::Char => "C".to_string(),
        TypeDescriptor::Double => "D".to_string(),
        TypeDescriptor::Float => "F".to_string(),
        TypeDescriptor::Integer => "I".to_string(),
        TypeDescriptor::Long => "J".to_string(),
        TypeDescriptor::Short => "S".to_string(),
        TypeDescriptor::Boolean => "Z".to_string(),
        TypeDescriptor::Void => "V".to_string(),
        TypeDescriptor::Object(name) => class_name_to_descriptor(name),
        TypeDescriptor::Array(component, dimensions) => {
            format!("{}{}", "[".repeat(usize::from(*dimensions)), render(component))
        }
    }
}

/// Slot width of a field descriptor: 2 for `J`/`D`, otherwise 1.
pub(crate) fn slot_size(signature: &str) -> usize {
    match signature {
        "J" | "D" => 2,
        _ => 1,
    }
}

/// Descriptor of an array whose component is the class or array named by `name`.
pub(crate) fn array_of_class(name: &str) -> String {
    format!("[{}", class_name_to_descriptor(name))
}

/// `java/lang/String` becomes `Ljava/lang/String;`; array names are already descriptors.
pub(crate) fn class_name_to_descriptor(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{name};")
    }
}
