//! Helpers to pull typed values out of call arguments.
//!
//! Every extractor fails with InvalidArguments carrying the caller's message
//! when an argument of the wrong type is present; a missing keyword argument
//! is simply absent.

use hashbrown::HashMap;

use crate::mir::{BuildTarget, Dependency, File, IncludeDirectories, Instruction, InstructionKind, Program};
use crate::{Error, Result};

/// A value that can be read out of a single instruction.
pub trait FromInstruction: Sized {
    fn from_instruction(instruction: &Instruction) -> Option<Self>;
}

impl FromInstruction for String {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::String(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl FromInstruction for bool {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match instruction.kind {
            InstructionKind::Boolean(value) => Some(value),
            _ => None,
        }
    }
}

impl FromInstruction for i64 {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match instruction.kind {
            InstructionKind::Number(value) => Some(value),
            _ => None,
        }
    }
}

impl FromInstruction for File {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::File(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl FromInstruction for IncludeDirectories {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::IncludeDirectories(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl FromInstruction for Dependency {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::Dependency(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl FromInstruction for Program {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::Program(value) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Extraction marker for static_library targets specifically
pub struct StaticLib(pub BuildTarget);

impl FromInstruction for StaticLib {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::StaticLibrary(value) => Some(StaticLib((**value).clone())),
            _ => None,
        }
    }
}

/// Extract one positional argument or fail with the given message.
pub fn extract_positional<T: FromInstruction>(arg: &Instruction, err_msg: &str) -> Result<T> {
    T::from_instruction(arg).ok_or_else(|| Error::invalid_arguments(err_msg))
}

/// Extract one positional argument if it has the right type.
pub fn extract_positional_opt<T: FromInstruction>(arg: &Instruction) -> Option<T> {
    T::from_instruction(arg)
}

/// Extract a variadic tail of arguments, flattening any arrays.
pub fn extract_variadic<T: FromInstruction>(args: &[Instruction], err_msg: &str) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if let InstructionKind::Array(elements) = &arg.kind {
            out.extend(extract_variadic(elements, err_msg)?);
        } else {
            out.push(extract_positional(arg, err_msg)?);
        }
    }
    Ok(out)
}

/// Extract a keyword argument. Absence is not an error; a wrong type is.
pub fn extract_keyword<T: FromInstruction>(
    kwargs: &HashMap<String, Instruction>,
    name: &str,
    err_msg: &str,
) -> Result<Option<T>> {
    match kwargs.get(name) {
        None => Ok(None),
        Some(value) => extract_positional(value, err_msg).map(Some),
    }
}

/// Extract a keyword argument that may be a scalar or an array of scalars; a
/// lone scalar is promoted to a one element vector.
pub fn extract_keyword_array<T: FromInstruction>(
    kwargs: &HashMap<String, Instruction>,
    name: &str,
    err_msg: &str,
) -> Result<Option<Vec<T>>> {
    let Some(value) = kwargs.get(name) else {
        return Ok(None);
    };

    if let Some(single) = T::from_instruction(value) {
        return Ok(Some(vec![single]));
    }

    if let InstructionKind::Array(elements) = &value.kind {
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            out.push(extract_positional(element, err_msg)?);
        }
        return Ok(Some(out));
    }

    Err(Error::invalid_arguments(err_msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::Instruction;

    fn string(value: &str) -> Instruction {
        Instruction::new(InstructionKind::String(value.to_owned()))
    }

    fn array(values: Vec<Instruction>) -> Instruction {
        Instruction::new(InstructionKind::Array(values))
    }

    #[test]
    fn positional_type_mismatch() {
        let arg = Instruction::new(InstructionKind::Number(3));
        let result: Result<String> = extract_positional(&arg, "must be a string");
        assert!(matches!(result, Err(Error::InvalidArguments(m)) if m == "must be a string"));
    }

    #[test]
    fn variadic_flattens_arrays() {
        let args = vec![
            string("a"),
            array(vec![string("b"), array(vec![string("c")])]),
        ];
        let values: Vec<String> = extract_variadic(&args, "strings only").unwrap();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn keyword_missing_is_absent() {
        let kwargs = HashMap::new();
        let value: Option<String> = extract_keyword(&kwargs, "version", "oops").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn keyword_array_promotes_scalars() {
        let mut kwargs = HashMap::new();
        kwargs.insert("cpp_args".to_owned(), string("-Dfoo"));
        let values: Vec<String> = extract_keyword_array(&kwargs, "cpp_args", "oops")
            .unwrap()
            .unwrap();
        assert_eq!(values, vec!["-Dfoo"]);
    }

    #[test]
    fn keyword_array_of_wrong_type_fails() {
        let mut kwargs = HashMap::new();
        kwargs.insert(
            "cpp_args".to_owned(),
            array(vec![Instruction::new(InstructionKind::Boolean(true))]),
        );
        let result: Result<Option<Vec<String>>> =
            extract_keyword_array(&kwargs, "cpp_args", "strings only");
        assert!(result.is_err());
    }
}
