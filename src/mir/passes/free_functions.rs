//! Lowering for free standing functions (those not held by an object), and
//! the `project()` call that anchors every build file.

use std::cmp::Ordering;
use std::sync::Arc;

use colored::Colorize;

use crate::mir::arguments::{Argument, IncludeType, Type};
use crate::mir::machines::Machine;
use crate::mir::passes::extractors::{
    extract_keyword, extract_keyword_array, extract_positional, extract_variadic,
    FromInstruction, StaticLib,
};
use crate::mir::passes::walkers::function_walker;
use crate::mir::passes::all_args_reduced;
use crate::mir::state::Persistent;
use crate::mir::toolchains::{get_toolchain, Language, Toolchain};
use crate::mir::{
    AddArguments, ArgMap, BuildTarget, CustomTarget, Dependency, DependencyType, File,
    FunctionCall, IncludeDirectories, Instruction, InstructionKind, Message, MessageLevel,
    StaticLinkMode, StaticLinkage, Test, TestArg, TestExecutable,
};
use crate::mir::{BlockId, ControlFlowGraph};
use crate::{Error, Result};

fn lower_files(func: &FunctionCall, pstate: &Persistent) -> Result<Instruction> {
    let args: Vec<String> = extract_variadic(&func.pos_args, "files: arguments must be strings")?;

    let files = args
        .into_iter()
        .map(|name| {
            Instruction::new(InstructionKind::File(File::new(
                name,
                func.source_dir.clone(),
                false,
                pstate.source_root.clone(),
                pstate.build_root.clone(),
            )))
        })
        .collect();

    Ok(Instruction::new(InstructionKind::Array(files)))
}

/// Convert one source argument to a file.
///
/// Strings become files in the calling directory; files and custom targets
/// pass through as themselves.
fn src_to_file(
    raw: &Instruction,
    pstate: &Persistent,
    subdir: &std::path::Path,
) -> Result<Instruction> {
    match &raw.kind {
        InstructionKind::String(name) => Ok(Instruction::new(InstructionKind::File(File::new(
            name.clone(),
            subdir,
            false,
            pstate.source_root.clone(),
            pstate.build_root.clone(),
        )))),
        InstructionKind::File(_) | InstructionKind::CustomTarget(_) => Ok(raw.clone()),
        _ => Err(Error::invalid_arguments(
            "sources must be strings, files, or custom_target objects",
        )),
    }
}

fn lower_build_target(func: &FunctionCall, pstate: &Persistent) -> Result<BuildTarget> {
    if func.pos_args.len() < 2 {
        return Err(Error::invalid_arguments(format!(
            "{} requires at least 2 arguments",
            func.name
        )));
    }

    let name: String = extract_positional(
        &func.pos_args[0],
        &format!("{}: first argument must be a string", func.name),
    )?;

    let mut sources = Vec::with_capacity(func.pos_args.len() - 1);
    for arg in &func.pos_args[1..] {
        sources.push(src_to_file(arg, pstate, &func.source_dir)?);
    }

    let mut arguments = ArgMap::new();

    for language in [Language::C, Language::Cpp] {
        let keyword = format!("{language}_args");
        if !func.kw_args.contains_key(&keyword) {
            continue;
        }
        let Some(toolchain) = pstate.toolchains.get(&language) else {
            return Err(Error::meson(format!(
                "Tried to build a {language} target without a {language} toolchain"
            )));
        };

        let raw: Vec<String> = extract_keyword_array(
            &func.kw_args,
            &keyword,
            &format!("{}: {keyword} must be strings", func.name),
        )?
        .unwrap_or_default();

        let compiler = &toolchain.build().compiler;
        arguments
            .entry(language)
            .or_default()
            .extend(raw.iter().map(|a| compiler.generalize_argument(a)));
    }

    // Include directories and dependency arguments apply to every language
    // the target might compile
    let includes: Vec<IncludeDirectories> = extract_keyword_array(
        &func.kw_args,
        "include_directories",
        &format!(
            "{}: include_directories keyword argument must be IncludeDirectory objects",
            func.name
        ),
    )?
    .unwrap_or_default();
    for include in &includes {
        for dir in &include.directories {
            let arg = Argument::new_include(
                dir.clone(),
                if include.is_system {
                    IncludeType::System
                } else {
                    IncludeType::Base
                },
            );
            for language in pstate.toolchains.keys() {
                arguments.entry(*language).or_default().push(arg.clone());
            }
        }
    }

    let dependencies: Vec<Dependency> = extract_keyword_array(
        &func.kw_args,
        "dependencies",
        &format!(
            "{}: dependencies keyword argument must be Dependency objects",
            func.name
        ),
    )?
    .unwrap_or_default();
    for dep in &dependencies {
        for arg in &dep.arguments {
            for language in pstate.toolchains.keys() {
                arguments.entry(*language).or_default().push(arg.clone());
            }
        }
    }

    let link_with: Vec<StaticLib> = extract_keyword_array(
        &func.kw_args,
        "link_with",
        &format!(
            "{}: 'link_with' keyword argument must be StaticLibrary objects",
            func.name
        ),
    )?
    .unwrap_or_default();
    let link_static = link_with
        .into_iter()
        .map(|lib| StaticLinkage {
            mode: StaticLinkMode::Normal,
            target: Box::new(lib.0),
        })
        .collect();

    // TODO: the machine should come from the `native` keyword argument
    Ok(BuildTarget {
        name,
        sources,
        machine: Machine::Build,
        subdir: func.source_dir.clone(),
        arguments,
        link_static,
    })
}

fn lower_include_dirs(func: &FunctionCall) -> Result<Instruction> {
    let mut directories = Vec::with_capacity(func.pos_args.len());
    for arg in &func.pos_args {
        let InstructionKind::String(dir) = &arg.kind else {
            return Err(Error::invalid_arguments(
                "include_directories: all positional arguments must be strings",
            ));
        };
        directories.push(dir.clone());
    }

    let is_system = extract_keyword(
        &func.kw_args,
        "is_system",
        "include_directories: 'is_system' argument must be a boolean",
    )?
    .unwrap_or(false);

    Ok(Instruction::new(InstructionKind::IncludeDirectories(
        IncludeDirectories {
            directories,
            is_system,
        },
    )))
}

fn lower_messages(func: &FunctionCall) -> Result<Instruction> {
    let level = match func.name.as_str() {
        "message" => MessageLevel::Message,
        "warning" => MessageLevel::Warn,
        "error" => MessageLevel::Error,
        _ => unreachable!("dispatched by name"),
    };

    // Meson accepts nearly anything here; only strings are accepted until
    // the printers learn to render the other objects.
    let args: Vec<String> = extract_variadic(
        &func.pos_args,
        &format!("{}: arguments must be strings", func.name),
    )?;

    Ok(Instruction::new(InstructionKind::Message(Message {
        level,
        message: args.join(" "),
    })))
}

fn lower_assert(func: &FunctionCall) -> Result<Instruction> {
    if func.pos_args.is_empty() || func.pos_args.len() > 2 {
        return Err(Error::invalid_arguments(format!(
            "assert: takes 1 or 2 arguments, got {}",
            func.pos_args.len()
        )));
    }

    let value: bool = extract_positional(
        &func.pos_args[0],
        "assert: First argument did not resolve to boolean",
    )?;

    if !value {
        let message: String = match func.pos_args.get(1) {
            Some(arg) => extract_positional(arg, "assert: message must be a string")?,
            None => String::new(),
        };
        return Ok(Instruction::new(InstructionKind::Message(Message {
            level: MessageLevel::Error,
            message: format!("Assertion failed: {message}"),
        })));
    }

    Ok(Instruction::new(InstructionKind::Empty))
}

fn lower_not(func: &FunctionCall) -> Result<Instruction> {
    if func.pos_args.len() != 1 {
        return Err(Error::invalid_arguments(format!(
            "unary_not: takes 1 argument, got {}",
            func.pos_args.len()
        )));
    }

    let value: bool = extract_positional(
        &func.pos_args[0],
        "unary_not: attempted to negate a value that did not resolve to a boolean",
    )?;

    Ok(Instruction::new(InstructionKind::Boolean(!value)))
}

fn lower_neg(func: &FunctionCall) -> Result<Instruction> {
    if func.pos_args.len() != 1 {
        return Err(Error::invalid_arguments(format!(
            "unary_neg: takes 1 argument, got {}",
            func.pos_args.len()
        )));
    }

    let value: i64 = extract_positional(
        &func.pos_args[0],
        "unary_neg: attempted to negate a value that did not resolve to a number",
    )?;

    Ok(Instruction::new(InstructionKind::Number(-value)))
}

fn two_arguments<'f>(func: &'f FunctionCall) -> Result<(&'f Instruction, &'f Instruction)> {
    if func.pos_args.len() != 2 {
        return Err(Error::invalid_arguments(format!(
            "{}: takes 2 arguments, got {}",
            func.name,
            func.pos_args.len()
        )));
    }
    Ok((&func.pos_args[0], &func.pos_args[1]))
}

fn lower_equality(func: &FunctionCall) -> Result<Instruction> {
    let (lhs, rhs) = two_arguments(func)?;

    let equal = match (&lhs.kind, &rhs.kind) {
        (InstructionKind::String(a), InstructionKind::String(b)) => a == b,
        (InstructionKind::Number(a), InstructionKind::Number(b)) => a == b,
        (InstructionKind::Boolean(a), InstructionKind::Boolean(b)) => a == b,
        (InstructionKind::String(_), _)
        | (InstructionKind::Number(_), _)
        | (InstructionKind::Boolean(_), _)
        | (_, InstructionKind::String(_))
        | (_, InstructionKind::Number(_))
        | (_, InstructionKind::Boolean(_)) => {
            return Err(Error::invalid_arguments("Trying to compare unlike types"))
        }
        _ => {
            return Err(Error::meson(
                "Object comparison is not implemented for this type",
            ))
        }
    };

    let value = match func.name.as_str() {
        "rel_eq" => equal,
        "rel_ne" => !equal,
        _ => unreachable!("dispatched by name"),
    };

    Ok(Instruction::new(InstructionKind::Boolean(value)))
}

fn lower_relational(func: &FunctionCall) -> Result<Instruction> {
    let (lhs, rhs) = two_arguments(func)?;

    let ordering = match (&lhs.kind, &rhs.kind) {
        (InstructionKind::Number(a), InstructionKind::Number(b)) => a.cmp(b),
        (InstructionKind::String(a), InstructionKind::String(b)) => a.cmp(b),
        _ => return Err(Error::invalid_arguments("Trying to compare unlike types")),
    };

    let value = match func.name.as_str() {
        "rel_gt" => ordering == Ordering::Greater,
        "rel_ge" => ordering != Ordering::Less,
        "rel_lt" => ordering == Ordering::Less,
        "rel_le" => ordering != Ordering::Greater,
        _ => unreachable!("dispatched by name"),
    };

    Ok(Instruction::new(InstructionKind::Boolean(value)))
}

fn lower_logic(func: &FunctionCall) -> Result<Instruction> {
    let (lhs, rhs) = two_arguments(func)?;

    let (InstructionKind::Boolean(a), InstructionKind::Boolean(b)) = (&lhs.kind, &rhs.kind)
    else {
        return Err(Error::invalid_arguments(format!(
            "{}: arguments must be booleans",
            func.name
        )));
    };

    let value = match func.name.as_str() {
        "logic_and" => *a && *b,
        "logic_or" => *a || *b,
        _ => unreachable!("dispatched by name"),
    };

    Ok(Instruction::new(InstructionKind::Boolean(value)))
}

fn lower_contains(func: &FunctionCall) -> Result<Instruction> {
    let (needle, haystack) = two_arguments(func)?;

    let found = match &haystack.kind {
        InstructionKind::Array(elements) => elements.iter().any(|e| e.kind == needle.kind),
        InstructionKind::String(container) => match &needle.kind {
            InstructionKind::String(s) => container.contains(s.as_str()),
            _ => {
                return Err(Error::invalid_arguments(
                    "'in' on a string requires a string on the left",
                ))
            }
        },
        InstructionKind::Dict(entries) => match &needle.kind {
            InstructionKind::String(key) => entries.contains_key(key),
            _ => {
                return Err(Error::invalid_arguments(
                    "'in' on a dict requires a string key",
                ))
            }
        },
        _ => {
            return Err(Error::invalid_arguments(
                "'in' requires an array, dict, or string on the right",
            ))
        }
    };

    let value = match func.name.as_str() {
        "contains" => found,
        "not_contains" => !found,
        _ => unreachable!("dispatched by name"),
    };

    Ok(Instruction::new(InstructionKind::Boolean(value)))
}

/// The compiler whose argument classifier handles raw compile args
fn classifying_toolchain(pstate: &Persistent) -> Option<&Arc<Toolchain>> {
    pstate
        .toolchains
        .get(&Language::Cpp)
        .or_else(|| pstate.toolchains.get(&Language::C))
        .map(|per| per.build())
}

enum StringOrInclude {
    String(String),
    Include(IncludeDirectories),
}

impl FromInstruction for StringOrInclude {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::String(value) => Some(Self::String(value.clone())),
            InstructionKind::IncludeDirectories(value) => Some(Self::Include(value.clone())),
            _ => None,
        }
    }
}

fn lower_declare_dependency(func: &FunctionCall, pstate: &Persistent) -> Result<Instruction> {
    if !func.pos_args.is_empty() {
        return Err(Error::invalid_arguments(
            "declare_dependency: takes 0 positional arguments.",
        ));
    }

    let version: String = extract_keyword(
        &func.kw_args,
        "version",
        "declare_dependency: 'version' keyword argument must be a string",
    )?
    .unwrap_or_else(|| "unknown".to_owned());

    let mut arguments = Vec::new();

    let raw_compile_args: Option<Vec<String>> = extract_keyword_array(
        &func.kw_args,
        "compile_args",
        "declare_dependency: 'compile_args' keyword argument must be strings",
    )?;
    if let Some(raw) = raw_compile_args {
        let Some(toolchain) = classifying_toolchain(pstate) else {
            return Err(Error::meson(
                "declare_dependency: 'compile_args' requires a registered toolchain",
            ));
        };
        arguments.extend(raw.iter().map(|a| toolchain.compiler.generalize_argument(a)));
    }

    let includes: Vec<StringOrInclude> = extract_keyword_array(
        &func.kw_args,
        "include_directories",
        "declare_dependency: 'include_directories' must be strings or IncludeDirectories objects",
    )?
    .unwrap_or_default();
    for include in includes {
        match include {
            StringOrInclude::String(dir) => {
                arguments.push(Argument::new_include(dir, IncludeType::Base))
            }
            StringOrInclude::Include(include) => {
                let include_type = if include.is_system {
                    IncludeType::System
                } else {
                    IncludeType::Base
                };
                arguments.extend(
                    include
                        .directories
                        .iter()
                        .map(|d| Argument::new_include(d.clone(), include_type)),
                );
            }
        }
    }

    let dependencies: Vec<Dependency> = extract_keyword_array(
        &func.kw_args,
        "dependencies",
        "declare_dependency: 'dependencies' keyword argument must be Dependency objects",
    )?
    .unwrap_or_default();
    for dep in dependencies {
        // Nested dependencies flatten their arguments into this one
        arguments.extend(dep.arguments);
    }

    Ok(Instruction::new(InstructionKind::Dependency(Dependency {
        name: "internal".to_owned(),
        found: true,
        version,
        arguments,
        dep_type: DependencyType::Internal,
    })))
}

fn extract_source_inputs(func: &FunctionCall, pstate: &Persistent) -> Result<Vec<Instruction>> {
    let Some(raw) = func.kw_args.get("input") else {
        return Ok(Vec::new());
    };

    let mut inputs = Vec::new();
    if let InstructionKind::Array(elements) = &raw.kind {
        for element in elements {
            inputs.push(src_to_file(element, pstate, &func.source_dir)?);
        }
    } else {
        inputs.push(src_to_file(raw, pstate, &func.source_dir)?);
    }

    Ok(inputs)
}

fn command_entry(
    entry: &Instruction,
    inputs: &[Instruction],
    outputs: &[File],
) -> Result<Vec<String>> {
    match &entry.kind {
        InstructionKind::String(value) => {
            if value == "@OUTPUT@" {
                return Ok(outputs
                    .iter()
                    .map(|o| o.relative_to_build_dir().display().to_string())
                    .collect());
            }
            if let Some(index) = value
                .strip_prefix("@OUTPUT")
                .and_then(|v| v.strip_suffix('@'))
                .and_then(|v| v.parse::<usize>().ok())
            {
                let output = outputs.get(index).ok_or_else(|| {
                    Error::invalid_arguments(format!(
                        "custom_target: output index {index} is out of range"
                    ))
                })?;
                return Ok(vec![output.relative_to_build_dir().display().to_string()]);
            }
            if value == "@INPUT@" {
                let mut out = Vec::new();
                for input in inputs {
                    match &input.kind {
                        InstructionKind::File(file) => {
                            out.push(file.relative_to_build_dir().display().to_string())
                        }
                        InstructionKind::CustomTarget(target) => out.extend(
                            target
                                .outputs
                                .iter()
                                .map(|o| o.relative_to_build_dir().display().to_string()),
                        ),
                        _ => {}
                    }
                }
                return Ok(out);
            }
            if let Some(index) = value
                .strip_prefix("@INPUT")
                .and_then(|v| v.strip_suffix('@'))
                .and_then(|v| v.parse::<usize>().ok())
            {
                let input = inputs.get(index).ok_or_else(|| {
                    Error::invalid_arguments(format!(
                        "custom_target: input index {index} is out of range"
                    ))
                })?;
                return match &input.kind {
                    InstructionKind::File(file) => {
                        Ok(vec![file.relative_to_build_dir().display().to_string()])
                    }
                    InstructionKind::CustomTarget(target) => Ok(target
                        .outputs
                        .iter()
                        .map(|o| o.relative_to_build_dir().display().to_string())
                        .collect()),
                    _ => Err(Error::invalid_arguments(
                        "custom_target: indexed input is not a file",
                    )),
                };
            }
            Ok(vec![value.clone()])
        }
        InstructionKind::File(file) => {
            Ok(vec![file.relative_to_build_dir().display().to_string()])
        }
        InstructionKind::Program(program) => Ok(vec![program.path.display().to_string()]),
        _ => Err(Error::invalid_arguments(
            "custom_target: 'command' must be strings, files, or find_program objects",
        )),
    }
}

fn extract_ct_command(
    func: &FunctionCall,
    inputs: &[Instruction],
    outputs: &[File],
) -> Result<Vec<String>> {
    let Some(raw) = func.kw_args.get("command") else {
        return Err(Error::meson("custom_target: missing required kwarg 'command'"));
    };

    let mut command = Vec::new();
    if let InstructionKind::Array(elements) = &raw.kind {
        for element in elements {
            command.extend(command_entry(element, inputs, outputs)?);
        }
    } else {
        command.extend(command_entry(raw, inputs, outputs)?);
    }

    Ok(command)
}

fn lower_custom_target(func: &FunctionCall, pstate: &Persistent) -> Result<Instruction> {
    let inputs = extract_source_inputs(func, pstate)?;

    let raw_outputs: Vec<String> = extract_keyword_array(
        &func.kw_args,
        "output",
        "custom_target: output arguments must be strings",
    )?
    .ok_or_else(|| Error::meson("custom_target: missing required kwarg 'output'"))?;
    let outputs: Vec<File> = raw_outputs
        .into_iter()
        .map(|name| {
            File::new(
                name,
                func.source_dir.clone(),
                true,
                pstate.source_root.clone(),
                pstate.build_root.clone(),
            )
        })
        .collect();

    let name = match func.pos_args.first() {
        Some(arg) => match String::from_instruction(arg) {
            Some(name) => name,
            None => outputs[0].name.clone(),
        },
        None => outputs[0].name.clone(),
    };

    let command = extract_ct_command(func, &inputs, &outputs)?;

    Ok(Instruction::new(InstructionKind::CustomTarget(Box::new(
        CustomTarget {
            name,
            inputs,
            outputs,
            command,
            subdir: func.source_dir.clone(),
        },
    ))))
}

enum TestArgSource {
    String(String),
    File(File),
    Target(CustomTarget),
}

impl FromInstruction for TestArgSource {
    fn from_instruction(instruction: &Instruction) -> Option<Self> {
        match &instruction.kind {
            InstructionKind::String(value) => Some(Self::String(value.clone())),
            InstructionKind::File(value) => Some(Self::File(value.clone())),
            InstructionKind::CustomTarget(value) => Some(Self::Target((**value).clone())),
            _ => None,
        }
    }
}

fn lower_test(func: &FunctionCall) -> Result<Instruction> {
    if func.pos_args.len() != 2 {
        return Err(Error::invalid_arguments("test: takes 2 positional arguments."));
    }

    let name: String =
        extract_positional(&func.pos_args[0], "test: first argument must be a string")?;

    let executable = match &func.pos_args[1].kind {
        InstructionKind::File(file) => TestExecutable::File(file.clone()),
        InstructionKind::Executable(target) => TestExecutable::Executable((**target).clone()),
        InstructionKind::Program(program) => TestExecutable::Program(program.clone()),
        _ => {
            return Err(Error::invalid_arguments(
                "test: second argument must be a File, Executable, or Found Program",
            ))
        }
    };

    let raw_args: Vec<TestArgSource> = extract_keyword_array(
        &func.kw_args,
        "args",
        "test: 'args' keyword arguments must be strings, files, or custom_target objects",
    )?
    .unwrap_or_default();
    let mut arguments = Vec::with_capacity(raw_args.len());
    for arg in raw_args {
        match arg {
            TestArgSource::String(value) => arguments.push(TestArg::String(value)),
            TestArgSource::File(file) => arguments.push(TestArg::File(file)),
            TestArgSource::Target(target) => {
                arguments.extend(target.outputs.into_iter().map(TestArg::File))
            }
        }
    }

    let should_fail = extract_keyword(
        &func.kw_args,
        "should_fail",
        "test: 'should_fail' argument must be a boolean",
    )?
    .unwrap_or(false);

    Ok(Instruction::new(InstructionKind::Test(Box::new(Test {
        name,
        executable,
        arguments,
        should_fail,
    }))))
}

fn lower_add_arguments(func: &FunctionCall, pstate: &Persistent) -> Result<Instruction> {
    let languages: Vec<String> = extract_keyword_array(
        &func.kw_args,
        "language",
        &format!("{}: 'language' keyword argument must be strings", func.name),
    )?
    .ok_or_else(|| {
        Error::meson(format!("{}: missing required kwarg 'language'", func.name))
    })?;

    let arguments: Vec<String> = extract_variadic(
        &func.pos_args,
        &format!("{}: positional arguments must be strings", func.name),
    )?;
    // Adding no arguments is allowed; the node just disappears
    if arguments.is_empty() {
        return Ok(Instruction::new(InstructionKind::Empty));
    }

    let mut mapping = ArgMap::new();
    for language in &languages {
        let language = Language::from_string(language)?;
        if let Some(toolchain) = pstate.toolchains.get(&language) {
            let compiler = &toolchain.build().compiler;
            mapping.insert(
                language,
                arguments
                    .iter()
                    .map(|a| compiler.generalize_argument(a))
                    .collect(),
            );
        }
    }

    Ok(Instruction::new(InstructionKind::AddArguments(
        AddArguments {
            arguments: mapping,
            is_global: func.name.starts_with("add_global"),
        },
    )))
}

fn lower_free_funcs_impl(
    instruction: &Instruction,
    pstate: &Persistent,
) -> Result<Option<Instruction>> {
    let InstructionKind::FunctionCall(func) = &instruction.kind else {
        return Ok(None);
    };

    // Methods are someone else's job
    if func.holder.is_some() {
        return Ok(None);
    }

    if !all_args_reduced(&func.pos_args, &func.kw_args) {
        return Ok(None);
    }

    let lowered = match func.name.as_str() {
        "rel_eq" | "rel_ne" => lower_equality(func)?,
        "rel_gt" | "rel_ge" | "rel_lt" | "rel_le" => lower_relational(func)?,
        "logic_and" | "logic_or" => lower_logic(func)?,
        "contains" | "not_contains" => lower_contains(func)?,
        "unary_not" => lower_not(func)?,
        "unary_neg" => lower_neg(func)?,
        "assert" => lower_assert(func)?,
        "message" | "warning" | "error" => lower_messages(func)?,
        "include_directories" => lower_include_dirs(func)?,
        "files" => lower_files(func, pstate)?,
        "custom_target" => lower_custom_target(func, pstate)?,
        "executable" => Instruction::new(InstructionKind::Executable(Box::new(
            lower_build_target(func, pstate)?,
        ))),
        "static_library" => Instruction::new(InstructionKind::StaticLibrary(Box::new(
            lower_build_target(func, pstate)?,
        ))),
        "declare_dependency" => lower_declare_dependency(func, pstate)?,
        "test" => lower_test(func)?,
        "add_project_arguments"
        | "add_global_arguments"
        | "add_project_link_arguments"
        | "add_global_link_arguments" => lower_add_arguments(func, pstate)?,
        // These need the host machine and are resolved by the threaded pass
        "find_program" | "dependency" => return Ok(None),
        // Arithmetic belongs to constant folding
        name if name.starts_with("arith_") => return Ok(None),
        name => return Err(Error::meson(format!("Unexpected function name: {name}"))),
    };

    Ok(Some(lowered))
}

pub fn lower_free_functions(
    cfg: &mut ControlFlowGraph,
    id: BlockId,
    pstate: &Persistent,
) -> Result<bool> {
    let Some(block) = cfg.blocks.get_mut(&id) else {
        return Ok(false);
    };

    function_walker(block, &mut |instruction: &Instruction| {
        lower_free_funcs_impl(instruction, pstate)
    })
}

/// Consume the `project()` call that must open the build description,
/// recording the project name and detecting a toolchain for each requested
/// language.
pub fn lower_project(cfg: &mut ControlFlowGraph, pstate: &mut Persistent) -> Result<()> {
    const WRONG_OPENER: &str =
        "First non-whitespace, non-comment statement must be a call to project()";

    let entry = cfg.entry_block();
    let Some(instruction) = entry.instructions.first() else {
        return Err(Error::meson(WRONG_OPENER));
    };
    let InstructionKind::FunctionCall(func) = &instruction.kind else {
        return Err(Error::meson(WRONG_OPENER));
    };
    if func.name != "project" || func.holder.is_some() {
        return Err(Error::meson(WRONG_OPENER));
    }

    if func.pos_args.is_empty() {
        return Err(Error::invalid_arguments("project requires at least 1 argument"));
    }

    let name: String = extract_positional(
        &func.pos_args[0],
        "project: first argument must be a string",
    )?;
    println!("Project name: {}", name.bold());
    pstate.name = name;

    let languages: Vec<String> = extract_variadic(
        &func.pos_args[1..],
        "project: Language arguments must be strings",
    )?;
    for language in languages {
        let language = Language::from_string(&language)?;
        if pstate.toolchains.contains_key(&language) {
            continue;
        }

        // TODO: also the host machine, once there is a machine file
        let toolchain = get_toolchain(language, Machine::Build)?;
        println!(
            "{language} compiler for the build machine: {}",
            toolchain.compiler.id().bold()
        );
        println!(
            "{language} linker for the build machine: {}",
            toolchain.linker.id().bold()
        );
        pstate.toolchains.insert(
            language,
            crate::mir::machines::PerMachine::new(Arc::new(toolchain)),
        );
    }

    let version: Option<String> = extract_keyword(
        &func.kw_args,
        "version",
        "project: 'version' must be a string",
    )?;
    if let Some(version) = version {
        pstate.version = version;
    }

    // Remove the project() call so the later sweep for unknown calls doesn't
    // trip over it
    cfg.entry_block_mut().instructions.remove(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::{lower, pstate, pstate_with_cpp};
    use crate::mir::passes::walkers::block_walker;

    fn run(cfg: &mut ControlFlowGraph, state: &Persistent) -> bool {
        block_walker(cfg, &mut [&mut |cfg, id| {
            lower_free_functions(cfg, id, state)
        }])
        .unwrap()
    }

    #[test]
    fn files_become_an_array_of_files() {
        let mut cfg = lower("x = files('foo.c')");
        let state = pstate();
        assert!(run(&mut cfg, &state));

        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 1);
        let InstructionKind::Array(elements) = &entry.instructions[0].kind else {
            panic!("expected an array");
        };
        assert_eq!(elements.len(), 1);
        let InstructionKind::File(file) = &elements[0].kind else {
            panic!("expected a file");
        };
        assert_eq!(file.get_name(), "foo.c");
        assert!(!file.is_built());
    }

    #[test]
    fn messages() {
        let mut cfg = lower("message('foo')\nwarning('foo', 'bar')");
        let state = pstate();
        run(&mut cfg, &state);

        let entry = cfg.entry_block();
        let InstructionKind::Message(message) = &entry.instructions[0].kind else {
            panic!("expected a message");
        };
        assert_eq!(message.level, MessageLevel::Message);
        assert_eq!(message.message, "foo");

        let InstructionKind::Message(warning) = &entry.instructions[1].kind else {
            panic!("expected a message");
        };
        assert_eq!(warning.level, MessageLevel::Warn);
        assert_eq!(warning.message, "foo bar");
    }

    #[test]
    fn assert_false_becomes_an_error() {
        let mut cfg = lower("assert(false)");
        let state = pstate();
        run(&mut cfg, &state);

        let entry = cfg.entry_block();
        let InstructionKind::Message(message) = &entry.instructions[0].kind else {
            panic!("expected a message");
        };
        assert_eq!(message.level, MessageLevel::Error);
        assert_eq!(message.message, "Assertion failed: ");
    }

    #[test]
    fn assert_true_becomes_empty() {
        let mut cfg = lower("assert(true, 'fine')");
        let state = pstate();
        run(&mut cfg, &state);
        assert_eq!(
            cfg.entry_block().instructions[0].kind,
            InstructionKind::Empty
        );
    }

    #[test]
    fn unary_not_on_a_constant() {
        let mut cfg = lower("x = not false");
        let state = pstate();
        run(&mut cfg, &state);
        assert_eq!(
            cfg.entry_block().instructions[0].kind,
            InstructionKind::Boolean(true)
        );
    }

    #[test]
    fn equality_on_unlike_types_is_an_error() {
        let mut cfg = lower("x = 7 == 'seven'");
        let state = pstate();
        let result = block_walker(&mut cfg, &mut [&mut |cfg, id| {
            lower_free_functions(cfg, id, &state)
        }]);
        assert!(matches!(result, Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn executable_with_cpp_args() {
        let mut cfg = lower("x = executable('exe', 'source.c', cpp_args : ['-Dfoo'])");
        let state = pstate_with_cpp();
        assert!(run(&mut cfg, &state));

        let entry = cfg.entry_block();
        let InstructionKind::Executable(target) = &entry.instructions[0].kind else {
            panic!("expected an executable");
        };
        assert_eq!(target.name, "exe");
        assert_eq!(target.sources.len(), 1);

        let args = &target.arguments[&Language::Cpp];
        assert_eq!(args.len(), 1);
        assert_eq!(args[0], Argument::new("foo", Type::Define));
    }

    #[test]
    fn static_library_shape() {
        let mut cfg = lower("x = static_library('lib', 'source.c', cpp_args : '-Dfoo')");
        let state = pstate_with_cpp();
        run(&mut cfg, &state);

        let entry = cfg.entry_block();
        let InstructionKind::StaticLibrary(target) = &entry.instructions[0].kind else {
            panic!("expected a static library");
        };
        assert_eq!(target.name, "lib");
        assert_eq!(
            target.arguments[&Language::Cpp][0],
            Argument::new("foo", Type::Define)
        );
    }

    #[test]
    fn executable_without_a_toolchain_is_an_error() {
        let mut cfg = lower("x = executable('exe', 'a.c', cpp_args : '-Dfoo')");
        let state = pstate();
        let result = block_walker(&mut cfg, &mut [&mut |cfg, id| {
            lower_free_functions(cfg, id, &state)
        }]);
        assert!(matches!(result, Err(Error::Meson(_))));
    }

    #[test]
    fn declare_dependency_flattens_nested_dependencies() {
        let mut cfg = lower(
            "x = declare_dependency(compile_args : '-Dfoo', version : '1.0')",
        );
        let state = pstate_with_cpp();
        run(&mut cfg, &state);

        let entry = cfg.entry_block();
        let InstructionKind::Dependency(dep) = &entry.instructions[0].kind else {
            panic!("expected a dependency");
        };
        assert_eq!(dep.name, "internal");
        assert!(dep.found);
        assert_eq!(dep.version, "1.0");
        assert_eq!(dep.arguments.len(), 1);
        assert_eq!(dep.dep_type, DependencyType::Internal);
    }

    #[test]
    fn custom_target_output_substitution() {
        let mut cfg = lower(
            "custom_target('gen', input : 'in.txt', output : 'out.c', command : ['@INPUT@', '@OUTPUT@'])",
        );
        let state = pstate();
        run(&mut cfg, &state);

        let entry = cfg.entry_block();
        let InstructionKind::CustomTarget(target) = &entry.instructions[0].kind else {
            panic!("expected a custom target, got {:?}", entry.instructions[0]);
        };
        assert_eq!(target.name, "gen");
        assert_eq!(target.outputs.len(), 1);
        // @INPUT@ resolves relative to the build dir, @OUTPUT@ stays inside it
        assert_eq!(target.command.len(), 2);
        assert!(target.command[0].ends_with("in.txt"));
        assert_eq!(target.command[1], "out.c");
    }

    #[test]
    fn add_project_arguments_without_language_is_an_error() {
        let mut cfg = lower("add_project_arguments('-Dfoo')");
        let state = pstate_with_cpp();
        let result = block_walker(&mut cfg, &mut [&mut |cfg, id| {
            lower_free_functions(cfg, id, &state)
        }]);
        assert!(matches!(result, Err(Error::Meson(_))));
    }

    #[test]
    fn add_project_arguments_collects_per_language() {
        let mut cfg = lower("add_project_arguments('-Dfoo', language : 'cpp')");
        let state = pstate_with_cpp();
        run(&mut cfg, &state);

        let entry = cfg.entry_block();
        let InstructionKind::AddArguments(args) = &entry.instructions[0].kind else {
            panic!("expected add_arguments, got {:?}", entry.instructions[0]);
        };
        assert!(!args.is_global);
        assert_eq!(args.arguments[&Language::Cpp].len(), 1);
    }

    #[test]
    fn unknown_functions_are_an_error_once_reduced() {
        let mut cfg = lower("frobnicate('a')");
        let state = pstate();
        let result = block_walker(&mut cfg, &mut [&mut |cfg, id| {
            lower_free_functions(cfg, id, &state)
        }]);
        assert!(matches!(result, Err(Error::Meson(m)) if m.contains("frobnicate")));
    }

    #[test]
    fn unreduced_arguments_wait() {
        let mut cfg = lower("message(x)");
        let state = pstate();
        let progress = run(&mut cfg, &state);
        assert!(!progress);
    }

    #[test]
    fn project_records_name_and_version() {
        let mut cfg = lower("project('foo', version : '1.2')\nx = 7");
        let mut state = pstate();
        lower_project(&mut cfg, &mut state).unwrap();

        assert_eq!(state.name, "foo");
        assert_eq!(state.version, "1.2");
        // The call is consumed
        assert_eq!(cfg.entry_block().instructions.len(), 1);
    }

    #[test]
    fn project_must_come_first() {
        let mut cfg = lower("x = 7\nproject('foo')");
        let mut state = pstate();
        assert!(lower_project(&mut cfg, &mut state).is_err());
    }
}
