//! The flat rule IR: one record per thing the generated build file will do.
//!
//! `mir_to_fir` walks the fully lowered entry block and turns every target
//! object into compile/link/archive/custom records the ninja writer can emit
//! without knowing anything about MIR.

use std::path::{Path, PathBuf};

use crate::backend::Test;
use crate::mir::arguments::Argument;
use crate::mir::machines::Machine;
use crate::mir::state::Persistent;
use crate::mir::toolchains::compiler::CanCompile;
use crate::mir::toolchains::Language;
use crate::mir::{
    ArgMap, BasicBlock, BuildTarget, CustomTarget, InstructionKind, TestArg, TestExecutable,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Compile,
    Archive,
    Link,
    Custom,
}

/// One rule to be written out
#[derive(Debug, Clone)]
pub struct Target {
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub target_type: TargetType,
    pub language: Option<Language>,
    pub machine: Machine,
    pub arguments: Vec<String>,
    pub deps: Vec<String>,
    pub order_deps: Vec<String>,
}

/// Arguments accumulated outside the targets (add_project_arguments and
/// friends), merged ahead of each target's own.
#[derive(Default)]
struct State {
    arguments: ArgMap,
}

fn specialize(
    language: Language,
    arguments: &[Argument],
    pstate: &Persistent,
) -> Result<Vec<String>> {
    let Some(toolchain) = pstate.toolchains.get(&language) else {
        return Err(Error::meson(format!(
            "No {language} toolchain registered; did project() list it?"
        )));
    };
    let compiler = &toolchain.build().compiler;

    let mut out = Vec::new();
    for argument in arguments {
        out.extend(compiler.specialize_argument(
            argument,
            &pstate.source_root,
            &pstate.build_root,
        ));
    }
    Ok(out)
}

/// Which registered language compiles this file, if any
fn language_for(name: &str, pstate: &Persistent) -> Option<Language> {
    // Prefer the more specific language so foo.cpp goes to the C++ compiler
    // even when C is also registered
    for language in [Language::Cpp, Language::C] {
        if let Some(toolchain) = pstate.toolchains.get(&language) {
            if toolchain.build().compiler.supports_file(name) == CanCompile::Source {
                return Some(language);
            }
        }
    }
    None
}

fn object_path(target_name: &str, source: &str) -> String {
    let mut path = PathBuf::from(format!("{target_name}.p"));
    path.push(format!(
        "{}.o",
        Path::new(source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(source)
    ));
    path.display().to_string()
}

fn target_rules(
    target: &BuildTarget,
    archive: bool,
    state: &State,
    pstate: &Persistent,
) -> Result<Vec<Target>> {
    let mut rules = Vec::new();

    // Headers produced by custom targets must exist before we compile
    let mut order_deps = Vec::new();
    for source in &target.sources {
        if let InstructionKind::CustomTarget(custom) = &source.kind {
            for output in &custom.outputs {
                let name = output.get_name().to_owned();
                if language_for(&name, pstate).is_none() {
                    order_deps.push(output.relative_to_build_dir().display().to_string());
                }
            }
        }
    }

    let mut compile_one = |path: String,
                           language: Language,
                           deps: Vec<String>,
                           rules: &mut Vec<Target>|
     -> Result<()> {
        let mut arguments = Vec::new();
        if let Some(args) = state.arguments.get(&language) {
            arguments.extend(specialize(language, args, pstate)?);
        }
        if let Some(args) = target.arguments.get(&language) {
            arguments.extend(specialize(language, args, pstate)?);
        }
        // The target's own directory is always searchable
        arguments.extend(specialize(
            language,
            &[Argument::new_include(
                target.subdir.display().to_string(),
                crate::mir::arguments::IncludeType::Base,
            )],
            pstate,
        )?);
        arguments.extend(
            pstate.toolchains[&language].build().compiler.always_args(),
        );

        rules.push(Target {
            output: vec![object_path(&target.name, &path)],
            input: vec![path],
            target_type: TargetType::Compile,
            language: Some(language),
            machine: target.machine,
            arguments,
            deps,
            order_deps: order_deps.clone(),
        });
        Ok(())
    };

    for source in &target.sources {
        match &source.kind {
            InstructionKind::File(file) => {
                let name = file.get_name().to_owned();
                if let Some(language) = language_for(&name, pstate) {
                    let path = file.relative_to_build_dir().display().to_string();
                    compile_one(path, language, Vec::new(), &mut rules)?;
                }
            }
            InstructionKind::CustomTarget(custom) => {
                for output in &custom.outputs {
                    let name = output.get_name().to_owned();
                    if let Some(language) = language_for(&name, pstate) {
                        let path = output.relative_to_build_dir().display().to_string();
                        compile_one(path.clone(), language, vec![path], &mut rules)?;
                    }
                }
            }
            _ => {}
        }
    }

    let link_language = rules
        .iter()
        .filter_map(|r| r.language)
        .max_by_key(|l| match l {
            Language::Cpp => 1,
            Language::C => 0,
        })
        .or_else(|| {
            [Language::Cpp, Language::C]
                .into_iter()
                .find(|l| pstate.toolchains.contains_key(l))
        })
        .ok_or_else(|| {
            Error::meson(format!(
                "Cannot link target {} without any toolchain",
                target.name
            ))
        })?;

    let mut final_inputs: Vec<String> = rules.iter().flat_map(|r| r.output.clone()).collect();
    for linkage in &target.link_static {
        final_inputs.push(format!("{}.a", linkage.target.name));
    }

    let toolchain = pstate.toolchains[&link_language].build();
    let (target_type, output, arguments) = if archive {
        (
            TargetType::Archive,
            format!("{}.a", target.name),
            toolchain.archiver.always_args(),
        )
    } else {
        (
            TargetType::Link,
            target.name.clone(),
            toolchain.linker.always_args(),
        )
    };

    rules.push(Target {
        input: final_inputs,
        output: vec![output],
        target_type,
        language: Some(link_language),
        machine: target.machine,
        arguments,
        deps: Vec::new(),
        order_deps: Vec::new(),
    });

    Ok(rules)
}

fn custom_target_rule(target: &CustomTarget) -> Target {
    let mut inputs = Vec::new();
    for input in &target.inputs {
        match &input.kind {
            InstructionKind::File(file) => {
                inputs.push(file.relative_to_build_dir().display().to_string())
            }
            InstructionKind::CustomTarget(nested) => inputs.extend(
                nested
                    .outputs
                    .iter()
                    .map(|o| o.relative_to_build_dir().display().to_string()),
            ),
            _ => {}
        }
    }

    Target {
        input: inputs,
        output: target
            .outputs
            .iter()
            .map(|o| o.relative_to_build_dir().display().to_string())
            .collect(),
        target_type: TargetType::Custom,
        language: None,
        machine: Machine::Build,
        arguments: target.command.clone(),
        deps: Vec::new(),
        order_deps: Vec::new(),
    }
}

fn test_record(test: &crate::mir::Test) -> Test {
    let exe = match &test.executable {
        TestExecutable::File(file) => file.relative_to_build_dir(),
        TestExecutable::Executable(target) => target.subdir.join(&target.name),
        TestExecutable::Program(program) => program.path.clone(),
    };

    let arguments = test
        .arguments
        .iter()
        .map(|arg| match arg {
            TestArg::String(value) => value.clone(),
            TestArg::File(file) => file.relative_to_build_dir().display().to_string(),
        })
        .collect();

    Test {
        name: test.name.clone(),
        exe,
        arguments,
        should_fail: test.should_fail,
    }
}

/// Turn the lowered entry block into flat rules and test records.
pub fn mir_to_fir(block: &BasicBlock, pstate: &Persistent) -> Result<(Vec<Target>, Vec<Test>)> {
    let mut state = State::default();

    // Argument-bearing nodes first, so targets defined earlier in the file
    // still see arguments added later
    for instruction in &block.instructions {
        if let InstructionKind::AddArguments(args) = &instruction.kind {
            for (language, arguments) in &args.arguments {
                let merged = state.arguments.entry(*language).or_default();
                merged.splice(0..0, arguments.iter().cloned());
            }
        }
    }

    let mut rules = Vec::new();
    let mut tests = Vec::new();

    for instruction in &block.instructions {
        match &instruction.kind {
            InstructionKind::Executable(target) => {
                rules.extend(target_rules(target, false, &state, pstate)?)
            }
            InstructionKind::StaticLibrary(target) => {
                rules.extend(target_rules(target, true, &state, pstate)?)
            }
            InstructionKind::CustomTarget(target) => rules.push(custom_target_rule(target)),
            InstructionKind::Test(test) => tests.push(test_record(test)),
            _ => {}
        }
    }

    Ok((rules, tests))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::{lower as lower_source, pstate_with_cpp};

    fn resolve(source: &str) -> (Vec<Target>, Vec<Test>, Persistent) {
        let mut cfg = lower_source(source);
        let mut state = pstate_with_cpp();
        crate::mir::lower::lower(&mut cfg, &mut state).unwrap();
        let (rules, tests) = mir_to_fir(cfg.entry_block(), &state).unwrap();
        (rules, tests, state)
    }

    #[test]
    fn executable_produces_compile_and_link_rules() {
        let (rules, _, _) = resolve("executable('exe', 'main.cpp')");
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0].target_type, TargetType::Compile);
        assert!(rules[0].input[0].ends_with("main.cpp"));
        assert_eq!(rules[0].output[0], "exe.p/main.cpp.o");

        assert_eq!(rules[1].target_type, TargetType::Link);
        assert_eq!(rules[1].output[0], "exe");
        assert_eq!(rules[1].input, rules[0].output);
    }

    #[test]
    fn static_library_archives() {
        let (rules, _, _) = resolve("static_library('helper', 'helper.cpp')");
        assert_eq!(rules.last().unwrap().target_type, TargetType::Archive);
        assert_eq!(rules.last().unwrap().output[0], "helper.a");
    }

    #[test]
    fn link_with_adds_the_archive_to_the_link() {
        let (rules, _, _) = resolve(
            "lib = static_library('helper', 'helper.cpp')\nexecutable('exe', 'main.cpp', link_with : lib)",
        );
        let link = rules
            .iter()
            .find(|r| r.target_type == TargetType::Link)
            .unwrap();
        assert!(link.input.contains(&"helper.a".to_owned()));
    }

    #[test]
    fn project_arguments_come_before_target_arguments() {
        let (rules, _, _) = resolve(
            "add_project_arguments('-Dglobal', language : 'cpp')\nexecutable('exe', 'main.cpp', cpp_args : '-Dlocal')",
        );
        let compile = rules
            .iter()
            .find(|r| r.target_type == TargetType::Compile)
            .unwrap();
        let global = compile.arguments.iter().position(|a| a.contains("global"));
        let local = compile.arguments.iter().position(|a| a.contains("local"));
        assert!(global.unwrap() < local.unwrap());
    }

    #[test]
    fn tests_are_recorded() {
        let (_, tests, _) = resolve(
            "exe = executable('exe', 'main.cpp')\ntest('smoke', exe, should_fail : true)",
        );
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].name, "smoke");
        assert_eq!(tests[0].exe, PathBuf::from("exe"));
        assert!(tests[0].should_fail);
    }

    #[test]
    fn custom_targets_become_custom_rules() {
        let mut cfg = lower_source(
            "custom_target('gen', input : 'in.txt', output : 'out.c', command : ['tool', '@INPUT@', '@OUTPUT@'])",
        );
        let mut state = pstate_with_cpp();
        state
            .programs
            .build_mut()
            .insert("tool".to_owned(), "/usr/bin/tool".into());
        crate::mir::lower::lower(&mut cfg, &mut state).unwrap();

        let (rules, _) = mir_to_fir(cfg.entry_block(), &state).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].target_type, TargetType::Custom);
        assert_eq!(rules[0].output, vec!["out.c".to_owned()]);
        assert_eq!(rules[0].arguments[0], "/usr/bin/tool");
    }
}
