//! The ninja backend: writes a build.ninja (and the serialized test list)
//! into the build root.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use itertools::Itertools;

use crate::backend::fir::{mir_to_fir, Target, TargetType};
use crate::backend::serialize_tests;
use crate::mir::state::Persistent;
use crate::mir::toolchains::Language;
use crate::mir::ControlFlowGraph;
use crate::{Error, Result};

/// Escape for ninja: spaces become `$ `, optionally quoting the whole word.
fn escape(value: &str, quote: bool) -> String {
    let mut out = String::with_capacity(value.len());
    let mut needs_quote = false;
    for c in value.chars() {
        if c == ' ' {
            out.push('$');
            needs_quote = true;
        }
        out.push(c);
    }
    if quote && needs_quote {
        out = format!("'{out}'");
    }
    out
}

fn rule_name(language: Language, target_type: TargetType) -> String {
    let kind = match target_type {
        TargetType::Compile => "compiler",
        TargetType::Archive => "archiver",
        TargetType::Link => "linker",
        TargetType::Custom => return "custom_command".to_owned(),
    };
    format!("{language}_{kind}_for_build")
}

fn write_rules(out: &mut impl Write, pstate: &Persistent) -> Result<()> {
    writeln!(out, "# Compilation rules\n")?;
    for (language, toolchain) in pstate.toolchains.iter().sorted_by_key(|(l, _)| **l) {
        let compiler = &toolchain.build().compiler;
        writeln!(out, "rule {}", rule_name(*language, TargetType::Compile))?;
        write!(out, "  command = {}", compiler.command().join(" "))?;
        write!(out, " ${{ARGS}}")?;
        for arg in compiler.generate_depfile("${out}", "$DEPFILE") {
            write!(out, " {arg}")?;
        }
        for arg in compiler.output_command("${out}") {
            write!(out, " {arg}")?;
        }
        for arg in compiler.compile_only_command() {
            write!(out, " {arg}")?;
        }
        writeln!(out, " ${{in}}")?;
        writeln!(out, "  deps = gcc")?;
        writeln!(out, "  depfile = $DEPFILE_UNQUOTED")?;
        writeln!(
            out,
            "  description = Compiling {language} object ${{out}}\n"
        )?;
    }

    writeln!(out, "# Static linking rules\n")?;
    for (language, toolchain) in pstate.toolchains.iter().sorted_by_key(|(l, _)| **l) {
        let archiver = &toolchain.build().archiver;
        writeln!(out, "rule {}", rule_name(*language, TargetType::Archive))?;
        writeln!(
            out,
            "  command = rm -f ${{out}} && {} ${{ARGS}} ${{out}} ${{in}}",
            archiver.command().join(" ")
        )?;
        writeln!(out, "  description = Linking static target ${{out}}\n")?;
    }

    writeln!(out, "# Dynamic linking rules\n")?;
    for (language, toolchain) in pstate.toolchains.iter().sorted_by_key(|(l, _)| **l) {
        let linker = &toolchain.build().linker;
        writeln!(out, "rule {}", rule_name(*language, TargetType::Link))?;
        write!(out, "  command = {} ${{ARGS}}", linker.command().join(" "))?;
        for arg in linker.output_command("${out}") {
            write!(out, " {arg}")?;
        }
        writeln!(out, " ${{in}} ${{ARGS}}")?;
        writeln!(out, "  description = Linking target ${{out}}\n")?;
    }

    writeln!(out, "rule custom_command")?;
    writeln!(out, "  command = $ARGS")?;
    writeln!(out, "  description = $DESCRIPTION")?;
    writeln!(out, "  restat = 1\n")?;

    Ok(())
}

fn write_build_rule(out: &mut impl Write, rule: &Target) -> Result<()> {
    let name = match rule.target_type {
        TargetType::Custom => "custom_command".to_owned(),
        _ => {
            let language = rule.language.ok_or_else(|| {
                Error::Internal("compiled rule without a language".to_owned())
            })?;
            rule_name(language, rule.target_type)
        }
    };

    write!(out, "build")?;
    for output in &rule.output {
        write!(out, " {}", escape(output, false))?;
    }
    write!(out, ": {name}")?;
    for input in &rule.input {
        write!(out, " {}", escape(input, false))?;
    }
    if !rule.deps.is_empty() {
        write!(out, " |")?;
        for dep in &rule.deps {
            write!(out, " {}", escape(dep, false))?;
        }
    }
    if !rule.order_deps.is_empty() {
        write!(out, " ||")?;
        for dep in &rule.order_deps {
            write!(out, " {}", escape(dep, false))?;
        }
    }
    writeln!(out)?;

    write!(out, "  ARGS =")?;
    for arg in &rule.arguments {
        write!(out, " {}", escape(arg, true))?;
    }
    writeln!(out)?;

    if rule.target_type == TargetType::Compile {
        writeln!(out, "  DEPFILE = {}.d", escape(&rule.output[0], false))?;
        writeln!(out, "  DEPFILE_UNQUOTED = {}.d", rule.output[0])?;
    }

    if rule.target_type == TargetType::Custom {
        writeln!(
            out,
            "  DESCRIPTION = generating {} with {}",
            escape(&rule.output[0], false),
            escape(rule.arguments.first().map(String::as_str).unwrap_or(""), false)
        )?;
    }
    writeln!(out)?;

    Ok(())
}

/// Write build.ninja and the test list for a fully lowered graph.
pub fn generate(cfg: &ControlFlowGraph, pstate: &Persistent) -> Result<()> {
    if !pstate.build_root.exists() {
        fs::create_dir_all(&pstate.build_root)?;
    }

    let path: PathBuf = pstate.build_root.join("build.ninja");
    let mut out = fs::File::create(path)?;

    writeln!(
        out,
        "# This is a build file for the project \"{}\".",
        pstate.name
    )?;
    writeln!(out, "# It is autogenerated by the boson build system.")?;
    writeln!(out, "# Do not edit by hand.\n")?;
    writeln!(out, "ninja_required_version = 1.8.2\n")?;

    write_rules(&mut out, pstate)?;

    writeln!(out, "# Phony build target, always out of date\n")?;
    writeln!(out, "build PHONY: phony\n")?;
    writeln!(out, "# Build rules for targets\n")?;

    let (rules, tests) = mir_to_fir(cfg.entry_block(), pstate)?;
    for rule in &rules {
        write_build_rule(&mut out, rule)?;
    }
    out.flush()?;

    serialize_tests(&tests, &pstate.build_root.join("boson-tests.txt"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::{fake_toolchain, lower as lower_source};
    use crate::mir::machines::PerMachine;

    #[test]
    fn escape_spaces() {
        assert_eq!(escape("a b", false), "a$ b");
        assert_eq!(escape("a b", true), "'a$ b'");
        assert_eq!(escape("plain", true), "plain");
    }

    #[test]
    fn generates_a_build_file() {
        let dir = tempfile::tempdir().unwrap();
        let build_root = dir.path().join("build");

        let mut cfg = lower_source("executable('exe', 'main.cpp')");
        let mut state = Persistent::new(dir.path(), &build_root);
        state.name = "testproj".to_owned();
        state.toolchains.insert(
            Language::Cpp,
            PerMachine::new(fake_toolchain(Language::Cpp)),
        );
        crate::mir::lower::lower(&mut cfg, &mut state).unwrap();

        generate(&cfg, &state).unwrap();

        let ninja = std::fs::read_to_string(build_root.join("build.ninja")).unwrap();
        assert!(ninja.contains("rule cpp_compiler_for_build"));
        assert!(ninja.contains("build exe: cpp_linker_for_build exe.p/main.cpp.o"));
        assert!(ninja.contains("testproj"));

        // The (empty) test list is written alongside
        let tests = std::fs::read_to_string(build_root.join("boson-tests.txt")).unwrap();
        assert_eq!(tests, "SERIAL_VERSION:0\n");
    }
}
