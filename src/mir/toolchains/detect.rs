//! Toolchain detection by probing candidate binaries.
//!
//! Detection is idempotent: running a probe twice gives the same answer, and
//! results are cached in the persistent state's toolchain table.

use crate::mir::machines::Machine;
use crate::mir::toolchains::{archiver, compiler, linker, Archiver, Compiler, Language, Linker};
use crate::util::process;
use crate::{Error, Result};

const DEFAULT_C: &[&str] = &["cc", "gcc", "clang"];
const DEFAULT_CPP: &[&str] = &["c++", "g++", "clang++"];

fn candidates(language: Language, bins: &[String]) -> Vec<String> {
    if !bins.is_empty() {
        return bins.to_vec();
    }

    let (env_var, defaults) = match language {
        Language::C => ("CC", DEFAULT_C),
        Language::Cpp => ("CXX", DEFAULT_CPP),
    };

    let mut out = Vec::new();
    if let Ok(binary) = std::env::var(env_var) {
        if !binary.is_empty() {
            out.push(binary);
        }
    }
    out.extend(defaults.iter().map(|s| (*s).to_owned()));
    out
}

/// Classify a compiler from its `--version` output.
fn classify_compiler(
    language: Language,
    binary: &str,
    output: &str,
) -> Option<Box<dyn Compiler>> {
    let command = vec![binary.to_owned()];

    if output.contains("Free Software Foundation") {
        return Some(Box::new(compiler::Gnu::new(command, language)));
    }
    if output.contains("clang version") || output.contains("Apple clang") {
        return Some(Box::new(compiler::Clang::new(command, language)));
    }
    None
}

pub fn detect_compiler(
    language: Language,
    machine: Machine,
    bins: &[String],
) -> Result<Box<dyn Compiler>> {
    for candidate in candidates(language, bins) {
        let (code, stdout, _) = process(&[candidate.clone(), "--version".to_owned()])?;
        if code != 0 {
            continue;
        }

        if let Some(found) = classify_compiler(language, &candidate, &stdout) {
            return Ok(found);
        }
    }

    Err(Error::meson(format!(
        "Unable to detect a {language} compiler for the {machine} machine"
    )))
}

/// Dynamic linking goes through the compiler driver, so the linker inherits
/// its command.
pub fn detect_linker(compiler: &dyn Compiler) -> Box<dyn Linker> {
    Box::new(linker::Gnu::new(compiler.command().to_vec()))
}

pub fn detect_archiver(machine: Machine) -> Result<Box<dyn Archiver>> {
    let binary = std::env::var("AR").unwrap_or_else(|_| "ar".to_owned());

    let (code, stdout, _) = process(&[binary.clone(), "--version".to_owned()])?;
    if code == 0 && stdout.contains("GNU") {
        return Ok(Box::new(archiver::Gnu::new(vec![binary])));
    }

    Err(Error::meson(format!(
        "Unable to detect an archiver for the {machine} machine"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_gnu() {
        let output = "g++ (GCC) 13.2.0\nCopyright (C) 2023 Free Software Foundation, Inc.\n";
        let found = classify_compiler(Language::Cpp, "g++", output).unwrap();
        assert_eq!(found.id(), "gnu");
        assert_eq!(found.language(), Language::Cpp);
    }

    #[test]
    fn classify_clang() {
        let output = "clang version 17.0.6\nTarget: x86_64-unknown-linux-gnu\n";
        let found = classify_compiler(Language::C, "clang", output).unwrap();
        assert_eq!(found.id(), "clang");
    }

    #[test]
    fn classify_unknown() {
        assert!(classify_compiler(Language::C, "mystery", "mystery 1.0\n").is_none());
    }
}
