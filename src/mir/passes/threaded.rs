//! Lowering that is I/O bound and worth doing on a worker pool: PATH
//! lookups for `find_program()` and pkg-config probes for `dependency()`.
//!
//! Three steps: walk the graph collecting probe jobs, run the probes on the
//! pool, then walk again substituting the cached results. Workers only read
//! their inputs and return pure values; the main thread installs everything
//! into the persistent state between the walks.

use std::path::PathBuf;

use colored::Colorize;
use rayon::prelude::*;

use crate::mir::machines::Machine;
use crate::mir::passes::walkers::{block_walker, function_walker, function_walker_mut};
use crate::mir::passes::{all_args_reduced, extractors};
use crate::mir::state::Persistent;
use crate::mir::arguments::{Argument, IncludeType, Type};
use crate::mir::{
    ControlFlowGraph, Dependency, DependencyType, Instruction, InstructionKind, Program,
};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeJob {
    /// Candidate names for one program, tried in order
    Program(Vec<String>),
    Dependency(String),
}

#[derive(Debug)]
enum ProbeResult {
    Program {
        names: Vec<String>,
        path: Option<PathBuf>,
    },
    Dependency(Dependency),
}

fn gather_jobs(cfg: &mut ControlFlowGraph, pstate: &Persistent) -> Result<Vec<ProbeJob>> {
    let mut jobs: Vec<ProbeJob> = Vec::new();

    block_walker(cfg, &mut [&mut |cfg: &mut ControlFlowGraph, id| {
        let Some(block) = cfg.blocks.get_mut(&id) else {
            return Ok(false);
        };
        function_walker_mut(block, &mut |instruction: &mut Instruction| {
            let InstructionKind::FunctionCall(func) = &instruction.kind else {
                return Ok(false);
            };
            if func.holder.is_some() || !all_args_reduced(&func.pos_args, &func.kw_args) {
                return Ok(false);
            }

            match func.name.as_str() {
                "find_program" => {
                    let names: Vec<String> = extractors::extract_variadic(
                        &func.pos_args,
                        "find_program: arguments must be strings",
                    )?;
                    if names.is_empty() {
                        return Err(Error::invalid_arguments(
                            "find_program requires at least 1 argument",
                        ));
                    }
                    // Only probe names we haven't already resolved
                    if names
                        .iter()
                        .any(|n| pstate.programs.build().contains_key(n))
                    {
                        return Ok(true);
                    }
                    let job = ProbeJob::Program(names);
                    if !jobs.contains(&job) {
                        jobs.push(job);
                    }
                    Ok(true)
                }
                "dependency" => {
                    let Some(first) = func.pos_args.first() else {
                        return Err(Error::invalid_arguments(
                            "dependency requires at least 1 argument",
                        ));
                    };
                    let name: String = extractors::extract_positional(
                        first,
                        "dependency: first argument must be a string",
                    )?;
                    if pstate.dependencies.contains_key(&name) {
                        return Ok(true);
                    }
                    let job = ProbeJob::Dependency(name);
                    if !jobs.contains(&job) {
                        jobs.push(job);
                    }
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }])?;

    Ok(jobs)
}

/// Find the first of `names` on PATH. Pure: reads only the environment.
fn probe_program(names: &[String]) -> ProbeResult {
    for name in names {
        if let Some(path) = crate::util::find_in_path(name) {
            return ProbeResult::Program {
                names: names.to_vec(),
                path: Some(path),
            };
        }
    }
    ProbeResult::Program {
        names: names.to_vec(),
        path: None,
    }
}

fn classify_pkgconf_flag(flag: &str) -> Argument {
    if let Some(value) = flag.strip_prefix("-I") {
        return Argument::new_include(value, IncludeType::Base);
    }
    if let Some(value) = flag.strip_prefix("-D") {
        return Argument::new(value, Type::Define);
    }
    if let Some(value) = flag.strip_prefix("-L") {
        return Argument::new(value, Type::LinkSearch);
    }
    if let Some(value) = flag.strip_prefix("-l") {
        return Argument::new(value, Type::Link);
    }
    Argument::new(flag, Type::Raw)
}

/// Query pkg-config for one dependency. Pure: runs pkg-config, writes
/// nothing.
fn probe_dependency(name: &str) -> ProbeResult {
    let not_found = Dependency {
        name: name.to_owned(),
        found: false,
        version: "unknown".to_owned(),
        arguments: Vec::new(),
        dep_type: DependencyType::PkgConfig,
    };

    let run = |args: &[&str]| -> Option<String> {
        let mut command = vec!["pkg-config".to_owned()];
        command.extend(args.iter().map(|a| (*a).to_owned()));
        command.push(name.to_owned());
        match crate::util::process(&command) {
            Ok((0, stdout, _)) => Some(stdout),
            _ => None,
        }
    };

    let Some(version) = run(&["--modversion"]) else {
        return ProbeResult::Dependency(not_found);
    };

    let mut arguments = Vec::new();
    for flags in [run(&["--cflags"]), run(&["--libs"])].into_iter().flatten() {
        arguments.extend(flags.split_whitespace().map(classify_pkgconf_flag));
    }

    ProbeResult::Dependency(Dependency {
        name: name.to_owned(),
        found: true,
        version: version.trim().to_owned(),
        arguments,
        dep_type: DependencyType::PkgConfig,
    })
}

fn install_results(results: Vec<ProbeResult>, pstate: &mut Persistent) {
    for result in results {
        match result {
            ProbeResult::Program { names, path } => match path {
                Some(path) => {
                    println!(
                        "Found program \"{}\": {} ({})",
                        names[0],
                        "YES".green(),
                        path.display()
                    );
                    let cache = pstate.programs.build_mut();
                    for name in names {
                        cache.entry(name).or_insert_with(|| path.clone());
                    }
                }
                None => {
                    println!("Found program \"{}\": {}", names[0], "NO".red());
                    // Cache the failure so the probe isn't repeated
                    pstate.programs.build_mut().entry(names[0].clone()).or_default();
                }
            },
            ProbeResult::Dependency(dep) => {
                if dep.found {
                    println!(
                        "Dependency {} found: {} ({})",
                        dep.name,
                        "YES".green(),
                        dep.version
                    );
                } else {
                    println!("Dependency {} found: {}", dep.name, "NO".red());
                }
                pstate.dependencies.insert(dep.name.clone(), dep);
            }
        }
    }
}

fn substitute(cfg: &mut ControlFlowGraph, pstate: &Persistent) -> Result<bool> {
    block_walker(cfg, &mut [&mut |cfg: &mut ControlFlowGraph, id| {
        let Some(block) = cfg.blocks.get_mut(&id) else {
            return Ok(false);
        };
        function_walker(block, &mut |instruction: &Instruction| {
            let InstructionKind::FunctionCall(func) = &instruction.kind else {
                return Ok(None);
            };
            if func.holder.is_some() || !all_args_reduced(&func.pos_args, &func.kw_args) {
                return Ok(None);
            }

            match func.name.as_str() {
                "find_program" => {
                    let Some(first) = func.pos_args.first() else {
                        return Err(Error::invalid_arguments(
                            "find_program requires at least 1 argument",
                        ));
                    };
                    // All of the candidate names map to the same result, so
                    // the first is enough
                    let name: String = extractors::extract_positional(
                        first,
                        "find_program: arguments must be strings",
                    )?;
                    let path = pstate
                        .programs
                        .build()
                        .get(&name)
                        .cloned()
                        .unwrap_or_default();

                    let required: bool = extractors::extract_keyword(
                        &func.kw_args,
                        "required",
                        "find_program: 'required' argument must be a boolean",
                    )?
                    .unwrap_or(true);
                    if required && path.as_os_str().is_empty() {
                        return Err(Error::meson(format!(
                            "Could not find required program \"{name}\""
                        )));
                    }

                    Ok(Some(Instruction::new(InstructionKind::Program(
                        Program::new(name, Machine::Host, path),
                    ))))
                }
                "dependency" => {
                    let Some(first) = func.pos_args.first() else {
                        return Err(Error::invalid_arguments(
                            "dependency requires at least 1 argument",
                        ));
                    };
                    let name: String = extractors::extract_positional(
                        first,
                        "dependency: first argument must be a string",
                    )?;
                    let Some(dep) = pstate.dependencies.get(&name) else {
                        return Ok(None);
                    };

                    let required: bool = extractors::extract_keyword(
                        &func.kw_args,
                        "required",
                        "dependency: 'required' argument must be a boolean",
                    )?
                    .unwrap_or(true);
                    if required && !dep.found {
                        return Err(Error::meson(format!(
                            "Dependency \"{name}\" not found"
                        )));
                    }

                    Ok(Some(Instruction::new(InstructionKind::Dependency(
                        dep.clone(),
                    ))))
                }
                _ => Ok(None),
            }
        })
    }])
}

pub fn threaded_lowering(cfg: &mut ControlFlowGraph, pstate: &mut Persistent) -> Result<bool> {
    let jobs = gather_jobs(cfg, pstate)?;
    if jobs.is_empty() {
        // Nothing to probe, but cached results may still substitute
        return substitute(cfg, pstate);
    }

    let results: Vec<ProbeResult> = jobs
        .par_iter()
        .map(|job| match job {
            ProbeJob::Program(names) => probe_program(names),
            ProbeJob::Dependency(name) => probe_dependency(name),
        })
        .collect();

    install_results(results, pstate);
    substitute(cfg, pstate)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::{lower, pstate};

    #[test]
    fn cached_programs_substitute_without_probing() {
        let mut cfg = lower("x = find_program('mytool')");
        let mut state = pstate();
        state
            .programs
            .build_mut()
            .insert("mytool".to_owned(), PathBuf::from("/opt/bin/mytool"));

        let progress = threaded_lowering(&mut cfg, &mut state).unwrap();
        assert!(progress);

        let entry = cfg.entry_block();
        let InstructionKind::Program(program) = &entry.instructions[0].kind else {
            panic!("expected a program, got {:?}", entry.instructions[0]);
        };
        assert_eq!(program.name, "mytool");
        assert_eq!(program.path, PathBuf::from("/opt/bin/mytool"));
        assert_eq!(entry.instructions[0].var.name, "x");
    }

    #[test]
    fn missing_required_program_is_an_error() {
        let mut cfg = lower("x = find_program('definitely-not-a-real-tool-name')");
        let mut state = pstate();
        state
            .programs
            .build_mut()
            .insert("definitely-not-a-real-tool-name".to_owned(), PathBuf::new());

        assert!(threaded_lowering(&mut cfg, &mut state).is_err());
    }

    #[test]
    fn missing_optional_program_lowers_to_not_found() {
        let mut cfg = lower("x = find_program('nope', required : false)");
        let mut state = pstate();
        state
            .programs
            .build_mut()
            .insert("nope".to_owned(), PathBuf::new());

        threaded_lowering(&mut cfg, &mut state).unwrap();

        let entry = cfg.entry_block();
        let InstructionKind::Program(program) = &entry.instructions[0].kind else {
            panic!("expected a program");
        };
        assert!(!program.found());
    }

    #[test]
    fn cached_dependencies_substitute() {
        let mut cfg = lower("z = dependency('zlib')");
        let mut state = pstate();
        state.dependencies.insert(
            "zlib".to_owned(),
            Dependency {
                name: "zlib".to_owned(),
                found: true,
                version: "1.3".to_owned(),
                arguments: vec![Argument::new("z", Type::Link)],
                dep_type: DependencyType::PkgConfig,
            },
        );

        let progress = threaded_lowering(&mut cfg, &mut state).unwrap();
        assert!(progress);

        let entry = cfg.entry_block();
        let InstructionKind::Dependency(dep) = &entry.instructions[0].kind else {
            panic!("expected a dependency");
        };
        assert!(dep.found);
        assert_eq!(dep.version, "1.3");
    }

    #[test]
    fn find_program_on_path_resolves() {
        // `sh` exists on any machine these tests run on
        let mut cfg = lower("x = find_program('sh')");
        let mut state = pstate();
        let progress = threaded_lowering(&mut cfg, &mut state).unwrap();
        assert!(progress);

        let entry = cfg.entry_block();
        let InstructionKind::Program(program) = &entry.instructions[0].kind else {
            panic!("expected a program");
        };
        assert!(program.found());
        // The cache is primed for the next configure
        assert!(state.programs.build().contains_key("sh"));
    }

    #[test]
    fn pkgconf_flags_classify() {
        assert_eq!(
            classify_pkgconf_flag("-I/usr/include/foo"),
            Argument::new_include("/usr/include/foo", IncludeType::Base)
        );
        assert_eq!(
            classify_pkgconf_flag("-lfoo"),
            Argument::new("foo", Type::Link)
        );
        assert_eq!(
            classify_pkgconf_flag("-L/usr/lib"),
            Argument::new("/usr/lib", Type::LinkSearch)
        );
        assert_eq!(
            classify_pkgconf_flag("-DNDEBUG"),
            Argument::new("NDEBUG", Type::Define)
        );
        assert_eq!(
            classify_pkgconf_flag("-pthread"),
            Argument::new("-pthread", Type::Raw)
        );
    }
}
