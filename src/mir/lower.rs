//! The lowering pipeline: an ordered set of passes run over the CFG until
//! nothing changes any more.

use crate::mir::passes::{
    branch_pruning, combine_add_arguments, custom_target_program_replacement,
    delete_unreachable, fixup_phis, flatten, insert_compilers, join_blocks,
    lower_compiler_methods, lower_dependency_objects, lower_free_functions,
    lower_program_objects, lower_string_objects, machine_lower, threaded_lowering,
    walkers::block_walker, ConstantFolding, ConstantPropagation, GlobalValueNumbering, Printer,
};
use crate::mir::state::Persistent;
use crate::mir::ControlFlowGraph;
use crate::Result;

/// Passes that only need to run once for the whole program: machine methods,
/// compiler insertion, program-slot replacement, and value numbering with phi
/// insertion.
// TODO: compilers may need to run again if `add_language` ever exists
fn early(cfg: &mut ControlFlowGraph, pstate: &Persistent, printer: &mut Printer) -> Result<()> {
    let mut gvn = GlobalValueNumbering::default();

    block_walker(
        cfg,
        &mut [
            &mut |cfg: &mut ControlFlowGraph, id| {
                Ok(machine_lower(cfg, id, &pstate.machines)?
                    | insert_compilers(cfg, id, &pstate.toolchains)?)
            },
            &mut |cfg: &mut ControlFlowGraph, id| custom_target_program_replacement(cfg, id),
            &mut |cfg: &mut ControlFlowGraph, id| gvn.run(cfg, id),
        ],
    )?;

    printer.increment();
    printer.run(cfg)?;
    Ok(())
}

/// The main loop, run until no pass reports progress. Each pass either does
/// nothing or removes something from the program (an unresolved call, a
/// branch, a phi, an alias), so this terminates.
fn main_loop(
    cfg: &mut ControlFlowGraph,
    pstate: &Persistent,
    printer: &mut Printer,
) -> Result<()> {
    let mut folding = ConstantFolding::default();
    let mut propagation = ConstantPropagation::default();

    loop {
        printer.increment();

        let progress = block_walker(
            cfg,
            &mut [
                &mut |cfg: &mut ControlFlowGraph, id| flatten(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| lower_free_functions(cfg, id, pstate),
                &mut |cfg: &mut ControlFlowGraph, id| delete_unreachable(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| branch_pruning(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| join_blocks(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| fixup_phis(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| folding.run(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| propagation.run(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| lower_compiler_methods(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| lower_program_objects(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| lower_string_objects(cfg, id),
                &mut |cfg: &mut ControlFlowGraph, id| lower_dependency_objects(cfg, id),
            ],
        )?;

        printer.run(cfg)?;

        if !progress {
            return Ok(());
        }
    }
}

fn late(cfg: &mut ControlFlowGraph, printer: &mut Printer) -> Result<()> {
    printer.increment();
    block_walker(cfg, &mut [&mut |cfg: &mut ControlFlowGraph, id| {
        combine_add_arguments(cfg, id)
    }])?;
    printer.run(cfg)?;
    Ok(())
}

/// Run the whole pipeline over a CFG.
///
/// The main loop runs to a fixed point, then the I/O bound lowering resolves
/// programs and external dependencies, then the main loop runs to a fixed
/// point again with those results in place.
pub fn lower(cfg: &mut ControlFlowGraph, pstate: &mut Persistent) -> Result<()> {
    let mut printer = Printer::from_env();
    printer.run(cfg)?;

    early(cfg, pstate, &mut printer)?;
    main_loop(cfg, pstate, &mut printer)?;

    if threaded_lowering(cfg, pstate)? {
        main_loop(cfg, pstate, &mut printer)?;
    }

    late(cfg, &mut printer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::{lower as lower_source, pstate, pstate_with_cpp};
    use crate::mir::{InstructionKind, MessageLevel};
    use crate::Error;

    fn pipeline(source: &str) -> ControlFlowGraph {
        let mut cfg = lower_source(source);
        let mut state = pstate();
        lower(&mut cfg, &mut state).unwrap();
        cfg
    }

    #[test]
    fn files_reduce_to_an_array_of_files() {
        let cfg = pipeline("x = files('foo.c')");
        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 1);

        let InstructionKind::Array(elements) = &entry.instructions[0].kind else {
            panic!("expected an array, got {:?}", entry.instructions[0]);
        };
        let InstructionKind::File(file) = &elements[0].kind else {
            panic!("expected a file");
        };
        assert_eq!(file.get_name(), "foo.c");
    }

    #[test]
    fn constant_conditionals_fold_away() {
        let cfg = pipeline("if true\n  x = 9\nelse\n  x = 10\nendif");
        assert_eq!(cfg.blocks.len(), 1);

        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 2);

        // The taken arm's definition, numbered after the untaken one
        assert_eq!(entry.instructions[0].kind, InstructionKind::Number(9));
        assert_eq!(entry.instructions[0].var.name, "x");
        assert_eq!(entry.instructions[0].var.version, 2);

        // The phi collapsed to an alias of the surviving version
        let InstructionKind::Identifier(alias) = &entry.instructions[1].kind else {
            panic!("expected an identifier, got {:?}", entry.instructions[1]);
        };
        assert_eq!(alias.name, "x");
        assert_eq!(alias.version, 2);
        assert_eq!(entry.instructions[1].var.version, 3);
    }

    #[test]
    fn unary_not_folds() {
        let cfg = pipeline("not false");
        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 1);
        assert_eq!(entry.instructions[0].kind, InstructionKind::Boolean(true));
    }

    #[test]
    fn version_compare_folds() {
        let cfg = pipeline("'3.6'.version_compare('< 3.7')");
        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 1);
        assert_eq!(entry.instructions[0].kind, InstructionKind::Boolean(true));
    }

    #[test]
    fn messages_and_asserts() {
        let cfg = pipeline("message('foo')");
        let InstructionKind::Message(m) = &cfg.entry_block().instructions[0].kind else {
            panic!("expected a message");
        };
        assert_eq!(m.level, MessageLevel::Message);
        assert_eq!(m.message, "foo");

        let cfg = pipeline("warning('foo', 'bar')");
        let InstructionKind::Message(m) = &cfg.entry_block().instructions[0].kind else {
            panic!("expected a message");
        };
        assert_eq!(m.level, MessageLevel::Warn);
        assert_eq!(m.message, "foo bar");

        let cfg = pipeline("assert(false)");
        let InstructionKind::Message(m) = &cfg.entry_block().instructions[0].kind else {
            panic!("expected a message");
        };
        assert_eq!(m.level, MessageLevel::Error);
        assert_eq!(m.message, "Assertion failed: ");
    }

    #[test]
    fn get_compiler_resolves_against_the_toolchain_table() {
        let mut cfg = lower_source("x = meson.get_compiler('cpp')");
        let mut state = pstate_with_cpp();
        lower(&mut cfg, &mut state).unwrap();

        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 1);
        let InstructionKind::Compiler(compiler) = &entry.instructions[0].kind else {
            panic!("expected a compiler");
        };
        assert_eq!(compiler.toolchain.compiler.id(), "clang");
    }

    #[test]
    fn get_compiler_for_an_unregistered_language_fails() {
        let mut cfg = lower_source("x = meson.get_compiler('cpp')");
        let mut state = pstate();
        let result = lower(&mut cfg, &mut state);
        assert!(
            matches!(result, Err(Error::Meson(m)) if m == "No compiler for language")
        );
    }

    #[test]
    fn chained_methods_resolve_left_to_right() {
        let mut cfg = lower_source("x = meson.get_compiler('cpp').get_id()");
        let mut state = pstate_with_cpp();
        lower(&mut cfg, &mut state).unwrap();

        let entry = cfg.entry_block();
        assert_eq!(
            entry.instructions[0].kind,
            InstructionKind::String("clang".to_owned())
        );
    }

    #[test]
    fn a_real_build_file_resolves_to_targets() {
        let mut cfg = lower_source(
            "t_files = files('bar.c')\nexecutable('exe', t_files, cpp_args : ['-Dfoo'])",
        );
        let mut state = pstate_with_cpp();
        lower(&mut cfg, &mut state).unwrap();

        let entry = cfg.entry_block();
        let exe = entry
            .instructions
            .iter()
            .find_map(|i| match &i.kind {
                InstructionKind::Executable(target) => Some(target),
                _ => None,
            })
            .expect("an executable should have been created");
        assert_eq!(exe.name, "exe");
        // The files() array was spliced into the source list
        assert_eq!(exe.sources.len(), 1);
        let InstructionKind::File(file) = &exe.sources[0].kind else {
            panic!("expected a file source, got {:?}", exe.sources[0]);
        };
        assert_eq!(file.get_name(), "bar.c");
    }

    #[test]
    fn link_with_receives_the_library() {
        let mut cfg = lower_source(
            "lib = static_library('helper', 'helper.cpp')\nexecutable('exe', 'main.cpp', link_with : lib)",
        );
        let mut state = pstate_with_cpp();
        lower(&mut cfg, &mut state).unwrap();

        let entry = cfg.entry_block();
        let exe = entry
            .instructions
            .iter()
            .find_map(|i| match &i.kind {
                InstructionKind::Executable(target) => Some(target),
                _ => None,
            })
            .expect("an executable should have been created");
        assert_eq!(exe.link_static.len(), 1);
        assert_eq!(exe.link_static[0].target.name, "helper");
    }

    #[test]
    fn data_dependent_branches_survive() {
        let mut cfg = lower_source("if some_option\n  x = 1\nendif");
        let mut state = pstate();
        lower(&mut cfg, &mut state).unwrap();

        // The predicate is unresolved, so the branch must still be there
        let entry = cfg.entry_block();
        assert!(matches!(
            entry.instructions.last().unwrap().kind,
            InstructionKind::Branch(_)
        ));
        assert!(cfg.blocks.len() > 1);

        // Structural closure: any remaining single-successor edge points at
        // a block that other paths also need
        for block in cfg.blocks.values() {
            let successors = block.successors();
            if successors.len() == 1 {
                assert!(
                    cfg.blocks[&successors[0]].predecessors.len() > 1,
                    "{} and {} should have been joined",
                    block.id,
                    successors[0]
                );
            }
        }
    }

    #[test]
    fn ssa_versions_are_unique_per_name() {
        let mut cfg = lower_source(
            "x = 1\nx = 2\nif q\n  x = 3\n  y = 1\nelse\n  x = 4\nendif\ny = 2",
        );
        let mut state = pstate();
        lower(&mut cfg, &mut state).unwrap();

        let mut seen = std::collections::BTreeSet::new();
        for block in cfg.blocks.values() {
            for instruction in &block.instructions {
                if instruction.var.is_set() {
                    assert_ne!(instruction.var.version, 0, "{instruction}");
                    assert!(
                        seen.insert((instruction.var.name.clone(), instruction.var.version)),
                        "duplicate SSA definition {}",
                        instruction.var
                    );
                }
            }
        }
    }

    #[test]
    fn errors_terminate_their_block() {
        let cfg = pipeline("assert(false)\nmessage('unreachable')");
        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 1);
        assert!(matches!(
            &entry.instructions[0].kind,
            InstructionKind::Message(m) if m.level == MessageLevel::Error
        ));
    }

    #[test]
    fn custom_target_with_a_cached_program() {
        let mut cfg = lower_source(
            "custom_target('gen', input : 'foo.in', output : 'gen.c', command : ['prog', '@INPUT@', '@OUTPUT@'])",
        );
        let mut state = pstate();
        state
            .programs
            .build_mut()
            .insert("prog".to_owned(), "/usr/bin/prog".into());
        lower(&mut cfg, &mut state).unwrap();

        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 1);
        let InstructionKind::CustomTarget(target) = &entry.instructions[0].kind else {
            panic!("expected a custom target, got {:?}", entry.instructions[0]);
        };
        assert_eq!(target.command[0], "/usr/bin/prog");
        assert_eq!(target.command[2], "gen.c");
    }

    #[test]
    fn the_pipeline_reaches_a_fixed_point() {
        let mut cfg = lower_source("if unknowable\n  x = files('a.c')\nendif\nmessage('hi')");
        let mut state = pstate();
        lower(&mut cfg, &mut state).unwrap();

        // Another full run over the already-lowered graph changes nothing
        let dump_before = cfg.dump();
        lower(&mut cfg, &mut state).unwrap();
        assert_eq!(dump_before, cfg.dump());
    }
}
