//! Lowering passes for MIR.

use crate::mir::{Instruction, InstructionKind};

pub mod branch_pruning;
pub mod combine_add_arguments;
pub mod compilers;
pub mod constant_folding;
pub mod constant_propagation;
pub mod custom_target_replacement;
pub mod delete_unreachable;
pub mod dependency_objects;
pub mod extractors;
pub mod fixup_phis;
pub mod flatten;
pub mod free_functions;
pub mod join_blocks;
pub mod machine_lower;
pub mod printer;
pub mod program_objects;
pub mod string_objects;
pub mod threaded;
pub mod value_numbering;
pub mod walkers;

pub use branch_pruning::branch_pruning;
pub use combine_add_arguments::combine_add_arguments;
pub use compilers::{insert_compilers, lower_compiler_methods};
pub use constant_folding::ConstantFolding;
pub use constant_propagation::ConstantPropagation;
pub use custom_target_replacement::custom_target_program_replacement;
pub use delete_unreachable::delete_unreachable;
pub use dependency_objects::lower_dependency_objects;
pub use fixup_phis::fixup_phis;
pub use flatten::flatten;
pub use free_functions::{lower_free_functions, lower_project};
pub use join_blocks::join_blocks;
pub use machine_lower::machine_lower;
pub use printer::Printer;
pub use program_objects::lower_program_objects;
pub use string_objects::lower_string_objects;
pub use threaded::threaded_lowering;
pub use value_numbering::GlobalValueNumbering;

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use crate::frontend::{parser::Parser, SourceFile};
    use crate::mir::machines::PerMachine;
    use crate::mir::state::Persistent;
    use crate::mir::toolchains::{archiver, compiler, linker, Language, Toolchain};
    use crate::mir::ControlFlowGraph;

    pub fn lower(input: &str) -> ControlFlowGraph {
        let source = SourceFile::from_string(input);
        let block = Parser::parse_program(&source).unwrap();
        crate::mir::ast_to_mir::lower_ast(&block, Path::new("")).unwrap()
    }

    pub fn pstate() -> Persistent {
        Persistent::new(
            "/home/test user/src/test project",
            "/home/test user/src/test project/builddir",
        )
    }

    /// A toolchain that never touches the host machine
    pub fn fake_toolchain(language: Language) -> Arc<Toolchain> {
        Arc::new(Toolchain {
            compiler: Box::new(compiler::Clang::new(vec!["null".to_owned()], language)),
            linker: Box::new(linker::Gnu::new(vec!["null".to_owned()])),
            archiver: Box::new(archiver::Gnu::new(vec!["null".to_owned()])),
        })
    }

    /// A persistent state with a C++ toolchain already registered
    pub fn pstate_with_cpp() -> Persistent {
        let mut state = pstate();
        state.toolchains.insert(
            Language::Cpp,
            PerMachine::new(fake_toolchain(Language::Cpp)),
        );
        state
    }
}

/// Is this instruction a concrete value a lowering can consume?
pub(crate) fn holds_reduced(instruction: &Instruction) -> bool {
    match &instruction.kind {
        InstructionKind::String(_)
        | InstructionKind::Boolean(_)
        | InstructionKind::Number(_)
        | InstructionKind::File(_)
        | InstructionKind::Executable(_)
        | InstructionKind::StaticLibrary(_)
        | InstructionKind::IncludeDirectories(_)
        | InstructionKind::Program(_)
        | InstructionKind::CustomTarget(_)
        | InstructionKind::Dependency(_)
        | InstructionKind::Compiler(_)
        | InstructionKind::Message(_) => true,
        // A reduced array is flat and fully reduced
        InstructionKind::Array(elements) => elements
            .iter()
            .all(|e| holds_reduced(e) && !matches!(e.kind, InstructionKind::Array(_))),
        InstructionKind::Dict(entries) => entries.values().all(holds_reduced),
        _ => false,
    }
}

/// Check that every argument of a call has been reduced from identifiers and
/// nested calls to concrete values.
pub(crate) fn all_args_reduced(
    pos_args: &[Instruction],
    kw_args: &hashbrown::HashMap<String, Instruction>,
) -> bool {
    pos_args.iter().all(holds_reduced) && kw_args.values().all(holds_reduced)
}
