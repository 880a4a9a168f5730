//! `meson.get_compiler()` and the methods of compiler objects.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::mir::machines::{Machine, PerMachine};
use crate::mir::passes::all_args_reduced;
use crate::mir::passes::walkers::function_walker;
use crate::mir::toolchains::{Language, Toolchain};
use crate::mir::{BlockId, Compiler, ControlFlowGraph, FunctionCall, Instruction, InstructionKind};
use crate::{Error, Result};

pub type ToolchainMap = HashMap<Language, PerMachine<Arc<Toolchain>>>;

fn meson_holder(func: &FunctionCall) -> bool {
    match &func.holder {
        Some(holder) => {
            matches!(&holder.kind, InstructionKind::Identifier(id) if id.name == "meson")
        }
        None => false,
    }
}

/// Replace `meson.get_compiler(lang)` with a compiler object from the
/// toolchain table.
pub fn insert_compilers(
    cfg: &mut ControlFlowGraph,
    id: BlockId,
    toolchains: &ToolchainMap,
) -> Result<bool> {
    let Some(block) = cfg.blocks.get_mut(&id) else {
        return Ok(false);
    };

    function_walker(block, &mut |instruction: &Instruction| {
        let InstructionKind::FunctionCall(func) = &instruction.kind else {
            return Ok(None);
        };
        if !meson_holder(func) || func.name != "get_compiler" {
            return Ok(None);
        }

        let Some(language) = func.pos_args.first() else {
            return Err(Error::invalid_arguments(
                "meson.get_compiler(): takes exactly one positional argument",
            ));
        };
        // If the language expression hasn't reduced to a string, wait and
        // try again on a later iteration
        let InstructionKind::String(language) = &language.kind else {
            return Ok(None);
        };

        let machine = match func.kw_args.get("native") {
            Some(native) => match &native.kind {
                InstructionKind::Boolean(true) => Machine::Build,
                InstructionKind::Boolean(false) => Machine::Host,
                _ => return Ok(None),
            },
            None => Machine::Host,
        };

        let language = Language::from_string(language)?;
        let Some(toolchain) = toolchains.get(&language) else {
            return Err(Error::meson("No compiler for language"));
        };

        Ok(Some(Instruction::new(InstructionKind::Compiler(Compiler {
            toolchain: toolchain.get(machine).clone(),
        }))))
    })
}

fn lower_get_id(func: &FunctionCall, compiler: &Compiler) -> Result<Instruction> {
    if !func.pos_args.is_empty() {
        return Err(Error::invalid_arguments(
            "compiler.get_id(): takes no positional arguments",
        ));
    }
    if !func.kw_args.is_empty() {
        return Err(Error::invalid_arguments(
            "compiler.get_id(): takes no keyword arguments",
        ));
    }

    Ok(Instruction::new(InstructionKind::String(
        compiler.toolchain.compiler.id().to_owned(),
    )))
}

fn lower_get_language(func: &FunctionCall, compiler: &Compiler) -> Result<Instruction> {
    if !func.pos_args.is_empty() || !func.kw_args.is_empty() {
        return Err(Error::invalid_arguments(
            "compiler.get_language(): takes no arguments",
        ));
    }

    Ok(Instruction::new(InstructionKind::String(
        compiler.toolchain.compiler.language().to_string(),
    )))
}

/// Methods of resolved compiler objects. Unknown methods yield no
/// replacement; another iteration may know them.
pub fn lower_compiler_methods(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get_mut(&id) else {
        return Ok(false);
    };

    function_walker(block, &mut |instruction: &Instruction| {
        let InstructionKind::FunctionCall(func) = &instruction.kind else {
            return Ok(None);
        };
        let Some(holder) = &func.holder else {
            return Ok(None);
        };
        let InstructionKind::Compiler(compiler) = &holder.kind else {
            return Ok(None);
        };
        if !all_args_reduced(&func.pos_args, &func.kw_args) {
            return Ok(None);
        }

        match func.name.as_str() {
            "get_id" => lower_get_id(func, compiler).map(Some),
            "get_language" => lower_get_language(func, compiler).map(Some),
            _ => Ok(None),
        }
    })
}
