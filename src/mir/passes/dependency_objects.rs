//! Methods of dependency objects.

use crate::mir::passes::all_args_reduced;
use crate::mir::passes::walkers::function_walker;
use crate::mir::{BlockId, ControlFlowGraph, Dependency, FunctionCall, Instruction, InstructionKind};
use crate::{Error, Result};

fn no_arguments(func: &FunctionCall, what: &str) -> Result<()> {
    if !func.pos_args.is_empty() {
        return Err(Error::invalid_arguments(format!(
            "{what} does not take any positional arguments"
        )));
    }
    if !func.kw_args.is_empty() {
        return Err(Error::invalid_arguments(format!(
            "{what} does not take any keyword arguments"
        )));
    }
    Ok(())
}

fn lower_found(func: &FunctionCall, dep: &Dependency) -> Result<Instruction> {
    no_arguments(func, "Dependency.found()")?;
    Ok(Instruction::new(InstructionKind::Boolean(dep.found)))
}

fn lower_version(func: &FunctionCall, dep: &Dependency) -> Result<Instruction> {
    no_arguments(func, "Dependency.version()")?;
    Ok(Instruction::new(InstructionKind::String(dep.version.clone())))
}

fn lower_name(func: &FunctionCall, dep: &Dependency) -> Result<Instruction> {
    no_arguments(func, "Dependency.name()")?;
    Ok(Instruction::new(InstructionKind::String(dep.name.clone())))
}

pub fn lower_dependency_objects(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
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
        let InstructionKind::Dependency(dep) = &holder.kind else {
            return Ok(None);
        };
        if !all_args_reduced(&func.pos_args, &func.kw_args) {
            return Ok(None);
        }

        match func.name.as_str() {
            "found" => lower_found(func, dep).map(Some),
            "version" => lower_version(func, dep).map(Some),
            "name" => lower_name(func, dep).map(Some),
            _ => Ok(None),
        }
    })
}
