//! Methods of resolved program objects.

use crate::mir::passes::all_args_reduced;
use crate::mir::passes::walkers::function_walker;
use crate::mir::{BlockId, ControlFlowGraph, FunctionCall, Instruction, InstructionKind, Program};
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

fn lower_found(func: &FunctionCall, program: &Program) -> Result<Instruction> {
    no_arguments(func, "Program.found()")?;
    Ok(Instruction::new(InstructionKind::Boolean(program.found())))
}

fn lower_full_path(func: &FunctionCall, program: &Program) -> Result<Instruction> {
    no_arguments(func, "Program.full_path()")?;
    Ok(Instruction::new(InstructionKind::String(
        program.path.display().to_string(),
    )))
}

pub fn lower_program_objects(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
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
        let InstructionKind::Program(program) = &holder.kind else {
            return Ok(None);
        };
        if !all_args_reduced(&func.pos_args, &func.kw_args) {
            return Ok(None);
        }

        match func.name.as_str() {
            "found" => lower_found(func, program).map(Some),
            "full_path" => lower_full_path(func, program).map(Some),
            _ => Ok(None),
        }
    })
}
