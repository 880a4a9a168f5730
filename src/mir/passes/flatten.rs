//! Flatten nested arrays.
//!
//! The DSL treats `f(['a', ['b']])`, `f(['a', 'b'])`, and `f('a', 'b')` as
//! largely interchangeable; the interpreter flattens arguments at call time.
//! Here that becomes a rewrite: any array containing arrays is replaced with
//! its flattened form, so every lowering sees an idealized argument list.

use crate::mir::passes::walkers::{function_walker, instruction_walker};
use crate::mir::{BlockId, ControlFlowGraph, Instruction, InstructionKind};
use crate::Result;

/// Functions whose positional arguments are a variadic list: an array given
/// in a positional slot is the same as writing its elements out.
const VARARG_FUNCTIONS: &[&str] = &[
    "files",
    "message",
    "warning",
    "error",
    "executable",
    "static_library",
    "project",
    "find_program",
    "add_project_arguments",
    "add_global_arguments",
    "add_project_link_arguments",
    "add_global_link_arguments",
];

fn do_flatten(elements: &[Instruction], out: &mut Vec<Instruction>) {
    for element in elements {
        if let InstructionKind::Array(nested) = &element.kind {
            do_flatten(nested, out);
        } else {
            out.push(element.clone());
        }
    }
}

fn flatten_impl(instruction: &Instruction) -> Option<Instruction> {
    let InstructionKind::Array(elements) = &instruction.kind else {
        return None;
    };

    if !elements
        .iter()
        .any(|e| matches!(e.kind, InstructionKind::Array(_)))
    {
        return None;
    }

    let mut flat = Vec::with_capacity(elements.len());
    do_flatten(elements, &mut flat);
    Some(Instruction::new(InstructionKind::Array(flat)))
}

/// Splice array arguments of varargs functions into the positional list.
fn splice_varargs(instruction: &mut Instruction) -> Result<bool> {
    let InstructionKind::FunctionCall(func) = &mut instruction.kind else {
        return Ok(false);
    };
    if func.holder.is_some() || !VARARG_FUNCTIONS.contains(&func.name.as_str()) {
        return Ok(false);
    }
    if !func
        .pos_args
        .iter()
        .any(|a| matches!(a.kind, InstructionKind::Array(_)))
    {
        return Ok(false);
    }

    let mut spliced = Vec::with_capacity(func.pos_args.len());
    for arg in func.pos_args.drain(..) {
        if let InstructionKind::Array(elements) = &arg.kind {
            do_flatten(elements, &mut spliced);
        } else {
            spliced.push(arg);
        }
    }
    func.pos_args = spliced;

    Ok(true)
}

pub fn flatten(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get_mut(&id) else {
        return Ok(false);
    };

    let mut progress = function_walker(block, &mut |instruction: &Instruction| {
        Ok(flatten_impl(instruction))
    })?;
    progress |= instruction_walker(block, &mut [&mut splice_varargs], &mut [])?;

    Ok(progress)
}
