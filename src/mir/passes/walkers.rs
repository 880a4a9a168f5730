//! The traversal primitives every pass is built from.
//!
//! `block_walker` visits each reachable block exactly once per invocation
//! and applies a list of block-level passes to it. It does not iterate to a
//! fixed point; the pipeline driver owns that loop.

use std::collections::BTreeSet;

use crate::mir::{BasicBlock, BlockId, ControlFlowGraph, Instruction, InstructionKind};
use crate::Result;

/// A block-level pass. Returns whether it made progress.
pub type BlockPass<'a> = dyn FnMut(&mut ControlFlowGraph, BlockId) -> Result<bool> + 'a;

/// Returns a replacement for the instruction, or None to leave it alone.
pub type ReplacementCallback<'a> = dyn FnMut(&Instruction) -> Result<Option<Instruction>> + 'a;

/// Mutates the instruction in place, reporting progress.
pub type MutationCallback<'a> = dyn FnMut(&mut Instruction) -> Result<bool> + 'a;

/// Walk every block reachable from the entry, applying each pass in order.
///
/// Blocks are visited only once all their predecessors have been visited, so
/// value numbering sees definitions before the joins that merge them. Ready
/// blocks are kept on a stack: of several arms made ready by one branch, the
/// later arms in source order are visited first.
pub fn block_walker(cfg: &mut ControlFlowGraph, passes: &mut [&mut BlockPass]) -> Result<bool> {
    let mut progress = false;
    let mut seen: BTreeSet<BlockId> = BTreeSet::new();
    let mut stack = vec![cfg.entry];

    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }

        for pass in passes.iter_mut() {
            progress |= pass(cfg, id)?;
        }

        // Successors are computed after the passes ran; pruning may have
        // rewritten the terminators.
        let Some(block) = cfg.blocks.get(&id) else {
            continue;
        };
        for successor in block.successors() {
            if seen.contains(&successor) {
                continue;
            }
            let ready = cfg.blocks.get(&successor).is_some_and(|b| {
                b.predecessors.iter().all(|p| seen.contains(p))
            });
            if ready {
                stack.push(successor);
            }
        }
    }

    Ok(progress)
}

fn apply(
    instruction: &mut Instruction,
    mutations: &mut [&mut MutationCallback],
    replacements: &mut [&mut ReplacementCallback],
) -> Result<bool> {
    let mut progress = false;

    for callback in replacements.iter_mut() {
        if let Some(mut replacement) = callback(instruction)? {
            // The replacement takes over the existing variable
            replacement.var = instruction.var.clone();
            *instruction = replacement;
            progress = true;
        }
    }
    for callback in mutations.iter_mut() {
        progress |= callback(instruction)?;
    }

    Ok(progress)
}

/// Walk a block's instructions, applying each callback to each instruction.
/// Branch and jump predicates are walked in place of the terminators that
/// hold them.
pub fn instruction_walker(
    block: &mut BasicBlock,
    mutations: &mut [&mut MutationCallback],
    replacements: &mut [&mut ReplacementCallback],
) -> Result<bool> {
    let mut progress = false;

    for instruction in block.instructions.iter_mut() {
        match &mut instruction.kind {
            InstructionKind::Jump(jump) => {
                if let Some(predicate) = &mut jump.predicate {
                    progress |= apply(predicate, mutations, replacements)?;
                }
            }
            InstructionKind::Branch(branch) => {
                for (predicate, _) in branch.branches.iter_mut() {
                    progress |= apply(predicate, mutations, replacements)?;
                }
            }
            _ => progress |= apply(instruction, mutations, replacements)?,
        }
    }

    Ok(progress)
}

/// Walk the elements of an array, recursively, mutating them in place.
pub fn array_walker_mut(
    instruction: &mut Instruction,
    callback: &mut MutationCallback,
) -> Result<bool> {
    let InstructionKind::Array(elements) = &mut instruction.kind else {
        return Ok(false);
    };

    let mut progress = false;
    for element in elements.iter_mut() {
        if matches!(element.kind, InstructionKind::Array(_)) {
            progress |= array_walker_mut(element, callback)?;
        } else {
            progress |= callback(element)?;
        }
    }

    Ok(progress)
}

/// Walk the elements of an array, recursively, replacing them.
pub fn array_walker(
    instruction: &mut Instruction,
    callback: &mut ReplacementCallback,
) -> Result<bool> {
    let InstructionKind::Array(elements) = &mut instruction.kind else {
        return Ok(false);
    };

    let mut progress = false;
    for element in elements.iter_mut() {
        if matches!(element.kind, InstructionKind::Array(_)) {
            progress |= array_walker(element, callback)?;
        } else if let Some(mut replacement) = callback(element)? {
            replacement.var = element.var.clone();
            *element = replacement;
            progress = true;
        }
    }

    Ok(progress)
}

/// Walk the positional and keyword arguments of a function call, replacing
/// the ones the callback lowers.
pub fn function_argument_walker(
    instruction: &mut Instruction,
    callback: &mut ReplacementCallback,
) -> Result<bool> {
    let InstructionKind::FunctionCall(func) = &mut instruction.kind else {
        return Ok(false);
    };

    let mut progress = false;

    // The holder first, so chained methods resolve left to right: the inner
    // call becomes a typed object before the outer method is matched
    if let Some(holder) = &mut func.holder {
        if let Some(mut replacement) = callback(holder)? {
            replacement.var = holder.var.clone();
            *holder = replacement;
            progress = true;
        }
    }

    for arg in func.pos_args.iter_mut() {
        if let Some(mut replacement) = callback(arg)? {
            replacement.var = arg.var.clone();
            *arg = replacement;
            progress = true;
        }
    }

    for value in func.kw_args.values_mut() {
        if matches!(value.kind, InstructionKind::Array(_)) {
            progress |= array_walker(value, callback)?;
        }
        // A callback that acts on whole arrays (like flatten) needs to see
        // the value itself as well as its elements
        if let Some(mut replacement) = callback(value)? {
            replacement.var = value.var.clone();
            *value = replacement;
            progress = true;
        }
    }

    Ok(progress)
}

/// Walk the arguments of a function call, recursing into arrays, mutating in
/// place.
pub fn function_argument_walker_mut(
    instruction: &mut Instruction,
    callback: &mut MutationCallback,
) -> Result<bool> {
    let InstructionKind::FunctionCall(func) = &mut instruction.kind else {
        return Ok(false);
    };

    let mut progress = false;

    if let Some(holder) = &mut func.holder {
        progress |= callback(holder)?;
    }

    for arg in func.pos_args.iter_mut() {
        progress |= callback(arg)?;
        progress |= array_walker_mut(arg, callback)?;
    }

    for value in func.kw_args.values_mut() {
        progress |= callback(value)?;
        progress |= array_walker_mut(value, callback)?;
    }

    Ok(progress)
}

/// Walk a block applying a replacement callback to every instruction, array
/// element, and function argument. The callback decides which calls it means
/// to act on.
pub fn function_walker(
    block: &mut BasicBlock,
    callback: &mut ReplacementCallback,
) -> Result<bool> {
    let mut progress = false;

    for instruction in block.instructions.iter_mut() {
        match &mut instruction.kind {
            InstructionKind::Jump(jump) => {
                if let Some(predicate) = &mut jump.predicate {
                    if let Some(mut replacement) = callback(predicate)? {
                        replacement.var = predicate.var.clone();
                        **predicate = replacement;
                        progress = true;
                    }
                }
            }
            InstructionKind::Branch(branch) => {
                for (predicate, _) in branch.branches.iter_mut() {
                    progress |= function_argument_walker(predicate, callback)?;
                    if let Some(mut replacement) = callback(predicate)? {
                        replacement.var = predicate.var.clone();
                        *predicate = replacement;
                        progress = true;
                    }
                }
            }
            _ => {
                progress |= array_walker(instruction, callback)?;
                progress |= function_argument_walker(instruction, callback)?;
                if let Some(mut replacement) = callback(instruction)? {
                    replacement.var = instruction.var.clone();
                    *instruction = replacement;
                    progress = true;
                }
            }
        }
    }

    Ok(progress)
}

/// Walk a block applying a mutation callback to every instruction, array
/// element, and function argument.
pub fn function_walker_mut(
    block: &mut BasicBlock,
    callback: &mut MutationCallback,
) -> Result<bool> {
    let mut progress = false;

    for instruction in block.instructions.iter_mut() {
        match &mut instruction.kind {
            InstructionKind::Jump(jump) => {
                if let Some(predicate) = &mut jump.predicate {
                    progress |= callback(predicate)?;
                }
            }
            InstructionKind::Branch(branch) => {
                for (predicate, _) in branch.branches.iter_mut() {
                    progress |= callback(predicate)?;
                    progress |= function_argument_walker_mut(predicate, callback)?;
                }
            }
            _ => {
                progress |= array_walker_mut(instruction, callback)?;
                progress |= function_argument_walker_mut(instruction, callback)?;
                progress |= callback(instruction)?;
            }
        }
    }

    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Branch, Instruction, InstructionKind, Jump};

    fn boolean(value: bool) -> Instruction {
        Instruction::new(InstructionKind::Boolean(value))
    }

    #[test]
    fn block_walker_visits_reachable_blocks_once() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.new_block();
        let b = cfg.new_block();
        let join = cfg.new_block();

        cfg.entry_block_mut()
            .instructions
            .push(Instruction::new(InstructionKind::Branch(Branch {
                branches: vec![(boolean(true), a), (boolean(true), b)],
            })));
        cfg.link_nodes(cfg.entry, a);
        cfg.link_nodes(cfg.entry, b);

        for arm in [a, b] {
            cfg.blocks
                .get_mut(&arm)
                .unwrap()
                .instructions
                .push(Instruction::new(InstructionKind::Jump(Jump {
                    target: join,
                    predicate: None,
                })));
            cfg.link_nodes(arm, join);
        }

        let mut visited = Vec::new();
        let mut collect = |_: &mut ControlFlowGraph, id: BlockId| {
            visited.push(id);
            Ok(false)
        };
        block_walker(&mut cfg, &mut [&mut collect]).unwrap();

        // Later arms are visited before earlier ones; the join waits for all
        // of its predecessors.
        assert_eq!(visited, vec![cfg.entry, b, a, join]);
    }

    #[test]
    fn block_walker_ignores_unreachable_blocks() {
        let mut cfg = ControlFlowGraph::new();
        let orphan = cfg.new_block();

        let mut visited = Vec::new();
        let mut collect = |_: &mut ControlFlowGraph, id: BlockId| {
            visited.push(id);
            Ok(false)
        };
        block_walker(&mut cfg, &mut [&mut collect]).unwrap();

        assert!(!visited.contains(&orphan));
    }

    #[test]
    fn instruction_walker_replaces_and_keeps_the_variable() {
        let mut block = BasicBlock::default();
        let mut instruction = Instruction::new(InstructionKind::Number(1));
        instruction.var = crate::mir::Variable::versioned("x", 1);
        block.instructions.push(instruction);

        let mut bump = |i: &Instruction| {
            if let InstructionKind::Number(n) = i.kind {
                Ok(Some(Instruction::new(InstructionKind::Number(n + 1))))
            } else {
                Ok(None)
            }
        };
        let progress = instruction_walker(&mut block, &mut [], &mut [&mut bump]).unwrap();

        assert!(progress);
        assert_eq!(block.instructions[0].kind, InstructionKind::Number(2));
        assert_eq!(block.instructions[0].var.name, "x");
    }

    #[test]
    fn array_walker_recurses() {
        let mut instruction = Instruction::new(InstructionKind::Array(vec![
            Instruction::new(InstructionKind::Number(1)),
            Instruction::new(InstructionKind::Array(vec![Instruction::new(
                InstructionKind::Number(2),
            )])),
        ]));

        let mut count = 0usize;
        let mut counter = |_: &mut Instruction| {
            count += 1;
            Ok(false)
        };
        array_walker_mut(&mut instruction, &mut counter).unwrap();

        assert_eq!(count, 2);
    }

    #[test]
    fn function_walker_reaches_branch_predicates() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.new_block();
        cfg.entry_block_mut()
            .instructions
            .push(Instruction::new(InstructionKind::Branch(Branch {
                branches: vec![(
                    Instruction::new(InstructionKind::String("p".to_owned())),
                    a,
                )],
            })));

        let mut seen = Vec::new();
        let mut collect = |i: &Instruction| {
            if let InstructionKind::String(s) = &i.kind {
                seen.push(s.clone());
            }
            Ok(None)
        };
        function_walker(cfg.entry_block_mut(), &mut collect).unwrap();

        assert_eq!(seen, vec!["p".to_owned()]);
    }
}
