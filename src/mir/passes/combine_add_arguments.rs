//! Merge `AddArguments` nodes so the backend sees one per scope.
//!
//! Project and global argument nodes accumulate into the first node of their
//! scope in the block; the merged-away nodes are removed.

use crate::mir::{AddArguments, BlockId, ControlFlowGraph, InstructionKind};
use crate::Result;

pub fn combine_add_arguments(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get_mut(&id) else {
        return Ok(false);
    };

    let mut progress = false;
    let mut global: Option<usize> = None;
    let mut project: Option<usize> = None;

    let mut index = 0;
    while index < block.instructions.len() {
        let InstructionKind::AddArguments(args) = &block.instructions[index].kind else {
            index += 1;
            continue;
        };

        // TODO: project arguments can only be combined when they belong to
        // the same subproject
        let slot = if args.is_global { &mut global } else { &mut project };
        let Some(target) = *slot else {
            *slot = Some(index);
            index += 1;
            continue;
        };

        let removed = block.instructions.remove(index);
        let InstructionKind::AddArguments(AddArguments { arguments, .. }) = removed.kind else {
            unreachable!("checked above");
        };

        let InstructionKind::AddArguments(combined) = &mut block.instructions[target].kind
        else {
            unreachable!("targets are AddArguments nodes");
        };
        for (language, args) in arguments {
            combined.arguments.entry(language).or_default().extend(args);
        }
        progress = true;
    }

    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::arguments::{Argument, Type};
    use crate::mir::toolchains::Language;
    use crate::mir::{ArgMap, Instruction};

    fn add_args(is_global: bool, value: &str) -> Instruction {
        let mut arguments = ArgMap::new();
        arguments.insert(
            Language::Cpp,
            vec![Argument::new(value, Type::Define)],
        );
        Instruction::new(InstructionKind::AddArguments(AddArguments {
            arguments,
            is_global,
        }))
    }

    #[test]
    fn project_nodes_merge_into_the_first() {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.entry;
        let block = cfg.entry_block_mut();
        block.instructions.push(add_args(false, "a"));
        block.instructions.push(add_args(false, "b"));
        block.instructions.push(add_args(true, "g"));

        let progress = combine_add_arguments(&mut cfg, entry).unwrap();
        assert!(progress);

        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 2);

        let InstructionKind::AddArguments(project) = &entry.instructions[0].kind else {
            panic!("expected add_arguments");
        };
        assert!(!project.is_global);
        assert_eq!(project.arguments[&Language::Cpp].len(), 2);

        let InstructionKind::AddArguments(global) = &entry.instructions[1].kind else {
            panic!("expected add_arguments");
        };
        assert!(global.is_global);
        assert_eq!(global.arguments[&Language::Cpp].len(), 1);
    }

    #[test]
    fn single_nodes_are_untouched() {
        let mut cfg = ControlFlowGraph::new();
        let entry = cfg.entry;
        cfg.entry_block_mut().instructions.push(add_args(false, "a"));

        let progress = combine_add_arguments(&mut cfg, entry).unwrap();
        assert!(!progress);
    }
}
