//! Rewrite raw strings in a `custom_target` command's program slot into
//! `find_program()` calls, so program resolution happens in one place.

use crate::mir::passes::walkers::instruction_walker;
use crate::mir::{BlockId, ControlFlowGraph, FunctionCall, Instruction, InstructionKind};
use crate::Result;

fn replacement_impl(instruction: &mut Instruction) -> Result<bool> {
    let InstructionKind::FunctionCall(func) = &mut instruction.kind else {
        return Ok(false);
    };
    if func.name != "custom_target" {
        return Ok(false);
    }
    let source_dir = func.source_dir.clone();
    let Some(command) = func.kw_args.get_mut("command") else {
        return Ok(false);
    };

    match &mut command.kind {
        InstructionKind::Array(elements) => {
            let Some(first) = elements.first_mut() else {
                return Ok(false);
            };
            let InstructionKind::String(program) = &first.kind else {
                return Ok(false);
            };
            let call = FunctionCall::new(
                "find_program",
                vec![Instruction::new(InstructionKind::String(program.clone()))],
                source_dir,
            );
            *first = Instruction::new(InstructionKind::FunctionCall(Box::new(call)));
            Ok(true)
        }
        InstructionKind::String(program) => {
            let call = FunctionCall::new(
                "find_program",
                vec![Instruction::new(InstructionKind::String(program.clone()))],
                source_dir,
            );
            *command = Instruction::new(InstructionKind::Array(vec![Instruction::new(
                InstructionKind::FunctionCall(Box::new(call)),
            )]));
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub fn custom_target_program_replacement(
    cfg: &mut ControlFlowGraph,
    id: BlockId,
) -> Result<bool> {
    let Some(block) = cfg.blocks.get_mut(&id) else {
        return Ok(false);
    };

    instruction_walker(block, &mut [&mut replacement_impl], &mut [])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::lower;

    fn command_of(cfg: &ControlFlowGraph) -> Vec<InstructionKind> {
        let entry = cfg.entry_block();
        let InstructionKind::FunctionCall(func) = &entry.instructions[0].kind else {
            panic!("expected a call");
        };
        let InstructionKind::Array(elements) = &func.kw_args["command"].kind else {
            panic!("expected the command to be an array");
        };
        elements.iter().map(|e| e.kind.clone()).collect()
    }

    #[test]
    fn array_command_head_is_wrapped() {
        let mut cfg = lower(
            "custom_target('gen', output : 'out.c', command : ['prog', '@OUTPUT@'])",
        );
        let entry = cfg.entry;
        let progress = custom_target_program_replacement(&mut cfg, entry).unwrap();
        assert!(progress);

        let command = command_of(&cfg);
        let InstructionKind::FunctionCall(find) = &command[0] else {
            panic!("expected find_program, got {:?}", command[0]);
        };
        assert_eq!(find.name, "find_program");
        assert_eq!(
            find.pos_args[0].kind,
            InstructionKind::String("prog".to_owned())
        );
        // The rest of the command is untouched
        assert_eq!(command[1], InstructionKind::String("@OUTPUT@".to_owned()));
    }

    #[test]
    fn scalar_command_is_wrapped_into_an_array() {
        let mut cfg = lower("custom_target('gen', output : 'out.c', command : 'prog')");
        let entry = cfg.entry;
        custom_target_program_replacement(&mut cfg, entry).unwrap();

        let command = command_of(&cfg);
        assert_eq!(command.len(), 1);
        assert!(matches!(&command[0], InstructionKind::FunctionCall(f) if f.name == "find_program"));
    }

    #[test]
    fn second_run_is_a_fixed_point() {
        let mut cfg = lower("custom_target('gen', output : 'out.c', command : ['prog'])");
        let entry = cfg.entry;
        custom_target_program_replacement(&mut cfg, entry).unwrap();
        let progress = custom_target_program_replacement(&mut cfg, entry).unwrap();
        assert!(!progress);
    }

    #[test]
    fn other_calls_are_ignored() {
        let mut cfg = lower("executable('exe', 'main.c')");
        let entry = cfg.entry;
        let progress = custom_target_program_replacement(&mut cfg, entry).unwrap();
        assert!(!progress);
    }
}
