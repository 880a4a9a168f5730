//! Lower away machine related information.
//!
//! Replaces method calls on `build_machine`, `host_machine`, and
//! `target_machine` with constants from the machine info table.

use crate::mir::machines::{Endian, Info, Machine, PerMachine};
use crate::mir::passes::walkers::function_walker;
use crate::mir::{BlockId, ControlFlowGraph, Instruction, InstructionKind};
use crate::{Error, Result};

fn machine_map(name: &str) -> Option<Machine> {
    match name {
        "build_machine" => Some(Machine::Build),
        "host_machine" => Some(Machine::Host),
        "target_machine" => Some(Machine::Target),
        _ => None,
    }
}

fn lower_method(holder: &str, name: &str, info: &Info) -> Result<InstructionKind> {
    match name {
        "cpu_family" => Ok(InstructionKind::String(info.cpu_family.clone())),
        "cpu" => Ok(InstructionKind::String(info.cpu.clone())),
        "system" => Ok(InstructionKind::String(info.system())),
        "endian" => Ok(InstructionKind::String(
            match info.endian {
                Endian::Little => "little",
                Endian::Big => "big",
            }
            .to_owned(),
        )),
        _ => Err(Error::meson(format!("{holder} has no method {name}"))),
    }
}

pub fn machine_lower(
    cfg: &mut ControlFlowGraph,
    id: BlockId,
    machines: &PerMachine<Info>,
) -> Result<bool> {
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
        let InstructionKind::Identifier(holder) = &holder.kind else {
            return Ok(None);
        };
        let Some(machine) = machine_map(&holder.name) else {
            return Ok(None);
        };

        let info = machines.get(machine);
        Ok(Some(Instruction::new(lower_method(
            &holder.name,
            &func.name,
            info,
        )?)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::machines::Kernel;
    use crate::mir::passes::test_support::lower;

    fn info() -> PerMachine<Info> {
        PerMachine::new(Info::new(
            Machine::Build,
            Kernel::Linux,
            Endian::Little,
            "x86_64",
        ))
    }

    #[test]
    fn methods_lower_to_strings() {
        let mut cfg = lower("x = 7\ny = host_machine.cpu_family()");
        let entry = cfg.entry;
        let progress = machine_lower(&mut cfg, entry, &info()).unwrap();
        assert!(progress);

        let entry = cfg.entry_block();
        assert_eq!(
            entry.instructions[1].kind,
            InstructionKind::String("x86_64".to_owned())
        );
        assert_eq!(entry.instructions[1].var.name, "y");
    }

    #[test]
    fn lowering_reaches_into_arrays() {
        let mut cfg = lower("x = [host_machine.cpu_family()]");
        let entry = cfg.entry;
        machine_lower(&mut cfg, entry, &info()).unwrap();

        let entry = cfg.entry_block();
        let InstructionKind::Array(elements) = &entry.instructions[0].kind else {
            panic!("expected an array");
        };
        assert_eq!(
            elements[0].kind,
            InstructionKind::String("x86_64".to_owned())
        );
    }

    #[test]
    fn lowering_reaches_into_call_arguments() {
        let mut cfg = lower("foo(host_machine.endian())");
        let entry = cfg.entry;
        machine_lower(&mut cfg, entry, &info()).unwrap();

        let entry = cfg.entry_block();
        let InstructionKind::FunctionCall(func) = &entry.instructions[0].kind else {
            panic!("expected a call");
        };
        assert_eq!(
            func.pos_args[0].kind,
            InstructionKind::String("little".to_owned())
        );
    }

    #[test]
    fn lowering_reaches_into_conditions() {
        let mut cfg = lower("if host_machine.cpu_family()\n x = 2\nendif");
        let entry = cfg.entry;
        machine_lower(&mut cfg, entry, &info()).unwrap();

        let entry = cfg.entry_block();
        let InstructionKind::Branch(branch) = &entry.instructions.last().unwrap().kind else {
            panic!("expected a branch");
        };
        assert_eq!(
            branch.branches[0].0.kind,
            InstructionKind::String("x86_64".to_owned())
        );
    }

    #[test]
    fn unknown_methods_are_an_error() {
        let mut cfg = lower("host_machine.flavor()");
        let entry = cfg.entry;
        assert!(machine_lower(&mut cfg, entry, &info()).is_err());
    }

    #[test]
    fn other_holders_are_ignored() {
        let mut cfg = lower("foo.bar()");
        let entry = cfg.entry;
        let progress = machine_lower(&mut cfg, entry, &info()).unwrap();
        assert!(!progress);
    }
}
