//! Lowers the AST into the initial MIR control flow graph.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::frontend::ast::{
    Assignment, AssignOp, BinaryOp, CodeBlock, ConditionedBlock, Expression, ExpressionKind,
    Statement, StatementKind, UnaryOp,
};
use crate::mir::{
    BasicBlock, BlockId, Branch, ControlFlowGraph, FunctionCall, Identifier, Instruction,
    InstructionKind, Jump,
};
use crate::{Error, Result};

struct AstLowering {
    cfg: ControlFlowGraph,
    source_dir: PathBuf,
}

impl AstLowering {
    fn lower_expression(&self, expr: &Expression) -> Result<Instruction> {
        let kind = match &expr.kind {
            ExpressionKind::String(value) => InstructionKind::String(value.clone()),
            ExpressionKind::Boolean(value) => InstructionKind::Boolean(*value),
            ExpressionKind::Number(value) => InstructionKind::Number(*value),
            ExpressionKind::Identifier(name) => {
                InstructionKind::Identifier(Identifier::new(name.clone()))
            }
            ExpressionKind::Array(elements) => InstructionKind::Array(
                elements
                    .iter()
                    .map(|e| self.lower_expression(e))
                    .collect::<Result<_>>()?,
            ),
            ExpressionKind::Dict(entries) => {
                let mut value = HashMap::new();
                for (key, entry) in entries {
                    let key = self.lower_expression(key)?;
                    let InstructionKind::String(key) = key.kind else {
                        return Err(Error::invalid_arguments("Dictionary keys must be string"));
                    };
                    value.insert(key, self.lower_expression(entry)?);
                }
                InstructionKind::Dict(value)
            }
            ExpressionKind::FunctionCall(call) => {
                // Only identifiers are callable
                let callee = self.lower_expression(&call.callee)?;
                let InstructionKind::Identifier(name) = callee.kind else {
                    return Err(Error::meson("Object is not callable"));
                };

                let mut pos = Vec::with_capacity(call.args.positional.len());
                for arg in &call.args.positional {
                    pos.push(self.lower_expression(arg)?);
                }

                let mut func =
                    FunctionCall::new(name.name, pos, self.source_dir.clone());
                for (key, value) in &call.args.keyword {
                    func.kw_args
                        .insert(key.clone(), self.lower_expression(value)?);
                }

                InstructionKind::FunctionCall(Box::new(func))
            }
            ExpressionKind::GetAttribute(attr) => {
                let holder = self.lower_expression(&attr.holder)?;

                // Only methods live in objects, so the held expression must
                // be a call. Lowering the holder first means chained methods
                // resolve left to right.
                let held = self.lower_expression(&attr.held)?;
                let InstructionKind::FunctionCall(mut func) = held.kind else {
                    return Err(Error::meson("Object is not callable"));
                };
                func.holder = Some(holder);

                InstructionKind::FunctionCall(func)
            }
            ExpressionKind::Unary(op, operand) => {
                let name = match op {
                    UnaryOp::Not => "unary_not",
                    UnaryOp::Neg => "unary_neg",
                };
                let operand = self.lower_expression(operand)?;
                InstructionKind::FunctionCall(Box::new(FunctionCall::new(
                    name,
                    vec![operand],
                    self.source_dir.clone(),
                )))
            }
            ExpressionKind::Binary(op, lhs, rhs) => {
                let name = match op {
                    BinaryOp::Add => "arith_add",
                    BinaryOp::Sub => "arith_sub",
                    BinaryOp::Mul => "arith_mul",
                    BinaryOp::Div => "arith_div",
                    BinaryOp::Mod => "arith_mod",
                    BinaryOp::Eq => "rel_eq",
                    BinaryOp::Ne => "rel_ne",
                    BinaryOp::Gt => "rel_gt",
                    BinaryOp::Ge => "rel_ge",
                    BinaryOp::Lt => "rel_lt",
                    BinaryOp::Le => "rel_le",
                    BinaryOp::And => "logic_and",
                    BinaryOp::Or => "logic_or",
                    BinaryOp::In => "contains",
                    BinaryOp::NotIn => "not_contains",
                };
                let lhs = self.lower_expression(lhs)?;
                let rhs = self.lower_expression(rhs)?;
                InstructionKind::FunctionCall(Box::new(FunctionCall::new(
                    name,
                    vec![lhs, rhs],
                    self.source_dir.clone(),
                )))
            }
            ExpressionKind::FString(_) => {
                InstructionKind::String("placeholder: fstring".to_owned())
            }
            ExpressionKind::Subscript(..) => {
                InstructionKind::String("placeholder: subscript".to_owned())
            }
            ExpressionKind::Ternary(..) => {
                InstructionKind::String("placeholder: ternary".to_owned())
            }
        };

        Ok(Instruction::new(kind))
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.cfg.blocks.get_mut(&id).expect("lowering into a live block")
    }

    /// Lower one statement into `current`, returning the block subsequent
    /// statements should lower into.
    fn lower_statement(&mut self, current: BlockId, stmt: &Statement) -> Result<BlockId> {
        match &stmt.kind {
            StatementKind::Expression(expr) => {
                let instruction = self.lower_expression(expr)?;
                self.block_mut(current).instructions.push(instruction);
                Ok(current)
            }
            StatementKind::Assignment(assign) => {
                self.lower_assignment(current, assign)?;
                Ok(current)
            }
            StatementKind::If(stmt) => {
                let mut arms: Vec<&ConditionedBlock> = vec![&stmt.if_block];
                arms.extend(stmt.elif_blocks.iter());

                // All arms flow back into this block. Even when the bodies
                // never really rejoin it stays as a harmless empty block, and
                // it is where phis get inserted.
                let join = self.cfg.new_block();

                let mut entries = Vec::with_capacity(arms.len() + 1);

                for arm in arms {
                    let predicate = self.lower_expression(&arm.condition)?;
                    let target = self.lower_arm(current, join, &arm.block)?;
                    entries.push((predicate, target));
                }

                // Synthesize an `else` with a constant-true predicate, so
                // that not taking any real arm still proceeds to the join
                // and later passes can assume the web is total.
                let else_predicate = Instruction::new(InstructionKind::Boolean(true));
                let empty = CodeBlock::default();
                let else_block = stmt.else_block.as_ref().unwrap_or(&empty);
                let target = self.lower_arm(current, join, else_block)?;
                entries.push((else_predicate, target));

                self.block_mut(current)
                    .instructions
                    .push(Instruction::new(InstructionKind::Branch(Branch {
                        branches: entries,
                    })));

                Ok(join)
            }
            // Loops are not evaluated; leave a marker the passes tolerate
            StatementKind::Foreach(_) => {
                self.block_mut(current).instructions.push(Instruction::new(
                    InstructionKind::String("placeholder: foreach".to_owned()),
                ));
                Ok(current)
            }
            StatementKind::Break | StatementKind::Continue => Ok(current),
        }
    }

    /// Lower one arm body into a fresh block ending in a jump to `join`.
    fn lower_arm(&mut self, from: BlockId, join: BlockId, body: &CodeBlock) -> Result<BlockId> {
        let arm = self.cfg.new_block();
        self.cfg.link_nodes(from, arm);

        let mut last = arm;
        for stmt in &body.statements {
            last = self.lower_statement(last, stmt)?;
        }

        self.block_mut(last)
            .instructions
            .push(Instruction::new(InstructionKind::Jump(Jump {
                target: join,
                predicate: None,
            })));
        self.cfg.link_nodes(last, join);

        Ok(arm)
    }

    fn lower_assignment(&mut self, current: BlockId, assign: &Assignment) -> Result<()> {
        if assign.op != AssignOp::Equal {
            return Err(Error::meson("Mutating assignment is not implemented"));
        }

        let target = self.lower_expression(&assign.lhs)?;
        let mut value = self.lower_expression(&assign.rhs)?;

        let InstructionKind::Identifier(name) = target.kind else {
            return Err(Error::meson(
                "This might be a bug, or might be an incomplete implementation",
            ));
        };
        value.var.name = name.name;

        self.block_mut(current).instructions.push(value);
        Ok(())
    }
}

/// Lower an AST code block into MIR.
pub fn lower_ast(block: &CodeBlock, source_dir: &Path) -> Result<ControlFlowGraph> {
    let mut lowering = AstLowering {
        cfg: ControlFlowGraph::new(),
        source_dir: source_dir.to_path_buf(),
    };

    let mut current = lowering.cfg.entry;
    for stmt in &block.statements {
        current = lowering.lower_statement(current, stmt)?;
    }

    Ok(lowering.cfg)
}
