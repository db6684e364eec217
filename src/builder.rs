//! Program Builder
//!
//! Collects instructions and label declarations into an immutable
//! [`Program`]. Labels are plain names: a jump may name a label that is
//! declared later (or never); the engine looks the name up when the jump runs.

use crate::error::{RegForgeError, Result};
use crate::ir::{Instruction, Opcode, Operand, Program, Register};
use std::collections::BTreeMap;
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Register operand for one of ax/bx/cx/dx.
    pub fn register(&self, name: &str) -> Result<Operand> {
        name.parse::<Register>().map(Operand::Reg)
    }

    /// Classify an identifier used as an operand.
    ///
    /// Register names become register operands; every other name becomes a
    /// label reference. The label table is not consulted.
    pub fn resolve_identifier(&self, name: &str) -> Operand {
        match Register::from_name(name) {
            Some(reg) => Operand::Reg(reg),
            None => Operand::Label(name.to_string()),
        }
    }

    /// Bind `name` to the index of the next instruction to be emitted.
    /// Redeclaring a name moves it.
    pub fn declare_label(&mut self, name: &str) -> Result<Operand> {
        if name.is_empty() {
            return Err(RegForgeError::InvalidOperand(
                "label name must not be empty".to_string(),
            ));
        }
        if Register::from_name(name).is_some() || Opcode::from_mnemonic(name).is_some() {
            return Err(RegForgeError::InvalidOperand(format!(
                "'{}' is reserved and cannot name a label",
                name
            )));
        }

        let index = self.instructions.len();
        if let Some(previous) = self.labels.insert(name.to_string(), index) {
            debug!(label = name, previous, index, "label redeclared");
        }
        Ok(Operand::Label(name.to_string()))
    }

    /// Append an instruction after checking its operand shape.
    pub fn emit(&mut self, op: Opcode, operands: &[Operand]) -> Result<()> {
        let instr = shape(op, operands)?;
        trace!(index = self.instructions.len(), %instr, "emit");
        self.instructions.push(instr);
        Ok(())
    }

    pub fn finish(self) -> Program {
        Program::from_parts(self.instructions, self.labels)
    }

    pub fn mov(&mut self, dest: Register, src: impl Into<Operand>) -> Result<&mut Self> {
        self.emit(Opcode::Move, &[dest.into(), src.into()])?;
        Ok(self)
    }

    pub fn cmp(&mut self, a: Register, b: impl Into<Operand>) -> Result<&mut Self> {
        self.emit(Opcode::Compare, &[a.into(), b.into()])?;
        Ok(self)
    }

    pub fn inc(&mut self, dest: Register) -> Result<&mut Self> {
        self.emit(Opcode::Increment, &[dest.into()])?;
        Ok(self)
    }

    pub fn inc_by(&mut self, dest: Register, amount: impl Into<Operand>) -> Result<&mut Self> {
        self.emit(Opcode::Increment, &[dest.into(), amount.into()])?;
        Ok(self)
    }

    pub fn dec(&mut self, dest: Register) -> Result<&mut Self> {
        self.emit(Opcode::Decrement, &[dest.into()])?;
        Ok(self)
    }

    pub fn dec_by(&mut self, dest: Register, amount: impl Into<Operand>) -> Result<&mut Self> {
        self.emit(Opcode::Decrement, &[dest.into(), amount.into()])?;
        Ok(self)
    }

    pub fn jmp(&mut self, target: &str) -> Result<&mut Self> {
        self.jump(Opcode::Jump, target)
    }

    pub fn je(&mut self, target: &str) -> Result<&mut Self> {
        self.jump(Opcode::JumpEq, target)
    }

    pub fn jne(&mut self, target: &str) -> Result<&mut Self> {
        self.jump(Opcode::JumpNe, target)
    }

    pub fn jl(&mut self, target: &str) -> Result<&mut Self> {
        self.jump(Opcode::JumpLt, target)
    }

    pub fn jle(&mut self, target: &str) -> Result<&mut Self> {
        self.jump(Opcode::JumpLe, target)
    }

    pub fn jg(&mut self, target: &str) -> Result<&mut Self> {
        self.jump(Opcode::JumpGt, target)
    }

    pub fn jge(&mut self, target: &str) -> Result<&mut Self> {
        self.jump(Opcode::JumpGe, target)
    }

    fn jump(&mut self, op: Opcode, target: &str) -> Result<&mut Self> {
        if Opcode::from_mnemonic(target).is_some() {
            return Err(RegForgeError::InvalidOperand(format!(
                "'{}' is reserved and cannot be a jump target",
                target
            )));
        }
        let target = self.resolve_identifier(target);
        self.emit(op, &[target])?;
        Ok(self)
    }
}

/// Check arity and operand roles, filling in the default amount for inc/dec.
fn shape(op: Opcode, operands: &[Operand]) -> Result<Instruction> {
    let (min, max) = match op {
        Opcode::Move | Opcode::Compare => (2, 2),
        Opcode::Increment | Opcode::Decrement => (1, 2),
        _ => (1, 1),
    };
    if operands.len() < min || operands.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} or {}", min, max)
        };
        return Err(RegForgeError::InvalidOperand(format!(
            "{} takes {} operand(s), got {}",
            op,
            expected,
            operands.len()
        )));
    }

    if op.is_jump() {
        let target = expect_label(op, &operands[0])?;
        return Ok(Instruction {
            op,
            dest: target,
            src: None,
        });
    }

    let dest = expect_register(op, &operands[0])?;
    let src = match operands.get(1) {
        Some(operand) => expect_value(op, operand)?,
        None => Operand::Imm(1),
    };
    Ok(Instruction {
        op,
        dest,
        src: Some(src),
    })
}

fn expect_register(op: Opcode, operand: &Operand) -> Result<Operand> {
    match operand {
        Operand::Reg(_) => Ok(operand.clone()),
        other => Err(mismatch(op, 1, "register", other)),
    }
}

fn expect_value(op: Opcode, operand: &Operand) -> Result<Operand> {
    match operand {
        Operand::Reg(_) | Operand::Imm(_) => Ok(operand.clone()),
        other => Err(mismatch(op, 2, "register or immediate", other)),
    }
}

fn expect_label(op: Opcode, operand: &Operand) -> Result<Operand> {
    match operand {
        Operand::Label(_) => Ok(operand.clone()),
        other => Err(mismatch(op, 1, "label", other)),
    }
}

fn mismatch(op: Opcode, position: usize, expected: &str, actual: &Operand) -> RegForgeError {
    RegForgeError::InvalidOperand(format!(
        "{} expected operand {} to be a {} but got {} '{}'",
        op,
        position,
        expected,
        actual.kind(),
        actual
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Register::*;

    #[test]
    fn test_register_operand() {
        let b = ProgramBuilder::new();
        assert_eq!(b.register("bx"), Ok(Operand::Reg(Bx)));
        assert_eq!(
            b.register("ex"),
            Err(RegForgeError::UnknownRegister("ex".to_string()))
        );
    }

    #[test]
    fn test_resolve_identifier_never_consults_labels() {
        let mut b = ProgramBuilder::new();
        let forward = b.resolve_identifier("done");
        b.declare_label("done").unwrap();
        let backward = b.resolve_identifier("done");
        assert_eq!(forward, backward);
        assert_eq!(forward, Operand::Label("done".to_string()));
        assert_eq!(b.resolve_identifier("CX"), Operand::Reg(Cx));
    }

    #[test]
    fn test_declare_label_uses_next_index() {
        let mut b = ProgramBuilder::new();
        b.declare_label("start").unwrap();
        b.inc(Ax).unwrap().inc(Ax).unwrap();
        b.declare_label("middle").unwrap();
        b.dec(Ax).unwrap();
        b.declare_label("end").unwrap();
        let program = b.finish();
        assert_eq!(program.label("start"), Some(0));
        assert_eq!(program.label("middle"), Some(2));
        assert_eq!(program.label("end"), Some(3));
    }

    #[test]
    fn test_redeclared_label_last_wins() {
        let mut b = ProgramBuilder::new();
        b.declare_label("here").unwrap();
        b.inc(Ax).unwrap();
        b.declare_label("here").unwrap();
        assert_eq!(b.finish().label("here"), Some(1));
    }

    #[test]
    fn test_reserved_label_names() {
        let mut b = ProgramBuilder::new();
        assert!(matches!(
            b.declare_label("ax"),
            Err(RegForgeError::InvalidOperand(_))
        ));
        assert!(matches!(
            b.declare_label("jmp"),
            Err(RegForgeError::InvalidOperand(_))
        ));
        assert!(matches!(
            b.declare_label(""),
            Err(RegForgeError::InvalidOperand(_))
        ));
    }

    #[test]
    fn test_default_amount_is_materialized() {
        let mut b = ProgramBuilder::new();
        b.inc(Ax).unwrap().dec_by(Bx, Cx).unwrap();
        let program = b.finish();
        assert_eq!(program.instructions()[0].src, Some(Operand::Imm(1)));
        assert_eq!(program.instructions()[1].src, Some(Operand::Reg(Cx)));
    }

    #[test]
    fn test_arity_is_checked() {
        let mut b = ProgramBuilder::new();
        assert!(b.emit(Opcode::Move, &[Operand::Reg(Ax)]).is_err());
        assert!(b
            .emit(
                Opcode::Increment,
                &[Operand::Reg(Ax), Operand::Imm(1), Operand::Imm(2)]
            )
            .is_err());
        assert!(b.emit(Opcode::Jump, &[]).is_err());
        assert!(b
            .emit(
                Opcode::JumpEq,
                &[Operand::Label("a".into()), Operand::Label("b".into())]
            )
            .is_err());
        assert!(b.is_empty());
    }

    #[test]
    fn test_operand_roles_are_checked() {
        let mut b = ProgramBuilder::new();
        let err = b
            .emit(Opcode::Move, &[Operand::Imm(1), Operand::Reg(Ax)])
            .unwrap_err();
        assert!(err.to_string().contains("register"));
        assert!(b
            .emit(Opcode::Compare, &[Operand::Reg(Ax), Operand::Label("x".into())])
            .is_err());
        assert!(b.emit(Opcode::JumpLt, &[Operand::Imm(3)]).is_err());
        assert!(b.jmp("bx").is_err());
        assert!(b.is_empty());
    }

    #[test]
    fn test_jump_to_reserved_name_fails_at_build_time() {
        let mut b = ProgramBuilder::new();
        assert!(matches!(
            b.jmp("mov"),
            Err(RegForgeError::InvalidOperand(_))
        ));
        assert!(matches!(
            b.jge("JUMP_EQ"),
            Err(RegForgeError::InvalidOperand(_))
        ));
        assert!(b.is_empty());
    }

    #[test]
    fn test_forward_jump_builds_without_declaration() {
        let mut b = ProgramBuilder::new();
        b.jmp("later").unwrap();
        let program = b.finish();
        assert_eq!(program.len(), 1);
        assert_eq!(program.label("later"), None);
    }
}
