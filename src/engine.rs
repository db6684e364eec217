//! Execution Engine
//!
//! Runs a finished [`Program`] from instruction 0 until the program counter
//! leaves the instruction range. Each run owns its registers, flag and
//! counter; the program itself is only read.

use crate::error::{ExecutionLimits, RegForgeError, Result};
use crate::ir::{Flag, Instruction, Opcode, Operand, Program, Registers};
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Result of a run with its bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Execution {
    pub registers: Registers,
    /// Instructions dispatched
    pub steps: u64,
    /// Flag left by the last compare
    pub flag: Flag,
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    limits: ExecutionLimits,
}

impl Engine {
    /// Engine without a step limit.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Run `program` and return the final registers.
    pub fn run(&self, program: &Program) -> Result<Registers> {
        self.execute(program).map(|execution| execution.registers)
    }

    /// Run `program` and also report step count and final flag.
    pub fn execute(&self, program: &Program) -> Result<Execution> {
        debug!(
            instructions = program.len(),
            labels = program.labels().len(),
            "run start"
        );

        let mut machine = Machine::default();
        while let Some(instr) = program.instructions().get(machine.pc) {
            if let Err(e) = self.limits.check_steps(machine.steps) {
                warn!(steps = machine.steps, pc = machine.pc, "step limit reached");
                return Err(e);
            }
            trace!(pc = machine.pc, %instr, flag = ?machine.flag, "dispatch");
            machine.step(program, instr)?;
            machine.steps += 1;
        }

        debug!(steps = machine.steps, pc = machine.pc, "run finished");
        Ok(Execution {
            registers: machine.registers,
            steps: machine.steps,
            flag: machine.flag,
        })
    }
}

/// Mutable state of a single run.
#[derive(Debug, Default)]
struct Machine {
    registers: Registers,
    pc: usize,
    flag: Flag,
    steps: u64,
}

impl Machine {
    fn step(&mut self, program: &Program, instr: &Instruction) -> Result<()> {
        match instr.op {
            Opcode::Move => {
                let value = self.value(src(instr)?)?;
                *self.dest(&instr.dest)? = value;
                self.pc += 1;
            }
            Opcode::Increment => {
                let amount = self.value(src(instr)?)?;
                let dest = self.dest(&instr.dest)?;
                *dest = dest.wrapping_add(amount);
                self.pc += 1;
            }
            Opcode::Decrement => {
                let amount = self.value(src(instr)?)?;
                let dest = self.dest(&instr.dest)?;
                *dest = dest.wrapping_sub(amount);
                self.pc += 1;
            }
            Opcode::Compare => {
                let a = self.value(&instr.dest)?;
                let b = self.value(src(instr)?)?;
                self.flag = Flag::from(a.cmp(&b));
                self.pc += 1;
            }
            op => {
                if op.branch_taken(self.flag) {
                    self.pc = resolve(program, &instr.dest)?;
                } else {
                    self.pc += 1;
                }
            }
        }
        Ok(())
    }

    /// Current value of a source operand.
    fn value(&self, operand: &Operand) -> Result<i64> {
        match operand {
            Operand::Reg(reg) => Ok(self.registers.get(*reg)),
            Operand::Imm(value) => Ok(*value),
            Operand::Label(name) => Err(RegForgeError::InvalidOperand(format!(
                "label '{}' used as a value",
                name
            ))),
        }
    }

    fn dest(&mut self, operand: &Operand) -> Result<&mut i64> {
        match operand {
            Operand::Reg(reg) => Ok(self.registers.get_mut(*reg)),
            other => Err(RegForgeError::InvalidOperand(format!(
                "{} '{}' used as a destination",
                other.kind(),
                other
            ))),
        }
    }
}

fn src(instr: &Instruction) -> Result<&Operand> {
    instr.src.as_ref().ok_or_else(|| {
        RegForgeError::InvalidOperand(format!("{} is missing its second operand", instr.op))
    })
}

/// Look the jump target up by name, every time.
fn resolve(program: &Program, target: &Operand) -> Result<usize> {
    match target {
        Operand::Label(name) => program
            .label(name)
            .ok_or_else(|| RegForgeError::UnresolvedLabel(name.clone())),
        other => Err(RegForgeError::InvalidOperand(format!(
            "{} '{}' used as a jump target",
            other.kind(),
            other
        ))),
    }
}

/// Pure fold of straight-line register effects, for checking the engine.
#[cfg(test)]
pub(crate) fn fold_straight_line(program: &Program) -> Registers {
    let mut regs = Registers::default();
    for instr in program.instructions() {
        let Operand::Reg(dest) = instr.dest else {
            continue;
        };
        let value = match instr.src {
            Some(Operand::Reg(reg)) => regs.get(reg),
            Some(Operand::Imm(value)) => value,
            _ => continue,
        };
        let slot = regs.get_mut(dest);
        match instr.op {
            Opcode::Move => *slot = value,
            Opcode::Increment => *slot = slot.wrapping_add(value),
            Opcode::Decrement => *slot = slot.wrapping_sub(value),
            _ => {}
        }
    }
    regs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::ir::Register::{self, *};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_empty_program_halts_immediately() {
        let execution = Engine::new().execute(&ProgramBuilder::new().finish()).unwrap();
        assert_eq!(execution.registers, Registers::default());
        assert_eq!(execution.steps, 0);
        assert_eq!(execution.flag, Flag::Equal);
    }

    #[test]
    fn test_jump_greater_skips_write() {
        let mut b = ProgramBuilder::new();
        b.mov(Ax, 5).unwrap().mov(Bx, 3).unwrap().cmp(Ax, Bx).unwrap();
        b.jg("l").unwrap().mov(Cx, 0).unwrap();
        b.declare_label("l").unwrap();
        b.mov(Cx, 1).unwrap();
        let regs = Engine::new().run(&b.finish()).unwrap();
        assert_eq!(regs.to_array(), [5, 3, 1, 0]);
    }

    #[test]
    fn test_backward_loop() {
        let mut b = ProgramBuilder::new();
        b.declare_label("l").unwrap();
        b.inc(Ax).unwrap().cmp(Ax, 3).unwrap().jl("l").unwrap();
        let execution = Engine::new().execute(&b.finish()).unwrap();
        assert_eq!(execution.registers.ax, 3);
        assert_eq!(execution.steps, 9);
        assert_eq!(execution.flag, Flag::Equal);
    }

    #[test]
    fn test_decrement_has_no_lower_bound() {
        let mut b = ProgramBuilder::new();
        b.dec(Dx).unwrap();
        assert_eq!(Engine::new().run(&b.finish()).unwrap().dx, -1);
    }

    #[test]
    fn test_source_is_read_by_value() {
        let mut b = ProgramBuilder::new();
        b.mov(Bx, 7).unwrap().mov(Ax, Bx).unwrap().inc_by(Bx, 100).unwrap();
        let regs = Engine::new().run(&b.finish()).unwrap();
        assert_eq!(regs.ax, 7);
        assert_eq!(regs.bx, 107);
    }

    #[test]
    fn test_unresolved_label_fails_at_run_time() {
        let mut b = ProgramBuilder::new();
        b.inc(Ax).unwrap().jmp("nowhere").unwrap();
        let program = b.finish();
        assert_eq!(
            Engine::new().run(&program),
            Err(RegForgeError::UnresolvedLabel("nowhere".to_string()))
        );
    }

    #[test]
    fn test_untaken_jump_to_missing_label_is_fine() {
        let mut b = ProgramBuilder::new();
        b.cmp(Ax, 1).unwrap().jg("nowhere").unwrap().mov(Bx, 2).unwrap();
        assert_eq!(Engine::new().run(&b.finish()).unwrap().bx, 2);
    }

    #[test]
    fn test_forward_and_backward_references() {
        let mut forward = ProgramBuilder::new();
        forward.mov(Ax, 1).unwrap().jmp("skip").unwrap().mov(Ax, 2).unwrap();
        forward.declare_label("skip").unwrap();
        forward.inc(Ax).unwrap();

        let mut backward = ProgramBuilder::new();
        backward.mov(Ax, 1).unwrap();
        let label = backward.declare_label("skip").unwrap();
        assert_eq!(label, Operand::Label("skip".to_string()));
        backward.inc(Ax).unwrap().cmp(Ax, 3).unwrap().jl("skip").unwrap();

        assert_eq!(Engine::new().run(&forward.finish()).unwrap().ax, 2);
        assert_eq!(Engine::new().run(&backward.finish()).unwrap().ax, 3);
    }

    #[test]
    fn test_redeclared_label_uses_final_binding() {
        let mut b = ProgramBuilder::new();
        b.declare_label("target").unwrap();
        b.jmp("target").unwrap();
        b.mov(Ax, 1).unwrap();
        // Rebinding "target" past the end turns the first jump into a halt.
        b.mov(Bx, 2).unwrap();
        b.declare_label("target").unwrap();
        let regs = Engine::new().run(&b.finish()).unwrap();
        assert_eq!(regs.to_array(), [0, 0, 0, 0]);
    }

    #[test]
    fn test_conditional_jumps_follow_flag() {
        let cases = [
            ("je", 3, true),
            ("je", 4, false),
            ("jne", 4, true),
            ("jne", 3, false),
            ("jl", 2, false),
            ("jl", 4, true),
            ("jle", 3, true),
            ("jle", 2, false),
            ("jg", 2, true),
            ("jg", 3, false),
            ("jge", 3, true),
            ("jge", 4, false),
        ];
        for (mnemonic, rhs, taken) in cases {
            let mut b = ProgramBuilder::new();
            b.mov(Ax, 3).unwrap().cmp(Ax, rhs).unwrap();
            let target = b.resolve_identifier("out");
            b.emit(Opcode::from_mnemonic(mnemonic).unwrap(), &[target])
                .unwrap();
            b.mov(Cx, 1).unwrap();
            b.declare_label("out").unwrap();
            let regs = Engine::new().run(&b.finish()).unwrap();
            assert_eq!(regs.cx == 0, taken, "{} with 3 vs {}", mnemonic, rhs);
        }
    }

    #[test]
    fn test_compare_does_not_mutate_and_flag_is_stable() {
        let mut b = ProgramBuilder::new();
        b.mov(Ax, 1).unwrap().mov(Bx, 2).unwrap().cmp(Ax, Bx).unwrap();
        b.jl("a").unwrap().mov(Dx, 99).unwrap();
        b.declare_label("a").unwrap();
        b.jl("b").unwrap().mov(Dx, 98).unwrap();
        b.declare_label("b").unwrap();
        b.jge("c").unwrap().inc(Cx).unwrap();
        b.declare_label("c").unwrap();
        let execution = Engine::new().execute(&b.finish()).unwrap();
        assert_eq!(execution.registers.to_array(), [1, 2, 1, 0]);
        assert_eq!(execution.flag, Flag::Less);
    }

    #[test]
    fn test_step_limit_is_opt_in() {
        let mut b = ProgramBuilder::new();
        b.declare_label("spin").unwrap();
        b.inc(Ax).unwrap().jmp("spin").unwrap();
        let program = b.finish();

        let engine = Engine::with_limits(ExecutionLimits::default().with_max_steps(101));
        let err = engine.run(&program).unwrap_err();
        assert!(matches!(err, RegForgeError::ResourceLimitExceeded(_)));

        let mut ok = ProgramBuilder::new();
        ok.inc(Ax).unwrap().inc(Ax).unwrap();
        let engine = Engine::with_limits(ExecutionLimits::default().with_max_steps(2));
        assert_eq!(engine.run(&ok.finish()).unwrap().ax, 2);
    }

    #[test]
    fn test_arithmetic_wraps() {
        let mut b = ProgramBuilder::new();
        b.mov(Ax, i64::MAX).unwrap().inc(Ax).unwrap();
        b.mov(Bx, i64::MIN).unwrap().dec(Bx).unwrap();
        let regs = Engine::new().run(&b.finish()).unwrap();
        assert_eq!(regs.ax, i64::MIN);
        assert_eq!(regs.bx, i64::MAX);
    }

    #[test]
    fn test_rerun_is_pure() {
        let mut b = ProgramBuilder::new();
        b.declare_label("l").unwrap();
        b.inc_by(Bx, 2).unwrap().inc(Ax).unwrap().cmp(Ax, 10).unwrap().jne("l").unwrap();
        let program = b.finish();
        let engine = Engine::new();
        let first = engine.run(&program).unwrap();
        let second = engine.run(&program).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.bx, 20);
    }

    #[test]
    fn test_straight_line_matches_fold() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let ops = [Opcode::Move, Opcode::Increment, Opcode::Decrement];
        for _ in 0..200 {
            let mut b = ProgramBuilder::new();
            for _ in 0..rng.gen_range(0..40) {
                let op = ops[rng.gen_range(0..ops.len())];
                let dest = Register::ALL[rng.gen_range(0..4)];
                let src = if rng.gen_bool(0.5) {
                    Operand::Reg(Register::ALL[rng.gen_range(0..4)])
                } else {
                    Operand::Imm(rng.gen_range(-1000..1000))
                };
                b.emit(op, &[Operand::Reg(dest), src]).unwrap();
            }
            let program = b.finish();
            assert_eq!(
                Engine::new().run(&program).unwrap(),
                fold_straight_line(&program)
            );
        }
    }
}
