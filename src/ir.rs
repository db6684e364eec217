use crate::error::{RegForgeError, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One of the four machine registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Ax,
    Bx,
    Cx,
    Dx,
}

impl Register {
    /// All registers in result order.
    pub const ALL: [Register; 4] = [Register::Ax, Register::Bx, Register::Cx, Register::Dx];

    pub fn index(self) -> usize {
        match self {
            Register::Ax => 0,
            Register::Bx => 1,
            Register::Cx => 2,
            Register::Dx => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Ax => "ax",
            Register::Bx => "bx",
            Register::Cx => "cx",
            Register::Dx => "dx",
        }
    }

    /// Case-insensitive lookup; `None` for anything but the four names.
    pub fn from_name(name: &str) -> Option<Register> {
        Register::ALL
            .into_iter()
            .find(|reg| reg.name().eq_ignore_ascii_case(name))
    }
}

impl FromStr for Register {
    type Err = RegForgeError;

    fn from_str(s: &str) -> Result<Self> {
        Register::from_name(s).ok_or_else(|| RegForgeError::UnknownRegister(s.to_string()))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Operand {
    Reg(Register), // Register reference
    Imm(i64),      // Immediate value
    Label(String), // Jump target, resolved by name at run time
}

impl Operand {
    /// Operand kind for error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Operand::Reg(_) => "register",
            Operand::Imm(_) => "immediate",
            Operand::Label(_) => "label",
        }
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Operand::Reg(reg)
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Imm(value)
    }
}

// Unsuffixed literals default to i32
impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Imm(i64::from(value))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Imm(value) => write!(f, "{}", value),
            Operand::Label(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    /// Move dest, src (dest = src)
    Move,
    /// Compare a, b (sets the flag)
    Compare,
    /// Increment dest[, n] (dest += n, n defaults to 1)
    Increment,
    /// Decrement dest[, n] (dest -= n, n defaults to 1)
    Decrement,
    /// Unconditional Jump
    Jump,
    /// Jump Equal
    JumpEq,
    /// Jump Not Equal
    JumpNe,
    /// Jump Less
    JumpLt,
    /// Jump Less or Equal
    JumpLe,
    /// Jump Greater
    JumpGt,
    /// Jump Greater or Equal
    JumpGe,
}

impl Opcode {
    pub const ALL: [Opcode; 11] = [
        Opcode::Move,
        Opcode::Compare,
        Opcode::Increment,
        Opcode::Decrement,
        Opcode::Jump,
        Opcode::JumpEq,
        Opcode::JumpNe,
        Opcode::JumpLt,
        Opcode::JumpLe,
        Opcode::JumpGt,
        Opcode::JumpGe,
    ];

    /// Short assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Move => "mov",
            Opcode::Compare => "cmp",
            Opcode::Increment => "inc",
            Opcode::Decrement => "dec",
            Opcode::Jump => "jmp",
            Opcode::JumpEq => "je",
            Opcode::JumpNe => "jne",
            Opcode::JumpLt => "jl",
            Opcode::JumpLe => "jle",
            Opcode::JumpGt => "jg",
            Opcode::JumpGe => "jge",
        }
    }

    fn long_name(self) -> &'static str {
        match self {
            Opcode::Move => "move",
            Opcode::Compare => "compare",
            Opcode::Increment => "increment",
            Opcode::Decrement => "decrement",
            Opcode::Jump => "jump",
            Opcode::JumpEq => "jump_eq",
            Opcode::JumpNe => "jump_ne",
            Opcode::JumpLt => "jump_lt",
            Opcode::JumpLe => "jump_le",
            Opcode::JumpGt => "jump_gt",
            Opcode::JumpGe => "jump_ge",
        }
    }

    /// Case-insensitive lookup by short or long mnemonic.
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Opcode::ALL.into_iter().find(|op| {
            op.mnemonic().eq_ignore_ascii_case(name) || op.long_name().eq_ignore_ascii_case(name)
        })
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpEq
                | Opcode::JumpNe
                | Opcode::JumpLt
                | Opcode::JumpLe
                | Opcode::JumpGt
                | Opcode::JumpGe
        )
    }

    /// Whether a jump with this opcode is taken under `flag`.
    /// Always false for non-jump opcodes.
    pub fn branch_taken(self, flag: Flag) -> bool {
        match self {
            Opcode::Jump => true,
            Opcode::JumpEq => flag == Flag::Equal,
            Opcode::JumpNe => flag != Flag::Equal,
            Opcode::JumpLt => flag == Flag::Less,
            Opcode::JumpLe => matches!(flag, Flag::Less | Flag::Equal),
            Opcode::JumpGt => flag == Flag::Greater,
            Opcode::JumpGe => matches!(flag, Flag::Greater | Flag::Equal),
            _ => false,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Outcome of the most recent compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Flag {
    Less,
    #[default]
    Equal,
    Greater,
}

impl From<Ordering> for Flag {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Flag::Less,
            Ordering::Equal => Flag::Equal,
            Ordering::Greater => Flag::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub op: Opcode,
    pub dest: Operand,
    pub src: Option<Operand>,
}

impl Instruction {
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        std::iter::once(&self.dest).chain(self.src.as_ref())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.dest)?;
        if let Some(src) = &self.src {
            write!(f, ", {}", src)?;
        }
        Ok(())
    }
}

/// Finished program: instructions plus the label table.
///
/// Only [`crate::builder::ProgramBuilder::finish`] creates one; after that it
/// never changes and can be shared freely between runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, usize>,
}

impl Program {
    pub(crate) fn from_parts(
        instructions: Vec<Instruction>,
        labels: BTreeMap<String, usize>,
    ) -> Self {
        Self {
            instructions,
            labels,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn labels(&self) -> &BTreeMap<String, usize> {
        &self.labels
    }

    /// Instruction index a label name is bound to.
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut by_index: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for (name, &index) in &self.labels {
            by_index.entry(index).or_default().push(name);
        }

        for (index, instr) in self.instructions.iter().enumerate() {
            for name in by_index.get(&index).into_iter().flatten() {
                writeln!(f, "{}:", name)?;
            }
            writeln!(f, "    {}", instr)?;
        }
        // Labels pointing at or past the end (the halt position)
        for (_, names) in by_index.range(self.instructions.len()..) {
            for name in names {
                writeln!(f, "{}:", name)?;
            }
        }
        Ok(())
    }
}

/// Final register values, in the fixed order ax, bx, cx, dx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Registers {
    pub ax: i64,
    pub bx: i64,
    pub cx: i64,
    pub dx: i64,
}

impl Registers {
    pub fn get(&self, reg: Register) -> i64 {
        match reg {
            Register::Ax => self.ax,
            Register::Bx => self.bx,
            Register::Cx => self.cx,
            Register::Dx => self.dx,
        }
    }

    pub fn get_mut(&mut self, reg: Register) -> &mut i64 {
        match reg {
            Register::Ax => &mut self.ax,
            Register::Bx => &mut self.bx,
            Register::Cx => &mut self.cx,
            Register::Dx => &mut self.dx,
        }
    }

    pub fn to_array(&self) -> [i64; 4] {
        [self.ax, self.bx, self.cx, self.dx]
    }
}

impl From<[i64; 4]> for Registers {
    fn from([ax, bx, cx, dx]: [i64; 4]) -> Self {
        Self { ax, bx, cx, dx }
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ax={} bx={} cx={} dx={}",
            self.ax, self.bx, self.cx, self.dx
        )
    }
}
