//! Four-register machine interpreter.
//!
//! Programs are built with [`ProgramBuilder`] (or assembled from text with
//! [`parser::Parser`]) and run by [`Engine`]:
//!
//! ```
//! use regforge::{Engine, ProgramBuilder, Register::*};
//!
//! let mut b = ProgramBuilder::new();
//! b.declare_label("again")?;
//! b.inc(Ax)?.cmp(Ax, 3)?.jl("again")?;
//! let registers = Engine::new().run(&b.finish())?;
//! assert_eq!(registers.ax, 3);
//! # Ok::<(), regforge::RegForgeError>(())
//! ```

pub mod builder;
pub mod engine;
pub mod error;
pub mod ir;
pub mod parser;

pub use builder::ProgramBuilder;
pub use engine::{Engine, Execution};
pub use error::{ExecutionLimits, RegForgeError, Result};
pub use ir::{Flag, Instruction, Opcode, Operand, Program, Register, Registers};

/// Assemble source text with default limits.
pub fn assemble(source: &str) -> Result<Program> {
    parser::Parser::new().parse(source)
}

/// Run a program with no step limit.
pub fn run(program: &Program) -> Result<Registers> {
    Engine::new().run(program)
}
