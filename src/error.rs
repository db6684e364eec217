//! Error Types for RegForge
//!
//! Provides a unified error type for building, assembling and running
//! register-machine programs, plus the limits that bound them.

use std::fmt;

/// Unified error type for RegForge operations
#[derive(Debug, Clone, PartialEq)]
pub enum RegForgeError {
    /// Name used where a register is required is not one of ax/bx/cx/dx
    UnknownRegister(String),
    /// Operand kind or operand count does not fit the instruction
    InvalidOperand(String),
    /// A taken jump names a label missing from the label table
    UnresolvedLabel(String),
    /// Malformed assembly text
    Syntax { line: usize, message: String },
    /// Builder error raised while assembling a source line
    AtLine {
        line: usize,
        source: Box<RegForgeError>,
    },
    /// Resource limit exceeded
    ResourceLimitExceeded(String),
    /// I/O operation failed
    IoError(String),
}

impl RegForgeError {
    /// Strip any line context and return the underlying error.
    pub fn root(&self) -> &RegForgeError {
        match self {
            RegForgeError::AtLine { source, .. } => source.root(),
            other => other,
        }
    }

    /// Source line the error was raised on, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            RegForgeError::Syntax { line, .. } | RegForgeError::AtLine { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl fmt::Display for RegForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegForgeError::UnknownRegister(name) => write!(f, "Unknown register: {}", name),
            RegForgeError::InvalidOperand(msg) => write!(f, "Invalid operand: {}", msg),
            RegForgeError::UnresolvedLabel(name) => write!(f, "Unresolved label: {}", name),
            RegForgeError::Syntax { line, message } => {
                write!(f, "Syntax error at line {}: {}", line, message)
            }
            RegForgeError::AtLine { line, source } => write!(f, "line {}: {}", line, source),
            RegForgeError::ResourceLimitExceeded(msg) => {
                write!(f, "Resource limit exceeded: {}", msg)
            }
            RegForgeError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for RegForgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegForgeError::AtLine { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for RegForge operations
pub type Result<T> = std::result::Result<T, RegForgeError>;

// Conversion from std::io::Error
impl From<std::io::Error> for RegForgeError {
    fn from(err: std::io::Error) -> Self {
        RegForgeError::IoError(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for RegForgeError {
    fn from(err: serde_json::Error) -> Self {
        RegForgeError::IoError(format!("JSON error: {}", err))
    }
}

/// Limits applied while assembling and running programs.
///
/// The default leaves execution unbounded: a program that never leaves its
/// instruction range runs forever unless `max_steps` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Maximum assembly source size in bytes
    pub max_source_size: usize,
    /// Maximum number of instructions in one program
    pub max_instructions: usize,
    /// Maximum number of dispatched instructions per run
    pub max_steps: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_source_size: 1024 * 1024, // 1 MB
            max_instructions: 100_000,
            max_steps: None,
        }
    }
}

impl ExecutionLimits {
    /// Create strict limits for untrusted programs
    pub fn strict() -> Self {
        Self {
            max_source_size: 64 * 1024, // 64 KB
            max_instructions: 10_000,
            max_steps: Some(1_000_000),
        }
    }

    /// Create relaxed limits for trusted programs
    pub fn trusted() -> Self {
        Self {
            max_source_size: 10 * 1024 * 1024, // 10 MB
            max_instructions: 10_000_000,
            max_steps: None,
        }
    }

    /// Same limits with a step budget.
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Check if source size is within limits
    pub fn check_source_size(&self, size: usize) -> Result<()> {
        if size > self.max_source_size {
            return Err(RegForgeError::ResourceLimitExceeded(format!(
                "Source size {} bytes exceeds limit {} bytes",
                size, self.max_source_size
            )));
        }
        Ok(())
    }

    /// Check if instruction count is within limits
    pub fn check_instruction_count(&self, count: usize) -> Result<()> {
        if count > self.max_instructions {
            return Err(RegForgeError::ResourceLimitExceeded(format!(
                "Instruction count {} exceeds limit {}",
                count, self.max_instructions
            )));
        }
        Ok(())
    }

    /// Check if a run may dispatch one more instruction
    pub fn check_steps(&self, steps: u64) -> Result<()> {
        match self.max_steps {
            Some(max) if steps >= max => Err(RegForgeError::ResourceLimitExceeded(format!(
                "Step limit {} reached",
                max
            ))),
            _ => Ok(()),
        }
    }
}
