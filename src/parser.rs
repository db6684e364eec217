use crate::builder::ProgramBuilder;
use crate::error::{ExecutionLimits, RegForgeError, Result};
use crate::ir::{Opcode, Operand, Program};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Token {
    pub content: String,
    pub line: usize,
    pub col: usize,
}

/// Assembles source text into a [`Program`].
///
/// One statement per line, or several separated by `;`. A statement is a
/// label declaration (`label name` or `name:`) or a mnemonic followed by
/// operands, optionally comma separated. `#` starts a comment.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    limits: ExecutionLimits,
}

impl Parser {
    pub fn new() -> Self {
        Self::with_limits(ExecutionLimits::default())
    }

    pub fn with_limits(limits: ExecutionLimits) -> Self {
        Self {
            tokens: Vec::new(),
            pos: 0,
            limits,
        }
    }

    fn tokenize(source: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut start_col = 1;
        let mut line = 1;
        let mut col = 1;

        let flush = |current: &mut String, tokens: &mut Vec<Token>, line: usize, col: usize| {
            if !current.is_empty() {
                tokens.push(Token {
                    content: std::mem::take(current),
                    line,
                    col,
                });
            }
        };

        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '#' {
                // Comment: skip until newline, which the loop then handles
                flush(&mut current, &mut tokens, line, start_col);
                while chars.peek().is_some_and(|&next| next != '\n') {
                    chars.next();
                }
                continue;
            }

            if c == '\n' {
                flush(&mut current, &mut tokens, line, start_col);
                line += 1;
                col = 1;
                continue;
            }

            if c.is_whitespace() {
                flush(&mut current, &mut tokens, line, start_col);
            } else if ",:;".contains(c) {
                flush(&mut current, &mut tokens, line, start_col);
                tokens.push(Token {
                    content: c.to_string(),
                    line,
                    col,
                });
            } else {
                if current.is_empty() {
                    start_col = col;
                }
                current.push(c);
            }
            col += 1;
        }
        flush(&mut current, &mut tokens, line, start_col);
        tokens
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Next token if it belongs to the statement that started on `line`.
    fn peek_in_statement(&self, line: usize) -> Option<&Token> {
        self.peek().filter(|t| t.line == line && t.content != ";")
    }

    fn consume(&mut self) -> Option<Token> {
        if self.pos < self.tokens.len() {
            let t = self.tokens[self.pos].clone();
            self.pos += 1;
            Some(t)
        } else {
            None
        }
    }

    pub fn parse(&mut self, source: &str) -> Result<Program> {
        self.limits.check_source_size(source.len())?;
        self.tokens = Self::tokenize(source);
        self.pos = 0;

        let mut builder = ProgramBuilder::new();
        while self.peek().is_some() {
            self.parse_statement(&mut builder)?;
            self.limits.check_instruction_count(builder.len())?;
        }

        let program = builder.finish();
        debug!(
            instructions = program.len(),
            labels = program.labels().len(),
            "assembled program"
        );
        Ok(program)
    }

    fn parse_statement(&mut self, builder: &mut ProgramBuilder) -> Result<()> {
        let Some(head) = self.consume() else {
            return Ok(());
        };

        match head.content.as_str() {
            ";" => return Ok(()),
            "," | ":" => return Err(syntax(&head, format!("unexpected '{}'", head.content))),
            _ => {}
        }

        // name:
        if self.peek_in_statement(head.line).is_some_and(|t| t.content == ":") {
            self.consume();
            check_identifier(&head)?;
            builder
                .declare_label(&head.content)
                .map_err(|e| at_line(head.line, e))?;
            return Ok(());
        }

        // label name
        if head.content.eq_ignore_ascii_case("label") {
            let name = match self.peek_in_statement(head.line) {
                Some(t) if t.content != "," && t.content != ":" => t.clone(),
                _ => return Err(syntax(&head, "expected label name after 'label'")),
            };
            self.consume();
            check_identifier(&name)?;
            builder
                .declare_label(&name.content)
                .map_err(|e| at_line(name.line, e))?;
            return self.end_statement(head.line);
        }

        let op = Opcode::from_mnemonic(&head.content)
            .ok_or_else(|| syntax(&head, format!("unknown instruction '{}'", head.content)))?;

        let mut operands = Vec::new();
        let mut after_comma = false;
        while let Some(t) = self.peek_in_statement(head.line).cloned() {
            self.consume();
            match t.content.as_str() {
                "," if operands.is_empty() || after_comma => {
                    return Err(syntax(&t, "unexpected ','"));
                }
                "," => after_comma = true,
                ":" => return Err(syntax(&t, "unexpected ':'")),
                _ => {
                    operands.push(self.parse_operand(builder, op, &t)?);
                    after_comma = false;
                }
            }
        }
        if after_comma {
            return Err(syntax(&head, "trailing ','"));
        }

        builder
            .emit(op, &operands)
            .map_err(|e| at_line(head.line, e))
    }

    /// Jump targets fall back to label names; every other operand slot
    /// takes a register or an integer.
    fn parse_operand(&self, builder: &ProgramBuilder, op: Opcode, token: &Token) -> Result<Operand> {
        if let Ok(num) = token.content.parse::<i64>() {
            return Ok(Operand::Imm(num));
        }
        if Opcode::from_mnemonic(&token.content).is_some() {
            return Err(at_line(
                token.line,
                RegForgeError::InvalidOperand(format!(
                    "instruction name '{}' used as an operand",
                    token.content
                )),
            ));
        }
        check_identifier(token)?;
        if op.is_jump() {
            Ok(builder.resolve_identifier(&token.content))
        } else {
            builder
                .register(&token.content)
                .map_err(|e| at_line(token.line, e))
        }
    }

    /// Nothing else may follow on the statement's line.
    fn end_statement(&self, line: usize) -> Result<()> {
        match self.peek_in_statement(line) {
            Some(t) => Err(syntax(t, format!("unexpected '{}'", t.content))),
            None => Ok(()),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn check_identifier(token: &Token) -> Result<()> {
    let mut chars = token.content.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(syntax(token, format!("invalid identifier '{}'", token.content)))
    }
}

fn syntax(token: &Token, message: impl Into<String>) -> RegForgeError {
    RegForgeError::Syntax {
        line: token.line,
        message: format!("{} (column {})", message.into(), token.col),
    }
}

fn at_line(line: usize, error: RegForgeError) -> RegForgeError {
    RegForgeError::AtLine {
        line,
        source: Box::new(error),
    }
}
