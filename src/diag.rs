use std::fmt::{self, Display, Formatter};

use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSource {
    Lexer,
    Parser,
    Evaluator,
}

impl Display for DiagnosticSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexer => write!(f, "Lexer"),
            Self::Parser => write!(f, "Parser"),
            Self::Evaluator => write!(f, "Evaluator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warn,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub source: DiagnosticSource,
    pub message: String,
    pub severity: Severity,
    pub token: Option<Token>,
    pub file: String,
    pub line: usize,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn column(&self) -> usize {
        self.token.as_ref().map(|tok| tok.column + 1).unwrap_or(1)
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: [{}] {}",
            self.file,
            self.line,
            self.column(),
            self.source,
            self.message
        )
    }
}
