use std::error::Error;

pub mod asm;
pub mod config;
pub mod diag;
pub mod expr;
pub mod files;
pub mod functions;
pub mod keywords;
pub mod lexer;
pub mod link;
pub mod node;
pub mod object;
pub mod opcodes;
pub mod parser;
pub mod rng;
pub mod state;
pub mod token;

pub use asm::Assembler;
pub use config::Config;
pub use diag::{Diagnostic, DiagnosticSource, Severity};
pub use files::{DiskFiles, FileProvider, MemoryFiles};
pub use object::{write_object, Object};

/// Parses `SYMBOL=value` for `-D`; the value takes any numeric literal form (`$FF`, `%101`).
pub fn parse_defines(s: &str) -> Result<(String, i32), Box<dyn Error + Send + Sync + 'static>> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid SYMBOL=value: no `=` found in `{s}`"))?;
    let (name, value) = (s[..pos].trim(), s[pos + 1..].trim());
    if name.is_empty() {
        return Err(format!("invalid SYMBOL=value: empty symbol in `{s}`").into());
    }
    let (negative, digits) = match value.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, value),
    };
    let n = expr::parse_number(digits, &state::Options::default())
        .ok_or_else(|| format!("invalid SYMBOL=value: `{value}` is not a number"))?;
    Ok((name.to_string(), if negative { n.wrapping_neg() } else { n }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_accept_every_radix() {
        assert_eq!(parse_defines("A=10").unwrap(), ("A".to_string(), 10));
        assert_eq!(parse_defines("B=$FF").unwrap(), ("B".to_string(), 255));
        assert_eq!(parse_defines("C=%11").unwrap(), ("C".to_string(), 3));
        assert_eq!(parse_defines("D=-2").unwrap(), ("D".to_string(), -2));
        assert!(parse_defines("E").is_err());
        assert!(parse_defines("=1").is_err());
        assert!(parse_defines("F=nope").is_err());
    }
}
