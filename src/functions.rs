//! Built-in functions callable from expressions.

use std::ops::RangeInclusive;

use crate::{
    expr::{Eval, ExpectedType, Value},
    node::{Node, NodeKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    High,
    Low,
    Bank,
    Sizeof,
    Startof,
    Def,
    Isconst,
    Strlen,
    Strcat,
    Strcmp,
    Strin,
    Strsub,
    Strupr,
    Strlwr,
    Strrpl,
    Mul,
    Div,
    Floor,
    Ceil,
    Round,
    Randint,
    Randbyte,
    Randword,
    Randlong,
}

const FUNCTIONS: &[(&str, Function)] = &[
    ("HIGH", Function::High),
    ("LOW", Function::Low),
    ("BANK", Function::Bank),
    ("SIZEOF", Function::Sizeof),
    ("STARTOF", Function::Startof),
    ("DEF", Function::Def),
    ("ISCONST", Function::Isconst),
    ("STRLEN", Function::Strlen),
    ("STRCAT", Function::Strcat),
    ("STRCMP", Function::Strcmp),
    ("STRIN", Function::Strin),
    ("STRSUB", Function::Strsub),
    ("STRUPR", Function::Strupr),
    ("STRLWR", Function::Strlwr),
    ("STRRPL", Function::Strrpl),
    ("MUL", Function::Mul),
    ("DIV", Function::Div),
    ("FLOOR", Function::Floor),
    ("CEIL", Function::Ceil),
    ("ROUND", Function::Round),
    ("RANDINT", Function::Randint),
    ("RANDBYTE", Function::Randbyte),
    ("RANDWORD", Function::Randword),
    ("RANDLONG", Function::Randlong),
];

impl Function {
    /// Case-insensitive lookup; extension functions only resolve when enabled.
    pub fn parse(name: &str, extensions: bool) -> Option<Self> {
        FUNCTIONS
            .iter()
            .find(|(spelling, _)| spelling.eq_ignore_ascii_case(name))
            .map(|(_, function)| *function)
            .filter(|function| extensions || !function.is_extension())
    }

    pub fn name(self) -> &'static str {
        FUNCTIONS
            .iter()
            .find(|(_, function)| *function == self)
            .map(|(spelling, _)| *spelling)
            .unwrap_or("?")
    }

    pub fn is_extension(self) -> bool {
        matches!(
            self,
            Self::Randint | Self::Randbyte | Self::Randword | Self::Randlong
        )
    }

    pub fn arity(self) -> RangeInclusive<usize> {
        match self {
            Self::Randbyte | Self::Randword | Self::Randlong => 0..=0,
            Self::Sizeof | Self::Bank => 0..=1,
            Self::Strcat => 0..=usize::MAX,
            Self::Strcmp | Self::Strin | Self::Mul | Self::Div | Self::Randint => 2..=2,
            Self::Strsub => 2..=3,
            Self::Strrpl => 3..=3,
            _ => 1..=1,
        }
    }
}

fn fixed_mul(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) >> 16) as i32
}

impl Eval<'_> {
    /// Checks the callee and its argument count; `None` after reporting a diagnostic.
    pub fn function(&mut self, node: &Node) -> Option<Function> {
        let Some(function) = Function::parse(node.text(), self.state.extensions) else {
            self.error(format!("unknown function `{}`", node.text()), &node.token);
            return None;
        };
        let arity = function.arity();
        if !arity.contains(&node.children.len()) {
            let expected = if arity.start() == arity.end() {
                format!("{}", arity.start())
            } else {
                format!("{} to {}", arity.start(), arity.end())
            };
            self.error(
                format!("`{}` expects {expected} arguments", function.name()),
                &node.token,
            );
            return None;
        }
        Some(function)
    }

    fn arg_number(&mut self, node: &Node, index: usize) -> i32 {
        let value = self.value(&node.children[index]);
        match self.coerce(value, ExpectedType::Number, &node.children[index].token) {
            Value::Number(n) => n,
            Value::String(_) => 0,
        }
    }

    fn arg_string(&mut self, node: &Node, index: usize) -> String {
        let value = self.value(&node.children[index]);
        match self.coerce(value, ExpectedType::String, &node.children[index].token) {
            Value::String(s) => s,
            Value::Number(_) => String::new(),
        }
    }

    /// Evaluates a constant function call.
    pub fn call(&mut self, node: &Node) -> Value {
        let Some(function) = self.function(node) else {
            return Value::Number(0);
        };
        let number = match function {
            Function::High => (self.arg_number(node, 0) >> 8) & 0xFF,
            Function::Low => self.arg_number(node, 0) & 0xFF,
            Function::Bank | Function::Sizeof | Function::Startof => {
                self.error(
                    format!("`{}` is only known at link time", function.name()),
                    &node.token,
                );
                0
            }
            Function::Def => {
                let arg = &node.children[0];
                let name = match arg.kind {
                    NodeKind::Identifier => arg.text().to_string(),
                    _ => self.arg_string(node, 0),
                };
                self.state.is_defined(&name) as i32
            }
            Function::Isconst => self.is_constant(&node.children[0]) as i32,
            Function::Strlen => self.arg_string(node, 0).chars().count() as i32,
            Function::Strcat => {
                let mut out = String::new();
                for index in 0..node.children.len() {
                    out.push_str(&self.arg_string(node, index));
                }
                return Value::String(out);
            }
            Function::Strcmp => {
                let a = self.arg_string(node, 0);
                let b = self.arg_string(node, 1);
                a.cmp(&b) as i32
            }
            Function::Strin => {
                let haystack = self.arg_string(node, 0);
                let needle = self.arg_string(node, 1);
                haystack
                    .find(&needle)
                    .map(|byte| haystack[..byte].chars().count() as i32 + 1)
                    .unwrap_or(0)
            }
            Function::Strsub => {
                let s = self.arg_string(node, 0);
                let start = self.arg_number(node, 1).max(1) as usize - 1;
                let len = if node.children.len() > 2 {
                    self.arg_number(node, 2).max(0) as usize
                } else {
                    usize::MAX
                };
                return Value::String(s.chars().skip(start).take(len).collect());
            }
            Function::Strupr => return Value::String(self.arg_string(node, 0).to_uppercase()),
            Function::Strlwr => return Value::String(self.arg_string(node, 0).to_lowercase()),
            Function::Strrpl => {
                let s = self.arg_string(node, 0);
                let from = self.arg_string(node, 1);
                let to = self.arg_string(node, 2);
                if from.is_empty() {
                    return Value::String(s);
                }
                return Value::String(s.replace(&from, &to));
            }
            Function::Mul => {
                let a = self.arg_number(node, 0);
                fixed_mul(a, self.arg_number(node, 1))
            }
            Function::Div => {
                let a = self.arg_number(node, 0);
                let b = self.arg_number(node, 1);
                if b == 0 {
                    self.error("division by zero", &node.token);
                    0
                } else {
                    (((a as i64) << 16) / b as i64) as i32
                }
            }
            Function::Floor => self.arg_number(node, 0) & !0xFFFF,
            Function::Ceil => self.arg_number(node, 0).wrapping_add(0xFFFF) & !0xFFFF,
            Function::Round => self.arg_number(node, 0).wrapping_add(0x8000) & !0xFFFF,
            Function::Randint => {
                let min = self.arg_number(node, 0);
                let max = self.arg_number(node, 1);
                self.rng.range(min, max)
            }
            Function::Randbyte => self.rng.byte() as i32,
            Function::Randword => self.rng.word() as i32,
            Function::Randlong => self.rng.long() as i32,
        };
        Value::Number(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expr::tests::{expression, state_with_section},
        rng::XorShift32,
        state::AssemblerState,
    };

    fn eval(state: &mut AssemblerState, text: &str) -> Value {
        let node = expression(state, text);
        let mut rng = XorShift32::new(1);
        Eval::new(state, &mut rng, 64).evaluate(&node, ExpectedType::Either)
    }

    #[test]
    fn byte_selectors() {
        let mut state = state_with_section();
        assert_eq!(eval(&mut state, "HIGH($1234)"), Value::Number(0x12));
        assert_eq!(eval(&mut state, "LOW($1234)"), Value::Number(0x34));
    }

    #[test]
    fn string_functions() {
        let mut state = state_with_section();
        assert_eq!(
            eval(&mut state, "STRCAT(\"ab\", \"cd\", \"e\")"),
            Value::String("abcde".to_string())
        );
        assert_eq!(eval(&mut state, "STRLEN(\"hello\")"), Value::Number(5));
        assert_eq!(eval(&mut state, "STRIN(\"hello\", \"ll\")"), Value::Number(3));
        assert_eq!(
            eval(&mut state, "STRSUB(\"hello\", 2, 3)"),
            Value::String("ell".to_string())
        );
        assert_eq!(
            eval(&mut state, "STRUPR(STRRPL(\"a-b\", \"-\", \"+\"))"),
            Value::String("A+B".to_string())
        );
        assert_eq!(eval(&mut state, "STRCMP(\"a\", \"b\")"), Value::Number(-1));
    }

    #[test]
    fn fixed_point_math() {
        let mut state = state_with_section();
        assert_eq!(eval(&mut state, "MUL(2.0, 1.5)"), Value::Number(0x0003_0000));
        assert_eq!(eval(&mut state, "DIV(3.0, 2.0)"), Value::Number(0x0001_8000));
        assert_eq!(eval(&mut state, "ROUND(1.5)"), Value::Number(0x0002_0000));
        assert_eq!(eval(&mut state, "FLOOR(1.5)"), Value::Number(0x0001_0000));
        assert_eq!(eval(&mut state, "CEIL(1.25)"), Value::Number(0x0002_0000));
    }

    #[test]
    fn def_checks_existence_without_evaluating() {
        let mut state = state_with_section();
        assert_eq!(eval(&mut state, "DEF(missing)"), Value::Number(0));
        assert_eq!(eval(&mut state, "ISCONST(missing)"), Value::Number(0));
        assert_eq!(eval(&mut state, "ISCONST(3)"), Value::Number(1));
        assert!(state.diagnostics.is_empty());
    }

    #[test]
    fn wrong_arity_is_reported() {
        let mut state = state_with_section();
        assert_eq!(eval(&mut state, "HIGH(1, 2)"), Value::Number(0));
        assert_eq!(state.diagnostics.len(), 1);
        assert!(state.diagnostics[0].message.contains("expects 1"));
    }

    #[test]
    fn random_functions_need_extensions() {
        let mut state = state_with_section();
        let Value::Number(n) = eval(&mut state, "RANDINT(1, 6)") else {
            panic!("expected a number");
        };
        assert!((1..=6).contains(&n));

        state.extensions = false;
        eval(&mut state, "RANDINT(1, 6)");
        assert!(!state.diagnostics.is_empty());
    }
}
