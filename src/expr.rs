//! Constant expression evaluation.

use crate::{
    diag::DiagnosticSource,
    functions::Function,
    node::{Node, NodeKind},
    rng::RandomSource,
    state::{AssemblerState, Options},
    token::Token,
};

pub const RGBDS_VERSION: &str = "0.6.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(i32),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    Number,
    String,
    Either,
}

impl Value {
    pub fn zero(expected: ExpectedType) -> Self {
        match expected {
            ExpectedType::String => Self::String(String::new()),
            _ => Self::Number(0),
        }
    }
}

/// Built-in symbols that are never stored in the symbol maps.
pub fn predefine(state: &AssemblerState, name: &str) -> Option<Value> {
    match name {
        "_RS" => Some(Value::Number(state.rs_counter)),
        "_NARG" => state
            .macro_call()
            .map(|call| Value::Number(call.remaining().len() as i32)),
        "__LINE__" => Some(Value::Number(state.line as i32)),
        "__FILE__" => Some(Value::String(state.file.clone())),
        "__RGBDS_VERSION__" => Some(Value::String(RGBDS_VERSION.to_string())),
        "__MACRO_COUNTER__" if state.extensions => {
            Some(Value::Number(state.macro_counter as i32))
        }
        _ => None,
    }
}

/// Resolves a symbol to a value: predefine, number equate, string equate, then `SET`.
pub fn lookup(state: &AssemblerState, name: &str) -> Option<Value> {
    if let Some(value) = predefine(state, name) {
        return Some(value);
    }
    if let Some(equ) = state.number_equates.get(name) {
        return Some(Value::Number(equ.value));
    }
    if let Some(equs) = state.string_equates.get(name) {
        return Some(Value::String(equs.value.clone()));
    }
    state.sets.get(name).map(|set| Value::Number(set.value))
}

/// Renders the inside of `{name}` or `{fmt:name}`.
pub fn interpolate(state: &AssemblerState, inner: &str) -> Result<String, String> {
    let (format, name) = match inner.split_once(':') {
        Some((format, name)) => (Some(format.trim()), name.trim()),
        None => (None, inner.trim()),
    };
    let value = lookup(state, name)
        .ok_or_else(|| format!("interpolated symbol `{name}` is not defined"))?;
    match (value, format) {
        (Value::Number(n), None) => Ok(format!("${n:X}")),
        (Value::Number(n), Some("d")) => Ok(format!("{n}")),
        (Value::Number(n), Some("x")) => Ok(format!("{n:x}")),
        (Value::Number(n), Some("X")) => Ok(format!("{n:X}")),
        (Value::Number(n), Some("b")) => Ok(format!("{n:b}")),
        (Value::String(s), None | Some("s")) => Ok(s),
        (_, Some(format)) => Err(format!("invalid interpolation format `{format}`")),
    }
}

fn digits_value(text: &str, radix: u32, digit: impl Fn(char) -> Option<u32>) -> Option<i32> {
    let mut value: u32 = 0;
    let mut any = false;
    for c in text.chars().filter(|c| *c != '_') {
        value = value.checked_mul(radix)?.checked_add(digit(c)?)?;
        any = true;
    }
    any.then_some(value as i32)
}

/// Parses any of the numeric literal forms.
pub fn parse_number(text: &str, options: &Options) -> Option<i32> {
    if let Some(hex) = text.strip_prefix('$') {
        return digits_value(hex, 16, |c| c.to_digit(16));
    }
    if let Some(bin) = text.strip_prefix('%') {
        let [zero, one] = options.binary_digits;
        return digits_value(bin, 2, |c| match c {
            c if c == zero => Some(0),
            c if c == one => Some(1),
            _ => None,
        });
    }
    if let Some(oct) = text.strip_prefix('&') {
        return digits_value(oct, 8, |c| c.to_digit(8));
    }
    if let Some(gfx) = text.strip_prefix('`') {
        let mut lower: u32 = 0;
        let mut upper: u32 = 0;
        let mut count = 0;
        for c in gfx.chars().filter(|c| *c != '_') {
            let pixel = options.gfx_digits.iter().position(|d| *d == c)? as u32;
            lower = (lower << 1) | (pixel & 1);
            upper = (upper << 1) | (pixel >> 1);
            count += 1;
        }
        if count == 0 || count > 8 {
            return None;
        }
        return Some(((upper << 8) | lower) as i32);
    }
    if let Some((int, frac)) = text.split_once('.') {
        let int: u32 = int.replace('_', "").parse().ok()?;
        let frac: f64 = format!("0.{}", frac.replace('_', "")).parse().ok()?;
        let frac = (frac * 65536.0).round() as u32;
        return Some((int.wrapping_shl(16).wrapping_add(frac)) as i32);
    }
    digits_value(text, 10, |c| c.to_digit(10))
}

/// Expression evaluation context: the shared state plus the collaborators functions need.
pub struct Eval<'a> {
    pub state: &'a mut AssemblerState,
    pub rng: &'a mut dyn RandomSource,
    pub max_substitutions: usize,
    /// Offset `@` stands for; unset means the start of the current line.
    pub location: Option<usize>,
}

impl<'a> Eval<'a> {
    pub fn new(
        state: &'a mut AssemblerState,
        rng: &'a mut dyn RandomSource,
        max_substitutions: usize,
    ) -> Self {
        Self {
            state,
            rng,
            max_substitutions,
            location: None,
        }
    }

    /// Pins `@` to `offset`, for data elements that each sit at their own byte.
    pub fn at(mut self, offset: usize) -> Self {
        self.location = Some(offset);
        self
    }

    pub fn here(&self) -> Option<usize> {
        self.location.or_else(|| self.state.byte_offset())
    }

    pub fn error(&mut self, message: impl Into<String>, token: &Token) {
        self.state
            .error(DiagnosticSource::Evaluator, message, token);
    }

    /// Section and byte offset of a label or `@`, when the identifier names one.
    pub fn label_location(&self, node: &Node) -> Option<(String, usize)> {
        if node.kind != NodeKind::Identifier {
            return None;
        }
        let name = node.text();
        if name == "@" {
            let section = self.state.section_name()?.to_string();
            return Some((section, self.here()?));
        }
        if lookup(self.state, name).is_some() {
            return None;
        }
        let id = self.state.qualify(name)?;
        let label = self.state.labels.get(&id)?;
        Some((label.section.clone(), label.byte_offset))
    }

    /// `A - B` over two labels of one section.
    pub fn label_difference(&self, node: &Node) -> Option<i32> {
        if node.kind != NodeKind::BinaryOperator || node.text() != "-" {
            return None;
        }
        let (left_section, left) = self.label_location(&node.children[0])?;
        let (right_section, right) = self.label_location(&node.children[1])?;
        (left_section == right_section).then(|| left as i32 - right as i32)
    }

    pub fn is_constant(&self, node: &Node) -> bool {
        match node.kind {
            NodeKind::NumberLiteral | NodeKind::String => true,
            NodeKind::Identifier => node.text() != "@" && lookup(self.state, node.text()).is_some(),
            NodeKind::BinaryOperator => {
                self.label_difference(node).is_some()
                    || node.children.iter().all(|child| self.is_constant(child))
            }
            NodeKind::FunctionCall => {
                match Function::parse(node.text(), self.state.extensions) {
                    Some(Function::Def | Function::Isconst) => true,
                    Some(Function::Bank | Function::Sizeof | Function::Startof) => false,
                    Some(_) => node.children.iter().all(|child| self.is_constant(child)),
                    None => false,
                }
            }
            NodeKind::UnaryOperator | NodeKind::Indexer => {
                node.children.iter().all(|child| self.is_constant(child))
            }
            _ => false,
        }
    }

    /// Evaluates a constant expression, reporting an error and returning zero otherwise.
    pub fn evaluate(&mut self, node: &Node, expected: ExpectedType) -> Value {
        if !self.is_constant(node) {
            let message = match node.kind {
                NodeKind::Identifier if self.label_location(node).is_none() => {
                    format!("`{}` is not defined", node.text())
                }
                _ => "expression must be constant".to_string(),
            };
            self.error(message, &node.token);
            return Value::zero(expected);
        }
        let value = self.value(node);
        self.coerce(value, expected, &node.token)
    }

    pub fn number(&mut self, node: &Node) -> i32 {
        match self.evaluate(node, ExpectedType::Number) {
            Value::Number(n) => n,
            Value::String(_) => 0,
        }
    }

    pub fn string(&mut self, node: &Node) -> String {
        match self.evaluate(node, ExpectedType::String) {
            Value::String(s) => s,
            Value::Number(_) => String::new(),
        }
    }

    pub fn coerce(&mut self, value: Value, expected: ExpectedType, token: &Token) -> Value {
        match (value, expected) {
            (Value::String(s), ExpectedType::Number) => Value::Number(self.char_value(&s, token)),
            (Value::Number(_), ExpectedType::String) => {
                self.error("expected a string", token);
                Value::String(String::new())
            }
            (value, _) => value,
        }
    }

    /// Numeric value of a one-character string, through the charmap when mapped.
    pub fn char_value(&mut self, s: &str, token: &Token) -> i32 {
        if let Some(byte) = self.state.charmaps.get(s) {
            return *byte as i32;
        }
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c as i32,
            _ => {
                self.error(format!("string `{s}` cannot be used as a number"), token);
                0
            }
        }
    }

    fn as_number(&mut self, node: &Node) -> i32 {
        let value = self.value(node);
        match self.coerce(value, ExpectedType::Number, &node.token) {
            Value::Number(n) => n,
            Value::String(_) => 0,
        }
    }

    /// Evaluates a node already known to be constant.
    pub fn value(&mut self, node: &Node) -> Value {
        match node.kind {
            NodeKind::NumberLiteral => {
                let options = self.state.options();
                match parse_number(node.text(), &options) {
                    Some(n) => Value::Number(n),
                    None => {
                        self.error(format!("invalid number `{}`", node.text()), &node.token);
                        Value::Number(0)
                    }
                }
            }
            NodeKind::String => Value::String(self.expand_string(node.text(), &node.token)),
            NodeKind::Identifier => match lookup(self.state, node.text()) {
                Some(value) => value,
                None => {
                    let message = if self.label_location(node).is_some() {
                        format!("label `{}` is not constant", node.text())
                    } else {
                        format!("`{}` is not defined", node.text())
                    };
                    self.error(message, &node.token);
                    Value::Number(0)
                }
            },
            NodeKind::UnaryOperator => {
                let n = self.as_number(&node.children[0]);
                Value::Number(match node.text() {
                    "-" => n.wrapping_neg(),
                    "!" => (n == 0) as i32,
                    "~" => !n,
                    _ => n,
                })
            }
            NodeKind::BinaryOperator => self.binary(node),
            NodeKind::FunctionCall => self.call(node),
            NodeKind::Indexer => match node.children.last() {
                Some(child) => self.value(child),
                None => Value::Number(0),
            },
            _ => {
                self.error(format!("unexpected {}", node.token), &node.token);
                Value::Number(0)
            }
        }
    }

    fn binary(&mut self, node: &Node) -> Value {
        if let Some(difference) = self.label_difference(node) {
            return Value::Number(difference);
        }
        let op = node.text();
        let left = self.value(&node.children[0]);
        let right = self.value(&node.children[1]);
        if let (Value::String(l), Value::String(r)) = (&left, &right) {
            match op {
                "==" => return Value::Number((l == r) as i32),
                "!=" => return Value::Number((l != r) as i32),
                _ => {}
            }
        }
        let lhs = match self.coerce(left, ExpectedType::Number, &node.children[0].token) {
            Value::Number(n) => n,
            Value::String(_) => 0,
        };
        let rhs = match self.coerce(right, ExpectedType::Number, &node.children[1].token) {
            Value::Number(n) => n,
            Value::String(_) => 0,
        };
        let result = match op {
            "+" => lhs.wrapping_add(rhs),
            "-" => lhs.wrapping_sub(rhs),
            "*" => lhs.wrapping_mul(rhs),
            "/" | "%" if rhs == 0 => {
                self.error("division by zero", &node.token);
                0
            }
            "/" => lhs.wrapping_div(rhs),
            "%" => lhs.wrapping_rem(rhs),
            "<<" => lhs.wrapping_shl(rhs as u32),
            ">>" => lhs.wrapping_shr(rhs as u32),
            "&" => lhs & rhs,
            "|" => lhs | rhs,
            "^" => lhs ^ rhs,
            "&&" => (lhs != 0 && rhs != 0) as i32,
            "||" => (lhs != 0 || rhs != 0) as i32,
            "==" => (lhs == rhs) as i32,
            "!=" => (lhs != rhs) as i32,
            "<" => (lhs < rhs) as i32,
            ">" => (lhs > rhs) as i32,
            "<=" => (lhs <= rhs) as i32,
            ">=" => (lhs >= rhs) as i32,
            _ => {
                self.error(format!("unknown operator `{op}`"), &node.token);
                0
            }
        };
        Value::Number(result)
    }

    /// Expands a quoted string literal: interpolations and macro escapes until stable,
    /// then character escapes.
    pub fn expand_string(&mut self, literal: &str, token: &Token) -> String {
        let inner = literal
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(literal);
        let mut text = inner.to_string();
        let mut passes = 0;
        loop {
            let (next, changed) = self.substitute_pass(&text, token);
            text = next;
            if !changed {
                break;
            }
            passes += 1;
            if passes >= self.max_substitutions {
                self.error(
                    format!("string expansion did not settle after {passes} passes"),
                    token,
                );
                break;
            }
        }
        unescape(&text)
    }

    fn substitute_pass(&mut self, text: &str, token: &Token) -> (String, bool) {
        let mut out = String::with_capacity(text.len());
        let mut changed = false;
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        out.push(c);
                        break;
                    };
                    let replacement = match escaped {
                        '1'..='9' | '#' | '@' => self.macro_escape(escaped, token),
                        _ => None,
                    };
                    match replacement {
                        Some(replacement) => {
                            out.push_str(&replacement);
                            changed = true;
                        }
                        None => {
                            out.push(c);
                            out.push(escaped);
                        }
                    }
                }
                '{' => {
                    let rest = &text[i + 1..];
                    let close = rest.find(&['{', '}'][..]);
                    match close {
                        Some(end) if rest[end..].starts_with('}') => {
                            match interpolate(self.state, &rest[..end]) {
                                Ok(value) => {
                                    out.push_str(&value);
                                    changed = true;
                                }
                                Err(message) => {
                                    self.error(message, token);
                                    out.push_str(&text[i..i + end + 2]);
                                }
                            }
                            // skip past the closing brace
                            while chars.peek().is_some_and(|(j, _)| *j <= i + end + 1) {
                                chars.next();
                            }
                        }
                        _ => out.push(c),
                    }
                }
                _ => out.push(c),
            }
        }
        (out, changed)
    }

    fn macro_escape(&mut self, escaped: char, token: &Token) -> Option<String> {
        if escaped == '@' {
            return match self.state.unique_ids.last() {
                Some(id) => Some(format!("_{id}")),
                None => {
                    self.error("`\\@` used outside of a macro or REPT block", token);
                    None
                }
            };
        }
        let Some(call) = self.state.macro_call() else {
            self.error(format!("`\\{escaped}` used outside of a macro"), token);
            return None;
        };
        if escaped == '#' {
            return Some(call.remaining().join(","));
        }
        let index = escaped.to_digit(10).unwrap_or(0) as usize;
        match call.arg(index) {
            Some(arg) => Some(arg.to_string()),
            None => {
                self.error(format!("macro argument `\\{escaped}` is not defined"), token);
                None
            }
        }
    }
}

pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        lexer::Lexer,
        parser::parse_line,
        rng::XorShift32,
        state::{Label, NumberEquate, Region, Section, StringEquate},
    };

    pub(crate) fn state_with_section() -> AssemblerState {
        let mut state = AssemblerState::new(Options::default(), true);
        state.file = "test.asm".to_string();
        state.sections.insert(
            "main".to_string(),
            Section {
                id: "main".to_string(),
                file: "test.asm".to_string(),
                region: Region::Rom0,
                fixed_address: None,
                bank: None,
                alignment: None,
                bytes: Vec::new(),
            },
        );
        state.in_sections.push("main".to_string());
        state
    }

    /// Parses `text` as the argument of a `db` line.
    pub(crate) fn expression(state: &mut AssemblerState, text: &str) -> Node {
        let tokens = Lexer::new(64).tokenize(state, &format!("  db {text}"), 1, true);
        let line = parse_line(state, &tokens);
        line.operation().expect("operation").children[0].clone()
    }

    fn eval_number(state: &mut AssemblerState, text: &str) -> i32 {
        let node = expression(state, text);
        let mut rng = XorShift32::new(0);
        Eval::new(state, &mut rng, 64).number(&node)
    }

    fn add_label(state: &mut AssemblerState, name: &str, offset: usize) {
        state.labels.insert(
            name.to_string(),
            Label {
                id: name.to_string(),
                file: "test.asm".to_string(),
                start_line: 1,
                end_line: 1,
                section: "main".to_string(),
                byte_offset: offset,
                byte_size: 0,
                exported: false,
            },
        );
    }

    #[test]
    fn radix_literals_agree() {
        let mut state = state_with_section();
        for literal in ["$2A", "%101010", "&52", "42", "%10_1010"] {
            assert_eq!(eval_number(&mut state, literal), 42, "{literal}");
        }
        assert!(state.diagnostics.is_empty());
    }

    #[test]
    fn fixed_point_and_graphics_literals() {
        let options = Options::default();
        assert_eq!(parse_number("1.5", &options), Some(0x0001_8000));
        assert_eq!(parse_number("`0123", &options), Some(0x0305));
        assert_eq!(parse_number("$1_0000_0000", &options), None);
    }

    #[test]
    fn arithmetic_wraps_to_32_bits() {
        let mut state = state_with_section();
        assert_eq!(eval_number(&mut state, "$7FFFFFFF + 1"), i32::MIN);
        assert_eq!(eval_number(&mut state, "-(3 - 5) * 2"), 4);
        assert_eq!(eval_number(&mut state, "1 << 4 | 1"), 17);
        assert_eq!(eval_number(&mut state, "!0 && 3 > 2"), 1);
        assert_eq!(eval_number(&mut state, "\"A\""), 65);
    }

    #[test]
    fn identifiers_resolve_through_equates_and_predefines() {
        let mut state = state_with_section();
        state.number_equates.insert(
            "SIZE".to_string(),
            NumberEquate {
                id: "SIZE".to_string(),
                file: "test.asm".to_string(),
                line: 1,
                value: 16,
            },
        );
        state.rs_counter = 3;
        assert_eq!(eval_number(&mut state, "SIZE * 2 + _RS"), 35);
    }

    #[test]
    fn label_difference_is_constant() {
        let mut state = state_with_section();
        add_label(&mut state, "A", 4);
        add_label(&mut state, "B", 10);
        let node = expression(&mut state, "B - A");
        let single = expression(&mut state, "B");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        assert!(eval.is_constant(&node));
        assert_eq!(eval.number(&node), 6);
        assert!(!eval.is_constant(&single));
        assert!(state.patches.is_empty());
    }

    #[test]
    fn labels_alone_are_not_constant() {
        let mut state = state_with_section();
        add_label(&mut state, "A", 4);
        assert_eq!(eval_number(&mut state, "A + 1"), 0);
        assert_eq!(state.diagnostics.len(), 1);
    }

    #[test]
    fn strings_without_patterns_are_unchanged() {
        let mut state = state_with_section();
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        let token = Token::new(crate::token::TokenKind::String, "\"plain text\"", 1, 0);
        assert_eq!(eval.expand_string("\"plain text\"", &token), "plain text");
        assert_eq!(eval.expand_string("\"a\\\"b\\n\"", &token), "a\"b\n");
        assert!(state.diagnostics.is_empty());
    }

    #[test]
    fn strings_interpolate_until_stable() {
        let mut state = state_with_section();
        state.string_equates.insert(
            "inner".to_string(),
            StringEquate {
                id: "inner".to_string(),
                file: "test.asm".to_string(),
                line: 1,
                value: "{outer}".to_string(),
            },
        );
        state.number_equates.insert(
            "outer".to_string(),
            NumberEquate {
                id: "outer".to_string(),
                file: "test.asm".to_string(),
                line: 1,
                value: 255,
            },
        );
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        let token = Token::new(crate::token::TokenKind::String, "", 1, 0);
        assert_eq!(eval.expand_string("\"v={inner}\"", &token), "v=$FF");
        assert_eq!(eval.expand_string("\"\\{inner}\"", &token), "{inner}");
        assert_eq!(eval.expand_string("\"{d:outer}\"", &token), "255");
    }

    #[test]
    fn self_referencing_interpolation_is_capped() {
        let mut state = state_with_section();
        state.string_equates.insert(
            "me".to_string(),
            StringEquate {
                id: "me".to_string(),
                file: "test.asm".to_string(),
                line: 1,
                value: "{me}".to_string(),
            },
        );
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 16);
        let token = Token::new(crate::token::TokenKind::String, "", 1, 0);
        eval.expand_string("\"{me}\"", &token);
        assert_eq!(state.diagnostics.len(), 1);
    }
}
