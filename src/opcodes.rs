//! SM83 instruction tables and variant selection.

use std::{collections::HashMap, sync::OnceLock};

use crate::{
    expr::{Eval, ExpectedType, Value},
    link::LinkOp,
    node::{Node, NodeKind},
    state::PatchKind,
};

/// One operand position of an instruction variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// A register by name.
    Reg(&'static str),
    /// A condition code.
    Cond(&'static str),
    /// A bracketed register: `[hl]`, `[hl+]`, `[c]`...
    Ind(&'static str),
    N8,
    N16,
    E8,
    /// `jr` target, encoded relative to the next instruction.
    Rel,
    /// Constant bit index 0-7, folded into the opcode.
    U3,
    /// Constant restart vector, folded into the opcode.
    Vector,
    /// `[n16]`
    IndN16,
    /// `ldh [n8]`, either `$00-$FF` or `$FF00-$FFFF`.
    LdhN8,
    /// `ld [$FF00+n8]` shortened to `ldh` when optimizing.
    HighN8,
    /// `sp + e8`
    SpE8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub args: Vec<Pattern>,
    pub prefix: Option<u8>,
    pub opcode: u8,
    pub suffix: Option<u8>,
}

const R8: [&str; 8] = ["b", "c", "d", "e", "h", "l", "[hl]", "a"];
const R16: [&str; 4] = ["bc", "de", "hl", "sp"];
const R16_STACK: [&str; 4] = ["bc", "de", "hl", "af"];
const CONDITIONS: [&str; 4] = ["nz", "z", "nc", "c"];
const ALU: [&str; 8] = ["add", "adc", "sub", "sbc", "and", "xor", "or", "cp"];
const CB_SHIFTS: [&str; 8] = ["rlc", "rrc", "rl", "rr", "sla", "sra", "swap", "srl"];
const SIMPLE: [(&str, u8); 13] = [
    ("nop", 0x00),
    ("rlca", 0x07),
    ("rrca", 0x0F),
    ("rla", 0x17),
    ("rra", 0x1F),
    ("daa", 0x27),
    ("cpl", 0x2F),
    ("scf", 0x37),
    ("ccf", 0x3F),
    ("halt", 0x76),
    ("di", 0xF3),
    ("ei", 0xFB),
    ("reti", 0xD9),
];

/// Names that are never free-form expressions.
const RESERVED: [&str; 17] = [
    "a", "b", "c", "d", "e", "h", "l", "af", "bc", "de", "hl", "sp", "hl+", "hl-", "hli", "hld",
    "nz",
];

fn r8(index: usize) -> Pattern {
    if index == 6 {
        Pattern::Ind("hl")
    } else {
        Pattern::Reg(R8[index])
    }
}

fn op(args: &[Pattern], opcode: u8) -> Variant {
    Variant {
        args: args.to_vec(),
        prefix: None,
        opcode,
        suffix: None,
    }
}

fn cb(args: &[Pattern], opcode: u8) -> Variant {
    Variant {
        prefix: Some(0xCB),
        ..op(args, opcode)
    }
}

fn build_table() -> HashMap<&'static str, Vec<Variant>> {
    use Pattern::*;
    let mut table: HashMap<&'static str, Vec<Variant>> = HashMap::new();
    let mut add = |name: &'static str, variant: Variant| table.entry(name).or_default().push(variant);

    for (name, opcode) in SIMPLE {
        add(name, op(&[], opcode));
    }
    add(
        "stop",
        Variant {
            suffix: Some(0x00),
            ..op(&[], 0x10)
        },
    );
    add("stop", op(&[N8], 0x10));

    // loads
    for dst in 0..8 {
        for src in 0..8 {
            if dst == 6 && src == 6 {
                continue;
            }
            add("ld", op(&[r8(dst), r8(src)], 0x40 + (dst * 8 + src) as u8));
        }
        add("ld", op(&[r8(dst), N8], 0x06 + (dst * 8) as u8));
    }
    for (reg, base) in [("bc", 0x00), ("de", 0x10), ("hl+", 0x20), ("hl-", 0x30)] {
        add("ld", op(&[Ind(reg), Reg("a")], base + 0x02));
        add("ld", op(&[Reg("a"), Ind(reg)], base + 0x0A));
    }
    add("ld", op(&[Ind("c"), Reg("a")], 0xE2));
    add("ld", op(&[Reg("a"), Ind("c")], 0xF2));
    for (i, reg) in R16.into_iter().enumerate() {
        add("ld", op(&[Reg(reg), N16], 0x01 + (i * 0x10) as u8));
    }
    add("ld", op(&[Reg("sp"), Reg("hl")], 0xF9));
    add("ld", op(&[Reg("hl"), SpE8], 0xF8));
    add("ld", op(&[IndN16, Reg("sp")], 0x08));
    add("ld", op(&[HighN8, Reg("a")], 0xE0));
    add("ld", op(&[Reg("a"), HighN8], 0xF0));
    add("ld", op(&[IndN16, Reg("a")], 0xEA));
    add("ld", op(&[Reg("a"), IndN16], 0xFA));

    add("ldh", op(&[Ind("c"), Reg("a")], 0xE2));
    add("ldh", op(&[Reg("a"), Ind("c")], 0xF2));
    add("ldh", op(&[LdhN8, Reg("a")], 0xE0));
    add("ldh", op(&[Reg("a"), LdhN8], 0xF0));
    add("ldi", op(&[Ind("hl"), Reg("a")], 0x22));
    add("ldi", op(&[Reg("a"), Ind("hl")], 0x2A));
    add("ldd", op(&[Ind("hl"), Reg("a")], 0x32));
    add("ldd", op(&[Reg("a"), Ind("hl")], 0x3A));

    // arithmetic
    for r in 0..8 {
        add("inc", op(&[r8(r)], 0x04 + (r * 8) as u8));
        add("dec", op(&[r8(r)], 0x05 + (r * 8) as u8));
    }
    for (i, reg) in R16.into_iter().enumerate() {
        add("inc", op(&[Reg(reg)], 0x03 + (i * 0x10) as u8));
        add("dec", op(&[Reg(reg)], 0x0B + (i * 0x10) as u8));
        add("add", op(&[Reg("hl"), Reg(reg)], 0x09 + (i * 0x10) as u8));
    }
    add("add", op(&[Reg("sp"), E8], 0xE8));
    for (k, name) in ALU.into_iter().enumerate() {
        for r in 0..8 {
            add(name, op(&[Reg("a"), r8(r)], 0x80 + (k * 8 + r) as u8));
        }
        add(name, op(&[Reg("a"), N8], 0xC6 + (k * 8) as u8));
        for r in 0..8 {
            add(name, op(&[r8(r)], 0x80 + (k * 8 + r) as u8));
        }
        add(name, op(&[N8], 0xC6 + (k * 8) as u8));
    }

    // control flow
    add("jr", op(&[Rel], 0x18));
    add("jp", op(&[Reg("hl")], 0xE9));
    add("jp", op(&[N16], 0xC3));
    add("call", op(&[N16], 0xCD));
    add("ret", op(&[], 0xC9));
    for (i, cond) in CONDITIONS.into_iter().enumerate() {
        let i = (i * 8) as u8;
        add("jr", op(&[Cond(cond), Rel], 0x20 + i));
        add("jp", op(&[Cond(cond), N16], 0xC2 + i));
        add("call", op(&[Cond(cond), N16], 0xC4 + i));
        add("ret", op(&[Cond(cond)], 0xC0 + i));
    }
    for (i, reg) in R16_STACK.into_iter().enumerate() {
        add("push", op(&[Reg(reg)], 0xC5 + (i * 0x10) as u8));
        add("pop", op(&[Reg(reg)], 0xC1 + (i * 0x10) as u8));
    }
    add("rst", op(&[Vector], 0xC7));

    // bit operations
    for (k, name) in CB_SHIFTS.into_iter().enumerate() {
        for r in 0..8 {
            add(name, cb(&[r8(r)], (k * 8 + r) as u8));
        }
    }
    for (name, base) in [("bit", 0x40), ("res", 0x80), ("set", 0xC0)] {
        for r in 0..8 {
            add(name, cb(&[U3, r8(r)], base + r as u8));
        }
    }
    table
}

pub fn table() -> &'static HashMap<&'static str, Vec<Variant>> {
    static TABLE: OnceLock<HashMap<&'static str, Vec<Variant>>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

pub fn is_mnemonic(word: &str) -> bool {
    table().contains_key(word.to_ascii_lowercase().as_str())
}

/// `HIGH(bc)` style names for the 8-bit halves of a register pair.
fn half_register(node: &Node) -> Option<&'static str> {
    if node.kind != NodeKind::FunctionCall || node.children.len() != 1 {
        return None;
    }
    let pair = node.children[0].word()?;
    let high = node.token.is_word("HIGH");
    let low = node.token.is_word("LOW");
    match (pair.as_str(), high, low) {
        ("af", true, _) => Some("a"),
        ("bc", true, _) => Some("b"),
        ("bc", _, true) => Some("c"),
        ("de", true, _) => Some("d"),
        ("de", _, true) => Some("e"),
        ("hl", true, _) => Some("h"),
        ("hl", _, true) => Some("l"),
        _ => None,
    }
}

fn names_register(node: &Node, name: &str) -> bool {
    node.word().as_deref() == Some(name) || half_register(node) == Some(name)
}

fn indirect_name(name: &str) -> &str {
    match name {
        "hli" => "hl+",
        "hld" => "hl-",
        other => other,
    }
}

/// The expression inside `[...]`, when the node is a plain bracket.
fn bracketed(node: &Node) -> Option<&Node> {
    (node.kind == NodeKind::Indexer && node.children.len() == 1).then(|| &node.children[0])
}

/// Any expression that names no register and uses no brackets.
fn is_free_expression(node: &Node) -> bool {
    if node.kind == NodeKind::Indexer || half_register(node).is_some() {
        return false;
    }
    if let Some(word) = node.word() {
        return !RESERVED.contains(&word.as_str());
    }
    node.children.iter().all(is_free_expression)
}

impl Eval<'_> {
    fn constant_value(&mut self, node: &Node) -> Option<i32> {
        if !self.is_constant(node) {
            return None;
        }
        Some(self.number(node))
    }

    fn matches(&mut self, pattern: Pattern, node: &Node) -> bool {
        match pattern {
            Pattern::Reg(name) => names_register(node, name),
            Pattern::Cond(name) => node.word().as_deref() == Some(name),
            Pattern::Ind(name) => {
                let Some(inner) = bracketed(node) else {
                    return false;
                };
                if let Some(word) = inner.word() {
                    return indirect_name(&word) == name;
                }
                // [$FF00+c]
                name == "c"
                    && inner.kind == NodeKind::BinaryOperator
                    && inner.text() == "+"
                    && inner.children[1].word().as_deref() == Some("c")
                    && self.constant_value(&inner.children[0]) == Some(0xFF00)
            }
            Pattern::N8 | Pattern::N16 | Pattern::E8 | Pattern::Rel => is_free_expression(node),
            Pattern::U3 => {
                is_free_expression(node)
                    && self
                        .constant_value(node)
                        .is_some_and(|n| (0..=7).contains(&n))
            }
            Pattern::Vector => {
                is_free_expression(node)
                    && self
                        .constant_value(node)
                        .is_some_and(|n| (0..=0x38).contains(&n) && n % 8 == 0)
            }
            Pattern::IndN16 => bracketed(node).is_some_and(is_free_expression),
            Pattern::LdhN8 => match bracketed(node) {
                Some(inner) if is_free_expression(inner) => match self.constant_value(inner) {
                    Some(n) => (0..=0xFF).contains(&n) || (0xFF00..=0xFFFF).contains(&n),
                    None => true,
                },
                _ => false,
            },
            Pattern::HighN8 => {
                self.state.options().optimize_ldh
                    && bracketed(node).is_some_and(is_free_expression)
                    && bracketed(node)
                        .and_then(|inner| self.constant_value(inner))
                        .is_some_and(|n| (0xFF00..=0xFFFF).contains(&n))
            }
            Pattern::SpE8 => {
                node.kind == NodeKind::BinaryOperator
                    && matches!(node.text(), "+" | "-")
                    && node.children[0].word().as_deref() == Some("sp")
                    && is_free_expression(&node.children[1])
            }
        }
    }

    /// First variant whose argument count and operand patterns all match.
    pub fn select_variant(&mut self, mnemonic: &str, args: &[Node]) -> Option<&'static Variant> {
        let variants = table().get(mnemonic.to_ascii_lowercase().as_str())?;
        variants
            .iter()
            .filter(|variant| variant.args.len() == args.len())
            .find(|variant| {
                variant
                    .args
                    .iter()
                    .zip(args)
                    .all(|(pattern, arg)| self.matches(*pattern, arg))
            })
    }

    fn byte_operand(&mut self, node: &Node, offset: usize, signed: bool) -> u8 {
        let value = match self.calc_const_expr_or_patch(
            PatchKind::Byte,
            offset,
            node,
            ExpectedType::Number,
        ) {
            Value::Number(n) => n,
            Value::String(_) => 0,
        };
        let range = if signed { -128..=127 } else { -128..=255 };
        if !range.contains(&value) {
            self.error(format!("value {value} does not fit in 8 bits"), &node.token);
        }
        value as u8
    }

    fn word_operand(&mut self, node: &Node, offset: usize) -> [u8; 2] {
        let value = match self.calc_const_expr_or_patch(
            PatchKind::Word,
            offset,
            node,
            ExpectedType::Number,
        ) {
            Value::Number(n) => n,
            Value::String(_) => 0,
        };
        if !(-32768..=65535).contains(&value) {
            self.error(format!("value {value} does not fit in 16 bits"), &node.token);
        }
        (value as u16).to_le_bytes()
    }

    fn relative_operand(&mut self, node: &Node, offset: usize) -> u8 {
        // the displacement counts from the end of the two-byte instruction
        let next = offset as i32 + 1;
        let target = match self.section_offset(node) {
            Some(target) => Some(target),
            None => {
                let fixed = self.state.section().and_then(|section| section.fixed_address);
                match (fixed, self.constant_value(node)) {
                    (Some(base), Some(address)) => Some(address - base as i32),
                    _ => None,
                }
            }
        };
        let Some(target) = target else {
            self.defer(PatchKind::Jr, offset, node);
            return 0;
        };
        let displacement = target - next;
        if !(-128..=127).contains(&displacement) {
            self.error(
                format!("jump target is {displacement} bytes away, out of `jr` range"),
                &node.token,
            );
        }
        displacement as u8
    }

    /// Encodes one instruction whose first byte lands at the current section offset.
    pub fn encode_instruction(&mut self, node: &Node) -> Option<Vec<u8>> {
        let mnemonic = node.text().to_ascii_lowercase();
        let Some(variant) = self.select_variant(&mnemonic, &node.children) else {
            self.error(
                format!("no variant of `{mnemonic}` matches these operands"),
                &node.token,
            );
            return None;
        };
        let start = self.state.byte_offset().unwrap_or(0);
        let mut bytes: Vec<u8> = variant.prefix.into_iter().collect();
        let opcode_index = bytes.len();
        bytes.push(variant.opcode);
        for (pattern, arg) in variant.args.iter().zip(&node.children) {
            let offset = start + bytes.len();
            match pattern {
                Pattern::U3 => {
                    let bit = self.number(arg) as u8;
                    bytes[opcode_index] += bit * 8;
                }
                Pattern::Vector => {
                    let vector = self.number(arg) as u8;
                    bytes[opcode_index] += vector;
                }
                Pattern::N8 => bytes.push(self.byte_operand(arg, offset, false)),
                Pattern::E8 => bytes.push(self.byte_operand(arg, offset, true)),
                Pattern::SpE8 => {
                    let displacement = &arg.children[1];
                    let byte = if arg.text() == "-" {
                        let negated = Node::with_children(
                            NodeKind::UnaryOperator,
                            arg.token.clone(),
                            vec![displacement.clone()],
                        );
                        self.byte_operand(&negated, offset, true)
                    } else {
                        self.byte_operand(displacement, offset, true)
                    };
                    bytes.push(byte);
                }
                Pattern::N16 => bytes.extend(self.word_operand(arg, offset)),
                Pattern::IndN16 => bytes.extend(self.word_operand(&arg.children[0], offset)),
                Pattern::LdhN8 | Pattern::HighN8 => {
                    let inner = &arg.children[0];
                    match self.constant_value(inner) {
                        Some(n) => bytes.push(n as u8),
                        None => {
                            self.checked_patch(LinkOp::HramCheck, offset, inner);
                            bytes.push(0);
                        }
                    }
                }
                Pattern::Rel => bytes.push(self.relative_operand(arg, offset)),
                Pattern::Reg(_) | Pattern::Cond(_) | Pattern::Ind(_) => {}
            }
        }
        bytes.extend(variant.suffix);
        if mnemonic == "halt" && self.state.options().halt_nop {
            bytes.push(0x00);
        }
        Some(bytes)
    }
}
