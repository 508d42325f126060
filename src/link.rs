//! Link-time expressions: postfix bytecode the linker evaluates once addresses are final.

use crate::{
    expr::{Eval, ExpectedType, Value},
    functions::Function,
    node::{Node, NodeKind},
    state::{Patch, PatchKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkOp {
    Add = 0x00,
    Sub = 0x01,
    Mul = 0x02,
    Div = 0x03,
    Mod = 0x04,
    Neg = 0x05,
    Or = 0x10,
    And = 0x11,
    Xor = 0x12,
    Not = 0x13,
    LogicalAnd = 0x21,
    LogicalOr = 0x22,
    LogicalNot = 0x23,
    Equal = 0x30,
    NotEqual = 0x31,
    Greater = 0x32,
    Less = 0x33,
    GreaterEqual = 0x34,
    LessEqual = 0x35,
    ShiftLeft = 0x40,
    ShiftRight = 0x41,
    BankId = 0x50,
    BankSection = 0x51,
    BankCurrent = 0x52,
    SizeofSection = 0x53,
    StartofSection = 0x54,
    SizeofCurrent = 0x55,
    SizeofId = 0x56,
    HramCheck = 0x60,
    ImmediateInt = 0x80,
    ImmediateId = 0x81,
}

impl LinkOp {
    pub fn binary(op: &str) -> Option<Self> {
        Some(match op {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "|" => Self::Or,
            "&" => Self::And,
            "^" => Self::Xor,
            "&&" => Self::LogicalAnd,
            "||" => Self::LogicalOr,
            "==" => Self::Equal,
            "!=" => Self::NotEqual,
            ">" => Self::Greater,
            "<" => Self::Less,
            ">=" => Self::GreaterEqual,
            "<=" => Self::LessEqual,
            "<<" => Self::ShiftLeft,
            ">>" => Self::ShiftRight,
            _ => return None,
        })
    }
}

fn push_op(out: &mut Vec<u8>, op: LinkOp) {
    out.push(op as u8);
}

fn push_int(out: &mut Vec<u8>, value: i32) {
    push_op(out, LinkOp::ImmediateInt);
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_id(out: &mut Vec<u8>, op: LinkOp, id: usize) {
    push_op(out, op);
    out.extend_from_slice(&(id as u32).to_le_bytes());
}

fn push_str(out: &mut Vec<u8>, op: LinkOp, s: &str) {
    push_op(out, op);
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

impl Eval<'_> {
    /// Compiles `node` to link bytecode. `@` refers to `location` in the open section.
    pub fn link_expression(&mut self, node: &Node, location: usize) -> Vec<u8> {
        let mut out = Vec::new();
        self.compile(node, location, &mut out);
        out
    }

    fn compile(&mut self, node: &Node, location: usize, out: &mut Vec<u8>) {
        if self.is_constant(node) {
            let value = self.number(node);
            push_int(out, value);
            return;
        }
        match node.kind {
            NodeKind::Identifier => self.compile_symbol(node, location, out),
            NodeKind::BinaryOperator => {
                let Some(op) = LinkOp::binary(node.text()) else {
                    self.error(format!("unknown operator `{}`", node.text()), &node.token);
                    push_int(out, 0);
                    return;
                };
                self.compile(&node.children[0], location, out);
                self.compile(&node.children[1], location, out);
                push_op(out, op);
            }
            NodeKind::UnaryOperator => {
                self.compile(&node.children[0], location, out);
                match node.text() {
                    "-" => push_op(out, LinkOp::Neg),
                    "~" => push_op(out, LinkOp::Not),
                    "!" => push_op(out, LinkOp::LogicalNot),
                    _ => {}
                }
            }
            NodeKind::FunctionCall => self.compile_call(node, location, out),
            NodeKind::Indexer => match node.children.last() {
                Some(child) => self.compile(child, location, out),
                None => push_int(out, 0),
            },
            _ => {
                self.error(format!("unexpected {} in expression", node.token), &node.token);
                push_int(out, 0);
            }
        }
    }

    fn compile_symbol(&mut self, node: &Node, location: usize, out: &mut Vec<u8>) {
        let name = node.text();
        if name == "@" {
            let Some(section) = self.state.section_name().map(str::to_string) else {
                self.error("`@` used outside of a section", &node.token);
                push_int(out, 0);
                return;
            };
            let id = self.state.location_id(&section, location);
            push_id(out, LinkOp::ImmediateId, id);
            return;
        }
        let Some(id) = self.state.qualify(name) else {
            self.error(
                format!("local label `{name}` used outside of a global label"),
                &node.token,
            );
            push_int(out, 0);
            return;
        };
        let id = self.state.symbol_id(&id);
        push_id(out, LinkOp::ImmediateId, id);
    }

    fn compile_call(&mut self, node: &Node, location: usize, out: &mut Vec<u8>) {
        let Some(function) = self.function(node) else {
            push_int(out, 0);
            return;
        };
        match function {
            Function::High => {
                self.compile(&node.children[0], location, out);
                push_int(out, 0xFF00);
                push_op(out, LinkOp::And);
                push_int(out, 8);
                push_op(out, LinkOp::ShiftRight);
            }
            Function::Low => {
                self.compile(&node.children[0], location, out);
                push_int(out, 0xFF);
                push_op(out, LinkOp::And);
            }
            Function::Bank | Function::Sizeof | Function::Startof => {
                let (current, by_section, by_id) = match function {
                    Function::Bank => (
                        LinkOp::BankCurrent,
                        LinkOp::BankSection,
                        Some(LinkOp::BankId),
                    ),
                    Function::Sizeof => (
                        LinkOp::SizeofCurrent,
                        LinkOp::SizeofSection,
                        Some(LinkOp::SizeofId),
                    ),
                    _ => (LinkOp::StartofSection, LinkOp::StartofSection, None),
                };
                let Some(arg) = node.children.first() else {
                    push_op(out, current);
                    return;
                };
                match (arg.kind, by_id) {
                    (NodeKind::Identifier, _) if arg.text() == "@" && by_id.is_some() => {
                        push_op(out, current)
                    }
                    (NodeKind::Identifier, Some(op)) => {
                        let Some(name) = self.state.qualify(arg.text()) else {
                            self.error(
                                format!("local label `{}` used outside of a global label", arg.text()),
                                &arg.token,
                            );
                            push_int(out, 0);
                            return;
                        };
                        let id = self.state.symbol_id(&name);
                        push_id(out, op, id);
                    }
                    _ => {
                        let section = self.string(arg);
                        push_str(out, by_section, &section);
                    }
                }
            }
            _ => {
                self.error(
                    format!("`{}` cannot be evaluated at link time", function.name()),
                    &node.token,
                );
                push_int(out, 0);
            }
        }
    }

    /// Resolves `node` now when constant, otherwise queues a patch and returns a placeholder.
    pub fn calc_const_expr_or_patch(
        &mut self,
        kind: PatchKind,
        byte_offset: usize,
        node: &Node,
        expected: ExpectedType,
    ) -> Value {
        if self.is_constant(node) {
            return self.evaluate(node, expected);
        }
        if expected == ExpectedType::String {
            self.error("string expressions must be constant", &node.token);
            return Value::zero(expected);
        }
        self.defer(kind, byte_offset, node);
        Value::Number(0)
    }

    /// Queues a patch for `node` unconditionally.
    pub fn defer(&mut self, kind: PatchKind, byte_offset: usize, node: &Node) {
        let Some(section) = self.state.section_name().map(str::to_string) else {
            self.error(
                "non-constant expressions must be placed within sections",
                &node.token,
            );
            return;
        };
        let location = self.here().unwrap_or(0);
        let link_expr = self.link_expression(node, location);
        tracing::trace!("patch {kind:?} at {section}+{byte_offset}");
        self.state.patches.push(Patch {
            node: node.clone(),
            file: self.state.file.clone(),
            line: self.state.line,
            section,
            kind,
            byte_offset,
            link_expr,
        });
    }

    /// Like [`Eval::calc_const_expr_or_patch`], wrapping the expression in a link-time check.
    pub fn checked_patch(&mut self, check: LinkOp, byte_offset: usize, node: &Node) -> i32 {
        let before = self.state.patches.len();
        let value =
            self.calc_const_expr_or_patch(PatchKind::Byte, byte_offset, node, ExpectedType::Number);
        if self.state.patches.len() > before {
            if let Some(patch) = self.state.patches.last_mut() {
                push_op(&mut patch.link_expr, check);
            }
        }
        match value {
            Value::Number(n) => n,
            Value::String(_) => 0,
        }
    }

    /// Branch target as a byte offset in the open section, when it can be known now.
    pub fn section_offset(&mut self, node: &Node) -> Option<i32> {
        match node.kind {
            NodeKind::Identifier => {
                let (section, offset) = self.label_location(node)?;
                (Some(section.as_str()) == self.state.section_name()).then_some(offset as i32)
            }
            NodeKind::BinaryOperator if matches!(node.text(), "+" | "-") => {
                let base = self.section_offset(&node.children[0])?;
                if !self.is_constant(&node.children[1]) {
                    return None;
                }
                let delta = self.number(&node.children[1]);
                Some(if node.text() == "+" {
                    base.wrapping_add(delta)
                } else {
                    base.wrapping_sub(delta)
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expr::tests::{expression, state_with_section},
        rng::XorShift32,
        state::{Label, SymbolKind},
    };

    #[test]
    fn undefined_symbols_become_imports_and_patch() {
        let mut state = state_with_section();
        state.emit(&[0xCD]);
        let node = expression(&mut state, "Far + 2");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        let value =
            eval.calc_const_expr_or_patch(PatchKind::Word, 1, &node, ExpectedType::Number);
        assert_eq!(value, Value::Number(0));
        assert!(state.diagnostics.is_empty());
        assert_eq!(state.patches.len(), 1);
        let patch = &state.patches[0];
        assert_eq!(patch.byte_offset, 1);
        assert_eq!(
            patch.link_expr,
            vec![
                0x81, 0, 0, 0, 0, // Far
                0x80, 2, 0, 0, 0, // 2
                0x00, // add
            ]
        );
        assert_eq!(state.symbols["Far"].kind, SymbolKind::Imported);
    }

    #[test]
    fn high_and_low_expand_to_masks() {
        let mut state = state_with_section();
        let node = expression(&mut state, "LOW(Far)");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        let bytes = eval.link_expression(&node, 0);
        assert_eq!(
            bytes,
            vec![0x81, 0, 0, 0, 0, 0x80, 0xFF, 0, 0, 0, 0x11]
        );
    }

    #[test]
    fn constants_never_patch() {
        let mut state = state_with_section();
        let node = expression(&mut state, "3 * 4");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        let value =
            eval.calc_const_expr_or_patch(PatchKind::Byte, 0, &node, ExpectedType::Number);
        assert_eq!(value, Value::Number(12));
        assert!(state.patches.is_empty());
    }

    #[test]
    fn strings_cannot_be_deferred() {
        let mut state = state_with_section();
        let node = expression(&mut state, "Far");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        let value =
            eval.calc_const_expr_or_patch(PatchKind::Byte, 0, &node, ExpectedType::String);
        assert_eq!(value, Value::String(String::new()));
        assert!(state.patches.is_empty());
        assert!(state.diagnostics[0]
            .message
            .contains("string expressions must be constant"));
    }

    #[test]
    fn pinned_location_names_the_element() {
        let mut state = state_with_section();
        state.emit(&[0, 0, 0]);
        let node = expression(&mut state, "@");
        let mut rng = XorShift32::new(0);
        Eval::new(&mut state, &mut rng, 64)
            .at(5)
            .calc_const_expr_or_patch(PatchKind::Word, 5, &node, ExpectedType::Number);
        Eval::new(&mut state, &mut rng, 64).defer(PatchKind::Word, 1, &node);
        assert_eq!(state.patches.len(), 2);
        assert_eq!(state.symbols[0].name, "@main:5");
        assert_eq!(state.symbols[1].name, "@main:3");
    }

    #[test]
    fn deferring_outside_a_section_is_an_error() {
        let mut state = state_with_section();
        state.in_sections.clear();
        let node = expression(&mut state, "Far");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        eval.calc_const_expr_or_patch(PatchKind::Byte, 0, &node, ExpectedType::Number);
        assert!(state.patches.is_empty());
        assert!(state.diagnostics[0]
            .message
            .contains("non-constant expressions must be placed within sections"));
    }

    #[test]
    fn section_queries_carry_names() {
        let mut state = state_with_section();
        let node = expression(&mut state, "BANK(\"gfx\")");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        let bytes = eval.link_expression(&node, 0);
        assert_eq!(bytes, vec![0x51, 3, 0, 0, 0, b'g', b'f', b'x']);
        let node = expression(eval.state, "SIZEOF(@)");
        assert_eq!(eval.link_expression(&node, 0), vec![0x55]);
    }

    #[test]
    fn branch_offsets_resolve_within_the_section() {
        let mut state = state_with_section();
        state.labels.insert(
            "Loop".to_string(),
            Label {
                id: "Loop".to_string(),
                file: "test.asm".to_string(),
                start_line: 1,
                end_line: 1,
                section: "main".to_string(),
                byte_offset: 3,
                byte_size: 0,
                exported: false,
            },
        );
        let node = expression(&mut state, "Loop + 1");
        let other = expression(&mut state, "Elsewhere");
        let mut rng = XorShift32::new(0);
        let mut eval = Eval::new(&mut state, &mut rng, 64);
        assert_eq!(eval.section_offset(&node), Some(4));
        assert_eq!(eval.section_offset(&other), None);
    }
}
