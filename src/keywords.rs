//! Assembler keywords and their line handlers.

use std::{mem, ops::RangeInclusive};

use indexmap::IndexMap;

use crate::{
    asm::Assembler,
    diag::{DiagnosticSource, Severity},
    expr::{self, ExpectedType, Value},
    node::{Node, NodeKind},
    state::{
        Conditional, Macro, MacroDefine, NumberEquate, PatchKind, Region, Repeat, Section,
        SectionScope, SetSymbol, StringEquate, Union,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Db,
    Dw,
    Dl,
    Ds,
    Equ,
    Equs,
    Set,
    Rb,
    Rw,
    Rl,
    Rsreset,
    Rsset,
    Charmap,
    If,
    Elif,
    Else,
    Endc,
    Macro,
    Endm,
    Shift,
    Rept,
    Endr,
    Union,
    Nextu,
    Endu,
    Include,
    Incbin,
    Export,
    Global,
    Purge,
    Section,
    Pushs,
    Pops,
    Opt,
    Pusho,
    Popo,
    Warn,
    Fail,
    Printt,
    Printv,
    Printi,
    Printf,
    Reseed,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("DB", Keyword::Db),
    ("DW", Keyword::Dw),
    ("DL", Keyword::Dl),
    ("DS", Keyword::Ds),
    ("EQU", Keyword::Equ),
    ("EQUS", Keyword::Equs),
    ("SET", Keyword::Set),
    ("RB", Keyword::Rb),
    ("RW", Keyword::Rw),
    ("RL", Keyword::Rl),
    ("RSRESET", Keyword::Rsreset),
    ("RSSET", Keyword::Rsset),
    ("CHARMAP", Keyword::Charmap),
    ("IF", Keyword::If),
    ("ELIF", Keyword::Elif),
    ("ELSE", Keyword::Else),
    ("ENDC", Keyword::Endc),
    ("MACRO", Keyword::Macro),
    ("ENDM", Keyword::Endm),
    ("SHIFT", Keyword::Shift),
    ("REPT", Keyword::Rept),
    ("ENDR", Keyword::Endr),
    ("UNION", Keyword::Union),
    ("NEXTU", Keyword::Nextu),
    ("ENDU", Keyword::Endu),
    ("INCLUDE", Keyword::Include),
    ("INCBIN", Keyword::Incbin),
    ("EXPORT", Keyword::Export),
    ("GLOBAL", Keyword::Global),
    ("PURGE", Keyword::Purge),
    ("SECTION", Keyword::Section),
    ("PUSHS", Keyword::Pushs),
    ("POPS", Keyword::Pops),
    ("OPT", Keyword::Opt),
    ("PUSHO", Keyword::Pusho),
    ("POPO", Keyword::Popo),
    ("WARN", Keyword::Warn),
    ("FAIL", Keyword::Fail),
    ("PRINTT", Keyword::Printt),
    ("PRINTV", Keyword::Printv),
    ("PRINTI", Keyword::Printi),
    ("PRINTF", Keyword::Printf),
    ("RESEED", Keyword::Reseed),
];

impl Keyword {
    pub fn parse(word: &str) -> Option<Self> {
        KEYWORDS
            .iter()
            .find(|(spelling, _)| spelling.eq_ignore_ascii_case(word))
            .map(|(_, keyword)| *keyword)
    }

    pub fn name(self) -> &'static str {
        KEYWORDS
            .iter()
            .find(|(_, keyword)| *keyword == self)
            .map(|(spelling, _)| *spelling)
            .unwrap_or("?")
    }

    /// Only recognized while extensions are enabled.
    pub fn is_extension(self) -> bool {
        self == Self::Reseed
    }

    /// Keywords whose label is the symbol being defined rather than a code label.
    pub fn names_label(self) -> bool {
        matches!(
            self,
            Self::Equ | Self::Equs | Self::Set | Self::Rb | Self::Rw | Self::Rl | Self::Macro
        )
    }

    pub fn arity(self) -> RangeInclusive<usize> {
        match self {
            Self::Db | Self::Dw | Self::Dl | Self::Pusho => 0..=usize::MAX,
            Self::Export | Self::Global | Self::Purge | Self::Opt => 1..=usize::MAX,
            Self::Ds => 1..=2,
            Self::Rb | Self::Rw | Self::Rl | Self::Macro | Self::Shift => 0..=1,
            Self::Charmap => 2..=2,
            Self::Incbin => 1..=3,
            Self::Section => 2..=4,
            Self::Rsreset
            | Self::Else
            | Self::Endc
            | Self::Endm
            | Self::Endr
            | Self::Union
            | Self::Nextu
            | Self::Endu
            | Self::Pushs
            | Self::Pops
            | Self::Popo => 0..=0,
            _ => 1..=1,
        }
    }
}

/// Greedy charmap translation; unmapped characters pass through as their code point.
pub fn charmap_bytes(charmaps: &IndexMap<String, u8>, s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut rest = s;
    while let Some(c) = rest.chars().next() {
        let longest = charmaps
            .iter()
            .filter(|(key, _)| !key.is_empty() && rest.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len());
        match longest {
            Some((key, byte)) => {
                out.push(*byte);
                rest = &rest[key.len()..];
            }
            None => {
                out.push(c as u32 as u8);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

fn number(value: Value) -> i32 {
    match value {
        Value::Number(n) => n,
        Value::String(_) => 0,
    }
}

impl Assembler {
    fn check_arity(&mut self, keyword: Keyword, op: &Node) -> bool {
        let arity = keyword.arity();
        if arity.contains(&op.children.len()) {
            return true;
        }
        let expected = match (*arity.start(), *arity.end()) {
            (start, end) if start == end => format!("{start}"),
            (start, usize::MAX) => format!("at least {start}"),
            (start, end) => format!("{start} to {end}"),
        };
        self.error(
            format!("`{}` expects {expected} arguments", keyword.name()),
            &op.token,
        );
        false
    }

    /// The symbol name a defining keyword applies to.
    fn defined_name(
        &mut self,
        keyword: Keyword,
        label: Option<&Node>,
        op: &Node,
    ) -> Option<String> {
        match label {
            Some(label) => Some(label.text().to_string()),
            None => {
                self.error(format!("`{}` requires a symbol name", keyword.name()), &op.token);
                None
            }
        }
    }

    fn check_undefined(&mut self, name: &str, node: &Node) -> bool {
        if self.state.is_defined(name) {
            self.error(format!("`{name}` is already defined"), &node.token);
            return false;
        }
        true
    }

    pub(crate) fn keyword(&mut self, label: Option<&Node>, op: &Node) {
        let Some(keyword) = Keyword::parse(op.text()) else {
            self.error(format!("unknown keyword `{}`", op.text()), &op.token);
            return;
        };
        if let Some(label) = label.filter(|_| !keyword.names_label()) {
            self.define_label(label);
        }
        // block openers check their own arguments once they know they are live
        if !matches!(keyword, Keyword::If | Keyword::Elif | Keyword::Rept)
            && !self.check_arity(keyword, op)
        {
            return;
        }
        match keyword {
            Keyword::Db | Keyword::Dw | Keyword::Dl | Keyword::Ds => self.data(keyword, op),
            Keyword::Equ => self.equ(label, op),
            Keyword::Equs => self.equs(label, op),
            Keyword::Set => self.reassign(label, op),
            Keyword::Rb | Keyword::Rw | Keyword::Rl => self.rs_field(keyword, label, op),
            Keyword::Rsreset => self.state.rs_counter = 0,
            Keyword::Rsset => {
                let value = self.eval().number(&op.children[0]);
                self.state.rs_counter = value;
            }
            Keyword::Charmap => self.charmap(op),
            Keyword::If => self.if_block(op),
            Keyword::Elif => self.elif_block(op),
            Keyword::Else => match self.state.in_conditionals.last_mut() {
                Some(cond) => {
                    cond.condition = !cond.taken;
                    cond.taken = true;
                }
                None => self.error("`ELSE` without `IF`", &op.token),
            },
            Keyword::Endc => {
                if self.state.in_conditionals.pop().is_none() {
                    self.error("`ENDC` without `IF`", &op.token);
                }
            }
            Keyword::Macro => self.macro_define(label, op),
            Keyword::Endm => self.macro_end(op),
            Keyword::Shift => self.shift(op),
            Keyword::Rept => self.rept(op),
            Keyword::Endr => self.endr(op),
            Keyword::Union => self.union_start(op),
            Keyword::Nextu => self.union_next(op),
            Keyword::Endu => self.union_end(op),
            Keyword::Include => self.include(op),
            Keyword::Incbin => self.incbin(op),
            Keyword::Export | Keyword::Global => self.export(op),
            Keyword::Purge => self.purge(op),
            Keyword::Section => self.section(op),
            Keyword::Pushs => {
                self.state.close_label();
                let scope = SectionScope {
                    sections: mem::take(&mut self.state.in_sections),
                    unions: mem::take(&mut self.state.in_unions),
                    global_label: self.state.in_global_label.take(),
                };
                self.state.pushed_sections.push(scope);
            }
            Keyword::Pops => {
                self.state.close_label();
                match self.state.pushed_sections.pop() {
                    Some(scope) => {
                        self.state.in_sections = scope.sections;
                        self.state.in_unions = scope.unions;
                        self.state.in_global_label = scope.global_label;
                    }
                    None => self.error("`POPS` without `PUSHS`", &op.token),
                }
            }
            Keyword::Opt => self.options(op),
            Keyword::Pusho => {
                let current = self.state.options();
                self.state.options.push(current);
                self.options(op);
            }
            Keyword::Popo => {
                if self.state.options.len() > 1 {
                    self.state.options.pop();
                } else {
                    self.error("`POPO` without `PUSHO`", &op.token);
                }
            }
            Keyword::Warn | Keyword::Fail => {
                let message = self.eval().string(&op.children[0]);
                let severity = if keyword == Keyword::Warn {
                    Severity::Warn
                } else {
                    Severity::Error
                };
                self.state
                    .diagnose(DiagnosticSource::Evaluator, severity, message, Some(&op.token));
            }
            Keyword::Printt | Keyword::Printv | Keyword::Printi | Keyword::Printf => {
                self.print(keyword, op)
            }
            Keyword::Reseed => {
                let seed = self.eval().number(&op.children[0]);
                self.rng.seed(seed as u32);
            }
        }
    }

    fn equ(&mut self, label: Option<&Node>, op: &Node) {
        let Some(name) = self.defined_name(Keyword::Equ, label, op) else {
            return;
        };
        if !self.check_undefined(&name, op) {
            return;
        }
        let value = self.eval().number(&op.children[0]);
        let equate = NumberEquate {
            id: name.clone(),
            file: self.state.file.clone(),
            line: self.state.line,
            value,
        };
        self.state.number_equates.insert(name, equate);
    }

    fn equs(&mut self, label: Option<&Node>, op: &Node) {
        let Some(name) = self.defined_name(Keyword::Equs, label, op) else {
            return;
        };
        if !self.check_undefined(&name, op) {
            return;
        }
        let value = self.eval().string(&op.children[0]);
        let equate = StringEquate {
            id: name.clone(),
            file: self.state.file.clone(),
            line: self.state.line,
            value,
        };
        self.state.string_equates.insert(name, equate);
    }

    /// `SET` and `=`: reassignable numeric symbols.
    pub(crate) fn reassign(&mut self, label: Option<&Node>, op: &Node) {
        let Some(name) = self.defined_name(Keyword::Set, label, op) else {
            return;
        };
        let Some(value) = op.children.first() else {
            self.error("`SET` expects 1 arguments", &op.token);
            return;
        };
        if self.state.number_equates.contains_key(&name)
            || self.state.string_equates.contains_key(&name)
            || self.state.macros.contains_key(&name)
        {
            self.error(format!("`{name}` is a constant and cannot be reassigned"), &op.token);
            return;
        }
        let value = self.eval().number(value);
        let (file, line) = (self.state.file.clone(), self.state.line);
        let set = self
            .state
            .sets
            .entry(name.clone())
            .or_insert_with(|| SetSymbol {
                id: name,
                file,
                lines: Vec::new(),
                value,
            });
        set.lines.push(line);
        set.value = value;
    }

    fn rs_field(&mut self, keyword: Keyword, label: Option<&Node>, op: &Node) {
        let Some(name) = self.defined_name(keyword, label, op) else {
            return;
        };
        if !self.check_undefined(&name, op) {
            return;
        }
        let count = match op.children.first() {
            Some(arg) => self.eval().number(arg),
            None => 1,
        };
        let size = match keyword {
            Keyword::Rw => 2,
            Keyword::Rl => 4,
            _ => 1,
        };
        let equate = NumberEquate {
            id: name.clone(),
            file: self.state.file.clone(),
            line: self.state.line,
            value: self.state.rs_counter,
        };
        self.state.number_equates.insert(name, equate);
        self.state.rs_counter = self
            .state
            .rs_counter
            .wrapping_add(count.wrapping_mul(size));
    }

    fn charmap(&mut self, op: &Node) {
        let mut eval = self.eval();
        let key = eval.string(&op.children[0]);
        let value = eval.number(&op.children[1]);
        if key.is_empty() {
            self.error("charmap entries cannot be empty", &op.children[0].token);
            return;
        }
        if !(0..=255).contains(&value) {
            self.error(
                format!("charmap value {value} does not fit in 8 bits"),
                &op.children[1].token,
            );
            return;
        }
        self.state.charmaps.insert(key, value as u8);
    }

    fn if_block(&mut self, op: &Node) {
        if !self.state.conditions_true() {
            // the whole block is dead, every arm counts as already taken
            self.state.in_conditionals.push(Conditional {
                condition: false,
                taken: true,
            });
            return;
        }
        let condition = if self.check_arity(Keyword::If, op) {
            self.eval().number(&op.children[0]) != 0
        } else {
            false
        };
        self.state.in_conditionals.push(Conditional {
            condition,
            taken: condition,
        });
    }

    fn elif_block(&mut self, op: &Node) {
        let Some(top) = self.state.in_conditionals.last().copied() else {
            self.error("`ELIF` without `IF`", &op.token);
            return;
        };
        let condition = if top.taken || !self.state.outer_conditions_true() {
            false
        } else if self.check_arity(Keyword::Elif, op) {
            self.eval().number(&op.children[0]) != 0
        } else {
            false
        };
        if let Some(top) = self.state.in_conditionals.last_mut() {
            top.condition = condition;
            top.taken |= condition;
        }
    }

    fn macro_define(&mut self, label: Option<&Node>, op: &Node) {
        let name = match (label, op.children.first()) {
            (Some(label), _) => label.text().to_string(),
            (None, Some(arg)) if arg.kind == NodeKind::Identifier => arg.text().to_string(),
            _ if !self.state.in_macro_defines.is_empty() => String::new(),
            _ => {
                self.error("`MACRO` requires a name", &op.token);
                return;
            }
        };
        self.state.in_macro_defines.push(MacroDefine {
            id: name,
            file: self.state.file.clone(),
            start_line: self.state.line,
        });
    }

    fn macro_end(&mut self, op: &Node) {
        let Some(define) = self.state.in_macro_defines.pop() else {
            self.error("`ENDM` without `MACRO`", &op.token);
            return;
        };
        if !self.state.in_macro_defines.is_empty() {
            return;
        }
        if !self.check_undefined(&define.id, op) {
            return;
        }
        tracing::debug!(
            "defined macro {} ({}:{}-{})",
            define.id,
            define.file,
            define.start_line,
            self.state.line
        );
        self.state.macros.insert(
            define.id.clone(),
            Macro {
                id: define.id,
                file: define.file,
                start_line: define.start_line,
                end_line: self.state.line,
            },
        );
    }

    fn shift(&mut self, op: &Node) {
        let count = match op.children.first() {
            Some(arg) => self.eval().number(arg),
            None => 1,
        };
        if count < 0 {
            self.error(format!("cannot shift by {count}"), &op.token);
            return;
        }
        match self.state.in_macro_calls.last_mut() {
            Some(call) => call.arg_offset += count as usize,
            None => self.error("`SHIFT` used outside of a macro", &op.token),
        }
    }

    fn rept(&mut self, op: &Node) {
        let (file, line) = (self.state.file.clone(), self.state.line);
        if !self.state.in_repeats.is_empty() {
            // nested block inside a body still being recorded
            self.state.in_repeats.push(Repeat {
                count: 0,
                line,
                file,
            });
            return;
        }
        let count = if self.check_arity(Keyword::Rept, op) {
            self.eval().number(&op.children[0])
        } else {
            0
        };
        if count < 0 {
            self.error(format!("cannot repeat {count} times"), &op.token);
        }
        self.state.in_repeats.push(Repeat {
            count: count.max(0) as usize,
            line,
            file,
        });
    }

    fn endr(&mut self, op: &Node) {
        let Some(repeat) = self.state.in_repeats.pop() else {
            self.error("`ENDR` without `REPT`", &op.token);
            return;
        };
        if !self.state.in_repeats.is_empty() {
            return;
        }
        if self.depth >= self.config.max_depth {
            self.error(
                format!("expansion depth of {} exceeded", self.config.max_depth),
                &op.token,
            );
            return;
        }
        let end = self.state.line.saturating_sub(1);
        tracing::debug!(
            "repeating {}:{}-{} {} times",
            repeat.file,
            repeat.line + 1,
            end,
            repeat.count
        );
        self.state.macro_counter += 1;
        self.state.unique_ids.push(self.state.macro_counter);
        self.depth += 1;
        for _ in 0..repeat.count {
            self.run_lines(&repeat.file, repeat.line..end);
        }
        self.depth -= 1;
        self.state.unique_ids.pop();
    }

    fn union_start(&mut self, op: &Node) {
        let Some(byte_offset) = self.state.byte_offset() else {
            self.error("`UNION` must be placed within a section", &op.token);
            return;
        };
        self.state.in_unions.push(Union {
            byte_offset,
            byte_length: 0,
        });
    }

    /// Length of the current arm, folded into the union's maximum.
    fn close_union_arm(&mut self) -> Option<Union> {
        let current = self.state.byte_offset()?;
        let union = self.state.in_unions.last_mut()?;
        union.byte_length = union
            .byte_length
            .max(current.saturating_sub(union.byte_offset));
        Some(*union)
    }

    fn union_next(&mut self, op: &Node) {
        let Some(union) = self.close_union_arm() else {
            self.error("`NEXTU` without `UNION`", &op.token);
            return;
        };
        if let Some(section) = self.state.section_mut() {
            section.bytes.truncate(union.byte_offset);
        }
        // patches only cover bytes that survive the arm
        let Some(section) = self.state.section_name().map(str::to_string) else {
            return;
        };
        self.state
            .patches
            .retain(|patch| patch.section != section || patch.byte_offset < union.byte_offset);
    }

    fn union_end(&mut self, op: &Node) {
        let Some(union) = self.close_union_arm() else {
            self.error("`ENDU` without `UNION`", &op.token);
            return;
        };
        self.state.in_unions.pop();
        let pad = self.state.options().pad;
        if let Some(section) = self.state.section_mut() {
            section
                .bytes
                .resize(union.byte_offset + union.byte_length, pad);
        }
    }

    fn data(&mut self, keyword: Keyword, op: &Node) {
        let Some(start) = self.state.byte_offset() else {
            self.error(
                format!("`{}` must be placed within a section", keyword.name()),
                &op.token,
            );
            return;
        };
        let mut bytes = Vec::new();
        if keyword == Keyword::Ds {
            let count = self.eval().number(&op.children[0]);
            let fill = match op.children.get(1) {
                Some(fill) => self.eval().number(fill),
                None => self.state.options().pad as i32,
            };
            if !(0..=0xFFFF).contains(&count) {
                self.error(format!("cannot reserve {count} bytes"), &op.children[0].token);
            } else if !(-128..=255).contains(&fill) {
                self.error(format!("fill value {fill} does not fit in 8 bits"), &op.token);
            } else {
                bytes.resize(count as usize, fill as u8);
            }
            self.state.emit(&bytes);
            return;
        }
        for arg in &op.children {
            let offset = start + bytes.len();
            match keyword {
                Keyword::Db => {
                    let value = self.eval().at(offset).calc_const_expr_or_patch(
                        PatchKind::Byte,
                        offset,
                        arg,
                        ExpectedType::Either,
                    );
                    match value {
                        Value::String(s) => bytes.extend(charmap_bytes(&self.state.charmaps, &s)),
                        Value::Number(n) => {
                            if !(-128..=255).contains(&n) {
                                self.error(format!("value {n} does not fit in 8 bits"), &arg.token);
                            }
                            bytes.push(n as u8);
                        }
                    }
                }
                Keyword::Dw => {
                    let value = number(self.eval().at(offset).calc_const_expr_or_patch(
                        PatchKind::Word,
                        offset,
                        arg,
                        ExpectedType::Number,
                    ));
                    if !(-32768..=65535).contains(&value) {
                        self.error(format!("value {value} does not fit in 16 bits"), &arg.token);
                    }
                    bytes.extend((value as u16).to_le_bytes());
                }
                _ => {
                    let value = number(self.eval().at(offset).calc_const_expr_or_patch(
                        PatchKind::Long,
                        offset,
                        arg,
                        ExpectedType::Number,
                    ));
                    bytes.extend(value.to_le_bytes());
                }
            }
        }
        self.state.emit(&bytes);
    }

    fn include(&mut self, op: &Node) {
        let path = self.eval().string(&op.children[0]);
        if self.depth >= self.config.max_depth {
            self.error(
                format!("expansion depth of {} exceeded", self.config.max_depth),
                &op.token,
            );
            return;
        }
        let requester = self.state.file.clone();
        let Some((name, contents)) = self.files.retrieve(&path, &requester, false) else {
            self.error(format!("cant find file `{path}`"), &op.children[0].token);
            return;
        };
        self.load(&name, &contents);
        self.depth += 1;
        self.run_file(&name);
        self.depth -= 1;
    }

    fn incbin(&mut self, op: &Node) {
        if self.state.section().is_none() {
            self.error("`INCBIN` must be placed within a section", &op.token);
            return;
        }
        let path = self.eval().string(&op.children[0]);
        let start = match op.children.get(1) {
            Some(arg) => self.eval().number(arg),
            None => 0,
        };
        let len = match op.children.get(2) {
            Some(arg) => Some(self.eval().number(arg)),
            None => None,
        };
        let requester = self.state.file.clone();
        let Some((_, contents)) = self.files.retrieve(&path, &requester, true) else {
            self.error(format!("cant find file `{path}`"), &op.children[0].token);
            return;
        };
        let start = start.max(0) as usize;
        let end = match len {
            Some(len) => start.saturating_add(len.max(0) as usize),
            None => contents.len().max(start),
        };
        match contents.get(start..end) {
            Some(bytes) => self.state.emit(bytes),
            None => self.error(
                format!(
                    "range {start}..{end} is outside of `{path}` ({} bytes)",
                    contents.len()
                ),
                &op.token,
            ),
        }
    }

    fn export(&mut self, op: &Node) {
        for arg in &op.children {
            if arg.kind != NodeKind::Identifier {
                self.error(format!("expected a symbol name, found {}", arg.token), &arg.token);
                continue;
            }
            let Some(id) = self.state.qualify(arg.text()) else {
                self.error(
                    format!("local label `{}` is outside of a global label", arg.text()),
                    &arg.token,
                );
                continue;
            };
            if let Some(label) = self.state.labels.get_mut(&id) {
                label.exported = true;
            } else if !self.state.is_defined(&id) {
                self.state.pending_exports.insert(id);
            }
        }
    }

    fn purge(&mut self, op: &Node) {
        for arg in &op.children {
            let name = arg.text();
            let mut found = self.state.number_equates.shift_remove(name).is_some();
            found |= self.state.string_equates.shift_remove(name).is_some();
            found |= self.state.sets.shift_remove(name).is_some();
            found |= self.state.macros.shift_remove(name).is_some();
            if let Some(id) = self.state.qualify(name) {
                if self.state.symbols.contains_key(&id) && self.state.labels.contains_key(&id) {
                    self.error(
                        format!("label `{id}` is referenced and cannot be purged"),
                        &arg.token,
                    );
                    continue;
                }
                found |= self.state.labels.shift_remove(&id).is_some();
            }
            if !found {
                self.error(format!("`{name}` is not defined"), &arg.token);
            }
        }
    }

    fn section(&mut self, op: &Node) {
        let name = self.eval().string(&op.children[0]);
        let kind = &op.children[1];
        let (region_node, address_node) = match kind.kind {
            NodeKind::Indexer if kind.children.len() == 2 => {
                (&kind.children[0], Some(&kind.children[1]))
            }
            _ => (kind, None),
        };
        let region = match region_node.kind {
            NodeKind::Identifier => Region::parse(region_node.text()),
            _ => None,
        };
        let Some(region) = region else {
            self.error(
                format!("unknown memory region `{}`", region_node.text()),
                &region_node.token,
            );
            return;
        };

        let mut fixed_address = None;
        if let Some(node) = address_node {
            let address = self.eval().number(node);
            if !(*region.addresses().start() as i32..=*region.addresses().end() as i32)
                .contains(&address)
            {
                self.error(
                    format!("address ${address:04X} is outside of {region}"),
                    &node.token,
                );
                return;
            }
            fixed_address = Some(address as u16);
        }

        let mut bank = None;
        let mut alignment = None;
        for attribute in &op.children[2..] {
            let (word, value) = match attribute.kind {
                NodeKind::Indexer if attribute.children.len() == 2 => (
                    attribute.children[0].text().to_ascii_uppercase(),
                    &attribute.children[1],
                ),
                _ => {
                    self.error(
                        format!("expected `BANK[n]` or `ALIGN[n]`, found {}", attribute.token),
                        &attribute.token,
                    );
                    return;
                }
            };
            let n = self.eval().number(value);
            match word.as_str() {
                "BANK" => {
                    let Some(banks) = region.banks() else {
                        self.error(format!("{region} is not banked"), &attribute.token);
                        return;
                    };
                    if n < 0 || !banks.contains(&(n as u32)) {
                        self.error(format!("bank {n} is outside of {region}"), &value.token);
                        return;
                    }
                    bank = Some(n as u32);
                }
                "ALIGN" => {
                    if !(0..=16).contains(&n) {
                        self.error(format!("alignment {n} must be 0 to 16"), &value.token);
                        return;
                    }
                    alignment = Some(n as u8);
                }
                _ => {
                    self.error(
                        format!("expected `BANK[n]` or `ALIGN[n]`, found {}", attribute.token),
                        &attribute.token,
                    );
                    return;
                }
            }
        }

        let section = Section {
            id: name.clone(),
            file: self.state.file.clone(),
            region,
            fixed_address,
            bank,
            alignment,
            bytes: Vec::new(),
        };
        match self.state.sections.get(&name) {
            Some(existing) if !existing.same_layout(&section) => {
                self.error(
                    format!("section `{name}` is redeclared with different attributes"),
                    &op.children[0].token,
                );
                return;
            }
            Some(_) => {}
            None => {
                self.state.sections.insert(name.clone(), section);
            }
        }
        self.state.close_label();
        tracing::debug!("entering section \"{name}\" in {region}");
        self.state.in_sections = vec![name];
    }

    fn options(&mut self, op: &Node) {
        for arg in &op.children {
            let text = arg.text();
            let mut options = self.state.options();
            let applied = match text.split_at(text.chars().next().map_or(0, char::len_utf8)) {
                ("p", value) => match expr::parse_number(value, &options) {
                    Some(pad) if (0..=255).contains(&pad) => {
                        options.pad = pad as u8;
                        true
                    }
                    _ => false,
                },
                ("h", "") => {
                    options.halt_nop = false;
                    true
                }
                ("L", "") => {
                    options.optimize_ldh = false;
                    true
                }
                ("!", "h") => {
                    options.halt_nop = true;
                    true
                }
                ("!", "L") => {
                    options.optimize_ldh = true;
                    true
                }
                ("b", digits) => match digits.chars().collect::<Vec<_>>().as_slice() {
                    &[zero, one] => {
                        options.binary_digits = [zero, one];
                        true
                    }
                    _ => false,
                },
                ("g", digits) => match digits.chars().collect::<Vec<_>>().as_slice() {
                    &[a, b, c, d] => {
                        options.gfx_digits = [a, b, c, d];
                        true
                    }
                    _ => false,
                },
                _ => false,
            };
            if applied {
                *self.state.options_mut() = options;
            } else {
                self.error(format!("invalid option `{text}`"), &arg.token);
            }
        }
    }

    fn print(&mut self, keyword: Keyword, op: &Node) {
        let arg = &op.children[0];
        let text = match keyword {
            Keyword::Printt => self.eval().string(arg),
            Keyword::Printv => format!("${:X}", self.eval().number(arg)),
            Keyword::Printi => format!("{}", self.eval().number(arg)),
            _ => format!("{:.5}", self.eval().number(arg) as f64 / 65536.0),
        };
        tracing::info!("{text}");
        self.state.printed.push_str(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, files::MemoryFiles, object::Object};

    fn assemble(source: &str) -> Object {
        assemble_with(MemoryFiles::new(), source)
    }

    fn assemble_with(files: MemoryFiles, source: &str) -> Object {
        let mut asm = Assembler::new(Config::default(), Box::new(files));
        asm.assemble_source("main.asm", source);
        asm.finish()
    }

    fn messages(object: &Object) -> Vec<String> {
        object
            .diagnostics
            .iter()
            .map(|diag| diag.message.clone())
            .collect()
    }

    fn bytes<'a>(object: &'a Object, section: &str) -> &'a [u8] {
        &object.sections[section].bytes
    }

    #[test]
    fn keywords_parse_case_insensitively() {
        assert_eq!(Keyword::parse("db"), Some(Keyword::Db));
        assert_eq!(Keyword::parse("EndC"), Some(Keyword::Endc));
        assert_eq!(Keyword::parse("DEF"), None);
        assert!(Keyword::Reseed.is_extension());
        assert_eq!(Keyword::Printf.name(), "PRINTF");
    }

    #[test]
    fn data_keywords_emit_little_endian() {
        let object = assemble(
            r#"
SECTION "data", ROM0
  db 1, "AB", -1
  dw $1234
  dl $DEADBEEF
  ds 2, $FF
"#,
        );
        assert_eq!(messages(&object), Vec::<String>::new());
        assert_eq!(
            bytes(&object, "data"),
            &[1, b'A', b'B', 0xFF, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE, 0xFF, 0xFF]
        );
    }

    #[test]
    fn charmap_translates_strings_greedily() {
        let object = assemble(
            r#"
CHARMAP "A", 1
CHARMAP "AB", 2
SECTION "text", ROM0
  db "ABA", "C"
"#,
        );
        assert_eq!(bytes(&object, "text"), &[2, 1, b'C']);
    }

    #[test]
    fn data_outside_a_section_is_an_error() {
        let object = assemble("  db 1\n");
        assert!(object.has_errors());
        assert!(messages(&object)[0].contains("within a section"));
    }

    #[test]
    fn deferred_elements_reserve_placeholders() {
        let object = assemble(
            r#"
SECTION "data", ROM0
  db 7, Later
  dw Later
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "data"), &[7, 0, 0, 0]);
        let patches: Vec<_> = object
            .patches
            .iter()
            .map(|patch| (patch.kind, patch.byte_offset))
            .collect();
        assert_eq!(patches, [(PatchKind::Byte, 1), (PatchKind::Word, 2)]);
        assert!(object.patches.iter().all(|patch| !patch.link_expr.is_empty()));
    }

    fn referenced_symbol<'a>(object: &'a Object, patch: usize) -> &'a str {
        let expr = &object.patches[patch].link_expr;
        assert_eq!(expr[0], 0x81);
        let id = u32::from_le_bytes([expr[1], expr[2], expr[3], expr[4]]) as usize;
        &object.symbols[id].name
    }

    #[test]
    fn location_in_data_is_the_element_itself() {
        let object = assemble(
            r#"
SECTION "data", ROM0
  db 1, 2, @
  dw 0, @
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(object.patches[0].byte_offset, 2);
        assert_eq!(referenced_symbol(&object, 0), "@data:2");
        assert_eq!(object.patches[1].byte_offset, 5);
        assert_eq!(referenced_symbol(&object, 1), "@data:5");
    }

    #[test]
    fn location_in_code_is_the_instruction_start() {
        let object = assemble(
            r#"
SECTION "code", ROM0
  nop
  jp @
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "code"), &[0x00, 0xC3, 0x00, 0x00]);
        assert_eq!(object.patches[0].byte_offset, 2);
        assert_eq!(referenced_symbol(&object, 0), "@code:1");
    }

    #[test]
    fn location_minus_label_is_constant() {
        let object = assemble(
            r#"
SECTION "code", ROM0
Start:
  nop
  db 1, @ - Start
  dw @ - Start
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert!(object.patches.is_empty());
        assert_eq!(bytes(&object, "code"), &[0x00, 1, 2, 3, 0]);
    }

    #[test]
    fn equates_are_write_once_and_sets_are_not() {
        let object = assemble(
            r#"
WIDTH EQU 20
WIDTH EQU 21
count SET 1
count = count + 1
NAME EQUS "gb"
WIDTH SET 3
"#,
        );
        assert_eq!(
            messages(&object),
            [
                "`WIDTH` is already defined",
                "`WIDTH` is a constant and cannot be reassigned"
            ]
        );
    }

    #[test]
    fn equates_feed_later_lines() {
        let object = assemble(
            r#"
WIDTH EQU 20
count SET 1
count = count + WIDTH
NAME EQUS "db"
SECTION "s", ROM0
  NAME count, WIDTH
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[21, 20]);
    }

    #[test]
    fn rs_counters_allocate_fields() {
        let object = assemble(
            r#"
RSRESET
pos_x RB 1
pos_y RW
flags RL 2
SECTION "s", ROM0
  db pos_x, pos_y, flags, _RS
RSSET 40
  db _RS
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[0, 1, 3, 11, 40]);
    }

    #[test]
    fn false_conditional_lines_are_skipped() {
        let object = assemble(
            r#"
SECTION "s", ROM0
IF 0
Hidden:
HIDDEN EQU 1
SECTION "other", ROM0
  db 1
ELIF 1
  db 2
ELIF 1
  db 3
ELSE
  db 4
ENDC
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[2]);
        assert!(!object.sections.contains_key("other"));
        assert!(!object.symbols.contains_key("Hidden"));
    }

    #[test]
    fn nested_dead_conditionals_do_not_evaluate() {
        let object = assemble(
            r#"
SECTION "s", ROM0
IF 0
IF undefined_symbol
  db 1
ELSE
  db 2
ENDC
ELSE
  db 3
ENDC
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[3]);
    }

    #[test]
    fn stray_block_ends_are_errors() {
        let object = assemble("ENDC\nELSE\nENDR\nENDM\nENDU\n");
        assert_eq!(object.diagnostics.len(), 5);
        let object = assemble("IF 1\n");
        assert_eq!(messages(&object), ["unterminated IF block"]);
    }

    #[test]
    fn repeat_runs_body_and_bumps_counter_once() {
        let object = assemble(
            r#"
SECTION "s", ROM0
REPT 3
  db __MACRO_COUNTER__
  db $AA
ENDR
  db __MACRO_COUNTER__
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[1, 0xAA, 1, 0xAA, 1, 0xAA, 1]);
    }

    #[test]
    fn nested_repeats_multiply() {
        let object = assemble(
            r#"
SECTION "s", ROM0
REPT 2
REPT 3
  db 0
ENDR
ENDR
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s").len(), 6);
    }

    #[test]
    fn union_length_is_the_longest_arm() {
        let object = assemble(
            r#"
OPT p$EE
SECTION "s", WRAM0
UNION
  db 1, 2
NEXTU
  db 3, 4, 5, 6, 7
NEXTU
  db 8
ENDU
  db 9
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[8, 0xEE, 0xEE, 0xEE, 0xEE, 9]);
    }

    #[test]
    fn discarded_union_arms_drop_their_patches() {
        let object = assemble(
            r#"
SECTION "s", ROM0
  dw Before
UNION
  dw Far
NEXTU
  db 1, 2
ENDU
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[0, 0, 1, 2]);
        let offsets: Vec<_> = object.patches.iter().map(|patch| patch.byte_offset).collect();
        assert_eq!(offsets, [0]);
    }

    #[test]
    fn macros_expand_with_arguments() {
        let object = assemble(
            r#"
MACRO put
  db \1, \2, _NARG
ENDM
pair: MACRO
  put \@_x, \2
ENDM
SECTION "s", ROM0
  put 1, 2
  put 3, 4
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[1, 2, 2, 3, 4, 2]);
        assert!(object.patches.is_empty());
    }

    #[test]
    fn shift_and_unique_labels() {
        let object = assemble(
            r#"
MACRO skip
  SHIFT
  db \1
.loop\@:
ENDM
SECTION "s", ROM0
Main:
  skip 9, 8
  skip 7, 6
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[8, 6]);
        assert!(object.symbols.contains_key("Main.loop_1"));
        assert!(object.symbols.contains_key("Main.loop_2"));
    }

    #[test]
    fn macro_errors() {
        let object = assemble("  missing 1\n  SHIFT\n");
        assert_eq!(
            messages(&object),
            [
                "macro `missing` is not defined",
                "`SHIFT` used outside of a macro"
            ]
        );
    }

    #[test]
    fn runaway_recursion_hits_the_depth_cap() {
        let mut config = Config::default();
        config.max_depth = 4;
        let mut asm = Assembler::new(config, Box::new(MemoryFiles::new()));
        asm.assemble_source("main.asm", "MACRO again\n  again\nENDM\n  again\n");
        let object = asm.finish();
        assert_eq!(messages(&object), ["expansion depth of 4 exceeded"]);
    }

    #[test]
    fn labels_and_sizes() {
        let object = assemble(
            r#"
SECTION "s", ROM0
Start::
  db 1, 2
.inner
  db 3
End:
  db End - Start
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[1, 2, 3, 3]);
        assert_eq!(
            object.symbols["Start"].kind,
            crate::state::SymbolKind::Exported
        );
        assert_eq!(object.symbols["Start.inner"].value, 2);
    }

    #[test]
    fn label_errors() {
        let object = assemble(
            r#"
Orphan:
SECTION "s", ROM0
.local:
Twice:
Twice:
"#,
        );
        assert_eq!(
            messages(&object),
            [
                "labels must be placed within sections",
                "local label `.local` is outside of a global label",
                "`Twice` is already defined"
            ]
        );
    }

    #[test]
    fn sections_validate_layout() {
        let object = assemble(
            r#"
SECTION "a", ROMX[$4000], BANK[2], ALIGN[8]
SECTION "a", ROMX[$4000], BANK[3]
SECTION "b", ROM0[$8000]
SECTION "c", WRAM0, BANK[1]
SECTION "d", NOWHERE
"#,
        );
        assert_eq!(
            messages(&object),
            [
                "section `a` is redeclared with different attributes",
                "address $8000 is outside of ROM0",
                "WRAM0 is not banked",
                "unknown memory region `NOWHERE`"
            ]
        );
        let a = &object.sections["a"];
        assert_eq!(
            (a.region, a.fixed_address, a.bank, a.alignment),
            (Region::Romx, Some(0x4000), Some(2), Some(8))
        );
    }

    #[test]
    fn sections_reopen_and_push() {
        let object = assemble(
            r#"
SECTION "a", ROM0
  db 1
SECTION "b", ROM0
  db 2
PUSHS
SECTION "a", ROM0
  db 3
POPS
  db 4
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "a"), &[1, 3]);
        assert_eq!(bytes(&object, "b"), &[2, 4]);
    }

    #[test]
    fn includes_share_definitions() {
        let files = MemoryFiles::new()
            .with("hw.inc", "rLCDC EQU $FF40\nMACRO twice\n  db \\1, \\1\nENDM\n")
            .with("logo.bin", vec![1u8, 2, 3, 4, 5]);
        let object = assemble_with(
            files,
            r#"
INCLUDE "hw.inc"
SECTION "s", ROM0
  twice LOW(rLCDC)
  INCBIN "logo.bin", 1, 3
  INCBIN "logo.bin", 4
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[0x40, 0x40, 2, 3, 4, 5]);
    }

    #[test]
    fn same_named_includes_stay_distinct() {
        let files = MemoryFiles::new()
            .with("a/main.inc", "INCLUDE \"x.inc\"\n")
            .with("a/x.inc", "MACRO fa\n  db 1\nENDM\n")
            .with("b/main.inc", "INCLUDE \"x.inc\"\n")
            .with("b/x.inc", "MACRO fb\n  db 2\nENDM\n");
        let object = assemble_with(
            files,
            r#"
INCLUDE "a/main.inc"
INCLUDE "b/main.inc"
SECTION "s", ROM0
  fa
  fb
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[1, 2]);
    }

    #[test]
    fn nested_includes_search_beside_their_parent() {
        let files = MemoryFiles::new()
            .with(
                "src/main.asm",
                "SECTION \"s\", ROM0\nINCLUDE \"inc/a.inc\"\n",
            )
            .with("src/inc/a.inc", "INCLUDE \"b.inc\"\n")
            .with("src/inc/b.inc", "Here:\n  db 7\n");
        let mut asm = Assembler::new(Config::default(), Box::new(files));
        asm.assemble("src/main.asm").unwrap();
        let object = asm.finish();
        assert!(!object.has_errors(), "{:?}", messages(&object));
        assert_eq!(bytes(&object, "s"), &[7]);
        assert_eq!(object.symbols["Here"].file, "src/inc/b.inc");
    }

    #[test]
    fn missing_files_fail_only_their_line() {
        let object = assemble(
            r#"
INCLUDE "nope.inc"
SECTION "s", ROM0
  INCBIN "nope.bin"
  db 1
"#,
        );
        assert_eq!(
            messages(&object),
            ["cant find file `nope.inc`", "cant find file `nope.bin`"]
        );
        assert_eq!(bytes(&object, "s"), &[1]);
    }

    #[test]
    fn exports_apply_before_and_after_definition() {
        let object = assemble(
            r#"
EXPORT Later
SECTION "s", ROM0
Early:
EXPORT Early
Later:
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        use crate::state::SymbolKind;
        assert_eq!(object.symbols["Early"].kind, SymbolKind::Exported);
        assert_eq!(object.symbols["Later"].kind, SymbolKind::Exported);
    }

    #[test]
    fn purge_removes_symbols() {
        let object = assemble(
            r#"
TEMP EQU 1
PURGE TEMP
TEMP EQU 2
PURGE nothing
"#,
        );
        assert_eq!(messages(&object), ["`nothing` is not defined"]);
    }

    #[test]
    fn options_push_and_pop() {
        let object = assemble(
            r#"
SECTION "s", ROM0
  halt
PUSHO h, b.X
  halt
  db %.X.X
POPO
  halt
POPO
"#,
        );
        assert_eq!(messages(&object), ["`POPO` without `PUSHO`"]);
        assert_eq!(bytes(&object, "s"), &[0x76, 0x00, 0x76, 0x05, 0x76, 0x00]);
    }

    #[test]
    fn prints_and_user_diagnostics() {
        let object = assemble(
            r#"
PRINTT "hi "
PRINTV 255
PRINTT " "
PRINTI -3
PRINTT " "
PRINTF 1.5
WARN "careful"
FAIL "stop"
"#,
        );
        assert_eq!(object.printed, "hi $FF -3 1.50000");
        assert_eq!(object.diagnostics.len(), 2);
        assert_eq!(object.diagnostics[0].severity, Severity::Warn);
        assert_eq!(object.diagnostics[1].message, "stop");
        assert!(object.has_errors());
    }

    #[test]
    fn reseed_makes_random_functions_repeatable() {
        let object = assemble(
            r#"
SECTION "s", ROM0
RESEED 99
  db RANDBYTE()
RESEED 99
  db RANDBYTE()
"#,
        );
        assert!(!object.has_errors(), "{:?}", messages(&object));
        let data = bytes(&object, "s");
        assert_eq!(data[0], data[1]);
    }

    #[test]
    fn compatibility_mode_gates_extensions_per_file() {
        let mut config = Config::default();
        config.compatibility = true;
        let files = MemoryFiles::new().with("ext.inc", "#EXTENSIONS\nX EQU __MACRO_COUNTER__\n");
        let mut asm = Assembler::new(config, Box::new(files));
        asm.assemble_source(
            "main.asm",
            r#"
INCLUDE "ext.inc"
Y EQU __MACRO_COUNTER__
"#,
        );
        let object = asm.finish();
        assert_eq!(
            messages(&object),
            ["`__MACRO_COUNTER__` is not defined"]
        );
    }
}
