use std::{
    fmt::{self, Display, Formatter},
    ops::RangeInclusive,
};

use indexmap::{IndexMap, IndexSet};

use crate::{
    diag::{Diagnostic, DiagnosticSource, Severity},
    node::Node,
    token::Token,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Rom0,
    Romx,
    Vram,
    Sram,
    Wram0,
    Wramx,
    Oam,
    Hram,
}

impl Region {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ROM0" => Some(Self::Rom0),
            "ROMX" => Some(Self::Romx),
            "VRAM" => Some(Self::Vram),
            "SRAM" => Some(Self::Sram),
            "WRAM0" => Some(Self::Wram0),
            "WRAMX" => Some(Self::Wramx),
            "OAM" => Some(Self::Oam),
            "HRAM" => Some(Self::Hram),
            _ => None,
        }
    }

    pub fn addresses(self) -> RangeInclusive<u32> {
        match self {
            Self::Rom0 => 0x0000..=0x3FFF,
            Self::Romx => 0x4000..=0x7FFF,
            Self::Vram => 0x8000..=0x9FFF,
            Self::Sram => 0xA000..=0xBFFF,
            Self::Wram0 => 0xC000..=0xCFFF,
            Self::Wramx => 0xD000..=0xDFFF,
            Self::Oam => 0xFE00..=0xFE9F,
            Self::Hram => 0xFF80..=0xFFFE,
        }
    }

    /// Bank numbers a section in this region may request, `None` when unbanked.
    pub fn banks(self) -> Option<RangeInclusive<u32>> {
        match self {
            Self::Romx => Some(1..=511),
            Self::Vram => Some(0..=1),
            Self::Sram => Some(0..=15),
            Self::Wramx => Some(1..=7),
            _ => None,
        }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rom0 => "ROM0",
            Self::Romx => "ROMX",
            Self::Vram => "VRAM",
            Self::Sram => "SRAM",
            Self::Wram0 => "WRAM0",
            Self::Wramx => "WRAMX",
            Self::Oam => "OAM",
            Self::Hram => "HRAM",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: String,
    pub file: String,
    pub region: Region,
    pub fixed_address: Option<u16>,
    pub bank: Option<u32>,
    pub alignment: Option<u8>,
    pub bytes: Vec<u8>,
}

impl Section {
    /// Two declarations of one name agree when everything but the contents matches.
    pub fn same_layout(&self, other: &Section) -> bool {
        self.region == other.region
            && self.fixed_address == other.fixed_address
            && self.bank == other.bank
            && self.alignment == other.alignment
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub section: String,
    pub byte_offset: usize,
    pub byte_size: usize,
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberEquate {
    pub id: String,
    pub file: String,
    pub line: usize,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringEquate {
    pub id: String,
    pub file: String,
    pub line: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSymbol {
    pub id: String,
    pub file: String,
    pub lines: Vec<usize>,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub id: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conditional {
    pub condition: bool,
    /// Some arm of this block already ran (or the block is dead entirely).
    pub taken: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repeat {
    pub count: usize,
    pub line: usize,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefine {
    pub id: String,
    pub file: String,
    pub start_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroCall {
    pub id: String,
    pub args: Vec<String>,
    pub arg_offset: usize,
}

impl MacroCall {
    /// `\n` lookup, 1-based and relative to the current `SHIFT` offset.
    pub fn arg(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|index| self.args.get(index + self.arg_offset))
            .map(String::as_str)
    }

    pub fn remaining(&self) -> &[String] {
        self.args.get(self.arg_offset..).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Union {
    pub byte_offset: usize,
    pub byte_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub pad: u8,
    pub halt_nop: bool,
    pub optimize_ldh: bool,
    pub binary_digits: [char; 2],
    pub gfx_digits: [char; 4],
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pad: 0x00,
            halt_nop: true,
            optimize_ldh: false,
            binary_digits: ['0', '1'],
            gfx_digits: ['0', '1', '2', '3'],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Byte,
    Word,
    Long,
    Jr,
}

impl PatchKind {
    pub fn width(self) -> usize {
        match self {
            Self::Byte | Self::Jr => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub node: Node,
    pub file: String,
    pub line: usize,
    pub section: String,
    pub kind: PatchKind,
    pub byte_offset: usize,
    pub link_expr: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Exported,
    Imported,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: usize,
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub line: usize,
    pub section: Option<String>,
    pub value: i32,
}

/// Everything `PUSHS` saves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionScope {
    pub sections: Vec<String>,
    pub unions: Vec<Union>,
    pub global_label: Option<String>,
}

/// File-spanning assembler state, shared by every nested expansion.
///
/// Stacks keep their innermost scope at the end of the `Vec`.
#[derive(Debug, Default)]
pub struct AssemblerState {
    pub labels: IndexMap<String, Label>,
    pub number_equates: IndexMap<String, NumberEquate>,
    pub string_equates: IndexMap<String, StringEquate>,
    pub sets: IndexMap<String, SetSymbol>,
    pub macros: IndexMap<String, Macro>,
    pub sections: IndexMap<String, Section>,
    pub symbols: IndexMap<String, Symbol>,
    pub patches: Vec<Patch>,
    pub diagnostics: Vec<Diagnostic>,

    pub in_sections: Vec<String>,
    pub pushed_sections: Vec<SectionScope>,
    pub in_conditionals: Vec<Conditional>,
    pub in_repeats: Vec<Repeat>,
    pub in_macro_defines: Vec<MacroDefine>,
    pub in_macro_calls: Vec<MacroCall>,
    pub in_unions: Vec<Union>,
    pub options: Vec<Options>,

    pub rs_counter: i32,
    pub macro_counter: usize,
    pub unique_ids: Vec<usize>,
    pub charmaps: IndexMap<String, u8>,
    pub in_global_label: Option<String>,
    pub in_label: Option<String>,
    pub pending_exports: IndexSet<String>,

    pub extensions: bool,
    pub file: String,
    pub line: usize,
    pub printed: String,
}

impl AssemblerState {
    pub fn new(options: Options, extensions: bool) -> Self {
        Self {
            options: vec![options],
            extensions,
            ..Self::default()
        }
    }

    pub fn diagnose(
        &mut self,
        source: DiagnosticSource,
        severity: Severity,
        message: impl Into<String>,
        token: Option<&Token>,
    ) {
        let diagnostic = Diagnostic {
            source,
            message: message.into(),
            severity,
            token: token.cloned(),
            file: self.file.clone(),
            line: self.line,
        };
        tracing::trace!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, source: DiagnosticSource, message: impl Into<String>, token: &Token) {
        self.diagnose(source, Severity::Error, message, Some(token));
    }

    pub fn options(&self) -> Options {
        self.options.last().copied().unwrap_or_default()
    }

    pub fn options_mut(&mut self) -> &mut Options {
        if self.options.is_empty() {
            self.options.push(Options::default());
        }
        let last = self.options.len() - 1;
        &mut self.options[last]
    }

    pub fn section_name(&self) -> Option<&str> {
        self.in_sections.last().map(String::as_str)
    }

    pub fn section(&self) -> Option<&Section> {
        self.section_name()
            .and_then(|name| self.sections.get(name))
    }

    pub fn section_mut(&mut self) -> Option<&mut Section> {
        let name = self.in_sections.last()?;
        self.sections.get_mut(name)
    }

    pub fn byte_offset(&self) -> Option<usize> {
        self.section().map(|section| section.bytes.len())
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        if let Some(section) = self.section_mut() {
            section.bytes.extend_from_slice(bytes);
        }
    }

    /// Every conditional on the stack is currently true.
    pub fn conditions_true(&self) -> bool {
        self.in_conditionals.iter().all(|cond| cond.condition)
    }

    /// Every conditional except the innermost is true, so `ELIF` may still evaluate.
    pub fn outer_conditions_true(&self) -> bool {
        let len = self.in_conditionals.len();
        self.in_conditionals[..len.saturating_sub(1)]
            .iter()
            .all(|cond| cond.condition)
    }

    pub fn macro_call(&self) -> Option<&MacroCall> {
        self.in_macro_calls.last()
    }

    /// Expands `.local` into `Global.local` under the open global label.
    pub fn qualify(&self, name: &str) -> Option<String> {
        if let Some(local) = name.strip_prefix('.') {
            let global = self.in_global_label.as_ref()?;
            Some(format!("{global}.{local}"))
        } else {
            Some(name.to_string())
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.number_equates.contains_key(name)
            || self.string_equates.contains_key(name)
            || self.sets.contains_key(name)
            || self.macros.contains_key(name)
            || self
                .qualify(name)
                .is_some_and(|name| self.labels.contains_key(&name))
    }

    /// Back-fills the size of the most recently opened label.
    pub fn close_label(&mut self) {
        let Some(id) = self.in_label.take() else {
            return;
        };
        let line = self.line;
        let Some(label) = self.labels.get(&id) else {
            return;
        };
        let end = self
            .sections
            .get(&label.section)
            .map(|section| section.bytes.len())
            .unwrap_or(label.byte_offset);
        if let Some(label) = self.labels.get_mut(&id) {
            label.end_line = line;
            label.byte_size = end.saturating_sub(label.byte_offset);
        }
    }

    /// Symbol id used by link expressions; unknown names become imports.
    pub fn symbol_id(&mut self, name: &str) -> usize {
        if let Some(index) = self.symbols.get_index_of(name) {
            return index;
        }
        let id = self.symbols.len();
        let symbol = match self.labels.get(name) {
            Some(label) => Symbol {
                id,
                name: name.to_string(),
                kind: if label.exported {
                    SymbolKind::Exported
                } else {
                    SymbolKind::Local
                },
                file: label.file.clone(),
                line: label.start_line,
                section: Some(label.section.clone()),
                value: label.byte_offset as i32,
            },
            None => Symbol {
                id,
                name: name.to_string(),
                kind: SymbolKind::Imported,
                file: self.file.clone(),
                line: self.line,
                section: None,
                value: 0,
            },
        };
        self.symbols.insert(name.to_string(), symbol);
        id
    }

    /// Registers an anonymous location symbol, used for `@` inside link expressions.
    pub fn location_id(&mut self, section: &str, offset: usize) -> usize {
        let name = format!("@{section}:{offset}");
        if let Some(index) = self.symbols.get_index_of(&name) {
            return index;
        }
        let id = self.symbols.len();
        self.symbols.insert(
            name.clone(),
            Symbol {
                id,
                name,
                kind: SymbolKind::Local,
                file: self.file.clone(),
                line: self.line,
                section: Some(section.to_string()),
                value: offset as i32,
            },
        );
        id
    }

    /// Brings object symbols for labels up to date once assembly is over.
    pub fn sync_symbols(&mut self) {
        let ids: Vec<String> = self.labels.keys().cloned().collect();
        for id in ids {
            self.symbol_id(&id);
            let Some(label) = self.labels.get(&id) else {
                continue;
            };
            if let Some(symbol) = self.symbols.get_mut(&id) {
                symbol.kind = if label.exported {
                    SymbolKind::Exported
                } else {
                    SymbolKind::Local
                };
                symbol.file = label.file.clone();
                symbol.line = label.start_line;
                symbol.section = Some(label.section.clone());
                symbol.value = label.byte_offset as i32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    fn state_with_section() -> AssemblerState {
        let mut state = AssemblerState::new(Options::default(), true);
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

    #[test]
    fn qualifies_local_labels_under_global_scope() {
        let mut state = AssemblerState::default();
        assert_eq!(state.qualify(".loop"), None);
        state.in_global_label = Some("Main".to_string());
        assert_eq!(state.qualify(".loop").as_deref(), Some("Main.loop"));
        assert_eq!(state.qualify("Other").as_deref(), Some("Other"));
    }

    #[test]
    fn unknown_symbols_register_as_imports_with_stable_ids() {
        let mut state = state_with_section();
        let first = state.symbol_id("Far");
        let second = state.symbol_id("Away");
        assert_eq!((first, second), (0, 1));
        assert_eq!(state.symbol_id("Far"), 0);
        assert_eq!(state.symbols["Far"].kind, SymbolKind::Imported);
    }

    #[test]
    fn closing_a_label_back_fills_its_size() {
        let mut state = state_with_section();
        state.emit(&[1, 2]);
        state.labels.insert(
            "Start".to_string(),
            Label {
                id: "Start".to_string(),
                file: "test.asm".to_string(),
                start_line: 1,
                end_line: 1,
                section: "main".to_string(),
                byte_offset: 2,
                byte_size: 0,
                exported: false,
            },
        );
        state.in_label = Some("Start".to_string());
        state.emit(&[3, 4, 5]);
        state.line = 9;
        state.close_label();
        assert_eq!(state.labels["Start"].byte_size, 3);
        assert_eq!(state.labels["Start"].end_line, 9);
        assert!(state.in_label.is_none());
    }

    #[test]
    fn conditions_track_inner_and_outer_scopes() {
        let mut state = AssemblerState::default();
        assert!(state.conditions_true());
        state.in_conditionals.push(Conditional {
            condition: true,
            taken: true,
        });
        state.in_conditionals.push(Conditional {
            condition: false,
            taken: false,
        });
        assert!(!state.conditions_true());
        assert!(state.outer_conditions_true());
    }

    #[test]
    fn diagnostics_carry_position() {
        let mut state = AssemblerState::default();
        state.file = "a.asm".to_string();
        state.line = 4;
        let tok = Token::new(TokenKind::Identifier, "oops", 4, 2);
        state.error(DiagnosticSource::Evaluator, "bad", &tok);
        assert_eq!(state.diagnostics[0].to_string(), "a.asm:4:3: [Evaluator] bad");
    }
}
