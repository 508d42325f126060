//! Line pipeline: lex, skip or parse, evaluate. Macro calls, `REPT` replays and includes
//! re-enter the pipeline over other line ranges.

use std::{collections::HashMap, io, mem, ops::Range, rc::Rc};

use crate::{
    config::Config,
    diag::{DiagnosticSource, Severity},
    expr::Eval,
    files::FileProvider,
    lexer::Lexer,
    node::{Node, NodeKind},
    object::Object,
    parser::{parse_line, skipped_line},
    rng::{RandomSource, XorShift32},
    state::{AssemblerState, Label, MacroCall, NumberEquate},
    token::{Token, TokenKind},
};

pub struct Assembler {
    pub state: AssemblerState,
    pub(crate) lexer: Lexer,
    pub(crate) files: Box<dyn FileProvider>,
    pub(crate) rng: Box<dyn RandomSource>,
    pub(crate) config: Config,
    /// Lines of every file read so far; macro and `REPT` bodies replay from here.
    pub(crate) sources: HashMap<String, Rc<Vec<String>>>,
    pub(crate) depth: usize,
}

impl Assembler {
    pub fn new(config: Config, files: Box<dyn FileProvider>) -> Self {
        let mut state = AssemblerState::new(config.options(), !config.compatibility);
        state.file = "__DEFINES__".to_string();
        for (name, value) in &config.define {
            state.number_equates.insert(
                name.clone(),
                NumberEquate {
                    id: name.clone(),
                    file: state.file.clone(),
                    line: 0,
                    value: *value,
                },
            );
        }
        Self {
            state,
            lexer: Lexer::new(config.max_substitutions),
            files,
            rng: Box::new(XorShift32::new(config.seed)),
            sources: HashMap::new(),
            depth: 0,
            config,
        }
    }

    /// Replaces the default random source, for embedders that need their own sequence.
    pub fn with_rng(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub(crate) fn eval(&mut self) -> Eval<'_> {
        Eval::new(
            &mut self.state,
            self.rng.as_mut(),
            self.config.max_substitutions,
        )
    }

    pub(crate) fn error(&mut self, message: impl Into<String>, token: &Token) {
        self.state
            .error(DiagnosticSource::Evaluator, message, token);
    }

    /// Assembles the root file at `path`, read through the file provider.
    pub fn assemble(&mut self, path: &str) -> io::Result<()> {
        let (name, bytes) = self.files.retrieve(path, "", false).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("cant open file: {path}"))
        })?;
        self.load(&name, &bytes);
        self.run_file(&name);
        Ok(())
    }

    /// Assembles `text` as if it were the file `name`.
    pub fn assemble_source(&mut self, name: &str, text: &str) {
        self.load(name, text.as_bytes());
        self.run_file(name);
    }

    pub(crate) fn load(&mut self, name: &str, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let lines = text.lines().map(str::to_string).collect();
        self.sources.insert(name.to_string(), Rc::new(lines));
    }

    /// Runs a whole file with the extension gate reset to the configured default.
    pub(crate) fn run_file(&mut self, name: &str) {
        tracing::debug!("entering {name}");
        let extensions = self.state.extensions;
        self.state.extensions = !self.config.compatibility;
        let len = self.sources.get(name).map_or(0, |lines| lines.len());
        self.run_lines(name, 0..len);
        self.state.extensions = extensions;
    }

    /// Runs the zero-based line `range` of an already loaded file.
    pub(crate) fn run_lines(&mut self, file: &str, range: Range<usize>) {
        let Some(lines) = self.sources.get(file).cloned() else {
            let tok = Token::new(TokenKind::StartOfLine, "", self.state.line, 0);
            self.error(format!("source of `{file}` is not available"), &tok);
            return;
        };
        let saved_file = mem::replace(&mut self.state.file, file.to_string());
        let saved_line = self.state.line;
        for index in range {
            let Some(text) = lines.get(index) else {
                break;
            };
            // nested expansions move `file`, so reset it for every line
            if self.state.file != file {
                self.state.file = file.to_string();
            }
            self.assemble_line(index + 1, text);
        }
        self.state.file = saved_file;
        self.state.line = saved_line;
    }

    /// Pushes one line through the whole pipeline.
    pub fn assemble_line(&mut self, line: usize, text: &str) {
        self.state.line = line;
        tracing::trace!("{}:{line}: {text}", self.state.file);
        let raw = self.lexer.tokenize(&mut self.state, text, line, false);
        let node = match skipped_line(&self.state, &raw) {
            Some(node) => node,
            None => {
                let tokens = self.lexer.tokenize(&mut self.state, text, line, true);
                parse_line(&mut self.state, &tokens)
            }
        };
        self.evaluate_line(&node);
    }

    pub fn evaluate_line(&mut self, node: &Node) {
        if node.kind != NodeKind::Line {
            return;
        }
        let label = node.label();
        let Some(op) = node.operation() else {
            if let Some(label) = label {
                self.define_label(label);
            }
            return;
        };
        match op.kind {
            NodeKind::Directive => self.directive(op),
            NodeKind::UnaryOperator => self.reassign(label, op),
            NodeKind::Keyword => self.keyword(label, op),
            NodeKind::Opcode => {
                if self.state.section().is_none() {
                    self.error("instructions must be placed within sections", &op.token);
                    return;
                }
                if let Some(label) = label {
                    self.define_label(label);
                }
                let bytes = self.eval().encode_instruction(op);
                if let Some(bytes) = bytes {
                    self.state.emit(&bytes);
                }
            }
            NodeKind::MacroCall => {
                if let Some(label) = label {
                    self.define_label(label);
                }
                self.call_macro(op);
            }
            _ => {}
        }
    }

    fn directive(&mut self, op: &Node) {
        match op.text().to_ascii_uppercase().as_str() {
            "#EXTENSIONS" => self.state.extensions = true,
            "#RGBDS" => self.state.extensions = false,
            _ => self.error(format!("unknown directive `{}`", op.text()), &op.token),
        }
    }

    /// Defines a code label at the current location.
    pub(crate) fn define_label(&mut self, label: &Node) {
        let name = label.text();
        if self.state.section().is_none() {
            self.error("labels must be placed within sections", &label.token);
            return;
        }
        let Some(id) = self.state.qualify(name) else {
            self.error(
                format!("local label `{name}` is outside of a global label"),
                &label.token,
            );
            return;
        };
        if self.state.labels.contains_key(&id) || self.state.is_defined(&id) {
            self.error(format!("`{id}` is already defined"), &label.token);
            return;
        }
        self.state.close_label();
        let exported = label.is_exported_label() | self.state.pending_exports.shift_remove(&id);
        let section = self.state.section_name().unwrap_or_default().to_string();
        let byte_offset = self.state.byte_offset().unwrap_or(0);
        self.state.labels.insert(
            id.clone(),
            Label {
                id: id.clone(),
                file: self.state.file.clone(),
                start_line: self.state.line,
                end_line: self.state.line,
                section,
                byte_offset,
                byte_size: 0,
                exported,
            },
        );
        if !name.contains('.') {
            self.state.in_global_label = Some(id.clone());
        }
        self.state.in_label = Some(id);
    }

    pub(crate) fn call_macro(&mut self, op: &Node) {
        let name = op.text();
        let Some(mac) = self.state.macros.get(name).cloned() else {
            self.error(format!("macro `{name}` is not defined"), &op.token);
            return;
        };
        if self.depth >= self.config.max_depth {
            self.error(
                format!("expansion depth of {} exceeded", self.config.max_depth),
                &op.token,
            );
            return;
        }
        let args = op
            .children
            .iter()
            .map(|arg| arg.text().to_string())
            .collect();
        self.state.macro_counter += 1;
        self.state.unique_ids.push(self.state.macro_counter);
        self.state.in_macro_calls.push(MacroCall {
            id: mac.id.clone(),
            args,
            arg_offset: 0,
        });
        tracing::debug!("expanding macro {name}");
        self.depth += 1;
        self.run_lines(&mac.file, mac.start_line..mac.end_line.saturating_sub(1));
        self.depth -= 1;
        self.state.in_macro_calls.pop();
        self.state.unique_ids.pop();
    }

    /// Closes out assembly, reporting unterminated blocks, and hands back the object.
    pub fn finish(mut self) -> Object {
        let unterminated = [
            (!self.state.in_conditionals.is_empty(), "IF"),
            (!self.state.in_macro_defines.is_empty(), "MACRO"),
            (!self.state.in_repeats.is_empty(), "REPT"),
            (!self.state.in_unions.is_empty(), "UNION"),
        ];
        for (open, block) in unterminated {
            if open {
                self.state.diagnose(
                    DiagnosticSource::Evaluator,
                    Severity::Error,
                    format!("unterminated {block} block"),
                    None,
                );
            }
        }
        for name in mem::take(&mut self.state.pending_exports) {
            self.state.diagnose(
                DiagnosticSource::Evaluator,
                Severity::Warn,
                format!("exported symbol `{name}` is never defined"),
                None,
            );
        }
        self.state.close_label();
        self.state.sync_symbols();
        Object {
            sections: mem::take(&mut self.state.sections),
            symbols: mem::take(&mut self.state.symbols),
            patches: mem::take(&mut self.state.patches),
            diagnostics: mem::take(&mut self.state.diagnostics),
            printed: mem::take(&mut self.state.printed),
        }
    }
}
