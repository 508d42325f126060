//! Rule-driven line lexer.
//!
//! Every unconsumed offset is offered to each eligible rule and the longest match
//! wins, with earlier rules winning ties. A match may trigger a substitution
//! (string equates, macro arguments, `\@`, `{}` interpolation), in which case the
//! line text is spliced and lexed again from the start.

use crate::{
    diag::{DiagnosticSource, Severity},
    expr,
    keywords::Keyword,
    opcodes,
    state::AssemblerState,
    token::{Token, TokenKind},
};

pub type ScanFn = fn(&str, &ScanContext) -> usize;

#[derive(Clone, Copy)]
pub enum Matcher {
    Literal(&'static str),
    Scan(ScanFn),
    Delimited {
        start: &'static str,
        end: &'static str,
    },
}

#[derive(Clone, Copy)]
pub struct TokenRule {
    pub kind: TokenKind,
    pub matcher: Matcher,
    /// Never matched at the top level of a line.
    pub sub_only: bool,
    /// Delimited kinds this rule may appear inside of.
    pub parents: &'static [TokenKind],
}

/// What the matchers may know about their surroundings.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext {
    pub prev: Option<TokenKind>,
    pub extensions: bool,
    pub binary_digits: [char; 2],
    pub gfx_digits: [char; 4],
}

impl Default for ScanContext {
    fn default() -> Self {
        Self {
            prev: None,
            extensions: true,
            binary_digits: ['0', '1'],
            gfx_digits: ['0', '1', '2', '3'],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMatch {
    pub kind: TokenKind,
    pub start: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub kind: TokenKind,
    pub len: usize,
    /// Nested tokens, innermost first.
    pub subs: Vec<SubMatch>,
}

/// One lexing round either finishes or rewrites the line.
#[derive(Debug)]
pub enum Lexed {
    Final(Vec<Token>, Vec<(String, Token)>),
    Substituted(String),
}

pub struct Lexer {
    rules: Vec<TokenRule>,
    max_substitutions: usize,
}

const IN_STRING: &[TokenKind] = &[TokenKind::String];
const IN_TEXT: &[TokenKind] = &[TokenKind::String, TokenKind::Interpolation];
const IN_INTERPOLATION: &[TokenKind] = &[TokenKind::Interpolation];

pub fn default_rules() -> Vec<TokenRule> {
    let top = |kind, matcher| TokenRule {
        kind,
        matcher,
        sub_only: false,
        parents: &[],
    };
    vec![
        top(TokenKind::Space, Matcher::Scan(scan_space)),
        top(TokenKind::Comment, Matcher::Scan(scan_comment)),
        top(TokenKind::Directive, Matcher::Scan(scan_directive)),
        top(
            TokenKind::String,
            Matcher::Delimited {
                start: "\"",
                end: "\"",
            },
        ),
        TokenRule {
            kind: TokenKind::Interpolation,
            matcher: Matcher::Delimited {
                start: "{",
                end: "}",
            },
            sub_only: false,
            parents: IN_TEXT,
        },
        TokenRule {
            kind: TokenKind::Escape,
            matcher: Matcher::Scan(scan_escape),
            sub_only: true,
            parents: IN_STRING,
        },
        TokenRule {
            kind: TokenKind::MacroArgument,
            matcher: Matcher::Scan(scan_macro_argument),
            sub_only: false,
            parents: IN_TEXT,
        },
        TokenRule {
            kind: TokenKind::UniqueLabel,
            matcher: Matcher::Literal("\\@"),
            sub_only: false,
            parents: IN_TEXT,
        },
        TokenRule {
            kind: TokenKind::StringText,
            matcher: Matcher::Scan(scan_string_text),
            sub_only: true,
            parents: IN_STRING,
        },
        TokenRule {
            kind: TokenKind::InterpolationText,
            matcher: Matcher::Scan(scan_interpolation_text),
            sub_only: true,
            parents: IN_INTERPOLATION,
        },
        top(TokenKind::Number, Matcher::Scan(scan_number)),
        top(TokenKind::Keyword, Matcher::Scan(scan_keyword)),
        top(TokenKind::Opcode, Matcher::Scan(scan_opcode)),
        top(TokenKind::Identifier, Matcher::Scan(scan_identifier)),
        top(TokenKind::Operator, Matcher::Scan(scan_operator)),
        top(TokenKind::DoubleColon, Matcher::Literal("::")),
        top(TokenKind::Colon, Matcher::Literal(":")),
        top(TokenKind::Comma, Matcher::Literal(",")),
        top(TokenKind::OpenParen, Matcher::Literal("(")),
        top(TokenKind::CloseParen, Matcher::Literal(")")),
        top(TokenKind::OpenBracket, Matcher::Literal("[")),
        top(TokenKind::CloseBracket, Matcher::Literal("]")),
    ]
}

fn is_word_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    is_word_char(c) || b".#@".contains(&c)
}

fn word_len(rest: &str) -> usize {
    rest.bytes().take_while(|c| is_word_char(*c)).count()
}

fn scan_space(rest: &str, _: &ScanContext) -> usize {
    rest.bytes().take_while(|c| b" \t\r".contains(c)).count()
}

fn scan_comment(rest: &str, _: &ScanContext) -> usize {
    if rest.starts_with(';') {
        rest.len()
    } else {
        0
    }
}

fn scan_directive(rest: &str, _: &ScanContext) -> usize {
    match rest.strip_prefix('#') {
        Some(word) if word_len(word) > 0 => 1 + word_len(word),
        _ => 0,
    }
}

fn scan_escape(rest: &str, _: &ScanContext) -> usize {
    let bytes = rest.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'\\' && b"\\\"',{}ntr0".contains(&bytes[1]) {
        2
    } else {
        0
    }
}

fn scan_macro_argument(rest: &str, _: &ScanContext) -> usize {
    let bytes = rest.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'\\' && (b"123456789#".contains(&bytes[1])) {
        2
    } else {
        0
    }
}

fn scan_string_text(rest: &str, _: &ScanContext) -> usize {
    rest.char_indices()
        .find(|(_, c)| matches!(c, '\\' | '"' | '{'))
        .map(|(i, _)| i)
        .unwrap_or(rest.len())
}

fn scan_interpolation_text(rest: &str, _: &ScanContext) -> usize {
    rest.char_indices()
        .find(|(_, c)| matches!(c, '\\' | '{' | '}'))
        .map(|(i, _)| i)
        .unwrap_or(rest.len())
}

fn count_digits(rest: &str, digits: &[char]) -> usize {
    rest.chars()
        .take_while(|c| *c == '_' || digits.contains(c))
        .map(char::len_utf8)
        .sum()
}

fn scan_number(rest: &str, ctx: &ScanContext) -> usize {
    const HEX: &[char] = &[
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'A', 'B',
        'C', 'D', 'E', 'F',
    ];
    const OCT: &[char] = &['0', '1', '2', '3', '4', '5', '6', '7'];
    const DEC: &[char] = &['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
    let after_value = ctx.prev.is_some_and(TokenKind::ends_value);
    let Some(first) = rest.chars().next() else {
        return 0;
    };
    let prefixed = |digits: &[char]| match count_digits(&rest[1..], digits) {
        0 => 0,
        n => 1 + n,
    };
    match first {
        '$' => prefixed(HEX),
        '%' if !after_value => prefixed(&ctx.binary_digits[..]),
        '&' if !after_value => prefixed(OCT),
        '`' => prefixed(&ctx.gfx_digits[..]),
        c if c.is_ascii_digit() => {
            let int = count_digits(rest, DEC);
            let frac = rest[int..]
                .strip_prefix('.')
                .map(|tail| count_digits(tail, DEC))
                .unwrap_or(0);
            if frac > 0 {
                int + 1 + frac
            } else {
                int
            }
        }
        _ => 0,
    }
}

fn scan_keyword(rest: &str, ctx: &ScanContext) -> usize {
    let len = word_len(rest);
    match Keyword::parse(&rest[..len]) {
        Some(keyword) if ctx.extensions || !keyword.is_extension() => len,
        _ => 0,
    }
}

fn scan_opcode(rest: &str, _: &ScanContext) -> usize {
    let len = word_len(rest);
    if len > 0 && opcodes::is_mnemonic(&rest[..len]) {
        len
    } else {
        0
    }
}

fn scan_identifier(rest: &str, _: &ScanContext) -> usize {
    let bytes = rest.as_bytes();
    match bytes.first() {
        Some(b'@') if !bytes.get(1).copied().is_some_and(is_ident_char) => return 1,
        Some(c) if c.is_ascii_alphabetic() || b"_.".contains(c) => {}
        _ => return 0,
    }
    let len = bytes.iter().take_while(|c| is_ident_char(**c)).count();
    // `[hl+]` and `[hl-]` spell a register, not an expression
    if rest[..len].eq_ignore_ascii_case("hl") && matches!(bytes.get(len), Some(b'+' | b'-')) {
        let tail = rest[len + 1..].trim_start();
        if tail.starts_with(']') {
            return len + 1;
        }
    }
    len
}

fn scan_operator(rest: &str, _: &ScanContext) -> usize {
    const DIGRAPHS: &[&str] = &["<<", ">>", "<=", ">=", "==", "!=", "&&", "||"];
    if DIGRAPHS.iter().any(|op| rest.starts_with(op)) {
        return 2;
    }
    match rest.bytes().next() {
        Some(c) if b"+-*/%&|^~!<>=".contains(&c) => 1,
        _ => 0,
    }
}

impl Lexer {
    pub fn new(max_substitutions: usize) -> Self {
        Self::with_rules(default_rules(), max_substitutions)
    }

    pub fn with_rules(rules: Vec<TokenRule>, max_substitutions: usize) -> Self {
        Self {
            rules,
            max_substitutions,
        }
    }

    /// Longest match at `offset`, optionally restricted to the rules allowed inside `inside`.
    pub fn scan(
        &self,
        text: &str,
        offset: usize,
        inside: Option<TokenKind>,
        ctx: &ScanContext,
    ) -> Option<Match> {
        let rest = &text[offset..];
        let mut best: Option<Match> = None;
        for rule in &self.rules {
            let eligible = match inside {
                None => !rule.sub_only,
                Some(parent) => rule.parents.contains(&parent),
            };
            if !eligible {
                continue;
            }
            let found = match rule.matcher {
                Matcher::Literal(lit) => rest.starts_with(lit).then(|| Match {
                    kind: rule.kind,
                    len: lit.len(),
                    subs: Vec::new(),
                }),
                Matcher::Scan(scan) => match scan(rest, ctx) {
                    0 => None,
                    len => Some(Match {
                        kind: rule.kind,
                        len,
                        subs: Vec::new(),
                    }),
                },
                Matcher::Delimited { start, end } => {
                    self.scan_delimited(text, offset, rule.kind, start, end, ctx)
                }
            };
            if let Some(found) = found {
                if best.as_ref().map_or(true, |best| found.len > best.len) {
                    best = Some(found);
                }
            }
        }
        best
    }

    fn scan_delimited(
        &self,
        text: &str,
        offset: usize,
        kind: TokenKind,
        start: &str,
        end: &str,
        ctx: &ScanContext,
    ) -> Option<Match> {
        if !text[offset..].starts_with(start) {
            return None;
        }
        let mut pos = offset + start.len();
        let mut subs = Vec::new();
        loop {
            let rest = &text[pos..];
            if rest.is_empty() {
                return None;
            }
            if rest.starts_with(end) {
                return Some(Match {
                    kind,
                    len: pos + end.len() - offset,
                    subs,
                });
            }
            match self.scan(text, pos, Some(kind), ctx) {
                Some(inner) => {
                    let len = inner.len;
                    subs.extend(inner.subs);
                    subs.push(SubMatch {
                        kind: inner.kind,
                        start: pos,
                        len,
                    });
                    pos += len;
                }
                None => pos += rest.chars().next().map_or(1, char::len_utf8),
            }
        }
    }

    /// Tokenizes one line, applying substitutions until the text is stable.
    pub fn tokenize(
        &self,
        state: &mut AssemblerState,
        text: &str,
        line: usize,
        substitute: bool,
    ) -> Vec<Token> {
        let mut text = text.to_string();
        let mut rounds = 0;
        loop {
            let substitute = substitute && rounds < self.max_substitutions;
            match self.lex(state, &text, line, substitute) {
                Lexed::Final(tokens, errors) => {
                    for (message, token) in errors {
                        state.error(DiagnosticSource::Lexer, message, &token);
                    }
                    return tokens;
                }
                Lexed::Substituted(next) => {
                    rounds += 1;
                    if rounds == self.max_substitutions {
                        let tok = Token::new(TokenKind::StartOfLine, "", line, 0);
                        state.diagnose(
                            DiagnosticSource::Lexer,
                            Severity::Error,
                            format!("substitution limit of {rounds} reached"),
                            Some(&tok),
                        );
                    }
                    tracing::trace!("re-lexing `{next}`");
                    text = next;
                }
            }
        }
    }

    /// A single left-to-right pass over `text`.
    pub fn lex(&self, state: &AssemblerState, text: &str, line: usize, substitute: bool) -> Lexed {
        let options = state.options();
        let mut ctx = ScanContext {
            prev: None,
            extensions: state.extensions,
            binary_digits: options.binary_digits,
            gfx_digits: options.gfx_digits,
        };
        let mut tokens = vec![Token::new(TokenKind::StartOfLine, "", line, 0)];
        let mut errors = Vec::new();
        let mut offset = 0;
        while offset < text.len() {
            let found = self.scan(text, offset, None, &ctx).unwrap_or_else(|| Match {
                kind: TokenKind::Unknown,
                len: text[offset..].chars().next().map_or(1, char::len_utf8),
                subs: Vec::new(),
            });
            if substitute {
                let candidates = found.subs.iter().cloned().chain([SubMatch {
                    kind: found.kind,
                    start: offset,
                    len: found.len,
                }]);
                for sub in candidates {
                    let range = sub.start..(sub.start + sub.len);
                    match substitution(state, sub.kind, &text[range.clone()], &tokens) {
                        Some(Ok(replacement)) => {
                            let mut next = String::with_capacity(text.len() + replacement.len());
                            next.push_str(&text[..range.start]);
                            next.push_str(&replacement);
                            next.push_str(&text[range.end..]);
                            return Lexed::Substituted(next);
                        }
                        Some(Err(message)) => errors.push((
                            message,
                            Token::new(sub.kind, &text[range.clone()], line, range.start),
                        )),
                        None => {}
                    }
                }
            }
            let token = Token::new(found.kind, &text[offset..offset + found.len], line, offset);
            if !found.kind.is_trivia() && found.kind != TokenKind::Comment {
                ctx.prev = Some(found.kind);
            }
            tokens.push(token);
            offset += found.len;
        }
        tokens.push(Token::new(TokenKind::EndOfLine, "", line, text.len()));
        classify(&mut tokens);
        tokens.sort_by_key(|tok| (tok.column, tok.kind));
        Lexed::Final(tokens, errors)
    }
}

/// Words whose line defines the identifier in front of them.
fn defines_label(tok: &Token) -> bool {
    match tok.kind {
        TokenKind::Keyword => matches!(
            Keyword::parse(&tok.text),
            Some(
                Keyword::Equ
                    | Keyword::Equs
                    | Keyword::Set
                    | Keyword::Rb
                    | Keyword::Rw
                    | Keyword::Rl
                    | Keyword::Macro
            )
        ),
        TokenKind::Operator => tok.text == "=",
        _ => false,
    }
}

/// Reclassifies identifiers in the label and operation slots.
fn classify(tokens: &mut [Token]) {
    let significant: Vec<usize> = (0..tokens.len())
        .filter(|i| {
            let kind = tokens[*i].kind;
            !kind.is_trivia()
                && !matches!(
                    kind,
                    TokenKind::Comment | TokenKind::StartOfLine | TokenKind::EndOfLine
                )
        })
        .collect();
    let Some(&first) = significant.first() else {
        return;
    };
    if tokens[first].kind != TokenKind::Identifier {
        return;
    }
    let indented = tokens[first].column > 0;
    let next = significant.get(1).map(|i| tokens[*i].clone());
    let colon = next
        .as_ref()
        .is_some_and(|tok| matches!(tok.kind, TokenKind::Colon | TokenKind::DoubleColon));
    if colon || !indented || next.as_ref().is_some_and(defines_label) {
        tokens[first].kind = TokenKind::Label;
        if colon {
            if let Some(&op) = significant.get(2) {
                if tokens[op].kind == TokenKind::Identifier {
                    tokens[op].kind = TokenKind::MacroCall;
                }
            }
        }
    } else {
        tokens[first].kind = TokenKind::MacroCall;
    }
}

/// `DEF(name)` and `PURGE name` must see the symbol name, not its expansion.
fn protects_identifier(tokens: &[Token]) -> bool {
    let significant: Vec<&Token> = tokens
        .iter()
        .filter(|tok| !tok.kind.is_trivia() && tok.kind != TokenKind::StartOfLine)
        .collect();
    if significant
        .iter()
        .any(|tok| tok.kind == TokenKind::Keyword && tok.is_word("PURGE"))
    {
        return true;
    }
    matches!(
        significant.as_slice(),
        [.., def, paren] if def.is_word("DEF") && paren.kind == TokenKind::OpenParen
    )
}

fn substitution(
    state: &AssemblerState,
    kind: TokenKind,
    text: &str,
    tokens: &[Token],
) -> Option<Result<String, String>> {
    match kind {
        TokenKind::Identifier => {
            let equate = state.string_equates.get(text)?;
            if protects_identifier(tokens) {
                return None;
            }
            Some(Ok(equate.value.clone()))
        }
        TokenKind::MacroArgument => {
            let Some(call) = state.macro_call() else {
                return Some(Err(format!("`{text}` used outside of a macro")));
            };
            if text == "\\#" {
                return Some(Ok(call.remaining().join(",")));
            }
            let index = text[1..].parse::<usize>().unwrap_or(0);
            Some(
                call.arg(index)
                    .map(str::to_string)
                    .ok_or_else(|| format!("macro argument `{text}` is not defined")),
            )
        }
        TokenKind::UniqueLabel => Some(
            state
                .unique_ids
                .last()
                .map(|id| format!("_{id}"))
                .ok_or_else(|| "`\\@` used outside of a macro or REPT block".to_string()),
        ),
        TokenKind::Interpolation => {
            let inner = &text[1..text.len() - 1];
            Some(expr::interpolate(state, inner))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MacroCall, Options, StringEquate};

    fn kinds(tokens: &[Token]) -> Vec<(TokenKind, &str)> {
        tokens
            .iter()
            .filter(|tok| !matches!(tok.kind, TokenKind::Space))
            .map(|tok| (tok.kind, tok.text.as_str()))
            .collect()
    }

    fn lex(state: &mut AssemblerState, text: &str) -> Vec<Token> {
        Lexer::new(64).tokenize(state, text, 1, true)
    }

    #[test]
    fn brackets_line_with_sentinels() {
        let mut state = AssemblerState::new(Options::default(), true);
        let tokens = lex(&mut state, "  nop");
        assert_eq!(tokens.first().unwrap().kind, TokenKind::StartOfLine);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::EndOfLine);
        assert_eq!(tokens.last().unwrap().column, 5);
    }

    #[test]
    fn lexes_radix_literals() {
        let mut state = AssemblerState::new(Options::default(), true);
        let tokens = lex(&mut state, "  db $2A, %101010, &52, 42, 1.5, `0123");
        let numbers: Vec<&str> = tokens
            .iter()
            .filter(|tok| tok.kind == TokenKind::Number)
            .map(|tok| tok.text.as_str())
            .collect();
        assert_eq!(numbers, vec!["$2A", "%101010", "&52", "42", "1.5", "`0123"]);
    }

    #[test]
    fn percent_after_value_is_modulo() {
        let mut state = AssemblerState::new(Options::default(), true);
        let tokens = lex(&mut state, "  db x %10");
        assert_eq!(
            kinds(&tokens)[2..5],
            [
                (TokenKind::Identifier, "x"),
                (TokenKind::Operator, "%"),
                (TokenKind::Number, "10"),
            ]
        );
    }

    #[test]
    fn longest_match_prefers_identifiers_over_keyword_prefixes() {
        let mut state = AssemblerState::new(Options::default(), true);
        let tokens = lex(&mut state, "  db dbx, equs");
        assert_eq!(
            kinds(&tokens)[1..5],
            [
                (TokenKind::Keyword, "db"),
                (TokenKind::Identifier, "dbx"),
                (TokenKind::Comma, ","),
                (TokenKind::Keyword, "equs"),
            ]
        );
    }

    #[test]
    fn classifies_labels_and_macro_calls() {
        let mut state = AssemblerState::new(Options::default(), true);
        let tokens = lex(&mut state, "Start: my_macro 1, 2");
        assert_eq!(tokens[1].kind, TokenKind::Label);
        assert_eq!(kinds(&tokens)[3], (TokenKind::MacroCall, "my_macro"));

        let tokens = lex(&mut state, "    my_macro");
        assert_eq!(kinds(&tokens)[1], (TokenKind::MacroCall, "my_macro"));

        let tokens = lex(&mut state, "    count EQU 3");
        assert_eq!(kinds(&tokens)[1], (TokenKind::Label, "count"));
    }

    #[test]
    fn unmatched_characters_degrade_to_unknown() {
        let mut state = AssemblerState::new(Options::default(), true);
        let tokens = lex(&mut state, "  ld a, ?");
        assert!(tokens
            .iter()
            .any(|tok| tok.kind == TokenKind::Unknown && tok.text == "?"));
        assert!(state.diagnostics.is_empty());
    }

    #[test]
    fn string_equates_substitute_and_restart() {
        let mut state = AssemblerState::new(Options::default(), true);
        state.string_equates.insert(
            "greeting".to_string(),
            StringEquate {
                id: "greeting".to_string(),
                file: "a.asm".to_string(),
                line: 1,
                value: "\"hi\", 0".to_string(),
            },
        );
        let tokens = lex(&mut state, "  db greeting");
        assert_eq!(
            kinds(&tokens)[2..5],
            [
                (TokenKind::String, "\"hi\""),
                (TokenKind::Comma, ","),
                (TokenKind::Number, "0"),
            ]
        );
        // DEF() sees the name itself
        let tokens = lex(&mut state, "  IF DEF(greeting)");
        assert!(tokens
            .iter()
            .any(|tok| tok.kind == TokenKind::Identifier && tok.text == "greeting"));
    }

    #[test]
    fn macro_arguments_substitute_inside_strings() {
        let mut state = AssemblerState::new(Options::default(), true);
        state.in_macro_calls.push(MacroCall {
            id: "m".to_string(),
            args: vec!["one".to_string(), "two".to_string()],
            arg_offset: 1,
        });
        let tokens = lex(&mut state, "  db \"\\1!\"");
        assert!(tokens.iter().any(|tok| tok.text == "\"two!\""));
    }

    #[test]
    fn missing_substitution_targets_are_errors() {
        let mut state = AssemblerState::new(Options::default(), true);
        lex(&mut state, "  db \\1, {nothing}");
        assert_eq!(state.diagnostics.len(), 2);
        assert!(state.diagnostics.iter().all(|diag| diag.is_error()));
    }

    #[test]
    fn self_referencing_equates_hit_the_cap() {
        let mut state = AssemblerState::new(Options::default(), true);
        state.string_equates.insert(
            "loop".to_string(),
            StringEquate {
                id: "loop".to_string(),
                file: "a.asm".to_string(),
                line: 1,
                value: "loop loop".to_string(),
            },
        );
        Lexer::new(8).tokenize(&mut state, "  db loop", 1, true);
        assert!(state
            .diagnostics
            .iter()
            .any(|diag| diag.message.contains("substitution limit")));
    }

    #[test]
    fn bracketed_increment_registers() {
        let mut state = AssemblerState::new(Options::default(), true);
        let tokens = lex(&mut state, "  ld a, [hl+]");
        assert!(tokens
            .iter()
            .any(|tok| tok.kind == TokenKind::Identifier && tok.text == "hl+"));
        let tokens = lex(&mut state, "  ld a, hl+1");
        assert!(tokens.iter().any(|tok| tok.text == "hl"));
    }
}
