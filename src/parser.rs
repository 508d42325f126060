//! Precedence-climbing parser producing one `Line` node per source line.

use crate::{
    diag::DiagnosticSource,
    node::{Node, NodeKind},
    state::AssemblerState,
    token::{Token, TokenKind},
};

/// Binding power of the unary prefix operators.
const UNARY: u8 = 8;
/// Binding power of call and index application.
const POSTFIX: u8 = 9;

fn binary_precedence(op: &str) -> u8 {
    match op {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" | "<" | ">" | "<=" | ">=" => 3,
        "+" | "-" => 4,
        "&" | "|" | "^" => 5,
        "<<" | ">>" => 6,
        "*" | "/" | "%" => 7,
        _ => 0,
    }
}

/// Keywords whose arguments are option strings rather than expressions.
fn takes_raw_arguments(keyword: &Token) -> bool {
    ["OPT", "PUSHO"].iter().any(|word| keyword.is_word(word))
}

fn find_keyword<'t>(tokens: &'t [Token], words: &[&str]) -> Option<&'t Token> {
    tokens
        .iter()
        .find(|tok| tok.kind == TokenKind::Keyword && words.iter().any(|word| tok.is_word(word)))
}

/// Structural skip rules, checked against the unsubstituted tokens of a line.
///
/// Returns a `Comment` node for lines that are recorded or dead, a bare `Line` with a
/// lone keyword for block delimiters whose arguments must not be evaluated, and `None`
/// when the line needs a full parse.
pub fn skipped_line(state: &AssemblerState, tokens: &[Token]) -> Option<Node> {
    let start = tokens.first()?.clone();
    let comment = || Node::new(NodeKind::Comment, start.clone());
    let bare = |keyword: &Token| {
        Node::with_children(
            NodeKind::Line,
            start.clone(),
            vec![Node::new(NodeKind::Keyword, keyword.clone())],
        )
    };

    if !state.in_macro_defines.is_empty() {
        return match find_keyword(tokens, &["MACRO", "ENDM"]) {
            Some(_) => None,
            None => Some(comment()),
        };
    }
    if !state.in_repeats.is_empty() {
        return Some(match find_keyword(tokens, &["REPT", "ENDR"]) {
            Some(keyword) => bare(keyword),
            None => comment(),
        });
    }
    match find_keyword(tokens, &["IF", "ELIF", "ELSE", "ENDC"]) {
        None if !state.conditions_true() => Some(comment()),
        None => None,
        Some(keyword) => {
            let dead = if keyword.is_word("IF") {
                !state.conditions_true()
            } else if keyword.is_word("ELIF") {
                !state.outer_conditions_true()
                    || state.in_conditionals.last().is_some_and(|cond| cond.taken)
            } else {
                true
            };
            dead.then(|| bare(keyword))
        }
    }
}

/// Parses a finalized token stream into a `Line` node, or `Invalid` on error.
pub fn parse_line(state: &mut AssemblerState, tokens: &[Token]) -> Node {
    let mut parser = Parser::new(tokens);
    let node = match parser.line() {
        Some(node) => node,
        None => Node::new(NodeKind::Invalid, parser.peek().clone()),
    };
    for (message, token) in parser.errors {
        state.error(DiagnosticSource::Parser, message, &token);
    }
    node
}

pub struct Parser<'t> {
    tokens: Vec<&'t Token>,
    pos: usize,
    end: Token,
    errors: Vec<(String, Token)>,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        let end = tokens
            .last()
            .filter(|tok| tok.kind == TokenKind::EndOfLine)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::EndOfLine, "", 0, 0));
        Self {
            tokens: tokens.iter().filter(|tok| !tok.kind.is_trivia()).collect(),
            pos: 0,
            end,
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).copied().unwrap_or(&self.end)
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&mut self, message: impl Into<String>, token: &Token) -> Option<T> {
        self.errors.push((message.into(), token.clone()));
        None
    }

    fn expect(&mut self, kind: TokenKind) -> Option<Token> {
        let tok = self.next();
        if tok.kind == kind {
            Some(tok)
        } else {
            self.error(format!("expected {kind}, found {tok}"), &tok)
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Comment | TokenKind::EndOfLine)
    }

    pub fn line(&mut self) -> Option<Node> {
        let start = self.expect(TokenKind::StartOfLine)?;
        let mut children = Vec::new();

        let mut label_terminated = false;
        if self.peek().kind == TokenKind::Label {
            let mut label = Node::new(NodeKind::Label, self.next());
            if matches!(self.peek().kind, TokenKind::Colon | TokenKind::DoubleColon) {
                label
                    .children
                    .push(Node::new(NodeKind::Terminator, self.next()));
                label_terminated = true;
            }
            children.push(label);
        }
        let has_label = !children.is_empty();

        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Directive => {
                self.next();
                let args = self.expression_list()?;
                children.push(Node::with_children(NodeKind::Directive, tok, args));
            }
            TokenKind::Keyword => {
                self.next();
                // `SET` and `RL` are also instructions
                let opcode = (tok.is_word("SET") || tok.is_word("RL"))
                    && (!has_label || label_terminated);
                if opcode {
                    let args = self.expression_list()?;
                    children.push(Node::with_children(NodeKind::Opcode, tok, args));
                } else if takes_raw_arguments(&tok) {
                    let args = self.raw_list();
                    children.push(Node::with_children(NodeKind::Keyword, tok, args));
                } else {
                    let args = self.expression_list()?;
                    children.push(Node::with_children(NodeKind::Keyword, tok, args));
                }
            }
            TokenKind::Opcode => {
                self.next();
                let args = self.expression_list()?;
                children.push(Node::with_children(NodeKind::Opcode, tok, args));
            }
            TokenKind::MacroCall => {
                self.next();
                let args = self.raw_list();
                children.push(Node::with_children(NodeKind::MacroCall, tok, args));
            }
            TokenKind::Operator if tok.text == "=" => {
                self.next();
                let value = self.expression(0)?;
                children.push(Node::with_children(
                    NodeKind::UnaryOperator,
                    tok,
                    vec![value],
                ));
            }
            _ => {}
        }

        if self.peek().kind == TokenKind::Comment {
            children.push(Node::new(NodeKind::Comment, self.next()));
        }
        let tok = self.next();
        if tok.kind != TokenKind::EndOfLine {
            return self.error(format!("unexpected {tok}"), &tok);
        }
        Some(Node::with_children(NodeKind::Line, start, children))
    }

    /// Comma-separated expressions up to the end of the line.
    fn expression_list(&mut self) -> Option<Vec<Node>> {
        let mut args = Vec::new();
        if self.at_line_end() {
            return Some(args);
        }
        loop {
            args.push(self.expression(0)?);
            if self.peek().kind != TokenKind::Comma {
                return Some(args);
            }
            self.next();
        }
    }

    /// Comma-separated arguments kept as source text, for macro calls and option strings.
    fn raw_list(&mut self) -> Vec<Node> {
        let mut args = Vec::new();
        if self.at_line_end() {
            return args;
        }
        loop {
            let first = self.peek().clone();
            let mut text = String::new();
            let mut depth = 0usize;
            let mut last_end: Option<usize> = None;
            while !self.at_line_end() {
                let tok = self.peek();
                match tok.kind {
                    TokenKind::Comma if depth == 0 => break,
                    TokenKind::OpenParen | TokenKind::OpenBracket => depth += 1,
                    TokenKind::CloseParen | TokenKind::CloseBracket => {
                        depth = depth.saturating_sub(1)
                    }
                    _ => {}
                }
                if last_end.is_some_and(|end| tok.column > end) {
                    text.push(' ');
                }
                text.push_str(&tok.text);
                last_end = Some(tok.end());
                self.next();
            }
            args.push(Node::new(
                NodeKind::RawText,
                Token::new(first.kind, text, first.line, first.column),
            ));
            if self.peek().kind != TokenKind::Comma {
                return args;
            }
            self.next();
        }
    }

    fn infix_precedence(&self) -> u8 {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Operator => binary_precedence(&tok.text),
            TokenKind::OpenParen | TokenKind::OpenBracket => POSTFIX,
            _ => 0,
        }
    }

    pub fn expression(&mut self, precedence: u8) -> Option<Node> {
        let tok = self.next();
        let mut left = self.prefix(tok)?;
        while precedence < self.infix_precedence() {
            let op = self.next();
            left = self.infix(left, op)?;
        }
        Some(left)
    }

    fn prefix(&mut self, tok: Token) -> Option<Node> {
        match tok.kind {
            TokenKind::Number => Some(Node::new(NodeKind::NumberLiteral, tok)),
            TokenKind::String => Some(Node::new(NodeKind::String, tok)),
            TokenKind::Identifier => Some(Node::new(NodeKind::Identifier, tok)),
            TokenKind::Operator if matches!(tok.text.as_str(), "-" | "+" | "!" | "~") => {
                let operand = self.expression(UNARY)?;
                Some(Node::with_children(
                    NodeKind::UnaryOperator,
                    tok,
                    vec![operand],
                ))
            }
            TokenKind::OpenParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::CloseParen)?;
                Some(inner)
            }
            TokenKind::OpenBracket => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::CloseBracket)?;
                Some(Node::with_children(NodeKind::Indexer, tok, vec![inner]))
            }
            TokenKind::EndOfLine => self.error("unexpected end of line", &tok),
            _ => self.error(format!("unexpected {tok}"), &tok),
        }
    }

    fn infix(&mut self, left: Node, op: Token) -> Option<Node> {
        match op.kind {
            TokenKind::Operator => {
                let right = self.expression(binary_precedence(&op.text))?;
                Some(Node::with_children(
                    NodeKind::BinaryOperator,
                    op,
                    vec![left, right],
                ))
            }
            TokenKind::OpenParen => {
                if left.kind != NodeKind::Identifier {
                    return self.error("only functions can be called", &op);
                }
                let mut args = Vec::new();
                if self.peek().kind != TokenKind::CloseParen {
                    loop {
                        args.push(self.expression(0)?);
                        if self.peek().kind != TokenKind::Comma {
                            break;
                        }
                        self.next();
                    }
                }
                self.expect(TokenKind::CloseParen)?;
                Some(Node::with_children(NodeKind::FunctionCall, left.token, args))
            }
            TokenKind::OpenBracket => {
                let index = self.expression(0)?;
                self.expect(TokenKind::CloseBracket)?;
                Some(Node::with_children(NodeKind::Indexer, op, vec![left, index]))
            }
            _ => self.error(format!("unexpected {op}"), &op),
        }
    }
}
