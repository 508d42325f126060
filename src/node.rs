use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Line,
    Label,
    Terminator,
    Directive,
    Keyword,
    Opcode,
    MacroCall,
    Comment,
    Invalid,
    BinaryOperator,
    UnaryOperator,
    FunctionCall,
    Indexer,
    Identifier,
    NumberLiteral,
    String,
    RawText,
}

/// One parse tree node. A line always parses to exactly one `Line` root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Token,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, token: Token) -> Self {
        Self {
            kind,
            token,
            children: Vec::new(),
        }
    }

    pub fn with_children(kind: NodeKind, token: Token, children: Vec<Node>) -> Self {
        Self {
            kind,
            token,
            children,
        }
    }

    pub fn text(&self) -> &str {
        &self.token.text
    }

    pub fn label(&self) -> Option<&Node> {
        self.children.iter().find(|node| node.kind == NodeKind::Label)
    }

    /// The directive, keyword, opcode, macro call or `=` node of a line.
    pub fn operation(&self) -> Option<&Node> {
        self.children.iter().find(|node| {
            matches!(
                node.kind,
                NodeKind::Directive
                    | NodeKind::Keyword
                    | NodeKind::Opcode
                    | NodeKind::MacroCall
                    | NodeKind::UnaryOperator
            )
        })
    }

    /// `true` for `Label::` style exported definitions.
    pub fn is_exported_label(&self) -> bool {
        self.kind == NodeKind::Label
            && self
                .children
                .iter()
                .any(|node| node.token.kind == TokenKind::DoubleColon)
    }

    /// Identifier spelling with the case folded, for register and condition matching.
    pub fn word(&self) -> Option<String> {
        (self.kind == NodeKind::Identifier).then(|| self.token.text.to_ascii_lowercase())
    }
}
