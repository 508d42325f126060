use std::fmt::{self, Display, Formatter};

/// Lexical classes. The declaration order doubles as the tie-break when two tokens
/// start at the same column, so the line sentinels sit at either end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    StartOfLine,
    Space,
    Comment,
    Directive,
    Keyword,
    Opcode,
    MacroCall,
    Label,
    Identifier,
    Number,
    String,
    StringText,
    Escape,
    MacroArgument,
    UniqueLabel,
    Interpolation,
    InterpolationText,
    Operator,
    Comma,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Colon,
    DoubleColon,
    Unknown,
    EndOfLine,
}

impl TokenKind {
    /// Tokens the parser never sees.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            Self::Space
                | Self::Escape
                | Self::Interpolation
                | Self::InterpolationText
                | Self::MacroArgument
                | Self::UniqueLabel
        )
    }

    /// Tokens after which `%` and `&` are operators rather than literal prefixes.
    pub fn ends_value(self) -> bool {
        matches!(
            self,
            Self::Identifier
                | Self::Label
                | Self::Number
                | Self::String
                | Self::CloseParen
                | Self::CloseBracket
        )
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartOfLine => "start of line",
            Self::Space => "space",
            Self::Comment => "comment",
            Self::Directive => "directive",
            Self::Keyword => "keyword",
            Self::Opcode => "opcode",
            Self::MacroCall => "macro call",
            Self::Label => "label",
            Self::Identifier => "identifier",
            Self::Number => "number",
            Self::String => "string",
            Self::StringText => "string text",
            Self::Escape => "escape",
            Self::MacroArgument => "macro argument",
            Self::UniqueLabel => "unique label",
            Self::Interpolation => "interpolation",
            Self::InterpolationText => "interpolation text",
            Self::Operator => "operator",
            Self::Comma => "`,`",
            Self::OpenParen => "`(`",
            Self::CloseParen => "`)`",
            Self::OpenBracket => "`[`",
            Self::CloseBracket => "`]`",
            Self::Colon => "`:`",
            Self::DoubleColon => "`::`",
            Self::Unknown => "unknown",
            Self::EndOfLine => "end of line",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    /// Case-insensitive comparison against a keyword, opcode or register name.
    pub fn is_word(&self, word: &str) -> bool {
        self.text.eq_ignore_ascii_case(word)
    }

    pub fn end(&self) -> usize {
        self.column + self.text.len()
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.kind, self.text)
    }
}
