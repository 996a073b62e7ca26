use std::fmt::Display;

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected character '{token}'")]
#[diagnostic(help("remove or correct the character: `{token}`"))]
pub struct SingleTokenError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this character")]
    bad_bit: SourceSpan,

    pub token: char,
}

impl SingleTokenError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_bit)
    }

    pub fn span(&self) -> SourceSpan {
        self.bad_bit
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("unterminated double quote string")]
#[diagnostic(help("string literals cannot span past the end of the file"))]
pub struct StringTerminationError {
    #[source_code]
    src: NamedSource<String>,

    #[label("Syntax Error: Missing trailing `\"` symbol to terminate the string literal")]
    bad_line: SourceSpan,
}

impl StringTerminationError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_line)
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("malformed numeric literal: {reason}")]
#[diagnostic(help(
    "probabilities are written with one digit before the point (`0.35`), integers without a point (`42`)"
))]
pub struct NumberLiteralError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this numeric literal")]
    bad_bit: SourceSpan,

    pub reason: String,
}

impl NumberLiteralError {
    pub fn span(&self) -> SourceSpan {
        self.bad_bit
    }
}

fn line_of(src: &str, span: SourceSpan) -> usize {
    let end = (span.offset() + 1).min(src.len());
    src[..end].lines().count().max(1)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: &'de str,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Equal,
    Arrow,
    FatArrow,
    Less,
    Greater,
    String,
    Ident,
    Integer(i64),
    Probability(f64),
    // sorts and base types
    Type,
    Prop,
    Prob,
    Fuzzy,
    Int,
    Bool,
    Str,
    // declarations and binders
    TypeDecl,
    PropDecl,
    Axiom,
    Def,
    Let,
    In,
    Fun,
    Forall,
    True,
    False,
    // fuzzy constructs
    FuzzyWrap,
    FuzzyMap,
    FuzzyBind,
    FuzzyCombine,
}

impl TokenKind {
    /// Keywords that name a sort or a type and may therefore start a type.
    pub fn is_type_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Type
                | TokenKind::Prop
                | TokenKind::Prob
                | TokenKind::Fuzzy
                | TokenKind::Int
                | TokenKind::Bool
                | TokenKind::Str
        )
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.literal;
        match self.kind {
            TokenKind::LeftParen => write!(f, "LEFT_PAREN {lit} null"),
            TokenKind::RightParen => write!(f, "RIGHT_PAREN {lit} null"),
            TokenKind::LeftBrace => write!(f, "LEFT_BRACE {lit} null"),
            TokenKind::RightBrace => write!(f, "RIGHT_BRACE {lit} null"),
            TokenKind::LeftBracket => write!(f, "LEFT_BRACKET {lit} null"),
            TokenKind::RightBracket => write!(f, "RIGHT_BRACKET {lit} null"),
            TokenKind::Comma => write!(f, "COMMA {lit} null"),
            TokenKind::Dot => write!(f, "DOT {lit} null"),
            TokenKind::Colon => write!(f, "COLON {lit} null"),
            TokenKind::Semicolon => write!(f, "SEMICOLON {lit} null"),
            TokenKind::Equal => write!(f, "EQUAL {lit} null"),
            TokenKind::Arrow => write!(f, "ARROW {lit} null"),
            TokenKind::FatArrow => write!(f, "FAT_ARROW {lit} null"),
            TokenKind::Less => write!(f, "LESS {lit} null"),
            TokenKind::Greater => write!(f, "GREATER {lit} null"),
            TokenKind::String => write!(f, "STRING \"{lit}\" {lit}"),
            TokenKind::Ident => write!(f, "IDENTIFIER {lit} null"),
            TokenKind::Integer(n) => write!(f, "INTEGER {lit} {n}"),
            TokenKind::Probability(p) => write!(f, "PROBABILITY {lit} {p}"),
            TokenKind::Type => write!(f, "TYPE {lit} null"),
            TokenKind::Prop => write!(f, "PROP {lit} null"),
            TokenKind::Prob => write!(f, "PROB {lit} null"),
            TokenKind::Fuzzy => write!(f, "FUZZY {lit} null"),
            TokenKind::Int => write!(f, "INT {lit} null"),
            TokenKind::Bool => write!(f, "BOOL {lit} null"),
            TokenKind::Str => write!(f, "STR {lit} null"),
            TokenKind::TypeDecl => write!(f, "TYPE_DECL {lit} null"),
            TokenKind::PropDecl => write!(f, "PROP_DECL {lit} null"),
            TokenKind::Axiom => write!(f, "AXIOM {lit} null"),
            TokenKind::Def => write!(f, "DEF {lit} null"),
            TokenKind::Let => write!(f, "LET {lit} null"),
            TokenKind::In => write!(f, "IN {lit} null"),
            TokenKind::Fun => write!(f, "FUN {lit} null"),
            TokenKind::Forall => write!(f, "FORALL {lit} null"),
            TokenKind::True => write!(f, "TRUE {lit} null"),
            TokenKind::False => write!(f, "FALSE {lit} null"),
            TokenKind::FuzzyWrap => write!(f, "FUZZY_WRAP {lit} null"),
            TokenKind::FuzzyMap => write!(f, "FUZZY_MAP {lit} null"),
            TokenKind::FuzzyBind => write!(f, "FUZZY_BIND {lit} null"),
            TokenKind::FuzzyCombine => write!(f, "FUZZY_COMBINE {lit} null"),
        }
    }
}

/// The smallest double above one.
const JUST_ABOVE_ONE: f64 = f64::from_bits(0x3FF0_0000_0000_0001);

pub struct Lexer<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    rest: &'de str,
    pub byte: usize,
    peeked: Option<Result<Token<'de>, Error>>,
}

impl<'de> Lexer<'de> {
    pub fn new(filename: Option<&'de str>, input: &'de str) -> Self {
        Lexer {
            filename,
            whole: input,
            rest: input,
            byte: 0,
            peeked: None,
        }
    }

    pub fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<input>"), self.whole.to_string())
    }

    pub fn peek(&mut self) -> Option<&Result<Token<'de>, Error>> {
        if self.peeked.is_some() {
            return self.peeked.as_ref();
        }
        self.peeked = self.next();
        self.peeked.as_ref()
    }

    /// Kind of the next token, if it lexed cleanly. Lexing errors stay queued
    /// and surface on the following `next`.
    pub fn peek_kind(&mut self) -> Option<TokenKind> {
        match self.peek() {
            Some(Ok(token)) => Some(token.kind),
            _ => None,
        }
    }

    fn number_error(&self, span: SourceSpan, reason: impl Into<String>) -> Error {
        NumberLiteralError {
            src: self.named_source(),
            bad_bit: span,
            reason: reason.into(),
        }
        .into()
    }
}

impl<'de> Iterator for Lexer<'de> {
    type Item = Result<Token<'de>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            return Some(peeked);
        }
        loop {
            let mut chars = self.rest.chars();
            let c = chars.next()?;
            let literal = &self.rest[..c.len_utf8()];
            let start = self.byte;
            let cur = self.rest;
            self.rest = chars.as_str();
            self.byte += c.len_utf8();

            enum Start {
                String,
                Slash,
                Ident,
                Number,
                IfNextElse(char, TokenKind, TokenKind),
            }

            let process = |kind: TokenKind| {
                Some(Ok(Token {
                    kind,
                    literal,
                    span: SourceSpan::from(start..start + literal.len()),
                }))
            };

            let started = match c {
                '(' => return process(TokenKind::LeftParen),
                ')' => return process(TokenKind::RightParen),
                '{' => return process(TokenKind::LeftBrace),
                '}' => return process(TokenKind::RightBrace),
                '[' => return process(TokenKind::LeftBracket),
                ']' => return process(TokenKind::RightBracket),
                ',' => return process(TokenKind::Comma),
                '.' => return process(TokenKind::Dot),
                ':' => return process(TokenKind::Colon),
                ';' => return process(TokenKind::Semicolon),
                '<' => return process(TokenKind::Less),
                '>' => return process(TokenKind::Greater),
                '/' => Start::Slash,
                '=' => Start::IfNextElse('>', TokenKind::FatArrow, TokenKind::Equal),
                '-' => Start::IfNextElse('>', TokenKind::Arrow, TokenKind::Arrow),
                'a'..='z' | 'A'..='Z' | '_' => Start::Ident,
                '0'..='9' => Start::Number,
                '"' => Start::String,
                ' ' | '\r' | '\t' | '\n' => continue,
                c => {
                    return Some(Err(SingleTokenError {
                        src: self.named_source(),
                        bad_bit: SourceSpan::from(start..self.byte),
                        token: c,
                    }
                    .into()));
                }
            };

            match started {
                Start::String => {
                    if let Some(end) = self.rest.find('"') {
                        let literal = &self.rest[..end];
                        self.byte += end + 1;
                        self.rest = &self.rest[end + 1..];
                        return Some(Ok(Token {
                            kind: TokenKind::String,
                            literal,
                            span: SourceSpan::from(start..self.byte),
                        }));
                    } else {
                        return Some(Err(StringTerminationError {
                            src: self.named_source(),
                            bad_line: SourceSpan::from(start..self.whole.len()),
                        }
                        .into()));
                    }
                }
                Start::Slash => {
                    if self.rest.starts_with('/') {
                        let new_line = self.rest.find('\n').unwrap_or(self.rest.len());
                        self.byte += new_line;
                        self.rest = &self.rest[new_line..];
                        continue;
                    } else {
                        return Some(Err(SingleTokenError {
                            src: self.named_source(),
                            bad_bit: SourceSpan::from(start..self.byte),
                            token: c,
                        }
                        .into()));
                    }
                }
                Start::Ident => {
                    let first_non_ident = cur
                        .find(|c| !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_'))
                        .unwrap_or(cur.len());

                    let literal = &cur[..first_non_ident];

                    let extra_bytes = literal.len() - c.len_utf8();
                    self.byte += extra_bytes;
                    self.rest = &self.rest[extra_bytes..];

                    let kind = match literal {
                        "Type" => TokenKind::Type,
                        "Prop" => TokenKind::Prop,
                        "Prob" => TokenKind::Prob,
                        "Fuzzy" => TokenKind::Fuzzy,
                        "Int" => TokenKind::Int,
                        "Bool" => TokenKind::Bool,
                        "Str" => TokenKind::Str,
                        "type" => TokenKind::TypeDecl,
                        "prop" => TokenKind::PropDecl,
                        "axiom" => TokenKind::Axiom,
                        "def" => TokenKind::Def,
                        "let" => TokenKind::Let,
                        "in" => TokenKind::In,
                        "fun" => TokenKind::Fun,
                        "forall" => TokenKind::Forall,
                        "true" => TokenKind::True,
                        "false" => TokenKind::False,
                        "fuzzy" => TokenKind::FuzzyWrap,
                        "fuzzy_map" => TokenKind::FuzzyMap,
                        "fuzzy_bind" => TokenKind::FuzzyBind,
                        "fuzzy_combine" => TokenKind::FuzzyCombine,
                        _ => TokenKind::Ident,
                    };

                    return Some(Ok(Token {
                        kind,
                        literal,
                        span: SourceSpan::from(start..self.byte),
                    }));
                }
                Start::Number => {
                    let whole_digits = cur
                        .find(|c: char| !c.is_ascii_digit())
                        .unwrap_or(cur.len());

                    // a point only belongs to the literal when a digit follows it,
                    // otherwise it is a projection
                    let after = &cur[whole_digits..];
                    let fraction_digits = match after.strip_prefix('.') {
                        Some(fraction) => fraction
                            .find(|c: char| !c.is_ascii_digit())
                            .unwrap_or(fraction.len()),
                        None => 0,
                    };

                    let literal = if fraction_digits > 0 {
                        &cur[..whole_digits + 1 + fraction_digits]
                    } else {
                        &cur[..whole_digits]
                    };

                    let extra_bytes = literal.len() - c.len_utf8();
                    self.byte += extra_bytes;
                    self.rest = &self.rest[extra_bytes..];
                    let span = SourceSpan::from(start..self.byte);

                    if fraction_digits == 0 {
                        return Some(match literal.parse::<i64>() {
                            Ok(n) => Ok(Token {
                                kind: TokenKind::Integer(n),
                                literal,
                                span,
                            }),
                            Err(e) => Err(self.number_error(span, e.to_string())),
                        });
                    }

                    if whole_digits != 1 {
                        return Some(Err(self.number_error(
                            span,
                            "a decimal literal takes exactly one digit before the point",
                        )));
                    }

                    // `1.` followed by a nonzero digit is above one even when the
                    // nearest double is 1.0
                    let above_one =
                        literal.starts_with('1') && literal[2..].bytes().any(|b| b != b'0');

                    return Some(match literal.parse::<f64>() {
                        Ok(p) => Ok(Token {
                            kind: TokenKind::Probability(if above_one {
                                p.max(JUST_ABOVE_ONE)
                            } else {
                                p
                            }),
                            literal,
                            span,
                        }),
                        Err(e) => Err(self.number_error(span, e.to_string())),
                    });
                }
                Start::IfNextElse(next, yes, no) => {
                    if self.rest.starts_with(next) {
                        self.rest = &self.rest[next.len_utf8()..];
                        self.byte += next.len_utf8();
                        return Some(Ok(Token {
                            kind: yes,
                            literal: &cur[..c.len_utf8() + next.len_utf8()],
                            span: SourceSpan::from(start..self.byte),
                        }));
                    } else if c == '-' {
                        // a lone minus has no meaning in the kernel
                        return Some(Err(SingleTokenError {
                            src: self.named_source(),
                            bad_bit: SourceSpan::from(start..self.byte),
                            token: c,
                        }
                        .into()));
                    } else {
                        return process(no);
                    }
                }
            }
        }
    }
}
