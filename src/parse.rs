use std::fmt::{self, Display};

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{
    Lexer,
    lex::{Token, TokenKind},
    types::Sort,
};

#[derive(Error, Debug, Diagnostic)]
#[error("expected {expected}, found {found}")]
#[diagnostic(code(biokernel::parse))]
pub struct ParseError {
    #[source_code]
    src: NamedSource<String>,

    #[label("here")]
    span: SourceSpan,

    pub expected: String,
    pub found: String,
}

impl ParseError {
    pub fn span(&self) -> SourceSpan {
        self.span
    }

    pub fn line(&self) -> usize {
        let end = (self.span.offset() + 1).min(self.src.inner().len());
        self.src.inner()[..end].lines().count().max(1)
    }
}

pub fn join(from: SourceSpan, to: SourceSpan) -> SourceSpan {
    SourceSpan::from(from.offset()..to.offset() + to.len())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Var(String),
    Int(i64),
    Prob(f64),
    Bool(bool),
    Str(String),
    Lambda {
        param: String,
        param_ty: TypeExpr,
        body: Box<Expr>,
    },
    App {
        func: Box<Expr>,
        arg: Box<Expr>,
    },
    TyApp {
        expr: Box<Expr>,
        ty: TypeExpr,
    },
    Let {
        name: String,
        ty: Option<TypeExpr>,
        bound: Box<Expr>,
        body: Box<Expr>,
    },
    Ascribe {
        expr: Box<Expr>,
        ty: TypeExpr,
    },
    Record(Vec<FieldInit>),
    Project {
        expr: Box<Expr>,
        field: String,
        field_span: SourceSpan,
    },
    Fuzzy {
        value: Box<Expr>,
        confidence: Box<Expr>,
    },
    FuzzyMap {
        func: Box<Expr>,
        arg: Box<Expr>,
    },
    FuzzyBind {
        arg: Box<Expr>,
        func: Box<Expr>,
    },
    FuzzyCombine {
        op: Box<Expr>,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A sort or type written where a term is expected.
    TypeLevel(TypeExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub name: String,
    pub name_span: SourceSpan,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    Sort(Sort),
    Prob,
    Int,
    Bool,
    Str,
    Named(String),
    Arrow(Box<TypeExpr>, Box<TypeExpr>),
    Record(Vec<(String, TypeExpr)>),
    Fuzzy(Box<TypeExpr>),
    Forall(String, Box<TypeExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub span: SourceSpan,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Type {
        name: String,
        span: SourceSpan,
        ty: TypeExpr,
    },
    Prop {
        name: String,
        span: SourceSpan,
    },
    Axiom {
        name: String,
        span: SourceSpan,
        prop: TypeExpr,
    },
    Def {
        name: String,
        span: SourceSpan,
        params: Vec<Param>,
        ret: Option<TypeExpr>,
        body: Expr,
    },
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Type { name, .. }
            | Decl::Prop { name, .. }
            | Decl::Axiom { name, .. }
            | Decl::Def { name, .. } => name,
        }
    }

    pub fn span(&self) -> SourceSpan {
        match self {
            Decl::Type { span, .. }
            | Decl::Prop { span, .. }
            | Decl::Axiom { span, .. }
            | Decl::Def { span, .. } => *span,
        }
    }
}

/// A parsed source file: declarations followed by an optional entry expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProgram {
    pub decls: Vec<Decl>,
    pub main: Option<Expr>,
}

pub struct Parser<'de> {
    whole: &'de str,
    lexer: Lexer<'de>,
}

impl<'de> Parser<'de> {
    pub fn new(filename: Option<&'de str>, whole: &'de str) -> Self {
        Parser {
            whole,
            lexer: Lexer::new(filename, whole),
        }
    }

    pub fn parse(mut self) -> Result<SourceProgram, Error> {
        let mut decls = Vec::new();
        while let Some(kind) = self.lexer.peek_kind() {
            if !matches!(
                kind,
                TokenKind::TypeDecl | TokenKind::PropDecl | TokenKind::Axiom | TokenKind::Def
            ) {
                break;
            }
            decls.push(self.parse_decl()?);
        }

        let main = match self.lexer.peek() {
            None => None,
            Some(_) => Some(self.parse_expr()?),
        };

        match self.lexer.next() {
            None => Ok(SourceProgram { decls, main }),
            Some(Err(e)) => Err(e),
            Some(Ok(token)) => Err(self.unexpected(&token, "end of input")),
        }
    }

    /// Parses a lone expression, rejecting trailing input.
    pub fn parse_expr_only(mut self) -> Result<Expr, Error> {
        let expr = self.parse_expr()?;
        match self.lexer.next() {
            None => Ok(expr),
            Some(Err(e)) => Err(e),
            Some(Ok(token)) => Err(self.unexpected(&token, "end of input")),
        }
    }

    fn unexpected(&self, token: &Token<'_>, expected: &str) -> Error {
        ParseError {
            src: self.lexer.named_source(),
            span: token.span,
            expected: expected.to_string(),
            found: format!("`{}`", token.literal),
        }
        .into()
    }

    fn advance(&mut self, expected: &str) -> Result<Token<'de>, Error> {
        match self.lexer.next() {
            Some(Ok(token)) => Ok(token),
            Some(Err(e)) => Err(e),
            None => Err(ParseError {
                src: self.lexer.named_source(),
                span: SourceSpan::from(self.whole.len()..self.whole.len()),
                expected: expected.to_string(),
                found: "end of input".to_string(),
            }
            .into()),
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token<'de>, Error> {
        let token = self.advance(expected)?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.unexpected(&token, expected))
        }
    }

    fn eat(&mut self, kind: TokenKind) -> Result<Option<Token<'de>>, Error> {
        if self.lexer.peek_kind() == Some(kind) {
            self.advance("a token").map(Some)
        } else {
            Ok(None)
        }
    }

    fn ident(&mut self, expected: &str) -> Result<(String, SourceSpan), Error> {
        let token = self.expect(TokenKind::Ident, expected)?;
        Ok((token.literal.to_string(), token.span))
    }

    fn parse_decl(&mut self) -> Result<Decl, Error> {
        let keyword = self.advance("a declaration")?;
        let decl = match keyword.kind {
            TokenKind::TypeDecl => {
                let (name, _) = self.ident("a type name")?;
                self.expect(TokenKind::Equal, "`=`")?;
                let ty = self.parse_type()?;
                Decl::Type {
                    name,
                    span: join(keyword.span, ty.span),
                    ty,
                }
            }
            TokenKind::PropDecl => {
                let (name, span) = self.ident("a proposition name")?;
                Decl::Prop {
                    name,
                    span: join(keyword.span, span),
                }
            }
            TokenKind::Axiom => {
                let (name, _) = self.ident("an axiom name")?;
                self.expect(TokenKind::Colon, "`:`")?;
                let prop = self.parse_type()?;
                Decl::Axiom {
                    name,
                    span: join(keyword.span, prop.span),
                    prop,
                }
            }
            TokenKind::Def => {
                let (name, _) = self.ident("a definition name")?;
                let mut params = Vec::new();
                if self.eat(TokenKind::LeftParen)?.is_some() {
                    loop {
                        let (param, span) = self.ident("a parameter name")?;
                        self.expect(TokenKind::Colon, "`:`")?;
                        let ty = self.parse_type()?;
                        params.push(Param {
                            name: param,
                            span,
                            ty,
                        });
                        if self.eat(TokenKind::Comma)?.is_none() {
                            break;
                        }
                    }
                    self.expect(TokenKind::RightParen, "`)`")?;
                }
                let ret = match self.eat(TokenKind::Colon)? {
                    Some(_) => Some(self.parse_type()?),
                    None => None,
                };
                self.expect(TokenKind::Equal, "`=`")?;
                let body = self.parse_expr()?;
                Decl::Def {
                    name,
                    span: join(keyword.span, body.span),
                    params,
                    ret,
                    body,
                }
            }
            _ => return Err(self.unexpected(&keyword, "a declaration")),
        };
        self.expect(TokenKind::Semicolon, "`;`")?;
        Ok(decl)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, Error> {
        match self.lexer.peek_kind() {
            Some(TokenKind::Let) => {
                let keyword = self.advance("`let`")?;
                let (name, _) = self.ident("a variable name")?;
                let ty = match self.eat(TokenKind::Colon)? {
                    Some(_) => Some(self.parse_type()?),
                    None => None,
                };
                self.expect(TokenKind::Equal, "`=`")?;
                let bound = self.parse_expr()?;
                self.expect(TokenKind::In, "`in`")?;
                let body = self.parse_expr()?;
                Ok(Expr {
                    span: join(keyword.span, body.span),
                    kind: ExprKind::Let {
                        name,
                        ty,
                        bound: Box::new(bound),
                        body: Box::new(body),
                    },
                })
            }
            Some(TokenKind::Fun) => {
                let keyword = self.advance("`fun`")?;
                self.expect(TokenKind::LeftParen, "`(`")?;
                let (param, _) = self.ident("a parameter name")?;
                self.expect(TokenKind::Colon, "`:`")?;
                let param_ty = self.parse_type()?;
                self.expect(TokenKind::RightParen, "`)`")?;
                self.expect(TokenKind::FatArrow, "`=>`")?;
                let body = self.parse_expr()?;
                Ok(Expr {
                    span: join(keyword.span, body.span),
                    kind: ExprKind::Lambda {
                        param,
                        param_ty,
                        body: Box::new(body),
                    },
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.lexer.peek_kind() {
                Some(TokenKind::LeftParen) => {
                    self.advance("`(`")?;
                    let args = self.parse_args()?;
                    let close = self.expect(TokenKind::RightParen, "`)` or `,`")?;
                    for arg in args {
                        expr = Expr {
                            span: join(expr.span, close.span),
                            kind: ExprKind::App {
                                func: Box::new(expr),
                                arg: Box::new(arg),
                            },
                        };
                    }
                }
                Some(TokenKind::Dot) => {
                    self.advance("`.`")?;
                    let (field, field_span) = self.ident("a field name")?;
                    expr = Expr {
                        span: join(expr.span, field_span),
                        kind: ExprKind::Project {
                            expr: Box::new(expr),
                            field,
                            field_span,
                        },
                    };
                }
                Some(TokenKind::LeftBracket) => {
                    self.advance("`[`")?;
                    let ty = self.parse_type()?;
                    let close = self.expect(TokenKind::RightBracket, "`]`")?;
                    expr = Expr {
                        span: join(expr.span, close.span),
                        kind: ExprKind::TyApp {
                            expr: Box::new(expr),
                            ty,
                        },
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, Error> {
        let mut args = vec![self.parse_expr()?];
        while self.eat(TokenKind::Comma)?.is_some() {
            args.push(self.parse_expr()?);
        }
        Ok(args)
    }

    fn open_call(&mut self) -> Result<Expr, Error> {
        self.expect(TokenKind::LeftParen, "`(`")?;
        self.parse_expr()
    }

    fn next_arg(&mut self) -> Result<Expr, Error> {
        self.expect(TokenKind::Comma, "`,`")?;
        self.parse_expr()
    }

    fn close_call(&mut self) -> Result<SourceSpan, Error> {
        Ok(self.expect(TokenKind::RightParen, "`)`")?.span)
    }

    fn parse_atom(&mut self) -> Result<Expr, Error> {
        if self.lexer.peek_kind().is_some_and(|kind| kind.is_type_keyword()) {
            let ty = self.parse_type_atom()?;
            return Ok(Expr {
                span: ty.span,
                kind: ExprKind::TypeLevel(ty),
            });
        }

        let token = self.advance("an expression")?;
        let atom = |kind| -> Result<Expr, Error> {
            Ok(Expr {
                kind,
                span: token.span,
            })
        };
        match token.kind {
            TokenKind::Ident => atom(ExprKind::Var(token.literal.to_string())),
            TokenKind::Integer(n) => atom(ExprKind::Int(n)),
            TokenKind::Probability(p) => atom(ExprKind::Prob(p)),
            TokenKind::True => atom(ExprKind::Bool(true)),
            TokenKind::False => atom(ExprKind::Bool(false)),
            TokenKind::String => atom(ExprKind::Str(token.literal.to_string())),
            TokenKind::LeftParen => {
                let inner = self.parse_expr()?;
                if self.eat(TokenKind::Colon)?.is_some() {
                    let ty = self.parse_type()?;
                    let close = self.expect(TokenKind::RightParen, "`)`")?;
                    return Ok(Expr {
                        span: join(token.span, close.span),
                        kind: ExprKind::Ascribe {
                            expr: Box::new(inner),
                            ty,
                        },
                    });
                }
                self.expect(TokenKind::RightParen, "`)` or `:`")?;
                Ok(inner)
            }
            TokenKind::LeftBrace => {
                let mut fields = Vec::new();
                if let Some(close) = self.eat(TokenKind::RightBrace)? {
                    return Ok(Expr {
                        span: join(token.span, close.span),
                        kind: ExprKind::Record(fields),
                    });
                }
                loop {
                    let (name, name_span) = self.ident("a field name")?;
                    self.expect(TokenKind::Equal, "`=`")?;
                    let value = self.parse_expr()?;
                    fields.push(FieldInit {
                        name,
                        name_span,
                        value,
                    });
                    if self.eat(TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
                let close = self.expect(TokenKind::RightBrace, "`}` or `,`")?;
                Ok(Expr {
                    span: join(token.span, close.span),
                    kind: ExprKind::Record(fields),
                })
            }
            TokenKind::FuzzyWrap => {
                let value = Box::new(self.open_call()?);
                let confidence = Box::new(self.next_arg()?);
                let close = self.close_call()?;
                Ok(Expr {
                    span: join(token.span, close),
                    kind: ExprKind::Fuzzy { value, confidence },
                })
            }
            TokenKind::FuzzyMap => {
                let func = Box::new(self.open_call()?);
                let arg = Box::new(self.next_arg()?);
                let close = self.close_call()?;
                Ok(Expr {
                    span: join(token.span, close),
                    kind: ExprKind::FuzzyMap { func, arg },
                })
            }
            TokenKind::FuzzyBind => {
                let arg = Box::new(self.open_call()?);
                let func = Box::new(self.next_arg()?);
                let close = self.close_call()?;
                Ok(Expr {
                    span: join(token.span, close),
                    kind: ExprKind::FuzzyBind { arg, func },
                })
            }
            TokenKind::FuzzyCombine => {
                let op = Box::new(self.open_call()?);
                let left = Box::new(self.next_arg()?);
                let right = Box::new(self.next_arg()?);
                let close = self.close_call()?;
                Ok(Expr {
                    span: join(token.span, close),
                    kind: ExprKind::FuzzyCombine { op, left, right },
                })
            }
            _ => Err(self.unexpected(&token, "an expression")),
        }
    }

    pub fn parse_type(&mut self) -> Result<TypeExpr, Error> {
        if let Some(keyword) = self.eat(TokenKind::Forall)? {
            let (var, _) = self.ident("a type variable")?;
            self.expect(TokenKind::Dot, "`.`")?;
            let body = self.parse_type()?;
            return Ok(TypeExpr {
                span: join(keyword.span, body.span),
                kind: TypeExprKind::Forall(var, Box::new(body)),
            });
        }

        let domain = self.parse_type_atom()?;
        if self.eat(TokenKind::Arrow)?.is_some() {
            let codomain = self.parse_type()?;
            return Ok(TypeExpr {
                span: join(domain.span, codomain.span),
                kind: TypeExprKind::Arrow(Box::new(domain), Box::new(codomain)),
            });
        }
        Ok(domain)
    }

    fn parse_type_atom(&mut self) -> Result<TypeExpr, Error> {
        let token = self.advance("a type")?;
        let atom = |kind| -> Result<TypeExpr, Error> {
            Ok(TypeExpr {
                kind,
                span: token.span,
            })
        };
        match token.kind {
            TokenKind::Type => atom(TypeExprKind::Sort(Sort::Type)),
            TokenKind::Prop => atom(TypeExprKind::Sort(Sort::Prop)),
            TokenKind::Prob => atom(TypeExprKind::Prob),
            TokenKind::Int => atom(TypeExprKind::Int),
            TokenKind::Bool => atom(TypeExprKind::Bool),
            TokenKind::Str => atom(TypeExprKind::Str),
            TokenKind::Ident => atom(TypeExprKind::Named(token.literal.to_string())),
            TokenKind::Fuzzy => {
                self.expect(TokenKind::Less, "`<`")?;
                let inner = self.parse_type()?;
                let close = self.expect(TokenKind::Greater, "`>`")?;
                Ok(TypeExpr {
                    span: join(token.span, close.span),
                    kind: TypeExprKind::Fuzzy(Box::new(inner)),
                })
            }
            TokenKind::LeftBrace => {
                let mut fields = Vec::new();
                if let Some(close) = self.eat(TokenKind::RightBrace)? {
                    return Ok(TypeExpr {
                        span: join(token.span, close.span),
                        kind: TypeExprKind::Record(fields),
                    });
                }
                loop {
                    let (name, _) = self.ident("a field name")?;
                    self.expect(TokenKind::Colon, "`:`")?;
                    fields.push((name, self.parse_type()?));
                    if self.eat(TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
                let close = self.expect(TokenKind::RightBrace, "`}` or `,`")?;
                Ok(TypeExpr {
                    span: join(token.span, close.span),
                    kind: TypeExprKind::Record(fields),
                })
            }
            TokenKind::LeftParen => {
                let inner = self.parse_type()?;
                self.expect(TokenKind::RightParen, "`)`")?;
                Ok(inner)
            }
            _ => Err(self.unexpected(&token, "a type")),
        }
    }
}

impl Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeExprKind::Sort(sort) => write!(f, "{sort}"),
            TypeExprKind::Prob => write!(f, "Prob"),
            TypeExprKind::Int => write!(f, "Int"),
            TypeExprKind::Bool => write!(f, "Bool"),
            TypeExprKind::Str => write!(f, "Str"),
            TypeExprKind::Named(name) => write!(f, "{name}"),
            TypeExprKind::Arrow(domain, codomain) => match domain.kind {
                TypeExprKind::Arrow(..) | TypeExprKind::Forall(..) => {
                    write!(f, "({domain}) -> {codomain}")
                }
                _ => write!(f, "{domain} -> {codomain}"),
            },
            TypeExprKind::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name}: {ty}")?;
                }
                if fields.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
            TypeExprKind::Fuzzy(inner) => write!(f, "Fuzzy<{inner}>"),
            TypeExprKind::Forall(var, body) => write!(f, "forall {var}. {body}"),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Var(name) => write!(f, "{name}"),
            ExprKind::Int(n) => write!(f, "{n}"),
            ExprKind::Prob(p) => write!(f, "{}", crate::prob::render(*p)),
            ExprKind::Bool(b) => write!(f, "{b}"),
            ExprKind::Str(s) => write!(f, "\"{s}\""),
            ExprKind::Lambda {
                param,
                param_ty,
                body,
            } => write!(f, "fun ({param}: {param_ty}) => {body}"),
            ExprKind::App { func, arg } => {
                write_operand(f, func)?;
                write!(f, "({arg})")
            }
            ExprKind::TyApp { expr, ty } => {
                write_operand(f, expr)?;
                write!(f, "[{ty}]")
            }
            ExprKind::Let {
                name,
                ty,
                bound,
                body,
            } => match ty {
                Some(ty) => write!(f, "let {name}: {ty} = {bound} in {body}"),
                None => write!(f, "let {name} = {bound} in {body}"),
            },
            ExprKind::Ascribe { expr, ty } => write!(f, "({expr} : {ty})"),
            ExprKind::Record(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {} = {}", field.name, field.value)?;
                }
                if fields.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
            ExprKind::Project { expr, field, .. } => {
                write_operand(f, expr)?;
                write!(f, ".{field}")
            }
            ExprKind::Fuzzy { value, confidence } => write!(f, "fuzzy({value}, {confidence})"),
            ExprKind::FuzzyMap { func, arg } => write!(f, "fuzzy_map({func}, {arg})"),
            ExprKind::FuzzyBind { arg, func } => write!(f, "fuzzy_bind({arg}, {func})"),
            ExprKind::FuzzyCombine { op, left, right } => {
                write!(f, "fuzzy_combine({op}, {left}, {right})")
            }
            ExprKind::TypeLevel(ty) => write!(f, "{ty}"),
        }
    }
}

/// Binders extend as far right as possible, so they need parentheses in
/// head position.
fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr.kind {
        ExprKind::Lambda { .. } | ExprKind::Let { .. } => write!(f, "({expr})"),
        _ => write!(f, "{expr}"),
    }
}

impl Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decl::Type { name, ty, .. } => write!(f, "type {name} = {ty};"),
            Decl::Prop { name, .. } => write!(f, "prop {name};"),
            Decl::Axiom { name, prop, .. } => write!(f, "axiom {name} : {prop};"),
            Decl::Def {
                name,
                params,
                ret,
                body,
                ..
            } => {
                write!(f, "def {name}")?;
                if !params.is_empty() {
                    write!(f, "(")?;
                    for (i, param) in params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}: {}", param.name, param.ty)?;
                    }
                    write!(f, ")")?;
                }
                if let Some(ret) = ret {
                    write!(f, ": {ret}")?;
                }
                write!(f, " = {body};")
            }
        }
    }
}

impl Display for SourceProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.decls {
            writeln!(f, "{decl}")?;
        }
        if let Some(main) = &self.main {
            writeln!(f, "{main}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(input: &str) -> Expr {
        Parser::new(None, input).parse_expr_only().unwrap()
    }

    fn parse_error(input: &str) -> Error {
        Parser::new(None, input).parse().unwrap_err()
    }

    #[test]
    fn nested_lets_with_annotations() {
        let e = expr("let p: Prob = 0.7 in let q: Prob = 0.5 in prob_mul(p, q)");
        let ExprKind::Let { name, ty, body, .. } = e.kind else {
            panic!("expected let, got {e:?}");
        };
        assert_eq!(name, "p");
        assert_eq!(ty.unwrap().kind, TypeExprKind::Prob);
        let ExprKind::Let { body, .. } = body.kind else {
            panic!("expected inner let");
        };
        assert_eq!(body.to_string(), "prob_mul(p)(q)");
    }

    #[test]
    fn multi_argument_calls_are_curried() {
        let e = expr("prob_add(0.6, 0.7)");
        let ExprKind::App { func, arg } = e.kind else {
            panic!("expected application");
        };
        assert_eq!(arg.kind, ExprKind::Prob(0.7));
        assert!(matches!(func.kind, ExprKind::App { .. }));
    }

    #[test]
    fn postfix_chains() {
        let e = expr("f(x).field[Prob](y)");
        assert_eq!(e.to_string(), "f(x).field[Prob](y)");
    }

    #[test]
    fn types_are_right_associative() {
        let mut parser = Parser::new(None, "forall T. (T -> T) -> Fuzzy<Fuzzy<T>>");
        let ty = parser.parse_type().unwrap();
        assert_eq!(ty.to_string(), "forall T. (T -> T) -> Fuzzy<Fuzzy<T>>");
    }

    #[test]
    fn record_literals_and_types() {
        let program = Parser::new(
            None,
            "type Gene = { name: Str, expression: Prob };\n{ name = \"tp53\", expression = 0.8 }.expression",
        )
        .parse()
        .unwrap();
        assert_eq!(program.decls.len(), 1);
        assert_eq!(
            program.decls[0].to_string(),
            "type Gene = { name: Str, expression: Prob };"
        );
        assert_eq!(
            program.main.unwrap().to_string(),
            "{ name = \"tp53\", expression = 0.8 }.expression"
        );
    }

    #[test]
    fn declarations() {
        let program = Parser::new(
            None,
            "prop Expressed;\naxiom observed : Expressed;\ndef both(p: Prob, q: Prob): Prob = prob_mul(p, q);\nboth(0.5, 0.5)",
        )
        .parse()
        .unwrap();
        let names: Vec<_> = program.decls.iter().map(Decl::name).collect();
        assert_eq!(names, ["Expressed", "observed", "both"]);
        let Decl::Def { params, ret, .. } = &program.decls[2] else {
            panic!("expected def");
        };
        assert_eq!(params.len(), 2);
        assert!(ret.is_some());
    }

    #[test]
    fn sort_keywords_in_expression_position_are_kept() {
        let e = expr("let t = Type in t");
        let ExprKind::Let { bound, .. } = e.kind else {
            panic!("expected let");
        };
        assert_eq!(
            bound.kind,
            ExprKind::TypeLevel(TypeExpr {
                kind: TypeExprKind::Sort(Sort::Type),
                span: SourceSpan::from(8..12),
            })
        );
    }

    #[test]
    fn fuzzy_constructs() {
        let e = expr("fuzzy_combine(prob_mul, fuzzy(0.3, 0.8), fuzzy(0.6, 0.5))");
        assert!(matches!(e.kind, ExprKind::FuzzyCombine { .. }));
        assert_eq!(
            e.to_string(),
            "fuzzy_combine(prob_mul, fuzzy(0.3, 0.8), fuzzy(0.6, 0.5))"
        );
    }

    #[test]
    fn missing_in_reports_expected_token() {
        let err = parse_error("let x = 0.5 x");
        let err = err.downcast_ref::<ParseError>().unwrap();
        assert_eq!(err.expected, "`in`");
        assert_eq!(err.found, "`x`");
        assert_eq!(err.span(), SourceSpan::from(12..13));
    }

    #[test]
    fn unexpected_end_of_input() {
        let err = parse_error("fun (x: Prob) =>");
        let err = err.downcast_ref::<ParseError>().unwrap();
        assert_eq!(err.found, "end of input");
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse_error("0.5 0.6");
        let err = err.downcast_ref::<ParseError>().unwrap();
        assert_eq!(err.expected, "end of input");
    }

    #[test]
    fn lexer_errors_pass_through() {
        let err = parse_error("let x = 12.5 in x");
        assert!(err.downcast_ref::<crate::lex::NumberLiteralError>().is_some());
    }
}
