//! A small typed calculus of bounded probabilities and confidence-carrying
//! values.
//!
//! Source text goes through [`Lexer`] and [`Parser`], is elaborated by the
//! bidirectional checker in [`check`] into a core [`term::Term`], and is
//! reduced to an [`eval::Value`] by the small-step evaluator.

use miette::NamedSource;
use thiserror::Error;

pub mod builtins;
pub mod check;
pub mod eval;
pub mod lex;
pub mod parse;
pub mod prob;
pub mod term;
pub mod types;

pub use eval::{EvalConfig, RuntimeError, Value};
pub use lex::Lexer;
pub use parse::Parser;

use check::TypeErrors;
use parse::SourceProgram;
use term::Term;
use types::Type;

/// A program that passed type checking, lowered to one closed core term.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub term: Term,
    pub ty: Type,
}

/// Why a source file did not produce a value.
#[derive(Error, Debug)]
pub enum Failure {
    #[error("{0}")]
    Parse(miette::Error),

    #[error(transparent)]
    Type(#[from] TypeErrors),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl Failure {
    pub fn exit_code(&self) -> i32 {
        match self {
            Failure::Parse(_) => 65,
            Failure::Type(_) => 66,
            Failure::Runtime(_) => 70,
        }
    }

    /// Converts into a report carrying source labels where there are any.
    pub fn into_report(self) -> miette::Report {
        match self {
            Failure::Parse(report) => report,
            Failure::Type(errors) => errors.into(),
            Failure::Runtime(err) => err.into(),
        }
    }
}

pub fn parse(filename: Option<&str>, source: &str) -> Result<SourceProgram, miette::Error> {
    Parser::new(filename, source).parse()
}

pub fn typecheck(filename: Option<&str>, source: &str) -> Result<Program, Failure> {
    let program = parse(filename, source).map_err(Failure::Parse)?;
    match check::check_program(&program) {
        Ok((term, ty)) => Ok(Program { term, ty }),
        Err(errors) => {
            let src = NamedSource::new(filename.unwrap_or("<input>"), source.to_string());
            Err(TypeErrors::new(src, errors).into())
        }
    }
}

pub fn run(program: &Program, config: EvalConfig) -> Result<Value, RuntimeError> {
    eval::Evaluator::new(config).evaluate(&program.term, &program.ty)
}
