use std::fmt::{self, Display};

use crate::{
    eval::RuntimeError,
    prob::{self, Prob},
    term::Literal,
    types::Type,
};

/// Operators with a fixed arity whose reduction is delegated to native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    ProbAdd,
    ProbMul,
    ProbComplement,
    ProbMin,
    ProbMax,
    IntAdd,
    IntMul,
    StrConcat,
}

impl BuiltinOp {
    pub const ALL: [BuiltinOp; 8] = [
        BuiltinOp::ProbAdd,
        BuiltinOp::ProbMul,
        BuiltinOp::ProbComplement,
        BuiltinOp::ProbMin,
        BuiltinOp::ProbMax,
        BuiltinOp::IntAdd,
        BuiltinOp::IntMul,
        BuiltinOp::StrConcat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinOp::ProbAdd => "prob_add",
            BuiltinOp::ProbMul => "prob_mul",
            BuiltinOp::ProbComplement => "prob_complement",
            BuiltinOp::ProbMin => "prob_min",
            BuiltinOp::ProbMax => "prob_max",
            BuiltinOp::IntAdd => "int_add",
            BuiltinOp::IntMul => "int_mul",
            BuiltinOp::StrConcat => "str_concat",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            BuiltinOp::ProbComplement => 1,
            _ => 2,
        }
    }

    pub fn signature(self) -> Type {
        let binary = |ty: Type| Type::arrow(ty.clone(), Type::arrow(ty.clone(), ty));
        match self {
            BuiltinOp::ProbAdd | BuiltinOp::ProbMul | BuiltinOp::ProbMin | BuiltinOp::ProbMax => {
                binary(Type::Prob)
            }
            BuiltinOp::ProbComplement => Type::arrow(Type::Prob, Type::Prob),
            BuiltinOp::IntAdd | BuiltinOp::IntMul => binary(Type::Int),
            BuiltinOp::StrConcat => binary(Type::Str),
        }
    }

    /// Reduces a saturated application. Probability operands are re-validated
    /// on the way in, so a corrupted operand surfaces as an arithmetic error
    /// instead of an out-of-range result.
    pub fn apply(self, args: &[Literal]) -> Result<Literal, RuntimeError> {
        let result = match (self, args) {
            (BuiltinOp::ProbComplement, [Literal::Prob(p)]) => {
                Literal::Prob(prob::prob_complement(Prob::new(*p)?).value())
            }
            (
                BuiltinOp::ProbAdd | BuiltinOp::ProbMul | BuiltinOp::ProbMin | BuiltinOp::ProbMax,
                [Literal::Prob(p), Literal::Prob(q)],
            ) => {
                let (p, q) = (Prob::new(*p)?, Prob::new(*q)?);
                let result = match self {
                    BuiltinOp::ProbAdd => prob::prob_add(p, q),
                    BuiltinOp::ProbMul => prob::prob_mul(p, q),
                    BuiltinOp::ProbMin => prob::prob_min(p, q),
                    _ => prob::prob_max(p, q),
                };
                Literal::Prob(result.value())
            }
            (BuiltinOp::IntAdd, [Literal::Int(a), Literal::Int(b)]) => Literal::Int(
                a.checked_add(*b)
                    .ok_or(RuntimeError::IntegerOverflow { op: self.name() })?,
            ),
            (BuiltinOp::IntMul, [Literal::Int(a), Literal::Int(b)]) => Literal::Int(
                a.checked_mul(*b)
                    .ok_or(RuntimeError::IntegerOverflow { op: self.name() })?,
            ),
            (BuiltinOp::StrConcat, [Literal::Str(a), Literal::Str(b)]) => {
                Literal::Str(format!("{a}{b}"))
            }
            _ => {
                let args = args
                    .iter()
                    .map(Literal::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(RuntimeError::Stuck {
                    term: format!("{}({args})", self.name()),
                });
            }
        };
        Ok(result)
    }
}

impl Display for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
