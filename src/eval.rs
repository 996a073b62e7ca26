use std::fmt::{self, Display};

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    builtins::BuiltinOp,
    prob::{self, Prob, ProbError},
    term::{Literal, Term},
    types::Type,
};

pub const DEFAULT_STEP_BUDGET: u64 = 1_000_000;

/// Bound by `fuzzy_bind` while the continuation's result is unpacked. Not a
/// valid identifier, so it never clashes with a program variable.
const BOUND: &str = "%bound";

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("evaluation exceeded the step budget of {budget}")]
    #[diagnostic(
        code(biokernel::eval::step_budget),
        help("raise the limit with `--step-budget`")
    )]
    StepBudgetExceeded { budget: u64 },

    #[error("probability arithmetic broke its invariant: {0}")]
    #[diagnostic(code(biokernel::eval::arithmetic))]
    Arithmetic(#[from] ProbError),

    #[error("integer overflow in `{op}`")]
    #[diagnostic(code(biokernel::eval::overflow))]
    IntegerOverflow { op: &'static str },

    #[error("no reduction applies to `{term}`")]
    #[diagnostic(code(biokernel::eval::stuck))]
    Stuck { term: String },

    #[error("reduction changed the program's type from `{before}` to `{after}`")]
    #[diagnostic(code(biokernel::eval::preservation))]
    PreservationViolated { before: String, after: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Reductions allowed before evaluation gives up.
    pub step_budget: u64,
    /// Re-synthesize the type after every step.
    pub audit_preservation: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            step_budget: DEFAULT_STEP_BUDGET,
            audit_preservation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Value,
    Next(Term),
}

/// Splits `op(a1)...(an)` into the operator and its arguments.
fn builtin_spine(term: &Term) -> Option<(BuiltinOp, Vec<&Term>)> {
    match term {
        Term::Builtin(op) => Some((*op, Vec::new())),
        Term::App(func, arg) => {
            let (op, mut args) = builtin_spine(func)?;
            args.push(arg);
            Some((op, args))
        }
        _ => None,
    }
}

pub fn is_value(term: &Term) -> bool {
    match term {
        Term::Lit(_) | Term::Lam { .. } | Term::TyLam { .. } | Term::Builtin(_) | Term::Evidence(_) => {
            true
        }
        Term::Record(fields) => fields.iter().all(|(_, field)| is_value(field)),
        Term::Fuzzy { value, confidence } => is_value(value) && is_value(confidence),
        Term::App(..) => builtin_spine(term)
            .is_some_and(|(op, args)| args.len() < op.arity() && args.into_iter().all(is_value)),
        _ => false,
    }
}

fn stuck(term: &Term) -> RuntimeError {
    RuntimeError::Stuck {
        term: term.to_string(),
    }
}

fn prob_literal(term: &Term) -> Result<Prob, RuntimeError> {
    match term {
        Term::Lit(Literal::Prob(p)) => Ok(Prob::new(*p)?),
        _ => Err(stuck(term)),
    }
}

/// One call-by-value reduction step, leftmost subterm first.
pub fn step(term: &Term) -> Result<Step, RuntimeError> {
    if is_value(term) {
        return Ok(Step::Value);
    }
    // Reduces the first non-value subterm and rebuilds the node around it.
    macro_rules! congruence {
        ($sub:expr, $rebuild:expr) => {
            if !is_value($sub) {
                let Step::Next(next) = step($sub)? else {
                    return Err(stuck(term));
                };
                return Ok(Step::Next($rebuild(Box::new(next))));
            }
        };
    }

    let next = match term {
        Term::App(func, arg) => {
            congruence!(func, |func| Term::App(func, arg.clone()));
            congruence!(arg, |arg| Term::App(func.clone(), arg));
            match &**func {
                Term::Lam { param, body, .. } => body.subst(param, arg),
                Term::Evidence(Type::Arrow(_, conclusion)) => Term::Evidence(*conclusion.clone()),
                _ => {
                    let (op, args) = builtin_spine(term).ok_or_else(|| stuck(term))?;
                    let literals = args
                        .into_iter()
                        .map(|arg| match arg {
                            Term::Lit(lit) => Ok(lit.clone()),
                            _ => Err(stuck(term)),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Term::Lit(op.apply(&literals)?)
                }
            }
        }
        Term::TyApp(inner, ty) => {
            congruence!(inner, |inner| Term::TyApp(inner, ty.clone()));
            match &**inner {
                Term::TyLam { var, body } => body.subst_type(var, ty),
                Term::Evidence(Type::Forall(var, body)) => Term::Evidence(body.subst(var, ty)),
                _ => return Err(stuck(term)),
            }
        }
        Term::Let { name, bound, body } => {
            congruence!(bound, |bound| Term::Let {
                name: name.clone(),
                bound,
                body: body.clone(),
            });
            body.subst(name, bound)
        }
        Term::Record(fields) => {
            let index = fields
                .iter()
                .position(|(_, field)| !is_value(field))
                .ok_or_else(|| stuck(term))?;
            let Step::Next(next) = step(&fields[index].1)? else {
                return Err(stuck(term));
            };
            let mut fields = fields.clone();
            fields[index].1 = next;
            Term::Record(fields)
        }
        Term::Project(inner, field) => {
            congruence!(inner, |inner| Term::Project(inner, field.clone()));
            match &**inner {
                Term::Record(fields) => fields
                    .iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| stuck(term))?,
                _ => return Err(stuck(term)),
            }
        }
        Term::Fuzzy { value, confidence } => {
            congruence!(value, |value| Term::Fuzzy {
                value,
                confidence: confidence.clone(),
            });
            congruence!(confidence, |confidence| Term::Fuzzy {
                value: value.clone(),
                confidence,
            });
            return Err(stuck(term));
        }
        Term::FuzzyValue(inner) => {
            congruence!(inner, Term::FuzzyValue);
            match &**inner {
                Term::Fuzzy { value, .. } => (**value).clone(),
                _ => return Err(stuck(term)),
            }
        }
        Term::FuzzyConfidence(inner) => {
            congruence!(inner, Term::FuzzyConfidence);
            match &**inner {
                Term::Fuzzy { confidence, .. } => (**confidence).clone(),
                _ => return Err(stuck(term)),
            }
        }
        Term::FuzzyMap { func, arg } => {
            congruence!(func, |func| Term::FuzzyMap {
                func,
                arg: arg.clone(),
            });
            congruence!(arg, |arg| Term::FuzzyMap {
                func: func.clone(),
                arg,
            });
            match &**arg {
                Term::Fuzzy { value, confidence } => Term::Fuzzy {
                    value: Box::new(Term::App(func.clone(), value.clone())),
                    confidence: confidence.clone(),
                },
                _ => return Err(stuck(term)),
            }
        }
        Term::FuzzyBind { arg, func } => {
            congruence!(arg, |arg| Term::FuzzyBind {
                arg,
                func: func.clone(),
            });
            congruence!(func, |func| Term::FuzzyBind {
                arg: arg.clone(),
                func,
            });
            match &**arg {
                Term::Fuzzy { value, confidence } => {
                    let bound = || Box::new(Term::Var(BOUND.to_string()));
                    Term::Let {
                        name: BOUND.to_string(),
                        bound: Box::new(Term::App(func.clone(), value.clone())),
                        body: Box::new(Term::fuzzy(
                            Term::FuzzyValue(bound()),
                            Term::app(
                                Term::app(Term::Builtin(BuiltinOp::ProbMul), (**confidence).clone()),
                                Term::FuzzyConfidence(bound()),
                            ),
                        )),
                    }
                }
                _ => return Err(stuck(term)),
            }
        }
        Term::FuzzyCombine { op, left, right } => {
            congruence!(op, |op| Term::FuzzyCombine {
                op,
                left: left.clone(),
                right: right.clone(),
            });
            congruence!(left, |left| Term::FuzzyCombine {
                op: op.clone(),
                left,
                right: right.clone(),
            });
            congruence!(right, |right| Term::FuzzyCombine {
                op: op.clone(),
                left: left.clone(),
                right,
            });
            match (&**left, &**right) {
                (
                    Term::Fuzzy {
                        value: v1,
                        confidence: c1,
                    },
                    Term::Fuzzy {
                        value: v2,
                        confidence: c2,
                    },
                ) => {
                    let confidence = prob::confidence_combine(prob_literal(c1)?, prob_literal(c2)?);
                    Term::fuzzy(
                        Term::App(Box::new(Term::App(op.clone(), v1.clone())), v2.clone()),
                        Term::prob(confidence.value()),
                    )
                }
                _ => return Err(stuck(term)),
            }
        }
        Term::Var(_) | Term::Lit(_) | Term::Lam { .. } | Term::TyLam { .. } | Term::Builtin(_)
        | Term::Evidence(_) => return Err(stuck(term)),
    };
    Ok(Step::Next(next))
}

/// The sequence of terms a closed term reduces through.
pub struct Reduction {
    current: Option<Term>,
}

impl Reduction {
    pub fn new(term: Term) -> Self {
        Reduction {
            current: Some(term),
        }
    }
}

impl Iterator for Reduction {
    type Item = Result<Term, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let term = self.current.take()?;
        match step(&term) {
            Ok(Step::Value) => None,
            Ok(Step::Next(next)) => {
                self.current = Some(next.clone());
                Some(Ok(next))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Evaluator { config }
    }

    /// Reduces a closed term of type `ty` to a value.
    pub fn evaluate(&self, term: &Term, ty: &Type) -> Result<Value, RuntimeError> {
        let mut current = term.clone();
        let mut steps = 0;
        for next in Reduction::new(term.clone()) {
            let next = next?;
            steps += 1;
            if steps > self.config.step_budget {
                return Err(RuntimeError::StepBudgetExceeded {
                    budget: self.config.step_budget,
                });
            }
            trace!(step = steps, term = %next, "reduced");
            if self.config.audit_preservation {
                match next.type_of() {
                    Some(after) if after.alpha_eq(ty) => {}
                    after => {
                        return Err(RuntimeError::PreservationViolated {
                            before: ty.to_string(),
                            after: after.map_or_else(|| "an ill-typed term".to_string(), |t| t.to_string()),
                        });
                    }
                }
            }
            current = next;
        }
        debug!(steps, "evaluation finished");
        Value::from_term(&current)
    }
}

/// A fully evaluated program result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Prob(Prob),
    Record(Vec<(String, Value)>),
    Fuzzy {
        value: Box<Value>,
        confidence: Prob,
    },
    /// The environment is empty: reduction substitutes closed values.
    Closure {
        param: String,
        param_ty: Type,
        body: Term,
    },
    TyClosure {
        var: String,
        body: Term,
    },
    /// A built-in applied to fewer arguments than its arity.
    Builtin {
        op: BuiltinOp,
        args: Vec<Value>,
    },
    Evidence(Type),
}

impl Value {
    pub fn from_term(term: &Term) -> Result<Value, RuntimeError> {
        Ok(match term {
            Term::Lit(Literal::Int(n)) => Value::Int(*n),
            Term::Lit(Literal::Bool(b)) => Value::Bool(*b),
            Term::Lit(Literal::Str(s)) => Value::Str(s.clone()),
            Term::Lit(Literal::Prob(_)) => Value::Prob(prob_literal(term)?),
            Term::Record(fields) => Value::Record(
                fields
                    .iter()
                    .map(|(name, field)| -> Result<_, RuntimeError> {
                        Ok((name.clone(), Value::from_term(field)?))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Term::Fuzzy { value, confidence } => Value::Fuzzy {
                value: Box::new(Value::from_term(value)?),
                confidence: prob_literal(confidence)?,
            },
            Term::Lam { param, ty, body } => Value::Closure {
                param: param.clone(),
                param_ty: ty.clone(),
                body: (**body).clone(),
            },
            Term::TyLam { var, body } => Value::TyClosure {
                var: var.clone(),
                body: (**body).clone(),
            },
            Term::Evidence(prop) => Value::Evidence(prop.clone()),
            _ => match builtin_spine(term) {
                Some((op, args)) if args.len() < op.arity() => Value::Builtin {
                    op,
                    args: args
                        .into_iter()
                        .map(Value::from_term)
                        .collect::<Result<_, _>>()?,
                },
                _ => return Err(stuck(term)),
            },
        })
    }

    pub fn confidence(&self) -> Option<Prob> {
        match self {
            Value::Fuzzy { confidence, .. } => Some(*confidence),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Prob(p) => write!(f, "{p}"),
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name} = {value}")?;
                }
                if fields.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
            Value::Fuzzy { value, confidence } => write!(f, "fuzzy({value}, {confidence})"),
            Value::Closure {
                param,
                param_ty,
                body,
            } => write!(f, "fun ({param}: {param_ty}) => {body}"),
            Value::TyClosure { var, body } => write!(f, "fun ({var}: Type) => {body}"),
            Value::Builtin { op, args } => {
                write!(f, "{op}")?;
                if !args.is_empty() {
                    let args = args.iter().map(Value::to_string).collect::<Vec<_>>();
                    write!(f, "({})", args.join(", "))?;
                }
                Ok(())
            }
            Value::Evidence(prop) => write!(f, "<evidence of {prop}>"),
        }
    }
}
