//! The typed core language.
//!
//! The checker elaborates surface syntax into these terms: names are
//! resolved, type aliases are expanded, annotations are semantic [`Type`]s
//! and source positions are gone. The evaluator only ever sees core terms.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use crate::{builtins::BuiltinOp, prob, types::Type};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
    Prob(f64),
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Str(s) => write!(f, "\"{s}\""),
            Literal::Prob(p) => write!(f, "{}", prob::render(*p)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(String),
    Lit(Literal),
    Lam {
        param: String,
        ty: Type,
        body: Box<Term>,
    },
    App(Box<Term>, Box<Term>),
    TyLam {
        var: String,
        body: Box<Term>,
    },
    TyApp(Box<Term>, Type),
    Let {
        name: String,
        bound: Box<Term>,
        body: Box<Term>,
    },
    Record(Vec<(String, Term)>),
    Project(Box<Term>, String),
    Fuzzy {
        value: Box<Term>,
        confidence: Box<Term>,
    },
    FuzzyValue(Box<Term>),
    FuzzyConfidence(Box<Term>),
    FuzzyMap {
        func: Box<Term>,
        arg: Box<Term>,
    },
    FuzzyBind {
        arg: Box<Term>,
        func: Box<Term>,
    },
    FuzzyCombine {
        op: Box<Term>,
        left: Box<Term>,
        right: Box<Term>,
    },
    Builtin(BuiltinOp),
    /// Opaque evidence for a postulated proposition. Applying evidence of an
    /// implication yields evidence of its conclusion.
    Evidence(Type),
}

impl Term {
    pub fn app(func: Term, arg: Term) -> Term {
        Term::App(Box::new(func), Box::new(arg))
    }

    pub fn prob(p: f64) -> Term {
        Term::Lit(Literal::Prob(p))
    }

    pub fn fuzzy(value: Term, confidence: Term) -> Term {
        Term::Fuzzy {
            value: Box::new(value),
            confidence: Box::new(confidence),
        }
    }

    /// `self[var := value]`. Reduction only substitutes closed values, so no
    /// renaming is needed; substitution stops at binders that shadow `var`.
    pub fn subst(&self, var: &str, value: &Term) -> Term {
        let go = |t: &Term| Box::new(t.subst(var, value));
        match self {
            Term::Var(name) if name == var => value.clone(),
            Term::Var(_) | Term::Lit(_) | Term::Builtin(_) | Term::Evidence(_) => self.clone(),
            Term::Lam { param, ty, body } => Term::Lam {
                param: param.clone(),
                ty: ty.clone(),
                body: if param == var { body.clone() } else { go(body) },
            },
            Term::App(func, arg) => Term::App(go(func), go(arg)),
            Term::TyLam { var: tv, body } => Term::TyLam {
                var: tv.clone(),
                body: go(body),
            },
            Term::TyApp(term, ty) => Term::TyApp(go(term), ty.clone()),
            Term::Let { name, bound, body } => Term::Let {
                name: name.clone(),
                bound: go(bound),
                body: if name == var { body.clone() } else { go(body) },
            },
            Term::Record(fields) => Term::Record(
                fields
                    .iter()
                    .map(|(name, t)| (name.clone(), t.subst(var, value)))
                    .collect(),
            ),
            Term::Project(term, field) => Term::Project(go(term), field.clone()),
            Term::Fuzzy { value: v, confidence } => Term::Fuzzy {
                value: go(v),
                confidence: go(confidence),
            },
            Term::FuzzyValue(term) => Term::FuzzyValue(go(term)),
            Term::FuzzyConfidence(term) => Term::FuzzyConfidence(go(term)),
            Term::FuzzyMap { func, arg } => Term::FuzzyMap {
                func: go(func),
                arg: go(arg),
            },
            Term::FuzzyBind { arg, func } => Term::FuzzyBind {
                arg: go(arg),
                func: go(func),
            },
            Term::FuzzyCombine { op, left, right } => Term::FuzzyCombine {
                op: go(op),
                left: go(left),
                right: go(right),
            },
        }
    }

    /// `self[var := ty]` for a type variable bound by a type abstraction.
    pub fn subst_type(&self, var: &str, ty: &Type) -> Term {
        let go = |t: &Term| Box::new(t.subst_type(var, ty));
        match self {
            Term::Var(_) | Term::Lit(_) | Term::Builtin(_) => self.clone(),
            Term::Evidence(prop) => Term::Evidence(prop.subst(var, ty)),
            Term::Lam {
                param,
                ty: param_ty,
                body,
            } => Term::Lam {
                param: param.clone(),
                ty: param_ty.subst(var, ty),
                body: go(body),
            },
            Term::App(func, arg) => Term::App(go(func), go(arg)),
            Term::TyLam { var: tv, body } => Term::TyLam {
                var: tv.clone(),
                body: if tv == var { body.clone() } else { go(body) },
            },
            Term::TyApp(term, arg) => Term::TyApp(go(term), arg.subst(var, ty)),
            Term::Let { name, bound, body } => Term::Let {
                name: name.clone(),
                bound: go(bound),
                body: go(body),
            },
            Term::Record(fields) => Term::Record(
                fields
                    .iter()
                    .map(|(name, t)| (name.clone(), t.subst_type(var, ty)))
                    .collect(),
            ),
            Term::Project(term, field) => Term::Project(go(term), field.clone()),
            Term::Fuzzy { value, confidence } => Term::Fuzzy {
                value: go(value),
                confidence: go(confidence),
            },
            Term::FuzzyValue(term) => Term::FuzzyValue(go(term)),
            Term::FuzzyConfidence(term) => Term::FuzzyConfidence(go(term)),
            Term::FuzzyMap { func, arg } => Term::FuzzyMap {
                func: go(func),
                arg: go(arg),
            },
            Term::FuzzyBind { arg, func } => Term::FuzzyBind {
                arg: go(arg),
                func: go(func),
            },
            Term::FuzzyCombine { op, left, right } => Term::FuzzyCombine {
                op: go(op),
                left: go(left),
                right: go(right),
            },
        }
    }

    /// Re-synthesizes the type of a closed core term.
    ///
    /// Core terms carry every annotation they need, so this is a plain
    /// bottom-up pass with no expected types. It is the independent check
    /// behind the preservation audit.
    pub fn type_of(&self) -> Option<Type> {
        type_infer(&mut Vec::new(), self)
    }
}

type Scope = Vec<(String, Type)>;

fn type_infer(scope: &mut Scope, term: &Term) -> Option<Type> {
    match term {
        Term::Var(name) => scope
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, ty)| ty.clone()),
        Term::Lit(Literal::Int(_)) => Some(Type::Int),
        Term::Lit(Literal::Bool(_)) => Some(Type::Bool),
        Term::Lit(Literal::Str(_)) => Some(Type::Str),
        Term::Lit(Literal::Prob(p)) => prob::Prob::new(*p).ok().map(|_| Type::Prob),
        Term::Lam { param, ty, body } => {
            scope.push((param.clone(), ty.clone()));
            let body_ty = type_infer(scope, body);
            scope.pop();
            Some(Type::arrow(ty.clone(), body_ty?))
        }
        Term::App(func, arg) => {
            let Type::Arrow(domain, codomain) = type_infer(scope, func)? else {
                return None;
            };
            let arg_ty = type_infer(scope, arg)?;
            domain.alpha_eq(&arg_ty).then_some(*codomain)
        }
        Term::TyLam { var, body } => {
            Some(Type::Forall(var.clone(), Box::new(type_infer(scope, body)?)))
        }
        Term::TyApp(term, arg) => {
            let Type::Forall(var, body) = type_infer(scope, term)? else {
                return None;
            };
            Some(body.subst(&var, arg))
        }
        Term::Let { name, bound, body } => {
            let bound_ty = type_infer(scope, bound)?;
            scope.push((name.clone(), bound_ty));
            let body_ty = type_infer(scope, body);
            scope.pop();
            body_ty
        }
        Term::Record(fields) => {
            let mut types = BTreeMap::new();
            for (name, field) in fields {
                if types.insert(name.clone(), type_infer(scope, field)?).is_some() {
                    return None;
                }
            }
            Some(Type::Record(types))
        }
        Term::Project(term, field) => match type_infer(scope, term)? {
            Type::Record(mut fields) => fields.remove(field),
            _ => None,
        },
        Term::Fuzzy { value, confidence } => {
            let value_ty = type_infer(scope, value)?;
            let confidence_ty = type_infer(scope, confidence)?;
            (confidence_ty == Type::Prob).then(|| Type::fuzzy(value_ty))
        }
        Term::FuzzyValue(term) => match type_infer(scope, term)? {
            Type::Fuzzy(inner) => Some(*inner),
            _ => None,
        },
        Term::FuzzyConfidence(term) => match type_infer(scope, term)? {
            Type::Fuzzy(_) => Some(Type::Prob),
            _ => None,
        },
        Term::FuzzyMap { func, arg } => {
            let Type::Arrow(domain, codomain) = type_infer(scope, func)? else {
                return None;
            };
            let Type::Fuzzy(inner) = type_infer(scope, arg)? else {
                return None;
            };
            domain.alpha_eq(&inner).then(|| Type::Fuzzy(codomain))
        }
        Term::FuzzyBind { arg, func } => {
            let Type::Fuzzy(inner) = type_infer(scope, arg)? else {
                return None;
            };
            let Type::Arrow(domain, codomain) = type_infer(scope, func)? else {
                return None;
            };
            let Type::Fuzzy(_) = *codomain else {
                return None;
            };
            domain.alpha_eq(&inner).then_some(*codomain)
        }
        Term::FuzzyCombine { op, left, right } => {
            let Type::Arrow(first, rest) = type_infer(scope, op)? else {
                return None;
            };
            let Type::Arrow(second, result) = *rest else {
                return None;
            };
            let Type::Fuzzy(left_ty) = type_infer(scope, left)? else {
                return None;
            };
            let Type::Fuzzy(right_ty) = type_infer(scope, right)? else {
                return None;
            };
            (first.alpha_eq(&left_ty) && second.alpha_eq(&right_ty)).then(|| Type::Fuzzy(result))
        }
        Term::Builtin(op) => Some(op.signature()),
        Term::Evidence(prop) => Some(prop.clone()),
    }
}

/// Renders in surface syntax; everything except evidence parses back.
impl Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) => write!(f, "{name}"),
            Term::Lit(lit) => write!(f, "{lit}"),
            Term::Lam { param, ty, body } => write!(f, "fun ({param}: {ty}) => {body}"),
            Term::App(func, arg) => {
                write_head(f, func)?;
                write!(f, "({arg})")
            }
            Term::TyLam { var, body } => write!(f, "fun ({var}: Type) => {body}"),
            Term::TyApp(term, ty) => {
                write_head(f, term)?;
                write!(f, "[{ty}]")
            }
            Term::Let { name, bound, body } => write!(f, "let {name} = {bound} in {body}"),
            Term::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, term)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name} = {term}")?;
                }
                if fields.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
            Term::Project(term, field) => {
                write_head(f, term)?;
                write!(f, ".{field}")
            }
            Term::Fuzzy { value, confidence } => write!(f, "fuzzy({value}, {confidence})"),
            Term::FuzzyValue(term) => {
                write_head(f, term)?;
                write!(f, ".value")
            }
            Term::FuzzyConfidence(term) => {
                write_head(f, term)?;
                write!(f, ".confidence")
            }
            Term::FuzzyMap { func, arg } => write!(f, "fuzzy_map({func}, {arg})"),
            Term::FuzzyBind { arg, func } => write!(f, "fuzzy_bind({arg}, {func})"),
            Term::FuzzyCombine { op, left, right } => {
                write!(f, "fuzzy_combine({op}, {left}, {right})")
            }
            Term::Builtin(op) => write!(f, "{op}"),
            Term::Evidence(prop) => write!(f, "<evidence of {prop}>"),
        }
    }
}

fn write_head(f: &mut fmt::Formatter<'_>, term: &Term) -> fmt::Result {
    match term {
        Term::Lam { .. } | Term::TyLam { .. } | Term::Let { .. } => write!(f, "({term})"),
        _ => write!(f, "{term}"),
    }
}
