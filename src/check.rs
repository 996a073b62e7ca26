//! Bidirectional type checking and elaboration.
//!
//! [`infer`] and [`check`] walk the surface AST and, on success, produce the
//! typed core [`Term`] the evaluator runs. Each expression fails fast on its
//! first error; [`check_program`] collects errors across declarations.

use std::{
    collections::{BTreeMap, HashSet},
    rc::Rc,
    sync::LazyLock,
};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;
use tracing::debug;

use crate::{
    builtins::BuiltinOp,
    parse::{Decl, Expr, ExprKind, Param, SourceProgram, TypeExpr, TypeExprKind, join},
    prob::Prob,
    term::{Literal, Term},
    types::{self, Sort, Type},
};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum TypeError {
    #[error("unbound variable `{name}`")]
    #[diagnostic(code(biokernel::check::unbound_variable))]
    UnboundVariable {
        name: String,
        #[label("not found in this scope")]
        span: SourceSpan,
    },

    #[error("expected `{expected}`, found `{found}`")]
    #[diagnostic(code(biokernel::check::type_mismatch))]
    TypeMismatch {
        expected: Type,
        found: Type,
        #[label("this has type `{found}`")]
        span: SourceSpan,
    },

    #[error("probability literal {value} lies outside [0, 1]")]
    #[diagnostic(code(biokernel::check::prob_out_of_range))]
    ProbOutOfRange {
        value: f64,
        #[label("not a probability")]
        span: SourceSpan,
    },

    #[error("`{found}` is not a function")]
    #[diagnostic(code(biokernel::check::not_a_function))]
    NotAFunction {
        found: Type,
        #[label("applied here")]
        span: SourceSpan,
    },

    #[error("`{found}` cannot be applied to a type")]
    #[diagnostic(code(biokernel::check::not_polymorphic))]
    NotPolymorphic {
        found: Type,
        #[label("not a `forall` type")]
        span: SourceSpan,
    },

    #[error("no field `{field}` on `{ty}`")]
    #[diagnostic(code(biokernel::check::no_such_field))]
    NoSuchField {
        field: String,
        ty: Type,
        #[label("unknown field")]
        span: SourceSpan,
    },

    #[error("`{found}` is not a record")]
    #[diagnostic(code(biokernel::check::not_a_record))]
    NotARecord {
        found: Type,
        #[label("projected here")]
        span: SourceSpan,
    },

    #[error("`{found}` is not a fuzzy value")]
    #[diagnostic(
        code(biokernel::check::not_fuzzy),
        help("wrap it with `fuzzy(value, confidence)`")
    )]
    NotFuzzy {
        found: Type,
        #[label("expected `Fuzzy<_>`")]
        span: SourceSpan,
    },

    #[error("unknown type `{name}`")]
    #[diagnostic(code(biokernel::check::unknown_type))]
    UnknownType {
        name: String,
        #[label("not a type")]
        span: SourceSpan,
    },

    #[error("field `{field}` is given more than once")]
    #[diagnostic(code(biokernel::check::duplicate_field))]
    DuplicateField {
        field: String,
        #[label("duplicate")]
        span: SourceSpan,
    },

    #[error("`{name}` is already defined")]
    #[diagnostic(code(biokernel::check::duplicate_declaration))]
    DuplicateDeclaration {
        name: String,
        #[label("redeclared here")]
        span: SourceSpan,
    },

    #[error("`{what}` is not a runtime value")]
    #[diagnostic(code(biokernel::check::sort_in_value_position))]
    SortInValuePosition {
        what: String,
        #[label("used as a value")]
        span: SourceSpan,
    },

    #[error("the sort `{sort}` cannot be used as a type")]
    #[diagnostic(
        code(biokernel::check::misplaced_sort),
        help("only a type parameter may be annotated with `Type`")
    )]
    MisplacedSort {
        sort: Sort,
        #[label("sort used here")]
        span: SourceSpan,
    },

    #[error("expected a {expected}, found a {found}")]
    #[diagnostic(code(biokernel::check::sort_mismatch))]
    SortMismatch {
        expected: Sort,
        found: Sort,
        #[label("this is a {found}")]
        span: SourceSpan,
    },

    /// A reference to a declaration that was already rejected. Never
    /// reported: the original error covers it.
    #[error("`{name}` refers to a rejected declaration")]
    #[diagnostic(code(biokernel::check::rejected_dependency))]
    RejectedDependency {
        name: String,
        #[label]
        span: SourceSpan,
    },
}

impl TypeError {
    pub fn span(&self) -> SourceSpan {
        match self {
            TypeError::UnboundVariable { span, .. }
            | TypeError::TypeMismatch { span, .. }
            | TypeError::ProbOutOfRange { span, .. }
            | TypeError::NotAFunction { span, .. }
            | TypeError::NotPolymorphic { span, .. }
            | TypeError::NoSuchField { span, .. }
            | TypeError::NotARecord { span, .. }
            | TypeError::NotFuzzy { span, .. }
            | TypeError::UnknownType { span, .. }
            | TypeError::DuplicateField { span, .. }
            | TypeError::DuplicateDeclaration { span, .. }
            | TypeError::SortInValuePosition { span, .. }
            | TypeError::MisplacedSort { span, .. }
            | TypeError::SortMismatch { span, .. }
            | TypeError::RejectedDependency { span, .. } => *span,
        }
    }
}

/// All type errors of one program, rendered against its source.
#[derive(Error, Debug, Diagnostic)]
#[error("program rejected with {} type error(s)", .errors.len())]
#[diagnostic(code(biokernel::check))]
pub struct TypeErrors {
    #[source_code]
    src: NamedSource<String>,

    #[related]
    pub errors: Vec<TypeError>,
}

impl TypeErrors {
    pub fn new(src: NamedSource<String>, errors: Vec<TypeError>) -> Self {
        TypeErrors { src, errors }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A term variable of the given type.
    Local(Type),
    Builtin(BuiltinOp),
    /// A transparent type alias.
    Alias(Type),
    /// A proposition constant.
    Prop,
    /// A type variable bound by a type abstraction or `forall`, under the
    /// name it carries in core types.
    TypeVar(String),
    /// A declaration that failed to check and has no signature.
    Rejected,
}

/// Built-in operators. Built once, read-only afterwards.
static BASE: LazyLock<BTreeMap<String, Binding>> = LazyLock::new(|| {
    BuiltinOp::ALL
        .into_iter()
        .map(|op| (op.name().to_string(), Binding::Builtin(op)))
        .collect()
});

struct Scope {
    name: String,
    binding: Binding,
    parent: Option<Rc<Scope>>,
}

/// The typing context Γ: a persistent list of bindings over the base
/// environment. Extending a context never changes the original.
#[derive(Clone, Default)]
pub struct Context {
    scope: Option<Rc<Scope>>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn extend(&self, name: &str, binding: Binding) -> Context {
        Context {
            scope: Some(Rc::new(Scope {
                name: name.to_string(),
                binding,
                parent: self.scope.clone(),
            })),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        let mut scope = self.scope.as_deref();
        while let Some(s) = scope {
            if s.name == name {
                return Some(&s.binding);
            }
            scope = s.parent.as_deref();
        }
        BASE.get(name)
    }

    /// Binds the type parameter written `name`. It keeps that name in core
    /// types unless an enclosing type variable already uses it, shadowed or
    /// not, in which case it gets a fresh primed name.
    pub fn bind_type_var(&self, name: &str) -> (Context, String) {
        let var = if self.uses_type_var(name) {
            types::fresh_name(name, |candidate| self.uses_type_var(candidate))
        } else {
            name.to_string()
        };
        (self.extend(name, Binding::TypeVar(var.clone())), var)
    }

    fn uses_type_var(&self, var: &str) -> bool {
        let mut scope = self.scope.as_deref();
        while let Some(s) = scope {
            if matches!(&s.binding, Binding::TypeVar(v) if v == var) {
                return true;
            }
            scope = s.parent.as_deref();
        }
        false
    }
}

/// Resolves a written type to a semantic one, expanding aliases.
pub fn resolve_type(ctx: &Context, te: &TypeExpr) -> Result<Type, TypeError> {
    match &te.kind {
        TypeExprKind::Sort(sort) => Err(TypeError::MisplacedSort {
            sort: *sort,
            span: te.span,
        }),
        TypeExprKind::Prob => Ok(Type::Prob),
        TypeExprKind::Int => Ok(Type::Int),
        TypeExprKind::Bool => Ok(Type::Bool),
        TypeExprKind::Str => Ok(Type::Str),
        TypeExprKind::Named(name) => match ctx.lookup(name) {
            Some(Binding::TypeVar(var)) => Ok(Type::Var(var.clone())),
            Some(Binding::Alias(ty)) => Ok(ty.clone()),
            Some(Binding::Prop) => Ok(Type::Prop(name.clone())),
            Some(Binding::Rejected) => Err(TypeError::RejectedDependency {
                name: name.clone(),
                span: te.span,
            }),
            Some(Binding::Local(_) | Binding::Builtin(_)) | None => Err(TypeError::UnknownType {
                name: name.clone(),
                span: te.span,
            }),
        },
        TypeExprKind::Arrow(domain, codomain) => Ok(Type::arrow(
            resolve_type(ctx, domain)?,
            resolve_type(ctx, codomain)?,
        )),
        TypeExprKind::Record(fields) => {
            let mut types = BTreeMap::new();
            for (name, field) in fields {
                let ty = resolve_sorted(ctx, field, Sort::Type)?;
                if types.insert(name.clone(), ty).is_some() {
                    return Err(TypeError::DuplicateField {
                        field: name.clone(),
                        span: field.span,
                    });
                }
            }
            Ok(Type::Record(types))
        }
        TypeExprKind::Fuzzy(inner) => Ok(Type::fuzzy(resolve_sorted(ctx, inner, Sort::Type)?)),
        TypeExprKind::Forall(var, body) => {
            let inner = ctx.extend(var, Binding::TypeVar(var.clone()));
            Ok(Type::Forall(
                var.clone(),
                Box::new(resolve_type(&inner, body)?),
            ))
        }
    }
}

fn resolve_sorted(ctx: &Context, te: &TypeExpr, sort: Sort) -> Result<Type, TypeError> {
    let ty = resolve_type(ctx, te)?;
    require_sort(&ty, sort, te.span)?;
    Ok(ty)
}

fn require_sort(ty: &Type, expected: Sort, span: SourceSpan) -> Result<(), TypeError> {
    let found = ty.sort();
    if found == expected {
        Ok(())
    } else {
        Err(TypeError::SortMismatch {
            expected,
            found,
            span,
        })
    }
}

fn mismatch(expected: &Type, found: &Type, span: SourceSpan) -> TypeError {
    TypeError::TypeMismatch {
        expected: expected.clone(),
        found: found.clone(),
        span,
    }
}

fn is_type_sort(param_ty: &TypeExpr) -> bool {
    matches!(param_ty.kind, TypeExprKind::Sort(Sort::Type))
}

/// Synthesizes the type of `expr`.
pub fn infer(ctx: &Context, expr: &Expr) -> Result<(Term, Type), TypeError> {
    match &expr.kind {
        ExprKind::Var(name) => match ctx.lookup(name) {
            Some(Binding::Local(ty)) => Ok((Term::Var(name.clone()), ty.clone())),
            Some(Binding::Builtin(op)) => Ok((Term::Builtin(*op), op.signature())),
            Some(Binding::Alias(_) | Binding::Prop | Binding::TypeVar(_)) => {
                Err(TypeError::SortInValuePosition {
                    what: name.clone(),
                    span: expr.span,
                })
            }
            Some(Binding::Rejected) => Err(TypeError::RejectedDependency {
                name: name.clone(),
                span: expr.span,
            }),
            None => Err(TypeError::UnboundVariable {
                name: name.clone(),
                span: expr.span,
            }),
        },
        ExprKind::Int(n) => Ok((Term::Lit(Literal::Int(*n)), Type::Int)),
        ExprKind::Bool(b) => Ok((Term::Lit(Literal::Bool(*b)), Type::Bool)),
        ExprKind::Str(s) => Ok((Term::Lit(Literal::Str(s.clone())), Type::Str)),
        ExprKind::Prob(p) => match Prob::new(*p) {
            Ok(p) => Ok((Term::prob(p.value()), Type::Prob)),
            Err(_) => Err(TypeError::ProbOutOfRange {
                value: *p,
                span: expr.span,
            }),
        },
        ExprKind::Lambda {
            param,
            param_ty,
            body,
        } => {
            if is_type_sort(param_ty) {
                let (inner, var) = ctx.bind_type_var(param);
                let (body, body_ty) = infer(&inner, body)?;
                return Ok((
                    Term::TyLam {
                        var: var.clone(),
                        body: Box::new(body),
                    },
                    Type::Forall(var, Box::new(body_ty)),
                ));
            }
            let ty = resolve_type(ctx, param_ty)?;
            let inner = ctx.extend(param, Binding::Local(ty.clone()));
            let (body, body_ty) = infer(&inner, body)?;
            Ok((
                Term::Lam {
                    param: param.clone(),
                    ty: ty.clone(),
                    body: Box::new(body),
                },
                Type::arrow(ty, body_ty),
            ))
        }
        ExprKind::App { func, arg } => {
            let (func_term, func_ty) = infer(ctx, func)?;
            let Type::Arrow(domain, codomain) = func_ty else {
                return Err(TypeError::NotAFunction {
                    found: func_ty,
                    span: func.span,
                });
            };
            let arg_term = check(ctx, arg, &domain)?;
            Ok((Term::app(func_term, arg_term), *codomain))
        }
        ExprKind::TyApp { expr: inner, ty } => {
            let (term, term_ty) = infer(ctx, inner)?;
            let Type::Forall(var, body) = term_ty else {
                return Err(TypeError::NotPolymorphic {
                    found: term_ty,
                    span: inner.span,
                });
            };
            let arg = resolve_sorted(ctx, ty, Sort::Type)?;
            let result = body.subst(&var, &arg);
            Ok((Term::TyApp(Box::new(term), arg), result))
        }
        ExprKind::Let {
            name,
            ty,
            bound,
            body,
        } => {
            let (bound, bound_ty) = elaborate_bound(ctx, ty.as_ref(), bound)?;
            let inner = ctx.extend(name, Binding::Local(bound_ty));
            let (body, body_ty) = infer(&inner, body)?;
            Ok((
                Term::Let {
                    name: name.clone(),
                    bound: Box::new(bound),
                    body: Box::new(body),
                },
                body_ty,
            ))
        }
        ExprKind::Ascribe { expr: inner, ty } => {
            let ty = resolve_type(ctx, ty)?;
            let term = check(ctx, inner, &ty)?;
            Ok((term, ty))
        }
        ExprKind::Record(fields) => {
            let mut seen = HashSet::new();
            let mut terms = Vec::with_capacity(fields.len());
            let mut types = BTreeMap::new();
            for field in fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(TypeError::DuplicateField {
                        field: field.name.clone(),
                        span: field.name_span,
                    });
                }
                let (term, ty) = infer(ctx, &field.value)?;
                require_sort(&ty, Sort::Type, field.value.span)?;
                terms.push((field.name.clone(), term));
                types.insert(field.name.clone(), ty);
            }
            Ok((Term::Record(terms), Type::Record(types)))
        }
        ExprKind::Project {
            expr: inner,
            field,
            field_span,
        } => {
            let (term, ty) = infer(ctx, inner)?;
            match ty {
                Type::Record(mut fields) => match fields.remove(field) {
                    Some(field_ty) => Ok((Term::Project(Box::new(term), field.clone()), field_ty)),
                    None => Err(TypeError::NoSuchField {
                        field: field.clone(),
                        ty: Type::Record(fields),
                        span: *field_span,
                    }),
                },
                Type::Fuzzy(value_ty) => match field.as_str() {
                    "value" => Ok((Term::FuzzyValue(Box::new(term)), *value_ty)),
                    "confidence" => Ok((Term::FuzzyConfidence(Box::new(term)), Type::Prob)),
                    _ => Err(TypeError::NoSuchField {
                        field: field.clone(),
                        ty: Type::Fuzzy(value_ty),
                        span: *field_span,
                    }),
                },
                found if field == "value" || field == "confidence" => Err(TypeError::NotFuzzy {
                    found,
                    span: inner.span,
                }),
                found => Err(TypeError::NotARecord {
                    found,
                    span: inner.span,
                }),
            }
        }
        ExprKind::Fuzzy { value, confidence } => {
            let (value_term, value_ty) = infer(ctx, value)?;
            require_sort(&value_ty, Sort::Type, value.span)?;
            let confidence = check(ctx, confidence, &Type::Prob)?;
            Ok((Term::fuzzy(value_term, confidence), Type::fuzzy(value_ty)))
        }
        ExprKind::FuzzyMap { func, arg } => {
            let (func_term, domain, codomain) = infer_function(ctx, func)?;
            let (arg_term, inner) = infer_fuzzy(ctx, arg)?;
            if !domain.alpha_eq(&inner) {
                return Err(mismatch(
                    &Type::fuzzy(domain),
                    &Type::fuzzy(inner),
                    arg.span,
                ));
            }
            require_sort(&codomain, Sort::Type, func.span)?;
            Ok((
                Term::FuzzyMap {
                    func: Box::new(func_term),
                    arg: Box::new(arg_term),
                },
                Type::fuzzy(codomain),
            ))
        }
        ExprKind::FuzzyBind { arg, func } => {
            let (arg_term, inner) = infer_fuzzy(ctx, arg)?;
            let (func_term, domain, codomain) = infer_function(ctx, func)?;
            if !domain.alpha_eq(&inner) {
                return Err(mismatch(
                    &Type::arrow(inner, codomain.clone()),
                    &Type::arrow(domain, codomain),
                    func.span,
                ));
            }
            if !matches!(codomain, Type::Fuzzy(_)) {
                return Err(TypeError::NotFuzzy {
                    found: codomain,
                    span: func.span,
                });
            }
            Ok((
                Term::FuzzyBind {
                    arg: Box::new(arg_term),
                    func: Box::new(func_term),
                },
                codomain,
            ))
        }
        ExprKind::FuzzyCombine { op, left, right } => {
            let (op_term, first, rest) = infer_function(ctx, op)?;
            let Type::Arrow(second, result) = rest else {
                return Err(TypeError::NotAFunction {
                    found: rest,
                    span: op.span,
                });
            };
            let (left_term, left_ty) = infer_fuzzy(ctx, left)?;
            if !first.alpha_eq(&left_ty) {
                return Err(mismatch(
                    &Type::fuzzy(first),
                    &Type::fuzzy(left_ty),
                    left.span,
                ));
            }
            let (right_term, right_ty) = infer_fuzzy(ctx, right)?;
            if !second.alpha_eq(&right_ty) {
                return Err(mismatch(
                    &Type::Fuzzy(second),
                    &Type::fuzzy(right_ty),
                    right.span,
                ));
            }
            require_sort(&result, Sort::Type, op.span)?;
            Ok((
                Term::FuzzyCombine {
                    op: Box::new(op_term),
                    left: Box::new(left_term),
                    right: Box::new(right_term),
                },
                Type::Fuzzy(result),
            ))
        }
        ExprKind::TypeLevel(ty) => Err(TypeError::SortInValuePosition {
            what: ty.to_string(),
            span: expr.span,
        }),
    }
}

/// Checks `expr` against `expected`, falling back to inference and
/// alpha-equivalence where no rule pushes the expected type inwards.
pub fn check(ctx: &Context, expr: &Expr, expected: &Type) -> Result<Term, TypeError> {
    match (&expr.kind, expected) {
        (
            ExprKind::Lambda {
                param,
                param_ty,
                body,
            },
            Type::Arrow(domain, codomain),
        ) if !is_type_sort(param_ty) => {
            let ty = resolve_type(ctx, param_ty)?;
            if !ty.alpha_eq(domain) {
                return Err(mismatch(domain, &ty, param_ty.span));
            }
            let inner = ctx.extend(param, Binding::Local(ty.clone()));
            let body = check(&inner, body, codomain)?;
            Ok(Term::Lam {
                param: param.clone(),
                ty,
                body: Box::new(body),
            })
        }
        (
            ExprKind::Lambda {
                param,
                param_ty,
                body,
            },
            Type::Forall(var, expected_body),
        ) if is_type_sort(param_ty) => {
            let (inner, fresh) = ctx.bind_type_var(param);
            let expected_body = expected_body.subst(var, &Type::Var(fresh.clone()));
            let body = check(&inner, body, &expected_body)?;
            Ok(Term::TyLam {
                var: fresh,
                body: Box::new(body),
            })
        }
        (
            ExprKind::Let {
                name,
                ty,
                bound,
                body,
            },
            _,
        ) => {
            let (bound, bound_ty) = elaborate_bound(ctx, ty.as_ref(), bound)?;
            let inner = ctx.extend(name, Binding::Local(bound_ty));
            let body = check(&inner, body, expected)?;
            Ok(Term::Let {
                name: name.clone(),
                bound: Box::new(bound),
                body: Box::new(body),
            })
        }
        (ExprKind::Fuzzy { value, confidence }, Type::Fuzzy(inner)) => {
            let value = check(ctx, value, inner)?;
            let confidence = check(ctx, confidence, &Type::Prob)?;
            Ok(Term::fuzzy(value, confidence))
        }
        _ => {
            let (term, found) = infer(ctx, expr)?;
            if found.alpha_eq(expected) {
                Ok(term)
            } else {
                Err(mismatch(expected, &found, expr.span))
            }
        }
    }
}

fn elaborate_bound(
    ctx: &Context,
    annotation: Option<&TypeExpr>,
    bound: &Expr,
) -> Result<(Term, Type), TypeError> {
    match annotation {
        Some(ty) => {
            let ty = resolve_type(ctx, ty)?;
            Ok((check(ctx, bound, &ty)?, ty))
        }
        None => infer(ctx, bound),
    }
}

fn infer_function(ctx: &Context, expr: &Expr) -> Result<(Term, Type, Type), TypeError> {
    match infer(ctx, expr)? {
        (term, Type::Arrow(domain, codomain)) => Ok((term, *domain, *codomain)),
        (_, found) => Err(TypeError::NotAFunction {
            found,
            span: expr.span,
        }),
    }
}

fn infer_fuzzy(ctx: &Context, expr: &Expr) -> Result<(Term, Type), TypeError> {
    match infer(ctx, expr)? {
        (term, Type::Fuzzy(inner)) => Ok((term, *inner)),
        (_, found) => Err(TypeError::NotFuzzy {
            found,
            span: expr.span,
        }),
    }
}

/// `def f(x: A, y: B): R = e` as `fun (x: A) => fun (y: B) => (e : R)`.
fn desugar_def(params: &[Param], ret: Option<&TypeExpr>, body: &Expr) -> Expr {
    let mut expr = match ret {
        Some(ret) => Expr {
            span: body.span,
            kind: ExprKind::Ascribe {
                expr: Box::new(body.clone()),
                ty: ret.clone(),
            },
        },
        None => body.clone(),
    };
    for param in params.iter().rev() {
        expr = Expr {
            span: join(param.span, expr.span),
            kind: ExprKind::Lambda {
                param: param.name.clone(),
                param_ty: param.ty.clone(),
                body: Box::new(expr),
            },
        };
    }
    expr
}

/// The type a def promises, if its parameters and result are all written.
fn declared_signature(
    ctx: &Context,
    params: &[Param],
    ret: Option<&TypeExpr>,
) -> Option<Type> {
    fn go(ctx: &Context, params: &[Param], ret: &TypeExpr) -> Option<Type> {
        let Some((param, rest)) = params.split_first() else {
            return resolve_type(ctx, ret).ok();
        };
        if is_type_sort(&param.ty) {
            let (inner, var) = ctx.bind_type_var(&param.name);
            return Some(Type::Forall(var, Box::new(go(&inner, rest, ret)?)));
        }
        let domain = resolve_type(ctx, &param.ty).ok()?;
        let inner = ctx.extend(&param.name, Binding::Local(domain.clone()));
        Some(Type::arrow(domain, go(&inner, rest, ret)?))
    }
    go(ctx, params, ret?)
}

fn check_decl(ctx: &Context, decl: &Decl) -> Result<(Binding, Option<Term>), TypeError> {
    match decl {
        Decl::Type { ty, .. } => Ok((Binding::Alias(resolve_sorted(ctx, ty, Sort::Type)?), None)),
        Decl::Prop { .. } => Ok((Binding::Prop, None)),
        Decl::Axiom { prop, .. } => {
            let prop = resolve_sorted(ctx, prop, Sort::Prop)?;
            Ok((Binding::Local(prop.clone()), Some(Term::Evidence(prop))))
        }
        Decl::Def {
            params, ret, body, ..
        } => {
            let (term, ty) = infer(ctx, &desugar_def(params, ret.as_ref(), body))?;
            Ok((Binding::Local(ty), Some(term)))
        }
    }
}

/// Checks every declaration and the entry expression, then lowers the
/// program into one closed core term of nested lets.
///
/// A program without an entry expression evaluates to the empty record.
pub fn check_program(program: &SourceProgram) -> Result<(Term, Type), Vec<TypeError>> {
    let mut ctx = Context::new();
    let mut errors = Vec::new();
    let mut lets = Vec::new();

    for decl in &program.decls {
        let name = decl.name();
        if ctx.lookup(name).is_some() {
            errors.push(TypeError::DuplicateDeclaration {
                name: name.to_string(),
                span: decl.span(),
            });
            continue;
        }
        match check_decl(&ctx, decl) {
            Ok((binding, term)) => {
                debug!(name, binding = ?binding, "declaration checked");
                if let Some(term) = term {
                    lets.push((name.to_string(), term));
                }
                ctx = ctx.extend(name, binding);
            }
            Err(err) => {
                debug!(name, error = %err, "declaration rejected");
                errors.push(err);
                let binding = match decl {
                    Decl::Def { params, ret, .. } => {
                        declared_signature(&ctx, params, ret.as_ref()).map(Binding::Local)
                    }
                    _ => None,
                };
                ctx = ctx.extend(name, binding.unwrap_or(Binding::Rejected));
            }
        }
    }

    let main = match &program.main {
        Some(main) => infer(&ctx, main).and_then(|(term, ty)| {
            require_sort(&ty, Sort::Type, main.span)?;
            Ok((term, ty))
        }),
        None => Ok((Term::Record(Vec::new()), Type::Record(BTreeMap::new()))),
    };

    match main {
        Ok((term, ty)) if errors.is_empty() => {
            let term = lets.into_iter().rev().fold(term, |body, (name, bound)| Term::Let {
                name,
                bound: Box::new(bound),
                body: Box::new(body),
            });
            Ok((term, ty))
        }
        main => {
            errors.extend(main.err());
            errors.retain(|err| !matches!(err, TypeError::RejectedDependency { .. }));
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Parser;

    fn check_source(input: &str) -> Result<(Term, Type), Vec<TypeError>> {
        let program = Parser::new(None, input).parse().unwrap();
        check_program(&program)
    }

    fn type_of(input: &str) -> Type {
        match check_source(input) {
            Ok((_, ty)) => ty,
            Err(errors) => panic!("{input:?} rejected: {errors:?}"),
        }
    }

    fn single_error(input: &str) -> TypeError {
        let mut errors = check_source(input).unwrap_err();
        assert_eq!(errors.len(), 1, "{errors:?}");
        errors.remove(0)
    }

    #[test]
    fn literals_and_lets() {
        assert_eq!(type_of("let p: Prob = 0.7 in p"), Type::Prob);
        assert_eq!(type_of("let n = 3 in n"), Type::Int);
        assert_eq!(type_of("\"tp53\""), Type::Str);
    }

    #[test]
    fn probability_literal_out_of_range() {
        let err = single_error("let p: Prob = 1.2 in p");
        assert_eq!(
            err,
            TypeError::ProbOutOfRange {
                value: 1.2,
                span: SourceSpan::from(14..17),
            }
        );
        assert!(matches!(
            single_error("1.00000000000000001"),
            TypeError::ProbOutOfRange { value, .. } if value > 1.0
        ));
        assert_eq!(type_of("1.0000"), Type::Prob);
    }

    #[test]
    fn unbound_variable_points_at_the_name() {
        let err = single_error("let p = 0.5 in prob_mul(p, x)");
        assert_eq!(
            err,
            TypeError::UnboundVariable {
                name: "x".to_string(),
                span: SourceSpan::from(27..28),
            }
        );
    }

    #[test]
    fn application() {
        assert_eq!(type_of("prob_add(0.6, 0.7)"), Type::Prob);
        assert!(matches!(
            single_error("let n = 1 in n(0.5)"),
            TypeError::NotAFunction {
                found: Type::Int,
                ..
            }
        ));
        assert!(matches!(
            single_error("prob_mul(0.5, 3)"),
            TypeError::TypeMismatch {
                expected: Type::Prob,
                found: Type::Int,
                ..
            }
        ));
    }

    #[test]
    fn polymorphism() {
        let ty = type_of("let id = fun (T: Type) => fun (x: T) => x in id[Fuzzy<Prob>]");
        assert_eq!(
            ty,
            Type::arrow(Type::fuzzy(Type::Prob), Type::fuzzy(Type::Prob))
        );
        assert!(matches!(
            single_error("let p = 0.5 in p[Prob]"),
            TypeError::NotPolymorphic { .. }
        ));
    }

    #[test]
    fn checking_against_forall() {
        assert_eq!(
            type_of("(fun (U: Type) => fun (y: U) => y : forall T. T -> T)"),
            Type::Forall(
                "T".to_string(),
                Box::new(Type::arrow(
                    Type::Var("T".to_string()),
                    Type::Var("T".to_string())
                ))
            )
        );
    }

    #[test]
    fn shadowed_type_parameters_stay_distinct() {
        let t = || Type::Var("T".to_string());
        let ty = type_of("fun (T: Type) => fun (x: T) => fun (T: Type) => x");
        let expected = Type::Forall(
            "T".to_string(),
            Box::new(Type::arrow(
                t(),
                Type::Forall("U".to_string(), Box::new(t())),
            )),
        );
        assert!(ty.alpha_eq(&expected), "got {ty}");

        // a term variable hiding the outer `T` does not free its name
        let ty = type_of("fun (T: Type) => fun (x: T) => fun (T: Int) => fun (T: Type) => x");
        let expected = Type::Forall(
            "T".to_string(),
            Box::new(Type::arrow(
                t(),
                Type::arrow(Type::Int, Type::Forall("U".to_string(), Box::new(t()))),
            )),
        );
        assert!(ty.alpha_eq(&expected), "got {ty}");
    }

    #[test]
    fn inner_type_parameter_cannot_capture_an_outer_one() {
        assert!(matches!(
            single_error(
                "let f = fun (T: Type) => fun (x: T) => fun (T: Type) => x in prob_add(f[Int](3)[Prob], 0.5)"
            ),
            TypeError::TypeMismatch {
                expected: Type::Prob,
                found: Type::Int,
                ..
            }
        ));
        assert!(matches!(
            single_error(
                "let g = fun (U: Type) => (fun (U: Type) => fun (y: U) => y : forall T. U -> T) in prob_add(g[Int][Prob](3), 0.5)"
            ),
            TypeError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn records() {
        let ty = type_of("type Gene = { name: Str, expression: Prob };\n(({ name = \"brca1\", expression = 0.4 } : Gene)).expression");
        assert_eq!(ty, Type::Prob);
        assert!(matches!(
            single_error("{ a = 1, a = 2 }"),
            TypeError::DuplicateField { .. }
        ));
        assert!(matches!(
            single_error("{ a = 1 }.b"),
            TypeError::NoSuchField { .. }
        ));
        assert!(matches!(
            single_error("let n = 1 in n.b"),
            TypeError::NotARecord { .. }
        ));
    }

    #[test]
    fn fuzzy_rules() {
        assert_eq!(
            type_of("fuzzy_map(prob_complement, fuzzy(0.2, 0.9))"),
            Type::fuzzy(Type::Prob)
        );
        assert_eq!(
            type_of("fuzzy_combine(prob_mul, fuzzy(0.3, 0.8), fuzzy(0.6, 0.5)).confidence"),
            Type::Prob
        );
        assert_eq!(
            type_of("fuzzy_bind(fuzzy(2, 0.9), fun (n: Int) => fuzzy(int_add(n, 1), 0.5))"),
            Type::fuzzy(Type::Int)
        );
        assert!(matches!(
            single_error("let p = 0.5 in p.value"),
            TypeError::NotFuzzy {
                found: Type::Prob,
                ..
            }
        ));
        assert!(matches!(
            single_error("fuzzy_map(prob_complement, 0.5)"),
            TypeError::NotFuzzy { .. }
        ));
        assert!(matches!(
            single_error("fuzzy_map(int_add(1), fuzzy(0.5, 0.5))"),
            TypeError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn sorts_are_not_values() {
        assert!(matches!(
            single_error("let t = Type in t"),
            TypeError::SortInValuePosition { .. }
        ));
        assert!(matches!(
            single_error("let x: Prop = 0.5 in x"),
            TypeError::MisplacedSort {
                sort: Sort::Prop,
                ..
            }
        ));
        assert!(matches!(
            single_error("type P = Prob;\nP"),
            TypeError::SortInValuePosition { .. }
        ));
    }

    #[test]
    fn propositions() {
        assert_eq!(
            type_of("prop Expressed;\naxiom observed : Expressed;\ndef cite(h: Expressed): Prob = 0.9;\ncite(observed)"),
            Type::Prob
        );
        assert!(matches!(
            single_error("prop Expressed;\naxiom observed : Expressed;\nobserved"),
            TypeError::SortMismatch {
                expected: Sort::Type,
                found: Sort::Prop,
                ..
            }
        ));
        assert!(matches!(
            single_error("axiom bad : Prob;"),
            TypeError::SortMismatch {
                expected: Sort::Prop,
                found: Sort::Type,
                ..
            }
        ));
        assert!(matches!(
            single_error("prop Expressed;\n(fuzzy(0.5, 0.5) : Fuzzy<Expressed>)"),
            TypeError::SortMismatch {
                expected: Sort::Type,
                found: Sort::Prop,
                ..
            }
        ));
    }

    #[test]
    fn definitions_desugar_to_lambdas() {
        let (term, ty) =
            check_source("def both(p: Prob, q: Prob): Prob = prob_mul(p, q);\nboth(0.5)").unwrap();
        assert_eq!(ty, Type::arrow(Type::Prob, Type::Prob));
        assert!(matches!(term, Term::Let { ref name, .. } if name == "both"));
    }

    #[test]
    fn errors_accumulate_across_declarations() {
        let errors = check_source(
            "def a: Prob = 1.5;\ndef b = x;\ndef c = b;\ndef a = 0.1;\nprob_mul(a, 0.5)",
        )
        .unwrap_err();
        let kinds: Vec<_> = errors
            .iter()
            .map(|err| match err {
                TypeError::ProbOutOfRange { .. } => "range",
                TypeError::UnboundVariable { .. } => "unbound",
                TypeError::DuplicateDeclaration { .. } => "duplicate",
                _ => "other",
            })
            .collect();
        // `c` depends on the rejected `b` and is not reported; `a` keeps its
        // declared signature so the entry expression still checks.
        assert_eq!(kinds, ["range", "unbound", "duplicate"]);
    }

    #[test]
    fn builtins_cannot_be_redeclared() {
        assert!(matches!(
            single_error("def prob_add = 0.5;"),
            TypeError::DuplicateDeclaration { .. }
        ));
    }

    #[test]
    fn empty_program_is_the_empty_record() {
        assert_eq!(
            check_source("").unwrap(),
            (Term::Record(Vec::new()), Type::Record(BTreeMap::new()))
        );
    }

    #[test]
    fn elaborated_terms_resynthesize_to_the_checked_type() {
        for input in [
            "let p: Prob = 0.7 in let q: Prob = 0.5 in prob_mul(p, q)",
            "fuzzy_map(prob_complement, fuzzy(0.2, 0.9))",
            "let id = fun (T: Type) => fun (x: T) => x in id[Int](3)",
            "type G = { e: Prob };\ndef get(g: G): Prob = g.e;\nget({ e = 0.3 })",
        ] {
            let (term, ty) = check_source(input).unwrap();
            assert_eq!(term.type_of(), Some(ty), "{input}");
        }
    }
}
