use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display},
};

/// The two sorts of the kernel. Neither has a type of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    /// Classifies ordinary types: `Prob`, arrows, records, `Fuzzy<_>`.
    Type,
    /// Classifies propositions. Terms whose type is a proposition are opaque
    /// evidence and are never inspected by the evaluator.
    Prop,
}

impl Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Type => write!(f, "Type"),
            Sort::Prop => write!(f, "Prop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Prob,
    Int,
    Bool,
    Str,
    Arrow(Box<Type>, Box<Type>),
    Record(BTreeMap<String, Type>),
    Fuzzy(Box<Type>),
    /// A variable bound by an enclosing `forall`.
    Var(String),
    Forall(String, Box<Type>),
    /// A proposition introduced by a `prop` declaration.
    Prop(String),
}

/// The universe rule for `forall T. U` where `U : body`.
///
/// The kernel keeps a single impredicative `Type`: quantifying over `Type`
/// stays in the sort of the body. There is no `Type : Type`, so Girard's
/// paradox cannot be stated. Stratifying the universe only means changing
/// this function.
pub fn forall_sort(body: Sort) -> Sort {
    body
}

/// Sort of an arrow from a `domain`-sorted type to a `codomain`-sorted type.
/// As in the calculus of constructions, the codomain decides.
pub fn arrow_sort(_domain: Sort, codomain: Sort) -> Sort {
    codomain
}

impl Type {
    pub fn arrow(domain: Type, codomain: Type) -> Type {
        Type::Arrow(Box::new(domain), Box::new(codomain))
    }

    pub fn fuzzy(inner: Type) -> Type {
        Type::Fuzzy(Box::new(inner))
    }

    /// The sort classifying this type. Type variables range over `Type`.
    pub fn sort(&self) -> Sort {
        match self {
            Type::Prop(_) => Sort::Prop,
            Type::Arrow(domain, codomain) => arrow_sort(domain.sort(), codomain.sort()),
            Type::Forall(_, body) => forall_sort(body.sort()),
            Type::Prob
            | Type::Int
            | Type::Bool
            | Type::Str
            | Type::Record(_)
            | Type::Fuzzy(_)
            | Type::Var(_) => Sort::Type,
        }
    }

    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_free_vars(&mut Vec::new(), &mut vars);
        vars
    }

    fn collect_free_vars(&self, bound: &mut Vec<String>, vars: &mut BTreeSet<String>) {
        match self {
            Type::Var(name) => {
                if !bound.contains(name) {
                    vars.insert(name.clone());
                }
            }
            Type::Arrow(domain, codomain) => {
                domain.collect_free_vars(bound, vars);
                codomain.collect_free_vars(bound, vars);
            }
            Type::Record(fields) => {
                for ty in fields.values() {
                    ty.collect_free_vars(bound, vars);
                }
            }
            Type::Fuzzy(inner) => inner.collect_free_vars(bound, vars),
            Type::Forall(var, body) => {
                bound.push(var.clone());
                body.collect_free_vars(bound, vars);
                bound.pop();
            }
            Type::Prob | Type::Int | Type::Bool | Type::Str | Type::Prop(_) => {}
        }
    }

    /// Capture-avoiding substitution `self[var := replacement]`.
    pub fn subst(&self, var: &str, replacement: &Type) -> Type {
        match self {
            Type::Var(name) if name == var => replacement.clone(),
            Type::Var(_) | Type::Prob | Type::Int | Type::Bool | Type::Str | Type::Prop(_) => {
                self.clone()
            }
            Type::Arrow(domain, codomain) => Type::arrow(
                domain.subst(var, replacement),
                codomain.subst(var, replacement),
            ),
            Type::Record(fields) => Type::Record(
                fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.subst(var, replacement)))
                    .collect(),
            ),
            Type::Fuzzy(inner) => Type::fuzzy(inner.subst(var, replacement)),
            Type::Forall(bound, _) if bound == var => self.clone(),
            Type::Forall(bound, body) => {
                let free = replacement.free_vars();
                if free.contains(bound) {
                    let fresh = fresh_name(bound, |candidate| {
                        free.contains(candidate) || body.free_vars().contains(candidate)
                    });
                    let body = body.subst(bound, &Type::Var(fresh.clone()));
                    Type::Forall(fresh, Box::new(body.subst(var, replacement)))
                } else {
                    Type::Forall(bound.clone(), Box::new(body.subst(var, replacement)))
                }
            }
        }
    }

    /// Structural equality up to renaming of `forall` binders.
    pub fn alpha_eq(&self, other: &Type) -> bool {
        alpha_eq_rec(self, other, &mut Vec::new())
    }
}

/// `base` with enough primes appended to avoid every `taken` name. Primed
/// names cannot be written in source.
pub fn fresh_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = format!("{base}'");
    while taken(&candidate) {
        candidate.push('\'');
    }
    candidate
}

fn alpha_eq_rec(t1: &Type, t2: &Type, ctx: &mut Vec<(String, String)>) -> bool {
    match (t1, t2) {
        (Type::Prob, Type::Prob)
        | (Type::Int, Type::Int)
        | (Type::Bool, Type::Bool)
        | (Type::Str, Type::Str) => true,
        (Type::Prop(p1), Type::Prop(p2)) => p1 == p2,
        (Type::Var(v1), Type::Var(v2)) => {
            for (left, right) in ctx.iter().rev() {
                if v1 == left || v2 == right {
                    return v1 == left && v2 == right;
                }
            }
            v1 == v2
        }
        (Type::Arrow(d1, c1), Type::Arrow(d2, c2)) => {
            alpha_eq_rec(d1, d2, ctx) && alpha_eq_rec(c1, c2, ctx)
        }
        (Type::Record(f1), Type::Record(f2)) => {
            f1.len() == f2.len()
                && f1
                    .iter()
                    .zip(f2.iter())
                    .all(|((n1, t1), (n2, t2))| n1 == n2 && alpha_eq_rec(t1, t2, ctx))
        }
        (Type::Fuzzy(i1), Type::Fuzzy(i2)) => alpha_eq_rec(i1, i2, ctx),
        (Type::Forall(v1, b1), Type::Forall(v2, b2)) => {
            ctx.push((v1.clone(), v2.clone()));
            let res = alpha_eq_rec(b1, b2, ctx);
            ctx.pop();
            res
        }
        _ => false,
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prob => write!(f, "Prob"),
            Type::Int => write!(f, "Int"),
            Type::Bool => write!(f, "Bool"),
            Type::Str => write!(f, "Str"),
            Type::Arrow(domain, codomain) => match **domain {
                Type::Arrow(..) | Type::Forall(..) => write!(f, "({domain}) -> {codomain}"),
                _ => write!(f, "{domain} -> {codomain}"),
            },
            Type::Record(fields) => {
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
            Type::Fuzzy(inner) => write!(f, "Fuzzy<{inner}>"),
            Type::Var(name) | Type::Prop(name) => write!(f, "{name}"),
            Type::Forall(var, body) => write!(f, "forall {var}. {body}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Type {
        Type::Var(name.to_string())
    }

    fn forall(name: &str, body: Type) -> Type {
        Type::Forall(name.to_string(), Box::new(body))
    }

    #[test]
    fn alpha_equivalence_ignores_binder_names() {
        let id_t = forall("T", Type::arrow(var("T"), var("T")));
        let id_u = forall("U", Type::arrow(var("U"), var("U")));
        assert!(id_t.alpha_eq(&id_u));

        let konst = forall("T", forall("U", Type::arrow(var("T"), var("U"))));
        let flipped = forall("U", forall("T", Type::arrow(var("T"), var("U"))));
        assert!(!konst.alpha_eq(&flipped));
    }

    #[test]
    fn records_compare_by_field_set() {
        let a = Type::Record(BTreeMap::from([
            ("b".to_string(), Type::Prob),
            ("a".to_string(), Type::Int),
        ]));
        let b = Type::Record(BTreeMap::from([
            ("a".to_string(), Type::Int),
            ("b".to_string(), Type::Prob),
        ]));
        assert!(a.alpha_eq(&b));
        assert_eq!(a.to_string(), "{ a: Int, b: Prob }");
    }

    #[test]
    fn substitution_avoids_capture() {
        // (forall U. T -> U)[T := U] must not capture the free U
        let ty = forall("U", Type::arrow(var("T"), var("U")));
        let result = ty.subst("T", &var("U"));
        let expected = forall("V", Type::arrow(var("U"), var("V")));
        assert!(result.alpha_eq(&expected), "got {result}");
    }

    #[test]
    fn substitution_stops_at_shadowing_binder() {
        let ty = forall("T", var("T"));
        assert_eq!(ty.subst("T", &Type::Prob), ty);
    }

    #[test]
    fn sorts() {
        let expressed = Type::Prop("Expressed".to_string());
        assert_eq!(Type::fuzzy(Type::Prob).sort(), Sort::Type);
        assert_eq!(expressed.sort(), Sort::Prop);
        assert_eq!(Type::arrow(Type::Prob, expressed.clone()).sort(), Sort::Prop);
        assert_eq!(Type::arrow(expressed, Type::Prob).sort(), Sort::Type);
        assert_eq!(forall("T", Type::arrow(var("T"), var("T"))).sort(), Sort::Type);
    }

    #[test]
    fn display_parenthesizes_higher_order_domains() {
        let ty = Type::arrow(Type::arrow(Type::Prob, Type::Prob), Type::fuzzy(Type::Prob));
        assert_eq!(ty.to_string(), "(Prob -> Prob) -> Fuzzy<Prob>");
    }
}
