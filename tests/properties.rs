//! Property-based tests for the kernel's soundness and arithmetic laws.

use biokernel::{
    EvalConfig, Value,
    eval::{Step, step},
    prob::{self, Prob},
    types::Type,
};
use proptest::prelude::*;

/// Bound on generated expression depth.
const MAX_DEPTH: u32 = 4;

/// Probability literals as the lexer accepts them: one digit, a point, digits.
fn arb_prob_literal() -> impl Strategy<Value = String> {
    prop_oneof![
        (0..1000u32).prop_map(|n| format!("0.{n:03}")),
        Just("1.0".to_string()),
        Just("0.0".to_string()),
    ]
}

fn arb_prob() -> impl Strategy<Value = Prob> {
    (0.0..=1.0f64).prop_map(|p| Prob::new(p).unwrap())
}

/// Closed, well-typed `Prob` expressions in surface syntax.
fn arb_prob_expr() -> impl Strategy<Value = String> {
    arb_prob_literal().prop_recursive(MAX_DEPTH, 64, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("prob_add({a}, {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("prob_mul({a}, {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("prob_min({a}, {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("prob_max({a}, {b})")),
            inner.clone().prop_map(|a| format!("prob_complement({a})")),
            inner.clone().prop_map(|a| format!("(fun (x: Prob) => prob_mul(x, x))({a})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("let y = {a} in prob_add(y, {b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("fuzzy({a}, {b}).value")),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| format!("fuzzy_map(prob_complement, fuzzy({a}, {b})).confidence")),
            (inner.clone(), inner.clone(), inner)
                .prop_map(|(a, b, c)| format!("fuzzy_combine(prob_max, fuzzy({a}, {b}), fuzzy({a}, {c})).value")),
        ]
    })
}

/// `Prob` expressions built through type abstraction and application,
/// including type parameters that shadow an enclosing one.
fn arb_poly_expr() -> impl Strategy<Value = String> {
    arb_prob_expr().prop_recursive(3, 32, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|a| format!("(fun (T: Type) => fun (x: T) => x)[Prob]({a})")),
            inner.clone().prop_map(|a| format!(
                "(fun (T: Type) => fun (x: T) => fun (T: Type) => fun (y: T) => x)[Prob]({a})[Int](7)"
            )),
            inner.clone().prop_map(|a| format!(
                "(fun (T: Type) => fun (x: T) => (fun (T: Type) => fun (y: T) => x : forall U. U -> T))[Prob]({a})[Bool](true)"
            )),
            inner.clone().prop_map(|a| format!(
                "(fun (T: Type) => fun (x: T) => fun (T: Type) => fun (y: T) => y)[Int](7)[Prob]({a})"
            )),
            (inner.clone(), inner).prop_map(|(a, b)| format!(
                "let id = fun (T: Type) => fun (x: T) => x in prob_mul(id[Prob]({a}), id[Fuzzy<Prob>](fuzzy({b}, 0.5)).value)"
            )),
        ]
    })
}

/// Steps `source` to a value, checking every intermediate term keeps type `Prob`.
fn progress_and_preservation(source: &str) -> Result<(), TestCaseError> {
    let program = biokernel::typecheck(None, source).unwrap();
    prop_assert_eq!(&program.ty, &Type::Prob);

    let mut term = program.term.clone();
    loop {
        match step(&term) {
            Ok(Step::Value) => break,
            Ok(Step::Next(next)) => {
                prop_assert_eq!(next.type_of(), Some(Type::Prob), "after {}", term);
                term = next;
            }
            Err(err) => prop_assert!(false, "{} is stuck: {}", term, err),
        }
    }
    match Value::from_term(&term) {
        Ok(Value::Prob(p)) => prop_assert!((0.0..=1.0).contains(&p.value())),
        other => prop_assert!(false, "unexpected result {:?}", other),
    }
    Ok(())
}

fn run_source(source: &str) -> Value {
    let program = biokernel::typecheck(None, source).unwrap();
    biokernel::run(&program, EvalConfig::default()).unwrap()
}

proptest! {
    #[test]
    fn arithmetic_is_closed(p in arb_prob(), q in arb_prob()) {
        for result in [
            prob::prob_add(p, q),
            prob::prob_mul(p, q),
            prob::prob_min(p, q),
            prob::prob_max(p, q),
            prob::prob_complement(p),
            prob::confidence_combine(p, q),
        ] {
            prop_assert!((0.0..=1.0).contains(&result.value()));
        }
    }

    #[test]
    fn well_typed_programs_progress_and_preserve(source in arb_prob_expr()) {
        progress_and_preservation(&source)?;
    }

    #[test]
    fn polymorphic_programs_progress_and_preserve(source in arb_poly_expr()) {
        progress_and_preservation(&source)?;
    }

    #[test]
    fn elaborated_terms_round_trip(source in arb_prob_expr()) {
        let program = biokernel::typecheck(None, &source).unwrap();
        let rendered = program.term.to_string();
        let reparsed = biokernel::typecheck(None, &rendered).unwrap();
        prop_assert_eq!(reparsed, program, "rendered as {}", rendered);
    }

    #[test]
    fn fuzzy_map_preserves_confidence(v in arb_prob_literal(), c in arb_prob_literal()) {
        let lifted = run_source(&format!("fuzzy_map(prob_complement, fuzzy({v}, {c}))"));
        let direct = run_source(&format!("fuzzy(prob_complement({v}), {c})"));
        prop_assert_eq!(lifted, direct);
    }

    #[test]
    fn fuzzy_combine_confidence_is_the_product(
        a in arb_prob_literal(),
        b in arb_prob_literal(),
        c1 in arb_prob_literal(),
        c2 in arb_prob_literal(),
    ) {
        let value = run_source(&format!("fuzzy_combine(prob_add, fuzzy({a}, {c1}), fuzzy({b}, {c2}))"));
        let (c1, c2) = (Prob::new(c1.parse().unwrap()).unwrap(), Prob::new(c2.parse().unwrap()).unwrap());
        let expected = prob::confidence_combine(c1, c2);
        prop_assert_eq!(value.confidence(), Some(expected));

        let c = expected.value();
        prop_assert!(c <= c1.value() && c <= c2.value(), "{} from {} and {}", c, c1.value(), c2.value());
    }
}
