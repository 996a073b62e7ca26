use biokernel::{
    EvalConfig, Failure, RuntimeError, Value,
    check::TypeError,
    prob::Prob,
    types::{Sort, Type},
};
use miette::SourceSpan;

fn run_source(source: &str) -> Result<Value, Failure> {
    let program = biokernel::typecheck(Some("scenario.bk"), source)?;
    let config = EvalConfig {
        audit_preservation: true,
        ..EvalConfig::default()
    };
    Ok(biokernel::run(&program, config)?)
}

fn value_of(source: &str) -> String {
    match run_source(source) {
        Ok(value) => value.to_string(),
        Err(failure) => panic!("{source:?} failed: {:?}", failure.into_report()),
    }
}

fn type_errors(source: &str) -> Vec<TypeError> {
    match biokernel::typecheck(None, source) {
        Err(Failure::Type(errors)) => errors.errors,
        other => panic!("expected type errors, got {other:?}"),
    }
}

#[test]
fn nested_lets_multiply() {
    assert_eq!(
        value_of("let p: Prob = 0.7 in let q: Prob = 0.5 in prob_mul(p, q)"),
        "0.35"
    );
}

#[test]
fn out_of_range_literal_is_rejected() {
    let errors = type_errors("let p: Prob = 1.2 in p");
    assert!(matches!(
        errors.as_slice(),
        [TypeError::ProbOutOfRange { value, .. }] if *value == 1.2
    ));
}

#[test]
fn addition_saturates_at_one() {
    assert_eq!(value_of("prob_add(0.6, 0.7)"), "1.0");
}

#[test]
fn fuzzy_map_is_a_pure_lift() {
    let lifted = value_of("fuzzy_map(prob_complement, fuzzy(0.25, 0.9))");
    let direct = value_of("fuzzy(prob_complement(0.25), 0.9)");
    assert_eq!(lifted, "fuzzy(0.75, 0.9)");
    assert_eq!(lifted, direct);
}

#[test]
fn fuzzy_combine_multiplies_confidence() {
    let value = run_source(
        "fuzzy_combine(prob_mul, fuzzy(0.3, 0.8), fuzzy(0.6, 0.5))",
    )
    .unwrap();
    assert_eq!(value.confidence(), Some(Prob::new(0.4).unwrap()));
}

#[test]
fn unbound_variable_is_reported_at_its_position() {
    let errors = type_errors("prob_mul(0.5, x)");
    assert_eq!(
        errors,
        [TypeError::UnboundVariable {
            name: "x".to_string(),
            span: SourceSpan::from(14..15),
        }]
    );
}

#[test]
fn gene_model_built_from_declarations() {
    let source = r#"
// a tiny expression model layered on the kernel
type Gene = { name: Str, expression: Fuzzy<Prob> };
prop Expressed;
axiom assay : Prob -> Expressed;
def silence(g: Gene): Gene =
    { name = g.name, expression = fuzzy_map(prob_complement, g.expression) };
def knockdown(T: Type, f: T -> T, x: T): T = f(x);
let tp53 = { name = "tp53", expression = fuzzy(0.8, 0.9) } in
let evidence = assay(0.8) in
knockdown[Gene](silence, tp53).expression
"#;
    let value = value_of(source);
    assert!(value.starts_with("fuzzy(0.19999"), "{value}");
    assert!(value.ends_with(", 0.9)"), "{value}");
}

#[test]
fn type_parameters_in_definitions() {
    assert_eq!(
        value_of("def twice(T: Type, f: T -> T, x: T): T = f(f(x));\ntwice[Int](int_mul(3), 2)"),
        "18"
    );
}

#[test]
fn shadowed_type_parameters_are_sound() {
    assert_eq!(
        value_of(
            "let k = fun (T: Type) => fun (x: T) => fun (T: Type) => fun (y: T) => x in prob_add(k[Prob](0.25)[Int](3), 0.5)"
        ),
        "0.75"
    );

    for source in [
        "let f = fun (T: Type) => fun (x: T) => fun (T: Type) => x in prob_add(f[Int](3)[Prob], 0.5)",
        "let g = fun (U: Type) => (fun (U: Type) => fun (y: U) => y : forall T. U -> T) in prob_add(g[Int][Prob](3), 0.5)",
    ] {
        let errors = type_errors(source);
        assert!(
            matches!(errors.as_slice(), [TypeError::TypeMismatch { .. }]),
            "{source}: {errors:?}"
        );
    }
}

#[test]
fn fuzzy_bind_sequences_confidence() {
    assert_eq!(
        value_of(
            "def measure(n: Int): Fuzzy<Int> = fuzzy(int_add(n, 1), 0.5);\nfuzzy_bind(fuzzy(1, 0.8), measure)"
        ),
        "fuzzy(2, 0.4)"
    );
}

#[test]
fn programs_without_an_entry_expression_yield_the_empty_record() {
    assert_eq!(value_of("prop Expressed;\ndef p = 0.5;"), "{}");
}

#[test]
fn every_error_in_the_program_is_reported() {
    let errors = type_errors(
        "type Bad = Fuzzy<Type>;\ndef f(x: Prob): Prob = x.value;\ndef g = f(2);\nf(0.5)",
    );
    assert_eq!(errors.len(), 3, "{errors:?}");
    assert!(matches!(errors[0], TypeError::MisplacedSort { sort: Sort::Type, .. }));
    assert!(matches!(errors[1], TypeError::NotFuzzy { found: Type::Prob, .. }));
    assert!(matches!(
        errors[2],
        TypeError::TypeMismatch {
            expected: Type::Prob,
            found: Type::Int,
            ..
        }
    ));
}

#[test]
fn step_budget_surfaces_as_a_runtime_failure() {
    let program = biokernel::typecheck(None, "prob_mul(prob_mul(0.5, 0.5), 0.5)").unwrap();
    let config = EvalConfig {
        step_budget: 1,
        audit_preservation: false,
    };
    let err = biokernel::run(&program, config).unwrap_err();
    assert_eq!(err, RuntimeError::StepBudgetExceeded { budget: 1 });
    assert_eq!(Failure::from(err).exit_code(), 70);
}

#[test]
fn rendered_values_check_at_the_program_type() {
    for source in [
        "fuzzy_map(prob_complement, fuzzy(0.25, 0.9))",
        "{ name = \"brca1\", level = prob_max(0.2, 0.4) }",
        "prob_add(0.5)",
        "let id = fun (T: Type) => fun (x: T) => x in id[Prob]",
    ] {
        let program = biokernel::typecheck(None, source).unwrap();
        let value = biokernel::run(&program, EvalConfig::default()).unwrap();
        let reparsed = biokernel::typecheck(None, &value.to_string()).unwrap();
        assert!(reparsed.ty.alpha_eq(&program.ty), "{source} -> {value}");
    }
}
