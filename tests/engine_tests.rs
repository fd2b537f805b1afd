use xlang::{Error, Limits, Machine, Value};

#[test]
fn integer_arithmetic_with_precedence() {
    let mut machine = Machine::new();
    assert_eq!(machine.run("1 + 2 * 3").unwrap(), Value::Integer(7));
}

#[test]
fn let_bindings_persist_across_run_calls() {
    let mut machine = Machine::new();
    machine.run("let x = 5; let y = 10;").unwrap();
    assert_eq!(machine.run("x + y;").unwrap(), Value::Integer(15));
}

#[test]
fn if_else_truthiness() {
    let mut machine = Machine::new();
    assert_eq!(machine.run("if (1 < 2) { 10 } else { 20 }").unwrap(), Value::Integer(10));
    assert_eq!(machine.run("if (1 > 2) { 10 } else { 20 }").unwrap(), Value::Integer(20));
}

#[test]
fn closures_capture_enclosing_bindings() {
    let mut machine = Machine::new();
    let source = r#"
        let newAdder = fn(a, b) {
            fn(c) { a + b + c };
        };
        let addTwo = newAdder(1, 1);
        addTwo(9);
    "#;
    assert_eq!(machine.run(source).unwrap(), Value::Integer(11));
}

#[test]
fn recursion_via_current_closure() {
    let mut machine = Machine::new();
    let source = r#"
        let fib = fn(x) {
            if (x < 2) { x } else { fib(x - 1) + fib(x - 2) }
        };
        fib(15);
    "#;
    assert_eq!(machine.run(source).unwrap(), Value::Integer(610));
}

#[test]
fn builtins_enforce_arity_and_type() {
    let mut machine = Machine::new();
    assert!(matches!(machine.run("len(1, 2)").unwrap_err(), Error::Language(_)));
    assert!(matches!(machine.run("first(1)").unwrap_err(), Error::Language(_)));
}

#[test]
fn hash_indexing() {
    let mut machine = Machine::new();
    assert_eq!(
        machine.run(r#"let h = {"name": "monkey", "age": 1}; h["name"];"#).unwrap(),
        Value::string("monkey")
    );
}

#[test]
fn arity_error_message_matches_expected_format() {
    let mut machine = Machine::new();
    let err = machine
        .evaluate_tree("let f = fn(a) { a }; f();")
        .unwrap_err();
    assert_eq!(
        err,
        Error::language("wrong number of parameters, expected=1, got=0")
    );
}

#[test]
fn string_plus_integer_is_a_runtime_error() {
    let mut machine = Machine::new();
    let err = machine.run(r#""hello" + 5;"#).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
}

#[test]
fn bang_if_with_no_alternative() {
    let mut machine = Machine::new();
    assert_eq!(
        machine.run("!(if (false) { 5; })").unwrap(),
        Value::Boolean(true)
    );
}

#[test]
fn vm_and_tree_walker_agree_on_arithmetic_and_closures() {
    let programs = [
        "1 + 2 * 3 - 4 / 2",
        "let a = 5; let b = a * 2; b + 1;",
        r#"let newAdder = fn(a) { fn(b) { a + b } }; let addFive = newAdder(5); addFive(10);"#,
        "if (10 > 5) { 1 } else { 2 }",
        r#"[1, 2, 3][1] + {"x": 10}["x"];"#,
    ];
    for program in programs {
        let mut vm_machine = Machine::new();
        let mut tree_machine = Machine::new();
        assert_eq!(
            vm_machine.run(program).unwrap(),
            tree_machine.evaluate_tree(program).unwrap(),
            "VM and tree-walker disagree on: {}",
            program
        );
    }
}

#[test]
fn less_than_or_equal_is_evaluator_only() {
    let mut machine = Machine::new();
    assert_eq!(machine.evaluate_tree("1 <= 1").unwrap(), Value::Boolean(true));
    assert!(matches!(machine.run("1 <= 1;").unwrap_err(), Error::Compile { .. }));
}

#[test]
fn instruction_limit_protects_against_runaway_recursion() {
    let mut machine = Machine::new();
    machine.limit(Limits {
        max_instructions: Some(500),
    });
    let err = machine
        .run("let loop = fn(x) { loop(x + 1) }; loop(0);")
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
}

#[test]
fn capture_returns_logged_lines() {
    let mut machine = Machine::new();
    let output = machine.capture(r#"log("computed", 1 + 1); "done";"#).unwrap();
    assert_eq!(output.value, Value::string("done"));
    assert_eq!(output.log, vec!["computed 2".to_string()]);
}
