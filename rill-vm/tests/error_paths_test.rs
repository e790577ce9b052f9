// rill-vm - Runtime error path tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::rc::Rc;

use rill_parser::Parser;
use rill_vm::{BuiltinRegistry, RuntimeError, Value, Vm, compile};

fn run_err(src: &str, entry: &str, args: &[Value]) -> RuntimeError {
    let mut parser = Parser::from_source(src);
    let program = parser.parse_program();
    assert!(
        parser.errors().is_empty(),
        "parser errors: {:?}",
        parser.errors()
    );
    let builtins = BuiltinRegistry::standard();
    let module = compile(&program, "errors", &builtins).expect("compile error");
    let mut vm = Vm::new(Rc::new(BuiltinRegistry::standard()));
    vm.load_module(&module);
    vm.call(entry, args).expect_err("expected runtime error")
}

#[test]
fn test_arithmetic_type_mismatch() {
    let err = run_err("func f(){return 1 + \"x\"}", "f", &[]);
    assert_eq!(err.message, "operands must be numbers");
}

#[test]
fn test_comparison_type_mismatch() {
    let err = run_err("func f(){return \"a\" < \"b\"}", "f", &[]);
    assert_eq!(err.message, "operands must be numbers");
}

#[test]
fn test_negation_requires_number() {
    let err = run_err("func f(){return -\"x\"}", "f", &[]);
    assert_eq!(err.message, "operand must be number");
}

#[test]
fn test_missing_object_key() {
    let err = run_err("func f(){$o:={a:1}; return $o[\"b\"]}", "f", &[]);
    assert_eq!(err.message, "missing key");
}

#[test]
fn test_missing_property() {
    let err = run_err("func f(){$o:={a:1}; return $o.b}", "f", &[]);
    assert_eq!(err.message, "missing property b");
}

#[test]
fn test_property_access_on_non_object() {
    let err = run_err("func f(){$a:=[1]; return $a.len}", "f", &[]);
    assert_eq!(err.message, "property access on non-object");
}

#[test]
fn test_index_on_non_indexable() {
    let err = run_err("func f(){return 3[0]}", "f", &[]);
    assert_eq!(err.message, "not indexable");
}

#[test]
fn test_fractional_array_index() {
    let err = run_err("func f(){$a:=[1,2]; return $a[0.5]}", "f", &[]);
    assert_eq!(err.message, "index must be integer");
}

#[test]
fn test_string_index_into_array() {
    let err = run_err("func f(){$a:=[1]; return $a[\"0\"]}", "f", &[]);
    assert_eq!(err.message, "index must be number");
}

#[test]
fn test_index_set_out_of_bounds_does_not_append() {
    let err = run_err("func f(){$a:=[1]; $a[1]=2; return $a}", "f", &[]);
    assert_eq!(err.message, "index out of bounds");
}

#[test]
fn test_call_non_function() {
    let err = run_err("func f(){$x:=3; return $x()}", "f", &[]);
    assert_eq!(err.message, "not a function");
}

#[test]
fn test_unknown_global() {
    let err = run_err("func f(){return nope()}", "f", &[]);
    assert_eq!(err.message, "global nope not found");
}

#[test]
fn test_range_requires_integers() {
    let err = run_err("func f(){return [1.5 .. 3]}", "f", &[]);
    assert_eq!(err.message, "index must be integer");
    let err = run_err("func f(){return [\"a\" .. 3]}", "f", &[]);
    assert_eq!(err.message, "index must be number");
}

#[test]
fn test_for_over_non_iterable() {
    let err = run_err("func f(){for ($v in 3) {} return null}", "f", &[]);
    assert_eq!(err.message, "not iterable");
}

#[test]
fn test_error_builtin_requires_string() {
    let err = run_err("func f(){return error(3)}", "f", &[]);
    assert_eq!(err.message, "error expects string");
}

#[test]
fn test_stack_trace_innermost_first() {
    let src = "func a(){return b()}\nfunc b(){return c()}\nfunc c(){return missing}";
    let err = run_err(src, "a", &[]);
    assert_eq!(err.message, "global missing not found");
    assert_eq!(err.frame.function, "c");
    let names: Vec<&str> = err.stack.iter().map(|f| f.function.as_str()).collect();
    assert_eq!(names, vec!["c", "b", "a"]);
    assert_eq!(err.frame.line, 3);
    assert!(err.stack.iter().all(|f| f.source == "errors"));
}

#[test]
fn test_error_display_format() {
    let err = run_err("func bad(){return [1][5]}", "bad", &[]);
    assert_eq!(err.to_string(), "errors:1 in bad: index out of bounds");
}

#[test]
fn test_unknown_global_without_frames() {
    let mut vm = Vm::new(Rc::new(BuiltinRegistry::standard()));
    let err = vm.call("ghost", &[]).expect_err("unknown global");
    assert_eq!(err.message, "global ghost not found");
    assert!(err.stack.is_empty());
    assert_eq!(err.to_string(), "global ghost not found");
}

#[test]
fn test_calling_non_function_global() {
    let mut vm = Vm::new(Rc::new(BuiltinRegistry::standard()));
    vm.define_global("x", Value::Number(1.0));
    let err = vm.call("x", &[]).expect_err("not callable");
    assert_eq!(err.message, "not a function");
}
