// rill-embed - Embedding API tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::cell::Cell;
use std::rc::Rc;

use rill_embed::{
    EmbedError, Engine, MarshalOptions, Value, from_value, to_value, to_value_options,
};

fn engine_with(src: &str) -> Engine {
    let mut engine = Engine::new();
    engine.load_source("inline", src).expect("load error");
    engine
}

#[test]
fn test_load_and_call() {
    let mut engine = engine_with("func add($a, $b) { return $a + $b }");
    let result = engine
        .call("add", &[to_value(2.0_f64), to_value(3.0_f64)])
        .unwrap();
    assert_eq!(from_value::<f64>(&result).unwrap(), 5.0);
}

#[test]
fn test_parse_errors_are_reported() {
    let mut engine = Engine::new();
    let err = engine
        .load_source("broken", "func f( { return 1 }")
        .expect_err("expected parse failure");
    let EmbedError::Parse(errors) = err else {
        panic!("expected parse error, got {err}");
    };
    assert!(!errors.is_empty());
    assert!(errors[0].contains(':'), "line:column prefix: {}", errors[0]);
}

#[test]
fn test_compile_errors_are_reported() {
    let mut engine = Engine::new();
    let err = engine
        .load_source("toplevel", "$x := 1")
        .expect_err("expected compile failure");
    assert!(matches!(err, EmbedError::Compile(_)), "{err}");
}

#[test]
fn test_multiple_source_units_accumulate() {
    let mut engine = engine_with("func one() { return 1 }");
    engine
        .load_source("more", "func two() { return 2 }")
        .unwrap();
    assert!(engine.has_function("one"));
    assert!(engine.has_function("two"));
    assert!(!engine.has_function("three"));
}

#[test]
fn test_define_global_and_marshaling() {
    let mut engine = engine_with("func total() { return prices[0] + prices[1] + bonus }");
    engine.define_global("prices", vec![10.0_f64, 20.0]);
    engine.define_global("bonus", 5.0_f64);
    let result = engine.call("total", &[]).unwrap();
    assert_eq!(from_value::<f64>(&result).unwrap(), 35.0);
}

#[test]
fn test_object_round_trip_through_script() {
    let mut engine = engine_with(
        "func tweak($o) { $o.count = $o.count + 1; return $o }",
    );
    let mut fields = indexmap::IndexMap::new();
    fields.insert("count".to_string(), 1.0_f64);
    fields.insert("label".to_string(), 0.0_f64);
    let result = engine.call("tweak", &[to_value(fields)]).unwrap();
    let back: indexmap::IndexMap<String, f64> = from_value(&result).unwrap();
    assert_eq!(back["count"], 2.0);
    let keys: Vec<&String> = back.keys().collect();
    assert_eq!(keys, vec!["count", "label"], "insertion order preserved");
}

#[test]
fn test_register_native() {
    let mut engine = Engine::new();
    engine.register_native("greet", |args| match args.first() {
        Some(Value::Str(name)) => Ok(Value::string(format!("Hello, {name}!"))),
        _ => Err("greet expects a string".to_string()),
    });
    engine
        .load_source("inline", "func hi() { return greet(\"world\") }")
        .unwrap();
    let result = engine.call("hi", &[]).unwrap();
    assert_eq!(from_value::<String>(&result).unwrap(), "Hello, world!");
}

#[test]
fn test_native_error_carries_script_context() {
    let mut engine = Engine::new();
    engine.register_native("fail", |_| Err("nope".to_string()));
    engine
        .load_source("inline", "func go() { return fail() }")
        .unwrap();
    let err = engine.call("go", &[]).expect_err("native error");
    let EmbedError::Runtime(runtime) = err else {
        panic!("expected runtime error");
    };
    assert_eq!(runtime.message, "nope");
    assert_eq!(runtime.cause.as_deref(), Some("nope"));
    assert_eq!(runtime.frame.function, "go");
    assert_eq!(runtime.frame.source, "inline");
}

#[test]
fn test_read_only_marshaling_blocks_script_mutation() {
    let mut engine = engine_with(
        "func check($o) { return readonly($o) }\n\
         func mutate($o) { $o[\"k\"] = 1; return null }",
    );
    let mut fields = indexmap::IndexMap::new();
    fields.insert("k".to_string(), 0.0_f64);
    let frozen = to_value_options(fields, MarshalOptions { read_only: true });

    let flag = engine.call("check", &[frozen.clone()]).unwrap();
    assert_eq!(flag, Value::Bool(true));

    let err = engine.call("mutate", &[frozen]).expect_err("frozen");
    let EmbedError::Runtime(runtime) = err else {
        panic!("expected runtime error");
    };
    assert_eq!(runtime.message, "cannot modify read-only value");
}

#[test]
fn test_error_results_surface_when_opted_in() {
    let mut engine = engine_with("func fail() { return error(\"denied\") }");

    // By default an error value is a normal result.
    let value = engine.call("fail", &[]).unwrap();
    assert_eq!(value, Value::error("denied"));

    engine.set_error_results_as_errors(true);
    let err = engine.call("fail", &[]).expect_err("opted in");
    let EmbedError::ErrorResult(message) = err else {
        panic!("expected error-result, got {err}");
    };
    assert_eq!(message, "denied");
}

#[test]
fn test_instruction_limit_round_trip() {
    let mut engine = engine_with("func spin() { while (true) {} }\nfunc ok() { return 1 }");
    engine.set_instruction_limit(100);
    let err = engine.call("spin", &[]).expect_err("limited");
    let EmbedError::Runtime(runtime) = err else {
        panic!("expected runtime error");
    };
    assert_eq!(runtime.message, "instruction limit exceeded");

    // The limit applies per call, not cumulatively.
    assert_eq!(engine.call("ok", &[]).unwrap(), Value::Number(1.0));
    engine.set_instruction_limit(0);
    assert_eq!(engine.call("ok", &[]).unwrap(), Value::Number(1.0));
}

#[test]
fn test_duplicate_is_independent() {
    let mut base = engine_with("func bump() { $n = $n + 1; return $n }");
    base.define_global("n", 0.0_f64);
    assert_eq!(base.call("bump", &[]).unwrap(), Value::Number(1.0));

    let mut dup = base.duplicate();
    assert_eq!(dup.call("bump", &[]).unwrap(), Value::Number(2.0));
    assert_eq!(dup.call("bump", &[]).unwrap(), Value::Number(3.0));
    assert_eq!(base.call("bump", &[]).unwrap(), Value::Number(2.0));
}

#[test]
fn test_trace_hook_via_engine() {
    let mut engine = engine_with("func f() { return 1 }");
    let count = Rc::new(Cell::new(0usize));
    {
        let count = Rc::clone(&count);
        engine.set_trace_hook(Some(Rc::new(move |_event: &rill_embed::TraceEvent| {
            count.set(count.get() + 1);
        })));
    }
    engine.call("f", &[]).unwrap();
    assert!(count.get() > 0);
}

#[test]
fn test_load_file() {
    let dir = std::env::temp_dir().join("rill-embed-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("script.rill");
    std::fs::write(&path, "func main() { return 41 + 1 }").unwrap();

    let mut engine = Engine::new();
    engine.load_file(&path).unwrap();
    assert_eq!(engine.call("main", &[]).unwrap(), Value::Number(42.0));

    let missing = engine.load_file(dir.join("missing.rill"));
    assert!(matches!(missing, Err(EmbedError::Io { .. })));
}

#[test]
fn test_disassembly_lists_loaded_functions() {
    let engine = engine_with("func alpha() { return 1 }\nfunc beta() { return 2 }");
    let listing = engine.disassembly();
    assert!(listing.contains("== alpha "), "{listing}");
    assert!(listing.contains("== beta "), "{listing}");
    assert!(listing.contains("RETURN"), "{listing}");
}

#[test]
fn test_call_unknown_function() {
    let mut engine = Engine::new();
    let err = engine.call("ghost", &[]).expect_err("unknown");
    assert!(err.to_string().contains("global ghost not found"), "{err}");
}
