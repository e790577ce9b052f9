// rill-vm - Interpreter behaviour tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::cell::Cell;
use std::rc::Rc;

use rill_parser::Parser;
use rill_vm::{BuiltinRegistry, Module, RuntimeError, Value, Vm, compile};

fn compile_module(src: &str) -> Module {
    let mut parser = Parser::from_source(src);
    let program = parser.parse_program();
    assert!(
        parser.errors().is_empty(),
        "parser errors: {:?}",
        parser.errors()
    );
    let builtins = BuiltinRegistry::standard();
    compile(&program, "inline", &builtins).expect("compile error")
}

fn vm_with(src: &str) -> Vm {
    let module = compile_module(src);
    let mut vm = Vm::new(Rc::new(BuiltinRegistry::standard()));
    vm.load_module(&module);
    vm
}

fn run(src: &str, entry: &str, args: &[Value]) -> Value {
    vm_with(src)
        .call(entry, args)
        .unwrap_or_else(|e| panic!("vm error: {e}"))
}

fn run_err(src: &str, entry: &str, args: &[Value]) -> RuntimeError {
    vm_with(src)
        .call(entry, args)
        .expect_err("expected runtime error")
}

#[test]
fn test_function_call() {
    let v = run(
        "func add($a,$b){return $a+$b}",
        "add",
        &[Value::Number(2.0), Value::Number(3.0)],
    );
    assert_eq!(v, Value::Number(5.0));
}

#[test]
fn test_closure_over_parameter() {
    let src = "func makeAdder($x){return func($y){return $x+$y}}\n\
               func run(){$f:=makeAdder(10); return $f(5)}";
    assert_eq!(run(src, "run", &[]), Value::Number(15.0));
}

#[test]
fn test_for_over_range() {
    let src = "func s(){$t:=0; for ($v in [0..3]){$t=$t+$v} return $t}";
    assert_eq!(run(src, "s", &[]), Value::Number(6.0));
}

#[test]
fn test_for_over_object_keys_and_values() {
    // Copying through the [$k, $v] binding exercises the key and the value
    // of every pair independently.
    let src = "func copy(){$o:={a:1,b:2}; $out:={}; for([$k,$v] in $o){$out[$k]=$v} return $out}\n\
               func sum(){$o:={a:1,b:2}; $t:=0; for([$k,$v] in $o){$t=$t+$v} return $t}";
    let Value::Object(object) = run(src, "copy", &[]) else {
        panic!("expected object");
    };
    let fields = object.fields.borrow();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields.get("a"), Some(&Value::Number(1.0)));
    assert_eq!(fields.get("b"), Some(&Value::Number(2.0)));
    let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["a", "b"], "keys arrive in insertion order");
    drop(fields);

    assert_eq!(run(src, "sum", &[]), Value::Number(3.0));
}

#[test]
fn test_index_out_of_bounds_error_context() {
    let err = run_err("func bad(){$a:=[1]; return $a[5]}", "bad", &[]);
    assert_eq!(err.message, "index out of bounds");
    assert_eq!(err.frame.function, "bad");
    assert_eq!(err.frame.source, "inline");
    assert_eq!(err.frame.line, 1);
}

#[test]
fn test_instruction_limit() {
    let mut vm = vm_with("func spin(){while(true){}}");
    vm.set_instruction_limit(50);
    let err = vm.call("spin", &[]).expect_err("expected limit error");
    assert_eq!(err.message, "instruction limit exceeded");
    assert_eq!(err.frame.function, "spin");
}

#[test]
fn test_instruction_limit_zero_is_unlimited() {
    let mut vm = vm_with("func f(){$t:=0; for ($v in [0..100]){$t=$t+$v} return $t}");
    vm.set_instruction_limit(0);
    assert_eq!(vm.call("f", &[]).unwrap(), Value::Number(5050.0));
}

#[test]
fn test_empty_body_returns_null() {
    assert_eq!(run("func nothing(){}", "nothing", &[]), Value::Null);
}

#[test]
fn test_return_without_value() {
    assert_eq!(run("func f(){return}", "f", &[]), Value::Null);
}

#[test]
fn test_extra_arguments_dropped_missing_are_null() {
    let src = "func f($a,$b){return typeof($b)}";
    assert_eq!(run(src, "f", &[Value::Number(1.0)]), Value::string("null"));
    assert_eq!(
        run(
            src,
            "f",
            &[Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
        ),
        Value::string("number")
    );
}

#[test]
fn test_if_elseif_else_chain() {
    let src = "func grade($x) {
  if ($x > 2) { return 3 } elseif ($x > 1) { return 2 } elseif ($x > 0) { return 1 } else { return 0 }
}";
    assert_eq!(run(src, "grade", &[Value::Number(9.0)]), Value::Number(3.0));
    assert_eq!(run(src, "grade", &[Value::Number(2.0)]), Value::Number(2.0));
    assert_eq!(run(src, "grade", &[Value::Number(1.0)]), Value::Number(1.0));
    assert_eq!(run(src, "grade", &[Value::Number(0.0)]), Value::Number(0.0));
}

#[test]
fn test_elseif_branch_skips_else() {
    // The elseif consequent must jump past the else branch.
    let src = "func f($x) {
  $r := 0
  if ($x > 10) { $r = 1 } elseif ($x > 5) { $r = 2 } else { $r = 3 }
  return $r
}";
    assert_eq!(run(src, "f", &[Value::Number(7.0)]), Value::Number(2.0));
}

#[test]
fn test_short_circuit_values() {
    let src = "func a(){return false && boom()}\n\
               func b(){return null || 3}\n\
               func c(){return 1 || boom()}\n\
               func d(){return 0 && 5}";
    // boom is undefined; short-circuit must avoid evaluating it.
    assert_eq!(run(src, "a", &[]), Value::Bool(false));
    assert_eq!(run(src, "b", &[]), Value::Number(3.0));
    assert_eq!(run(src, "c", &[]), Value::Number(1.0));
    // 0 is truthy, so && evaluates the right operand.
    assert_eq!(run(src, "d", &[]), Value::Number(5.0));
}

#[test]
fn test_truthiness_in_conditions() {
    let src = "func f($x){ if ($x) { return 1 } return 2 }";
    assert_eq!(run(src, "f", &[Value::Number(0.0)]), Value::Number(1.0));
    assert_eq!(run(src, "f", &[Value::string("")]), Value::Number(1.0));
    assert_eq!(run(src, "f", &[Value::Null]), Value::Number(2.0));
    assert_eq!(run(src, "f", &[Value::Bool(false)]), Value::Number(2.0));
}

#[test]
fn test_while_loop() {
    let src = "func f(){$i:=0; $t:=0; while($i<5){$t=$t+$i; $i=$i+1} return $t}";
    assert_eq!(run(src, "f", &[]), Value::Number(10.0));
}

#[test]
fn test_open_upvalue_writes_are_shared_with_locals() {
    let src = "func counter() {
  $n := 0
  $inc := func() { $n = $n + 1; return $n }
  $inc()
  $inc()
  return $n
}";
    assert_eq!(run(src, "counter", &[]), Value::Number(2.0));
}

#[test]
fn test_closed_upvalue_persists_across_calls() {
    let src = "func makeCounter(){$n:=0; return func(){$n=$n+1; return $n}}\n\
               func use(){$c:=makeCounter(); $c(); $c(); return $c()}";
    assert_eq!(run(src, "use", &[]), Value::Number(3.0));
}

#[test]
fn test_two_closures_share_one_cell() {
    let src = "func share() {
  $n := 0
  $bump := func() { $n = $n + 10; return null }
  $read := func() { return $n }
  $bump()
  return $read()
}";
    assert_eq!(run(src, "share", &[]), Value::Number(10.0));
}

#[test]
fn test_capture_through_two_levels() {
    let src = "func outer() {
  $x := 7
  $mid := func() { return func() { return $x } }
  return $mid()()
}";
    assert_eq!(run(src, "outer", &[]), Value::Number(7.0));
}

#[test]
fn test_nested_function_declaration_is_local() {
    // A nested declaration binds a local, referenced with variable syntax.
    let src = "func outer(){ func helper(){return 4} return $helper()}";
    assert_eq!(run(src, "outer", &[]), Value::Number(4.0));
    // It does not become a global.
    let err = vm_with(src).call("helper", &[]).expect_err("not global");
    assert_eq!(err.message, "global helper not found");
}

#[test]
fn test_object_iteration_order_is_insertion_order() {
    let src = "func keys() {
  $o := {b: 1, a: 2, c: 3}
  $out := [0, 0, 0]
  $i := 0
  for ([$k, $v] in $o) { $out[$i] = $k; $i = $i + 1 }
  return $out
}";
    let Value::Array(array) = run(src, "keys", &[]) else {
        panic!("expected array");
    };
    let keys: Vec<String> = array
        .elements
        .borrow()
        .iter()
        .map(|v| v.to_string())
        .collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
}

#[test]
fn test_range_boundaries() {
    let src = "func single(){return [0..0]}\nfunc down(){return [3..0]}";
    let Value::Array(single) = run(src, "single", &[]) else {
        panic!("expected array");
    };
    assert_eq!(single.len(), 1);
    let Value::Array(down) = run(src, "down", &[]) else {
        panic!("expected array");
    };
    let values: Vec<String> = down.elements.borrow().iter().map(|v| v.to_string()).collect();
    assert_eq!(values, vec!["3", "2", "1", "0"]);
}

#[test]
fn test_array_index_get_and_set() {
    let src = "func f(){$a:=[1,2,3]; $a[1]=20; return $a[1]+$a[2]}";
    assert_eq!(run(src, "f", &[]), Value::Number(23.0));
}

#[test]
fn test_object_member_and_index_access() {
    let src = "func f() {
  $o := {a: 1}
  $o.b = 2
  $o[\"c\"] = 3
  $o[4] = 4
  return $o.a + $o.b + $o[\"c\"] + $o[4]
}";
    assert_eq!(run(src, "f", &[]), Value::Number(10.0));
}

#[test]
fn test_equality_semantics() {
    let src = "func scalars(){return 1 == 1 && \"a\" == \"a\" && null == null && !(1 == \"1\")}\n\
               func arrays(){$a:=[1]; $b:=[1]; return $a == $b}\n\
               func same(){$a:=[1]; $b:=$a; return $a == $b}";
    assert_eq!(run(src, "scalars", &[]), Value::Bool(true));
    assert_eq!(run(src, "arrays", &[]), Value::Bool(false));
    assert_eq!(run(src, "same", &[]), Value::Bool(true));
}

#[test]
fn test_globals_shared_between_functions() {
    let src = "func setit(){$g = 5; return null}\nfunc getit(){return $g}";
    let mut vm = vm_with(src);
    vm.call("setit", &[]).unwrap();
    assert_eq!(vm.call("getit", &[]).unwrap(), Value::Number(5.0));
    assert_eq!(vm.global("g"), Some(Value::Number(5.0)));
}

#[test]
fn test_define_global_binding() {
    let src = "func f($x){return $x * basis}";
    let mut vm = vm_with(src);
    vm.define_global("basis", Value::Number(3.0));
    assert_eq!(
        vm.call("f", &[Value::Number(4.0)]).unwrap(),
        Value::Number(12.0)
    );
}

#[test]
fn test_native_function_call() {
    let src = "func f($x){return double($x) + 1}";
    let mut vm = vm_with(src);
    let double: rill_vm::NativeFn = Rc::new(|args: &[Value]| match args.first() {
        Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
        _ => Err("double expects a number".to_string()),
    });
    vm.define_global(
        "double",
        Value::function(rill_vm::Function::from_native("double", "host", double)),
    );
    assert_eq!(
        vm.call("f", &[Value::Number(5.0)]).unwrap(),
        Value::Number(11.0)
    );

    let err = vm
        .call("f", &[Value::string("nope")])
        .expect_err("native error should surface");
    assert_eq!(err.message, "double expects a number");
    assert_eq!(err.cause.as_deref(), Some("double expects a number"));
    assert_eq!(err.frame.function, "f", "frame context is the script caller");
}

#[test]
fn test_call_stack_overflow() {
    let err = run_err("func rec(){return rec()}", "rec", &[]);
    assert_eq!(err.message, "call stack overflow");
}

#[test]
fn test_error_builtin_is_normal_control_flow() {
    let v = run("func e(){return error(\"boom\")}", "e", &[]);
    assert_eq!(v, Value::error("boom"));
}

#[test]
fn test_builtins() {
    let cases: &[(&str, Value)] = &[
        ("func demo(){return typeof(123)}", Value::string("number")),
        ("func demo(){return typeof([1])}", Value::string("array")),
        ("func demo(){return indexExist([1], 0)}", Value::Bool(true)),
        ("func demo(){return indexExist([1], 5)}", Value::Bool(false)),
        (
            "func demo(){return indexRead([1], 5, \"def\")}",
            Value::string("def"),
        ),
        (
            "func demo(){return indexRead([7], 0, \"def\")}",
            Value::Number(7.0),
        ),
        (
            "func demo(){return valueExist([1, 2, 3], 2)}",
            Value::Bool(true),
        ),
        (
            "func demo(){return valueExist([1, 2, 3], 9)}",
            Value::Bool(false),
        ),
        ("func demo(){return readonly({})}", Value::Bool(false)),
        ("func demo(){return readonly(3)}", Value::Bool(false)),
    ];
    for (src, expected) in cases {
        assert_eq!(&run(src, "demo", &[]), expected, "{src}");
    }
}

#[test]
fn test_readonly_flag_observed_and_enforced() {
    let src = "func check($o){return readonly($o)}\n\
               func mutate($o){$o.a = 9; return null}";
    let mut vm = vm_with(src);
    let obj = Value::object(indexmap::IndexMap::from_iter([(
        "a".to_string(),
        Value::Number(1.0),
    )]));
    obj.mark_read_only();
    assert_eq!(vm.call("check", &[obj.clone()]).unwrap(), Value::Bool(true));
    let err = vm.call("mutate", &[obj]).expect_err("read-only write");
    assert_eq!(err.message, "cannot modify read-only value");
}

#[test]
fn test_unary_operators() {
    let src = "func f(){return -3 + +5}\nfunc g(){return !null}\nfunc h(){return !0}";
    assert_eq!(run(src, "f", &[]), Value::Number(2.0));
    assert_eq!(run(src, "g", &[]), Value::Bool(true));
    assert_eq!(run(src, "h", &[]), Value::Bool(false));
}

#[test]
fn test_stack_is_clean_after_invocations() {
    let src = "func ok(){return 1}\nfunc bad(){return [1][9]}";
    let mut vm = vm_with(src);
    vm.call("ok", &[]).unwrap();
    vm.call("bad", &[]).expect_err("expected error");
    // A failed call must not poison the next one.
    assert_eq!(vm.call("ok", &[]).unwrap(), Value::Number(1.0));
}

#[test]
fn test_trace_hook_sees_every_dispatch() {
    let mut vm = vm_with("func demo(){return 1 + 2}");
    let count = Rc::new(Cell::new(0usize));
    let seen_fn = Rc::new(Cell::new(false));
    {
        let count = Rc::clone(&count);
        let seen_fn = Rc::clone(&seen_fn);
        vm.set_trace_hook(Some(Rc::new(move |event: &rill_vm::TraceEvent| {
            count.set(count.get() + 1);
            if event.function == "demo" && event.source == "inline" {
                seen_fn.set(true);
            }
        })));
    }
    vm.call("demo", &[]).unwrap();
    // CONST, CONST, ADD, RETURN
    assert_eq!(count.get(), 4);
    assert!(seen_fn.get());

    vm.set_trace_hook(None);
    vm.call("demo", &[]).unwrap();
    assert_eq!(count.get(), 4, "cleared hook no longer fires");
}

#[test]
fn test_sequential_loops_use_fresh_iterators() {
    let src = "func f() {
  $sum := 0
  for ($v in [1, 2, 3]) { $sum = $sum + $v }
  for ($v in [1, 2, 3]) { $sum = $sum + $v }
  return $sum
}";
    assert_eq!(run(src, "f", &[]), Value::Number(12.0));
}

#[test]
fn test_duplicate_vm_runs_independently() {
    let src = "func next(){$counter = $counter + 1; return $counter}";
    let mut base = vm_with(src);
    base.define_global("counter", Value::Number(0.0));
    assert_eq!(base.call("next", &[]).unwrap(), Value::Number(1.0));

    let mut dup = base.duplicate();
    assert_eq!(dup.call("next", &[]).unwrap(), Value::Number(2.0));
    assert_eq!(dup.call("next", &[]).unwrap(), Value::Number(3.0));
    // The base counter only advanced once more.
    assert_eq!(base.call("next", &[]).unwrap(), Value::Number(2.0));
}
