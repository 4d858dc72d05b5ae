//! End-to-end tests against the embedding API (`HyState::run_string`),
//! exercising the same scenarios the bytecode encoding is designed around.

use hydrogen_runtime::HyState;

#[test]
fn arithmetic_and_locals_fold_into_one_package_slot() {
    let mut state = HyState::default();
    let result = state.run_string(None, "let a = 3\nlet b = 4\nlet c = a * b + 2\nreturn c".into()).unwrap();
    assert_eq!(result.as_f64(), 14.0);
}

#[test]
fn short_circuit_does_not_clobber_the_left_operand() {
    let mut state = HyState::default();
    let result = state
        .run_string(None, "let a = 3\nlet b = a == 3 && a > 0\nreturn a".into())
        .unwrap();
    assert_eq!(result.as_f64(), 3.0, "`a` must still hold 3, not the boolean result of `a == 3`");

    let mut state = HyState::default();
    let result = state
        .run_string(None, "let a = 3\nlet b = a == 3 && a > 0\nreturn b".into())
        .unwrap();
    assert!(result.is_truthy());
}

#[test]
fn unary_negation_does_not_clobber_its_operand() {
    let mut state = HyState::default();
    let result = state.run_string(None, "let a = 5\nlet b = -a\nreturn a".into()).unwrap();
    assert_eq!(result.as_f64(), 5.0);
}

#[test]
fn struct_method_call_reads_its_fields() {
    let mut state = HyState::default();
    let source = "struct Point { x, y }\n\
                  fn (Point) sum() { return self.x + self.y }\n\
                  let p = new Point()\n\
                  p.x = 3\n\
                  p.y = 4\n\
                  let s = p.sum()\n\
                  return s";
    let result = state.run_string(None, source.into()).unwrap();
    assert_eq!(result.as_f64(), 7.0);
}

#[test]
fn closure_over_a_toplevel_writes_through_on_every_call() {
    let mut state = HyState::default();
    let source = "let counter = 0\n\
                  fn tick() { counter = counter + 1; return counter }\n\
                  tick()\n\
                  tick()\n\
                  tick()\n\
                  return counter";
    let result = state.run_string(None, source.into()).unwrap();
    assert_eq!(result.as_f64(), 3.0);
}

#[test]
fn array_core_methods_run_through_the_vm() {
    let mut state = HyState::default();
    let source = "let a = [10, 20, 30]\n\
                  a.push(40)\n\
                  a.insert(0, 5)\n\
                  let v = a[2]\n\
                  return v";
    let result = state.run_string(None, source.into()).unwrap();
    assert_eq!(result.as_f64(), 20.0);

    let mut state = HyState::default();
    let result = state
        .run_string(None, "let a = [10, 20, 30]\na.push(40)\na.insert(0, 5)\nreturn a.len()".into())
        .unwrap();
    assert_eq!(result.as_f64(), 5.0);

    let mut state = HyState::default();
    let result = state
        .run_string(None, "let a = [10, 20, 30]\na.push(40)\na.insert(0, 5)\nreturn a[0]".into())
        .unwrap();
    assert_eq!(result.as_f64(), 5.0);

    let mut state = HyState::default();
    let result = state
        .run_string(None, "let a = [10, 20, 30]\na.push(40)\na.insert(0, 5)\nreturn a[4]".into())
        .unwrap();
    assert_eq!(result.as_f64(), 40.0);
}

#[test]
fn string_len_is_a_core_method_too() {
    let mut state = HyState::default();
    let result = state.run_string(None, "let s = \"hello\"\nreturn s.len()".into()).unwrap();
    assert_eq!(result.as_f64(), 5.0);
}
