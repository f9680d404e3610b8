use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::rc::Rc;
use zelo::language::parser::parse_source;
use zelo::runtime::error::{ErrorClass, ErrorKind};
use zelo::runtime::value::Value;
use zelo::runtime::Interpreter;

fn capture() -> (Rc<RefCell<Vec<u8>>>, Interpreter) {
    let buffer = Rc::new(RefCell::new(Vec::new()));
    let sink: Rc<RefCell<dyn Write>> = buffer.clone();
    (buffer, Interpreter::with_writer(sink))
}

fn run(source: &str) -> String {
    let (buffer, mut interpreter) = capture();
    let statements = parse_source(source).expect("program should parse");
    interpreter
        .interpret(&statements)
        .expect("program should run");
    let bytes = buffer.borrow().clone();
    String::from_utf8(bytes).expect("output should be utf-8")
}

fn run_err(source: &str) -> zelo::runtime::error::RuntimeError {
    let (_, mut interpreter) = capture();
    let statements = parse_source(source).expect("program should parse");
    interpreter
        .interpret(&statements)
        .expect_err("program should fail")
}

#[test]
fn arithmetic_and_print() {
    assert_eq!(run("print(1 + 2 * 3);"), "7\n");
}

#[test]
fn closure_over_mutable_free_variable() {
    let source = "loc n = 0; func inc() { n = n + 1; return n; } print(inc()); print(inc());";
    assert_eq!(run(source), "1\n2\n");
}

#[test]
fn closures_observe_later_mutation_of_captured_scope() {
    let source = "loc x = 1; func get() { return x; } x = 99; print(get());";
    assert_eq!(run(source), "99\n");
}

#[test]
fn class_with_operator_overload() {
    let source = "\
class V {
    func __init__(x) { this.x = x; }
    func __add__(o) { return V(this.x + o.x); }
}
loc a = V(1);
loc b = V(2);
print((a + b).x);
";
    assert_eq!(run(source), "3\n");
}

#[test]
fn try_catch_throw() {
    assert_eq!(run("try { throw \"oops\"; } catch (e) { print(e); }"), "oops\n");
}

#[test]
fn slice_with_negative_step() {
    assert_eq!(run("loc a = [1,2,3,4,5]; print(a[4:0:-2]);"), "[5, 3]\n");
}

#[test]
fn cycle_reclamation_is_observable() {
    let (_, mut interpreter) = capture();
    let build = parse_source("loc a = {}; loc b = {}; a.b = b; b.a = a;").unwrap();
    interpreter.interpret(&build).unwrap();
    let a = interpreter.globals().borrow().get_local("a").unwrap();
    let b = interpreter.globals().borrow().get_local("b").unwrap();
    assert!(interpreter.gc().is_tracked(&a));
    assert!(interpreter.gc().is_tracked(&b));

    let unlink = parse_source("a = null; b = null;").unwrap();
    interpreter.interpret(&unlink).unwrap();
    interpreter.collect_garbage();
    assert!(!interpreter.gc().is_tracked(&a));
    assert!(!interpreter.gc().is_tracked(&b));
}

#[test]
fn rooted_cycle_survives_collection() {
    let (_, mut interpreter) = capture();
    let build = parse_source("loc a = {}; loc b = {}; a.b = b; b.a = a;").unwrap();
    interpreter.interpret(&build).unwrap();
    interpreter.collect_garbage();
    let a = interpreter.globals().borrow().get_local("a").unwrap();
    let b = interpreter.globals().borrow().get_local("b").unwrap();
    assert!(interpreter.gc().is_tracked(&a));
    assert!(interpreter.gc().is_tracked(&b));
}

#[test]
fn integer_division_identity() {
    for i in [-7i64, -3, 0, 3, 7, 10] {
        for j in [-3i64, -2, 2, 5] {
            let source = format!("print(({i} / {j}) * {j} + ({i} % {j}) == {i});");
            assert_eq!(run(&source), "true\n", "i={i} j={j}");
        }
    }
}

#[test]
fn slice_lengths_match_the_closed_form() {
    let source = "loc a = [0,1,2,3,4,5,6,7,8,9];";
    for (slice, expected) in [
        ("a[2:8:2]", 3),
        ("a[0:10:3]", 4),
        ("a[8:2:-2]", 3),
        ("a[9::-1]", 10),
        ("a[::2]", 5),
        ("a[5:5]", 0),
        ("a[-3:]", 3),
        ("a[:-8]", 2),
    ] {
        let program = format!("{source} print(len({slice}));");
        assert_eq!(run(&program), format!("{expected}\n"), "{slice}");
    }
}

#[test]
fn truthiness_and_ternary() {
    assert_eq!(run("print(0 ? \"t\" : \"f\");"), "t\n");
    assert_eq!(run("print(null ? \"t\" : \"f\");"), "f\n");
    assert_eq!(run("print(!null, !0, !false);"), "true false true\n");
}

#[test]
fn string_concatenation_promotes_either_side() {
    assert_eq!(run("print(\"n=\" + 4); print(4 + \"!\");"), "n=4\n4!\n");
}

#[test]
fn division_by_zero_is_caught_as_runtime_error() {
    let err = run_err("loc x = 1 / 0;");
    assert!(matches!(err.kind, ErrorKind::DivisionByZero));
    assert_eq!(
        run("try { loc x = 1 / 0; } catch (e) { print(e); }"),
        "Division by zero\n"
    );
}

#[test]
fn typed_catch_filters_on_the_error_value() {
    let source = "\
try { throw 42; } catch (e : string) { print(\"string\"); }
";
    let err = run_err(source);
    assert!(matches!(err.kind, ErrorKind::Thrown { .. }));
    let source = "try { throw 42; } catch (e : int) { print(e + 1); }";
    assert_eq!(run(source), "43\n");
}

#[test]
fn const_rebinding_is_invalid() {
    let err = run_err("const c = 1; c = 2;");
    assert!(matches!(err.kind, ErrorKind::InvalidOperation { .. }));
}

#[test]
fn annotation_mismatch_is_reported() {
    let err = run_err("loc x: int = \"nope\";");
    assert_eq!(err.class(), ErrorClass::Type);
}

#[test]
fn union_annotation_accepts_either_variant() {
    assert_eq!(run("loc x: int|float = 2.5; print(x);"), "2.5\n");
}

#[test]
fn arrays_alias_and_clone_copies() {
    let source = "\
loc a = [1, 2];
loc b = a;
array_push(b, 3);
print(a);
loc c = array_clone(a);
array_push(c, 4);
print(a, c);
";
    assert_eq!(run(source), "[1, 2, 3]\n[1, 2, 3] [1, 2, 3, 4]\n");
}

#[test]
fn negative_index_counts_from_the_end() {
    assert_eq!(run("loc a = [1,2,3]; print(a[-1]);"), "3\n");
    let err = run_err("loc a = [1,2,3]; a[-4];");
    assert!(matches!(err.kind, ErrorKind::IndexOutOfBounds { .. }));
}

#[test]
fn dict_write_inserts_and_read_requires_presence() {
    assert_eq!(
        run("loc d = {}; d[\"k\"] = 1; d[\"k\"] += 4; print(d[\"k\"]);"),
        "5\n"
    );
    let err = run_err("loc d = {}; d[\"missing\"];");
    assert!(matches!(err.kind, ErrorKind::KeyNotFound { .. }));
}

#[test]
fn dict_literal_later_duplicates_win() {
    assert_eq!(run("print({\"k\": 1, \"k\": 2});"), "{k: 2}\n");
}

#[test]
fn for_loop_over_array_with_break_and_continue() {
    let source = "\
loc total = 0;
for (x in [1, 2, 3, 4, 5]) {
    if x == 2 then continue;
    if x == 5 then break;
    total = total + x;
}
print(total);
";
    assert_eq!(run(source), "8\n");
}

#[test]
fn for_over_dict_is_rejected() {
    let err = run_err("for (x in {\"a\": 1}) { print(x); }");
    assert_eq!(err.class(), ErrorClass::Type);
}

#[test]
fn while_loop_with_compound_assignment() {
    let source = "loc i = 0; loc sum = 0; while i < 4 { sum += i; i += 1; } print(sum);";
    assert_eq!(run(source), "6\n");
}

#[test]
fn missing_trailing_arguments_bind_null_and_extra_error() {
    assert_eq!(run("func f(a, b) { return b; } print(f(1));"), "null\n");
    let err = run_err("func f(a) { return a; } f(1, 2);");
    assert!(matches!(err.kind, ErrorKind::ArityMismatch { .. }));
}

#[test]
fn inheritance_walks_the_superclass_chain() {
    let source = "\
class A {
    func greet() { return \"A\"; }
    func name() { return \"base\"; }
}
class B : A {
    func name() { return \"derived\"; }
}
loc b = B();
print(b.greet(), b.name());
";
    assert_eq!(run(source), "A derived\n");
}

#[test]
fn getattr_and_setattr_protocols() {
    let source = "\
class Proxy {
    func __getattr__(name) { return \"missing:\" + name; }
}
loc p = Proxy();
print(p.anything);
";
    assert_eq!(run(source), "missing:anything\n");
}

#[test]
fn method_binding_is_transient_and_sees_this() {
    let source = "\
class Counter {
    func __init__() { this.n = 0; }
    func bump() { this.n = this.n + 1; return this.n; }
}
loc c = Counter();
loc m = c.bump;
print(m());
print(c.bump());
";
    assert_eq!(run(source), "1\n2\n");
}

#[test]
fn namespace_members_resolve_through_the_namespace_name() {
    let source = "\
namespace util {
    func double(x) { return x * 2; }
    loc version = 3;
}
print(util.double(21), util.version);
";
    assert_eq!(run(source), "42 3\n");
}

#[test]
fn escaping_signals_are_errors_at_top_level() {
    assert!(matches!(run_err("break;").kind, ErrorKind::Syntax { .. }));
    assert!(matches!(run_err("return 1;").kind, ErrorKind::InvalidReturn));
}

#[test]
fn conversion_builtins_cast() {
    assert_eq!(run("print(int(\"42\") + 1);"), "43\n");
    assert_eq!(run("print(float(2) / 4);"), "0.5\n");
    assert_eq!(run("print(bool(\"false\"), bool(\"x\"), str(12) + \"!\");"), "false true 12!\n");
    let err = run_err("int(\"4x\");");
    assert_eq!(err.class(), ErrorClass::Type);
}

#[test]
fn macros_rewrite_before_parsing() {
    let source = "macro SQUARE(x) ((x) * (x)); print(SQUARE(3 + 1));";
    assert_eq!(run(source), "16\n");
}

#[test]
fn macro_bodies_are_not_rescanned_at_runtime() {
    // Expansion is single-pass: TWO inside DOUBLE's body stays a literal
    // identifier and resolves (here: fails) through ordinary scope lookup.
    let err = run_err("macro TWO 2; macro DOUBLE(x) (x * TWO); print(DOUBLE(5));");
    assert!(matches!(err.kind, ErrorKind::UndefinedVariable { .. }));
}

#[test]
fn typeof_is_an_alias_of_type() {
    assert_eq!(run("print(typeof(1), type(1), typeof([1]));"), "int int array\n");
}

#[test]
fn char_and_ordinal_builtins_round_trip() {
    assert_eq!(run("print(chr(65), ord(\"A\"));"), "A 65\n");
    let err = run_err("ord(\"\");");
    assert_eq!(err.class(), ErrorClass::Type);
}

#[test]
fn repr_quotes_strings_only() {
    assert_eq!(run("print(repr(\"hi\"), repr(3), repr(null));"), "\"hi\" 3 null\n");
}

#[test]
fn hash_is_stable_for_equal_renderings() {
    assert_eq!(
        run("print(hash(\"a\") == hash(\"a\"), is_int(hash(\"a\")));"),
        "true true\n"
    );
}

#[test]
fn panic_raises_a_catchable_runtime_error() {
    assert_eq!(run("try { panic(\"boom\"); } catch (e) { print(e); }"), "boom\n");
}

#[test]
fn isinstance_matches_type_name_strings() {
    assert_eq!(
        run("print(isinstance(1, \"int|string\"), isinstance(1.5, \"int\"), isinstance({}, \"dict\"));"),
        "true false true\n"
    );
    let err = run_err("isinstance(1, \"widget\");");
    assert_eq!(err.class(), ErrorClass::Type);
}

#[test]
fn array_push_returns_the_new_length() {
    assert_eq!(run("loc a = [1]; print(array_push(a, 2));"), "2\n");
}

#[test]
fn array_slice_builtin_takes_call_style_bounds() {
    let source = "loc a = [0,1,2,3,4]; print(array_slice(a, 1, 4)); print(array_slice(a, -2));";
    assert_eq!(run(source), "[1, 2, 3]\n[3, 4]\n");
}

#[test]
fn object_introspection_builtins_list_names() {
    let source = "\
class P {
    func __init__() { this.x = 1; this.y = 2; }
    func go() { return 0; }
}
loc p = P();
print(object_fields(p));
print(object_methods(p));
";
    assert_eq!(run(source), "[x, y]\n[__init__, go]\n");
}

#[test]
fn bitwise_and_shift_operators() {
    assert_eq!(run("print(6 & 3, 6 | 3, 6 ^ 3, 1 << 4, 32 >> 2, ~0);"), "2 7 5 16 8 -1\n");
}

#[test]
fn increment_yields_without_mutating() {
    assert_eq!(run("loc x = 5; print(++x); print(x);"), "6\n5\n");
}

mod modules {
    use super::*;
    use std::path::Path;

    fn interpreter_with_base(base: &Path) -> (Rc<RefCell<Vec<u8>>>, Interpreter) {
        let (buffer, mut interpreter) = capture();
        interpreter.set_module_base_path(base);
        (buffer, interpreter)
    }

    #[test]
    fn import_with_names_reads_exports() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("math.z"),
            "func double(x) { return x * 2; } loc three = 3; export { double, three };",
        )
        .unwrap();
        let (buffer, mut interpreter) = interpreter_with_base(dir.path());
        let program =
            parse_source("import { double, three } from \"math\"; print(double(three));").unwrap();
        interpreter.interpret(&program).unwrap();
        assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "6\n");
    }

    #[test]
    fn import_as_binds_a_scope_value() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("m.z"),
            "export func inc(x) { return x + 1; };",
        )
        .unwrap();
        let (buffer, mut interpreter) = interpreter_with_base(dir.path());
        let program = parse_source("import { inc } from \"m\" as m; print(m.inc(41));").unwrap();
        interpreter.interpret(&program).unwrap();
        assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "42\n");
    }

    #[test]
    fn module_without_exports_exposes_its_scope() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("raw.z"), "loc answer = 42;").unwrap();
        let (buffer, mut interpreter) = interpreter_with_base(dir.path());
        let program = parse_source("import { answer } from \"raw\"; print(answer);").unwrap();
        interpreter.interpret(&program).unwrap();
        assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "42\n");
    }

    #[test]
    fn require_caches_and_include_does_not() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("counted.z"), "print(\"loaded\");").unwrap();
        let (buffer, mut interpreter) = interpreter_with_base(dir.path());

        let first = interpreter.require_module("counted", 1).unwrap();
        let second = interpreter.require_module("counted", 1).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "loaded\n");

        let third = interpreter.include_module("counted", 1).unwrap();
        let fourth = interpreter.include_module("counted", 1).unwrap();
        assert!(!Rc::ptr_eq(&third, &fourth));
        assert_eq!(
            String::from_utf8(buffer.borrow().clone()).unwrap(),
            "loaded\nloaded\nloaded\n"
        );
    }

    #[test]
    fn require_is_reachable_from_scripts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.z"), "loc value = 7;").unwrap();
        let (buffer, mut interpreter) = interpreter_with_base(dir.path());
        let program = parse_source("loc m = require(\"lib\"); print(m.value);").unwrap();
        interpreter.interpret(&program).unwrap();
        assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "7\n");
    }

    #[test]
    fn circular_imports_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.z"), "import \"b\";").unwrap();
        fs::write(dir.path().join("b.z"), "import \"a\";").unwrap();
        let (_, mut interpreter) = interpreter_with_base(dir.path());
        let program = parse_source("import \"a\";").unwrap();
        let err = interpreter.interpret(&program).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Module);
    }

    #[test]
    fn missing_module_is_a_module_error_and_uncatchable() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut interpreter) = interpreter_with_base(dir.path());
        let program =
            parse_source("try { import \"ghost\"; } catch (e) { print(\"caught\"); }").unwrap();
        let err = interpreter.interpret(&program).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ModuleNotFound { .. }));
    }
}

#[test]
fn nested_containers_render_canonically() {
    let source = "loc d = {\"a\": [1, {\"b\": 2.5}]}; print(d);";
    assert_eq!(run(source), "{a: [1, {b: 2.5}]}\n");
}

#[test]
fn gc_entry_points_are_reachable_from_scripts() {
    let source = "\
loc before = gc_object_count();
loc garbage = [1, 2, 3];
garbage = null;
gc_collect();
print(gc_object_count() <= before + 1);
";
    assert_eq!(run(source), "true\n");
}

#[test]
fn native_registration_populates_the_globals() {
    let (buffer, mut interpreter) = capture();
    interpreter.register_native(
        "triple",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Int(v) => Ok(Value::Int(v * 3)),
            _ => Ok(Value::Null),
        }),
    );
    let program = parse_source("print(triple(14));").unwrap();
    interpreter.interpret(&program).unwrap();
    assert_eq!(String::from_utf8(buffer.borrow().clone()).unwrap(), "42\n");
}
