//! Integration tests for contexts and the call/property bridges

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use jsbridge_runtime::{
    Bindings, Context, Definer, FATAL_FILENAME, HostCallbacks, HostReply, Identity, Payload,
    RuntimeError, Scope, init_default,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

fn bindings_context() -> (Arc<Bindings>, Context) {
    init_default().unwrap();
    let bindings = Arc::new(Bindings::new());
    let ctx = Context::new(bindings.clone()).unwrap();
    (bindings, ctx)
}

#[test]
fn test_eval_values() {
    let (_bindings, ctx) = bindings_context();
    assert_eq!(ctx.eval_json("1 + 1").unwrap().as_str(), "2");
    assert_eq!(
        ctx.eval_json("'hello' + ' ' + 'world'").unwrap().as_str(),
        r#""hello world""#
    );
    let value: Value = ctx.eval_as("({ a: 1, b: [true, null] })").unwrap();
    assert_eq!(value, json!({"a": 1, "b": [true, null]}));
    assert!(ctx.eval_json("(function () {})").unwrap().is_undefined());
}

#[test]
fn test_eval_errors_are_reported() {
    let (bindings, ctx) = bindings_context();
    let err = ctx
        .eval_with_source("\n\nthrow new Error('ERROR1')", "errors.js")
        .unwrap_err();
    assert!(err.is_script_error());

    let errors = bindings.take_errors();
    assert_eq!(errors.len(), 1);
    let (context, report) = &errors[0];
    assert_eq!(*context, ctx.id());
    assert_eq!(report.filename, "errors.js");
    assert_eq!(report.message, "Error: ERROR1");

    // The context stays usable after a script error.
    assert_eq!(ctx.eval_json("'still here'").unwrap().as_str(), r#""still here""#);
}

#[test]
fn test_call_counts_and_arguments() {
    let (bindings, ctx) = bindings_context();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    bindings
        .define_function(&ctx, Identity::GLOBAL, "record", move |_, args| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Array(args))
        })
        .unwrap();

    let echoed: Value = ctx.eval_as(r#"record(1, "x", {k: [2]})"#).unwrap();
    assert_eq!(echoed, json!([1, "x", {"k": [2]}]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_undefined_arguments_are_null_in_json() {
    let (bindings, ctx) = bindings_context();
    bindings
        .define_function(&ctx, Identity::GLOBAL, "args", |_, args| Ok(Value::Array(args)))
        .unwrap();
    let echoed: Value = ctx.eval_as("args(undefined, () => 1)").unwrap();
    assert_eq!(echoed, json!([null, null]));
}

#[test]
fn test_objects_and_functions_nest() {
    let (bindings, ctx) = bindings_context();
    let math = bindings.define_object(&ctx, Identity::GLOBAL, "math").unwrap();
    let inner = bindings.define_object(&ctx, math, "inner").unwrap();
    bindings
        .define_function(&ctx, inner, "square", |_, args| {
            let n = args.first().and_then(Value::as_f64).unwrap_or(0.0);
            Ok(json!(n * n))
        })
        .unwrap();
    let n: f64 = ctx.eval_as("math.inner.square(12)").unwrap();
    assert_eq!(n, 144.0);
}

#[test]
fn test_nested_eval_from_callback() {
    let (bindings, ctx) = bindings_context();
    ctx.eval("var secret = 'from script'").unwrap();
    bindings
        .define_function(&ctx, Identity::GLOBAL, "peek", |scope, _| {
            let value: String = scope.eval_as("secret").map_err(|e| e.to_string())?;
            Ok(json!(format!("host saw {value}")))
        })
        .unwrap();
    let seen: String = ctx.eval_as("peek()").unwrap();
    assert_eq!(seen, "host saw from script");
}

#[test]
fn test_failed_nested_eval_is_reported_once() {
    let (bindings, ctx) = bindings_context();
    bindings
        .define_function(&ctx, Identity::GLOBAL, "inner", |scope, _| {
            scope
                .eval_with_source("throw new Error('inner')", "inner.js")
                .map_err(|e| e.to_string())?;
            Ok(Value::Null)
        })
        .unwrap();
    bindings
        .define_function(&ctx, Identity::GLOBAL, "swallow", |scope, _| {
            assert!(scope.in_callback());
            let failed = scope.eval("throw new Error('quiet')").is_err();
            Ok(json!(failed))
        })
        .unwrap();

    let err = ctx.eval_with_source("inner()", "outer.js").unwrap_err();
    assert!(err.is_script_error());
    let errors = bindings.take_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1.filename, "outer.js");
    assert!(errors[0].1.message.contains("inner"));

    // A nested failure the host handles never reaches the error channel.
    let failed: bool = ctx.eval_as("swallow()").unwrap();
    assert!(failed);
    assert!(bindings.take_errors().is_empty());
}

#[test]
fn test_script_cannot_reach_the_registry() {
    let (bindings, ctx) = bindings_context();
    bindings
        .define_function(&ctx, Identity::GLOBAL, "f", |_, _| Ok(json!(42)))
        .unwrap();
    assert_eq!(ctx.eval_json("f()").unwrap().as_str(), "42");

    ctx.eval(
        "for (const key of Reflect.ownKeys(globalThis)) {
             const value = globalThis[key];
             if (Array.isArray(value)) { value.length = 0; value[0] = 5; }
         }
         try { globalThis.__jsbridge_id__ = 7; } catch (e) {}
         try { f.__jsbridge_id__ = 9; } catch (e) {}",
    )
    .unwrap();

    assert_eq!(ctx.eval_json("f()").unwrap().as_str(), "42");
    assert!(ctx.contains(Identity::GLOBAL).unwrap());
    bindings
        .define_object(&ctx, Identity::GLOBAL, "fresh")
        .unwrap();
    assert!(bindings.take_errors().is_empty());
}

#[test]
fn test_many_properties() {
    let (bindings, ctx) = bindings_context();
    let cells: Vec<_> = (0..20)
        .map(|i| {
            bindings
                .define_property(&ctx, Identity::GLOBAL, &format!("p{i}"), json!(i))
                .unwrap()
        })
        .collect();
    let total: i64 = ctx
        .eval_as("let t = 0; for (let i = 0; i < 20; i++) t += globalThis['p' + i]; t")
        .unwrap();
    assert_eq!(total, 190);

    ctx.eval("p7 = 'seven'").unwrap();
    assert_eq!(cells[7].get(), json!("seven"));
}

/// Host holding a weak handle to the context it serves
struct Reentering {
    outer: Mutex<Weak<Context>>,
    outcome: Mutex<Option<String>>,
}

impl HostCallbacks for Reentering {
    fn on_call(&self, _: &Scope<'_>, _: Identity, _: &str, _: &Payload) -> HostReply {
        let outer = self.outer.lock().upgrade();
        let outcome = match outer {
            Some(ctx) => match ctx.eval("1") {
                Err(RuntimeError::Reentrant) => "rejected".to_string(),
                other => format!("{other:?}"),
            },
            None => "gone".to_string(),
        };
        *self.outcome.lock() = Some(outcome);
        Ok(String::new())
    }
}

#[test]
fn test_reentering_outer_handle_is_rejected() {
    init_default().unwrap();
    let host = Arc::new(Reentering {
        outer: Mutex::new(Weak::new()),
        outcome: Mutex::new(None),
    });
    let ctx = Arc::new(Context::new(host.clone()).unwrap());
    *host.outer.lock() = Arc::downgrade(&ctx);

    ctx.define_function(Identity::GLOBAL, "reenter", Identity::new(1))
        .unwrap();
    ctx.eval("reenter()").unwrap();
    assert_eq!(host.outcome.lock().as_deref(), Some("rejected"));

    // Not busy anymore once the outer evaluation returned.
    assert!(ctx.eval("1").is_ok());
}

#[test]
fn test_context_is_thread_affine() {
    let (_bindings, ctx) = bindings_context();
    assert!(ctx.thread_can_access());
    let ctx = Arc::new(ctx);
    let remote = ctx.clone();
    let (can_access, err) = std::thread::spawn(move || {
        (remote.thread_can_access(), remote.eval_json("1").unwrap_err())
    })
    .join()
    .unwrap();
    assert!(!can_access);
    assert!(matches!(
        err,
        RuntimeError::Core(jsbridge_runtime::CoreError::WrongThread)
    ));
}

#[test]
fn test_out_of_memory_poisons_context() {
    init_default().unwrap();
    let bindings = Arc::new(Bindings::new());
    let ctx = Context::builder()
        .memory_limit(Some(16 << 20))
        .build(bindings.clone())
        .unwrap();

    let err = ctx
        .eval("const chunks = []; while (true) chunks.push(new Uint8Array(1 << 20));")
        .unwrap_err();
    assert!(err.is_out_of_memory());
    assert!(ctx.is_poisoned());
    assert!(matches!(
        ctx.eval("1"),
        Err(RuntimeError::ContextPoisoned(id)) if id == ctx.id()
    ));

    let fatal: Vec<_> = bindings
        .take_errors()
        .into_iter()
        .filter(|(_, report)| report.filename == FATAL_FILENAME)
        .collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].1.line, 0);
}

#[test]
fn test_destroy_updates_stats() {
    let engine = init_default().unwrap();
    let before = engine.stats().snapshot().contexts_destroyed;
    let (_bindings, ctx) = bindings_context();
    ctx.destroy();
    assert!(engine.stats().snapshot().contexts_destroyed > before);
}
