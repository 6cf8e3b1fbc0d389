use super::{
    CompiledScript, Diagnostic, DiagnosticLevel, Execution, ExecutionError, RawResult,
    SandboxLimits, ScriptContext,
};
use boa_engine::{
    js_string,
    native_function::NativeFunction,
    object::builtins::JsArray,
    property::{Attribute, PropertyKey},
    Context, JsError, JsNativeError, JsNativeErrorKind, JsObject, JsResult, JsValue, Script,
    Source,
};
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

/// Console lines kept per execution; later lines are dropped.
const MAX_DIAGNOSTICS: usize = 256;
const MAX_DIAGNOSTIC_LEN: usize = 8 * 1024;
/// Nesting depth beyond which a result is rejected (also stops cycles).
const MAX_RESULT_DEPTH: usize = 64;
const MAX_RESULT_ARRAY_LEN: u32 = 100_000;
/// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Freezes the request graph and makes header lookups case-insensitive.
/// Evaluated as an expression, so it never lands in the script's globals.
const REQUEST_PRELUDE: &str = r#"
(function (request) {
  var lower = function (key) {
    return typeof key === "string" ? key.toLowerCase() : key;
  };
  var deepFreeze = function (value) {
    if (value !== null && typeof value === "object" && !Object.isFrozen(value)) {
      Object.freeze(value);
      Object.getOwnPropertyNames(value).forEach(function (name) {
        deepFreeze(value[name]);
      });
    }
    return value;
  };
  deepFreeze(request);
  var headers = new Proxy(request.headers, {
    get: function (target, key) { return target[lower(key)]; },
    has: function (target, key) { return lower(key) in target; }
  });
  return Object.freeze(Object.assign({}, request, { headers: headers }));
})
"#;

thread_local! {
    static DIAGNOSTICS: RefCell<Option<Vec<Diagnostic>>> = const { RefCell::new(None) };
}

fn begin_diagnostics() {
    DIAGNOSTICS.with(|d| *d.borrow_mut() = Some(Vec::new()));
}

fn take_diagnostics() -> Vec<Diagnostic> {
    DIAGNOSTICS.with(|d| d.borrow_mut().take()).unwrap_or_default()
}

fn push_diagnostic(level: DiagnosticLevel, mut message: String) {
    if message.len() > MAX_DIAGNOSTIC_LEN {
        let mut end = MAX_DIAGNOSTIC_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
        message.push_str("...");
    }
    DIAGNOSTICS.with(|d| {
        if let Some(lines) = d.borrow_mut().as_mut() {
            if lines.len() < MAX_DIAGNOSTICS {
                lines.push(Diagnostic { level, message });
            }
        }
    });
}

/// Run `script` in a fresh context on the current thread.
///
/// The context is built for this call only and dropped afterwards, so no
/// state survives between executions. Engine panics are reported as
/// [`ExecutionError::Thrown`].
pub fn execute_script(
    script: &CompiledScript,
    request: &ScriptContext,
    limits: &SandboxLimits,
) -> Execution {
    begin_diagnostics();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| evaluate(script, request, limits)))
        .unwrap_or_else(|payload| {
            Err(ExecutionError::Thrown(format!(
                "script engine panicked: {}",
                panic_message(&*payload)
            )))
        });
    Execution {
        outcome,
        diagnostics: take_diagnostics(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn evaluate(
    script: &CompiledScript,
    request: &ScriptContext,
    limits: &SandboxLimits,
) -> Result<RawResult, ExecutionError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    install_globals(&mut context, request)
        .map_err(|e| ExecutionError::Thrown(format!("failed to prepare sandbox: {e}")))?;

    let parsed = Script::parse(
        Source::from_bytes(script.source().as_bytes()),
        None,
        &mut context,
    )
    .map_err(|e| ExecutionError::Thrown(format!("script does not parse: {e}")))?;
    let value = parsed.evaluate(&mut context).map_err(classify)?;

    let is_plain_object = value
        .as_object()
        .is_some_and(|obj| !obj.is_array() && !obj.is_callable());
    if !is_plain_object {
        return Err(ExecutionError::MalformedResult(format!(
            "script must evaluate to an object, got {}",
            describe(&value)
        )));
    }
    js_to_json(&mut context, &value, 0)
}

fn classify(error: JsError) -> ExecutionError {
    if let Some(native) = error.as_native() {
        if matches!(native.kind, JsNativeErrorKind::RuntimeLimit) {
            return ExecutionError::Timeout(native.to_string());
        }
    }
    ExecutionError::Thrown(error.to_string())
}

fn describe(value: &JsValue) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_null() {
        "null"
    } else if value.is_boolean() {
        "a boolean"
    } else if value.is_number() {
        "a number"
    } else if value.is_string() {
        "a string"
    } else if value.is_callable() {
        "a function"
    } else if value.as_object().is_some_and(|obj| obj.is_array()) {
        "an array"
    } else {
        "a non-object value"
    }
}

fn install_globals(context: &mut Context, request: &ScriptContext) -> JsResult<()> {
    let raw = create_request_object(context, request)?;
    let prelude = context.eval(Source::from_bytes(REQUEST_PRELUDE.as_bytes()))?;
    let seal = prelude
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("request prelude is not a function"))?;
    let sealed = seal.call(&JsValue::undefined(), &[raw], context)?;

    let console = create_console_object(context)?;
    let attributes = Attribute::READONLY | Attribute::NON_ENUMERABLE | Attribute::PERMANENT;
    context.register_global_property(js_string!("request"), sealed, attributes)?;
    context.register_global_property(js_string!("console"), console, attributes)?;
    Ok(())
}

fn create_js_object(context: &Context) -> JsObject {
    JsObject::with_object_proto(context.intrinsics())
}

fn string_map_object<'a>(
    context: &mut Context,
    entries: impl IntoIterator<Item = (String, &'a String)>,
) -> JsResult<JsValue> {
    let obj = create_js_object(context);
    for (key, value) in entries {
        obj.set(
            js_string!(key),
            JsValue::from(js_string!(value.clone())),
            false,
            context,
        )?;
    }
    Ok(obj.into())
}

fn set_string(obj: &JsObject, key: &str, value: &str, context: &mut Context) -> JsResult<()> {
    obj.set(
        js_string!(key),
        JsValue::from(js_string!(value.to_string())),
        false,
        context,
    )
    .map(|_| ())
}

fn create_request_object(context: &mut Context, request: &ScriptContext) -> JsResult<JsValue> {
    let obj = create_js_object(context);

    set_string(&obj, "protocol", request.protocol.as_str(), context)?;
    set_string(&obj, "method", &request.method, context)?;
    if let Some(path) = &request.path {
        set_string(&obj, "path", path, context)?;
    }
    if let Some(service) = &request.service {
        set_string(&obj, "service", service, context)?;
    }

    // Later duplicates after lowercasing lose to the first key in order.
    let mut lowered: BTreeMap<String, &String> = BTreeMap::new();
    for (key, value) in &request.headers {
        lowered.entry(key.to_ascii_lowercase()).or_insert(value);
    }
    let headers = string_map_object(context, lowered)?;
    obj.set(js_string!("headers"), headers, false, context)?;

    let metadata = string_map_object(
        context,
        request.headers.iter().map(|(k, v)| (k.clone(), v)),
    )?;
    obj.set(js_string!("metadata"), metadata, false, context)?;

    let query = string_map_object(context, request.query.iter().map(|(k, v)| (k.clone(), v)))?;
    obj.set(js_string!("query"), query, false, context)?;

    let params = string_map_object(context, request.params.iter().map(|(k, v)| (k.clone(), v)))?;
    obj.set(js_string!("params"), params, false, context)?;

    let body = json_to_js(context, &request.body)?;
    obj.set(js_string!("body"), body, false, context)?;

    Ok(obj.into())
}

fn record(level: DiagnosticLevel, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let parts: Vec<String> = args
        .iter()
        .map(|arg| match arg.as_string() {
            Some(s) => s.to_std_string_escaped(),
            None => arg
                .to_string(ctx)
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_else(|_| arg.display().to_string()),
        })
        .collect();
    push_diagnostic(level, parts.join(" "));
    Ok(JsValue::undefined())
}

fn console_debug(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    record(DiagnosticLevel::Debug, args, ctx)
}

fn console_log(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    record(DiagnosticLevel::Log, args, ctx)
}

fn console_info(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    record(DiagnosticLevel::Info, args, ctx)
}

fn console_warn(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    record(DiagnosticLevel::Warn, args, ctx)
}

fn console_error(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    record(DiagnosticLevel::Error, args, ctx)
}

fn register_method(
    obj: &JsObject,
    name: &str,
    func: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
    context: &mut Context,
) -> JsResult<()> {
    obj.set(
        PropertyKey::from(js_string!(name)),
        NativeFunction::from_fn_ptr(func).to_js_function(context.realm()),
        false,
        context,
    )
    .map(|_| ())
}

fn create_console_object(context: &mut Context) -> JsResult<JsValue> {
    let obj = create_js_object(context);
    register_method(&obj, "debug", console_debug, context)?;
    register_method(&obj, "log", console_log, context)?;
    register_method(&obj, "info", console_info, context)?;
    register_method(&obj, "warn", console_warn, context)?;
    register_method(&obj, "error", console_error, context)?;
    Ok(obj.into())
}

fn json_to_js(context: &mut Context, value: &Value) -> JsResult<JsValue> {
    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::from(*b)),
        Value::Number(n) => Ok(n
            .as_i64()
            .filter(|i| i.unsigned_abs() <= MAX_SAFE_INTEGER as u64)
            .map(|i| JsValue::from(i as f64))
            .or_else(|| n.as_f64().map(JsValue::from))
            .unwrap_or_else(JsValue::null)),
        Value::String(s) => Ok(JsValue::from(js_string!(s.clone()))),
        Value::Array(items) => {
            let array = JsArray::new(context);
            for (i, item) in items.iter().enumerate() {
                let js_item = json_to_js(context, item)?;
                array.set(i as u32, js_item, false, context)?;
            }
            Ok(array.into())
        }
        Value::Object(map) => {
            let obj = create_js_object(context);
            for (key, item) in map {
                let js_item = json_to_js(context, item)?;
                obj.set(js_string!(key.clone()), js_item, false, context)?;
            }
            Ok(obj.into())
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn too_deep() -> ExecutionError {
    ExecutionError::MalformedResult(format!(
        "result nests deeper than {MAX_RESULT_DEPTH} levels"
    ))
}

/// Convert a completion value into JSON.
///
/// Follows `JSON.stringify` conventions: functions and `undefined` are
/// dropped from objects and become `null` in arrays.
fn js_to_json(context: &mut Context, value: &JsValue, depth: usize) -> Result<Value, ExecutionError> {
    if depth > MAX_RESULT_DEPTH {
        return Err(too_deep());
    }
    if value.is_null() || value.is_undefined() || value.is_callable() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }
    if let Some(n) = value.as_number() {
        return Ok(number_to_json(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_std_string_escaped()));
    }

    let Some(obj) = value.as_object() else {
        return Ok(Value::Null);
    };

    if obj.is_array() {
        let len = obj
            .get(js_string!("length"), context)
            .map_err(classify)?
            .as_number()
            .unwrap_or(0.0) as u32;
        if len > MAX_RESULT_ARRAY_LEN {
            return Err(ExecutionError::MalformedResult(format!(
                "result array has {len} elements, limit is {MAX_RESULT_ARRAY_LEN}"
            )));
        }
        let mut items = Vec::with_capacity(len as usize);
        for i in 0..len {
            let item = obj.get(i, context).map_err(classify)?;
            items.push(js_to_json(context, &item, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    let mut map = serde_json::Map::new();
    let keys = obj.own_property_keys(context).map_err(classify)?;
    for key in keys {
        let name = match &key {
            PropertyKey::String(s) => s.to_std_string_escaped(),
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };
        let item = obj.get(key.clone(), context).map_err(classify)?;
        if item.is_undefined() || item.is_callable() {
            continue;
        }
        map.insert(name, js_to_json(context, &item, depth + 1)?);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundParams, IncomingRequest};
    use serde_json::json;

    fn run(source: &str, request: IncomingRequest) -> Execution {
        run_with_params(source, request, BoundParams::new())
    }

    fn run_with_params(source: &str, request: IncomingRequest, params: BoundParams) -> Execution {
        let script = CompiledScript::compile("test.js", source).unwrap();
        let context = ScriptContext::from_request(&request, params);
        execute_script(&script, &context, &SandboxLimits::default())
    }

    fn value(execution: Execution) -> Value {
        execution.outcome.expect("script should succeed")
    }

    #[test]
    fn test_iife_result() {
        let out = run(
            "(function () { return { status: 200, body: [{ id: 1 }] }; })()",
            IncomingRequest::http("GET", "/users"),
        );
        assert_eq!(value(out), json!({"status": 200, "body": [{"id": 1}]}));
    }

    #[test]
    fn test_named_entry_point_result() {
        let out = run(
            "function main() { return { body: { ok: true } }; }\nmain()",
            IncomingRequest::http("POST", "/users"),
        );
        assert_eq!(value(out), json!({"body": {"ok": true}}));
    }

    #[test]
    fn test_request_fields_visible() {
        let mut params = BoundParams::new();
        params.insert("user_id".into(), "42".into());
        let out = run_with_params(
            r#"({ body: {
                id: request.params.user_id,
                method: request.method,
                path: request.path,
                page: request.query.page,
                name: request.body.name
            } })"#,
            IncomingRequest::http("get", "/users/42")
                .with_query("page", "3")
                .with_body(json!({"name": "Ann"})),
            params,
        );
        assert_eq!(
            value(out)["body"],
            json!({"id": "42", "method": "GET", "path": "/users/42", "page": "3", "name": "Ann"})
        );
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let out = run(
            r#"({ body: [
                request.headers["Test-Case-Name"],
                request.headers["test-case-name"],
                "TEST-CASE-NAME" in request.headers
            ] })"#,
            IncomingRequest::http("GET", "/").with_header("Test-Case-Name", "Ann"),
        );
        assert_eq!(value(out)["body"], json!(["Ann", "Ann", true]));
    }

    #[test]
    fn test_metadata_keys_are_literal() {
        let out = run(
            r#"({ body: [request.metadata["test-case-error"], request.metadata["Test-Case-Error"] === undefined] })"#,
            IncomingRequest::rpc("example.ExampleService", "SayHello")
                .with_metadata("test-case-error", "1"),
        );
        assert_eq!(value(out)["body"], json!(["1", true]));
    }

    #[test]
    fn test_headers_stringify() {
        let out = run(
            "({ body: JSON.stringify(request.headers) })",
            IncomingRequest::http("GET", "/").with_header("X-One", "1"),
        );
        assert_eq!(value(out)["body"], json!("{\"x-one\":\"1\"}"));
    }

    #[test]
    fn test_request_is_frozen() {
        let out = run(
            r#"(function () {
                "use strict";
                try { request.body.name = "changed"; return { body: "mutated" }; }
                catch (e) { return { body: request.body.name }; }
            })()"#,
            IncomingRequest::http("POST", "/").with_body(json!({"name": "Ann"})),
        );
        assert_eq!(value(out)["body"], "Ann");
    }

    #[test]
    fn test_request_binding_cannot_be_replaced() {
        let out = run(
            r#"request = { method: "HACKED" }; ({ body: request.method })"#,
            IncomingRequest::http("GET", "/"),
        );
        assert_eq!(value(out)["body"], "GET");
    }

    #[test]
    fn test_globals_do_not_leak_between_executions() {
        let script = CompiledScript::compile(
            "leak.js",
            r#"var seen = typeof counter !== "undefined"; counter = 1; ({ body: seen })"#,
        )
        .unwrap();
        let context = ScriptContext::from_request(&IncomingRequest::http("GET", "/"), BoundParams::new());
        for _ in 0..3 {
            let out = execute_script(&script, &context, &SandboxLimits::default());
            assert_eq!(out.outcome.unwrap()["body"], json!(false));
        }
    }

    #[test]
    fn test_no_host_capabilities() {
        let out = run(
            r#"({ body: [typeof require, typeof process, typeof fetch, typeof setTimeout] })"#,
            IncomingRequest::http("GET", "/"),
        );
        assert_eq!(
            value(out)["body"],
            json!(["undefined", "undefined", "undefined", "undefined"])
        );
    }

    #[test]
    fn test_thrown_error() {
        let out = run(
            r#"(function () { throw new Error("boom"); })()"#,
            IncomingRequest::http("GET", "/"),
        );
        match out.outcome {
            Err(ExecutionError::Thrown(detail)) => assert!(detail.contains("boom"), "{detail}"),
            other => panic!("expected Thrown, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_error_is_thrown() {
        let out = run("missingFunction()", IncomingRequest::http("GET", "/"));
        assert!(matches!(out.outcome, Err(ExecutionError::Thrown(_))));
    }

    #[test]
    fn test_infinite_loop_hits_bound() {
        let script = CompiledScript::compile("loop.js", "while (true) {}").unwrap();
        let context = ScriptContext::from_request(&IncomingRequest::http("GET", "/"), BoundParams::new());
        let limits = SandboxLimits {
            loop_iteration_limit: 10_000,
            recursion_limit: 512,
        };
        let out = execute_script(&script, &context, &limits);
        assert!(
            matches!(out.outcome, Err(ExecutionError::Timeout(_))),
            "{:?}",
            out.outcome
        );
    }

    #[test]
    fn test_runaway_recursion_hits_bound() {
        let out = run(
            "function f(n) { return f(n + 1); } f(0)",
            IncomingRequest::http("GET", "/"),
        );
        assert!(
            matches!(out.outcome, Err(ExecutionError::Timeout(_))),
            "{:?}",
            out.outcome
        );
    }

    #[test]
    fn test_non_object_results_are_malformed() {
        for source in ["42", "\"text\"", "null", "undefined", "[1, 2]", "(function () {})"] {
            let out = run(source, IncomingRequest::http("GET", "/"));
            assert!(
                matches!(out.outcome, Err(ExecutionError::MalformedResult(_))),
                "{source}: {:?}",
                out.outcome
            );
        }
    }

    #[test]
    fn test_cyclic_result_is_malformed() {
        let out = run(
            "var o = { body: {} }; o.body.self = o; o",
            IncomingRequest::http("GET", "/"),
        );
        assert!(matches!(out.outcome, Err(ExecutionError::MalformedResult(_))));
    }

    #[test]
    fn test_result_conversion_rules() {
        let out = run(
            r#"({ status: 201.0, ratio: 0.5, skip: undefined, fn: function () {}, list: [undefined, 1] })"#,
            IncomingRequest::http("GET", "/"),
        );
        assert_eq!(value(out), json!({"status": 201, "ratio": 0.5, "list": [null, 1]}));
    }

    #[test]
    fn test_console_is_captured() {
        let out = run(
            r#"console.log("headers", JSON.stringify(request.headers)); console.warn("careful", 3); ({ body: null })"#,
            IncomingRequest::http("GET", "/").with_header("A", "b"),
        );
        assert_eq!(
            out.diagnostics,
            vec![
                Diagnostic {
                    level: DiagnosticLevel::Log,
                    message: "headers {\"a\":\"b\"}".into()
                },
                Diagnostic {
                    level: DiagnosticLevel::Warn,
                    message: "careful 3".into()
                },
            ]
        );
    }

    #[test]
    fn test_console_output_is_bounded() {
        let out = run(
            r#"for (var i = 0; i < 1000; i++) { console.log("line " + i); } ({ body: null })"#,
            IncomingRequest::http("GET", "/"),
        );
        assert_eq!(out.diagnostics.len(), MAX_DIAGNOSTICS);
        assert!(out.outcome.is_ok());
    }

    #[test]
    fn test_diagnostics_kept_on_failure() {
        let out = run(
            r#"console.error("about to fail"); throw new Error("nope");"#,
            IncomingRequest::http("GET", "/"),
        );
        assert!(out.outcome.is_err());
        assert_eq!(out.diagnostics[0].message, "about to fail");
    }
}
