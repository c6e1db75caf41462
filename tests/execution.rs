//! End-to-end tests for the execution pipeline, from request document to
//! protocol-ready outcome.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use crucible::{
    config::SandboxConfig,
    engine::executor::{ExecutionOutcome, Executor},
    models::{ErrorKind, FunctionResult, OutputLevel, OutputStream},
};
use serde_json::{json, Value};

fn encode(code: &str) -> String {
    BASE64.encode(code)
}

async fn run(kind: &str, request: Value) -> ExecutionOutcome {
    let executor = Executor::new(SandboxConfig::default());
    executor.execute(kind, request, Duration::from_secs(5)).await
}

fn success_payload(outcome: &ExecutionOutcome) -> Value {
    match &outcome.result {
        FunctionResult::Success(payload) => payload.clone(),
        FunctionResult::Failure(failure) => panic!("expected success, got {failure:?}"),
    }
}

fn failure_parts(outcome: &ExecutionOutcome) -> (ErrorKind, String) {
    match &outcome.result {
        FunctionResult::Failure(failure) => {
            (failure.error.kind.clone(), failure.error.message.clone())
        }
        FunctionResult::Success(payload) => panic!("expected failure, got {payload:?}"),
    }
}

#[tokio::test]
async fn resolver_returns_component_data() {
    let outcome = run(
        "resolverfunction",
        json!({
            "executionId": "res-1",
            "handler": "resolve",
            "codeBase64": encode("function resolve(component) { return component.data.size; }"),
            "component": { "data": { "size": 12 }, "parents": [] },
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["executionId"], "res-1");
    assert_eq!(payload["data"], 12);
    assert_eq!(payload["unset"], false);
}

#[tokio::test]
async fn resolver_null_return_is_unset() {
    let outcome = run(
        "resolverfunction",
        json!({
            "executionId": "res-2",
            "handler": "resolve",
            "codeBase64": encode("function resolve() { return null; }"),
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["unset"], true);
    assert_eq!(payload["data"], Value::Null);
}

#[tokio::test]
async fn action_mirrors_value_into_output() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-1",
            "handler": "main",
            "codeBase64": encode(r#"function main(args) { return { status: "ok", n: args.n }; }"#),
            "args": { "n": 3 },
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["payload"]["status"], "ok");
    assert_eq!(payload["payload"]["n"], 3);

    let mirrored = outcome
        .output
        .iter()
        .find(|line| line.message.starts_with("Output: "))
        .expect("value mirror line missing");
    assert_eq!(mirrored.level, OutputLevel::Info);
    assert_eq!(mirrored.stream, OutputStream::Stdout);
}

#[tokio::test]
async fn console_output_is_captured_with_levels() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-2",
            "handler": "main",
            "codeBase64": encode(
                r#"function main() {
                    console.log("starting", { step: 1 });
                    console.warn("careful");
                    return null;
                }"#,
            ),
        }),
    )
    .await;

    assert!(matches!(outcome.result, FunctionResult::Success(_)));

    let log = &outcome.output[0];
    assert_eq!(log.execution_id, "act-2");
    assert_eq!(log.level, OutputLevel::Info);
    assert_eq!(log.stream, OutputStream::Stdout);
    assert_eq!(log.message, r#"starting {"step":1}"#);

    let warn = &outcome.output[1];
    assert_eq!(warn.level, OutputLevel::Warn);
    assert_eq!(warn.stream, OutputStream::Stderr);
}

#[tokio::test]
async fn validation_passes_matching_value() {
    let outcome = run(
        "validation",
        json!({
            "executionId": "val-1",
            "value": 42,
            "validationFormat": r#"{"type":"number"}"#,
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["executionId"], "val-1");
    assert!(payload.get("error").is_none());
}

#[tokio::test]
async fn validation_reports_type_mismatch_as_soft_failure() {
    let outcome = run(
        "validation",
        json!({
            "executionId": "val-2",
            "value": "foobar",
            "validationFormat": r#"{"type":"number"}"#,
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["error"], "\"value\" must be a number");
}

#[tokio::test]
async fn validation_string_schema_rejects_number() {
    let outcome = run(
        "validation",
        json!({
            "executionId": "val-3",
            "value": 1,
            "validationFormat": r#"{"type":"string"}"#,
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["error"], "\"value\" must be a string");
}

#[tokio::test]
async fn validation_rejects_unparseable_format() {
    let outcome = run(
        "validation",
        json!({
            "executionId": "val-4",
            "value": 1,
            "validationFormat": "",
        }),
    )
    .await;

    let (kind, _) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::user_code("JoiValidationJsonParsingError"));
}

#[tokio::test]
async fn validation_rejects_non_object_format() {
    let outcome = run(
        "validation",
        json!({
            "executionId": "val-5",
            "value": 1,
            "validationFormat": "\"test\"",
        }),
    )
    .await;

    let (kind, message) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::user_code("JoiValidationFormatError"));
    assert_eq!(message, "validationFormat must be of type object");
}

#[tokio::test]
async fn infinite_loop_times_out() {
    let executor = Executor::new(SandboxConfig::default());
    let start = std::time::Instant::now();

    let outcome = executor
        .execute(
            "actionRun",
            json!({
                "executionId": "act-3",
                "handler": "main",
                "codeBase64": encode("function main() { while (true) {} }"),
            }),
            Duration::from_secs(2),
        )
        .await;

    let (kind, message) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::TimeoutError);
    assert_eq!(message, "function timed out after 2 seconds");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn never_resolving_promise_times_out() {
    let executor = Executor::new(SandboxConfig::default());
    let start = std::time::Instant::now();

    let outcome = executor
        .execute(
            "actionRun",
            json!({
                "executionId": "act-11",
                "handler": "main",
                "codeBase64": encode(
                    "async function main() { await new Promise(() => {}); }",
                ),
            }),
            Duration::from_secs(2),
        )
        .await;

    let (kind, message) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::TimeoutError);
    assert_eq!(message, "function timed out after 2 seconds");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn console_groups_are_attributed_to_output_lines() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-12",
            "handler": "main",
            "codeBase64": encode(
                r#"function main() {
                    console.group("phase one");
                    console.log("step");
                    console.groupEnd();
                    return null;
                }"#,
            ),
        }),
    )
    .await;

    assert!(matches!(outcome.result, FunctionResult::Success(_)));
    assert_eq!(outcome.output[0].message, "phase one");
    assert_eq!(outcome.output[0].group, None);
    assert_eq!(outcome.output[1].message, "step");
    assert_eq!(outcome.output[1].group.as_deref(), Some("phase one"));
}

#[tokio::test]
async fn before_hooks_thread_environment_through_stages() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-4",
            "handler": "main",
            "codeBase64": encode("function main() { return { chain: env.CHAIN }; }"),
            "env": { "SEED": "0" },
            "before": [
                {
                    "handler": "seed",
                    "codeBase64": encode(r#"function seed() { env.SEED = "1"; }"#),
                },
                {
                    "handler": "extend",
                    "codeBase64": encode(r#"function extend() { env.CHAIN = env.SEED + "-2"; }"#),
                },
            ],
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["payload"]["chain"], "1-2");
    assert_eq!(payload["env"]["SEED"], "1");
    assert_eq!(payload["env"]["CHAIN"], "1-2");

    assert_eq!(outcome.env.get("SEED").map(String::as_str), Some("1"));
    assert_eq!(outcome.env.get("CHAIN").map(String::as_str), Some("1-2"));
}

#[tokio::test]
async fn failing_hook_short_circuits_but_keeps_earlier_mutations() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-5",
            "handler": "main",
            "codeBase64": encode(r#"function main() { console.log("main ran"); return null; }"#),
            "before": [
                {
                    "handler": "first",
                    "codeBase64": encode(r#"function first() { env.STAGE = "first"; }"#),
                },
                {
                    "handler": "second",
                    "codeBase64": encode(
                        r#"function second() {
                            const e = new Error("hook blew up");
                            e.name = "HookError";
                            throw e;
                        }"#,
                    ),
                },
            ],
        }),
    )
    .await;

    let (kind, message) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::user_code("HookError"));
    assert_eq!(message, "hook blew up");

    assert_eq!(outcome.env.get("STAGE").map(String::as_str), Some("first"));
    assert!(outcome.output.iter().all(|line| line.message != "main ran"));
}

#[tokio::test]
async fn globals_do_not_leak_across_requests() {
    let request = json!({
        "executionId": "act-6",
        "handler": "main",
        "codeBase64": encode(
            "function main() { globalThis.counter = (globalThis.counter || 0) + 1; return globalThis.counter; }",
        ),
    });

    let first = run("actionRun", request.clone()).await;
    let second = run("actionRun", request).await;

    assert_eq!(success_payload(&first)["payload"], 1);
    assert_eq!(success_payload(&second)["payload"], 1);
}

#[tokio::test]
async fn unknown_kind_is_rejected() {
    let outcome = run("mysteryKind", json!({ "executionId": "x-1" })).await;

    let (kind, message) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::user_code("UnknownFunctionKindError"));
    assert!(message.contains("mysteryKind"));
}

#[tokio::test]
async fn invalid_handler_is_rejected_before_execution() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-7",
            "handler": "bad-name",
            "codeBase64": encode("function main() { return null; }"),
        }),
    )
    .await;

    let (kind, _) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::user_code("InvalidHandlerError"));
}

#[tokio::test]
async fn thrown_exceptions_keep_their_name_and_message() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-8",
            "handler": "main",
            "codeBase64": encode(
                r#"function main() {
                    const e = new Error("kaboom");
                    e.name = "CustomError";
                    throw e;
                }"#,
            ),
        }),
    )
    .await;

    let (kind, message) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::user_code("CustomError"));
    assert_eq!(message, "kaboom");
}

#[tokio::test]
async fn schema_variant_definition_returns_definition() {
    let outcome = run(
        "schemaVariantDefinition",
        json!({
            "executionId": "svd-1",
            "handler": "define",
            "codeBase64": encode(
                r#"function define() { return { props: [{ name: "region", kind: "string" }] }; }"#,
            ),
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["executionId"], "svd-1");
    assert_eq!(payload["definition"]["props"][0]["name"], "region");
}

#[tokio::test]
async fn management_returns_handler_payload() {
    let outcome = run(
        "management",
        json!({
            "executionId": "mgmt-1",
            "handler": "manage",
            "codeBase64": encode(
                r#"function manage(args) { return { ops: { update: args.target } }; }"#,
            ),
            "args": { "target": "component-7" },
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["payload"]["ops"]["update"], "component-7");
}

#[tokio::test]
async fn standalone_before_reports_status_and_env() {
    let outcome = run(
        "before",
        json!({
            "executionId": "bef-1",
            "handler": "prepare",
            "codeBase64": encode(r#"function prepare(arg) { env.TOKEN = arg.token; }"#),
            "arg": { "token": "secret" },
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["executionId"], "bef-1");
    assert_eq!(payload["env"]["TOKEN"], "secret");
    assert_eq!(outcome.env.get("TOKEN").map(String::as_str), Some("secret"));
}

#[tokio::test]
async fn async_handlers_are_awaited() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-9",
            "handler": "main",
            "codeBase64": encode(
                r#"async function main() {
                    const value = await Promise.resolve(99);
                    return { value };
                }"#,
            ),
        }),
    )
    .await;

    let payload = success_payload(&outcome);
    assert_eq!(payload["payload"]["value"], 99);
}

#[tokio::test]
async fn malformed_request_is_an_invalid_request_failure() {
    let outcome = run(
        "actionRun",
        json!({
            "executionId": "act-10",
            "handler": "main",
        }),
    )
    .await;

    let (kind, _) = failure_parts(&outcome);
    assert_eq!(kind, ErrorKind::user_code("InvalidRequestError"));
    match &outcome.result {
        FunctionResult::Failure(failure) => assert_eq!(failure.execution_id, "act-10"),
        other => panic!("expected failure, got {other:?}"),
    }
}
