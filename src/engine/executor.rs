//! Per-request orchestration: kind dispatch, the preparatory hook chain,
//! harness construction, and shaping of raw sandbox values into per-kind
//! results.

use std::{collections::HashMap, time::Duration};

use serde_json::Value;

use crate::{
    config::SandboxConfig,
    engine::{
        bundler::{self, Bundle},
        sandbox::{self, SandboxError, SandboxOutput, SandboxRequest},
    },
    models::{
        request::{
            ActionRunRequest, BeforeFunction, BeforeRequest, ManagementRequest,
            ResolverFunctionRequest, SchemaVariantDefinitionRequest, ValidationRequest,
        },
        result::success,
        ErrorKind, FunctionKind, FunctionResult, OutputLevel, OutputLine, OutputStream,
    },
};

/// Installed only for validation executions.
const VALIDATION_JS: &str = include_str!("js/validation.js");

/// Executes requests end to end, one isolate per stage.
pub struct Executor {
    config: SandboxConfig,
}

/// Everything one request produced: output lines in emission order, the
/// terminal result, and the shared environment as it stood when execution
/// finished.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Output lines, ordered before the result on the wire.
    pub output: Vec<OutputLine>,
    /// The terminal result.
    pub result: FunctionResult,
    /// Final state of the shared environment. Mutations made by hooks that
    /// ran before a failure are preserved.
    pub env: HashMap<String, String>,
}

/// How a raw sandbox value becomes a per-kind success payload.
#[derive(Debug, Clone, Copy)]
enum Shape {
    ActionRun,
    Before,
    Management,
    ResolverFunction,
    SchemaVariantDefinition,
    Validation,
}

impl Executor {
    /// Builds an executor with the given limits.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Dispatches a request by kind selector and runs it to completion.
    /// Never errs at this level: every failure mode becomes a failure
    /// result so the caller always has exactly one result to emit.
    pub async fn execute(&self, kind: &str, request: Value, timeout: Duration) -> ExecutionOutcome {
        let execution_id = peek_execution_id(&request);

        let kind = match kind.parse::<FunctionKind>() {
            Ok(kind) => kind,
            Err(e) => {
                return ExecutionOutcome {
                    output: Vec::new(),
                    result: FunctionResult::failure(
                        execution_id,
                        ErrorKind::user_code("UnknownFunctionKindError"),
                        e.to_string(),
                    ),
                    env: HashMap::new(),
                };
            }
        };

        tracing::info!(%kind, %execution_id, "executing function");

        match kind {
            FunctionKind::ActionRun => self.run_action(request, timeout).await,
            FunctionKind::Before => self.run_before_kind(request, timeout).await,
            FunctionKind::Management => self.run_management(request, timeout).await,
            FunctionKind::ResolverFunction => self.run_resolver(request, timeout).await,
            FunctionKind::SchemaVariantDefinition => {
                self.run_schema_variant_definition(request, timeout).await
            }
            FunctionKind::Validation => self.run_validation(request, timeout).await,
        }
    }

    async fn run_action(&self, request: Value, timeout: Duration) -> ExecutionOutcome {
        let execution_id = peek_execution_id(&request);
        let request: ActionRunRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => return invalid_request(&execution_id, e),
        };

        let harness = match self.main_harness(
            &execution_id,
            &request.handler,
            &request.code_base64,
            &request.args.to_string(),
        ) {
            Ok(harness) => harness,
            Err(result) => return short_circuit(result, request.env),
        };

        self.run_pipeline(
            &execution_id,
            &request.before,
            request.env,
            harness,
            None,
            Shape::ActionRun,
            timeout,
        )
        .await
    }

    async fn run_resolver(&self, request: Value, timeout: Duration) -> ExecutionOutcome {
        let execution_id = peek_execution_id(&request);
        let request: ResolverFunctionRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => return invalid_request(&execution_id, e),
        };

        let component = match serde_json::to_value(&request.component) {
            Ok(component) => component,
            Err(e) => return invalid_request(&execution_id, e),
        };

        let harness = match self.main_harness(
            &execution_id,
            &request.handler,
            &request.code_base64,
            &component.to_string(),
        ) {
            Ok(harness) => harness,
            Err(result) => return short_circuit(result, request.env),
        };

        self.run_pipeline(
            &execution_id,
            &request.before,
            request.env,
            harness,
            None,
            Shape::ResolverFunction,
            timeout,
        )
        .await
    }

    async fn run_management(&self, request: Value, timeout: Duration) -> ExecutionOutcome {
        let execution_id = peek_execution_id(&request);
        let request: ManagementRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => return invalid_request(&execution_id, e),
        };

        let harness = match self.main_harness(
            &execution_id,
            &request.handler,
            &request.code_base64,
            &request.args.to_string(),
        ) {
            Ok(harness) => harness,
            Err(result) => return short_circuit(result, request.env),
        };

        self.run_pipeline(
            &execution_id,
            &request.before,
            request.env,
            harness,
            None,
            Shape::Management,
            timeout,
        )
        .await
    }

    async fn run_schema_variant_definition(
        &self,
        request: Value,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let execution_id = peek_execution_id(&request);
        let request: SchemaVariantDefinitionRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => return invalid_request(&execution_id, e),
        };

        // Definition handlers take no argument.
        let harness = match self.main_harness(
            &execution_id,
            &request.handler,
            &request.code_base64,
            "null",
        ) {
            Ok(harness) => harness,
            Err(result) => return short_circuit(result, request.env),
        };

        self.run_pipeline(
            &execution_id,
            &request.before,
            request.env,
            harness,
            None,
            Shape::SchemaVariantDefinition,
            timeout,
        )
        .await
    }

    async fn run_validation(&self, request: Value, timeout: Duration) -> ExecutionOutcome {
        let execution_id = peek_execution_id(&request);
        let request: ValidationRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => return invalid_request(&execution_id, e),
        };

        // The format travels as JSON text; it is handed to the harness as a
        // string literal and parsed inside the context so a malformed format
        // surfaces as a structured exception.
        let format_literal = match serde_json::to_string(&request.validation_format) {
            Ok(literal) => literal,
            Err(e) => return invalid_request(&execution_id, e),
        };
        let harness = validation_harness(&request.value.to_string(), &format_literal);

        self.run_pipeline(
            &execution_id,
            &request.before,
            request.env,
            harness,
            Some(VALIDATION_JS),
            Shape::Validation,
            timeout,
        )
        .await
    }

    async fn run_before_kind(&self, request: Value, timeout: Duration) -> ExecutionOutcome {
        let execution_id = peek_execution_id(&request);
        let request: BeforeRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(e) => return invalid_request(&execution_id, e),
        };

        let harness = match self.hook_harness(
            &execution_id,
            &request.handler,
            &request.code_base64,
            &request.arg.to_string(),
        ) {
            Ok(harness) => harness,
            Err(result) => return short_circuit(result, request.env),
        };

        self.run_pipeline(
            &execution_id,
            &request.before,
            request.env,
            harness,
            None,
            Shape::Before,
            timeout,
        )
        .await
    }

    /// Materializes and wraps a main-stage bundle. The handler's return
    /// value is kept.
    fn main_harness(
        &self,
        execution_id: &str,
        handler: &str,
        code_base64: &str,
        arg_json: &str,
    ) -> Result<String, FunctionResult> {
        let bundle = self.materialize(execution_id, handler, code_base64)?;
        Ok(call_harness(&bundle, handler, arg_json, true))
    }

    /// Materializes and wraps a hook bundle. Hook return values are
    /// discarded; hooks communicate through the environment alone.
    fn hook_harness(
        &self,
        execution_id: &str,
        handler: &str,
        code_base64: &str,
        arg_json: &str,
    ) -> Result<String, FunctionResult> {
        let bundle = self.materialize(execution_id, handler, code_base64)?;
        Ok(call_harness(&bundle, handler, arg_json, false))
    }

    fn materialize(
        &self,
        execution_id: &str,
        handler: &str,
        code_base64: &str,
    ) -> Result<Bundle, FunctionResult> {
        if !valid_handler(handler) {
            return Err(FunctionResult::failure(
                execution_id,
                ErrorKind::user_code("InvalidHandlerError"),
                format!("handler is not a valid identifier: {handler:?}"),
            ));
        }

        bundler::materialize(code_base64).map_err(|e| {
            FunctionResult::failure(execution_id, ErrorKind::user_code(e.name()), e.to_string())
        })
    }

    /// Runs the hook chain in order, then the main stage, accumulating
    /// output lines and environment mutations across stages. A failing hook
    /// short-circuits the chain; mutations made by earlier hooks are
    /// preserved in the outcome.
    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        execution_id: &str,
        before: &[BeforeFunction],
        mut env: HashMap<String, String>,
        harness: String,
        prelude: Option<&'static str>,
        shape: Shape,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let mut output = Vec::new();

        for hook in before {
            if let Err(result) = self
                .run_hook(execution_id, hook, &mut env, timeout, &mut output)
                .await
            {
                return ExecutionOutcome { output, result, env };
            }
        }

        let report = sandbox::execute(SandboxRequest {
            script: harness,
            prelude,
            env: env.clone(),
            timeout,
            max_result_bytes: self.config.max_output_size,
        })
        .await;
        collect_output(execution_id, report.output, &mut output);

        let result = match report.result {
            Ok(envelope) => {
                tracing::debug!(?envelope, "raw sandbox result");
                if let Some(error) = envelope.error {
                    tracing::debug!(stack = ?error.stack, "user code raised");
                    FunctionResult::failure(
                        execution_id,
                        ErrorKind::user_code(error.name),
                        error.message,
                    )
                } else {
                    merge_env(&mut env, envelope.env);
                    let value = envelope.ok.unwrap_or(Value::Null);
                    shape_success(shape, execution_id, value, &env, &mut output)
                }
            }
            Err(e) => failure_from_sandbox(execution_id, e, timeout),
        };

        ExecutionOutcome { output, result, env }
    }

    async fn run_hook(
        &self,
        execution_id: &str,
        hook: &BeforeFunction,
        env: &mut HashMap<String, String>,
        timeout: Duration,
        output: &mut Vec<OutputLine>,
    ) -> Result<(), FunctionResult> {
        tracing::debug!(handler = %hook.handler, "running preparatory hook");

        let harness = self.hook_harness(
            execution_id,
            &hook.handler,
            &hook.code_base64,
            &hook.arg.to_string(),
        )?;

        let report = sandbox::execute(SandboxRequest {
            script: harness,
            prelude: None,
            env: env.clone(),
            timeout,
            max_result_bytes: self.config.max_output_size,
        })
        .await;
        collect_output(execution_id, report.output, output);

        match report.result {
            Ok(envelope) => {
                if let Some(error) = envelope.error {
                    return Err(FunctionResult::failure(
                        execution_id,
                        ErrorKind::user_code(error.name),
                        error.message,
                    ));
                }
                merge_env(env, envelope.env);
                Ok(())
            }
            Err(e) => Err(failure_from_sandbox(execution_id, e, timeout)),
        }
    }
}

/// Pulls the correlation id out of an unparsed request so even requests
/// that fail to parse produce an attributable failure.
fn peek_execution_id(request: &Value) -> String {
    request
        .get("executionId")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn invalid_request(execution_id: &str, e: serde_json::Error) -> ExecutionOutcome {
    ExecutionOutcome {
        output: Vec::new(),
        result: FunctionResult::failure(
            execution_id,
            ErrorKind::user_code("InvalidRequestError"),
            e.to_string(),
        ),
        env: HashMap::new(),
    }
}

fn short_circuit(result: FunctionResult, env: HashMap<String, String>) -> ExecutionOutcome {
    ExecutionOutcome { output: Vec::new(), result, env }
}

/// Handler names are interpolated into the harness; only plain identifiers
/// are allowed through.
fn valid_handler(handler: &str) -> bool {
    let mut chars = handler.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Wraps a body in the standard async harness. Exceptions escaping the body
/// are captured into the error half of the result envelope.
fn async_harness(body: &str) -> String {
    format!(
        r#"(async () => {{
    try {{
{body}
    }} catch (e) {{
        __crucible.setResult(JSON.stringify({{
            error: {{
                name: (e && e.name) || "Error",
                message: (e && e.message) || String(e),
                stack: (e && e.stack) || null,
            }},
            env: globalThis.env,
        }}));
    }}
}})();"#
    )
}

/// Builds a harness that runs a bundle and invokes its handler with one
/// argument. When `keep_value` is false the handler's return value is
/// dropped and only the environment travels back.
fn call_harness(bundle: &Bundle, handler: &str, arg_json: &str, keep_value: bool) -> String {
    let ok_expr = if keep_value {
        "__value === undefined ? null : __value"
    } else {
        "null"
    };
    let body = format!(
        "{code}\nconst __arg = {arg_json};\nconst __value = await {handler}(__arg);\n__crucible.setResult(JSON.stringify({{ ok: {ok_expr}, env: globalThis.env }}));",
        code = bundle.code,
    );
    async_harness(&body)
}

/// Builds the harness for the built-in validator. A value that fails the
/// schema is a soft outcome carried in `ok.error`; a malformed format is a
/// hard exception caught by the surrounding harness.
fn validation_harness(value_json: &str, format_literal: &str) -> String {
    let body = format!(
        r#"let __format;
try {{
    __format = JSON.parse({format_literal});
}} catch (parseError) {{
    const err = new Error(parseError.message);
    err.name = "JoiValidationJsonParsingError";
    throw err;
}}
const __schema = __crucibleValidation.buildSchema(__format);
const __error = __crucibleValidation.validate(__schema, {value_json});
__crucible.setResult(JSON.stringify({{ ok: {{ error: __error }}, env: globalThis.env }}));"#
    );
    async_harness(&body)
}

fn collect_output(execution_id: &str, lines: Vec<SandboxOutput>, out: &mut Vec<OutputLine>) {
    for line in lines {
        let level = OutputLevel::from_console(&line.level);
        out.push(OutputLine {
            execution_id: execution_id.to_string(),
            stream: OutputStream::for_level(level),
            level,
            group: line.group,
            message: line.message,
        });
    }
}

/// Folds environment mutations reported by a stage back into the shared
/// environment. Non-string values are stringified as JSON text.
fn merge_env(env: &mut HashMap<String, String>, updates: HashMap<String, Value>) {
    for (key, value) in updates {
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        env.insert(key, value);
    }
}

fn failure_from_sandbox(
    execution_id: &str,
    error: SandboxError,
    timeout: Duration,
) -> FunctionResult {
    match error {
        SandboxError::Timeout => FunctionResult::failure(
            execution_id,
            ErrorKind::TimeoutError,
            format!("function timed out after {} seconds", timeout.as_secs_f64()),
        ),
        SandboxError::Js { name, message } => {
            FunctionResult::failure(execution_id, ErrorKind::user_code(name), message)
        }
        e @ SandboxError::Serialization(_) => FunctionResult::failure(
            execution_id,
            ErrorKind::user_code("ResultSerializationError"),
            e.to_string(),
        ),
        e @ SandboxError::ResultTooLarge { .. } => FunctionResult::failure(
            execution_id,
            ErrorKind::user_code("ResultTooLargeError"),
            e.to_string(),
        ),
        e @ SandboxError::Thread(_) => FunctionResult::failure(
            execution_id,
            ErrorKind::user_code("SandboxError"),
            e.to_string(),
        ),
    }
}

/// Shapes the raw value a handler returned into the kind's success payload.
fn shape_success(
    shape: Shape,
    execution_id: &str,
    value: Value,
    env: &HashMap<String, String>,
    output: &mut Vec<OutputLine>,
) -> FunctionResult {
    let payload = match shape {
        Shape::ActionRun => {
            push_value_line(execution_id, &value, output);
            serde_json::to_value(success::ActionRunResultSuccess {
                execution_id: execution_id.to_string(),
                payload: value,
            })
        }
        Shape::ResolverFunction => {
            push_value_line(execution_id, &value, output);
            serde_json::to_value(success::ResolverFunctionResultSuccess {
                execution_id: execution_id.to_string(),
                unset: value.is_null(),
                data: value,
            })
        }
        Shape::Validation => serde_json::to_value(success::ValidationResultSuccess {
            execution_id: execution_id.to_string(),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        Shape::SchemaVariantDefinition => {
            serde_json::to_value(success::SchemaVariantDefinitionResultSuccess {
                execution_id: execution_id.to_string(),
                definition: value,
            })
        }
        Shape::Management => serde_json::to_value(success::ManagementResultSuccess {
            execution_id: execution_id.to_string(),
            payload: value,
        }),
        Shape::Before => serde_json::to_value(success::BeforeResultSuccess {
            execution_id: execution_id.to_string(),
        }),
    };

    match payload {
        Ok(mut payload) => {
            if !env.is_empty() {
                if let (Value::Object(map), Ok(env)) =
                    (&mut payload, serde_json::to_value(env))
                {
                    map.insert("env".to_string(), env);
                }
            }
            FunctionResult::Success(payload)
        }
        Err(e) => FunctionResult::failure(
            execution_id,
            ErrorKind::user_code("ResultSerializationError"),
            e.to_string(),
        ),
    }
}

/// Mirrors the handler's value into the output stream so consumers see what
/// the function produced alongside its console output.
fn push_value_line(execution_id: &str, value: &Value, output: &mut Vec<OutputLine>) {
    output.push(OutputLine {
        execution_id: execution_id.to_string(),
        stream: OutputStream::Stdout,
        level: OutputLevel::Info,
        group: None,
        message: format!("Output: {value}"),
    });
}
