//! The isolation boundary: one fresh V8 isolate per invocation.
//!
//! Isolates are `!Send`, so each invocation runs on a dedicated thread with
//! its own single-threaded tokio runtime. Nothing survives the invocation:
//! the isolate, its context, and the thread are all torn down before the
//! report is returned. A watchdog thread terminates V8 when the wall-clock
//! timeout elapses, which also covers CPU-bound infinite loops the event
//! loop alone cannot interrupt.

use std::{
    cell::RefCell,
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use deno_core::{extension, op2, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Installed into every fresh context before user code runs.
const BOOTSTRAP_JS: &str = include_str!("js/bootstrap.js");

/// Extra wall-clock time granted to the outer await so the dedicated thread
/// can observe the watchdog termination and report it, rather than being
/// abandoned mid-teardown.
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

thread_local! {
    static RESULT_SLOT: RefCell<Option<String>> = RefCell::new(None);
    static OUTPUT_LINES: RefCell<Vec<SandboxOutput>> = RefCell::new(Vec::new());
}

#[op2]
#[string]
fn op_set_result(#[string] payload: String) -> String {
    RESULT_SLOT.with(|slot| {
        *slot.borrow_mut() = Some(payload);
    });
    "ok".to_string()
}

#[op2]
#[string]
fn op_output(#[string] level: String, #[string] group: String, #[string] message: String) -> String {
    let group = if group.is_empty() { None } else { Some(group) };
    OUTPUT_LINES.with(|lines| {
        lines.borrow_mut().push(SandboxOutput { level, group, message });
    });
    "ok".to_string()
}

extension!(crucible_runtime, ops = [op_set_result, op_output]);

/// One invocation's worth of work for the isolation boundary.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// The harness script to execute. The script is responsible for calling
    /// the result bridge exactly once.
    pub script: String,
    /// Optional support script installed between the bootstrap and the
    /// harness.
    pub prelude: Option<&'static str>,
    /// The environment exposed to the context as `globalThis.env`.
    pub env: HashMap<String, String>,
    /// Wall-clock budget for the invocation.
    pub timeout: Duration,
    /// Upper bound on the serialized result envelope.
    pub max_result_bytes: usize,
}

/// Everything one invocation produced.
#[derive(Debug)]
pub struct SandboxReport {
    /// Console output captured during the invocation, in emission order.
    pub output: Vec<SandboxOutput>,
    /// The result envelope, or why there is none.
    pub result: Result<RawEnvelope, SandboxError>,
}

/// A console line captured inside the context.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    /// Console level string as reported by the shim.
    pub level: String,
    /// Innermost `console.group` label open when the line was emitted.
    pub group: Option<String>,
    /// The joined message.
    pub message: String,
}

/// The envelope every harness hands back through the result bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    /// The handler's value, present on success.
    #[serde(default)]
    pub ok: Option<Value>,
    /// The caught exception, present on failure.
    #[serde(default)]
    pub error: Option<JsErrorInfo>,
    /// The environment as it stood when the harness finished.
    #[serde(default)]
    pub env: HashMap<String, Value>,
}

/// A caught exception as serialized by the harness.
#[derive(Debug, Clone, Deserialize)]
pub struct JsErrorInfo {
    /// The exception's name.
    #[serde(default = "default_error_name")]
    pub name: String,
    /// The exception's message.
    #[serde(default)]
    pub message: String,
    /// The stack trace, when one exists.
    #[serde(default)]
    pub stack: Option<String>,
}

fn default_error_name() -> String {
    "Error".to_string()
}

/// Why an invocation produced no envelope.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The watchdog terminated the invocation.
    #[error("execution exceeded its timeout")]
    Timeout,

    /// The script threw before the harness could capture it.
    #[error("{name}: {message}")]
    Js {
        /// The exception's name, parsed from the uncaught-exception report.
        name: String,
        /// The exception's message.
        message: String,
    },

    /// The result envelope was not valid JSON.
    #[error("result envelope is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The result envelope exceeded the configured bound.
    #[error("result exceeds maximum size of {max} bytes")]
    ResultTooLarge {
        /// The configured bound.
        max: usize,
    },

    /// The dedicated thread failed before producing a report.
    #[error("sandbox thread failed: {0}")]
    Thread(String),
}

/// Runs one invocation in a fresh, short-lived isolate.
pub async fn execute(request: SandboxRequest) -> SandboxReport {
    let timeout = request.timeout;
    let (tx, rx) = tokio::sync::oneshot::channel();

    std::thread::spawn(move || {
        let report = run_on_thread(request);
        if tx.send(report).is_err() {
            tracing::warn!("sandbox report receiver dropped");
        }
    });

    match tokio::time::timeout(timeout + TEARDOWN_GRACE, rx).await {
        Ok(Ok(report)) => report,
        Ok(Err(_)) => SandboxReport {
            output: Vec::new(),
            result: Err(SandboxError::Thread("sandbox thread panicked".to_string())),
        },
        // The dedicated thread failed to wind down within the grace period.
        Err(_) => SandboxReport {
            output: Vec::new(),
            result: Err(SandboxError::Timeout),
        },
    }
}

fn run_on_thread(request: SandboxRequest) -> SandboxReport {
    RESULT_SLOT.with(|slot| *slot.borrow_mut() = None);
    OUTPUT_LINES.with(|lines| lines.borrow_mut().clear());

    let result = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt.block_on(run_isolate(&request)),
        Err(e) => Err(SandboxError::Thread(e.to_string())),
    };

    let output = OUTPUT_LINES.with(|lines| lines.borrow_mut().drain(..).collect());
    SandboxReport { output, result }
}

async fn run_isolate(request: &SandboxRequest) -> Result<RawEnvelope, SandboxError> {
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![crucible_runtime::init()],
        ..Default::default()
    });

    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let timeout = request.timeout;
    let started = std::time::Instant::now();
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();

    let watchdog = std::thread::spawn(move || {
        if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_handle.terminate_execution();
        }
    });

    let exec_error = run_scripts(&mut runtime, request).await;

    // The watchdog must be gone before the runtime drops so its IsolateHandle
    // never outlives the isolate.
    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    if timed_out.load(Ordering::SeqCst) {
        return Err(SandboxError::Timeout);
    }

    if let Some(message) = exec_error {
        let name = exception_name(&message);
        return Err(SandboxError::Js { name, message });
    }

    let payload = match RESULT_SLOT.with(|slot| slot.borrow_mut().take()) {
        Some(payload) => payload,
        // A clean event-loop exit with an empty result slot means the
        // harness is parked on a promise nothing can resolve: the context
        // has no timers or async ops left to wake it. Hold the stage to its
        // full budget so the caller sees a timeout.
        None => {
            tokio::time::sleep(request.timeout.saturating_sub(started.elapsed())).await;
            return Err(SandboxError::Timeout);
        }
    };

    if payload.len() > request.max_result_bytes {
        return Err(SandboxError::ResultTooLarge { max: request.max_result_bytes });
    }

    Ok(serde_json::from_str(&payload)?)
}

/// Installs the environment, bootstrap, and optional prelude, then runs the
/// harness and drives the event loop to completion. Returns the error
/// message of whichever script failed, if any.
async fn run_scripts(runtime: &mut JsRuntime, request: &SandboxRequest) -> Option<String> {
    let env_json = match serde_json::to_string(&request.env) {
        Ok(json) => json,
        Err(e) => return Some(e.to_string()),
    };
    let env_script = format!("globalThis.env = {env_json};");
    if let Err(e) = runtime.execute_script("<env>", env_script) {
        return Some(e.to_string());
    }

    if let Err(e) = runtime.execute_script("<bootstrap>", BOOTSTRAP_JS.to_string()) {
        return Some(e.to_string());
    }

    if let Some(prelude) = request.prelude {
        if let Err(e) = runtime.execute_script("<prelude>", prelude.to_string()) {
            return Some(e.to_string());
        }
    }

    if let Err(e) = runtime.execute_script("<harness>", request.script.clone()) {
        return Some(e.to_string());
    }

    match tokio::time::timeout(
        request.timeout,
        runtime.run_event_loop(PollEventLoopOptions::default()),
    )
    .await
    {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        // The watchdog fires on the same budget; wait for it to settle the
        // timed_out flag so the caller sees a timeout, not a script error.
        Err(_) => None,
    }
}

/// Parses the exception name out of an uncaught-exception report of the
/// form `Uncaught <Name>: <message>`.
fn exception_name(message: &str) -> String {
    let rest = message.strip_prefix("Uncaught ").unwrap_or(message);
    match rest.split_once(':') {
        Some((name, _))
            if !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            name.to_string()
        }
        _ => "Error".to_string(),
    }
}
