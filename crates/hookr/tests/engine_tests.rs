//! End-to-end tests driving real guests through the public API.
//!
//! The guests are written in WAT and compiled by the runtime at load time.
//! The main guest dispatches on the *length* of the operation name, which
//! keeps the dispatch logic in flat WAT manageable:
//!
//! | len | operation    | behavior                                        |
//! |-----|--------------|--------------------------------------------------|
//! | 3   | `log`        | forward payload to `__log`, then echo it         |
//! | 4   | `echo`       | respond with the request payload                 |
//! | 5   | `relay`      | `__host_call("hello", payload)`, forward outcome |
//! | 6   | `reject`     | `__plugin_error("planned Failure")`, return 0    |
//! | 7   | `silence`    | return 0 without reporting anything              |
//! | 8   | `emptyout`   | empty `__plugin_response`, return 1              |
//! | 9   | `outbounds`  | respond from an unaddressable pointer            |
//! | 10  | `spinwheels` | loop forever                                     |
//! | *   | anything else| `__plugin_error("unknown operation")`            |

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hookr::{
    EngineConfig, EngineState, Error, FileOptions, HostFn, Plugin, RandSource, Sha256Hasher,
    Stdio,
};

const SIMPLE_GUEST: &str = r#"
(module
  (import "hookr" "__plugin_request" (func $plugin_request (param i32 i32)))
  (import "hookr" "__plugin_response" (func $plugin_response (param i32 i32)))
  (import "hookr" "__plugin_error" (func $plugin_error (param i32 i32)))
  (import "hookr" "__host_call" (func $host_call (param i32 i32 i32 i32) (result i32)))
  (import "hookr" "__host_response_len" (func $host_response_len (result i32)))
  (import "hookr" "__host_response" (func $host_response (param i32)))
  (import "hookr" "__host_error_len" (func $host_error_len (result i32)))
  (import "hookr" "__host_error" (func $host_error (param i32)))
  (import "hookr" "__log" (func $log (param i32 i32)))

  (memory (export "memory") 2)

  (data (i32.const 256) "hello")
  (data (i32.const 272) "planned Failure")
  (data (i32.const 304) "guest ready")
  (data (i32.const 320) "unknown operation")

  (func (export "hookr_init")
    (call $log (i32.const 304) (i32.const 11)))

  (func (export "__plugin_call") (param $op_len i32) (param $req_len i32) (result i32)
    ;; pull the operation into 0 and the request into 1024
    (call $plugin_request (i32.const 0) (i32.const 1024))

    ;; log: forward the payload to the host logger, then echo it
    (if (i32.eq (local.get $op_len) (i32.const 3))
      (then
        (call $log (i32.const 1024) (local.get $req_len))
        (call $plugin_response (i32.const 1024) (local.get $req_len))
        (return (i32.const 1))))

    ;; echo: respond with the request payload
    (if (i32.eq (local.get $op_len) (i32.const 4))
      (then
        (call $plugin_response (i32.const 1024) (local.get $req_len))
        (return (i32.const 1))))

    ;; relay: forward the payload to host function "hello"
    (if (i32.eq (local.get $op_len) (i32.const 5))
      (then
        (if (i32.eq
              (call $host_call
                (i32.const 256) (i32.const 5)
                (i32.const 1024) (local.get $req_len))
              (i32.const 1))
          (then
            (call $host_response (i32.const 65536))
            (call $plugin_response (i32.const 65536) (call $host_response_len))
            (return (i32.const 1)))
          (else
            (call $host_error (i32.const 65536))
            (call $plugin_error (i32.const 65536) (call $host_error_len))
            (return (i32.const 0))))))

    ;; reject: report a guest error
    (if (i32.eq (local.get $op_len) (i32.const 6))
      (then
        (call $plugin_error (i32.const 272) (i32.const 15))
        (return (i32.const 0))))

    ;; silence: fail without reporting anything
    (if (i32.eq (local.get $op_len) (i32.const 7))
      (then (return (i32.const 0))))

    ;; emptyout: succeed with an empty response
    (if (i32.eq (local.get $op_len) (i32.const 8))
      (then
        (call $plugin_response (i32.const 1024) (i32.const 0))
        (return (i32.const 1))))

    ;; outbounds: hand the host an unaddressable response pointer
    (if (i32.eq (local.get $op_len) (i32.const 9))
      (then
        (call $plugin_response (i32.const 0x7fffff00) (i32.const 64))
        (return (i32.const 1))))

    ;; spinwheels: spin forever
    (if (i32.eq (local.get $op_len) (i32.const 10))
      (then (loop $spin (br $spin))))

    (call $plugin_error (i32.const 320) (i32.const 17))
    (i32.const 0)))
"#;

/// A syntactically valid module without the `__plugin_call` export.
const NO_ENTRY_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "_initialize")))
"#;

/// `_start` exits with code 3 through WASI.
const EXIT_GUEST: &str = r#"
(module
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (func (export "_start") (call $proc_exit (i32.const 3)))
  (func (export "__plugin_call") (param i32 i32) (result i32) (i32.const 1)))
"#;

/// Writes "hi" to stdout during `_initialize`; every operation responds with
/// eight bytes from WASI randomness.
const IO_GUEST: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "random_get"
    (func $random_get (param i32 i32) (result i32)))
  (import "hookr" "__plugin_response" (func $plugin_response (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "hi")
  (func (export "_initialize")
    (i32.store (i32.const 32) (i32.const 64))
    (i32.store (i32.const 36) (i32.const 2))
    (drop (call $fd_write (i32.const 1) (i32.const 32) (i32.const 1) (i32.const 48))))
  (func (export "__plugin_call") (param i32 i32) (result i32)
    (drop (call $random_get (i32.const 1024) (i32.const 8)))
    (call $plugin_response (i32.const 1024) (i32.const 8))
    (i32.const 1)))
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
struct Greeting {
    msg: String,
}

fn write_guest(wat: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(wat.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn simple_plugin(configure: impl FnOnce(EngineConfig) -> EngineConfig) -> Plugin {
    let guest = write_guest(SIMPLE_GUEST);
    let config =
        configure(EngineConfig::new().with_file(guest.path(), FileOptions::new()));
    Plugin::new(config).unwrap()
}

#[test]
fn echo_round_trips() {
    let plugin = simple_plugin(|c| c);
    assert_eq!(plugin.state().unwrap(), EngineState::Instantiated);
    assert!(plugin.memory_size().unwrap() >= 2 * 65536);
    let result = plugin.invoke("echo", b"hello").unwrap();
    assert_eq!(result, b"hello");
    // empty payloads are legal
    assert_eq!(plugin.invoke("echo", b"").unwrap(), b"");
    plugin.close().unwrap();
}

#[test]
fn invoke_after_close_is_rejected() {
    let plugin = simple_plugin(|c| c);
    plugin.close().unwrap();
    assert!(matches!(
        plugin.invoke("echo", b"hi"),
        Err(Error::Config(_))
    ));
    // close is idempotent
    plugin.close().unwrap();
}

#[test]
fn nested_host_call_raw() {
    let plugin = simple_plugin(|c| {
        c.with_host_fns([HostFn::raw("hello", |_, payload| {
            Ok([&b"Hello "[..], payload].concat())
        })])
    });
    let result = plugin.invoke("relay", b"Steve").unwrap();
    assert_eq!(result, b"Hello Steve");
}

#[test]
fn typed_echo_round_trips_through_the_codec() {
    let plugin = simple_plugin(|c| c);
    let echo = plugin.function::<Greeting, Greeting>("echo").unwrap();
    let input = Greeting {
        msg: "Who controls the past controls the future".into(),
    };
    assert_eq!(echo.call(&input).unwrap(), input);
    // the JSON codec satisfies the same law
    let echo_json = plugin
        .function_with::<Greeting, Greeting, _>("echo", hookr::Json)
        .unwrap();
    assert_eq!(echo_json.call(&input).unwrap(), input);
}

#[test]
fn nested_host_call_typed() {
    let plugin = simple_plugin(|c| {
        c.with_host_fns([HostFn::typed(
            "hello",
            hookr::MsgPack,
            |_, input: Greeting| {
                Ok(Greeting {
                    msg: format!("Hello {}", input.msg),
                })
            },
        )])
    });
    let echo = plugin.function::<Greeting, Greeting>("relay").unwrap();
    let reply = echo.call(&Greeting { msg: "Steve".into() }).unwrap();
    assert_eq!(reply.msg, "Hello Steve");
}

#[test]
fn guest_error_is_verbatim() {
    let plugin = simple_plugin(|c| c);
    let err = plugin.invoke("reject", b"anything").unwrap_err();
    match err {
        Error::PluginFailure(msg) => assert_eq!(msg, "planned Failure"),
        other => panic!("expected PluginFailure, got: {other:?}"),
    }
}

#[test]
fn silent_failure_is_unsuccessful_call() {
    let plugin = simple_plugin(|c| c);
    let err = plugin.invoke("silence", b"").unwrap_err();
    match err {
        Error::UnsuccessfulCall(op) => assert_eq!(op, "silence"),
        other => panic!("expected UnsuccessfulCall, got: {other:?}"),
    }
}

#[test]
fn unknown_operation_reports_guest_error() {
    let plugin = simple_plugin(|c| c);
    let err = plugin.invoke("unregistered", b"").unwrap_err();
    assert!(matches!(err, Error::PluginFailure(msg) if msg == "unknown operation"));
}

#[test]
fn empty_response_yields_default_value() {
    let plugin = simple_plugin(|c| c);
    let fn_typed = plugin.function::<Greeting, Greeting>("emptyout").unwrap();
    let out = fn_typed.call(&Greeting { msg: "ignored".into() }).unwrap();
    assert_eq!(out, Greeting::default());
}

#[test]
fn host_handler_error_reaches_the_guest() {
    let plugin = simple_plugin(|c| {
        c.with_host_fns([HostFn::raw("hello", |_, _| Err("boom".into()))])
    });
    let err = plugin.invoke("relay", b"x").unwrap_err();
    match err {
        Error::PluginFailure(msg) => assert!(msg.contains("boom"), "message: {msg}"),
        other => panic!("expected PluginFailure, got: {other:?}"),
    }
}

#[test]
fn missing_handler_message_names_the_operation() {
    let plugin = simple_plugin(|c| c);
    let err = plugin.invoke("relay", b"x").unwrap_err();
    assert_eq!(
        err.to_string(),
        "no handler registered for operation 'hello'"
    );
}

#[test]
fn call_handler_overrides_registry() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let ops = seen.clone();
    let plugin = simple_plugin(move |c| {
        c.with_host_fns([HostFn::raw("hello", |_, _| {
            panic!("registry must not be consulted when a call handler is set")
        })])
        .with_call_handler(move |_, operation, payload| {
            ops.lock().unwrap().push(operation.to_string());
            Ok([&b"handled:"[..], payload].concat())
        })
    });
    let result = plugin.invoke("relay", b"x").unwrap();
    assert_eq!(result, b"handled:x");
    assert_eq!(seen.lock().unwrap().as_slice(), ["hello"]);
}

#[test]
fn registration_overwrites_previous_handler() {
    let plugin = simple_plugin(|c| c);
    plugin
        .register_function("hello", |_, _| Ok(b"first".to_vec()))
        .unwrap();
    assert_eq!(plugin.invoke("relay", b"").unwrap(), b"first");
    plugin
        .register_function("hello", |_, _| Ok(b"second".to_vec()))
        .unwrap();
    assert_eq!(plugin.invoke("relay", b"").unwrap(), b"second");
}

#[test]
fn guest_logs_reach_the_sink() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let plugin = simple_plugin(move |c| {
        c.with_logger(move |msg| sink.lock().unwrap().push(msg.to_string()))
    });
    // hookr_init already logged during instantiation
    assert_eq!(seen.lock().unwrap().as_slice(), ["guest ready"]);
    let result = plugin.invoke("log", b"ping").unwrap();
    assert_eq!(result, b"ping");
    assert_eq!(seen.lock().unwrap().as_slice(), ["guest ready", "ping"]);
}

#[test]
fn out_of_bounds_response_is_fatal_for_the_invocation() {
    let plugin = simple_plugin(|c| c);
    let err = plugin.invoke("outbounds", b"").unwrap_err();
    match err {
        Error::Invoke { operation, reason } => {
            assert_eq!(operation, "outbounds");
            assert!(reason.contains("out of bounds"), "reason: {reason}");
        }
        other => panic!("expected Invoke, got: {other:?}"),
    }
}

#[test]
fn runaway_guest_hits_the_call_deadline() {
    let plugin = simple_plugin(|c| c.with_call_deadline(Duration::from_millis(50)));
    let err = plugin.invoke("spinwheels", b"").unwrap_err();
    assert!(matches!(err, Error::Invoke { .. }), "got: {err:?}");
    plugin.close().unwrap();
}

#[test]
fn deadline_leaves_fast_calls_alone() {
    let plugin = simple_plugin(|c| c.with_call_deadline(Duration::from_secs(5)));
    assert_eq!(plugin.invoke("echo", b"quick").unwrap(), b"quick");
}

#[test]
fn cancelled_token_rejects_new_invocations() {
    let plugin = simple_plugin(|c| c);
    plugin.cancel_token().unwrap().cancel();
    let err = plugin.invoke("echo", b"").unwrap_err();
    match err {
        Error::Invoke { reason, .. } => assert!(reason.contains("cancelled")),
        other => panic!("expected Invoke, got: {other:?}"),
    }
}

#[test]
fn digest_mismatch_rejects_the_module() {
    let guest = write_guest(SIMPLE_GUEST);
    let config = EngineConfig::new().with_file(
        guest.path(),
        FileOptions::new()
            .with_hash("0".repeat(64))
            .with_hasher(Sha256Hasher),
    );
    let err = Plugin::new(config).unwrap_err();
    assert!(matches!(err, Error::IntegrityMismatch { .. }));
}

#[test]
fn matching_digest_loads() {
    use hookr::Hasher;
    let guest = write_guest(SIMPLE_GUEST);
    let digest = Sha256Hasher.digest(SIMPLE_GUEST.as_bytes());
    let config = EngineConfig::new().with_file(
        guest.path(),
        FileOptions::new()
            .with_hash(digest)
            .with_hasher(Sha256Hasher),
    );
    let plugin = Plugin::new(config).unwrap();
    assert_eq!(plugin.invoke("echo", b"ok").unwrap(), b"ok");
}

#[test]
fn missing_entry_point_closes_the_module() {
    let guest = write_guest(NO_ENTRY_GUEST);
    let config = EngineConfig::new().with_file(guest.path(), FileOptions::new());
    let err = Plugin::new(config).unwrap_err();
    match err {
        Error::MissingExport { export, .. } => assert_eq!(export, "__plugin_call"),
        other => panic!("expected MissingExport, got: {other:?}"),
    }
}

#[test]
fn invalid_module_bytes_fail_compilation() {
    let guest = write_guest("definitely not a wasm module");
    let config = EngineConfig::new().with_file(guest.path(), FileOptions::new());
    let err = Plugin::new(config).unwrap_err();
    assert!(matches!(err, Error::Compile(_)));
}

#[test]
fn nonzero_start_exit_fails_instantiation() {
    let guest = write_guest(EXIT_GUEST);
    let config = EngineConfig::new().with_file(guest.path(), FileOptions::new());
    let err = Plugin::new(config).unwrap_err();
    match err {
        Error::GuestStart(code) => assert_eq!(code, 3),
        other => panic!("expected GuestStart, got: {other:?}"),
    }
}

#[test]
fn guest_stdout_is_captured() {
    let pipe = wasmtime_wasi::pipe::MemoryOutputPipe::new(4096);
    let guest = write_guest(IO_GUEST);
    let config = EngineConfig::new()
        .with_file(guest.path(), FileOptions::new())
        .with_stdout(Stdio::Pipe(pipe.clone()))
        .with_stderr(Stdio::Discard);
    let plugin = Plugin::new(config).unwrap();
    assert_eq!(pipe.contents().to_vec(), b"hi");
    plugin.close().unwrap();
}

#[test]
fn seeded_random_is_deterministic() {
    let draw = |seed: u64| {
        let guest = write_guest(IO_GUEST);
        let config = EngineConfig::new()
            .with_file(guest.path(), FileOptions::new())
            .with_stdout(Stdio::Discard)
            .with_rand_source(RandSource::Seed(seed));
        let plugin = Plugin::new(config).unwrap();
        plugin.invoke("draw", b"").unwrap()
    };
    let first = draw(7);
    assert_eq!(first.len(), 8);
    assert_eq!(first, draw(7));
    assert_ne!(first, draw(8));
}

#[test]
fn empty_function_name_is_rejected() {
    let plugin = simple_plugin(|c| c);
    assert!(matches!(
        plugin.function_bytes(""),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        plugin.function::<Greeting, Greeting>(""),
        Err(Error::Config(_))
    ));
}

#[test]
fn function_bytes_wraps_invoke() {
    let plugin = simple_plugin(|c| c);
    let echo = plugin.function_bytes("echo").unwrap();
    assert_eq!(echo.name(), "echo");
    assert_eq!(echo.call(b"raw data").unwrap(), b"raw data");
}

#[test]
fn plugins_run_independently() {
    let first = simple_plugin(|c| c);
    let second = simple_plugin(|c| {
        c.with_host_fns([HostFn::raw("hello", |_, p| Ok(p.to_vec()))])
    });
    assert_eq!(second.invoke("relay", b"mirror").unwrap(), b"mirror");
    // the first plugin never had a handler registered
    assert!(first.invoke("relay", b"x").is_err());
    assert_eq!(first.invoke("echo", b"still fine").unwrap(), b"still fine");
}
