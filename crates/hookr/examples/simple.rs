//! Minimal host: load a guest, register a host function, call the guest.
//!
//! The guest here is embedded as WAT for a self-contained example; a real
//! embedder would point `with_file` at a compiled `.wasm` artifact.
//!
//! Run with: cargo run --example simple

use std::io::Write;

use hookr::{EngineConfig, FileOptions, HostFn, Plugin};

const GUEST: &str = r#"
(module
  (import "hookr" "__plugin_request" (func $plugin_request (param i32 i32)))
  (import "hookr" "__plugin_response" (func $plugin_response (param i32 i32)))
  (import "hookr" "__host_call" (func $host_call (param i32 i32 i32 i32) (result i32)))
  (import "hookr" "__host_response_len" (func $host_response_len (result i32)))
  (import "hookr" "__host_response" (func $host_response (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 256) "hello")
  (func (export "__plugin_call") (param $op_len i32) (param $req_len i32) (result i32)
    (call $plugin_request (i32.const 0) (i32.const 1024))
    ;; every operation relays its payload through the "hello" host function
    (drop (call $host_call (i32.const 256) (i32.const 5) (i32.const 1024) (local.get $req_len)))
    (call $host_response (i32.const 8192))
    (call $plugin_response (i32.const 8192) (call $host_response_len))
    (i32.const 1)))
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("info,hookr=debug")
        .init();

    let mut guest = tempfile::NamedTempFile::new()?;
    guest.write_all(GUEST.as_bytes())?;
    guest.flush()?;

    let hello = HostFn::raw("hello", |_ctx, payload| {
        Ok([&b"Hello "[..], payload].concat())
    });

    let plugin = Plugin::new(
        EngineConfig::new()
            .with_file(guest.path(), FileOptions::new())
            .with_host_fns([hello]),
    )?;

    let greet = plugin.function_bytes("greet")?;
    let reply = greet.call(b"world")?;
    println!("guest replied: {}", String::from_utf8_lossy(&reply));

    plugin.close()?;
    Ok(())
}
