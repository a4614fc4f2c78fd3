//! Startup dispatcher and lifecycle tests
//!
//! Guest modules are expressed as inline WAT and driven through a real
//! engine, linker, and store.

use wasienv::{WasiEnv, WasiEnvError, WasiOptions};
use wasmtime::{Engine, Instance, Linker, Memory, MemoryType, Module, Store};

fn instantiate(env: &WasiEnv, wat: &str) -> (Store<()>, Instance) {
    let engine = Engine::default();
    let module = Module::new(&engine, wat).expect("wat should compile");
    let mut linker: Linker<()> = Linker::new(&engine);
    env.add_to_linker(&mut linker).expect("imports should register");
    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate(&mut store, &module)
        .expect("instantiation should succeed");
    (store, instance)
}

fn runs(store: &mut Store<()>, instance: &Instance) -> i32 {
    instance
        .get_global(&mut *store, "runs")
        .expect("runs global")
        .get(&mut *store)
        .i32()
        .expect("i32 global")
}

const COMMAND_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (global $runs (export "runs") (mut i32) (i32.const 0))
  (func (export "_start")
    (global.set $runs (i32.add (global.get $runs) (i32.const 1)))))
"#;

const REACTOR_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (global $runs (export "runs") (mut i32) (i32.const 0))
  (func (export "_initialize")
    (global.set $runs (i32.add (global.get $runs) (i32.const 1)))))
"#;

const LEGACY_REACTOR_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (global $runs (export "runs") (mut i32) (i32.const 0))
  (func (export "__wasi_unstable_reactor_start")
    (global.set $runs (i32.add (global.get $runs) (i32.const 1)))))
"#;

#[test]
fn command_entry_point_runs_exactly_once() {
    let mut env = WasiEnv::new(WasiOptions::new().arg("guest.wasm")).unwrap();
    let (mut store, instance) = instantiate(&env, COMMAND_WAT);

    env.start(&mut store, &instance).unwrap();
    assert!(env.started());
    assert_eq!(runs(&mut store, &instance), 1);

    let err = env.start(&mut store, &instance).unwrap_err();
    assert!(matches!(err, WasiEnvError::AlreadyStarted));
    assert_eq!(runs(&mut store, &instance), 1);
}

#[test]
fn reactor_initializer_runs_exactly_once() {
    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, REACTOR_WAT);

    env.start(&mut store, &instance).unwrap();
    assert_eq!(runs(&mut store, &instance), 1);

    assert!(matches!(
        env.start(&mut store, &instance),
        Err(WasiEnvError::AlreadyStarted)
    ));
}

#[test]
fn legacy_reactor_name_is_honored() {
    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, LEGACY_REACTOR_WAT);

    env.start(&mut store, &instance).unwrap();
    assert_eq!(runs(&mut store, &instance), 1);
}

#[test]
fn command_entry_point_takes_priority_over_reactor() {
    const BOTH_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (global $cmd (export "cmd") (mut i32) (i32.const 0))
      (global $rct (export "rct") (mut i32) (i32.const 0))
      (func (export "_start") (global.set $cmd (i32.const 1)))
      (func (export "_initialize") (global.set $rct (i32.const 1))))
    "#;

    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, BOTH_WAT);
    env.start(&mut store, &instance).unwrap();

    let cmd = instance
        .get_global(&mut store, "cmd")
        .unwrap()
        .get(&mut store)
        .i32()
        .unwrap();
    let rct = instance
        .get_global(&mut store, "rct")
        .unwrap()
        .get(&mut store)
        .i32()
        .unwrap();
    assert_eq!(cmd, 1);
    assert_eq!(rct, 0);
}

#[test]
fn library_module_start_is_a_noop() {
    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, r#"(module (memory (export "memory") 1))"#);

    env.start(&mut store, &instance).unwrap();
    assert!(env.started());
    assert!(matches!(
        env.start(&mut store, &instance),
        Err(WasiEnvError::AlreadyStarted)
    ));
}

#[test]
fn missing_memory_export_fails_and_leaves_the_environment_retryable() {
    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();

    let (mut store, instance) = instantiate(&env, r#"(module (func (export "_start")))"#);
    let err = env.start(&mut store, &instance).unwrap_err();
    assert!(matches!(
        err,
        WasiEnvError::InvalidArgument { field: "instance.exports.memory", .. }
    ));
    assert!(!env.started());

    // Retrying with a corrected instance succeeds.
    let (mut store, instance) = instantiate(&env, COMMAND_WAT);
    env.start(&mut store, &instance).unwrap();
    assert_eq!(runs(&mut store, &instance), 1);
}

#[test]
fn mistyped_memory_export_fails_invalid_argument() {
    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, r#"(module (func (export "memory")))"#);

    let err = env.start(&mut store, &instance).unwrap_err();
    match err {
        WasiEnvError::InvalidArgument { field, actual, .. } => {
            assert_eq!(field, "instance.exports.memory");
            assert!(actual.contains("function"), "actual was {actual:?}");
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

#[test]
fn mistyped_entry_point_does_not_consume_the_start() {
    const BAD_SIGNATURE_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "_start") (param i32)))
    "#;

    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, BAD_SIGNATURE_WAT);

    let err = env.start(&mut store, &instance).unwrap_err();
    assert!(matches!(
        err,
        WasiEnvError::InvalidArgument { field: "_start", .. }
    ));
    assert!(!env.started());

    // No guest code ran; retrying with a corrected instance succeeds.
    let (mut store, instance) = instantiate(&env, COMMAND_WAT);
    env.start(&mut store, &instance).unwrap();
    assert_eq!(runs(&mut store, &instance), 1);
}

#[test]
fn proc_exit_zero_is_a_clean_command_exit() {
    const EXIT_OK_WAT: &str = r#"
    (module
      (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
      (memory (export "memory") 1)
      (func (export "_start") (call $proc_exit (i32.const 0)) unreachable))
    "#;

    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, EXIT_OK_WAT);
    env.start(&mut store, &instance).unwrap();
}

#[test]
fn nonzero_proc_exit_surfaces_the_code() {
    const EXIT_7_WAT: &str = r#"
    (module
      (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
      (memory (export "memory") 1)
      (func (export "_start") (call $proc_exit (i32.const 7)) unreachable))
    "#;

    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, EXIT_7_WAT);

    let err = env.start(&mut store, &instance).unwrap_err();
    assert!(matches!(err, WasiEnvError::Exited { code: 7 }));

    // The environment is terminal either way.
    assert!(matches!(
        env.start(&mut store, &instance),
        Err(WasiEnvError::AlreadyStarted)
    ));
}

#[test]
fn trapping_guest_still_consumes_the_single_start() {
    const TRAP_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "_start") unreachable))
    "#;

    let mut env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, TRAP_WAT);

    let err = env.start(&mut store, &instance).unwrap_err();
    assert!(matches!(err, WasiEnvError::StartFailed { entry: "_start", .. }));
    assert!(matches!(
        env.start(&mut store, &instance),
        Err(WasiEnvError::AlreadyStarted)
    ));
}

#[test]
fn eager_memory_skips_the_export_lookup() {
    const EAGER_WAT: &str = r#"
    (module
      (import "env" "memory" (memory 1))
      (import "wasi_snapshot_preview1" "args_sizes_get"
        (func $sizes (param i32 i32) (result i32)))
      (func (export "_start")
        (drop (call $sizes (i32.const 0) (i32.const 4)))))
    "#;

    let engine = Engine::default();
    let mut store = Store::new(&engine, ());
    let memory = Memory::new(&mut store, MemoryType::new(1, None)).unwrap();

    let mut env = WasiEnv::new(WasiOptions::new().arg("eager").memory(memory)).unwrap();

    let module = Module::new(&engine, EAGER_WAT).unwrap();
    let mut linker: Linker<()> = Linker::new(&engine);
    env.add_to_linker(&mut linker).unwrap();
    linker.define(&store, "env", "memory", memory).unwrap();

    let instance = linker.instantiate(&mut store, &module).unwrap();
    env.start(&mut store, &instance).unwrap();

    // The guest has no memory export; argc arrived through the imported
    // memory the bridge was resolved with at construction time.
    let data = memory.data(&store);
    assert_eq!(u32::from_le_bytes(data[0..4].try_into().unwrap()), 1);
}

#[test]
fn invoking_an_import_before_start_traps_with_an_embedding_error() {
    const POKE_WAT: &str = r#"
    (module
      (import "wasi_snapshot_preview1" "args_sizes_get"
        (func $sizes (param i32 i32) (result i32)))
      (memory (export "memory") 1)
      (func (export "poke") (result i32)
        (call $sizes (i32.const 0) (i32.const 4))))
    "#;

    let env = WasiEnv::new(WasiOptions::new()).unwrap();
    let (mut store, instance) = instantiate(&env, POKE_WAT);

    let poke = instance
        .get_typed_func::<(), i32>(&mut store, "poke")
        .unwrap();
    let err = poke.call(&mut store, ()).unwrap_err();
    assert!(
        format!("{err:?}").contains("not resolved"),
        "unexpected trap: {err:?}"
    );
}
