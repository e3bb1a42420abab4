use ember_core::{Runtime, RuntimeConfig, TValue};

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A runtime with default configuration.
pub fn runtime() -> Runtime {
    init_tracing();
    Runtime::new(RuntimeConfig::default()).unwrap_or_else(|e| panic!("runtime: {e}"))
}

pub fn num(n: f64) -> TValue {
    TValue::from_number(n)
}

/// Intern `s` and wrap it as a value.
pub fn string(rt: &mut Runtime, s: &str) -> TValue {
    TValue::from_string_id(rt.intern(s.as_bytes()).unwrap())
}

/// Collect every (key, value) pair by walking `next` from nil.
pub fn traverse(rt: &Runtime, t: ember_core::gc::GcIdx<ember_core::table::Table>) -> Vec<(TValue, TValue)> {
    let mut out = Vec::new();
    let mut key = TValue::nil();
    while let Some((k, v)) = rt.table_next(t, key).unwrap() {
        out.push((k, v));
        key = k;
    }
    out
}

/// Check that `v` is a number equal to `expected`.
pub fn assert_num(v: TValue, expected: f64) {
    let got = v
        .as_number()
        .unwrap_or_else(|| panic!("{v:?}, expected number {expected}"));
    assert!(got == expected, "got {got}, expected {expected}");
}
