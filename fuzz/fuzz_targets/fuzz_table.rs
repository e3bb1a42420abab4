#![no_main]

use std::collections::HashMap;

use ember_core::gc::GcState;
use ember_core::mem::MemoryAccount;
use ember_core::string::StringInterner;
use ember_core::table::Table;
use ember_core::value::TValue;
use libfuzzer_sys::fuzz_target;

// Any sequence of raw sets must agree with a plain map, and traversal must
// visit each live key exactly once.
fuzz_target!(|data: &[u8]| {
    let gc = GcState::new();
    let mut mem = MemoryAccount::new(None);
    let mut strings = StringInterner::new(32, &mut mem).unwrap();
    let mut table = Table::new(0, 0, gc.new_mark(), &mut mem).unwrap();
    let mut model: HashMap<u64, TValue> = HashMap::new();

    for chunk in data.chunks(3) {
        let [op, k, v] = match chunk {
            [a, b, c] => [*a, *b, *c],
            _ => break,
        };
        let key = match op % 4 {
            0 => TValue::from_number(k as f64),
            1 => TValue::from_number(k as f64 + 0.5),
            2 => TValue::from_number(-(k as f64)),
            _ => TValue::from_string_id(strings.intern(&[k], &gc, &mut mem).unwrap()),
        };
        let value = if v % 5 == 0 {
            TValue::nil()
        } else {
            TValue::from_number(v as f64)
        };
        table.set(key, value, &strings, &mut mem).unwrap();
        let bits = match key.as_number() {
            Some(n) if n == 0.0 => TValue::from_number(0.0).raw_bits(),
            _ => key.raw_bits(),
        };
        if value.is_nil() {
            model.remove(&bits);
        } else {
            model.insert(bits, value);
        }
        assert_eq!(table.get(key, &strings), value);
    }

    let mut seen = 0;
    let mut key = TValue::nil();
    while let Some((k, v)) = table.next(key, &strings).unwrap() {
        assert!(!v.is_nil());
        assert_eq!(table.get(k, &strings), v);
        seen += 1;
        key = k;
    }
    assert_eq!(seen, model.len());
});
