use super::helpers::*;
use ember_core::error::{CoreError, KeyError};
use ember_core::TValue;
use pretty_assertions::assert_eq;

// ---- sequences ----

#[test]
fn test_sequence_length() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    for i in 1..=100 {
        rt.table_set_int(t, i, num(i as f64 * 10.0)).unwrap();
    }
    assert_eq!(rt.table_length(t), 100);
    assert_num(rt.table_get_int(t, 37), 370.0);
    assert!(rt.table(t).array_len() >= 64);
}

#[test]
fn test_sequence_lands_in_array_part() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    for i in 1..=16 {
        rt.table_set(t, num(i as f64), TValue::from_bool(true)).unwrap();
    }
    assert_eq!(rt.table(t).array_len(), 16);
    assert_eq!(rt.table_length(t), 16);
}

#[test]
fn test_length_after_truncation() {
    let mut rt = runtime();
    let t = rt.new_table(8, 0).unwrap();
    for i in 1..=8 {
        rt.table_set_int(t, i, num(1.0)).unwrap();
    }
    rt.table_set_int(t, 8, TValue::nil()).unwrap();
    rt.table_set_int(t, 7, TValue::nil()).unwrap();
    assert_eq!(rt.table_length(t), 6);
}

#[test]
fn test_length_empty() {
    let mut rt = runtime();
    let t = rt.new_table(4, 4).unwrap();
    assert_eq!(rt.table_length(t), 0);
}

#[test]
fn test_length_continues_into_hash() {
    let mut rt = runtime();
    let t = rt.new_table(2, 4).unwrap();
    rt.table_set_int(t, 1, num(1.0)).unwrap();
    rt.table_set_int(t, 2, num(2.0)).unwrap();
    rt.table_set_int(t, 3, num(3.0)).unwrap();
    assert_eq!(rt.table(t).array_len(), 2);
    assert_eq!(rt.table_length(t), 3);
}

// ---- key normalization ----

#[test]
fn test_integral_float_and_int_keys_agree() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    rt.table_set(t, num(3.0), num(33.0)).unwrap();
    assert_num(rt.table_get_int(t, 3), 33.0);
    rt.table_set_int(t, 1000, num(7.0)).unwrap();
    assert_num(rt.table_get(t, num(1000.0)), 7.0);
}

#[test]
fn test_negative_zero_key() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    rt.table_set(t, num(-0.0), num(5.0)).unwrap();
    assert_num(rt.table_get(t, num(0.0)), 5.0);
    assert_eq!(traverse(&rt, t).len(), 1);
}

#[test]
fn test_fractional_keys_stay_distinct() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    rt.table_set(t, num(1.5), num(1.0)).unwrap();
    rt.table_set(t, num(1.0), num(2.0)).unwrap();
    assert_num(rt.table_get(t, num(1.5)), 1.0);
    assert_num(rt.table_get_int(t, 1), 2.0);
}

#[test]
fn test_string_keys_by_content() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    let k1 = string(&mut rt, "name");
    rt.table_set(t, k1, num(1.0)).unwrap();
    let k2 = string(&mut rt, "name");
    assert_num(rt.table_get(t, k2), 1.0);
    let id = rt.intern(b"name").unwrap();
    assert_num(rt.table_get_str(t, id), 1.0);
}

#[test]
fn test_object_keys_by_identity() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    let a = rt.new_table(0, 0).unwrap();
    let b = rt.new_table(0, 0).unwrap();
    rt.table_set(t, TValue::from_table(a), num(1.0)).unwrap();
    rt.table_set(t, TValue::from_table(b), num(2.0)).unwrap();
    rt.table_set(t, TValue::from_bool(false), num(3.0)).unwrap();
    rt.table_set(t, TValue::from_light_userdata(0x1000), num(4.0)).unwrap();
    assert_num(rt.table_get(t, TValue::from_table(a)), 1.0);
    assert_num(rt.table_get(t, TValue::from_table(b)), 2.0);
    assert_num(rt.table_get(t, TValue::from_bool(false)), 3.0);
    assert_num(rt.table_get(t, TValue::from_light_userdata(0x1000)), 4.0);
    assert!(rt.table_get(t, TValue::from_bool(true)).is_nil());
}

#[test]
fn test_invalid_keys_rejected() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    assert_eq!(
        rt.table_set(t, TValue::nil(), num(1.0)),
        Err(CoreError::InvalidKey(KeyError::Nil))
    );
    assert_eq!(
        rt.table_set(t, num(f64::NAN), num(1.0)),
        Err(CoreError::InvalidKey(KeyError::NaN))
    );
    assert!(rt.table_get(t, TValue::nil()).is_nil());
    assert!(rt.table_get(t, num(f64::NAN)).is_nil());
}

// ---- traversal ----

#[test]
fn test_next_visits_array_then_hash() {
    let mut rt = runtime();
    let t = rt.new_table(3, 0).unwrap();
    for i in 1..=3 {
        rt.table_set_int(t, i, num(i as f64)).unwrap();
    }
    let x = string(&mut rt, "x");
    rt.table_set(t, x, num(99.0)).unwrap();

    let pairs = traverse(&rt, t);
    let keys: Vec<_> = pairs.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![num(1.0), num(2.0), num(3.0), x]);
}

#[test]
fn test_next_skips_nil_slots() {
    let mut rt = runtime();
    let t = rt.new_table(4, 0).unwrap();
    rt.table_set_int(t, 2, num(2.0)).unwrap();
    rt.table_set_int(t, 4, num(4.0)).unwrap();
    assert_eq!(traverse(&rt, t), vec![(num(2.0), num(2.0)), (num(4.0), num(4.0))]);
}

#[test]
fn test_clear_fields_during_traversal() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    for i in 0..50 {
        let k = string(&mut rt, &format!("k{i}"));
        rt.table_set(t, k, num(i as f64)).unwrap();
    }
    let mut key = TValue::nil();
    let mut visited = 0;
    while let Some((k, _)) = rt.table_next(t, key).unwrap() {
        rt.table_set(t, k, TValue::nil()).unwrap();
        visited += 1;
        key = k;
    }
    assert_eq!(visited, 50);
    assert!(traverse(&rt, t).is_empty());
}

#[test]
fn test_next_unknown_key_is_error() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    rt.table_set_int(t, 1, num(1.0)).unwrap();
    let missing = string(&mut rt, "missing");
    assert_eq!(rt.table_next(t, missing), Err(CoreError::InvalidIteratorKey));
}

// ---- resize ----

#[test]
fn test_mixed_growth_keeps_every_entry() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    for i in 1..=200 {
        rt.table_set_int(t, i, num(i as f64)).unwrap();
        let k = string(&mut rt, &format!("s{i}"));
        rt.table_set(t, k, num(-(i as f64))).unwrap();
    }
    for i in 1..=200 {
        assert_num(rt.table_get_int(t, i), i as f64);
        let id = rt.intern(format!("s{i}").as_bytes()).unwrap();
        assert_num(rt.table_get_str(t, id), -(i as f64));
    }
    assert_eq!(traverse(&rt, t).len(), 400);
}

#[test]
fn test_explicit_resize_preserves_content() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    for i in 1..=10 {
        rt.table_set_int(t, i, num(i as f64)).unwrap();
    }
    rt.table_resize(t, 2, 0).unwrap();
    assert_eq!(rt.table(t).array_len(), 2);
    for i in 1..=10 {
        assert_num(rt.table_get_int(t, i), i as f64);
    }
    rt.table_resize(t, 16, 0).unwrap();
    assert_eq!(rt.table(t).array_len(), 16);
    assert_eq!(rt.table_length(t), 10);
}

#[test]
fn test_out_of_memory_leaves_table_intact() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    for i in 1..=4 {
        rt.table_set_int(t, i, num(i as f64)).unwrap();
    }
    rt.set_memory_limit(Some(rt.memory_in_use()));
    let big = rt.table_set_int(t, 1_000_000, num(1.0));
    assert_eq!(big, Err(CoreError::OutOfMemory));
    rt.set_memory_limit(None);
    for i in 1..=4 {
        assert_num(rt.table_get_int(t, i), i as f64);
    }
    assert!(rt.table_get_int(t, 1_000_000).is_nil());
}

// ---- metatables ----

#[test]
fn test_metatable_link() {
    let mut rt = runtime();
    let t = rt.new_table(0, 0).unwrap();
    let mt = rt.new_table(0, 0).unwrap();
    assert_eq!(rt.get_metatable(t), None);
    rt.set_metatable(t, Some(mt));
    assert_eq!(rt.get_metatable(t), Some(mt));
    rt.set_metatable(t, None);
    assert_eq!(rt.get_metatable(t), None);
}
