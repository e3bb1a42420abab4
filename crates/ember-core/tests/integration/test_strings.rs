use super::helpers::*;
use ember_core::TValue;
use pretty_assertions::assert_eq;

#[test]
fn test_intern_same_content_same_id() {
    let mut rt = runtime();
    let a = rt.intern(b"hello").unwrap();
    let b = rt.intern(b"hello").unwrap();
    let c = rt.intern(b"hellO").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(rt.raw_equal(TValue::from_string_id(a), TValue::from_string_id(b)));
}

#[test]
fn test_intern_binary_content() {
    let mut rt = runtime();
    let bytes = b"a\0b\xff";
    let id = rt.intern(bytes).unwrap();
    assert_eq!(rt.str_bytes(id), bytes);
    let empty = rt.intern(b"").unwrap();
    assert_eq!(rt.str_bytes(empty), b"");
    assert_ne!(id, empty);
}

#[test]
fn test_long_strings_intern_too() {
    let mut rt = runtime();
    let long = vec![b'x'; 4096];
    let a = rt.intern(&long).unwrap();
    let b = rt.intern(&long).unwrap();
    assert_eq!(a, b);
    assert_eq!(rt.str_bytes(a).len(), 4096);
}

#[test]
fn test_string_table_grows() {
    let mut rt = runtime();
    let before = rt.strings().size();
    for i in 0..500 {
        rt.intern(format!("s{i}").as_bytes()).unwrap();
    }
    assert!(rt.strings().size() > before);
    assert!(rt.strings().size().is_power_of_two());
    for i in 0..500 {
        let s = format!("s{i}");
        let id = rt.intern(s.as_bytes()).unwrap();
        assert_eq!(rt.str_bytes(id), s.as_bytes());
    }
}

#[test]
fn test_unreferenced_strings_are_collected() {
    let mut rt = runtime();
    let base = rt.strings().len();
    for i in 0..100 {
        rt.intern(format!("tmp{i}").as_bytes()).unwrap();
    }
    assert_eq!(rt.strings().len(), base + 100);
    let stats = rt.collect_garbage();
    assert_eq!(stats.strings_freed, 100);
    assert_eq!(rt.strings().len(), base);
}

#[test]
fn test_referenced_strings_survive() {
    let mut rt = runtime();
    let g = rt.globals();
    let key = rt.intern(b"greeting").unwrap();
    let val = string(&mut rt, "hello world");
    rt.table_set_str(g, key, val).unwrap();
    rt.collect_garbage();
    assert!(rt.strings().contains(key));
    assert_eq!(rt.table_get_str(g, key), val);
    let again = rt.intern(b"hello world").unwrap();
    assert_eq!(TValue::from_string_id(again), val);
}

#[test]
fn test_string_table_shrinks_after_collection() {
    let mut rt = runtime();
    for i in 0..2000 {
        rt.intern(format!("junk{i}").as_bytes()).unwrap();
    }
    let peak = rt.strings().size();
    rt.collect_garbage();
    assert!(rt.strings().size() < peak);
    assert!(rt.strings().size() >= 32);
}

#[test]
fn test_string_memory_is_returned() {
    let mut rt = runtime();
    rt.collect_garbage();
    let baseline = rt.memory_in_use();
    for i in 0..50 {
        rt.intern(format!("{i:0>64}").as_bytes()).unwrap();
    }
    assert!(rt.memory_in_use() > baseline);
    rt.collect_garbage();
    assert!(rt.memory_in_use() <= baseline + rt.strings().size() * 8);
}
