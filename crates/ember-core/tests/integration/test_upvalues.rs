use super::helpers::*;
use ember_core::heap::Proto;
use ember_core::TValue;
use pretty_assertions::assert_eq;

#[test]
fn test_same_slot_shares_upvalue() {
    let mut rt = runtime();
    let th = rt.main_thread();
    let a = rt.find_or_create_upval(th, 3).unwrap();
    let b = rt.find_or_create_upval(th, 3).unwrap();
    let c = rt.find_or_create_upval(th, 4).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(rt.heap().open_upval_count(), 2);
}

#[test]
fn test_open_upvalue_aliases_stack() {
    let mut rt = runtime();
    let th = rt.main_thread();
    let uv = rt.find_or_create_upval(th, 0).unwrap();
    rt.stack_mut(th)[0] = num(1.0);
    assert_num(rt.upval_get(uv), 1.0);
    rt.upval_set(uv, num(2.0));
    assert_num(rt.stack(th)[0], 2.0);
}

#[test]
fn test_close_captures_current_value() {
    let mut rt = runtime();
    let th = rt.main_thread();
    let low = rt.find_or_create_upval(th, 1).unwrap();
    let high = rt.find_or_create_upval(th, 5).unwrap();
    rt.stack_mut(th)[1] = num(10.0);
    rt.stack_mut(th)[5] = num(50.0);

    rt.close_upvals(th, 2);

    assert!(!rt.heap().get_upval(high).is_open());
    assert!(rt.heap().get_upval(low).is_open());
    rt.stack_mut(th)[5] = num(0.0);
    assert_num(rt.upval_get(high), 50.0);
    rt.upval_set(high, num(51.0));
    assert_num(rt.stack(th)[5], 0.0);
    assert_num(rt.upval_get(high), 51.0);

    // a fresh capture of the same slot is a new cell
    let again = rt.find_or_create_upval(th, 5).unwrap();
    assert_ne!(again, high);
}

#[test]
fn test_closures_share_closed_cell() {
    let mut rt = runtime();
    let th = rt.main_thread();
    let proto = rt.new_proto(Proto::default()).unwrap();
    let uv = rt.find_or_create_upval(th, 2).unwrap();
    let f = rt.new_closure(proto, None, vec![uv]).unwrap();
    let g = rt.new_closure(proto, None, vec![uv]).unwrap();
    rt.stack_mut(th)[2] = num(7.0);
    rt.close_upvals(th, 0);

    let cell_f = rt.closure(f).upvals[0];
    let cell_g = rt.closure(g).upvals[0];
    assert_eq!(cell_f, cell_g);
    rt.upval_set(cell_f, num(8.0));
    assert_num(rt.upval_get(cell_g), 8.0);
}

#[test]
fn test_closed_upvalue_kept_by_closure() {
    let mut rt = runtime();
    let th = rt.main_thread();
    let g = rt.globals();
    let proto = rt.new_proto(Proto::default()).unwrap();
    let uv = rt.find_or_create_upval(th, 0).unwrap();
    let payload = rt.new_table(0, 0).unwrap();
    rt.stack_mut(th)[0] = TValue::from_table(payload);
    rt.close_upvals(th, 0);
    rt.stack_mut(th)[0] = TValue::nil();

    let f = rt.new_closure(proto, None, vec![uv]).unwrap();
    let name = rt.intern(b"f").unwrap();
    rt.table_set_str(g, name, TValue::from_closure(f)).unwrap();

    rt.collect_garbage();

    assert!(rt.heap().upvals.get(uv.0).is_some());
    assert_eq!(rt.upval_get(uv), TValue::from_table(payload));
    assert!(rt.heap().tables.get(payload.0).is_some());
}

#[test]
fn test_closed_upvalue_reachable_only_from_garbage_is_freed() {
    let mut rt = runtime();
    let th = rt.main_thread();
    let proto = rt.new_proto(Proto::default()).unwrap();
    let uv = rt.find_or_create_upval(th, 0).unwrap();
    rt.close_upvals(th, 0);
    let _f = rt.new_closure(proto, None, vec![uv]).unwrap();

    rt.collect_garbage();

    assert!(rt.heap().upvals.get(uv.0).is_none());
    assert!(rt.heap().closures.is_empty());
    assert!(rt.heap().protos.is_empty());
}

#[test]
fn test_upvalues_on_second_thread() {
    let mut rt = runtime();
    let co = rt.new_thread().unwrap();
    let uv = rt.find_or_create_upval(co, 1).unwrap();
    rt.stack_mut(co)[1] = num(3.0);
    assert_num(rt.upval_get(uv), 3.0);
    assert!(rt.stack(rt.main_thread())[1].is_nil());
    rt.close_upvals(co, 0);
    assert_eq!(rt.heap().open_upval_count(), 0);
    assert_num(rt.upval_get(uv), 3.0);
}
