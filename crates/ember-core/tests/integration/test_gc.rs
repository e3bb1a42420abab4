use super::helpers::*;
use ember_core::heap::Proto;
use ember_core::TValue;
use pretty_assertions::assert_eq;

#[test]
fn test_collect_on_fresh_runtime_frees_nothing() {
    let mut rt = runtime();
    let stats = rt.collect_garbage();
    assert_eq!(stats.objects_freed, 0);
    assert_eq!(stats.strings_freed, 0);
}

#[test]
fn test_cycle_is_collected() {
    let mut rt = runtime();
    let a = rt.new_table(0, 0).unwrap();
    let b = rt.new_table(0, 0).unwrap();
    rt.table_set_int(a, 1, TValue::from_table(b)).unwrap();
    rt.table_set_int(b, 1, TValue::from_table(a)).unwrap();
    let before = rt.memory_in_use();

    let stats = rt.collect_garbage();

    assert_eq!(stats.objects_freed, 2);
    assert!(rt.memory_in_use() < before);
    assert!(rt.heap().tables.get(a.0).is_none());
    assert!(rt.heap().tables.get(b.0).is_none());
}

#[test]
fn test_reachable_graph_survives_repeated_cycles() {
    let mut rt = runtime();
    let reg = rt.registry();
    let mut prev = reg;
    let mut chain = Vec::new();
    for i in 0..20 {
        let t = rt.new_table(0, 0).unwrap();
        let k = string(&mut rt, &format!("n{i}"));
        rt.table_set(prev, k, TValue::from_table(t)).unwrap();
        chain.push(t);
        prev = t;
    }
    for _ in 0..3 {
        let stats = rt.collect_garbage();
        assert_eq!(stats.objects_freed, 0);
    }
    for t in chain {
        assert!(rt.heap().tables.get(t.0).is_some());
    }
}

#[test]
fn test_removed_object_key_is_not_a_root() {
    let mut rt = runtime();
    let g = rt.globals();
    let holder = rt.new_table(0, 0).unwrap();
    let name = rt.intern(b"holder").unwrap();
    rt.table_set_str(g, name, TValue::from_table(holder)).unwrap();
    let temp = rt.new_table(0, 0).unwrap();
    rt.table_set(holder, TValue::from_table(temp), num(1.0)).unwrap();
    rt.table_set(holder, TValue::from_table(temp), TValue::nil()).unwrap();

    rt.collect_garbage();

    assert!(rt.heap().tables.get(temp.0).is_none());
    assert!(traverse(&rt, holder).is_empty());
}

#[test]
fn test_metatable_keeps_table_alive() {
    let mut rt = runtime();
    let g = rt.globals();
    let obj = rt.new_table(0, 0).unwrap();
    let mt = rt.new_table(0, 0).unwrap();
    rt.set_metatable(obj, Some(mt));
    let name = rt.intern(b"obj").unwrap();
    rt.table_set_str(g, name, TValue::from_table(obj)).unwrap();

    rt.collect_garbage();

    assert!(rt.heap().tables.get(mt.0).is_some());
}

#[test]
fn test_userdata_links() {
    let mut rt = runtime();
    let g = rt.globals();
    let env = rt.new_table(0, 0).unwrap();
    let mt = rt.new_table(0, 0).unwrap();
    let ud = rt.new_userdata(16, Some(env)).unwrap();
    rt.set_userdata_metatable(ud, Some(mt));
    rt.userdata_mut(ud).data[0] = 0xAB;
    let name = rt.intern(b"ud").unwrap();
    rt.table_set_str(g, name, TValue::from_userdata(ud)).unwrap();

    rt.collect_garbage();

    assert_eq!(rt.userdata(ud).data.len(), 16);
    assert_eq!(rt.userdata(ud).data[0], 0xAB);
    assert!(rt.heap().tables.get(env.0).is_some());
    assert!(rt.heap().tables.get(mt.0).is_some());
    assert_eq!(rt.type_name(TValue::from_userdata(ud)), "userdata");
}

#[test]
fn test_proto_constants_reachable_through_closure() {
    let mut rt = runtime();
    let g = rt.globals();
    let k = rt.intern(b"a constant").unwrap();
    let inner = rt.new_proto(Proto::default()).unwrap();
    let mut outer_proto = Proto::default();
    outer_proto.constants = vec![TValue::from_string_id(k)];
    outer_proto.protos = vec![inner];
    let outer = rt.new_proto(outer_proto).unwrap();
    let f = rt.new_closure(outer, Some(g), Vec::new()).unwrap();
    let name = rt.intern(b"main").unwrap();
    rt.table_set_str(g, name, TValue::from_closure(f)).unwrap();

    let stats = rt.collect_garbage();

    assert_eq!(stats.objects_freed, 0);
    assert!(rt.strings().contains(k));
    assert!(rt.heap().protos.get(inner.0).is_some());
}

#[test]
fn test_unreachable_thread_closes_its_upvalues() {
    let mut rt = runtime();
    let g = rt.globals();
    let co = rt.new_thread().unwrap();
    let proto = rt.new_proto(Proto::default()).unwrap();
    let uv = rt.find_or_create_upval(co, 0).unwrap();
    rt.stack_mut(co)[0] = num(42.0);
    let f = rt.new_closure(proto, None, vec![uv]).unwrap();
    let name = rt.intern(b"f").unwrap();
    rt.table_set_str(g, name, TValue::from_closure(f)).unwrap();

    rt.collect_garbage();

    assert!(rt.heap().threads.get(co.0).is_none());
    assert!(!rt.heap().get_upval(uv).is_open());
    assert_num(rt.upval_get(uv), 42.0);
}

#[test]
fn test_stack_values_are_roots() {
    let mut rt = runtime();
    let th = rt.main_thread();
    let t = rt.new_table(0, 0).unwrap();
    rt.stack_mut(th)[0] = TValue::from_table(t);
    rt.collect_garbage();
    assert!(rt.heap().tables.get(t.0).is_some());
    rt.stack_mut(th)[0] = TValue::nil();
    rt.collect_garbage();
    assert!(rt.heap().tables.get(t.0).is_none());
}

#[test]
fn test_close_runtime() {
    let mut rt = runtime();
    let th = rt.main_thread();
    rt.find_or_create_upval(th, 0).unwrap();
    rt.close();
}

#[test]
fn test_next_after_removed_string_key_is_collected() {
    let mut rt = runtime();
    let g = rt.globals();
    let holder = rt.new_table(0, 0).unwrap();
    let name = rt.intern(b"holder").unwrap();
    rt.table_set_str(g, name, TValue::from_table(holder)).unwrap();
    let s = rt.intern(b"transient").unwrap();
    rt.table_set_str(holder, s, num(1.0)).unwrap();
    rt.table_set_str(holder, s, TValue::nil()).unwrap();

    rt.collect_garbage();

    assert!(!rt.strings().contains(s));
    assert_eq!(rt.table_next(holder, TValue::from_string_id(s)), Ok(None));
}
