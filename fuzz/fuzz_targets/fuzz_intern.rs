#![no_main]

use ember_core::gc::GcState;
use ember_core::mem::MemoryAccount;
use ember_core::string::StringInterner;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let gc = GcState::new();
    let mut mem = MemoryAccount::new(None);
    let mut strings = StringInterner::new(32, &mut mem).unwrap();

    let mut ids = Vec::new();
    for piece in data.split(|&b| b == 0) {
        let id = strings.intern(piece, &gc, &mut mem).unwrap();
        assert_eq!(strings.get_bytes(id), piece);
        ids.push((id, piece));
    }
    for (id, piece) in ids {
        assert_eq!(strings.intern(piece, &gc, &mut mem).unwrap(), id);
    }
});
