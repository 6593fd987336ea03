use ptrclamp::prelude::*;
use ptrclamp::util;

#[test]
fn storing_differently_bounded_pointers_to_one_variable_aborts() {
    let mut m = Module::new();

    let ptr = util::global_i32_ptr(&mut m);
    let k = util::add_kernel(&mut m, "k", vec![ptr, ptr]);
    let entry = m.function(k).entry().unwrap();
    let a = m.function(k).args[0];
    let b_arg = m.function(k).args[1];

    let i32_ty = m.types.int(32);
    let slot_ty = m.types.ptr(i32_ty, AddressSpace::Global);

    let mut b = InstBuilder::at_end(&mut m, entry);
    let slot = b.alloca(slot_ty, Some("current"));
    b.store(a, slot);
    b.store(b_arg, slot);
    b.ret_void();
    drop(b);

    let err = Clamper::new(&mut m, Config::strict()).run().unwrap_err();

    assert!(matches!(err, PassError::AmbiguousBounds { .. }));
    assert!(err
        .to_string()
        .contains("pointers from different ranges to the same variable"));
}

#[test]
fn reloading_a_bounded_pointer_keeps_it_checkable() {
    let mut m = Module::new();

    let ptr = util::global_i32_ptr(&mut m);
    let i32_ty = m.types.int(32);
    let k = util::add_kernel(&mut m, "k", vec![ptr, i32_ty]);
    let entry = m.function(k).entry().unwrap();
    let a = m.function(k).args[0];
    let n = m.function(k).args[1];

    let slot_ty = m.types.ptr(i32_ty, AddressSpace::Global);

    // Park the argument in a local, reload it, and store through the reload:
    // the interval follows the pointer through the slot.
    let mut b = InstBuilder::at_end(&mut m, entry);
    let slot = b.alloca(slot_ty, Some("parked"));
    b.store(a, slot);
    let reloaded = b.load(slot, Some("reloaded"));
    let elem = b.gep(reloaded, vec![n], Some("elem"));
    b.store(n, elem);
    b.ret_void();
    drop(b);

    Clamper::new(&mut m, Config::strict()).run().unwrap();

    // The store through the reloaded pointer got its guard.
    let twin = m.function_by_name("k__clamped").unwrap();
    let high_cmps = m
        .function(twin)
        .blocks
        .iter()
        .flat_map(|blk| &m.block(*blk).insts)
        .filter(|v| {
            matches!(
                m.inst(**v),
                Some(Inst::ICmp {
                    pred: IntPredicate::Ugt,
                    ..
                })
            )
        })
        .count();
    assert_eq!(high_cmps, 1);
}
