use ptrclamp::prelude::*;

/// `main(argc, argv)` walking argv while also writing into a module-local
/// table with a dynamic index.
fn host_main_module() -> Module {
    let mut m = Module::new();

    let i8_ty = m.types.int(8);
    let i32_ty = m.types.int(32);
    let charp = m.types.ptr(i8_ty, AddressSpace::Private);
    let charpp = m.types.ptr(charp, AddressSpace::Private);

    let table_ty = m.types.array(i32_ty, 16);
    let table_init = m.const_zero(table_ty);
    let table = m.add_global(
        Some("table"),
        table_ty,
        AddressSpace::Local,
        Some(table_init),
        Linkage::Internal,
        false,
    );
    let table_val = m.global(table).value();

    let main_ty = m.types.func(i32_ty, vec![i32_ty, charpp], false);
    let main = m.add_function("main", main_ty, Linkage::External);
    let block = m.add_block(main);
    let argc = m.function(main).args[0];
    let argv = m.function(main).args[1];
    m.set_name(argv, "argv");

    let mut b = InstBuilder::at_end(&mut m, block);

    // argv chain: spill, reload, index, dereference.
    let argv_slot = b.alloca(charpp, Some("argv.addr"));
    b.store(argv, argv_slot);
    let argv_reload = b.load(argv_slot, None);
    let arg1 = b.gep(argv_reload, vec![argc], None);
    let s = b.load(arg1, Some("s"));
    let c = b.load(s, Some("c"));
    let _ = c;

    // Dynamically indexed table write: still checked.
    let zero = b.const_int(i32_ty, 0);
    let entry_ptr = b.gep(table_val, vec![zero, argc], Some("entry"));
    b.store(argc, entry_ptr);

    let rc = b.const_int(i32_ty, 0);
    b.ret(rc);
    drop(b);

    m
}

#[test]
fn the_entry_function_keeps_its_signature() {
    let mut m = host_main_module();
    let main = m.function_by_name("main").unwrap();
    let original_ty = m.function(main).ty;

    Clamper::new(&mut m, Config::permissive()).run().unwrap();

    let main = m.function_by_name("main").expect("main survived");
    let f = m.function(main);

    assert_eq!(f.ty, original_ty);
    assert_eq!(f.linkage, Linkage::External);
    assert!(m.function_by_name("main__clamped").is_none());
}

#[test]
fn argv_chains_skip_checks_but_other_accesses_keep_them() {
    let mut m = host_main_module();

    Clamper::new(&mut m, Config::permissive()).run().unwrap();

    let main = m.function_by_name("main").unwrap();

    // Exactly one guard in main: the table write. Three argv-derived loads
    // run unchecked.
    let count = |pred: IntPredicate| {
        m.function(main)
            .blocks
            .iter()
            .flat_map(|b| &m.block(*b).insts)
            .filter(|v| {
                matches!(m.inst(**v), Some(Inst::ICmp { pred: p, .. }) if *p == pred)
            })
            .count()
    };

    assert_eq!(count(IntPredicate::Ugt), 1);
    assert_eq!(count(IntPredicate::Ult), 1);

    let loads = m
        .function(main)
        .blocks
        .iter()
        .flat_map(|b| &m.block(*b).insts)
        .filter(|v| matches!(m.inst(**v), Some(Inst::Load { .. })))
        .count();
    assert_eq!(loads, 3);
}

#[test]
fn strict_mode_still_rewrites_main() {
    let mut m = Module::new();

    let i32_ty = m.types.int(32);
    let main_ty = m.types.func(i32_ty, vec![i32_ty], false);
    let main = m.add_function("main", main_ty, Linkage::External);
    let block = m.add_block(main);

    let mut b = InstBuilder::at_end(&mut m, block);
    let rc = b.const_int(i32_ty, 0);
    b.ret(rc);
    drop(b);

    Clamper::new(&mut m, Config::strict()).run().unwrap();

    // In strict mode all top-level entry is via kernels; main is rewritten
    // like any other function.
    assert!(m.function_by_name("main__clamped").is_some());
    assert!(m.function_by_name("main").is_none());
}
