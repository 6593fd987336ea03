use ptrclamp::prelude::*;
use ptrclamp::util;

/// Kernel `k(global i32* a, i32 n)` running `for i in 0..n { a[i] += 1 }`,
/// the canonical host-buffer walk.
fn loop_kernel() -> Module {
    let mut m = Module::new();

    let i32_ty = m.types.int(32);
    let ptr = util::global_i32_ptr(&mut m);
    let k = util::add_kernel(&mut m, "k", vec![ptr, i32_ty]);

    let a = m.function(k).args[0];
    let n = m.function(k).args[1];
    m.set_name(a, "a");

    let entry = m.function(k).entry().unwrap();
    let header = m.add_block(k);
    let body = m.add_block(k);
    let exit = m.add_block(k);

    let zero = m.const_int(i32_ty, 0);
    let one = m.const_int(i32_ty, 1);

    let mut b = InstBuilder::at_end(&mut m, entry);
    b.br(header);
    drop(b);

    let mut b = InstBuilder::at_end(&mut m, header);
    let i = b.phi(i32_ty, vec![(zero, entry)], Some("i"));
    let done = b.icmp(IntPredicate::Sge, i, n, Some("done"));
    b.cond_br(done, exit, body);
    drop(b);

    let mut b = InstBuilder::at_end(&mut m, body);
    let elem = b.gep(a, vec![i], Some("elem"));
    let x = b.load(elem, Some("x"));
    let bumped = b.bin(BinOp::Add, x, one, Some("bumped"));
    b.store(bumped, elem);
    let next = b.bin(BinOp::Add, i, one, Some("next"));
    b.br(header);
    drop(b);

    // Close the loop.
    if let Some(Inst::Phi { incoming }) = m.inst_mut(i) {
        incoming.push((next, body));
    }

    let mut b = InstBuilder::at_end(&mut m, exit);
    b.ret_void();
    drop(b);

    m
}

fn count_insts(m: &Module, f: FuncId, pred: impl Fn(&Inst) -> bool) -> usize {
    m.function(f)
        .blocks
        .iter()
        .flat_map(|b| &m.block(*b).insts)
        .filter(|v| m.inst(**v).is_some_and(&pred))
        .count()
}

#[test]
fn wrapper_takes_the_host_name_and_a_count_per_pointer() {
    let mut m = loop_kernel();

    Clamper::new(&mut m, Config::strict()).run().unwrap();

    // The host-visible kernel is the wrapper, under the original name.
    let kernels = m.kernel_functions();
    assert_eq!(kernels.len(), 1);

    let wrapper = m.function(kernels[0]);
    assert_eq!(wrapper.name, "k");
    assert_eq!(wrapper.linkage, Linkage::External);

    let params = m.types.fn_params(wrapper.ty).to_vec();
    assert_eq!(params.len(), 3);
    assert!(m.types.is_pointer(params[0]));
    assert_eq!(*m.types.get(params[1]), Type::Int(32));
    assert_eq!(*m.types.get(params[2]), Type::Int(32));

    // The transformed kernel is internal and carries the convention:
    // context, fat pointer, scalar.
    let twin = m.function_by_name("k__clamped").expect("twin survived");
    let twin_fn = m.function(twin);
    assert_eq!(twin_fn.linkage, Linkage::Internal);

    let twin_params = m.types.fn_params(twin_fn.ty).to_vec();
    assert_eq!(twin_params.len(), 3);
    assert!(m.types.is_fat_pointer(twin_params[1]));
}

#[test]
fn buffer_accesses_are_guarded_and_loads_merge_with_zero() {
    let mut m = loop_kernel();

    Clamper::new(&mut m, Config::strict()).run().unwrap();

    let twin = m.function_by_name("k__clamped").unwrap();

    // One guard per memory operation: the load and the store each get a
    // high comparison and a low comparison.
    let high_cmps = count_insts(&m, twin, |i| {
        matches!(
            i,
            Inst::ICmp {
                pred: IntPredicate::Ugt,
                ..
            }
        )
    });
    let low_cmps = count_insts(&m, twin, |i| {
        matches!(
            i,
            Inst::ICmp {
                pred: IntPredicate::Ult,
                ..
            }
        )
    });
    assert_eq!(high_cmps, 2);
    assert_eq!(low_cmps, 2);

    // Each guard adds four blocks to the original four.
    assert_eq!(m.function(twin).blocks.len(), 4 + 4 + 4);

    // The guarded load feeds its users through the zero-merging phi.
    let load = m
        .function(twin)
        .blocks
        .iter()
        .flat_map(|b| &m.block(*b).insts)
        .copied()
        .find(|v| matches!(m.inst(*v), Some(Inst::Load { .. })))
        .expect("the buffer load survived");

    let add = m
        .function(twin)
        .blocks
        .iter()
        .flat_map(|b| &m.block(*b).insts)
        .copied()
        .find(|v| matches!(m.inst(*v), Some(Inst::Bin { op: BinOp::Add, .. })))
        .expect("the increment survived");

    let Some(Inst::Bin { lhs, .. }) = m.inst(add) else {
        unreachable!()
    };
    assert_ne!(*lhs, load);
    assert!(matches!(m.inst(*lhs), Some(Inst::Phi { .. })));
}

#[test]
fn loop_phis_track_the_split_predecessors() {
    let mut m = loop_kernel();

    Clamper::new(&mut m, Config::strict()).run().unwrap();

    let twin = m.function_by_name("k__clamped").unwrap();

    // The induction phi's back edge must come from the block that actually
    // branches to the header now.
    let blocks = m.function(twin).blocks.clone();
    let phi = blocks
        .iter()
        .flat_map(|b| &m.block(*b).insts)
        .copied()
        .find(|v| {
            m.name_of(*v) == Some("i") && matches!(m.inst(*v), Some(Inst::Phi { .. }))
        })
        .expect("induction phi survived");

    let (header, _) = m.find_inst_block(twin, phi).unwrap();
    let Some(Inst::Phi { incoming }) = m.inst(phi) else {
        unreachable!()
    };

    for (_, pred) in incoming {
        let term = *m.block(*pred).insts.last().unwrap();
        let successors = m.inst(term).map(Inst::successors).unwrap_or_default();
        assert!(
            successors.contains(&header),
            "{pred:?} no longer branches to the header"
        );
    }
}

#[test]
fn every_memory_operation_is_guarded_or_statically_safe() {
    let mut m = loop_kernel();

    Clamper::new(&mut m, Config::strict()).run().unwrap();

    for func in m.func_ids() {
        let f = m.function(func);
        if f.is_declaration || m.kernel_functions().contains(&func) {
            // Wrapper instructions are trusted by construction.
            continue;
        }

        for block in f.blocks.clone() {
            for v in m.block(block).insts.clone() {
                let ptr = match m.inst(v) {
                    Some(Inst::Load { ptr }) => *ptr,
                    Some(Inst::Store { ptr, .. }) => *ptr,
                    _ => continue,
                };

                // Trivially safe shapes need no guard: a whole stack slot or
                // a named allocation.
                if matches!(
                    m.value(ptr).kind,
                    ValueKind::Inst(Inst::Alloca { .. }) | ValueKind::Global(_)
                ) {
                    continue;
                }

                // Otherwise the operation must sit alone in a guard body:
                // a block whose terminator is an unconditional branch and
                // which is reached through the two comparisons.
                let (host, at) = m.find_inst_block(func, v).unwrap();
                assert_eq!(at, 0, "guarded operation must lead its body block");

                let insts = &m.block(host).insts;
                assert_eq!(insts.len(), 2);
                assert!(matches!(m.inst(insts[1]), Some(Inst::Br { .. })));
            }
        }
    }
}
