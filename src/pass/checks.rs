//! Runtime check insertion
//!
//! Splits the block hosting each unresolved memory operation and splices in
//! the two comparisons. Failed loads produce a zero of the loaded type via a
//! merge phi; failed stores are simply skipped. Emitted block order is
//! start, check.low, body, fail, end.

use tracing::warn;

use crate::context::Mode;
use crate::error::{PassError, PassResult};
use crate::ir::{BlockId, CastOp, FuncId, Inst, InstBuilder, IntPredicate, ValueId};

use super::{BoundsInterval, Clamper};

impl Clamper<'_> {
    /// Run the check-injection phase.
    pub(crate) fn inject_checks(&mut self) -> PassResult<()> {
        for func in self.checkable_functions() {
            let mut ops = Vec::new();

            for block in self.module.function(func).blocks.clone() {
                for v in self.module.block(block).insts.clone() {
                    if matches!(
                        self.module.inst(v),
                        Some(Inst::Load { .. } | Inst::Store { .. } | Inst::Mem { .. })
                    ) {
                        ops.push(v);
                    }
                }
            }

            for op in ops {
                self.guard_operation(func, op)?;
            }
        }

        Ok(())
    }

    fn pointer_operands(&self, op: ValueId) -> Vec<ValueId> {
        let mut operands = Vec::new();

        match self.module.inst(op) {
            Some(Inst::Load { ptr }) => operands.push(*ptr),
            Some(Inst::Store { ptr, .. }) => operands.push(*ptr),
            Some(Inst::Mem { dst, src, .. }) => {
                operands.push(*dst);
                if self.module.types.is_pointer(self.module.type_of(*src)) {
                    operands.push(*src);
                }
            }
            _ => {}
        }

        operands.dedup();
        operands
    }

    fn guard_operation(&mut self, func: FuncId, op: ValueId) -> PassResult<()> {
        for ptr in self.pointer_operands(op) {
            if self.safe_exceptions.contains(&ptr) || self.is_statically_safe(ptr) {
                continue;
            }

            let Some(interval) = self.resolve_bounds(ptr)? else {
                let space = self.module.types.space(self.module.type_of(ptr));
                let candidates = space
                    .and_then(|s| self.space_bounds.get(&s))
                    .map_or(0, Vec::len);

                if candidates > 1 {
                    return Err(PassError::MultiIntervalCheck {
                        function: self.function_name(func),
                    });
                }

                match self.config.mode {
                    Mode::Strict => {
                        return Err(PassError::MissingBounds {
                            function: self.function_name(func),
                            value: self.module.describe(ptr),
                        });
                    }
                    Mode::Permissive => {
                        warn!(
                            "leaving `{}` unchecked in `{}`: no bounds known",
                            self.module.describe(ptr),
                            self.function_name(func)
                        );
                        continue;
                    }
                }
            };

            self.emit_guard(func, op, ptr, interval);
        }

        Ok(())
    }

    /// Splice the compare-and-branch guard around `op`, leaving `op` alone in
    /// its body block so a later operand guard can wrap it again.
    fn emit_guard(&mut self, func: FuncId, op: ValueId, ptr: ValueId, bounds: BoundsInterval) {
        let Some((start, at)) = self.module.find_inst_block(func, op) else {
            debug_assert!(false, "guarded operation must live in a block");
            return;
        };

        let check_low = self.module.alloc_block();
        let body = self.module.alloc_block();
        let fail = self.module.alloc_block();
        let end = self.module.alloc_block();

        let mut tail = self.module.block_mut(start).insts.split_off(at);
        debug_assert_eq!(tail.first(), Some(&op));

        self.module.block_mut(end).insts = tail.split_off(1);
        self.module.block_mut(body).insts = tail;
        self.module
            .insert_blocks_after(func, start, [check_low, body, fail, end]);

        // The original terminator moved into `end`; phis downstream still
        // record `start` as their predecessor.
        self.fixup_phi_predecessors(start, end);

        let ptr_ty = self.module.type_of(ptr);

        // start: resolve indirect slots, then the high comparison.
        let mut b = InstBuilder::at_end(self.module, start);
        let (low, high) = if bounds.indirect {
            (
                b.load(bounds.low, Some("clamp.min")),
                b.load(bounds.high, Some("clamp.max")),
            )
        } else {
            (bounds.low, bounds.high)
        };

        // `high` is the first invalid address: the last valid one is
        // element -1 of it, viewed as the operand's pointer type.
        let high_cast = b.cast(CastOp::Bitcast, high, ptr_ty, None);
        let last_valid = b.gep_i64(high_cast, &[-1], Some("clamp.last"));
        let above = b.icmp(IntPredicate::Ugt, ptr, last_valid, Some("clamp.above"));
        b.cond_br(above, fail, check_low);
        drop(b);

        // check.low: the first valid address is element 0 of `low`.
        let mut b = InstBuilder::at_end(self.module, check_low);
        let low_cast = b.cast(CastOp::Bitcast, low, ptr_ty, None);
        let first_valid = b.gep_i64(low_cast, &[0], Some("clamp.first"));
        let below = b.icmp(IntPredicate::Ult, ptr, first_valid, Some("clamp.below"));
        b.cond_br(below, fail, body);
        drop(b);

        InstBuilder::at_end(self.module, body).br(end);
        InstBuilder::at_end(self.module, fail).br(end);

        // Failed loads yield a zero of the loaded type; the merge phi takes
        // over every downstream use.
        if matches!(self.module.inst(op), Some(Inst::Load { .. })) {
            let ty = self.module.type_of(op);
            let zero = self.module.const_zero(ty);

            let mut b = InstBuilder::at_front(self.module, end);
            let merge = b.phi(ty, vec![(op, body), (zero, fail)], Some("clamp.merge"));
            drop(b);

            self.module.replace_all_uses(op, merge);
            if let Some(Inst::Phi { incoming }) = self.module.inst_mut(merge) {
                incoming[0].0 = op;
            }
        }
    }

    /// Successor phis recording `old_pred` as the incoming block now receive
    /// control from `new_pred`.
    fn fixup_phi_predecessors(&mut self, old_pred: BlockId, new_pred: BlockId) {
        let Some(term) = self.module.block(new_pred).insts.last().copied() else {
            return;
        };
        let successors = self
            .module
            .inst(term)
            .map(Inst::successors)
            .unwrap_or_default();

        for succ in successors {
            for v in self.module.block(succ).insts.clone() {
                if let Some(inst) = self.module.inst_mut(v) {
                    inst.replace_incoming_block(old_pred, new_pred);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::consts::KERNELS_METADATA;
    use crate::context::Config;
    use crate::ir::Module;
    use crate::prelude::*;

    /// Kernel `k(global i32* a, i32 i)` performing `x = a[i]; a[i] = x`.
    fn guarded_kernel() -> (Module, FuncId, ValueId, ValueId) {
        let mut m = Module::new();

        let i32_ty = m.types.int(32);
        let ptr = m.types.ptr(i32_ty, AddressSpace::Global);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![ptr, i32_ty], false);
        let k = m.add_function("k", fn_ty, Linkage::External);
        let block = m.add_block(k);
        let a = m.function(k).args[0];
        let i = m.function(k).args[1];

        let mut b = InstBuilder::at_end(&mut m, block);
        let elem = b.gep(a, vec![i], Some("elem"));
        let x = b.load(elem, Some("x"));
        let st = b.store(x, elem);
        b.ret_void();
        drop(b);

        let k_val = m.function(k).value();
        m.add_metadata_entry(KERNELS_METADATA, vec![k_val]);

        (m, k, x, st)
    }

    fn run_through_checks(m: &mut Module) -> (Clamper<'_>, FuncId) {
        let k = m.kernel_functions()[0];
        let mut pass = Clamper::new(m, Config::strict());
        pass.consolidate().unwrap();
        pass.rewrite_signatures().unwrap();
        pass.move_bodies();
        pass.build_kernel_wrappers().unwrap();
        pass.analyze_bounds().unwrap();
        pass.prove_safety();
        pass.inject_checks().unwrap();

        (pass, k)
    }

    #[test]
    fn guards_split_blocks_in_textual_order() {
        let (mut m, ..) = guarded_kernel();
        let (pass, k) = run_through_checks(&mut m);

        let twin = pass.fn_map[&k];
        let blocks = pass.module.function(twin).blocks.clone();

        // One block became start/check.low/body/fail/end twice over (load
        // and store are guarded independently).
        assert_eq!(blocks.len(), 9);

        // start ends in the high comparison.
        let start_insts = pass.module.block(blocks[0]).insts.clone();
        let high_cmp = start_insts[start_insts.len() - 2];
        assert!(matches!(
            pass.module.inst(high_cmp),
            Some(Inst::ICmp {
                pred: IntPredicate::Ugt,
                ..
            })
        ));
        let Some(Inst::CondBr {
            then_dest,
            else_dest,
            ..
        }) = pass.module.inst(*start_insts.last().unwrap())
        else {
            panic!("start must end in a conditional branch");
        };

        // true edge goes to fail, false edge to check.low.
        assert_eq!(*else_dest, blocks[1]);
        assert_eq!(*then_dest, blocks[3]);

        // check.low ends in the low comparison branching fail/body.
        let low_insts = pass.module.block(blocks[1]).insts.clone();
        let low_cmp = low_insts[low_insts.len() - 2];
        assert!(matches!(
            pass.module.inst(low_cmp),
            Some(Inst::ICmp {
                pred: IntPredicate::Ult,
                ..
            })
        ));
    }

    #[test]
    fn guarded_loads_merge_with_zero() {
        let (mut m, _, x, _) = guarded_kernel();
        let (pass, k) = run_through_checks(&mut m);

        let twin = pass.fn_map[&k];
        let blocks = pass.module.function(twin).blocks.clone();

        // The load sits alone (with its branch) in its body block.
        let body = blocks[2];
        let body_insts = pass.module.block(body).insts.clone();
        assert_eq!(body_insts[0], x);
        assert!(matches!(
            pass.module.inst(body_insts[1]),
            Some(Inst::Br { .. })
        ));

        // The merge phi takes the loaded value on the body edge and zero on
        // the fail edge, and the store now consumes the phi.
        let end = blocks[4];
        let merge = pass.module.block(end).insts[0];
        let Some(Inst::Phi { incoming }) = pass.module.inst(merge) else {
            panic!("expected the merge phi");
        };
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[0], (x, blocks[2]));
        assert!(matches!(
            pass.module.value(incoming[1].0).kind,
            ValueKind::Const(Const::Zero)
        ));
        assert_eq!(incoming[1].1, blocks[3]);

        let store = pass
            .module
            .block(end)
            .insts
            .iter()
            .chain(blocks[5..].iter().flat_map(|b| &pass.module.block(*b).insts))
            .copied()
            .find(|v| matches!(pass.module.inst(*v), Some(Inst::Store { .. })))
            .expect("store survived");
        let Some(Inst::Store { value, .. }) = pass.module.inst(store) else {
            unreachable!()
        };
        assert_eq!(*value, merge);
    }

    #[test]
    fn multiple_candidate_intervals_abort() {
        let mut m = Module::new();

        let i32_ty = m.types.int(32);
        let ptr = m.types.ptr(i32_ty, AddressSpace::Global);

        // A kernel with two buffers registers two dynamic intervals for the
        // global space.
        let k = crate::util::add_kernel(&mut m, "k", vec![ptr, ptr]);
        let entry = m.function(k).entry().unwrap();
        let mut b = InstBuilder::at_end(&mut m, entry);
        b.ret_void();
        drop(b);

        // A helper whose store target cannot be tied to either interval.
        let ptr_ptr = m.types.ptr(ptr, AddressSpace::Global);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![ptr_ptr], false);
        let f = m.add_function("f", fn_ty, Linkage::Internal);
        let block = m.add_block(f);
        let pp = m.function(f).args[0];

        let mut b = InstBuilder::at_end(&mut m, block);
        let loose = b.load(pp, None);
        let zero = b.const_int(i32_ty, 0);
        b.store(zero, loose);
        b.ret_void();
        drop(b);

        let mut pass = Clamper::new(&mut m, Config::strict());
        pass.rewrite_signatures().unwrap();
        pass.move_bodies();
        pass.build_kernel_wrappers().unwrap();
        pass.analyze_bounds().unwrap();
        pass.prove_safety();
        let err = pass.inject_checks().unwrap_err();

        assert!(matches!(err, PassError::MultiIntervalCheck { .. }));
    }

    #[test]
    fn missing_bounds_abort_in_strict_mode() {
        let mut m = Module::new();

        let i32_ty = m.types.int(32);
        let ptr = m.types.ptr(i32_ty, AddressSpace::Global);
        let ptr_ptr = m.types.ptr(ptr, AddressSpace::Local);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![ptr_ptr], false);
        let f = m.add_function("f", fn_ty, Linkage::Internal);
        let block = m.add_block(f);
        let pp = m.function(f).args[0];

        // The loaded pointer has no derivable interval and its space has no
        // registered bounds at all.
        let mut b = InstBuilder::at_end(&mut m, block);
        let loose = b.load(pp, None);
        let zero = b.const_int(i32_ty, 0);
        b.store(zero, loose);
        b.ret_void();
        drop(b);

        let mut pass = Clamper::new(&mut m, Config::strict());
        pass.rewrite_signatures().unwrap();
        pass.move_bodies();
        pass.build_kernel_wrappers().unwrap();
        pass.analyze_bounds().unwrap();
        pass.prove_safety();
        let err = pass.inject_checks().unwrap_err();

        assert!(matches!(err, PassError::MissingBounds { .. }));
    }
}
