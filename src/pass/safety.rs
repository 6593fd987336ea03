//! Static safety proofs
//!
//! Populates the safe-exceptions set: pointer operands that provably cannot
//! leave their allocation and therefore need no runtime check. Two shapes
//! qualify: in-bounds constant-indexed projections of named allocations, and
//! values reached along trusted wrapper-introduced chains (plus, in
//! permissive mode, the entry function's host-argument chains).

use tracing::debug;

use crate::consts::ARGV_NAME_PREFIX;
use crate::ir::{Const, FuncId, Inst, ValueId, ValueKind};

use super::Clamper;

impl Clamper<'_> {
    /// Run the safety-proving phase.
    pub(crate) fn prove_safety(&mut self) {
        let mut derived = self.trusted.clone();

        if self.config.mode.is_permissive() {
            for func in self.bodied_functions() {
                self.collect_entry_roots(func, &mut derived);
            }
        }

        // Forward closure: projections, casts and loads of an exempt pointer
        // stay exempt. Loads are included on purpose; everything reached
        // from a host argument chain is outside kernel-visible memory.
        loop {
            let mut changed = false;

            for func in self.bodied_functions() {
                for block in self.module.function(func).blocks.clone() {
                    for v in self.module.block(block).insts.clone() {
                        let source = match self.module.inst(v) {
                            Some(Inst::Gep { base, .. }) => *base,
                            Some(Inst::Cast { value, .. }) => *value,
                            Some(Inst::Load { ptr }) => *ptr,
                            _ => continue,
                        };

                        if derived.contains(&source) && derived.insert(v) {
                            changed = true;
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }

        debug!("proved {} values exempt from checking", derived.len());

        self.safe_exceptions = derived;
    }

    /// Host-argument roots of a preserved entry function: its pointer
    /// arguments, plus stack slots recognized by the `argv` name fallback.
    fn collect_entry_roots(&self, func: FuncId, roots: &mut std::collections::HashSet<ValueId>) {
        let f = self.module.function(func);
        if !self.config.is_entry(&f.name) {
            return;
        }

        for arg in &f.args {
            if self.module.types.is_pointer(self.module.type_of(*arg)) {
                roots.insert(*arg);
            }
        }

        // Name fallback: the host-argument spill slot keeps its `argv` name
        // through consolidation, whether it is still an alloca or already a
        // frame projection.
        for block in &f.blocks {
            for v in &self.module.block(*block).insts {
                let named_argv = self
                    .module
                    .name_of(*v)
                    .is_some_and(|n| n.starts_with(ARGV_NAME_PREFIX));

                if named_argv
                    && matches!(
                        self.module.inst(*v),
                        Some(Inst::Alloca { .. } | Inst::Gep { .. })
                    )
                {
                    roots.insert(*v);
                }
            }
        }
    }

    /// Return `true` when `v` is a provably in-bounds address: a defined
    /// named allocation, or a constant-indexed projection of one that stays
    /// inside the allocated type.
    pub(crate) fn is_statically_safe(&self, v: ValueId) -> bool {
        match &self.module.value(v).kind {
            ValueKind::Global(g) => !self.module.global(*g).is_declaration(),
            ValueKind::Inst(Inst::Alloca { .. }) => true,
            ValueKind::Const(Const::Gep { base, indices }) => {
                self.is_statically_safe(*base) && self.const_path_in_bounds(*base, indices)
            }
            ValueKind::Inst(Inst::Gep { base, indices }) => {
                if !self.is_statically_safe(*base) {
                    return false;
                }

                let path: Option<Vec<u64>> = indices
                    .iter()
                    .map(|i| {
                        self.module
                            .value(*i)
                            .const_int()
                            .and_then(|c| u64::try_from(c).ok())
                    })
                    .collect();

                path.is_some_and(|path| self.const_path_in_bounds(*base, &path))
            }
            _ => false,
        }
    }

    /// Walk a constant projection path, proving every step lands inside the
    /// pointee type. The leading index must be zero: stepping the pointer
    /// itself leaves the allocation.
    fn const_path_in_bounds(&self, base: ValueId, indices: &[u64]) -> bool {
        let Some((first, rest)) = indices.split_first() else {
            return true;
        };
        if *first != 0 {
            return false;
        }

        let base_ty = self.module.type_of(base);
        let Some(mut cur) = self.module.types.pointee(base_ty) else {
            return false;
        };

        for index in rest {
            match self.module.types.index_into(cur, *index) {
                Some(next) => cur = next,
                None => return false,
            }
        }

        true
    }
}
