//! Static memory consolidation
//!
//! Fuses every static allocation of an address space into a single aggregate
//! so the bounds of the space become one closed interval. Module-lifetime
//! spaces get one internal global apiece; entry-block stack allocations fuse
//! into a per-function frame aggregate.

use std::collections::HashMap;

use itertools::Itertools;
use tracing::debug;

use crate::error::{PassError, PassResult};
use crate::ir::{AddressSpace, GlobalId, Inst, InstBuilder, Linkage, TypeId, ValueId};

use super::{BoundsInterval, Clamper};

impl Clamper<'_> {
    /// Run the consolidation phase.
    pub(crate) fn consolidate(&mut self) -> PassResult<()> {
        self.consolidate_globals()?;
        self.consolidate_stack_allocations();
        self.relax_mem_intrinsic_alignment();

        Ok(())
    }

    /// A global is consolidated iff its address is observable (named, not
    /// unnamed-address), it is not an external declaration, and its
    /// initializer is a simple constant.
    fn consolidate_globals(&mut self) -> PassResult<()> {
        let mut candidates: Vec<(GlobalId, ValueId)> = Vec::new();

        for id in self.module.global_ids() {
            let g = self.module.global(id);

            if g.is_declaration() || g.unnamed_addr || g.name.is_none() {
                continue;
            }

            let init = g.init.unwrap_or_else(|| unreachable!());
            if !self.module.is_simple_const(init) {
                return Err(PassError::UnsupportedConstruct {
                    function: g.name.clone().unwrap_or_default(),
                    detail: "global initializer references other allocations".into(),
                });
            }

            candidates.push((id, init));
        }

        let groups: HashMap<AddressSpace, Vec<(GlobalId, ValueId)>> = candidates
            .into_iter()
            .map(|(id, init)| (self.module.global(id).space, (id, init)))
            .into_group_map();

        // Field order inside each aggregate is source discovery order; space
        // order is the fixed consolidation order.
        for space in AddressSpace::ALL {
            let Some(members) = groups.get(&space) else {
                continue;
            };

            let fields: Vec<TypeId> = members
                .iter()
                .map(|(id, _)| self.module.global(*id).allocated)
                .collect();
            let agg_ty = self
                .module
                .types
                .strct(Some(&format!("{space}.aggregate")), fields);

            let inits = members.iter().map(|(_, init)| *init).collect();
            let merged = self.module.const_aggregate(agg_ty, inits);

            let agg = self.module.add_global(
                Some(&format!("consolidated.{space}")),
                agg_ty,
                space,
                Some(merged),
                Linkage::Internal,
                false,
            );
            let agg_val = self.module.global(agg).value();

            for (field, (id, _)) in members.iter().enumerate() {
                let old = self.module.global(*id).value();
                let name = self.module.global(*id).name.clone();

                let projection = self.module.const_gep(agg_val, &[0, field as u64]);
                if let Some(name) = name {
                    self.module.set_name(projection, &name);
                }

                self.module.replace_all_uses(old, projection);
                self.module.remove_global(*id);
            }

            // Space bounds: [&aggregate, &aggregate + 1).
            let one_past = self.module.const_gep(agg_val, &[1]);
            let interval = BoundsInterval::direct(agg_val, one_past);

            self.space_aggregates.insert(space, agg);
            self.value_bounds.insert(agg_val, interval);
            self.space_bounds.entry(space).or_default().push(interval);

            debug!("consolidated {} globals into `{space}` space", members.len());
        }

        Ok(())
    }

    /// Fuse every entry-block alloca of each defined function into one frame
    /// aggregate allocated at the entry head, with the original slots turned
    /// into constant-indexed projections of it.
    fn consolidate_stack_allocations(&mut self) {
        for func in self.module.func_ids() {
            let f = self.module.function(func);
            if f.is_declaration || f.is_builtin {
                continue;
            }
            let Some(entry) = f.entry() else {
                continue;
            };

            let allocas: Vec<ValueId> = self
                .module
                .block(entry)
                .insts
                .iter()
                .copied()
                .filter(|v| matches!(self.module.inst(*v), Some(Inst::Alloca { .. })))
                .collect();
            if allocas.is_empty() {
                continue;
            }

            let fields: Vec<TypeId> = allocas
                .iter()
                .map(|v| match self.module.inst(*v) {
                    Some(Inst::Alloca { allocated }) => *allocated,
                    _ => unreachable!(),
                })
                .collect();
            let names: Vec<Option<String>> = allocas
                .iter()
                .map(|v| self.module.name_of(*v).map(str::to_owned))
                .collect();

            let fname = self.module.function(func).name.clone();
            let frame_ty = self
                .module
                .types
                .strct(Some(&format!("{fname}.frame")), fields);

            let mut b = InstBuilder::at_front(self.module, entry);
            let frame = b.alloca(frame_ty, Some("frame"));

            let mut projections = Vec::with_capacity(allocas.len());
            for (field, name) in names.iter().enumerate() {
                projections.push(b.gep_i64(frame, &[0, field as i64], name.as_deref()));
            }
            let one_past = b.gep_i64(frame, &[1], None);
            drop(b);

            for (old, projection) in allocas.iter().zip(&projections) {
                self.module.replace_all_uses(*old, *projection);
                self.module.block_mut(entry).insts.retain(|v| v != old);
            }

            self.frame_aggregates.insert(func, frame);
            self.value_bounds
                .insert(frame, BoundsInterval::direct(frame, one_past));

            debug!(
                "consolidated {} stack allocations in `{fname}`",
                allocas.len()
            );
        }
    }

    /// Consolidation may change the effective alignment of fused slots, so
    /// bulk memory intrinsics fall back to byte alignment. A later optimizer
    /// is expected to tighten this again.
    fn relax_mem_intrinsic_alignment(&mut self) {
        for func in self.bodied_functions() {
            for block in self.module.function(func).blocks.clone() {
                for v in self.module.block(block).insts.clone() {
                    if let Some(Inst::Mem { align, .. }) = self.module.inst_mut(v) {
                        *align = 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Config;
    use crate::ir::{Module, ValueKind};
    use crate::prelude::*;

    use super::*;

    fn consolidated(mut module: Module) -> (Module, usize) {
        let mut pass = Clamper::new(&mut module, Config::strict());
        pass.consolidate().expect("consolidation failed");
        let aggregates = pass.space_aggregates.len();
        drop(pass);

        (module, aggregates)
    }

    #[test]
    fn two_globals_fuse_into_one_aggregate() {
        let mut m = Module::new();

        let i32_ty = m.types.int(32);
        let i64_ty = m.types.int(64);
        let a_init = m.const_int(i32_ty, 1);
        let b_init = m.const_int(i64_ty, 2);

        m.add_global(
            Some("a"),
            i32_ty,
            AddressSpace::Global,
            Some(a_init),
            Linkage::Internal,
            false,
        );
        m.add_global(
            Some("b"),
            i64_ty,
            AddressSpace::Global,
            Some(b_init),
            Linkage::Internal,
            false,
        );

        let (m, aggregates) = consolidated(m);

        // Exactly one aggregate of that space exists and no original remains.
        assert_eq!(aggregates, 1);
        assert_eq!(m.global_ids().len(), 1);

        let agg = m.global(m.global_ids()[0]);
        assert_eq!(agg.space, AddressSpace::Global);
        assert_eq!(agg.linkage, Linkage::Internal);

        match m.types.get(agg.allocated) {
            Type::Struct { fields, .. } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(*m.types.get(fields[0]), Type::Int(32));
                assert_eq!(*m.types.get(fields[1]), Type::Int(64));
            }
            other => panic!("expected a struct aggregate, got {other:?}"),
        }
    }

    #[test]
    fn uses_become_field_projections() {
        let mut m = Module::new();

        let i32_ty = m.types.int(32);
        let init = m.const_int(i32_ty, 0);
        let g = m.add_global(
            Some("g"),
            i32_ty,
            AddressSpace::Global,
            Some(init),
            Linkage::Internal,
            false,
        );
        let g_val = m.global(g).value();

        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::Internal);
        let block = m.add_block(f);

        let mut b = InstBuilder::at_end(&mut m, block);
        let loaded = b.load(g_val, None);
        b.ret_void();
        drop(b);

        let (m, _) = consolidated(m);

        let Some(Inst::Load { ptr }) = m.inst(loaded) else {
            panic!("load disappeared");
        };
        match &m.value(*ptr).kind {
            ValueKind::Const(Const::Gep { indices, .. }) => {
                assert_eq!(*indices, vec![0, 0]);
            }
            other => panic!("expected a projection, got {other:?}"),
        }
    }

    #[test]
    fn complex_initializers_abort() {
        let mut m = Module::new();

        let i32_ty = m.types.int(32);
        let init = m.const_int(i32_ty, 0);
        let a = m.add_global(
            Some("a"),
            i32_ty,
            AddressSpace::Global,
            Some(init),
            Linkage::Internal,
            false,
        );

        // `b` holds the address of `a`: not a simple constant.
        let a_val = m.global(a).value();
        let ptr_ty = m.type_of(a_val);
        m.add_global(
            Some("b"),
            ptr_ty,
            AddressSpace::Global,
            Some(a_val),
            Linkage::Internal,
            false,
        );

        let mut module = m;
        let mut pass = Clamper::new(&mut module, Config::strict());
        let err = pass.consolidate().unwrap_err();

        assert!(matches!(err, PassError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn entry_allocas_fuse_into_a_frame() {
        let mut m = Module::new();

        let i32_ty = m.types.int(32);
        let f32_ty = m.types.float(32);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::Internal);
        let block = m.add_block(f);

        let mut b = InstBuilder::at_end(&mut m, block);
        let x = b.alloca(i32_ty, Some("x"));
        let y = b.alloca(f32_ty, Some("y"));
        let loaded = b.load(x, None);
        b.ret_void();
        drop(b);
        let _ = (y, loaded);

        let (m, _) = consolidated(m);

        let entry = m.function(m.function_by_name("f").unwrap()).entry().unwrap();
        let allocas: Vec<_> = m
            .block(entry)
            .insts
            .iter()
            .filter(|v| matches!(m.inst(**v), Some(Inst::Alloca { .. })))
            .collect();

        // A single frame alloca replaces both slots.
        assert_eq!(allocas.len(), 1);
        match m.inst(*allocas[0]) {
            Some(Inst::Alloca { allocated }) => match m.types.get(*allocated) {
                Type::Struct { fields, .. } => assert_eq!(fields.len(), 2),
                other => panic!("expected a frame struct, got {other:?}"),
            },
            _ => unreachable!(),
        }

        // The load now goes through a projection of the frame.
        let Some(Inst::Load { ptr }) = m.inst(loaded) else {
            panic!("load disappeared");
        };
        assert!(matches!(m.inst(*ptr), Some(Inst::Gep { .. })));
    }

    #[test]
    fn mem_intrinsics_lose_their_alignment() {
        let mut m = Module::new();

        let i8_ty = m.types.int(8);
        let i32_ty = m.types.int(32);
        let arr = m.types.array(i8_ty, 16);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::Internal);
        let block = m.add_block(f);

        let mut b = InstBuilder::at_end(&mut m, block);
        let dst = b.alloca(arr, None);
        let src = b.alloca(arr, None);
        let len = b.const_int(i32_ty, 16);
        let copy = b.mem(MemIntrinsic::Copy, dst, src, len, 8);
        b.ret_void();
        drop(b);

        let (m, _) = consolidated(m);

        match m.inst(copy) {
            Some(Inst::Mem { align, .. }) => assert_eq!(*align, 1),
            _ => panic!("intrinsic disappeared"),
        }
    }
}
