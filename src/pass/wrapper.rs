//! Kernel entry synthesis
//!
//! For each kernel in the module metadata, builds the host-visible wrapper
//! taking `(pointer, element-count)` pairs, materializes fat pointers,
//! records the dynamic per-argument bounds slots and tail-calls the
//! transformed internal kernel.

use tracing::debug;

use crate::consts::KERNELS_METADATA;
use crate::error::{PassError, PassResult};
use crate::ir::{
    AddressSpace, FuncId, InstBuilder, Linkage, ParamAttrs, Type, TypeId, ValueId,
};

use super::{BoundsInterval, Clamper};

struct PtrPlumbing {
    min: ValueId,
    max: ValueId,
    fat_ty: TypeId,
}

impl Clamper<'_> {
    /// Run the kernel-wrapping phase.
    pub(crate) fn build_kernel_wrappers(&mut self) -> PassResult<()> {
        for old in self.module.kernel_functions() {
            // Kernels that were not rewritten (preserved entries) keep their
            // original host surface.
            let Some(&twin) = self.fn_map.get(&old) else {
                continue;
            };

            self.build_wrapper(old, twin)?;
        }

        Ok(())
    }

    fn build_wrapper(&mut self, old: FuncId, twin: FuncId) -> PassResult<()> {
        let kname = self.function_name(old);
        let kty = self.module.function(old).ty;

        let ret = self
            .module
            .types
            .fn_ret(kty)
            .unwrap_or_else(|| unreachable!());
        if !matches!(self.module.types.get(ret), Type::Void) {
            return Err(PassError::UnsupportedConstruct {
                function: kname,
                detail: "kernel with non-void return type".into(),
            });
        }

        let params = self.module.types.fn_params(kty).to_vec();
        let u32_ty = self.module.types.int(32);
        let void = self.module.types.void();

        // Wrapper signature: each original parameter, with an element count
        // immediately after every pointer.
        let mut wparams = Vec::new();
        let mut slots: Vec<(usize, Option<usize>)> = Vec::with_capacity(params.len());

        for p in &params {
            let pi = wparams.len();
            wparams.push(*p);

            if self.module.types.is_pointer(*p) {
                wparams.push(u32_ty);
                slots.push((pi, Some(pi + 1)));
            } else {
                slots.push((pi, None));
            }
        }

        let wty = self.module.types.func(void, wparams, false);
        let wrapper =
            self.module
                .add_function(&format!("{kname}__wrapper"), wty, Linkage::External);
        let block = self.module.add_block(wrapper);
        let wargs = self.module.function(wrapper).args.clone();

        // Dynamic per-argument bounds live in module-level private slots,
        // registered as indirect intervals of the pointee's address space.
        let mut plumbing: Vec<Option<PtrPlumbing>> = Vec::with_capacity(params.len());

        for (index, p) in params.iter().enumerate() {
            let Some(space) = self.module.types.space(*p) else {
                plumbing.push(None);
                continue;
            };

            let min_init = self.module.const_null(*p);
            let min = self.module.add_global(
                Some(&format!("{kname}.arg{index}.min")),
                *p,
                AddressSpace::Private,
                Some(min_init),
                Linkage::Internal,
                false,
            );
            let max_init = self.module.const_null(*p);
            let max = self.module.add_global(
                Some(&format!("{kname}.arg{index}.max")),
                *p,
                AddressSpace::Private,
                Some(max_init),
                Linkage::Internal,
                false,
            );

            let min_val = self.module.global(min).value();
            let max_val = self.module.global(max).value();

            self.space_bounds
                .entry(space)
                .or_default()
                .push(BoundsInterval::indirect(min_val, max_val));

            plumbing.push(Some(PtrPlumbing {
                min: min_val,
                max: max_val,
                fat_ty: self.module.types.fat_pointer(*p),
            }));
        }

        let zero = self.module.const_int(u32_ty, 0);
        let twin_val = self.module.function(twin).value();

        let mut call_args = vec![zero];
        let mut emitted = Vec::new();

        let mut b = InstBuilder::at_end(self.module, block);
        for (index, (pi, count)) in slots.iter().enumerate() {
            let warg = wargs[*pi];

            let (Some(ci), Some(pl)) = (count, &plumbing[index]) else {
                call_args.push(warg);
                continue;
            };

            let n = wargs[*ci];

            // high = p + n is the first invalid address.
            let high = b.gep(warg, vec![n], Some("high"));
            let s_min = b.store(warg, pl.min);
            let s_max = b.store(high, pl.max);

            // The fat pointer {p, p, high} goes through a stack slot and is
            // reloaded as a value.
            let slot = b.alloca(pl.fat_ty, Some("fat"));
            let f_cur = b.gep_i64(slot, &[0, 0], None);
            let s_cur = b.store(warg, f_cur);
            let f_min = b.gep_i64(slot, &[0, 1], None);
            let s_lo = b.store(warg, f_min);
            let f_max = b.gep_i64(slot, &[0, 2], None);
            let s_hi = b.store(high, f_max);
            let fat = b.load(slot, None);

            emitted.extend([
                high, s_min, s_max, slot, f_cur, s_cur, f_min, s_lo, f_max, s_hi, fat,
            ]);
            call_args.push(fat);
        }

        let attrs = vec![ParamAttrs::empty(); call_args.len()];
        let call = b.call(twin_val, call_args, attrs, None);
        b.ret_void();
        drop(b);

        emitted.push(call);
        self.trusted.extend(emitted);

        // The host-visible kernel is now the wrapper.
        let old_val = self.module.function(old).value();
        let wrapper_val = self.module.function(wrapper).value();
        if let Some(node) = self.module.named_metadata_mut(KERNELS_METADATA) {
            for entry in &mut node.entries {
                if entry.first() == Some(&old_val) {
                    entry[0] = wrapper_val;
                }
            }
        }

        // Internal linkage lets the optimizer inline the twin into the
        // wrapper.
        self.module.function_mut(twin).linkage = Linkage::Internal;
        self.wrappers.push((wrapper, kname.clone()));

        debug!("synthesized wrapper for kernel `{kname}`");

        Ok(())
    }
}
