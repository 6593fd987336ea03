//! Call-site rewriting to the safe-pointer convention
//!
//! Calls to rewritten functions move to the twins. Pointer operands forward
//! an existing fat pointer when one is visibly at hand and are otherwise
//! materialized from the operand's interval through a stack slot.

use tracing::{debug, warn};

use crate::consts::FAT_FIELD_CURRENT;
use crate::context::Mode;
use crate::error::{PassError, PassResult};
use crate::ir::{CastOp, FuncId, Inst, InstBuilder, ParamAttrs, ValueId, ValueKind};

use super::{Clamper, ParamSource};

impl Clamper<'_> {
    /// Run the call-rewriting phase.
    pub(crate) fn rewrite_calls(&mut self) -> PassResult<()> {
        let mut rewritten = 0usize;

        for func in self.bodied_functions() {
            for block in self.module.function(func).blocks.clone() {
                for v in self.module.block(block).insts.clone() {
                    let Some(Inst::Call { callee, .. }) = self.module.inst(v) else {
                        continue;
                    };
                    let ValueKind::Func(old_callee) = self.module.value(*callee).kind else {
                        continue;
                    };
                    let Some(&twin) = self.fn_map.get(&old_callee) else {
                        continue;
                    };

                    let plan = self.param_plans[&old_callee].clone();
                    self.retarget_call(func, v, &plan, twin)?;
                    rewritten += 1;
                }
            }
        }

        debug!("rewrote {rewritten} call sites");

        Ok(())
    }

    /// Point one call at `new_callee`, converting arguments per `plan`.
    /// Shared with the builtin retargeter.
    pub(crate) fn retarget_call(
        &mut self,
        func: FuncId,
        call: ValueId,
        plan: &[ParamSource],
        new_callee: FuncId,
    ) -> PassResult<()> {
        let Some(Inst::Call {
            args, arg_attrs, ..
        }) = self.module.inst(call)
        else {
            debug_assert!(false, "retarget requires a call instruction");
            return Ok(());
        };
        let old_args = args.clone();
        let old_attrs = arg_attrs.clone();

        // The program-allocations context threads caller to callee; roots
        // (wrappers use their own constant, preserved entries have none)
        // pass zero.
        let context_arg = if self.twins.contains(&func) {
            self.module.function(func).args[0]
        } else {
            let u32_ty = self.module.types.int(32);
            self.module.const_int(u32_ty, 0)
        };

        let mut new_args = vec![context_arg];
        let mut new_attrs = vec![ParamAttrs::empty()];

        for src in plan {
            match *src {
                ParamSource::Forward(i) => {
                    new_args.push(old_args[i]);
                    new_attrs.push(old_attrs[i] & !ParamAttrs::NO_CAPTURE);
                }
                ParamSource::Fat(i) => {
                    let fat = self.fat_operand(func, call, old_args[i])?;
                    new_args.push(fat);
                    new_attrs.push(old_attrs[i] & !ParamAttrs::NO_CAPTURE & !ParamAttrs::BY_VAL);
                }
                ParamSource::FatTriple(i) => {
                    // The site passes the triple spelled out; rebuild the
                    // aggregate from it directly.
                    let fat = self.materialize_fat(
                        func,
                        call,
                        old_args[i],
                        old_args[i + 1],
                        old_args[i + 2],
                        false,
                    );
                    new_args.push(fat);
                    new_attrs.push(ParamAttrs::empty());
                }
            }
        }

        let twin_val = self.module.function(new_callee).value();
        let Some(Inst::Call {
            callee,
            args,
            arg_attrs,
        }) = self.module.inst_mut(call)
        else {
            unreachable!()
        };

        *callee = twin_val;
        *args = new_args;
        *arg_attrs = new_attrs;

        Ok(())
    }

    /// Obtain a fat pointer for a raw pointer operand.
    fn fat_operand(
        &mut self,
        func: FuncId,
        call: ValueId,
        operand: ValueId,
    ) -> PassResult<ValueId> {
        // Already a fat pointer: forward it whole.
        if self.module.types.is_fat_pointer(self.module.type_of(operand)) {
            return Ok(operand);
        }

        // The current-field extraction of a fat pointer: forward the source.
        if let ValueKind::Inst(Inst::ExtractValue { agg, indices }) =
            &self.module.value(operand).kind
        {
            let agg = *agg;
            if indices.len() == 1
                && indices[0] == FAT_FIELD_CURRENT
                && self.module.types.is_fat_pointer(self.module.type_of(agg))
            {
                return Ok(agg);
            }
        }

        match self.resolve_bounds(operand)? {
            Some(bounds) => Ok(self.materialize_fat(
                func,
                call,
                operand,
                bounds.low,
                bounds.high,
                bounds.indirect,
            )),
            None if self.config.mode == Mode::Strict => Err(PassError::MissingBounds {
                function: self.function_name(func),
                value: self.module.describe(operand),
            }),
            None => {
                warn!(
                    "no bounds for call operand `{}` in `{}`; passing a degenerate range",
                    self.module.describe(operand),
                    self.function_name(func)
                );

                Ok(self.materialize_fat(func, call, operand, operand, operand, false))
            }
        }
    }

    /// Build `{current, low, high}` through a stack slot right before the
    /// call; indirect bounds are loaded at the site first.
    fn materialize_fat(
        &mut self,
        func: FuncId,
        call: ValueId,
        current: ValueId,
        low: ValueId,
        high: ValueId,
        indirect: bool,
    ) -> ValueId {
        let ptr_ty = self.module.type_of(current);
        let fat_ty = self.module.types.fat_pointer(ptr_ty);

        let (block, at) = self
            .module
            .find_inst_block(func, call)
            .unwrap_or_else(|| unreachable!("call site must live in a block"));

        let mut b = InstBuilder::at(self.module, block, at);

        let (mut low, mut high) = if indirect {
            (b.load(low, None), b.load(high, None))
        } else {
            (low, high)
        };

        // Interval endpoints may be typed against a different allocation
        // shape; view them as the operand's type.
        if b.type_of(low) != ptr_ty {
            low = b.cast(CastOp::Bitcast, low, ptr_ty, None);
        }
        if b.type_of(high) != ptr_ty {
            high = b.cast(CastOp::Bitcast, high, ptr_ty, None);
        }

        let slot = b.alloca(fat_ty, Some("fat"));
        let f_cur = b.gep_i64(slot, &[0, 0], None);
        b.store(current, f_cur);
        let f_min = b.gep_i64(slot, &[0, 1], None);
        b.store(low, f_min);
        let f_max = b.gep_i64(slot, &[0, 2], None);
        b.store(high, f_max);
        let fat = b.load(slot, None);
        drop(b);

        fat
    }
}
