//! Signature lowering for the safe-pointer calling convention
//!
//! Every defined, non-builtin function gets a twin whose pointer parameters
//! are fat-pointer aggregates, prefixed with the program-allocations context
//! parameter. The twin starts empty; bodies follow in the next phase.

use tracing::debug;

use crate::consts::SAFE_DISCRIMINATOR;
use crate::error::{PassError, PassResult};
use crate::ir::{FuncId, Inst, Linkage, ParamAttrs, Type, TypeId};

use super::Clamper;

/// How one twin parameter is produced from the original parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamSource {
    /// Non-pointer parameter `i`, preserved.
    Forward(usize),
    /// Pointer parameter `i`, lifted to a fat pointer.
    Fat(usize),
    /// Three sequential same-type pointer parameters starting at `i`,
    /// folded back into the single fat pointer they stand in for.
    FatTriple(usize),
}

impl Clamper<'_> {
    /// Run the signature-rewriting phase.
    pub(crate) fn rewrite_signatures(&mut self) -> PassResult<()> {
        for func in self.module.func_ids() {
            let f = self.module.function(func);
            if f.is_declaration || f.is_builtin {
                continue;
            }

            // The designated entry function keeps its original shape in
            // permissive mode; in strict mode all top-level entry is via
            // kernels.
            if self.config.mode.is_permissive() && self.config.is_entry(&f.name) {
                continue;
            }

            self.validate_function(func)?;

            let plan = self.plan_parameters(func);
            self.build_twin(func, plan);
        }

        Ok(())
    }

    /// Reject constructs the calling convention cannot carry.
    fn validate_function(&self, func: FuncId) -> PassResult<()> {
        let f = self.module.function(func);
        let name = f.name.clone();

        if self.module.types.fn_varargs(f.ty) {
            return Err(PassError::UnsupportedConstruct {
                function: name,
                detail: "variadic signature".into(),
            });
        }

        let ret = self.module.types.fn_ret(f.ty).unwrap_or_else(|| unreachable!());
        if matches!(
            self.module.types.get(ret),
            Type::Pointer { .. } | Type::Array { .. }
        ) {
            return Err(PassError::UnsupportedConstruct {
                function: name,
                detail: "pointer or array return type".into(),
            });
        }

        for block in &f.blocks {
            for v in &self.module.block(*block).insts {
                if let Some(Inst::Unsupported(u)) = self.module.inst(*v) {
                    return Err(PassError::UnsupportedConstruct {
                        function: name,
                        detail: u.describe().into(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Map original parameters to twin parameters. Manually written safe
    /// replacements spell one fat pointer as three sequential same-type
    /// pointers; fold those back.
    pub(crate) fn plan_parameters(&self, func: FuncId) -> Vec<ParamSource> {
        let f = self.module.function(func);
        let params = self.module.types.fn_params(f.ty).to_vec();
        let folding = f.name.contains(SAFE_DISCRIMINATOR);

        let mut plan = Vec::with_capacity(params.len());
        let mut i = 0;

        while i < params.len() {
            let ty = params[i];

            if !self.module.types.is_pointer(ty) {
                plan.push(ParamSource::Forward(i));
                i += 1;
            } else if folding && i + 2 < params.len() && params[i + 1] == ty && params[i + 2] == ty
            {
                plan.push(ParamSource::FatTriple(i));
                i += 3;
            } else {
                plan.push(ParamSource::Fat(i));
                i += 1;
            }
        }

        plan
    }

    /// Twin signature type: the leading `u32` context parameter followed by
    /// the planned parameters.
    pub(crate) fn fat_signature(&mut self, func: FuncId, plan: &[ParamSource]) -> TypeId {
        let f = self.module.function(func);
        let ret = self
            .module
            .types
            .fn_ret(f.ty)
            .unwrap_or_else(|| unreachable!());
        let params = self.module.types.fn_params(f.ty).to_vec();

        let mut new_params = vec![self.module.types.int(32)];
        for src in plan {
            match src {
                ParamSource::Forward(i) => new_params.push(params[*i]),
                ParamSource::Fat(i) | ParamSource::FatTriple(i) => {
                    new_params.push(self.module.types.fat_pointer(params[*i]));
                }
            }
        }

        self.module.types.func(ret, new_params, false)
    }

    fn build_twin(&mut self, old: FuncId, plan: Vec<ParamSource>) {
        let name = self.module.function(old).name.clone();
        let old_attrs = self.module.function(old).param_attrs.clone();
        let old_args = self.module.function(old).args.clone();

        let twin_ty = self.fat_signature(old, &plan);

        // Safe replacements keep their exact symbol (the retargeter finds
        // them by it); everything else takes a suffix until the shells die.
        let twin_name = if name.contains(SAFE_DISCRIMINATOR) {
            self.module.function_mut(old).name = format!("{name}__orig");
            name.clone()
        } else {
            format!("{name}__clamped")
        };

        let twin = self
            .module
            .add_function(&twin_name, twin_ty, Linkage::Internal);

        // No-capture is dropped everywhere; by-value only where the
        // parameter became a fat pointer.
        let mut attrs = vec![ParamAttrs::empty()];
        for src in &plan {
            let inherited = match src {
                ParamSource::Forward(i) => old_attrs[*i] & !ParamAttrs::NO_CAPTURE,
                ParamSource::Fat(i) | ParamSource::FatTriple(i) => {
                    old_attrs[*i] & !ParamAttrs::NO_CAPTURE & !ParamAttrs::BY_VAL
                }
            };
            attrs.push(inherited);
        }
        self.module.function_mut(twin).param_attrs = attrs;

        let twin_args = self.module.function(twin).args.clone();
        self.module.set_name(twin_args[0], "allocs");

        for (slot, src) in plan.iter().enumerate() {
            let new_arg = twin_args[slot + 1];

            match src {
                ParamSource::Forward(i) | ParamSource::Fat(i) => {
                    if let Some(arg_name) = self.module.name_of(old_args[*i]).map(str::to_owned) {
                        self.module.set_name(new_arg, &arg_name);
                    }
                    self.arg_map.insert(old_args[*i], new_arg);
                }
                ParamSource::FatTriple(i) => {
                    for k in 0..3 {
                        self.arg_map.insert(old_args[*i + k], new_arg);
                    }
                }
            }
        }

        self.fn_map.insert(old, twin);
        self.fn_list.push((old, twin));
        self.twins.insert(twin);
        self.param_plans.insert(old, plan);

        debug!("rewrote signature of `{name}` -> `{twin_name}`");
    }
}
