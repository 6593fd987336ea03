//! Body transplantation into the rewritten twins
//!
//! After this phase the module is executable again: bodies live in the
//! twins, argument uses are rewired, and calls still reference the old
//! shells until the call-site rewriter patches them.

use std::mem;

use tracing::debug;

use crate::consts::{FAT_FIELD_CURRENT, FAT_FIELD_MAX, FAT_FIELD_MIN};
use crate::ir::InstBuilder;

use super::{Clamper, ParamSource};

impl Clamper<'_> {
    /// Run the body-moving phase.
    pub(crate) fn move_bodies(&mut self) {
        for (old, twin) in self.fn_list.clone() {
            let blocks = mem::take(&mut self.module.function_mut(old).blocks);
            debug_assert!(self.module.function(twin).blocks.is_empty());
            self.module.function_mut(twin).blocks = blocks;

            let Some(entry) = self.module.function(twin).entry() else {
                continue;
            };

            let old_args = self.module.function(old).args.clone();
            let twin_args = self.module.function(twin).args.clone();
            let plan = self.param_plans[&old].clone();

            // Fat arguments are consumed by extracting `current` at the entry
            // head; folded triples recover all three original pointers.
            let arg_names: Vec<Option<String>> = old_args
                .iter()
                .map(|a| self.module.name_of(*a).map(str::to_owned))
                .collect();

            let mut rewires = Vec::new();
            let mut b = InstBuilder::at_front(self.module, entry);

            for (slot, src) in plan.iter().enumerate() {
                let new_arg = twin_args[slot + 1];

                match *src {
                    ParamSource::Forward(i) => rewires.push((old_args[i], new_arg)),
                    ParamSource::Fat(i) => {
                        let label = arg_names[i]
                            .as_deref()
                            .map(|n| format!("{n}.cur"));
                        let cur =
                            b.extract_value(new_arg, vec![FAT_FIELD_CURRENT], label.as_deref());

                        rewires.push((old_args[i], cur));
                        self.fat_currents.insert(new_arg, cur);
                    }
                    ParamSource::FatTriple(i) => {
                        let mut parts = Vec::with_capacity(3);
                        for (k, field) in
                            [FAT_FIELD_CURRENT, FAT_FIELD_MIN, FAT_FIELD_MAX].into_iter().enumerate()
                        {
                            let v = b.extract_value(new_arg, vec![field], None);
                            rewires.push((old_args[i + k], v));
                            parts.push(v);
                        }

                        self.fat_currents.insert(new_arg, parts[0]);
                        self.fat_arg_bounds.insert(new_arg, (parts[1], parts[2]));
                    }
                }
            }
            drop(b);

            for (old_arg, new_value) in rewires {
                self.module.replace_all_uses(old_arg, new_value);
            }

            debug!(
                "moved {} blocks into `{}`",
                self.module.function(twin).blocks.len(),
                self.module.function(twin).name
            );
        }
    }
}
