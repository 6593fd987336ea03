//! Bounds analysis over the instruction DAG
//!
//! Populates the value-bounds map from three sources: fat-pointer arguments
//! (extracted at function entry), single-interval address spaces, and
//! dataflow along pointer-typed definitions. The walk is memoized by value
//! identity, so use-def cycles through phis terminate.

use std::collections::HashSet;

use crate::consts::{FAT_FIELD_MAX, FAT_FIELD_MIN};
use crate::error::{PassError, PassResult};
use crate::ir::{CastOp, Const, Inst, InstBuilder, ValueId, ValueKind};

use super::Clamper;

/// Legal memory range delimiters.
///
/// When `indirect`, `low` and `high` are the addresses of slots holding the
/// bounds; a load is required at the use site. The pair lives from its
/// creation in consolidation or wrapper synthesis until the pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundsInterval {
    /// First valid address, or the slot holding it.
    pub low: ValueId,
    /// First invalid address, or the slot holding it.
    pub high: ValueId,
    /// The pair points at slots rather than being the bounds.
    pub indirect: bool,
}

impl BoundsInterval {
    /// Interval whose pair is the bounds themselves.
    pub const fn direct(low: ValueId, high: ValueId) -> Self {
        Self {
            low,
            high,
            indirect: false,
        }
    }

    /// Interval whose pair addresses slots holding the bounds.
    pub const fn indirect(low: ValueId, high: ValueId) -> Self {
        Self {
            low,
            high,
            indirect: true,
        }
    }
}

impl Clamper<'_> {
    /// Run the bounds-analysis phase.
    pub(crate) fn analyze_bounds(&mut self) -> PassResult<()> {
        self.bind_argument_bounds();
        self.bind_stored_pointer_bounds()?;

        Ok(())
    }

    /// Source 1: every fat-pointer argument yields `low`/`high` extractions
    /// at function entry, bound to the extracted `current`.
    fn bind_argument_bounds(&mut self) {
        for (_, twin) in self.fn_list.clone() {
            let args = self.module.function(twin).args.clone();

            for arg in args {
                let Some(&cur) = self.fat_currents.get(&arg) else {
                    continue;
                };

                // Folded triples already carry their bounds extractions.
                if let Some(&(lo, hi)) = self.fat_arg_bounds.get(&arg) {
                    self.value_bounds.insert(cur, BoundsInterval::direct(lo, hi));
                    continue;
                }

                let Some((block, at)) = self.module.find_inst_block(twin, cur) else {
                    continue;
                };

                let label = self.module.name_of(arg).map(str::to_owned);
                let lo_name = label.as_deref().map(|n| format!("{n}.min"));
                let hi_name = label.as_deref().map(|n| format!("{n}.max"));

                let mut b = InstBuilder::at(self.module, block, at + 1);
                let lo = b.extract_value(arg, vec![FAT_FIELD_MIN], lo_name.as_deref());
                let hi = b.extract_value(arg, vec![FAT_FIELD_MAX], hi_name.as_deref());
                drop(b);

                self.value_bounds.insert(cur, BoundsInterval::direct(lo, hi));
            }
        }
    }

    /// Source 3, store direction: bounds of a stored pointer flow to the
    /// location. A location rebound to a different interval aborts; the
    /// representation holds one interval per variable.
    fn bind_stored_pointer_bounds(&mut self) -> PassResult<()> {
        for func in self.checkable_functions() {
            for block in self.module.function(func).blocks.clone() {
                for v in self.module.block(block).insts.clone() {
                    let Some(Inst::Store { value, ptr }) = self.module.inst(v) else {
                        continue;
                    };
                    let (value, ptr) = (*value, *ptr);

                    if !self.module.types.is_pointer(self.module.type_of(value)) {
                        continue;
                    }

                    let Some(bounds) = self.resolve_bounds(value)? else {
                        continue;
                    };

                    let slot = self.peel_casts(ptr);
                    match self.slot_bounds.get(&slot) {
                        Some(existing) if *existing != bounds => {
                            return Err(PassError::AmbiguousBounds {
                                value: self.module.describe(slot),
                            });
                        }
                        _ => {
                            self.slot_bounds.insert(slot, bounds);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Strip same-space pointer bitcasts so a cast slot and its source share
    /// one bounds entry.
    fn peel_casts(&self, v: ValueId) -> ValueId {
        let mut cur = v;

        while let Some(Inst::Cast {
            op: CastOp::Bitcast,
            value,
        }) = self.module.inst(cur)
        {
            cur = *value;
        }

        cur
    }

    /// The unique interval a value may respect, if one can be proven.
    ///
    /// Walks backward along the producing chain (projection to base, cast to
    /// source, load to slot) with memoization, then falls back to the
    /// single-interval address-space rule.
    pub(crate) fn resolve_bounds(&mut self, v: ValueId) -> PassResult<Option<BoundsInterval>> {
        let mut visiting = HashSet::new();

        self.bounds_of(v, &mut visiting)
    }

    fn bounds_of(
        &mut self,
        v: ValueId,
        visiting: &mut HashSet<ValueId>,
    ) -> PassResult<Option<BoundsInterval>> {
        if let Some(b) = self.value_bounds.get(&v) {
            return Ok(Some(*b));
        }

        if !visiting.insert(v) {
            // Cycle through a phi; the other operands decide.
            return Ok(None);
        }

        let kind = self.module.value(v).kind.clone();
        let mut found = match kind {
            ValueKind::Inst(Inst::Gep { base, .. }) => self.bounds_of(base, visiting)?,
            ValueKind::Inst(Inst::Cast { value, .. }) => {
                let from = self.module.type_of(value);
                let to = self.module.type_of(v);

                match (self.module.types.space(from), self.module.types.space(to)) {
                    (Some(a), Some(b)) if a == b => self.bounds_of(value, visiting)?,
                    _ => None,
                }
            }
            ValueKind::Inst(Inst::Load { ptr }) => {
                let slot = self.peel_casts(ptr);
                self.slot_bounds.get(&slot).copied()
            }
            ValueKind::Inst(Inst::Phi { incoming }) => {
                let mut merged: Option<BoundsInterval> = None;

                for (value, _) in incoming {
                    let Some(b) = self.bounds_of(value, visiting)? else {
                        continue;
                    };

                    match merged {
                        None => merged = Some(b),
                        Some(prev) if prev != b => {
                            return Err(PassError::AmbiguousBounds {
                                value: self.module.describe(v),
                            });
                        }
                        Some(_) => {}
                    }
                }

                merged
            }
            ValueKind::Const(Const::Gep { base, .. }) => self.bounds_of(base, visiting)?,
            _ => None,
        };

        // Source 2: an address space with exactly one interval binds every
        // pointer of that space unconditionally.
        if found.is_none() {
            let ty = self.module.type_of(v);
            if let Some(space) = self.module.types.space(ty) {
                if let Some(list) = self.space_bounds.get(&space) {
                    if list.len() == 1 {
                        found = Some(list[0]);
                    }
                }
            }
        }

        visiting.remove(&v);

        if let Some(b) = found {
            self.value_bounds.insert(v, b);
        }

        Ok(found)
    }
}
