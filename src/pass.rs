//! Pointer-clamping pass implementation
//!
//! One linear pipeline over a single module; each phase reads the state left
//! by its predecessors and no phase runs twice. The [`Clamper`] owns the
//! module mutably for the duration of [`Clamper::run`] together with every
//! pass-local map, so no state outlives an invocation.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::context::Config;
use crate::error::PassResult;
use crate::ir::{AddressSpace, FuncId, GlobalId, Module, ValueId};
use crate::state::Phase;

mod body_move;
mod bounds;
mod builtins;
mod calls;
mod checks;
mod consolidate;
mod safety;
mod signature;
mod wrapper;

pub use bounds::BoundsInterval;
pub(crate) use signature::ParamSource;

/// Whole-module transformation driver.
///
/// The module is the only shared mutable resource; it is left self-consistent
/// iff [`Clamper::run`] returns `Ok`. On error the module state is undefined
/// and the host is expected to discard it.
pub struct Clamper<'m> {
    module: &'m mut Module,
    config: Config,
    phase: Phase,

    // consolidation
    space_aggregates: HashMap<AddressSpace, GlobalId>,
    frame_aggregates: HashMap<FuncId, ValueId>,

    // signature mapping, frozen before bodies move
    fn_map: HashMap<FuncId, FuncId>,
    fn_list: Vec<(FuncId, FuncId)>,
    twins: HashSet<FuncId>,
    arg_map: HashMap<ValueId, ValueId>,
    param_plans: HashMap<FuncId, Vec<ParamSource>>,
    fat_currents: HashMap<ValueId, ValueId>,
    fat_arg_bounds: HashMap<ValueId, (ValueId, ValueId)>,

    // bounds
    space_bounds: HashMap<AddressSpace, Vec<BoundsInterval>>,
    value_bounds: HashMap<ValueId, BoundsInterval>,
    slot_bounds: HashMap<ValueId, BoundsInterval>,

    // safety
    safe_exceptions: HashSet<ValueId>,
    trusted: HashSet<ValueId>,

    // builtins
    safe_twins: HashMap<FuncId, FuncId>,

    // kernel wrappers, renamed to the host-visible names at finish
    wrappers: Vec<(FuncId, String)>,
}

impl<'m> Clamper<'m> {
    /// Wrap a freshly parsed module.
    pub fn new(module: &'m mut Module, config: Config) -> Self {
        Self {
            module,
            config,
            phase: Phase::default(),
            space_aggregates: HashMap::new(),
            frame_aggregates: HashMap::new(),
            fn_map: HashMap::new(),
            fn_list: Vec::new(),
            twins: HashSet::new(),
            arg_map: HashMap::new(),
            param_plans: HashMap::new(),
            fat_currents: HashMap::new(),
            fat_arg_bounds: HashMap::new(),
            space_bounds: HashMap::new(),
            value_bounds: HashMap::new(),
            slot_bounds: HashMap::new(),
            safe_exceptions: HashSet::new(),
            trusted: HashSet::new(),
            safe_twins: HashMap::new(),
            wrappers: Vec::new(),
        }
    }

    /// Current pipeline position.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the whole pipeline.
    ///
    /// On `Ok` the module is fully instrumented and the kernel metadata
    /// points at the synthesized wrappers. On `Err` the module must be
    /// discarded.
    pub fn run(mut self) -> PassResult<()> {
        self.consolidate()?;
        self.advance(Phase::Consolidated);

        self.rewrite_signatures()?;
        self.advance(Phase::SignaturesRewritten);

        self.move_bodies();
        self.advance(Phase::BodiesMoved);

        self.build_kernel_wrappers()?;
        self.advance(Phase::KernelsWrapped);

        self.analyze_bounds()?;
        self.advance(Phase::BoundsAnalyzed);

        self.prove_safety();
        self.advance(Phase::SafetyProven);

        self.inject_checks()?;
        self.advance(Phase::ChecksInjected);

        self.rewrite_calls()?;
        self.advance(Phase::CallsRewritten);

        self.retarget_builtins()?;
        self.advance(Phase::BuiltinsRetargeted);

        self.finish();
        self.advance(Phase::Done);

        Ok(())
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), Some(to));
        debug!("phase complete: {:?} -> {:?}", self.phase, to);

        self.phase = to;
    }

    /// Every live function that has a body.
    fn bodied_functions(&self) -> Vec<FuncId> {
        self.module
            .func_ids()
            .into_iter()
            .filter(|f| !self.module.function(*f).blocks.is_empty())
            .collect()
    }

    /// Functions whose memory operations are subject to checking: everything
    /// with a body except the synthesized wrappers, whose instructions are
    /// trusted by construction.
    fn checkable_functions(&self) -> Vec<FuncId> {
        self.bodied_functions()
            .into_iter()
            .filter(|f| !self.is_wrapper(*f))
            .collect()
    }

    fn is_wrapper(&self, func: FuncId) -> bool {
        self.wrappers.iter().any(|(w, _)| *w == func)
    }

    fn function_name(&self, func: FuncId) -> String {
        self.module.function(func).name.clone()
    }
}
