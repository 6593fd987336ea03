//! Pointer-clamping instrumentation for WebCL-style compute kernels.
//!
//! Untrusted kernel source lowered to a typed SSA module must be made
//! memory-safe before it reaches a backend code generator. This crate is the
//! whole-module pass that does it: static allocations are fused per address
//! space, every function moves to a fat-pointer calling convention, each
//! kernel gains a host-visible wrapper taking `(pointer, element-count)`
//! pairs, and every pointer dereference that cannot be proven safe is
//! guarded by a compare-and-branch clamp.
//!
//! The parser, serializer and command-line driver are external
//! collaborators: they construct an [`ir::Module`], hand it to
//! [`pass::Clamper::run`], and emit the mutated module on success.

pub mod consts;
pub mod context;
pub mod error;
pub mod ir;
pub mod mangle;
pub mod pass;
pub mod state;
pub mod util;

pub mod prelude {
    //! Re-exports of the types needed to drive the pass.

    pub use crate::consts::AddressSpaceMap;
    pub use crate::context::{Config, Mode};
    pub use crate::error::{PassError, PassResult};
    pub use crate::ir::{
        AddressSpace, BinOp, Block, BlockId, CastOp, Const, FloatPredicate, FuncId, Function,
        Global, GlobalId, Inst, InstBuilder, IntPredicate, Linkage, MemIntrinsic, Module,
        NamedMetadata, ParamAttrs, Type, TypeId, TypeTable, UnsupportedInst, Value, ValueId,
        ValueKind,
    };
    pub use crate::pass::{BoundsInterval, Clamper};
    pub use crate::state::Phase;
}
