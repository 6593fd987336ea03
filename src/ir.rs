//! In-memory typed SSA intermediate representation
//!
//! The on-disk parser and serializer are external collaborators; they hand
//! the pass a [`Module`] holding globals, functions, blocks and instructions
//! in index arenas, and receive the same module back, mutated in place.
//! Producers (including tests) assemble bodies through [`InstBuilder`].

mod builder;
mod function;
mod inst;
mod module;
mod printer;
mod types;
mod value;

pub use builder::InstBuilder;
pub use function::{Block, BlockId, FuncId, Function, Linkage, ParamAttrs};
pub use inst::{
    BinOp, CastOp, FloatPredicate, Inst, IntPredicate, MemIntrinsic, UnsupportedInst,
};
pub use module::{Global, GlobalId, Module, NamedMetadata};
pub use types::{AddressSpace, Type, TypeId, TypeTable};
pub use value::{Const, Value, ValueId, ValueKind};
