//! Functions, basic blocks and parameter attributes

use std::fmt;

use bitflags::bitflags;

use super::types::TypeId;
use super::value::ValueId;

/// Arena index of a function.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub(crate) u32);

impl FuncId {
    /// Position in the function arena.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Arena index of a basic block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Position in the block arena.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

bitflags! {
    /// Parameter attribute set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamAttrs: u8 {
        /// The callee does not retain the pointer.
        const NO_CAPTURE = 1;
        /// The argument is a by-value aggregate copy.
        const BY_VAL = 2;
    }
}

/// Linkage kind of a function or global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Linkage {
    /// Visible to the host.
    External,
    /// Module-internal.
    Internal,
    /// Module-internal, name not significant.
    Private,
}

/// Ordered instruction list ending in a terminator.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Instruction values in execution order.
    pub insts: Vec<ValueId>,
}

/// Function definition or declaration.
#[derive(Debug, Clone)]
pub struct Function {
    /// Symbol name.
    pub name: String,
    /// Signature type ([`super::Type::Function`]).
    pub ty: TypeId,
    /// Argument values, parallel to the signature parameters.
    pub args: Vec<ValueId>,
    /// Per-parameter attributes, parallel to `args`.
    pub param_attrs: Vec<ParamAttrs>,
    /// Basic blocks in textual order; empty for declarations.
    pub blocks: Vec<BlockId>,
    /// Linkage kind.
    pub linkage: Linkage,
    /// Declaration without a body.
    pub is_declaration: bool,
    /// Recognized builtin; exempt from rewriting.
    pub is_builtin: bool,
    pub(crate) value: ValueId,
}

impl Function {
    /// The entry block, which has no predecessors.
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }

    /// The value representing this function symbol.
    pub const fn value(&self) -> ValueId {
        self.value
    }
}
