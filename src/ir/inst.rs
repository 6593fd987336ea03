//! Instruction set of the IR
//!
//! The instruction space is a closed tagged sum; passes dispatch over it with
//! exhaustive matching, so an unhandled construct is a compile error rather
//! than a downcast surprise.

use super::function::{BlockId, ParamAttrs};
use super::types::TypeId;
use super::value::ValueId;

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Unsigned less-than.
    Ult,
    /// Unsigned less-or-equal.
    Ule,
    /// Unsigned greater-than.
    Ugt,
    /// Unsigned greater-or-equal.
    Uge,
    /// Signed less-than.
    Slt,
    /// Signed less-or-equal.
    Sle,
    /// Signed greater-than.
    Sgt,
    /// Signed greater-or-equal.
    Sge,
}

/// Ordered float comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    /// Ordered equal.
    Oeq,
    /// Ordered not-equal.
    One,
    /// Ordered less-than.
    Olt,
    /// Ordered less-or-equal.
    Ole,
    /// Ordered greater-than.
    Ogt,
    /// Ordered greater-or-equal.
    Oge,
}

/// Value conversion operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    /// Reinterpret without changing bits; pointer casts stay in-space.
    Bitcast,
    /// Pointer to integer.
    PtrToInt,
    /// Integer to pointer.
    IntToPtr,
    /// Integer truncation.
    Trunc,
    /// Zero extension.
    Zext,
    /// Sign extension.
    Sext,
    /// Pointer move between address spaces.
    AddrSpaceCast,
}

/// Two-operand integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Left shift.
    Shl,
    /// Logical right shift.
    LShr,
}

/// Bulk memory intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemIntrinsic {
    /// Non-overlapping copy.
    Copy,
    /// Possibly-overlapping copy.
    Move,
    /// Byte fill.
    Set,
}

/// Instructions the pass refuses to transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnsupportedInst {
    /// Memory fence.
    Fence,
    /// Variadic argument access.
    VaArg,
    /// Atomic read-modify-write.
    AtomicRmw,
    /// Atomic compare-exchange.
    CmpXchg,
}

impl UnsupportedInst {
    /// Diagnostic label.
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Fence => "fence instruction",
            Self::VaArg => "va_arg instruction",
            Self::AtomicRmw => "atomic read-modify-write instruction",
            Self::CmpXchg => "atomic compare-exchange instruction",
        }
    }
}

/// One instruction; its result value is the arena entry holding it.
#[derive(Debug, Clone)]
pub enum Inst {
    /// Stack allocation in the entry block.
    Alloca {
        /// Type of the allocated slot.
        allocated: TypeId,
    },
    /// Read through a pointer.
    Load {
        /// Address read.
        ptr: ValueId,
    },
    /// Write through a pointer.
    Store {
        /// Value written.
        value: ValueId,
        /// Address written.
        ptr: ValueId,
    },
    /// Address arithmetic.
    Gep {
        /// Base pointer.
        base: ValueId,
        /// Indices; the first steps the pointer itself.
        indices: Vec<ValueId>,
    },
    /// Value conversion; the result type is the value's type.
    Cast {
        /// Conversion operator.
        op: CastOp,
        /// Converted value.
        value: ValueId,
    },
    /// Integer arithmetic.
    Bin {
        /// Operator.
        op: BinOp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Integer comparison producing `i1`.
    ICmp {
        /// Predicate.
        pred: IntPredicate,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Float comparison producing `i1`.
    FCmp {
        /// Predicate.
        pred: FloatPredicate,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Unconditional branch.
    Br {
        /// Successor.
        dest: BlockId,
    },
    /// Two-way conditional branch.
    CondBr {
        /// `i1` condition.
        cond: ValueId,
        /// Successor on true.
        then_dest: BlockId,
        /// Successor on false.
        else_dest: BlockId,
    },
    /// Function return.
    Ret {
        /// Returned value; `None` for `void`.
        value: Option<ValueId>,
    },
    /// Block-argument merge.
    Phi {
        /// `(value, predecessor)` pairs.
        incoming: Vec<(ValueId, BlockId)>,
    },
    /// Function call.
    Call {
        /// Callee symbol.
        callee: ValueId,
        /// Actual arguments.
        args: Vec<ValueId>,
        /// Per-argument attributes, parallel to `args`.
        arg_attrs: Vec<ParamAttrs>,
    },
    /// Aggregate field read.
    ExtractValue {
        /// Aggregate operand.
        agg: ValueId,
        /// Projection path.
        indices: Vec<u32>,
    },
    /// Aggregate field replacement.
    InsertValue {
        /// Aggregate operand.
        agg: ValueId,
        /// Replacement element.
        elem: ValueId,
        /// Projection path.
        indices: Vec<u32>,
    },
    /// Bulk memory operation.
    Mem {
        /// Copy, move or set.
        intrinsic: MemIntrinsic,
        /// Destination address.
        dst: ValueId,
        /// Source address, or fill byte for [`MemIntrinsic::Set`].
        src: ValueId,
        /// Byte count.
        len: ValueId,
        /// Alignment hint in bytes.
        align: u32,
    },
    /// Construct the pass refuses to transform.
    Unsupported(UnsupportedInst),
}

impl Inst {
    /// Return `true` if the instruction ends its block.
    pub const fn is_terminator(&self) -> bool {
        matches!(self, Self::Br { .. } | Self::CondBr { .. } | Self::Ret { .. })
    }

    /// Successor blocks of a terminator.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Br { dest } => vec![*dest],
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            _ => Vec::new(),
        }
    }

    /// Visit every value operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Self::Alloca { .. } | Self::Br { .. } | Self::Unsupported(_) => {}
            Self::Load { ptr } => f(*ptr),
            Self::Store { value, ptr } => {
                f(*value);
                f(*ptr);
            }
            Self::Gep { base, indices } => {
                f(*base);
                indices.iter().for_each(|i| f(*i));
            }
            Self::Cast { value, .. } => f(*value),
            Self::Bin { lhs, rhs, .. }
            | Self::ICmp { lhs, rhs, .. }
            | Self::FCmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Self::CondBr { cond, .. } => f(*cond),
            Self::Ret { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
            Self::Phi { incoming } => incoming.iter().for_each(|(v, _)| f(*v)),
            Self::Call { callee, args, .. } => {
                f(*callee);
                args.iter().for_each(|a| f(*a));
            }
            Self::ExtractValue { agg, .. } => f(*agg),
            Self::InsertValue { agg, elem, .. } => {
                f(*agg);
                f(*elem);
            }
            Self::Mem { dst, src, len, .. } => {
                f(*dst);
                f(*src);
                f(*len);
            }
        }
    }

    /// Visit every value operand mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Self::Alloca { .. } | Self::Br { .. } | Self::Unsupported(_) => {}
            Self::Load { ptr } => f(ptr),
            Self::Store { value, ptr } => {
                f(value);
                f(ptr);
            }
            Self::Gep { base, indices } => {
                f(base);
                indices.iter_mut().for_each(&mut f);
            }
            Self::Cast { value, .. } => f(value),
            Self::Bin { lhs, rhs, .. }
            | Self::ICmp { lhs, rhs, .. }
            | Self::FCmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Self::CondBr { cond, .. } => f(cond),
            Self::Ret { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            Self::Phi { incoming } => incoming.iter_mut().for_each(|(v, _)| f(v)),
            Self::Call { callee, args, .. } => {
                f(callee);
                args.iter_mut().for_each(&mut f);
            }
            Self::ExtractValue { agg, .. } => f(agg),
            Self::InsertValue { agg, elem, .. } => {
                f(agg);
                f(elem);
            }
            Self::Mem { dst, src, len, .. } => {
                f(dst);
                f(src);
                f(len);
            }
        }
    }

    /// Redirect every incoming edge of a phi recorded against `from`.
    pub fn replace_incoming_block(&mut self, from: BlockId, to: BlockId) {
        if let Self::Phi { incoming } = self {
            for (_, pred) in incoming.iter_mut() {
                if *pred == from {
                    *pred = to;
                }
            }
        }
    }
}
