//! Positioned instruction builder

use super::function::{BlockId, ParamAttrs};
use super::inst::{BinOp, CastOp, FloatPredicate, Inst, IntPredicate, MemIntrinsic};
use super::module::Module;
use super::types::{AddressSpace, Type, TypeId};
use super::value::{Value, ValueId, ValueKind};

/// Builds instructions at a fixed position inside one block, advancing past
/// each emitted instruction so a sequence lands in program order.
pub struct InstBuilder<'a> {
    module: &'a mut Module,
    block: BlockId,
    at: usize,
}

impl<'a> InstBuilder<'a> {
    /// Position at the end of `block`.
    pub fn at_end(module: &'a mut Module, block: BlockId) -> Self {
        let at = module.block(block).insts.len();

        Self { module, block, at }
    }

    /// Position at the head of `block`.
    pub fn at_front(module: &'a mut Module, block: BlockId) -> Self {
        Self {
            module,
            block,
            at: 0,
        }
    }

    /// Position before the instruction currently at `index`.
    pub fn at(module: &'a mut Module, block: BlockId, index: usize) -> Self {
        debug_assert!(index <= module.block(block).insts.len());

        Self {
            module,
            block,
            at: index,
        }
    }

    /// Current insertion index.
    pub const fn position(&self) -> usize {
        self.at
    }

    /// Integer immediate convenience.
    pub fn const_int(&mut self, ty: TypeId, v: i64) -> ValueId {
        self.module.const_int(ty, v)
    }

    /// Type of an already-existing value.
    pub fn type_of(&self, id: ValueId) -> TypeId {
        self.module.type_of(id)
    }

    fn push(&mut self, ty: TypeId, name: Option<&str>, inst: Inst) -> ValueId {
        let id = self.module.alloc_value(Value {
            ty,
            name: name.map(str::to_owned),
            kind: ValueKind::Inst(inst),
        });

        self.module.block_mut(self.block).insts.insert(self.at, id);
        self.at += 1;

        id
    }

    /// Stack allocation; the result is a private-space pointer to the slot.
    pub fn alloca(&mut self, allocated: TypeId, name: Option<&str>) -> ValueId {
        let ty = self.module.types.ptr(allocated, AddressSpace::Private);

        self.push(ty, name, Inst::Alloca { allocated })
    }

    /// Read through `ptr`.
    pub fn load(&mut self, ptr: ValueId, name: Option<&str>) -> ValueId {
        let ty = self
            .module
            .types
            .pointee(self.module.type_of(ptr))
            .expect("load requires a pointer operand");

        self.push(ty, name, Inst::Load { ptr })
    }

    /// Write `value` through `ptr`.
    pub fn store(&mut self, value: ValueId, ptr: ValueId) -> ValueId {
        let void = self.module.types.void();

        self.push(void, None, Inst::Store { value, ptr })
    }

    /// Address arithmetic with value indices.
    pub fn gep(&mut self, base: ValueId, indices: Vec<ValueId>, name: Option<&str>) -> ValueId {
        let ty = self.gep_result(base, &indices);

        self.push(ty, name, Inst::Gep { base, indices })
    }

    /// Address arithmetic with constant indices.
    pub fn gep_i64(&mut self, base: ValueId, indices: &[i64], name: Option<&str>) -> ValueId {
        let i32_ty = self.module.types.int(32);
        let indices = indices
            .iter()
            .map(|i| self.module.const_int(i32_ty, *i))
            .collect();

        self.gep(base, indices, name)
    }

    fn gep_result(&mut self, base: ValueId, indices: &[ValueId]) -> TypeId {
        let base_ty = self.module.type_of(base);
        let space = self
            .module
            .types
            .space(base_ty)
            .expect("address arithmetic requires a pointer base");
        let mut cur = self
            .module
            .types
            .pointee(base_ty)
            .expect("address arithmetic requires a pointer base");

        for index in indices.iter().skip(1) {
            cur = match self.module.types.get(cur) {
                Type::Struct { .. } => {
                    let field = self
                        .module
                        .value(*index)
                        .const_int()
                        .expect("struct projection requires a constant index");

                    self.module
                        .types
                        .index_into(cur, field as u64)
                        .expect("struct projection must name an existing field")
                }
                Type::Array { elem, .. } | Type::Vector { elem, .. } => *elem,
                _ => unreachable!("projection through a non-aggregate type"),
            };
        }

        self.module.types.ptr(cur, space)
    }

    /// Value conversion to `to`.
    pub fn cast(&mut self, op: CastOp, value: ValueId, to: TypeId, name: Option<&str>) -> ValueId {
        self.push(to, name, Inst::Cast { op, value })
    }

    /// Integer arithmetic; the result takes the left operand's type.
    pub fn bin(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId, name: Option<&str>) -> ValueId {
        let ty = self.module.type_of(lhs);

        self.push(ty, name, Inst::Bin { op, lhs, rhs })
    }

    /// Integer comparison producing `i1`.
    pub fn icmp(
        &mut self,
        pred: IntPredicate,
        lhs: ValueId,
        rhs: ValueId,
        name: Option<&str>,
    ) -> ValueId {
        let ty = self.module.types.bool();

        self.push(ty, name, Inst::ICmp { pred, lhs, rhs })
    }

    /// Float comparison producing `i1`.
    pub fn fcmp(
        &mut self,
        pred: FloatPredicate,
        lhs: ValueId,
        rhs: ValueId,
        name: Option<&str>,
    ) -> ValueId {
        let ty = self.module.types.bool();

        self.push(ty, name, Inst::FCmp { pred, lhs, rhs })
    }

    /// Unconditional branch.
    pub fn br(&mut self, dest: BlockId) -> ValueId {
        let void = self.module.types.void();

        self.push(void, None, Inst::Br { dest })
    }

    /// Conditional branch.
    pub fn cond_br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) -> ValueId {
        let void = self.module.types.void();

        self.push(
            void,
            None,
            Inst::CondBr {
                cond,
                then_dest,
                else_dest,
            },
        )
    }

    /// Return a value.
    pub fn ret(&mut self, value: ValueId) -> ValueId {
        let void = self.module.types.void();

        self.push(void, None, Inst::Ret { value: Some(value) })
    }

    /// Return from a `void` function.
    pub fn ret_void(&mut self) -> ValueId {
        let void = self.module.types.void();

        self.push(void, None, Inst::Ret { value: None })
    }

    /// Block-argument merge of type `ty`.
    pub fn phi(
        &mut self,
        ty: TypeId,
        incoming: Vec<(ValueId, BlockId)>,
        name: Option<&str>,
    ) -> ValueId {
        self.push(ty, name, Inst::Phi { incoming })
    }

    /// Call `callee` with `args`.
    pub fn call(
        &mut self,
        callee: ValueId,
        args: Vec<ValueId>,
        arg_attrs: Vec<ParamAttrs>,
        name: Option<&str>,
    ) -> ValueId {
        debug_assert_eq!(args.len(), arg_attrs.len());

        let ty = self
            .module
            .types
            .fn_ret(self.module.type_of(callee))
            .expect("call requires a function callee");

        self.push(
            ty,
            name,
            Inst::Call {
                callee,
                args,
                arg_attrs,
            },
        )
    }

    /// Aggregate field read.
    pub fn extract_value(
        &mut self,
        agg: ValueId,
        indices: Vec<u32>,
        name: Option<&str>,
    ) -> ValueId {
        let mut ty = self.module.type_of(agg);
        for index in &indices {
            ty = self
                .module
                .types
                .index_into(ty, u64::from(*index))
                .expect("extraction path must stay inside the aggregate type");
        }

        self.push(ty, name, Inst::ExtractValue { agg, indices })
    }

    /// Aggregate field replacement; the result keeps the aggregate type.
    pub fn insert_value(
        &mut self,
        agg: ValueId,
        elem: ValueId,
        indices: Vec<u32>,
        name: Option<&str>,
    ) -> ValueId {
        let ty = self.module.type_of(agg);

        self.push(ty, name, Inst::InsertValue { agg, elem, indices })
    }

    /// Bulk memory operation.
    pub fn mem(
        &mut self,
        intrinsic: MemIntrinsic,
        dst: ValueId,
        src: ValueId,
        len: ValueId,
        align: u32,
    ) -> ValueId {
        let void = self.module.types.void();

        self.push(
            void,
            None,
            Inst::Mem {
                intrinsic,
                dst,
                src,
                len,
                align,
            },
        )
    }
}
