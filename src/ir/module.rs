//! Module container and arenas

use std::fmt;

use crate::consts::KERNELS_METADATA;

use super::function::{Block, BlockId, FuncId, Function, Linkage, ParamAttrs};
use super::inst::Inst;
use super::types::{AddressSpace, Type, TypeId, TypeTable};
use super::value::{Const, Value, ValueId, ValueKind};

/// Arena index of a global variable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalId(pub(crate) u32);

impl GlobalId {
    /// Position in the global arena.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A named allocation with static storage duration.
#[derive(Debug, Clone)]
pub struct Global {
    /// Symbol name; `None` for anonymous allocations.
    pub name: Option<String>,
    /// Type of the allocated slot; the global's value is a pointer to it.
    pub allocated: TypeId,
    /// Address space of the allocation.
    pub space: AddressSpace,
    /// Constant initializer; `None` for external declarations.
    pub init: Option<ValueId>,
    /// Linkage kind.
    pub linkage: Linkage,
    /// The address of the global is not observable.
    pub unnamed_addr: bool,
    pub(crate) value: ValueId,
}

impl Global {
    /// Return `true` for external declarations without storage here.
    pub fn is_declaration(&self) -> bool {
        self.init.is_none()
    }

    /// The pointer value representing this global's address.
    pub const fn value(&self) -> ValueId {
        self.value
    }
}

/// Named metadata node.
#[derive(Debug, Clone)]
pub struct NamedMetadata {
    /// Node name.
    pub name: String,
    /// Entries; each entry is an operand list.
    pub entries: Vec<Vec<ValueId>>,
}

/// IR module: owns every type, value, function, block and global.
///
/// Producers (the parser, or tests through [`super::InstBuilder`]) insert
/// entities which become module-owned; the pass holds only index-valued maps
/// next to a mutable borrow of the module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Interned type storage.
    pub types: TypeTable,
    values: Vec<Value>,
    functions: Vec<Option<Function>>,
    globals: Vec<Option<Global>>,
    blocks: Vec<Block>,
    metadata: Vec<NamedMetadata>,
}

impl Module {
    /// Empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /* VALUES */

    pub(crate) fn alloc_value(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(value);

        id
    }

    /// Resolve a value id.
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    /// Resolve a value id mutably.
    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.index()]
    }

    /// Type of a value.
    pub fn type_of(&self, id: ValueId) -> TypeId {
        self.value(id).ty
    }

    /// Source-level name of a value, if any.
    pub fn name_of(&self, id: ValueId) -> Option<&str> {
        self.value(id).name.as_deref()
    }

    /// Attach a source-level name to a value.
    pub fn set_name(&mut self, id: ValueId, name: &str) {
        self.value_mut(id).name = Some(name.to_owned());
    }

    /// Printable handle for diagnostics: the name when present, the arena id
    /// otherwise.
    pub fn describe(&self, id: ValueId) -> String {
        self.name_of(id)
            .map_or_else(|| format!("{id:?}"), str::to_owned)
    }

    /// The instruction held by a value, if it is one.
    pub fn inst(&self, id: ValueId) -> Option<&Inst> {
        self.value(id).as_inst()
    }

    /// Mutable access to the instruction held by a value.
    pub fn inst_mut(&mut self, id: ValueId) -> Option<&mut Inst> {
        match &mut self.value_mut(id).kind {
            ValueKind::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    /* CONSTANTS */

    /// Integer immediate of type `ty`.
    pub fn const_int(&mut self, ty: TypeId, v: i64) -> ValueId {
        self.alloc_value(Value {
            ty,
            name: None,
            kind: ValueKind::Const(Const::Int(v)),
        })
    }

    /// Float immediate of type `ty`.
    pub fn const_float(&mut self, ty: TypeId, v: f64) -> ValueId {
        self.alloc_value(Value {
            ty,
            name: None,
            kind: ValueKind::Const(Const::Float(v)),
        })
    }

    /// Null pointer of type `ty`.
    pub fn const_null(&mut self, ty: TypeId) -> ValueId {
        debug_assert!(self.types.is_pointer(ty));

        self.alloc_value(Value {
            ty,
            name: None,
            kind: ValueKind::Const(Const::Null),
        })
    }

    /// Zero of any first-class type; null for pointers.
    pub fn const_zero(&mut self, ty: TypeId) -> ValueId {
        let kind = if self.types.is_pointer(ty) {
            Const::Null
        } else {
            Const::Zero
        };

        self.alloc_value(Value {
            ty,
            name: None,
            kind: ValueKind::Const(kind),
        })
    }

    /// Aggregate literal of type `ty`.
    pub fn const_aggregate(&mut self, ty: TypeId, elems: Vec<ValueId>) -> ValueId {
        self.alloc_value(Value {
            ty,
            name: None,
            kind: ValueKind::Const(Const::Aggregate(elems)),
        })
    }

    /// Constant address projection `&base[i0].i1...`.
    pub fn const_gep(&mut self, base: ValueId, indices: &[u64]) -> ValueId {
        let base_ty = self.type_of(base);
        let space = self
            .types
            .space(base_ty)
            .expect("constant projection requires a pointer base");
        let mut cur = self
            .types
            .pointee(base_ty)
            .expect("constant projection requires a pointer base");

        for index in indices.iter().skip(1) {
            cur = self
                .types
                .index_into(cur, *index)
                .expect("constant projection must stay inside the aggregate type");
        }

        let ty = self.types.ptr(cur, space);

        self.alloc_value(Value {
            ty,
            name: None,
            kind: ValueKind::Const(Const::Gep {
                base,
                indices: indices.to_vec(),
            }),
        })
    }

    /// Return `true` if `id` is a simple constant: null, integer, float, or
    /// an aggregate literal recursively composed of simple constants.
    /// References to other allocations are not simple.
    pub fn is_simple_const(&self, id: ValueId) -> bool {
        match &self.value(id).kind {
            ValueKind::Const(Const::Null | Const::Int(_) | Const::Float(_) | Const::Zero) => true,
            ValueKind::Const(Const::Aggregate(elems)) => {
                elems.iter().all(|e| self.is_simple_const(*e))
            }
            _ => false,
        }
    }

    /* FUNCTIONS */

    /// Add a function definition with no blocks yet.
    pub fn add_function(&mut self, name: &str, ty: TypeId, linkage: Linkage) -> FuncId {
        self.insert_function(name, ty, linkage, false, false)
    }

    /// Add an external declaration.
    pub fn declare_function(&mut self, name: &str, ty: TypeId, is_builtin: bool) -> FuncId {
        self.insert_function(name, ty, Linkage::External, true, is_builtin)
    }

    fn insert_function(
        &mut self,
        name: &str,
        ty: TypeId,
        linkage: Linkage,
        is_declaration: bool,
        is_builtin: bool,
    ) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        let value = self.alloc_value(Value {
            ty,
            name: Some(name.to_owned()),
            kind: ValueKind::Func(id),
        });

        let params: Vec<TypeId> = self.types.fn_params(ty).to_vec();
        let args = params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                self.alloc_value(Value {
                    ty: *param,
                    name: None,
                    kind: ValueKind::Argument { func: id, index },
                })
            })
            .collect();

        self.functions.push(Some(Function {
            name: name.to_owned(),
            ty,
            args,
            param_attrs: vec![ParamAttrs::empty(); params.len()],
            blocks: Vec::new(),
            linkage,
            is_declaration,
            is_builtin,
            value,
        }));

        id
    }

    /// Resolve a function id.
    pub fn function(&self, id: FuncId) -> &Function {
        self.functions[id.index()]
            .as_ref()
            .expect("function was removed")
    }

    /// Resolve a function id mutably.
    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        self.functions[id.index()]
            .as_mut()
            .expect("function was removed")
    }

    /// Remove a function; its id becomes invalid.
    pub fn remove_function(&mut self, id: FuncId) {
        self.functions[id.index()] = None;
    }

    /// Ids of all live functions, in insertion order.
    pub fn func_ids(&self) -> Vec<FuncId> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|_| FuncId(i as u32)))
            .collect()
    }

    /// First live function with the given symbol name.
    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.func_ids()
            .into_iter()
            .find(|id| self.function(*id).name == name)
    }

    /* GLOBALS */

    /// Add a global variable.
    pub fn add_global(
        &mut self,
        name: Option<&str>,
        allocated: TypeId,
        space: AddressSpace,
        init: Option<ValueId>,
        linkage: Linkage,
        unnamed_addr: bool,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        let ty = self.types.ptr(allocated, space);
        let value = self.alloc_value(Value {
            ty,
            name: name.map(str::to_owned),
            kind: ValueKind::Global(id),
        });

        self.globals.push(Some(Global {
            name: name.map(str::to_owned),
            allocated,
            space,
            init,
            linkage,
            unnamed_addr,
            value,
        }));

        id
    }

    /// Resolve a global id.
    pub fn global(&self, id: GlobalId) -> &Global {
        self.globals[id.index()]
            .as_ref()
            .expect("global was removed")
    }

    /// Resolve a global id mutably.
    pub fn global_mut(&mut self, id: GlobalId) -> &mut Global {
        self.globals[id.index()]
            .as_mut()
            .expect("global was removed")
    }

    /// Remove a global; its id becomes invalid.
    pub fn remove_global(&mut self, id: GlobalId) {
        self.globals[id.index()] = None;
    }

    /// Ids of all live globals, in insertion order.
    pub fn global_ids(&self) -> Vec<GlobalId> {
        self.globals
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|_| GlobalId(i as u32)))
            .collect()
    }

    /* BLOCKS */

    pub(crate) fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());

        id
    }

    /// Append a fresh block to a function.
    pub fn add_block(&mut self, func: FuncId) -> BlockId {
        let id = self.alloc_block();
        self.function_mut(func).blocks.push(id);

        id
    }

    /// Resolve a block id.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Resolve a block id mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Splice `blocks` into a function's textual order right after `after`.
    pub fn insert_blocks_after(
        &mut self,
        func: FuncId,
        after: BlockId,
        blocks: impl IntoIterator<Item = BlockId>,
    ) {
        let order = &mut self.function_mut(func).blocks;
        let at = order
            .iter()
            .position(|b| *b == after)
            .expect("anchor block must belong to the function");

        for (offset, block) in blocks.into_iter().enumerate() {
            order.insert(at + 1 + offset, block);
        }
    }

    /// Locate the block and in-block position of an instruction value.
    pub fn find_inst_block(&self, func: FuncId, inst: ValueId) -> Option<(BlockId, usize)> {
        for block in &self.function(func).blocks {
            if let Some(at) = self.block(*block).insts.iter().position(|v| *v == inst) {
                return Some((*block, at));
            }
        }

        None
    }

    /* USES */

    /// Rewrite every use of `old` into a use of `new`: instruction operands,
    /// constant expression components and metadata operands.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        for value in &mut self.values {
            match &mut value.kind {
                ValueKind::Inst(inst) => inst.for_each_operand_mut(|op| {
                    if *op == old {
                        *op = new;
                    }
                }),
                ValueKind::Const(Const::Aggregate(elems)) => {
                    for elem in elems {
                        if *elem == old {
                            *elem = new;
                        }
                    }
                }
                ValueKind::Const(Const::Gep { base, .. }) => {
                    if *base == old {
                        *base = new;
                    }
                }
                _ => {}
            }
        }

        for node in &mut self.metadata {
            for entry in &mut node.entries {
                for operand in entry {
                    if *operand == old {
                        *operand = new;
                    }
                }
            }
        }
    }

    /* METADATA */

    /// Resolve a named metadata node.
    pub fn named_metadata(&self, name: &str) -> Option<&NamedMetadata> {
        self.metadata.iter().find(|n| n.name == name)
    }

    /// Resolve a named metadata node mutably.
    pub fn named_metadata_mut(&mut self, name: &str) -> Option<&mut NamedMetadata> {
        self.metadata.iter_mut().find(|n| n.name == name)
    }

    /// Append an entry to a named metadata node, creating the node on first
    /// use.
    pub fn add_metadata_entry(&mut self, name: &str, entry: Vec<ValueId>) {
        if let Some(at) = self.metadata.iter().position(|n| n.name == name) {
            self.metadata[at].entries.push(entry);
        } else {
            self.metadata.push(NamedMetadata {
                name: name.to_owned(),
                entries: vec![entry],
            });
        }
    }

    /// Kernel entry functions: operand 0 of each `opencl.kernels` entry.
    pub fn kernel_functions(&self) -> Vec<FuncId> {
        let Some(node) = self.named_metadata(KERNELS_METADATA) else {
            return Vec::new();
        };

        node.entries
            .iter()
            .filter_map(|entry| entry.first())
            .filter_map(|v| match self.value(*v).kind {
                ValueKind::Func(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Pointer type helper: the fat-pointer aggregate for `ptr`.
    pub fn fat_pointer_of(&mut self, ptr: TypeId) -> TypeId {
        self.types.fat_pointer(ptr)
    }

    /// Resolve the type structure of a value's type.
    pub fn type_structure(&self, id: ValueId) -> &Type {
        self.types.get(self.type_of(id))
    }
}
