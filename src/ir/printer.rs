//! Textual rendering of modules for diagnostics and test failure output

use std::fmt;

use super::inst::Inst;
use super::module::Module;
use super::types::{Type, TypeId};
use super::value::{Const, ValueId, ValueKind};

struct TypeFmt<'m>(&'m Module, TypeId);

impl fmt::Display for TypeFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let TypeFmt(m, id) = *self;

        match m.types.get(id) {
            Type::Void => f.write_str("void"),
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::Float(bits) => write!(f, "f{bits}"),
            Type::Pointer { pointee, space } => {
                write!(f, "{} {space}*", TypeFmt(m, *pointee))
            }
            Type::Vector { elem, lanes } => write!(f, "<{lanes} x {}>", TypeFmt(m, *elem)),
            Type::Array { elem, len } => write!(f, "[{len} x {}]", TypeFmt(m, *elem)),
            Type::Struct { name: Some(n), .. } => write!(f, "%{n}"),
            Type::Struct { fields, .. } => {
                f.write_str("{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", TypeFmt(m, *field))?;
                }
                f.write_str(" }")
            }
            Type::Function { ret, params, .. } => {
                write!(f, "{} (", TypeFmt(m, *ret))?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", TypeFmt(m, *p))?;
                }
                f.write_str(")")
            }
        }
    }
}

struct ValueFmt<'m>(&'m Module, ValueId);

impl fmt::Display for ValueFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ValueFmt(m, id) = *self;

        match &m.value(id).kind {
            ValueKind::Const(Const::Int(v)) => write!(f, "{v}"),
            ValueKind::Const(Const::Float(v)) => write!(f, "{v}"),
            ValueKind::Const(Const::Null) => f.write_str("null"),
            ValueKind::Const(Const::Zero) => f.write_str("zeroinitializer"),
            ValueKind::Const(Const::Aggregate(elems)) => {
                f.write_str("{ ")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", ValueFmt(m, *e))?;
                }
                f.write_str(" }")
            }
            ValueKind::Const(Const::Gep { base, indices }) => {
                write!(f, "gep({}", ValueFmt(m, *base))?;
                for i in indices {
                    write!(f, ", {i}")?;
                }
                f.write_str(")")
            }
            ValueKind::Func(func) => write!(f, "@{}", m.function(*func).name),
            ValueKind::Global(_) | ValueKind::Argument { .. } | ValueKind::Inst(_) => {
                match m.name_of(id) {
                    Some(name) => write!(f, "%{name}"),
                    None => write!(f, "%{}", id.index()),
                }
            }
        }
    }
}

fn write_inst(f: &mut fmt::Formatter<'_>, m: &Module, id: ValueId) -> fmt::Result {
    let v = ValueFmt(m, id);

    let Some(inst) = m.inst(id) else {
        return writeln!(f, "  ; {id:?} is not an instruction");
    };

    match inst {
        Inst::Alloca { allocated } => {
            writeln!(f, "  {v} = alloca {}", TypeFmt(m, *allocated))
        }
        Inst::Load { ptr } => writeln!(f, "  {v} = load {}", ValueFmt(m, *ptr)),
        Inst::Store { value, ptr } => {
            writeln!(f, "  store {}, {}", ValueFmt(m, *value), ValueFmt(m, *ptr))
        }
        Inst::Gep { base, indices } => {
            write!(f, "  {v} = gep {}", ValueFmt(m, *base))?;
            for i in indices {
                write!(f, ", {}", ValueFmt(m, *i))?;
            }
            writeln!(f)
        }
        Inst::Cast { op, value } => writeln!(
            f,
            "  {v} = cast {op:?} {} to {}",
            ValueFmt(m, *value),
            TypeFmt(m, m.type_of(id))
        ),
        Inst::Bin { op, lhs, rhs } => writeln!(
            f,
            "  {v} = {op:?} {}, {}",
            ValueFmt(m, *lhs),
            ValueFmt(m, *rhs)
        ),
        Inst::ICmp { pred, lhs, rhs } => writeln!(
            f,
            "  {v} = icmp {pred:?} {}, {}",
            ValueFmt(m, *lhs),
            ValueFmt(m, *rhs)
        ),
        Inst::FCmp { pred, lhs, rhs } => writeln!(
            f,
            "  {v} = fcmp {pred:?} {}, {}",
            ValueFmt(m, *lhs),
            ValueFmt(m, *rhs)
        ),
        Inst::Br { dest } => writeln!(f, "  br {dest:?}"),
        Inst::CondBr {
            cond,
            then_dest,
            else_dest,
        } => writeln!(
            f,
            "  br {}, {then_dest:?}, {else_dest:?}",
            ValueFmt(m, *cond)
        ),
        Inst::Ret { value: Some(value) } => writeln!(f, "  ret {}", ValueFmt(m, *value)),
        Inst::Ret { value: None } => writeln!(f, "  ret void"),
        Inst::Phi { incoming } => {
            write!(f, "  {v} = phi")?;
            for (i, (value, pred)) in incoming.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, " [{}, {pred:?}]", ValueFmt(m, *value))?;
            }
            writeln!(f)
        }
        Inst::Call { callee, args, .. } => {
            write!(f, "  {v} = call {}(", ValueFmt(m, *callee))?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", ValueFmt(m, *a))?;
            }
            writeln!(f, ")")
        }
        Inst::ExtractValue { agg, indices } => writeln!(
            f,
            "  {v} = extractvalue {}, {indices:?}",
            ValueFmt(m, *agg)
        ),
        Inst::InsertValue { agg, elem, indices } => writeln!(
            f,
            "  {v} = insertvalue {}, {}, {indices:?}",
            ValueFmt(m, *agg),
            ValueFmt(m, *elem)
        ),
        Inst::Mem {
            intrinsic,
            dst,
            src,
            len,
            align,
        } => writeln!(
            f,
            "  mem.{intrinsic:?} {}, {}, {}, align {align}",
            ValueFmt(m, *dst),
            ValueFmt(m, *src),
            ValueFmt(m, *len)
        ),
        Inst::Unsupported(u) => writeln!(f, "  {}", u.describe()),
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.global_ids() {
            let g = self.global(id);
            let name = g.name.as_deref().unwrap_or("<anon>");

            write!(
                f,
                "@{name} = {:?} {} {}",
                g.linkage,
                g.space,
                TypeFmt(self, g.allocated)
            )?;
            match g.init {
                Some(init) => writeln!(f, " {}", ValueFmt(self, init))?,
                None => writeln!(f, " external")?,
            }
        }

        for id in self.func_ids() {
            let func = self.function(id);

            write!(f, "\n{:?} @{}(", func.linkage, func.name)?;
            for (i, arg) in func.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(
                    f,
                    "{} {}",
                    TypeFmt(self, self.type_of(*arg)),
                    ValueFmt(self, *arg)
                )?;
            }

            if func.is_declaration {
                writeln!(f, ") declare")?;
                continue;
            }

            writeln!(f, ") {{")?;
            for block in &func.blocks {
                writeln!(f, "{block:?}:")?;
                for inst in &self.block(*block).insts {
                    write_inst(f, self, *inst)?;
                }
            }
            writeln!(f, "}}")?;
        }

        Ok(())
    }
}
