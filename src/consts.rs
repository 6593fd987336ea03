//! Pass parameters: target address-space tables and builtin name sets

use crate::ir::AddressSpace;

/* ADDRESS SPACE NUMBERING */

/// Numeric address-space assignment of the compilation target.
///
/// Pointer types carry an [`AddressSpace`] tag; the concrete number emitted
/// for it is a target-dependent table. Both recognized tables are exact
/// mappings in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressSpaceMap {
    /// Per-work-item stack memory.
    pub private: u32,
    /// Host-shared device memory.
    pub global: u32,
    /// Read-only memory.
    pub constant: u32,
    /// Work-group shared memory.
    pub local: u32,
    /// Unqualified pointers.
    pub generic: u32,
}

/// Numbering used by the SPIR convention.
pub const SPIR_ADDRESS_SPACES: AddressSpaceMap = AddressSpaceMap {
    private: 0,
    global: 1,
    constant: 2,
    local: 3,
    generic: 4,
};

/// Numbering used by the NVPTX convention.
pub const NVPTX_ADDRESS_SPACES: AddressSpaceMap = AddressSpaceMap {
    generic: 0,
    global: 1,
    local: 3,
    constant: 4,
    private: 5,
};

#[cfg(all(feature = "spir", feature = "nvptx"))]
compile_error!("features `spir` and `nvptx` are mutually exclusive");

#[cfg(not(any(feature = "spir", feature = "nvptx")))]
compile_error!("one of the features `spir` or `nvptx` must be enabled");

impl AddressSpaceMap {
    /// The table selected at build time.
    pub const fn target() -> &'static Self {
        if cfg!(feature = "nvptx") {
            &NVPTX_ADDRESS_SPACES
        } else {
            &SPIR_ADDRESS_SPACES
        }
    }

    /// Number assigned to `space`.
    pub const fn number(&self, space: AddressSpace) -> u32 {
        match space {
            AddressSpace::Private => self.private,
            AddressSpace::Global => self.global,
            AddressSpace::Constant => self.constant,
            AddressSpace::Local => self.local,
            AddressSpace::Generic => self.generic,
        }
    }

    /// Address space assigned to `number`, if any.
    pub const fn space(&self, number: u32) -> Option<AddressSpace> {
        if number == self.private {
            Some(AddressSpace::Private)
        } else if number == self.global {
            Some(AddressSpace::Global)
        } else if number == self.constant {
            Some(AddressSpace::Constant)
        } else if number == self.local {
            Some(AddressSpace::Local)
        } else if number == self.generic {
            Some(AddressSpace::Generic)
        } else {
            None
        }
    }
}

/* FAT POINTERS */

/// Struct name marking fat-pointer aggregates in the type table.
pub const FAT_POINTER_STRUCT: &str = "safe_ptr";

/// Field index of the working pointer.
pub const FAT_FIELD_CURRENT: u32 = 0;

/// Field index of the first valid address.
pub const FAT_FIELD_MIN: u32 = 1;

/// Field index of the first invalid address.
pub const FAT_FIELD_MAX: u32 = 2;

/* MODULE METADATA */

/// Named metadata node whose entries list the kernel entry functions.
pub const KERNELS_METADATA: &str = "opencl.kernels";

/// Value-name prefix recognized as the host `argv` chain in permissive mode.
pub const ARGV_NAME_PREFIX: &str = "argv";

/* BUILTINS */

/// Mangled-name discriminator of a memory-safe builtin replacement.
pub const SAFE_DISCRIMINATOR: &str = "__safe__";

/// Builtins that dereference a raw pointer argument and must be retargeted to
/// a safe twin taking fat pointers instead.
pub const UNSAFE_BUILTINS: &[&str] = &[
    "vload2",
    "vload3",
    "vload4",
    "vload8",
    "vload16",
    "vstore2",
    "vstore3",
    "vstore4",
    "vstore8",
    "vstore16",
    "async_work_group_copy",
    "async_work_group_strided_copy",
    "wait_group_events",
    "atomic_add",
    "atomic_sub",
    "atomic_xchg",
    "atomic_inc",
    "atomic_dec",
    "atomic_cmpxchg",
    "atomic_min",
    "atomic_max",
    "atomic_and",
    "fract",
    "frexp",
    "lgamma_r",
    "modf",
    "remquo",
    "sincos",
    "printf",
];

/// Builtins with no safe counterpart; any remaining call aborts the pass.
pub const FORBIDDEN_BUILTINS: &[&str] = &[
    "vload_half",
    "vload_half2",
    "vload_half3",
    "vload_half4",
    "vload_half8",
    "vload_half16",
    "vstore_half",
    "vstore_half2",
    "vstore_half3",
    "vstore_half4",
    "vstore_half8",
    "vstore_half16",
];

/// Builtins without pointer parameters; calls to them pass through untouched.
pub const POINTERLESS_BUILTINS: &[&str] = &[
    "get_global_id",
    "get_local_id",
    "get_group_id",
    "get_global_size",
    "get_local_size",
    "get_num_groups",
    "get_work_dim",
    "barrier",
    "mem_fence",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spir_numbering_is_exact_both_ways() {
        for space in AddressSpace::ALL {
            let n = SPIR_ADDRESS_SPACES.number(space);
            assert_eq!(SPIR_ADDRESS_SPACES.space(n), Some(space));
        }
        assert_eq!(SPIR_ADDRESS_SPACES.space(9), None);
    }

    #[test]
    fn nvptx_numbering_is_exact_both_ways() {
        for space in AddressSpace::ALL {
            let n = NVPTX_ADDRESS_SPACES.number(space);
            assert_eq!(NVPTX_ADDRESS_SPACES.space(n), Some(space));
        }
        assert_eq!(NVPTX_ADDRESS_SPACES.space(2), None);
    }

    #[test]
    fn builtin_sets_are_disjoint() {
        for name in UNSAFE_BUILTINS {
            assert!(!FORBIDDEN_BUILTINS.contains(name));
            assert!(!POINTERLESS_BUILTINS.contains(name));
        }
    }
}
