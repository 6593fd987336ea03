//! Pass abort conditions
//!
//! No recovery is attempted anywhere: the first error terminates the pass and
//! the module must be discarded by the caller.

use thiserror::Error;

/// Conditions that abort the transformation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    /// The module uses a construct the pass cannot express: variadic
    /// signatures, pointer or array returns, fence/va_arg/atomic
    /// instructions, or a global initializer referencing other allocations.
    #[error("unsupported construct in `{function}`: {detail}")]
    UnsupportedConstruct {
        /// Function (or global) hosting the construct.
        function: String,
        /// Human-readable description of the offending construct.
        detail: String,
    },

    /// Strict mode found a call to an external declaration that is not a
    /// recognized builtin.
    #[error("call to unresolved external function `{0}`")]
    UnresolvedExternal(String),

    /// A call to a half-precision vector builtin remained after retargeting.
    #[error("no safe implementation available for forbidden builtin `{0}`")]
    ForbiddenBuiltin(String),

    /// One value was reached by two unequal bounds intervals.
    #[error("assigning pointers from different ranges to the same variable `{value}`")]
    AmbiguousBounds {
        /// Name (or printer id) of the offending value.
        value: String,
    },

    /// Strict mode could not derive bounds for a pointer.
    #[error("no bounds known for pointer `{value}` in `{function}`")]
    MissingBounds {
        /// Function hosting the use.
        function: String,
        /// Name (or printer id) of the unbounded pointer.
        value: String,
    },

    /// More than one candidate interval applies at a single check site; the
    /// check generator supports exactly one.
    #[error("more than one candidate bounds interval for a memory access in `{function}`")]
    MultiIntervalCheck {
        /// Function hosting the check site.
        function: String,
    },
}

impl PassError {
    /// Flag whether the error names a construct the input could avoid, as
    /// opposed to a limit of the check generator.
    pub const fn is_input_defect(&self) -> bool {
        !matches!(self, Self::MultiIntervalCheck { .. })
    }
}

/// Result alias used across the pass.
pub type PassResult<T> = Result<T, PassError>;
