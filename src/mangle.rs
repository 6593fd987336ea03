//! Builtin symbol demangling and safe-twin mangling
//!
//! Only the Itanium length-prefix form `_Z<len><name><params>` is parsed; the
//! parameter suffix is carried verbatim. Safe twins use the custom scheme
//! `<base>__safe__<original-suffix>`.

use crate::consts::SAFE_DISCRIMINATOR;

/// Split an Itanium-style symbol into `(name, suffix)`.
///
/// Returns `None` for symbols that are not length-prefix mangled, including
/// malformed ones, which are then treated as plain names.
fn split_mangled(symbol: &str) -> Option<(&str, &str)> {
    let rest = symbol.strip_prefix("_Z")?;
    let digits = rest.chars().take_while(char::is_ascii_digit).count();

    if digits == 0 {
        return None;
    }

    let len: usize = rest[..digits].parse().ok()?;
    if len == 0 || rest.len() < digits + len {
        return None;
    }

    Some((&rest[digits..digits + len], &rest[digits + len..]))
}

/// Extract the unqualified name from a mangled symbol.
///
/// Unmangled input is returned unchanged, which also makes the operation
/// idempotent over plain names.
pub fn demangle(symbol: &str) -> &str {
    split_mangled(symbol).map_or(symbol, |(name, _)| name)
}

/// The mangled parameter suffix of a symbol, or `""` when absent.
pub fn mangling_suffix(symbol: &str) -> &str {
    split_mangled(symbol).map_or("", |(_, suffix)| suffix)
}

/// Symbol under which the safe twin of an unsafe builtin is expected.
pub fn safe_twin_symbol(symbol: &str) -> String {
    format!(
        "{}{}{}",
        demangle(symbol),
        SAFE_DISCRIMINATOR,
        mangling_suffix(symbol)
    )
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn extracts_length_prefixed_name() {
        assert_eq!(demangle("_Z7vstore4Dv4_fjPU3AS1f"), "vstore4");
        assert_eq!(mangling_suffix("_Z7vstore4Dv4_fjPU3AS1f"), "Dv4_fjPU3AS1f");
        assert_eq!(demangle("_Z6vload2jPKU3AS1i"), "vload2");
    }

    #[test]
    fn unmangled_names_pass_through() {
        assert_eq!(demangle("barrier"), "barrier");
        assert_eq!(mangling_suffix("barrier"), "");
        assert_eq!(demangle("_Zmain"), "_Zmain");
        assert_eq!(demangle("_Z0"), "_Z0");
        assert_eq!(demangle("_Z9short"), "_Z9short");
    }

    #[test]
    fn safe_twin_symbols_keep_the_suffix() {
        assert_eq!(
            safe_twin_symbol("_Z7vstore4Dv4_fjPU3AS1f"),
            "vstore4__safe__Dv4_fjPU3AS1f"
        );
        assert_eq!(safe_twin_symbol("sincos"), "sincos__safe__");
    }

    #[quickcheck]
    fn demangling_is_idempotent(name: String, suffix: String) -> bool {
        // Mangled identifiers are alphanumeric; constrain the generated parts
        // so the length prefix stays well-formed.
        let name: String = name.chars().filter(char::is_ascii_alphabetic).collect();
        let suffix: String = suffix.chars().filter(char::is_ascii_alphanumeric).collect();

        let plain_ok = demangle(&name) == name;

        if name.is_empty() {
            return plain_ok;
        }

        let mangled = format!("_Z{}{}{}", name.len(), name, suffix);
        let once = demangle(&mangled).to_owned();

        plain_ok && once == name && demangle(&once) == once
    }
}
