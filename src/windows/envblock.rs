//! Environment block assembly for `CreateProcessW`.
//!
//! Grounded on `portable-pty::cmdbuilder::CommandBuilder::environment_block`,
//! reworked to build from `SpawnOptions::environment` (a `BTreeMap`, so
//! already sorted) merged onto the current process's environment, and to
//! honor the "empty value unsets the variable" convention spec.md §3
//! assigns to that map.

use std::collections::BTreeMap;
use std::env;
use std::os::windows::ffi::OsStrExt;

/// Build a sorted, null-separated, double-null-terminated UTF-16LE
/// environment block: the base process environment with `overrides`
/// applied on top (case-insensitively, per Windows convention), entries
/// with an empty value removed entirely.
pub fn build_block(overrides: &BTreeMap<String, String>) -> Vec<u16> {
    // BTreeMap keyed by uppercased name so over rides replace inherited
    // vars regardless of casing, while the value written out keeps
    // whichever casing was supplied last.
    let mut merged: BTreeMap<String, (String, String)> = BTreeMap::new();

    for (key, value) in env::vars() {
        merged.insert(key.to_ascii_uppercase(), (key, value));
    }
    for (key, value) in overrides {
        if value.is_empty() {
            merged.remove(&key.to_ascii_uppercase());
        } else {
            merged.insert(key.to_ascii_uppercase(), (key.clone(), value.clone()));
        }
    }

    let mut block = Vec::new();
    for (_, (key, value)) in merged {
        block.extend(key.encode_utf16());
        block.push('=' as u16);
        block.extend(value.encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}

/// UTF-16LE-encode a single path-like value with a nul terminator, for
/// fields (`lpCurrentDirectory`) that want a bare wide string rather than
/// a block.
pub fn wide_nul(s: &std::ffi::OsStr) -> Vec<u16> {
    let mut v: Vec<u16> = s.encode_wide().collect();
    v.push(0);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_unsets_an_inherited_variable() {
        // SAFETY: test-only, single-threaded set/remove of a process env var.
        unsafe {
            env::set_var("PTY_HOST_TEST_VAR", "present");
        }
        let mut overrides = BTreeMap::new();
        overrides.insert("PTY_HOST_TEST_VAR".to_string(), String::new());

        let block = build_block(&overrides);
        let text = String::from_utf16(&block[..block.len().saturating_sub(1)]).unwrap();
        assert!(!text.contains("PTY_HOST_TEST_VAR="));

        unsafe {
            env::remove_var("PTY_HOST_TEST_VAR");
        }
    }

    #[test]
    fn override_replaces_inherited_value() {
        unsafe {
            env::set_var("PTY_HOST_TEST_VAR2", "old");
        }
        let mut overrides = BTreeMap::new();
        overrides.insert("PTY_HOST_TEST_VAR2".to_string(), "new".to_string());

        let block = build_block(&overrides);
        let text = String::from_utf16_lossy(&block);
        assert!(text.contains("PTY_HOST_TEST_VAR2=new"));
        assert!(!text.contains("PTY_HOST_TEST_VAR2=old"));

        unsafe {
            env::remove_var("PTY_HOST_TEST_VAR2");
        }
    }

    #[test]
    fn block_is_double_null_terminated() {
        let block = build_block(&BTreeMap::new());
        assert_eq!(block.last(), Some(&0));
    }
}
