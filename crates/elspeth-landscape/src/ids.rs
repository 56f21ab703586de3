// crates/elspeth-landscape/src/ids.rs
// ============================================================================
// Module: Landscape Identifier Generation
// Description: Random opaque identifier minting for every recorder-created entity.
// Purpose: Give the recorder collision-free primary keys without a central
// sequence, so inserts never conflict under the single-writer model.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! Every primary key the recorder mints is `"<prefix>-<32 hex chars>"`: 16
//! random bytes from the OS CSPRNG, hex-encoded. Collision probability is
//! negligible at any run's scale, so the writer never needs to check for
//! an existing row before inserting (`spec.md` §5, "IDs are generated by
//! the writer and inserts never conflict").

// ============================================================================
// SECTION: Imports
// ============================================================================

use rand::RngCore;
use rand::rngs::OsRng;

// ============================================================================
// SECTION: Generation
// ============================================================================

/// Generates a random opaque identifier with the given `prefix`.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    let mut bytes = [0_u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(prefix.len() + 1 + bytes.len() * 2);
    hex.push_str(prefix);
    hex.push('-');
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only panic-based assertions are permitted."
    )]
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_are_distinct() {
        let a = new_id("run");
        let b = new_id("run");
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }
}
