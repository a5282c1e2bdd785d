//! Identifier generation for cells and tenants.
//!
//! Identifiers must start with a lowercase letter because they end up in
//! infrastructure stack names.

use rand::Rng;
use rand::seq::SliceRandom;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn generate(tail_len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(tail_len + 1);
    id.push(*LETTERS.choose(&mut rng).unwrap_or(&b'c') as char);
    for _ in 0..tail_len {
        let idx = rng.gen_range(0..ALPHANUMERIC.len());
        id.push(ALPHANUMERIC[idx] as char);
    }
    id
}

/// A new cell id: one letter followed by 6 lowercase alphanumerics.
pub fn cell_id() -> String {
    generate(6)
}

/// A new tenant id: one letter followed by 8 lowercase alphanumerics.
pub fn tenant_id() -> String {
    generate(8)
}
