pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{attrs_with_type, seeded_bytes, sha256_hash};
