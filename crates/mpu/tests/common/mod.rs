pub mod fixtures;
pub mod memory_store;

#[allow(unused_imports)]
pub use fixtures::{
    FixedJitter, backend_with, buckets, completed_parts, config_with_cleanup, part_body, session,
    upload_parts,
};
#[allow(unused_imports)]
pub use memory_store::{MemoryStore, StoredObject};
