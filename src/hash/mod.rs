// ABOUTME: Change detection - canonical hashing, hash persistence and the change gate
// ABOUTME: Decides whether an entity's state changed since it was last synchronized

pub mod canonical;
pub mod file;
pub mod gate;
pub mod registry;
pub mod snapshot;
pub mod store;

pub use canonical::{digest_hex, Canonicalizer};
pub use file::{hash_bytes, hash_file, locate_attachment};
pub use gate::{ChangeGate, Decision};
pub use registry::{EntityDescriptor, EntityRegistry};
pub use snapshot::{EntitySnapshot, FieldValue};
pub use store::{HashRecord, HashStore, SqliteHashStore};
