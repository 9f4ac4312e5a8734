pub mod memory;
pub mod sharepoint;
pub mod supabase;

pub use memory::{MemoryFileStore, MemoryMetadataStore, StoredObject};
pub use sharepoint::GraphFileStore;
pub use supabase::RestMetadataStore;
