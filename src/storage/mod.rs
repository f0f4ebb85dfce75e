pub mod elastic;
pub mod memory;
pub mod traits;

pub use elastic::ElasticsearchStore;
pub use memory::InMemoryDocumentStore;
pub use traits::{DocumentStore, UpsertOutcome};
