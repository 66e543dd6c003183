pub mod dedup;
pub mod processor;

pub use dedup::Deduplicator;
pub use processor::{merged_content, MessageProcessor, ProcessorStats};
