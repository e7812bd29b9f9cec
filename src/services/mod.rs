//! External service integrations and naming logic

pub mod extraction;
pub mod file_classifier;
pub mod filename_parser;
pub mod incremental;
pub mod name_resolver;
pub mod ollama;
pub mod openlist;
pub mod rate_limiter;
pub mod refresh;

pub use extraction::{MediaKind, NameExtractionResult, NameExtractor};
pub use file_classifier::FileType;
pub use filename_parser::RuleExtractor;
pub use incremental::{IncrementalTracker, JsonStateStore, MemoryStateStore, TaskState, TaskStateStore};
pub use name_resolver::{NameResolution, NameResolver, RenameRule};
pub use ollama::{OllamaConfig, OllamaExtractor};
pub use openlist::{DirectoryListing, OpenListClient, RemoteFile, RemoteSource};
pub use rate_limiter::{RateLimitConfig, RetryConfig};
pub use refresh::{EmbyClient, MediaServer, RefreshNotifier, RefreshReport, RefreshStatus};
