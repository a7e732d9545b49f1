#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod common_part;
pub mod concat;
pub mod config;
pub mod constant;
pub mod content;
pub mod fixer;
pub mod generate;
pub mod logging;
pub mod queue;
pub mod regenerate;
pub mod resolve;
pub mod source;

pub use common_part::common_part_in;
pub use concat::{ConcatStream, concat};
pub use config::{ConfigError, ManifestConfig};
pub use constant::constant;
pub use fixer::{ManifestFixer, fix_html, fix_stream};
pub use generate::{GenerateError, GenerateOptions, ManifestStream, generate, generate_in};
pub use queue::{Next, Queue};
pub use regenerate::{GenerationJob, Regenerator, WatchSession};
pub use source::{Source, SourceError};
