//! # simwps
//!
//! **Configuration-Driven Wrapper for Containerised Simulators**
//!
//! This crate turns a JSON description of a command line program (its
//! image, working directory, command, inputs and outputs) into a callable
//! process with a content-addressed result cache. Identical requests are
//! answered from the cache without running the program again.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              simwps                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  config.json ──parse──► Configuration (inputs, outputs, handlers)   │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                    CachedProcess                          │      │
//! │  │  validate inputs → CacheKeyGenerator → ResultCache        │      │
//! │  │        │ miss                                             │      │
//! │  │        ▼                                                  │      │
//! │  │  argv / stdin / files ──► ProcessRunner ──► handlers      │      │
//! │  │                                   │                       │      │
//! │  │                      format converters → outputs → cache  │      │
//! │  └───────────────────────────────────────────────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                        Runner Backends                              │
//! │  ┌──────────────────────┐        ┌──────────────────────┐           │
//! │  │    DockerRunner      │        │     LocalRunner      │           │
//! │  │ container per run    │        │ host process in a    │           │
//! │  │ caps dropped, rm'd   │        │ scratch directory    │           │
//! │  └──────────────────────┘        └──────────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Cache Keys
//!
//! A key is the SHA-256 over the configuration and the canonical form of the
//! input values (see [`hash`]). Equal keys mean equal results:
//!
//! - declaration order of inputs and outputs matters,
//! - XML and JSON values that differ only in layout share a key,
//! - generated file names never enter the key,
//! - the resolved image id and the runner version do.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use simwps::{CacheKeyGenerator, CachedProcess, DiskCache, LocalRunner, OptionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> simwps::Result<()> {
//!     let registry = Arc::new(OptionRegistry::default());
//!     let config = simwps::parse::parse_configuration(CONFIG_JSON, &registry)?;
//!     let process = CachedProcess::new(
//!         Arc::new(config),
//!         CacheKeyGenerator::new(Arc::clone(&registry)),
//!         Arc::new(DiskCache::new()?),
//!         Arc::new(LocalRunner::new()),
//!     );
//!     let output = process.run(&inputs, &BTreeSet::new()).await?;
//!     println!("{} (cached: {})", output.cache_key, output.from_cache);
//!     Ok(())
//! }
//! ```

pub mod configuration;
pub mod constants;
pub mod data;
pub mod error;
pub mod format;
pub mod handler;
pub mod hash;
pub mod image;
pub mod options;
pub mod parameter;
pub mod parse;
pub mod process;
pub mod runtime;
pub mod settings;
pub mod storage;
pub mod version;

pub mod runtimes;

// Re-exports
pub use configuration::{Configuration, ConfigurationBuilder};
pub use data::{BindingType, BoundingBox, Data, InputValues, OutputValues, Shapefile};
pub use error::{Error, Result};
pub use hash::{CacheKeyGenerator, KeyEnvironment};
pub use image::{DockerImageIdLookup, ImageIdLookup, NoImageIdLookup, StaticImageIdLookup};
pub use options::{HandlerSlot, OptionRegistry};
pub use parameter::{
    FilePath, InputMechanism, InputParameter, OutputMechanism, OutputParameter, PathArgument,
    Validator,
};
pub use process::{CachedProcess, ProcessOutput};
pub use runtime::{InputFile, ProcessRunner, RunOutput, RunRequest};
pub use runtimes::{DockerRunner, LocalRunner, RunnerRegistry};
pub use settings::Settings;
pub use storage::{CachedResult, DiskCache, GcStats, MemoryCache, ResultCache};
pub use version::{DockerVersionHandler, NoVersionHandler, StaticVersionHandler, VersionHandler};
