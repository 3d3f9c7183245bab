//! # Cache Key Generation
//!
//! Derives a stable fingerprint from a [`Configuration`] and the realized
//! input values of one request. Equal fingerprints mean a cached result may
//! be returned instead of running the program again.
//!
//! Keys are computed in two steps. [`CacheKeyGenerator::environment`] asks
//! the injected collaborators for the resolved image id and the versions;
//! the docker backed ones talk to the daemon and are bounded by a timeout.
//! [`CacheKeyGenerator::hash`] then folds that [`KeyEnvironment`] with the
//! configuration and the request, without any I/O.
//!
//! ## Folding Order
//!
//! ```text
//! layout version
//! process identifier
//! image id (resolved) ── runner version ── service version
//! working directory ── command ── default flags
//! for each input, in declaration order:
//!     identifier, binding, optionality, mechanism
//!     ├── commandLineArgument: flag, rendered argv tokens
//!     ├── stdin:               sha256 of the canonical bytes, path salt
//!     └── file:                fixed path unless passed on argv, file contents
//!     (no value: "absent")
//! for each output, in declaration order:
//!     identifier, binding, optionality, mechanism (+ file path)
//! handler option names (stderr, exitValue, stdout)
//! requested outputs, sorted
//! ```
//!
//! Every field is folded as `len(tag) tag len(value) value`, so adjacent
//! fields can never run into each other.
//!
//! ## What Never Enters the Key
//!
//! - Generated file names: a file input passed on argv gets a fresh name per
//!   run, only its contents are folded.
//! - Handler objects: only the option name they were created from.
//! - Raw request bytes of complex values: the canonical form from
//!   [`format::to_bytes`] is folded, so layout-only differences share a key.
//!
//! ## Thread Safety
//!
//! [`CacheKeyGenerator::hash`] is synchronous and takes `&self`; one
//! generator can be shared across request handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::configuration::Configuration;
use crate::constants::{ABSENT_PLACEHOLDER, CACHE_KEY_LAYOUT_VERSION};
use crate::data::{Data, InputValues};
use crate::error::{Error, Result};
use crate::format;
use crate::image::{ImageIdLookup, NoImageIdLookup};
use crate::options::{HandlerSlot, OptionRegistry};
use crate::parameter::{FilePath, InputMechanism, InputParameter, OutputMechanism};
use crate::version::{NoVersionHandler, VersionHandler};

/// Placeholder path used to lay out multi-file values while hashing.
const HASH_FILE_STEM: &str = "input";

/// Image and version state a key depends on, resolved before hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEnvironment {
    /// Resolved image id; the reference is folded when `None`.
    pub image_id: Option<String>,
    pub runner_version: Option<String>,
    pub service_version: Option<String>,
}

/// Computes cache keys for process requests.
#[derive(Clone)]
pub struct CacheKeyGenerator {
    registry: Arc<OptionRegistry>,
    image_lookup: Arc<dyn ImageIdLookup>,
    versions: Arc<dyn VersionHandler>,
}

impl CacheKeyGenerator {
    /// Creates a generator that folds the image reference and no versions.
    pub fn new(registry: Arc<OptionRegistry>) -> Self {
        Self {
            registry,
            image_lookup: Arc::new(NoImageIdLookup),
            versions: Arc::new(NoVersionHandler),
        }
    }

    /// Resolves image references through the given lookup.
    pub fn with_image_lookup(mut self, lookup: Arc<dyn ImageIdLookup>) -> Self {
        self.image_lookup = lookup;
        self
    }

    /// Folds versions reported by the given handler.
    pub fn with_version_handler(mut self, versions: Arc<dyn VersionHandler>) -> Self {
        self.versions = versions;
        self
    }

    /// Resolves the image id and versions for a configuration.
    ///
    /// # Errors
    ///
    /// Fails when the image lookup fails or times out. A missing runner
    /// version is not an error.
    pub async fn environment(&self, config: &Configuration) -> Result<KeyEnvironment> {
        let image_id = self.image_lookup.lookup_image_id(config.image()).await?;
        Ok(KeyEnvironment {
            image_id,
            runner_version: self.versions.runner_version().await,
            service_version: self.versions.service_version(),
        })
    }

    /// Computes the key for a request that wants all outputs.
    pub fn hash(
        &self,
        config: &Configuration,
        environment: &KeyEnvironment,
        inputs: &InputValues,
    ) -> Result<String> {
        self.hash_for_outputs(config, environment, inputs, &BTreeSet::new())
    }

    /// Computes the key for a request that wants the given outputs.
    ///
    /// An empty set means all outputs.
    ///
    /// # Errors
    ///
    /// Only configuration problems fail: a parameter without mechanism, a
    /// generated file path nothing refers to, or a handler option unknown to
    /// the registry. Values that cannot be rendered fail with the
    /// conversion error the run itself would hit.
    pub fn hash_for_outputs(
        &self,
        config: &Configuration,
        environment: &KeyEnvironment,
        inputs: &InputValues,
        requested: &BTreeSet<String>,
    ) -> Result<String> {
        let mut digest = KeyDigest::new();

        digest.text("layout", CACHE_KEY_LAYOUT_VERSION);
        digest.text("process", config.identifier());
        digest.text(
            "image",
            environment.image_id.as_deref().unwrap_or(config.image()),
        );
        digest.optional("runner.version", environment.runner_version.as_deref());
        digest.optional("service.version", environment.service_version.as_deref());

        digest.text("workdir", config.working_directory());
        digest.list("command", config.command());
        digest.list("flags", config.default_flags());

        digest.count("inputs", config.inputs().len());
        for input in config.inputs() {
            let value = inputs.get(input.identifier()).and_then(|v| v.first());
            fold_input(&mut digest, input, value)?;
        }

        digest.count("outputs", config.outputs().len());
        for output in config.outputs() {
            let mechanism = output.mechanism()?;
            digest.text("output", output.identifier());
            digest.text("binding", output.binding().key());
            digest.flag("optional", output.is_optional());
            digest.text("mechanism", mechanism.discriminator());
            if let OutputMechanism::File { path } = mechanism {
                digest.text("path", path);
            }
        }

        let handlers = [
            (HandlerSlot::Stderr, config.stderr_handler().map(|h| h.kind())),
            (
                HandlerSlot::ExitValue,
                config.exit_value_handler().map(|h| h.kind()),
            ),
            (HandlerSlot::Stdout, config.stdout_handler().map(|h| h.kind())),
        ];
        for (slot, kind) in handlers {
            if let Some(kind) = kind
                && !self.registry.knows_handler(slot, kind)
            {
                return Err(Error::UnknownHandler {
                    kind: slot.as_str().to_string(),
                    name: kind.to_string(),
                });
            }
            digest.optional(slot.as_str(), kind);
        }

        digest.count("requested", requested.len());
        for id in requested {
            digest.text("requested", id);
        }

        let key = digest.finish();
        debug!(process = config.identifier(), key = %key, "computed cache key");
        Ok(key)
    }
}

fn fold_input(digest: &mut KeyDigest, input: &InputParameter, value: Option<&Data>) -> Result<()> {
    let mechanism = input.mechanism()?;

    digest.text("input", input.identifier());
    digest.text("binding", input.binding().key());
    digest.flag("optional", input.is_optional());
    digest.text("mechanism", mechanism.discriminator());

    match mechanism {
        InputMechanism::CommandLineArgument { flag } => {
            digest.optional("flag", flag.as_deref());
            match value {
                Some(value) => {
                    digest.text("value.binding", value.binding_type().key());
                    digest.list("argv", &format::to_command_line(value, flag.as_deref())?);
                }
                None => digest.text("value", ABSENT_PLACEHOLDER),
            }
        }
        InputMechanism::Stdin => {
            digest.optional("path", None);
            match value {
                Some(value) => {
                    digest.text("value.binding", value.binding_type().key());
                    let bytes = format::to_bytes(value)?;
                    digest.field("stdin.sha256", &Sha256::digest(&bytes));
                }
                None => digest.text("value", ABSENT_PLACEHOLDER),
            }
        }
        InputMechanism::File { path, argument } => {
            match (argument, path) {
                // The path travels on argv; only the content matters.
                (Some(argument), _) => digest.optional("argv.flag", argument.flag.as_deref()),
                (None, FilePath::Fixed(path)) => digest.text("path", path),
                (None, FilePath::Generated) => {
                    return Err(Error::Configuration(format!(
                        "input '{}' is written to a generated file that is not passed to the program",
                        input.identifier()
                    )));
                }
            }
            match value {
                Some(value) => {
                    digest.text("value.binding", value.binding_type().key());
                    let files = format::to_files(value, HASH_FILE_STEM)?;
                    digest.count("files", files.len());
                    for (name, content) in &files {
                        digest.text("file", name);
                        digest.field("content", content);
                    }
                }
                None => digest.text("value", ABSENT_PLACEHOLDER),
            }
        }
    }
    Ok(())
}

/// Incremental SHA-256 over tagged, length-prefixed fields.
struct KeyDigest {
    sha: Sha256,
}

impl KeyDigest {
    fn new() -> Self {
        Self { sha: Sha256::new() }
    }

    fn field(&mut self, tag: &str, value: &[u8]) {
        self.sha.update((tag.len() as u64).to_be_bytes());
        self.sha.update(tag.as_bytes());
        self.sha.update((value.len() as u64).to_be_bytes());
        self.sha.update(value);
    }

    fn text(&mut self, tag: &str, value: &str) {
        self.field(tag, value.as_bytes());
    }

    fn flag(&mut self, tag: &str, value: bool) {
        self.field(tag, &[u8::from(value)]);
    }

    fn count(&mut self, tag: &str, n: usize) {
        self.field(tag, &(n as u64).to_be_bytes());
    }

    fn optional(&mut self, tag: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                let mut bytes = Vec::with_capacity(value.len() + 1);
                bytes.push(1);
                bytes.extend_from_slice(value.as_bytes());
                self.field(tag, &bytes);
            }
            None => self.field(tag, &[0]),
        }
    }

    fn list(&mut self, tag: &str, items: &[String]) {
        self.count(tag, items.len());
        for item in items {
            self.text(tag, item);
        }
    }

    fn finish(self) -> String {
        hex::encode(self.sha.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_do_not_alias() {
        let mut a = KeyDigest::new();
        a.text("x", "ab");
        a.text("x", "c");
        let mut b = KeyDigest::new();
        b.text("x", "a");
        b.text("x", "bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_optional_none_differs_from_empty() {
        let mut a = KeyDigest::new();
        a.optional("flag", None);
        let mut b = KeyDigest::new();
        b.optional("flag", Some(""));
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_key_is_fixed_width_hex() {
        let key = KeyDigest::new().finish();
        assert_eq!(key.len(), crate::constants::CACHE_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
