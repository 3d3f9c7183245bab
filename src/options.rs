//! # Option Registry
//!
//! The fixed vocabulary a configuration document may use: handler option
//! names and the binding types each delivery or collection mechanism
//! supports. One registry is built at startup and passed explicitly to the
//! parser and the cache key generator; nothing here is global.
//!
//! ```rust,ignore
//! let registry = Arc::new(OptionRegistry::default());
//! let config = parse::parse_configuration(json, &registry)?;
//! let keys = CacheKeyGenerator::new(Arc::clone(&registry));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::{
    HANDLER_ERROR_IF_NOT_EMPTY, HANDLER_ERROR_IF_NOT_ZERO, HANDLER_IGNORE, HANDLER_LOGGING,
    HANDLER_PYTHON_TRACEBACK, HANDLER_R_ERROR, READ_FROM_EXIT_VALUE, READ_FROM_FILES,
    READ_FROM_STDERR, READ_FROM_STDOUT, USE_AS_COMMAND_LINE_ARGUMENT, USE_AS_FILE, USE_AS_STDIN,
};
use crate::data::BindingType;
use crate::error::{Error, Result};
use crate::handler::{
    ErrorIfExitValueNotZero, ErrorIfStderrNotEmpty, ExitValueHandler, Handler, LogExitValue,
    LogStderr, LogStdout, PythonTraceback, RError, StderrHandler, StdoutHandler,
};

type Factory<H> = Arc<dyn Fn() -> Arc<H> + Send + Sync>;

/// Which stream a handler option applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerSlot {
    Stderr,
    ExitValue,
    Stdout,
}

impl HandlerSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stderr => "stderr",
            Self::ExitValue => "exitValue",
            Self::Stdout => "stdout",
        }
    }
}

/// Handler factories and supported binding types by option name.
pub struct OptionRegistry {
    stderr: BTreeMap<String, Option<Factory<dyn StderrHandler>>>,
    exit_value: BTreeMap<String, Option<Factory<dyn ExitValueHandler>>>,
    stdout: BTreeMap<String, Option<Factory<dyn StdoutHandler>>>,
    input_types: BTreeMap<&'static str, Vec<BindingType>>,
    output_types: BTreeMap<&'static str, Vec<BindingType>>,
}

impl Default for OptionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl OptionRegistry {
    /// Registry with the standard handler options and type tables.
    pub fn with_defaults() -> Self {
        use BindingType::*;

        let mut registry = Self {
            stderr: BTreeMap::new(),
            exit_value: BTreeMap::new(),
            stdout: BTreeMap::new(),
            input_types: BTreeMap::new(),
            output_types: BTreeMap::new(),
        };

        registry.stderr.insert(HANDLER_IGNORE.to_string(), None);
        registry.register_stderr(HANDLER_LOGGING, || Arc::new(LogStderr));
        registry.register_stderr(HANDLER_ERROR_IF_NOT_EMPTY, || Arc::new(ErrorIfStderrNotEmpty));
        registry.register_stderr(HANDLER_PYTHON_TRACEBACK, || Arc::new(PythonTraceback));
        registry.register_stderr(HANDLER_R_ERROR, || Arc::new(RError));

        registry.exit_value.insert(HANDLER_IGNORE.to_string(), None);
        registry.register_exit_value(HANDLER_LOGGING, || Arc::new(LogExitValue));
        registry.register_exit_value(HANDLER_ERROR_IF_NOT_ZERO, || {
            Arc::new(ErrorIfExitValueNotZero)
        });

        registry.stdout.insert(HANDLER_IGNORE.to_string(), None);
        registry.register_stdout(HANDLER_LOGGING, || Arc::new(LogStdout));

        registry.input_types.insert(
            USE_AS_COMMAND_LINE_ARGUMENT,
            vec![
                Int,
                Double,
                Boolean,
                String,
                DateTime,
                BoundingBox,
                Xml,
                GeoTiff,
                GeoJson,
                Shapefile,
                File,
                QuakeMl,
                Nrml,
                Json,
            ],
        );
        registry
            .input_types
            .insert(USE_AS_STDIN, vec![String, Json, Xml]);
        registry.input_types.insert(
            USE_AS_FILE,
            vec![Xml, GeoTiff, GeoJson, Shapefile, File, QuakeMl, Shakemap, Nrml, Json],
        );

        registry.output_types.insert(
            READ_FROM_STDOUT,
            vec![String, Xml, QuakeMl, Shakemap, Json, GeoJson],
        );
        registry
            .output_types
            .insert(READ_FROM_STDERR, vec![String, Json]);
        registry.output_types.insert(READ_FROM_EXIT_VALUE, vec![Int]);
        registry.output_types.insert(
            READ_FROM_FILES,
            vec![Xml, File, GeoJson, GeoTiff, Shapefile, QuakeMl, Nrml, Shakemap, Json],
        );

        registry
    }

    /// Registers (or replaces) a stderr handler option.
    pub fn register_stderr<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn StderrHandler> + Send + Sync + 'static,
    {
        self.stderr.insert(name.to_string(), Some(Arc::new(factory)));
    }

    /// Registers (or replaces) an exit value handler option.
    pub fn register_exit_value<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn ExitValueHandler> + Send + Sync + 'static,
    {
        self.exit_value
            .insert(name.to_string(), Some(Arc::new(factory)));
    }

    /// Registers (or replaces) a stdout handler option.
    pub fn register_stdout<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn StdoutHandler> + Send + Sync + 'static,
    {
        self.stdout.insert(name.to_string(), Some(Arc::new(factory)));
    }

    /// Creates the stderr handler for an option name; `ignore` yields `None`.
    pub fn stderr_handler(&self, name: &str) -> Result<Option<Handler<dyn StderrHandler>>> {
        Self::create(&self.stderr, HandlerSlot::Stderr, name)
    }

    /// Creates the exit value handler for an option name; `ignore` yields `None`.
    pub fn exit_value_handler(&self, name: &str) -> Result<Option<Handler<dyn ExitValueHandler>>> {
        Self::create(&self.exit_value, HandlerSlot::ExitValue, name)
    }

    /// Creates the stdout handler for an option name; `ignore` yields `None`.
    pub fn stdout_handler(&self, name: &str) -> Result<Option<Handler<dyn StdoutHandler>>> {
        Self::create(&self.stdout, HandlerSlot::Stdout, name)
    }

    fn create<H: ?Sized>(
        table: &BTreeMap<String, Option<Factory<H>>>,
        slot: HandlerSlot,
        name: &str,
    ) -> Result<Option<Handler<H>>> {
        match table.get(name) {
            Some(Some(factory)) => Ok(Some(Handler::new(name, factory()))),
            Some(None) => Ok(None),
            None => Err(Error::UnknownHandler {
                kind: slot.as_str().to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// True when the option name is registered for the slot.
    pub fn knows_handler(&self, slot: HandlerSlot, name: &str) -> bool {
        match slot {
            HandlerSlot::Stderr => self.stderr.contains_key(name),
            HandlerSlot::ExitValue => self.exit_value.contains_key(name),
            HandlerSlot::Stdout => self.stdout.contains_key(name),
        }
    }

    /// Registered option names for a slot.
    pub fn handler_names(&self, slot: HandlerSlot) -> Vec<&str> {
        match slot {
            HandlerSlot::Stderr => self.stderr.keys().map(String::as_str).collect(),
            HandlerSlot::ExitValue => self.exit_value.keys().map(String::as_str).collect(),
            HandlerSlot::Stdout => self.stdout.keys().map(String::as_str).collect(),
        }
    }

    /// True when the binding can be delivered with the `useAs` mechanism.
    pub fn supports_input(&self, use_as: &str, binding: BindingType) -> bool {
        self.input_types
            .get(use_as)
            .is_some_and(|types| types.contains(&binding))
    }

    /// True when the binding can be collected with the `readFrom` mechanism.
    pub fn supports_output(&self, read_from: &str, binding: BindingType) -> bool {
        self.output_types
            .get(read_from)
            .is_some_and(|types| types.contains(&binding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_yields_no_handler() {
        let registry = OptionRegistry::default();
        assert!(registry.stderr_handler("ignore").unwrap().is_none());
        assert!(registry.exit_value_handler("ignore").unwrap().is_none());
        assert!(registry.stdout_handler("ignore").unwrap().is_none());
    }

    #[test]
    fn test_handler_keeps_option_name() {
        let registry = OptionRegistry::default();
        let handler = registry.stderr_handler("pythonTraceback").unwrap().unwrap();
        assert_eq!(handler.kind(), "pythonTraceback");
        assert!(handler.get().handle_stderr("Traceback (most recent call last)").is_err());
    }

    #[test]
    fn test_unknown_handler() {
        let registry = OptionRegistry::default();
        assert!(matches!(
            registry.exit_value_handler("errorIfNotEmpty"),
            Err(Error::UnknownHandler { .. })
        ));
        assert!(!registry.knows_handler(HandlerSlot::Stdout, "rError"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = OptionRegistry::default();
        registry.register_stderr("strict", || Arc::new(ErrorIfStderrNotEmpty));
        assert!(registry.knows_handler(HandlerSlot::Stderr, "strict"));
        assert!(registry.stderr_handler("strict").unwrap().is_some());
    }

    #[test]
    fn test_type_tables() {
        let registry = OptionRegistry::default();
        assert!(registry.supports_input("commandLineArgument", BindingType::Int));
        assert!(!registry.supports_input("stdin", BindingType::GeoTiff));
        assert!(registry.supports_input("file", BindingType::Shakemap));
        assert!(registry.supports_output("exitValue", BindingType::Int));
        assert!(!registry.supports_output("exitValue", BindingType::String));
        assert!(!registry.supports_output("sideChannel", BindingType::String));
    }
}
