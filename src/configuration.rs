//! Immutable process configuration and its builder.

use crate::handler::{ExitValueHandler, Handler, StderrHandler, StdoutHandler};
use crate::parameter::{InputParameter, OutputParameter};

/// Everything needed to run one wrapped program.
///
/// Input and output order is significant: it decides argv assembly and is
/// folded into the cache key. Equality is structural; handlers compare by
/// option name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Configuration {
    identifier: String,
    abstract_text: Option<String>,
    image: String,
    working_directory: String,
    command: Vec<String>,
    default_flags: Vec<String>,
    inputs: Vec<InputParameter>,
    outputs: Vec<OutputParameter>,
    stderr_handler: Option<Handler<dyn StderrHandler>>,
    exit_value_handler: Option<Handler<dyn ExitValueHandler>>,
    stdout_handler: Option<Handler<dyn StdoutHandler>>,
}

impl Configuration {
    /// Starts a builder with the required fields.
    pub fn builder(
        identifier: impl Into<String>,
        image: impl Into<String>,
        working_directory: impl Into<String>,
        command: Vec<String>,
    ) -> ConfigurationBuilder {
        ConfigurationBuilder {
            inner: Self {
                identifier: identifier.into(),
                abstract_text: None,
                image: image.into(),
                working_directory: working_directory.into(),
                command,
                default_flags: Vec::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                stderr_handler: None,
                exit_value_handler: None,
                stdout_handler: None,
            },
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn default_flags(&self) -> &[String] {
        &self.default_flags
    }

    pub fn inputs(&self) -> &[InputParameter] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputParameter] {
        &self.outputs
    }

    pub fn input(&self, identifier: &str) -> Option<&InputParameter> {
        self.inputs.iter().find(|p| p.identifier() == identifier)
    }

    pub fn output(&self, identifier: &str) -> Option<&OutputParameter> {
        self.outputs.iter().find(|p| p.identifier() == identifier)
    }

    pub fn stderr_handler(&self) -> Option<&Handler<dyn StderrHandler>> {
        self.stderr_handler.as_ref()
    }

    pub fn exit_value_handler(&self) -> Option<&Handler<dyn ExitValueHandler>> {
        self.exit_value_handler.as_ref()
    }

    pub fn stdout_handler(&self) -> Option<&Handler<dyn StdoutHandler>> {
        self.stdout_handler.as_ref()
    }
}

/// Accumulates parameters and handlers; [`ConfigurationBuilder::build`] is
/// the only way to obtain a [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    inner: Configuration,
}

impl ConfigurationBuilder {
    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.inner.abstract_text = Some(text.into());
        self
    }

    pub fn with_default_flags(mut self, flags: Vec<String>) -> Self {
        self.inner.default_flags = flags;
        self
    }

    /// Appends an input; declaration order is preserved.
    pub fn add_input(mut self, input: InputParameter) -> Self {
        self.inner.inputs.push(input);
        self
    }

    /// Appends several inputs in order.
    pub fn add_inputs(mut self, inputs: impl IntoIterator<Item = InputParameter>) -> Self {
        self.inner.inputs.extend(inputs);
        self
    }

    /// Appends an output; declaration order is preserved.
    pub fn add_output(mut self, output: OutputParameter) -> Self {
        self.inner.outputs.push(output);
        self
    }

    /// Appends several outputs in order.
    pub fn add_outputs(mut self, outputs: impl IntoIterator<Item = OutputParameter>) -> Self {
        self.inner.outputs.extend(outputs);
        self
    }

    pub fn with_stderr_handler(mut self, handler: Option<Handler<dyn StderrHandler>>) -> Self {
        self.inner.stderr_handler = handler;
        self
    }

    pub fn with_exit_value_handler(
        mut self,
        handler: Option<Handler<dyn ExitValueHandler>>,
    ) -> Self {
        self.inner.exit_value_handler = handler;
        self
    }

    pub fn with_stdout_handler(mut self, handler: Option<Handler<dyn StdoutHandler>>) -> Self {
        self.inner.stdout_handler = handler;
        self
    }

    pub fn build(self) -> Configuration {
        self.inner
    }
}
