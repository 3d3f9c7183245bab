//! # Parameter Descriptors
//!
//! Immutable descriptions of a process's inputs and outputs. Each input has
//! exactly one [`InputMechanism`] deciding how its value reaches the program;
//! each output has exactly one [`OutputMechanism`] deciding where its value
//! is read from.
//!
//! ## Mechanisms
//!
//! ```text
//! InputMechanism
//! ├── CommandLineArgument { flag }          value rendered to argv tokens
//! ├── Stdin                                 value bytes fed to stdin
//! └── File { path, argument }               value written to a file
//!     ├── path: Fixed("in.xml") | Generated
//!     └── argument: Some(flag) puts the path on argv
//!
//! OutputMechanism
//! ├── Stdout | Stderr                       stream bytes converted
//! ├── ExitValue                             exit code as int
//! └── File { path }                         file content converted
//! ```
//!
//! Builders never validate. A descriptor without a mechanism is accepted at
//! build time and rejected with [`Error::MissingMechanism`] at first use.

use uuid::Uuid;

use crate::constants::{
    GENERATED_FILE_PREFIX, READ_FROM_EXIT_VALUE, READ_FROM_FILES, READ_FROM_STDERR,
    READ_FROM_STDOUT, USE_AS_COMMAND_LINE_ARGUMENT, USE_AS_FILE, USE_AS_STDIN,
};
use crate::data::{BindingType, Data};
use crate::error::{Error, Result};
use crate::format;

// =============================================================================
// Mechanisms
// =============================================================================

/// Where a file delivered input is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilePath {
    /// A path the program knows about.
    Fixed(String),
    /// A fresh random file name per run; only meaningful when passed on argv.
    Generated,
}

impl FilePath {
    /// Returns the path to use for one run.
    pub fn resolve(&self, binding: BindingType) -> String {
        match self {
            Self::Fixed(path) => path.clone(),
            Self::Generated => format!(
                "{}{}.{}",
                GENERATED_FILE_PREFIX,
                Uuid::new_v4(),
                binding.file_extension()
            ),
        }
    }
}

/// Puts the path of a file delivered input on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PathArgument {
    /// Flag preceding the path.
    pub flag: Option<String>,
}

/// How an input value reaches the program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputMechanism {
    /// Rendered to argv tokens.
    CommandLineArgument { flag: Option<String> },
    /// Serialized to the program's standard input.
    Stdin,
    /// Serialized to a file in the working directory.
    File {
        path: FilePath,
        argument: Option<PathArgument>,
    },
}

impl InputMechanism {
    /// Discriminator used in configuration documents and cache keys.
    pub fn discriminator(&self) -> &'static str {
        match self {
            Self::CommandLineArgument { .. } => USE_AS_COMMAND_LINE_ARGUMENT,
            Self::Stdin => USE_AS_STDIN,
            Self::File { .. } => USE_AS_FILE,
        }
    }

    /// True when the value, or its file path, appears on argv.
    pub fn is_command_line_argument(&self) -> bool {
        matches!(
            self,
            Self::CommandLineArgument { .. }
                | Self::File {
                    argument: Some(_),
                    ..
                }
        )
    }
}

/// Where an output value is read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputMechanism {
    Stdout,
    Stderr,
    ExitValue,
    File { path: String },
}

impl OutputMechanism {
    /// Discriminator used in configuration documents and cache keys.
    pub fn discriminator(&self) -> &'static str {
        match self {
            Self::Stdout => READ_FROM_STDOUT,
            Self::Stderr => READ_FROM_STDERR,
            Self::ExitValue => READ_FROM_EXIT_VALUE,
            Self::File { .. } => READ_FROM_FILES,
        }
    }
}

// =============================================================================
// Validators
// =============================================================================

/// Check applied to a value before delivery or after collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Validator {
    /// Literal must render to one of these values.
    AllowedValues(Vec<String>),
    /// XML document must belong to this schema.
    XmlSchema(String),
}

impl Validator {
    /// Returns an error message when the value is rejected.
    pub fn check(&self, data: &Data) -> Option<String> {
        match self {
            Self::AllowedValues(allowed) => match data.literal_text() {
                Some(text) if allowed.contains(&text) => None,
                Some(_) => Some("Input is none of the allowed values".to_string()),
                None => Some("Unexpected input type".to_string()),
            },
            Self::XmlSchema(schema) => {
                let text = match data {
                    Data::Xml(s) | Data::QuakeMl(s) | Data::Nrml(s) | Data::Shakemap(s) => s,
                    _ => return Some("Unexpected input type".to_string()),
                };
                match format::xml_root(text) {
                    Ok(root) if matches_schema(&root, schema) => None,
                    Ok(root) => Some(format!(
                        "root element '{}' does not belong to schema '{}'",
                        root.name, schema
                    )),
                    Err(reason) => Some(format!("not well-formed XML: {}", reason)),
                }
            }
        }
    }
}

/// A root element belongs to a schema when its namespace prefixes the schema
/// location or it names the schema in `schemaLocation`.
fn matches_schema(root: &format::XmlRoot, schema: &str) -> bool {
    let by_namespace = root
        .namespace
        .as_deref()
        .is_some_and(|ns| !ns.is_empty() && schema.starts_with(ns.trim_end_matches('/')));
    let by_location = root
        .schema_location
        .as_deref()
        .is_some_and(|loc| loc.split_whitespace().any(|s| s == schema));
    by_namespace || by_location
}

// =============================================================================
// Input Parameter
// =============================================================================

/// Immutable description of one process input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputParameter {
    identifier: String,
    abstract_text: Option<String>,
    binding: BindingType,
    optional: bool,
    default_value: Option<String>,
    allowed_values: Vec<String>,
    supported_crs: Vec<String>,
    schema: Option<String>,
    default_format: Option<String>,
    mechanism: Option<InputMechanism>,
}

impl InputParameter {
    /// Starts a descriptor for the given identifier and binding.
    pub fn builder(identifier: impl Into<String>, binding: BindingType) -> InputParameterBuilder {
        InputParameterBuilder {
            inner: Self {
                identifier: identifier.into(),
                abstract_text: None,
                binding,
                optional: false,
                default_value: None,
                allowed_values: Vec::new(),
                supported_crs: Vec::new(),
                schema: None,
                default_format: None,
                mechanism: None,
            },
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    pub fn binding(&self) -> BindingType {
        self.binding
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn allowed_values(&self) -> &[String] {
        &self.allowed_values
    }

    pub fn supported_crs(&self) -> &[String] {
        &self.supported_crs
    }

    /// Declared schema, falling back to the binding's own schema.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref().or(self.binding.default_schema())
    }

    /// Declared MIME type, falling back to the binding's default.
    pub fn default_format(&self) -> Option<&str> {
        self.default_format
            .as_deref()
            .or(self.binding.default_mime_type())
    }

    /// Returns the delivery mechanism, failing when none was declared.
    pub fn mechanism(&self) -> Result<&InputMechanism> {
        self.mechanism.as_ref().ok_or_else(|| Error::MissingMechanism {
            id: self.identifier.clone(),
            direction: "input".to_string(),
        })
    }

    /// Validators implied by the declaration.
    pub fn validators(&self) -> Vec<Validator> {
        let mut validators = Vec::new();
        if !self.allowed_values.is_empty() {
            validators.push(Validator::AllowedValues(self.allowed_values.clone()));
        }
        if let Some(schema) = self.schema.as_deref() {
            validators.push(Validator::XmlSchema(schema.to_string()));
        }
        validators
    }

    /// Checks a realized value against binding and validators.
    pub fn validate(&self, data: &Data) -> Result<()> {
        if data.binding_type() != self.binding {
            return Err(Error::InvalidInput {
                id: self.identifier.clone(),
                reason: format!(
                    "expected {} but got {}",
                    self.binding,
                    data.binding_type()
                ),
            });
        }
        for validator in self.validators() {
            if let Some(reason) = validator.check(data) {
                return Err(Error::InvalidInput {
                    id: self.identifier.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`InputParameter`].
#[derive(Debug, Clone)]
pub struct InputParameterBuilder {
    inner: InputParameter,
}

impl InputParameterBuilder {
    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.inner.abstract_text = Some(text.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.inner.optional = optional;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.inner.default_value = Some(value.into());
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<String>) -> Self {
        self.inner.allowed_values = values;
        self
    }

    pub fn with_supported_crs(mut self, crs: Vec<String>) -> Self {
        self.inner.supported_crs = crs;
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.inner.schema = Some(schema.into());
        self
    }

    pub fn with_default_format(mut self, mime_type: impl Into<String>) -> Self {
        self.inner.default_format = Some(mime_type.into());
        self
    }

    /// Delivers the value as argv tokens.
    pub fn as_command_line_argument(mut self, flag: Option<&str>) -> Self {
        self.inner.mechanism = Some(InputMechanism::CommandLineArgument {
            flag: flag.map(str::to_string),
        });
        self
    }

    /// Delivers the value on stdin.
    pub fn to_stdin(mut self) -> Self {
        self.inner.mechanism = Some(InputMechanism::Stdin);
        self
    }

    /// Writes the value to a file the program opens by itself.
    pub fn to_file(mut self, path: FilePath) -> Self {
        self.inner.mechanism = Some(InputMechanism::File {
            path,
            argument: None,
        });
        self
    }

    /// Writes the value to a file and passes the path on argv.
    pub fn to_file_as_argument(mut self, path: FilePath, flag: Option<&str>) -> Self {
        self.inner.mechanism = Some(InputMechanism::File {
            path,
            argument: Some(PathArgument {
                flag: flag.map(str::to_string),
            }),
        });
        self
    }

    pub fn build(self) -> InputParameter {
        self.inner
    }
}

// =============================================================================
// Output Parameter
// =============================================================================

/// Immutable description of one process output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputParameter {
    identifier: String,
    abstract_text: Option<String>,
    binding: BindingType,
    optional: bool,
    schema: Option<String>,
    default_format: Option<String>,
    mechanism: Option<OutputMechanism>,
}

impl OutputParameter {
    /// Starts a descriptor for the given identifier and binding.
    pub fn builder(identifier: impl Into<String>, binding: BindingType) -> OutputParameterBuilder {
        OutputParameterBuilder {
            inner: Self {
                identifier: identifier.into(),
                abstract_text: None,
                binding,
                optional: false,
                schema: None,
                default_format: None,
                mechanism: None,
            },
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    pub fn binding(&self) -> BindingType {
        self.binding
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Declared schema, falling back to the binding's own schema.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref().or(self.binding.default_schema())
    }

    /// Declared MIME type, falling back to the binding's default.
    pub fn default_format(&self) -> Option<&str> {
        self.default_format
            .as_deref()
            .or(self.binding.default_mime_type())
    }

    /// Returns the collection mechanism, failing when none was declared.
    pub fn mechanism(&self) -> Result<&OutputMechanism> {
        self.mechanism.as_ref().ok_or_else(|| Error::MissingMechanism {
            id: self.identifier.clone(),
            direction: "output".to_string(),
        })
    }

    /// Checks a collected value against the declared schema.
    pub fn validate(&self, data: &Data) -> Result<()> {
        if let Some(schema) = self.schema.as_deref()
            && let Some(reason) = Validator::XmlSchema(schema.to_string()).check(data)
        {
            return Err(Error::conversion(
                self.binding,
                format!("output '{}': {}", self.identifier, reason),
            ));
        }
        Ok(())
    }
}

/// Builder for [`OutputParameter`].
#[derive(Debug, Clone)]
pub struct OutputParameterBuilder {
    inner: OutputParameter,
}

impl OutputParameterBuilder {
    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.inner.abstract_text = Some(text.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.inner.optional = optional;
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.inner.schema = Some(schema.into());
        self
    }

    pub fn with_default_format(mut self, mime_type: impl Into<String>) -> Self {
        self.inner.default_format = Some(mime_type.into());
        self
    }

    pub fn from_stdout(mut self) -> Self {
        self.inner.mechanism = Some(OutputMechanism::Stdout);
        self
    }

    pub fn from_stderr(mut self) -> Self {
        self.inner.mechanism = Some(OutputMechanism::Stderr);
        self
    }

    pub fn from_exit_value(mut self) -> Self {
        self.inner.mechanism = Some(OutputMechanism::ExitValue);
        self
    }

    pub fn from_file(mut self, path: impl Into<String>) -> Self {
        self.inner.mechanism = Some(OutputMechanism::File { path: path.into() });
        self
    }

    pub fn build(self) -> OutputParameter {
        self.inner
    }
}
