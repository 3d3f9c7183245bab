//! # Configuration Parsing
//!
//! Turns a JSON configuration document into a [`Configuration`]. Handler
//! option names and the binding types each mechanism accepts come from the
//! [`OptionRegistry`] passed in by the caller.
//!
//! ## Document Shape
//!
//! ```json
//! {
//!   "title": "QuakeledgerProcess",
//!   "imageId": "quakeledger:latest",
//!   "workingDirectory": "/usr/share/git/quakeledger",
//!   "commandToExecute": "python3 eventquery.py",
//!   "defaultCommandLineFlags": [],
//!   "exitValueHandler": "logging",
//!   "stderrHandler": "pythonTraceback",
//!   "input": [
//!     { "title": "mmin", "useAs": "commandLineArgument", "type": "double" },
//!     { "title": "events", "useAs": "file", "type": "quakeml", "path": "events.xml" }
//!   ],
//!   "output": [
//!     { "title": "selectedRows", "readFrom": "files", "path": "test.xml", "type": "quakeml" }
//!   ]
//! }
//! ```
//!
//! ## Mechanism Mapping
//!
//! | `useAs` | binding | mechanism |
//! |---------|---------|-----------|
//! | `commandLineArgument` | literal, `bbox` | value rendered on argv |
//! | `commandLineArgument` | anything else | generated file, path on argv |
//! | `stdin` | `string`, `json`, `xml` | stdin |
//! | `file` | file-like | file at `path`; on argv with `commandLineFlag` or `passAsArgument` |
//!
//! Error messages name the offending key so an operator can fix the
//! document without reading code.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::configuration::Configuration;
use crate::constants::{
    KEY_ABSTRACT, KEY_ALLOWED, KEY_COMMAND_LINE_FLAG, KEY_COMMAND_TO_EXECUTE, KEY_CRS,
    KEY_DEFAULT, KEY_DEFAULT_COMMAND_LINE_FLAGS, KEY_DEFAULT_FORMAT, KEY_EXIT_VALUE_HANDLER,
    KEY_IMAGE_ID, KEY_INPUT, KEY_OPTIONAL, KEY_OUTPUT, KEY_PASS_AS_ARGUMENT, KEY_PATH,
    KEY_READ_FROM, KEY_SCHEMA, KEY_STDERR_HANDLER, KEY_STDOUT_HANDLER, KEY_TITLE, KEY_TYPE,
    KEY_USE_AS, KEY_WORKING_DIRECTORY, MAX_CONFIG_SIZE, READ_FROM_EXIT_VALUE, READ_FROM_FILES,
    READ_FROM_STDERR, READ_FROM_STDOUT, USE_AS_COMMAND_LINE_ARGUMENT, USE_AS_FILE, USE_AS_STDIN,
};
use crate::data::BindingType;
use crate::error::{Error, Result};
use crate::image::validate_reference;
use crate::options::OptionRegistry;
use crate::parameter::{FilePath, InputParameter, OutputParameter};

/// Parses a configuration document.
pub fn parse_configuration(json: &str, registry: &OptionRegistry) -> Result<Configuration> {
    let value: Value = serde_json::from_str(json).map_err(|e| Error::parse(e.to_string()))?;
    parse_configuration_value(&value, registry)
}

/// Reads and parses a configuration file.
pub fn load_configuration(path: &Path, registry: &OptionRegistry) -> Result<Configuration> {
    let size = std::fs::metadata(path)?.len();
    if size > MAX_CONFIG_SIZE as u64 {
        return Err(Error::parse(format!(
            "configuration file {} exceeds {} bytes",
            path.display(),
            MAX_CONFIG_SIZE
        )));
    }
    let text = std::fs::read_to_string(path)?;
    let config = parse_configuration(&text, registry)?;
    debug!(path = %path.display(), process = config.identifier(), "loaded configuration");
    Ok(config)
}

/// Builds a configuration from an already parsed JSON value.
pub fn parse_configuration_value(value: &Value, registry: &OptionRegistry) -> Result<Configuration> {
    let Some(json) = value.as_object() else {
        return Err(Error::parse("There must be a json document (as json object)"));
    };

    let identifier = required_key(json, KEY_TITLE)?;
    let abstract_text = optional_key(json, KEY_ABSTRACT)?;
    let image = required_key(json, KEY_IMAGE_ID)?;
    validate_reference(image)?;
    let working_directory = required_key(json, KEY_WORKING_DIRECTORY)?;

    let command_line = required_key(json, KEY_COMMAND_TO_EXECUTE)?;
    let command = shlex::split(command_line).ok_or_else(|| {
        Error::parse(format!(
            "Unbalanced quotes in key '{}'",
            KEY_COMMAND_TO_EXECUTE
        ))
    })?;

    let default_flags = match json.get(KEY_DEFAULT_COMMAND_LINE_FLAGS) {
        None => Vec::new(),
        Some(raw) => key_array(raw, KEY_DEFAULT_COMMAND_LINE_FLAGS)?
            .iter()
            .map(|flag| {
                flag.as_str().map(str::to_string).ok_or_else(|| {
                    Error::parse(format!(
                        "Wrong type for element in {}, expected a String",
                        KEY_DEFAULT_COMMAND_LINE_FLAGS
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?,
    };

    let inputs = parse_list(json, KEY_INPUT, |obj| parse_input(obj, registry))?;
    let outputs = parse_list(json, KEY_OUTPUT, |obj| parse_output(obj, registry))?;

    let mut builder = Configuration::builder(identifier, image, working_directory, command)
        .with_default_flags(default_flags)
        .add_inputs(inputs)
        .add_outputs(outputs);
    if let Some(text) = abstract_text {
        builder = builder.with_abstract(text);
    }
    if let Some(name) = optional_key(json, KEY_STDERR_HANDLER)? {
        builder = builder.with_stderr_handler(
            registry
                .stderr_handler(name)
                .map_err(|_| unsupported(name, KEY_STDERR_HANDLER))?,
        );
    }
    if let Some(name) = optional_key(json, KEY_EXIT_VALUE_HANDLER)? {
        builder = builder.with_exit_value_handler(
            registry
                .exit_value_handler(name)
                .map_err(|_| unsupported(name, KEY_EXIT_VALUE_HANDLER))?,
        );
    }
    if let Some(name) = optional_key(json, KEY_STDOUT_HANDLER)? {
        builder = builder.with_stdout_handler(
            registry
                .stdout_handler(name)
                .map_err(|_| unsupported(name, KEY_STDOUT_HANDLER))?,
        );
    }

    Ok(builder.build())
}

// =============================================================================
// Inputs and Outputs
// =============================================================================

fn parse_input(json: &Map<String, Value>, registry: &OptionRegistry) -> Result<InputParameter> {
    let identifier = required_element(json, KEY_TITLE)?;
    let use_as = required_element(json, KEY_USE_AS)?;
    let binding = binding_element(json)?;

    if !matches!(use_as, USE_AS_COMMAND_LINE_ARGUMENT | USE_AS_STDIN | USE_AS_FILE) {
        return Err(Error::parse(format!("Not supported useAs value: '{}'", use_as)));
    }
    if !registry.supports_input(use_as, binding) {
        return Err(Error::parse(format!(
            "Not supported type value '{}' for useAs '{}'",
            binding, use_as
        )));
    }

    let flag = optional_element(json, KEY_COMMAND_LINE_FLAG)?;
    let mut builder = InputParameter::builder(identifier, binding)
        .optional(bool_element(json, KEY_OPTIONAL)?.unwrap_or(false));

    if let Some(text) = optional_element(json, KEY_ABSTRACT)? {
        builder = builder.with_abstract(text);
    }
    if let Some(value) = optional_element(json, KEY_DEFAULT)? {
        builder = builder.with_default(value);
    }
    if let Some(values) = string_list_element(json, KEY_ALLOWED)? {
        builder = builder.with_allowed_values(values);
    }
    if let Some(crs) = string_list_element(json, KEY_CRS)? {
        builder = builder.with_supported_crs(crs);
    }
    if let Some(schema) = optional_element(json, KEY_SCHEMA)? {
        builder = builder.with_schema(schema);
    }
    if let Some(format) = optional_element(json, KEY_DEFAULT_FORMAT)? {
        builder = builder.with_default_format(format);
    }

    builder = match use_as {
        USE_AS_COMMAND_LINE_ARGUMENT
            if binding.is_literal() || binding == BindingType::BoundingBox =>
        {
            builder.as_command_line_argument(flag)
        }
        USE_AS_COMMAND_LINE_ARGUMENT => builder.to_file_as_argument(FilePath::Generated, flag),
        USE_AS_STDIN => builder.to_stdin(),
        _ => {
            let path = FilePath::Fixed(required_element(json, KEY_PATH)?.to_string());
            let pass_as_argument = bool_element(json, KEY_PASS_AS_ARGUMENT)?.unwrap_or(false);
            if pass_as_argument || flag.is_some() {
                builder.to_file_as_argument(path, flag)
            } else {
                builder.to_file(path)
            }
        }
    };

    Ok(builder.build())
}

fn parse_output(json: &Map<String, Value>, registry: &OptionRegistry) -> Result<OutputParameter> {
    let identifier = required_element(json, KEY_TITLE)?;
    let read_from = required_element(json, KEY_READ_FROM)?;
    let binding = binding_element(json)?;

    if !matches!(
        read_from,
        READ_FROM_STDOUT | READ_FROM_STDERR | READ_FROM_EXIT_VALUE | READ_FROM_FILES
    ) {
        return Err(Error::parse(format!(
            "Not supported readFrom value: '{}'",
            read_from
        )));
    }
    if !registry.supports_output(read_from, binding) {
        return Err(Error::parse(format!(
            "Not supported type value '{}' for readFrom '{}'",
            binding, read_from
        )));
    }

    let mut builder = OutputParameter::builder(identifier, binding)
        .optional(bool_element(json, KEY_OPTIONAL)?.unwrap_or(false));
    if let Some(text) = optional_element(json, KEY_ABSTRACT)? {
        builder = builder.with_abstract(text);
    }
    if let Some(schema) = optional_element(json, KEY_SCHEMA)? {
        builder = builder.with_schema(schema);
    }
    if let Some(format) = optional_element(json, KEY_DEFAULT_FORMAT)? {
        builder = builder.with_default_format(format);
    }

    builder = match read_from {
        READ_FROM_STDOUT => builder.from_stdout(),
        READ_FROM_STDERR => builder.from_stderr(),
        READ_FROM_EXIT_VALUE => builder.from_exit_value(),
        _ => builder.from_file(required_element(json, KEY_PATH)?),
    };

    Ok(builder.build())
}

// =============================================================================
// Field Access
// =============================================================================

fn parse_list<T>(
    json: &Map<String, Value>,
    key: &str,
    mut parse: impl FnMut(&Map<String, Value>) -> Result<T>,
) -> Result<Vec<T>> {
    let Some(raw) = json.get(key) else {
        return Ok(Vec::new());
    };
    key_array(raw, key)?
        .iter()
        .map(|element| {
            let obj = element.as_object().ok_or_else(|| {
                Error::parse(format!(
                    "Wrong type for element in {}, expected a JSON object",
                    key
                ))
            })?;
            parse(obj)
        })
        .collect()
}

fn key_array<'a>(raw: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    raw.as_array()
        .ok_or_else(|| Error::parse(format!("Wrong type for key '{}', expected an Array", key)))
}

fn required_key<'a>(json: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    optional_key(json, key)?.ok_or_else(|| Error::parse(format!("Missing key '{}'", key)))
}

fn optional_key<'a>(json: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match json.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(Error::parse(format!(
            "Wrong type for key '{}', expected a String",
            key
        ))),
    }
}

fn required_element<'a>(json: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    optional_element(json, key)?.ok_or_else(|| Error::parse(format!("Missing element '{}'", key)))
}

fn optional_element<'a>(json: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match json.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(Error::parse(format!(
            "Wrong type for element '{}', expected a String",
            key
        ))),
    }
}

fn bool_element(json: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match json.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::parse(format!(
            "Wrong type for element '{}', expected a Boolean",
            key
        ))),
    }
}

/// Strings, numbers and booleans are accepted and kept as their text.
fn string_list_element(json: &Map<String, Value>, key: &str) -> Result<Option<Vec<String>>> {
    let Some(raw) = json.get(key) else {
        return Ok(None);
    };
    let Some(items) = raw.as_array() else {
        return Err(Error::parse(format!(
            "Wrong type for element '{}', expected a JSON array",
            key
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(Error::parse(format!(
                "Wrong type for element in {}, expected a String",
                key
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn binding_element(json: &Map<String, Value>) -> Result<BindingType> {
    let key = required_element(json, KEY_TYPE)?;
    BindingType::from_key(key)
        .ok_or_else(|| Error::parse(format!("Not supported type value '{}'", key)))
}

fn unsupported(value: &str, key: &str) -> Error {
    Error::parse(format!("Unsupported value '{}' for key '{}'", value, key))
}
