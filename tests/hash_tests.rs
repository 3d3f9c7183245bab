//! Tests for cache key generation.
//!
//! Validates which parts of a configuration and a request change the key
//! and which must not: declaration order, argv rendering, file placement,
//! layout-only XML differences, exact number handling in seismic XML,
//! image ids and runner versions.

use std::collections::BTreeSet;
use std::sync::Arc;

use simwps::{
    BindingType, CacheKeyGenerator, Configuration, Data, Error, FilePath, InputParameter,
    InputValues, KeyEnvironment, OptionRegistry, OutputParameter, StaticImageIdLookup,
    StaticVersionHandler,
};

fn generator() -> CacheKeyGenerator {
    CacheKeyGenerator::new(Arc::new(OptionRegistry::default()))
}

fn times_input() -> InputParameter {
    InputParameter::builder("times", BindingType::Int)
        .as_command_line_argument(Some("--times"))
        .build()
}

fn message_input() -> InputParameter {
    InputParameter::builder("message", BindingType::String)
        .as_command_line_argument(None)
        .build()
}

fn stdout_output() -> OutputParameter {
    OutputParameter::builder("result", BindingType::String)
        .from_stdout()
        .build()
}

fn echo_config() -> Configuration {
    Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_input(times_input())
        .add_input(message_input())
        .add_output(stdout_output())
        .build()
}

fn values(pairs: Vec<(&str, Data)>) -> InputValues {
    pairs
        .into_iter()
        .map(|(id, data)| (id.to_string(), vec![data]))
        .collect()
}

fn echo_inputs(times: i32) -> InputValues {
    values(vec![
        ("times", Data::Int(times)),
        ("message", Data::String("hello".to_string())),
    ])
}

/// No image id and no versions: the image reference is folded.
fn unresolved() -> KeyEnvironment {
    KeyEnvironment::default()
}

fn key(config: &Configuration, inputs: &InputValues) -> String {
    generator().hash(config, &unresolved(), inputs).unwrap()
}

// =============================================================================
// Determinism Tests
// =============================================================================

#[test]
fn test_independent_builders_produce_same_key() {
    let a = key(&echo_config(), &echo_inputs(3));
    let b = key(&echo_config(), &echo_inputs(3));
    assert_eq!(a, b);
    assert_eq!(a.len(), 64, "key should be hex encoded SHA-256");
}

#[test]
fn test_generators_agree() {
    let config = echo_config();
    let inputs = echo_inputs(3);
    let a = generator().hash(&config, &unresolved(), &inputs).unwrap();
    let b = CacheKeyGenerator::new(Arc::new(OptionRegistry::with_defaults()))
        .hash(&config, &unresolved(), &inputs)
        .unwrap();
    assert_eq!(a, b);
}

// =============================================================================
// Sensitivity Tests
// =============================================================================

#[test]
fn test_input_value_changes_key() {
    assert_ne!(
        key(&echo_config(), &echo_inputs(3)),
        key(&echo_config(), &echo_inputs(4))
    );
}

#[test]
fn test_process_identifier_changes_key() {
    let renamed = Configuration::builder("echo2", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_input(times_input())
        .add_input(message_input())
        .add_output(stdout_output())
        .build();
    assert_ne!(
        key(&echo_config(), &echo_inputs(3)),
        key(&renamed, &echo_inputs(3))
    );
}

#[test]
fn test_additional_output_changes_key() {
    let extended = Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_input(times_input())
        .add_input(message_input())
        .add_output(stdout_output())
        .add_output(
            OutputParameter::builder("code", BindingType::Int)
                .from_exit_value()
                .build(),
        )
        .build();
    assert_ne!(
        key(&echo_config(), &echo_inputs(3)),
        key(&extended, &echo_inputs(3))
    );
}

#[test]
fn test_input_declaration_order_changes_key() {
    let swapped = Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_input(message_input())
        .add_input(times_input())
        .add_output(stdout_output())
        .build();
    assert_ne!(
        key(&echo_config(), &echo_inputs(3)),
        key(&swapped, &echo_inputs(3))
    );
}

#[test]
fn test_default_flags_change_key() {
    let flagged = Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .with_default_flags(vec!["-n".to_string()])
        .add_input(times_input())
        .add_input(message_input())
        .add_output(stdout_output())
        .build();
    assert_ne!(
        key(&echo_config(), &echo_inputs(3)),
        key(&flagged, &echo_inputs(3))
    );
}

#[test]
fn test_stdin_and_argv_differ() {
    let via_stdin = Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_input(times_input())
        .add_input(
            InputParameter::builder("message", BindingType::String)
                .to_stdin()
                .build(),
        )
        .add_output(stdout_output())
        .build();
    assert_ne!(
        key(&echo_config(), &echo_inputs(3)),
        key(&via_stdin, &echo_inputs(3))
    );
}

#[test]
fn test_requested_outputs_change_key() {
    let config = echo_config();
    let inputs = echo_inputs(3);
    let all = generator().hash(&config, &unresolved(), &inputs).unwrap();
    let requested: BTreeSet<String> = ["result".to_string()].into();
    let some = generator()
        .hash_for_outputs(&config, &unresolved(), &inputs, &requested)
        .unwrap();
    assert_ne!(all, some);
}

// =============================================================================
// Optional Input Tests
// =============================================================================

#[test]
fn test_absent_optional_input_differs_from_present() {
    let config = Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_input(
            InputParameter::builder("suffix", BindingType::String)
                .optional(true)
                .as_command_line_argument(Some("--suffix"))
                .build(),
        )
        .add_output(stdout_output())
        .build();

    let absent = key(&config, &InputValues::new());
    let empty = key(&config, &values(vec![("suffix", Data::String(String::new()))]));
    let present = key(&config, &values(vec![("suffix", Data::String("x".to_string()))]));

    assert_ne!(absent, empty);
    assert_ne!(absent, present);
    assert_ne!(empty, present);
}

#[test]
fn test_only_first_value_is_folded() {
    let config = echo_config();
    let mut inputs = echo_inputs(3);
    let single = key(&config, &inputs);
    inputs.insert("times".to_string(), vec![Data::Int(3), Data::Int(99)]);
    assert_eq!(single, key(&config, &inputs));
}

// =============================================================================
// File Input Tests
// =============================================================================

fn file_config(path: FilePath, on_argv: bool) -> Configuration {
    let builder = InputParameter::builder("catalog", BindingType::QuakeMl);
    let input = if on_argv {
        builder.to_file_as_argument(path, Some("--catalog"))
    } else {
        builder.to_file(path)
    };
    Configuration::builder("shake", "shake:1", "/data", vec!["shake".to_string()])
        .add_input(input.build())
        .add_output(stdout_output())
        .build()
}

const QUAKEML: &str = "<q:quakeml xmlns:q=\"http://quakeml.org/xmlns/quakeml/1.2\">\
    <eventParameters><event><magnitude>8.50</magnitude></event></eventParameters></q:quakeml>";

const QUAKEML_REFORMATTED: &str = "<?xml version=\"1.0\"?>\n\
    <q:quakeml xmlns:q=\"http://quakeml.org/xmlns/quakeml/1.2\">\n\
      <eventParameters>\n\
        <event>\n\
          <magnitude>8.5</magnitude>\n\
        </event>\n\
      </eventParameters>\n\
    </q:quakeml>\n";

fn catalog(text: &str) -> InputValues {
    values(vec![("catalog", Data::QuakeMl(text.to_string()))])
}

#[test]
fn test_generated_path_on_argv_is_stable() {
    let config = file_config(FilePath::Generated, true);
    assert_eq!(key(&config, &catalog(QUAKEML)), key(&config, &catalog(QUAKEML)));
}

#[test]
fn test_fixed_path_participates_in_key() {
    let a = file_config(FilePath::Fixed("in.xml".to_string()), false);
    let b = file_config(FilePath::Fixed("catalog.xml".to_string()), false);
    assert_ne!(key(&a, &catalog(QUAKEML)), key(&b, &catalog(QUAKEML)));
}

#[test]
fn test_path_passed_on_argv_is_not_folded() {
    let a = file_config(FilePath::Fixed("in.xml".to_string()), true);
    let b = file_config(FilePath::Fixed("catalog.xml".to_string()), true);
    let c = file_config(FilePath::Generated, true);
    let ka = key(&a, &catalog(QUAKEML));
    assert_eq!(ka, key(&b, &catalog(QUAKEML)));
    assert_eq!(ka, key(&c, &catalog(QUAKEML)));
}

#[test]
fn test_unreferenced_generated_path_is_configuration_error() {
    let config = file_config(FilePath::Generated, false);
    let err = generator()
        .hash(&config, &unresolved(), &catalog(QUAKEML))
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(err.is_configuration_error());
}

#[test]
fn test_xml_layout_does_not_change_key() {
    let config = file_config(FilePath::Fixed("in.xml".to_string()), false);
    assert_eq!(
        key(&config, &catalog(QUAKEML)),
        key(&config, &catalog(QUAKEML_REFORMATTED))
    );
}

#[test]
fn test_xml_content_changes_key() {
    let config = file_config(FilePath::Fixed("in.xml".to_string()), false);
    let other = QUAKEML.replace("8.50", "7.9");
    assert_ne!(key(&config, &catalog(QUAKEML)), key(&config, &catalog(&other)));
}

fn quakeml_event(public_id: &str, code: &str, magnitude: &str) -> String {
    format!(
        "<q:quakeml xmlns:q=\"http://quakeml.org/xmlns/quakeml/1.2\"><eventParameters>\
         <event publicID=\"{}\"><code>{}</code><magnitude>{}</magnitude></event>\
         </eventParameters></q:quakeml>",
        public_id, code, magnitude
    )
}

#[test]
fn test_large_integer_ids_keep_distinct_keys() {
    let config = file_config(FilePath::Fixed("in.xml".to_string()), false);
    let a = quakeml_event("9007199254740993", "7", "8.5");
    let b = quakeml_event("9007199254740992", "7", "8.5");
    assert_ne!(key(&config, &catalog(&a)), key(&config, &catalog(&b)));
}

#[test]
fn test_leading_zero_codes_keep_distinct_keys() {
    let config = file_config(FilePath::Fixed("in.xml".to_string()), false);
    let padded = quakeml_event("1", "007", "8.5");
    let plain = quakeml_event("1", "7", "8.5");
    assert_ne!(key(&config, &catalog(&padded)), key(&config, &catalog(&plain)));
}

#[test]
fn test_equal_decimals_share_key() {
    let config = file_config(FilePath::Fixed("in.xml".to_string()), false);
    let short = key(&config, &catalog(&quakeml_event("1", "7", "8.5")));
    assert_eq!(short, key(&config, &catalog(&quakeml_event("1", "7", "8.50"))));
    assert_eq!(short, key(&config, &catalog(&quakeml_event("1", "7", "+8.500"))));
    assert_ne!(short, key(&config, &catalog(&quakeml_event("1", "7", "8.51"))));
}

#[test]
fn test_malformed_xml_fails_with_conversion_error() {
    let config = file_config(FilePath::Fixed("in.xml".to_string()), false);
    let err = generator()
        .hash(&config, &unresolved(), &catalog("<q:quakeml><open>"))
        .unwrap_err();
    assert!(matches!(err, Error::Conversion { .. }));
}

// =============================================================================
// Configuration Error Tests
// =============================================================================

#[test]
fn test_missing_mechanism() {
    let config = Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_input(InputParameter::builder("times", BindingType::Int).build())
        .build();
    let err = generator()
        .hash(&config, &unresolved(), &echo_inputs(3))
        .unwrap_err();
    match err {
        Error::MissingMechanism { id, direction } => {
            assert_eq!(id, "times");
            assert_eq!(direction, "input");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_unregistered_handler_rejected() {
    let mut custom = OptionRegistry::with_defaults();
    custom.register_exit_value("strict", || {
        Arc::new(simwps::handler::ErrorIfExitValueNotZero)
    });
    let handler = custom.exit_value_handler("strict").unwrap();

    let config = Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
        .add_output(stdout_output())
        .with_exit_value_handler(handler)
        .build();

    assert!(
        CacheKeyGenerator::new(Arc::new(custom))
            .hash(&config, &unresolved(), &InputValues::new())
            .is_ok()
    );
    assert!(matches!(
        generator().hash(&config, &unresolved(), &InputValues::new()),
        Err(Error::UnknownHandler { .. })
    ));
}

#[test]
fn test_handler_choice_changes_key() {
    let registry = OptionRegistry::default();
    let build = |name: &str| {
        Configuration::builder("echo", "busybox:latest", "/work", vec!["echo".to_string()])
            .add_output(stdout_output())
            .with_stderr_handler(registry.stderr_handler(name).unwrap())
            .build()
    };
    let logging = key(&build("logging"), &InputValues::new());
    let strict = key(&build("errorIfNotEmpty"), &InputValues::new());
    assert_ne!(logging, strict);
}

// =============================================================================
// Image and Version Tests
// =============================================================================

async fn key_with_image_id(config: &Configuration, inputs: &InputValues, id: &str) -> String {
    let keys = generator().with_image_lookup(Arc::new(
        StaticImageIdLookup::new().with_image("busybox:latest", id),
    ));
    let environment = keys.environment(config).await.unwrap();
    assert_eq!(environment.image_id.as_deref(), Some(id));
    keys.hash(config, &environment, inputs).unwrap()
}

async fn key_with_runner_version(
    config: &Configuration,
    inputs: &InputValues,
    version: &str,
) -> String {
    let keys = generator().with_version_handler(Arc::new(StaticVersionHandler::new(
        Some(version.to_string()),
        None,
    )));
    let environment = keys.environment(config).await.unwrap();
    keys.hash(config, &environment, inputs).unwrap()
}

#[tokio::test]
async fn test_image_id_replaces_reference() {
    let config = echo_config();
    let inputs = echo_inputs(3);
    let aaa = key_with_image_id(&config, &inputs, "sha256:aaa").await;
    assert_eq!(aaa, key_with_image_id(&config, &inputs, "sha256:aaa").await);
    assert_ne!(aaa, key_with_image_id(&config, &inputs, "sha256:bbb").await);
    assert_ne!(aaa, key(&config, &inputs));
}

#[tokio::test]
async fn test_runner_version_changes_key() {
    let config = echo_config();
    let inputs = echo_inputs(3);
    let old = key_with_runner_version(&config, &inputs, "27.0.1").await;
    assert_ne!(old, key_with_runner_version(&config, &inputs, "27.1.0").await);
    assert_ne!(old, key(&config, &inputs));
}

#[tokio::test]
async fn test_default_environment_folds_reference() {
    let environment = generator().environment(&echo_config()).await.unwrap();
    assert_eq!(environment, KeyEnvironment::default());
}
