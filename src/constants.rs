//! # Process Wrapper Constants
//!
//! Configuration keys, option names, format identifiers, timeouts and cache
//! bounds used throughout the crate. These constants are the single source
//! of truth for the JSON configuration vocabulary: the parser, the option
//! registry and the tests all refer to them rather than to string literals.
//!
//! ## Cross-References
//!
//! - [`crate::parse`]: configuration document keys
//! - [`crate::options`]: handler option names
//! - [`crate::format`]: MIME types and schemas
//! - [`crate::hash`]: key folding tags
//! - [`crate::storage`]: cache bounds
//! - [`crate::runtimes`]: execution timeouts and docker hardening flags

use std::time::Duration;

// =============================================================================
// Configuration Document Keys
// =============================================================================

/// Process identifier.
pub const KEY_TITLE: &str = "title";
/// Optional human readable description.
pub const KEY_ABSTRACT: &str = "abstract";
/// Container image reference.
pub const KEY_IMAGE_ID: &str = "imageId";
/// Working directory inside the execution environment.
pub const KEY_WORKING_DIRECTORY: &str = "workingDirectory";
/// Command line, split with shell quoting rules.
pub const KEY_COMMAND_TO_EXECUTE: &str = "commandToExecute";
/// Flags placed right after the command.
pub const KEY_DEFAULT_COMMAND_LINE_FLAGS: &str = "defaultCommandLineFlags";
/// Input parameter array.
pub const KEY_INPUT: &str = "input";
/// Output parameter array.
pub const KEY_OUTPUT: &str = "output";
/// Stderr handler option.
pub const KEY_STDERR_HANDLER: &str = "stderrHandler";
/// Exit value handler option.
pub const KEY_EXIT_VALUE_HANDLER: &str = "exitValueHandler";
/// Stdout handler option.
pub const KEY_STDOUT_HANDLER: &str = "stdoutHandler";

/// Input delivery mechanism.
pub const KEY_USE_AS: &str = "useAs";
/// Output collection mechanism.
pub const KEY_READ_FROM: &str = "readFrom";
/// Binding type of a parameter.
pub const KEY_TYPE: &str = "type";
/// Whether a parameter may be omitted.
pub const KEY_OPTIONAL: &str = "optional";
/// Flag preceding a command line value.
pub const KEY_COMMAND_LINE_FLAG: &str = "commandLineFlag";
/// Puts the path of a file input on the command line.
pub const KEY_PASS_AS_ARGUMENT: &str = "passAsArgument";
/// Default literal value.
pub const KEY_DEFAULT: &str = "default";
/// Allowed literal values.
pub const KEY_ALLOWED: &str = "allowed";
/// Supported coordinate reference systems of a bounding box.
pub const KEY_CRS: &str = "crs";
/// XML schema of a complex parameter.
pub const KEY_SCHEMA: &str = "schema";
/// Default MIME type of a complex parameter.
pub const KEY_DEFAULT_FORMAT: &str = "defaultFormat";
/// File path for file inputs and outputs.
pub const KEY_PATH: &str = "path";

// =============================================================================
// Mechanism Option Values
// =============================================================================

/// `useAs` value for argv delivery.
pub const USE_AS_COMMAND_LINE_ARGUMENT: &str = "commandLineArgument";
/// `useAs` value for stdin delivery.
pub const USE_AS_STDIN: &str = "stdin";
/// `useAs` value for file delivery.
pub const USE_AS_FILE: &str = "file";

/// `readFrom` value for stdout collection.
pub const READ_FROM_STDOUT: &str = "stdout";
/// `readFrom` value for stderr collection.
pub const READ_FROM_STDERR: &str = "stderr";
/// `readFrom` value for exit value collection.
pub const READ_FROM_EXIT_VALUE: &str = "exitValue";
/// `readFrom` value for file collection.
pub const READ_FROM_FILES: &str = "files";

// =============================================================================
// Handler Option Names
// =============================================================================

/// Do nothing.
pub const HANDLER_IGNORE: &str = "ignore";
/// Log the stream or exit value.
pub const HANDLER_LOGGING: &str = "logging";
/// Fail when stderr contains anything.
pub const HANDLER_ERROR_IF_NOT_EMPTY: &str = "errorIfNotEmpty";
/// Fail when stderr contains a python traceback.
pub const HANDLER_PYTHON_TRACEBACK: &str = "pythonTraceback";
/// Fail when stderr contains a line starting with `Error`.
pub const HANDLER_R_ERROR: &str = "rError";
/// Fail when the exit value is not zero.
pub const HANDLER_ERROR_IF_NOT_ZERO: &str = "errorIfNotZero";

/// Marker that starts a python traceback on stderr.
pub const PYTHON_TRACEBACK_MARKER: &str = "Traceback (most recent call";

/// Line prefix R uses for fatal errors.
pub const R_ERROR_MARKER: &str = "Error";

// =============================================================================
// Formats and Schemas
// =============================================================================

/// MIME type for XML documents.
pub const MIME_TYPE_XML: &str = "text/xml";
/// MIME type for plain text.
pub const MIME_TYPE_PLAIN_TEXT: &str = "text/plain";
/// MIME type for JSON documents.
pub const MIME_TYPE_JSON: &str = "application/json";
/// MIME type for GeoJSON documents.
pub const MIME_TYPE_GEOJSON: &str = "application/vnd.geo+json";
/// MIME type for GeoTIFF rasters.
pub const MIME_TYPE_GEOTIFF: &str = "image/geotiff";
/// MIME type for shapefiles.
pub const MIME_TYPE_SHAPEFILE: &str = "application/x-zipped-shp";
/// MIME type for arbitrary files.
pub const MIME_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// QuakeML 1.2 schema location.
pub const SCHEMA_QUAKEML: &str = "http://quakeml.org/xmlns/quakeml/1.2/QuakeML-1.2.xsd";
/// USGS shakemap grid schema location.
pub const SCHEMA_SHAKEMAP: &str =
    "http://earthquake.usgs.gov/eqcenter/shakemap/xml/schemas/shakemap.xsd";
/// OpenQuake NRML 0.4 namespace, used as schema reference.
pub const SCHEMA_NRML: &str = "http://openquake.org/xmlns/nrml/0.4";

/// Prefix of generated input file names.
pub const GENERATED_FILE_PREFIX: &str = "inputfile";

/// Sidecar extensions that make up a shapefile, `.shp` first.
pub const SHAPEFILE_EXTENSIONS: [&str; 4] = ["shp", "shx", "dbf", "prj"];

// =============================================================================
// Cache Key
// =============================================================================

/// Placeholder folded for an input without a realized value.
pub const ABSENT_PLACEHOLDER: &str = "absent";

/// Version of the key folding layout. Bump when folding changes.
pub const CACHE_KEY_LAYOUT_VERSION: &str = "1";

/// Length of a hex encoded SHA-256 cache key.
pub const CACHE_KEY_LEN: usize = 64;

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum container image reference length in bytes.
///
/// Registry implementations may have lower limits.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Maximum configuration document size (1 MiB).
pub const MAX_CONFIG_SIZE: usize = 1024 * 1024;

/// Default weight limit of the in-memory result cache (512 MiB).
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 512 * 1024 * 1024;

/// Default lifetime of a cached result (60 days).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 24 * 60 * 60);

// =============================================================================
// Timeouts
// =============================================================================

/// Upper bound for a single process run, including file transfer.
///
/// Hazard simulations are slow; this only catches hung containers.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Timeout for docker housekeeping calls (create, cp, rm, inspect).
pub const DOCKER_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Docker Hardening
// =============================================================================

/// Capabilities dropped from every container.
pub const DROPPED_CAPABILITIES: [&str; 14] = [
    "chown",
    "dac_override",
    "fowner",
    "fsetid",
    "kill",
    "setgid",
    "setuid",
    "setpcap",
    "net_bind_service",
    "net_raw",
    "sys_chroot",
    "mknod",
    "audit_write",
    "setfcap",
];

// =============================================================================
// Storage Paths and Settings
// =============================================================================

/// Directory below the user's home holding simwps state.
pub const STATE_DIR: &str = ".simwps";

/// Subdirectory for cached results.
pub const CACHE_DIR: &str = "cache";

/// Environment variable overriding the cache directory.
pub const ENV_CACHE_DIR: &str = "SIMWPS_CACHE_DIR";
/// Environment variable selecting the runner (`docker` or `local`).
pub const ENV_RUNNER: &str = "SIMWPS_RUNNER";
/// Environment variable for the cache weight limit in MiB.
pub const ENV_CACHE_MAX_MB: &str = "SIMWPS_CACHE_MAX_MB";
/// Environment variable for the cache lifetime in days.
pub const ENV_CACHE_TTL_DAYS: &str = "SIMWPS_CACHE_TTL_DAYS";
