//! # Cached Process Execution
//!
//! [`CachedProcess`] ties one [`Configuration`] to a cache and a runner and
//! serves requests against it.
//!
//! ## Request Flow
//!
//! ```text
//! requested outputs known? ── inputs present and valid?
//!     → cache key ──hit──→ cached outputs
//!         │miss (or unreadable entry)
//!         ▼
//!     assemble argv / stdin / files → runner
//!         → stderr handler → exit value handler → stdout handler
//!         → convert outputs (optional failures skipped)
//!         → store under key → outputs
//! ```
//!
//! Only the first value of each input is delivered, and the key folds the
//! same value. Default values are descriptive metadata: an absent input is
//! never replaced by its declared default.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::configuration::Configuration;
use crate::data::{Data, InputValues, OutputValues};
use crate::error::{Error, Result};
use crate::format;
use crate::hash::CacheKeyGenerator;
use crate::parameter::{InputMechanism, OutputMechanism, OutputParameter};
use crate::runtime::{InputFile, ProcessRunner, RunOutput, RunRequest};
use crate::storage::{CachedResult, ResultCache};

/// Outputs of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Key the outputs are stored under.
    pub cache_key: String,
    /// True when the program was not executed.
    pub from_cache: bool,
    /// Collected outputs by identifier.
    pub outputs: OutputValues,
}

/// A configured program with result caching.
pub struct CachedProcess {
    configuration: Arc<Configuration>,
    keys: CacheKeyGenerator,
    cache: Arc<dyn ResultCache>,
    runner: Arc<dyn ProcessRunner>,
}

impl CachedProcess {
    pub fn new(
        configuration: Arc<Configuration>,
        keys: CacheKeyGenerator,
        cache: Arc<dyn ResultCache>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            configuration,
            keys,
            cache,
            runner,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Validates a request and computes its cache key without running it.
    pub async fn cache_key(
        &self,
        inputs: &InputValues,
        requested: &BTreeSet<String>,
    ) -> Result<String> {
        self.check_requested(requested)?;
        self.check_inputs(inputs)?;
        let environment = self.keys.environment(&self.configuration).await?;
        self.keys
            .hash_for_outputs(&self.configuration, &environment, inputs, requested)
    }

    /// Serves a request from the cache or by running the program.
    ///
    /// An empty `requested` set means all outputs. An entry that cannot be
    /// read counts as a miss and is overwritten by the new result.
    pub async fn run(
        &self,
        inputs: &InputValues,
        requested: &BTreeSet<String>,
    ) -> Result<ProcessOutput> {
        let process = self.configuration.identifier();
        let cache_key = self.cache_key(inputs, requested).await?;

        match self.cache.get(&cache_key) {
            Ok(Some(cached)) => {
                info!(process, key = %cache_key, "cache hit");
                return Ok(ProcessOutput {
                    cache_key,
                    from_cache: true,
                    outputs: cached.outputs,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(
                process,
                key = %cache_key,
                error = %e,
                "unreadable cache entry, running again"
            ),
        }

        let selected = self.selected_outputs(requested);
        let request = self.assemble(inputs, &selected)?;
        debug!(
            process,
            runner = self.runner.name(),
            argv = ?request.command,
            files = request.input_files.len(),
            "running process"
        );

        let output = self.runner.run(request).await?;
        self.apply_handlers(&output)?;
        let outputs = collect_outputs(&selected, &output)?;

        self.cache
            .put(&cache_key, CachedResult::new(process, outputs.clone()))?;
        info!(process, key = %cache_key, outputs = outputs.len(), "stored result");

        Ok(ProcessOutput {
            cache_key,
            from_cache: false,
            outputs,
        })
    }

    /// Reads a cached run: one output when `output` is given, else all.
    pub fn read_from_cache(&self, key: &str, output: Option<&str>) -> Result<OutputValues> {
        read_cached(self.cache.as_ref(), key, output)
    }

    fn check_requested(&self, requested: &BTreeSet<String>) -> Result<()> {
        match requested
            .iter()
            .find(|id| self.configuration.output(id).is_none())
        {
            Some(id) => Err(Error::UnknownOutput { id: id.clone() }),
            None => Ok(()),
        }
    }

    fn check_inputs(&self, inputs: &InputValues) -> Result<()> {
        if let Some(id) = inputs
            .keys()
            .find(|id| self.configuration.input(id).is_none())
        {
            return Err(Error::InvalidInput {
                id: id.clone(),
                reason: "not an input of this process".to_string(),
            });
        }
        for input in self.configuration.inputs() {
            match inputs.get(input.identifier()).and_then(|v| v.first()) {
                Some(value) => input.validate(value)?,
                None if input.is_optional() => {}
                None => {
                    return Err(Error::MissingInput {
                        id: input.identifier().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn selected_outputs(&self, requested: &BTreeSet<String>) -> Vec<&OutputParameter> {
        self.configuration
            .outputs()
            .iter()
            .filter(|o| requested.is_empty() || requested.contains(o.identifier()))
            .collect()
    }

    /// Builds the runner request; generated file names are fresh per call.
    fn assemble(&self, inputs: &InputValues, selected: &[&OutputParameter]) -> Result<RunRequest> {
        let config = &self.configuration;
        let mut command: Vec<String> = config.command().to_vec();
        command.extend(config.default_flags().iter().cloned());
        let mut stdin = Vec::new();
        let mut input_files = Vec::new();

        for input in config.inputs() {
            let mechanism = input.mechanism()?;
            let Some(value) = inputs.get(input.identifier()).and_then(|v| v.first()) else {
                continue;
            };
            match mechanism {
                InputMechanism::CommandLineArgument { flag } => {
                    command.extend(format::to_command_line(value, flag.as_deref())?);
                }
                InputMechanism::Stdin => stdin.extend(format::to_bytes(value)?),
                InputMechanism::File { path, argument } => {
                    let resolved = path.resolve(input.binding());
                    for (path, content) in format::to_files(value, &resolved)? {
                        input_files.push(InputFile { path, content });
                    }
                    if let Some(argument) = argument {
                        command.extend(format::path_to_command_line(
                            &resolved,
                            argument.flag.as_deref(),
                        ));
                    }
                }
            }
        }

        let mut output_files = Vec::new();
        for output in selected {
            if let OutputMechanism::File { path } = output.mechanism()? {
                output_files.extend(format::output_paths(output.binding(), path));
            }
        }

        Ok(RunRequest {
            image: config.image().to_string(),
            working_directory: config.working_directory().to_string(),
            command,
            stdin,
            input_files,
            output_files,
        })
    }

    fn apply_handlers(&self, output: &RunOutput) -> Result<()> {
        let config = &self.configuration;
        if let Some(handler) = config.stderr_handler() {
            handler.get().handle_stderr(&output.stderr_text())?;
        }
        if let Some(handler) = config.exit_value_handler() {
            handler.get().handle_exit_value(output.exit_code)?;
        }
        if let Some(handler) = config.stdout_handler() {
            handler.get().handle_stdout(&output.stdout_text());
        }
        Ok(())
    }
}

/// Reads outputs stored under a key: one output when `output` is given,
/// else all of them.
pub fn read_cached(cache: &dyn ResultCache, key: &str, output: Option<&str>) -> Result<OutputValues> {
    let cached = cache.get(key)?.ok_or_else(|| Error::CacheMiss {
        key: key.to_string(),
    })?;
    match output {
        None => Ok(cached.outputs),
        Some(id) => {
            let data = cached
                .outputs
                .get(id)
                .cloned()
                .ok_or_else(|| Error::UnknownOutput { id: id.to_string() })?;
            Ok(OutputValues::from([(id.to_string(), data)]))
        }
    }
}

fn collect_outputs(selected: &[&OutputParameter], output: &RunOutput) -> Result<OutputValues> {
    let mut outputs = OutputValues::new();
    for parameter in selected {
        match convert_output(parameter, output) {
            Ok(data) => {
                outputs.insert(parameter.identifier().to_string(), data);
            }
            Err(e) if parameter.is_optional() => {
                warn!(output = parameter.identifier(), error = %e, "skipping optional output");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outputs)
}

fn convert_output(parameter: &OutputParameter, output: &RunOutput) -> Result<Data> {
    let binding = parameter.binding();
    let data = match parameter.mechanism()? {
        OutputMechanism::Stdout => format::from_bytes(binding, &output.stdout)?,
        OutputMechanism::Stderr => format::from_bytes(binding, &output.stderr)?,
        OutputMechanism::ExitValue => Data::Int(output.exit_code),
        OutputMechanism::File { path } => {
            format::from_files(binding, path, |p| output.files.get(p).cloned())?
        }
    };
    parameter.validate(&data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BindingType;
    use crate::options::OptionRegistry;
    use crate::parameter::{FilePath, InputParameter};
    use crate::storage::MemoryCache;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records requests and answers with a canned output.
    struct RecordingRunner {
        requests: Mutex<Vec<RunRequest>>,
        output: RunOutput,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        fn name(&self) -> &str {
            "recording"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn run(&self, request: RunRequest) -> Result<RunOutput> {
            self.requests.lock().unwrap().push(request);
            Ok(self.output.clone())
        }
    }

    fn process(config: Configuration, output: RunOutput) -> (CachedProcess, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner {
            requests: Mutex::new(Vec::new()),
            output,
        });
        let keys = CacheKeyGenerator::new(Arc::new(OptionRegistry::default()));
        let process = CachedProcess::new(
            Arc::new(config),
            keys,
            Arc::new(MemoryCache::default()),
            runner.clone(),
        );
        (process, runner)
    }

    #[tokio::test]
    async fn test_assembles_argv_stdin_and_files() {
        let config = Configuration::builder(
            "Assemble",
            "alpine:3",
            "/work",
            vec!["tool".to_string()],
        )
        .with_default_flags(vec!["--quiet".to_string()])
        .add_input(
            InputParameter::builder("times", BindingType::Int)
                .as_command_line_argument(Some("-n"))
                .build(),
        )
        .add_input(
            InputParameter::builder("text", BindingType::String)
                .to_stdin()
                .build(),
        )
        .add_input(
            InputParameter::builder("doc", BindingType::Xml)
                .to_file_as_argument(FilePath::Generated, Some("--doc"))
                .build(),
        )
        .add_output(
            OutputParameter::builder("out", BindingType::String)
                .from_stdout()
                .build(),
        )
        .build();
        let (process, runner) = process(
            config,
            RunOutput {
                stdout: b"ok".to_vec(),
                ..Default::default()
            },
        );

        let inputs = InputValues::from([
            ("times".to_string(), vec![Data::Int(3), Data::Int(9)]),
            ("text".to_string(), vec![Data::String("hello".to_string())]),
            ("doc".to_string(), vec![Data::Xml("<a> <b/> </a>".to_string())]),
        ]);
        let result = process.run(&inputs, &BTreeSet::new()).await.unwrap();
        assert_eq!(result.outputs["out"], Data::String("ok".to_string()));

        let requests = runner.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(&request.command[..4], ["tool", "--quiet", "-n", "3"]);
        assert_eq!(request.command[4], "--doc");
        assert_eq!(request.input_files.len(), 1);
        assert_eq!(request.input_files[0].path, request.command[5]);
        assert_eq!(request.input_files[0].content, b"<a><b></b></a>");
        assert_eq!(request.stdin, b"hello");
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() {
        let config = Configuration::builder("Echo", "alpine:3", "/", vec!["echo".to_string()])
            .add_output(
                OutputParameter::builder("code", BindingType::Int)
                    .from_exit_value()
                    .build(),
            )
            .build();
        let (process, runner) = process(config, RunOutput::default());

        let first = process.run(&HashMap::new(), &BTreeSet::new()).await.unwrap();
        let second = process.run(&HashMap::new(), &BTreeSet::new()).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.cache_key, second.cache_key);
        assert_eq!(second.outputs["code"], Data::Int(0));
        assert_eq!(runner.requests.lock().unwrap().len(), 1);

        let single = process
            .read_from_cache(&first.cache_key, Some("code"))
            .unwrap();
        assert_eq!(single.len(), 1);
        assert!(matches!(
            process.read_from_cache(&first.cache_key, Some("other")),
            Err(Error::UnknownOutput { .. })
        ));
        assert!(matches!(
            process.read_from_cache(&"0".repeat(64), None),
            Err(Error::CacheMiss { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_errors() {
        let config = Configuration::builder("Echo", "alpine:3", "/", vec!["echo".to_string()])
            .add_input(
                InputParameter::builder("times", BindingType::Int)
                    .as_command_line_argument(None)
                    .build(),
            )
            .build();
        let (process, runner) = process(config, RunOutput::default());

        let missing = process.run(&HashMap::new(), &BTreeSet::new()).await;
        assert!(matches!(missing, Err(Error::MissingInput { .. })));

        let inputs = InputValues::from([("times".to_string(), vec![Data::Int(1)])]);
        let unknown = process
            .run(&inputs, &BTreeSet::from(["nothing".to_string()]))
            .await;
        assert!(matches!(unknown, Err(Error::UnknownOutput { .. })));

        let wrong = InputValues::from([("times".to_string(), vec![Data::Boolean(true)])]);
        let invalid = process.run(&wrong, &BTreeSet::new()).await;
        assert!(matches!(invalid, Err(Error::InvalidInput { .. })));

        assert!(runner.requests.lock().unwrap().is_empty());
    }
}
