use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use toolloop_core::AgentConfig;
use toolloop_core::mcp::StdioServerConfig;
use toolloop_openai_model::{OpenAIConfig, OpenAIConfigBuilder};

/// The package that serves SQLite databases over MCP.
const SQLITE_SERVER_PACKAGE: &str = "@modelcontextprotocol/server-sqlite";
const DEFAULT_DB_PATH: &str = "db/employee.db";
const DEFAULT_THREAD_ID: &str = "default";

/// Errors raised while reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// The variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Everything the CLI needs to run, read from environment variables.
///
/// | Variable | Meaning |
/// |---|---|
/// | `OPENAI_API_KEY` | API key, required |
/// | `OPENAI_BASE_URL` | API base URL |
/// | `OPENAI_MODEL` | model name |
/// | `TOOLLOOP_DB_PATH` | SQLite database, `db/employee.db` by default |
/// | `TOOLLOOP_SERVER_COMMAND` | tool server command, `npx` by default |
/// | `TOOLLOOP_SERVER_ARGS` | whitespace-separated arguments of the command |
/// | `TOOLLOOP_MAX_ITERATIONS` | cap on completion rounds per query |
/// | `TOOLLOOP_CALL_TIMEOUT` | timeout of each call, in seconds |
/// | `TOOLLOOP_THREAD_ID` | conversation thread, `default` by default |
/// | `TOOLLOOP_CHECKPOINT` | file the thread is loaded from and saved to |
#[derive(Clone, Debug)]
pub struct CliConfig {
    /// Completion service settings.
    pub openai: OpenAIConfig,
    /// How to start the tool server.
    pub server: StdioServerConfig,
    /// Turn loop settings.
    pub agent: AgentConfig,
    /// The database served by the default tool server.
    pub db_path: PathBuf,
    /// The thread queries are asked on.
    pub thread_id: String,
    /// Where the thread is persisted between runs, if anywhere.
    pub checkpoint_path: Option<PathBuf>,
}

impl CliConfig {
    /// Reads the configuration from the process environment.
    #[inline]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable if set.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Empty values count as unset.
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let api_key = var("OPENAI_API_KEY")
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let mut openai = OpenAIConfigBuilder::with_api_key(api_key);
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            openai = openai.with_base_url(base_url);
        }
        if let Some(model) = var("OPENAI_MODEL") {
            openai = openai.with_model(model);
        }

        let db_path = PathBuf::from(
            var("TOOLLOOP_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_owned()),
        );
        let db_path = std::path::absolute(&db_path).unwrap_or(db_path);

        let server = match var("TOOLLOOP_SERVER_COMMAND") {
            Some(command) => {
                let args = var("TOOLLOOP_SERVER_ARGS").unwrap_or_default();
                StdioServerConfig::new(command)
                    .with_args(args.split_whitespace().map(str::to_owned))
            }
            None => StdioServerConfig::new("npx").with_args([
                "-y".to_owned(),
                SQLITE_SERVER_PACKAGE.to_owned(),
                db_path.display().to_string(),
            ]),
        };

        let mut agent = AgentConfig {
            system_prompt: include_str!("./system_prompt.md").trim().to_owned(),
            ..AgentConfig::default()
        };
        if let Some(value) = var("TOOLLOOP_MAX_ITERATIONS") {
            agent.max_iterations = match value.parse() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "TOOLLOOP_MAX_ITERATIONS",
                        value,
                    });
                }
            };
        }
        if let Some(value) = var("TOOLLOOP_CALL_TIMEOUT") {
            agent.call_timeout = value
                .parse()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|timeout| !timeout.is_zero())
                .ok_or(ConfigError::Invalid {
                    name: "TOOLLOOP_CALL_TIMEOUT",
                    value,
                })?;
        }
        let server = server.with_timeout(agent.call_timeout);

        Ok(Self {
            openai: openai.build(),
            server,
            agent,
            db_path,
            thread_id: var("TOOLLOOP_THREAD_ID")
                .unwrap_or_else(|| DEFAULT_THREAD_ID.to_owned()),
            checkpoint_path: var("TOOLLOOP_CHECKPOINT").map(PathBuf::from),
        })
    }
}
