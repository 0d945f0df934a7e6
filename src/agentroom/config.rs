//! Configuration for agentroom.
//!
//! Provides the [`OrchestrationConfig`] struct holding every tunable bound and interval used by
//! the orchestration client, the strategies, the pipeline and the relationship engine.  Build it
//! by hand, from `AGENTROOM_*` environment variables, or from a JSON file; missing fields keep
//! their defaults.
//!
//! # Example
//!
//! ```rust
//! use agentroom::OrchestrationConfig;
//!
//! let config = OrchestrationConfig {
//!     circular_max_rounds: 3,
//!     discuss_tick_delay_ms: 0,
//!     ..Default::default()
//! };
//! assert_eq!(config.tick_interval_ms, 1_000);
//! ```

use std::env;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat_service::{DEFAULT_CONTEXT_WINDOW, DEFAULT_FALLBACK_REPLY};
use crate::relationship::AnalyzerKind;
use crate::strategy::CharacterSelection;

/// Prefix shared by all environment variables read by [`OrchestrationConfig::from_env`].
pub const ENV_PREFIX: &str = "AGENTROOM_";

/// Failure while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Io(std::io::Error),
    /// The configuration file is not valid JSON for [`OrchestrationConfig`].
    Parse(serde_json::Error),
    /// A setting holds a value of the wrong type or outside its range.
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "Failed to read config: {}", err),
            ConfigError::Parse(err) => write!(f, "Failed to parse config: {}", err),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value for {}: {:?}", key, value)
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Tunables for rooms, strategies, pipelines and relationship tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Pause between two strategy ticks of a background client.
    pub tick_interval_ms: u64,

    /// Tick budget of a background client; `None` runs until stopped.
    pub max_ticks: Option<u64>,

    /// Full rotations a circular discussion may complete before it stops.
    pub circular_max_rounds: u32,

    /// Ticks between two narrations in narrator rooms.
    pub narrator_interval: u32,

    /// Character replies that force a narration in narrator rooms.
    pub narrator_max_agent_responses: u32,

    /// How narrator rooms choose the next character.
    pub character_selection: CharacterSelection,

    /// Agent messages between two narrator injections in circular-with-summary rooms.
    pub summary_narrator_interval: u32,

    /// Round bound of circular-with-summary rooms; `None` is unbounded.
    pub summary_max_rounds: Option<u32>,

    /// Discussion iterations in full-context rooms.
    pub full_context_max_iterations: u32,

    /// Agents queried per iteration in full-context rooms.
    pub full_context_agents_per_iteration: usize,

    /// Upper bound on strategy ticks during the pipeline DISCUSS stage.
    pub max_discuss_rounds: u32,

    /// Pause between two DISCUSS ticks.
    pub discuss_tick_delay_ms: u64,

    /// Recent room messages sent to agents with every prompt, applied by
    /// [`AgentChatService::with_config`](crate::chat_service::AgentChatService::with_config).
    pub context_window: usize,

    /// Fraction by which every relationship edge relaxes toward zero after each processed
    /// message.  `0.0` disables decay.
    pub relationship_decay_rate: f64,

    /// Maximum number of deltas kept per relationship edge.
    pub relationship_history_cap: usize,

    /// Analyzer used for per-message relationship updates.
    pub relationship_analyzer: AnalyzerKind,

    /// Ask an agent for fact triples before falling back to the heuristic extractor.
    pub llm_fact_extraction: bool,

    /// Reply substituted for a failed completion, applied by
    /// [`AgentChatService::with_config`](crate::chat_service::AgentChatService::with_config).
    pub fallback_reply: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            max_ticks: None,
            circular_max_rounds: 5,
            narrator_interval: 2,
            narrator_max_agent_responses: 2,
            character_selection: CharacterSelection::RoundRobin,
            summary_narrator_interval: 2,
            summary_max_rounds: None,
            full_context_max_iterations: 2,
            full_context_agents_per_iteration: 2,
            max_discuss_rounds: 50,
            discuss_tick_delay_ms: 300,
            context_window: DEFAULT_CONTEXT_WINDOW,
            relationship_decay_rate: 0.0,
            relationship_history_cap: 100,
            relationship_analyzer: AnalyzerKind::Heuristic,
            llm_fact_extraction: true,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    let key = format!("{}{}", ENV_PREFIX, name);
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}

impl OrchestrationConfig {
    /// Defaults overridden by any `AGENTROOM_*` variables present in the environment.
    ///
    /// Recognised variables are the upper-cased field names, e.g.
    /// `AGENTROOM_TICK_INTERVAL_MS` or `AGENTROOM_MAX_DISCUSS_ROUNDS`.  Enum-valued fields take
    /// their snake-case names (`AGENTROOM_RELATIONSHIP_ANALYZER=llm`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_value::<u64>("TICK_INTERVAL_MS")? {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}TICK_INTERVAL_MS", ENV_PREFIX),
                    value: v.to_string(),
                });
            }
            config.tick_interval_ms = v;
        }
        if let Some(v) = env_value("MAX_TICKS")? {
            config.max_ticks = Some(v);
        }
        if let Some(v) = env_value("CIRCULAR_MAX_ROUNDS")? {
            config.circular_max_rounds = v;
        }
        if let Some(v) = env_value("NARRATOR_INTERVAL")? {
            config.narrator_interval = v;
        }
        if let Some(v) = env_value("NARRATOR_MAX_AGENT_RESPONSES")? {
            config.narrator_max_agent_responses = v;
        }
        if let Some(v) = env_value("CHARACTER_SELECTION")? {
            config.character_selection = v;
        }
        if let Some(v) = env_value("SUMMARY_NARRATOR_INTERVAL")? {
            config.summary_narrator_interval = v;
        }
        if let Some(v) = env_value("SUMMARY_MAX_ROUNDS")? {
            config.summary_max_rounds = Some(v);
        }
        if let Some(v) = env_value("FULL_CONTEXT_MAX_ITERATIONS")? {
            config.full_context_max_iterations = v;
        }
        if let Some(v) = env_value("FULL_CONTEXT_AGENTS_PER_ITERATION")? {
            config.full_context_agents_per_iteration = v;
        }
        if let Some(v) = env_value("MAX_DISCUSS_ROUNDS")? {
            config.max_discuss_rounds = v;
        }
        if let Some(v) = env_value("DISCUSS_TICK_DELAY_MS")? {
            config.discuss_tick_delay_ms = v;
        }
        if let Some(v) = env_value("CONTEXT_WINDOW")? {
            config.context_window = v;
        }
        if let Some(v) = env_value("RELATIONSHIP_DECAY_RATE")? {
            config.relationship_decay_rate = v;
        }
        if let Some(v) = env_value("RELATIONSHIP_HISTORY_CAP")? {
            config.relationship_history_cap = v;
        }
        if let Some(v) = env_value("RELATIONSHIP_ANALYZER")? {
            config.relationship_analyzer = v;
        }
        if let Some(v) = env_value("LLM_FACT_EXTRACTION")? {
            config.llm_fact_extraction = v;
        }
        if let Some(v) = env_value::<String>("FALLBACK_REPLY")? {
            config.fallback_reply = v;
        }

        Ok(config)
    }

    /// Load a JSON file.  Unknown fields are ignored, missing fields keep their defaults, and
    /// the result must pass [`validate`](Self::validate).
    ///
    /// ```rust,no_run
    /// use agentroom::OrchestrationConfig;
    ///
    /// let config = OrchestrationConfig::from_json_file("agentroom.json").unwrap();
    /// println!("tick every {:?}", config.tick_interval());
    /// ```
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.  `tick_interval_ms` must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tick_interval_ms".to_string(),
                value: self.tick_interval_ms.to_string(),
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn discuss_tick_delay(&self) -> Duration {
        Duration::from_millis(self.discuss_tick_delay_ms)
    }
}
