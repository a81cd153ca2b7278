//! Configuration types.
//!
//! Every struct has a `Default` matching production values and a
//! `from_env()` that overrides individual fields from `INFERENCE_*`
//! variables, falling back to the default when a variable is missing or
//! does not parse.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// Worker poll loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// How often an in-flight job writes its heartbeat.
    pub heartbeat_interval: Duration,
    /// A running job without a heartbeat for this long is a zombie.
    pub zombie_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/inference.db"),
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(5),
            zombie_timeout: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let config = Self {
            db_path: std::env::var("INFERENCE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
            poll_interval: env_parse("INFERENCE_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.poll_interval),
            heartbeat_interval: env_parse("INFERENCE_HEARTBEAT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.heartbeat_interval),
            zombie_timeout: env_parse("INFERENCE_ZOMBIE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.zombie_timeout),
        };
        config.with_nonzero_intervals()
    }

    /// Replace zero durations with their defaults. A zero heartbeat or
    /// poll interval cannot drive a timer.
    pub fn with_nonzero_intervals(self) -> Self {
        let d = Self::default();
        let nonzero = |value: Duration, default: Duration, name: &str| {
            if value.is_zero() {
                tracing::warn!(setting = name, default = ?default, "Zero duration, using default");
                default
            } else {
                value
            }
        };
        Self {
            poll_interval: nonzero(self.poll_interval, d.poll_interval, "poll_interval"),
            heartbeat_interval: nonzero(
                self.heartbeat_interval,
                d.heartbeat_interval,
                "heartbeat_interval",
            ),
            zombie_timeout: nonzero(self.zombie_timeout, d.zombie_timeout, "zombie_timeout"),
            ..self
        }
    }
}

/// Retry policy for LLM calls.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before retry `k` is `backoff_base^k` seconds.
    pub backoff_base: f64,
    /// Upper bound on a single backoff sleep.
    pub max_backoff: Duration,
    /// Hard timeout on each attempt.
    pub attempt_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_retries: env_parse("INFERENCE_LLM_MAX_RETRIES").unwrap_or(d.max_retries),
            backoff_base: env_parse("INFERENCE_LLM_BACKOFF_BASE").unwrap_or(d.backoff_base),
            max_backoff: env_parse("INFERENCE_LLM_MAX_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.max_backoff),
            attempt_timeout: env_parse("INFERENCE_LLM_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.attempt_timeout),
        }
    }
}

/// Whether `max_cost` stops an agent run or is only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostPolicy {
    Advisory,
    Enforced,
}

/// What the planner does with text that matches no step format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedOutputPolicy {
    /// Treat the raw text as the final answer.
    CoerceToFinish,
    /// Fail the run.
    Fail,
}

/// Per-1k-token prices used for the cost estimate.
#[derive(Debug, Clone, Copy)]
pub struct CostRates {
    pub prompt_per_1k: Decimal,
    pub completion_per_1k: Decimal,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            prompt_per_1k: dec!(0.03),
            completion_per_1k: dec!(0.06),
        }
    }
}

/// ReAct engine budgets and tuning.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum completed tool invocations per run.
    pub max_steps: u32,
    /// Wall-clock budget for a whole run.
    pub max_duration: Duration,
    /// Timeout on the whole planner step, retries included.
    pub planner_timeout: Duration,
    /// Default tool timeout when a tool does not set its own.
    pub tool_timeout: Duration,
    /// Compact once history holds more turns than this.
    pub compaction_threshold: usize,
    /// Turns kept verbatim by compaction.
    pub keep_recent: usize,
    /// Memory snippets retrieved per iteration.
    pub memory_top_k: usize,
    pub max_cost: Option<Decimal>,
    pub cost_policy: CostPolicy,
    pub cost_rates: CostRates,
    pub malformed_output: MalformedOutputPolicy,
    /// Agent answers longer than this are summarized before storage.
    pub summarize_above_chars: usize,
    /// Agents kept by the in-process memory before the least recently
    /// written one is evicted.
    pub memory_max_agents: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_duration: Duration::from_secs(600),
            planner_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(5),
            compaction_threshold: 6,
            keep_recent: 3,
            memory_top_k: 3,
            max_cost: None,
            cost_policy: CostPolicy::Enforced,
            cost_rates: CostRates::default(),
            malformed_output: MalformedOutputPolicy::CoerceToFinish,
            summarize_above_chars: 1500,
            memory_max_agents: 1024,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let cost_policy = match std::env::var("INFERENCE_AGENT_COST_POLICY").as_deref() {
            Ok("advisory") => CostPolicy::Advisory,
            Ok("enforced") => CostPolicy::Enforced,
            _ => d.cost_policy,
        };
        let malformed_output = match std::env::var("INFERENCE_AGENT_MALFORMED_OUTPUT").as_deref() {
            Ok("fail") => MalformedOutputPolicy::Fail,
            Ok("coerce") => MalformedOutputPolicy::CoerceToFinish,
            _ => d.malformed_output,
        };
        Self {
            max_steps: env_parse("INFERENCE_AGENT_MAX_STEPS").unwrap_or(d.max_steps),
            max_duration: env_parse("INFERENCE_AGENT_MAX_DURATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.max_duration),
            planner_timeout: env_parse("INFERENCE_AGENT_PLANNER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.planner_timeout),
            tool_timeout: env_parse("INFERENCE_AGENT_TOOL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.tool_timeout),
            max_cost: env_parse("INFERENCE_AGENT_MAX_COST").or(d.max_cost),
            memory_max_agents: env_parse("INFERENCE_AGENT_MEMORY_MAX_AGENTS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(d.memory_max_agents),
            cost_policy,
            malformed_output,
            ..d
        }
    }
}

/// Input and output policy for the safety layer.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub max_prompt_length: usize,
    /// Substrings (case-insensitive) naming system commands.
    pub forbidden_commands: Vec<String>,
    /// Regexes for instruction-override attempts.
    pub instruction_patterns: Vec<String>,
    /// Regexes for attempts to leak secrets or the system prompt.
    pub exfiltration_patterns: Vec<String>,
    pub max_response_length: usize,
    /// Regexes that mark a generated response as unusable.
    pub forbidden_output_patterns: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_prompt_length: 8000,
            forbidden_commands: ["rm -rf", "shutdown", "mkfs", "sudo ", ":(){"]
                .into_iter()
                .map(String::from)
                .collect(),
            instruction_patterns: [
                r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+instructions",
                r"(?i)disregard\s+(the\s+)?(system|previous)\s+(prompt|instructions)",
                r"(?i)you\s+are\s+now\s+(in\s+)?developer\s+mode",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            exfiltration_patterns: [
                r"(?i)(reveal|print|show|repeat)\s+(your\s+|the\s+)?(system\s+prompt|api[_\s-]?key|secret)",
                r"(?i)(environment\s+variables|/etc/passwd|\.env\b)",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_response_length: 20_000,
            forbidden_output_patterns: vec![r"(?i)as an ai language model".to_string()],
        }
    }
}

impl SafetyConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_prompt_length: env_parse("INFERENCE_MAX_PROMPT_LENGTH")
                .unwrap_or(d.max_prompt_length),
            forbidden_commands: env_list("INFERENCE_FORBIDDEN_COMMANDS")
                .unwrap_or(d.forbidden_commands),
            max_response_length: env_parse("INFERENCE_MAX_RESPONSE_LENGTH")
                .unwrap_or(d.max_response_length),
            ..d
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(worker.zombie_timeout, Duration::from_secs(300));
        assert_eq!(worker.poll_interval, Duration::from_millis(500));

        let agent = AgentConfig::default();
        assert_eq!(agent.max_steps, 10);
        assert_eq!(agent.compaction_threshold, 6);
        assert_eq!(agent.keep_recent, 3);
        assert_eq!(agent.cost_policy, CostPolicy::Enforced);
        assert!(agent.max_cost.is_none());

        assert_eq!(RunnerConfig::default().max_retries, 3);
    }

    #[test]
    fn zero_worker_durations_fall_back_to_defaults() {
        let config = WorkerConfig {
            poll_interval: Duration::ZERO,
            heartbeat_interval: Duration::ZERO,
            zombie_timeout: Duration::ZERO,
            ..WorkerConfig::default()
        }
        .with_nonzero_intervals();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.zombie_timeout, Duration::from_secs(300));

        let custom = WorkerConfig {
            heartbeat_interval: Duration::from_secs(2),
            ..WorkerConfig::default()
        }
        .with_nonzero_intervals();
        assert_eq!(custom.heartbeat_interval, Duration::from_secs(2));
    }

    #[test]
    fn safety_defaults_compile_as_regexes() {
        let cfg = SafetyConfig::default();
        for p in cfg
            .instruction_patterns
            .iter()
            .chain(&cfg.exfiltration_patterns)
            .chain(&cfg.forbidden_output_patterns)
        {
            assert!(regex::Regex::new(p).is_ok(), "bad pattern {p}");
        }
    }
}
