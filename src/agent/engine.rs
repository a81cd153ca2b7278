//! ReAct engine: plan, act, update memory, repeat.
//!
//! One run drives an [`AgentState`] through three node functions. Before
//! every planner call the run checks its budgets (steps, wall clock, cost)
//! so a stop short-circuits the remaining work. Node failures become
//! observations or a terminal state; only a malformed planner reply under
//! [`MalformedOutputPolicy::Fail`] surfaces as an error.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::compaction::{apply_compaction, compactable_prefix};
use crate::agent::memory::AgentMemory;
use crate::agent::prompts::{self, SUMMARIZE_STEPS_INSTRUCTION};
use crate::agent::state::{AgentState, Turn};
use crate::agent::step::{ActionType, AgentStep, parse_step};
use crate::config::{AgentConfig, CostPolicy, MalformedOutputPolicy};
use crate::error::{AgentError, LlmError};
use crate::llm::{CompletionRequest, GenerationConfig, LlmProvider, LlmRunner, Usage};
use crate::tools::{ToolContext, ToolInput, ToolRegistry};

pub const STOPPED: &str = "Stopped";
pub const STOPPED_PLANNER_TIMEOUT: &str = "Stopped: timeout during planning";
pub const STOPPED_PLANNER_FAILED: &str = "Stopped: planning failed";
pub const STOPPED_LOOP: &str = "Stopped: repeated identical steps";
pub const STOPPED_TIME_BUDGET: &str = "Stopped: time budget exhausted";
pub const STOPPED_COST_BUDGET: &str = "Stopped: cost budget exceeded";
const FINISHED_PLACEHOLDER: &str = "Finished";

/// Node the run executes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Planning,
    Acting,
    MemoryUpdate,
    Done,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The planner chose `finish`.
    Finished,
    /// A budget, timeout or loop stopped the run.
    Stopped,
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub text: String,
    pub finish_reason: FinishReason,
    pub steps: u32,
    pub usage: Usage,
    pub cost: Decimal,
    pub provider: String,
}

/// Drives ReAct runs against one provider.
pub struct AgentEngine {
    llm: Arc<dyn LlmProvider>,
    runner: LlmRunner,
    tools: Arc<ToolRegistry>,
    memory: Arc<dyn AgentMemory>,
    config: AgentConfig,
    generation: GenerationConfig,
}

impl AgentEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        runner: LlmRunner,
        tools: Arc<ToolRegistry>,
        memory: Arc<dyn AgentMemory>,
        config: AgentConfig,
    ) -> Self {
        Self {
            llm,
            runner,
            tools,
            memory,
            config,
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Run until the planner finishes or a budget stops the run.
    pub async fn run(&self, agent_id: &str, goal: &str) -> Result<AgentOutcome, AgentError> {
        let started = Instant::now();
        let mut state = AgentState::new(agent_id, goal);

        match self.memory.load(agent_id).await {
            Ok(history) => state.history = history,
            Err(e) => warn!(agent_id, error = %e, "Failed to load agent history"),
        }
        state.memory = self.retrieve(&state).await;

        info!(agent_id, max_steps = self.config.max_steps, "Agent run started");

        let mut phase = AgentPhase::Planning;
        loop {
            phase = match phase {
                AgentPhase::Planning => {
                    if self.check_budgets(&mut state, started) {
                        AgentPhase::Done
                    } else {
                        self.planner_node(&mut state).await?
                    }
                }
                AgentPhase::Acting => self.tool_node(&mut state).await,
                AgentPhase::MemoryUpdate => self.memory_node(&mut state).await,
                AgentPhase::Done => break,
            };
        }

        if let Err(e) = self.memory.save(agent_id, &state.history).await {
            warn!(agent_id, error = %e, "Failed to save agent history");
        }

        let finish_reason = if state.finished && !state.stopped {
            FinishReason::Finished
        } else {
            FinishReason::Stopped
        };
        info!(
            agent_id,
            steps = state.step,
            finish_reason = ?finish_reason,
            cost = %state.total_cost,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Agent run finished"
        );

        Ok(AgentOutcome {
            text: state.final_answer.unwrap_or_else(|| STOPPED.to_string()),
            finish_reason,
            steps: state.step,
            usage: state.usage,
            cost: state.total_cost,
            provider: self.llm.provider_name().to_string(),
        })
    }

    /// Returns `true` (and records the stop) when the run must not plan again.
    fn check_budgets(&self, state: &mut AgentState, started: Instant) -> bool {
        if state.finished {
            return true;
        }
        let stop = if state.step >= self.config.max_steps {
            STOPPED
        } else if started.elapsed() >= self.config.max_duration {
            STOPPED_TIME_BUDGET
        } else if self.config.cost_policy == CostPolicy::Enforced
            && self
                .config
                .max_cost
                .is_some_and(|max| state.total_cost >= max)
        {
            STOPPED_COST_BUDGET
        } else {
            return false;
        };
        debug!(agent_id = %state.agent_id, reason = stop, "Agent budget exhausted");
        state.stopped = true;
        state.final_answer = Some(stop.to_string());
        true
    }

    fn charge(&self, state: &mut AgentState, usage: &Usage) {
        let rates = self.config.cost_rates;
        let prompt = Decimal::from(usage.prompt_tokens.unwrap_or(0));
        let completion = Decimal::from(usage.completion_tokens.unwrap_or(0));
        state.total_cost += (prompt * rates.prompt_per_1k + completion * rates.completion_per_1k)
            / Decimal::ONE_THOUSAND;
        state.usage.accumulate(usage);
    }

    /// Ask the LLM for the next step.
    pub async fn planner_node(&self, state: &mut AgentState) -> Result<AgentPhase, AgentError> {
        let tools = self.tools.describe().await;
        let prompt = prompts::planner_prompt(&state.goal, &state.history, &state.memory, &tools);
        let request = CompletionRequest::new(prompt).with_config(self.generation);

        let timeout = self.config.planner_timeout;
        let deadline = Instant::now() + timeout;
        let call = self
            .runner
            .run_until(self.llm.as_ref(), request, Some(deadline));
        let response = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e))
                if !matches!(e, LlmError::DeadlineExceeded { .. })
                    && Instant::now() < deadline =>
            {
                warn!(agent_id = %state.agent_id, error = %e, "Planner call failed");
                state.stop(STOPPED_PLANNER_FAILED);
                return Ok(AgentPhase::Done);
            }
            Ok(Err(_)) | Err(_) => {
                warn!(agent_id = %state.agent_id, timeout = ?timeout, "Planner timed out");
                state.stop(STOPPED_PLANNER_TIMEOUT);
                return Ok(AgentPhase::Done);
            }
        };
        self.charge(state, &response.usage);

        let step = match parse_step(&response.text) {
            Some(step) => step,
            None => match self.config.malformed_output {
                MalformedOutputPolicy::CoerceToFinish => {
                    debug!(agent_id = %state.agent_id, "Unparseable planner output, treating as final");
                    AgentStep::finish("Auto-final", response.text.trim())
                }
                MalformedOutputPolicy::Fail => {
                    let excerpt: String = response.text.chars().take(200).collect();
                    return Err(AgentError::MalformedOutput(excerpt));
                }
            },
        };

        let input = step
            .action_input
            .clone()
            .filter(|s| !s.trim().is_empty());

        if step.action == ActionType::Finish {
            let answer = input
                .clone()
                .or_else(|| state.last_observation().map(String::from))
                .unwrap_or_else(|| FINISHED_PLACEHOLDER.to_string());
            state.history.push(Turn::Step {
                thought: step.thought,
                action: ActionType::Finish.to_string(),
                action_input: input.unwrap_or_default(),
                observation: None,
            });
            state.finish(answer);
            return Ok(AgentPhase::Done);
        }

        debug!(
            agent_id = %state.agent_id,
            step = state.step,
            action = %step.action,
            "Planner chose action"
        );
        state.history.push(Turn::Step {
            thought: step.thought.clone(),
            action: step.action.to_string(),
            action_input: input.unwrap_or_default(),
            observation: None,
        });
        state.next_action = Some(step);
        Ok(AgentPhase::Acting)
    }

    /// Run the pending action and record its observation.
    pub async fn tool_node(&self, state: &mut AgentState) -> AgentPhase {
        let Some(step) = state.next_action.take() else {
            return AgentPhase::Planning;
        };
        let action = step.action.to_string();

        state.record_action(&action);
        if state.is_repeating(&action) {
            warn!(agent_id = %state.agent_id, action = %action, "Repeated identical steps, stopping");
            state.stop(STOPPED_LOOP);
            return AgentPhase::Done;
        }

        let observation = self.execute(&state.agent_id, &step).await;
        state.complete_pending(observation.clone());
        state.step += 1;

        if let Err(e) = self
            .memory
            .store_observation(&state.agent_id, &observation)
            .await
        {
            warn!(agent_id = %state.agent_id, error = %e, "Failed to store observation");
        }
        AgentPhase::MemoryUpdate
    }

    async fn execute(&self, agent_id: &str, step: &AgentStep) -> String {
        let name = step.action.as_str();
        let Some(tool) = self.tools.get(name).await else {
            return format!("No tool registered for action {name}");
        };
        let input = ToolInput::parse(step.action_input.as_deref().unwrap_or_default());
        let timeout = tool.execution_timeout().unwrap_or(self.config.tool_timeout);

        let ctx = ToolContext::new(agent_id);
        let started = Instant::now();
        match tokio::time::timeout(timeout, tool.run(input, &ctx)).await {
            Ok(Ok(output)) => {
                debug!(
                    tool = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool completed"
                );
                output
            }
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool failed");
                format!("Error: {e}")
            }
            Err(_) => {
                warn!(tool = %name, timeout = ?timeout, "Tool timed out");
                format!("Stopped: timeout during {name}")
            }
        }
    }

    /// Refresh memory snippets and compact long history.
    pub async fn memory_node(&self, state: &mut AgentState) -> AgentPhase {
        state.memory = self.retrieve(state).await;

        let Some(prefix) = compactable_prefix(
            &state.history,
            self.config.compaction_threshold,
            self.config.keep_recent,
        ) else {
            return AgentPhase::Planning;
        };

        let request = CompletionRequest::new(prompts::summarize_steps_prompt(prefix))
            .with_instruction(SUMMARIZE_STEPS_INSTRUCTION);
        let deadline = Instant::now() + self.config.planner_timeout;
        match self
            .runner
            .run_until(self.llm.as_ref(), request, Some(deadline))
            .await
        {
            Ok(response) => {
                self.charge(state, &response.usage);
                let before = state.history.len();
                apply_compaction(
                    &mut state.history,
                    self.config.keep_recent,
                    response.text.trim().to_string(),
                );
                debug!(
                    agent_id = %state.agent_id,
                    before,
                    after = state.history.len(),
                    "Compacted history"
                );
            }
            Err(e) => {
                warn!(agent_id = %state.agent_id, error = %e, "History summarization failed");
            }
        }
        AgentPhase::Planning
    }

    async fn retrieve(&self, state: &AgentState) -> Vec<String> {
        match self
            .memory
            .retrieve(&state.agent_id, &state.goal, self.config.memory_top_k)
            .await
        {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(agent_id = %state.agent_id, error = %e, "Memory retrieval failed");
                Vec::new()
            }
        }
    }
}
