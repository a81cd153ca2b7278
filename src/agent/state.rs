//! Per-run agent state.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agent::step::AgentStep;
use crate::llm::Usage;

/// Size of the recent-action window.
pub const ACTION_WINDOW: usize = 5;

/// Identical completed steps that count as a stuck loop.
pub const LOOP_WINDOW: usize = 3;

/// One history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    Step {
        thought: String,
        action: String,
        action_input: String,
        /// `None` while the action is pending, and on the final step.
        observation: Option<String>,
    },
    /// Replaces a compacted prefix of older turns.
    Summary { text: String },
}

impl Turn {
    pub fn is_summary(&self) -> bool {
        matches!(self, Self::Summary { .. })
    }
}

/// Everything one ReAct run reads and writes.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub agent_id: String,
    pub goal: String,
    pub history: Vec<Turn>,
    /// Memory snippets retrieved for the current iteration.
    pub memory: Vec<String>,
    /// Completed tool invocations.
    pub step: u32,
    pub finished: bool,
    /// Set when a budget, timeout or loop ended the run instead of the planner.
    pub stopped: bool,
    pub final_answer: Option<String>,
    /// Names of the most recent actions, oldest first.
    pub last_actions: VecDeque<String>,
    pub total_cost: Decimal,
    pub usage: Usage,
    /// Parsed action waiting for the tool node.
    pub next_action: Option<AgentStep>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            goal: goal.into(),
            history: Vec::new(),
            memory: Vec::new(),
            step: 0,
            finished: false,
            stopped: false,
            final_answer: None,
            last_actions: VecDeque::with_capacity(ACTION_WINDOW),
            total_cost: Decimal::ZERO,
            usage: Usage::default(),
            next_action: None,
        }
    }

    /// Mark the run done with an answer.
    pub fn finish(&mut self, answer: impl Into<String>) {
        self.finished = true;
        self.final_answer = Some(answer.into());
        self.next_action = None;
    }

    /// End the run early with a stop message.
    pub fn stop(&mut self, message: impl Into<String>) {
        self.finish(message);
        self.stopped = true;
    }

    pub fn record_action(&mut self, name: &str) {
        if self.last_actions.len() == ACTION_WINDOW {
            self.last_actions.pop_front();
        }
        self.last_actions.push_back(name.to_string());
    }

    /// Observation of the most recent step turn that has one.
    pub fn last_observation(&self) -> Option<&str> {
        match self.history.last() {
            Some(Turn::Step {
                observation: Some(obs),
                ..
            }) => Some(obs),
            _ => None,
        }
    }

    /// Write the observation into the trailing pending turn.
    pub fn complete_pending(&mut self, text: String) {
        if let Some(Turn::Step { observation, .. }) = self.history.last_mut()
            && observation.is_none()
        {
            *observation = Some(text);
        }
    }

    /// Whether running `action` again would repeat a stuck loop: the
    /// [`LOOP_WINDOW`] completed steps right before the pending turn all
    /// used `action` and all observed the same thing.
    pub fn is_repeating(&self, action: &str) -> bool {
        let window: Vec<&str> = self
            .last_actions
            .iter()
            .rev()
            .take(LOOP_WINDOW)
            .map(String::as_str)
            .collect();
        if window.len() < LOOP_WINDOW || window.iter().any(|a| *a != action) {
            return false;
        }

        let completed = match self.history.last() {
            Some(Turn::Step {
                observation: None, ..
            }) => &self.history[..self.history.len() - 1],
            _ => &self.history[..],
        };
        if completed.len() < LOOP_WINDOW {
            return false;
        }

        let mut observations = Vec::with_capacity(LOOP_WINDOW);
        for turn in &completed[completed.len() - LOOP_WINDOW..] {
            match turn {
                Turn::Step {
                    action: a,
                    observation: Some(obs),
                    ..
                } if a == action => observations.push(obs),
                _ => return false,
            }
        }
        observations.windows(2).all(|w| w[0] == w[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: &str, observation: Option<&str>) -> Turn {
        Turn::Step {
            thought: "t".into(),
            action: action.into(),
            action_input: "q".into(),
            observation: observation.map(String::from),
        }
    }

    #[test]
    fn action_window_is_bounded() {
        let mut state = AgentState::new("a", "g");
        for i in 0..8 {
            state.record_action(&format!("act{i}"));
        }
        assert_eq!(state.last_actions.len(), ACTION_WINDOW);
        assert_eq!(state.last_actions.front().map(String::as_str), Some("act3"));
    }

    #[test]
    fn repeating_needs_three_identical_completed_steps() {
        let mut state = AgentState::new("a", "g");
        for _ in 0..3 {
            state.history.push(step("search", Some("same")));
        }
        state.history.push(step("search", None));
        for _ in 0..4 {
            state.record_action("search");
        }
        assert!(state.is_repeating("search"));
        assert!(!state.is_repeating("external_api"));
    }

    #[test]
    fn differing_observations_are_not_a_loop() {
        let mut state = AgentState::new("a", "g");
        state.history.push(step("search", Some("one")));
        state.history.push(step("search", Some("two")));
        state.history.push(step("search", Some("two")));
        state.history.push(step("search", None));
        for _ in 0..4 {
            state.record_action("search");
        }
        assert!(!state.is_repeating("search"));
    }

    #[test]
    fn two_repeats_are_not_a_loop() {
        let mut state = AgentState::new("a", "g");
        state.history.push(step("search", Some("same")));
        state.history.push(step("search", Some("same")));
        state.history.push(step("search", None));
        for _ in 0..3 {
            state.record_action("search");
        }
        assert!(!state.is_repeating("search"));
    }

    #[test]
    fn complete_pending_only_fills_empty_observation() {
        let mut state = AgentState::new("a", "g");
        state.history.push(step("search", None));
        state.complete_pending("found".into());
        assert_eq!(state.last_observation(), Some("found"));
        state.complete_pending("again".into());
        assert_eq!(state.last_observation(), Some("found"));
    }

    #[test]
    fn finish_sets_answer() {
        let mut state = AgentState::new("a", "g");
        state.finish("done");
        assert!(state.finished);
        assert_eq!(state.final_answer.as_deref(), Some("done"));
        assert!(!state.stopped);

        let mut state = AgentState::new("a", "g");
        state.stop("Stopped");
        assert!(state.finished && state.stopped);
    }

    #[test]
    fn turn_serializes_with_type_tag() {
        let value = serde_json::to_value(Turn::Summary { text: "s".into() }).unwrap();
        assert_eq!(value["type"], "summary");
    }
}
