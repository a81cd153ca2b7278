//! Prompt templates for planning and summarization.

use crate::agent::state::Turn;

/// Instruction for compacting agent history.
pub const SUMMARIZE_STEPS_INSTRUCTION: &str = "Summarize the following agent steps briefly. \
     Preserve important facts and results. Remove reasoning noise.";

/// Instruction for shortening a long answer or arbitrary text.
pub const SUMMARIZE_TEXT_INSTRUCTION: &str = "Summarize the following text concisely. \
     Preserve important facts, numbers and conclusions.";

const PLANNER_RULES: &str = r#"STRICT RULES:
- Reply with exactly ONE block and nothing else.
- To take an action:
Thought: <short reasoning>
Action: <one action name from the list>
ActionInput: <input for the action>
- When you can answer the goal:
Thought: <short reasoning>
Action: finish
ActionInput: <final answer>
- vector_search takes JSON input: {"query": "<text>", "top_k": 5}
- Do not repeat an action whose observation you already have."#;

/// Render history turns as plain text, one block per turn.
pub fn render_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|turn| match turn {
            Turn::Summary { text } => format!("Summary of earlier steps: {text}"),
            Turn::Step {
                thought,
                action,
                action_input,
                observation,
            } => format!(
                "Thought: {thought}\nAction: {action}\nActionInput: {action_input}\nObservation: {}",
                observation.as_deref().unwrap_or("(pending)")
            ),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the planner prompt from the goal, history, memory and tool list.
pub fn planner_prompt(goal: &str, history: &[Turn], memory: &[String], tools: &str) -> String {
    let memory = if memory.is_empty() {
        "(none)".to_string()
    } else {
        memory
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let history = if history.is_empty() {
        "(none)".to_string()
    } else {
        render_history(history)
    };
    let tools = if tools.is_empty() {
        String::new()
    } else {
        format!("\n{tools}")
    };

    format!(
        "You are an autonomous agent working toward a goal.\n\n\
         Goal: {goal}\n\n\
         Relevant memory:\n{memory}\n\n\
         Available actions:\n- finish: return the final answer{tools}\n\n\
         Previous steps:\n{history}\n\n\
         {PLANNER_RULES}"
    )
}

/// Prompt body for compacting a run of turns.
pub fn summarize_steps_prompt(turns: &[Turn]) -> String {
    render_history(turns)
}
