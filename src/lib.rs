//! Inference worker: asynchronous LLM, agent and orchestrated jobs.

pub mod agent;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod safety;
pub mod store;
pub mod tools;
pub mod worker;
