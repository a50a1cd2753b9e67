//! Triage daemon: watches email and Signal, classifies what arrives with a
//! local LLM, drafts replies, and sends nothing until the operator approves.

pub mod approval;
pub mod channels;
pub mod commands;
pub mod config;
pub mod contacts;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod swap;
