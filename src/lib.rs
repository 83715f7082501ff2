//! Conversational lead-capture backend: a chat endpoint backed by an LLM
//! that collects visitor contact details mid-conversation and upserts them
//! into a lead store.

pub mod agent;
pub mod app;
pub mod extract;
pub mod prompting;
pub mod reconcile;
pub mod store;
pub mod types;
