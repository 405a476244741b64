//! Agent executors (C7, C8): drive one agent through one workflow step at
//! either an LLM state or a script state.

pub mod llm;
pub mod script;
