//! The three built-in event observers (C11, spec §4.11): a human-readable
//! console reporter, a terminal-title updater, and a best-effort JSONL debug
//! recorder. Each subscribes to the [`crate::event::EventBus`] independently
//! and is isolated from the others' failures by the bus itself.

pub mod console;
pub mod debug;
pub mod theme;
pub mod title;

pub use console::ConsoleObserver;
pub use debug::DebugObserver;
pub use title::TitleObserver;
