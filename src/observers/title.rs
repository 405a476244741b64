//! Title reporter (C11, spec §4.11).
//!
//! Writes the terminal window title via the same OSC escape sequence as the
//! teacher's `display::renderer::Renderer::set_title`. Last-write-wins
//! across concurrently progressing agents; this observer keeps no
//! per-agent state.

use std::io::Write;
use std::sync::Mutex;

use crate::event::{Event, Handler};

pub struct TitleObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> TitleObserver<W> {
    pub fn new(out: W) -> Self {
        TitleObserver { out: Mutex::new(out) }
    }
}

impl TitleObserver<std::io::Stdout> {
    pub fn stdout() -> Self {
        TitleObserver::new(std::io::stdout())
    }
}

impl<W: Write + Send> Handler for TitleObserver<W> {
    fn handle(&self, event: &Event) {
        if let Event::StateStarted { agent_id, state, .. } = event {
            let mut out = self.out.lock().expect("title observer mutex poisoned");
            let _ = write!(out, "\x1b]2;raymond: {agent_id} @ {state}\x07");
            let _ = out.flush();
        }
    }
}
