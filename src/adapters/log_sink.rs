//! Event sink that writes every application event to the log.
//!
//! The default sink for the host build; display and WebSocket
//! collaborators provide their own implementations of [`EventSink`].

use log::info;

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        info!("event: {event:?}");
    }
}
