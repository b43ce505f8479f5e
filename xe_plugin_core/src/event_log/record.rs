use super::event::{log_event, OperationEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event: OperationEvent,
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}", self.timestamp, self.event)
    }
}

/// Shared, append-only record of operation events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the event and forward it to tracing.
    pub fn append(&self, event: OperationEvent) {
        log_event(&event);
        let record = EventRecord {
            timestamp: Utc::now(),
            event,
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn all(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<OperationEvent> {
        self.all().into_iter().map(|record| record.event).collect()
    }
}
