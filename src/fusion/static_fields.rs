//! Single-slot, latest-value-wins handoff for static fields.
//!
//! Built on `tokio::sync::watch`, which needs no runtime for `send_replace`,
//! `has_changed` and `borrow_and_update`. Every update replaces the previous
//! mapping as a whole; keys are never merged.

use super::types::Fields;
use tokio::sync::watch;

/// Writer side, held by the orchestrator.
#[derive(Debug, Clone)]
pub struct StaticFieldsHandle {
    tx: watch::Sender<Fields>,
}

/// Reader side, held by the fusion engine thread.
#[derive(Debug)]
pub struct StaticFieldsReader {
    rx: watch::Receiver<Fields>,
    current: Fields,
}

/// Create a connected handle/reader pair seeded with `initial`.
pub fn static_fields_slot(initial: Fields) -> (StaticFieldsHandle, StaticFieldsReader) {
    let (tx, rx) = watch::channel(initial.clone());
    (
        StaticFieldsHandle { tx },
        StaticFieldsReader {
            rx,
            current: initial,
        },
    )
}

impl StaticFieldsHandle {
    /// Replace the static fields. Applied to every row fused afterwards.
    pub fn update(&self, fields: Fields) {
        self.tx.send_replace(fields);
    }

    /// Most recently published value.
    pub fn latest(&self) -> Fields {
        self.tx.borrow().clone()
    }
}

impl StaticFieldsReader {
    /// Pick up a newer value if one was published, then return the current one.
    pub fn refresh(&mut self) -> &Fields {
        // An error means the handle was dropped; keep the last value
        if self.rx.has_changed().unwrap_or(false) {
            self.current = self.rx.borrow_and_update().clone();
        }
        &self.current
    }
}
