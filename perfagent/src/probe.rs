//! Producer-side helper
//!
//! A [`Probe`] binds one category to its gate and to the server's
//! broadcast path. Producers call it from whatever thread observed the
//! event:
//!
//! ```no_run
//! # use perfagent::probe::Probe;
//! # use perfagent::server::ServerHandle;
//! # fn on_exception(handle: ServerHandle) {
//! let probe = Probe::new(handle, "exceptionEvents");
//! if probe.is_active() {
//!     let mut fields = serde_json::Map::new();
//!     if let Some(seq) = probe.sample() {
//!         fields.insert("seq".into(), seq.into());
//!     }
//!     probe.record_event(fields);
//! }
//! # }
//! ```

use perfagent_common::SampleGate;

use crate::server::ServerHandle;
use crate::telemetry::{tagged_record, TelemetryRecord};

/// Event emitter for one producer category
#[derive(Clone)]
pub struct Probe {
    handle: ServerHandle,
    category: &'static str,
}

impl Probe {
    #[must_use]
    pub fn new(handle: ServerHandle, category: &'static str) -> Self {
        Self { handle, category }
    }

    #[must_use]
    pub fn category(&self) -> &'static str {
        self.category
    }

    fn gate(&self) -> Option<&SampleGate> {
        self.handle.gates().get(self.category)
    }

    /// Whether events of this category should be delivered at all
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gate().is_some_and(SampleGate::is_active)
    }

    /// Count one event; `Some(seq)` if it should carry detail
    #[must_use]
    pub fn sample(&self) -> Option<u64> {
        self.gate().and_then(SampleGate::sample)
    }

    /// Broadcast one record tagged with this probe's category
    pub fn record_event(&self, fields: TelemetryRecord) {
        self.handle.broadcast(&tagged_record(self.category, fields));
    }
}
