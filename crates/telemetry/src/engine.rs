//! Thread-safe telemetry engine: aggregates session records and serves
//! usage snapshots.

use crate::model::{SessionRecord, UsageSnapshot};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Running aggregates plus a bounded window of recent sessions.
pub struct TelemetryEngine {
    state: Mutex<State>,
    recent_capacity: usize,
    dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
    sessions: u64,
    succeeded: u64,
    failed: u64,
    backend_calls: u64,
    input_tokens: u64,
    output_tokens: u64,
    total_duration_ms: u64,
    tool_calls: BTreeMap<String, u64>,
    recent: VecDeque<SessionRecord>,
}

impl TelemetryEngine {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            recent_capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves counters merely stale.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one finished session into the aggregates.
    pub fn record(&self, record: SessionRecord) {
        let mut state = self.state();
        state.sessions += 1;
        if record.success {
            state.succeeded += 1;
        } else {
            state.failed += 1;
        }
        state.backend_calls += u64::from(record.backend_calls);
        state.input_tokens += record.input_tokens;
        state.output_tokens += record.output_tokens;
        state.total_duration_ms += record.duration_ms;
        for tool in &record.tools_used {
            *state.tool_calls.entry(tool.clone()).or_default() += 1;
        }

        if self.recent_capacity > 0 {
            if state.recent.len() >= self.recent_capacity {
                state.recent.pop_front();
            }
            state.recent.push_back(record);
        }
    }

    /// Count a record the recorder had to drop.
    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let state = self.state();
        UsageSnapshot {
            sessions: state.sessions,
            succeeded: state.succeeded,
            failed: state.failed,
            backend_calls: state.backend_calls,
            input_tokens: state.input_tokens,
            output_tokens: state.output_tokens,
            avg_duration_ms: state
                .total_duration_ms
                .checked_div(state.sessions)
                .unwrap_or(0),
            tool_calls: state.tool_calls.clone(),
            dropped_records: self.dropped.load(Ordering::Relaxed),
            recent: state.recent.iter().rev().cloned().collect(),
        }
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new(50)
    }
}
