//! Test doubles for lookup join pipelines.
//!
//! [`MockLookupSource`] is an in-memory [`LookupSource`] that counts calls
//! and can be told to fail, panic or stall for specific key values. Clones
//! share state, so a test can keep a clone after handing the source to a
//! [`LookupRegistry`](crate::lookup::LookupRegistry).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::lookup::source::{LookupContext, LookupError, LookupRecord, LookupSource};

#[derive(Default)]
struct MockState {
    records: Vec<LookupRecord>,
    fail_on: Vec<Value>,
    panic_on: Vec<Value>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Value>>>,
}

/// In-memory lookup source for tests.
///
/// A record matches when, for every requested key column, the record's
/// field equals the requested value. Fail/panic triggers compare against
/// the first key value.
#[derive(Clone, Default)]
pub struct MockLookupSource {
    state: Arc<MockState>,
}

impl MockLookupSource {
    /// A source with no records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the records with `rows` (no metadata).
    #[must_use]
    pub fn with_rows(self, rows: Vec<Map<String, Value>>) -> Self {
        self.with_records(rows.into_iter().map(LookupRecord::new).collect())
    }

    /// Replaces the records.
    #[must_use]
    pub fn with_records(self, records: Vec<LookupRecord>) -> Self {
        self.rebuild(|s| s.records = records)
    }

    /// Fails every lookup whose first key value equals `value`.
    #[must_use]
    pub fn fail_on(self, value: Value) -> Self {
        self.rebuild(|s| s.fail_on.push(value))
    }

    /// Panics on every lookup whose first key value equals `value`.
    #[must_use]
    pub fn panic_on(self, value: Value) -> Self {
        self.rebuild(|s| s.panic_on.push(value))
    }

    /// Sleeps for `delay` before answering each lookup.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.rebuild(|s| s.delay = Some(delay))
    }

    /// Number of lookups received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Key values of every lookup received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<Value>> {
        self.state.requests.lock().clone()
    }

    // Builders run before the source is shared, so the state is uniquely
    // owned; otherwise the configuration is copied into fresh state.
    fn rebuild(self, f: impl FnOnce(&mut MockState)) -> Self {
        let mut state = Arc::try_unwrap(self.state).unwrap_or_else(|shared| MockState {
            records: shared.records.clone(),
            fail_on: shared.fail_on.clone(),
            panic_on: shared.panic_on.clone(),
            delay: shared.delay,
            calls: AtomicUsize::new(shared.calls.load(Ordering::SeqCst)),
            requests: Mutex::new(shared.requests.lock().clone()),
        });
        f(&mut state);
        Self {
            state: Arc::new(state),
        }
    }
}

#[async_trait::async_trait]
impl LookupSource for MockLookupSource {
    async fn lookup(
        &self,
        _ctx: &LookupContext,
        fields: &[String],
        keys: &[String],
        values: &[Value],
    ) -> Result<Vec<LookupRecord>, LookupError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.requests.lock().push(values.to_vec());

        if let Some(delay) = self.state.delay {
            tokio::time::sleep(delay).await;
        }
        let first = values.first();
        if first.is_some_and(|v| self.state.panic_on.contains(v)) {
            panic!("mock lookup source panic");
        }
        if first.is_some_and(|v| self.state.fail_on.contains(v)) {
            return Err(LookupError::Query(format!("mock failure for key {values:?}")));
        }
        if keys.len() != values.len() {
            return Err(LookupError::Internal(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }

        Ok(self
            .state
            .records
            .iter()
            .filter(|r| {
                keys.iter()
                    .zip(values)
                    .all(|(k, v)| r.message.get(k) == Some(v))
            })
            .map(|r| project(r, fields))
            .collect())
    }

    fn source_name(&self) -> &str {
        "mock"
    }
}

fn project(record: &LookupRecord, fields: &[String]) -> LookupRecord {
    if fields.is_empty() {
        return record.clone();
    }
    let message = record
        .message
        .iter()
        .filter(|(k, _)| fields.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    LookupRecord {
        message,
        metadata: record.metadata.clone(),
    }
}
