// Test Fakes
// Scripted channel client and a registry with switchable write failures

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::models::{ChannelDescription, ChannelState, Destination, DestinationPatch};
use crate::services::{
    ChannelControl, InMemoryRegistry, OrchestratorError, OrchestratorResult, ResourceRegistry,
    ServiceError,
};

/// Channel client that replays a fixed sequence of described states.
///
/// Each `describe` pops the next scripted state; once the script is
/// exhausted the last state repeats. Every call is recorded.
pub struct ScriptedChannelControl {
    script: Mutex<VecDeque<ChannelState>>,
    current: Mutex<ChannelState>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedChannelControl {
    pub fn new(states: impl IntoIterator<Item = ChannelState>) -> Self {
        let script: VecDeque<ChannelState> = states.into_iter().collect();
        let current = script.front().copied().unwrap_or(ChannelState::Idle);
        Self {
            script: Mutex::new(script),
            current: Mutex::new(current),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls seen so far, formatted as `operation:channel_id`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.calls().iter().filter(|call| call.starts_with(&prefix)).count()
    }

    fn record(&self, operation: &str, channel_id: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{operation}:{channel_id}"));
        }
    }

    fn next_state(&self) -> ChannelState {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(state) = self.script.lock().unwrap_or_else(|p| p.into_inner()).pop_front() {
            *current = state;
        }
        *current
    }
}

#[async_trait]
impl ChannelControl for ScriptedChannelControl {
    async fn describe(&self, channel_id: &str) -> Result<ChannelDescription, ServiceError> {
        self.record("describe", channel_id);
        let state = self.next_state();
        Ok(ChannelDescription {
            channel_id: channel_id.to_string(),
            arn: None,
            name: None,
            state,
            pipelines_running: 0,
            pipeline_count: 1,
            input_count: 1,
            output_count: 1,
        })
    }

    async fn start(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        self.record("start", channel_id);
        Ok(ChannelState::Starting)
    }

    async fn stop(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        self.record("stop", channel_id);
        Ok(ChannelState::Stopping)
    }
}

/// In-memory registry whose writes can be made to fail on demand
#[derive(Default)]
pub struct FailingRegistry {
    inner: InMemoryRegistry,
    fail_puts: AtomicBool,
    fail_updates: AtomicBool,
}

impl FailingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn injected(operation: &str) -> OrchestratorError {
        OrchestratorError::Storage(format!("Injected {operation} failure"))
    }
}

#[async_trait]
impl ResourceRegistry for FailingRegistry {
    async fn get(&self, id: &str) -> OrchestratorResult<Destination> {
        self.inner.get(id).await
    }

    async fn put(&self, destination: &Destination) -> OrchestratorResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::injected("put"));
        }
        self.inner.put(destination).await
    }

    async fn update_fields(&self, id: &str, patch: &DestinationPatch) -> OrchestratorResult<Destination> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::injected("update"));
        }
        self.inner.update_fields(id, patch).await
    }

    async fn delete(&self, id: &str) -> OrchestratorResult<()> {
        self.inner.delete(id).await
    }

    async fn scan(&self) -> OrchestratorResult<Vec<Destination>> {
        self.inner.scan().await
    }

    async fn scan_raw(&self) -> OrchestratorResult<Vec<Value>> {
        self.inner.scan_raw().await
    }

    fn backend_name(&self) -> &'static str {
        "failing-memory"
    }
}
