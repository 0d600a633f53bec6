//! The optional checkpoint collaborator (§6 "Persisted state"): observes
//! the cache and node transitions through the public lookup/command API
//! only, and writes boot/crash records. No time-travel or history query
//! surface — this is deliberately a much smaller contract than a generic
//! checkpoint store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use plexil_value::{FailureType, NodeState, Outcome};

use crate::error::Result;

/// A record written once, at process start, describing what the kernel is
/// about to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootRecord {
    pub plan_name: String,
    pub started_at: f64,
}

/// A record written on exit, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashRecord {
    pub plan_name: String,
    pub ended_at: f64,
    pub reason: CrashReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CrashReason {
    Completed,
    RuntimeAssertion(String),
    InterfaceError(String),
}

/// A single observed node transition, exactly as the exec driver would
/// report it — this is the only node-side event the collaborator ever
/// sees, and only after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTransitionRecord {
    pub node_id: String,
    pub from: NodeState,
    pub to: NodeState,
    pub outcome: Option<Outcome>,
    pub failure_type: Option<FailureType>,
    pub cycle: u64,
}

/// A single observed cache write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheWriteRecord {
    pub state: String,
    pub value: String,
    pub cycle: u64,
}

/// The scoped-down checkpoint collaborator. Unlike a general checkpoint
/// store, this trait has no notion of a checkpoint *identity*, no
/// `get`/`list`/history query, and no branching — the kernel never reads
/// back through this interface, only writes.
#[async_trait]
pub trait BootRecorder: Send + Sync {
    async fn record_boot(&self, record: BootRecord) -> Result<()>;
    async fn record_crash(&self, record: CrashRecord) -> Result<()>;
    async fn record_transition(&self, record: NodeTransitionRecord) -> Result<()>;
    async fn record_cache_write(&self, record: CacheWriteRecord) -> Result<()>;
}

/// Reference implementation: keeps every record in memory. Suitable for
/// tests and for a host process that wants to inspect what was recorded
/// without standing up real storage.
#[derive(Default)]
pub struct InMemoryBootRecorder {
    inner: tokio::sync::Mutex<InMemoryBootLog>,
}

#[derive(Default)]
struct InMemoryBootLog {
    boots: Vec<BootRecord>,
    crashes: Vec<CrashRecord>,
    transitions: Vec<NodeTransitionRecord>,
    cache_writes: Vec<CacheWriteRecord>,
}

impl InMemoryBootRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn boots(&self) -> Vec<BootRecord> {
        self.inner.lock().await.boots.clone()
    }

    pub async fn crashes(&self) -> Vec<CrashRecord> {
        self.inner.lock().await.crashes.clone()
    }

    pub async fn transitions(&self) -> Vec<NodeTransitionRecord> {
        self.inner.lock().await.transitions.clone()
    }

    pub async fn cache_writes(&self) -> Vec<CacheWriteRecord> {
        self.inner.lock().await.cache_writes.clone()
    }
}

#[async_trait]
impl BootRecorder for InMemoryBootRecorder {
    async fn record_boot(&self, record: BootRecord) -> Result<()> {
        self.inner.lock().await.boots.push(record);
        Ok(())
    }

    async fn record_crash(&self, record: CrashRecord) -> Result<()> {
        self.inner.lock().await.crashes.push(record);
        Ok(())
    }

    async fn record_transition(&self, record: NodeTransitionRecord) -> Result<()> {
        self.inner.lock().await.transitions.push(record);
        Ok(())
    }

    async fn record_cache_write(&self, record: CacheWriteRecord) -> Result<()> {
        self.inner.lock().await.cache_writes.push(record);
        Ok(())
    }
}

/// Convenience used by callers that haven't configured a collaborator:
/// discards everything. Plans run identically whether or not a recorder is
/// attached — it observes, it never participates.
pub struct NullBootRecorder;

#[async_trait]
impl BootRecorder for NullBootRecorder {
    async fn record_boot(&self, _record: BootRecord) -> Result<()> {
        Ok(())
    }
    async fn record_crash(&self, _record: CrashRecord) -> Result<()> {
        Ok(())
    }
    async fn record_transition(&self, _record: NodeTransitionRecord) -> Result<()> {
        Ok(())
    }
    async fn record_cache_write(&self, _record: CacheWriteRecord) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_accumulates_boots_and_transitions() {
        let recorder = InMemoryBootRecorder::new();
        recorder
            .record_boot(BootRecord { plan_name: "demo".into(), started_at: 0.0 })
            .await
            .unwrap();
        recorder
            .record_transition(NodeTransitionRecord {
                node_id: "A".into(),
                from: NodeState::Waiting,
                to: NodeState::Executing,
                outcome: None,
                failure_type: None,
                cycle: 1,
            })
            .await
            .unwrap();
        assert_eq!(recorder.boots().await.len(), 1);
        assert_eq!(recorder.transitions().await.len(), 1);
    }

    #[tokio::test]
    async fn null_recorder_discards_everything() {
        let recorder = NullBootRecorder;
        recorder
            .record_boot(BootRecord { plan_name: "demo".into(), started_at: 0.0 })
            .await
            .unwrap();
    }
}
