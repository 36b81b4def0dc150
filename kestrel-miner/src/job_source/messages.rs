//! Message types for source-coordinator communication.
//!
//! Sources and coordinators talk through a return-addressed envelope: a
//! source sends events through a cloneable sender it is given at
//! construction, and receives commands through a receiver it alone owns.
//! The [`SourceHandle`] is the return address — a coordinator stores it with
//! the work it accepted and uses it to route shares back.
//!
//! Handles use Arc pointer equality for identity rather than explicit ids;
//! every `SourceHandle::new` is a distinct identity, and clones compare
//! equal to their original. That makes them usable as `HashMap` keys with
//! no id coordination anywhere.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use super::{JobTemplate, Share};

/// Handle to a job source: identity, name, and the way back to it.
///
/// Cheap to clone; all clones are the same identity.
#[derive(Clone, Debug)]
pub struct SourceHandle {
    inner: Arc<SourceHandleInner>,
}

#[derive(Debug)]
struct SourceHandleInner {
    name: String,
    command_tx: mpsc::Sender<SourceCommand>,
}

impl SourceHandle {
    pub fn new(name: String, command_tx: mpsc::Sender<SourceCommand>) -> Self {
        Self {
            inner: Arc::new(SourceHandleInner { name, command_tx }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Route a solved share back to this source.
    pub async fn submit_share(&self, share: Share) -> Result<()> {
        self.inner
            .command_tx
            .send(SourceCommand::SubmitShare(share))
            .await
            .map_err(|_| anyhow::anyhow!("source disconnected"))
    }
}

// Identity is the Arc pointer.
impl Hash for SourceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

impl PartialEq for SourceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SourceHandle {}

/// Events from sources (push, source-initiated).
#[derive(Debug)]
pub enum SourceEvent {
    /// New job, old shares still valid. Assign the new work; late shares
    /// from earlier jobs may still be submitted.
    UpdateJob(JobTemplate),

    /// New job, old work invalidated outright. Discard in-flight tasks and
    /// do not submit shares from earlier jobs.
    ReplaceJob(JobTemplate),

    /// All current work is invalid and no replacement exists yet, e.g. the
    /// pool connection dropped.
    ClearJobs,
}

/// Commands to sources (pull, coordinator-initiated).
#[derive(Debug)]
pub enum SourceCommand {
    /// Submit this share to the pool.
    SubmitShare(Share),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_identity_is_the_allocation() {
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let a = SourceHandle::new("pool-a".into(), tx1);
        let b = SourceHandle::new("pool-a".into(), tx2);
        let a2 = a.clone();

        assert_ne!(a, b, "same name, different identity");
        assert_eq!(a, a2, "clones share identity");
        assert_eq!(a.name(), "pool-a");
    }
}
