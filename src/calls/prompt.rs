//! The accept/reject decision point for incoming offers.

use async_trait::async_trait;
use log::warn;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDecision {
    Accept,
    Reject,
}

/// Asked once per incoming offer. The coordinator awaits the answer on a
/// separate task, so an implementation may take as long as the user needs
/// (bounded by the configured answer timeout).
#[async_trait]
pub trait IncomingCallPrompt: Send + Sync {
    async fn decide(&self, caller_id: &str) -> CallDecision;
}

/// Answers every offer the same way.
#[derive(Debug, Clone, Copy)]
pub struct AutoAnswer(pub CallDecision);

#[async_trait]
impl IncomingCallPrompt for AutoAnswer {
    async fn decide(&self, _caller_id: &str) -> CallDecision {
        self.0
    }
}

/// Hands each decision to a UI layer over a channel.
pub struct ChannelPrompt {
    requests: mpsc::UnboundedSender<PendingDecision>,
}

impl ChannelPrompt {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingDecision>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Self { requests }, rx)
    }
}

/// One outstanding decision. Dropping it without answering rejects the call.
#[derive(Debug)]
pub struct PendingDecision {
    caller_id: String,
    responder: oneshot::Sender<CallDecision>,
}

impl PendingDecision {
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn resolve(self, decision: CallDecision) {
        // The coordinator may have given up already; nothing to do then.
        let _ = self.responder.send(decision);
    }

    pub fn accept(self) {
        self.resolve(CallDecision::Accept);
    }

    pub fn reject(self) {
        self.resolve(CallDecision::Reject);
    }
}

#[async_trait]
impl IncomingCallPrompt for ChannelPrompt {
    async fn decide(&self, caller_id: &str) -> CallDecision {
        let (responder, answer) = oneshot::channel();
        let pending = PendingDecision {
            caller_id: caller_id.to_string(),
            responder,
        };
        if self.requests.send(pending).is_err() {
            warn!("No listener for call decisions; rejecting call from {caller_id}");
            return CallDecision::Reject;
        }
        answer.await.unwrap_or(CallDecision::Reject)
    }
}
