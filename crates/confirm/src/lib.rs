//! Confirmation gate — synchronous "ask a human" semantics over the
//! asynchronous messaging channels.
//!
//! A dangerous tool operation blocks on `request()` until an administrator
//! approves or rejects it (over the HTTP endpoints or a channel command),
//! or until the 5-minute expiry resolves it as timeout → rejected. The
//! gate is the sole authority on whether a dangerous operation proceeds;
//! callers never cache its verdicts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use relayclaw_core::tool::RiskLevel;

const DEFAULT_EXPIRY: Duration = Duration::from_secs(300);

/// Lifecycle state of a confirmation request. Transitions once from
/// `Pending` to a terminal state; terminal-after-expiry is `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

/// One pending (or just-resolved) approval request.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationRequest {
    pub id: String,
    pub op_type: String,
    /// The operation text shown to the approver (e.g. the literal command)
    pub operation: String,
    pub details: String,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ConfirmationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
}

/// A channel-side adapter that knows how to reach an administrator.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver the request (id + operation text) to the administrator.
    async fn send_confirmation(&self, request: &ConfirmationRequest);

    /// Announce the final outcome.
    async fn notify_result(&self, request: &ConfirmationRequest, approved: bool);
}

struct PendingEntry {
    request: ConfirmationRequest,
    decision_tx: Option<oneshot::Sender<(bool, Option<String>)>>,
}

/// The confirmation gate.
pub struct ConfirmationGate {
    pending: Mutex<HashMap<String, PendingEntry>>,
    notifiers: Mutex<Vec<Arc<dyn Notifier>>>,
    unattended_mode: bool,
    always_allow: Vec<String>,
    expiry: Duration,
}

impl ConfirmationGate {
    pub fn new(unattended_mode: bool, always_allow: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            notifiers: Mutex::new(Vec::new()),
            unattended_mode,
            always_allow,
            expiry: DEFAULT_EXPIRY,
        })
    }

    /// Override the expiry window (tests).
    pub fn with_expiry(unattended_mode: bool, always_allow: Vec<String>, expiry: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            notifiers: Mutex::new(Vec::new()),
            unattended_mode,
            always_allow,
            expiry,
        })
    }

    pub fn register_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.notifiers.lock().expect("notifier lock").push(notifier);
    }

    /// Ask for approval of a dangerous operation. Blocks the calling task
    /// until a decision arrives or the request expires. The request record
    /// is removed before returning.
    pub async fn request(
        &self,
        op_type: &str,
        operation: &str,
        details: &str,
        risk_level: RiskLevel,
    ) -> bool {
        if self.unattended_mode {
            info!(operation, "unattended mode, auto-approving");
            return true;
        }

        if self
            .always_allow
            .iter()
            .any(|allowed| allowed == operation || allowed == op_type)
        {
            info!(operation, "operation in always-allow list");
            return true;
        }

        let now = Utc::now();
        let request = ConfirmationRequest {
            id: format!("conf_{}", Uuid::new_v4().simple()),
            op_type: op_type.to_string(),
            operation: operation.to_string(),
            details: details.to_string(),
            risk_level,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.expiry).unwrap_or_default(),
            status: ConfirmationStatus::Pending,
            approver: None,
        };
        let id = request.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending lock").insert(
            id.clone(),
            PendingEntry {
                request: request.clone(),
                decision_tx: Some(tx),
            },
        );

        let notifiers: Vec<Arc<dyn Notifier>> =
            self.notifiers.lock().expect("notifier lock").clone();
        for notifier in &notifiers {
            notifier.send_confirmation(&request).await;
        }

        info!(id = %id, operation, risk = %risk_level, "confirmation requested");

        let approved = match tokio::time::timeout(self.expiry, rx).await {
            Ok(Ok((approved, approver))) => {
                let mut snapshot = request.clone();
                snapshot.status = if approved {
                    ConfirmationStatus::Approved
                } else {
                    ConfirmationStatus::Rejected
                };
                snapshot.approver = approver;
                for notifier in &notifiers {
                    notifier.notify_result(&snapshot, approved).await;
                }
                approved
            }
            // Waker dropped without a decision, or the expiry fired.
            _ => {
                warn!(id = %id, operation, "confirmation timed out");
                if let Some(entry) = self.pending.lock().expect("pending lock").get_mut(&id) {
                    entry.request.status = ConfirmationStatus::Timeout;
                }
                false
            }
        };

        self.pending.lock().expect("pending lock").remove(&id);
        approved
    }

    /// Resolve a pending request as approved. Unknown ids error.
    pub fn approve(&self, id: &str, approver: &str) -> Result<(), String> {
        self.resolve(id, approver, true)
    }

    /// Resolve a pending request as rejected. Unknown ids error.
    pub fn reject(&self, id: &str, approver: &str) -> Result<(), String> {
        self.resolve(id, approver, false)
    }

    fn resolve(&self, id: &str, approver: &str, approved: bool) -> Result<(), String> {
        let mut pending = self.pending.lock().expect("pending lock");
        let entry = pending
            .get_mut(id)
            .ok_or_else(|| format!("request not found: {id}"))?;

        let tx = entry
            .decision_tx
            .take()
            .ok_or_else(|| format!("request already resolved: {id}"))?;

        entry.request.status = if approved {
            ConfirmationStatus::Approved
        } else {
            ConfirmationStatus::Rejected
        };
        entry.request.approver = Some(approver.to_string());

        info!(
            id,
            operation = %entry.request.operation,
            approved,
            by = approver,
            "confirmation resolved"
        );

        // Waiter may have timed out and dropped the receiver; that race
        // resolves as timeout, which is correct.
        let _ = tx.send((approved, Some(approver.to_string())));
        Ok(())
    }

    /// Snapshot of requests still awaiting a decision.
    pub fn pending(&self) -> Vec<ConfirmationRequest> {
        self.pending
            .lock()
            .expect("pending lock")
            .values()
            .filter(|e| e.request.status == ConfirmationStatus::Pending)
            .map(|e| e.request.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        sent: AtomicUsize,
        results: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        fn name(&self) -> &str {
            "counting"
        }
        async fn send_confirmation(&self, _request: &ConfirmationRequest) {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
        async fn notify_result(&self, _request: &ConfirmationRequest, _approved: bool) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn unattended_mode_bypasses() {
        let gate = ConfirmationGate::new(true, vec![]);
        assert!(gate.request("command", "rm -rf /x", "", RiskLevel::High).await);
        assert!(gate.pending().is_empty());
    }

    #[tokio::test]
    async fn always_allow_matches_operation_or_type() {
        let gate = ConfirmationGate::new(false, vec!["rm -rf /x".into(), "terminal".into()]);
        assert!(gate.request("command", "rm -rf /x", "", RiskLevel::High).await);
        assert!(gate.request("terminal", "anything", "", RiskLevel::High).await);
    }

    #[tokio::test]
    async fn approval_resolves_waiter() {
        let gate = ConfirmationGate::new(false, vec![]);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request("command", "rm -rf /tmp/x", "dangerous", RiskLevel::High)
                    .await
            })
        };

        // Wait for the request to register, then approve it.
        let id = loop {
            let pending = gate.pending();
            if let Some(req) = pending.first() {
                break req.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        gate.approve(&id, "admin").unwrap();
        assert!(waiter.await.unwrap());
        // Record removed after the caller returns.
        assert!(gate.pending().is_empty());
    }

    #[tokio::test]
    async fn rejection_resolves_waiter_false() {
        let gate = ConfirmationGate::new(false, vec![]);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request("command", "mkfs /dev/sda", "", RiskLevel::Critical)
                    .await
            })
        };

        let id = loop {
            if let Some(req) = gate.pending().first() {
                break req.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        gate.reject(&id, "admin").unwrap();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn expiry_resolves_as_timeout_rejected() {
        let gate =
            ConfirmationGate::with_expiry(false, vec![], Duration::from_millis(50));
        let approved = gate
            .request("command", "rm -rf /tmp/stuff", "", RiskLevel::High)
            .await;
        assert!(!approved);
        assert!(gate.pending().is_empty());
    }

    #[tokio::test]
    async fn double_resolution_errors() {
        let gate = ConfirmationGate::new(false, vec![]);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request("command", "rm -rf /y", "", RiskLevel::High).await
            })
        };

        let id = loop {
            if let Some(req) = gate.pending().first() {
                break req.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        gate.approve(&id, "first").unwrap();
        assert!(gate.approve(&id, "second").is_err() || gate.pending().is_empty());
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_id_errors() {
        let gate = ConfirmationGate::new(false, vec![]);
        assert!(gate.approve("conf_missing", "admin").is_err());
        assert!(gate.reject("conf_missing", "admin").is_err());
    }

    #[tokio::test]
    async fn notifiers_receive_request_and_result() {
        let gate = ConfirmationGate::new(false, vec![]);
        let notifier = Arc::new(CountingNotifier {
            sent: AtomicUsize::new(0),
            results: AtomicUsize::new(0),
        });
        gate.register_notifier(notifier.clone());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request("command", "chmod 777 /", "", RiskLevel::High).await
            })
        };

        let id = loop {
            if let Some(req) = gate.pending().first() {
                break req.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        gate.approve(&id, "admin").unwrap();
        waiter.await.unwrap();

        assert_eq!(notifier.sent.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.results.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_carries_expiry_window() {
        let gate = ConfirmationGate::new(false, vec![]);
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.request("command", "dd if=/dev/zero", "", RiskLevel::High).await
            })
        };

        let req = loop {
            if let Some(req) = gate.pending().first() {
                break req.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let window = req.expires_at - req.created_at;
        assert_eq!(window.num_seconds(), 300);

        gate.reject(&req.id, "admin").unwrap();
        waiter.await.unwrap();
    }
}
