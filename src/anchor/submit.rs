/// Transaction submission and confirmation tracking.
///
/// ```text
/// Submitted ──▶ Pending ──┬──▶ Confirmed
///                         ├──▶ TimedOut   (patience exhausted, fate unknown)
///                         └──▶ Cancelled  (caller gave up)
/// ```
///
/// A refusal from the network, either when relaying or while pending, is
/// final and surfaces as `NetworkRejected`. Nothing is retried here: a new
/// attempt needs a fresh signature, and resubmitting after a timeout can
/// produce a duplicate anchor if the first transaction still confirms.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::state::anchor_index_from_delta;
use crate::error::{AnchorError, Result};
use crate::ledger::{LedgerClient, PendingTransaction};

/// How long to wait for finality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Number of status polls before giving up.
    pub max_rounds: u32,
    /// Delay between polls.
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Submitted,
    Pending { round: u32 },
    Confirmed { round: u64 },
    TimedOut,
    Cancelled,
}

/// A confirmed submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub tx_id: String,
    pub confirmed_round: u64,
    /// Anchor index assigned by the ledger, when the confirmation reports
    /// the counter change. Confirmation order decides it, not submission
    /// order.
    pub anchor_index: Option<u64>,
}

/// Relays signed transactions and waits for them to confirm.
///
/// One submission is in flight per `Submitter`; concurrent callers queue
/// on the handle. Use separate submitters for parallel submissions.
pub struct Submitter {
    ledger: Arc<dyn LedgerClient>,
    policy: ConfirmationPolicy,
    in_flight: Mutex<()>,
}

impl Submitter {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: ConfirmationPolicy) -> Self {
        Self {
            ledger,
            policy,
            in_flight: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    fn transition(&self, tx_id: &str, state: SubmissionState) {
        info!(tx_id, ledger = self.ledger.name(), state = ?state, "Submission state");
    }

    /// Relay `signed` and wait for finality.
    ///
    /// Cancellation interrupts every wait: queueing behind another
    /// submission, the relay call, each status poll and the delay between
    /// polls. A relay that is cancelled mid-flight may still reach the
    /// network, so the caller cannot assume it did not.
    pub async fn submit(&self, signed: &[u8], cancel: &CancellationToken) -> Result<Submission> {
        if signed.is_empty() {
            return Err(AnchorError::InvalidInput(
                "signed transaction is empty".into(),
            ));
        }

        let _guard = until_cancelled(cancel, self.in_flight.lock())
            .await
            .ok_or(AnchorError::Cancelled { tx_id: None })?;

        let relayed = until_cancelled(cancel, self.ledger.send_raw_transaction(signed))
            .await
            .ok_or_else(|| {
                warn!("Submission cancelled during relay");
                AnchorError::Cancelled { tx_id: None }
            })?;
        let tx_id = match relayed {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Transaction relay failed");
                return Err(e);
            }
        };
        self.transition(&tx_id, SubmissionState::Submitted);

        let rounds = self.policy.max_rounds.max(1);
        for round in 1..=rounds {
            self.transition(&tx_id, SubmissionState::Pending { round });
            let poll = until_cancelled(cancel, self.ledger.pending_transaction(&tx_id)).await;
            let status = match poll {
                Some(status) => status?,
                None => return Err(self.cancelled(tx_id)),
            };

            match status {
                PendingTransaction::Confirmed {
                    round: confirmed_round,
                    global_delta,
                } => {
                    self.transition(
                        &tx_id,
                        SubmissionState::Confirmed {
                            round: confirmed_round,
                        },
                    );
                    return Ok(Submission {
                        anchor_index: anchor_index_from_delta(&global_delta),
                        tx_id,
                        confirmed_round,
                    });
                }
                PendingTransaction::Rejected(reason) => {
                    warn!(tx_id = %tx_id, reason = %reason, "Transaction dropped by network");
                    return Err(AnchorError::NetworkRejected(reason));
                }
                PendingTransaction::Pending => {}
            }

            if round < rounds
                && until_cancelled(cancel, tokio::time::sleep(self.policy.poll_interval))
                    .await
                    .is_none()
            {
                return Err(self.cancelled(tx_id));
            }
        }

        self.transition(&tx_id, SubmissionState::TimedOut);
        Err(AnchorError::ConfirmationTimeout { tx_id, rounds })
    }

    fn cancelled(&self, tx_id: String) -> AnchorError {
        self.transition(&tx_id, SubmissionState::Cancelled);
        AnchorError::Cancelled { tx_id: Some(tx_id) }
    }
}

/// Run `fut` unless `cancel` fires first. Cancellation wins ties.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
