//! Core types for the credit ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (signed integer credit deltas)
//! - Privacy (account identities are one-way hashes, never PII)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Anonymized account identifier
///
/// Derived from a device fingerprint with a one-way hash; never reversible
/// to personal data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap an opaque id received from a remote node
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an anonymous account id from a device fingerprint
    pub fn derive(fingerprint: &str) -> Self {
        let digest = Sha256::digest(fingerprint.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        Self(format!("user_{}", hex))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for an edge node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create new node ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lamport clock value
///
/// Orders events across nodes without wall-clock agreement. Ties are broken
/// deterministically by origin node id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct LogicalTimestamp(pub u64);

impl LogicalTimestamp {
    /// The zero timestamp (before any event)
    pub const ZERO: LogicalTimestamp = LogicalTimestamp(0);

    /// Raw counter value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a credit transaction exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CreditReason {
    /// Teaching session completed (teacher earns)
    TeachCompleted = 1,
    /// Learning consumed credits (module start or lesson taken)
    LearnConsumed = 2,
    /// Learning module completed (completion bonus)
    ModuleCompleted = 3,
    /// Operator-issued adjustment or reversal
    ManualAdjustment = 4,
    /// One-time grant issued at account creation
    InitialGrant = 5,
}

impl CreditReason {
    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::TeachCompleted => "teach-completed",
            CreditReason::LearnConsumed => "learn-consumed",
            CreditReason::ModuleCompleted => "module-completed",
            CreditReason::ManualAdjustment => "manual-adjustment",
            CreditReason::InitialGrant => "initial-grant",
        }
    }
}

impl fmt::Display for CreditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery state of a transaction relative to the aggregator
///
/// Transitions are forward-only: LocalOnly -> Queued -> Acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncState {
    /// Committed locally, not yet picked into a push batch
    LocalOnly = 1,
    /// Included in an in-flight push batch
    Queued = 2,
    /// Acknowledged by the aggregator
    Acknowledged = 3,
}

/// Immutable credit transaction
///
/// Appended once, never mutated except for the forward-only `sync_state`.
/// `transaction_id` doubles as the idempotency key on the aggregator side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique, client-generated idempotency key
    pub transaction_id: Uuid,

    /// Account the delta applies to
    pub account_id: AccountId,

    /// Signed credit amount
    pub delta: i64,

    /// Why this transaction exists
    pub reason: CreditReason,

    /// Node that authored this transaction
    pub origin_node_id: NodeId,

    /// Lamport clock value at creation
    pub logical_timestamp: LogicalTimestamp,

    /// Wall clock at creation (advisory only, never used for ordering)
    pub created_at: DateTime<Utc>,

    /// Delivery state relative to the aggregator
    pub sync_state: SyncState,

    /// Free-text annotation (e.g. "Taught skill: tailoring")
    pub note: Option<String>,
}

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccountStatus {
    /// Normal operation
    Active = 1,
    /// A merge produced a negative recomputed balance; debits refused
    Disputed = 2,
}

/// Account record
///
/// Balance is never stored here: it is always recomputed by folding history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account ID
    pub account_id: AccountId,

    /// Current status
    pub status: AccountStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// When the account was flagged disputed, if it is
    pub disputed_at: Option<DateTime<Utc>>,
}

impl AccountRecord {
    /// New active account
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            status: AccountStatus::Active,
            created_at: Utc::now(),
            disputed_at: None,
        }
    }

    /// Is the account disputed?
    pub fn is_disputed(&self) -> bool {
        self.status == AccountStatus::Disputed
    }
}

/// Learning progress record, synced as a fact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Record ID (idempotency key)
    pub record_id: Uuid,

    /// Account this progress belongs to
    pub account_id: AccountId,

    /// Learning module
    pub module_id: u32,

    /// Completion percentage (0-100)
    pub progress_percentage: u8,

    /// Completion timestamp, once finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Node that recorded the progress
    pub origin_node_id: NodeId,
}

/// Gig application record, synced as a fact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GigApplicationRecord {
    /// Application ID (idempotency key)
    pub application_id: Uuid,

    /// Applicant account
    pub account_id: AccountId,

    /// Gig applied for
    pub gig_id: u32,

    /// Application timestamp
    pub applied_at: DateTime<Utc>,

    /// Node that recorded the application
    pub origin_node_id: NodeId,
}

/// A syncable fact pending delivery to the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncFact {
    /// A ledger credit transaction
    Credit(Transaction),
    /// A gig application
    GigApplication(GigApplicationRecord),
    /// A learning progress record
    Progress(ProgressRecord),
}

impl SyncFact {
    /// Idempotency key for this fact
    pub fn fact_id(&self) -> Uuid {
        match self {
            SyncFact::Credit(t) => t.transaction_id,
            SyncFact::GigApplication(a) => a.application_id,
            SyncFact::Progress(p) => p.record_id,
        }
    }

    /// Account the fact belongs to
    pub fn account_id(&self) -> &AccountId {
        match self {
            SyncFact::Credit(t) => &t.account_id,
            SyncFact::GigApplication(a) => &a.account_id,
            SyncFact::Progress(p) => &p.account_id,
        }
    }

    /// Short kind label for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SyncFact::Credit(_) => "credit",
            SyncFact::GigApplication(_) => "gig-application",
            SyncFact::Progress(_) => "progress",
        }
    }
}

/// Outbox entry wrapping a fact pending delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Entry ID (equals the wrapped fact's idempotency key)
    pub entry_id: Uuid,

    /// The fact awaiting delivery
    pub fact: SyncFact,

    /// Delivery attempts so far
    pub attempt_count: u32,

    /// Earliest time the next attempt may run
    pub next_attempt_at: DateTime<Utc>,

    /// Acknowledged by the aggregator
    pub delivered: bool,

    /// Quarantine reason, if the aggregator explicitly rejected the entry
    pub rejected: Option<String>,

    /// Creation timestamp (drain order)
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Wrap a fact for delivery, due immediately
    pub fn new(fact: SyncFact) -> Self {
        let now = Utc::now();
        Self {
            entry_id: fact.fact_id(),
            fact,
            attempt_count: 0,
            next_attempt_at: now,
            delivered: false,
            rejected: None,
            created_at: now,
        }
    }

    /// Entry is eligible for a push attempt at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.delivered && self.rejected.is_none() && self.next_attempt_at <= now
    }
}

/// Per-remote-origin high-water mark of pulled transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Remote origin node
    pub origin_node_id: NodeId,

    /// Highest logical timestamp successfully merged from this origin
    pub last_pulled: LogicalTimestamp,

    /// When the cursor last advanced
    pub updated_at: DateTime<Utc>,
}

/// Result of merging a remote transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Inserted into history at its logical position
    Applied,
    /// Transaction id already present; merge was a no-op
    AlreadyApplied,
    /// Applied, but the recomputed balance went negative; account flagged
    Disputed {
        /// The negative recomputed balance
        balance: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_derive_is_stable_and_anonymous() {
        let a = AccountId::derive("device-123");
        let b = AccountId::derive("device-123");
        let c = AccountId::derive("device-456");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("user_"));
        assert!(!a.as_str().contains("device"));
    }

    #[test]
    fn test_sync_state_is_ordered_forward() {
        assert!(SyncState::LocalOnly < SyncState::Queued);
        assert!(SyncState::Queued < SyncState::Acknowledged);
    }

    #[test]
    fn test_outbox_entry_due() {
        let txn = Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: AccountId::new("user_abc"),
            delta: 5,
            reason: CreditReason::TeachCompleted,
            origin_node_id: NodeId::new("node-1"),
            logical_timestamp: LogicalTimestamp(1),
            created_at: Utc::now(),
            sync_state: SyncState::LocalOnly,
            note: None,
        };

        let mut entry = OutboxEntry::new(SyncFact::Credit(txn));
        assert!(entry.is_due(Utc::now()));

        entry.next_attempt_at = Utc::now() + chrono::Duration::seconds(60);
        assert!(!entry.is_due(Utc::now()));

        entry.next_attempt_at = Utc::now();
        entry.rejected = Some("malformed".to_string());
        assert!(!entry.is_due(Utc::now()));
    }

    #[test]
    fn test_fact_id_matches_wrapped_record() {
        let app = GigApplicationRecord {
            application_id: Uuid::new_v4(),
            account_id: AccountId::new("user_abc"),
            gig_id: 7,
            applied_at: Utc::now(),
            origin_node_id: NodeId::new("node-1"),
        };
        let fact = SyncFact::GigApplication(app.clone());
        assert_eq!(fact.fact_id(), app.application_id);
        assert_eq!(fact.kind(), "gig-application");
    }
}
