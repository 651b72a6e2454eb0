use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tollgate_core::{TenantId, WalletId};

/// The kind of entity a wallet node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    Organization,
    Department,
    Team,
    User,
    ServiceAccount,
}

/// How often a wallet's spend resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResetPeriod {
    Daily,
    Weekly,
    #[default]
    Monthly,
}

/// A node in the budget tree. Amounts are micro-units.
///
/// Invariant: `spent + reserved <= hard_limit + overdraft` on every node
/// once all in-flight commits complete. `spent` only decreases at reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub tenant: TenantId,
    /// Parent node; `None` for the organization root.
    pub parent: Option<WalletId>,
    pub kind: WalletKind,
    pub hard_limit: u64,
    #[serde(default)]
    pub spent: u64,
    /// In-flight reservations not yet committed or released.
    #[serde(default)]
    pub reserved: u64,
    /// Allowance permitting spend above the hard limit, still bounded.
    #[serde(default)]
    pub overdraft: u64,
    /// Utilization percentages that trigger a notification when crossed.
    #[serde(default)]
    pub soft_thresholds: Vec<u8>,
    /// Thresholds already notified this period. Edge-triggered: cleared
    /// only at reset, so re-crossing does not re-emit.
    #[serde(default)]
    pub notified_thresholds: Vec<u8>,
    #[serde(default)]
    pub reset_period: ResetPeriod,
    /// Day anchor for the reset period (day-of-month or day-of-week).
    #[serde(default = "default_reset_day")]
    pub reset_day: u8,
    /// Materialized ancestor path, root first, excluding this node.
    /// Kept denormalized so the hot reserve path avoids N parent lookups.
    #[serde(default)]
    pub ancestor_path: Vec<WalletId>,
    /// When the last period reset ran; `None` before the first reset.
    #[serde(default)]
    pub last_reset_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_reset_day() -> u8 {
    1
}

impl Wallet {
    /// Create a root (organization) wallet.
    #[must_use]
    pub fn root(tenant: impl Into<TenantId>, id: impl Into<WalletId>, hard_limit: u64) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            parent: None,
            kind: WalletKind::Organization,
            hard_limit,
            spent: 0,
            reserved: 0,
            overdraft: 0,
            soft_thresholds: Vec::new(),
            notified_thresholds: Vec::new(),
            reset_period: ResetPeriod::default(),
            reset_day: default_reset_day(),
            ancestor_path: Vec::new(),
            last_reset_at: None,
            created_at: Utc::now(),
        }
    }

    /// Create a child of `parent`, inheriting tenant and extending the
    /// materialized ancestor path.
    #[must_use]
    pub fn child_of(parent: &Wallet, id: impl Into<WalletId>, kind: WalletKind, hard_limit: u64) -> Self {
        let mut path = parent.ancestor_path.clone();
        path.push(parent.id.clone());
        Self {
            id: id.into(),
            tenant: parent.tenant.clone(),
            parent: Some(parent.id.clone()),
            kind,
            hard_limit,
            spent: 0,
            reserved: 0,
            overdraft: 0,
            soft_thresholds: Vec::new(),
            notified_thresholds: Vec::new(),
            reset_period: parent.reset_period,
            reset_day: parent.reset_day,
            ancestor_path: path,
            last_reset_at: None,
            created_at: Utc::now(),
        }
    }

    /// Set soft notification thresholds (percentages).
    #[must_use]
    pub fn with_soft_thresholds(mut self, thresholds: Vec<u8>) -> Self {
        self.soft_thresholds = thresholds;
        self
    }

    /// Set the overdraft allowance.
    #[must_use]
    pub fn with_overdraft(mut self, overdraft: u64) -> Self {
        self.overdraft = overdraft;
        self
    }

    /// Remaining spendable amount: `limit + overdraft - spent - reserved`.
    #[must_use]
    pub fn available(&self) -> u64 {
        (self.hard_limit + self.overdraft).saturating_sub(self.spent + self.reserved)
    }

    /// Utilization of the hard limit as a whole percentage, capped at 100
    /// for limits of zero.
    #[must_use]
    pub fn utilization_percent(&self) -> u8 {
        if self.hard_limit == 0 {
            return 100;
        }
        let pct = (self.spent.saturating_mul(100)) / self.hard_limit;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }

    /// Start of the current reset period in UTC.
    #[must_use]
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        use chrono::{Datelike, Duration as ChronoDuration, NaiveTime, Weekday};

        let midnight = |date: chrono::NaiveDate| {
            date.and_time(NaiveTime::MIN).and_utc()
        };
        match self.reset_period {
            ResetPeriod::Daily => midnight(now.date_naive()),
            ResetPeriod::Weekly => {
                // reset_day 1-7 maps Monday-Sunday.
                let anchor = Weekday::try_from(self.reset_day.clamp(1, 7) - 1)
                    .unwrap_or(Weekday::Mon);
                let mut date = now.date_naive();
                while date.weekday() != anchor {
                    date -= ChronoDuration::days(1);
                }
                midnight(date)
            }
            ResetPeriod::Monthly => {
                // Clamp to 28 so the anchor exists in every month.
                let day = u32::from(self.reset_day.clamp(1, 28));
                let this_month = now
                    .date_naive()
                    .with_day(day)
                    .unwrap_or(now.date_naive());
                if midnight(this_month) <= now {
                    midnight(this_month)
                } else {
                    let previous = this_month - chrono::Months::new(1);
                    midnight(previous)
                }
            }
        }
    }

    /// Whether the period boundary has passed since the last reset.
    #[must_use]
    pub fn reset_due(&self, now: DateTime<Utc>) -> bool {
        let last = self.last_reset_at.unwrap_or(self.created_at);
        last < self.period_start(now)
    }
}

/// Summary of a wallet reset, recorded in the audit log by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletReset {
    pub wallet: WalletId,
    pub tenant: TenantId,
    /// Spend zeroed by this reset.
    pub previous_spent: u64,
    /// Reservations preserved across the reset (in-flight requests continue).
    pub preserved_reserved: u64,
    pub reset_at: DateTime<Utc>,
}

/// Immutable record of an approved budget transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub tenant: TenantId,
    pub from: WalletId,
    pub to: WalletId,
    pub amount: u64,
    pub approver: String,
    pub transferred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_accounts_for_overdraft() {
        let mut w = Wallet::root("t", "root", 1_000).with_overdraft(100);
        w.spent = 900;
        w.reserved = 150;
        assert_eq!(w.available(), 50);
    }

    #[test]
    fn available_saturates_at_zero() {
        let mut w = Wallet::root("t", "root", 100);
        w.spent = 90;
        w.reserved = 30;
        assert_eq!(w.available(), 0);
    }

    #[test]
    fn utilization_percent() {
        let mut w = Wallet::root("t", "root", 1_000);
        w.spent = 850;
        assert_eq!(w.utilization_percent(), 85);
        w.spent = 2_000;
        assert_eq!(w.utilization_percent(), 100);
    }

    #[test]
    fn utilization_zero_limit_is_full() {
        let w = Wallet::root("t", "root", 0);
        assert_eq!(w.utilization_percent(), 100);
    }

    #[test]
    fn child_extends_ancestor_path() {
        let org = Wallet::root("t", "org", 100_000);
        let dept = Wallet::child_of(&org, "eng", WalletKind::Department, 50_000);
        let team = Wallet::child_of(&dept, "growth", WalletKind::Team, 20_000);
        let user = Wallet::child_of(&team, "u1", WalletKind::User, 5_000);

        assert_eq!(
            user.ancestor_path,
            vec![
                WalletId::new("org"),
                WalletId::new("eng"),
                WalletId::new("growth")
            ]
        );
        assert_eq!(user.parent, Some(WalletId::new("growth")));
        assert_eq!(user.tenant.as_str(), "t");
    }

    #[test]
    fn monthly_reset_due_after_boundary() {
        let mut w = Wallet::root("t", "w", 1_000);
        w.reset_period = ResetPeriod::Monthly;
        w.reset_day = 1;
        w.created_at = chrono::DateTime::parse_from_rfc3339("2026-02-15T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let same_period = chrono::DateTime::parse_from_rfc3339("2026-02-20T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!w.reset_due(same_period));

        let next_period = chrono::DateTime::parse_from_rfc3339("2026-03-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(w.reset_due(next_period));

        w.last_reset_at = Some(next_period);
        assert!(!w.reset_due(next_period));
    }

    #[test]
    fn daily_reset_period_start_is_midnight() {
        let mut w = Wallet::root("t", "w", 1_000);
        w.reset_period = ResetPeriod::Daily;
        let now = chrono::DateTime::parse_from_rfc3339("2026-02-10T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let start = w.period_start(now);
        assert_eq!(start.to_rfc3339(), "2026-02-10T00:00:00+00:00");
    }

    #[test]
    fn weekly_period_start_lands_on_anchor_weekday() {
        let mut w = Wallet::root("t", "w", 1_000);
        w.reset_period = ResetPeriod::Weekly;
        w.reset_day = 1; // Monday
        // 2026-02-12 is a Thursday; the period began Monday the 9th.
        let now = chrono::DateTime::parse_from_rfc3339("2026-02-12T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(w.period_start(now).to_rfc3339(), "2026-02-09T00:00:00+00:00");
    }

    #[test]
    fn wallet_serde_roundtrip() {
        let w = Wallet::root("t", "root", 10_000).with_soft_thresholds(vec![80, 90, 95]);
        let json = serde_json::to_string(&w).unwrap();
        let back: Wallet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.soft_thresholds, vec![80, 90, 95]);
        assert_eq!(back.hard_limit, 10_000);
    }
}
