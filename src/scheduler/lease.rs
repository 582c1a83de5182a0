use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::error::{HiveError, HiveResult};
use crate::types::BotId;

/// Exclusive, expiring right to act for one bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub bot_id: BotId,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Per-bot leases. At most one live lease per bot; expired leases are
/// reclaimed by the next acquirer.
pub struct LeaseTable {
    ttl: Duration,
    leases: DashMap<BotId, Lease>,
}

impl LeaseTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            leases: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn acquire(&self, bot_id: BotId, now: DateTime<Utc>) -> HiveResult<Lease> {
        let lease = Lease {
            bot_id,
            token: Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now + self.ttl,
        };
        match self.leases.entry(bot_id) {
            Entry::Occupied(mut held) => {
                if !held.get().is_expired(now) {
                    return Err(HiveError::LeaseConflict { bot_id });
                }
                warn!(bot = %bot_id, token = %held.get().token, "reclaiming expired lease");
                held.insert(lease.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
            }
        }
        Ok(lease)
    }

    /// Release only if the token still matches; returns whether it did
    pub fn release(&self, lease: &Lease) -> bool {
        self.leases
            .remove_if(&lease.bot_id, |_, held| held.token == lease.token)
            .is_some()
    }

    /// Whether `lease` is still the live lease for its bot
    pub fn holds(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        self.leases
            .get(&lease.bot_id)
            .is_some_and(|held| held.token == lease.token && !held.is_expired(now))
    }

    /// Whether some unit holds a live lease for `bot_id`
    pub fn is_leased(&self, bot_id: BotId, now: DateTime<Utc>) -> bool {
        self.leases
            .get(&bot_id)
            .is_some_and(|held| !held.is_expired(now))
    }

    /// Drop every expired lease; returns how many were reclaimed
    pub fn reclaim_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.leases.len();
        self.leases.retain(|bot_id, lease| {
            let keep = !lease.is_expired(now);
            if !keep {
                warn!(bot = %bot_id, "reclaiming expired lease");
            }
            keep
        });
        before.saturating_sub(self.leases.len())
    }

    pub fn active_count(&self) -> usize {
        self.leases.len()
    }
}
