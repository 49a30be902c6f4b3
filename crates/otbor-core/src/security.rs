use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{
    config::Config,
    directory::{AdminDirectory, FacultyAdmin},
    domain::{FacultyId, UserId},
    Result,
};

// ============== Authorization ==============

/// What a chat account may do. Anyone may register through an invite link;
/// only admins see the admin menus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Superadmin,
    FacultyAdmin(FacultyAdmin),
    Member,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        !matches!(self, Role::Member)
    }

    pub fn is_superadmin(&self) -> bool {
        matches!(self, Role::Superadmin)
    }

    /// Faculty admins act on their own faculty only.
    pub fn can_manage(&self, faculty_id: FacultyId) -> bool {
        match self {
            Role::Superadmin => true,
            Role::FacultyAdmin(a) => a.faculty_id == faculty_id,
            Role::Member => false,
        }
    }
}

pub async fn resolve_role(
    cfg: &Config,
    directory: &dyn AdminDirectory,
    user_id: UserId,
) -> Result<Role> {
    if cfg.is_superadmin(user_id.0) {
        return Ok(Role::Superadmin);
    }
    Ok(match directory.find_admin(user_id).await? {
        Some(admin) => Role::FacultyAdmin(admin),
        None => Role::Member,
    })
}

// ============== Rate Limiter (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    /// Time for an empty bucket to fill up again.
    window: Duration,
    buckets: HashMap<UserId, Bucket>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = max_tokens as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            window,
            buckets: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        )
    }

    pub fn check(&mut self, user_id: UserId) -> (bool, Option<Duration>) {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> (bool, Option<Duration>) {
        if !self.enabled {
            return (true, None);
        }

        // A bucket untouched for a whole window is full again, same as a new one.
        let window = self.window;
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_update) < window);

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return (true, None);
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        (false, Some(Duration::from_secs_f64(secs.max(0.0))))
    }
}
