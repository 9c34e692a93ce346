//! Per-address admission control
//!
//! Every remote IP address gets an [`IpStatistic`] on first contact holding a
//! budget of "challenges". The transport spends a challenge whenever the
//! address sends something suspicious (undecodable packets, bad credentials,
//! unknown zones). Once the budget reaches zero the address is refused for
//! the rest of the process lifetime.

use log::{debug, warn};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct IpStatistic {
    challenges: AtomicI32,
}

impl IpStatistic {
    pub fn new(max_challenges: i32) -> Self {
        Self {
            challenges: AtomicI32::new(max_challenges),
        }
    }

    pub fn get_challenges(&self) -> i32 {
        self.challenges.load(Ordering::Acquire)
    }

    /// Spends one challenge and returns the remaining budget. The budget
    /// never drops below zero; a spent budget is returned unchanged.
    pub fn decrease_challenges(&self) -> i32 {
        match self
            .challenges
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| (c > 0).then(|| c - 1))
        {
            Ok(previous) => previous - 1,
            Err(current) => current,
        }
    }
}

pub struct RateLimiter {
    max_challenges: i32,
    statistics: RwLock<HashMap<IpAddr, Arc<IpStatistic>>>,
}

impl RateLimiter {
    pub fn new(max_challenges: i32) -> Self {
        Self {
            max_challenges,
            statistics: RwLock::new(HashMap::with_capacity(100)),
        }
    }

    pub fn max_challenges(&self) -> i32 {
        self.max_challenges
    }

    pub async fn lookup(&self, addr: IpAddr) -> Option<Arc<IpStatistic>> {
        let statistics = self.statistics.read().await;
        statistics.get(&addr).cloned()
    }

    /// Returns the statistic for `addr`, creating it with a full budget on
    /// first contact.
    pub async fn record(&self, addr: IpAddr) -> Arc<IpStatistic> {
        if let Some(stat) = self.lookup(addr).await {
            return stat;
        }

        let mut statistics = self.statistics.write().await;
        let stat = statistics.entry(addr).or_insert_with(|| {
            debug!("First contact from {}", addr);
            Arc::new(IpStatistic::new(self.max_challenges))
        });
        Arc::clone(stat)
    }

    /// Admission decision for a recorded address: refused once the budget
    /// is spent.
    pub fn admits(&self, stat: &IpStatistic) -> bool {
        stat.get_challenges() > 0
    }

    /// Records `addr` and reports whether it may proceed.
    pub async fn admit(&self, addr: IpAddr) -> bool {
        let stat = self.record(addr).await;
        self.admits(&stat)
    }

    /// Spends one challenge of `addr`.
    pub async fn penalize(&self, addr: IpAddr) {
        let stat = self.record(addr).await;
        if !self.admits(&stat) {
            return;
        }

        if stat.decrease_challenges() == 0 {
            warn!("Address {} exhausted its challenges", addr);
        }
    }

    pub async fn len(&self) -> usize {
        self.statistics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.statistics.read().await.is_empty()
    }
}
