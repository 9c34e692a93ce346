//! Append-only collection of zones
//!
//! Zone ids are positions in creation order and stay valid for the whole
//! process lifetime; zones are never removed. Once closed, the registry
//! refuses new zones.

use crate::clock::{Clock, Tick};
use crate::error::ZoneError;
use crate::token::Token;
use crate::zone::Zone;
use log::info;
use shared::Point;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ZoneRegistry {
    zones: RwLock<Vec<Arc<Zone>>>,
    // Written only while holding the `zones` write lock.
    closed: AtomicBool,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a zone under the next free id, hands it `privileged_token`,
    /// starts its consumer and appends it.
    pub async fn create_zone(
        &self,
        size: Point,
        freeze: Tick,
        clock: Arc<Clock>,
        privileged_token: Token,
    ) -> Result<Arc<Zone>, ZoneError> {
        let mut zones = self.zones.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(ZoneError::Closed);
        }
        let zone_id = zones.len();

        let zone = Zone::new(zone_id, size, freeze, clock)?;
        zone.update_privileged_token(privileged_token);
        zone.start();

        let zone = Arc::new(zone);
        zones.push(Arc::clone(&zone));

        info!(
            "Created {}x{} zone {} (freeze {} ticks)",
            size.x, size.y, zone_id, freeze
        );
        Ok(zone)
    }

    pub async fn lookup_zone(&self, zone_id: usize) -> Option<Arc<Zone>> {
        let zones = self.zones.read().await;
        zones.get(zone_id).cloned()
    }

    /// Snapshot of all zones in id order.
    pub async fn zones(&self) -> Vec<Arc<Zone>> {
        self.zones.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.zones.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.zones.read().await.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops accepting zones, closes every zone, then waits for each
    /// consumer to finish.
    pub async fn close_all(&self) {
        let zones = {
            let zones = self.zones.write().await;
            self.closed.store(true, Ordering::Release);
            zones.clone()
        };

        for zone in &zones {
            zone.close();
        }
        for zone in &zones {
            zone.join().await;
        }
    }
}
