//! Process-scoped server state
//!
//! Everything a packet handler needs: the logical clock, token authority,
//! per-address admission counters and the zone registry. Built once at
//! startup and shared behind an `Arc`.

use crate::canvas::Canvas;
use crate::clock::{Clock, Tick};
use crate::error::ZoneError;
use crate::rate_limiter::RateLimiter;
use crate::registry::ZoneRegistry;
use crate::token::{Token, TokenAuthority};
use crate::zone::Zone;
use log::info;
use shared::Point;
use std::sync::Arc;

/// Largest single canvas accepted unless configured otherwise.
pub const DEFAULT_MAX_CANVAS_BYTES: u64 = 1024 * 1024 * 1024;

pub struct ServerContext {
    pub clock: Arc<Clock>,
    pub tokens: TokenAuthority,
    pub rate_limiter: RateLimiter,
    pub zones: ZoneRegistry,
    max_canvas_bytes: u64,
}

impl ServerContext {
    pub fn new(tokens: TokenAuthority, max_challenges: i32) -> Self {
        Self {
            clock: Arc::new(Clock::new()),
            tokens,
            rate_limiter: RateLimiter::new(max_challenges),
            zones: ZoneRegistry::new(),
            max_canvas_bytes: DEFAULT_MAX_CANVAS_BYTES,
        }
    }

    /// Caps the memory a single zone's canvas may take.
    pub fn with_max_canvas_bytes(mut self, bytes: u64) -> Self {
        self.max_canvas_bytes = bytes;
        self
    }

    pub fn max_canvas_bytes(&self) -> u64 {
        self.max_canvas_bytes
    }

    /// Creates a zone unless its canvas would exceed the memory budget.
    pub async fn create_zone(&self, size: Point, freeze: Tick) -> Result<Arc<Zone>, ZoneError> {
        if Canvas::byte_size(size) > self.max_canvas_bytes {
            return Err(ZoneError::CanvasTooLarge(size));
        }

        let privileged = self.tokens.privileged_token();
        self.zones
            .create_zone(size, freeze, Arc::clone(&self.clock), privileged)
            .await
    }

    pub async fn lookup_zone(&self, zone_id: usize) -> Option<Arc<Zone>> {
        self.zones.lookup_zone(zone_id).await
    }

    /// Generates a painter token and registers it with `zone`.
    pub fn issue_token(&self, zone: &Zone) -> Token {
        let token = self.tokens.user_token();
        zone.add_token(token.clone());
        info!("Issued token for zone {}", zone.id());
        token
    }

    /// True if `candidate` administers `zone`: its privileged token or the
    /// master token.
    pub fn can_administer(&self, zone: &Zone, candidate: &str) -> bool {
        zone.is_privileged(candidate) || self.tokens.master_auth(candidate)
    }
}
