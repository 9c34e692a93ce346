//! Zones: independent canvases with their own draw queue
//!
//! Each zone owns:
//! - A pixel grid written only by the zone's consumer task
//! - A token book mapping every registered token to its cool-down state,
//!   plus the zone's privileged (administrator) token
//! - A bounded request queue feeding the consumer
//!
//! Producers submit [`DrawRequest`]s; once the queue holds
//! [`QUEUE_CAPACITY`] requests, further submissions wait for space. The
//! consumer applies requests strictly in arrival order and silently drops
//! those that fall outside the canvas.
//!
//! Lifecycle is `Open -> Closed`. Closing stops new submissions, fails
//! producers still waiting for queue space, lets the consumer apply what was
//! already buffered, and then ends it.

use crate::canvas::Canvas;
use crate::clock::{Clock, Tick};
use crate::error::ZoneError;
use crate::token::Token;
use image::{DynamicImage, RgbaImage};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use shared::{Color, Point};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

pub const QUEUE_CAPACITY: usize = 1000;

/// One pixel-write intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRequest {
    pub point: Point,
    pub color: Color,
    /// Token the transport validated for this request. `None` means the
    /// request is not subject to per-token cool-down.
    pub token: Option<Token>,
}

impl DrawRequest {
    pub fn new(point: Point, color: Color) -> Self {
        Self {
            point,
            color,
            token: None,
        }
    }

    pub fn with_token(point: Point, color: Color, token: Token) -> Self {
        Self {
            point,
            color,
            token: Some(token),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenStatistic {
    pub next_operation_time: Tick,
}

#[derive(Debug, Default)]
struct TokenBook {
    stats: HashMap<Token, TokenStatistic>,
    privileged: Option<Token>,
}

/// State shared between a zone handle and its consumer task.
struct ZoneShared {
    id: usize,
    range: Point,
    freeze: Tick,
    clock: Arc<Clock>,
    canvas: RwLock<Canvas>,
    tokens: Mutex<TokenBook>,
}

impl ZoneShared {
    /// Decides whether a request carrying `token` may draw right now and, if
    /// so, starts its next cool-down window.
    fn try_spend(&self, token: &Token) -> bool {
        let now = self.clock.now();
        let mut book = self.tokens.lock();

        match book.stats.get_mut(token) {
            Some(stat) if !now.before(stat.next_operation_time) => {
                stat.next_operation_time = now.add(self.freeze);
                true
            }
            Some(stat) => {
                debug!(
                    "Zone {}: token cooling down until tick {} (now {})",
                    self.id, stat.next_operation_time, now
                );
                false
            }
            None => {
                debug!("Zone {}: dropping draw from unregistered token", self.id);
                false
            }
        }
    }

    fn apply(&self, request: DrawRequest) {
        if request.point.exceeds(&self.range) || request.point.is_negative() {
            debug!(
                "Zone {}: dropping out-of-range draw at ({}, {})",
                self.id, request.point.x, request.point.y
            );
            return;
        }

        if let Some(token) = &request.token {
            if !self.try_spend(token) {
                return;
            }
        }

        self.canvas.write().set(request.point, request.color);
    }
}

pub struct Zone {
    shared: Arc<ZoneShared>,
    size: Point,
    sender: mpsc::Sender<DrawRequest>,
    receiver: Mutex<Option<mpsc::Receiver<DrawRequest>>>,
    closed: AtomicBool,
    close_signal: Arc<Notify>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Zone {
    /// Builds an open zone with a transparent `size.x` by `size.y` canvas.
    /// The consumer is not running until [`Zone::start`] is called.
    pub fn new(id: usize, size: Point, freeze: Tick, clock: Arc<Clock>) -> Result<Self, ZoneError> {
        let canvas = Canvas::new(size)?;
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);

        let shared = Arc::new(ZoneShared {
            id,
            range: Point::new(size.x - 1, size.y - 1),
            freeze,
            clock,
            canvas: RwLock::new(canvas),
            tokens: Mutex::new(TokenBook {
                stats: HashMap::with_capacity(10),
                privileged: None,
            }),
        });

        Ok(Self {
            shared,
            size,
            sender,
            receiver: Mutex::new(Some(receiver)),
            closed: AtomicBool::new(false),
            close_signal: Arc::new(Notify::new()),
            consumer: Mutex::new(None),
        })
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn size(&self) -> Point {
        self.size
    }

    /// Largest valid coordinate in each axis.
    pub fn range(&self) -> Point {
        self.shared.range
    }

    pub fn freeze(&self) -> Tick {
        self.shared.freeze
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn add_token(&self, token: Token) {
        let stat = TokenStatistic {
            next_operation_time: self.shared.clock.now(),
        };

        let mut book = self.shared.tokens.lock();
        book.stats.insert(token, stat);
    }

    pub fn delete_token(&self, token: &Token) -> bool {
        let mut book = self.shared.tokens.lock();
        book.stats.remove(token).is_some()
    }

    pub fn has_token(&self, token: &Token) -> bool {
        self.shared.tokens.lock().stats.contains_key(token)
    }

    pub fn token_statistic(&self, token: &Token) -> Option<TokenStatistic> {
        self.shared.tokens.lock().stats.get(token).copied()
    }

    /// Every token currently registered to the zone, in no particular order.
    pub fn tokens(&self) -> Vec<Token> {
        self.shared.tokens.lock().stats.keys().cloned().collect()
    }

    pub fn update_privileged_token(&self, token: Token) {
        let mut book = self.shared.tokens.lock();
        book.privileged = Some(token);
    }

    pub fn privileged_token(&self) -> Option<Token> {
        self.shared.tokens.lock().privileged.clone()
    }

    pub fn is_privileged(&self, candidate: &str) -> bool {
        self.shared
            .tokens
            .lock()
            .privileged
            .as_ref()
            .is_some_and(|t| t.as_str() == candidate)
    }

    pub fn pixel(&self, point: Point) -> Option<Color> {
        self.shared.canvas.read().get(point)
    }

    /// Renders the canvas. Calls made while the zone is open may observe a
    /// mix of earlier and later draws.
    pub fn gen_image(&self) -> RgbaImage {
        self.shared.canvas.read().to_image()
    }

    pub fn load_image(&self, img: &DynamicImage) -> Result<(), ZoneError> {
        self.shared.canvas.write().load_image(img)
    }

    /// Spawns the consumer task. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };

        let shared = Arc::clone(&self.shared);
        let close_signal = Arc::clone(&self.close_signal);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = close_signal.notified() => {
                        receiver.close();
                        while let Some(request) = receiver.recv().await {
                            shared.apply(request);
                        }
                        break;
                    }

                    request = receiver.recv() => match request {
                        Some(request) => shared.apply(request),
                        None => break,
                    },
                }
            }
            debug!("Zone {} consumer stopped", shared.id);
        });

        *self.consumer.lock() = Some(handle);
    }

    /// Enqueues a request, waiting while the queue is full.
    pub async fn submit(&self, request: DrawRequest) -> Result<(), ZoneError> {
        if self.is_closed() {
            return Err(ZoneError::Closed);
        }
        self.sender.send(request).await.map_err(|_| ZoneError::Closed)
    }

    /// Enqueues a request without waiting. A full queue is reported as
    /// `Ok(false)`.
    pub fn try_submit(&self, request: DrawRequest) -> Result<bool, ZoneError> {
        if self.is_closed() {
            return Err(ZoneError::Closed);
        }
        match self.sender.try_send(request) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ZoneError::Closed),
        }
    }

    /// Marks the zone closed and tells the consumer to finish. Only the first
    /// call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("Zone {} closed twice", self.id());
            return;
        }

        // Never started: close the queue here so blocked producers fail.
        if let Some(receiver) = self.receiver.lock().as_mut() {
            receiver.close();
        }

        self.close_signal.notify_one();
        info!("Zone {} closed", self.id());
    }

    /// Waits for the consumer to apply everything buffered before close.
    pub async fn join(&self) {
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Zone {} consumer ended abnormally: {}", self.id(), e);
            }
        }
    }
}
