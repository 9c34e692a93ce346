//! # Paint Board Server Library
//!
//! Authoritative server for a shared pixel canvas split into independent
//! zones. Clients send draw requests over UDP; each zone applies them in
//! arrival order on its own consumer task and keeps the canonical pixels.
//!
//! ## Draw Pipeline
//!
//! A draw travels through four stages:
//! - **Admission**: the per-address [`rate_limiter`] refuses senders whose
//!   challenge budget is spent
//! - **Authorization**: the handler in [`network`] checks the token against
//!   the target zone
//! - **Queueing**: the request enters the zone's bounded queue, blocking the
//!   handler task while the queue is full
//! - **Application**: the zone consumer enforces bounds and per-token
//!   cool-downs measured in [`clock`] ticks, then writes the pixel
//!
//! ## Shutdown
//!
//! A stop packet, the memory [`watchdog`] or Ctrl+C fire the [`shutdown`]
//! signal. The server then closes every zone, waits for their consumers to
//! drain and writes each zone to the work directory via [`export`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::context::ServerContext;
//! use server::network::Server;
//! use server::token::TokenAuthority;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = Arc::new(ServerContext::new(TokenAuthority::new(false), 3));
//!     context.clock.spawn_ticker(Duration::from_secs(1));
//!
//!     let mut server = Server::new("127.0.0.1:19198", context, "/tmp/board".into()).await?;
//!     let report = server.run().await?;
//!     println!("exported {} zones", report.exported.len());
//!     Ok(())
//! }
//! ```

pub mod canvas;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod network;
pub mod rate_limiter;
pub mod registry;
pub mod shutdown;
pub mod token;
pub mod watchdog;
pub mod zone;
