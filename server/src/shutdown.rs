use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    StopRequested,
    MemoryLimit { used: u64, limit: u64 },
    Interrupted,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::StopRequested => write!(f, "stop requested"),
            ShutdownReason::MemoryLimit { used, limit } => {
                write!(f, "out of memory limit ({} of {} bytes)", used, limit)
            }
            ShutdownReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Cloneable trigger for the global shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<ShutdownReason>,
}

impl ShutdownHandle {
    /// Fires the signal. Returns false if the server already stopped listening.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        self.tx.send(reason).is_ok()
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, mpsc::UnboundedReceiver<ShutdownReason>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ShutdownHandle { tx }, rx)
}
