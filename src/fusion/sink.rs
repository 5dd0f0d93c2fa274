//! Results sinks receiving fused rows.
//!
//! The fusion engine thread is the only caller of a sink, so implementations
//! take `&mut self` and need no internal synchronization.

use super::types::FusedRow;
use tokio::sync::mpsc;
use tracing::debug;

/// Consumer of fused rows (GUI bridge, file writer, test collector).
pub trait ResultsSink: Send + 'static {
    /// Accept one fused row.
    fn accept(&mut self, row: FusedRow);
}

impl<F> ResultsSink for F
where
    F: FnMut(FusedRow) + Send + 'static,
{
    fn accept(&mut self, row: FusedRow) {
        self(row)
    }
}

/// Forwards rows into an unbounded channel.
///
/// The receiver can be drained from any thread with `try_recv` or
/// `blocking_recv`; no async runtime is required.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<FusedRow>,
}

impl ChannelSink {
    /// Create a sink and the receiver its rows arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FusedRow>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultsSink for ChannelSink {
    fn accept(&mut self, row: FusedRow) {
        if self.tx.send(row).is_err() {
            debug!("Results receiver dropped; discarding fused row");
        }
    }
}
