//! Network availability signal.

use tokio::sync::watch;

/// Creates a signal and the sender that drives it.
pub fn network_channel(initially_online: bool) -> (watch::Sender<bool>, NetworkSignal) {
    let (tx, rx) = watch::channel(initially_online);
    (tx, NetworkSignal::from_receiver(rx))
}

/// Injected view of network availability.
///
/// Without a receiver the network is assumed to be always available. If the
/// sender is dropped, the last value sticks.
#[derive(Debug, Clone, Default)]
pub struct NetworkSignal {
    rx: Option<watch::Receiver<bool>>,
    closed: bool,
}

impl NetworkSignal {
    /// A signal that always reports the network as available.
    pub fn always_online() -> Self {
        Self::default()
    }

    /// Wraps a receiver carrying `true` while the network is available.
    pub fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self {
            rx: Some(rx),
            closed: false,
        }
    }

    /// Returns the current availability.
    pub fn is_online(&self) -> bool {
        self.rx.as_ref().map_or(true, |rx| *rx.borrow())
    }

    /// Waits for the next change and returns the new availability.
    ///
    /// Never completes for a signal without a receiver or whose sender is
    /// gone.
    pub async fn changed(&mut self) -> bool {
        match self.rx.as_mut() {
            Some(rx) if !self.closed => {
                if rx.changed().await.is_err() {
                    self.closed = true;
                    return std::future::pending().await;
                }
                *rx.borrow_and_update()
            }
            _ => std::future::pending().await,
        }
    }
}

impl From<watch::Receiver<bool>> for NetworkSignal {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self::from_receiver(rx)
    }
}
