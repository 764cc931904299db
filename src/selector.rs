//! Side selector worker (spec §4.H): drains `out_interface_selector_ch` and
//! publishes the embedder's choice of active outside into [`SharedState`].

use tokio_util::sync::CancellationToken;

use crate::dispatch::Shared;
use crate::model::Side;

use tokio::sync::mpsc;

pub struct SelectorLoop {
    pub state: Shared,
    pub rx: mpsc::Receiver<Side>,
}

impl SelectorLoop {
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!("side selector starting");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_side = self.rx.recv() => {
                    match maybe_side {
                        Some(side) => {
                            tracing::info!(side = %side, "active outside changed");
                            self.state.set_active_out(side);
                        }
                        None => break,
                    }
                }
            }
        }
        tracing::debug!("side selector exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SharedState;
    use std::sync::Arc;

    #[tokio::test]
    async fn selecting_alt_out_updates_shared_state() {
        let state: Shared = Arc::new(SharedState::new());
        let (tx, rx) = mpsc::channel(4);
        let loop_ = SelectorLoop {
            state: state.clone(),
            rx,
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(loop_.run(cancel.clone()));

        tx.send(Side::AltOut).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(state.active_out(), Side::AltOut);

        cancel.cancel();
        drop(tx);
        let _ = handle.await;
    }
}
