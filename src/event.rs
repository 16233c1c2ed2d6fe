use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

use crate::view_model::ViewState;

#[derive(Clone, Debug)]
pub enum Event {
    Tick,
    State(Arc<ViewState>),
    Interrupt,
}

/// Merges refresh ticks, view-state updates and Ctrl-C into one ordered stream.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
    _task: tokio::task::JoinHandle<()>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration, mut states: mpsc::UnboundedReceiver<Arc<ViewState>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();

        let task = tokio::spawn(async move {
            // First tick one period out: startup already refreshes.
            let mut tick_interval = interval_at(Instant::now() + tick_rate, tick_rate);

            loop {
                tokio::select! {
                    maybe_state = states.recv() => {
                        let Some(state) = maybe_state else {
                            break;
                        };
                        if tx.send(Event::State(state)).is_err() {
                            break;
                        }
                    }
                    _ = tick_interval.tick() => {
                        if tx.send(Event::Tick).is_err() {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        let _ = tx.send(Event::Interrupt);
                        break;
                    }
                }
            }
        });

        Self { rx, _task: task }
    }

    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_states_and_ticks() {
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let mut events = EventHandler::new(Duration::from_millis(20), state_rx);
        state_tx.send(Arc::new(ViewState::default())).unwrap();

        let first = events.next().await.unwrap();
        assert!(matches!(first, Event::State(_)));
        let second = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, Event::Tick));
    }

    #[tokio::test]
    async fn closed_state_stream_ends_events() {
        let (state_tx, state_rx) = mpsc::unbounded_channel::<Arc<ViewState>>();
        let mut events = EventHandler::new(Duration::from_secs(60), state_rx);
        drop(state_tx);
        let end = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
