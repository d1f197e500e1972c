//! Output feeds of a session poller.
//!
//! Axis modifiers travel through one single-slot `watch` channel per logical
//! function: the poller overwrites the slot with the freshest value and a
//! slow consumer only ever sees the latest one, so nothing accumulates.
//! Button and hat transitions are edges, not levels, and go through an
//! unbounded queue where every transition is kept in order.

use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::controller::matcher::RosterChange;

/// Latest modifier of one logical function.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierUpdate {
    /// Profile `type` tag of the source device.
    pub device_type: String,
    /// Raw axis index the value was read from.
    pub axis_index: usize,
    pub function: String,
    pub raw: f64,
    pub value: f64,
}

/// An event that must reach the consumer individually.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscreteEvent {
    ButtonDown {
        device_type: String,
        index: usize,
        name: Option<String>,
    },
    ButtonUp {
        device_type: String,
        index: usize,
        name: Option<String>,
    },
    HatMotion {
        device_type: String,
        index: usize,
        name: Option<String>,
        x: i8,
        y: i8,
    },
    /// The axis' calibration turned out degenerate and must be redone.
    RecalibrationRequested { axis: String },
    /// Supported devices appeared or disappeared.
    RosterChanged(RosterChange),
    /// The session's device is gone; no more updates will follow.
    Disconnected { device: String },
}

/// Producer half, owned by the poller.
#[derive(Debug)]
pub struct FeedSender {
    axes: BTreeMap<String, watch::Sender<Option<ModifierUpdate>>>,
    events: mpsc::UnboundedSender<DiscreteEvent>,
}

/// Consumer half.
#[derive(Debug)]
pub struct FeedReceivers {
    axes: BTreeMap<String, watch::Receiver<Option<ModifierUpdate>>>,
    events: mpsc::UnboundedReceiver<DiscreteEvent>,
}

/// Create the feeds for the given logical functions.
pub fn channel<'a, I>(functions: I) -> (FeedSender, FeedReceivers)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut senders = BTreeMap::new();
    let mut receivers = BTreeMap::new();
    for function in functions {
        let (tx, rx) = watch::channel(None);
        senders.insert(function.to_string(), tx);
        receivers.insert(function.to_string(), rx);
    }
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    (
        FeedSender {
            axes: senders,
            events: events_tx,
        },
        FeedReceivers {
            axes: receivers,
            events: events_rx,
        },
    )
}

impl FeedSender {
    /// Overwrite the function's slot. Returns `false` for unknown functions.
    pub fn publish_modifier(&self, update: ModifierUpdate) -> bool {
        match self.axes.get(&update.function) {
            Some(tx) => {
                tx.send_replace(Some(update));
                true
            }
            None => false,
        }
    }

    /// Empty every slot so no consumer acts on a value that no longer holds.
    pub fn clear_modifiers(&self) {
        for tx in self.axes.values() {
            tx.send_if_modified(|slot| slot.take().is_some());
        }
    }

    /// Empty the slots of the given functions only.
    pub fn clear_functions<'a, I>(&self, functions: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for function in functions {
            if let Some(tx) = self.axes.get(function) {
                tx.send_if_modified(|slot| slot.take().is_some());
            }
        }
    }

    /// Queue an event. Returns `false` once the consumer is gone.
    pub fn publish_event(&self, event: DiscreteEvent) -> bool {
        match self.events.send(event) {
            Ok(()) => true,
            Err(e) => {
                trace!("Dropping {:?}, no consumer", e.0);
                false
            }
        }
    }
}

impl FeedReceivers {
    /// Functions that have a feed.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(String::as_str)
    }

    /// Extra receiver for one function's feed.
    #[must_use]
    pub fn subscribe(&self, function: &str) -> Option<watch::Receiver<Option<ModifierUpdate>>> {
        self.axes.get(function).cloned()
    }

    /// Latest value of `function`, seen or not.
    #[must_use]
    pub fn latest(&self, function: &str) -> Option<ModifierUpdate> {
        self.axes.get(function).and_then(|rx| rx.borrow().clone())
    }

    /// Values published since the previous call, one per function at most.
    pub fn drain_changed(&mut self) -> Vec<ModifierUpdate> {
        self.axes
            .values_mut()
            .filter(|rx| rx.has_changed().unwrap_or(false))
            .filter_map(|rx| rx.borrow_and_update().clone())
            .collect()
    }

    /// Next discrete event; `None` once the poller has stopped.
    pub async fn next_event(&mut self) -> Option<DiscreteEvent> {
        self.events.recv().await
    }

    /// Next discrete event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<DiscreteEvent> {
        self.events.try_recv().ok()
    }
}
