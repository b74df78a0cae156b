//! Ordered outbound event queue
//!
//! Every producer (session tasks, the session manager) publishes into one
//! bounded queue and a single consumer task forwards events to the host in
//! publish order. Publishing never waits: when the queue is full the oldest
//! non-lifecycle event is dropped, and lifecycle events are always kept.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventMask};

/// Receives events drained by the dispatcher
#[async_trait]
pub trait EventSink: Send + 'static {
    async fn deliver(&mut self, event: Event) -> Result<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<Event> {
    async fn deliver(&mut self, event: Event) -> Result<()> {
        self.send(event).await.map_err(|_| Error::HostDisconnected)
    }
}

struct Queue {
    events: VecDeque<Event>,
    capacity: usize,
    mask: EventMask,
    dropped: u64,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Notify,
}

/// Publishing handle to the event queue
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    events: VecDeque::with_capacity(capacity),
                    capacity: capacity.max(1),
                    mask: EventMask::default(),
                    dropped: 0,
                    closed: false,
                }),
                available: Notify::new(),
            }),
        }
    }

    /// Queue an event for delivery
    ///
    /// Returns `false` if the event was filtered out by the mask, dropped on
    /// overflow, or the dispatcher is closed.
    pub fn publish(&self, event: Event) -> bool {
        {
            let mut queue = self.shared.queue.lock();

            if queue.closed {
                trace!("Dispatcher closed, discarding {:?}", event.kind());
                return false;
            }
            if !queue.mask.intersects(event.kind()) {
                return false;
            }

            if queue.events.len() >= queue.capacity {
                match queue.events.iter().position(|queued| !queued.is_lifecycle()) {
                    Some(oldest) => {
                        queue.events.remove(oldest);
                        queue.dropped += 1;
                        warn!("Event queue full, dropped oldest data event");
                    }
                    None if !event.is_lifecycle() => {
                        queue.dropped += 1;
                        warn!("Event queue full of lifecycle events, dropped {:?}", event.kind());
                        return false;
                    }
                    None => {}
                }
            }

            queue.events.push_back(event);
        }

        self.shared.available.notify_one();
        true
    }

    /// Select which event kinds are accepted from now on
    pub fn set_mask(&self, mask: EventMask) {
        self.shared.queue.lock().mask = mask;
    }

    pub fn mask(&self) -> EventMask {
        self.shared.queue.lock().mask
    }

    /// Number of events dropped on overflow so far
    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.shared.queue.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting events; queued events are still delivered
    pub fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.available.notify_one();
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the dispatcher is closed and drained. Only one
    /// consumer may wait at a time.
    pub async fn next(&self) -> Option<Event> {
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if let Some(event) = queue.events.pop_front() {
                    return Some(event);
                }
                if queue.closed {
                    return None;
                }
            }
            self.shared.available.notified().await;
        }
    }

    /// Spawn the consumer task forwarding events to `sink`
    pub fn spawn<S: EventSink>(&self, mut sink: S) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            while let Some(event) = dispatcher.next().await {
                trace!("Delivering {:?} for {}", event.kind(), event.scanner_id());
                if let Err(e) = sink.deliver(event).await {
                    warn!("Stopping event delivery: {}", e);
                    dispatcher.close();
                    break;
                }
            }
            debug!("Event dispatcher stopped");
        })
    }
}
