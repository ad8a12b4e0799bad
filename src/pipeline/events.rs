//! Notifications from the element to its host

use log::trace;
use tokio::sync::mpsc;

use super::types::FrameRateCode;

/// Notification published by the element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementEvent {
    /// Output format fixed: planar I420 at the given size
    Caps { width: u32, height: u32 },

    /// The `frame_rate` property changed
    FrameRateChanged { code: FrameRateCode, fps: f64 },
}

impl std::fmt::Display for ElementEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementEvent::Caps { width, height } => {
                write!(f, "caps video/raw I420 {}x{}", width, height)
            }
            ElementEvent::FrameRateChanged { fps, .. } => {
                write!(f, "frame_rate changed to {:.3}", fps)
            }
        }
    }
}

/// Fan-out of element events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<ElementEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ElementEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Publish an event, dropping subscribers that went away
    pub fn emit(&mut self, event: ElementEvent) {
        trace!("Events: {}", event);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out() {
        let mut bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(ElementEvent::Caps {
            width: 720,
            height: 576,
        });

        let expected = ElementEvent::Caps {
            width: 720,
            height: 576,
        };
        assert_eq!(a.try_recv().unwrap(), expected);
        assert_eq!(b.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        bus.emit(ElementEvent::FrameRateChanged {
            code: FrameRateCode::new(3),
            fps: 25.0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
