//! Channels between the collector and the region worker slots.
//!
//! Each slot thread owns a job receiver; all slots share one event sender
//! back to the collector. Events carry their cycle id so the collector can
//! drop anything that arrives after its cycle was finalized.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Instant;

use super::worker::RegionResult;

/// A request for one slot to extract its region.
#[derive(Debug, Clone, Copy)]
pub struct Job {
    pub cycle: u64,
    /// Collector deadline; work still waiting for the capture backend
    /// gives up at this point.
    pub deadline: Instant,
}

/// Progress reported by a slot.
#[derive(Debug)]
pub enum SlotEvent {
    /// The slot is done with the capture backend for this cycle.
    Captured { cycle: u64, slot: usize },
    /// The slot produced its result.
    Finished { cycle: u64, result: RegionResult },
}

impl SlotEvent {
    pub fn cycle(&self) -> u64 {
        match self {
            SlotEvent::Captured { cycle, .. } | SlotEvent::Finished { cycle, .. } => *cycle,
        }
    }
}

/// Creates a job queue for one slot.
pub fn create_job_queue() -> (Sender<Job>, Receiver<Job>) {
    channel()
}

/// Creates the shared event queue.
///
/// The channel is unbounded; a slow collector never blocks a worker.
pub fn create_event_queue() -> (Sender<SlotEvent>, Receiver<SlotEvent>) {
    channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_job_queue_send_receive() {
        let (sender, receiver) = create_job_queue();
        let deadline = Instant::now() + Duration::from_secs(1);
        sender.send(Job { cycle: 3, deadline }).expect("Failed to send");

        let received = receiver.recv().expect("Failed to receive");
        assert_eq!(received.cycle, 3);
        assert_eq!(received.deadline, deadline);
    }

    #[test]
    fn test_events_keep_order_and_cycle() {
        let (sender, receiver) = create_event_queue();
        for slot in 0..3 {
            sender
                .send(SlotEvent::Captured { cycle: 1, slot })
                .expect("Failed to send");
        }
        sender
            .send(SlotEvent::Finished {
                cycle: 2,
                result: RegionResult::timed_out(0, "a", Duration::ZERO),
            })
            .expect("Failed to send");

        for slot in 0..3 {
            match receiver.recv().expect("Failed to receive") {
                SlotEvent::Captured { cycle, slot: s } => {
                    assert_eq!(cycle, 1);
                    assert_eq!(s, slot);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(receiver.recv().unwrap().cycle(), 2);
    }

    #[test]
    fn test_channel_closes_when_sender_dropped() {
        let (sender, receiver) = create_job_queue();
        sender
            .send(Job {
                cycle: 1,
                deadline: Instant::now(),
            })
            .unwrap();

        drop(sender);

        assert!(receiver.recv().is_ok());
        assert!(receiver.recv().is_err());
    }
}
