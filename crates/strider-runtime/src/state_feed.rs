//! One-writer / one-reader outbound state snapshot.
//!
//! The control loop publishes a [`RobotState`] after every physics step; the
//! telemetry bridge reads the latest copy at its own cadence.  Backed by a
//! `tokio::sync::watch` channel, so publishing never blocks and never fails
//! even when no reader is attached.

use strider_types::RobotState;
use tokio::sync::watch;

/// Create a connected publisher / subscriber pair.
pub fn state_feed() -> (StatePublisher, StateSubscriber) {
    let (tx, rx) = watch::channel(None);
    (StatePublisher { tx }, StateSubscriber { rx })
}

#[derive(Debug)]
pub struct StatePublisher {
    tx: watch::Sender<Option<RobotState>>,
}

impl StatePublisher {
    pub fn publish(&self, state: RobotState) {
        self.tx.send_replace(Some(state));
    }

    /// A new subscriber that sees the current and all later snapshots.
    pub fn subscribe(&self) -> StateSubscriber {
        StateSubscriber { rx: self.tx.subscribe() }
    }
}

#[derive(Debug, Clone)]
pub struct StateSubscriber {
    rx: watch::Receiver<Option<RobotState>>,
}

impl StateSubscriber {
    /// Copy of the most recent snapshot if it has not been seen yet.
    pub fn take_fresh(&mut self) -> Option<RobotState> {
        if self.rx.has_changed().unwrap_or(false) {
            self.rx.borrow_and_update().clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_types::{BasePose, JointState};

    fn state(ts: i64) -> RobotState {
        RobotState {
            timestamp_ms: ts,
            base: BasePose::default(),
            joints: JointState::zeros(2),
        }
    }

    #[test]
    fn empty_before_first_publish() {
        let (_tx, mut rx) = state_feed();
        assert!(rx.take_fresh().is_none());
    }

    #[test]
    fn reader_sees_latest_snapshot_only() {
        let (tx, mut rx) = state_feed();
        tx.publish(state(1));
        tx.publish(state(2));
        assert_eq!(rx.take_fresh().unwrap().timestamp_ms, 2);
        assert!(rx.take_fresh().is_none());

        tx.publish(state(3));
        assert_eq!(rx.take_fresh().unwrap().timestamp_ms, 3);
    }

    #[test]
    fn publish_without_reader_does_not_fail() {
        let (tx, rx) = state_feed();
        drop(rx);
        tx.publish(state(3));
        assert_eq!(tx.subscribe().take_fresh().unwrap().timestamp_ms, 3);
    }

    #[test]
    fn clones_track_freshness_independently() {
        let (tx, mut a) = state_feed();
        let mut b = a.clone();
        tx.publish(state(4));
        assert_eq!(a.take_fresh().unwrap().timestamp_ms, 4);
        assert_eq!(b.take_fresh().unwrap().timestamp_ms, 4);
        assert!(a.take_fresh().is_none());
    }
}
