use std::sync::mpsc;

/// Discrete mouth pose for the live preview. Deliberately coarser than the
/// continuous mouth height the exporter draws; the preview only needs to
/// look alive, not lip-sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouthState {
    #[default]
    Closed,
    Open,
    Wide,
}

const CLOSED_THRESHOLD: f32 = 0.1;
const WIDE_THRESHOLD: f32 = 0.6;

impl MouthState {
    pub fn classify(amplitude: f32) -> Self {
        if amplitude < CLOSED_THRESHOLD {
            MouthState::Closed
        } else if amplitude < WIDE_THRESHOLD {
            MouthState::Open
        } else {
            MouthState::Wide
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmplitudeEvent {
    Level(f32),
    Finished,
}

/// Producer half of the preview channel. Playback publishes amplitude levels
/// as it goes and `Finished` when the clip ends.
pub struct AmplitudeFeed {
    sender: mpsc::Sender<AmplitudeEvent>,
}

impl AmplitudeFeed {
    pub fn publish(&self, amplitude: f32) {
        // A closed monitor just means nobody is watching anymore.
        let _ = self.sender.send(AmplitudeEvent::Level(amplitude));
    }

    pub fn finished(&self) {
        let _ = self.sender.send(AmplitudeEvent::Finished);
    }
}

/// Consumer half: tracks the current mouth state from whatever events have
/// arrived so far.
pub struct MouthMonitor {
    receiver: mpsc::Receiver<AmplitudeEvent>,
    state: MouthState,
}

impl MouthMonitor {
    /// Drains pending events and returns the resulting mouth state. The end
    /// of playback always closes the mouth.
    pub fn pump(&mut self) -> MouthState {
        while let Ok(event) = self.receiver.try_recv() {
            self.state = match event {
                AmplitudeEvent::Level(amplitude) => MouthState::classify(amplitude),
                AmplitudeEvent::Finished => MouthState::Closed,
            };
        }
        self.state
    }

    pub fn state(&self) -> MouthState {
        self.state
    }
}

pub fn amplitude_channel() -> (AmplitudeFeed, MouthMonitor) {
    let (sender, receiver) = mpsc::channel();
    (
        AmplitudeFeed { sender },
        MouthMonitor {
            receiver,
            state: MouthState::Closed,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_thresholds() {
        assert_eq!(MouthState::classify(0.0), MouthState::Closed);
        assert_eq!(MouthState::classify(0.09), MouthState::Closed);
        assert_eq!(MouthState::classify(0.1), MouthState::Open);
        assert_eq!(MouthState::classify(0.59), MouthState::Open);
        assert_eq!(MouthState::classify(0.6), MouthState::Wide);
        assert_eq!(MouthState::classify(1.0), MouthState::Wide);
    }

    #[test]
    fn monitor_follows_published_levels() {
        let (feed, mut monitor) = amplitude_channel();
        assert_eq!(monitor.pump(), MouthState::Closed);
        feed.publish(0.3);
        assert_eq!(monitor.pump(), MouthState::Open);
        feed.publish(0.8);
        feed.publish(0.05);
        // Only the latest pending level matters after a drain.
        assert_eq!(monitor.pump(), MouthState::Closed);
    }

    #[test]
    fn finished_closes_the_mouth() {
        let (feed, mut monitor) = amplitude_channel();
        feed.publish(0.9);
        feed.finished();
        assert_eq!(monitor.pump(), MouthState::Closed);
    }

    #[test]
    fn publishing_without_a_monitor_does_not_panic() {
        let (feed, monitor) = amplitude_channel();
        drop(monitor);
        feed.publish(0.5);
        feed.finished();
    }
}
