use crate::VoiceId;
use crate::timing::VoiceStream;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
    ControlChange { controller: u8, value: u8 },
}

#[derive(Debug)]
pub enum Action {
    Dispatch {
        voice: VoiceId,
        message: MidiMessage,
    },
    /// Pull the next event of `voice`. Carries the stream itself so only
    /// one registration of it can exist at a time.
    ReEvaluate { voice: VoiceId, stream: VoiceStream },
}

/// A pending action in the scheduler queue.
///
/// Ordered by `time`, then by `seq`, the scheduler's insertion counter.
/// Two actions for the same instant therefore always leave the queue in
/// the order they were queued.
#[derive(Debug)]
pub struct ScheduledAction {
    pub time: f64,
    pub seq: u64,
    pub action: Action,
}

impl ScheduledAction {
    pub fn is_reevaluation(&self) -> bool {
        matches!(self.action, Action::ReEvaluate { .. })
    }
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    fn note_off(time: f64, seq: u64, pitch: u8) -> ScheduledAction {
        ScheduledAction {
            time,
            seq,
            action: Action::Dispatch {
                voice: 0,
                message: MidiMessage::NoteOff { pitch },
            },
        }
    }

    #[test]
    fn test_heap_pops_earliest_then_insertion_order() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(note_off(1.0, 0, 60)));
        heap.push(Reverse(note_off(0.5, 3, 62)));
        heap.push(Reverse(note_off(0.5, 1, 64)));
        heap.push(Reverse(note_off(0.0, 2, 65)));

        let order: Vec<(f64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(a)| (a.time, a.seq))
            .collect();
        assert_eq!(order, vec![(0.0, 2), (0.5, 1), (0.5, 3), (1.0, 0)]);
    }

    #[test]
    fn test_reevaluation_kind() {
        let action = ScheduledAction {
            time: 0.0,
            seq: 0,
            action: Action::ReEvaluate {
                voice: 1,
                stream: VoiceStream::empty(),
            },
        };
        assert!(action.is_reevaluation());
        assert!(!note_off(0.0, 1, 60).is_reevaluation());
    }
}
