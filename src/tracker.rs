//! Registry of the notes currently sounding in a playback session.
//!
//! Writes come from dispatch only. Readers take an [`ActiveNotes`]
//! snapshot, which never blocks the writer and never changes under them.

use crate::VoiceId;
use arc_swap::ArcSwap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ActivityTracker {
    active: ArcSwap<Vec<(u8, VoiceId)>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `(pitch, voice)`. Repeated triggers of the same key stack
    /// up and each needs its own note-off.
    pub fn note_on(&self, voice: VoiceId, pitch: u8, velocity: u8) {
        self.active.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend_from_slice(current);
            next.push((pitch, voice));
            next
        });
        tracing::trace!(voice, pitch, velocity, "tracker note on");
    }

    /// Removes one occurrence of `(pitch, voice)`. Returns `false` for an
    /// unmatched note-off, which is logged and otherwise ignored.
    pub fn note_off(&self, voice: VoiceId, pitch: u8) -> bool {
        let mut removed = false;
        self.active.rcu(|current| {
            let mut next = Vec::clone(current);
            removed = match next.iter().position(|&entry| entry == (pitch, voice)) {
                Some(idx) => {
                    next.remove(idx);
                    true
                }
                None => false,
            };
            next
        });
        if !removed {
            tracing::warn!(voice, pitch, "note off without a sounding note");
        }
        removed
    }

    pub fn snapshot(&self) -> ActiveNotes {
        ActiveNotes {
            notes: self.active.load_full(),
        }
    }

    /// Empties the tracker and returns what was still sounding.
    pub fn drain(&self) -> Vec<(u8, VoiceId)> {
        Arc::unwrap_or_clone(self.active.swap(Arc::new(Vec::new())))
    }

    pub fn len(&self) -> usize {
        self.active.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.load().is_empty()
    }
}

/// Immutable view of the sounding notes at one instant.
#[derive(Debug, Clone, Default)]
pub struct ActiveNotes {
    notes: Arc<Vec<(u8, VoiceId)>>,
}

impl ActiveNotes {
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, VoiceId)> + '_ {
        self.notes.iter().copied()
    }

    pub fn contains(&self, pitch: u8, voice: VoiceId) -> bool {
        self.notes.contains(&(pitch, voice))
    }

    /// Is `pitch` sounding in any voice.
    pub fn contains_pitch(&self, pitch: u8) -> bool {
        self.notes.iter().any(|&(p, _)| p == pitch)
    }

    pub fn pitches_in_voice(&self, voice: VoiceId) -> Vec<u8> {
        self.notes
            .iter()
            .filter(|&&(_, v)| v == voice)
            .map(|&(p, _)| p)
            .collect()
    }

    /// Distinct sounding pitches across all voices, ascending.
    pub fn pitches(&self) -> Vec<u8> {
        let mut pitches: Vec<u8> = self.notes.iter().map(|&(p, _)| p).collect();
        pitches.sort_unstable();
        pitches.dedup();
        pitches
    }
}

impl<'a> IntoIterator for &'a ActiveNotes {
    type Item = &'a (u8, VoiceId);
    type IntoIter = std::slice::Iter<'a, (u8, VoiceId)>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}
