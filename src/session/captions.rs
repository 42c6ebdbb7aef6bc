//! Correlates caption fragments with the audio they belong to.
//!
//! Caption text and audio travel as separate events.  Fragments tagged with
//! a sequence number wait here until audio with that number has been
//! scheduled; untagged fragments queue FIFO and ride along with the next
//! scheduled chunk.  Once a sequence number has been scheduled, later
//! fragments for it are released immediately.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Default)]
pub struct CaptionBuffer {
    by_seq: BTreeMap<u64, String>,
    unsequenced: VecDeque<String>,
    scheduled: BTreeSet<u64>,
}

impl CaptionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a fragment; returns text that can be shown right away.
    pub fn push(&mut self, seq: Option<u64>, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        match seq {
            Some(seq) if self.scheduled.contains(&seq) => vec![text.to_owned()],
            Some(seq) => {
                self.by_seq.entry(seq).or_default().push_str(text);
                Vec::new()
            }
            None => {
                self.unsequenced.push_back(text.to_owned());
                Vec::new()
            }
        }
    }

    /// Audio for `seq` reached the timeline; release its text followed by any
    /// queued untagged fragments.
    pub fn on_scheduled(&mut self, seq: Option<u64>) -> Vec<String> {
        let mut ready = Vec::new();
        if let Some(seq) = seq {
            self.scheduled.insert(seq);
            ready.extend(self.by_seq.remove(&seq));
        }
        ready.extend(self.unsequenced.drain(..));
        ready
    }

    /// Release everything still held, tagged text in sequence order first,
    /// and forget which sequence numbers were scheduled.
    pub fn flush_all(&mut self) -> Vec<String> {
        let mut ready: Vec<String> = std::mem::take(&mut self.by_seq).into_values().collect();
        ready.extend(self.unsequenced.drain(..));
        self.scheduled.clear();
        ready
    }

    /// Discard everything held.
    pub fn clear(&mut self) {
        self.by_seq.clear();
        self.unsequenced.clear();
        self.scheduled.clear();
    }

    pub fn pending(&self) -> usize {
        self.by_seq.len() + self.unsequenced.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_text_waits_for_its_audio() {
        let mut captions = CaptionBuffer::new();
        assert!(captions.push(Some(2), "world").is_empty());
        assert!(captions.push(Some(1), "hello ").is_empty());

        assert_eq!(captions.on_scheduled(Some(1)), vec!["hello "]);
        assert_eq!(captions.on_scheduled(Some(2)), vec!["world"]);
        assert_eq!(captions.pending(), 0);
    }

    #[test]
    fn text_for_already_scheduled_seq_passes_through() {
        let mut captions = CaptionBuffer::new();
        assert!(captions.on_scheduled(Some(4)).is_empty());
        assert_eq!(captions.push(Some(4), "late"), vec!["late"]);
    }

    #[test]
    fn untagged_text_rides_with_next_chunk() {
        let mut captions = CaptionBuffer::new();
        captions.push(None, "a");
        captions.push(None, "b");
        captions.push(Some(1), "c");
        assert_eq!(captions.on_scheduled(Some(1)), vec!["c", "a", "b"]);
    }

    #[test]
    fn flush_all_orders_by_seq_and_resets() {
        let mut captions = CaptionBuffer::new();
        captions.push(Some(3), "three");
        captions.push(Some(1), "one");
        captions.push(None, "tail");
        captions.on_scheduled(Some(9));

        assert_eq!(captions.flush_all(), vec!["one", "three", "tail"]);
        assert!(captions.push(Some(9), "new turn").is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let mut captions = CaptionBuffer::new();
        captions.push(Some(1), "gone");
        captions.push(None, "also gone");
        captions.clear();
        assert_eq!(captions.pending(), 0);
        assert!(captions.on_scheduled(Some(1)).is_empty());
    }
}
