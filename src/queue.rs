//! Per-session playlist with a cursor on the track that is playing.
//!
//! Played tracks stay in the list; advancing only moves the cursor. Only the
//! explicit clear operations remove tracks.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use crate::error::{MusicError, MusicResult};
use crate::models::Track;

#[derive(Debug, Default)]
pub struct Queue {
    items: Vec<Track>,
    current: Option<usize>,
}

/// Whether `next` should be skipped over when advancing from `current`.
///
/// Two consecutive tracks with the same title are treated as an accidental
/// double add. This compares titles only, so two different uploads that happen
/// to share a title are collapsed too.
fn collapses_duplicate(current: &Track, next: &Track) -> bool {
    current.title == next.title
}

impl Queue {
    pub fn new() -> Queue {
        Queue::default()
    }

    /// Appends a track. The first track of an empty queue becomes current.
    pub fn enqueue(&mut self, track: Track) {
        self.items.push(track);

        if self.items.len() == 1 {
            self.current = Some(0);
        }
    }

    pub fn set_last_as_current(&mut self) {
        if !self.items.is_empty() {
            self.current = Some(self.items.len() - 1);
        }
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.and_then(|index| self.items.get(index))
    }

    #[cfg(test)]
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    #[cfg(test)]
    pub(crate) fn point_at(&mut self, index: usize) {
        self.current = Some(index);
    }

    pub fn has_next(&self) -> bool {
        match self.current {
            Some(index) => index + 1 < self.items.len(),
            None => false,
        }
    }

    /// Moves the cursor forward. Returns `Ok(false)` when already on the last
    /// track.
    ///
    /// A cursor that no longer points into the list means the queue is out of
    /// sync; it is cleared and `InternalInconsistency` is returned.
    pub fn advance(&mut self) -> MusicResult<bool> {
        let index = match self.current {
            Some(index) if index < self.items.len() => index,
            _ => {
                warn!("Current track is not in the queue ({} items), clearing it", self.items.len());
                self.clear();
                return Err(MusicError::InternalInconsistency);
            }
        };

        let next = index + 1;

        if next >= self.items.len() {
            return Ok(false);
        }

        let target = if next + 1 < self.items.len() && collapses_duplicate(&self.items[index], &self.items[next]) {
            next + 1
        } else {
            next
        };

        self.current = Some(target);

        Ok(true)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
    }

    /// Drops everything but the current track.
    pub fn clear_except_current(&mut self) {
        if self.items.len() <= 1 {
            return;
        }

        match self.current.and_then(|index| self.items.get(index)).cloned() {
            Some(current) => {
                self.items = vec![current];
                self.current = Some(0);
            }
            None => self.clear(),
        }
    }

    /// Shuffles the tracks after the current one.
    pub fn shuffle_upcoming<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let start = self.current.map_or(0, |index| index + 1);

        if start < self.items.len() {
            self.items[start..].shuffle(rng);
        }
    }

    /// The current track followed by everything queued after it.
    pub fn upcoming(&self) -> &[Track] {
        match self.current {
            Some(index) if index < self.items.len() => &self.items[index..],
            _ => &self.items,
        }
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serenity::model::id::UserId;

    use super::*;

    pub(crate) fn track(title: &str) -> Track {
        Track {
            title: title.to_string(),
            stream_url: format!("https://stream.example/{title}"),
            thumbnail_url: format!("https://img.example/{title}.jpg"),
            source_page_url: format!("https://video.example/{title}"),
            duration: Some(Duration::from_secs(180)),
            requester: UserId(7),
        }
    }

    fn titles(queue: &Queue) -> Vec<&str> {
        queue.items.iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn empty_queue_has_no_current() {
        let queue = Queue::new();

        assert!(queue.is_empty());
        assert_eq!(queue.current(), None);
        assert!(!queue.has_next());
    }

    #[test]
    fn first_enqueue_becomes_current() {
        let mut queue = Queue::new();
        queue.enqueue(track("a"));

        assert_eq!(queue.current(), Some(&track("a")));

        queue.enqueue(track("b"));
        queue.enqueue(track("c"));

        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("a"));
        assert_eq!(queue.size(), 3);
    }

    #[test]
    fn advancing_walks_the_queue_and_keeps_history() {
        let mut queue = Queue::new();
        for title in ["a", "b", "c"] {
            queue.enqueue(track(title));
        }

        assert_eq!(queue.advance(), Ok(true));
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("b"));
        assert!(queue.has_next());

        assert_eq!(queue.advance(), Ok(true));
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("c"));
        assert!(!queue.has_next());

        assert_eq!(queue.size(), 3);
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn advancing_past_the_end_is_a_no_op() {
        let mut queue = Queue::new();
        queue.enqueue(track("a"));

        assert_eq!(queue.advance(), Ok(false));
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn duplicate_title_is_skipped_when_more_follow() {
        let mut queue = Queue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("a"));
        queue.enqueue(track("c"));

        queue.advance().unwrap();

        assert_eq!(queue.current_index(), Some(2));
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("c"));
    }

    #[test]
    fn trailing_duplicate_is_still_played() {
        let mut queue = Queue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("a"));

        queue.advance().unwrap();

        assert_eq!(queue.current_index(), Some(1));
    }

    #[test]
    fn dangling_cursor_clears_the_queue() {
        let mut queue = Queue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        queue.current = Some(5);

        assert_eq!(queue.advance(), Err(MusicError::InternalInconsistency));
        assert!(queue.is_empty());
        assert_eq!(queue.current(), None);
    }

    #[test]
    fn set_last_as_current_targets_newest_item() {
        let mut queue = Queue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));

        queue.set_last_as_current();

        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("b"));
        assert!(!queue.has_next());
    }

    #[test]
    fn clear_except_current_keeps_only_current() {
        let mut queue = Queue::new();
        for title in ["a", "b", "c"] {
            queue.enqueue(track(title));
        }
        queue.advance().unwrap();

        queue.clear_except_current();

        assert_eq!(queue.size(), 1);
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("b"));
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn clear_except_current_ignores_small_queues() {
        let mut queue = Queue::new();
        queue.clear_except_current();
        assert!(queue.is_empty());

        queue.enqueue(track("a"));
        queue.clear_except_current();
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("a"));
    }

    #[test]
    fn clear_resets_everything() {
        let mut queue = Queue::new();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));

        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.current(), None);

        queue.enqueue(track("c"));
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("c"));
    }

    #[test]
    fn shuffle_never_moves_current_or_history() {
        let mut queue = Queue::new();
        for title in ["a", "b", "c", "d", "e", "f"] {
            queue.enqueue(track(title));
        }
        queue.advance().unwrap();

        queue.shuffle_upcoming(&mut StdRng::seed_from_u64(3));

        assert_eq!(&titles(&queue)[..2], &["a", "b"]);
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("b"));

        let mut rest: Vec<&str> = titles(&queue)[2..].to_vec();
        rest.sort_unstable();
        assert_eq!(rest, vec!["c", "d", "e", "f"]);
    }

    #[test]
    fn upcoming_starts_at_current() {
        let mut queue = Queue::new();
        for title in ["a", "b", "c"] {
            queue.enqueue(track(title));
        }
        queue.advance().unwrap();

        let upcoming: Vec<&str> = queue.upcoming().iter().map(|t| t.title.as_str()).collect();

        assert_eq!(upcoming, vec!["b", "c"]);
    }
}
