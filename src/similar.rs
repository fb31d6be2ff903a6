use crate::models::Event;

/// Ranking strategy for the "similar events" read. Implementations must never
/// return the current event and must respect `limit`.
pub trait SimilarityPolicy: Send + Sync {
    fn rank(&self, current: &Event, candidates: Vec<Event>, limit: usize) -> Vec<Event>;
}

/// Default policy: most shared tags first, earlier date wins ties, events with
/// no tag overlap are dropped.
pub struct TagOverlap;

impl SimilarityPolicy for TagOverlap {
    fn rank(&self, current: &Event, candidates: Vec<Event>, limit: usize) -> Vec<Event> {
        let mut scored: Vec<(usize, Event)> = candidates
            .into_iter()
            .filter(|candidate| candidate.id != current.id)
            .map(|candidate| (shared_tags(current, &candidate), candidate))
            .filter(|(score, _)| *score > 0)
            .collect();

        // Canonical RFC 3339 UTC strings sort chronologically.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.date.cmp(&b.1.date)));
        scored.into_iter().take(limit).map(|(_, event)| event).collect()
    }
}

fn shared_tags(a: &Event, b: &Event) -> usize {
    b.tags
        .iter()
        .filter(|tag| a.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
        .count()
}
