//! History compaction: replace an old prefix with one summary turn.

use crate::agent::state::Turn;

/// The prefix to summarize, if `history` is over `threshold` turns.
/// The last `keep_recent` turns are never included.
pub fn compactable_prefix(history: &[Turn], threshold: usize, keep_recent: usize) -> Option<&[Turn]> {
    if history.len() <= threshold || history.len() <= keep_recent {
        return None;
    }
    Some(&history[..history.len() - keep_recent])
}

/// Replace everything but the last `keep_recent` turns with `summary`.
pub fn apply_compaction(history: &mut Vec<Turn>, keep_recent: usize, summary: String) {
    if history.len() <= keep_recent {
        return;
    }
    let recent = history.split_off(history.len() - keep_recent);
    history.clear();
    history.push(Turn::Summary { text: summary });
    history.extend(recent);
}
