//! Context windowing for outbound decision requests.

use serde::Serialize;

use crate::core::events::{ContextEvent, EventKind};

/// Smallest budget that fits any window; `[]` alone is two characters.
pub const MIN_WINDOW_CHARS: i64 = 2;
/// A single turn's output may take at most this fraction of the context budget.
pub const TURN_OUTPUT_SHARE: i64 = 4;

/// Keep the newest suffix of `events` whose JSON array serialization fits in
/// `budget_chars` characters.
///
/// Oldest events are dropped first. A budget below [`MIN_WINDOW_CHARS`] yields
/// an empty window, as does a newest event that alone exceeds the budget.
pub fn window_events<T: Serialize>(events: &[T], budget_chars: i64) -> &[T] {
    if budget_chars < MIN_WINDOW_CHARS {
        return &[];
    }
    let budget = usize::try_from(budget_chars).unwrap_or(usize::MAX);
    let lengths: Vec<usize> = events.iter().map(serialized_len).collect();

    // "[" + "]" plus one comma between each kept element.
    let mut total = 2 + lengths.iter().sum::<usize>() + lengths.len().saturating_sub(1);
    let mut start = 0;
    while start < events.len() && total > budget {
        let dropped = lengths[start];
        let separator = usize::from(events.len() - start > 1);
        total = total.saturating_sub(dropped + separator);
        start += 1;
    }
    &events[start..]
}

/// Serialize the windowed events as a JSON array string.
pub fn serialize_window<T: Serialize>(events: &[T], budget_chars: i64) -> String {
    let window = window_events(events, budget_chars);
    serde_json::to_string(window).unwrap_or_else(|_| "[]".to_string())
}

/// Per-turn output allowance for a context budget.
pub fn turn_output_chars(budget_chars: i64) -> usize {
    usize::try_from(budget_chars / TURN_OUTPUT_SHARE).unwrap_or(0)
}

/// Copy `events`, clipping each session turn's output to about `max_chars`.
///
/// Clipped output keeps its head (return code and the start of stdout) and
/// its tail (the end of stderr) around an omission marker.
pub fn clip_turn_outputs(events: &[ContextEvent], max_chars: usize) -> Vec<ContextEvent> {
    events
        .iter()
        .map(|event| match &event.kind {
            EventKind::SessionTurn(turn) => match clip_middle(&turn.output, max_chars) {
                Some(output) => {
                    let mut turn = turn.clone();
                    turn.output = output;
                    ContextEvent {
                        timestamp: event.timestamp,
                        kind: EventKind::SessionTurn(turn),
                    }
                }
                None => event.clone(),
            },
            _ => event.clone(),
        })
        .collect()
}

fn clip_middle(text: &str, max_chars: usize) -> Option<String> {
    let total = text.chars().count();
    if total <= max_chars {
        return None;
    }
    let head_chars = max_chars / 4;
    let tail_chars = max_chars - head_chars;
    let omitted = total - max_chars;
    let head: String = text.chars().take(head_chars).collect();
    let tail: String = text.chars().skip(total - tail_chars).collect();
    Some(format!("{head}\n[... {omitted} characters omitted ...]\n{tail}"))
}

fn serialized_len<T: Serialize>(event: &T) -> usize {
    serde_json::to_string(event)
        .map(|text| text.chars().count())
        .unwrap_or(usize::MAX / 4)
}
