//! Context compaction.
//!
//! Prior turns are normalized and bounded before a run starts: structured
//! tool payloads are dropped from history (summaries stay), system turns are
//! removed, the turn count is capped, and a hard byte ceiling is enforced as
//! a last resort. The caller's history is never modified.

use quarry_config::ContextConfig;
use quarry_core::error::ContextError;
use quarry_core::message::{self, Message, Role};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ContextCompactor {
    max_exchanges: usize,
    hard_ceiling_bytes: usize,
}

impl ContextCompactor {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            max_exchanges: config.max_exchanges,
            hard_ceiling_bytes: config.hard_ceiling_bytes,
        }
    }

    /// Build the bounded working context for a new user message.
    ///
    /// The returned sequence always ends with the new message.
    pub fn compact(&self, history: &[Message], user_message: &str) -> Result<Vec<Message>, ContextError> {
        let mut turns: Vec<Message> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .map(|mut m| {
                strip_payloads(&mut m);
                m
            })
            .collect();

        let cap = self.max_exchanges.saturating_mul(2);
        if turns.len() > cap {
            let excess = turns.len() - cap;
            turns.drain(..excess);
            debug!(dropped = excess, kept = cap, "Capped conversation history");
        }
        drop_leading_orphans(&mut turns);

        turns.push(Message::user(user_message));

        let size = message::serialized_size(&turns);
        if size > self.hard_ceiling_bytes {
            warn!(
                size,
                ceiling = self.hard_ceiling_bytes,
                "Context over hard ceiling; keeping only the latest turns"
            );
            let keep_from = turns.len().saturating_sub(2);
            turns.drain(..keep_from);
            drop_leading_orphans(&mut turns);
            shrink_to_fit(&mut turns, self.hard_ceiling_bytes);
        }

        if !turns.iter().any(Message::has_content) {
            return Err(ContextError::Empty);
        }

        Ok(turns)
    }

    /// Keep a growing working context under the ceiling mid-run.
    ///
    /// Relief goes in steps, stopping as soon as the context fits: payloads
    /// of every tool turn but the most recent are stripped, then the most
    /// recent turn loses its `data` (summary and guidance stay), then its
    /// payloads go entirely, then text is truncated oldest first.
    /// Returns whether the context now fits.
    pub fn relieve(&self, context: &mut [Message]) -> bool {
        if message::serialized_size(context) <= self.hard_ceiling_bytes {
            return true;
        }

        let latest_tool = context.iter().rposition(|m| m.role == Role::Tool);
        for (index, turn) in context.iter_mut().enumerate() {
            if turn.role == Role::Tool && Some(index) != latest_tool {
                strip_payloads(turn);
            }
        }
        if message::serialized_size(context) <= self.hard_ceiling_bytes {
            return true;
        }

        let Some(latest) = latest_tool else {
            shrink_to_fit(context, self.hard_ceiling_bytes);
            return message::serialized_size(context) <= self.hard_ceiling_bytes;
        };

        debug!(
            ceiling = self.hard_ceiling_bytes,
            "Dropping data from the latest tool results"
        );
        strip_data(&mut context[latest]);
        if message::serialized_size(context) <= self.hard_ceiling_bytes {
            return true;
        }

        strip_payloads(&mut context[latest]);
        shrink_to_fit(context, self.hard_ceiling_bytes);

        let size = message::serialized_size(context);
        let fits = size <= self.hard_ceiling_bytes;
        if !fits {
            warn!(
                size,
                ceiling = self.hard_ceiling_bytes,
                "Working context still over ceiling after relief"
            );
        }
        fits
    }
}

/// Drop the record data from a tool turn's payloads, marking the omission.
fn strip_data(turn: &mut Message) {
    for part in &mut turn.tool_results {
        if let Some(payload) = part.payload.as_mut().and_then(|p| p.as_object_mut())
            && payload.remove("data").is_some()
        {
            payload.remove("truncated");
            payload.insert("data_omitted".into(), serde_json::Value::Bool(true));
        }
    }
}

fn strip_payloads(turn: &mut Message) {
    for part in &mut turn.tool_results {
        part.payload = None;
    }
}

/// Tool turns whose assistant tool-call turn is gone are unusable.
fn drop_leading_orphans(turns: &mut Vec<Message>) {
    let orphans = turns.iter().take_while(|m| m.role == Role::Tool).count();
    if orphans > 0 {
        turns.drain(..orphans);
    }
}

fn truncate_on_char_boundary(s: &mut String, max_len: usize) {
    if s.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

fn shrinkable_len(turn: &Message) -> usize {
    turn.content.len() + turn.tool_results.iter().map(|r| r.summary.len()).sum::<usize>()
}

fn shrink_turn(turn: &mut Message, mut excess: usize) {
    let cut = excess.min(turn.content.len());
    let keep = turn.content.len() - cut;
    truncate_on_char_boundary(&mut turn.content, keep);
    excess -= cut;

    for part in &mut turn.tool_results {
        if excess == 0 {
            break;
        }
        let cut = excess.min(part.summary.len());
        let keep = part.summary.len() - cut;
        truncate_on_char_boundary(&mut part.summary, keep);
        excess -= cut;
    }
}

/// Truncate text, oldest turn first, until the turns fit.
fn shrink_to_fit(turns: &mut [Message], ceiling: usize) {
    loop {
        let size = message::serialized_size(turns);
        if size <= ceiling {
            return;
        }
        let Some(turn) = turns.iter_mut().find(|t| shrinkable_len(t) > 0) else {
            return;
        };
        shrink_turn(turn, size - ceiling);
    }
}
