//! Bounded, idle-expiring conversation history.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    max_turns: usize,
    idle_timeout: Duration,
    last_interaction: Option<Instant>,
}

impl ConversationHistory {
    pub fn new(max_turns: usize, idle_timeout: Duration) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns + 1),
            max_turns: max_turns.max(1),
            idle_timeout,
            last_interaction: None,
        }
    }

    /// Start a user turn at `now`: forget everything if the conversation
    /// went idle, then record the question.
    pub fn begin_turn(&mut self, question: &str, now: Instant) {
        if let Some(last) = self.last_interaction {
            if now.saturating_duration_since(last) > self.idle_timeout && !self.turns.is_empty() {
                info!(
                    idle_secs = now.saturating_duration_since(last).as_secs(),
                    "conversation history reset after idle timeout"
                );
                self.turns.clear();
            }
        }
        self.last_interaction = Some(now);
        self.push(Turn::new(Role::User, question));
    }

    pub fn record_answer(&mut self, answer: &str) {
        self.push(Turn::new(Role::Assistant, answer));
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.last_interaction = None;
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_turns() {
        let mut history = ConversationHistory::new(4, Duration::from_secs(300));
        let now = Instant::now();
        for i in 0..5 {
            history.begin_turn(&format!("q{i}"), now);
            history.record_answer(&format!("a{i}"));
        }
        assert_eq!(history.len(), 4);
        let contents: Vec<_> = history.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["q3", "a3", "q4", "a4"]);
    }

    #[test]
    fn idle_timeout_starts_a_fresh_conversation() {
        let mut history = ConversationHistory::new(10, Duration::from_secs(300));
        let t0 = Instant::now();
        history.begin_turn("hello", t0);
        history.record_answer("hi");

        history.begin_turn("still there?", t0 + Duration::from_secs(200));
        assert_eq!(history.len(), 3);

        history.begin_turn("new topic", t0 + Duration::from_secs(501));
        let turns: Vec<_> = history.turns().cloned().collect();
        assert_eq!(turns, vec![Turn::new(Role::User, "new topic")]);
    }
}
