//! Rolling dialogue history.
//!
//! [`Transcript`] keeps the last *N* [`DialogueTurn`]s.  A turn opens when a
//! finalized user utterance arrives or when assistant text shows up with no
//! turn open; assistant fragments are appended to the open turn until the
//! call returns to listening.  Oldest turns are evicted past the window.
//!
//! The turns sit behind an `Arc`, so the per-frame status snapshot shares
//! them and only a write after a snapshot copies the history.

use std::collections::VecDeque;
use std::sync::Arc;

use uuid::Uuid;

/// Turns kept before the oldest is evicted.
pub const DEFAULT_MAX_TURNS: usize = 50;

// ---------------------------------------------------------------------------
// DialogueTurn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DialogueTurn {
    pub id: Uuid,
    pub user: String,
    pub assistant: String,
}

impl DialogueTurn {
    fn new(user: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            assistant: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Transcript {
    turns: Arc<VecDeque<DialogueTurn>>,
    active: Option<Uuid>,
    max_turns: usize,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_TURNS)
    }
}

impl Transcript {
    /// A transcript keeping at most `max_turns` turns (at least one).
    pub fn with_capacity(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: Arc::new(VecDeque::with_capacity(max_turns + 1)),
            active: None,
            max_turns,
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Close any open turn and open a new one for `user` text.
    pub fn begin_user_turn(&mut self, user: impl Into<String>) -> Uuid {
        let turn = DialogueTurn::new(user.into());
        let id = turn.id;
        self.push(turn);
        self.active = Some(id);
        id
    }

    /// Append assistant text to the open turn, opening one if needed.
    pub fn append_assistant(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let id = match self.active {
            Some(id) if self.turns.iter().any(|t| t.id == id) => id,
            _ => {
                let turn = DialogueTurn::new(String::new());
                let id = turn.id;
                self.push(turn);
                self.active = Some(id);
                id
            }
        };
        if let Some(turn) = Arc::make_mut(&mut self.turns).iter_mut().find(|t| t.id == id) {
            turn.assistant.push_str(fragment);
        }
    }

    /// Seal the open turn; later assistant text starts a new one.
    pub fn close_turn(&mut self) {
        self.active = None;
    }

    pub fn clear(&mut self) {
        self.turns = Arc::new(VecDeque::with_capacity(self.max_turns + 1));
        self.active = None;
    }

    fn push(&mut self, turn: DialogueTurn) {
        let turns = Arc::make_mut(&mut self.turns);
        turns.push_back(turn);
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Turns oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &DialogueTurn> {
        self.turns.iter()
    }

    pub fn active_turn(&self) -> Option<&DialogueTurn> {
        let id = self.active?;
        self.turns.iter().find(|t| t.id == id)
    }

    pub fn last(&self) -> Option<&DialogueTurn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
