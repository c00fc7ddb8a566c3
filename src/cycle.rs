//! Cyclic substring matcher.
//!
//! A `TokenCycle` expects its tokens to show up in the log in order, over and
//! over. Only the token at the cursor is ever compared; a hit records a
//! timestamp in the match log and moves the cursor on, wrapping after the
//! last token.

use crate::config::CycleConfig;
use crate::verdict::Verdict;
use chrono::{DateTime, Utc};

/// Errors from building a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    NoTokens { name: String },
    EmptyToken { name: String, index: usize },
    ZeroRepetitions { name: String },
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::NoTokens { name } => write!(f, "cycle '{name}' has no tokens"),
            CycleError::EmptyToken { name, index } => {
                write!(f, "cycle '{name}' has an empty token at position {index}")
            }
            CycleError::ZeroRepetitions { name } => {
                write!(f, "cycle '{name}' needs at least one repetition")
            }
        }
    }
}

impl std::error::Error for CycleError {}

#[derive(Debug, Clone)]
pub struct TokenCycle {
    name: String,
    tokens: Vec<String>,
    cursor: usize,
    repetitions: usize,
    matches: Vec<DateTime<Utc>>,
}

impl TokenCycle {
    /// Build a cycle. `tokens` must be non-empty and contain no empty token,
    /// since an empty token would match every line. `repetitions` must be at
    /// least 1 or the cycle would pass without a single match.
    pub fn new(
        name: impl Into<String>,
        tokens: Vec<String>,
        repetitions: usize,
    ) -> Result<Self, CycleError> {
        let name = name.into();
        if tokens.is_empty() {
            return Err(CycleError::NoTokens { name });
        }
        if let Some(index) = tokens.iter().position(|t| t.is_empty()) {
            return Err(CycleError::EmptyToken { name, index });
        }
        if repetitions == 0 {
            return Err(CycleError::ZeroRepetitions { name });
        }
        Ok(Self {
            name,
            tokens,
            cursor: 0,
            repetitions,
            matches: Vec::new(),
        })
    }

    pub fn from_config(name: &str, config: &CycleConfig) -> Result<Self, CycleError> {
        Self::new(name, config.tokens.clone(), config.repetitions)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The token the cycle is currently waiting for.
    pub fn expected(&self) -> &str {
        &self.tokens[self.cursor]
    }

    /// Timestamps of every match so far, oldest first.
    pub fn matches(&self) -> &[DateTime<Utc>] {
        &self.matches
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Matches needed for a pass: one per token, `repetitions` times over.
    pub fn threshold(&self) -> usize {
        self.tokens.len() * self.repetitions
    }

    /// Offer one line to the cycle. Returns true when it advanced.
    pub fn observe(&mut self, line: &str, at: DateTime<Utc>) -> bool {
        if !line.contains(self.tokens[self.cursor].as_str()) {
            return false;
        }
        self.matches.push(at);
        tracing::info!(
            cycle = %self.name,
            token = %self.tokens[self.cursor],
            matches = self.matches.len(),
            "relink pattern matched"
        );
        self.cursor = (self.cursor + 1) % self.tokens.len();
        true
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_count(self.match_count(), self.threshold())
    }
}
