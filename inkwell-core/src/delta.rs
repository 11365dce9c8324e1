//! Position-based patches in the retain/insert/delete shape rich-text
//! editors consume.
//!
//! ```text
//! "Hello" ── [retain 5, insert " World"] ──► "Hello World"
//! ```
//!
//! Lengths count Unicode scalar values, matching the node granularity of
//! the sequence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOp {
    Retain(usize),
    Insert(String),
    Delete(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("delta consumes {needed} characters but the base text has {available}")]
    BaseTooShort { needed: usize, available: usize },
}

/// A patch from one text to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn retain(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        if let Some(DeltaOp::Retain(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(DeltaOp::Retain(n));
        }
        self
    }

    pub fn insert(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        if let Some(DeltaOp::Insert(last)) = self.ops.last_mut() {
            last.push_str(text);
        } else {
            self.ops.push(DeltaOp::Insert(text.to_string()));
        }
        self
    }

    pub fn delete(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        if let Some(DeltaOp::Delete(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(DeltaOp::Delete(n));
        }
        self
    }

    /// Drop a trailing retain; it carries no information.
    pub fn chop(&mut self) -> &mut Self {
        if matches!(self.ops.last(), Some(DeltaOp::Retain(_))) {
            self.ops.pop();
        }
        self
    }

    /// Characters of the base text this delta reads.
    pub fn base_len(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                DeltaOp::Retain(n) | DeltaOp::Delete(n) => *n,
                DeltaOp::Insert(_) => 0,
            })
            .sum()
    }

    /// Apply the delta to `base`. Characters past the last op are kept.
    pub fn apply(&self, base: &str) -> Result<String, DeltaError> {
        let needed = self.base_len();
        let available = base.chars().count();
        if needed > available {
            return Err(DeltaError::BaseTooShort { needed, available });
        }

        let mut chars = base.chars();
        let mut out = String::with_capacity(base.len());
        for op in &self.ops {
            match op {
                DeltaOp::Retain(n) => out.extend(chars.by_ref().take(*n)),
                DeltaOp::Insert(text) => out.push_str(text),
                DeltaOp::Delete(n) => {
                    chars.by_ref().take(*n).for_each(drop);
                }
            }
        }
        out.extend(chars);
        Ok(out)
    }
}
