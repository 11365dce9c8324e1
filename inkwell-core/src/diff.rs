//! Minimal single-region diff between two texts.
//!
//! Used to turn a full-content snapshot into node operations: everything
//! outside the common prefix and suffix is replaced.

/// The differing middle region, in character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    pub start: usize,
    pub removed: usize,
    pub inserted: String,
}

/// `None` when the texts are equal.
pub fn splice(old: &str, new: &str) -> Option<Splice> {
    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();

    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if prefix == old.len() && prefix == new.len() {
        return None;
    }

    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    Some(Splice {
        start: prefix,
        removed: old.len() - prefix - suffix,
        inserted: new[prefix..new.len() - suffix].iter().collect(),
    })
}
