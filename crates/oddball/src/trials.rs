//! Trial model and trial-list file parsing.
//!
//! A trial-list file holds one entry per line, `<1-based index>, <kind>`,
//! where the kind is `standard`, `target`, `cross` or a novel-sound
//! identifier such as `wav1`. `cross` entries are fixation-only filler:
//! they carry the current expected index but do not consume it. Every other
//! entry must match the running counter exactly; a gap or repeat means the
//! file was edited by hand and the run must not start.

use std::fmt;

use thiserror::Error;
use tracing::info;

/// Field separator of the trial-list grammar.
const SEPARATOR: &str = ", ";

/// What a trial presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialKind {
    /// Frequent low tone.
    Standard,
    /// Rare high tone the participant responds to.
    Target,
    /// Rare novel sound, identified by its file stem (e.g. `wav1`).
    Novel(String),
    /// Fixation-only filler, no stimulus and no index consumed.
    Cross,
}

impl TrialKind {
    pub fn is_novel(&self) -> bool {
        matches!(self, TrialKind::Novel(_))
    }
}

impl fmt::Display for TrialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialKind::Standard => f.write_str("standard"),
            TrialKind::Target => f.write_str("target"),
            TrialKind::Novel(id) => f.write_str(id),
            TrialKind::Cross => f.write_str("cross"),
        }
    }
}

/// One scheduled stimulus-presentation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    /// Original 1-based index from the file, kept for logs and diagnostics.
    pub index: u32,
    pub kind: TrialKind,
}

/// Trial-list data-integrity faults. All fatal at load time, before the
/// operator is prompted to start.
#[derive(Debug, Error)]
pub enum TrialListError {
    #[error("line {line}: expected \"<index>, <kind>\", got {text:?}")]
    MalformedLine { line: usize, text: String },

    #[error("line {line}: trial index {token:?} could not be interpreted as an integer")]
    UnparseableIndex { line: usize, token: String },

    #[error("line {line}: trial index {found} does not match the expected index {expected}")]
    IndexMismatch {
        line: usize,
        found: u32,
        expected: u32,
    },

    #[error("line {line}: unknown trial kind {kind:?}")]
    UnknownKind { line: usize, kind: String },

    #[error("line {line}: novel sound {kind:?} is not among the available sounds {available:?}")]
    UnknownNovel {
        line: usize,
        kind: String,
        available: Vec<String>,
    },
}

/// Ordered, immutable sequence of trials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialList {
    trials: Vec<Trial>,
}

impl TrialList {
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn get(&self, cursor: usize) -> Option<&Trial> {
        self.trials.get(cursor)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Trial> {
        self.trials.iter()
    }

    /// Index of the final entry, for "trial i / n" progress lines.
    pub fn last_index(&self) -> u32 {
        self.trials.last().map(|t| t.index).unwrap_or(0)
    }

    /// Re-serialize with the file grammar. Parsing the result with the same
    /// vocabulary reproduces this list.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for trial in &self.trials {
            out.push_str(&trial.index.to_string());
            out.push_str(SEPARATOR);
            out.push_str(&trial.kind.to_string());
            out.push('\n');
        }
        out
    }
}

impl<'a> IntoIterator for &'a TrialList {
    type Item = &'a Trial;
    type IntoIter = std::slice::Iter<'a, Trial>;

    fn into_iter(self) -> Self::IntoIter {
        self.trials.iter()
    }
}

/// Parse a trial-list file's contents.
///
/// `novel_vocabulary` is the set of novel-sound identifiers available on
/// disk (see [`crate::sounds::list_novel_sounds`]); any `wav*` kind outside
/// it is rejected. Blank lines are skipped. Enforces the expected-index
/// invariant: sequential non-`cross` indices are exactly `1..=n`.
pub fn parse_trial_list(
    text: &str,
    novel_vocabulary: &[String],
) -> Result<TrialList, TrialListError> {
    let mut trials = Vec::new();
    let mut expected: u32 = 1;
    for (line_no, raw) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (idx_token, kind_token) =
            line.split_once(SEPARATOR)
                .ok_or_else(|| TrialListError::MalformedLine {
                    line: line_no,
                    text: line.to_string(),
                })?;
        let index: u32 =
            idx_token
                .parse()
                .map_err(|_| TrialListError::UnparseableIndex {
                    line: line_no,
                    token: idx_token.to_string(),
                })?;
        if index != expected {
            return Err(TrialListError::IndexMismatch {
                line: line_no,
                found: index,
                expected,
            });
        }
        let kind = parse_kind(kind_token, novel_vocabulary, line_no)?;
        if kind != TrialKind::Cross {
            expected += 1;
        }
        trials.push(Trial { index, kind });
    }
    info!(trials = trials.len(), "trial list loaded");
    Ok(TrialList { trials })
}

fn parse_kind(
    token: &str,
    novel_vocabulary: &[String],
    line_no: usize,
) -> Result<TrialKind, TrialListError> {
    if token.starts_with("wav") {
        if novel_vocabulary.iter().any(|id| id == token) {
            return Ok(TrialKind::Novel(token.to_string()));
        }
        return Err(TrialListError::UnknownNovel {
            line: line_no,
            kind: token.to_string(),
            available: novel_vocabulary.to_vec(),
        });
    }
    match token {
        "standard" => Ok(TrialKind::Standard),
        "target" => Ok(TrialKind::Target),
        "cross" => Ok(TrialKind::Cross),
        other => Err(TrialListError::UnknownKind {
            line: line_no,
            kind: other.to_string(),
        }),
    }
}
