//! Structured question/answer contract between the search core and the
//! decision oracle.
//!
//! Every answer is untrusted: [`DecisionAnswer::validate`] checks it against
//! the candidates the question allowed before anything downstream sees it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::OracleError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionQuery {
    /// Choose exactly one of `candidates` for `subject`, or decline.
    PickOne {
        /// What is being chosen, e.g. "vendor category" or "filter field".
        topic: String,
        subject: String,
        candidates: Vec<String>,
        hints: Vec<String>,
    },
    /// Assign each vendor label to one of `targets`, or leave it unmapped.
    MapLabels {
        labels: Vec<String>,
        targets: Vec<String>,
    },
    /// Cut a free-text requirement into phrases, one per field it mentions.
    SplitRequirements { text: String, fields: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub field: String,
    pub phrase: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecisionAnswer {
    Picked(String),
    Declined,
    Labels(BTreeMap<String, String>),
    Segments(Vec<Segment>),
}

/// One ask of the oracle.  A retry is always built with [`Question::rephrased`]
/// so the same content is never sent twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub query: DecisionQuery,
    pub attempt: u32,
}

impl Question {
    pub fn new(query: DecisionQuery) -> Self {
        Self { query, attempt: 0 }
    }

    pub fn pick_one(
        topic: impl Into<String>,
        subject: impl Into<String>,
        candidates: Vec<String>,
    ) -> Self {
        Self::new(DecisionQuery::PickOne {
            topic: topic.into(),
            subject: subject.into(),
            candidates,
            hints: Vec::new(),
        })
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        if let DecisionQuery::PickOne { hints, .. } = &mut self.query {
            hints.push(hint.into());
        }
        self
    }

    /// The follow-up question to send after a failed or unusable attempt.
    ///
    /// `PickOne` drops candidates sharing no word with the subject (when any
    /// remain) and every kind gains a stricter instruction.
    pub fn rephrased(&self) -> Self {
        let attempt = self.attempt + 1;
        let query = match &self.query {
            DecisionQuery::PickOne {
                topic,
                subject,
                candidates,
                hints,
            } => {
                let words = word_set(subject);
                let narrowed: Vec<String> = candidates
                    .iter()
                    .filter(|c| !word_set(c).is_disjoint(&words))
                    .cloned()
                    .collect();
                let candidates = if narrowed.is_empty() || narrowed.len() == candidates.len() {
                    candidates.clone()
                } else {
                    narrowed
                };
                let mut hints = hints.clone();
                hints.push(format!(
                    "Attempt {}: copy one candidate exactly as written, or answer null.",
                    attempt + 1
                ));
                DecisionQuery::PickOne {
                    topic: topic.clone(),
                    subject: subject.clone(),
                    candidates,
                    hints,
                }
            }
            // The prompt renders the attempt number and a stricter rule set.
            other => other.clone(),
        };
        Self { query, attempt }
    }
}

fn normalise(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn word_set(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn find_allowed<'a>(allowed: &'a [String], value: &str) -> Option<&'a String> {
    let wanted = normalise(value);
    allowed.iter().find(|c| normalise(c) == wanted)
}

impl DecisionAnswer {
    /// Check the answer against what `query` allowed and canonicalise it to
    /// the allowed spellings.
    ///
    /// A pick outside the candidate set, or an answer of the wrong shape, is
    /// `Malformed`.  Label pairs and segments that fall outside the allowed
    /// sets are dropped individually.
    pub fn validate(self, query: &DecisionQuery) -> Result<DecisionAnswer, OracleError> {
        match (query, self) {
            (DecisionQuery::PickOne { candidates, .. }, DecisionAnswer::Picked(choice)) => {
                find_allowed(candidates, &choice)
                    .map(|c| DecisionAnswer::Picked(c.clone()))
                    .ok_or_else(|| OracleError::Malformed(format!("`{choice}` is not one of the candidates")))
            }
            (DecisionQuery::PickOne { .. }, DecisionAnswer::Declined) => Ok(DecisionAnswer::Declined),
            (DecisionQuery::MapLabels { labels, targets }, DecisionAnswer::Labels(map)) => {
                let kept = map
                    .into_iter()
                    .filter_map(|(label, target)| {
                        let label = find_allowed(labels, &label)?;
                        let target = find_allowed(targets, &target)?;
                        Some((label.clone(), target.clone()))
                    })
                    .collect();
                Ok(DecisionAnswer::Labels(kept))
            }
            (DecisionQuery::MapLabels { .. }, DecisionAnswer::Declined) => {
                Ok(DecisionAnswer::Labels(BTreeMap::new()))
            }
            (DecisionQuery::SplitRequirements { text, fields }, DecisionAnswer::Segments(segments)) => {
                let kept = segments
                    .into_iter()
                    .filter_map(|seg| {
                        let phrase = seg.phrase.trim();
                        let kept = find_allowed(fields, &seg.field)
                            .filter(|_| !phrase.is_empty() && text.contains(phrase))
                            .map(|field| Segment {
                                field: field.clone(),
                                phrase: phrase.to_string(),
                            });
                        if kept.is_none() {
                            warn!(field = %seg.field, phrase = %seg.phrase, "requirement segment rejected");
                        }
                        kept
                    })
                    .collect();
                Ok(DecisionAnswer::Segments(kept))
            }
            (DecisionQuery::SplitRequirements { .. }, DecisionAnswer::Declined) => {
                Ok(DecisionAnswer::Segments(Vec::new()))
            }
            (_, other) => Err(OracleError::Malformed(format!(
                "answer of the wrong shape: {other:?}"
            ))),
        }
    }
}
