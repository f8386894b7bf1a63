//! Intent classification
//!
//! Maps a normalized query to a [`TaskKind`] and detects the special
//! intents (book exercises, off-syllabus proofs, external references)
//! that force retrieval regardless of confidence.

use crate::error::{LecternError, Result};
use crate::text::partial_ratio;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of help a student is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Exercise,
    Proof,
    Summary,
    Comparison,
    Example,
    Quiz,
    /// Fallback: plain explanation
    Explanation,
}

impl TaskKind {
    /// Classification priority; earlier entries win ties
    pub const PRIORITY: [TaskKind; 7] = [
        TaskKind::Exercise,
        TaskKind::Proof,
        TaskKind::Summary,
        TaskKind::Comparison,
        TaskKind::Example,
        TaskKind::Quiz,
        TaskKind::Explanation,
    ];

    pub fn is_fallback(self) -> bool {
        self == TaskKind::Explanation
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Exercise => "exercise",
            TaskKind::Proof => "proof",
            TaskKind::Summary => "summary",
            TaskKind::Comparison => "comparison",
            TaskKind::Example => "example",
            TaskKind::Quiz => "quiz",
            TaskKind::Explanation => "explanation",
        }
    }

    /// Answer template the generation layer should use for this task
    pub fn template_key(self) -> &'static str {
        match self {
            TaskKind::Exercise => "guided_solution",
            TaskKind::Proof => "step_by_step_proof",
            TaskKind::Summary => "structured_summary",
            TaskKind::Comparison => "side_by_side_comparison",
            TaskKind::Example => "worked_examples",
            TaskKind::Quiz => "practice_questions",
            TaskKind::Explanation => "plain_explanation",
        }
    }

    /// (exact-match patterns, texts for fuzzy matching)
    fn patterns(self) -> (&'static [&'static str], &'static [&'static str]) {
        match self {
            TaskKind::Exercise => (
                &[
                    r"\bexercises?\b",
                    r"\bsolve\b",
                    r"\bsolutions?\b",
                    r"\bproblems?\b",
                    r"\b(calculate|compute)\b",
                ],
                &["exercise", "solve", "solution", "problem", "calculate"],
            ),
            TaskKind::Proof => (
                &[r"\bprove\b", r"\bproofs?\b", r"\bdemonstrat\w*", r"\bshow that\b"],
                &["prove", "proof", "demonstrate", "show that"],
            ),
            TaskKind::Summary => (
                &[r"\bsummar\w*", r"\brecap\w*", r"\boverview\b", r"\bkey points\b"],
                &["summary", "summarize", "recap", "overview", "key points"],
            ),
            TaskKind::Comparison => (
                &[r"\bdifferences?\b", r"\bcompar\w*", r"\bversus\b", r"\bvs\b"],
                &["difference", "compare", "versus"],
            ),
            TaskKind::Example => (
                &[r"\bexamples?\b", r"\bfor instance\b", r"\bshow me\b"],
                &["example", "for instance"],
            ),
            TaskKind::Quiz => (
                &[r"\bquiz\w*", r"\btest me\b", r"\bflashcards?\b", r"\bpractice questions?\b"],
                &["quiz", "test me", "flashcards", "practice questions"],
            ),
            TaskKind::Explanation => (&[r"(?s).*"], &[]),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query shapes that always need the reference material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialIntent {
    /// An exercise from the textbook
    BookExercise,
    /// A proof of something outside the syllabus
    OffSyllabusProof,
    /// Any other reference to the book or to off-syllabus material
    ExternalReference,
}

impl fmt::Display for SpecialIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpecialIntent::BookExercise => "book_exercise",
            SpecialIntent::OffSyllabusProof => "off_syllabus_proof",
            SpecialIntent::ExternalReference => "external_reference",
        };
        f.write_str(name)
    }
}

/// Outcome of [`IntentClassifier::classify`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub task: TaskKind,
    pub scores: BTreeMap<TaskKind, f64>,
}

struct CompiledTask {
    task: TaskKind,
    regexes: Vec<Regex>,
    texts: &'static [&'static str],
}

/// Priority-ordered pattern classifier
pub struct IntentClassifier {
    tasks: Vec<CompiledTask>,
    book: Vec<Regex>,
    exercise: Vec<Regex>,
    off_syllabus: Vec<Regex>,
    proof: Vec<Regex>,
}

const BOOK_PATTERNS: &[&str] = &[
    r"\b(text)?books?\b",
    r"\b(workbook|manual|handbook)\b",
    r"\bpages?\s*\d+",
    r"\bp\.\s*\d+",
    r"\bpg\.?\s*\d+",
];

const EXERCISE_PATTERNS: &[&str] = &[
    r"\bexercises?\b",
    r"\bex\.?\s*\d+",
    r"\bproblem\s*(n\.?\s*)?\d+",
];

const OFF_SYLLABUS_PATTERNS: &[&str] = &[
    r"\b(not|isn'?t) (in|on|part of) (the |our )?(syllabus|program|programme|curriculum)\b",
    r"\b(out of|outside|beyond|off)[ -](the |our )?(syllabus|program|programme|curriculum)\b",
    r"\bnot covered in class\b",
];

const PROOF_PATTERNS: &[&str] = &[r"\bprove\b", r"\bproofs?\b", r"\bdemonstrat\w*"];

fn compile(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| LecternError::Config(format!("Invalid intent pattern '{}': {}", p, e)))
        })
        .collect()
}

fn any_match(regexes: &[Regex], text: &str) -> bool {
    regexes.iter().any(|r| r.is_match(text))
}

impl IntentClassifier {
    pub fn new() -> Result<Self> {
        let tasks = TaskKind::PRIORITY
            .iter()
            .map(|&task| {
                let (patterns, texts) = task.patterns();
                Ok(CompiledTask {
                    task,
                    regexes: compile(patterns)?,
                    texts,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tasks,
            book: compile(BOOK_PATTERNS)?,
            exercise: compile(EXERCISE_PATTERNS)?,
            off_syllabus: compile(OFF_SYLLABUS_PATTERNS)?,
            proof: compile(PROOF_PATTERNS)?,
        })
    }

    /// Score every task and pick the best, earliest-listed on ties
    ///
    /// A task scores its number of matching patterns; with none, non-fallback
    /// tasks get half their best fuzzy similarity to the pattern texts.
    pub fn classify(&self, normalized_query: &str) -> Classification {
        let mut scores = BTreeMap::new();
        let mut best: Option<(TaskKind, f64)> = None;

        for compiled in &self.tasks {
            let exact = compiled
                .regexes
                .iter()
                .filter(|r| r.is_match(normalized_query))
                .count();

            let score = if exact == 0 && !compiled.task.is_fallback() {
                let fuzzy = compiled
                    .texts
                    .iter()
                    .map(|t| partial_ratio(normalized_query, t) / 100.0)
                    .fold(0.0_f64, f64::max);
                0.5 * fuzzy
            } else {
                exact as f64
            };

            scores.insert(compiled.task, score);
            // strict comparison: earlier tasks keep ties
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((compiled.task, score));
            }
        }

        let task = best.map(|(t, _)| t).unwrap_or(TaskKind::Explanation);
        tracing::debug!(task = %task, "Classified query");
        Classification { task, scores }
    }

    /// Special intent, checked in priority order
    pub fn detect_special_intent(&self, normalized_query: &str) -> Option<SpecialIntent> {
        let book = any_match(&self.book, normalized_query);
        let off_syllabus = any_match(&self.off_syllabus, normalized_query);

        if book && any_match(&self.exercise, normalized_query) {
            Some(SpecialIntent::BookExercise)
        } else if off_syllabus && any_match(&self.proof, normalized_query) {
            Some(SpecialIntent::OffSyllabusProof)
        } else if book || off_syllabus {
            Some(SpecialIntent::ExternalReference)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::normalize;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new().unwrap()
    }

    #[test]
    fn test_plain_question_falls_back() {
        let c = classifier().classify(&normalize("What is a derivative?"));
        assert_eq!(c.task, TaskKind::Explanation);
        assert_eq!(c.scores[&TaskKind::Explanation], 1.0);
        assert!(c.scores[&TaskKind::Exercise] <= 0.5);
    }

    #[test]
    fn test_keyword_selects_task() {
        let c = classifier().classify(&normalize("Can you summarize chapter 2?"));
        assert_eq!(c.task, TaskKind::Summary);

        let c = classifier().classify(&normalize("Prove, i.e. show that the limit is unique"));
        assert_eq!(c.task, TaskKind::Proof);
        assert_eq!(c.scores[&TaskKind::Proof], 2.0);
    }

    #[test]
    fn test_tie_resolves_to_earlier_task() {
        // one Exercise match, one Example match
        let c = classifier().classify("solve an example");
        assert_eq!(c.scores[&TaskKind::Exercise], 1.0);
        assert_eq!(c.scores[&TaskKind::Example], 1.0);
        assert_eq!(c.task, TaskKind::Exercise);
    }

    #[test]
    fn test_fallback_ties_lose_to_specific_task() {
        let c = classifier().classify("quiz");
        assert_eq!(c.scores[&TaskKind::Quiz], 1.0);
        assert_eq!(c.task, TaskKind::Quiz);
    }

    #[test]
    fn test_classification_is_accent_insensitive() {
        let c = classifier().classify(&normalize("RÉCAP of the lesson"));
        assert_eq!(c.task, TaskKind::Summary);
    }

    #[test]
    fn test_book_exercise_intent() {
        let intent = classifier().detect_special_intent(&normalize(
            "How do I do exercise 12 on page 45 of the book?",
        ));
        assert_eq!(intent, Some(SpecialIntent::BookExercise));
    }

    #[test]
    fn test_off_syllabus_proof_intent() {
        let intent = classifier().detect_special_intent(&normalize(
            "Can you prove Stokes' theorem even if it is out of the syllabus?",
        ));
        assert_eq!(intent, Some(SpecialIntent::OffSyllabusProof));
    }

    #[test]
    fn test_reference_alone_intent() {
        let c = classifier();
        assert_eq!(
            c.detect_special_intent("what does the textbook say about limits"),
            Some(SpecialIntent::ExternalReference)
        );
        assert_eq!(
            c.detect_special_intent("explain series, beyond the program"),
            Some(SpecialIntent::ExternalReference)
        );
        assert_eq!(c.detect_special_intent("what is a derivative?"), None);
    }

    #[test]
    fn test_every_task_has_a_template() {
        for task in TaskKind::PRIORITY {
            assert!(!task.template_key().is_empty());
        }
        assert!(TaskKind::PRIORITY.last().unwrap().is_fallback());
    }
}
