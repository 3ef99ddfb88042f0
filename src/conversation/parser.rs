//! Numbered-answer parsing: turns free-text chat replies into structured answers.
//!
//! Pure string handling, no I/O. A reply such as
//!
//! ```text
//! 1. yes, Thursday works
//! 2) send the invoice
//! ```
//!
//! becomes `{1: "yes, Thursday works", 2: "send the invoice"}`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

/// Leading integer, optional run of separators, then the answer text.
static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)[.:\-)\s]*(.*?)\s*$").expect("numbered line pattern is valid")
});

/// Answers keyed by the 1-based position the user typed.
///
/// Keys are not checked against the real number of outstanding questions;
/// that happens in [`match_answers_to_questions`].
pub type AnswerSet = BTreeMap<usize, String>;

/// Question text paired with its answer, in question order.
///
/// Behaves like a map keyed by question text: a repeated question keeps
/// only its latest answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatedAnswers {
    pairs: Vec<(String, String)>,
}

impl CorrelatedAnswers {
    fn insert(&mut self, question: &str, answer: &str) {
        if let Some(existing) = self.pairs.iter_mut().find(|(q, _)| q == question) {
            existing.1 = answer.to_string();
        } else {
            self.pairs.push((question.to_string(), answer.to_string()));
        }
    }

    /// Answer recorded for the given question text.
    pub fn get(&self, question: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(q, _)| q == question)
            .map(|(_, a)| a.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `(question, answer)` pairs in question order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(q, a)| (q.as_str(), a.as_str()))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for CorrelatedAnswers {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut out = Self::default();
        for (q, a) in pairs {
            out.insert(q, a);
        }
        out
    }
}

/// Parse `"<N><sep><answer>"` lines into an [`AnswerSet`].
///
/// Lines that don't start with a positive integer followed by some text are
/// ignored. When an index repeats, the last line wins. Never fails.
pub fn parse_numbered_answers(text: &str) -> AnswerSet {
    let mut answers = AnswerSet::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(caps) = NUMBERED_LINE.captures(line) else {
            continue;
        };
        let Ok(index) = caps[1].parse::<usize>() else {
            continue;
        };
        let answer = &caps[2];
        if index == 0 || answer.is_empty() {
            continue;
        }
        answers.insert(index, answer.to_string());
    }

    answers
}

/// Render questions as a 1-based numbered list, one per line, with a
/// trailing newline. Empty input renders as an empty string.
pub fn format_numbered_questions<S: AsRef<str>>(questions: &[S]) -> String {
    let mut out = String::new();
    for (i, question) in questions.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, question.as_ref());
    }
    out
}

/// Pair answers with questions by ordinal position.
///
/// Out-of-range answer indices are dropped; questions without a non-empty
/// answer are omitted rather than defaulted.
pub fn match_answers_to_questions<S: AsRef<str>>(
    questions: &[S],
    answers: &AnswerSet,
) -> CorrelatedAnswers {
    let mut out = CorrelatedAnswers::default();
    for (i, question) in questions.iter().enumerate() {
        if let Some(answer) = answers.get(&(i + 1))
            && !answer.is_empty()
        {
            out.insert(question.as_ref(), answer);
        }
    }
    out
}
