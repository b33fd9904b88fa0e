// src/grading.rs

//! Scoring for finished attempts.
//!
//! Grading is a pure function of the exam's weighted question list, each
//! question's correct-option key and the attempt's stored selections. It
//! performs no I/O, so identical snapshots always grade identically and the
//! whole engine is unit-testable without a database.

use std::collections::HashMap;

/// Question kind, as stored in `questions.question_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionType {
    SingleChoice,
    MultiChoice,
    Essay,
}

impl QuestionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SINGLE_CHOICE" => Some(Self::SingleChoice),
            "MULTI_CHOICE" => Some(Self::MultiChoice),
            "ESSAY" => Some(Self::Essay),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleChoice => "SINGLE_CHOICE",
            Self::MultiChoice => "MULTI_CHOICE",
            Self::Essay => "ESSAY",
        }
    }

}

/// One exam question as seen by the grader: its weight and answer key.
#[derive(Debug, Clone)]
pub struct QuestionKey {
    pub question_id: i64,
    pub question_type: QuestionType,
    pub weight: i32,
    /// Ids of the options flagged correct. Empty for essay questions.
    pub correct_option_ids: Vec<i64>,
}

/// Outcome of grading one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct GradingOutcome {
    /// 0-100 scale. 0.0 when the exam carries no weight at all.
    pub final_score: f64,
    pub awarded_weight: i32,
    pub total_weight: i32,
    /// True when the exam contains at least one essay question, which must
    /// be scored manually by the teacher.
    pub needs_review: bool,
}

/// Grades an attempt.
///
/// `selections` maps question id to the student's selected option ids.
/// Unanswered questions award nothing but their weight still counts toward
/// the total. Essay questions are never auto-scored; their weight counts in
/// the denominator and their presence flags the outcome for manual review.
pub fn grade(questions: &[QuestionKey], selections: &HashMap<i64, Vec<i64>>) -> GradingOutcome {
    let mut awarded_weight = 0;
    let mut total_weight = 0;
    let mut needs_review = false;

    for key in questions {
        total_weight += key.weight;

        if key.question_type == QuestionType::Essay {
            needs_review = true;
            continue;
        }

        let Some(selected) = selections.get(&key.question_id) else {
            continue;
        };

        if is_correct(key, selected) {
            awarded_weight += key.weight;
        }
    }

    let final_score = if total_weight > 0 {
        awarded_weight as f64 / total_weight as f64 * 100.0
    } else {
        0.0
    };

    GradingOutcome {
        final_score,
        awarded_weight,
        total_weight,
        needs_review,
    }
}

/// All-or-nothing correctness for a single choice question.
fn is_correct(key: &QuestionKey, selected: &[i64]) -> bool {
    match key.question_type {
        QuestionType::SingleChoice => {
            // Exactly one option carries the correctness flag.
            match (selected.first(), key.correct_option_ids.first()) {
                (Some(sel), Some(correct)) => selected.len() == 1 && sel == correct,
                _ => false,
            }
        }
        QuestionType::MultiChoice => {
            // Set equality, order-independent. An extra or missing
            // selection yields zero; there is no partial credit.
            if selected.is_empty() || key.correct_option_ids.is_empty() {
                return false;
            }
            let mut chosen: Vec<i64> = selected.to_vec();
            let mut correct: Vec<i64> = key.correct_option_ids.clone();
            chosen.sort_unstable();
            chosen.dedup();
            correct.sort_unstable();
            chosen == correct
        }
        QuestionType::Essay => false,
    }
}
