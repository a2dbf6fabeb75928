// src/engine/scoring.rs

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::{
    engine::normalize::capture,
    models::{answer::SelectedAnswer, attempt::SubjectScore, question::Question},
};

/// Series-level marking rules, resolved once per attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkingPolicy {
    pub negative_marking: bool,
    pub pass_percentage: f64,
}

/// Grading of a single question.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedAnswer {
    pub question_id: i64,
    pub selected: SelectedAnswer,
    pub is_correct: bool,
    pub marks_obtained: f64,
    pub is_attempted: bool,
    /// The question's stored answer key did not fit its type.
    pub key_missing: bool,
}

/// Everything a submission writes, computed before anything is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Scorecard {
    pub answers: Vec<GradedAnswer>,
    pub total_questions: i32,
    pub attempted_questions: i32,
    pub correct_answers: i32,
    pub wrong_answers: i32,
    pub total_marks: f64,
    pub marks_obtained: f64,
    pub percentage_score: f64,
    pub passed: bool,
    pub subject_wise_score: BTreeMap<String, SubjectScore>,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `marks / total * 100`, floored at 0. The marks themselves are never floored.
pub fn percentage(marks_obtained: f64, total_marks: f64) -> f64 {
    if total_marks <= 0.0 {
        return 0.0;
    }
    round2((marks_obtained / total_marks * 100.0).max(0.0))
}

/// Grades one question against its key.
///
/// A missing or malformed answer key grades every attempted answer as wrong.
pub fn grade_question(
    question: &Question,
    raw: Option<&Value>,
    policy: MarkingPolicy,
) -> GradedAnswer {
    let selected = capture(question.question_type, raw);
    let key = question.answer_key();

    if selected.is_blank() {
        return GradedAnswer {
            question_id: question.id,
            selected,
            is_correct: false,
            marks_obtained: 0.0,
            is_attempted: false,
            key_missing: key.is_none(),
        };
    }

    let is_correct = key.as_ref().is_some_and(|k| k.matches(&selected));
    let marks_obtained = if is_correct {
        f64::from(question.marks)
    } else if policy.negative_marking {
        -round2(question.negative_marks)
    } else {
        0.0
    };

    GradedAnswer {
        question_id: question.id,
        selected,
        is_correct,
        marks_obtained,
        is_attempted: true,
        key_missing: key.is_none(),
    }
}

/// Grades a whole submission.
///
/// Questions are visited in ordinal order so the output is reproducible.
/// Questions without a subject are left out of the subject breakdown.
pub fn grade(
    questions: &[Question],
    answers: &HashMap<i64, Value>,
    policy: MarkingPolicy,
) -> Scorecard {
    let mut ordered: Vec<&Question> = questions.iter().collect();
    ordered.sort_by_key(|q| (q.position, q.id));

    let mut card = Scorecard {
        answers: Vec::with_capacity(ordered.len()),
        total_questions: ordered.len() as i32,
        attempted_questions: 0,
        correct_answers: 0,
        wrong_answers: 0,
        total_marks: ordered.iter().map(|q| f64::from(q.marks)).sum(),
        marks_obtained: 0.0,
        percentage_score: 0.0,
        passed: false,
        subject_wise_score: BTreeMap::new(),
    };

    for question in ordered {
        let graded = grade_question(question, answers.get(&question.id), policy);

        if graded.is_attempted {
            card.attempted_questions += 1;
            if graded.is_correct {
                card.correct_answers += 1;
            } else {
                card.wrong_answers += 1;
            }
            card.marks_obtained += graded.marks_obtained;

            if let Some(subject) = &question.subject_name {
                let bucket = card.subject_wise_score.entry(subject.clone()).or_default();
                if graded.is_correct {
                    bucket.correct += 1;
                } else {
                    bucket.wrong += 1;
                }
                bucket.marks += graded.marks_obtained;
            }
        }

        card.answers.push(graded);
    }

    // Per-question marks are already at two decimals; this only clears float drift.
    card.marks_obtained = round2(card.marks_obtained);
    for bucket in card.subject_wise_score.values_mut() {
        bucket.marks = round2(bucket.marks);
    }
    card.percentage_score = percentage(card.marks_obtained, card.total_marks);
    card.passed = card.total_marks > 0.0 && card.percentage_score >= policy.pass_percentage;
    card
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{Difficulty, QuestionType};
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;

    fn question(
        id: i64,
        qt: QuestionType,
        marks: i32,
        negative: f64,
        key: Value,
        subject: Option<&str>,
    ) -> Question {
        Question {
            id,
            test_id: 1,
            subject_id: subject.map(|_| 1),
            subject_name: subject.map(str::to_string),
            question_type: qt,
            difficulty: Difficulty::Medium,
            question_text: format!("Q{id}"),
            marks,
            negative_marks: negative,
            options: Json(BTreeMap::from([
                ("a".to_string(), "A".to_string()),
                ("b".to_string(), "B".to_string()),
                ("c".to_string(), "C".to_string()),
                ("d".to_string(), "D".to_string()),
            ])),
            correct_answer: Json(key),
            explanation: String::new(),
            solution_video_url: None,
            total_attempts: 0,
            correct_attempts: 0,
            position: id as i32,
            created_at: Utc::now(),
        }
    }

    fn three_question_test() -> Vec<Question> {
        vec![
            question(1, QuestionType::SingleChoice, 2, 0.25, json!({"answer": "b"}), Some("Physics")),
            question(2, QuestionType::MultipleChoice, 4, 0.25, json!({"answers": ["a", "c"]}), Some("Chemistry")),
            question(3, QuestionType::FillBlank, 1, 0.25, json!({"answer": "paris"}), None),
        ]
    }

    const NEGATIVE_ON: MarkingPolicy = MarkingPolicy { negative_marking: true, pass_percentage: 40.0 };
    const NEGATIVE_OFF: MarkingPolicy = MarkingPolicy { negative_marking: false, pass_percentage: 40.0 };

    #[test]
    fn mixed_submission_with_skip() {
        let answers = HashMap::from([(1, json!("b")), (2, json!(["c", "a"]))]);
        let card = grade(&three_question_test(), &answers, NEGATIVE_ON);

        assert_eq!(card.total_questions, 3);
        assert_eq!(card.attempted_questions, 2);
        assert_eq!(card.correct_answers, 2);
        assert_eq!(card.wrong_answers, 0);
        assert_eq!(card.marks_obtained, 6.0);
        assert_eq!(card.total_marks, 7.0);
        assert_eq!(card.percentage_score, 85.71);
        assert_eq!(card.total_questions - card.attempted_questions, 1);
        assert_eq!(card.answers.len(), 3);
        assert!(card.passed);
    }

    #[test]
    fn wrong_single_choice_costs_negative_marks() {
        let answers = HashMap::from([(1, json!("a"))]);
        let card = grade(&three_question_test(), &answers, NEGATIVE_ON);

        let q1 = &card.answers[0];
        assert!(q1.is_attempted);
        assert!(!q1.is_correct);
        assert_eq!(q1.marks_obtained, -0.25);
        assert_eq!(card.attempted_questions, 1);
        assert_eq!(card.marks_obtained, -0.25);
        assert_eq!(card.percentage_score, 0.0);
        assert!(!card.passed);
    }

    #[test]
    fn no_negative_marks_when_policy_off() {
        let answers = HashMap::from([(1, json!("a")), (2, json!(["b"])), (3, json!("rome"))]);
        let card = grade(&three_question_test(), &answers, NEGATIVE_OFF);
        assert!(card.answers.iter().all(|a| a.marks_obtained >= 0.0));
        assert_eq!(card.wrong_answers, 3);
        assert_eq!(card.marks_obtained, 0.0);
    }

    #[test]
    fn subject_breakdown_skips_untagged_questions() {
        let answers = HashMap::from([(1, json!("a")), (2, json!(["a", "c"])), (3, json!("Paris"))]);
        let card = grade(&three_question_test(), &answers, NEGATIVE_ON);

        assert_eq!(card.subject_wise_score.len(), 2);
        let physics = card.subject_wise_score["Physics"];
        assert_eq!((physics.correct, physics.wrong, physics.marks), (0, 1, -0.25));
        let chemistry = card.subject_wise_score["Chemistry"];
        assert_eq!((chemistry.correct, chemistry.wrong, chemistry.marks), (1, 0, 4.0));
    }

    #[test]
    fn malformed_key_is_graded_wrong_not_fatal() {
        let mut questions = three_question_test();
        questions[0].correct_answer = Json(json!({"answers": ["b"]}));
        let answers = HashMap::from([(1, json!("b")), (3, json!("paris"))]);
        let card = grade(&questions, &answers, NEGATIVE_ON);

        assert!(card.answers[0].key_missing);
        assert!(!card.answers[0].is_correct);
        assert!(card.answers[2].is_correct);
        assert_eq!(card.marks_obtained, 0.75);
    }

    #[test]
    fn grading_is_reproducible_regardless_of_input_order() {
        let answers = HashMap::from([(1, json!("b")), (2, json!(["a"])), (3, json!("paris"))]);
        let mut reversed = three_question_test();
        reversed.reverse();

        let a = grade(&three_question_test(), &answers, NEGATIVE_ON);
        let b = grade(&reversed, &answers, NEGATIVE_ON);
        assert_eq!(a, b);
        assert_eq!(a.answers.iter().map(|g| g.question_id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn empty_submission_records_every_question() {
        let card = grade(&three_question_test(), &HashMap::new(), NEGATIVE_ON);
        assert_eq!(card.answers.len(), 3);
        assert!(card.answers.iter().all(|a| !a.is_attempted && a.marks_obtained == 0.0));
        assert_eq!(card.percentage_score, 0.0);
    }

    #[test]
    fn row_marks_sum_to_the_total() {
        let mut questions = three_question_test();
        for q in &mut questions {
            q.negative_marks = 0.333;
        }
        let answers = HashMap::from([(1, json!("a")), (2, json!(["b"])), (3, json!("rome"))]);
        let card = grade(&questions, &answers, NEGATIVE_ON);

        assert!(card.answers.iter().all(|a| a.marks_obtained == -0.33));
        let rows: f64 = card.answers.iter().map(|a| a.marks_obtained).sum();
        assert_eq!(round2(rows), card.marks_obtained);
        assert_eq!(card.marks_obtained, -0.99);
    }

    #[test]
    fn true_false_accepts_either_case() {
        let questions = vec![question(
            7,
            QuestionType::TrueFalse,
            1,
            0.25,
            json!({"answer": "a"}),
            Some("Logic"),
        )];
        let card = grade(&questions, &HashMap::from([(7, json!("A"))]), NEGATIVE_ON);
        assert!(card.answers[0].is_correct);
        assert_eq!(card.marks_obtained, 1.0);
        assert_eq!(card.answers[0].selected, SelectedAnswer::One { answer: "A".into() });
    }

    #[test]
    fn percentage_handles_zero_total() {
        assert_eq!(percentage(5.0, 0.0), 0.0);
        assert_eq!(percentage(-3.0, 10.0), 0.0);
        assert_eq!(percentage(1.0, 3.0), 33.33);
    }
}
