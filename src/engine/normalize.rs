// src/engine/normalize.rs
//
// Canonical forms for answer keys; captured answers are compared in that
// form but stored as sent. Choice keys and free text compare after trim +
// lowercase; multi-select compares as a sorted, de-duplicated list.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{answer::SelectedAnswer, question::QuestionType};

/// Typed correct answer, converted from the stored JSON descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerKey {
    SingleChoice { key: String },
    MultipleChoice { keys: Vec<String> },
    FreeText { text: String },
}

pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Strings and numbers become text; anything else is not a scalar answer.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Normalized, de-duplicated, sorted keys; blanks dropped.
fn key_list(values: &[Value]) -> Vec<String> {
    let mut keys: Vec<String> = values
        .iter()
        .filter_map(scalar_text)
        .map(|k| normalize(&k))
        .filter(|k| !k.is_empty())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

impl AnswerKey {
    /// Reads `{"answer": ..}` / `{"answers": [..]}` (or a bare value, as older
    /// rows store it). Returns `None` when the descriptor does not fit the type.
    pub fn from_descriptor(question_type: QuestionType, descriptor: &Value) -> Option<AnswerKey> {
        let field = if question_type == QuestionType::MultipleChoice {
            "answers"
        } else {
            "answer"
        };
        let inner = match descriptor {
            Value::Object(map) => map.get(field)?,
            other => other,
        };

        match question_type {
            QuestionType::MultipleChoice => {
                let keys = key_list(inner.as_array()?);
                if keys.is_empty() {
                    return None;
                }
                Some(AnswerKey::MultipleChoice { keys })
            }
            QuestionType::SingleChoice | QuestionType::TrueFalse => {
                let key = normalize(&scalar_text(inner)?);
                if key.is_empty() {
                    return None;
                }
                Some(AnswerKey::SingleChoice { key })
            }
            QuestionType::FillBlank | QuestionType::Numerical => {
                let text = normalize(&scalar_text(inner)?);
                if text.is_empty() {
                    return None;
                }
                Some(AnswerKey::FreeText { text })
            }
        }
    }

    /// Option keys this answer key references.
    pub fn choice_keys(&self) -> Vec<&str> {
        match self {
            AnswerKey::SingleChoice { key } => vec![key.as_str()],
            AnswerKey::MultipleChoice { keys } => keys.iter().map(String::as_str).collect(),
            AnswerKey::FreeText { .. } => Vec::new(),
        }
    }

    /// Compares in canonical form; the captured answer itself is left as typed.
    pub fn matches(&self, selected: &SelectedAnswer) -> bool {
        let given: Vec<Value> = match selected {
            SelectedAnswer::One { answer } => vec![Value::String(answer.clone())],
            SelectedAnswer::Many { answers } => answers.iter().cloned().map(Value::String).collect(),
            SelectedAnswer::Blank {} => return false,
        };
        let given = key_list(&given);
        match self {
            AnswerKey::MultipleChoice { keys } => given == *keys,
            AnswerKey::SingleChoice { key: expected } | AnswerKey::FreeText { text: expected } => {
                given.len() == 1 && given[0] == *expected
            }
        }
    }

    /// `KEY. option text` for choices, the text itself otherwise.
    pub fn display(&self, options: &BTreeMap<String, String>) -> String {
        let option_line = |key: &str| {
            let key = normalize(key);
            let text = options
                .iter()
                .find(|(k, _)| normalize(k) == key)
                .map(|(_, v)| v.as_str())
                .unwrap_or("(Option text missing)");
            format!("{}. {}", key.to_uppercase(), text)
        };
        match self {
            AnswerKey::SingleChoice { key } => option_line(key),
            AnswerKey::MultipleChoice { keys } => keys
                .iter()
                .map(|k| option_line(k))
                .collect::<Vec<_>>()
                .join(", "),
            AnswerKey::FreeText { text } => text.clone(),
        }
    }
}

/// Review text for a captured answer: option lines for choice questions,
/// the typed text otherwise.
pub fn display_selected(
    question_type: QuestionType,
    selected: &SelectedAnswer,
    options: &BTreeMap<String, String>,
) -> String {
    if !question_type.is_choice() {
        return match selected {
            SelectedAnswer::One { answer } => answer.clone(),
            other => other.display(),
        };
    }
    match selected {
        SelectedAnswer::One { answer } => AnswerKey::SingleChoice { key: answer.clone() }.display(options),
        SelectedAnswer::Many { answers } => AnswerKey::MultipleChoice { keys: answers.clone() }.display(options),
        SelectedAnswer::Blank {} => selected.display(),
    }
}

/// Turns one raw payload entry into its captured form, kept as the student
/// sent it. Numbers are stored as their literal text.
///
/// Absent, null, blank and empty-list entries are unattempted. Unknown
/// shapes degrade to unattempted instead of failing the submission.
pub fn capture(question_type: QuestionType, raw: Option<&Value>) -> SelectedAnswer {
    let Some(raw) = raw else {
        return SelectedAnswer::Blank {};
    };

    // Clients may echo the storage shape back.
    if let Value::Object(map) = raw {
        return match (map.get("answers"), map.get("answer")) {
            (Some(inner), _) | (None, Some(inner)) => capture(question_type, Some(inner)),
            (None, None) => SelectedAnswer::Blank {},
        };
    }

    match raw {
        Value::Array(items) => {
            if key_list(items).is_empty() {
                return SelectedAnswer::Blank {};
            }
            SelectedAnswer::Many {
                answers: items.iter().filter_map(scalar_text).collect(),
            }
        }
        scalar => match scalar_text(scalar) {
            Some(text) if !text.trim().is_empty() => {
                if question_type == QuestionType::MultipleChoice {
                    SelectedAnswer::Many { answers: vec![text] }
                } else {
                    SelectedAnswer::One { answer: text }
                }
            }
            _ => SelectedAnswer::Blank {},
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_shapes_convert_per_type() {
        assert_eq!(
            AnswerKey::from_descriptor(QuestionType::SingleChoice, &json!({"answer": " B "})),
            Some(AnswerKey::SingleChoice { key: "b".into() })
        );
        assert_eq!(
            AnswerKey::from_descriptor(QuestionType::MultipleChoice, &json!({"answers": ["c", "A"]})),
            Some(AnswerKey::MultipleChoice { keys: vec!["a".into(), "c".into()] })
        );
        assert_eq!(
            AnswerKey::from_descriptor(QuestionType::Numerical, &json!({"answer": 3})),
            Some(AnswerKey::FreeText { text: "3".into() })
        );
        // legacy bare values
        assert_eq!(
            AnswerKey::from_descriptor(QuestionType::TrueFalse, &json!("a")),
            Some(AnswerKey::SingleChoice { key: "a".into() })
        );
    }

    #[test]
    fn malformed_descriptors_yield_no_key() {
        assert_eq!(AnswerKey::from_descriptor(QuestionType::SingleChoice, &json!({})), None);
        assert_eq!(
            AnswerKey::from_descriptor(QuestionType::MultipleChoice, &json!({"answer": "a"})),
            None
        );
        assert_eq!(
            AnswerKey::from_descriptor(QuestionType::MultipleChoice, &json!({"answers": []})),
            None
        );
        assert_eq!(
            AnswerKey::from_descriptor(QuestionType::FillBlank, &json!({"answer": "   "})),
            None
        );
    }

    #[test]
    fn multiple_choice_is_order_and_case_insensitive() {
        let key = AnswerKey::MultipleChoice { keys: vec!["a".into(), "c".into()] };
        let captured = capture(QuestionType::MultipleChoice, Some(&json!(["C", "a"])));
        assert!(key.matches(&captured));

        let partial = capture(QuestionType::MultipleChoice, Some(&json!(["a"])));
        assert!(!key.matches(&partial));
    }

    #[test]
    fn blank_inputs_are_unattempted() {
        for raw in [json!(null), json!(""), json!("   "), json!([]), json!({}), json!([""])] {
            assert!(capture(QuestionType::SingleChoice, Some(&raw)).is_blank(), "{raw}");
        }
        assert!(capture(QuestionType::FillBlank, None).is_blank());
    }

    #[test]
    fn numerical_compares_as_literal_text() {
        let key = AnswerKey::FreeText { text: "3".into() };
        assert!(key.matches(&capture(QuestionType::Numerical, Some(&json!(3)))));
        assert!(key.matches(&capture(QuestionType::Numerical, Some(&json!(" 3 ")))));
        assert!(!key.matches(&capture(QuestionType::Numerical, Some(&json!("3.0")))));
    }

    #[test]
    fn single_choice_given_several_keys_is_wrong_not_blank() {
        let captured = capture(QuestionType::SingleChoice, Some(&json!(["a", "b"])));
        assert!(!captured.is_blank());
        let key = AnswerKey::SingleChoice { key: "a".into() };
        assert!(!key.matches(&captured));
    }

    #[test]
    fn storage_shape_payloads_are_accepted() {
        let captured = capture(QuestionType::MultipleChoice, Some(&json!({"answers": ["b", "a"]})));
        assert_eq!(captured, SelectedAnswer::Many { answers: vec!["b".into(), "a".into()] });
    }

    #[test]
    fn captured_answers_keep_what_the_student_typed() {
        let text = capture(QuestionType::FillBlank, Some(&json!("  Paris  ")));
        assert_eq!(text, SelectedAnswer::One { answer: "  Paris  ".into() });
        assert!(AnswerKey::FreeText { text: "paris".into() }.matches(&text));

        let many = capture(QuestionType::MultipleChoice, Some(&json!(["C", "a", "a"])));
        assert_eq!(
            many,
            SelectedAnswer::Many { answers: vec!["C".into(), "a".into(), "a".into()] }
        );
        assert!(AnswerKey::MultipleChoice { keys: vec!["a".into(), "c".into()] }.matches(&many));
    }

    #[test]
    fn true_false_key_ignores_case() {
        let key = AnswerKey::from_descriptor(QuestionType::TrueFalse, &json!({"answer": "a"}));
        let captured = capture(QuestionType::TrueFalse, Some(&json!("A")));
        assert_eq!(captured, SelectedAnswer::One { answer: "A".into() });
        assert!(key.is_some_and(|k| k.matches(&captured)));
    }

    #[test]
    fn display_includes_option_text() {
        let options = BTreeMap::from([
            ("a".to_string(), "Paris".to_string()),
            ("b".to_string(), "Rome".to_string()),
        ]);
        let key = AnswerKey::SingleChoice { key: "a".into() };
        assert_eq!(key.display(&options), "A. Paris");
        let missing = AnswerKey::SingleChoice { key: "z".into() };
        assert_eq!(missing.display(&options), "Z. (Option text missing)");
    }

    #[test]
    fn selected_choices_render_as_option_lines() {
        let options = BTreeMap::from([
            ("a".to_string(), "Paris".to_string()),
            ("c".to_string(), "Lyon".to_string()),
        ]);
        let many = SelectedAnswer::Many { answers: vec!["a".into(), "c".into()] };
        assert_eq!(
            display_selected(QuestionType::MultipleChoice, &many, &options),
            "A. Paris, C. Lyon"
        );
        let text = SelectedAnswer::One { answer: "paris".into() };
        assert_eq!(display_selected(QuestionType::FillBlank, &text, &options), "paris");
        assert_eq!(
            display_selected(QuestionType::SingleChoice, &SelectedAnswer::Blank {}, &options),
            "Not Attempted"
        );
    }
}
