//! Answer validation against a module's question definitions.
//!
//! Keys that do not match any question are left alone: forms evolve
//! independently of stored payloads. Blank values (empty strings, empty
//! lists) are accepted for every kind and count as "cleared".

use crate::types::{AnswerValue, Answers, ModuleDefinition, QuestionDefinition, QuestionKind};

/// Check every answer that targets a known question.
///
/// Returns one message per problem, or an empty Vec if the payload fits.
pub fn check_answers(module: &ModuleDefinition, answers: &Answers) -> Vec<String> {
    let mut issues = Vec::new();

    for (key, value) in answers {
        let Some(question) = module.question(key) else {
            continue;
        };
        if value.is_blank() {
            continue;
        }
        if let Some(issue) = check_value(question, value) {
            issues.push(format!("{}: {}", key, issue));
        }
    }

    issues
}

fn check_value(question: &QuestionDefinition, value: &AnswerValue) -> Option<String> {
    match (&question.kind, value) {
        (
            QuestionKind::Text { max_length } | QuestionKind::Textarea { max_length },
            AnswerValue::Text(text),
        ) => match max_length {
            Some(max) if text.chars().count() > *max => {
                Some(format!("longer than {} characters", max))
            }
            _ => None,
        },
        (QuestionKind::Number { min, max }, AnswerValue::Number(n)) => {
            if !n.is_finite() {
                return Some("not a finite number".to_string());
            }
            if let Some(min) = min {
                if n < min {
                    return Some(format!("{} is below minimum {}", n, min));
                }
            }
            if let Some(max) = max {
                if n > max {
                    return Some(format!("{} is above maximum {}", n, max));
                }
            }
            None
        }
        (
            QuestionKind::Select { options } | QuestionKind::Radio { options },
            AnswerValue::Text(choice),
        ) => {
            if options.iter().any(|o| &o.value == choice) {
                None
            } else {
                Some(format!("'{}' is not one of the options", choice))
            }
        }
        (QuestionKind::MultiSelect { options }, AnswerValue::List(choices)) => {
            let unknown: Vec<&str> = choices
                .iter()
                .filter(|c| !options.iter().any(|o| &o.value == *c))
                .map(String::as_str)
                .collect();
            if unknown.is_empty() {
                None
            } else {
                Some(format!("unknown options: {}", unknown.join(", ")))
            }
        }
        (kind, value) => Some(format!(
            "expected a {} answer, got {}",
            kind.label(),
            value.type_name()
        )),
    }
}

/// Questions currently shown for this payload, in definition order
pub fn visible_questions<'m>(
    module: &'m ModuleDefinition,
    answers: &Answers,
) -> Vec<&'m QuestionDefinition> {
    module.questions().filter(|q| q.is_visible(answers)).collect()
}

/// Ids of visible required questions that have no non-blank answer
pub fn missing_required(module: &ModuleDefinition, answers: &Answers) -> Vec<String> {
    visible_questions(module, answers)
        .into_iter()
        .filter(|q| q.required)
        .filter(|q| answers.get(&q.id).map_or(true, AnswerValue::is_blank))
        .map(|q| q.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;

    fn module(id: &str) -> &'static ModuleDefinition {
        default_registry().unwrap().get_module(id).unwrap()
    }

    fn answers(json: &str) -> Answers {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_valid_payload_has_no_issues() {
        let payload = answers(
            r#"{"age": 34, "sex": "female", "conditions": ["asthma"], "injured": "no"}"#,
        );
        assert!(check_answers(module("general-health"), &payload).is_empty());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let payload = answers(r#"{"legacy_field": 12, "retired_flag": true}"#);
        assert!(check_answers(module("general-health"), &payload).is_empty());
    }

    #[test]
    fn test_kind_mismatches_are_reported() {
        let payload = answers(
            r#"{"age": "thirty", "sex": "robot",
                "conditions": ["asthma", "gills"], "height_cm": 900}"#,
        );
        let issues = check_answers(module("general-health"), &payload);
        assert_eq!(issues.len(), 4, "{:?}", issues);
        assert!(issues.iter().any(|i| i.starts_with("age: expected a number")));
        assert!(issues.iter().any(|i| i.contains("'robot'")));
        assert!(issues.iter().any(|i| i.contains("gills")));
        assert!(issues.iter().any(|i| i.contains("above maximum 250")));
    }

    #[test]
    fn test_blank_values_are_accepted() {
        let payload = answers(r#"{"age": "", "conditions": []}"#);
        assert!(check_answers(module("general-health"), &payload).is_empty());
    }

    #[test]
    fn test_conditional_required_question() {
        let gh = module("general-health");

        let not_injured = answers(r#"{"age": 40, "conditions": ["none"], "injured": "no"}"#);
        assert!(missing_required(gh, &not_injured).is_empty());

        let injured = answers(r#"{"age": 40, "conditions": ["none"], "injured": "yes"}"#);
        assert_eq!(missing_required(gh, &injured), vec!["injury_details"]);
    }

    #[test]
    fn test_missing_required_in_definition_order() {
        let missing = missing_required(module("youth-basic"), &Answers::new());
        assert_eq!(
            missing,
            vec!["guardian_name", "guardian_consent", "age", "activity_days"]
        );
    }

    #[test]
    fn test_visible_questions_follow_answers() {
        let nutrition = module("nutrition");
        let without_other = visible_questions(nutrition, &answers(r#"{"allergies": ["nuts"]}"#));
        assert!(!without_other.iter().any(|q| q.id == "allergy_details"));

        let with_other = visible_questions(nutrition, &answers(r#"{"allergies": ["other"]}"#));
        assert!(with_other.iter().any(|q| q.id == "allergy_details"));
    }
}
