//! Prompt text for each question kind and decoding of the model's JSON reply.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::question::{DecisionAnswer, DecisionQuery, Question, Segment};
use crate::{OracleError, extract_json_output};

pub(crate) const SYSTEM_PROMPT: &str = "You help an electronic-component catalog search make \
narrow decisions. You only ever choose among the options you are given. You never invent \
options, never convert units and never produce numbers that are not quoted from the input. \
Reply with a single JSON object and nothing else.";

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// User-turn text for `question`.
pub fn render(question: &Question) -> String {
    let mut out = match &question.query {
        DecisionQuery::PickOne {
            topic,
            subject,
            candidates,
            hints,
        } => {
            let mut text = format!(
                "Pick the {topic} that best matches: \"{subject}\"\n\nCandidates:\n{}\n",
                bullet_list(candidates)
            );
            if !hints.is_empty() {
                text.push_str(&format!("\nNotes:\n{}\n", bullet_list(hints)));
            }
            text.push_str(
                "\nRespond as {\"choice\": \"<candidate copied exactly>\"} or {\"choice\": null} \
                 if none of them fits.",
            );
            text
        }
        DecisionQuery::MapLabels { labels, targets } => format!(
            "Map each vendor label to the canonical key that means the same thing.\n\n\
             Vendor labels:\n{}\n\nCanonical keys:\n{}\n\n\
             Respond as {{\"mapping\": {{\"<label>\": \"<key>\"}}}}. Leave out labels with no \
             matching key.",
            bullet_list(labels),
            bullet_list(targets)
        ),
        DecisionQuery::SplitRequirements { text, fields } => format!(
            "Split this component requirement into phrases, one per field it talks about.\n\n\
             Requirement: \"{text}\"\n\nFields:\n{}\n\n\
             Respond as {{\"segments\": [{{\"field\": \"<field>\", \"phrase\": \"<exact substring \
             of the requirement>\"}}]}}. Copy phrases verbatim; skip fields that are not mentioned.",
            bullet_list(fields)
        ),
    };

    if question.attempt > 0 {
        out.push_str(&format!(
            "\n\nThis is attempt {} because the previous reply could not be used. Follow the \
             response format exactly.",
            question.attempt + 1
        ));
    }
    out
}

/// Decode the model's reply for `query`.  The result still has to pass
/// [`DecisionAnswer::validate`].
pub fn parse_answer(query: &DecisionQuery, content: &str) -> Result<DecisionAnswer, OracleError> {
    let value: Value = extract_json_output(content)
        .ok_or_else(|| OracleError::Malformed(format!("no JSON object in reply: {content}")))?;

    match query {
        DecisionQuery::PickOne { .. } => match value.get("choice") {
            Some(Value::String(choice)) if choice.trim().eq_ignore_ascii_case("none") => {
                Ok(DecisionAnswer::Declined)
            }
            Some(Value::String(choice)) if !choice.trim().is_empty() => {
                Ok(DecisionAnswer::Picked(choice.trim().to_string()))
            }
            Some(Value::Null) | Some(Value::String(_)) => Ok(DecisionAnswer::Declined),
            _ => Err(OracleError::Malformed("reply has no `choice`".to_string())),
        },
        DecisionQuery::MapLabels { .. } => {
            let mapping = value
                .get("mapping")
                .and_then(Value::as_object)
                .ok_or_else(|| OracleError::Malformed("reply has no `mapping` object".to_string()))?;
            let labels: BTreeMap<String, String> = mapping
                .iter()
                .filter_map(|(label, target)| Some((label.clone(), target.as_str()?.to_string())))
                .collect();
            Ok(DecisionAnswer::Labels(labels))
        }
        DecisionQuery::SplitRequirements { .. } => {
            let segments = value
                .get("segments")
                .cloned()
                .ok_or_else(|| OracleError::Malformed("reply has no `segments` array".to_string()))?;
            let segments: Vec<Segment> = serde_json::from_value(segments)
                .map_err(|e| OracleError::Malformed(format!("bad `segments`: {e}")))?;
            Ok(DecisionAnswer::Segments(segments))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick() -> Question {
        Question::pick_one(
            "vendor category",
            "Ceramic Capacitors(SMD)",
            vec!["Ceramic Capacitors".to_string(), "Film Capacitors".to_string()],
        )
    }

    #[test]
    fn render_lists_candidates_and_marks_retries() {
        let q = pick();
        let first = render(&q);
        assert!(first.contains("- Ceramic Capacitors"));
        assert!(first.contains("\"choice\""));
        assert!(!first.contains("attempt"));

        let second = render(&q.rephrased());
        assert!(second.contains("attempt 2"));
        assert_ne!(first, second);
    }

    #[test]
    fn parse_pick_variants() {
        let q = pick();
        assert_eq!(
            parse_answer(&q.query, r#"{"choice": "Film Capacitors"}"#).unwrap(),
            DecisionAnswer::Picked("Film Capacitors".to_string())
        );
        assert_eq!(parse_answer(&q.query, r#"{"choice": null}"#).unwrap(), DecisionAnswer::Declined);
        assert_eq!(parse_answer(&q.query, r#"{"choice": "none"}"#).unwrap(), DecisionAnswer::Declined);
        assert!(matches!(
            parse_answer(&q.query, r#"{"answer": 1}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(parse_answer(&q.query, "no idea"), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn parse_mapping_skips_non_string_targets() {
        let query = DecisionQuery::MapLabels {
            labels: vec!["Cap".to_string(), "Foo".to_string()],
            targets: vec!["capacitance".to_string()],
        };
        let reply = "```json\n{\"mapping\": {\"Cap\": \"capacitance\", \"Foo\": null}}\n```";
        assert_eq!(
            parse_answer(&query, reply).unwrap(),
            DecisionAnswer::Labels(BTreeMap::from([("Cap".to_string(), "capacitance".to_string())]))
        );
    }

    #[test]
    fn parse_segments() {
        let query = DecisionQuery::SplitRequirements {
            text: "16V or more".to_string(),
            fields: vec!["Rated Voltage".to_string()],
        };
        let reply = r#"{"segments": [{"field": "Rated Voltage", "phrase": "16V or more"}]}"#;
        assert_eq!(
            parse_answer(&query, reply).unwrap(),
            DecisionAnswer::Segments(vec![Segment {
                field: "Rated Voltage".to_string(),
                phrase: "16V or more".to_string()
            }])
        );
    }
}
