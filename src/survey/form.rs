//! Answers and the form data they accumulate into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::graph::ids;
use super::prompts;

/// A user action answering the current question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Answer {
    /// A single option or a free-text/date value.
    Text(String),
    /// A confirmed multi-select (possibly empty).
    MultiSelect(Vec<String>),
    /// A confirmed budget range, per week.
    BudgetRange { min: String, max: String },
}

impl Answer {
    /// How the answer reads in the transcript.
    pub fn display(&self) -> String {
        match self {
            Self::Text(value) => value.trim().to_string(),
            Self::MultiSelect(selected) if selected.is_empty() => {
                prompts::NO_OPTION_CHOSEN.to_string()
            }
            Self::MultiSelect(selected) => selected.join("、"),
            Self::BudgetRange { min, max } => prompts::budget_answer(min.trim(), max.trim()),
        }
    }
}

/// A recorded answer value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    /// An empty list is an explicit "no option chosen".
    List(Vec<String>),
}

impl AnswerValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            Self::Text(_) => None,
        }
    }
}

/// Question key → answer. Only the conversation controller writes to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormData {
    entries: BTreeMap<String, AnswerValue>,
}

impl FormData {
    pub fn get(&self, key: &str) -> Option<&AnswerValue> {
        self.entries.get(key)
    }

    /// Text value for `key`, if present and non-blank.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(AnswerValue::as_text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(AnswerValue::as_list)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an answer for `question`.
    ///
    /// A budget range writes the `minBudget`/`maxBudget` pair in a single
    /// step; nothing is written under the question's own key.
    pub(crate) fn record(&mut self, question: &str, answer: &Answer) {
        match answer {
            Answer::Text(value) => {
                self.entries
                    .insert(question.to_string(), AnswerValue::Text(value.trim().to_string()));
            }
            Answer::MultiSelect(selected) => {
                self.entries
                    .insert(question.to_string(), AnswerValue::List(selected.clone()));
            }
            Answer::BudgetRange { min, max } => {
                let pair = [
                    (ids::MIN_BUDGET, AnswerValue::Text(min.trim().to_string())),
                    (ids::MAX_BUDGET, AnswerValue::Text(max.trim().to_string())),
                ];
                self.entries
                    .extend(pair.into_iter().map(|(k, v)| (k.to_string(), v)));
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_default()
    }
}

#[cfg(test)]
impl FormData {
    pub(crate) fn from_pairs(pairs: &[(&str, AnswerValue)]) -> Self {
        Self {
            entries: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_range_writes_both_keys() {
        let mut form = FormData::default();
        form.record(
            ids::BUDGET,
            &Answer::BudgetRange {
                min: " 300 ".to_string(),
                max: "500".to_string(),
            },
        );
        assert_eq!(form.len(), 2);
        assert_eq!(form.text(ids::MIN_BUDGET), Some("300"));
        assert_eq!(form.text(ids::MAX_BUDGET), Some("500"));
        assert!(!form.contains(ids::BUDGET));
    }

    #[test]
    fn empty_multi_select_is_recorded() {
        let mut form = FormData::default();
        form.record(ids::FLEXIBILITY, &Answer::MultiSelect(vec![]));
        assert!(form.contains(ids::FLEXIBILITY));
        assert_eq!(form.list(ids::FLEXIBILITY), Some(&[][..]));
    }

    #[test]
    fn rerecording_replaces_value() {
        let mut form = FormData::default();
        form.record(ids::UNIVERSITY, &Answer::Text("悉尼大学（USYD）".to_string()));
        form.record(ids::UNIVERSITY, &Answer::Text("悉尼科技大学（UTS）".to_string()));
        assert_eq!(form.len(), 1);
        assert_eq!(form.text(ids::UNIVERSITY), Some("悉尼科技大学（UTS）"));
    }

    #[test]
    fn answer_display_forms() {
        assert_eq!(Answer::Text(" Studio ".to_string()).display(), "Studio");
        assert_eq!(Answer::MultiSelect(vec![]).display(), prompts::NO_OPTION_CHOSEN);
        assert_eq!(
            Answer::MultiSelect(vec!["a".to_string(), "b".to_string()]).display(),
            "a、b"
        );
        assert_eq!(
            Answer::BudgetRange {
                min: "300".to_string(),
                max: "500".to_string()
            }
            .display(),
            "最低预算：300 澳元/周，最高预算：500 澳元/周"
        );
    }

    #[test]
    fn json_shape_is_flat_map() {
        let form = FormData::from_pairs(&[
            ("university", AnswerValue::Text("USYD".to_string())),
            ("flexibility", AnswerValue::List(vec!["x".to_string()])),
        ]);
        let json = form.to_json();
        assert_eq!(json["university"], "USYD");
        assert_eq!(json["flexibility"][0], "x");

        let parsed: FormData = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, form);
    }
}
