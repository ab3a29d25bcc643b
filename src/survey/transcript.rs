//! The ordered, append-only list of conversation turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::graph::{AnswerShape, InputKind, QuestionId, QuestionNode};

/// Stable identifier of a turn.
pub type TurnId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// Interactive widget attached to an assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Widget {
    SingleChoice { options: Vec<String> },
    /// Checklist with an explicit confirm step.
    MultiChoice { options: Vec<String> },
    /// Two numeric fields with an explicit confirm step.
    BudgetRange {
        min_label: String,
        max_label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    DatePicker,
}

impl Widget {
    /// The widget a question is answered with. Free-text questions have none.
    pub fn for_question(node: &QuestionNode) -> Option<Self> {
        match &node.shape {
            AnswerShape::Choice { options } => Some(Self::SingleChoice {
                options: options.clone(),
            }),
            AnswerShape::MultiChoice { options } => Some(Self::MultiChoice {
                options: options.clone(),
            }),
            AnswerShape::Input { field } => match field.kind {
                InputKind::BudgetRange => Some(Self::BudgetRange {
                    min_label: format!("最低{}", field.label),
                    max_label: format!("最高{}", field.label),
                    unit: field.unit.clone(),
                }),
                InputKind::Date => Some(Self::DatePicker),
                InputKind::Freeform => None,
            },
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub speaker: Speaker,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<Widget>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Speaker::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, content)
    }

    /// An assistant turn presenting `node`.
    pub fn question(node: &QuestionNode) -> Self {
        Self {
            question: Some(node.id.clone()),
            widget: Widget::for_question(node),
            ..Self::assistant(node.prompt.clone())
        }
    }

    fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker,
            content: content.into(),
            timestamp: Utc::now(),
            question: None,
            widget: None,
        }
    }
}

/// A change to the transcript, broadcast to UI sinks.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptUpdate {
    Appended { turn: Turn },
    /// The progress turn's content changed in place.
    Replaced { turn: Turn },
    /// A new conversation started; the transcript is empty again.
    Reset { generation: u64 },
}

/// Append-only turn list with a single replaceable progress turn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    turns: Vec<Turn>,
    #[serde(skip)]
    progress: Option<TurnId>,
}

impl Transcript {
    pub fn push(&mut self, turn: Turn) -> &Turn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    /// Append a turn and designate it as the live progress line.
    pub fn push_progress(&mut self, turn: Turn) -> &Turn {
        self.progress = Some(turn.id);
        self.push(turn)
    }

    /// Replace the progress turn's content. Returns the updated turn, or
    /// `None` if `id` is not the designated progress turn.
    pub fn replace_progress(&mut self, id: TurnId, content: impl Into<String>) -> Option<&Turn> {
        if self.progress != Some(id) {
            return None;
        }
        let turn = self.turns.iter_mut().find(|t| t.id == id)?;
        turn.content = content.into();
        turn.timestamp = Utc::now();
        Some(turn)
    }

    pub fn progress_turn(&self) -> Option<TurnId> {
        self.progress
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.turns.clear();
        self.progress = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::graph::QuestionNode;

    #[test]
    fn question_turn_carries_widget() {
        let node = QuestionNode::choice("bills", "Bills?", &["包含", "不包含"]);
        let turn = Turn::question(&node);
        assert_eq!(turn.speaker, Speaker::Assistant);
        assert_eq!(turn.question.as_deref(), Some("bills"));
        assert_eq!(
            turn.widget,
            Some(Widget::SingleChoice {
                options: vec!["包含".to_string(), "不包含".to_string()]
            })
        );
    }

    #[test]
    fn budget_and_date_widgets() {
        let budget = QuestionNode::input("b", "?", InputKind::BudgetRange, "预算", Some("澳元/周"));
        assert_eq!(
            Widget::for_question(&budget),
            Some(Widget::BudgetRange {
                min_label: "最低预算".to_string(),
                max_label: "最高预算".to_string(),
                unit: Some("澳元/周".to_string()),
            })
        );
        let date = QuestionNode::input("d", "?", InputKind::Date, "日期", None);
        assert_eq!(Widget::for_question(&date), Some(Widget::DatePicker));
        let text = QuestionNode::input("t", "?", InputKind::Freeform, "租期", None);
        assert_eq!(Widget::for_question(&text), None);
    }

    #[test]
    fn progress_turn_replaced_in_place() {
        let mut transcript = Transcript::default();
        transcript.push(Turn::assistant("summary"));
        let id = transcript.push_progress(Turn::assistant("queued")).id;
        transcript.push(Turn::user("hello"));

        let updated = transcript.replace_progress(id, "parsing 40%").unwrap();
        assert_eq!(updated.id, id);
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.turns()[1].content, "parsing 40%");
    }

    #[test]
    fn only_progress_turn_is_mutable() {
        let mut transcript = Transcript::default();
        let id = transcript.push(Turn::assistant("fixed")).id;
        assert!(transcript.replace_progress(id, "changed").is_none());
        assert_eq!(transcript.turns()[0].content, "fixed");
    }

    #[test]
    fn clear_forgets_progress_turn() {
        let mut transcript = Transcript::default();
        let id = transcript.push_progress(Turn::assistant("queued")).id;
        transcript.clear();
        assert!(transcript.is_empty());
        assert!(transcript.progress_turn().is_none());
        assert!(transcript.replace_progress(id, "late").is_none());
    }

    #[test]
    fn update_serializes_with_tag() {
        let update = TranscriptUpdate::Reset { generation: 3 };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "reset");
        assert_eq!(json["generation"], 3);
    }
}
