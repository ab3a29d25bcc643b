//! Question graph — the static, validated set of survey questions and the
//! transitions between them.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

use super::form::Answer;

/// Question identifiers. Also used as the `FormData` key for the answer.
pub type QuestionId = String;

/// What kind of free input a question asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Two numeric bounds confirmed together.
    BudgetRange,
    /// A calendar date (`YYYY-MM-DD`).
    Date,
    /// Arbitrary text.
    Freeform,
}

/// A structured input field descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputField {
    pub kind: InputKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// The shape of answer a question accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerShape {
    Choice { options: Vec<String> },
    MultiChoice { options: Vec<String> },
    Input { field: InputField },
}

impl AnswerShape {
    /// The fixed option set, if the question has one.
    pub fn options(&self) -> Option<&[String]> {
        match self {
            Self::Choice { options } | Self::MultiChoice { options } => Some(options),
            Self::Input { .. } => None,
        }
    }
}

/// Where a question leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Next {
    Node(QuestionId),
    /// The survey is complete and ready to summarize.
    Terminal,
}

impl Next {
    fn target(&self) -> Option<&str> {
        match self {
            Self::Node(id) => Some(id),
            Self::Terminal => None,
        }
    }
}

/// A single survey question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionNode {
    pub id: QuestionId,
    pub prompt: String,
    pub shape: AnswerShape,
    pub next: Next,
    /// Literal answer value → alternate next question.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, QuestionId>,
}

impl QuestionNode {
    pub fn choice(id: &str, prompt: &str, options: &[&str]) -> Self {
        Self::new(
            id,
            prompt,
            AnswerShape::Choice {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        )
    }

    pub fn multi_choice(id: &str, prompt: &str, options: &[&str]) -> Self {
        Self::new(
            id,
            prompt,
            AnswerShape::MultiChoice {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        )
    }

    pub fn input(id: &str, prompt: &str, kind: InputKind, label: &str, unit: Option<&str>) -> Self {
        Self::new(
            id,
            prompt,
            AnswerShape::Input {
                field: InputField {
                    kind,
                    label: label.to_string(),
                    unit: unit.map(String::from),
                },
            },
        )
    }

    fn new(id: &str, prompt: &str, shape: AnswerShape) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            shape,
            next: Next::Terminal,
            overrides: BTreeMap::new(),
        }
    }

    /// Set the default next question.
    pub fn then(mut self, next: &str) -> Self {
        self.next = Next::Node(next.to_string());
        self
    }

    /// Redirect to `target` when the answer is exactly `answer`.
    pub fn branch(mut self, answer: &str, target: &str) -> Self {
        self.overrides.insert(answer.to_string(), target.to_string());
        self
    }

    pub fn is_multi_select(&self) -> bool {
        matches!(self.shape, AnswerShape::MultiChoice { .. })
    }

    fn targets(&self) -> impl Iterator<Item = &str> {
        self.next
            .target()
            .into_iter()
            .chain(self.overrides.values().map(String::as_str))
    }
}

/// Immutable, validated question graph.
#[derive(Debug, Clone)]
pub struct QuestionGraph {
    first: QuestionId,
    nodes: HashMap<QuestionId, QuestionNode>,
}

impl QuestionGraph {
    /// Build a graph whose entry point is the first node in `nodes`.
    ///
    /// Fails if any transition points at an unknown question or if some
    /// question cannot reach `Terminal` (a cycle).
    pub fn new(nodes: Vec<QuestionNode>) -> Result<Self, GraphError> {
        let first = nodes.first().ok_or(GraphError::Empty)?.id.clone();
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if map.contains_key(&node.id) {
                return Err(GraphError::Duplicate { id: node.id });
            }
            map.insert(node.id.clone(), node);
        }

        let graph = Self { first, nodes: map };
        graph.check_targets()?;
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_targets(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for target in node.targets() {
                if !self.nodes.contains_key(target) {
                    return Err(GraphError::DanglingTarget {
                        from: node.id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        // Iterative DFS; `on_path` holds the current stack.
        let mut done: HashSet<&str> = HashSet::new();
        for start in self.nodes.keys() {
            if done.contains(start.as_str()) {
                continue;
            }
            let mut on_path: HashSet<&str> = HashSet::new();
            let mut stack: Vec<(&str, Vec<&str>)> = Vec::new();
            on_path.insert(start.as_str());
            stack.push((start.as_str(), self.nodes[start].targets().collect()));

            while let Some((id, pending)) = stack.last_mut() {
                match pending.pop() {
                    Some(next) => {
                        if on_path.contains(next) {
                            return Err(GraphError::Cycle { id: next.to_string() });
                        }
                        if done.contains(next) {
                            continue;
                        }
                        on_path.insert(next);
                        let targets = self.nodes[next].targets().collect();
                        stack.push((next, targets));
                    }
                    None => {
                        let id = *id;
                        on_path.remove(id);
                        done.insert(id);
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }

    /// The entry question.
    pub fn first(&self) -> &QuestionNode {
        &self.nodes[&self.first]
    }

    pub fn lookup(&self, id: &str) -> Result<&QuestionNode, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NotFound { id: id.to_string() })
    }

    /// Resolve where an answer to `id` leads.
    ///
    /// Multi-select questions always finish the survey once confirmed. Other
    /// questions consult their override table for the literal answer before
    /// falling back to the default `next`.
    pub fn resolve_next(&self, id: &str, answer: &Answer) -> Result<Next, GraphError> {
        let node = self.lookup(id)?;
        if node.is_multi_select() {
            return Ok(Next::Terminal);
        }
        if let Answer::Text(value) = answer {
            if let Some(target) = node.overrides.get(value.trim()) {
                return Ok(Next::Node(target.clone()));
            }
        }
        Ok(node.next.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The rental preference survey.
    pub fn rental_survey() -> Result<Self, GraphError> {
        Self::new(rental_survey_nodes())
    }
}

pub mod ids {
    pub const UNIVERSITY: &str = "university";
    pub const BUDGET: &str = "budget";
    pub const INCLUDE_BILLS: &str = "includeBills";
    pub const COMMUTE_TIME: &str = "commuteTime";
    pub const ROOM_TYPE: &str = "roomType";
    pub const SHARED_ROOM: &str = "sharedRoom";
    pub const MOVE_IN_DATE: &str = "moveInDate";
    pub const LEASE_TERM: &str = "leaseTerm";
    pub const LEASE_TERM_OTHER: &str = "leaseTermOther";
    pub const FLEXIBILITY: &str = "flexibility";

    /// Form keys written by the budget question.
    pub const MIN_BUDGET: &str = "minBudget";
    pub const MAX_BUDGET: &str = "maxBudget";
}

fn rental_survey_nodes() -> Vec<QuestionNode> {
    use ids::*;

    vec![
        QuestionNode::choice(
            UNIVERSITY,
            "**第 1 步：学校与位置**\n\n首先，请告诉我您的目标大学是哪一所？",
            &["新南威尔士大学（UNSW）", "悉尼大学（USYD）", "悉尼科技大学（UTS）"],
        )
        .then(BUDGET),
        QuestionNode::input(
            BUDGET,
            "**第 2 步：预算与费用**\n\n请告诉我您的预算范围（单位：澳元/周）",
            InputKind::BudgetRange,
            "预算",
            Some("澳元/周"),
        )
        .then(INCLUDE_BILLS),
        QuestionNode::choice(
            INCLUDE_BILLS,
            "好的，明白了！那这个预算是否包含 Bills（水电网费）呢？",
            &["包含", "不包含", "不确定"],
        )
        .then(COMMUTE_TIME),
        QuestionNode::choice(
            COMMUTE_TIME,
            "好的！那您可以接受的通勤时间上限是多少呢？",
            &["15 分钟", "30 分钟", "45 分钟", "1 小时", "无限制"],
        )
        .then(ROOM_TYPE),
        QuestionNode::choice(
            ROOM_TYPE,
            "**第 3 步：房型与合租意向**\n\n关于房型，您有什么偏好吗？",
            &["Studio", "一居室", "两居室", "三居室及以上", "单间（合租）", "不确定"],
        )
        .then(MOVE_IN_DATE)
        .branch("Studio", SHARED_ROOM)
        .branch("一居室", SHARED_ROOM),
        QuestionNode::choice(
            SHARED_ROOM,
            "如果选择 Studio 或一居室，是否考虑合租以降低成本？",
            &["愿意", "不愿意", "视情况而定"],
        )
        .then(MOVE_IN_DATE),
        QuestionNode::input(
            MOVE_IN_DATE,
            "**第 4 步：租期与入住时间**\n\n明白了！那您最早什么时候可以入住呢？",
            InputKind::Date,
            "入住日期",
            None,
        )
        .then(LEASE_TERM),
        QuestionNode::choice(
            LEASE_TERM,
            "好的！您期望的租期是多久？",
            &["6 个月", "12 个月", "其他"],
        )
        .then(FLEXIBILITY)
        .branch("其他", LEASE_TERM_OTHER),
        QuestionNode::input(
            LEASE_TERM_OTHER,
            "请告诉我您期望的租期是多久？",
            InputKind::Freeform,
            "租期",
            None,
        )
        .then(FLEXIBILITY),
        QuestionNode::multi_choice(
            FLEXIBILITY,
            "**第 5 步：灵活性与偏好确认**\n\n最后一个问题！为了在预算内找到最佳房源，您愿意在哪些方面保持灵活？（可多选）",
            &[
                "可以接受稍小的房间面积",
                "可以接受略旧的装修",
                "可以接受离交通枢纽稍远（如多步行 5-10 分钟）",
                "可以接受不含部分 Bills",
                "对上述条件均不妥协",
            ],
        ),
    ]
}
