//! User actions and how typed input maps onto them.

use crate::error::FlowError;
use crate::survey::{ConversationController, Widget};

/// Typed input meaning "no option chosen" on a multi-select.
const NONE_CHOSEN: [&str; 2] = ["-", "无"];

/// Something the user can do to the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Answer(String),
    MultiSelect(Vec<String>),
    Budget { min: String, max: String },
    NewConversation,
    Retry,
}

impl UserAction {
    /// Interpret a typed line against the widget currently on screen.
    ///
    /// Options may be picked by 1-based index or by label. A multi-select
    /// takes a comma-separated list; a budget takes `min max`.
    pub fn parse(input: &str, widget: Option<&Widget>) -> Result<Self, String> {
        let input = input.trim();
        match input {
            "/new" => return Ok(Self::NewConversation),
            "/retry" => return Ok(Self::Retry),
            _ => {}
        }

        match widget {
            Some(Widget::SingleChoice { options }) => Ok(Self::Answer(pick(options, input)?)),
            Some(Widget::MultiChoice { options }) => {
                if input.is_empty() || NONE_CHOSEN.contains(&input) {
                    return Ok(Self::MultiSelect(Vec::new()));
                }
                let selected = input
                    .split([',', '，', '、'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|token| pick(options, token))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::MultiSelect(selected))
            }
            Some(Widget::BudgetRange { .. }) => {
                let parts: Vec<&str> = input
                    .split(|c: char| c.is_whitespace() || c == '-' || c == '~')
                    .filter(|s| !s.is_empty())
                    .collect();
                match parts.as_slice() {
                    [min, max] => Ok(Self::Budget {
                        min: min.to_string(),
                        max: max.to_string(),
                    }),
                    _ => Err("请输入最低和最高预算，例如：300 500".to_string()),
                }
            }
            Some(Widget::DatePicker) | None => Ok(Self::Answer(input.to_string())),
        }
    }

    pub async fn apply(self, controller: &ConversationController) -> Result<(), FlowError> {
        match self {
            Self::Answer(value) => controller.submit_answer(&value).await,
            Self::MultiSelect(selected) => controller.submit_multi_select(selected).await,
            Self::Budget { min, max } => controller.submit_budget_range(&min, &max).await,
            Self::NewConversation => {
                controller.new_conversation().await;
                Ok(())
            }
            Self::Retry => controller.retry_submission().await,
        }
    }
}

fn pick(options: &[String], token: &str) -> Result<String, String> {
    if let Ok(n) = token.parse::<usize>() {
        if let Some(option) = n.checked_sub(1).and_then(|i| options.get(i)) {
            return Ok(option.clone());
        }
    }
    options
        .iter()
        .find(|o| o.as_str() == token)
        .cloned()
        .ok_or_else(|| format!("请选择 1-{} 之间的编号或输入选项内容", options.len()))
}
