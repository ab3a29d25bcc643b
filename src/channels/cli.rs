//! CLI channel — stdin/stdout REPL over the live conversation.

use std::pin::Pin;

use futures::{Stream, StreamExt, stream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::survey::{ConversationController, ConversationView, Speaker, TranscriptUpdate, Turn, Widget};

use super::action::UserAction;

/// Lines typed by the user.
pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A REPL that renders transcript updates and turns typed lines into actions.
pub struct CliChannel {
    controller: ConversationController,
}

impl CliChannel {
    pub fn new(controller: ConversationController) -> Self {
        Self { controller }
    }

    /// Read stdin lines on a background task.
    fn start(&self) -> LineStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let reader = BufReader::new(tokio::io::stdin());
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|line| (line, rx))
        });
        Box::pin(stream)
    }

    /// Run until stdin closes.
    pub async fn run(self) {
        let updates = self.controller.subscribe();
        let renderer = tokio::spawn(render_updates(updates));

        // Anything appended before we subscribed.
        for turn in self.controller.snapshot().await.transcript {
            println!("{}", render_turn(&turn));
        }

        let mut lines = self.start();
        while let Some(line) = lines.next().await {
            let view = self.controller.snapshot().await;
            if let Some(hint) = idle_hint(&view, &line) {
                eprintln!("{hint}");
                continue;
            }
            let action = match UserAction::parse(&line, view.widget.as_ref()) {
                Ok(action) => action,
                Err(hint) => {
                    eprintln!("⚠️  {hint}");
                    continue;
                }
            };
            if let Err(e) = action.apply(&self.controller).await {
                eprintln!("⚠️  {e}");
            }
        }

        renderer.abort();
    }
}

async fn render_updates(mut updates: broadcast::Receiver<TranscriptUpdate>) {
    loop {
        match updates.recv().await {
            Ok(TranscriptUpdate::Appended { turn }) | Ok(TranscriptUpdate::Replaced { turn }) => {
                println!("{}", render_turn(&turn));
            }
            Ok(TranscriptUpdate::Reset { generation }) => {
                println!("\n──────── 新对话 #{generation} ────────\n");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "CLI renderer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// What to tell the user when a plain line arrives while no question is
/// waiting for an answer. Commands always go through.
fn idle_hint(view: &ConversationView, line: &str) -> Option<&'static str> {
    if view.question.is_some() || line.trim_start().starts_with('/') {
        return None;
    }
    if view.status.is_in_progress() {
        Some("⏳ 请稍候，下一个问题马上出现")
    } else if view.status.is_terminal() {
        Some("✅ 本次分析已结束，输入 /new 开始新的对话")
    } else {
        None
    }
}

/// A turn as printed to the terminal.
pub fn render_turn(turn: &Turn) -> String {
    let mut out = match turn.speaker {
        Speaker::User => format!("🙋 {}", turn.content),
        Speaker::Assistant => format!("\n🤖 {}", turn.content),
    };
    match &turn.widget {
        Some(Widget::SingleChoice { options }) => {
            for (i, option) in options.iter().enumerate() {
                out.push_str(&format!("\n   {}. {option}", i + 1));
            }
        }
        Some(Widget::MultiChoice { options }) => {
            for (i, option) in options.iter().enumerate() {
                out.push_str(&format!("\n   [{}] {option}", i + 1));
            }
            out.push_str("\n   （可多选，用逗号分隔编号；输入 - 表示都不选）");
        }
        Some(Widget::BudgetRange {
            min_label,
            max_label,
            unit,
        }) => {
            let unit = unit.as_deref().unwrap_or("");
            out.push_str(&format!("\n   请输入 {min_label} 和 {max_label}（{unit}），例如：300 500"));
        }
        Some(Widget::DatePicker) => out.push_str("\n   （格式：YYYY-MM-DD）"),
        None => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::graph::{InputKind, QuestionNode};
    use crate::survey::state::{ConversationState, ConversationStatus};

    #[test]
    fn renders_numbered_options() {
        let node = QuestionNode::choice("q", "Bills?", &["包含", "不包含"]);
        let out = render_turn(&Turn::question(&node));
        assert!(out.contains("🤖 Bills?"));
        assert!(out.contains("1. 包含"));
        assert!(out.contains("2. 不包含"));
    }

    #[test]
    fn renders_budget_hint() {
        let node = QuestionNode::input("b", "预算？", InputKind::BudgetRange, "预算", Some("澳元/周"));
        let out = render_turn(&Turn::question(&node));
        assert!(out.contains("最低预算"));
        assert!(out.contains("澳元/周"));
    }

    #[test]
    fn plain_input_outside_a_question_gets_a_hint() {
        let mut state = ConversationState::new("q".to_string());
        state.reset("q".to_string());
        assert_eq!(idle_hint(&ConversationView::from(&state), "包含"), None);

        state.transition_to(ConversationStatus::PresentingQuestion).unwrap();
        let view = ConversationView::from(&state);
        assert!(idle_hint(&view, "包含").unwrap().contains("请稍候"));
        assert_eq!(idle_hint(&view, "/new"), None);

        state.status = ConversationStatus::Done;
        let view = ConversationView::from(&state);
        assert!(idle_hint(&view, "再来一次").unwrap().contains("/new"));
    }

    #[test]
    fn renders_user_turn_plainly() {
        assert_eq!(render_turn(&Turn::user("包含")), "🙋 包含");
    }
}
