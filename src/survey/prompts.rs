//! User-facing conversation text. All functions are pure.

use crate::jobs::backend::AnalysisResult;

use super::form::FormData;
use super::graph::ids;

/// Shown for a confirmed multi-select with nothing chosen.
pub const NO_OPTION_CHOSEN: &str = "未选择任何选项";

/// Opening turn of every conversation.
pub const GREETING: &str =
    "您好！我是您的租房助手 🏠 我会通过几个简单的问题来了解您的租房需求，帮您找到最合适的房源。";

/// Announces the digest.
pub const SUMMARY_INTRO: &str = "好的，我来帮您总结一下您的租房需求：";

/// Placeholder hint for the free-text input while `question` is current.
pub fn input_placeholder(question: &str) -> &'static str {
    match question {
        "locationOther" => "输入您的目标大学名称...",
        ids::MOVE_IN_DATE => "选择入住日期 (例如：2024-12-01)...",
        ids::LEASE_TERM_OTHER => "输入您期望的租期...",
        _ => "输入您的回答...",
    }
}

pub fn budget_answer(min: &str, max: &str) -> String {
    format!("最低预算：{min} 澳元/周，最高预算：{max} 澳元/周")
}

/// Human-readable digest of the collected answers.
///
/// Only populated fields contribute, in a fixed order.
pub fn summary(form: &FormData) -> String {
    let mut parts = Vec::new();

    if let Some(v) = form.text(ids::UNIVERSITY) {
        parts.push(format!("🎓 **目标大学**：{v}"));
    }
    let min = form.text(ids::MIN_BUDGET);
    let max = form.text(ids::MAX_BUDGET);
    if min.is_some() || max.is_some() {
        parts.push(format!(
            "💰 **预算**：{} - {} 澳元/周",
            min.unwrap_or("?"),
            max.unwrap_or("?")
        ));
    }
    if let Some(v) = form.text(ids::INCLUDE_BILLS) {
        parts.push(format!("📋 **是否含Bills**：{v}"));
    }
    if let Some(v) = form.text(ids::COMMUTE_TIME) {
        parts.push(format!("🚗 **通勤时间**：{v}"));
    }
    if let Some(v) = form.text(ids::ROOM_TYPE) {
        parts.push(format!("🏠 **房型偏好**：{v}"));
    }
    if let Some(v) = form.text(ids::SHARED_ROOM) {
        parts.push(format!("👥 **合租意向**：{v}"));
    }
    if let Some(v) = form.text(ids::MOVE_IN_DATE) {
        parts.push(format!("📅 **入住日期**：{v}"));
    }
    match (form.text(ids::LEASE_TERM), form.text(ids::LEASE_TERM_OTHER)) {
        (_, Some(custom)) => parts.push(format!("⏰ **租期**：{custom}")),
        (Some(v), None) => parts.push(format!("⏰ **租期**：{v}")),
        (None, None) => {}
    }
    if let Some(items) = form.list(ids::FLEXIBILITY) {
        if !items.is_empty() {
            parts.push(format!("🎯 **灵活性**：{}", items.join("、")));
        }
    }

    format!(
        "✨ **您的租房需求总结**\n\n{}\n\n---\n\n太棒了！根据您的需求，我现在就开始为您搜索合适的房源。请稍等片刻...",
        parts.join("\n")
    )
}

/// Initial content of the progress turn.
pub fn progress_queued() -> String {
    "⏳ AI 正在根据您的需求生成分析，请稍候…".to_string()
}

pub fn progress_update(stage: &str, percentage: f64) -> String {
    let pct = percentage.clamp(0.0, 100.0).round() as u32;
    if stage.trim().is_empty() {
        format!("⏳ 分析进行中（{pct}%）")
    } else {
        format!("⏳ 分析进行中：{}（{pct}%）", stage.trim())
    }
}

pub fn submission_failed(reason: &str) -> String {
    format!("❌ 提交分析请求失败：{reason}\n\n您可以稍后重试提交。")
}

pub fn analysis_complete(result: &AnalysisResult) -> String {
    let mut out = String::from("✅ **分析完成**\n\n");
    match result.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(summary) => {
            out.push_str("**分析摘要**\n\n");
            out.push_str(summary);
        }
        None => out.push_str("AI 未返回摘要内容。"),
    }
    if let Some(report) = result
        .report_markdown
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        out.push_str("\n\n---\n\n**完整报告**\n\n");
        out.push_str(report);
    }
    if !result.tasks.is_empty() {
        out.push_str("\n\n---\n\n**任务详情**");
        for (i, task) in result.tasks.iter().enumerate() {
            let name = task
                .task_name
                .clone()
                .unwrap_or_else(|| format!("任务 {}", i + 1));
            out.push_str(&format!("\n\n#### {name}"));
            if let Some(ref d) = task.description {
                out.push_str(&format!("\n描述：{d}"));
            }
            if let Some(ref o) = task.output {
                out.push_str(&format!("\n输出：{o}"));
            }
            if let Some(ref s) = task.status {
                out.push_str(&format!("\n状态：{s}"));
            }
        }
    }
    out
}

pub fn analysis_failed(message: &str) -> String {
    let message = if message.trim().is_empty() {
        "请稍后再试。"
    } else {
        message.trim()
    };
    format!("❌ 未能生成 AI 报告：{message}")
}

pub fn analysis_timed_out() -> String {
    "⌛ AI 分析超时，请稍后手动查询结果。".to_string()
}
