//! Converts a form snapshot into the document the analysis backend consumes.

use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::form::FormData;
use super::graph::ids;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

const PAYLOAD_VERSION: u32 = 1;

/// Largest weekly budget bound accepted, in dollars.
pub const MAX_WEEKLY_BUDGET: u32 = 100_000;

/// Flexibility options that map onto property acceptance flags.
const ACCEPT_SMALLER: &str = "可以接受稍小的房间面积";
const NO_COMPROMISE: &str = "对上述条件均不妥协";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyPayload {
    pub meta: PayloadMeta,
    pub survey: Survey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMeta {
    pub version: u32,
    pub saved_at: String,
    /// The form exactly as collected.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub budget: Budget,
    pub property: Property,
    pub lifestyle: Lifestyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub weekly_min: Option<u32>,
    pub weekly_max: Option<u32>,
    /// Midpoint of the range, or whichever bound is present.
    pub weekly_total: Option<u32>,
    /// `None` when the user was unsure.
    pub bills_included: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub co_rent: Option<Willingness>,
    pub accept_small: Option<Willingness>,
    pub accept_overpriced: Option<Willingness>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifestyle {
    pub commute: Option<String>,
    pub move_in: Option<String>,
    pub lease_months: Option<u32>,
    pub university: Option<String>,
    pub flexibility: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Willingness {
    Yes,
    No,
    Maybe,
}

impl SurveyPayload {
    pub fn from_form(form: &FormData) -> Self {
        let weekly_min = form.text(ids::MIN_BUDGET).and_then(parse_budget);
        let weekly_max = form.text(ids::MAX_BUDGET).and_then(parse_budget);
        let weekly_total = match (weekly_min, weekly_max) {
            (Some(lo), Some(hi)) => u32::try_from((u64::from(lo) + u64::from(hi)) / 2).ok(),
            (lo, hi) => lo.or(hi),
        };

        let flexibility: Vec<String> = form
            .list(ids::FLEXIBILITY)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let has = |option: &str| flexibility.iter().any(|f| f == option);
        let accept_small = if has(ACCEPT_SMALLER) {
            Some(Willingness::Yes)
        } else if has(NO_COMPROMISE) {
            Some(Willingness::No)
        } else {
            None
        };
        let accept_overpriced = has(NO_COMPROMISE).then_some(Willingness::Yes);

        let lease_term = form
            .text(ids::LEASE_TERM_OTHER)
            .or_else(|| form.text(ids::LEASE_TERM));

        Self {
            meta: PayloadMeta {
                version: PAYLOAD_VERSION,
                saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                raw: form.to_json(),
            },
            survey: Survey {
                budget: Budget {
                    weekly_min,
                    weekly_max,
                    weekly_total,
                    bills_included: form.text(ids::INCLUDE_BILLS).and_then(tri_state),
                },
                property: Property {
                    kind: form.text(ids::ROOM_TYPE).map(String::from),
                    co_rent: form.text(ids::SHARED_ROOM).and_then(willingness),
                    accept_small,
                    accept_overpriced,
                },
                lifestyle: Lifestyle {
                    commute: form.text(ids::COMMUTE_TIME).map(normalize_commute),
                    move_in: form.text(ids::MOVE_IN_DATE).map(String::from),
                    lease_months: lease_term.and_then(lease_months),
                    university: form.text(ids::UNIVERSITY).map(String::from),
                    flexibility,
                },
            },
        }
    }
}

/// A budget bound: a plain non-negative integer, nothing else.
pub(crate) fn parse_budget(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// First run of digits in `s`.
fn extract_number(s: &str) -> Option<u32> {
    DIGITS.find(s).and_then(|m| m.as_str().parse().ok())
}

fn tri_state(s: &str) -> Option<bool> {
    match s {
        "包含" | "是" | "true" | "True" | "yes" | "Yes" => Some(true),
        "不包含" | "否" | "false" | "False" | "no" | "No" => Some(false),
        _ => None,
    }
}

fn willingness(s: &str) -> Option<Willingness> {
    match s {
        "愿意" => Some(Willingness::Yes),
        "不愿意" => Some(Willingness::No),
        "视情况而定" => Some(Willingness::Maybe),
        _ => None,
    }
}

/// Commute limits collapse to "15" | "30" | "45" | "60" | ">60" | "none".
fn normalize_commute(s: &str) -> String {
    let minutes = match extract_number(s) {
        // "1 小时"
        Some(1) if s.contains("小时") => Some(60),
        other => other,
    };
    match minutes {
        Some(m @ (15 | 30 | 45 | 60)) => m.to_string(),
        Some(m) if m > 60 => ">60".to_string(),
        _ => "none".to_string(),
    }
}

fn lease_months(s: &str) -> Option<u32> {
    let n = extract_number(s)?;
    if s.contains('年') { n.checked_mul(12) } else { Some(n) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::form::AnswerValue;

    fn text(s: &str) -> AnswerValue {
        AnswerValue::Text(s.to_string())
    }

    fn full_form() -> FormData {
        FormData::from_pairs(&[
            (ids::UNIVERSITY, text("悉尼大学（USYD）")),
            (ids::MIN_BUDGET, text("300")),
            (ids::MAX_BUDGET, text("500")),
            (ids::INCLUDE_BILLS, text("包含")),
            (ids::COMMUTE_TIME, text("30 分钟")),
            (ids::ROOM_TYPE, text("Studio")),
            (ids::SHARED_ROOM, text("视情况而定")),
            (ids::MOVE_IN_DATE, text("2025-02-01")),
            (ids::LEASE_TERM, text("12 个月")),
            (
                ids::FLEXIBILITY,
                AnswerValue::List(vec![ACCEPT_SMALLER.to_string()]),
            ),
        ])
    }

    #[test]
    fn full_form_normalizes() {
        let payload = SurveyPayload::from_form(&full_form());
        let budget = &payload.survey.budget;
        assert_eq!(budget.weekly_min, Some(300));
        assert_eq!(budget.weekly_max, Some(500));
        assert_eq!(budget.weekly_total, Some(400));
        assert_eq!(budget.bills_included, Some(true));

        let property = &payload.survey.property;
        assert_eq!(property.kind.as_deref(), Some("Studio"));
        assert_eq!(property.co_rent, Some(Willingness::Maybe));
        assert_eq!(property.accept_small, Some(Willingness::Yes));
        assert_eq!(property.accept_overpriced, None);

        let lifestyle = &payload.survey.lifestyle;
        assert_eq!(lifestyle.commute.as_deref(), Some("30"));
        assert_eq!(lifestyle.lease_months, Some(12));
        assert_eq!(lifestyle.move_in.as_deref(), Some("2025-02-01"));
        assert_eq!(payload.meta.raw["roomType"], "Studio");
    }

    #[test]
    fn one_sided_budget_total() {
        let form = FormData::from_pairs(&[(ids::MAX_BUDGET, text("450"))]);
        let payload = SurveyPayload::from_form(&form);
        assert_eq!(payload.survey.budget.weekly_total, Some(450));
        assert_eq!(payload.survey.budget.weekly_min, None);
    }

    #[test]
    fn commute_buckets() {
        assert_eq!(normalize_commute("15 分钟"), "15");
        assert_eq!(normalize_commute("1 小时"), "60");
        assert_eq!(normalize_commute("90 分钟"), ">60");
        assert_eq!(normalize_commute("无限制"), "none");
    }

    #[test]
    fn unsure_bills_is_none() {
        assert_eq!(tri_state("不确定"), None);
        assert_eq!(tri_state("不包含"), Some(false));
    }

    #[test]
    fn no_compromise_flags() {
        let form = FormData::from_pairs(&[(
            ids::FLEXIBILITY,
            AnswerValue::List(vec![NO_COMPROMISE.to_string()]),
        )]);
        let property = SurveyPayload::from_form(&form).survey.property;
        assert_eq!(property.accept_small, Some(Willingness::No));
        assert_eq!(property.accept_overpriced, Some(Willingness::Yes));
    }

    #[test]
    fn custom_lease_term_wins() {
        let form = FormData::from_pairs(&[
            (ids::LEASE_TERM, text("其他")),
            (ids::LEASE_TERM_OTHER, text("2 年")),
        ]);
        let payload = SurveyPayload::from_form(&form);
        assert_eq!(payload.survey.lifestyle.lease_months, Some(24));
    }

    #[test]
    fn huge_budget_midpoint_does_not_overflow() {
        let form = FormData::from_pairs(&[
            (ids::MIN_BUDGET, text("4000000000")),
            (ids::MAX_BUDGET, text("4000000000")),
            (ids::LEASE_TERM_OTHER, text("400000000 年")),
        ]);
        let payload = SurveyPayload::from_form(&form);
        assert_eq!(payload.survey.budget.weekly_total, Some(4_000_000_000));
        assert_eq!(payload.survey.lifestyle.lease_months, None);
    }

    #[test]
    fn budget_bounds_are_plain_integers() {
        assert_eq!(parse_budget(" 300 "), Some(300));
        assert_eq!(parse_budget("1e3"), None);
        assert_eq!(parse_budget("300.5"), None);
        assert_eq!(parse_budget("-5"), None);
        assert_eq!(parse_budget("99999999999"), None);

        let form = FormData::from_pairs(&[(ids::MIN_BUDGET, text("1e3"))]);
        assert_eq!(SurveyPayload::from_form(&form).survey.budget.weekly_min, None);
    }

    #[test]
    fn serializes_property_type_field() {
        let json = serde_json::to_value(SurveyPayload::from_form(&full_form())).unwrap();
        assert_eq!(json["survey"]["property"]["type"], "Studio");
        assert_eq!(json["survey"]["property"]["co_rent"], "maybe");
        assert_eq!(json["meta"]["version"], 1);
    }
}
