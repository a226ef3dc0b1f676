//! User-facing (zh-TW) error text. Field messages always name the field so the
//! user knows what to fix.

use crate::validation::{IssueKind, ValidationFailure, ValidationIssue};

pub(crate) const AUTHENTICATION_REQUIRED: &str = "請先登入後再試一次。";
pub(crate) const INVALID_ACCESS_TOKEN: &str = "登入已失效，請重新登入。";
pub(crate) const FORBIDDEN: &str = "你沒有權限執行這個操作。";
pub(crate) const NOT_FOUND: &str = "找不到指定的資料。";
pub(crate) const MESSAGE_ALREADY_PROCESSED: &str = "這則訊息已經處理過了。";
pub(crate) const DUPLICATE_RECORD: &str = "資料已存在，請勿重複建立。";
pub(crate) const RATE_LIMITED: &str = "請求過於頻繁，請稍後再試。";
pub(crate) const REPLY_TOKEN_INVALID: &str = "回覆已逾時，請重新傳送訊息。";
pub(crate) const EXTERNAL_UNAVAILABLE: &str = "外部服務暫時無法使用，請稍後再試。";
pub(crate) const EXTERNAL_REJECTED: &str = "外部服務拒絕了這個請求。";
pub(crate) const AI_UNAVAILABLE: &str = "AI 服務暫時無法使用，請稍後再試。";
pub(crate) const DATABASE: &str = "資料儲存發生錯誤，請稍後再試。";
pub(crate) const INTERNAL: &str = "系統發生錯誤，請稍後再試。";
pub(crate) const INVALID_INPUT: &str = "輸入資料格式錯誤，請確認後再試。";
pub(crate) const CONSTRAINT_VIOLATION: &str = "資料不符合規則，請確認後再試。";

/// Human label for a known input field; falls back to the raw field name.
pub fn field_label(field: &str) -> &str {
    match field {
        "title" => "標題",
        "description" => "描述",
        "start" => "開始時間",
        "end" => "結束時間",
        "allDay" => "全天",
        "color" => "顏色",
        "label" => "標籤",
        "location" => "地點",
        "completed" => "完成狀態",
        "groupId" => "群組",
        "eventId" => "行程",
        "fileId" => "檔案",
        "fileName" => "檔名",
        "contentType" => "檔案類型",
        "dataBase64" => "檔案內容",
        "from" => "起始日期",
        "to" => "結束日期",
        other => other,
    }
}

fn field_display(issue: &ValidationIssue) -> String {
    let field = issue.field();
    if field.is_empty() {
        return "輸入資料".to_string();
    }
    let leaf = issue.path.last().map(String::as_str).unwrap_or_default();
    let label = field_label(leaf);
    if label == leaf {
        format!("「{}」", field)
    } else {
        format!("「{}」({})", label, field)
    }
}

fn unit(value_type: &str) -> &'static str {
    match value_type {
        "array" => "項",
        "number" => "",
        _ => "個字",
    }
}

/// One issue rendered for end users.
pub fn issue_user_message(issue: &ValidationIssue) -> String {
    let field = field_display(issue);
    match &issue.kind {
        IssueKind::InvalidType { received, .. }
            if received == "undefined" || received == "null" || received.is_empty() =>
        {
            format!("{}為必填欄位", field)
        }
        IssueKind::InvalidType { expected, .. } => {
            format!("{}的型別不正確，應為 {}", field, expected)
        }
        IssueKind::InvalidString { validation } => match validation.as_str() {
            "datetime" => format!("{}不是有效的日期時間格式", field),
            "base64" => format!("{}不是有效的 base64 內容", field),
            "email" => format!("{}不是有效的電子郵件", field),
            "url" => format!("{}不是有效的網址", field),
            _ => format!("{}格式不正確", field),
        },
        IssueKind::TooSmall {
            minimum,
            value_type,
        } => {
            if *minimum <= 1 && value_type == "string" {
                format!("{}不可為空", field)
            } else if value_type == "number" {
                format!("{}不可小於 {}", field, minimum)
            } else {
                format!("{}至少需要 {} {}", field, minimum, unit(value_type))
            }
        }
        IssueKind::TooBig {
            maximum,
            value_type,
        } => {
            if value_type == "number" {
                format!("{}不可大於 {}", field, maximum)
            } else {
                format!("{}不可超過 {} {}", field, maximum, unit(value_type))
            }
        }
        IssueKind::InvalidEnumValue { options, .. } => {
            format!("{}必須是以下其中之一：{}", field, options.join("、"))
        }
        IssueKind::InvalidDate => format!("{}不是有效的日期", field),
        IssueKind::Custom => {
            if issue.message.trim().is_empty() {
                format!("{}的內容無效", field)
            } else {
                format!("{}：{}", field, issue.message)
            }
        }
    }
}

/// Whole-failure message: the single issue, or a joined list.
pub fn validation_user_message(failure: &ValidationFailure) -> String {
    match failure.issues.as_slice() {
        [] => INVALID_INPUT.to_string(),
        [issue] => issue_user_message(issue),
        issues => {
            let parts: Vec<String> = issues.iter().map(issue_user_message).collect();
            format!("輸入資料有誤：{}", parts.join("；"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_field_message_names_the_field() {
        let message = issue_user_message(&ValidationIssue::required("title"));
        assert_eq!(message, "「標題」(title)為必填欄位");
    }

    #[test]
    fn unknown_fields_keep_their_path() {
        let issue = ValidationIssue {
            path: vec!["items".into(), "0".into()],
            kind: IssueKind::InvalidDate,
            message: String::new(),
        };
        assert_eq!(issue_user_message(&issue), "「items.0」不是有效的日期");
    }

    #[test]
    fn multiple_issues_are_joined() {
        let failure = ValidationFailure::new(vec![
            ValidationIssue::required("title"),
            ValidationIssue::new(
                "color",
                IssueKind::InvalidEnumValue {
                    options: vec!["red".into(), "blue".into()],
                    received: "pink".into(),
                },
                "bad",
            ),
        ]);
        let message = validation_user_message(&failure);
        assert!(message.starts_with("輸入資料有誤："));
        assert!(message.contains("title"));
        assert!(message.contains("red、blue"));
    }
}
