use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use chrono_tz::Tz;
use send_messages_module::{Message, MessagingError};
use tracing::{debug, warn};

use crate::adapters::{EventSource, MessageEvent, SourceKind};
use crate::models::CalendarEvent;

use super::super::state::AppState;

/// Management page for the event's scope, when a frontend is configured.
pub fn deep_link(frontend_base_url: Option<&str>, group_id: Option<&str>) -> Option<String> {
    let base = frontend_base_url?.trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    Some(match group_id {
        Some(group_id) => format!("{}/group/{}", base, urlencoding::encode(group_id)),
        None => format!("{}/personal", base),
    })
}

fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "一",
        Weekday::Tue => "二",
        Weekday::Wed => "三",
        Weekday::Thu => "四",
        Weekday::Fri => "五",
        Weekday::Sat => "六",
        Weekday::Sun => "日",
    }
}

fn format_day(at: DateTime<Tz>) -> String {
    format!("{}（{}）", at.format("%Y/%m/%d"), weekday_label(at.weekday()))
}

fn format_time_range(event: &CalendarEvent, timezone: Tz) -> String {
    let start = event.start.with_timezone(&timezone);
    let end = event.end.with_timezone(&timezone);
    if event.all_day {
        let last = (event.end - Duration::seconds(1)).with_timezone(&timezone);
        if last.date_naive() <= start.date_naive() {
            return format!("{} 全天", format_day(start));
        }
        return format!("{} – {} 全天", format_day(start), format_day(last));
    }
    if start.date_naive() == end.date_naive() {
        format!(
            "{} {}–{}",
            format_day(start),
            start.format("%H:%M"),
            end.format("%H:%M")
        )
    } else {
        format!(
            "{} {} – {} {}",
            format_day(start),
            start.format("%H:%M"),
            format_day(end),
            end.format("%H:%M")
        )
    }
}

/// Localized confirmation for a newly created event.
pub fn confirmation_text(
    event: &CalendarEvent,
    timezone: Tz,
    frontend_base_url: Option<&str>,
    display_name: Option<&str>,
) -> String {
    let mut lines = vec![
        format!("已新增行程：{}", event.title),
        format!("時間：{}", format_time_range(event, timezone)),
    ];
    if let Some(location) = event.location.as_deref() {
        lines.push(format!("地點：{}", location));
    }
    if let Some(name) = display_name {
        lines.push(format!("建立者：{}", name));
    }
    if let Some(link) = deep_link(frontend_base_url, event.group_id.as_deref()) {
        lines.push(format!("管理行程：{}", link));
    }
    lines.join("\n")
}

pub(super) fn file_saved_text(
    file_name: &str,
    frontend_base_url: Option<&str>,
    group_id: Option<&str>,
) -> String {
    match deep_link(frontend_base_url, group_id) {
        Some(link) => format!("已儲存檔案：{}\n管理檔案：{}", file_name, link),
        None => format!("已儲存檔案：{}", file_name),
    }
}

/// Reply to the triggering message, quoting it when possible.
pub(super) async fn try_reply(
    state: &AppState,
    event: &MessageEvent,
    text: String,
) -> Result<(), MessagingError> {
    let Some(reply_token) = event.reply_token.as_deref() else {
        debug!("message {} has no reply token", event.external_id);
        return Ok(());
    };
    state
        .line
        .reply_message(
            reply_token,
            &[Message::quoted_text(text, event.quote_token.clone())],
        )
        .await
}

/// Reply and swallow any failure.
pub(super) async fn reply_best_effort(state: &AppState, event: &MessageEvent, text: String) {
    if let Err(err) = try_reply(state, event, text).await {
        warn!("reply to message {} failed: {}", event.external_id, err);
    }
}

/// Sender's display name within a group or room; `None` on any failure.
pub(super) async fn display_name(state: &AppState, source: &EventSource) -> Option<String> {
    let user_id = source.user_id.as_deref()?;
    let chat_id = source.chat_id.as_deref()?;
    let result = match source.kind {
        SourceKind::Group => state.line.get_group_member_profile(chat_id, user_id).await,
        SourceKind::Room => state.line.get_room_member_profile(chat_id, user_id).await,
        SourceKind::User => return None,
    };
    match result {
        Ok(profile) => Some(profile.display_name).filter(|name| !name.is_empty()),
        Err(err) => {
            warn!("display name lookup for {} failed: {}", user_id, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Taipei;

    fn event(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        all_day: bool,
        group_id: Option<&str>,
    ) -> CalendarEvent {
        CalendarEvent {
            id: "e-1".into(),
            title: "看牙醫".into(),
            description: None,
            start,
            end,
            all_day,
            color: None,
            label: None,
            location: Some("台北".into()),
            completed: false,
            user_id: "U1".into(),
            group_id: group_id.map(str::to_string),
            message_id: Some("m-1".into()),
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn deep_links_follow_scope() {
        assert_eq!(
            deep_link(Some("https://cal.example.com/"), None).as_deref(),
            Some("https://cal.example.com/personal")
        );
        assert_eq!(
            deep_link(Some("https://cal.example.com"), Some("C 1")).as_deref(),
            Some("https://cal.example.com/group/C%201")
        );
        assert_eq!(deep_link(None, None), None);
    }

    #[test]
    fn timed_confirmation_uses_local_time() {
        let start = Utc.with_ymd_and_hms(2026, 10, 20, 7, 0, 0).unwrap();
        let text = confirmation_text(
            &event(start, start + Duration::hours(1), false, None),
            Taipei,
            Some("https://cal.example.com"),
            None,
        );
        assert!(text.contains("看牙醫"));
        assert!(text.contains("2026/10/20（二） 15:00–16:00"));
        assert!(text.contains("地點：台北"));
        assert!(text.contains("https://cal.example.com/personal"));
    }

    #[test]
    fn all_day_and_group_confirmation() {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 16, 0, 0).unwrap();
        let text = confirmation_text(
            &event(start, start + Duration::days(1), true, Some("G1")),
            Taipei,
            Some("https://cal.example.com"),
            Some("Amy"),
        );
        assert!(text.contains("2026/10/20（二） 全天"));
        assert!(text.contains("建立者：Amy"));
        assert!(text.contains("/group/G1"));
    }
}
