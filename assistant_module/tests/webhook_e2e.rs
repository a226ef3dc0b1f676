mod test_support;

use assistant_module::service::{AppEnv, REPLY_TOKEN_SENTINEL, WEBHOOK_ACK};
use assistant_module::store::TimeRange;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use chrono_tz::Asia::Taipei;
use mockito::{Matcher, Server};
use serde_json::json;

use test_support::{
    group_source, join_event, plain_answer_response, profile_body, text_event,
    tool_call_response, user_source, webhook_body, TestApp, BOT_USER_ID, FRONTEND,
};

#[tokio::test]
async fn join_pushes_welcome_once_and_writes_nothing() {
    let mut line = Server::new_async().await;
    let openai = Server::new_async().await;
    let push = line
        .mock("POST", "/v2/bot/message/push")
        .match_header("authorization", "Bearer channel-token")
        .match_body(Matcher::PartialJson(json!({ "to": "Gx" })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());

    let (status, body) = app
        .post_webhook(&webhook_body(vec![join_event(json!({
            "type": "group",
            "groupId": "Gx"
        }))]))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], WEBHOOK_ACK);
    push.assert_async().await;
    let counts = app.counts();
    assert_eq!((counts.messages, counts.events, counts.files), (0, 0, 0));
}

#[tokio::test]
async fn personal_text_creates_event_at_local_time_and_replies_with_link() {
    let mut line = Server::new_async().await;
    let mut openai = Server::new_async().await;
    let tomorrow = Utc::now().with_timezone(&Taipei).date_naive() + Duration::days(1);
    let start = format!("{}T15:00:00", tomorrow.format("%Y-%m-%d"));
    let extraction = openai
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("明天下午3點看牙醫".to_string()))
        .with_status(200)
        .with_body(tool_call_response(json!({ "title": "看牙醫", "start": start })))
        .expect(1)
        .create_async()
        .await;
    let reply = line
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("reply-m-100".to_string()),
            Matcher::Regex("quote-m-100".to_string()),
            Matcher::Regex(format!("{}/personal", FRONTEND)),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());

    let (status, body) = app
        .post_webhook(&webhook_body(vec![text_event(
            "m-100",
            user_source("U1"),
            "明天下午3點看牙醫",
        )]))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], WEBHOOK_ACK);
    extraction.assert_async().await;
    reply.assert_async().await;

    let counts = app.counts();
    assert_eq!((counts.messages, counts.events), (1, 1));
    let events = app
        .state
        .store
        .list_personal_events("U1", TimeRange::unbounded())
        .unwrap();
    let expected_start = Taipei
        .from_local_datetime(&tomorrow.and_hms_opt(15, 0, 0).unwrap())
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(events[0].title, "看牙醫");
    assert_eq!(events[0].start, expected_start);
    assert_eq!(events[0].end, expected_start + Duration::hours(1));
    assert!(events[0].group_id.is_none());
    assert_eq!(events[0].message_id.as_deref(), Some("m-100"));

    let message = app
        .state
        .store
        .find_message_by_external_id("m-100")
        .unwrap()
        .unwrap();
    assert_eq!(message.event_id.as_deref(), Some(events[0].id.as_str()));
}

#[tokio::test]
async fn redelivered_message_is_a_no_op() {
    let mut line = Server::new_async().await;
    let mut openai = Server::new_async().await;
    let extraction = openai
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(tool_call_response(json!({
            "title": "開會",
            "start": "2030-01-02T09:00:00"
        })))
        .expect(1)
        .create_async()
        .await;
    let reply = line
        .mock("POST", "/v2/bot/message/reply")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());
    let body = webhook_body(vec![text_event("m-200", user_source("U1"), "1/2 早上九點開會")]);

    let (first, _) = app.post_webhook(&body).await;
    let (second, second_body) = app.post_webhook(&body).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(second_body["status"], WEBHOOK_ACK);
    extraction.assert_async().await;
    reply.assert_async().await;
    let counts = app.counts();
    assert_eq!((counts.messages, counts.events), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_of_one_message_are_processed_once() {
    let mut line = Server::new_async().await;
    let mut openai = Server::new_async().await;
    let extraction = openai
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(tool_call_response(json!({
            "title": "開會",
            "start": "2030-01-03T09:00:00"
        })))
        .expect(1)
        .create_async()
        .await;
    let reply = line
        .mock("POST", "/v2/bot/message/reply")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());
    let event = text_event("m-250", user_source("U1"), "1/3 早上九點開會");
    let batch = webhook_body(vec![event.clone()]);
    let duplicated_batch = webhook_body(vec![event.clone(), event]);

    let ((first, first_body), (second, second_body), (third, third_body)) = tokio::join!(
        app.post_webhook(&batch),
        app.post_webhook(&batch),
        app.post_webhook(&duplicated_batch),
    );

    for (status, body) in [(first, first_body), (second, second_body), (third, third_body)] {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], WEBHOOK_ACK);
    }
    extraction.assert_async().await;
    reply.assert_async().await;
    let counts = app.counts();
    assert_eq!((counts.messages, counts.events), (1, 1));
}

#[tokio::test]
async fn no_extraction_result_yields_fallback_event() {
    let mut line = Server::new_async().await;
    let mut openai = Server::new_async().await;
    openai
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(plain_answer_response("沒有可排程的內容"))
        .create_async()
        .await;
    line.mock("POST", "/v2/bot/message/reply")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());

    let before = Utc::now();
    let (status, _) = app
        .post_webhook(&webhook_body(vec![text_event(
            "m-300",
            user_source("U1"),
            "隨便寫點東西",
        )]))
        .await;
    let after = Utc::now();

    assert_eq!(status, StatusCode::OK);
    let events = app
        .state
        .store
        .list_personal_events("U1", TimeRange::unbounded())
        .unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.title, "隨便寫點東西");
    assert!(!event.all_day);
    assert!(event.start >= before - Duration::seconds(1) && event.start <= after);
    assert_eq!(event.end - event.start, Duration::hours(1));
}

#[tokio::test]
async fn extraction_failure_replies_with_error_and_creates_nothing() {
    let mut line = Server::new_async().await;
    let mut openai = Server::new_async().await;
    openai
        .mock("POST", "/chat/completions")
        .with_status(500)
        .with_body(r#"{"error":{"message":"upstream overloaded"}}"#)
        .create_async()
        .await;
    let reply = line
        .mock("POST", "/v2/bot/message/reply")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());

    let (status, body) = app
        .post_webhook(&webhook_body(vec![text_event(
            "m-350",
            user_source("U1"),
            "下週三晚上聚餐",
        )]))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], WEBHOOK_ACK);
    reply.assert_async().await;
    let counts = app.counts();
    assert_eq!((counts.messages, counts.events), (1, 0));
}

#[tokio::test]
async fn quoted_reply_stitches_both_messages_into_ai_input() {
    let mut line = Server::new_async().await;
    let mut openai = Server::new_async().await;
    let stitched = openai
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("早上九點開會[\\s\\S]*改成十點".to_string()))
        .with_status(200)
        .with_body(plain_answer_response("ok"))
        .expect(1)
        .create_async()
        .await;
    let original = openai
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("早上九點開會".to_string()))
        .with_status(200)
        .with_body(plain_answer_response("ok"))
        .expect(1)
        .create_async()
        .await;
    line.mock("POST", "/v2/bot/message/reply")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());

    app.post_webhook(&webhook_body(vec![text_event(
        "m-400",
        user_source("U1"),
        "早上九點開會",
    )]))
    .await;
    let mut quoting = text_event("m-401", user_source("U1"), "改成十點");
    quoting["message"]["quotedMessageId"] = json!("m-400");
    let (status, _) = app.post_webhook(&webhook_body(vec![quoting])).await;

    assert_eq!(status, StatusCode::OK);
    original.assert_async().await;
    stitched.assert_async().await;
    let quoted = app
        .state
        .store
        .find_message_by_external_id("m-401")
        .unwrap()
        .unwrap();
    assert_eq!(quoted.quoted_message_id.as_deref(), Some("m-400"));
}

#[tokio::test]
async fn group_messages_need_a_mention_and_confirm_with_sender_name() {
    let mut line = Server::new_async().await;
    let mut openai = Server::new_async().await;
    let extraction = openai
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("週五晚上聚餐".to_string()))
        .with_status(200)
        .with_body(tool_call_response(json!({
            "title": "聚餐",
            "start": "2030-03-01T19:00:00",
            "end": "2030-03-01T21:00:00"
        })))
        .expect(1)
        .create_async()
        .await;
    line.mock("GET", "/v2/bot/group/G1/member/U1")
        .with_status(200)
        .with_body(profile_body("U1", "Amy"))
        .create_async()
        .await;
    let reply = line
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("Amy".to_string()),
            Matcher::Regex(format!("{}/group/G1", FRONTEND)),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());

    let chatter = text_event("m-500", group_source("G1", "U1"), "大家晚安");
    let mut mention = text_event("m-501", group_source("G1", "U1"), "@小幫手 週五晚上聚餐");
    mention["message"]["mention"] = json!({
        "mentionees": [{ "index": 0, "length": 4, "userId": BOT_USER_ID }]
    });
    let (status, _) = app.post_webhook(&webhook_body(vec![chatter, mention])).await;

    assert_eq!(status, StatusCode::OK);
    extraction.assert_async().await;
    reply.assert_async().await;
    let counts = app.counts();
    assert_eq!((counts.messages, counts.events), (2, 1));
    let events = app
        .state
        .store
        .list_group_events("G1", TimeRange::unbounded())
        .unwrap();
    assert_eq!(events[0].user_id, "U1");
    assert_eq!(events[0].end - events[0].start, Duration::hours(2));
}

#[tokio::test]
async fn binary_message_is_stored_and_expired_reply_token_settles_as_sentinel() {
    let mut line = Server::new_async().await;
    let openai = Server::new_async().await;
    line.mock("GET", "/v2/bot/message/m-600/content")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(vec![0x89, b'P', b'N', b'G'])
        .create_async()
        .await;
    line.mock("POST", "/v2/bot/message/reply")
        .with_status(400)
        .with_body(r#"{"message":"Invalid reply token"}"#)
        .create_async()
        .await;
    let app = TestApp::new(&line.url(), &openai.url());

    let image = json!({
        "type": "message",
        "replyToken": "reply-m-600",
        "source": user_source("U1"),
        "message": { "id": "m-600", "type": "image" }
    });
    let (status, body) = app.post_webhook(&webhook_body(vec![image])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], REPLY_TOKEN_SENTINEL);
    let files = app.state.store.list_personal_files("U1").unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "image-m-600.png");
    assert_eq!(files[0].size_bytes, 4);
    assert_eq!(files[0].message_id.as_deref(), Some("m-600"));
    let stored = app.state.blobs.get(&files[0].storage_key).await.unwrap();
    assert_eq!(stored, vec![0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn unsigned_or_tampered_webhooks_are_rejected() {
    let line = Server::new_async().await;
    let openai = Server::new_async().await;
    let app = TestApp::new(&line.url(), &openai.url());

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("x-line-signature", "bm90LWEtc2lnbmF0dXJl")
        .body(Body::from(webhook_body(Vec::new()).to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "invalid_signature");
    assert_eq!(app.counts().messages, 0);
}

#[tokio::test]
async fn missing_configuration_fails_before_processing() {
    let line = Server::new_async().await;
    let openai = Server::new_async().await;
    let temp = tempfile::TempDir::new().unwrap();
    let app = TestApp::with_config(temp, |temp| {
        let mut config = test_support::test_config(temp, &line.url(), &openai.url());
        config.openai_api_key = None;
        config
    });

    let (status, body) = app
        .post_webhook(&webhook_body(vec![text_event("m-700", user_source("U1"), "hi")]))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["type"], "internal");
    assert_eq!(body["code"], "CONFIG_MISSING");
    assert_eq!(app.counts().messages, 0);
}

#[tokio::test]
async fn development_without_secret_accepts_unsigned_webhooks() {
    let mut line = Server::new_async().await;
    let openai = Server::new_async().await;
    let push = line
        .mock("POST", "/v2/bot/message/push")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let temp = tempfile::TempDir::new().unwrap();
    let app = TestApp::with_config(temp, |temp| {
        let mut config = test_support::test_config(temp, &line.url(), &openai.url());
        config.app_env = AppEnv::Development;
        config.line_channel_secret = None;
        config
    });

    let body = webhook_body(vec![join_event(json!({ "type": "room", "roomId": "R1" }))]);
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], WEBHOOK_ACK);
    push.assert_async().await;
}
