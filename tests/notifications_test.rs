//! Role broadcasts against a mocked Bot API
//!
//! Run with: cargo test --test notifications_test

mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::temp_pool;
use kasabot::core::Role;
use kasabot::reconcile::Notifier;
use kasabot::storage::db::{add_role, add_user, NewUser};
use kasabot::storage::{get_connection, DbPool};
use kasabot::telegram::{Bot, Broadcaster, TelegramNotifier};

fn sent_message(chat_id: i64) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "result": {
            "message_id": 42,
            "from": {"id": 987654321, "is_bot": true, "first_name": "KasaBot"},
            "chat": {"id": chat_id, "type": "private", "first_name": "Test"},
            "date": 1735992000,
            "text": "ok"
        }
    })
}

fn register(pool: &DbPool, user_id: i64, role: Role) {
    let conn = get_connection(pool).unwrap();
    add_user(
        &conn,
        &NewUser {
            user_id,
            phone_number: format!("+38050000000{}", user_id),
            first_name: Some("Test".to_string()),
            last_name: None,
        },
    )
    .unwrap();
    add_role(&conn, user_id, role).unwrap();
}

fn bot(server: &MockServer) -> Bot {
    Bot::new("123456:TEST").set_api_url(server.uri().parse().unwrap())
}

async fn sent_chat_ids(server: &MockServer) -> Vec<i64> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
        .filter_map(|body| body["chat_id"].as_i64())
        .collect()
}

#[tokio::test]
async fn test_broadcast_reaches_role_holders_except_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex("(?i)/bot[^/]+/sendmessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sent_message(1)))
        .mount(&server)
        .await;

    let (_dir, pool) = temp_pool();
    register(&pool, 1, Role::Supervisor);
    register(&pool, 2, Role::Supervisor);
    register(&pool, 3, Role::Cashier);

    let broadcaster = Broadcaster::new(bot(&server), Arc::new(pool));
    let delivered = broadcaster.broadcast(Role::Supervisor, "Зміну закрито", Some(2)).await;

    assert_eq!(delivered, 1);
    assert_eq!(sent_chat_ids(&server).await, vec![1]);
}

#[tokio::test]
async fn test_notifier_without_supervisors_is_not_an_error() {
    let server = MockServer::start().await;
    let (_dir, pool) = temp_pool();
    register(&pool, 7, Role::Admin);

    let notifier = TelegramNotifier::new(Broadcaster::new(bot(&server), Arc::new(pool)));

    assert!(notifier.notify("💸 Безготівкове зарахування: 10.00 грн").await.is_ok());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_notifier_fails_when_nobody_received_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex("(?i)/bot[^/]+/sendmessage"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        })))
        .mount(&server)
        .await;

    let (_dir, pool) = temp_pool();
    register(&pool, 5, Role::Supervisor);

    let notifier = TelegramNotifier::new(Broadcaster::new(bot(&server), Arc::new(pool)));

    assert!(notifier.notify("💸 Безготівкове зарахування: 10.00 грн").await.is_err());
}
