use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use voicebank::prompt::{PromptEvent, PromptRequest};
use voicebank::rpc::{
    BridgeConfig, RoomConnection, METHOD_CHOOSE_ACCOUNT, METHOD_REQUEST_PAYEE_ACC_NO,
    METHOD_REQUEST_TPIN,
};
use voicebank_error::VoicebankError;

async fn wait_until_awaiting(room: &RoomConnection) {
    while !room.bridge().is_awaiting() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn choose_account_round_trip() {
    let (room, mut events) = RoomConnection::connect(BridgeConfig::default());
    let room = Arc::new(room);

    let payload = json!({
        "prompt": "Choose the source account",
        "accounts": [
            { "id": "acc1", "nickname": "Salary", "type": "Savings", "last4": "2222" },
            { "id": "acc2", "nickname": "Household", "type": "Current", "last4": "8844" }
        ]
    })
    .to_string();

    let call = {
        let room = room.clone();
        tokio::spawn(async move { room.call(METHOD_CHOOSE_ACCOUNT, &payload).await })
    };
    wait_until_awaiting(&room).await;

    match events.try_recv().expect("surface event") {
        PromptEvent::Opened(PromptRequest::ChooseAccount { prompt, accounts }) => {
            assert_eq!(prompt, "Choose the source account");
            assert_eq!(accounts.len(), 2);
            assert_eq!(accounts[0].id, "acc1");
        }
        other => panic!("unexpected surface event: {other:?}"),
    }

    room.bridge().select_account("acc1").expect("select");
    let reply = call.await.expect("join").expect("call result");
    assert_eq!(reply, r#"{"accountId":"acc1"}"#);
    assert_eq!(events.try_recv().expect("dismissal"), PromptEvent::Dismissed);
    assert!(!room.bridge().is_awaiting());
}

#[tokio::test]
async fn invalid_tpin_is_retried_then_cancelled() {
    let (room, mut events) = RoomConnection::connect(BridgeConfig::default());
    let room = Arc::new(room);

    let call = {
        let room = room.clone();
        tokio::spawn(async move { room.call(METHOD_REQUEST_TPIN, "{}").await })
    };
    wait_until_awaiting(&room).await;

    let err = room.bridge().submit_input("12a4").expect_err("malformed pin");
    assert!(matches!(err, VoicebankError::InvalidRequest { .. }));
    assert!(room.bridge().is_awaiting());

    room.bridge().cancel().expect("cancel");
    let reply = call.await.expect("join").expect("call result");
    assert_eq!(reply, r#"{"tpin":"-1"}"#);

    assert!(matches!(
        events.try_recv().expect("opened"),
        PromptEvent::Opened(PromptRequest::InputField { .. })
    ));
    assert_eq!(events.try_recv().expect("dismissal"), PromptEvent::Dismissed);
}

#[tokio::test]
async fn payee_account_number_round_trip() {
    let (room, mut events) = RoomConnection::connect(BridgeConfig::default());
    let room = Arc::new(room);

    let payload = json!({ "description": "Enter Sujal's account number" }).to_string();
    let call = {
        let room = room.clone();
        tokio::spawn(async move { room.call(METHOD_REQUEST_PAYEE_ACC_NO, &payload).await })
    };
    wait_until_awaiting(&room).await;

    match events.try_recv().expect("surface event") {
        PromptEvent::Opened(PromptRequest::InputField { description, .. }) => {
            assert_eq!(description, "Enter Sujal's account number");
        }
        other => panic!("unexpected surface event: {other:?}"),
    }

    room.bridge().submit_input("44445555").expect("submit");
    let reply = call.await.expect("join").expect("call result");
    assert_eq!(reply, r#"{"accountNumber":"44445555"}"#);
}

#[tokio::test]
async fn cancellation_resolves_every_method_with_its_sentinel() {
    let (room, _events) = RoomConnection::connect(BridgeConfig::default());
    let room = Arc::new(room);

    let expectations = [
        (METHOD_CHOOSE_ACCOUNT, r#"{"accountId":"-1"}"#),
        (METHOD_REQUEST_PAYEE_ACC_NO, r#"{"accountNumber":"-1"}"#),
        (METHOD_REQUEST_TPIN, r#"{"tpin":"-1"}"#),
    ];
    for (method, expected) in expectations {
        let call = {
            let room = room.clone();
            tokio::spawn(async move { room.call(method, "{}").await })
        };
        wait_until_awaiting(&room).await;

        room.bridge().cancel().expect("cancel");
        let reply = call.await.expect("join").expect("call result");
        assert_eq!(reply, expected, "{method}");
        assert!(!room.bridge().is_awaiting());
    }
}

#[tokio::test]
async fn concurrent_second_call_is_rejected_busy() {
    let (room, _events) = RoomConnection::connect(BridgeConfig::default());
    let room = Arc::new(room);

    let first = {
        let room = room.clone();
        tokio::spawn(async move { room.call(METHOD_REQUEST_TPIN, "{}").await })
    };
    wait_until_awaiting(&room).await;

    let err = room
        .call(METHOD_CHOOSE_ACCOUNT, "{}")
        .await
        .expect_err("second call while pending");
    assert!(matches!(err, VoicebankError::PromptBusy { .. }));

    // The first call is still live and resolves normally.
    room.bridge().submit_input("1234").expect("submit");
    let reply = first.await.expect("join").expect("call result");
    assert_eq!(reply, r#"{"tpin":"1234"}"#);
}

#[tokio::test]
async fn replies_arrive_in_request_order() {
    let (room, _events) = RoomConnection::connect(BridgeConfig::default());
    let room = Arc::new(room);

    let mut replies = Vec::new();
    for (method, answer) in [(METHOD_REQUEST_TPIN, "1111"), (METHOD_REQUEST_PAYEE_ACC_NO, "22223333")] {
        let call = {
            let room = room.clone();
            tokio::spawn(async move { room.call(method, "{}").await })
        };
        wait_until_awaiting(&room).await;
        room.bridge().submit_input(answer).expect("submit");
        replies.push(call.await.expect("join").expect("call result"));
    }

    assert_eq!(replies[0], r#"{"tpin":"1111"}"#);
    assert_eq!(replies[1], r#"{"accountNumber":"22223333"}"#);
}

#[tokio::test]
async fn teardown_rejects_in_flight_and_later_calls() {
    let (room, _events) = RoomConnection::connect(BridgeConfig::default());
    let room = Arc::new(room);

    let suspended = {
        let room = room.clone();
        tokio::spawn(async move { room.call(METHOD_CHOOSE_ACCOUNT, "{}").await })
    };
    wait_until_awaiting(&room).await;

    room.close();

    let err = suspended.await.expect("join").expect_err("in-flight call");
    assert!(matches!(err, VoicebankError::ConnectionClosed { .. }));

    let err = room
        .call(METHOD_REQUEST_TPIN, "{}")
        .await
        .expect_err("call after close");
    assert!(matches!(err, VoicebankError::ConnectionClosed { .. }));

    // Operator actions after teardown see an idle slot.
    assert!(matches!(
        room.bridge().cancel().expect_err("cancel after close"),
        VoicebankError::NoPromptPending
    ));
}

#[tokio::test]
async fn configured_timeout_resolves_with_the_sentinel() {
    let (room, _events) = RoomConnection::connect(BridgeConfig {
        prompt_timeout: Some(Duration::from_millis(10)),
    });
    let reply = room
        .call(METHOD_REQUEST_PAYEE_ACC_NO, "{}")
        .await
        .expect("call result");
    assert_eq!(reply, r#"{"accountNumber":"-1"}"#);

    // The slot is reusable after a timeout.
    let reply = room.call(METHOD_REQUEST_TPIN, "{}").await.expect("call result");
    assert_eq!(reply, r#"{"tpin":"-1"}"#);
}

#[tokio::test]
async fn each_connection_has_an_isolated_prompt_slot() {
    let (first, _first_events) = RoomConnection::connect(BridgeConfig::default());
    let (second, _second_events) = RoomConnection::connect(BridgeConfig::default());
    let first = Arc::new(first);

    let call = {
        let first = first.clone();
        tokio::spawn(async move { first.call(METHOD_REQUEST_TPIN, "{}").await })
    };
    wait_until_awaiting(&first).await;

    // The other room is untouched by the pending prompt.
    assert!(!second.bridge().is_awaiting());
    assert!(matches!(
        second.bridge().cancel().expect_err("idle room"),
        VoicebankError::NoPromptPending
    ));

    first.bridge().submit_input("4321").expect("submit");
    assert_eq!(
        call.await.expect("join").expect("call result"),
        r#"{"tpin":"4321"}"#
    );
}
