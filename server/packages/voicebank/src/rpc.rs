//! The remote-callable method registry for one room connection.
//!
//! Exactly three methods exist for the life of a connection:
//! `chooseAccount`, `requestPayeeAccNo`, `requestTpin`. Each handler parses
//! its payload leniently, funnels into the prompt state machine, and returns
//! a future that suspends until the operator acts. Teardown unbinds all
//! three atomically; calls racing the teardown are rejected with a
//! connection-closed error instead of being silently dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};
use voicebank_error::VoicebankError;

use crate::prompt::{PromptBridge, PromptEvent, PromptRequest};
use crate::protocol::{self, InputField};

pub const METHOD_CHOOSE_ACCOUNT: &str = "chooseAccount";
pub const METHOD_REQUEST_PAYEE_ACC_NO: &str = "requestPayeeAccNo";
pub const METHOD_REQUEST_TPIN: &str = "requestTpin";

pub const METHODS: [&str; 3] = [
    METHOD_CHOOSE_ACCOUNT,
    METHOD_REQUEST_PAYEE_ACC_NO,
    METHOD_REQUEST_TPIN,
];

type RpcHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<String, VoicebankError>> + Send + Sync>;

/// Per-connection bridge settings.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// When set, an unanswered prompt resolves with the cancellation
    /// sentinel after this long. `None` preserves indefinite suspension:
    /// an operator who never responds leaves the agent's call parked.
    pub prompt_timeout: Option<Duration>,
}

#[derive(Default)]
struct Bindings {
    handlers: HashMap<&'static str, RpcHandler>,
}

pub struct RpcRegistry {
    bindings: Mutex<Bindings>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRegistry")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RpcRegistry {
    fn new() -> Self {
        Self {
            bindings: Mutex::new(Bindings::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn register(&self, method: &'static str, handler: RpcHandler) {
        self.bindings.lock().unwrap().handlers.insert(method, handler);
    }

    /// Removes every binding under one lock and marks the registry closed.
    fn unregister_all(&self) {
        let mut bindings = self.bindings.lock().unwrap();
        self.closed.store(true, Ordering::SeqCst);
        bindings.handlers.clear();
    }

    fn lookup(&self, method: &str) -> Result<RpcHandler, VoicebankError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoicebankError::ConnectionClosed {
                method: Some(method.to_string()),
            });
        }
        let bindings = self.bindings.lock().unwrap();
        bindings
            .handlers
            .get(method)
            .cloned()
            .ok_or_else(|| VoicebankError::InvalidRequest {
                message: format!("unknown rpc method: {method}"),
            })
    }
}

/// One active room connection: the registry bindings, the prompt state
/// machine, and the surface event stream, created and destroyed together.
/// Never shared across rooms.
#[derive(Debug)]
pub struct RoomConnection {
    registry: RpcRegistry,
    bridge: Arc<PromptBridge>,
}

impl RoomConnection {
    /// Binds the three methods and hands back the surface event stream the
    /// UI renders prompts from.
    pub fn connect(config: BridgeConfig) -> (Self, mpsc::UnboundedReceiver<PromptEvent>) {
        let (bridge, events) = PromptBridge::new();
        let bridge = Arc::new(bridge);
        let registry = RpcRegistry::new();
        let timeout = config.prompt_timeout;

        {
            let bridge = bridge.clone();
            registry.register(
                METHOD_CHOOSE_ACCOUNT,
                Arc::new(move |payload: String| {
                    let bridge = bridge.clone();
                    async move {
                        let params = protocol::parse_choose_account(&payload);
                        let request = PromptRequest::ChooseAccount {
                            prompt: params
                                .prompt
                                .unwrap_or_else(|| "Choose an account".to_string()),
                            accounts: params.accounts,
                        };
                        let receiver = bridge.begin(request, METHOD_CHOOSE_ACCOUNT)?;
                        await_reply(bridge, receiver, timeout, METHOD_CHOOSE_ACCOUNT).await
                    }
                    .boxed()
                }),
            );
        }
        for (method, field) in [
            (METHOD_REQUEST_PAYEE_ACC_NO, InputField::AccountNumber),
            (METHOD_REQUEST_TPIN, InputField::Tpin),
        ] {
            let bridge = bridge.clone();
            registry.register(
                method,
                Arc::new(move |payload: String| {
                    let bridge = bridge.clone();
                    async move {
                        let params = protocol::parse_input_request(&payload);
                        let request = PromptRequest::InputField {
                            field,
                            title: field.title().to_string(),
                            description: params
                                .description
                                .unwrap_or_else(|| field.default_description().to_string()),
                        };
                        let receiver = bridge.begin(request, method)?;
                        await_reply(bridge, receiver, timeout, method).await
                    }
                    .boxed()
                }),
            );
        }

        (Self { registry, bridge }, events)
    }

    /// Operator-side handle for resolving prompts.
    pub fn bridge(&self) -> &Arc<PromptBridge> {
        &self.bridge
    }

    /// Agent-side entry point: invoke a named method with an opaque payload
    /// string and suspend until the operator acts.
    pub async fn call(&self, method: &str, payload: &str) -> Result<String, VoicebankError> {
        let handler = self.registry.lookup(method)?;
        handler(payload.to_string()).await
    }

    /// Tears the connection down: unbinds all methods atomically and errors
    /// out any call still suspended on a pending prompt.
    pub fn close(&self) {
        self.registry.unregister_all();
        self.bridge.abort_pending();
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn await_reply(
    bridge: Arc<PromptBridge>,
    mut receiver: oneshot::Receiver<String>,
    timeout: Option<Duration>,
    method: &'static str,
) -> Result<String, VoicebankError> {
    let closed = |_| VoicebankError::ConnectionClosed {
        method: Some(method.to_string()),
    };
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut receiver).await {
            Ok(reply) => reply.map_err(closed),
            Err(_elapsed) => {
                // The operator may resolve in the same instant; expire_pending
                // is a no-op then and the receiver already holds the reply.
                bridge.expire_pending();
                receiver.await.map_err(closed)
            }
        },
        None => receiver.await.map_err(closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_exactly_the_three_methods() {
        let (room, _events) = RoomConnection::connect(BridgeConfig::default());
        let err = room.call("transferFunds", "{}").await.unwrap_err();
        assert!(matches!(err, VoicebankError::InvalidRequest { .. }));
        for method in METHODS {
            assert!(room.registry.lookup(method).is_ok());
        }
    }

    #[tokio::test]
    async fn calls_after_close_are_rejected_not_dropped() {
        let (room, _events) = RoomConnection::connect(BridgeConfig::default());
        room.close();
        for method in METHODS {
            let err = room.call(method, "{}").await.unwrap_err();
            assert!(
                matches!(err, VoicebankError::ConnectionClosed { .. }),
                "{method} not rejected"
            );
        }
    }

    #[tokio::test]
    async fn close_errors_out_a_suspended_call() {
        let (room, _events) = RoomConnection::connect(BridgeConfig::default());
        let room = Arc::new(room);

        let call = {
            let room = room.clone();
            tokio::spawn(async move { room.call(METHOD_REQUEST_TPIN, "{}").await })
        };
        while !room.bridge().is_awaiting() {
            tokio::task::yield_now().await;
        }

        room.close();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, VoicebankError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn unanswered_prompt_times_out_with_sentinel() {
        let (room, mut events) = RoomConnection::connect(BridgeConfig {
            prompt_timeout: Some(Duration::from_millis(20)),
        });
        let reply = room.call(METHOD_REQUEST_TPIN, "{}").await.unwrap();
        assert_eq!(reply, r#"{"tpin":"-1"}"#);
        assert!(!room.bridge().is_awaiting());
        assert!(matches!(events.try_recv().unwrap(), PromptEvent::Opened(_)));
        assert_eq!(events.try_recv().unwrap(), PromptEvent::Dismissed);
    }

    #[tokio::test]
    async fn malformed_payload_degrades_to_empty_account_list() {
        let (room, mut events) = RoomConnection::connect(BridgeConfig::default());
        let room = Arc::new(room);

        let call = {
            let room = room.clone();
            tokio::spawn(async move { room.call(METHOD_CHOOSE_ACCOUNT, "not json").await })
        };
        while !room.bridge().is_awaiting() {
            tokio::task::yield_now().await;
        }

        match events.try_recv().unwrap() {
            PromptEvent::Opened(PromptRequest::ChooseAccount { accounts, .. }) => {
                assert!(accounts.is_empty());
            }
            other => panic!("unexpected surface event: {other:?}"),
        }

        // Only Cancel is available with no options.
        room.bridge().cancel().unwrap();
        assert_eq!(call.await.unwrap().unwrap(), r#"{"accountId":"-1"}"#);
    }
}
