//! The pending-prompt state machine.
//!
//! One `PromptBridge` exists per room connection and owns the single
//! "pending prompt" slot: `Idle -> AwaitingResponse -> Idle`, with no
//! terminal state. An inbound RPC call enters `AwaitingResponse` by parking
//! a completion channel in the slot; the operator's action (select, submit,
//! cancel) is the only writer that resolves it. The slot doubles as the
//! mutual-exclusion primitive: a second call while one is pending is
//! rejected with a busy error rather than queued, since the UI can surface
//! only one modal prompt.

use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use voicebank_error::VoicebankError;

use crate::protocol::{
    self, account_reply, field_reply, InputField, MaskedAccount, CANCEL_SENTINEL,
};

/// A single outstanding request for operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptRequest {
    ChooseAccount {
        prompt: String,
        accounts: Vec<MaskedAccount>,
    },
    InputField {
        field: InputField,
        title: String,
        description: String,
    },
}

/// Surface notifications for the UI layer. `Opened` is the only point at
/// which a modal becomes visible; `Dismissed` is the only point at which it
/// is torn down and transient input buffers must be cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEvent {
    Opened(PromptRequest),
    Dismissed,
}

#[derive(Debug)]
struct PendingPrompt {
    request: PromptRequest,
    responder: oneshot::Sender<String>,
}

#[derive(Debug)]
pub struct PromptBridge {
    slot: Mutex<Option<PendingPrompt>>,
    surface: mpsc::UnboundedSender<PromptEvent>,
}

impl PromptBridge {
    /// Creates a bridge and the surface event stream the UI renders from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PromptEvent>) {
        let (surface, events) = mpsc::unbounded_channel();
        (
            Self {
                slot: Mutex::new(None),
                surface,
            },
            events,
        )
    }

    pub fn is_awaiting(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// Accepts a request into `AwaitingResponse` and returns the channel the
    /// original RPC call suspends on. Rejects with `PromptBusy` if a prompt
    /// is already pending.
    pub fn begin(
        &self,
        request: PromptRequest,
        method: &str,
    ) -> Result<oneshot::Receiver<String>, VoicebankError> {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            tracing::warn!(method, "rejecting rpc call while a prompt is pending");
            return Err(VoicebankError::PromptBusy {
                method: method.to_string(),
            });
        }
        let (responder, receiver) = oneshot::channel();
        *slot = Some(PendingPrompt {
            request: request.clone(),
            responder,
        });
        let _ = self.surface.send(PromptEvent::Opened(request));
        Ok(receiver)
    }

    /// Operator picked an account in a `ChooseAccount` prompt.
    pub fn select_account(&self, account_id: &str) -> Result<(), VoicebankError> {
        let mut slot = self.slot.lock().unwrap();
        match slot.as_ref().map(|pending| &pending.request) {
            None => return Err(VoicebankError::NoPromptPending),
            Some(PromptRequest::InputField { .. }) => {
                return Err(VoicebankError::InvalidRequest {
                    message: "pending prompt is not an account selection".to_string(),
                })
            }
            Some(PromptRequest::ChooseAccount { .. }) => {}
        }
        self.resolve(&mut slot, account_reply(account_id));
        Ok(())
    }

    /// Operator submitted a value for an `InputField` prompt. Validation
    /// failures reject the submission locally and leave the prompt pending;
    /// no reply crosses the bridge.
    pub fn submit_input(&self, value: &str) -> Result<(), VoicebankError> {
        let mut slot = self.slot.lock().unwrap();
        let field = match slot.as_ref().map(|pending| &pending.request) {
            None => return Err(VoicebankError::NoPromptPending),
            Some(PromptRequest::ChooseAccount { .. }) => {
                return Err(VoicebankError::InvalidRequest {
                    message: "pending prompt is an account selection".to_string(),
                })
            }
            Some(PromptRequest::InputField { field, .. }) => *field,
        };
        if field == InputField::Tpin && !protocol::is_valid_tpin(value) {
            return Err(VoicebankError::InvalidRequest {
                message: "transaction PIN must be exactly 4 digits".to_string(),
            });
        }
        self.resolve(&mut slot, field_reply(field, value));
        Ok(())
    }

    /// Operator cancelled the prompt. Resolves (never rejects) the held call
    /// with the refusal sentinel so the agent always sees a well-formed
    /// payload.
    pub fn cancel(&self) -> Result<(), VoicebankError> {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            return Err(VoicebankError::NoPromptPending);
        }
        self.resolve_cancelled(&mut slot);
        Ok(())
    }

    /// Resolves a still-pending prompt with the sentinel. No-op when idle;
    /// used by the timeout path, which may race a regular resolution.
    pub(crate) fn expire_pending(&self) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            tracing::info!("prompt timed out, resolving with cancellation sentinel");
            self.resolve_cancelled(&mut slot);
        }
    }

    /// Drops a pending prompt without producing a reply, erroring the
    /// suspended call's receiver. Teardown only.
    pub(crate) fn abort_pending(&self) {
        let mut slot = self.slot.lock().unwrap();
        if slot.take().is_some() {
            let _ = self.surface.send(PromptEvent::Dismissed);
        }
    }

    fn resolve_cancelled(&self, slot: &mut Option<PendingPrompt>) {
        let payload = match slot.as_ref().map(|pending| &pending.request) {
            Some(PromptRequest::ChooseAccount { .. }) => account_reply(CANCEL_SENTINEL),
            Some(PromptRequest::InputField { field, .. }) => field_reply(*field, CANCEL_SENTINEL),
            None => return,
        };
        self.resolve(slot, payload);
    }

    fn resolve(&self, slot: &mut Option<PendingPrompt>, payload: String) {
        if let Some(pending) = slot.take() {
            // The receiver may have gone away (connection teardown mid-reply);
            // the slot is cleared either way.
            let _ = pending.responder.send(payload);
            let _ = self.surface.send(PromptEvent::Dismissed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choose_account_request(accounts: Vec<MaskedAccount>) -> PromptRequest {
        PromptRequest::ChooseAccount {
            prompt: "Choose an account".to_string(),
            accounts,
        }
    }

    fn tpin_request() -> PromptRequest {
        PromptRequest::InputField {
            field: InputField::Tpin,
            title: InputField::Tpin.title().to_string(),
            description: InputField::Tpin.default_description().to_string(),
        }
    }

    #[tokio::test]
    async fn select_resolves_the_suspended_call() {
        let (bridge, mut events) = PromptBridge::new();
        let rx = bridge
            .begin(choose_account_request(vec![]), "chooseAccount")
            .unwrap();
        assert!(bridge.is_awaiting());

        bridge.select_account("acc1").unwrap();
        assert_eq!(rx.await.unwrap(), r#"{"accountId":"acc1"}"#);
        assert!(!bridge.is_awaiting());

        assert!(matches!(
            events.try_recv().unwrap(),
            PromptEvent::Opened(_)
        ));
        assert_eq!(events.try_recv().unwrap(), PromptEvent::Dismissed);
    }

    #[tokio::test]
    async fn second_begin_is_rejected_busy() {
        let (bridge, _events) = PromptBridge::new();
        let rx = bridge.begin(tpin_request(), "requestTpin").unwrap();

        let err = bridge
            .begin(choose_account_request(vec![]), "chooseAccount")
            .unwrap_err();
        assert!(matches!(err, VoicebankError::PromptBusy { .. }));

        // The first call is untouched by the rejection.
        bridge.submit_input("1234").unwrap();
        assert_eq!(rx.await.unwrap(), r#"{"tpin":"1234"}"#);
    }

    #[tokio::test]
    async fn invalid_tpin_stays_awaiting_and_sends_nothing() {
        let (bridge, _events) = PromptBridge::new();
        let mut rx = bridge.begin(tpin_request(), "requestTpin").unwrap();

        for bad in ["12a4", "123", "12345", ""] {
            let err = bridge.submit_input(bad).unwrap_err();
            assert!(matches!(err, VoicebankError::InvalidRequest { .. }));
            assert!(bridge.is_awaiting(), "{bad:?} cleared the slot");
            assert!(rx.try_recv().is_err(), "{bad:?} produced a reply");
        }

        bridge.cancel().unwrap();
        assert_eq!(rx.await.unwrap(), r#"{"tpin":"-1"}"#);
    }

    #[tokio::test]
    async fn cancel_uses_the_field_specific_sentinel() {
        let (bridge, _events) = PromptBridge::new();

        let rx = bridge
            .begin(choose_account_request(vec![]), "chooseAccount")
            .unwrap();
        bridge.cancel().unwrap();
        assert_eq!(rx.await.unwrap(), r#"{"accountId":"-1"}"#);

        let rx = bridge
            .begin(
                PromptRequest::InputField {
                    field: InputField::AccountNumber,
                    title: InputField::AccountNumber.title().to_string(),
                    description: String::new(),
                },
                "requestPayeeAccNo",
            )
            .unwrap();
        bridge.cancel().unwrap();
        assert_eq!(rx.await.unwrap(), r#"{"accountNumber":"-1"}"#);
    }

    #[tokio::test]
    async fn operator_actions_on_idle_slot_are_errors() {
        let (bridge, _events) = PromptBridge::new();
        assert!(matches!(
            bridge.select_account("acc1").unwrap_err(),
            VoicebankError::NoPromptPending
        ));
        assert!(matches!(
            bridge.submit_input("1234").unwrap_err(),
            VoicebankError::NoPromptPending
        ));
        assert!(matches!(
            bridge.cancel().unwrap_err(),
            VoicebankError::NoPromptPending
        ));
    }

    #[tokio::test]
    async fn wrong_action_for_prompt_kind_keeps_it_pending() {
        let (bridge, _events) = PromptBridge::new();
        let rx = bridge.begin(tpin_request(), "requestTpin").unwrap();

        let err = bridge.select_account("acc1").unwrap_err();
        assert!(matches!(err, VoicebankError::InvalidRequest { .. }));
        assert!(bridge.is_awaiting());

        bridge.submit_input("0001").unwrap();
        assert_eq!(rx.await.unwrap(), r#"{"tpin":"0001"}"#);
    }

    #[tokio::test]
    async fn abort_drops_the_responder_without_a_reply() {
        let (bridge, mut events) = PromptBridge::new();
        let rx = bridge.begin(tpin_request(), "requestTpin").unwrap();

        bridge.abort_pending();
        assert!(!bridge.is_awaiting());
        assert!(rx.await.is_err());

        assert!(matches!(
            events.try_recv().unwrap(),
            PromptEvent::Opened(_)
        ));
        assert_eq!(events.try_recv().unwrap(), PromptEvent::Dismissed);
    }

    #[tokio::test]
    async fn expire_pending_resolves_with_sentinel_and_is_idempotent() {
        let (bridge, _events) = PromptBridge::new();
        let rx = bridge.begin(tpin_request(), "requestTpin").unwrap();

        bridge.expire_pending();
        bridge.expire_pending();
        assert_eq!(rx.await.unwrap(), r#"{"tpin":"-1"}"#);
        assert!(!bridge.is_awaiting());
    }
}
