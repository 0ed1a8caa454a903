//! Wire types for the in-room RPC bridge.
//!
//! Payloads on both directions are JSON-encoded strings. Inbound params are
//! parsed leniently: malformed or absent JSON degrades to an empty structure
//! so a buggy agent payload renders as "no options" instead of breaking the
//! bridge. Replies are built here so every resolution path produces the same
//! shapes, including the `-1` refusal sentinel.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Literal value substituted for the real field value when the operator
/// cancels a prompt. The agent-side contract is "treat -1 as refusal",
/// uniformly across all three methods.
pub const CANCEL_SENTINEL: &str = "-1";

/// Which sensitive field an `InputField` prompt is collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    AccountNumber,
    Tpin,
}

impl InputField {
    pub fn title(&self) -> &'static str {
        match self {
            Self::AccountNumber => "Payee account number",
            Self::Tpin => "Transaction PIN",
        }
    }

    pub fn default_description(&self) -> &'static str {
        match self {
            Self::AccountNumber => "Enter the payee's account number",
            Self::Tpin => "Enter your 4-digit transaction PIN",
        }
    }

    fn reply_key(&self) -> &'static str {
        match self {
            Self::AccountNumber => "accountNumber",
            Self::Tpin => "tpin",
        }
    }
}

/// Masked account entry shown in the account picker. Only the id is
/// required; the rest is display sugar the agent may omit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last4: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChooseAccountParams {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub accounts: Vec<MaskedAccount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InputFieldParams {
    #[serde(default)]
    pub description: Option<String>,
}

/// Lenient parse of `chooseAccount` params. An empty account list is a
/// valid outcome; the picker then offers only Cancel.
pub fn parse_choose_account(payload: &str) -> ChooseAccountParams {
    serde_json::from_str(payload).unwrap_or_default()
}

/// Lenient parse of `requestPayeeAccNo` / `requestTpin` params. Accepts
/// either `{"description": ...}` or a bare JSON string as the description.
pub fn parse_input_request(payload: &str) -> InputFieldParams {
    if let Ok(params) = serde_json::from_str::<InputFieldParams>(payload) {
        return params;
    }
    if let Ok(description) = serde_json::from_str::<String>(payload) {
        return InputFieldParams {
            description: Some(description),
        };
    }
    InputFieldParams::default()
}

/// A transaction PIN is exactly four ASCII digits.
pub fn is_valid_tpin(value: &str) -> bool {
    value.len() == 4 && value.bytes().all(|b| b.is_ascii_digit())
}

pub fn account_reply(account_id: &str) -> String {
    json!({ "accountId": account_id }).to_string()
}

pub fn field_reply(field: InputField, value: &str) -> String {
    json!({ field.reply_key(): value }).to_string()
}
