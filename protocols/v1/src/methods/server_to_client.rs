use serde_json::{
    Value,
    Value::{Array as JArray, Bool as JBool, Number as JNumber, String as JString},
};
use std::convert::{TryFrom, TryInto};

use crate::{
    error::Error,
    json_rpc::{Message, Notification, Response},
    methods::ParsingMethodError,
    utils::{HexBytes, HexU32Be, MerkleNode, PrevHash},
};

/// _mining.notify(...)_
///
/// Fields in order:
///
/// * Job ID. This is included when miners submit a results so work can be matched with proper
///   transactions.
/// * Hash of previous block. Used to build the header.
/// * Generation transaction (part 1). The miner inserts ExtraNonce1 and ExtraNonce2 after this
///   section of the transaction data.
/// * Generation transaction (part 2). The miner appends this after the first part of the
///   transaction data and the two ExtraNonce values.
/// * List of merkle branches. The generation transaction is hashed against the merkle branches to
///   build the final merkle root.
/// * Bitcoin block version. Used in the block header.
/// * nBits. The encoded network difficulty. Used in the block header.
/// * nTime. The current time. nTime rolling should be supported, but should not increase faster
///   than actual time.
/// * Clean Jobs. If true, miners should abort their current work and immediately use the new job.
///   If false, they can still use the current job, but should move to the new one after
///   exhausting the current nonce range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    pub job_id: String,
    pub prev_hash: PrevHash,
    pub coin_base1: HexBytes,
    pub coin_base2: HexBytes,
    pub merkle_branch: Vec<MerkleNode>,
    pub version: HexU32Be,
    pub bits: HexU32Be,
    pub time: HexU32Be,
    pub clean_jobs: bool,
}

impl From<Notify> for Message {
    fn from(notify: Notify) -> Self {
        let merkle_branch: Vec<Value> = notify
            .merkle_branch
            .into_iter()
            .map(Into::into)
            .collect();
        let params: Vec<Value> = vec![
            notify.job_id.into(),
            notify.prev_hash.into(),
            notify.coin_base1.into(),
            notify.coin_base2.into(),
            merkle_branch.into(),
            notify.version.into(),
            notify.bits.into(),
            notify.time.into(),
            notify.clean_jobs.into(),
        ];
        Message::Notification(Notification {
            method: "mining.notify".into(),
            params: params.into(),
        })
    }
}

impl TryFrom<Notification> for Notify {
    type Error = ParsingMethodError;

    fn try_from(msg: Notification) -> Result<Self, Self::Error> {
        let params = msg
            .params
            .as_array()
            .ok_or_else(|| ParsingMethodError::not_array_from_value(msg.params.clone()))?;
        // extra trailing params are ignored, a few pools append their own
        let (
            job_id,
            prev_hash,
            coin_base1,
            coin_base2,
            merkle_branch,
            version,
            bits,
            time,
            clean_jobs,
        ) = match params.get(..9) {
            Some(
                [JString(a), JString(b), JString(c), JString(d), JArray(e), JString(f), JString(g), JString(h), JBool(i)],
            ) => {
                let merkle_branch = e
                    .iter()
                    .map(|node| match node {
                        JString(s) => MerkleNode::try_from(s.as_str()),
                        other => Err(Error::BadJson(serde::de::Error::custom(format!(
                            "merkle node is not a string: {other}"
                        )))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    a.clone(),
                    b.as_str().try_into()?,
                    c.as_str().try_into()?,
                    d.as_str().try_into()?,
                    merkle_branch,
                    f.as_str().try_into()?,
                    g.as_str().try_into()?,
                    h.as_str().try_into()?,
                    *i,
                )
            }
            _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params.clone())),
        };
        Ok(Notify {
            job_id,
            prev_hash,
            coin_base1,
            coin_base2,
            merkle_branch,
            version,
            bits,
            time,
            clean_jobs,
        })
    }
}

/// _mining.set_difficulty(difficulty)_
///
/// The server can adjust the difficulty required for miner shares with the
/// "mining.set_difficulty" method. The miner should begin enforcing the new difficulty on the
/// next job received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetDifficulty {
    pub value: f64,
}

impl From<SetDifficulty> for Message {
    fn from(sd: SetDifficulty) -> Self {
        Message::Notification(Notification {
            method: "mining.set_difficulty".into(),
            params: vec![Value::from(sd.value)].into(),
        })
    }
}

impl TryFrom<Notification> for SetDifficulty {
    type Error = ParsingMethodError;

    fn try_from(msg: Notification) -> Result<Self, Self::Error> {
        let params = msg
            .params
            .as_array()
            .ok_or_else(|| ParsingMethodError::not_array_from_value(msg.params.clone()))?;
        match params.first() {
            Some(JNumber(n)) => {
                let value = n
                    .as_f64()
                    .ok_or_else(|| ParsingMethodError::not_float_from_value(JNumber(n.clone())))?;
                Ok(SetDifficulty { value })
            }
            _ => Err(ParsingMethodError::wrong_args_from_value(msg.params.clone())),
        }
    }
}

/// _client.reconnect("hostname", port, waittime)_
///
/// The server asks the client to reconnect, optionally to another host or port. All parameters
/// are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconnect {
    /// Set when the pool sent this as a request instead of a notification.
    pub id: Option<u64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub wait: Option<u64>,
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        JNumber(n) => n.as_u64(),
        JString(s) => s.parse().ok(),
        _ => None,
    }
}

impl TryFrom<Notification> for Reconnect {
    type Error = ParsingMethodError;

    fn try_from(msg: Notification) -> Result<Self, Self::Error> {
        let empty = vec![];
        let params = match &msg.params {
            JArray(params) => params,
            Value::Null => &empty,
            _ => return Err(ParsingMethodError::not_array_from_value(msg.params.clone())),
        };
        let host = match params.first() {
            Some(JString(h)) if !h.is_empty() => Some(h.clone()),
            Some(JString(_)) | Some(Value::Null) | None => None,
            Some(_) => return Err(ParsingMethodError::wrong_args_from_value(msg.params.clone())),
        };
        let port = match params.get(1) {
            Some(Value::Null) | None => None,
            Some(p) => Some(
                as_u64(p)
                    .and_then(|p| u16::try_from(p).ok())
                    .ok_or_else(|| ParsingMethodError::wrong_args_from_value(msg.params.clone()))?,
            ),
        };
        let wait = params.get(2).and_then(as_u64);
        Ok(Reconnect {
            id: None,
            host,
            port,
            wait,
        })
    }
}

/// _client.show_message("human-readable message")_
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowMessage {
    pub id: Option<u64>,
    pub message: String,
}

impl TryFrom<Notification> for ShowMessage {
    type Error = ParsingMethodError;

    fn try_from(msg: Notification) -> Result<Self, Self::Error> {
        match msg.params.as_array().and_then(|p| p.first()) {
            Some(JString(m)) => Ok(ShowMessage {
                id: None,
                message: m.clone(),
            }),
            _ => Err(ParsingMethodError::wrong_args_from_value(msg.params)),
        }
    }
}

/// _client.get_version()_
///
/// The client should report its software version in the form "product/version".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetVersion {
    pub id: u64,
}

impl GetVersion {
    pub fn respond(self, version: &str) -> Response {
        Response::ok(self.id, version.into())
    }
}

/// Result of a successful _mining.subscribe_ call.
///
/// `[[["mining.set_difficulty", "b4b6693b72a50c7116db18d6497cac52"], ["mining.notify",
/// "ae6812eb4cd7735a302a8a9dd95cf71f"]], "08000002", 4]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResult {
    pub subscriptions: Value,
    pub extra_nonce1: HexBytes,
    pub extra_nonce2_size: usize,
}

impl TryFrom<&Response> for SubscribeResult {
    type Error = ParsingMethodError;

    fn try_from(msg: &Response) -> Result<Self, Self::Error> {
        match msg.result.as_array().map(|r| &r[..]) {
            Some([subscriptions, JString(extra_nonce1), JNumber(size), ..]) => {
                let extra_nonce2_size = size
                    .as_u64()
                    .ok_or_else(|| ParsingMethodError::wrong_args_from_value(msg.result.clone()))?
                    as usize;
                Ok(SubscribeResult {
                    subscriptions: subscriptions.clone(),
                    extra_nonce1: extra_nonce1.as_str().try_into()?,
                    extra_nonce2_size,
                })
            }
            _ => Err(ParsingMethodError::wrong_args_from_value(msg.result.clone())),
        }
    }
}
