use serde_json::{
    Value,
    Value::{Null as JNull, String as JString},
};
use std::convert::{TryFrom, TryInto};

use crate::{
    json_rpc::{Message, Response, StandardRequest},
    methods::ParsingMethodError,
    utils::{HexBytes, HexU32Be},
};

#[cfg(test)]
use quickcheck::{Arbitrary, Gen};

/// _mining.subscribe("user agent/version", "extranonce1")_
///
/// Both parameters are optional. The second one asks the server to resume a previous session,
/// the proxy never honours it since every miner gets a fresh extranonce prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub id: u64,
    pub agent_signature: Option<String>,
    pub extranonce1: Option<HexBytes>,
}

impl Subscribe {
    /// Builds the `[[subscriptions], extranonce1, extranonce2_size]` result.
    pub fn respond(
        &self,
        subscriptions: Vec<(String, String)>,
        extra_nonce1: HexBytes,
        extra_nonce2_size: usize,
    ) -> Response {
        let subscriptions: Vec<Value> = subscriptions
            .into_iter()
            .map(|(method, id)| Value::Array(vec![method.into(), id.into()]))
            .collect();
        let result = Value::Array(vec![
            Value::Array(subscriptions),
            extra_nonce1.into(),
            extra_nonce2_size.into(),
        ]);
        Response::ok(self.id, result)
    }
}

impl From<Subscribe> for Message {
    fn from(subscribe: Subscribe) -> Self {
        let mut params: Vec<Value> = vec![];
        if let Some(agent) = subscribe.agent_signature {
            params.push(agent.into());
            if let Some(extranonce1) = subscribe.extranonce1 {
                params.push(extranonce1.into());
            }
        }
        Message::StandardRequest(StandardRequest {
            id: subscribe.id,
            method: "mining.subscribe".into(),
            params: params.into(),
        })
    }
}

impl TryFrom<StandardRequest> for Subscribe {
    type Error = ParsingMethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        let params = match &msg.params {
            Value::Array(params) => params.clone(),
            JNull => vec![],
            _ => return Err(ParsingMethodError::not_array_from_value(msg.params)),
        };
        let (agent_signature, extranonce1) = match &params[..] {
            [] => (None, None),
            [JString(a)] | [JString(a), JNull] => (Some(a.clone()), None),
            [JString(a), JString(b), ..] => (Some(a.clone()), Some(b.as_str().try_into()?)),
            _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params)),
        };
        Ok(Self {
            id: msg.id,
            agent_signature,
            extranonce1,
        })
    }
}

/// _mining.authorize("username", "password")_
///
/// The result from an authorize request is usually true (successful), or false.
/// The password may be omitted if the server does not require passwords.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorize {
    pub id: u64,
    pub name: String,
    pub password: String,
}

impl Authorize {
    pub fn respond(self, is_ok: bool) -> Response {
        Response::ok(self.id, Value::Bool(is_ok))
    }
}

impl From<Authorize> for Message {
    fn from(auth: Authorize) -> Self {
        Message::StandardRequest(StandardRequest {
            id: auth.id,
            method: "mining.authorize".into(),
            params: (&[auth.name, auth.password][..]).into(),
        })
    }
}

impl TryFrom<StandardRequest> for Authorize {
    type Error = ParsingMethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        match msg.params.as_array() {
            Some(params) => {
                let (name, password) = match &params[..] {
                    [JString(a), JString(b), ..] => (a.clone(), b.clone()),
                    [JString(a)] | [JString(a), JNull, ..] => (a.clone(), String::new()),
                    _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params)),
                };
                Ok(Self {
                    id: msg.id,
                    name,
                    password,
                })
            }
            None => Err(ParsingMethodError::not_array_from_value(msg.params)),
        }
    }
}

#[cfg(test)]
impl Arbitrary for Authorize {
    fn arbitrary(g: &mut Gen) -> Self {
        Authorize {
            name: String::arbitrary(g),
            password: String::arbitrary(g),
            id: u64::arbitrary(g),
        }
    }
}

#[cfg(test)]
#[quickcheck_macros::quickcheck]
fn authorize_from_to_json_rpc(auth: Authorize) -> bool {
    let message = Into::<Message>::into(auth.clone());
    let request = match message {
        Message::StandardRequest(s) => s,
        _ => panic!(),
    };
    auth == TryInto::<Authorize>::try_into(request).unwrap()
}

/// _mining.extranonce.subscribe()_
/// Indicates to the server that the client supports the mining.set_extranonce method.
/// https://en.bitcoin.it/wiki/BIP_0310
#[derive(Debug, Clone, PartialEq)]
pub struct ExtranonceSubscribe {
    pub id: u64,
}

/// _mining.get_transactions("job id")_
///
/// Answered with an empty list, the proxy does not know the transactions behind a job.
#[derive(Debug, Clone, PartialEq)]
pub struct GetTransactions {
    pub id: u64,
}

/// _mining.submit("username", "job id", "ExtraNonce2", "nTime", "nOnce")_
///
/// Miners submit shares using the method "mining.submit". Client submissions contain:
///
/// * Worker Name.
/// * Job ID.
/// * ExtraNonce2.
/// * nTime.
/// * nOnce.
/// * version_bits (used by version-rolling extension)
///
/// Server response is result: true for accepted, false for rejected (or you may get an error with
/// more details).
#[derive(Debug, Clone, PartialEq)]
pub struct Submit {
    pub id: u64,
    pub user_name: String,
    pub job_id: String,
    pub extra_nonce2: HexBytes,
    pub time: HexU32Be,
    pub nonce: HexU32Be,
    pub version_bits: Option<HexU32Be>,
}

impl Submit {
    pub fn respond(self, is_ok: bool) -> Response {
        Response::ok(self.id, Value::Bool(is_ok))
    }
}

impl From<Submit> for Message {
    fn from(submit: Submit) -> Self {
        let mut params: Vec<Value> = vec![
            submit.user_name.into(),
            submit.job_id.into(),
            submit.extra_nonce2.into(),
            submit.time.into(),
            submit.nonce.into(),
        ];
        if let Some(a) = submit.version_bits {
            params.push(a.into());
        };
        Message::StandardRequest(StandardRequest {
            id: submit.id,
            method: "mining.submit".into(),
            params: params.into(),
        })
    }
}

impl TryFrom<StandardRequest> for Submit {
    type Error = ParsingMethodError;

    fn try_from(msg: StandardRequest) -> Result<Self, Self::Error> {
        let params = msg
            .params
            .as_array()
            .ok_or_else(|| ParsingMethodError::not_array_from_value(msg.params.clone()))?;
        let (user_name, job_id, extra_nonce2, time, nonce, version_bits) = match &params[..] {
            [JString(a), JString(b), JString(c), JString(d), JString(e), JString(f)] => (
                a.clone(),
                b.clone(),
                c.as_str().try_into()?,
                d.as_str().try_into()?,
                e.as_str().try_into()?,
                Some(f.as_str().try_into()?),
            ),
            [JString(a), JString(b), JString(c), JString(d), JString(e)] => (
                a.clone(),
                b.clone(),
                c.as_str().try_into()?,
                d.as_str().try_into()?,
                e.as_str().try_into()?,
                None,
            ),
            _ => return Err(ParsingMethodError::wrong_args_from_value(msg.params.clone())),
        };
        Ok(Submit {
            id: msg.id,
            user_name,
            job_id,
            extra_nonce2,
            time,
            nonce,
            version_bits,
        })
    }
}

#[cfg(test)]
impl Arbitrary for Submit {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut extra = Vec::<u8>::arbitrary(g);
        extra.resize(4, 0);
        Submit {
            id: u64::arbitrary(g),
            user_name: String::arbitrary(g),
            job_id: String::arbitrary(g),
            extra_nonce2: extra.into(),
            time: HexU32Be(u32::arbitrary(g)),
            nonce: HexU32Be(u32::arbitrary(g)),
            version_bits: Option::<u32>::arbitrary(g).map(HexU32Be),
        }
    }
}

#[cfg(test)]
#[quickcheck_macros::quickcheck]
fn submit_from_to_json_rpc(submit: Submit) -> bool {
    let message = Into::<Message>::into(submit.clone());
    let request = match message {
        Message::StandardRequest(s) => s,
        _ => panic!(),
    };
    submit == TryInto::<Submit>::try_into(request).unwrap()
}
