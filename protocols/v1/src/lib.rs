//! Stratum V1 application protocol, as spoken between the proxy and both the pool and the push
//! miners connected to it.
//!
//! json-rpc has two types of messages: **request** and **response**.
//! A request message can be either a **notification** or a **standard message**.
//! Standard messages expect a response, notifications do not. A typical example of a notification
//! is the broadcasting of a new job.
//!
//! Every RPC request contains three parts:
//! * message ID: integer, `null` for notifications
//! * remote method: unicode string
//! * parameters: list of parameters
//!
//! ## Responses
//! Every response contains the following parts
//! * message ID: same ID as in request, for pairing request-response together
//! * result: any json-encoded result object (number, string, list, array, …)
//! * error: null or list (error code, error message, data)
//!
//! Pools disagree on the shape of the error member, some send a list and some send an object.
//! [`json_rpc::JsonRpcError`] accepts both and always writes the list form.
//!
//! References:
//! [https://braiins.com/stratum-v1/docs]
//! [https://en.bitcoin.it/wiki/Stratum_mining_protocol]

pub mod error;
pub mod json_rpc;
pub mod methods;
pub mod utils;

pub use methods::{client_to_server, server_to_client, Client2Server, Method, Server2Client};
