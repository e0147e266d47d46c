use std::convert::{TryFrom, TryInto};

pub mod client_to_server;
pub mod server_to_client;

use crate::json_rpc::{Message, Notification, Response};

/// Errors encountered during conversion between valid json_rpc messages and Sv1 messages.
#[derive(Debug)]
pub enum MethodError {
    /// If the json_rpc message call a method not defined by Sv1. It contains the called method
    MethodNotFound(String),
    /// Method can not be parsed
    ParsingMethodError(ParsingMethodError),
    /// A valid method arrived from the wrong side of the connection
    UnexpectedMethod(Box<Method>),
    /// json_rpc message is a response, responses are paired by id and not parsed here
    NotARequest(Box<Response>),
}

impl From<ParsingMethodError> for MethodError {
    fn from(pars_err: ParsingMethodError) -> Self {
        MethodError::ParsingMethodError(pars_err)
    }
}

#[derive(Debug)]
pub enum ParsingMethodError {
    BadField(Box<crate::error::Error>),
    ValueNotAnArray(Box<serde_json::Value>),
    WrongArgs(Box<serde_json::Value>),
    ValueNotAFloat(Box<serde_json::Value>),
}

impl From<crate::error::Error> for ParsingMethodError {
    fn from(e: crate::error::Error) -> Self {
        ParsingMethodError::BadField(Box::new(e))
    }
}

impl ParsingMethodError {
    pub fn not_array_from_value(v: serde_json::Value) -> Self {
        ParsingMethodError::ValueNotAnArray(Box::new(v))
    }

    pub fn not_float_from_value(v: serde_json::Value) -> Self {
        ParsingMethodError::ValueNotAFloat(Box::new(v))
    }

    pub fn wrong_args_from_value(v: serde_json::Value) -> Self {
        ParsingMethodError::WrongArgs(Box::new(v))
    }
}

#[derive(Debug)]
pub enum Method {
    Client2Server(Client2Server),
    Server2Client(Server2Client),
}

/// Requests a miner sends to the proxy, or the proxy sends to the pool.
#[derive(Debug)]
pub enum Client2Server {
    Subscribe(client_to_server::Subscribe),
    Authorize(client_to_server::Authorize),
    ExtranonceSubscribe(client_to_server::ExtranonceSubscribe),
    Submit(client_to_server::Submit),
    GetTransactions(client_to_server::GetTransactions),
}

impl From<Client2Server> for Method {
    fn from(a: Client2Server) -> Self {
        Method::Client2Server(a)
    }
}

impl TryFrom<Message> for Client2Server {
    type Error = MethodError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        let method: Method = msg.try_into()?;
        match method {
            Method::Client2Server(client_to_server) => Ok(client_to_server),
            Method::Server2Client(a) => Err(MethodError::UnexpectedMethod(Box::new(a.into()))),
        }
    }
}

/// Messages the pool pushes to the proxy, or the proxy pushes to a miner.
#[derive(Debug)]
pub enum Server2Client {
    Notify(server_to_client::Notify),
    SetDifficulty(server_to_client::SetDifficulty),
    Reconnect(server_to_client::Reconnect),
    ShowMessage(server_to_client::ShowMessage),
    GetVersion(server_to_client::GetVersion),
}

impl From<Server2Client> for Method {
    fn from(a: Server2Client) -> Self {
        Method::Server2Client(a)
    }
}

impl TryFrom<Message> for Server2Client {
    type Error = MethodError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        let method: Method = msg.try_into()?;
        match method {
            Method::Server2Client(server_to_client) => Ok(server_to_client),
            Method::Client2Server(a) => Err(MethodError::UnexpectedMethod(Box::new(a.into()))),
        }
    }
}

impl TryFrom<Message> for Method {
    type Error = MethodError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        match msg {
            Message::StandardRequest(msg) => match &msg.method[..] {
                "mining.subscribe" => {
                    let method = msg.try_into()?;
                    Ok(Method::Client2Server(Client2Server::Subscribe(method)))
                }
                "mining.authorize" => {
                    let method = msg.try_into()?;
                    Ok(Method::Client2Server(Client2Server::Authorize(method)))
                }
                "mining.extranonce.subscribe" => Ok(Method::Client2Server(
                    Client2Server::ExtranonceSubscribe(client_to_server::ExtranonceSubscribe {
                        id: msg.id,
                    }),
                )),
                "mining.submit" => {
                    let method = msg.try_into()?;
                    Ok(Method::Client2Server(Client2Server::Submit(method)))
                }
                "mining.get_transactions" => Ok(Method::Client2Server(
                    Client2Server::GetTransactions(client_to_server::GetTransactions { id: msg.id }),
                )),
                "client.get_version" => Ok(Method::Server2Client(Server2Client::GetVersion(
                    server_to_client::GetVersion { id: msg.id },
                ))),
                // some pools send pushes with an id, they are handled like notifications
                _ => {
                    let id = msg.id;
                    let notification = Notification {
                        method: msg.method,
                        params: msg.params,
                    };
                    let mut method = Method::try_from(Message::Notification(notification))?;
                    if let Method::Server2Client(Server2Client::Reconnect(ref mut r)) = method {
                        r.id = Some(id);
                    }
                    if let Method::Server2Client(Server2Client::ShowMessage(ref mut m)) = method {
                        m.id = Some(id);
                    }
                    Ok(method)
                }
            },
            Message::Notification(msg) => match &msg.method[..] {
                "mining.notify" => {
                    let method = msg.try_into()?;
                    Ok(Method::Server2Client(Server2Client::Notify(method)))
                }
                "mining.set_difficulty" => {
                    let method = msg.try_into()?;
                    Ok(Method::Server2Client(Server2Client::SetDifficulty(method)))
                }
                "client.reconnect" => {
                    let method = msg.try_into()?;
                    Ok(Method::Server2Client(Server2Client::Reconnect(method)))
                }
                "client.show_message" => {
                    let method = msg.try_into()?;
                    Ok(Method::Server2Client(Server2Client::ShowMessage(method)))
                }
                _ => Err(MethodError::MethodNotFound(msg.method)),
            },
            Message::Response(msg) => Err(MethodError::NotARequest(Box::new(msg))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Method, MethodError> {
        let msg: Message = serde_json::from_str(line).unwrap();
        Method::try_from(msg)
    }

    #[test]
    fn routes_client_requests() {
        let m = parse(r#"{"id":1,"method":"mining.authorize","params":["w1","x"]}"#).unwrap();
        assert!(matches!(m, Method::Client2Server(Client2Server::Authorize(_))));
        let m = parse(r#"{"id":2,"method":"mining.get_transactions","params":["1"]}"#).unwrap();
        assert!(matches!(
            m,
            Method::Client2Server(Client2Server::GetTransactions(_))
        ));
    }

    #[test]
    fn reconnect_with_id_keeps_id() {
        let m = parse(r#"{"id":7,"method":"client.reconnect","params":["pool.example",3334,0]}"#)
            .unwrap();
        match m {
            Method::Server2Client(Server2Client::Reconnect(r)) => {
                assert_eq!(r.id, Some(7));
                assert_eq!(r.host.as_deref(), Some("pool.example"));
                assert_eq!(r.port, Some(3334));
            }
            other => panic!("unexpected method {other:?}"),
        }
    }

    #[test]
    fn unknown_method() {
        assert!(matches!(
            parse(r#"{"id":null,"method":"mining.unknown","params":[]}"#),
            Err(MethodError::MethodNotFound(_))
        ));
    }

    #[test]
    fn response_is_not_a_request() {
        assert!(matches!(
            parse(r#"{"id":1,"result":true,"error":null}"#),
            Err(MethodError::NotARequest(_))
        ));
    }
}
