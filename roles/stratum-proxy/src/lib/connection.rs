//! Newline delimited JSON-RPC transport shared by the pool session and push miners.
use async_channel::{unbounded, Receiver, Sender};
use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    net::TcpStream,
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, trace, warn};
use v1::json_rpc::Message;

const MAX_LINE_LENGTH: usize = 1 << 16;

/// One Stratum connection, split into an inbound and an outbound message channel.
///
/// A background task owns the socket. It stops, closing both channels, as soon as either
/// direction fails or the peer hangs up. Lines that are not valid JSON-RPC are logged and
/// skipped, they do not end the connection.
#[derive(Debug)]
pub struct StratumConnection {
    receiver: Receiver<Message>,
    sender: Sender<Message>,
}

impl StratumConnection {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        Self::from_io(stream, peer)
    }

    /// Wraps any byte stream, `peer` is only used in log lines.
    pub fn from_io<S>(stream: S, peer: String) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (sender_incoming, receiver_incoming) = unbounded();
        let (sender_outgoing, receiver_outgoing) = unbounded();

        let closer = (
            sender_incoming.clone(),
            receiver_incoming.clone(),
            sender_outgoing.clone(),
            receiver_outgoing.clone(),
        );
        tokio::spawn(async move {
            tokio::select! {
                _ = Self::run_reader(BufReader::new(read_half), sender_incoming, &peer) => {
                    trace!("{peer}: reader exited");
                }
                _ = Self::run_writer(BufWriter::new(write_half), receiver_outgoing, &peer) => {
                    trace!("{peer}: writer exited");
                }
            }
            closer.0.close();
            closer.1.close();
            closer.2.close();
            closer.3.close();
        });

        Self {
            receiver: receiver_incoming,
            sender: sender_outgoing,
        }
    }

    async fn run_reader<R: AsyncRead + Unpin>(
        reader: BufReader<R>,
        sender: Sender<Message>,
        peer: &str,
    ) {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        while let Some(result) = lines.next().await {
            match result {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => match serde_json::from_str::<Message>(&line) {
                    Ok(msg) => {
                        trace!("{peer} -> {msg}");
                        if sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{peer}: cannot parse `{line}`: {e}"),
                },
                Err(e) => {
                    debug!("{peer}: read error: {e}");
                    break;
                }
            }
        }
    }

    async fn run_writer<W: AsyncWrite + Unpin>(
        mut writer: BufWriter<W>,
        receiver: Receiver<Message>,
        peer: &str,
    ) {
        while let Ok(msg) = receiver.recv().await {
            let line = match serde_json::to_string(&msg) {
                Ok(line) => line,
                Err(e) => {
                    warn!("{peer}: cannot serialize {msg}: {e}");
                    continue;
                }
            };
            trace!("{peer} <- {line}");
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                debug!("{peer}: write failed");
                break;
            }
        }
    }

    /// Queues a message. `false` once the connection is closed.
    pub async fn send(&self, msg: Message) -> bool {
        self.sender.send(msg).await.is_ok()
    }

    /// Next inbound message, `None` once the connection is closed.
    pub async fn receive(&self) -> Option<Message> {
        self.receiver.recv().await.ok()
    }

    pub fn sender(&self) -> Sender<Message> {
        self.sender.clone()
    }

    /// Stops the background task, the socket is dropped with it.
    pub fn close(&self) {
        self.sender.close();
        self.receiver.close();
    }
}

impl Drop for StratumConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use v1::json_rpc::{Response, StandardRequest};

    #[tokio::test]
    async fn messages_cross_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let server = StratumConnection::new(server);
        let client = StratumConnection::new(client);

        let request = Message::StandardRequest(StandardRequest {
            id: 1,
            method: "mining.subscribe".into(),
            params: serde_json::json!([]),
        });
        assert!(client.send(request.clone()).await);
        assert_eq!(server.receive().await.unwrap(), request);

        let response = Message::Response(Response::ok(1, serde_json::Value::Bool(true)));
        assert!(server.send(response.clone()).await);
        assert_eq!(client.receive().await.unwrap(), response);
    }

    #[tokio::test]
    async fn garbage_lines_are_skipped_and_eof_closes() {
        let (a, b) = tokio::io::duplex(1024);
        let conn = StratumConnection::from_io(a, "duplex".into());
        let (_, mut writer) = tokio::io::split(b);
        writer
            .write_all(b"not json\n{\"id\":3,\"result\":true,\"error\":null}\n")
            .await
            .unwrap();
        drop(writer);
        match conn.receive().await.unwrap() {
            Message::Response(r) => assert_eq!(r.id, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(conn.receive().await.is_none());
    }
}
