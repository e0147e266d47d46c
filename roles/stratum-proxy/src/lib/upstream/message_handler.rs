use tracing::{debug, info, warn};
use v1::{
    json_rpc::{error_codes, JsonRpcError, Message, Response},
    methods::MethodError,
    server_to_client::{Notify, Reconnect},
    Server2Client,
};

use super::{session::UpstreamSession, UpstreamEvent, USER_AGENT};
use crate::{utils::spawn_block_notify, work::job::Job};

impl UpstreamSession {
    /// Applies one message from the pool. Returns the reconnect request when the pool asks the
    /// proxy to move.
    pub(super) async fn handle_message(&self, msg: Message) -> Option<Reconnect> {
        let msg = match msg {
            Message::Response(response) => {
                let id = response.id;
                if !self.handle.resolve(response) {
                    debug!("Pool response {id} has no waiting request");
                }
                return None;
            }
            other => other,
        };
        let request_id = match &msg {
            Message::StandardRequest(r) => Some(r.id),
            _ => None,
        };

        match Server2Client::try_from(msg) {
            Ok(Server2Client::Notify(notify)) => self.handle_notify(notify),
            Ok(Server2Client::SetDifficulty(sd)) => {
                info!("Pool difficulty set to {}", sd.value);
                self.jobs.set_difficulty(sd.value);
                self.handle.emit(UpstreamEvent::SetDifficulty(sd.value));
            }
            Ok(Server2Client::Reconnect(reconnect)) => {
                info!("Pool requested reconnect: {reconnect:?}");
                return Some(reconnect);
            }
            Ok(Server2Client::ShowMessage(m)) => info!("Message from pool: {}", m.message),
            Ok(Server2Client::GetVersion(get_version)) => {
                let response = get_version.respond(USER_AGENT);
                if let Err(e) = self.handle.send(Message::Response(response)).await {
                    debug!("Cannot answer client.get_version: {e}");
                }
            }
            Err(MethodError::MethodNotFound(method)) => {
                warn!("Unsupported method from pool: {method}");
                if let Some(id) = request_id {
                    let response = Response::error(
                        id,
                        JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
                    );
                    let _ = self.handle.send(Message::Response(response)).await;
                }
            }
            Err(e) => warn!("Cannot handle pool message: {e:?}"),
        }
        None
    }

    fn handle_notify(&self, notify: Notify) {
        let job = Job::from(notify.clone());
        let clean = job.clean;
        let prev_hash = job.prev_hash_display();
        self.jobs.set_job(job);
        self.handle.emit(UpstreamEvent::Notify(notify));
        if clean {
            if let Some(cmd) = &self.block_notify {
                spawn_block_notify(cmd, &prev_hash);
            }
        }
    }
}
