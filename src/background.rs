/// Typed client for the background service worker
///
/// The background exposes two queries over a `chrome.runtime` port using a
/// tRPC-style envelope:
///
/// - request: `{"trpc":{"id":1,"method":"query","params":{"path":"createRoom"}}}`
/// - reply:   `{"trpc":{"id":1,"result":{"type":"data","data":"QX7K2"}}}`
/// - failure: `{"trpc":{"id":1,"error":{"message":"..."}}}`
///
/// Replies are matched to requests by id. Nothing here retries.

use crate::error::TransportError;
use crate::room_code::RoomCode;
use crate::rooms::TabId;
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub const CREATE_ROOM: &str = "createRoom";
pub const GET_TAB_ID: &str = "getTabId";

#[allow(async_fn_in_trait)]
pub trait BackgroundClient {
    /// Ask the background for a new room. Every call creates a different room.
    async fn create_room(&self) -> Result<RoomCode, TransportError>;

    /// Id of the tab this popup was opened on
    async fn get_tab_id(&self) -> Result<TabId, TransportError>;
}

impl<C: BackgroundClient> BackgroundClient for Rc<C> {
    async fn create_room(&self) -> Result<RoomCode, TransportError> {
        (**self).create_room().await
    }

    async fn get_tab_id(&self) -> Result<TabId, TransportError> {
        (**self).get_tab_id().await
    }
}

/// Outgoing half of the port
pub trait PortTransport {
    fn post(&self, message: &str) -> Result<(), TransportError>;
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    trpc: QueryRequest<'a>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    id: u64,
    method: &'static str,
    params: QueryParams<'a>,
}

#[derive(Serialize)]
struct QueryParams<'a> {
    path: &'a str,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    trpc: Option<QueryResponse>,
}

#[derive(Deserialize)]
struct QueryResponse {
    id: u64,
    #[serde(default)]
    result: Option<QueryResult>,
    #[serde(default)]
    error: Option<QueryError>,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct QueryError {
    #[serde(default)]
    message: String,
}

type Reply = Result<Value, TransportError>;

/// Request/response client over a port
pub struct RpcClient<T> {
    transport: T,
    next_id: Cell<u64>,
    pending: RefCell<HashMap<u64, oneshot::Sender<Reply>>>,
    disconnected: Cell<bool>,
}

impl<T: PortTransport> RpcClient<T> {
    pub fn new(transport: T) -> Self {
        RpcClient {
            transport,
            next_id: Cell::new(1),
            pending: RefCell::new(HashMap::new()),
            disconnected: Cell::new(false),
        }
    }

    /// Run one query and wait for its reply
    pub async fn query(&self, path: &str) -> Result<Value, TransportError> {
        if self.disconnected.get() {
            return Err(TransportError::Disconnected);
        }

        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let message = serde_json::to_string(&OutgoingEnvelope {
            trpc: QueryRequest {
                id,
                method: "query",
                params: QueryParams { path },
            },
        })
        .map_err(|e| TransportError::Decode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().insert(id, tx);

        if let Err(e) = self.transport.post(&message) {
            self.pending.borrow_mut().remove(&id);
            return Err(e);
        }

        log::debug!("Sent {} query #{}", path, id);
        rx.await.map_err(|_| TransportError::Disconnected)?
    }

    /// Feed one message received on the port
    pub fn handle_message(&self, raw: &str) {
        let envelope: IncomingEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("Ignoring port message {:?}: {}", raw, e);
                return;
            }
        };

        let Some(response) = envelope.trpc else {
            return;
        };

        let Some(tx) = self.pending.borrow_mut().remove(&response.id) else {
            log::debug!("No pending query #{}", response.id);
            return;
        };

        let reply = match (response.error, response.result) {
            (Some(error), _) => Err(TransportError::Rpc {
                message: error.message,
            }),
            (None, Some(result)) => Ok(result.data),
            (None, None) => Err(TransportError::Decode(format!(
                "reply #{} has neither result nor error",
                response.id
            ))),
        };

        // The caller may have gone away; nothing to do then
        let _ = tx.send(reply);
    }

    /// The port closed: fail everything in flight and every later call
    pub fn handle_disconnect(&self) {
        self.disconnected.set(true);
        let pending: Vec<_> = self.pending.borrow_mut().drain().collect();
        if !pending.is_empty() {
            log::warn!("Background port closed with {} queries in flight", pending.len());
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(TransportError::Disconnected));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl<T: PortTransport> BackgroundClient for RpcClient<T> {
    async fn create_room(&self) -> Result<RoomCode, TransportError> {
        match self.query(CREATE_ROOM).await? {
            Value::String(code) if !code.is_empty() => Ok(RoomCode::from_server(code)),
            other => Err(TransportError::Decode(format!(
                "expected a room code, got {}",
                other
            ))),
        }
    }

    async fn get_tab_id(&self) -> Result<TabId, TransportError> {
        let value = self.query(GET_TAB_ID).await?;
        value
            .as_i64()
            .and_then(|id| TabId::try_from(id).ok())
            .ok_or_else(|| TransportError::Decode(format!("expected a tab id, got {}", value)))
    }
}

#[cfg(target_arch = "wasm32")]
pub use chrome::{connect_background, ChromePort};

#[cfg(target_arch = "wasm32")]
mod chrome {
    use super::*;
    use crate::bridge;
    use wasm_bindgen::prelude::*;

    /// The popup's `chrome.runtime` port
    #[derive(Clone, Copy, Default)]
    pub struct ChromePort;

    impl PortTransport for ChromePort {
        fn post(&self, message: &str) -> Result<(), TransportError> {
            bridge::postPortMessage(message).map_err(|e| TransportError::Bridge(format!("{:?}", e)))
        }
    }

    /// Open the port to the background and route its messages into a client
    pub fn connect_background() -> Result<Rc<RpcClient<ChromePort>>, TransportError> {
        let client = Rc::new(RpcClient::new(ChromePort));

        let on_message = {
            let client = Rc::downgrade(&client);
            Closure::wrap(Box::new(move |raw: String| {
                if let Some(client) = client.upgrade() {
                    client.handle_message(&raw);
                }
            }) as Box<dyn Fn(String)>)
        };

        let on_disconnect = {
            let client = Rc::downgrade(&client);
            Closure::wrap(Box::new(move || {
                if let Some(client) = client.upgrade() {
                    client.handle_disconnect();
                }
            }) as Box<dyn Fn()>)
        };

        bridge::connectPort(
            on_message.as_ref().unchecked_ref(),
            on_disconnect.as_ref().unchecked_ref(),
        )
        .map_err(|e| TransportError::Bridge(format!("{:?}", e)))?;

        // Listeners live as long as the popup page
        on_message.forget();
        on_disconnect.forget();

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::join;

    #[derive(Default)]
    struct RecordingPort {
        sent: RefCell<Vec<String>>,
        fail: bool,
    }

    impl PortTransport for RecordingPort {
        fn post(&self, message: &str) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Bridge("port not connected".to_string()));
            }
            self.sent.borrow_mut().push(message.to_string());
            Ok(())
        }
    }

    fn reply(id: u64, data: &str) -> String {
        format!(r#"{{"trpc":{{"id":{},"result":{{"type":"data","data":{}}}}}}}"#, id, data)
    }

    #[test]
    fn test_request_envelope() {
        let client = RpcClient::new(RecordingPort::default());

        let (result, _) = block_on(async {
            join!(client.create_room(), async {
                client.handle_message(&reply(1, r#""QX7K2""#))
            })
        });

        assert_eq!(result, Ok(RoomCode::from_server("QX7K2")));
        let sent = client.transport.sent.borrow();
        assert_eq!(
            sent[0],
            r#"{"trpc":{"id":1,"method":"query","params":{"path":"createRoom"}}}"#
        );
    }

    #[test]
    fn test_get_tab_id() {
        let client = RpcClient::new(RecordingPort::default());

        let (result, _) = block_on(async {
            join!(client.get_tab_id(), async { client.handle_message(&reply(1, "7")) })
        });

        assert_eq!(result, Ok(7));
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_ids_increase() {
        let client = RpcClient::new(RecordingPort::default());

        let (first, second, _) = block_on(async {
            join!(client.get_tab_id(), client.create_room(), async {
                // Out of order on purpose
                client.handle_message(&reply(2, r#""ABCDE""#));
                client.handle_message(&reply(1, "12"));
            })
        });

        assert_eq!(first, Ok(12));
        assert_eq!(second, Ok(RoomCode::from_server("ABCDE")));
    }

    #[test]
    fn test_error_reply() {
        let client = RpcClient::new(RecordingPort::default());

        let (result, _) = block_on(async {
            join!(client.create_room(), async {
                client.handle_message(r#"{"trpc":{"id":1,"error":{"message":"server down","code":-32603}}}"#)
            })
        });

        assert_eq!(
            result,
            Err(TransportError::Rpc {
                message: "server down".to_string()
            })
        );
    }

    #[test]
    fn test_wrong_reply_types() {
        let client = RpcClient::new(RecordingPort::default());

        let (room, tab, _) = block_on(async {
            join!(client.create_room(), client.get_tab_id(), async {
                client.handle_message(&reply(1, "42"));
                client.handle_message(&reply(2, r#""seven""#));
            })
        });

        assert!(matches!(room, Err(TransportError::Decode(_))));
        assert!(matches!(tab, Err(TransportError::Decode(_))));
    }

    #[test]
    fn test_ignores_unrelated_messages() {
        let client = RpcClient::new(RecordingPort::default());

        let (result, _) = block_on(async {
            join!(client.get_tab_id(), async {
                client.handle_message("not json");
                client.handle_message(r#"{"other":"message"}"#);
                client.handle_message(&reply(99, "1"));
                client.handle_message(&reply(1, "5"));
            })
        });

        assert_eq!(result, Ok(5));
    }

    #[test]
    fn test_post_failure() {
        let client = RpcClient::new(RecordingPort {
            fail: true,
            ..Default::default()
        });

        let result = block_on(client.get_tab_id());

        assert!(matches!(result, Err(TransportError::Bridge(_))));
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_disconnect_fails_pending_and_later_calls() {
        let client = RpcClient::new(RecordingPort::default());

        let (result, _) = block_on(async {
            join!(client.create_room(), async { client.handle_disconnect() })
        });

        assert_eq!(result, Err(TransportError::Disconnected));
        assert_eq!(block_on(client.get_tab_id()), Err(TransportError::Disconnected));
        assert_eq!(client.transport.sent.borrow().len(), 1);
    }

    #[test]
    fn test_shared_client() {
        let client = Rc::new(RpcClient::new(RecordingPort::default()));
        let handle = client.clone();

        let (result, _) = block_on(async {
            join!(handle.get_tab_id(), async { client.handle_message(&reply(1, "3")) })
        });

        assert_eq!(result, Ok(3));
    }
}
