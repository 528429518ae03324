//! Conversation backend access.
//!
//! [`ChatBackend`] is the seam between the session core and the network: the
//! room list, history replay and the streaming chat endpoint. [`HttpBackend`]
//! is the reqwest implementation used by the binary.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::debug;

use crate::config::{AuthConfig, BackendConfig};
use crate::error::{ChatError, ChatResult};
use crate::events::{ChatRequest, Message, Room, RoomId};

/// Raw chunks of a chat response body, in arrival order
pub type ByteStream = BoxStream<'static, ChatResult<Bytes>>;

/// Collaborator endpoints consumed by the session core
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET rooms`, newest first
    async fn list_rooms(&self) -> ChatResult<Vec<Room>>;

    /// `GET rooms/{room_id}/messages`
    async fn room_messages(&self, room_id: &RoomId) -> ChatResult<Vec<Message>>;

    /// `POST chat`; resolves once response headers arrive
    async fn open_chat_stream(&self, request: ChatRequest) -> ChatResult<ByteStream>;
}

/// reqwest-backed client for the conversation backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: BackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig, auth: &AuthConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .default_headers(credential_headers(auth)?)
            .build()?;

        Ok(Self { config, client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> ChatResult<T> {
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChatError::Status {
                status: response.status(),
                url,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ChatError::Decode(e.to_string()))
    }
}

fn credential_headers(auth: &AuthConfig) -> ChatResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    if let Some(cookie) = &auth.session_cookie {
        let mut value = HeaderValue::from_str(cookie)
            .map_err(|e| ChatError::Other(format!("Invalid session cookie: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(COOKIE, value);
    }

    if let Some(token) = &auth.bearer_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ChatError::Other(format!("Invalid bearer token: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_rooms(&self) -> ChatResult<Vec<Room>> {
        self.get_json(self.config.rooms_url()).await
    }

    async fn room_messages(&self, room_id: &RoomId) -> ChatResult<Vec<Message>> {
        self.get_json(self.config.history_url(room_id.as_str())).await
    }

    async fn open_chat_stream(&self, request: ChatRequest) -> ChatResult<ByteStream> {
        let url = self.config.chat_url();
        debug!(%url, room = ?request.room_id, "opening chat stream");

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(ChatError::Status {
                status: response.status(),
                url,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from));
        Ok(stream.boxed())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_credential_headers() {
        let auth = AuthConfig {
            session_cookie: Some("session=abc".to_string()),
            bearer_token: Some("tok".to_string()),
        };
        let headers = credential_headers(&auth).unwrap();
        assert_eq!(headers.get(COOKIE).unwrap(), "session=abc");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[tokio::test]
    async fn test_chat_stream_outlives_request_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nHello\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            socket.write_all(b"6\r\n world\r\n0\r\n\r\n").await.unwrap();
            let _ = socket.shutdown().await;
        });

        let config = BackendConfig {
            base_url: format!("http://{}", addr),
            request_timeout_secs: 1,
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(config, &AuthConfig::default()).unwrap();
        let request = ChatRequest {
            room_id: None,
            message: "slow".to_string(),
        };

        let chunks: Vec<ChatResult<Bytes>> =
            backend.open_chat_stream(request).await.unwrap().collect().await;
        let body: Vec<u8> = chunks
            .into_iter()
            .map(|chunk| chunk.unwrap())
            .flat_map(|chunk| chunk.to_vec())
            .collect();

        assert_eq!(body, b"Hello world");
        server.await.unwrap();
    }

    #[test]
    fn test_no_credentials_no_headers() {
        let headers = credential_headers(&AuthConfig::default()).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_invalid_cookie_rejected() {
        let auth = AuthConfig {
            session_cookie: Some("bad\nvalue".to_string()),
            bearer_token: None,
        };
        assert!(credential_headers(&auth).is_err());
    }

    #[test]
    fn test_chat_request_wire_shape() {
        let request = ChatRequest {
            room_id: None,
            message: "hello".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({ "room_id": null, "message": "hello" }));

        let request = ChatRequest {
            room_id: Some(RoomId::new("r1")),
            message: "again".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({ "room_id": "r1", "message": "again" }));
    }

    #[test]
    fn test_room_and_message_wire_shape() {
        let rooms: Vec<Room> = serde_json::from_str(
            r#"[{"room_id":"r2","title":"Billing"},{"room_id":"r1","title":null}]"#,
        )
        .unwrap();
        assert_eq!(rooms[0], Room::new("r2", Some("Billing".to_string())));
        assert_eq!(rooms[1].title, None);

        let messages: Vec<Message> = serde_json::from_str(
            r#"[{"role":"USER","content":"hi"},{"role":"ASSISTANT","content":"hello"}]"#,
        )
        .unwrap();
        assert_eq!(messages, vec![Message::user("hi"), Message::assistant("hello")]);
    }
}
