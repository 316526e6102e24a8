use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::remote::stream::{StreamingConnector, TransportReceiver, TransportSender};
use crate::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production duplex transport over a websocket.
pub struct WebSocketConnector;

#[async_trait::async_trait]
impl StreamingConnector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> Result<(Box<dyn TransportSender>, Box<dyn TransportReceiver>), TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::Protocol(format!("invalid endpoint: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| TransportError::Protocol(format!("invalid credential: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        tracing::debug!(endpoint, "opening duplex channel");
        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let (write, read) = socket.split();

        Ok((
            Box::new(WsSender { write }),
            Box::new(WsReceiver { read }),
        ))
    }
}

struct WsSender {
    write: SplitSink<WsStream, Message>,
}

#[async_trait::async_trait]
impl TransportSender for WsSender {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(message))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            tracing::debug!(error = %e, "duplex channel close");
        }
    }
}

struct WsReceiver {
    read: SplitStream<WsStream>,
}

#[async_trait::async_trait]
impl TransportReceiver for WsReceiver {
    async fn receive(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Pings and pongs are handled by the protocol layer.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Network(e.to_string()))),
            }
        }
    }
}
