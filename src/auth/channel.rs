//! auth::channel
//!
//! Channel-backed credential provider.
//!
//! The interactive auth flow (a popup, a device-code prompt, a refresh
//! service) runs somewhere else and owns a [`TokenRequests`] receiver. Each
//! call to [`ChannelTokenProvider::bearer_token`] sends a [`TokenRequest`]
//! carrying a one-shot reply channel and awaits an explicit
//! `Result<String, AuthError>` answer.
//!
//! # Example
//!
//! ```
//! use contentforge::auth::{ChannelTokenProvider, TokenProvider};
//!
//! # tokio_test::block_on(async {
//! let (provider, mut requests) = ChannelTokenProvider::new(4);
//!
//! tokio::spawn(async move {
//!     while let Some(request) = requests.next().await {
//!         request.respond(Ok("fresh-token".to_string()));
//!     }
//! });
//!
//! assert_eq!(provider.bearer_token().await.unwrap(), "fresh-token");
//! # });
//! ```

use tokio::sync::{mpsc, oneshot};

use super::{AuthError, TokenProvider};

/// A pending credential request.
#[derive(Debug)]
pub struct TokenRequest {
    reply: oneshot::Sender<Result<String, AuthError>>,
}

impl TokenRequest {
    /// Answer the request. A requester that already gave up is ignored.
    pub fn respond(self, result: Result<String, AuthError>) {
        let _ = self.reply.send(result);
    }
}

/// Receiving half handed to the auth flow.
#[derive(Debug)]
pub struct TokenRequests {
    rx: mpsc::Receiver<TokenRequest>,
}

impl TokenRequests {
    /// Wait for the next credential request; `None` once every provider is dropped.
    pub async fn next(&mut self) -> Option<TokenRequest> {
        self.rx.recv().await
    }
}

/// Credential provider that asks a channel for every credential.
#[derive(Debug, Clone)]
pub struct ChannelTokenProvider {
    tx: mpsc::Sender<TokenRequest>,
}

impl ChannelTokenProvider {
    /// Create a provider and the request stream that must answer it.
    pub fn new(buffer: usize) -> (Self, TokenRequests) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, TokenRequests { rx })
    }
}

#[async_trait::async_trait]
impl TokenProvider for ChannelTokenProvider {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(TokenRequest { reply })
            .await
            .map_err(|_| AuthError::ProviderClosed)?;
        answer.await.map_err(|_| AuthError::ProviderClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_call_issues_a_request() {
        let (provider, mut requests) = ChannelTokenProvider::new(1);
        tokio::spawn(async move {
            let mut n = 0;
            while let Some(request) = requests.next().await {
                n += 1;
                request.respond(Ok(format!("token-{n}")));
            }
        });

        assert_eq!(provider.bearer_token().await.unwrap(), "token-1");
        assert_eq!(provider.bearer_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn denial_is_propagated() {
        let (provider, mut requests) = ChannelTokenProvider::new(1);
        tokio::spawn(async move {
            if let Some(request) = requests.next().await {
                request.respond(Err(AuthError::Denied("window closed".into())));
            }
        });

        assert_eq!(
            provider.bearer_token().await,
            Err(AuthError::Denied("window closed".into()))
        );
    }

    #[tokio::test]
    async fn dropped_receiver_is_provider_closed() {
        let (provider, requests) = ChannelTokenProvider::new(1);
        drop(requests);
        assert_eq!(provider.bearer_token().await, Err(AuthError::ProviderClosed));
    }

    #[tokio::test]
    async fn dropped_request_is_provider_closed() {
        let (provider, mut requests) = ChannelTokenProvider::new(1);
        tokio::spawn(async move {
            let request = requests.next().await;
            drop(request);
        });
        assert_eq!(provider.bearer_token().await, Err(AuthError::ProviderClosed));
    }
}
