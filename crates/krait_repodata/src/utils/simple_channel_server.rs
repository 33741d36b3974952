//! A tiny static file server used by the tests to emulate a channel.

use std::{future::IntoFuture, net::SocketAddr, path::Path};

use axum::routing::get_service;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use url::Url;

pub struct SimpleChannelServer {
    local_addr: SocketAddr,
    shutdown_sender: Option<oneshot::Sender<()>>,
}

impl SimpleChannelServer {
    /// Serves the contents of the given directory on a random local port.
    /// The random port makes it possible to run many instances in parallel.
    pub async fn new(path: impl AsRef<Path>) -> Self {
        let service = get_service(ServeDir::new(path.as_ref().to_path_buf()));
        let app = axum::Router::new().fallback_service(service);

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .into_future();
        drop(tokio::spawn(server));

        Self {
            local_addr,
            shutdown_sender: Some(tx),
        }
    }

    /// Returns the root url of the server.
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}", self.local_addr.port())).unwrap()
    }
}

impl Drop for SimpleChannelServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_sender.take() {
            let _ = tx.send(());
        }
    }
}
