use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::Span;

use super::{configure, AppState};

const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const KEEP_ALIVE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ServerStopError {
    #[error("HTTP server did not stop within {0:?}")]
    Timeout(Duration),
    #[error("HTTP server task failed")]
    Join(#[source] JoinError),
    #[error("HTTP server error")]
    Io(#[from] io::Error),
}

/// Running API server.
pub struct ApiServer {
    handle: ServerHandle,
    task: Option<JoinHandle<io::Result<()>>>,
    addrs: Vec<SocketAddr>,
    grace: Duration,
    span: Span,
}

impl ApiServer {
    /// Binds `addr` and starts serving the read endpoints.
    pub fn start(
        addr: SocketAddr,
        grace: Duration,
        state: AppState,
        span: Span,
    ) -> io::Result<Self> {
        let data = web::Data::new(state);
        Self::serve(addr, grace, span, move |cfg: &mut web::ServiceConfig| {
            cfg.app_data(data.clone());
            configure(cfg);
        })
    }

    fn serve<F>(addr: SocketAddr, grace: Duration, span: Span, routes: F) -> io::Result<Self>
    where
        F: Fn(&mut web::ServiceConfig) + Clone + Send + 'static,
    {
        // Workers are force-stopped one second after the grace period, so an
        // overrun is always observed by `stop` as a timeout first.
        let server = HttpServer::new(move || App::new().configure(routes.clone()))
            .client_request_timeout(CLIENT_REQUEST_TIMEOUT)
            .keep_alive(KEEP_ALIVE)
            .shutdown_timeout(grace.as_secs() + 1)
            .disable_signals()
            .bind(addr)?;

        let addrs = server.addrs();
        let server = server.run();
        let handle = server.handle();
        let task = actix_web::rt::spawn(server);

        tracing::info!(parent: &span, addrs = ?addrs, "HTTP server listening");

        Ok(Self {
            handle,
            task: Some(task),
            addrs,
            grace,
            span,
        })
    }

    #[cfg(test)]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Resolves when the server stops on its own. Cancel-safe; pending
    /// forever once the server task has been consumed.
    pub async fn exited(&mut self) -> Result<(), ServerStopError> {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let result = task.await;
        self.task = None;
        flatten(result)
    }

    /// Graceful stop: in-flight requests get up to the grace period.
    pub async fn stop(mut self) -> Result<(), ServerStopError> {
        tracing::info!(
            parent: &self.span,
            addrs = ?self.addrs,
            grace = ?self.grace,
            "Stopping HTTP server"
        );

        let handle = self.handle.clone();
        let task = self.task.take();
        let stopping = async move {
            handle.stop(true).await;
            match task {
                Some(task) => flatten(task.await),
                None => Ok(()),
            }
        };

        match tokio::time::timeout(self.grace, stopping).await {
            Ok(result) => {
                tracing::info!(parent: &self.span, "HTTP server stopped");
                result
            }
            Err(_) => Err(ServerStopError::Timeout(self.grace)),
        }
    }
}

fn flatten(result: Result<io::Result<()>, JoinError>) -> Result<(), ServerStopError> {
    result.map_err(ServerStopError::Join)?.map_err(ServerStopError::Io)
}
