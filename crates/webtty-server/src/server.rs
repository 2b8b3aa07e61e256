use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use webtty_core::{Factory, Master, WebTty, WebTtyConfig, SUBPROTOCOL};
use webtty_pty::LocalCommandFactory;

use crate::config::{ConfigError, ServerConfig};
use crate::error::ServerError;
use crate::handshake;
use crate::ws_master::WsMaster;

/// State shared by every request handler.
struct AppState {
    factory: Arc<dyn Factory>,
    webtty: WebTtyConfig,
    credential: String,
    permit_arguments: bool,
    max_connection: usize,
    once: bool,
    /// Active connections, observed by the idle timer.
    connections: watch::Sender<usize>,
    /// Set by the first admitted client in `once` mode.
    accepted: AtomicBool,
    cancel: CancellationToken,
    sessions: TaskTracker,
}

impl AppState {
    /// Count a new connection, unless a limit forbids it.
    fn admit(self: &Arc<Self>) -> Option<ConnectionGuard> {
        if self.once && self.accepted.swap(true, Ordering::SeqCst) {
            return None;
        }
        let max = self.max_connection;
        let admitted = self.connections.send_if_modified(|active| {
            if max > 0 && *active >= max {
                return false;
            }
            *active += 1;
            true
        });
        admitted.then(|| ConnectionGuard {
            state: Arc::clone(self),
        })
    }

    fn active_connections(&self) -> usize {
        *self.connections.borrow()
    }
}

/// Releases a connection slot when dropped. In `once` mode dropping it also
/// stops the server, whether or not the websocket upgrade completed.
struct ConnectionGuard {
    state: Arc<AppState>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.connections.send_modify(|active| *active -= 1);
        if self.state.once && !self.state.cancel.is_cancelled() {
            info!("Single client session finished, shutting down");
            self.state.cancel.cancel();
        }
    }
}

/// Cancel the server once no client has been connected for `timeout`. The
/// timer stops while any connection is active and restarts from zero when
/// the last one leaves.
async fn shutdown_when_idle(state: Arc<AppState>, timeout: Duration) {
    let mut connections = state.connections.subscribe();
    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => return,
            _ = wait_connections(&mut connections, true) => {}
        }
        tokio::select! {
            _ = state.cancel.cancelled() => return,
            _ = wait_connections(&mut connections, false) => {}
            _ = tokio::time::sleep(timeout) => {
                info!("No client connected within {}s, shutting down", timeout.as_secs());
                state.cancel.cancel();
                return;
            }
        }
    }
}

/// Wait until the server is idle (no connections) or busy, per `idle`.
async fn wait_connections(connections: &mut watch::Receiver<usize>, idle: bool) {
    let closed = connections
        .wait_for(|active| (*active == 0) == idle)
        .await
        .is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Serves one configured command to any number of websocket clients.
pub struct Server {
    config: ServerConfig,
    factory: Arc<dyn Factory>,
    webtty: WebTtyConfig,
}

impl Server {
    /// Validate `config` and prepare the backend factory.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let factory =
            LocalCommandFactory::new(config.command.clone(), &config.backend_options()?)?;
        let webtty = config.webtty_config()?;

        Ok(Self {
            config,
            factory: Arc::new(factory),
            webtty,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Listen on the configured address until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener, cancel).await
    }

    fn state(&self, cancel: CancellationToken) -> Arc<AppState> {
        Arc::new(AppState {
            factory: Arc::clone(&self.factory),
            webtty: self.webtty.clone(),
            credential: self.config.credential.clone(),
            permit_arguments: self.config.permit_arguments,
            max_connection: self.config.max_connection,
            once: self.config.once,
            connections: watch::channel(0).0,
            accepted: AtomicBool::new(false),
            cancel,
            sessions: TaskTracker::new(),
        })
    }

    /// Accept connections on `listener` until `cancel` fires, until the only
    /// client of a `once` server leaves, or until no client connects within
    /// the configured `timeout`. Returns after every session has closed its
    /// command.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), ServerError> {
        let state = self.state(cancel.clone());

        if let Ok(addr) = listener.local_addr() {
            info!(
                "Serving {} `{}` on {addr}",
                state.factory.name(),
                self.config.command.join(" ")
            );
        }
        if self.config.permit_write {
            info!("Clients are allowed to write to the terminal");
        }
        let idle_timer = (self.config.timeout > 0).then(|| {
            let timeout = Duration::from_secs(self.config.timeout);
            tokio::spawn(shutdown_when_idle(Arc::clone(&state), timeout))
        });

        let app = router(Arc::clone(&state));
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
        if let Some(timer) = idle_timer {
            timer.abort();
        }
        served.map_err(ServerError::Serve)?;

        state.sessions.close();
        if !state.sessions.is_empty() {
            info!("Waiting for {} session(s) to close", state.sessions.len());
        }
        state.sessions.wait().await;
        info!("Server stopped");
        Ok(())
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/auth_token.js", get(auth_token_handler))
        .with_state(state)
}

async fn auth_token_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let token = state.credential.replace('\\', "\\\\").replace('\'', "\\'");
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        format!("var gotty_auth_token = '{token}';"),
    )
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.cancel.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let Some(guard) = state.admit() else {
        warn!("Rejecting {peer}: connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    ws.protocols([SUBPROTOCOL]).on_upgrade(move |socket| {
        let sessions = state.sessions.clone();
        sessions.track_future(handle_connection(socket, peer, state, guard))
    })
}

async fn handle_connection(
    socket: WebSocket,
    peer: SocketAddr,
    state: Arc<AppState>,
    guard: ConnectionGuard,
) {
    info!(
        "New client connected: {peer}, connections: {}",
        state.active_connections()
    );
    let master = Arc::new(WsMaster::new(socket));

    match run_session(&state, Arc::clone(&master)).await {
        Ok(()) => info!("Connection closed by {peer}"),
        Err(e) if e.is_disconnect() => info!("Connection closed by {peer}: {e}"),
        Err(e) => warn!("Connection with {peer} ended: {e}"),
    }
    master.close().await;
    drop(guard);

    info!(
        "Client disconnected: {peer}, connections: {}",
        state.active_connections()
    );
}

/// Authenticate, start the command and bridge it to the client. The command
/// is always closed before this returns.
async fn run_session(state: &AppState, master: Arc<WsMaster>) -> Result<(), ServerError> {
    let params = tokio::select! {
        _ = state.cancel.cancelled() => return Err(ServerError::ShuttingDown),
        params = handshake::authenticate(
            master.as_ref(),
            &state.credential,
            state.permit_arguments,
        ) => params?,
    };

    let slave = state.factory.new_slave(&params).map_err(ServerError::Spawn)?;
    let master: Arc<dyn Master> = master;
    let result = match WebTty::new(master, Arc::clone(&slave), state.webtty.clone()) {
        Ok(tty) => tty.run(state.cancel.child_token()).await,
        Err(e) => Err(e),
    };

    if let Err(e) = slave.close().await {
        warn!("Failed to close backend: {e}");
    }
    result.map_err(ServerError::Session)
}
