//! Hushline relay server.
//!
//! This crate wires the sans-IO core to the outside world:
//! - axum for the HTTP health route and WebSocket upgrades
//! - Tokio for the async runtime and the timer pump
//! - System time and OS randomness
//!
//! ## Architecture
//!
//! ```text
//! hushline-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ transport          (axum router, per-socket reader/writer)
//!   ├─ ServerDriver       (sans-IO event -> action state machine)
//!   │    └─ SessionRegistry + Dispatcher (hushline-core)
//!   └─ ActionExecutor     (per-connection outbound queues)
//! ```
//!
//! The driver and executor sit behind a single `tokio::sync::Mutex`, so
//! frames and timer ticks are handled one at a time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod executor;
mod system_env;
mod transport;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

pub use driver::{
    DriverError, ServerAction, ServerConfig as DriverConfig, ServerDriver, ServerEvent,
};
pub use error::ServerError;
pub use executor::{ActionExecutor, ExecutionReport};
use hushline_core::Environment;
pub use system_env::SystemEnv;
use tokio::net::TcpListener;

/// Driver and executor, locked together.
pub(crate) struct Relay {
    pub(crate) driver: ServerDriver<SystemEnv>,
    pub(crate) executor: ActionExecutor,
}

impl Relay {
    /// Feed one event to the driver and execute what it returns.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Driver`] if the driver rejected the event.
    pub(crate) fn handle(&mut self, event: ServerEvent) -> Result<(), ServerError> {
        let actions = self.driver.process_event(event)?;
        self.executor.execute(actions);
        Ok(())
    }
}

pub(crate) type SharedRelay = Arc<tokio::sync::Mutex<Relay>>;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:3000")
    pub bind_address: String,
    /// Driver configuration (limits, session timers)
    pub driver: DriverConfig,
    /// How often due session timers are checked
    pub tick_interval: Duration,
    /// Outbound frames buffered per connection before dropping
    pub outbound_queue: usize,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            driver: DriverConfig::default(),
            tick_interval: Duration::from_millis(250),
            outbound_queue: 256,
        }
    }
}

/// Production Hushline server.
pub struct Server {
    listener: TcpListener,
    relay: SharedRelay,
    env: SystemEnv,
    tick_interval: Duration,
    outbound_queue: usize,
}

impl Server {
    /// Validate the configuration and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The session timer configuration is invalid
    /// - Binding to the address fails
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.driver.session.validate()?;
        if config.tick_interval.is_zero() {
            return Err(ServerError::Config("tick interval must be non-zero".to_string()));
        }

        let env = SystemEnv::new();
        let driver = ServerDriver::new(env, config.driver);
        let relay = Arc::new(tokio::sync::Mutex::new(Relay {
            driver,
            executor: ActionExecutor::new(),
        }));

        let listener = TcpListener::bind(&config.bind_address).await?;

        Ok(Self {
            listener,
            relay,
            env,
            tick_interval: config.tick_interval,
            outbound_queue: config.outbound_queue,
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(addr = %self.local_addr()?, "relay listening");

        let pump =
            tokio::spawn(pump_timers(Arc::clone(&self.relay), self.env, self.tick_interval));

        let router = transport::build_router(transport::AppState {
            relay: self.relay,
            queue_depth: self.outbound_queue,
        });

        let served = axum::serve(self.listener, router).with_graceful_shutdown(shutdown).await;

        pump.abort();
        tracing::info!("relay stopped");
        served.map_err(ServerError::from)
    }
}

/// Tick the driver so due warnings and expiries fire.
async fn pump_timers(relay: SharedRelay, env: SystemEnv, interval: Duration) {
    loop {
        env.sleep(interval).await;
        if let Err(e) = relay.lock().await.handle(ServerEvent::Tick) {
            tracing::warn!(error = %e, "tick rejected");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
