//! Composition root.
//!
//! Constructs one store, one session manager and one submission pipeline,
//! wires the HTTP front-end on top, and owns the shutdown sequence. All
//! capacities and intervals flow in from [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::http::{self, HttpState};
use crate::pipeline::{self, PipelineConfig, SubmitQueue, SubmitWorker, Submission};
use crate::session::{CmppConfig, SessionManager};
use crate::store::{self, SharedStore};

pub struct Gateway {
    config: Arc<Config>,
    store: SharedStore,
    manager: Arc<SessionManager>,
    queue: SubmitQueue,
    ingress: Option<mpsc::Receiver<Submission>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl Gateway {
    pub fn new(config: Config) -> Result<Self> {
        let store = store::create_store(&config).context("failed to open store")?;
        let manager = SessionManager::new(CmppConfig::from_config(&config), Arc::clone(&store));
        let (queue, ingress) = pipeline::channel(config.queue_capacity);

        Ok(Self {
            config: Arc::new(config),
            store,
            manager,
            queue,
            ingress: Some(ingress),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            stopped: false,
        })
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn queue(&self) -> SubmitQueue {
        self.queue.clone()
    }

    /// Bring up the session manager, the submission worker and the HTTP
    /// front-end.
    pub async fn start(&mut self) -> Result<()> {
        Arc::clone(&self.manager).start().await;

        let ingress = self
            .ingress
            .take()
            .context("gateway already started")?;
        let worker = SubmitWorker::new(
            ingress,
            Arc::clone(&self.manager),
            Arc::clone(&self.store),
            PipelineConfig::from_config(&self.config),
            self.shutdown.child_token(),
        );
        self.tasks.push(tokio::spawn(worker.run()));

        let addr = self.config.http_addr()?;
        let state = Arc::new(HttpState {
            store: Arc::clone(&self.store),
            queue: self.queue.clone(),
            manager: Arc::clone(&self.manager),
        });
        let token = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = http::serve(addr, state, token).await {
                error!(error = %e, "http server failed");
            }
        }));

        info!(
            cmpp = %format!("{}:{}", self.config.cmpp_host, self.config.cmpp_port),
            http = %addr,
            queue_capacity = self.config.queue_capacity,
            "gateway started"
        );
        Ok(())
    }

    /// Run until SIGINT or SIGTERM, then drain.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;

        wait_for_signal().await;
        info!("shutdown signal received");

        self.stop().await;
        Ok(())
    }

    /// Tear everything down. Later calls are no-ops.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.shutdown.cancel();
        self.manager.shutdown().await;
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        info!("gateway stopped");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
