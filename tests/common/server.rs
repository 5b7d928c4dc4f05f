//! Test server lifecycle management
//!
//! Each test gets an isolated server backed by its own SQLite file.

use super::constants::*;
use notification_hub::config::{PubSubSettings, StoreSettings};
use notification_hub::groups::GroupManager;
use notification_hub::kv_store::{KeyValueStore, SqliteKeyValueStore};
use notification_hub::manager::NotificationManager;
use notification_hub::notifications::PreferencesStore;
use notification_hub::pubsub::PubSub;
use notification_hub::scheduler::{DeliverySink, Scheduler};
use notification_hub::server::{
    make_app, metrics, RequestsLoggingLevel, ServerConfig, ServerState,
};
use notification_hub::store::NotificationStore;
use notification_hub::templates::TemplateRegistry;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with an isolated database
///
/// When dropped, the server and its workers shut down and the temp
/// directory is cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Manager for direct access in tests
    pub manager: Arc<NotificationManager>,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    shutdown_token: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, the port cannot be bound
    /// or the server does not become ready in time.
    pub async fn spawn() -> Self {
        metrics::init_metrics();

        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");
        let kv: Arc<dyn KeyValueStore> = Arc::new(
            SqliteKeyValueStore::new(temp_db_dir.path().join("notifications.db"))
                .expect("Failed to open database"),
        );

        let shutdown_token = CancellationToken::new();

        let pubsub = PubSub::new(
            PubSubSettings {
                batch_delay_ms: 0,
                base_delay_ms: 10,
                ..Default::default()
            },
            shutdown_token.child_token(),
        );
        let manager = Arc::new(NotificationManager::new(
            Arc::new(NotificationStore::new(
                &StoreSettings::default(),
                Some(kv.clone()),
            )),
            Arc::new(GroupManager::new()),
            pubsub.clone(),
            Arc::new(TemplateRegistry::with_defaults()),
            PreferencesStore::new(kv),
        ));
        let scheduler = Arc::new(Scheduler::new(
            manager.clone() as Arc<dyn DeliverySink>,
            shutdown_token.child_token(),
        ));

        pubsub.start();
        {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await });
        }

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = ServerState::new(
            ServerConfig {
                port,
                requests_logging_level: RequestsLoggingLevel::None,
                heartbeat_interval_secs: 1,
                ..Default::default()
            },
            manager.clone(),
            Some(scheduler),
        );
        let app = make_app(state);

        let server_token = shutdown_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_token.cancelled_owned())
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            manager,
            _temp_db_dir: temp_db_dir,
            shutdown_token,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the root endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Websocket URL for a user's push channel
    pub fn ws_url(&self, user_id: &str) -> String {
        format!("ws://127.0.0.1:{}/ws/{}", self.port, user_id)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
