//! # Broker Connection Handle
//!
//! One [`ConnectionHandle`] per connector. It owns the staged credentials, the
//! immutable [`ClientOptions`] built from [`ConnectionSettings`], and a lazily
//! (re)created broker client shared by every producer and consumer.
//!
//! `connect` is idempotent and serialised by the write half of an async
//! `RwLock`; `is_connected` reads an atomic flag and never blocks. Producer and
//! consumer creation connect on demand, and a connectivity failure clears the
//! flag so the next call builds a fresh client.

pub mod keystore;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::broker::{
    Authentication, BrokerClient, BrokerResult, ClientFactory, ClientOptions, Consumer,
    ConsumerOptions, Producer, ProducerOptions,
};
use crate::config::{AuthMode, ConnectionSettings};
use crate::context::ConnectorContext;
use crate::error::{ConnectorError, Result};

pub use keystore::Keystore;

pub struct ConnectionHandle {
    factory: Arc<dyn ClientFactory>,
    options: ClientOptions,
    client: RwLock<Option<Arc<dyn BrokerClient>>>,
    connected: AtomicBool,
    keystore: Mutex<Keystore>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("url", &self.options.url)
            .field("authentication", &self.options.authentication.kind())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ConnectionHandle {
    /// Build a handle without touching the network
    pub fn new(
        settings: &ConnectionSettings,
        factory: Arc<dyn ClientFactory>,
        context: &ConnectorContext,
    ) -> Result<Self> {
        settings.validate()?;
        let keystore = Keystore::stage(settings)?;
        let options = client_options(settings, &keystore, context);

        debug!(
            url = %options.url,
            auth = options.authentication.kind(),
            staged_credentials = keystore.is_staged(),
            "Connection handle created"
        );

        Ok(Self {
            factory,
            options,
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
            keystore: Mutex::new(keystore),
        })
    }

    /// Build a handle and try one connection; an unreachable broker is only a warning
    pub async fn establish(
        settings: &ConnectionSettings,
        factory: Arc<dyn ClientFactory>,
        context: &ConnectorContext,
    ) -> Result<Arc<Self>> {
        let handle = Arc::new(Self::new(settings, factory, context)?);
        if let Err(e) = handle.connect().await {
            warn!(url = %handle.options.url, error = %e, "Initial broker connection failed; will retry on demand");
        }
        Ok(handle)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[instrument(skip(self), fields(url = %self.options.url))]
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.client.write().await;
        if self.is_connected() && slot.is_some() {
            return Ok(());
        }

        if let Some(stale) = slot.take() {
            stale.close().await;
        }

        match self.factory.create_client(&self.options).await {
            Ok(client) => {
                *slot = Some(client);
                self.connected.store(true, Ordering::Release);
                info!("Connected to broker");
                Ok(())
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(ConnectorError::connection(e))
            }
        }
    }

    pub async fn producer(&self, options: ProducerOptions) -> Result<Arc<dyn Producer>> {
        let client = self.client().await?;
        let created = client.create_producer(options).await;
        self.observe(created)
    }

    pub async fn consumer(&self, options: ConsumerOptions) -> Result<Arc<dyn Consumer>> {
        let client = self.client().await?;
        let created = client.subscribe(options).await;
        self.observe(created)
    }

    /// Close the client and remove staged credential files
    pub async fn release(&self) -> Result<()> {
        let client = self.client.write().await.take();
        self.connected.store(false, Ordering::Release);
        if let Some(client) = client {
            client.close().await;
            info!(url = %self.options.url, "Broker connection released");
        }
        self.keystore.lock().release()
    }

    async fn client(&self) -> Result<Arc<dyn BrokerClient>> {
        if self.is_connected() {
            if let Some(client) = self.client.read().await.as_ref() {
                return Ok(Arc::clone(client));
            }
        }

        self.connect().await?;
        self.client
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| ConnectorError::connection(crate::broker::BrokerError::Closed))
    }

    fn observe<T>(&self, result: BrokerResult<T>) -> Result<T> {
        result.map_err(|e| {
            if e.is_connectivity() {
                debug!(error = %e, "Connectivity failure; client will be recreated");
                self.connected.store(false, Ordering::Release);
            }
            ConnectorError::connection(e)
        })
    }
}

fn client_options(
    settings: &ConnectionSettings,
    keystore: &Keystore,
    context: &ConnectorContext,
) -> ClientOptions {
    let mut options = ClientOptions::new(settings.url.clone());
    options.authentication = authentication(settings.auth_mode(), keystore);
    options.connection_timeout = settings.connection_timeout();
    options.operation_timeout = settings.operation_timeout();
    options.log_level = context.client_log_level;

    if settings.uses_tls_transport() {
        options.tls_trust_certs_file_path = trust_certs(settings, keystore);
        options.tls_allow_insecure_connection = settings.allow_insecure;
        options.tls_validate_hostname = false;
    }

    options
}

fn trust_certs(settings: &ConnectionSettings, keystore: &Keystore) -> Option<PathBuf> {
    if keystore.is_staged() {
        if settings.allow_insecure {
            None
        } else {
            keystore.file(keystore::CA_CERT_FILE)
        }
    } else if settings.ca_cert.is_empty() {
        None
    } else {
        Some(PathBuf::from(&settings.ca_cert))
    }
}

fn authentication(mode: AuthMode, keystore: &Keystore) -> Authentication {
    let staged_or = |name: &str, raw: String| {
        keystore
            .file(name)
            .unwrap_or_else(|| PathBuf::from(raw))
    };

    match mode {
        AuthMode::None => Authentication::None,
        AuthMode::Tls {
            cert_file,
            key_file,
        } => Authentication::Tls {
            cert_path: staged_or(keystore::CERT_FILE, cert_file),
            key_path: staged_or(keystore::KEY_FILE, key_file),
        },
        AuthMode::Token { jwt } => Authentication::Token(jwt),
        AuthMode::ClaimsBased { params } if params.is_empty() => Authentication::None,
        AuthMode::ClaimsBased { params } => Authentication::Claims(params),
        AuthMode::OAuth2 {
            issuer_url,
            audience,
            scope,
            private_key,
        } => {
            let private_key = staged_or(keystore::PRIVATE_KEY_FILE, private_key);
            let params = BTreeMap::from([
                ("type".to_string(), "client_credentials".to_string()),
                (
                    "privateKey".to_string(),
                    private_key.to_string_lossy().into_owned(),
                ),
                ("issuerUrl".to_string(), issuer_url),
                ("audience".to_string(), audience),
                ("scope".to_string(), scope),
            ]);
            Authentication::OAuth2(params)
        }
    }
}
