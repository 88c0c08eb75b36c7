//! Agent Client Manager
//!
//! Single source of truth mapping caller-chosen ids to live API clients so
//! repeated lookups for "the server for this run" reuse connections and
//! policies. Scope is the agent process lifetime; no eviction is needed
//! within a run.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::client::AgentApiClient;
use crate::api::rest::RestClient;
use crate::coordination::state::AgentIdentity;
use crate::proxy::client::ProxyApiClient;

/// Default port on which every agent hosts its control-plane API.
pub const DEFAULT_API_PORT: u16 = 4500;

/// Caches one API client per id, creating on first use.
pub struct ApiClientManager {
    rest: RestClient,
    default_port: u16,
    role_ports: HashMap<String, u16>,
    proxy_chunk_size: Option<u64>,
    api_clients: Mutex<HashMap<String, Arc<AgentApiClient>>>,
    proxy_clients: Mutex<HashMap<String, Arc<ProxyApiClient>>>,
}

impl ApiClientManager {
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            default_port: DEFAULT_API_PORT,
            role_ports: HashMap::new(),
            proxy_chunk_size: None,
            api_clients: Mutex::new(HashMap::new()),
            proxy_clients: Mutex::new(HashMap::new()),
        }
    }

    /// Override the default API port, or the port for specific roles
    /// (e.g. Client on 4501, Server on 4502 when colocated).
    pub fn with_ports(mut self, default_port: u16, role_ports: HashMap<String, u16>) -> Self {
        self.default_port = default_port;
        self.role_ports = role_ports;
        self
    }

    /// Override the download chunk size for proxy clients created by this
    /// manager. `None` keeps the client default.
    pub fn with_proxy_chunk_size(mut self, chunk_size: Option<u64>) -> Self {
        self.proxy_chunk_size = chunk_size;
        self
    }

    /// The effective API port for a target instance.
    pub fn api_port(&self, instance: &AgentIdentity) -> u16 {
        self.role_ports
            .get(&instance.role.to_string())
            .copied()
            .unwrap_or(self.default_port)
    }

    /// Get the cached client for an id, if one exists.
    pub fn get_api_client(&self, id: &str) -> Option<Arc<AgentApiClient>> {
        self.api_clients.lock().get(id).cloned()
    }

    /// Get or create the API client for a peer instance. Idempotent: the
    /// lock is held across lookup and insert so concurrent callers cannot
    /// construct duplicate clients for the same id.
    pub fn get_or_create_api_client(
        &self,
        id: &str,
        instance: &AgentIdentity,
    ) -> Arc<AgentApiClient> {
        let base_url = format!("http://{}:{}", instance.ip_address, self.api_port(instance));
        self.get_or_create_api_client_for_url(id, &base_url)
    }

    /// Get or create the API client for an explicit base URL.
    pub fn get_or_create_api_client_for_url(&self, id: &str, base_url: &str) -> Arc<AgentApiClient> {
        let mut clients = self.api_clients.lock();
        clients
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AgentApiClient::new(self.rest.clone(), base_url)))
            .clone()
    }

    /// Get or create the proxy transport client for an endpoint URL.
    pub fn get_or_create_proxy_client(&self, id: &str, base_url: &reqwest::Url) -> Arc<ProxyApiClient> {
        let mut clients = self.proxy_clients.lock();
        clients
            .entry(id.to_string())
            .or_insert_with(|| {
                let mut client = ProxyApiClient::new(self.rest.clone(), base_url.clone());
                if let Some(chunk_size) = self.proxy_chunk_size {
                    client = client.with_chunk_size(chunk_size);
                }
                Arc::new(client)
            })
            .clone()
    }

    /// Number of cached agent API clients.
    pub fn api_client_count(&self) -> usize {
        self.api_clients.lock().len()
    }
}
