use anyhow::{Context, Result, anyhow};
use kube::api::{DynamicObject, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::progress::ProgressHandle;

/// Timeout for connecting to the API server
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading API responses. Watch requests use a shorter
/// server-side timeout and resume, so they never trip this.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests.
/// Smaller pages reduce memory pressure and allow faster initial response.
const PAGE_SIZE: u32 = 500;

/// Connection pool for one or more Kubernetes clusters.
/// Caches clients by kubeconfig context name.
pub struct ClientPool {
    kubeconfig: Kubeconfig,
    clients: Arc<RwLock<HashMap<String, Client>>>,
    current_context: Arc<RwLock<String>>,
    /// Progress reporter for connection status updates
    progress: ProgressHandle,
}

impl ClientPool {
    /// Create a new pool without connecting (fast, no I/O).
    /// Call `initialize()` after subscribing to progress events.
    pub fn new(context: Option<&str>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read()?;

        let context_name = context
            .map(String::from)
            .or_else(|| kubeconfig.current_context.clone())
            .ok_or_else(|| anyhow!("No context specified and no current context in kubeconfig"))?;

        if !kubeconfig.contexts.iter().any(|c| c.name == context_name) {
            return Err(anyhow!(
                "Context '{}' not found in kubeconfig",
                context_name
            ));
        }

        Ok(Self {
            kubeconfig,
            clients: Arc::new(RwLock::new(HashMap::new())),
            current_context: Arc::new(RwLock::new(context_name)),
            progress: crate::progress::create_progress_handle(),
        })
    }

    /// Connect to the current context
    pub async fn initialize(&self) -> Result<()> {
        let context = self.current_context().await;
        self.client(&context).await?;
        Ok(())
    }

    /// Get or create a client for the given context
    pub async fn client(&self, context: &str) -> Result<Client> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(context) {
                return Ok(client.clone());
            }
        }

        if !self.kubeconfig.contexts.iter().any(|c| c.name == context) {
            return Err(anyhow!("Context '{}' not found in kubeconfig", context));
        }

        self.progress.connecting(context);
        let start = Instant::now();

        let mut config = Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("Failed to load kubeconfig for context '{}'", context))?;

        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let client = Client::try_from(config)
            .with_context(|| format!("Failed to create client for context '{}'", context))?;

        self.progress
            .connected(context, start.elapsed().as_millis() as u64);

        {
            let mut clients = self.clients.write().await;
            clients.insert(context.to_string(), client.clone());
        }

        Ok(client)
    }

    pub async fn current_context(&self) -> String {
        self.current_context.read().await.clone()
    }

    /// Switch the active context, validating it and connecting eagerly.
    /// Cache teardown for the old context is the subscription registry's
    /// job and must happen before new-context data is requested.
    pub async fn switch_context(&self, context: &str) -> Result<()> {
        if !self.kubeconfig.contexts.iter().any(|c| c.name == context) {
            return Err(anyhow!("Context '{}' not found in kubeconfig", context));
        }
        self.client(context).await?;
        *self.current_context.write().await = context.to_string();
        Ok(())
    }

    pub fn list_contexts(&self) -> Vec<String> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Get the progress reporter handle for subscribing to updates
    pub fn progress(&self) -> &ProgressHandle {
        &self.progress
    }

    /// List all pages of a resource collection with retry logic.
    /// Returns the items plus the collection's resourceVersion, which
    /// seeds the change stream so incremental events resume exactly where
    /// the list left off.
    pub async fn list_all_pages(
        &self,
        api: &Api<DynamicObject>,
        base_params: &ListParams,
        what: &str,
    ) -> Result<(Vec<DynamicObject>, Option<String>)> {
        let mut all_items: Vec<DynamicObject> = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut revision: Option<String> = None;
        let mut page_count = 0u32;

        loop {
            let mut params = base_params.clone().limit(PAGE_SIZE);
            if let Some(ref token) = continue_token {
                params = params.continue_token(token);
            }

            let list = self.list_page_with_retry(api, &params, what).await?;

            if let Some(rv) = &list.metadata.resource_version {
                revision = Some(rv.clone());
            }
            let items_count = list.items.len();
            all_items.extend(list.items);
            page_count += 1;

            match list.metadata.continue_ {
                Some(token) if !token.is_empty() => {
                    debug!(
                        what = %what,
                        page = page_count,
                        items_this_page = items_count,
                        total_so_far = all_items.len(),
                        "Fetched page, continuing"
                    );
                    continue_token = Some(token);
                }
                _ => break,
            }
        }

        if page_count > 1 {
            debug!(
                what = %what,
                pages = page_count,
                total_items = all_items.len(),
                "Pagination complete"
            );
        }

        Ok((all_items, revision))
    }

    /// Fetch a single page with retry logic
    async fn list_page_with_retry(
        &self,
        api: &Api<DynamicObject>,
        params: &ListParams,
        what: &str,
    ) -> Result<kube::api::ObjectList<DynamicObject>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match api.list(params).await {
                Ok(list) => return Ok(list),
                Err(e) => {
                    if Self::is_retryable_error(&e) {
                        let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                        warn!(
                            what = %what,
                            attempt = attempt + 1,
                            max_attempts = MAX_RETRIES,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Retryable error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        last_error = Some(e);
                    } else {
                        debug!(what = %what, error = %e, "Non-retryable error");
                        return Err(anyhow!("K8s API error: {}", e));
                    }
                }
            }
        }

        Err(anyhow!(
            "Failed after {} retries: {}",
            MAX_RETRIES,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ))
    }

    /// Check if an error is retryable (transient failures)
    fn is_retryable_error(err: &kube::Error) -> bool {
        match err {
            // Network/connection errors are retryable
            kube::Error::HyperError(_) => true,
            // API errors: retry on 429 (rate limit), 503 (unavailable), 504 (timeout)
            kube::Error::Api(api_err) => {
                matches!(api_err.code, 429 | 503 | 504)
            }
            _ => false,
        }
    }
}
