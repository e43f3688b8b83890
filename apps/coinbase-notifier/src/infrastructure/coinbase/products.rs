//! Coinbase Pro Products Client
//!
//! Fetches the public product list (`GET /products`) that every user
//! subscription is scoped to. No authentication is required.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::{CatalogError, ProductSource};

/// Default REST base URL.
pub const DEFAULT_REST_URL: &str = "https://api.pro.coinbase.com";

/// Request timeout for the product list.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry in the `/products` response. Only the id is used.
#[derive(Debug, Clone, Deserialize)]
struct ProductEntry {
    id: String,
}

/// HTTP client for the public products endpoint.
#[derive(Debug, Clone)]
pub struct CoinbaseProductsClient {
    client: Client,
    base_url: String,
}

impl CoinbaseProductsClient {
    /// Create a client for `base_url` (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("coinbase-notifier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProductSource for CoinbaseProductsClient {
    async fn fetch_product_ids(&self) -> Result<Vec<String>, CatalogError> {
        let url = format!("{}/products", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let products: Vec<ProductEntry> = response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;

        let ids: Vec<String> = products.into_iter().map(|p| p.id).collect();
        if ids.is_empty() {
            return Err(CatalogError::Empty);
        }

        tracing::debug!(count = ids.len(), "Fetched product list");
        Ok(ids)
    }
}
