use anyhow::{anyhow, Context, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Thin PostgREST client for the Supabase project that stores queue entries
/// and call sessions.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, prefer: Option<&'static str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key).context("invalid Supabase API key")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.anon_key))
                .context("invalid Supabase API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_static(prefer));
        }

        Ok(headers)
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&'static str>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self
            .client
            .request(method, &url)
            .headers(self.get_headers(prefer)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// `GET /rest/v1/{table}?{filter}`
    pub async fn select<T>(&self, table: &str, filter: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let path = format!("/rest/v1/{}?{}", table, filter);
        self.request(Method::GET, &path, None, None).await
    }

    pub async fn select_one<T>(&self, table: &str, filter: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let rows: Vec<T> = self.select(table, filter).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn insert<R>(&self, table: &str, row: &R) -> Result<()>
    where
        R: Serialize,
    {
        let path = format!("/rest/v1/{}", table);
        let body = serde_json::to_value(row)?;
        let _: Vec<Value> = self
            .request(Method::POST, &path, Some(body), Some("return=representation"))
            .await?;
        Ok(())
    }

    /// Patches the rows matching `filter`; fails if nothing matched.
    pub async fn update<R>(&self, table: &str, filter: &str, row: &R) -> Result<()>
    where
        R: Serialize,
    {
        let path = format!("/rest/v1/{}?{}", table, filter);
        let body = serde_json::to_value(row)?;
        let updated: Vec<Value> = self
            .request(Method::PATCH, &path, Some(body), Some("return=representation"))
            .await?;

        if updated.is_empty() {
            return Err(anyhow!("no {} row matched {}", table, filter));
        }
        Ok(())
    }

    /// Calls a Postgres function; used where several rows must change in
    /// one transaction.
    pub async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        let path = format!("/rest/v1/rpc/{}", function);
        self.request(Method::POST, &path, Some(args), None).await
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
