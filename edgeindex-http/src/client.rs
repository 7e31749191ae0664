use crate::config::HttpBackendConfig;
use crate::wire;
use async_trait::async_trait;
use edgeindex::backend::{
    AliasAction, BulkRequest, BulkResponse, CreateIndexOutcome, Health, IndexSettings, QueryNode,
    SearchBackend, SearchRequest, SearchResponse,
};
use edgeindex::{IndexError, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;

/// Transport failures mean no node could be reached.
pub fn map_transport(e: reqwest::Error) -> IndexError {
    if e.is_decode() {
        IndexError::Backend(format!("undecodable response: {}", e))
    } else {
        IndexError::NoNodeAvailable(e.to_string())
    }
}

fn build_client(config: &HttpBackendConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| IndexError::Config(format!("cannot build HTTP client: {}", e)))
}

/// [`SearchBackend`] over an Elasticsearch-compatible REST API.
///
/// The underlying `reqwest::Client` is swapped out on [`SearchBackend::reset`],
/// dropping its connection pool.
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: RwLock<reqwest::Client>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(HttpBackend {
            config,
            client: RwLock::new(client),
        })
    }

    pub fn from_env() -> Result<Self> {
        HttpBackend::new(HttpBackendConfig::from_env())
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let client = self
            .client
            .read()
            .map_err(|_| IndexError::Backend("client lock poisoned".to_string()))?
            .clone();
        let url = format!("{}/{}", self.config.base_url(), path.trim_start_matches('/'));
        let builder = client.request(method, url);
        Ok(match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(map_transport)
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value> {
        let response = self.send(builder).await?;
        let response = check(response).await?;
        response.json().await.map_err(map_transport)
    }
}

/// Map error statuses onto the error taxonomy.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> IndexError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => IndexError::Overloaded(body.to_string()),
        StatusCode::FORBIDDEN if body.contains("cluster_block_exception") => {
            IndexError::ClusterBlocked(body.to_string())
        }
        StatusCode::SERVICE_UNAVAILABLE => IndexError::NoNodeAvailable(body.to_string()),
        _ => IndexError::Backend(format!("{}: {}", status, body)),
    }
}

fn join(indices: &[String]) -> String {
    indices.join(",")
}

#[async_trait]
impl SearchBackend for HttpBackend {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse> {
        let path = if request.refresh {
            "_bulk?refresh=true"
        } else {
            "_bulk"
        };
        let body = wire::bulk_body(&request)?;
        let builder = self
            .request(Method::POST, path)?
            .header(http::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let json = self.send_json(builder).await?;
        wire::parse_bulk_response(&json)
    }

    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let mut path = format!("{}/_search", join(&request.indices));
        // A scroll cannot start from an offset.
        if let (Some(keep_alive), 0) = (request.scroll, request.from) {
            path.push_str(&format!("?scroll={}", wire::duration_param(keep_alive)));
        }
        let builder = self
            .request(Method::POST, &path)?
            .json(&wire::search_body(&request));
        let json = self.send_json(builder).await?;
        wire::parse_search_response(&json)
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse> {
        let builder = self.request(Method::POST, "_search/scroll")?.json(&json!({
            "scroll": wire::duration_param(keep_alive),
            "scroll_id": scroll_id,
        }));
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::CursorNotFound(format!(
                "search context {} expired",
                scroll_id
            )));
        }
        let json: Value = check(response).await?.json().await.map_err(map_transport)?;
        wire::parse_search_response(&json)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let builder = self
            .request(Method::DELETE, "_search/scroll")?
            .json(&json!({"scroll_id": scroll_id}));
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }

    async fn delete_by_query(&self, indices: &[String], query: QueryNode) -> Result<u64> {
        let path = format!("{}/_delete_by_query?refresh=true&conflicts=proceed", join(indices));
        let builder = self
            .request(Method::POST, &path)?
            .json(&json!({"query": wire::query_json(&query)}));
        let json = self.send_json(builder).await?;
        Ok(json.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn create_index(&self, name: &str, settings: IndexSettings) -> Result<CreateIndexOutcome> {
        let builder = self.request(Method::PUT, name)?.json(&json!({
            "settings": {
                "number_of_shards": settings.number_of_shards,
                "number_of_replicas": settings.number_of_replicas,
            },
            "mappings": wire::index_mapping(),
        }));
        let response = self.send(builder).await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!("[HTTP] created index {}", name);
            return Ok(CreateIndexOutcome::Created);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            return Ok(CreateIndexOutcome::AlreadyExists);
        }
        Err(status_error(status, &body))
    }

    async fn update_aliases(&self, actions: Vec<AliasAction>) -> Result<()> {
        let actions: Vec<Value> = actions
            .into_iter()
            .map(|action| match action {
                AliasAction::Add { index, alias } => {
                    json!({"add": {"index": index, "alias": alias}})
                }
                AliasAction::Remove { index, alias } => {
                    json!({"remove": {"index": index, "alias": alias}})
                }
            })
            .collect();
        let builder = self
            .request(Method::POST, "_aliases")?
            .json(&json!({"actions": actions}));
        self.send_json(builder).await?;
        Ok(())
    }

    async fn get_alias_indices(&self, alias: &str) -> Result<Vec<String>> {
        let response = self
            .send(self.request(Method::GET, &format!("_alias/{}", alias))?)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let json: Value = check(response).await?.json().await.map_err(map_transport)?;
        let mut indices: Vec<String> = json
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        indices.sort();
        Ok(indices)
    }

    async fn refresh(&self, indices: &[String]) -> Result<()> {
        let builder = self.request(Method::POST, &format!("{}/_refresh", join(indices)))?;
        self.send_json(builder).await?;
        Ok(())
    }

    async fn health(&self, index: Option<&str>) -> Result<Health> {
        let path = match index {
            Some(name) => format!("_cluster/health/{}", name),
            None => "_cluster/health".to_string(),
        };
        let json = self.send_json(self.request(Method::GET, &path)?).await?;
        Ok(Health::parse(
            json.get("status").and_then(Value::as_str).unwrap_or("red"),
        ))
    }

    async fn reset(&self) -> Result<()> {
        let fresh = build_client(&self.config)?;
        let mut client = self
            .client
            .write()
            .map_err(|_| IndexError::Backend("client lock poisoned".to_string()))?;
        *client = fresh;
        tracing::warn!("[HTTP] client rebuilt for {}", self.config.base_url());
        Ok(())
    }
}
