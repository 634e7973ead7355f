use std::collections::HashMap;

use async_trait::async_trait;
use dendrite_core::mmr::maximal_marginal_relevance;
use dendrite_core::{DendriteError, Document, Embeddings, VectorStore};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Reserved row field holding the embedding vector (fixed by the Data API).
const VECTOR_FIELD: &str = "$vector";
/// Reserved response field carrying the similarity score.
const SIMILARITY_FIELD: &str = "$similarity";
/// Default candidate-pool size for MMR search.
const DEFAULT_FETCH_K: usize = 20;

// ---------------------------------------------------------------------------
// AstraConfig
// ---------------------------------------------------------------------------

/// Configuration for connecting to an Astra DB collection.
#[derive(Debug, Clone)]
pub struct AstraConfig {
    /// Astra application token, sent as the `Token` header on every request.
    pub token: String,
    /// API endpoint of the database, e.g.
    /// `https://<db-id>-<region>.apps.astra.datastax.com`.
    pub endpoint: String,
    /// Name of the collection to operate on.
    pub collection_name: String,
    /// Keyspace holding the collection (default: `default_keyspace`).
    pub namespace: String,
    /// Field name storing the row id (default: `_id`).
    pub id_field: String,
    /// Field name storing the document content (default: `content`).
    pub content_field: String,
    /// Options passed through opaquely to `createCollection`, e.g.
    /// `{"vector": {"dimension": 1536, "metric": "cosine"}}`.
    pub collection_options: Option<Value>,
}

impl AstraConfig {
    /// Create a new config with the required token, endpoint, and collection
    /// name.
    pub fn new(
        token: impl Into<String>,
        endpoint: impl Into<String>,
        collection_name: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            endpoint: endpoint.into(),
            collection_name: collection_name.into(),
            namespace: "default_keyspace".to_string(),
            id_field: "_id".to_string(),
            content_field: "content".to_string(),
            collection_options: None,
        }
    }

    /// Set the keyspace holding the collection.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the field name for storing the row id.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Set the field name for storing the document content.
    pub fn with_content_field(mut self, content_field: impl Into<String>) -> Self {
        self.content_field = content_field.into();
        self
    }

    /// Set collection-creation options, passed through to `createCollection`.
    pub fn with_collection_options(mut self, options: Value) -> Self {
        self.collection_options = Some(options);
        self
    }
}

// ---------------------------------------------------------------------------
// MmrOptions
// ---------------------------------------------------------------------------

/// Options for [`AstraVectorStore::max_marginal_relevance_search`].
#[derive(Debug, Clone)]
pub struct MmrOptions {
    /// Number of documents to return.
    pub k: usize,
    /// Size of the candidate pool fetched before reranking (default: 20,
    /// raised to `k` at query time when smaller).
    pub fetch_k: usize,
    /// Relevance/diversity trade-off in `[0, 1]`: `1.0` is pure relevance,
    /// `0.0` maximizes diversity (default: `0.5`).
    pub lambda_mult: f32,
    /// Optional metadata filter, passed through opaquely to the store.
    pub filter: Option<Value>,
}

impl MmrOptions {
    /// Create options returning `k` documents, with default pool size and
    /// balance.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            fetch_k: DEFAULT_FETCH_K,
            lambda_mult: 0.5,
            filter: None,
        }
    }

    /// Set the candidate-pool size fetched before reranking.
    pub fn with_fetch_k(mut self, fetch_k: usize) -> Self {
        self.fetch_k = fetch_k;
        self
    }

    /// Set the relevance/diversity trade-off.
    pub fn with_lambda_mult(mut self, lambda_mult: f32) -> Self {
        self.lambda_mult = lambda_mult;
        self
    }

    /// Restrict candidates with a store-defined metadata filter.
    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }
}

// ---------------------------------------------------------------------------
// Metadatas
// ---------------------------------------------------------------------------

/// Metadata supplied alongside raw texts in [`AstraVectorStore::from_texts`].
#[derive(Debug, Clone, Default)]
pub enum Metadatas {
    /// No metadata; every document gets an empty map.
    #[default]
    None,
    /// A single mapping applied to every text.
    Shared(HashMap<String, Value>),
    /// One mapping per text, aligned by index. The length must match the
    /// number of texts.
    PerText(Vec<HashMap<String, Value>>),
}

// ---------------------------------------------------------------------------
// AstraVectorStore
// ---------------------------------------------------------------------------

/// A [`VectorStore`] implementation backed by the Astra DB Data API.
///
/// Documents are stored as flat rows:
/// - the configured id field (default `_id`)
/// - the configured content field (default `content`)
/// - `$vector`: the embedding vector
/// - every metadata key, spread at the top level of the row
///
/// The collection handle is bound once, by [`initialize`](Self::initialize)
/// or [`connect`](Self::connect); every other operation fails with
/// [`DendriteError::Precondition`] until then.
pub struct AstraVectorStore {
    config: AstraConfig,
    client: reqwest::Client,
    /// Collection endpoint URL, bound once by `initialize`/`connect`.
    collection: OnceCell<String>,
}

impl AstraVectorStore {
    /// Create a new store with the given configuration.
    pub fn new(config: AstraConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            collection: OnceCell::new(),
        }
    }

    /// Create with a custom reqwest client.
    pub fn with_client(config: AstraConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            collection: OnceCell::new(),
        }
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &AstraConfig {
        &self.config
    }

    /// Base URL of the keyspace-scoped Data API.
    fn api_url(&self) -> String {
        format!(
            "{}/api/json/v1/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.namespace
        )
    }

    /// URL of the configured collection.
    fn collection_endpoint(&self) -> String {
        format!("{}/{}", self.api_url(), self.config.collection_name)
    }

    /// Get the bound collection URL, failing when no handle is bound yet.
    fn collection_url(&self) -> Result<&str, DendriteError> {
        self.collection.get().map(String::as_str).ok_or_else(|| {
            DendriteError::Precondition(
                "collection not bound; call initialize() or connect() first".to_string(),
            )
        })
    }

    /// Idempotently create the configured collection and bind the handle.
    ///
    /// A benign "already exists" creation error is swallowed; any other
    /// creation failure propagates. Concurrent calls are serialized by the
    /// once-cell, and calling again after a successful bind is a no-op.
    pub async fn initialize(&self) -> Result<(), DendriteError> {
        self.collection
            .get_or_try_init(|| async {
                self.create_collection().await?;
                tracing::debug!(collection = %self.config.collection_name, "collection bound");
                Ok(self.collection_endpoint())
            })
            .await?;
        Ok(())
    }

    /// Bind to an existing collection without creating it.
    ///
    /// Fails when the collection does not appear in `findCollections`. Sets
    /// the same handle as [`initialize`](Self::initialize).
    pub async fn connect(&self) -> Result<(), DendriteError> {
        self.collection
            .get_or_try_init(|| async {
                let response = self
                    .command(&self.api_url(), json!({ "findCollections": {} }))
                    .await?;
                let known = response["status"]["collections"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default();
                let exists = known
                    .iter()
                    .any(|name| name.as_str() == Some(self.config.collection_name.as_str()));
                if !exists {
                    return Err(DendriteError::VectorStore(format!(
                        "collection {:?} does not exist; call initialize() to create it",
                        self.config.collection_name
                    )));
                }
                tracing::debug!(collection = %self.config.collection_name, "collection bound");
                Ok(self.collection_endpoint())
            })
            .await?;
        Ok(())
    }

    /// Issue `createCollection`, treating "already exists" as success.
    async fn create_collection(&self) -> Result<(), DendriteError> {
        let mut create = Map::new();
        create.insert(
            "name".to_string(),
            Value::String(self.config.collection_name.clone()),
        );
        if let Some(options) = &self.config.collection_options {
            create.insert("options".to_string(), options.clone());
        }

        let response = self
            .raw_command(&self.api_url(), json!({ "createCollection": create }))
            .await?;

        if let Some((code, message)) = api_error(&response) {
            if message.to_lowercase().contains("already exist") {
                tracing::debug!(collection = %self.config.collection_name, "collection already exists");
                return Ok(());
            }
            return Err(DendriteError::VectorStore(format!(
                "Astra createCollection failed ({code}): {message}"
            )));
        }

        Ok(())
    }

    /// Send a Data API command, surfacing HTTP and transport failures only.
    async fn raw_command(&self, url: &str, body: Value) -> Result<Value, DendriteError> {
        let response = self
            .client
            .post(url)
            .header("Token", &self.config.token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DendriteError::VectorStore(format!("Astra request failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            DendriteError::VectorStore(format!("failed to read Astra response: {e}"))
        })?;

        if !status.is_success() {
            return Err(DendriteError::VectorStore(format!(
                "Astra API error (HTTP {status}): {text}"
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            DendriteError::VectorStore(format!("failed to parse Astra response: {e}"))
        })
    }

    /// Send a Data API command, also surfacing in-body `errors` entries.
    async fn command(&self, url: &str, body: Value) -> Result<Value, DendriteError> {
        let response = self.raw_command(url, body).await?;
        if let Some((code, message)) = api_error(&response) {
            return Err(DendriteError::VectorStore(format!(
                "Astra command failed ({code}): {message}"
            )));
        }
        Ok(response)
    }

    /// Run a vector-sorted `find`, returning the raw result rows.
    async fn find(
        &self,
        sort_vector: &[f32],
        limit: usize,
        filter: Option<&Value>,
        include_vectors: bool,
    ) -> Result<Vec<Value>, DendriteError> {
        let url = self.collection_url()?;

        let mut find = json!({
            "filter": filter.cloned().unwrap_or_else(|| json!({})),
            "sort": { (VECTOR_FIELD): sort_vector },
            "options": { "limit": limit, "includeSimilarity": true },
        });
        if include_vectors {
            find["projection"] = json!({ "*": true });
        }

        let response = self.command(url, json!({ "find": find })).await?;
        Ok(response["data"]["documents"]
            .as_array()
            .cloned()
            .unwrap_or_default())
    }

    // -- Row mapping ---------------------------------------------------------

    /// Build the flat row stored for a document.
    ///
    /// Metadata keys colliding with the id, content, or vector fields are a
    /// validation error rather than a silent overwrite.
    fn row_from_document(
        &self,
        doc: &Document,
        vector: &[f32],
        id: &str,
    ) -> Result<Value, DendriteError> {
        let mut row = Map::new();
        row.insert(self.config.id_field.clone(), Value::String(id.to_string()));
        row.insert(
            self.config.content_field.clone(),
            Value::String(doc.content.clone()),
        );
        row.insert(VECTOR_FIELD.to_string(), json!(vector));

        for (key, value) in &doc.metadata {
            if key == &self.config.id_field
                || key == &self.config.content_field
                || key == VECTOR_FIELD
            {
                return Err(DendriteError::Validation(format!(
                    "metadata key {key:?} collides with a reserved row field"
                )));
            }
            row.insert(key.clone(), value.clone());
        }

        Ok(Value::Object(row))
    }

    /// Rebuild a document from a result row, along with its similarity score
    /// when the row carries one. The id, content, vector, and similarity
    /// fields are stripped; everything else becomes metadata.
    fn document_from_row(&self, row: &Value) -> (Document, Option<f32>) {
        let mut id = String::new();
        let mut content = String::new();
        let mut similarity = None;
        let mut metadata = HashMap::new();

        if let Some(object) = row.as_object() {
            for (key, value) in object {
                if key == &self.config.id_field {
                    id = match value.as_str() {
                        Some(s) => s.to_string(),
                        None => value.to_string(),
                    };
                } else if key == &self.config.content_field {
                    content = value.as_str().unwrap_or("").to_string();
                } else if key == VECTOR_FIELD {
                    // stored embedding, not part of the document
                } else if key == SIMILARITY_FIELD {
                    similarity = value.as_f64().map(|s| s as f32);
                } else {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }

        (Document::with_metadata(id, content, metadata), similarity)
    }

    // -- Inherent operations -------------------------------------------------

    /// Insert pre-embedded documents as one batch.
    ///
    /// `vectors` must align with `docs`; when `ids` is given it must too and
    /// each id is used verbatim. Otherwise non-empty `Document::id`s are
    /// kept and fresh UUIDs fill the rest. Returns the ids the rows were
    /// stored under.
    pub async fn add_vectors(
        &self,
        vectors: Vec<Vec<f32>>,
        docs: Vec<Document>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, DendriteError> {
        if vectors.len() != docs.len() {
            return Err(DendriteError::Validation(format!(
                "got {} vectors for {} documents",
                vectors.len(),
                docs.len()
            )));
        }
        if let Some(ids) = &ids {
            if ids.len() != docs.len() {
                return Err(DendriteError::Validation(format!(
                    "got {} ids for {} documents",
                    ids.len(),
                    docs.len()
                )));
            }
        }

        let url = self.collection_url()?;

        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let mut row_ids = Vec::with_capacity(docs.len());
        let mut rows = Vec::with_capacity(docs.len());

        for (i, (doc, vector)) in docs.iter().zip(&vectors).enumerate() {
            let id = match &ids {
                Some(ids) => ids[i].clone(),
                None if doc.id.is_empty() => Uuid::new_v4().to_string(),
                None => doc.id.clone(),
            };
            rows.push(self.row_from_document(doc, vector, &id)?);
            row_ids.push(id);
        }

        tracing::debug!(count = rows.len(), "inserting rows");
        self.command(url, json!({ "insertMany": { "documents": rows } }))
            .await?;

        Ok(row_ids)
    }

    /// Search by vector and return documents with their similarity scores,
    /// optionally restricted by a store-defined metadata filter.
    ///
    /// Results come back in the store's returned order (best first); no
    /// additional sort is applied.
    pub async fn similarity_search_by_vector_with_score(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&Value>,
    ) -> Result<Vec<(Document, f32)>, DendriteError> {
        let rows = self.find(embedding, k, filter, false).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let (doc, similarity) = self.document_from_row(row);
                (doc, similarity.unwrap_or(0.0))
            })
            .collect())
    }

    /// Maximum Marginal Relevance search for diverse results.
    ///
    /// Embeds the query, fetches `max(fetch_k, k)` candidates with their
    /// stored vectors, reranks them with
    /// [`maximal_marginal_relevance`], and returns the selected documents in
    /// selection order, scores and vectors stripped.
    pub async fn max_marginal_relevance_search(
        &self,
        query: &str,
        options: &MmrOptions,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Document>, DendriteError> {
        let query_vec = embeddings.embed_query(query).await?;
        let fetch_k = options.fetch_k.max(options.k);
        let rows = self
            .find(&query_vec, fetch_k, options.filter.as_ref(), true)
            .await?;

        let vectors: Vec<Vec<f32>> = rows.iter().map(vector_from_row).collect();
        let picks = maximal_marginal_relevance(&query_vec, &vectors, options.lambda_mult, options.k);

        Ok(picks
            .into_iter()
            .map(|i| self.document_from_row(&rows[i]).0)
            .collect())
    }

    /// Create a store, initialize its collection, and add the given texts.
    pub async fn from_texts(
        texts: Vec<String>,
        metadatas: Metadatas,
        embeddings: &dyn Embeddings,
        config: AstraConfig,
    ) -> Result<Self, DendriteError> {
        let docs = documents_from_texts(texts, metadatas)?;
        Self::from_documents(docs, embeddings, config).await
    }

    /// Create a store, initialize its collection, and add the given
    /// documents.
    pub async fn from_documents(
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
        config: AstraConfig,
    ) -> Result<Self, DendriteError> {
        let store = Self::new(config);
        store.initialize().await?;
        store.add_documents(docs, embeddings).await?;
        Ok(store)
    }
}

// ---------------------------------------------------------------------------
// VectorStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl VectorStore for AstraVectorStore {
    async fn add_documents(
        &self,
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<String>, DendriteError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        // Compute embeddings for all documents in one batch call.
        let texts: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        let vectors = embeddings.embed_documents(&texts).await?;

        self.add_vectors(vectors, docs, None).await
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Document>, DendriteError> {
        let results = self
            .similarity_search_with_score(query, k, embeddings)
            .await?;
        Ok(results.into_iter().map(|(doc, _)| doc).collect())
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<(Document, f32)>, DendriteError> {
        let query_vec = embeddings.embed_query(query).await?;
        self.similarity_search_by_vector_with_score(&query_vec, k, None)
            .await
    }

    async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Document>, DendriteError> {
        let results = self
            .similarity_search_by_vector_with_score(embedding, k, None)
            .await?;
        Ok(results.into_iter().map(|(doc, _)| doc).collect())
    }

    async fn delete(&self, ids: &[&str]) -> Result<(), DendriteError> {
        if ids.is_empty() {
            return Ok(());
        }

        let url = self.collection_url()?;

        let id_values: Vec<Value> = ids.iter().map(|id| Value::String((*id).to_string())).collect();
        let mut filter = Map::new();
        filter.insert(self.config.id_field.clone(), json!({ "$in": id_values }));
        let body = json!({ "deleteMany": { "filter": filter } });

        // deleteMany removes a bounded page per call and reports `moreData`
        // until the filter matches nothing.
        loop {
            let response = self.command(url, body.clone()).await?;
            let more = response["status"]["moreData"].as_bool().unwrap_or(false);
            if !more {
                break;
            }
            tracing::debug!("deleteMany reported moreData; issuing another pass");
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the first entry of a Data API `errors` array, if present.
fn api_error(response: &Value) -> Option<(String, String)> {
    let first = response.get("errors")?.as_array()?.first()?;
    let code = first
        .get("errorCode")
        .and_then(|v| v.as_str())
        .unwrap_or("UNKNOWN")
        .to_string();
    let message = first
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
        .to_string();
    Some((code, message))
}

/// Read the stored embedding out of a result row.
fn vector_from_row(row: &Value) -> Vec<f32> {
    row.get(VECTOR_FIELD)
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|x| x.as_f64())
                .map(|x| x as f32)
                .collect()
        })
        .unwrap_or_default()
}

/// Pair texts with their metadata, validating per-text alignment.
fn documents_from_texts(
    texts: Vec<String>,
    metadatas: Metadatas,
) -> Result<Vec<Document>, DendriteError> {
    let metadatas = match metadatas {
        Metadatas::None => vec![HashMap::new(); texts.len()],
        Metadatas::Shared(map) => vec![map; texts.len()],
        Metadatas::PerText(list) => {
            if list.len() != texts.len() {
                return Err(DendriteError::Validation(format!(
                    "got {} metadata entries for {} texts",
                    list.len(),
                    texts.len()
                )));
            }
            list
        }
    };

    Ok(texts
        .into_iter()
        .zip(metadatas)
        .map(|(text, metadata)| Document::with_metadata("", text, metadata))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
