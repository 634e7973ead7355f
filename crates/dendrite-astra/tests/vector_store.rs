use dendrite_astra::{AstraConfig, AstraVectorStore, MmrOptions};
use serde_json::json;

#[test]
fn config_new_sets_defaults() {
    let config = AstraConfig::new(
        "AstraCS:token",
        "https://db-region.apps.astra.datastax.com",
        "documents",
    );
    assert_eq!(config.collection_name, "documents");
    assert_eq!(config.namespace, "default_keyspace");
    assert_eq!(config.id_field, "_id");
    assert_eq!(config.content_field, "content");
}

#[test]
fn config_builder_chain() {
    let config = AstraConfig::new(
        "AstraCS:token",
        "https://db-region.apps.astra.datastax.com",
        "documents",
    )
    .with_namespace("production")
    .with_id_field("doc_id")
    .with_content_field("body")
    .with_collection_options(json!({ "vector": { "dimension": 64, "metric": "cosine" } }));

    assert_eq!(config.namespace, "production");
    assert_eq!(config.id_field, "doc_id");
    assert_eq!(config.content_field, "body");
    assert!(config.collection_options.is_some());
}

#[test]
fn store_new_creates_instance() {
    let config = AstraConfig::new(
        "AstraCS:token",
        "https://db-region.apps.astra.datastax.com",
        "documents",
    );
    let store = AstraVectorStore::new(config);
    assert_eq!(store.config().collection_name, "documents");
}

#[test]
fn mmr_options_raise_fetch_k_to_k_at_query_time() {
    // fetch_k below k is allowed on the options; the search clamps it up.
    let options = MmrOptions::new(30).with_fetch_k(10);
    assert_eq!(options.fetch_k.max(options.k), 30);
}

// ---------------------------------------------------------------------------
// Integration tests — require a provisioned Astra DB database.
// Run with: cargo test -p dendrite-astra -- --ignored
// ---------------------------------------------------------------------------

#[cfg(test)]
mod integration {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use dendrite_astra::{AstraConfig, AstraVectorStore, Metadatas, MmrOptions};
    use dendrite_core::{DendriteError, Document, Embeddings, VectorStore};
    use serde_json::json;

    const DIM: usize = 64;

    /// Simple deterministic embeddings for integration testing.
    struct FakeEmbeddings {
        dim: usize,
    }

    impl FakeEmbeddings {
        fn new(dim: usize) -> Self {
            Self { dim }
        }

        fn embed_text(&self, text: &str) -> Vec<f32> {
            let mut vec = vec![0.0f32; self.dim];
            for (i, byte) in text.bytes().enumerate() {
                vec[i % self.dim] += byte as f32 / 255.0;
            }
            let mag: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
            if mag > 0.0 {
                vec.iter_mut().for_each(|x| *x /= mag);
            }
            vec
        }
    }

    #[async_trait]
    impl Embeddings for FakeEmbeddings {
        async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, DendriteError> {
            Ok(texts.iter().map(|t| self.embed_text(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>, DendriteError> {
            Ok(self.embed_text(text))
        }
    }

    fn config_from_env(collection: &str) -> AstraConfig {
        let token = std::env::var("ASTRA_DB_APPLICATION_TOKEN")
            .expect("ASTRA_DB_APPLICATION_TOKEN must be set");
        let endpoint =
            std::env::var("ASTRA_DB_API_ENDPOINT").expect("ASTRA_DB_API_ENDPOINT must be set");
        AstraConfig::new(token, endpoint, collection).with_collection_options(json!({
            "vector": { "dimension": DIM, "metric": "cosine" }
        }))
    }

    async fn setup_store(collection: &str) -> AstraVectorStore {
        let store = AstraVectorStore::new(config_from_env(collection));
        store.initialize().await.expect("failed to initialize collection");
        store
    }

    #[tokio::test]
    #[ignore = "requires a provisioned Astra DB database"]
    async fn add_and_search_documents() {
        let store = setup_store("dendrite_test_add_search").await;
        let embeddings = FakeEmbeddings::new(DIM);

        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), json!("test"));
        let docs = vec![
            Document::with_metadata("", "the cat sat on the mat", metadata.clone()),
            Document::with_metadata("", "an astronaut walked on the moon", metadata),
        ];

        let ids = store
            .add_documents(docs, &embeddings)
            .await
            .expect("add_documents failed");
        assert_eq!(ids.len(), 2);

        let results = store
            .similarity_search_with_score("cat on a mat", 2, &embeddings)
            .await
            .expect("search failed");
        assert!(!results.is_empty());
        assert_eq!(results[0].0.content, "the cat sat on the mat");
        assert_eq!(results[0].0.metadata["source"], "test");

        store
            .delete(&ids.iter().map(String::as_str).collect::<Vec<_>>())
            .await
            .expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires a provisioned Astra DB database"]
    async fn filtered_search_passes_filter_through() {
        let store = setup_store("dendrite_test_filtered").await;
        let embeddings = FakeEmbeddings::new(DIM);

        let mut wiki = HashMap::new();
        wiki.insert("source".to_string(), json!("wiki"));
        let mut news = HashMap::new();
        news.insert("source".to_string(), json!("news"));

        store
            .add_documents(
                vec![
                    Document::with_metadata("", "rust is a systems language", wiki),
                    Document::with_metadata("", "rust conference announced", news),
                ],
                &embeddings,
            )
            .await
            .expect("add_documents failed");

        let query = embeddings.embed_query("rust").await.unwrap();
        let results = store
            .similarity_search_by_vector_with_score(&query, 5, Some(&json!({ "source": "wiki" })))
            .await
            .expect("filtered search failed");

        assert!(results.iter().all(|(doc, _)| doc.metadata["source"] == "wiki"));
    }

    #[tokio::test]
    #[ignore = "requires a provisioned Astra DB database"]
    async fn mmr_search_returns_k_documents() {
        let store = setup_store("dendrite_test_mmr").await;
        let embeddings = FakeEmbeddings::new(DIM);

        store
            .add_documents(
                vec![
                    Document::new("", "the powerhouse of the cell is the mitochondria"),
                    Document::new("", "buildings are made out of brick"),
                    Document::new("", "mitochondria are made out of lipids"),
                ],
                &embeddings,
            )
            .await
            .expect("add_documents failed");

        let options = MmrOptions::new(2).with_fetch_k(10);
        let results = store
            .max_marginal_relevance_search("biology", &options, &embeddings)
            .await
            .expect("mmr search failed");

        assert_eq!(results.len(), 2);
        assert_ne!(results[0].content, results[1].content);
    }

    #[tokio::test]
    #[ignore = "requires a provisioned Astra DB database"]
    async fn from_texts_builds_a_ready_store() {
        let embeddings = FakeEmbeddings::new(DIM);
        let mut shared = HashMap::new();
        shared.insert("batch".to_string(), json!("smoke"));

        let store = AstraVectorStore::from_texts(
            vec!["alpha".to_string(), "beta".to_string()],
            Metadatas::Shared(shared),
            &embeddings,
            config_from_env("dendrite_test_from_texts"),
        )
        .await
        .expect("from_texts failed");

        let results = store
            .similarity_search("alpha", 1, &embeddings)
            .await
            .expect("search failed");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["batch"], "smoke");
    }
}
