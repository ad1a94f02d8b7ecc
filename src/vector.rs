// 🧭 Vector Store - Similar-receipt storage and retrieval
// Accepted receipts are embedded from their searchable text and upserted;
// queries return the k nearest by cosine similarity. The reconciliation
// loop never consults this - it is a post-acceptance feature only.

use crate::receipt::Receipt;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Embedding dimension for the local bag-of-words embedder
pub const EMBEDDING_DIM: usize = 256;

// ============================================================================
// STORE CONTRACT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarReceipt {
    pub receipt: Receipt,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a receipt by its identity
    async fn upsert(&self, receipt: &Receipt, embedding: &[f32]) -> Result<()>;

    /// K nearest receipts by cosine similarity, best first
    async fn query_similar(&self, embedding: &[f32], k: usize) -> Result<Vec<SimilarReceipt>>;
}

// ============================================================================
// LOCAL EMBEDDER
// ============================================================================

/// Deterministic bag-of-words embedding: each token hashes to a bucket,
/// the vector is L2-normalized. Crude, but stable and dependency-free -
/// a hosted embedding model slots in behind the same trait.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % EMBEDDING_DIM;
        vector[bucket] += 1.0;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

pub fn embed_receipt(receipt: &Receipt) -> Vec<f32> {
    embed_text(&receipt.to_search_text())
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    // Inputs are already normalized, so the dot product is the similarity
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Brute-force in-memory store. Fine for tests and small archives; the
/// hosted store implements the same trait for production use.
pub struct InMemoryVectorStore {
    entries: Mutex<HashMap<String, (Receipt, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        InMemoryVectorStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, receipt: &Receipt, embedding: &[f32]) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(receipt.id.clone(), (receipt.clone(), embedding.to_vec()));
        Ok(())
    }

    async fn query_similar(&self, embedding: &[f32], k: usize) -> Result<Vec<SimilarReceipt>> {
        let entries = self.entries.lock().unwrap();

        let mut scored: Vec<SimilarReceipt> = entries
            .values()
            .map(|(receipt, stored)| SimilarReceipt {
                receipt: receipt.clone(),
                score: cosine(embedding, stored),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::LineItem;

    fn receipt(vendor: &str, item: &str) -> Receipt {
        Receipt {
            vendor: Some(vendor.to_string()),
            line_items: vec![LineItem {
                description: item.to_string(),
                quantity: 1.0,
                unit_price: 5.0,
                amount: 5.0,
                category: None,
            }],
            subtotal: Some(5.0),
            tax: Some(0.0),
            total: Some(5.0),
            ..Receipt::new()
        }
    }

    #[test]
    fn test_embedding_is_deterministic_and_normalized() {
        let a = embed_text("coffee and a bagel");
        let b = embed_text("coffee and a bagel");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_query_ranks_similar_vendor_first() {
        let store = InMemoryVectorStore::new();

        let cafe = receipt("Blue Bottle Coffee", "Latte");
        let hardware = receipt("Ace Hardware", "Hammer");
        store.upsert(&cafe, &embed_receipt(&cafe)).await.unwrap();
        store
            .upsert(&hardware, &embed_receipt(&hardware))
            .await
            .unwrap();

        let query = receipt("Blue Bottle Coffee", "Espresso");
        let results = store
            .query_similar(&embed_receipt(&query), 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].receipt.id, cafe.id);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_identity() {
        let store = InMemoryVectorStore::new();
        let original = receipt("Cafe", "Latte");
        store
            .upsert(&original, &embed_receipt(&original))
            .await
            .unwrap();

        let mut corrected = original.clone();
        corrected.total = Some(6.0);
        store
            .upsert(&corrected, &embed_receipt(&corrected))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let results = store
            .query_similar(&embed_receipt(&corrected), 1)
            .await
            .unwrap();
        assert_eq!(results[0].receipt.total, Some(6.0));
    }

    #[tokio::test]
    async fn test_query_truncates_to_k() {
        let store = InMemoryVectorStore::new();
        for i in 0..5 {
            let r = receipt(&format!("Vendor {}", i), "Thing");
            store.upsert(&r, &embed_receipt(&r)).await.unwrap();
        }

        let query = embed_text("Vendor Thing");
        let results = store.query_similar(&query, 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }
}
