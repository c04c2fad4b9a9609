//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use lodestone_core::embedding::{EmbedKind, EmbeddingProvider, TokenCounter};
use lodestone_core::error::EmbeddingError;
use lodestone_core::SourceDocument;
use once_cell::sync::Lazy;

pub const DIMENSION: usize = 32;

/// Words sharing an axis, so related texts embed close together.
const TOPICS: &[&[&str]] = &[
    &["rust", "ownership", "borrow", "borrowing", "lifetime", "lifetimes"],
    &["garden", "gardening", "tomato", "tomatoes", "soil", "seeds"],
    &["sourdough", "bread", "flour", "starter", "oven", "baking"],
    &["hiking", "trail", "trails", "mountain", "summit", "boots"],
];

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn word_id(word: &str) -> u32 {
    word.bytes().fold(0x811c_9dc5u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Deterministic bag-of-topics provider.
#[derive(Debug, Default)]
pub struct TopicProvider;

impl TokenCounter for TopicProvider {
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        Ok(words(text).len())
    }
}

#[async_trait]
impl EmbeddingProvider for TopicProvider {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<u32>, EmbeddingError> {
        Ok(words(text).iter().map(|w| word_id(w)).collect())
    }

    async fn embed(
        &self,
        texts: &[String],
        _kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIMENSION];
                for word in words(text) {
                    let axis = TOPICS
                        .iter()
                        .position(|topic| topic.contains(&word.as_str()))
                        .unwrap_or_else(|| {
                            TOPICS.len() + word_id(&word) as usize % (DIMENSION - TOPICS.len())
                        });
                    vector[axis] += 1.0;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    vector.iter_mut().for_each(|v| *v /= norm);
                }
                vector
            })
            .collect())
    }
}

/// Small note collection: one file per topic plus a mixed one.
pub static CORPUS: Lazy<Vec<SourceDocument>> = Lazy::new(|| {
    [
        (
            "notes/rust-ownership.md",
            "# Ownership\n\nEvery value has a single owner.\n\n\
             ## Borrowing\n\nReferences borrow a value without taking ownership.\n\
             Lifetimes make sure a borrow never outlives its owner.",
        ),
        (
            "notes/garden.md",
            "# Spring garden\n\nStart tomato seeds indoors.\nMix compost into the soil.",
        ),
        (
            "notes/sourdough.md",
            "# Sourdough\n\nFeed the starter, then mix flour and water.\n\
             Bake the bread in a hot oven.",
        ),
        (
            "journal/weekend.md",
            "Went hiking on the mountain trail, then baked bread in the evening.",
        ),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (path, text))| SourceDocument::new(path, text, 1_700_000_000_000 + i as u64))
    .collect()
});
