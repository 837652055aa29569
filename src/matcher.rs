//! Keyword relevance between posts and configured products

use crate::config::ProductConfig;
use crate::forum::Post;
use serde::Serialize;

/// Best product for a post and the keywords that matched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductMatch {
    pub product: ProductConfig,
    pub score: usize,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProductMatcher {
    products: Vec<ProductConfig>,
    min_matches: usize,
}

impl ProductMatcher {
    pub fn new(products: Vec<ProductConfig>, min_matches: usize) -> Self {
        Self {
            products,
            min_matches: min_matches.max(1),
        }
    }

    /// Keywords of `product` present in `text` (already lowercased)
    fn matching_keywords(product: &ProductConfig, text: &str) -> Vec<String> {
        product
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
            .map(str::to_string)
            .collect()
    }

    /// Highest-scoring product, first configured wins ties
    pub fn best_match(&self, post: &Post) -> Option<ProductMatch> {
        let text = post.searchable_text();
        let mut best: Option<ProductMatch> = None;

        for product in &self.products {
            let matched = Self::matching_keywords(product, &text);
            let score = matched.len();
            if score < self.min_matches {
                continue;
            }
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(ProductMatch {
                    product: product.clone(),
                    score,
                    matched_keywords: matched,
                });
            }
        }

        best
    }
}
