//! Reply generation
//!
//! One prompt-completion call per reply. The prompt keeps the reply honest:
//! answer the question first, mention the product only where it fits, never
//! pretend to be an unaffiliated user. Every reply ends with the configured
//! disclosure.

use crate::config::{DisclosureSection, LlmSection};
use crate::error::{BotError, BotResult};
use crate::forum::Post;
use crate::llm::{CompletionRequest, LlmProvider, Message};
use crate::matcher::ProductMatch;
use std::sync::Arc;
use tracing::debug;

/// Longest post body quoted into the prompt, in characters
const MAX_BODY_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "You write replies to forum posts on behalf of a product team. \
Answer the poster's actual question helpfully and accurately first. \
Mention the product only if it genuinely helps with what was asked, and say plainly that you are affiliated with it. \
Never claim personal experience, never pose as an independent or unaffiliated user, \
never invent reviews or testimonials, and never make medical or health claims. \
Keep the tone friendly and concise. Plain text only, no headings.";

/// Produces the final reply text for a matched post
pub struct ReplyComposer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_reply_chars: usize,
    disclosure: String,
}

impl ReplyComposer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        llm: &LlmSection,
        disclosure: &DisclosureSection,
    ) -> Self {
        Self {
            provider,
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            max_reply_chars: llm.max_reply_chars,
            disclosure: disclosure.text.trim().to_string(),
        }
    }

    /// Build the completion request (pure function)
    pub fn build_request(&self, post: &Post, matched: &ProductMatch) -> CompletionRequest {
        let product = &matched.product;
        let body = truncate_chars(post.selftext.trim(), MAX_BODY_CHARS);
        let user_prompt = format!(
            "Subreddit: r/{subreddit}\n\
             Post title: {title}\n\
             Post body:\n{body}\n\n\
             Product: {name}\n\
             What it does: {description}\n\
             Link: {url}\n\
             Relevant topics found in the post: {keywords}\n\n\
             Write a short reply to this post.",
            subreddit = post.subreddit,
            title = post.title.trim(),
            body = if body.is_empty() { "(no body)" } else { body },
            name = product.name,
            description = product.description,
            url = product.url,
            keywords = matched.matched_keywords.join(", "),
        );

        CompletionRequest {
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(user_prompt)],
            model: self.model.clone(),
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        }
    }

    /// Trim, bound and disclose a raw completion (pure function)
    pub fn finalize(&self, raw: &str) -> BotResult<String> {
        let reply = raw.trim();
        if reply.is_empty() {
            return Err(BotError::reply_rejected("model returned an empty reply"));
        }

        let reply = truncate_chars(reply, self.max_reply_chars).trim_end();
        Ok(format!("{reply}\n\n{}", self.disclosure))
    }

    /// Generate the reply for `post`, disclosure included
    pub async fn compose(&self, post: &Post, matched: &ProductMatch) -> BotResult<String> {
        let request = self.build_request(post, matched);
        let response = self.provider.complete(request).await?;

        debug!(
            provider = self.provider.name(),
            post_id = %post.id,
            completion_tokens = response.usage.completion_tokens,
            finish_reason = ?response.finish_reason,
            "Reply generated"
        );

        self.finalize(response.content.as_deref().unwrap_or_default())
    }
}

/// Prefix of `text` holding at most `max` characters
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::llm::MessageRole;
    use crate::testing::mocks::MockLlmProvider;
    use chrono::Utc;

    fn post() -> Post {
        Post {
            id: "abc".to_string(),
            fullname: "t3_abc".to_string(),
            subreddit: "rust".to_string(),
            title: "  Best linter for a big workspace? ".to_string(),
            selftext: "Clippy takes ages on CI.".to_string(),
            author: Some("someone".to_string()),
            permalink: "/r/rust/comments/abc/".to_string(),
            url: None,
            score: 12,
            created_at: Utc::now(),
            over_18: false,
            locked: false,
            archived: false,
        }
    }

    fn matched(config: &BotConfig) -> ProductMatch {
        ProductMatch {
            product: config.products[0].clone(),
            score: 2,
            matched_keywords: vec!["linter".to_string(), "clippy".to_string()],
        }
    }

    fn composer(provider: MockLlmProvider, max_chars: usize) -> ReplyComposer {
        let mut config = BotConfig::test_config();
        config.llm.max_reply_chars = max_chars;
        ReplyComposer::new(Arc::new(provider), &config.llm, &config.disclosure)
    }

    #[test]
    fn test_request_carries_post_and_product() {
        let config = BotConfig::test_config();
        let composer = composer(MockLlmProvider::single_response("ok"), 1500);
        let request = composer.build_request(&post(), &matched(&config));

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert!(request.messages[0].content.contains("Never claim personal experience"));

        let user = &request.messages[1].content;
        assert!(user.contains("r/rust"));
        assert!(user.contains("Post title: Best linter for a big workspace?\n"));
        assert!(user.contains("Ferrous Lint"));
        assert!(user.contains("https://example.com/ferrous-lint"));
        assert!(user.contains("linter, clippy"));
        assert_eq!(request.max_tokens, Some(150));
        assert_eq!(request.model, "gpt-4o-mini");
    }

    #[test]
    fn test_finalize_appends_disclosure() {
        let composer = composer(MockLlmProvider::single_response("ok"), 1500);
        let reply = composer.finalize("  Try caching the target dir.  \n").unwrap();
        assert_eq!(
            reply,
            "Try caching the target dir.\n\nAutomated reply from the Ferrous team."
        );
    }

    #[test]
    fn test_finalize_rejects_blank_output() {
        let composer = composer(MockLlmProvider::single_response("ok"), 1500);
        assert!(matches!(
            composer.finalize(" \n\t "),
            Err(BotError::ReplyRejected { .. })
        ));
    }

    #[test]
    fn test_finalize_truncates_on_char_boundary() {
        let composer = composer(MockLlmProvider::single_response("ok"), 5);
        let reply = composer.finalize("héllo wörld").unwrap();
        assert!(reply.starts_with("héllo\n\n"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[tokio::test]
    async fn test_compose_uses_provider_output() {
        let config = BotConfig::test_config();
        let provider = MockLlmProvider::single_response("Ferrous Lint caches results between runs.");
        let composer = composer(provider.clone(), 1500);

        let reply = composer.compose(&post(), &matched(&config)).await.unwrap();
        assert!(reply.starts_with("Ferrous Lint caches results"));
        assert!(reply.ends_with("Automated reply from the Ferrous team."));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_compose_propagates_provider_failure() {
        let config = BotConfig::test_config();
        let composer = composer(MockLlmProvider::with_failure(), 1500);

        let error = composer.compose(&post(), &matched(&config)).await.unwrap_err();
        assert!(matches!(error, BotError::Llm(_)));
    }
}
