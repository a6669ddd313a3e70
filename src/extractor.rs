//! Knowledge extraction through the completion service.
//!
//! The service receives the acquired content plus a fixed instruction
//! contract naming the [`ExtractedKnowledge`] fields, and is expected to
//! answer with bare JSON. Fence markers are stripped before parsing since
//! models add them anyway. Anything that still fails to parse is a contract
//! error for this capture; there is no retry and no partial result.
//!
//! Field values are not validated. A category or difficulty outside the
//! fixed sets is passed through as-is.

use anyhow::{Context, Result};

use crate::llm::CompletionClient;
use crate::models::{Category, Difficulty, ExtractedKnowledge};

/// Build the fixed instruction contract sent as the system message.
pub fn system_prompt() -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| format!("\"{}\"", c.label()))
        .collect::<Vec<_>>()
        .join(", ");
    let difficulties = Difficulty::ALL
        .iter()
        .map(|d| format!("\"{}\"", d.label()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are an expert knowledge curator. Analyse the user's content in depth and \
extract structured knowledge. Write every text value in Simplified Chinese.

Return a JSON object with these fields:

1. \"Title\": a short, compelling title (10-20 characters)
2. \"Summary\": an in-depth summary (100-200 characters) covering the core argument, key data and main conclusions
3. \"Tags\": 3-5 precise tags (array of strings)
4. \"Category\": exactly one of [{categories}]
5. \"KeyInsight\": the single most valuable insight, in one sentence (20-40 characters)
6. \"Difficulty\": exactly one of [{difficulties}]
7. \"ActionItems\": 2-3 actionable items (array of strings, 15-30 characters each, each starting with a verb)
8. \"Emoji\": one emoji that best represents the topic

Return pure JSON only. Do not wrap it in Markdown code fences."
    )
}

/// Remove Markdown fence markers and surrounding whitespace.
pub fn strip_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parse a completion reply into [`ExtractedKnowledge`].
pub fn parse_knowledge(raw: &str) -> Result<ExtractedKnowledge> {
    let json = strip_fences(raw);
    serde_json::from_str(&json).with_context(|| {
        let preview: String = json.chars().take(200).collect();
        format!("completion reply is not valid knowledge JSON: {}", preview)
    })
}

/// Ask the completion service for structured knowledge about `content`.
pub async fn extract_knowledge(
    client: &dyn CompletionClient,
    content: &str,
) -> Result<ExtractedKnowledge> {
    let reply = client
        .complete(&system_prompt(), content)
        .await
        .context("completion request failed")?;
    let preview: String = reply.chars().take(200).collect();
    tracing::debug!(model = client.model_name(), reply = %preview, "completion reply received");
    parse_knowledge(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCompletion;

    #[test]
    fn prompt_lists_fixed_sets() {
        let prompt = system_prompt();
        for c in Category::ALL {
            assert!(prompt.contains(c.label()));
        }
        for d in Difficulty::ALL {
            assert!(prompt.contains(d.label()));
        }
        assert!(prompt.contains("KeyInsight"));
        assert!(prompt.contains("ActionItems"));
    }

    #[test]
    fn fenced_reply_parses() {
        let raw = "```json\n{\"Title\": \"知识\", \"Tags\": [\"a\", \"b\"]}\n```";
        let k = parse_knowledge(raw).unwrap();
        assert_eq!(k.title.as_deref(), Some("知识"));
        assert_eq!(k.tags, Some(vec!["a".into(), "b".into()]));
        assert!(k.summary.is_none());
    }

    #[test]
    fn empty_object_is_valid() {
        assert_eq!(parse_knowledge("{}").unwrap(), ExtractedKnowledge::default());
    }

    #[test]
    fn prose_reply_is_contract_error() {
        let err = parse_knowledge("Sure! Here is the summary you asked for.").unwrap_err();
        assert!(err.to_string().contains("not valid knowledge JSON"));
    }

    #[test]
    fn off_list_values_pass_through() {
        let k = parse_knowledge(r#"{"Category":"Podcast","Difficulty":"大师"}"#).unwrap();
        assert_eq!(k.category.as_deref(), Some("Podcast"));
        assert_eq!(k.difficulty.as_deref(), Some("大师"));
    }

    #[tokio::test]
    async fn sends_content_as_user_message() {
        let client = MockCompletion::replying(r#"{"Title":"T"}"#);
        let k = extract_knowledge(&client, "page body").await.unwrap();
        assert_eq!(k.title.as_deref(), Some("T"));
        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "page body");
        assert!(calls[0].0.contains("Return pure JSON only"));
    }
}
