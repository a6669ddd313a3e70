//! Document builder: [`ExtractedKnowledge`] → Notion page payload.
//!
//! Every knowledge field is optional, so this is where defaults are applied.
//! The page layout is fixed:
//!
//! | Order | Block | Present when |
//! |-------|-------|--------------|
//! | 1 | 💡 callout with the key insight | insight given |
//! | 2 | divider | always |
//! | 3 | "📖 摘要" heading + summary paragraph | heading always, paragraph if summary given |
//! | 4 | divider + "✅ 行动要点" heading + one to-do per item | action items given |
//! | 5 | divider + "📎 原文链接" heading + bookmark | source URL given |

use serde::Serialize;
use serde_json::{json, Value};

use crate::acquire::truncate_chars;
use crate::models::{Category, Difficulty, ExtractedKnowledge};

pub const DEFAULT_EMOJI: &str = "📝";
pub const DEFAULT_TITLE: &str = "无标题";
pub const INITIAL_STATUS: &str = "Not started";
/// Notion's rich-text limit for a single text object.
pub const SUMMARY_LIMIT: usize = 2000;

const INSIGHT_EMOJI: &str = "💡";
const SUMMARY_HEADING: &str = "📖 摘要";
const ACTIONS_HEADING: &str = "✅ 行动要点";
const SOURCE_HEADING: &str = "📎 原文链接";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parent {
    pub database_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Icon {
    #[serde(rename = "type")]
    pub kind: String,
    pub emoji: String,
}

/// Body of a `POST /v1/pages` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageDraft {
    pub parent: Parent,
    pub icon: Icon,
    pub properties: Value,
    pub children: Vec<Value>,
}

impl PageDraft {
    /// Block `type` names in order, e.g. `["callout", "divider", ...]`.
    pub fn block_types(&self) -> Vec<&str> {
        self.children
            .iter()
            .filter_map(|b| b.get("type").and_then(Value::as_str))
            .collect()
    }

    pub fn title(&self) -> Option<&str> {
        self.properties
            .pointer("/Name/title/0/text/content")
            .and_then(Value::as_str)
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

fn divider() -> Value {
    json!({ "object": "block", "type": "divider", "divider": {} })
}

fn heading(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_2",
        "heading_2": { "rich_text": rich_text(content) },
    })
}

/// Assemble the page for `knowledge` inside `database_id`.
pub fn build_page(
    knowledge: &ExtractedKnowledge,
    source_url: Option<&str>,
    database_id: &str,
) -> PageDraft {
    let title = non_empty(&knowledge.title).unwrap_or(DEFAULT_TITLE);
    let summary = knowledge.summary.as_deref().unwrap_or_default();
    let category = non_empty(&knowledge.category).unwrap_or(Category::Resource.label());
    let difficulty = non_empty(&knowledge.difficulty).unwrap_or(Difficulty::Beginner.label());
    if Category::from_label(category).is_none() {
        tracing::debug!(category, "category outside the fixed set; adding as a new option");
    }
    if Difficulty::from_label(difficulty).is_none() {
        tracing::debug!(difficulty, "difficulty outside the fixed set; adding as a new option");
    }
    let tags: Vec<Value> = knowledge
        .tags
        .iter()
        .flatten()
        .map(|t| json!({ "name": t }))
        .collect();

    let properties = json!({
        "Name": { "title": [{ "text": { "content": title } }] },
        "URL": { "url": source_url },
        "Type": { "select": { "name": category } },
        "Tags": { "multi_select": tags },
        "Summary": {
            "rich_text": [{ "text": { "content": truncate_chars(summary, SUMMARY_LIMIT) } }]
        },
        "Difficulty": { "select": { "name": difficulty } },
        "Status": { "status": { "name": INITIAL_STATUS } },
    });

    PageDraft {
        parent: Parent {
            database_id: database_id.to_string(),
        },
        icon: Icon {
            kind: "emoji".to_string(),
            emoji: knowledge
                .emoji
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EMOJI.to_string()),
        },
        properties,
        children: build_blocks(knowledge, source_url),
    }
}

fn build_blocks(knowledge: &ExtractedKnowledge, source_url: Option<&str>) -> Vec<Value> {
    let mut blocks = Vec::new();

    if let Some(insight) = knowledge.key_insight.as_deref().filter(|s| !s.is_empty()) {
        blocks.push(json!({
            "object": "block",
            "type": "callout",
            "callout": {
                "rich_text": rich_text(insight),
                "icon": { "type": "emoji", "emoji": INSIGHT_EMOJI },
                "color": "blue_background",
            },
        }));
    }

    blocks.push(divider());
    blocks.push(heading(SUMMARY_HEADING));
    if let Some(summary) = knowledge.summary.as_deref().filter(|s| !s.is_empty()) {
        blocks.push(json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": { "rich_text": rich_text(summary) },
        }));
    }

    let actions = knowledge.action_items.as_deref().unwrap_or_default();
    if !actions.is_empty() {
        blocks.push(divider());
        blocks.push(heading(ACTIONS_HEADING));
        for item in actions {
            blocks.push(json!({
                "object": "block",
                "type": "to_do",
                "to_do": { "rich_text": rich_text(item), "checked": false },
            }));
        }
    }

    if let Some(url) = source_url {
        blocks.push(divider());
        blocks.push(heading(SOURCE_HEADING));
        blocks.push(json!({
            "object": "block",
            "type": "bookmark",
            "bookmark": { "url": url },
        }));
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_knowledge() -> ExtractedKnowledge {
        ExtractedKnowledge {
            title: Some("Rust 所有权".into()),
            summary: Some("摘要内容".into()),
            tags: Some(vec!["rust".into(), "内存".into()]),
            category: Some("教程".into()),
            key_insight: Some("借用检查器让数据竞争无法编译".into()),
            difficulty: Some("进阶".into()),
            action_items: Some(vec!["阅读官方书".into(), "重写一个模块".into()]),
            emoji: Some("🦀".into()),
        }
    }

    #[test]
    fn full_page_layout() {
        let page = build_page(&full_knowledge(), Some("https://example.com/a"), "db-1");

        assert_eq!(
            page.block_types(),
            vec![
                "callout", "divider", "heading_2", "paragraph", "divider", "heading_2", "to_do",
                "to_do", "divider", "heading_2", "bookmark"
            ]
        );
        assert_eq!(page.parent.database_id, "db-1");
        assert_eq!(page.icon.emoji, "🦀");
        assert_eq!(page.title(), Some("Rust 所有权"));
        assert_eq!(page.properties["Type"]["select"]["name"], "教程");
        assert_eq!(page.properties["Difficulty"]["select"]["name"], "进阶");
        assert_eq!(page.properties["Status"]["status"]["name"], INITIAL_STATUS);
        assert_eq!(page.properties["URL"]["url"], "https://example.com/a");
        assert_eq!(page.properties["Tags"]["multi_select"][1]["name"], "内存");
        assert_eq!(page.children[10]["bookmark"]["url"], "https://example.com/a");
        assert_eq!(page.children[6]["to_do"]["checked"], false);
    }

    #[test]
    fn empty_knowledge_gets_defaults() {
        let page = build_page(&ExtractedKnowledge::default(), None, "db-1");

        assert_eq!(page.block_types(), vec!["divider", "heading_2"]);
        assert_eq!(page.icon.emoji, DEFAULT_EMOJI);
        assert_eq!(page.title(), Some(DEFAULT_TITLE));
        assert_eq!(page.properties["Type"]["select"]["name"], "资源");
        assert_eq!(page.properties["Difficulty"]["select"]["name"], "入门");
        assert!(page.properties["URL"]["url"].is_null());
        assert_eq!(page.properties["Tags"]["multi_select"], json!([]));
        assert_eq!(page.properties["Summary"]["rich_text"][0]["text"]["content"], "");
    }

    #[test]
    fn empty_strings_fall_back_to_defaults() {
        let knowledge: ExtractedKnowledge = serde_json::from_str(
            r#"{"Title":"","Category":"","Difficulty":" ","Emoji":""}"#,
        )
        .unwrap();
        let page = build_page(&knowledge, None, "db-1");

        assert_eq!(page.title(), Some(DEFAULT_TITLE));
        assert_eq!(page.properties["Type"]["select"]["name"], "资源");
        assert_eq!(page.properties["Difficulty"]["select"]["name"], "入门");
        assert_eq!(page.icon.emoji, DEFAULT_EMOJI);
    }

    #[test]
    fn off_list_labels_pass_through() {
        let knowledge = ExtractedKnowledge {
            category: Some("播客".into()),
            difficulty: Some("大师".into()),
            ..Default::default()
        };
        let page = build_page(&knowledge, None, "db-1");

        assert_eq!(page.properties["Type"]["select"]["name"], "播客");
        assert_eq!(page.properties["Difficulty"]["select"]["name"], "大师");
    }

    #[test]
    fn summary_property_is_capped_but_paragraph_is_not() {
        let knowledge = ExtractedKnowledge {
            summary: Some("字".repeat(2500)),
            ..Default::default()
        };
        let page = build_page(&knowledge, None, "db");
        let prop = page.properties["Summary"]["rich_text"][0]["text"]["content"]
            .as_str()
            .unwrap();
        assert_eq!(prop.chars().count(), SUMMARY_LIMIT);
        let para = page.children[2]["paragraph"]["rich_text"][0]["text"]["content"]
            .as_str()
            .unwrap();
        assert_eq!(para.chars().count(), 2500);
    }

    #[test]
    fn serializes_parent_and_icon() {
        let page = build_page(&ExtractedKnowledge::default(), None, "db-7");
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["parent"], json!({ "database_id": "db-7" }));
        assert_eq!(json["icon"], json!({ "type": "emoji", "emoji": "📝" }));
    }
}
