//! Domain model for backed-up content: pages, database rows, block trees and
//! rich text. Conversion from the Notion wire format happens here so the rest
//! of the crate only sees typed values.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn is_false(v: &bool) -> bool {
    !*v
}

/// One styled fragment of text. Concatenating `text` across a run sequence
/// reproduces the plain text of the block regardless of styling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichTextRun {
    pub text: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strikethrough: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl RichTextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn from_api(segment: &Value) -> Self {
        let ann = segment.get("annotations");
        let flag = |key: &str| {
            ann.and_then(|a| a.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        Self {
            text: segment
                .get("plain_text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            bold: flag("bold"),
            italic: flag("italic"),
            strikethrough: flag("strikethrough"),
            code: flag("code"),
            href: segment
                .get("href")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Where a binary asset lives according to the API: hosted by the service
/// (expiring signed URL) or an external link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum FileSource {
    Hosted(String),
    External(String),
}

impl FileSource {
    pub fn url(&self) -> &str {
        match self {
            FileSource::Hosted(url) | FileSource::External(url) => url,
        }
    }

    fn from_api(data: &Value) -> Option<Self> {
        if let Some(url) = data
            .get("file")
            .and_then(|f| f.get("url"))
            .and_then(Value::as_str)
        {
            return Some(FileSource::Hosted(url.to_string()));
        }
        data.get("external")
            .and_then(|e| e.get("url"))
            .and_then(Value::as_str)
            .map(|url| FileSource::External(url.to_string()))
    }
}

/// Closed set of block types. Anything the API serves outside this set lands
/// in `Unsupported` and is rendered as a visible placeholder, never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph {
        rich_text: Vec<RichTextRun>,
    },
    #[serde(rename = "heading_1")]
    Heading1 {
        rich_text: Vec<RichTextRun>,
    },
    #[serde(rename = "heading_2")]
    Heading2 {
        rich_text: Vec<RichTextRun>,
    },
    #[serde(rename = "heading_3")]
    Heading3 {
        rich_text: Vec<RichTextRun>,
    },
    BulletedListItem {
        rich_text: Vec<RichTextRun>,
    },
    NumberedListItem {
        rich_text: Vec<RichTextRun>,
    },
    ToDo {
        rich_text: Vec<RichTextRun>,
        checked: bool,
    },
    Toggle {
        rich_text: Vec<RichTextRun>,
    },
    Quote {
        rich_text: Vec<RichTextRun>,
    },
    Callout {
        rich_text: Vec<RichTextRun>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },
    Code {
        rich_text: Vec<RichTextRun>,
        language: String,
    },
    Divider,
    Image {
        source: FileSource,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        caption: Vec<RichTextRun>,
    },
    File {
        source: FileSource,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        caption: Vec<RichTextRun>,
    },
    Bookmark {
        url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        caption: Vec<RichTextRun>,
    },
    Table,
    TableRow {
        cells: Vec<Vec<RichTextRun>>,
    },
    ColumnList,
    Column,
    Equation {
        expression: String,
    },
    Embed {
        url: String,
    },
    ChildPage {
        title: String,
    },
    ChildDatabase {
        title: String,
    },
    Unsupported {
        original_type: String,
    },
}

/// One node of an item's content tree. Children are owned exclusively by
/// their parent; the tree is acyclic by construction (see `fetch`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockNode {
    pub id: String,
    #[serde(flatten)]
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockNode>,
}

impl BlockNode {
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            kind,
            children: Vec::new(),
        }
    }

    /// Whether this kind of block can carry child blocks worth fetching.
    /// `Unsupported` returns true so containers outside the closed set
    /// (synced blocks, templates) still have their children preserved.
    /// Child pages and databases are their own top-level items; descending
    /// into them here would duplicate their content under every ancestor.
    pub fn supports_children(&self) -> bool {
        matches!(
            self.kind,
            BlockKind::Paragraph { .. }
                | BlockKind::BulletedListItem { .. }
                | BlockKind::NumberedListItem { .. }
                | BlockKind::ToDo { .. }
                | BlockKind::Toggle { .. }
                | BlockKind::Quote { .. }
                | BlockKind::Callout { .. }
                | BlockKind::Table
                | BlockKind::ColumnList
                | BlockKind::Column
                | BlockKind::Unsupported { .. }
        )
    }
}

/// A block as returned by one children-list call, before its own children
/// have been fetched.
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub node: BlockNode,
    pub has_children: bool,
}

impl FetchedBlock {
    pub fn from_api(raw: &Value) -> Self {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let type_tag = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let data = raw.get(type_tag).cloned().unwrap_or(Value::Null);
        let has_children = raw
            .get("has_children")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let rich_text = |key: &str| -> Vec<RichTextRun> {
            data.get(key)
                .and_then(Value::as_array)
                .map(|segments| segments.iter().map(RichTextRun::from_api).collect())
                .unwrap_or_default()
        };

        let kind = match type_tag {
            "paragraph" => BlockKind::Paragraph {
                rich_text: rich_text("rich_text"),
            },
            "heading_1" => BlockKind::Heading1 {
                rich_text: rich_text("rich_text"),
            },
            "heading_2" => BlockKind::Heading2 {
                rich_text: rich_text("rich_text"),
            },
            "heading_3" => BlockKind::Heading3 {
                rich_text: rich_text("rich_text"),
            },
            "bulleted_list_item" => BlockKind::BulletedListItem {
                rich_text: rich_text("rich_text"),
            },
            "numbered_list_item" => BlockKind::NumberedListItem {
                rich_text: rich_text("rich_text"),
            },
            "to_do" => BlockKind::ToDo {
                rich_text: rich_text("rich_text"),
                checked: data
                    .get("checked")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            "toggle" => BlockKind::Toggle {
                rich_text: rich_text("rich_text"),
            },
            "quote" => BlockKind::Quote {
                rich_text: rich_text("rich_text"),
            },
            "callout" => BlockKind::Callout {
                rich_text: rich_text("rich_text"),
                icon: data
                    .get("icon")
                    .filter(|icon| icon.get("type").and_then(Value::as_str) == Some("emoji"))
                    .and_then(|icon| icon.get("emoji"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "code" => BlockKind::Code {
                rich_text: rich_text("rich_text"),
                language: data
                    .get("language")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "divider" => BlockKind::Divider,
            "image" => match FileSource::from_api(&data) {
                Some(source) => BlockKind::Image {
                    source,
                    caption: rich_text("caption"),
                },
                None => BlockKind::Unsupported {
                    original_type: type_tag.to_string(),
                },
            },
            "file" | "pdf" | "video" | "audio" => match FileSource::from_api(&data) {
                Some(source) => BlockKind::File {
                    source,
                    caption: rich_text("caption"),
                },
                None => BlockKind::Unsupported {
                    original_type: type_tag.to_string(),
                },
            },
            "bookmark" => BlockKind::Bookmark {
                url: data
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                caption: rich_text("caption"),
            },
            "table" => BlockKind::Table,
            "table_row" => BlockKind::TableRow {
                cells: data
                    .get("cells")
                    .and_then(Value::as_array)
                    .map(|cells| {
                        cells
                            .iter()
                            .map(|cell| {
                                cell.as_array()
                                    .map(|segments| {
                                        segments.iter().map(RichTextRun::from_api).collect()
                                    })
                                    .unwrap_or_default()
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "column_list" => BlockKind::ColumnList,
            "column" => BlockKind::Column,
            "equation" => BlockKind::Equation {
                expression: data
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "embed" | "link_preview" => BlockKind::Embed {
                url: data
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "child_page" => BlockKind::ChildPage {
                title: data
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Untitled")
                    .to_string(),
            },
            "child_database" => BlockKind::ChildDatabase {
                title: data
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Untitled Database")
                    .to_string(),
            },
            other => BlockKind::Unsupported {
                original_type: other.to_string(),
            },
        };

        Self {
            node: BlockNode::new(id, kind),
            has_children,
        }
    }
}

/// Page metadata: identity, timestamps, parent link and the raw property map.
/// Properties are kept as wire values so the structured record stays lossless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub id: String,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub last_edited_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl PageMeta {
    pub fn from_api(raw: &Value) -> Self {
        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let parent = raw.get("parent");
        let parent_id = parent
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .and_then(|kind| match kind {
                "page_id" | "database_id" => parent
                    .and_then(|p| p.get(kind))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            });
        Self {
            id: text("id"),
            created_time: text("created_time"),
            last_edited_time: text("last_edited_time"),
            parent_id,
            properties: raw
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// A fully materialized page: metadata plus its block tree. This is the unit
/// both the structured writer and the markdown renderer consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTree {
    pub page: PageMeta,
    #[serde(default)]
    pub blocks: Vec<BlockNode>,
}

/// A fully materialized database: raw schema plus every row as its own page
/// tree (parent = the database id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseTree {
    pub database: Value,
    #[serde(default)]
    pub rows: Vec<PageTree>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rich_text_from_api_reads_annotations_and_href() {
        let run = RichTextRun::from_api(&json!({
            "plain_text": "hello",
            "annotations": { "bold": true, "code": true },
            "href": "https://example.com"
        }));
        assert_eq!(run.text, "hello");
        assert!(run.bold);
        assert!(run.code);
        assert!(!run.italic);
        assert_eq!(run.href.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn rich_text_concat_reproduces_plain_text() {
        let runs = vec![
            RichTextRun {
                text: "a ".into(),
                bold: true,
                ..Default::default()
            },
            RichTextRun {
                text: "b".into(),
                italic: true,
                code: true,
                ..Default::default()
            },
            RichTextRun::plain(" c"),
        ];
        let joined: String = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(joined, "a b c");
    }

    #[test]
    fn block_from_api_parses_to_do() {
        let fetched = FetchedBlock::from_api(&json!({
            "id": "b1",
            "type": "to_do",
            "has_children": false,
            "to_do": {
                "rich_text": [{ "plain_text": "task" }],
                "checked": true
            }
        }));
        assert!(!fetched.has_children);
        match &fetched.node.kind {
            BlockKind::ToDo { rich_text, checked } => {
                assert_eq!(rich_text[0].text, "task");
                assert!(*checked);
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn block_from_api_maps_unknown_type_to_unsupported() {
        let fetched = FetchedBlock::from_api(&json!({
            "id": "b2",
            "type": "breadcrumb",
            "has_children": false,
            "breadcrumb": {}
        }));
        assert_eq!(
            fetched.node.kind,
            BlockKind::Unsupported {
                original_type: "breadcrumb".into()
            }
        );
        assert!(fetched.node.supports_children());
    }

    #[test]
    fn child_page_blocks_carry_title_and_never_recurse() {
        let fetched = FetchedBlock::from_api(&json!({
            "id": "b5",
            "type": "child_page",
            "has_children": true,
            "child_page": { "title": "Nested Page" }
        }));
        assert_eq!(
            fetched.node.kind,
            BlockKind::ChildPage {
                title: "Nested Page".into()
            }
        );
        assert!(!fetched.node.supports_children());

        let db = FetchedBlock::from_api(&json!({
            "id": "b6",
            "type": "child_database",
            "has_children": true,
            "child_database": { "title": "Nested DB" }
        }));
        assert_eq!(
            db.node.kind,
            BlockKind::ChildDatabase {
                title: "Nested DB".into()
            }
        );
        assert!(!db.node.supports_children());
    }

    #[test]
    fn block_from_api_parses_hosted_and_external_files() {
        let hosted = FetchedBlock::from_api(&json!({
            "id": "b3",
            "type": "image",
            "image": { "file": { "url": "https://host/a.png" } }
        }));
        match &hosted.node.kind {
            BlockKind::Image { source, .. } => {
                assert_eq!(source, &FileSource::Hosted("https://host/a.png".into()));
            }
            other => panic!("wrong kind: {other:?}"),
        }

        let external = FetchedBlock::from_api(&json!({
            "id": "b4",
            "type": "pdf",
            "pdf": { "external": { "url": "https://cdn/b.pdf" } }
        }));
        match &external.node.kind {
            BlockKind::File { source, .. } => {
                assert_eq!(source.url(), "https://cdn/b.pdf");
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn page_meta_from_api_extracts_parent_page() {
        let meta = PageMeta::from_api(&json!({
            "id": "p1",
            "created_time": "2024-01-01T00:00:00.000Z",
            "last_edited_time": "2024-01-02T00:00:00.000Z",
            "parent": { "type": "page_id", "page_id": "p0" },
            "properties": { "title": { "type": "title", "title": [] } }
        }));
        assert_eq!(meta.id, "p1");
        assert_eq!(meta.parent_id.as_deref(), Some("p0"));
        assert!(meta.properties.contains_key("title"));
    }

    #[test]
    fn page_meta_workspace_parent_is_top_level() {
        let meta = PageMeta::from_api(&json!({
            "id": "p2",
            "parent": { "type": "workspace", "workspace": true }
        }));
        assert_eq!(meta.parent_id, None);
    }

    #[test]
    fn block_tree_serde_round_trip() {
        let tree = BlockNode {
            id: "root".into(),
            kind: BlockKind::Toggle {
                rich_text: vec![RichTextRun::plain("open me")],
            },
            children: vec![BlockNode {
                id: "child".into(),
                kind: BlockKind::ToDo {
                    rich_text: vec![RichTextRun {
                        text: "done".into(),
                        bold: true,
                        ..Default::default()
                    }],
                    checked: true,
                },
                children: Vec::new(),
            }],
        };
        let json = serde_json::to_string(&tree).unwrap();
        let back: BlockNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}
