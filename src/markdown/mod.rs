//! Block-tree to Markdown conversion: rich-text styling, per-type rendering
//! and YAML front matter. Pure functions over the already-materialized tree.
use serde_json::Value;
use serde_yaml::Mapping;

use crate::model::{BlockKind, BlockNode, PageMeta, RichTextRun};

pub mod writer;

/// Styles nest innermost-first: code, bold, italic, strikethrough, then the
/// link wraps the fully styled run.
pub fn render_rich_text(runs: &[RichTextRun]) -> String {
    let mut out = String::new();
    for run in runs {
        let mut text = run.text.clone();
        if run.code {
            text = format!("`{text}`");
        }
        if run.bold {
            text = format!("**{text}**");
        }
        if run.italic {
            text = format!("*{text}*");
        }
        if run.strikethrough {
            text = format!("~~{text}~~");
        }
        if let Some(href) = &run.href {
            text = format!("[{text}]({href})");
        }
        out.push_str(&text);
    }
    out
}

pub fn plain_text(runs: &[RichTextRun]) -> String {
    runs.iter().map(|r| r.text.as_str()).collect()
}

/// Formatted text of a wire rich-text array (page properties keep the wire
/// shape in the structured record).
fn wire_rich_text(value: &Value) -> String {
    let runs: Vec<RichTextRun> = value
        .as_array()
        .map(|segments| segments.iter().map(RichTextRun::from_api).collect())
        .unwrap_or_default();
    render_rich_text(&runs)
}

/// The page title is whichever property carries the `title` type.
pub fn page_title(meta: &PageMeta) -> String {
    for prop in meta.properties.values() {
        if prop.get("type").and_then(Value::as_str) == Some("title") {
            let title = wire_rich_text(prop.get("title").unwrap_or(&Value::Null));
            if !title.is_empty() {
                return title;
            }
        }
    }
    "Untitled".to_string()
}

/// Title of a database from its raw schema.
pub fn database_title(schema: &Value) -> String {
    let title = wire_rich_text(schema.get("title").unwrap_or(&Value::Null));
    if title.is_empty() {
        "Untitled Database".to_string()
    } else {
        title
    }
}

/// Flatten one wire property into a plain YAML-friendly value.
pub fn extract_property_value(prop: &Value) -> Option<Value> {
    let kind = prop.get("type").and_then(Value::as_str)?;
    let field = prop.get(kind);
    match kind {
        "title" => Some(Value::String(wire_rich_text(field?))),
        "rich_text" => Some(Value::String(wire_rich_text(field?))),
        "number" | "checkbox" | "url" | "email" | "phone_number" | "created_time"
        | "last_edited_time" => field.filter(|v| !v.is_null()).cloned(),
        "select" | "status" => field?.get("name").cloned(),
        "multi_select" => Some(Value::Array(
            field?
                .as_array()?
                .iter()
                .filter_map(|s| s.get("name").cloned())
                .collect(),
        )),
        "date" => field?.get("start").filter(|v| !v.is_null()).cloned(),
        "people" => Some(Value::Array(
            field?
                .as_array()?
                .iter()
                .filter_map(|p| p.get("name").or_else(|| p.get("id")).cloned())
                .collect(),
        )),
        "files" => Some(Value::Array(
            field?
                .as_array()?
                .iter()
                .filter_map(|f| f.get("name").cloned())
                .collect(),
        )),
        "relation" => Some(Value::Array(
            field?
                .as_array()?
                .iter()
                .filter_map(|r| r.get("id").cloned())
                .collect(),
        )),
        "formula" | "rollup" => {
            let inner = field?;
            let inner_kind = inner.get("type").and_then(Value::as_str)?;
            inner.get(inner_kind).filter(|v| !v.is_null()).cloned()
        }
        "created_by" | "last_edited_by" => field?.get("name").cloned(),
        _ => None,
    }
}

/// YAML front matter: item id, timestamps and the flattened property map
/// (minus the title property, which becomes the document heading).
pub fn frontmatter(meta: &PageMeta) -> String {
    let mut doc = Mapping::new();
    doc.insert("notion_id".into(), meta.id.clone().into());
    doc.insert("created".into(), meta.created_time.clone().into());
    doc.insert("last_edited".into(), meta.last_edited_time.clone().into());

    let mut props = Mapping::new();
    for (name, prop) in &meta.properties {
        if prop.get("type").and_then(Value::as_str) == Some("title") {
            continue;
        }
        if let Some(value) = extract_property_value(prop) {
            if let Ok(yaml) = serde_yaml::to_value(&value) {
                props.insert(name.clone().into(), yaml);
            }
        }
    }
    if !props.is_empty() {
        doc.insert("properties".into(), serde_yaml::Value::Mapping(props));
    }

    let yaml = serde_yaml::to_string(&doc).unwrap_or_default();
    format!("---\n{yaml}---\n\n")
}

/// Render a block sequence. `files_rel` is the relative path from the output
/// document to the run's `files/` directory; `assets` maps source references
/// to stored filenames.
pub fn blocks_to_markdown(
    blocks: &[BlockNode],
    files_rel: &str,
    assets: &std::collections::HashMap<String, String>,
    indent: usize,
) -> String {
    let mut parts = Vec::new();
    let mut ordinal = 0u32;
    for block in blocks {
        if matches!(block.kind, BlockKind::NumberedListItem { .. }) {
            ordinal += 1;
        } else {
            ordinal = 0;
        }
        let md = block_to_markdown(block, files_rel, assets, indent, ordinal);
        if !md.is_empty() {
            parts.push(md);
        }
    }
    parts.join("\n")
}

fn block_to_markdown(
    block: &BlockNode,
    files_rel: &str,
    assets: &std::collections::HashMap<String, String>,
    indent: usize,
    ordinal: u32,
) -> String {
    let prefix = "  ".repeat(indent);
    let children = |extra: usize| -> String {
        blocks_to_markdown(&block.children, files_rel, assets, indent + extra)
    };
    let nested = |text: String, extra: usize| -> String {
        if block.children.is_empty() {
            text
        } else {
            format!("{text}{}", children(extra))
        }
    };

    match &block.kind {
        BlockKind::Paragraph { rich_text } => {
            nested(format!("{prefix}{}\n", render_rich_text(rich_text)), 1)
        }
        BlockKind::Heading1 { rich_text } => {
            format!("{prefix}# {}\n", render_rich_text(rich_text))
        }
        BlockKind::Heading2 { rich_text } => {
            format!("{prefix}## {}\n", render_rich_text(rich_text))
        }
        BlockKind::Heading3 { rich_text } => {
            format!("{prefix}### {}\n", render_rich_text(rich_text))
        }
        BlockKind::BulletedListItem { rich_text } => {
            nested(format!("{prefix}- {}\n", render_rich_text(rich_text)), 1)
        }
        BlockKind::NumberedListItem { rich_text } => nested(
            format!("{prefix}{ordinal}. {}\n", render_rich_text(rich_text)),
            1,
        ),
        BlockKind::ToDo { rich_text, checked } => {
            let marker = if *checked { "[x]" } else { "[ ]" };
            nested(
                format!("{prefix}- {marker} {}\n", render_rich_text(rich_text)),
                1,
            )
        }
        BlockKind::Toggle { rich_text } => {
            // Collapsibility survives as an HTML disclosure element.
            let summary = render_rich_text(rich_text);
            format!(
                "{prefix}<details>\n{prefix}<summary>{summary}</summary>\n\n{}{prefix}</details>\n",
                nested(String::new(), 0)
            )
        }
        BlockKind::Quote { rich_text } => {
            let text = render_rich_text(rich_text);
            let quoted: Vec<String> = text
                .split('\n')
                .map(|line| format!("{prefix}> {line}"))
                .collect();
            nested(format!("{}\n", quoted.join("\n")), 1)
        }
        BlockKind::Callout { rich_text, icon } => {
            let emoji = icon.as_deref().unwrap_or("💡");
            nested(
                format!("{prefix}> {emoji} {}\n", render_rich_text(rich_text)),
                1,
            )
        }
        BlockKind::Code {
            rich_text,
            language,
        } => {
            format!(
                "{prefix}```{language}\n{}\n{prefix}```\n",
                plain_text(rich_text)
            )
        }
        BlockKind::Divider => format!("{prefix}---\n"),
        BlockKind::Image { source, caption } => {
            let alt = or_default(&render_rich_text(caption), "image");
            match assets.get(source.url()) {
                Some(filename) => format!("{prefix}![{alt}]({files_rel}/{filename})\n"),
                None => format!("{prefix}![{alt}](missing-image)\n"),
            }
        }
        BlockKind::File { source, caption } => {
            let name = or_default(&render_rich_text(caption), "file");
            match assets.get(source.url()) {
                Some(filename) => format!("{prefix}[{name}]({files_rel}/{filename})\n"),
                None => format!("{prefix}[{name}](missing-file)\n"),
            }
        }
        BlockKind::Bookmark { url, caption } => {
            let title = or_default(&render_rich_text(caption), url);
            format!("{prefix}[{title}]({url})\n")
        }
        BlockKind::Table => render_table(block, &prefix),
        // Rows outside a table have no grid to land in; render cells inline.
        BlockKind::TableRow { cells } => {
            let texts: Vec<String> = cells.iter().map(|c| render_rich_text(c)).collect();
            format!("{prefix}| {} |\n", texts.join(" | "))
        }
        // Columns are a layout construct with no Markdown counterpart; their
        // contents flow sequentially.
        BlockKind::ColumnList | BlockKind::Column => children(0),
        BlockKind::Equation { expression } => {
            format!("{prefix}$$\n{expression}\n$$\n")
        }
        BlockKind::Embed { url } => format!("{prefix}[{url}]({url})\n"),
        // Nested pages and databases are backed up as their own documents;
        // here we only note that they exist.
        BlockKind::ChildPage { title } => format!("{prefix}📄 [{title}]()\n"),
        BlockKind::ChildDatabase { title } => format!("{prefix}🗃️ [{title}]()\n"),
        BlockKind::Unsupported { original_type } => nested(
            format!("{prefix}<!-- unsupported block type: {original_type} -->\n"),
            0,
        ),
    }
}

fn render_table(block: &BlockNode, prefix: &str) -> String {
    let mut lines = Vec::new();
    for (i, row) in block.children.iter().enumerate() {
        let BlockKind::TableRow { cells } = &row.kind else {
            continue;
        };
        let texts: Vec<String> = cells.iter().map(|c| render_rich_text(c)).collect();
        lines.push(format!("{prefix}| {} |", texts.join(" | ")));
        if i == 0 {
            // First row is the header.
            lines.push(format!("{prefix}|{}|", vec!["---"; cells.len()].join("|")));
        }
    }
    if lines.is_empty() {
        return String::new();
    }
    format!("{}\n", lines.join("\n"))
}

fn or_default(text: &str, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}
