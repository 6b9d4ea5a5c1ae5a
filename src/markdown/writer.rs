//! Places rendered Markdown on disk. The directory hierarchy mirrors page
//! nesting: a child page lands in a directory named after its parent, next to
//! the parent's own file.
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::markdown::{blocks_to_markdown, database_title, frontmatter, page_title};
use crate::model::{DatabaseTree, PageTree};

const MAX_TITLE_LEN: usize = 100;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Turn a title into a filename safe on every supported filesystem.
pub fn sanitize_filename(name: &str) -> String {
    let safe = UNSAFE_CHARS.replace_all(name, "-");
    let safe = WHITESPACE.replace_all(&safe, " ");
    let mut safe = safe.trim_matches(['.', ' ']).to_string();
    if safe.chars().count() > MAX_TITLE_LEN {
        safe = safe.chars().take(MAX_TITLE_LEN).collect();
        safe = safe.trim_end_matches(['.', ' ']).to_string();
    }
    if safe.is_empty() {
        "Untitled".to_string()
    } else {
        safe
    }
}

pub struct MarkdownWriter {
    markdown_root: PathBuf,
    // id of a written page or database -> where it lives. Pages map to their
    // `.md` file; databases map to their directory.
    paths: HashMap<String, PathBuf>,
}

impl MarkdownWriter {
    pub fn new(markdown_root: &Path) -> Self {
        Self {
            markdown_root: markdown_root.to_path_buf(),
            paths: HashMap::new(),
        }
    }

    /// Render one page and write it under its parent's directory. Parents
    /// must be written before their children for nesting to take effect; an
    /// unknown parent falls back to the root.
    pub fn write_page(
        &mut self,
        tree: &PageTree,
        assets: &HashMap<String, String>,
    ) -> Result<PathBuf> {
        let title = page_title(&tree.page);
        let dir = self.output_dir_for(tree.page.parent_id.as_deref());
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = unique_file(&dir, &sanitize_filename(&title));

        let files_rel = self.files_rel_for(&dir);
        let mut content = frontmatter(&tree.page);
        content.push_str(&format!("# {title}\n\n"));
        content.push_str(&blocks_to_markdown(&tree.blocks, &files_rel, assets, 0));

        fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "wrote markdown");
        self.paths.insert(tree.page.id.clone(), path.clone());
        Ok(path)
    }

    /// Render a database as a directory named after its schema title, with
    /// one file per row inside.
    pub fn write_database(
        &mut self,
        tree: &DatabaseTree,
        assets: &HashMap<String, String>,
    ) -> Result<Vec<PathBuf>> {
        let dir = unique_dir(&self.markdown_root, &sanitize_filename(&database_title(&tree.database)));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        if let Some(id) = tree.database.get("id").and_then(serde_json::Value::as_str) {
            self.paths.insert(id.to_string(), dir.clone());
        }

        let mut written = Vec::with_capacity(tree.rows.len());
        for row in &tree.rows {
            written.push(self.write_page(row, assets)?);
        }
        Ok(written)
    }

    pub fn page_path(&self, id: &str) -> Option<&Path> {
        self.paths.get(id).map(PathBuf::as_path)
    }

    fn output_dir_for(&self, parent_id: Option<&str>) -> PathBuf {
        match parent_id.and_then(|id| self.paths.get(id)) {
            // A parent page's children live in a sibling directory of its file.
            Some(path) if path.extension().is_some_and(|e| e == "md") => {
                path.with_extension("")
            }
            Some(dir) => dir.clone(),
            None => self.markdown_root.clone(),
        }
    }

    /// Relative link prefix from a document in `dir` to the run's `files/`
    /// directory, which sits next to the markdown root.
    fn files_rel_for(&self, dir: &Path) -> String {
        let depth = dir
            .strip_prefix(&self.markdown_root)
            .map(|rel| rel.components().count())
            .unwrap_or(0);
        format!("{}files", "../".repeat(depth + 1))
    }
}

fn unique_file(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.md"));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1;
    loop {
        let candidate = dir.join(format!("{stem} ({counter}).md"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn unique_dir(parent: &Path, name: &str) -> PathBuf {
    let candidate = parent.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{name} ({counter})"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockKind, BlockNode, FileSource, PageMeta, RichTextRun};
    use serde_json::json;
    use tempfile::tempdir;

    fn page(id: &str, title: &str, parent_id: Option<&str>) -> PageTree {
        PageTree {
            page: PageMeta {
                id: id.into(),
                parent_id: parent_id.map(str::to_string),
                properties: serde_json::from_value(json!({
                    "Name": { "type": "title", "title": [{ "plain_text": title }] }
                }))
                .unwrap(),
                ..Default::default()
            },
            blocks: vec![BlockNode::new(
                format!("{id}-b"),
                BlockKind::Paragraph {
                    rich_text: vec![RichTextRun::plain("body")],
                },
            )],
        }
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b:c?d"), "a-b-c-d");
        assert_eq!(sanitize_filename("  spaced   out  "), "spaced out");
        assert_eq!(sanitize_filename("..."), "Untitled");
        assert_eq!(sanitize_filename(""), "Untitled");
        let long = "x".repeat(300);
        assert_eq!(sanitize_filename(&long).chars().count(), 100);
    }

    #[test]
    fn child_pages_nest_under_parent_directory() {
        let dir = tempdir().unwrap();
        let mut writer = MarkdownWriter::new(dir.path());
        let assets = HashMap::new();

        let parent_path = writer.write_page(&page("p1", "Projects", None), &assets).unwrap();
        let child_path = writer
            .write_page(&page("p2", "Roadmap", Some("p1")), &assets)
            .unwrap();

        assert_eq!(parent_path, dir.path().join("Projects.md"));
        assert_eq!(child_path, dir.path().join("Projects").join("Roadmap.md"));
        assert!(parent_path.is_file());
    }

    #[test]
    fn unknown_parent_falls_back_to_root() {
        let dir = tempdir().unwrap();
        let mut writer = MarkdownWriter::new(dir.path());
        let path = writer
            .write_page(&page("p1", "Orphan", Some("missing")), &HashMap::new())
            .unwrap();
        assert_eq!(path, dir.path().join("Orphan.md"));
    }

    #[test]
    fn duplicate_titles_get_counter_suffix() {
        let dir = tempdir().unwrap();
        let mut writer = MarkdownWriter::new(dir.path());
        let assets = HashMap::new();
        let first = writer.write_page(&page("p1", "Notes", None), &assets).unwrap();
        let second = writer.write_page(&page("p2", "Notes", None), &assets).unwrap();
        assert_eq!(first, dir.path().join("Notes.md"));
        assert_eq!(second, dir.path().join("Notes (1).md"));
    }

    #[test]
    fn nested_pages_link_assets_through_extra_parent_dirs() {
        let dir = tempdir().unwrap();
        let mut writer = MarkdownWriter::new(dir.path());
        let mut assets = HashMap::new();
        assets.insert("https://h/p.png".to_string(), "abcd-p.png".to_string());

        writer.write_page(&page("p1", "Top", None), &assets).unwrap();
        let mut child = page("p2", "Inner", Some("p1"));
        child.blocks.push(BlockNode::new(
            "img",
            BlockKind::Image {
                source: FileSource::Hosted("https://h/p.png".into()),
                caption: vec![],
            },
        ));
        let path = writer.write_page(&child, &assets).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("](../../files/abcd-p.png)"));

        let top = fs::read_to_string(dir.path().join("Top.md")).unwrap();
        assert!(top.contains("# Top"));
        assert!(top.starts_with("---\n"));
    }

    #[test]
    fn database_rows_land_in_titled_directory() {
        let dir = tempdir().unwrap();
        let mut writer = MarkdownWriter::new(dir.path());
        let tree = DatabaseTree {
            database: json!({
                "id": "db1",
                "title": [{ "plain_text": "Tasks" }]
            }),
            rows: vec![page("r1", "Row One", Some("db1")), page("r2", "Row Two", Some("db1"))],
        };
        let written = writer.write_database(&tree, &HashMap::new()).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("Tasks").join("Row One.md"),
                dir.path().join("Tasks").join("Row Two.md"),
            ]
        );
    }
}
