use serde::Deserialize;
use serde_json::Value;

/// One page of a cursor-paginated listing. Every list endpoint (search,
/// block children, database query) returns this shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectList {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ObjectList {
    pub fn cursor(&self) -> Option<String> {
        if self.has_more {
            self.next_cursor.clone()
        } else {
            None
        }
    }
}
