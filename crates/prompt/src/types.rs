//! Template context types.

use serde::Serialize;

/// Values available to the instructions template.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionContext {
    /// Absolute workspace path
    pub workspace: String,

    /// Names of the entries directly under the workspace root, sorted
    pub root_entries: Vec<String>,

    /// `root_entries` as a JSON array, for embedding verbatim
    pub root_entries_json: String,
}

impl InstructionContext {
    pub fn new(workspace: impl Into<String>, root_entries: Vec<String>) -> Self {
        let root_entries_json =
            serde_json::to_string(&root_entries).unwrap_or_else(|_| "[]".to_string());
        Self {
            workspace: workspace.into(),
            root_entries,
            root_entries_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_json() {
        let ctx = InstructionContext::new("/w", vec!["src".into(), "package.json".into()]);
        assert_eq!(ctx.root_entries_json, r#"["src","package.json"]"#);
    }
}
