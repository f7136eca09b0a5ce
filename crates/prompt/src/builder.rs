//! Instructions builder for rendering the per-run assistant instructions.

use crate::loader::load_template;
use crate::types::InstructionContext;
use aide_core::{AppError, AppResult};
use handlebars::Handlebars;
use std::path::Path;

/// Render the instructions sent with every run.
///
/// This function:
/// 1. Lists the entries at the workspace root
/// 2. Loads the template (`.aide/instructions.hbs` or the default)
/// 3. Renders it with Handlebars
///
/// # Example
/// ```no_run
/// use aide_prompt::build_instructions;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let instructions = build_instructions(Path::new("."))?;
/// println!("{}", instructions);
/// # Ok(())
/// # }
/// ```
pub fn build_instructions(workspace_path: &Path) -> AppResult<String> {
    let entries = list_root_entries(workspace_path)?;
    let context = InstructionContext::new(workspace_path.display().to_string(), entries);
    let template = load_template(workspace_path)?;

    tracing::debug!(
        "Building instructions for {:?} ({} root entries)",
        workspace_path,
        context.root_entries.len()
    );
    render_template(&template, &context)
}

/// Render a Handlebars template with the instruction context.
pub fn render_template(template: &str, context: &InstructionContext) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("instructions", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    handlebars
        .render("instructions", context)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))
}

/// Names of the files and folders directly under `path`, sorted.
fn list_root_entries(path: &Path) -> AppResult<Vec<String>> {
    if !path.is_dir() {
        return Err(AppError::Prompt(format!(
            "Workspace {:?} is not a directory",
            path
        )));
    }

    let mut entries: Vec<String> = walkdir::WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aide_core::config::AIDE_DIR;
    use tempfile::TempDir;

    #[test]
    fn test_default_instructions_name_workspace_and_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let text = build_instructions(dir.path()).unwrap();
        assert!(text.contains(&dir.path().display().to_string()));
        assert!(text.contains(r#"["package.json","src"]"#));
    }

    #[test]
    fn test_override_template_is_not_html_escaped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(AIDE_DIR)).unwrap();
        std::fs::write(
            dir.path().join(AIDE_DIR).join("instructions.hbs"),
            "{{#each rootEntries}}<{{this}}>{{/each}}",
        )
        .unwrap();

        assert_eq!(build_instructions(dir.path()).unwrap(), "<.aide>");
    }

    #[test]
    fn test_invalid_template_is_reported() {
        let ctx = InstructionContext::new("/w", Vec::new());
        let err = render_template("{{#if workspace}}unclosed", &ctx).unwrap_err();
        assert!(err.to_string().contains("Failed to register template"));
    }

    #[test]
    fn test_missing_workspace() {
        assert!(build_instructions(Path::new("/definitely/not/here")).is_err());
    }
}
