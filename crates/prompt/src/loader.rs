//! Instructions template loading.

use aide_core::config::AIDE_DIR;
use aide_core::{AppError, AppResult};
use std::path::{Path, PathBuf};

/// File name of the workspace override inside `.aide/`.
pub const TEMPLATE_FILE: &str = "instructions.hbs";

/// Template used when the workspace has no override.
pub const DEFAULT_TEMPLATE: &str = "You are assisting a web developer on a local machine to work on a project in the {{workspace}} directory. \
The directory has the following files and folders in the root {{rootEntriesJson}}. \
You have full access to the environment to do tasks and search embedded code and documentation.";

pub fn template_path(workspace_path: &Path) -> PathBuf {
    workspace_path.join(AIDE_DIR).join(TEMPLATE_FILE)
}

/// Load the workspace's template override, or the default template.
///
/// # Example
/// ```no_run
/// use aide_prompt::load_template;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let template = load_template(Path::new("."))?;
/// println!("{}", template);
/// # Ok(())
/// # }
/// ```
pub fn load_template(workspace_path: &Path) -> AppResult<String> {
    let path = template_path(workspace_path);

    let template = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(DEFAULT_TEMPLATE.to_string());
        }
        Err(e) => {
            return Err(AppError::Prompt(format!(
                "Failed to read instructions template {:?}: {}",
                path, e
            )))
        }
    };

    if template.trim().is_empty() {
        return Err(AppError::Prompt(format!(
            "Instructions template {:?} is empty",
            path
        )));
    }

    tracing::debug!("Loaded instructions template from {:?}", path);
    Ok(template)
}
