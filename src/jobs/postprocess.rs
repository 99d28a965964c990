use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{is_plain_name, run_directory};
use crate::error::JobError;
use crate::registry::OUTPUT_ATTRIBUTES;
use crate::state_machine::{Job, JobContext, JobResult, JobType};

/// Where the attributes end up inside the run directory.
pub const ATTRIBUTES_FILE: &str = "output_attributes.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostprocessOptions {
    pub write_attributes: bool,
    /// Plain file or directory names removed from the run directory.
    pub cleanup: Vec<String>,
}

impl Default for PostprocessOptions {
    fn default() -> Self {
        Self {
            write_attributes: true,
            cleanup: Vec::new(),
        }
    }
}

pub struct PostprocessJob {
    options: PostprocessOptions,
}

impl JobType for PostprocessJob {
    const NAME: &'static str = "postprocess";
    type Options = PostprocessOptions;

    fn new(options: PostprocessOptions, _debug: bool) -> Self {
        Self { options }
    }
}

impl Job for PostprocessJob {
    fn perform(&mut self, ctx: &mut JobContext<'_>) -> Result<JobResult, JobError> {
        let run_dir = run_directory(ctx.registry)?;

        let attributes_file = if self.options.write_attributes {
            let attributes = ctx
                .registry
                .lookup(OUTPUT_ATTRIBUTES)
                .cloned()
                .unwrap_or_default();
            let path = run_dir.join(ATTRIBUTES_FILE);
            std::fs::write(&path, serde_json::to_string_pretty(&attributes)?)?;
            Some(path)
        } else {
            None
        };

        let mut removed = Vec::new();
        for name in &self.options.cleanup {
            if !is_plain_name(name) {
                return Err(JobError::Failed(format!(
                    "cleanup entry '{name}' must be a plain name inside the run directory"
                )));
            }
            let path = run_dir.join(name);
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else if path.exists() {
                std::fs::remove_file(&path)?;
            } else {
                debug!(path = %path.display(), "Nothing to clean up");
                continue;
            }
            removed.push(name.clone());
        }

        info!(removed = removed.len(), "Postprocess complete");
        Ok(json!({
            "attributes_file": attributes_file,
            "removed": removed,
        }))
    }
}
