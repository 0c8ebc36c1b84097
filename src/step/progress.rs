use std::sync::Arc;

use clx::progress::{ProgressJob, ProgressJobBuilder, ProgressJobDoneBehavior};

use super::types::Step;

impl Step {
    /// Spinner line shown while the step runs; only built when progress output is on.
    pub(crate) fn build_step_progress(&self, files: usize) -> Arc<ProgressJob> {
        ProgressJobBuilder::new()
            .body("{{spinner()}} {{name | flex}}{% if files %} – {{files}} file{{files | pluralize}}{% endif %}")
            .body_text(Some("{{spinner()}} {{name}}{% if files %} – {{files}} file{{files | pluralize}}{% endif %}"))
            .prop("name", &self.name)
            .prop("files", &files)
            .on_done(ProgressJobDoneBehavior::Keep)
            .start()
    }
}
