//! Step `condition` expressions.
//!
//! Conditions are `expr` expressions evaluated against the repository status
//! captured when the hook run started, exposed under `git`:
//!
//! ```text
//! git.untracked_files == []
//! "Cargo.lock" in git.staged_files
//! ```

use std::sync::{LazyLock, Mutex};

use eyre::eyre;

use crate::Result;
use crate::git::GitStatus;

static EXPR_ENV: LazyLock<expr::Environment> = LazyLock::new(expr::Environment::new);

pub struct ConditionEvaluator {
    ctx: Mutex<expr::Context>,
}

impl ConditionEvaluator {
    /// Freezes `status` as the context for every evaluation in this run.
    pub fn new(status: &GitStatus) -> Result<Self> {
        let mut ctx = expr::Context::default();
        let git = expr::to_value(status).map_err(|e| eyre!("failed to build condition context: {e}"))?;
        ctx.insert("git", git);
        Ok(Self {
            ctx: Mutex::new(ctx),
        })
    }

    /// Only an explicit `false` gates a step off; any other value lets it run.
    pub fn eval(&self, condition: &str) -> Result<bool> {
        let ctx = self
            .ctx
            .lock()
            .map_err(|_| eyre!("condition context poisoned"))?;
        let val = EXPR_ENV
            .eval(condition, &ctx)
            .map_err(|e| eyre!("failed to evaluate condition `{condition}`: {e}"))?;
        trace!("condition: {condition} = {val}");
        Ok(val != expr::Value::Bool(false))
    }
}
