//! Concurrent execution of a hook's steps.
//!
//! Steps are split into groups: an `exclusive` step gets a group of its own
//! and groups run one after another. Within a group every step is spawned as
//! its own task; a semaphore sized by `jobs` limits how many run at once and a
//! step waits for the steps it `depends` on before asking for a permit. With
//! fail-fast, the first failure cancels a token that steps check after they
//! get a permit, so steps still waiting are recorded as not run while steps
//! already running finish normally.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::hook::HookContext;
use crate::step::{Step, StepResult, StepStatus};

pub struct StepScheduler {
    jobs: usize,
    fail_fast: bool,
    aborted: CancellationToken,
}

/// Completion signals for the steps of one group.
struct StepDepends {
    done: IndexMap<String, watch::Sender<bool>>,
}

impl StepDepends {
    fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let done = names
            .into_iter()
            .map(|name| (name.to_string(), watch::Sender::new(false)))
            .collect();
        Self { done }
    }

    fn mark_done(&self, name: &str) {
        if let Some(tx) = self.done.get(name) {
            tx.send_replace(true);
        }
    }

    /// Steps outside this group have either finished already or are not
    /// part of this run, so there is nothing to wait for.
    async fn wait_for(&self, name: &str) -> Result<()> {
        let Some(tx) = self.done.get(name) else {
            return Ok(());
        };
        let mut rx = tx.subscribe();
        rx.wait_for(|done| *done).await?;
        Ok(())
    }
}

/// Step indices split at every `exclusive` step, which runs alone.
pub fn group_steps<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Vec<Vec<usize>> {
    steps
        .into_iter()
        .enumerate()
        .fold(vec![], |mut groups: Vec<Vec<usize>>, (idx, step)| {
            if step.exclusive || groups.is_empty() {
                groups.push(vec![]);
            }
            if let Some(group) = groups.last_mut() {
                group.push(idx);
            }
            if step.exclusive {
                groups.push(vec![]);
            }
            groups
        })
        .into_iter()
        .filter(|g| !g.is_empty())
        .collect()
}

impl StepScheduler {
    pub fn new(jobs: usize, fail_fast: bool) -> Self {
        Self {
            jobs: jobs.max(1),
            fail_fast,
            aborted: CancellationToken::new(),
        }
    }

    /// Steps that have not started when `token` is cancelled are not run.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.aborted = token;
        self
    }

    /// Results come back in step order regardless of completion order.
    pub async fn run(
        &self,
        ctx: Arc<HookContext>,
        steps: &IndexMap<String, Step>,
    ) -> Result<Vec<StepResult>> {
        let mut results: Vec<Option<StepResult>> = vec![None; steps.len()];
        for group in group_steps(steps.values()) {
            for (idx, result) in self.run_group(&ctx, steps, &group).await? {
                results[idx] = Some(result);
            }
        }
        Ok(results.into_iter().flatten().collect())
    }

    async fn run_group(
        &self,
        ctx: &Arc<HookContext>,
        steps: &IndexMap<String, Step>,
        group: &[usize],
    ) -> Result<Vec<(usize, StepResult)>> {
        let members = group
            .iter()
            .filter_map(|idx| steps.get_index(*idx))
            .collect::<Vec<_>>();
        let depends = Arc::new(StepDepends::new(members.iter().map(|(name, _)| name.as_str())));
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut set = JoinSet::new();
        for (&idx, (_, step)) in group.iter().zip(members) {
            let step = step.clone();
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let depends = depends.clone();
            let aborted = self.aborted.clone();
            let fail_fast = self.fail_fast;
            set.spawn(async move {
                for dep in &step.depends {
                    trace!("{step}: waiting for {dep}");
                    depends.wait_for(dep).await?;
                }
                let permit = semaphore.acquire_owned().await?;
                let result = if aborted.is_cancelled() {
                    trace!("{step}: not run, run was aborted");
                    StepResult::new(&step.name, StepStatus::NotRun)
                } else {
                    let result = step.execute(&ctx).await;
                    if fail_fast && result.status.is_failure() {
                        debug!("{step}: failed, abandoning steps that have not started");
                        aborted.cancel();
                    }
                    result
                };
                drop(permit);
                depends.mark_done(&step.name);
                Ok::<_, eyre::Report>((idx, result))
            });
        }

        let mut results = Vec::with_capacity(group.len());
        while let Some(res) = set.join_next().await {
            results.push(res??);
        }
        Ok(results)
    }
}
