use crate::{
    Result,
    config::Config,
    hook::HookReport,
    hook_options::HookOptions,
    settings::Settings,
    step::StepStatus,
};

/// Runs a hook by name
#[derive(clap::Args)]
#[clap(visible_alias = "r")]
pub struct Run {
    /// Hook to run, e.g. `pre-commit`
    hook: String,
    #[clap(flatten)]
    opts: HookOptions,
}

impl Run {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        run_hook(&self.hook, self.opts, settings).await
    }
}

pub(crate) async fn run_hook(name: &str, opts: HookOptions, settings: &Settings) -> Result<()> {
    let config = Config::get()?;
    let report = config.run_hook(name, opts, settings).await?;
    summarize(&report);
    report.into_result()
}

fn summarize(report: &HookReport) {
    for result in &report.results {
        match &result.status {
            StepStatus::Passed => {
                debug!("{}: passed in {:?}", result.name, result.elapsed)
            }
            StepStatus::Failed(message) | StepStatus::Errored(message) => {
                error!("{}: {message}", result.name)
            }
            StepStatus::Skipped(_) | StepStatus::NotRun => {}
        }
    }
    let aborted = report.aborted();
    if !aborted.is_empty() {
        warn!("{}: {} step(s) not run", report.hook, aborted.len());
    }
}
