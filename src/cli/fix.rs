use crate::hook_options::HookOptions;

/// Runs the `fix` hook
#[derive(clap::Args)]
#[clap(visible_alias = "f")]
pub struct Fix {
    #[clap(flatten)]
    pub(crate) hook: HookOptions,
}
