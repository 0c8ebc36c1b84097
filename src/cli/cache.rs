use crate::{Result, cache::ResultCache, git::Git, settings::Settings};

/// Manages the step result cache
#[derive(clap::Args)]
pub struct Cache {
    #[clap(subcommand)]
    command: CacheCommand,
}

#[derive(clap::Subcommand)]
enum CacheCommand {
    /// Removes cached results for the current repository
    Clear,
}

impl Cache {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        match self.command {
            CacheCommand::Clear => {
                let git = Git::discover(&std::env::current_dir()?)?;
                let cache = ResultCache::new(&settings.cache_dir, git.root());
                cache.clear()?;
                if let Some(dir) = cache.dir() {
                    info!("removed {}", dir.display());
                }
                Ok(())
            }
        }
    }
}
