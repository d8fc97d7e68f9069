use super::*;
pub(super) fn handle_paths(args: PathsArgs, paths: &AppPaths) -> anyhow::Result<()> {
    let store = CustomPathsStore::open(&paths.custom_paths);
    match args.command {
        PathsCommands::Add(args) => {
            let path = std::path::absolute(&args.path)
                .with_context(|| format!("resolve {}", args.path.display()))?;
            store
                .add(&path)
                .with_context(|| format!("cannot add {}", path.display()))?;
            println!("Added scan path {}", path.display());
        }
        PathsCommands::Remove(args) => {
            let path = std::path::absolute(&args.path)
                .with_context(|| format!("resolve {}", args.path.display()))?;
            if store.remove(&path)? {
                println!("Removed scan path {}", path.display());
            } else {
                println!("{} is not a configured scan path", path.display());
            }
        }
        PathsCommands::List => {
            let config = AppConfig::load(&paths.config)?;
            match config.root.as_deref() {
                Some(root) => println!("{} (root)", root.display()),
                None => println!("No root configured; run `git-sweep config init --root <path>`"),
            }
            for path in store.list()? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}
