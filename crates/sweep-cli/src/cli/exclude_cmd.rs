use super::*;
pub(super) fn handle_exclude(args: ExcludeArgs, paths: &AppPaths) -> anyhow::Result<()> {
    let store = ExclusionStore::open(&paths.exclusions);
    match args.command {
        ExcludeCommands::Add(args) => {
            if store.add(&args.name)? {
                println!("Excluded {} on {}", args.name.trim(), store.machine());
            } else {
                println!("{} is already excluded", args.name.trim());
            }
        }
        ExcludeCommands::Remove(args) => {
            if store.remove(&args.name)? {
                println!("{} is no longer excluded", args.name.trim());
            } else {
                println!("{} was not excluded", args.name.trim());
            }
        }
        ExcludeCommands::List => {
            let names = store.list()?;
            if names.is_empty() {
                println!("No excluded repositories for {}.", store.machine());
            }
            for name in names {
                println!("{name}");
            }
        }
    }
    Ok(())
}
