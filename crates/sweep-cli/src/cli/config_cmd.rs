use super::*;
use sweep_core::scan_paths::validate_scan_path;

pub(super) fn handle_config(args: ConfigArgs, paths: &AppPaths) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Init(args) => handle_init(args, paths),
        ConfigCommands::Show => handle_show(paths),
        ConfigCommands::Reset => handle_reset(paths),
    }
}

pub(super) fn handle_init(args: InitArgs, paths: &AppPaths) -> anyhow::Result<()> {
    let root = std::path::absolute(&args.root)
        .with_context(|| format!("resolve {}", args.root.display()))?;
    validate_scan_path(&root).with_context(|| format!("invalid root {}", root.display()))?;
    let mut config = AppConfig::load(&paths.config)?;
    config.root = Some(root);
    config.save(&paths.config)?;
    info!(config = %paths.config.display(), "config initialized");
    println!("Config saved to {}", paths.config.display());
    Ok(())
}

fn handle_show(paths: &AppPaths) -> anyhow::Result<()> {
    let config = AppConfig::load(&paths.config)?;
    println!("Config: {}", paths.config.display());
    println!("Logs:   {}", paths.log_dir.display());
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("serialize config")?
    );
    Ok(())
}

fn handle_reset(paths: &AppPaths) -> anyhow::Result<()> {
    let current = AppConfig::load(&paths.config)?;
    let config = AppConfig {
        root: current.root,
        ..AppConfig::default()
    };
    config.save(&paths.config)?;
    println!("Settings reset to defaults in {}", paths.config.display());
    Ok(())
}
