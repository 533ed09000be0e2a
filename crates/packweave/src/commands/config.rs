use crate::utils::config::{load_or_default, save_settings};
use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use pw_core::{Platform, Settings};

pub enum ConfigCommand {
    Show,
    SetGame(Utf8PathBuf),
    SetUpdate(Utf8PathBuf),
    SetDlc(Utf8PathBuf),
    SetStore(Utf8PathBuf),
    SetPlatform(Platform),
    Reset,
}

pub fn config(config_path: &Utf8Path, command: ConfigCommand) -> miette::Result<()> {
    match command {
        ConfigCommand::Show => show_config(config_path),
        ConfigCommand::Reset => {
            save_settings(config_path, &Settings::default())?;
            println!("{} Configuration reset to defaults", "✓".bright_green());
            Ok(())
        }
        ConfigCommand::SetGame(path) => update(config_path, "Game directory", |s| {
            s.game_dir = path.clone();
            path.to_string()
        }),
        ConfigCommand::SetUpdate(path) => update(config_path, "Update directory", |s| {
            s.update_dir = Some(path.clone());
            path.to_string()
        }),
        ConfigCommand::SetDlc(path) => update(config_path, "DLC directory", |s| {
            s.dlc_dir = Some(path.clone());
            path.to_string()
        }),
        ConfigCommand::SetStore(path) => update(config_path, "Store directory", |s| {
            s.store_dir = path.clone();
            path.to_string()
        }),
        ConfigCommand::SetPlatform(platform) => update(config_path, "Platform", |s| {
            s.platform = platform;
            platform.to_string()
        }),
    }
}

fn update<F>(config_path: &Utf8Path, label: &str, apply: F) -> miette::Result<()>
where
    F: FnOnce(&mut Settings) -> String,
{
    let mut settings = load_or_default(config_path)?;
    let shown = apply(&mut settings);
    save_settings(config_path, &settings)?;
    println!(
        "{} {} set to: {}",
        "✓".bright_green(),
        label,
        shown.bright_cyan()
    );
    Ok(())
}

fn show_config(config_path: &Utf8Path) -> miette::Result<()> {
    let settings = load_or_default(config_path)?;

    println!("{}", "Configuration".bright_cyan().bold());
    println!("  {} {}", "Config file:".bright_white(), config_path);
    println!();

    print_path("Game", Some(settings.game_dir.as_path()));
    print_path("Update", settings.update_dir.as_deref());
    print_path("DLC", settings.dlc_dir.as_deref());
    print_path("Store", Some(settings.store_dir.as_path()));
    println!(
        "  {:<8} {}",
        "Platform:".bright_white(),
        settings.platform.to_string().bright_cyan()
    );

    if let Err(e) = settings.validate() {
        println!();
        println!("  {} {}", "⚠".bright_yellow(), e.to_string().yellow());
    }
    Ok(())
}

fn print_path(label: &str, path: Option<&Utf8Path>) {
    let label = format!("{}:", label);
    match path {
        Some(path) if !path.as_str().is_empty() => {
            let mark = if path.as_std_path().exists() {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {:<8} {} {}", label.bright_white(), mark, path);
        }
        _ => println!("  {:<8} {}", label.bright_white(), "not set".dimmed()),
    }
}
