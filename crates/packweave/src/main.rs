use camino::Utf8PathBuf;
use clap::{
    builder::{styling::AnsiColor, Styles},
    ColorChoice, CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod errors;
mod utils;

use commands::{ConfigCommand, InstallArgs};

#[derive(Parser, Debug)]
#[command(version, about = "Merge game mods into a single output layer", long_about = None)]
#[command(color = ColorChoice::Auto)]
struct Args {
    /// Config file to use instead of config.toml next to the executable
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install an extracted mod and merge it into the master layer
    Install {
        /// Directory containing the mod's info.json
        dir: Utf8PathBuf,

        /// Option folder to enable (repeatable). Defaults to the mod's default selection
        #[arg(short, long = "option")]
        options: Vec<String>,

        /// Priority to install at. Defaults to above every installed mod
        #[arg(short, long)]
        priority: Option<i32>,

        /// Keep size table entries the mod cannot compute
        #[arg(long)]
        leave: bool,

        /// Allow the mod to shrink size table entries
        #[arg(long)]
        shrink: bool,
    },
    /// Remove an installed mod and re-merge what it touched
    Uninstall {
        /// Id of the installed mod
        id: String,
    },
    /// Move a mod to a new priority
    Reorder {
        id: String,
        priority: i32,
    },
    /// Change which option folders of a mod are enabled
    Options {
        id: String,
        /// Option folders to enable; pass none to disable all
        options: Vec<String>,
    },
    /// List installed mods from highest to lowest priority
    List,
    /// Rebuild the master layer from every installed mod
    Remerge,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set the base game content directory
    SetGame { path: Utf8PathBuf },
    /// Set the update content directory
    SetUpdate { path: Utf8PathBuf },
    /// Set the DLC content directory
    SetDlc { path: Utf8PathBuf },
    /// Set the mod store directory
    SetStore { path: Utf8PathBuf },
    /// Set the dump platform
    SetPlatform {
        #[arg(value_enum)]
        platform: PlatformArg,
    },
    /// Reset configuration to defaults
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PlatformArg {
    Wiiu,
    Switch,
}

impl From<PlatformArg> for pw_core::Platform {
    fn from(value: PlatformArg) -> Self {
        match value {
            PlatformArg::Wiiu => pw_core::Platform::WiiU,
            PlatformArg::Switch => pw_core::Platform::Switch,
        }
    }
}

fn parse_args() -> Args {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command().styles(styles).get_matches();
    match Args::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(e) => e.exit(),
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "packweave=info,pw_merge=info,pw_mod_lib=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> miette::Result<()> {
    let args = parse_args();
    init_tracing();

    let config = utils::config::resolve_config_path(args.config.as_deref())?;

    match args.command {
        Commands::Install {
            dir,
            options,
            priority,
            leave,
            shrink,
        } => commands::install(
            &config,
            InstallArgs {
                dir,
                options,
                priority,
                leave,
                shrink,
            },
        ),
        Commands::Uninstall { id } => commands::uninstall(&config, &id),
        Commands::Reorder { id, priority } => commands::reorder(&config, &id, priority),
        Commands::Options { id, options } => commands::set_options(&config, &id, options),
        Commands::List => commands::list(&config),
        Commands::Remerge => commands::remerge(&config),
        Commands::Config { action } => {
            let command = match action {
                ConfigAction::Show => ConfigCommand::Show,
                ConfigAction::SetGame { path } => ConfigCommand::SetGame(path),
                ConfigAction::SetUpdate { path } => ConfigCommand::SetUpdate(path),
                ConfigAction::SetDlc { path } => ConfigCommand::SetDlc(path),
                ConfigAction::SetStore { path } => ConfigCommand::SetStore(path),
                ConfigAction::SetPlatform { platform } => {
                    ConfigCommand::SetPlatform(platform.into())
                }
                ConfigAction::Reset => ConfigCommand::Reset,
            };
            commands::config(&config, command)
        }
    }
}
