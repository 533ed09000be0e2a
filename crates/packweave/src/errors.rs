use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(config::not_found),
        help("Run 'packweave config set-game <dir>' and 'packweave config set-store <dir>' first")
    )]
    ConfigNotFound { path: Utf8PathBuf },

    #[error("Could not determine where to store config.toml")]
    #[diagnostic(code(config::no_location), help("Pass --config <path> explicitly"))]
    NoConfigLocation,

    #[error("Configuration file error")]
    #[diagnostic(
        code(config::parse_error),
        help("Check config.toml for syntax errors")
    )]
    ConfigParseError {
        #[source]
        source: pw_core::Error,
    },

    #[error("The game dump cannot be used")]
    #[diagnostic(
        code(config::invalid_dump),
        help("Run 'packweave config show' and check the game, update and DLC directories")
    )]
    InvalidDump {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Mod directory not found: {path}")]
    #[diagnostic(
        code(library::source_missing),
        help("Point install at an extracted mod folder containing info.json")
    )]
    SourceNotFound { path: Utf8PathBuf },

    #[error("Another packweave process is using the store")]
    #[diagnostic(
        code(library::locked),
        help("Wait for it to finish, then try again")
    )]
    Locked,

    #[error("Priority {priority} is already used by '{holder}'")]
    #[diagnostic(
        code(library::priority_taken),
        help("Pick a free priority; 'packweave list' shows the ones in use")
    )]
    PriorityTaken { priority: i32, holder: String },

    #[error("Library operation failed")]
    #[diagnostic(code(library::operation_failed))]
    Library {
        #[source]
        source: pw_mod_lib::Error,
    },
}

impl From<pw_mod_lib::Error> for CliError {
    fn from(error: pw_mod_lib::Error) -> Self {
        match error {
            pw_mod_lib::Error::Settings(source) => Self::InvalidDump {
                source: Box::new(source),
            },
            pw_mod_lib::Error::Merge(pw_merge::Error::Configuration(msg)) => Self::InvalidDump {
                source: msg.into(),
            },
            pw_mod_lib::Error::InvalidSource(path) => Self::SourceNotFound { path },
            pw_mod_lib::Error::Locked(_) => Self::Locked,
            pw_mod_lib::Error::PriorityTaken { priority, holder } => {
                Self::PriorityTaken { priority, holder }
            }
            other => Self::Library { source: other },
        }
    }
}
