use crate::errors::CliError;
use crate::utils::config::load_settings;
use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use pw_merge::{MergeOutcome, MergeProgress, MergeResult, MergeStage, ModFlags};
use pw_mod_lib::{InstallOptions, ModLibrary};

pub struct InstallArgs {
    pub dir: Utf8PathBuf,
    pub options: Vec<String>,
    pub priority: Option<i32>,
    pub leave: bool,
    pub shrink: bool,
}

fn open_library(config_path: &Utf8Path) -> Result<ModLibrary, CliError> {
    let settings = load_settings(config_path)?;
    let library = ModLibrary::open(&settings)?;
    Ok(library.with_progress(report_progress))
}

fn report_progress(progress: MergeProgress) {
    let stage = match progress.stage {
        MergeStage::Scanning => "Scanning",
        MergeStage::Diffing => "Diffing",
        MergeStage::Merging => "Merging",
        MergeStage::Writing => "Writing",
        MergeStage::Complete => return,
    };
    match progress.current_file {
        Some(file) => tracing::debug!(
            "{} [{}/{}] {}",
            stage,
            progress.current,
            progress.total,
            file
        ),
        None => tracing::debug!("{} [{}/{}]", stage, progress.current, progress.total),
    }
}

pub fn install(config_path: &Utf8Path, args: InstallArgs) -> miette::Result<()> {
    let library = open_library(config_path)?;
    let choice = InstallOptions {
        options: if args.options.is_empty() {
            None
        } else {
            Some(args.options)
        },
        priority: args.priority,
        flags: ModFlags {
            leave: args.leave,
            shrink: args.shrink,
        },
    };

    let result = library
        .install(&args.dir, choice)
        .map_err(CliError::from)?;

    let installed = &result.installed;
    println!(
        "{} Installed {} {} at priority {}",
        "✓".bright_green(),
        installed.name.bright_cyan().bold(),
        format!("v{}", installed.version).bright_white(),
        installed.priority.to_string().bright_yellow()
    );
    if !installed.options.is_empty() {
        println!("  {} {}", "Options:".bright_white(), installed.options.join(", "));
    }
    print_merge_result(&result.merge);
    Ok(())
}

pub fn uninstall(config_path: &Utf8Path, id: &str) -> miette::Result<()> {
    let library = open_library(config_path)?;
    let result = library.uninstall(id).map_err(CliError::from)?;
    println!("{} Uninstalled {}", "✓".bright_green(), id.bright_cyan());
    print_merge_result(&result);
    Ok(())
}

pub fn reorder(config_path: &Utf8Path, id: &str, priority: i32) -> miette::Result<()> {
    let library = open_library(config_path)?;
    let result = library.reorder(id, priority).map_err(CliError::from)?;
    println!(
        "{} Moved {} to priority {}",
        "✓".bright_green(),
        id.bright_cyan(),
        priority.to_string().bright_yellow()
    );
    print_merge_result(&result);
    Ok(())
}

pub fn set_options(config_path: &Utf8Path, id: &str, options: Vec<String>) -> miette::Result<()> {
    let library = open_library(config_path)?;
    let shown = if options.is_empty() {
        "none".to_string()
    } else {
        options.join(", ")
    };
    let result = library.set_options(id, options).map_err(CliError::from)?;
    println!(
        "{} Options for {} set to: {}",
        "✓".bright_green(),
        id.bright_cyan(),
        shown
    );
    print_merge_result(&result);
    Ok(())
}

pub fn list(config_path: &Utf8Path) -> miette::Result<()> {
    let library = open_library(config_path)?;
    let mods = library.list().map_err(CliError::from)?;

    if mods.is_empty() {
        println!("{}", "No mods installed".dimmed());
        return Ok(());
    }

    println!(
        "{} ({})",
        "Installed mods".bright_cyan().bold(),
        mods.len()
    );
    for installed in mods {
        println!(
            "  {:>6}  {} {} {}",
            installed.priority.to_string().bright_yellow(),
            installed.name.bright_white().bold(),
            format!("v{}", installed.version).dimmed(),
            format!("[{}]", installed.id).dimmed()
        );
        if !installed.formats.is_empty() {
            let formats: Vec<String> = installed.formats.iter().map(|f| f.to_string()).collect();
            println!("          {} {}", "Formats:".bright_white(), formats.join(", "));
        }
        if !installed.options.is_empty() {
            println!(
                "          {} {}",
                "Options:".bright_white(),
                installed.options.join(", ")
            );
        }
    }
    Ok(())
}

pub fn remerge(config_path: &Utf8Path) -> miette::Result<()> {
    let library = open_library(config_path)?;
    let result = library.remerge_all().map_err(CliError::from)?;
    print_merge_result(&result);
    Ok(())
}

fn print_merge_result(result: &MergeResult) {
    if result.reused {
        println!(
            "  {} Master layer already up to date",
            "•".bright_blue()
        );
        return;
    }

    let formats: Vec<String> = result.formats_merged.iter().map(|f| f.to_string()).collect();
    println!(
        "  {} Merged {} in {:.2}s ({} files written)",
        "•".bright_blue(),
        if formats.is_empty() {
            "nothing".to_string()
        } else {
            formats.join(", ")
        },
        result.build_time.as_secs_f64(),
        result.files_written.len()
    );
    println!("  {} {}", "Master:".bright_white(), result.master_root);

    if let MergeOutcome::Partial { failures } = &result.outcome {
        println!(
            "  {} {} item(s) could not be merged:",
            "⚠".bright_yellow(),
            failures.len()
        );
        for failure in failures {
            println!("    {} {}: {}", "✗".bright_red(), failure.item, failure.error);
        }
    }
}
