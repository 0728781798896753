mod apply;
mod asar;
mod config;
mod engine;
mod error;
mod host;
mod integrity;
mod locate;
mod manifest;
mod rules;
#[cfg(test)]
mod test_utils;
mod util;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::apply::{PatchOptions, PatchTarget};
use crate::config::PatchMap;
use crate::error::PatchError;
use crate::rules::RuleSet;

#[derive(Parser)]
#[command(
    name = "asar-patcher",
    version,
    about = "Apply length-preserving text replacements to an Electron app.asar"
)]
struct Cli {
    /// Target app bundle (default: ~/Applications/Codex.app)
    #[arg(long)]
    app: Option<PathBuf>,
    /// Patch mapping JSON
    #[arg(long, default_value = "patches/codex_cn_patch.json")]
    map: PathBuf,
    /// Archive path (default: <app>/Contents/Resources/app.asar)
    #[arg(long)]
    asar: Option<PathBuf>,
    /// Manifest path (default: <app>/Contents/Info.plist)
    #[arg(long)]
    plist: Option<PathBuf>,
    /// Only patch entries whose path ends with this suffix (repeatable)
    #[arg(long = "suffix", default_value = locate::DEFAULT_SUFFIX)]
    suffixes: Vec<String>,
    /// App support directory holding the caches to clear
    /// (default: ~/Library/Application Support/Codex)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Analyze only, no write
    #[arg(long)]
    dry_run: bool,
    /// Skip asar/plist backup
    #[arg(long)]
    no_backup: bool,
    /// Skip codesign after patch
    #[arg(long)]
    no_codesign: bool,
    /// Skip cache cleanup
    #[arg(long)]
    no_clear_cache: bool,
    /// Fail if any translation is too long
    #[arg(long)]
    strict_length: bool,
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("[error] {:#}", e);
            e.downcast_ref::<PatchError>()
                .map_or(1, PatchError::exit_code)
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let app = match cli.app {
        Some(app) => app,
        None => dirs::home_dir()
            .context("Cannot determine home directory; pass --app")?
            .join("Applications")
            .join("Codex.app"),
    };

    let map = PatchMap::load(&cli.map)?;
    let strict_length = cli.strict_length || map.strict_length;

    info!("[app] {}", app.display());
    info!("[map] {}", cli.map.display());
    info!("[dry-run] {}", cli.dry_run);
    if let Some(name) = &map.name {
        info!(
            "[map] {} (built for {})",
            name,
            map.app_version.as_deref().unwrap_or("unknown version")
        );
    }

    let RuleSet { rules, skipped } = rules::build_rules(&map, strict_length)?;
    if !skipped.is_empty() {
        warn!(
            "[warn] skipped {} replacements due to length overflow",
            skipped.len()
        );
        for reason in &skipped {
            debug!("  - {}", reason);
        }
    }

    let defaults = PatchTarget::for_app(&app);
    let target = PatchTarget {
        archive: cli.asar.unwrap_or(defaults.archive),
        manifest: cli.plist.unwrap_or(defaults.manifest),
    };
    let min_total = map.min_total_replacements;
    let options = PatchOptions {
        suffixes: cli.suffixes,
        min_total_replacements: min_total,
    };

    let start = Instant::now();

    if cli.dry_run {
        let summary =
            tokio::task::spawn_blocking(move || apply::dry_run(&target, &rules, &options))
                .await??;
        println!(
            "[dry-run] total hits: {}, matched rules: {}/{}",
            summary.hits.total(),
            summary.hits.matched(),
            summary.rules_total
        );
        println!("[result] total replacements: {}", summary.hits.total());
        println!("[result] dry-run complete");
        println!("  Entries scanned: {}", summary.entries_scanned);
        println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
        return Ok(());
    }

    target.check_exists()?;
    if !cli.no_backup {
        let files = [target.archive.clone(), target.manifest.clone()];
        let backups = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let stamp = util::now_stamp();
            files.iter().map(|f| util::backup_file(f, &stamp)).collect()
        })
        .await??;
        for backup in &backups {
            info!("[backup] {}", backup.display());
        }
    }

    let summary =
        tokio::task::spawn_blocking(move || apply::apply_patch(&target, &rules, &options))
            .await??;

    println!("[result] total replacements: {}", summary.total_replacements());
    println!("[result] changed files: {}", summary.changed_paths.len());
    if cli.verbose {
        for (label, n) in summary.hits.ranked() {
            println!("[replace] {}: {}", label, n);
        }
        for path in &summary.changed_paths {
            println!("  - {}", path);
        }
        println!("[plist] header hash: {}", summary.header_hash);
    }
    if !skipped.is_empty() {
        println!("[warn] {} replacements skipped (too long)", skipped.len());
    }

    summary.enforce_minimum(min_total)?;

    if !cli.no_codesign {
        info!("[codesign] signing app...");
        host::codesign(&app).await?;
        info!("[codesign] done");
    }

    if !cli.no_clear_cache {
        match cli.cache_dir.or_else(host::default_support_dir) {
            Some(dir) => {
                let removed = host::clear_cache(&dir).await?;
                info!("[cache] cleared ({} files)", removed);
            }
            None => warn!("[cache] no home directory; skipping cache cleanup"),
        }
    }

    println!("[done] patch applied successfully");
    println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}
