use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::rolling::RollingFileAppender;
use anyhow::Result;

use catalog_sync_core as lib;
use lib::api::remote::HttpRemoteCatalog;
use lib::api::FilterConfig;
use lib::binding::BindingEngine;
use lib::config::Config;
use lib::db::{build_pool, run_in_unit_of_work, run_migrations};
use lib::duplicate::DuplicateEngine;
use lib::exporter::{PlaylistExporter, PlaylistStructure};
use lib::sync::{AssociationSync, PlaylistSync, TrackSync};

#[derive(Parser)]
#[command(name = "catalog-sync-core", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "config/example-config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze and apply one sync stage against the remote catalog.
    Sync {
        #[command(subcommand)]
        stage: SyncStage,
    },
    /// Scan a filesystem root and bind audio files to catalog tracks.
    Bind { root_dir: PathBuf },
    /// Detect (and optionally merge) near-duplicate tracks in the catalog.
    Dedupe {
        #[arg(long)]
        dry_run: bool,
    },
    /// Regenerate a single playlist's `.m3u` file.
    Export {
        playlist_id: String,
        out_dir: PathBuf,
    },
    /// Regenerate every playlist's `.m3u` file.
    ExportAll { out_dir: PathBuf },
    /// Apply a desired folder structure to the playlists directory.
    Reorganize { structure_file: PathBuf },
    /// Parse the config file and exit.
    ConfigValidate,
}

#[derive(Subcommand)]
enum SyncStage {
    Playlists,
    Tracks,
    Associations,
    All,
}

fn remote_client(cfg: &Config) -> Result<HttpRemoteCatalog> {
    let base = cfg
        .remote_api_base
        .clone()
        .ok_or_else(|| anyhow::anyhow!("remote_api_base is not configured"))?;
    let token = cfg
        .remote_bearer_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("remote_bearer_token is not configured"))?;
    Ok(HttpRemoteCatalog::new(base, token))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ConfigValidate = cli.command {
        match Config::from_path(&cli.config) {
            Ok(_) => {
                println!("OK");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Config validation failed: {e}");
                std::process::exit(2);
            }
        }
    }

    let cfg = Config::from_path(&cli.config)?;

    // Initialize structured logging to a daily rolling file in the configured
    // log dir. Keep the guard alive for the process lifetime so the
    // non-blocking writer flushes on drop.
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&cfg.log_dir, "catalog-sync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(non_blocking)
        .init();

    let pool = build_pool(&cfg.db_path, cfg.pool_max_size, cfg.pool_timeout_secs)?;
    {
        let conn = pool.get()?;
        run_migrations(&conn)?;
    }

    match run(&cfg, &pool, cli.command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run(cfg: &Config, pool: &lib::db::Pool, command: Commands) -> Result<()> {
    match command {
        Commands::Sync { stage } => run_sync(cfg, pool, stage).await?,
        Commands::Bind { root_dir } => run_bind(pool, &root_dir, cfg.match_threshold)?,
        Commands::Dedupe { dry_run } => run_dedupe(pool, dry_run)?,
        Commands::Export {
            playlist_id,
            out_dir,
        } => {
            let result = run_in_unit_of_work(pool, |uow| {
                PlaylistExporter::regenerate_one(uow, &playlist_id, &out_dir, true)
            })?;
            println!("{}", serde_json::to_string_pretty(&export_summary(&result))?);
        }
        Commands::ExportAll { out_dir } => {
            let (successes, failures) = run_in_unit_of_work(pool, |uow| {
                let ids: Vec<String> = uow.playlists().get_all()?.into_iter().map(|p| p.id).collect();
                PlaylistExporter::regenerate_batch(uow, &ids, &out_dir, true)
            })?;
            for (id, err) in &failures {
                tracing::warn!(playlist_id = %id, error = %err, "export failed");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "exported": successes.iter().map(export_summary).collect::<Vec<_>>(),
                    "failed": failures.iter().map(|(id, e)| serde_json::json!({"playlist_id": id, "error": e.to_string()})).collect::<Vec<_>>(),
                }))?
            );
        }
        Commands::Reorganize { structure_file } => {
            let raw = std::fs::read_to_string(&structure_file)?;
            let desired: PlaylistStructure = serde_json::from_str(&raw)?;
            let results = run_in_unit_of_work(pool, |uow| {
                PlaylistExporter::reorganize(uow, &cfg.playlists_dir, &desired, true, true)
            })?;
            println!(
                "{}",
                serde_json::to_string_pretty(&results.iter().map(export_summary).collect::<Vec<_>>())?
            );
        }
        Commands::ConfigValidate => unreachable!("handled before pool construction"),
    }
    Ok(())
}

fn export_summary(r: &lib::exporter::ExportResult) -> serde_json::Value {
    serde_json::json!({
        "playlist_id": r.playlist_id,
        "tracks_found": r.tracks_found,
        "tracks_written": r.tracks_written,
        "path": r.path.display().to_string(),
    })
}

async fn run_sync(cfg: &Config, pool: &lib::db::Pool, stage: SyncStage) -> Result<()> {
    let remote = remote_client(cfg)?;
    let reference_id = &cfg.master_playlist_id;
    let filter = FilterConfig::default();

    match stage {
        SyncStage::Playlists => {
            let stats = run_in_unit_of_work(pool, |uow| {
                let plan = futures::executor::block_on(PlaylistSync::analyze(
                    &remote,
                    uow,
                    reference_id,
                    &filter,
                ))?;
                PlaylistSync::execute(uow, &plan)
            })?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        SyncStage::Tracks => {
            let stats = run_in_unit_of_work(pool, |uow| {
                let plan =
                    futures::executor::block_on(TrackSync::analyze(&remote, uow, reference_id))?;
                TrackSync::execute(uow, reference_id, &plan)
            })?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        SyncStage::Associations => {
            let stats = run_in_unit_of_work(pool, |uow| {
                let plan = futures::executor::block_on(AssociationSync::analyze(
                    &remote,
                    uow,
                    reference_id,
                ))?;
                AssociationSync::execute(uow, &plan)
            })?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        SyncStage::All => {
            let playlist_stats = run_in_unit_of_work(pool, |uow| {
                let plan = futures::executor::block_on(PlaylistSync::analyze(
                    &remote,
                    uow,
                    reference_id,
                    &filter,
                ))?;
                PlaylistSync::execute(uow, &plan)
            })?;
            let track_stats = run_in_unit_of_work(pool, |uow| {
                let plan =
                    futures::executor::block_on(TrackSync::analyze(&remote, uow, reference_id))?;
                TrackSync::execute(uow, reference_id, &plan)
            })?;
            let association_stats = run_in_unit_of_work(pool, |uow| {
                let plan = futures::executor::block_on(AssociationSync::analyze(
                    &remote,
                    uow,
                    reference_id,
                ))?;
                AssociationSync::execute(uow, &plan)
            })?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "playlists": playlist_stats,
                    "tracks": track_stats,
                    "associations": association_stats,
                }))?
            );
        }
    }
    Ok(())
}

fn run_bind(pool: &lib::db::Pool, root_dir: &std::path::Path, threshold: f64) -> Result<()> {
    let result = run_in_unit_of_work(pool, |uow| {
        let plan = BindingEngine::analyze(uow, root_dir, threshold)?;
        let bindings = plan.intended_bindings(&std::collections::HashMap::new());
        let execution = BindingEngine::execute(uow, &bindings, &std::collections::HashMap::new())?;
        Ok((plan, execution))
    })?;
    let (plan, execution) = result;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "scanned": plan.files_scanned,
            "already_bound": plan.files_already_bound,
            "auto_matched": execution.created.len(),
            "conflicts": execution.conflicts.len(),
            "no_ops": execution.no_ops.len(),
            "needs_selection": plan.needs_selection.len(),
        }))?
    );
    Ok(())
}

fn run_dedupe(pool: &lib::db::Pool, dry_run: bool) -> Result<()> {
    if dry_run {
        let plan = run_in_unit_of_work(pool, |uow| DuplicateEngine::detect(uow))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "groups": plan.groups.len(),
                "duplicates": plan.groups.iter().map(|g| g.duplicates.len()).sum::<usize>(),
            }))?
        );
    } else {
        let removed = run_in_unit_of_work(pool, |uow| {
            let plan = DuplicateEngine::detect(uow)?;
            DuplicateEngine::cleanup(uow, &plan)
        })?;
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({"removed": removed}))?);
    }
    Ok(())
}
