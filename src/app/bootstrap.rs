use std::path::Path;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};

use crate::app::orchestrator::{UpdateOrchestrator, UpdateOutcome};
use crate::cli::{selected_games, Cli, Commands};
use crate::config::{load_config_overrides, Config, Game};
use crate::error::{AppError, Result};
use crate::fetch::{CancelFlag, HttpJsonSource};
use crate::records::Records;
use crate::series::{RenderFormat, RenderOptions};
use crate::utils::format_local;

/// Entry point used by `main`: resolve configuration and dispatch the subcommand.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::builtin();
    if let Some(path) = cli.config.as_deref() {
        load_config_overrides(&mut config, path)?;
        info!("Loaded configuration overrides from {}", path.display());
    }

    match cli.command {
        Commands::Update { ref games, force } => {
            let (cancel, _stopped) = cancel_on_ctrl_c();
            let outcomes =
                update_games(&config, &cli.data_dir, &selected_games(games), force, &cancel).await?;
            if outcomes
                .iter()
                .any(|outcome| matches!(outcome, UpdateOutcome::Cancelled { .. }))
            {
                return Err(AppError::Cancelled);
            }
            Ok(())
        }
        Commands::Watch { ref games, interval } => {
            watch(&config, &cli.data_dir, &selected_games(games), interval).await
        }
        Commands::Status { ref games } => status(&config, &cli.data_dir, &selected_games(games)).await,
        Commands::History {
            game,
            id,
            format,
            ref variant,
            ref delimiter,
            ref timestamp_format,
        } => {
            let mut options = RenderOptions::default().with_timestamp_format(timestamp_format);
            if let Some(delimiter) = delimiter {
                options = options.with_delimiter(delimiter);
            }
            let records = Records::for_game(&cli.data_dir, game);
            for line in history_lines(&records, id, variant, format, &options)? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn orchestrator_for(
    config: &Config,
    data_dir: &Path,
    game: Game,
    cancel: &CancelFlag,
) -> Result<UpdateOrchestrator<HttpJsonSource>> {
    let game_config = config
        .get_game_config(game)
        .cloned()
        .ok_or_else(|| AppError::message(format!("No configuration for game `{game}`")))?;
    let source = HttpJsonSource::new(&game_config.user_agent, game_config.fetch.request_timeout())?;
    let records = Records::for_game(data_dir, game);
    Ok(UpdateOrchestrator::new(game_config, source, records)?.with_cancel_flag(cancel.clone()))
}

/// One pass over `games`. A failing game is logged and does not stop the others.
async fn update_games(
    config: &Config,
    data_dir: &Path,
    games: &[Game],
    force: bool,
    cancel: &CancelFlag,
) -> Result<Vec<UpdateOutcome>> {
    let mut outcomes = Vec::with_capacity(games.len());
    for &game in games {
        if cancel.is_cancelled() {
            break;
        }
        let orchestrator = orchestrator_for(config, data_dir, game, cancel)?;
        match orchestrator.run(force).await {
            Ok(outcome) => {
                let progress = orchestrator.progress();
                info!(
                    "{game}: {} attempts across {} batches",
                    progress.attempts(),
                    progress.batches()
                );
                outcomes.push(outcome);
            }
            Err(err) => error!("{game}: update failed: {err}"),
        }
    }
    Ok(outcomes)
}

async fn watch(config: &Config, data_dir: &Path, games: &[Game], interval_secs: u64) -> Result<()> {
    let (cancel, mut stopped) = cancel_on_ctrl_c();
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Watching {} every {}s",
        games
            .iter()
            .map(Game::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        interval_secs.max(1)
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            Ok(()) = &mut stopped => break,
        }
        update_games(config, data_dir, games, false, &cancel).await?;
        if cancel.is_cancelled() {
            break;
        }
    }

    info!("Watch stopped");
    Ok(())
}

async fn status(config: &Config, data_dir: &Path, games: &[Game]) -> Result<()> {
    let cancel = CancelFlag::new();
    for &game in games {
        let orchestrator = orchestrator_for(config, data_dir, game, &cancel)?;
        let records = orchestrator.records();
        let items = match records.load_catalog() {
            Ok(catalog) => catalog.len().to_string(),
            Err(err) => format!("unreadable ({err})"),
        };

        println!("{} ({game})", orchestrator.config().name);
        println!("  data dir:     {}", records.game_dir().display());
        println!("  tracked:      {items} items");
        println!("  local update: {}", format_local(records.read_last_update()));
        match orchestrator.check().await {
            Ok(check) => {
                println!("  remote:       {}", format_local(check.remote));
                println!(
                    "  status:       {}",
                    if check.available { "update available" } else { "up to date" }
                );
            }
            Err(err) => println!("  remote:       unavailable ({err})"),
        }
    }
    Ok(())
}

/// Rendered samples of one stored item variant. An item without that variant prints nothing.
fn history_lines(
    records: &Records,
    id: u32,
    variant: &str,
    format: RenderFormat,
    options: &RenderOptions,
) -> Result<Vec<String>> {
    let catalog = records.load_catalog()?;
    let item = catalog.get(id).ok_or_else(|| AppError::UnknownItem {
        game: records.game().to_string(),
        id,
    })?;
    match item.series(variant) {
        Some(series) => series.render_rows(format, options),
        None => Ok(Vec::new()),
    }
}

/// Cancel flag tripped by the first Ctrl-C; the fetcher notices between batches.
/// The receiver resolves at the same moment so idle loops can stop waiting.
fn cancel_on_ctrl_c() -> (CancelFlag, oneshot::Receiver<()>) {
    let cancel = CancelFlag::new();
    let (stop_tx, stop_rx) = oneshot::channel();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            watcher.cancel();
            let _ = stop_tx.send(());
        }
    });
    (cancel, stop_rx)
}
