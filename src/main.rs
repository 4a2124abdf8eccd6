//! Loads the beatmap database once, fills in missing star ratings and
//! writes the local dumps back.

use beatmap_core::config::DatabaseConfig;
use beatmap_core::database::{Database, LoadMode, LoadState, Notification};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CONFIG_FILE: &str = "beatmap-core.toml";
const MAP_CALC_BUDGET: Duration = Duration::from_secs(30);

fn main() -> Result<(), Box<dyn Error>> {
    unsafe {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    log::info!("MAIN: Booting beatmap-core...");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = DatabaseConfig::load_or_default(&config_path)?;
    log::info!("MAIN: songs folder {:?}", config.songs_path());

    let db = Arc::new(Database::new(config));
    if !db.start_load(LoadMode::Full) {
        return Err("a load pass is already running".into());
    }

    while db.is_loading() {
        thread::sleep(Duration::from_millis(250));
        log::info!(
            "MAIN: {:?} {:.0}%",
            db.progress().state(),
            db.progress().ratio() * 100.0
        );
    }
    let Some(report) = db.join_load() else {
        return Err("loader thread panicked".into());
    };

    for notification in db.notifications().try_iter() {
        match notification {
            Notification::DumpError { file, error } => log::warn!("MAIN: {:?}: {}", file, error),
            Notification::Warning(message) => log::warn!("MAIN: {}", message),
            Notification::LoadFinished(_) | Notification::LoadCancelled => {}
        }
    }

    if report.state != LoadState::Finished {
        log::warn!("MAIN: load ended as {:?}, not saving", report.state);
        return Ok(());
    }
    log::info!(
        "MAIN: {} sets, {} difficulties, {} scores ({} raw loaded, {} reparsed, {} removed)",
        report.sets,
        report.difficulties,
        report.scores,
        report.raw_loaded,
        report.reparsed,
        report.removed
    );

    let deadline = Instant::now() + MAP_CALC_BUDGET;
    let mut applied = 0;
    while db.map_calc_remaining() > 0 && Instant::now() < deadline {
        applied += db.poll_map_calc();
        thread::sleep(Duration::from_millis(100));
    }
    applied += db.poll_map_calc();
    if applied > 0 {
        log::info!("MAIN: rated {} difficulties", applied);
    }

    let stats = db.local_player_stats();
    log::info!(
        "MAIN: {} has {:.0}pp, {:.2}% accuracy, level {}",
        stats.name,
        stats.pp,
        stats.accuracy * 100.0,
        stats.level
    );

    db.save()?;
    Ok(())
}
