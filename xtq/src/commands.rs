//! CLI command implementations.

use std::path::Path;

use serde::Deserialize;

use crosstracker::store::{RetrieveTrackers, RetrieveUser};
use crosstracker::{
    init, Config, CrossTrackerArtifactReportFactory, CrossTrackerReport, Dataset, Error, Result, Store, User,
};

/// A report as stored on disk.
#[derive(Debug, Deserialize)]
struct ReportFile {
    tracker_ids: Vec<i64>,
    #[serde(default)]
    expert_query: String,
}

pub fn init() -> Result<()> {
    let config = Config::default_location()?;

    if init::is_initialized(&config) {
        println!("xtq already initialized at {}", config.root.display());
        return Ok(());
    }

    init::initialize(&config)?;
    println!("xtq initialized at {}", config.root.display());
    Ok(())
}

pub fn load(path: &str) -> Result<()> {
    let store = open_store()?;
    let contents = std::fs::read_to_string(path)?;
    let dataset = Dataset::from_json(&contents)?;

    let stats = store.load_dataset(&dataset)?;
    println!(
        "Loaded {} users, {} trackers, {} artifacts",
        stats.users, stats.trackers, stats.artifacts
    );
    Ok(())
}

pub fn check(report_path: &str, login: Option<&str>) -> Result<()> {
    let store = open_store()?;
    let report = load_report(&store, Path::new(report_path))?;
    let user = resolve_user(&store, login)?;

    let mut factory = CrossTrackerArtifactReportFactory::new(&store, store.config());
    factory.check_report(&report, &user)?;

    if report.has_expert_query() {
        println!("Expert query is valid");
    } else {
        println!("Report has no expert query");
    }
    Ok(())
}

pub fn query(
    report_path: &str,
    login: Option<&str>,
    limit: Option<usize>,
    offset: usize,
    json: bool,
) -> Result<()> {
    let store = open_store()?;
    let report = load_report(&store, Path::new(report_path))?;
    let user = resolve_user(&store, login)?;
    let limit = store.config().clamp_limit(limit);

    let mut factory = CrossTrackerArtifactReportFactory::new(&store, store.config());
    let collection = factory.get_artifacts_matching_report(&report, &user, limit, offset)?;

    if json {
        let out = serde_json::to_string_pretty(&collection)
            .map_err(|e| Error::Storage(format!("Failed to serialize results: {}", e)))?;
        println!("{}", out);
        return Ok(());
    }

    if collection.artifacts().is_empty() {
        println!("No artifacts found ({} total)", collection.total_size());
        return Ok(());
    }

    println!("{:<8} {:<8} {:<20} TITLE", "ID", "TRACKER", "SUBMITTED");
    for artifact in collection.artifacts() {
        println!(
            "{:<8} {:<8} {:<20} {}",
            artifact.id,
            artifact.tracker_id,
            artifact.submitted_on.format("%Y-%m-%d %H:%M"),
            artifact.title.as_deref().unwrap_or("-")
        );
    }
    println!(
        "{} shown, {} total (offset {})",
        collection.artifacts().len(),
        collection.total_size(),
        offset
    );
    Ok(())
}

fn open_store() -> Result<Store> {
    let config = Config::load()?;
    Store::open(config)
}

fn load_report(store: &Store, path: &Path) -> Result<CrossTrackerReport> {
    let contents = std::fs::read_to_string(path)?;
    let file: ReportFile = toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Invalid report file {}: {}", path.display(), e)))?;

    let trackers = store.trackers_by_ids(&file.tracker_ids)?;
    Ok(CrossTrackerReport::new(trackers, file.expert_query))
}

fn resolve_user(store: &Store, login: Option<&str>) -> Result<User> {
    match login {
        None => Ok(User::anonymous()),
        Some(login) => store
            .user_by_login(login)?
            .ok_or_else(|| Error::NotFound(format!("user '{}'", login))),
    }
}
