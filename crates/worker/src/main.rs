use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grain_core::analytics::AnalyticsOptions;
use grain_core::composer::compose_dashboard;
use grain_core::domain::Session;
use grain_core::repository::{MemoryRepository, PgRepository, PriceRepository, RestRepository};

#[derive(Debug, Parser)]
#[command(name = "grain_worker")]
struct Args {
    /// Evaluation time (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long)]
    now: Option<String>,

    /// Read tables from a JSON fixture instead of the configured store.
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Pretty-print the snapshot.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = grain_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    // stdout carries the snapshot; logs go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let opts = AnalyticsOptions::from_env();

    let (now, repo, session) = match prepare(&settings, &args).await {
        Ok(ready) => ready,
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "worker setup failed");
            return Err(err);
        }
    };

    tracing::info!(%now, source = repo.source_name(), "composing dashboard");
    let snapshot = compose_dashboard(repo.as_ref(), Some(&session), now, &opts).await;

    for failure in &snapshot.errors {
        tracing::error!(
            computation = %failure.computation,
            error = %failure.message,
            "dashboard computation failed"
        );
    }

    let out = if args.pretty {
        serde_json::to_string_pretty(&snapshot)
    } else {
        serde_json::to_string(&snapshot)
    }
    .context("failed to serialize dashboard snapshot")?;
    println!("{out}");

    Ok(())
}

async fn prepare(
    settings: &grain_core::config::Settings,
    args: &Args,
) -> anyhow::Result<(DateTime<Utc>, Box<dyn PriceRepository>, Session)> {
    let now = grain_core::time::resolve_now(args.now.as_deref(), Utc::now())?;
    let (repo, session) = open_store(settings, args.fixture.as_deref()).await?;
    Ok((now, repo, session))
}

/// Fixture, then the REST table service with the service key, then a direct database
/// connection.
async fn open_store(
    settings: &grain_core::config::Settings,
    fixture: Option<&std::path::Path>,
) -> anyhow::Result<(Box<dyn PriceRepository>, Session)> {
    if let Some(path) = fixture {
        let repo = MemoryRepository::from_json_file(path)?;
        return Ok((Box::new(repo), Session::service("fixture")));
    }

    if let Ok(key) = settings.require_supabase_service_role_key() {
        let session = Session::service(key);
        let repo = RestRepository::from_settings(settings)?.for_session(&session);
        return Ok((Box::new(repo), session));
    }

    let db_url = settings
        .require_database_url()
        .context("no store configured: pass --fixture, set SUPABASE_SERVICE_ROLE_KEY or set DATABASE_URL")?;
    let pool = grain_core::storage::connect(db_url).await?;
    grain_core::storage::migrate(&pool).await?;
    Ok((Box::new(PgRepository::new(pool)), Session::service("")))
}

fn init_sentry(settings: &grain_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
