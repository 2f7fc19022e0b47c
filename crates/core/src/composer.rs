use crate::analytics::{
    dashboard_stats, delivery_month_trends, elevator_performance, price_trends, AnalyticsOptions,
};
use crate::domain::{Computation, DashboardSnapshot, Session};
use crate::repository::{FetchError, PriceRepository};
use chrono::{DateTime, Utc};

/// Builds the full dashboard in one pass.
///
/// The four views run concurrently on the current task and are awaited together; a failure
/// in one leaves the others untouched and is recorded in `errors`. Without a session no
/// query is issued and an empty, settled snapshot is returned.
pub async fn compose_dashboard(
    repo: &dyn PriceRepository,
    session: Option<&Session>,
    now: DateTime<Utc>,
    opts: &AnalyticsOptions,
) -> DashboardSnapshot {
    let Some(session) = session else {
        tracing::debug!("no session; returning empty dashboard");
        return DashboardSnapshot::empty();
    };

    let t0 = std::time::Instant::now();
    let (stats, trends, rankings, delivery) = tokio::join!(
        dashboard_stats(repo, now, opts),
        price_trends(repo, now, opts),
        elevator_performance(repo, opts),
        delivery_month_trends(repo, opts),
    );

    let mut snapshot = DashboardSnapshot::empty();
    match stats {
        Ok(stats) => snapshot.stats = stats,
        Err(err) => fail(&mut snapshot, Computation::Stats, err),
    }
    match trends {
        Ok(trends) => snapshot.price_trends = trends,
        Err(err) => fail(&mut snapshot, Computation::PriceTrends, err),
    }
    match rankings {
        Ok(rankings) => {
            snapshot.top_elevators = rankings.top;
            snapshot.bottom_elevators = rankings.bottom;
        }
        Err(err) => fail(&mut snapshot, Computation::ElevatorPerformance, err),
    }
    match delivery {
        Ok(delivery) => snapshot.delivery_month_trends = delivery,
        Err(err) => fail(&mut snapshot, Computation::DeliveryMonthTrends, err),
    }

    tracing::info!(
        user_id = %session.user_id,
        source = repo.source_name(),
        price_trends = snapshot.price_trends.len(),
        top_elevators = snapshot.top_elevators.len(),
        bottom_elevators = snapshot.bottom_elevators.len(),
        delivery_months = snapshot.delivery_month_trends.len(),
        failures = snapshot.errors.len(),
        elapsed_ms = t0.elapsed().as_millis(),
        "dashboard composed"
    );
    snapshot
}

fn fail(snapshot: &mut DashboardSnapshot, computation: Computation, err: FetchError) {
    tracing::warn!(%computation, error = %err, "dashboard computation failed");
    snapshot.record_failure(computation, format!("failed to load {computation}: {err}"));
}
