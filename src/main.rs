use std::{future::Future, net::SocketAddr, process, sync::Arc};

use placecache::{
    application::{
        clock::{Clock, SystemClock},
        error::AppError,
        ledger::CallLedger,
        orchestrator::{CacheOrchestrator, OrchestratorSettings},
        provider::{CallPolicy, ExternalProvider},
        refresh::{self, RefreshReport, StaleRefresher},
        repos::{CallLedgerRepo, PlaceStore},
        rollout::{RandomBuckets, RolloutController},
        search::PlaceSearchService,
    },
    config,
    domain::rollout::RolloutConfig,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AdminState, ApiState},
        memory::{InMemoryCallLedger, InMemoryPlaceStore},
        provider::GooglePlacesProvider,
        telemetry,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Refresh(_) => run_refresh(settings).await,
        config::Command::LedgerReport(args) => run_ledger_report(settings, args).await,
    }
}

/// Store and ledger adapters selected by `database.url`.
struct Repositories {
    places: Arc<dyn PlaceStore>,
    ledger: Arc<dyn CallLedgerRepo>,
    postgres: Option<PostgresRepositories>,
}

async fn init_repositories(settings: &config::Settings) -> Result<Repositories, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        info!(
            target = "placecache::startup",
            "no database configured; places and the call ledger are kept in memory"
        );
        return Ok(Repositories {
            places: Arc::new(InMemoryPlaceStore::new()),
            ledger: Arc::new(InMemoryCallLedger::new()),
            postgres: None,
        });
    };

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let repositories = PostgresRepositories::new(pool);
    Ok(Repositories {
        places: Arc::new(repositories.clone()),
        ledger: Arc::new(repositories.clone()),
        postgres: Some(repositories),
    })
}

async fn require_database(
    settings: &config::Settings,
    command: &str,
) -> Result<Repositories, AppError> {
    if settings.database.url.is_none() {
        return Err(AppError::from(InfraError::configuration(format!(
            "`{command}` needs database.url; the in-memory store does not outlive a process"
        ))));
    }
    init_repositories(settings).await
}

fn build_provider(settings: &config::Settings) -> Result<Arc<dyn ExternalProvider>, AppError> {
    let provider = GooglePlacesProvider::new(&settings.provider).map_err(AppError::from)?;
    Ok(Arc::new(provider))
}

fn build_refresher(
    settings: &config::Settings,
    repositories: &Repositories,
    provider: Arc<dyn ExternalProvider>,
    ledger: CallLedger,
    clock: Arc<dyn Clock>,
) -> StaleRefresher {
    StaleRefresher::new(
        repositories.places.clone(),
        provider,
        ledger,
        clock,
        CallPolicy::new(settings.provider.timeout),
        refresh::RefreshSettings {
            max_age_days: settings.refresh.max_age_days,
            batch_limit: settings.refresh.batch_limit.get(),
            pacing: settings.refresh.pacing,
        },
    )
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let provider = build_provider(&settings)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = CallLedger::new(repositories.ledger.clone(), settings.provider.unit_cost);
    let policy = CallPolicy::new(settings.provider.timeout);

    let orchestrator = CacheOrchestrator::new(
        repositories.places.clone(),
        provider.clone(),
        ledger.clone(),
        clock.clone(),
        policy,
        OrchestratorSettings {
            min_coverage: settings.cache.min_coverage.get(),
            coalesce_precision: settings.cache.coalesce_precision,
        },
    );

    let rollout_config = RolloutConfig::new(settings.cache.enabled, settings.rollout.percentage)
        .map_err(AppError::from)?;
    let rollout = Arc::new(RolloutController::new(
        rollout_config,
        settings.rollout.session_capacity,
        Arc::new(RandomBuckets),
    ));
    info!(
        target = "placecache::startup",
        cache_enabled = rollout_config.enabled(),
        rollout_percentage = rollout_config.percentage(),
        in_memory = repositories.postgres.is_none(),
        "rollout configured"
    );

    let search = Arc::new(PlaceSearchService::new(
        orchestrator,
        rollout.clone(),
        repositories.places.clone(),
        provider.clone(),
        ledger.clone(),
        clock.clone(),
        policy,
        settings.cache.default_max_age_days,
    ));

    let refresh_handle = settings.refresh.interval.map(|every| {
        let refresher = Arc::new(build_refresher(
            &settings,
            &repositories,
            provider.clone(),
            ledger.clone(),
            clock.clone(),
        ));
        refresher.spawn_interval(every)
    });

    let api_state = ApiState {
        search,
        rate_limiter: Arc::new(http::ApiRateLimiter::new(
            std::time::Duration::from_secs(u64::from(settings.api_rate_limit.window_seconds.get())),
            settings.api_rate_limit.max_requests.get(),
        )),
    };
    let admin_state = AdminState {
        rollout,
        ledger,
        clock,
        db: repositories.postgres.clone(),
    };

    let result = serve_http(&settings, api_state, admin_state).await;

    if let Some(handle) = refresh_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_refresh(settings: config::Settings) -> Result<(), AppError> {
    let repositories = require_database(&settings, "refresh").await?;
    let provider = build_provider(&settings)?;
    let ledger = CallLedger::new(repositories.ledger.clone(), settings.provider.unit_cost);
    let refresher = build_refresher(
        &settings,
        &repositories,
        provider,
        ledger,
        Arc::new(SystemClock),
    );

    let report = refresher.run_once().await.map_err(AppError::from)?;
    print_refresh_report(&report);
    Ok(())
}

fn print_refresh_report(report: &RefreshReport) {
    println!("examined     {}", report.examined);
    println!("updated      {}", report.updated);
    println!("unchanged    {}", report.unchanged);
    println!("deactivated  {}", report.deactivated);
    println!("errors       {}", report.errors);
    println!("cost         {:.4}", report.total_cost);
    if report.aborted {
        println!("aborted      provider rate limit reached");
    }
}

async fn run_ledger_report(
    settings: config::Settings,
    args: config::LedgerReportArgs,
) -> Result<(), AppError> {
    let repositories = require_database(&settings, "ledger-report").await?;
    let ledger = CallLedger::new(repositories.ledger, settings.provider.unit_cost);
    let report = ledger
        .summarize(args.days, SystemClock.now())
        .await
        .map_err(AppError::from)?;
    let summary = http::summary_response(report);

    if args.json {
        let rendered = serde_json::to_string_pretty(&summary)
            .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
        println!("{rendered}");
        return Ok(());
    }

    println!(
        "{:<10} {:>8} {:>8} {:>8} {:>8} {:>10} {:>10} {:>8}",
        "date", "calls", "hits", "provider", "hit %", "cost", "avoided", "avg ms"
    );
    for day in &summary.days {
        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>8.1} {:>10.4} {:>10.4} {:>8.1}",
            day.date,
            day.total_calls,
            day.cache_hits,
            day.provider_calls,
            day.cache_hit_rate,
            day.total_cost,
            day.avoided_cost,
            day.avg_latency_ms
        );
    }
    println!(
        "{:<10} {:>8} {:>8} {:>8} {:>8.1} {:>10.4} {:>10.4}",
        "total",
        summary.total_calls,
        summary.cache_hits,
        summary.provider_calls,
        summary.cache_hit_rate,
        summary.total_cost,
        summary.avoided_cost
    );
    Ok(())
}

fn shutdown_requested(mut signal: watch::Receiver<bool>) -> impl Future<Output = ()> + Send {
    async move {
        let _ = signal.wait_for(|stop| *stop).await;
    }
}

async fn forward_ctrl_c(trigger: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "placecache::shutdown",
            error = %err,
            "cannot listen for ctrl-c; graceful shutdown disabled"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "placecache::shutdown", "shutdown requested");
    let _ = trigger.send(true);
}

async fn serve_http(
    settings: &config::Settings,
    api_state: ApiState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_api_router(api_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "placecache::startup",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let (trigger, signal) = watch::channel(false);
    let signal_task = tokio::spawn(forward_ctrl_c(trigger));

    let public_server = axum::serve(
        public_listener,
        public_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_requested(signal.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(signal.clone()));

    let drain_limit = settings.server.graceful_shutdown;
    let deadline = async move {
        shutdown_requested(signal).await;
        tokio::time::sleep(drain_limit).await;
    };

    let result = tokio::select! {
        served = async { try_join!(public_server, admin_server) } => {
            served.map(|_| ()).map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        () = deadline => {
            warn!(
                target = "placecache::shutdown",
                drain_seconds = drain_limit.as_secs(),
                "connections still open after the drain limit; exiting"
            );
            Ok(())
        }
    };

    signal_task.abort();
    result
}
