use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use redis::Client as RedisClient;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use league_notify::{
    config::Config,
    db::{self, PgStore, Store},
    middleware::auth::JwtSecret,
    routes,
    services::{
        self,
        dispatch::Dispatcher,
        inbox::InboxService,
        phone_verification::{PhoneVerificationService, RedisLatch},
        preferences::PreferenceService,
        sms::SmsService,
        templates::TemplateSet,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_async_connection().await?;
    info!("Redis connected");

    let clock = services::system_clock();
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let templates = Arc::new(TemplateSet::new()?);
    let sms = Arc::new(SmsService::new(&config.notify.sms, templates.clone())?);
    if sms.is_configured() {
        info!("SMS provider configured");
    } else {
        info!("SMS disabled or misconfigured; SMS attempts will be suppressed");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        &config.notify,
        templates,
        sms.clone(),
        clock.clone(),
    ));
    let phone = Arc::new(PhoneVerificationService::new(
        store.clone(),
        sms.clone(),
        Arc::new(RedisLatch::new(redis_conn.clone())),
        clock.clone(),
    ));
    let preferences = Arc::new(PreferenceService::new(
        store.clone(),
        sms.default_country(),
        clock.clone(),
    ));
    let inbox = Arc::new(InboxService::new(store.clone(), clock));

    services::metrics::start(pool.clone());

    let state = AppState {
        db: pool,
        redis: redis_conn,
        config: config.clone(),
        store,
        dispatcher,
        phone,
        preferences,
        inbox,
    };

    // Browsers only reach the user-facing routes; allow the site origin and localhost.
    let site_origin = config.notify.site.site_base();
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") || o == site_origin
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(cors_origin);

    let jwt_secret = JwtSecret(config.jwt_secret.clone());

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // In-app inbox
        .route("/notifications", get(routes::notifications::list_inbox))
        .route("/notifications/unread-count", get(routes::notifications::unread_count))
        .route("/notifications/mark-all-read", post(routes::notifications::mark_all_read))
        .route("/notifications/bulk", post(routes::notifications::bulk))
        .route("/notifications/{id}/open", post(routes::notifications::open))
        .route("/notifications/{id}/deliveries", get(routes::notifications::deliveries))
        // Preferences
        .route(
            "/notifications/preferences",
            get(routes::preferences::get_preferences).put(routes::preferences::update_preferences),
        )
        // Phone verification
        .route("/sms/start", post(routes::phone::start))
        .route("/sms/verify", post(routes::phone::verify))
        .route("/sms/consent", post(routes::phone::consent))
        // Provider webhooks
        .route("/webhooks/sms/status", post(routes::sms_status::sms_status_callback))
        // League application
        .route("/internal/dispatch", post(routes::internal::dispatch))
        .route("/internal/lineups/published", post(routes::internal::lineup))
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("league-notify API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
