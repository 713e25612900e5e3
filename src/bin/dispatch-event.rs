/// Dispatch one notification event from the command line.
/// Used by scheduled reminder jobs, which decide who is due before calling.
///
/// Usage: dispatch-event --event match-reminder-24h --user UUID [--user UUID ...]
///          [--title TEXT] [--body TEXT] [--url PATH] [--subject TEXT]

use std::sync::Arc;

use clap::Parser;
use uuid::Uuid;

use league_notify::{
    config::NotifyConfig,
    db::{self, PgStore},
    services::{
        catalog::EventKey, dispatch::DispatchRequest, dispatch::Dispatcher, sms::SmsService,
        system_clock, templates::TemplateSet,
    },
};

#[derive(Parser)]
#[command(name = "dispatch-event", about = "Send a league notification to users")]
struct Args {
    /// Event key, e.g. `match-reminder-24h` or `MATCH_REMINDER_24H`
    #[arg(long)]
    event: EventKey,

    /// Recipient user id (repeatable)
    #[arg(long = "user", required = true)]
    users: Vec<Uuid>,

    #[arg(long, default_value = "")]
    title: String,

    #[arg(long, default_value = "")]
    body: String,

    /// Link target, relative to the site base or absolute
    #[arg(long, default_value = "")]
    url: String,

    /// Replaces the rendered email subject
    #[arg(long)]
    subject: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable not set"))?;
    let notify = NotifyConfig::from_env()?;

    let pool = db::create_pool(&database_url).await?;
    let templates = Arc::new(TemplateSet::new()?);
    let sms = Arc::new(SmsService::new(&notify.sms, templates.clone())?);
    let dispatcher = Dispatcher::new(
        Arc::new(PgStore::new(pool)),
        &notify,
        templates,
        sms,
        system_clock(),
    );

    let mut req = DispatchRequest::new(args.event)
        .to_users(args.users)
        .title(args.title)
        .body(args.body)
        .url(args.url);
    req.subject_override = args.subject;

    tracing::info!("Dispatching {}...", args.event);
    let out = dispatcher.dispatch(req).await?;

    println!(
        "notification={} recipients={} attempts={}",
        out.notification.id, out.recipients, out.attempts
    );
    Ok(())
}
