// Library exports for the binaries and tests
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use config::Config;
use db::Store;
use services::{
    dispatch::Dispatcher, inbox::InboxService, phone_verification::PhoneVerificationService,
    preferences::PreferenceService,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: redis::aio::MultiplexedConnection,
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<Dispatcher>,
    pub phone: Arc<PhoneVerificationService>,
    pub preferences: Arc<PreferenceService>,
    pub inbox: Arc<InboxService>,
}
