pub mod auth;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use db::DBService;
use services::services::{
    config::Config,
    mailer::Mailer,
    payments::{SquareClient, StripeClient},
};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub config: Arc<Config>,
    pub stripe: Option<Arc<StripeClient>>,
    pub square: Option<Arc<SquareClient>>,
    pub mailer: Arc<Mailer>,
}

impl AppState {
    pub fn new(db: DBService, config: Config) -> anyhow::Result<Self> {
        let stripe = config
            .stripe
            .clone()
            .map(StripeClient::new)
            .transpose()?
            .map(Arc::new);
        let square = config
            .square
            .clone()
            .map(SquareClient::new)
            .transpose()?
            .map(Arc::new);
        let mailer = Arc::new(Mailer::new(config.mailer.clone())?);

        Ok(Self {
            db,
            config: Arc::new(config),
            stripe,
            square,
            mailer,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(routes::health::router())
                .merge(routes::companies::router())
                .merge(routes::customers::router())
                .merge(routes::products::router())
                .merge(routes::quotes::router())
                .merge(routes::subscriptions::router())
                .merge(routes::integrations::router())
                .merge(routes::webhooks::router())
                .merge(routes::crawler::router()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
