//! Route tables and the middleware stack shared by every route.

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::db::{Connector, MySqlConnector};
use crate::handlers::{self, AppState};

const BODY_LIMIT: usize = 1024 * 1024;

/// `/`, `/health` and, when enabled, `/debug/connection`.
pub fn status_routes<C: Connector>(debug_endpoints: bool) -> Router<Arc<AppState<C>>> {
    let routes = Router::new()
        .route("/", get(handlers::root::<C>))
        .route("/health", get(handlers::health::<C>));

    if debug_endpoints {
        routes.route("/debug/connection", get(handlers::debug_connection::<C>))
    } else {
        routes
    }
}

/// Registry CRUD routes.
pub fn registry_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/countries",
            get(handlers::list_countries).post(handlers::create_country),
        )
        .route("/countries/:id", get(handlers::get_country))
        .route("/territories", post(handlers::create_territory))
        .route("/territories/:country_id", get(handlers::list_territories))
        .route("/territory/:id", get(handlers::get_territory))
        .route("/districts", post(handlers::create_district))
        .route("/districts/:territory_id", get(handlers::list_districts))
        .route("/district/:id", get(handlers::get_district))
        .route("/seats", post(handlers::create_seat))
        .route("/seats/:district_id", get(handlers::list_seats))
        .route("/seat/:id", get(handlers::get_seat))
        .route("/citizens", post(handlers::create_citizen))
        .route(
            "/citizens/district/:district_id",
            get(handlers::citizens_by_district),
        )
        .route("/citizens/seat/:seat_id", get(handlers::citizens_by_seat))
        .route("/citizen/:id", get(handlers::get_citizen))
}

fn cors(config: &Config) -> CorsLayer {
    let config = config.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _| match origin.to_str() {
                Ok(origin) => config.origin_allowed(origin),
                Err(_) => false,
            },
        ))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

fn with_layers(router: Router, config: &Config) -> Router {
    router
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors(config)),
        )
}

/// Status routes only, over any connector.
pub fn status_app<C: Connector>(state: Arc<AppState<C>>) -> Router {
    let config = state.config.clone();
    let app = status_routes::<C>(config.debug_endpoints).with_state(state);
    with_layers(app, &config)
}

/// The full application router.
pub fn app(state: Arc<AppState>) -> Router {
    let config = state.config.clone();
    let app = Router::new()
        .merge(status_routes::<MySqlConnector>(config.debug_endpoints))
        .merge(registry_routes())
        .with_state(state);
    with_layers(app, &config)
}
