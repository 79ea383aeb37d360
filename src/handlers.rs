use crate::config::Config;
use crate::db::{ConnectionManager, Connector, MySqlConnector};
use crate::errors::AppError;
use crate::models::*;
use crate::registry::RegistryStorage;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
pub struct AppState<C: Connector = MySqlConnector> {
    /// Connection manager owning the active pool.
    pub db: Arc<ConnectionManager<C>>,
    /// Application configuration.
    pub config: Config,
}

impl<C: Connector> AppState<C> {
    pub fn new(db: Arc<ConnectionManager<C>>, config: Config) -> Self {
        Self { db, config }
    }
}

impl AppState {
    fn registry(&self) -> RegistryStorage {
        RegistryStorage::new(Arc::clone(&self.db))
    }
}

/// Unwraps a JSON body, turning malformed or incomplete payloads into 400s.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Unwraps a numeric path segment, turning anything else into a 400.
fn path_id(path: Result<Path<i32>, PathRejection>) -> Result<i32, AppError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn created(entity: &str, id: u64) -> (StatusCode, Json<Created>) {
    (
        StatusCode::CREATED,
        Json(Created {
            message: format!("{} added successfully", entity),
            id,
        }),
    )
}

fn found<T>(row: Option<T>, what: &str, id: i32) -> Result<Json<T>, AppError> {
    row.map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{} {} not found", what, id)))
}

// ============ Status ============

/// GET /
///
/// Service banner with the current connection state.
pub async fn root<C: Connector>(State(state): State<Arc<AppState<C>>>) -> Json<serde_json::Value> {
    let status = state.db.status();
    Json(json!({
        "message": "Citizen Registry API",
        "status": "running",
        "service": "citizen-registry-api",
        "database": status.state,
        "active_host": status.active_host,
        "database_name": state.db.settings().targets.database,
        "timestamp": Utc::now(),
    }))
}

/// GET /health
///
/// Healthy only when a pooled connection answers the liveness query in time.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - 200 when healthy, 503 otherwise.
pub async fn health<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let checked = state.db.health_check().await;
    let db_state = state.db.state();

    match checked {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "state": db_state,
                "timestamp": Utc::now(),
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "database": e.to_string(),
                    "state": db_state,
                    "timestamp": Utc::now(),
                })),
            )
        }
    }
}

/// GET /debug/connection
///
/// Connection diagnostics. Credentials are reported as presence flags only.
pub async fn debug_connection<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
) -> Json<serde_json::Value> {
    let status = state.db.status();
    let candidates: Vec<_> = state
        .db
        .candidates()
        .iter()
        .map(|candidate| {
            json!({
                "source": candidate.source,
                "host": candidate.host,
                "port": candidate.port,
                "database": candidate.database,
                "has_user": !candidate.user.is_empty(),
                "has_password": candidate.password.is_some(),
            })
        })
        .collect();

    Json(json!({
        "state": status.state,
        "active_host": status.active_host,
        "failed_passes": status.failed_passes,
        "last_error": status.last_error,
        "changed_at": status.changed_at,
        "pool": state.db.pool_stats(),
        "candidates": candidates,
        "transitions": state.db.history(),
        "dns_probe": state.db.settings().dns_probe,
    }))
}

// ============ Countries ============

/// GET /countries
pub async fn list_countries(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Country>>, AppError> {
    let countries = state.registry().list_countries().await?;
    tracing::debug!("Listed {} countries", countries.len());
    Ok(Json(countries))
}

/// GET /countries/:id
pub async fn get_country(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Country>, AppError> {
    let id = path_id(path)?;
    found(state.registry().get_country(id).await?, "Country", id)
}

/// POST /countries
pub async fn create_country(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewCountry>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let new = body(payload)?;
    new.validate()?;
    let id = state.registry().insert_country(&new).await?;
    tracing::info!("Country {} added", id);
    Ok(created("Country", id))
}

// ============ Territories ============

/// GET /territories/:countryId
pub async fn list_territories(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Vec<Territory>>, AppError> {
    let country_id = path_id(path)?;
    Ok(Json(state.registry().territories_by_country(country_id).await?))
}

/// GET /territory/:id
pub async fn get_territory(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Territory>, AppError> {
    let id = path_id(path)?;
    found(state.registry().get_territory(id).await?, "Territory", id)
}

/// POST /territories
pub async fn create_territory(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewTerritory>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let new = body(payload)?;
    new.validate()?;
    let id = state.registry().insert_territory(&new).await?;
    tracing::info!("Territory {} added to country {}", id, new.country_id);
    Ok(created("Territory", id))
}

// ============ Districts ============

/// GET /districts/:territoryId
pub async fn list_districts(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Vec<District>>, AppError> {
    let territory_id = path_id(path)?;
    Ok(Json(state.registry().districts_by_territory(territory_id).await?))
}

/// GET /district/:id
pub async fn get_district(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<District>, AppError> {
    let id = path_id(path)?;
    found(state.registry().get_district(id).await?, "District", id)
}

/// POST /districts
pub async fn create_district(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewDistrict>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let new = body(payload)?;
    new.validate()?;
    let id = state.registry().insert_district(&new).await?;
    tracing::info!("District {} added to territory {}", id, new.territory_id);
    Ok(created("District", id))
}

// ============ Seats ============

/// GET /seats/:districtId
pub async fn list_seats(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Vec<Seat>>, AppError> {
    let district_id = path_id(path)?;
    Ok(Json(state.registry().seats_by_district(district_id).await?))
}

/// GET /seat/:id
pub async fn get_seat(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Seat>, AppError> {
    let id = path_id(path)?;
    found(state.registry().get_seat(id).await?, "Seat", id)
}

/// POST /seats
pub async fn create_seat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewSeat>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let new = body(payload)?;
    new.validate()?;
    let id = state.registry().insert_seat(&new).await?;
    tracing::info!("Seat {} added to district {}", id, new.district_id);
    Ok(created("Seat", id))
}

// ============ Citizens ============

/// GET /citizens/district/:districtId
pub async fn citizens_by_district(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Vec<Citizen>>, AppError> {
    let district_id = path_id(path)?;
    Ok(Json(state.registry().citizens_by_district(district_id).await?))
}

/// GET /citizens/seat/:seatId
pub async fn citizens_by_seat(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Vec<Citizen>>, AppError> {
    let seat_id = path_id(path)?;
    Ok(Json(state.registry().citizens_by_seat(seat_id).await?))
}

/// GET /citizen/:id
pub async fn get_citizen(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<Citizen>, AppError> {
    let id = path_id(path)?;
    found(state.registry().get_citizen(id).await?, "Citizen", id)
}

/// POST /citizens
///
/// Validates the ids and name, then inserts a single row. The insert is
/// never retried, even when the connection drops mid-statement.
pub async fn create_citizen(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewCitizen>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let new = body(payload)?;
    new.validate()?;
    let id = state.registry().insert_citizen(&new).await?;
    tracing::info!("Citizen {} added to seat {}", id, new.seat_id);
    Ok(created("Citizen", id))
}
