use anyhow::{Context, Result};
use axum::{
    Form, Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::NaiveDate;
use http::{HeaderMap, Method, StatusCode, header};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::config::ServiceConfig;
use crate::coordinates::{ServiceArea, validate_in_area};
use crate::error::PipelineError;
use crate::fare_model::{FareModel, finalize_fare};
use crate::features::{FeatureVector, MAX_PASSENGERS, MIN_PASSENGERS};
use crate::pipeline::{PreparedInput, TripResolution, prepare_input};
use crate::polyline::RoutePolyline;
use crate::road_graph::RoadGraph;

const REQUIRED_FIELDS: [&str; 7] = [
    "pickup_lat",
    "pickup_lon",
    "dropoff_lat",
    "dropoff_lon",
    "date",
    "hour",
    "passenger_count",
];

/// Read-only state shared by all handlers
pub struct AppState {
    pub config: ServiceConfig,
    pub graph: Option<Arc<RoadGraph>>,
    pub model: Option<Arc<dyn FareModel>>,
}

#[derive(Serialize)]
struct PredictResponse {
    predicted_fare: f64,
    distance_km: f64,
    route_coords: RoutePolyline,
    route_geojson: serde_json::Value,
    resolution: TripResolution,
    features: FeatureVector,
    success: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    route_coords: Vec<(f64, f64)>,
}

#[derive(Serialize)]
struct HealthResponse {
    graph_loaded: bool,
    model_loaded: bool,
    status: &'static str,
}

#[derive(Serialize)]
struct DebugResponse {
    status: &'static str,
    form_data: HashMap<String, String>,
    content_type: Option<String>,
}

/// Parsed `/predict` form
#[derive(Debug, Clone, PartialEq)]
struct PredictForm {
    pickup_lat: f64,
    pickup_lon: f64,
    dropoff_lat: f64,
    dropoff_lon: f64,
    date: String,
    hour: i64,
    passenger_count: i64,
}

impl PredictForm {
    fn parse(form: &HashMap<String, String>) -> std::result::Result<Self, String> {
        let field = |name: &str| form.get(name).map(|v| v.trim()).unwrap_or_default();
        let float = |name: &str| {
            field(name)
                .parse::<f64>()
                .map_err(|e| format!("{}: {}", name, e))
        };
        let int = |name: &str| {
            field(name)
                .parse::<i64>()
                .map_err(|e| format!("{}: {}", name, e))
        };

        Ok(Self {
            pickup_lat: float("pickup_lat")?,
            pickup_lon: float("pickup_lon")?,
            dropoff_lat: float("dropoff_lat")?,
            dropoff_lon: float("dropoff_lon")?,
            date: field("date").to_string(),
            hour: int("hour")?,
            passenger_count: int("passenger_count")?,
        })
    }

    fn datetime(&self) -> String {
        format!("{} {:02}:00:00", self.date, self.hour)
    }
}

fn missing_fields(form: &HashMap<String, String>) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .into_iter()
        .filter(|name| form.get(*name).is_none_or(|v| v.trim().is_empty()))
        .collect()
}

/// Collect every problem with the request instead of stopping at the first
fn validate_inputs(area: &ServiceArea, form: &PredictForm) -> Vec<String> {
    let mut errors = Vec::new();

    for (label, lat, lon) in [
        ("Pickup", form.pickup_lat, form.pickup_lon),
        ("Dropoff", form.dropoff_lat, form.dropoff_lon),
    ] {
        if !validate_in_area(area, lat, lon) {
            errors.push(format!(
                "{}: {}",
                label,
                PipelineError::OutOfServiceArea { lat, lon }
            ));
        }
    }

    if NaiveDate::parse_from_str(&form.date, "%Y-%m-%d").is_err() {
        errors.push("Invalid date format".to_string());
    }
    if !(0..=23).contains(&form.hour) {
        errors.push("Hour must be between 0 and 23".to_string());
    }
    if !(MIN_PASSENGERS..=MAX_PASSENGERS).contains(&form.passenger_count) {
        errors.push(format!(
            "Passenger count must be between {} and {}",
            MIN_PASSENGERS, MAX_PASSENGERS
        ));
    }

    errors
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            route_coords: Vec::new(),
        }),
    )
        .into_response()
}

fn pipeline_error_response(err: PipelineError) -> Response {
    match err {
        PipelineError::GraphUnavailable => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        PipelineError::NodeResolution(_) | PipelineError::NoRouteFound => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "No route found between these points. Please try different locations.",
        ),
        e if e.is_client_error() => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        e => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let Some(graph) = state.graph.clone() else {
        warn!("Prediction requested without a road graph");
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Road network data not available. Please try again later.",
        );
    };
    let Some(model) = state.model.clone() else {
        warn!("Prediction requested without a fare model");
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Prediction model not available. Please try again later.",
        );
    };

    let missing = missing_fields(&form);
    if !missing.is_empty() {
        debug!("Missing fields: {:?}", missing);
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Missing required fields: {}", missing.join(", ")),
        );
    }

    let input = match PredictForm::parse(&form) {
        Ok(input) => input,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid input format: {}", e),
            );
        }
    };
    debug!("Form data: {:?}", input);

    let errors = validate_inputs(&state.config.service_area, &input);
    if !errors.is_empty() {
        debug!("Validation errors: {:?}", errors);
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Validation errors: {}", errors.join("; ")),
        );
    }

    let datetime = input.datetime();
    let prepared = tokio::task::spawn_blocking(move || {
        prepare_input(
            input.pickup_lat,
            input.pickup_lon,
            input.dropoff_lat,
            input.dropoff_lon,
            &datetime,
            Some(&*graph),
            input.passenger_count,
        )
    })
    .await;

    let PreparedInput {
        features,
        route,
        resolution,
    } = match prepared {
        Ok(Ok(prepared)) => prepared,
        Ok(Err(e)) => {
            warn!("Trip preparation failed: {}", e);
            return pipeline_error_response(e);
        }
        Err(e) => {
            error!("Trip preparation task failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Trip preparation failed");
        }
    };

    debug!("Trip resolved as {:?}", resolution);

    if features.distance_km <= 0.0 {
        return pipeline_error_response(PipelineError::NoRouteFound);
    }

    let raw = match model.predict(&features) {
        Ok(raw) => raw,
        Err(e) => {
            error!("Prediction failed: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An unexpected error occurred: {}", e),
            );
        }
    };
    let fare = finalize_fare(raw, state.config.minimum_fare);
    info!(
        "Predicted fare {:.2} (raw {:.4}) for {:.2} km",
        fare, raw, features.distance_km
    );

    Json(PredictResponse {
        predicted_fare: round_cents(fare),
        distance_km: round_cents(features.distance_km),
        route_geojson: route.to_geojson(),
        route_coords: route,
        resolution,
        features,
        success: true,
    })
    .into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let graph_loaded = state.graph.is_some();
    let model_loaded = state.model.is_some();
    Json(HealthResponse {
        graph_loaded,
        model_loaded,
        status: if graph_loaded && model_loaded {
            "healthy"
        } else {
            "degraded"
        },
    })
}

async fn debug_form(
    headers: HeaderMap,
    Form(form_data): Form<HashMap<String, String>>,
) -> Json<DebugResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    debug!("Debug form {:?} ({:?})", form_data, content_type);
    Json(DebugResponse {
        status: "received",
        form_data,
        content_type,
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .route("/debug", post(debug_form))
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    timeout,
                )),
        )
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind_addr;
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Starting HTTP server at {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
