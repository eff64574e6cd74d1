//! HTTP API and Prometheus metrics endpoint
//!
//! JSON API over hyper http1 plus `/metrics` in Prometheus text format and
//! `/health`. Routing and request decoding are separated from the socket
//! loop so handlers can be exercised without a listener.

use crate::domain::error::DomainError;
use crate::domain::lifecycle::HandoverPolicy;
use crate::domain::types::{BookingId, Cents, HandoverType, SessionId, UserId};
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::booking::BookingService;
use crate::services::context::ServiceContext;
use crate::services::handover::HandoverService;
use crate::services::promo::PromoService;
use crate::services::reminders::{Notifier, ReminderService};
use crate::services::rental_details::RentalDetailsService;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const JSON: &str = "application/json";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Everything a request handler needs
pub struct AppState {
    site_id: String,
    admin_token: Option<String>,
    metrics: Arc<Metrics>,
    pub rentals: RentalDetailsService,
    pub handovers: HandoverService,
    pub bookings: BookingService,
    pub promos: PromoService,
    pub reminders: Arc<ReminderService>,
}

impl AppState {
    pub fn new(
        site_id: &str,
        admin_token: Option<&str>,
        ctx: ServiceContext,
        policy: HandoverPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            site_id: site_id.to_string(),
            admin_token: admin_token.map(str::to_string),
            metrics: ctx.metrics.clone(),
            rentals: RentalDetailsService::new(ctx.clone(), policy),
            handovers: HandoverService::new(ctx.clone(), policy),
            bookings: BookingService::new(ctx.clone()),
            promos: PromoService::new(ctx.clone()),
            reminders: Arc::new(ReminderService::new(ctx, notifier)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "invalid_input", message: message.into() }
    }

    fn unauthorized(message: &str) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, code: "unauthorized", message: message.to_string() }
    }

    fn route_not_found(method: &Method, path: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "route_not_found",
            message: format!("no route for {method} {path}"),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: message.into(),
        }
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let body = serde_json::json!({
            "ok": false,
            "error": self.code,
            "message": self.message,
        });
        response(self.status, JSON, body.to_string())
    }
}

pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::InvalidStateTransition(_)
        | DomainError::PromoRejected(_)
        | DomainError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DomainError::HandoverNotAllowed(_) | DomainError::NotParticipant(_) => StatusCode::FORBIDDEN,
        DomainError::DuplicateSession(_) => StatusCode::CONFLICT,
        DomainError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self { status: status_for(&err), code: err.code(), message: err.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Route {
    Health,
    Metrics,
    RentalView(BookingId),
    ApproveBooking(BookingId),
    CancelBooking(BookingId),
    StartHandover(BookingId),
    CompleteStep(SessionId, String),
    CompleteSession(SessionId),
    ShareLocation(SessionId),
    ValidatePromo,
    ApplyPromo,
    RunReminders,
    ExpireBookings,
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse().map_err(|_| ApiError::bad_request(format!("invalid {what} id: {raw}")))
}

fn parse_route(method: &Method, path: &str) -> Result<Route, ApiError> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let route = match (method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Route::Health,
        (&Method::GET, ["metrics"]) => Route::Metrics,
        (&Method::GET, ["bookings", id, "rental"]) => Route::RentalView(parse_id(id, "booking")?),
        (&Method::POST, ["bookings", id, "approve"]) => {
            Route::ApproveBooking(parse_id(id, "booking")?)
        }
        (&Method::POST, ["bookings", id, "cancel"]) => Route::CancelBooking(parse_id(id, "booking")?),
        (&Method::POST, ["bookings", id, "handover"]) => {
            Route::StartHandover(parse_id(id, "booking")?)
        }
        (&Method::POST, ["handover", id, "steps", step]) if !step.is_empty() => {
            Route::CompleteStep(parse_id(id, "session")?, step.to_string())
        }
        (&Method::POST, ["handover", id, "complete"]) => {
            Route::CompleteSession(parse_id(id, "session")?)
        }
        (&Method::POST, ["handover", id, "location"]) => {
            Route::ShareLocation(parse_id(id, "session")?)
        }
        (&Method::POST, ["promo", "validate"]) => Route::ValidatePromo,
        (&Method::POST, ["promo", "apply"]) => Route::ApplyPromo,
        (&Method::POST, ["admin", "reminders", "run"]) => Route::RunReminders,
        (&Method::POST, ["admin", "bookings", "expire"]) => Route::ExpireBookings,
        _ => return Err(ApiError::route_not_found(method, path)),
    };
    Ok(route)
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

#[derive(Debug, Deserialize)]
struct UserBody {
    user: UserId,
}

#[derive(Debug, Deserialize)]
struct StartHandoverBody {
    initiator: UserId,
    #[serde(rename = "type")]
    handover_type: HandoverType,
}

#[derive(Debug, Deserialize)]
struct LocationBody {
    user: UserId,
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct ValidatePromoBody {
    code: String,
    user: UserId,
    amount: Cents,
}

#[derive(Debug, Deserialize)]
struct ApplyPromoBody {
    code: String,
    user: UserId,
    #[serde(default)]
    booking: Option<BookingId>,
    amount: Cents,
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid body: {e}")))
}

/// Handler result before it becomes a hyper response
#[derive(Debug)]
enum Reply {
    Json(StatusCode, serde_json::Value),
    Text(&'static str, String),
}

impl Reply {
    fn ok<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        Self::json(StatusCode::OK, value)
    }

    fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, ApiError> {
        serde_json::to_value(value)
            .map(|json| Reply::Json(status, json))
            .map_err(|e| ApiError::internal(format!("serialize failed: {e}")))
    }

    fn status(&self) -> StatusCode {
        match self {
            Reply::Json(status, _) => *status,
            Reply::Text(..) => StatusCode::OK,
        }
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        match self {
            Reply::Json(status, json) => response(status, JSON, json.to_string()),
            Reply::Text(content_type, body) => response(StatusCode::OK, content_type, body),
        }
    }
}

fn response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn require_admin(state: &AppState, authorization: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::unauthorized("admin endpoints are disabled"));
    };
    match authorization.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::unauthorized("missing or invalid bearer token")),
    }
}

async fn dispatch(
    state: &AppState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    authorization: Option<&str>,
    body: &[u8],
) -> Result<Reply, ApiError> {
    match parse_route(method, path)? {
        Route::Health => Ok(Reply::Text("text/plain", "ok".to_string())),
        Route::Metrics => Ok(Reply::Text(
            PROMETHEUS_TEXT,
            format_prometheus_metrics(&state.metrics, &state.site_id),
        )),
        Route::RentalView(booking_id) => {
            let viewer = query_param(query, "viewer")
                .ok_or_else(|| ApiError::bad_request("missing viewer query parameter"))?;
            let viewer: UserId = parse_id(viewer, "viewer")?;
            Reply::ok(&state.rentals.rental_view(booking_id, viewer).await?)
        }
        Route::ApproveBooking(booking_id) => {
            let req: UserBody = decode(body)?;
            Reply::ok(&state.bookings.approve(booking_id, req.user).await?)
        }
        Route::CancelBooking(booking_id) => {
            let req: UserBody = decode(body)?;
            Reply::ok(&state.bookings.cancel(booking_id, req.user).await?)
        }
        Route::StartHandover(booking_id) => {
            let req: StartHandoverBody = decode(body)?;
            let started =
                state.handovers.start_handover(booking_id, req.initiator, req.handover_type).await?;
            let status = if started.created { StatusCode::CREATED } else { StatusCode::OK };
            Reply::json(status, &started)
        }
        Route::CompleteStep(session_id, step) => {
            let req: UserBody = decode(body)?;
            Reply::ok(&state.handovers.complete_step(session_id, &step, req.user).await?)
        }
        Route::CompleteSession(session_id) => {
            let req: UserBody = decode(body)?;
            Reply::ok(&state.handovers.complete_session(session_id, req.user).await?)
        }
        Route::ShareLocation(session_id) => {
            let req: LocationBody = decode(body)?;
            let published =
                state.handovers.share_location(session_id, req.user, req.lat, req.lng).await?;
            Reply::ok(&serde_json::json!({ "ok": true, "published": published }))
        }
        Route::ValidatePromo => {
            let req: ValidatePromoBody = decode(body)?;
            Reply::ok(&state.promos.validate(&req.code, req.user, req.amount).await?)
        }
        Route::ApplyPromo => {
            let req: ApplyPromoBody = decode(body)?;
            Reply::ok(&state.promos.apply(&req.code, req.user, req.booking, req.amount).await?)
        }
        Route::RunReminders => {
            require_admin(state, authorization)?;
            Reply::ok(&state.reminders.run_sweep().await?)
        }
        Route::ExpireBookings => {
            require_admin(state, authorization)?;
            let expired = state.bookings.expire_stale().await?;
            Reply::ok(&serde_json::json!({ "expired": expired }))
        }
    }
}

/// Handle one HTTP request
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let authorization =
        req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_string);

    let result = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => {
            let body = collected.to_bytes();
            dispatch(&state, &method, &path, query.as_deref(), authorization.as_deref(), &body).await
        }
        Err(e) => Err(ApiError::bad_request(format!("unreadable body: {e}"))),
    };

    let (status, response) = match result {
        Ok(reply) => (reply.status(), reply.into_response()),
        Err(err) => {
            if err.status.is_server_error() {
                error!(method = %method, path = %path, error = %err.code, detail = %err.message, "http_request_failed");
            } else {
                warn!(method = %method, path = %path, error = %err.code, detail = %err.message, "http_request_rejected");
            }
            (err.status, err.into_response())
        }
    };

    let latency_us = start.elapsed().as_micros() as u64;
    state.metrics.record_http_request(latency_us, status.is_client_error() || status.is_server_error());
    debug!(method = %method, path = %path, status = %status.as_u16(), latency_us = %latency_us, "http_request");
    Ok(response)
}

/// Start the HTTP server
pub async fn start_http_server(
    bind_address: &str,
    port: u16,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    info!(bind_address = %bind_address, port = %port, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_http_metrics(&mut output, site_id, &summary);
    write_handover_metrics(&mut output, site_id, &summary);
    write_promo_metrics(&mut output, site_id, &summary);
    write_reminder_metrics(&mut output, site_id, &summary);

    output
}

fn write_http_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "carshare_http_requests_total",
        "Total HTTP requests handled",
        MetricType::Counter,
        site,
        summary.http_requests_total,
    );
    write_metric(
        output,
        "carshare_http_errors_total",
        "HTTP requests answered with a 4xx or 5xx status",
        MetricType::Counter,
        site,
        summary.http_errors_total,
    );
    let _ = writeln!(output, "# HELP carshare_http_requests_per_sec Requests per second since last report");
    let _ = writeln!(output, "# TYPE carshare_http_requests_per_sec gauge");
    let _ = writeln!(
        output,
        "carshare_http_requests_per_sec{{site=\"{site}\"}} {:.2}",
        summary.requests_per_sec
    );
    write_histogram(
        output,
        "carshare_http_latency_us",
        "HTTP request latency in microseconds",
        site,
        &summary.http_latency_buckets,
        summary.http_latency_sum_us,
    );
}

fn write_handover_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "carshare_handovers_started_total",
        "Start-handover calls that returned a session",
        MetricType::Counter,
        site,
        summary.handovers_started,
    );
    write_metric(
        output,
        "carshare_handover_sessions_created_total",
        "Handover sessions created",
        MetricType::Counter,
        site,
        summary.sessions_created,
    );
    write_metric(
        output,
        "carshare_handover_steps_completed_total",
        "Checklist steps completed",
        MetricType::Counter,
        site,
        summary.steps_completed,
    );
    write_metric(
        output,
        "carshare_handover_sessions_completed_total",
        "Handover sessions completed",
        MetricType::Counter,
        site,
        summary.sessions_completed,
    );
    write_metric(
        output,
        "carshare_booking_transitions_total",
        "Booking status transitions persisted",
        MetricType::Counter,
        site,
        summary.bookings_transitioned,
    );
    write_metric(
        output,
        "carshare_location_updates_total",
        "Location updates accepted",
        MetricType::Counter,
        site,
        summary.location_updates,
    );
    write_metric(
        output,
        "carshare_location_drops_total",
        "Location updates dropped due to channel full",
        MetricType::Counter,
        site,
        summary.location_drops,
    );
}

fn write_promo_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "carshare_promo_validations_total",
        "Promo code validations",
        MetricType::Counter,
        site,
        summary.promo_validations,
    );
    write_metric(
        output,
        "carshare_promo_rejections_total",
        "Promo code validations rejected",
        MetricType::Counter,
        site,
        summary.promo_rejections,
    );
    write_metric(
        output,
        "carshare_promo_redemptions_total",
        "Promo codes redeemed",
        MetricType::Counter,
        site,
        summary.promo_redemptions,
    );
}

fn write_reminder_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "carshare_reminders_sent_total",
        "Reminders delivered",
        MetricType::Counter,
        site,
        summary.reminders_sent,
    );
    write_metric(
        output,
        "carshare_reminder_failures_total",
        "Reminder deliveries that failed",
        MetricType::Counter,
        site,
        summary.reminder_failures,
    );
}
