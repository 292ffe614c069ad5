mod server;

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::Span;

use crate::domain::{ErrorKind, OrderError};
use crate::metrics::Metrics;
use crate::read::OrderQueryService;

pub use server::{ApiServer, ServerStopError};

/// Shared by every worker of the API server.
pub struct AppState {
    pub queries: Arc<OrderQueryService>,
    pub metrics: Arc<Metrics>,
    pub span: Span,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("order_uid is required")]
    MissingOrderUid,
    #[error("order not found")]
    NotFound,
    #[error("internal server error")]
    Internal,
}

impl From<OrderError> for ApiError {
    fn from(error: OrderError) -> Self {
        match error.kind() {
            ErrorKind::Validation => ApiError::MissingOrderUid,
            ErrorKind::NotFound => ApiError::NotFound,
            ErrorKind::TransientInfra => ApiError::Internal,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingOrderUid => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// Read endpoints, mounted both at the root and under `/api/v1`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api/v1").configure(routes))
        .configure(routes);
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/order/{order_uid}", web::get().to(get_order))
        .route("/order/", web::get().to(missing_order_uid))
        .route("/order", web::get().to(missing_order_uid))
        .route("/health", web::get().to(health))
        .route("/cache/stats", web::get().to(cache_stats))
        .route("/metrics", web::get().to(metrics));
}

async fn get_order(
    state: web::Data<AppState>,
    order_uid: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let order_uid = order_uid.into_inner();
    match state.queries.get_order(&order_uid).await {
        Ok(order) => Ok(HttpResponse::Ok().json(&*order)),
        Err(e) => {
            tracing::debug!(parent: &state.span, order_uid = %order_uid, error = %e, "Order lookup failed");
            Err(e.into())
        }
    }
}

async fn missing_order_uid() -> Result<HttpResponse, ApiError> {
    Err(ApiError::MissingOrderUid)
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "cache_size": state.queries.cache_size(),
    }))
}

async fn cache_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "cache_size": state.queries.cache_size() }))
}

async fn metrics(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    match state.metrics.render(state.queries.cache_size()) {
        Ok(buffer) => Ok(HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer)),
        Err(e) => {
            tracing::error!(parent: &state.span, error = %e, "Failed to encode metrics");
            Err(ApiError::Internal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::Value;

    use crate::cache::{MemoryCache, OrderCache};
    use crate::ingest::{OrderHandler, OrderIngestor};
    use crate::models::Order;
    use crate::store::testing::{sample_order, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        metrics: Arc<Metrics>,
    }

    impl Fixture {
        fn new(store: MemoryStore) -> Self {
            Self {
                store: Arc::new(store),
                cache: Arc::new(MemoryCache::new(Span::none())),
                metrics: Arc::new(Metrics::new().unwrap()),
            }
        }

        fn state(&self) -> web::Data<AppState> {
            let queries = OrderQueryService::new(
                self.cache.clone(),
                self.store.clone(),
                self.metrics.clone(),
                Span::none(),
            );
            web::Data::new(AppState {
                queries: Arc::new(queries),
                metrics: self.metrics.clone(),
                span: Span::none(),
            })
        }
    }

    async fn get(fixture: &Fixture, uri: &str) -> (StatusCode, Vec<u8>) {
        let app = test::init_service(App::new().app_data(fixture.state()).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        let status = resp.status();
        (status, test::read_body(resp).await.to_vec())
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[actix_web::test]
    async fn test_ingested_order_is_served_unchanged() {
        let fixture = Fixture::new(MemoryStore::default());
        let order = sample_order("b563feb7b2b84b6test");
        OrderIngestor::new(
            fixture.store.clone(),
            fixture.cache.clone(),
            fixture.metrics.clone(),
            Span::none(),
        )
        .handle(order.clone())
        .await
        .unwrap();

        let (status, body) = get(&fixture, "/order/b563feb7b2b84b6test").await;

        assert_eq!(status, StatusCode::OK);
        let served: Order = serde_json::from_slice(&body).unwrap();
        assert_eq!(served, order);
        assert_eq!(fixture.store.get_calls(), 0);
    }

    #[actix_web::test]
    async fn test_empty_order_uid_is_bad_request() {
        let fixture = Fixture::new(MemoryStore::default());

        for uri in ["/order/", "/order", "/api/v1/order/"] {
            let (status, body) = get(&fixture, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json_body(&body)["error"], "order_uid is required");
        }
    }

    #[actix_web::test]
    async fn test_unknown_order_is_not_found() {
        let fixture = Fixture::new(MemoryStore::default());

        let (status, body) = get(&fixture, "/order/does-not-exist").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_body(&body)["error"], "order not found");
    }

    #[actix_web::test]
    async fn test_store_failure_is_internal_error() {
        let fixture = Fixture::new(MemoryStore::failing());

        let (status, body) = get(&fixture, "/order/a").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&body)["error"], "internal server error");
    }

    #[actix_web::test]
    async fn test_health_reports_cache_size() {
        let fixture = Fixture::new(MemoryStore::with_orders([sample_order("a"), sample_order("b")]));
        fixture.cache.load_all(fixture.store.as_ref()).await.unwrap();

        let (status, body) = get(&fixture, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({ "status": "ok", "cache_size": 2 }));

        let (status, body) = get(&fixture, "/cache/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({ "cache_size": 2 }));
    }

    #[actix_web::test]
    async fn test_api_v1_prefix_serves_the_same_order() {
        let fixture = Fixture::new(MemoryStore::with_orders([sample_order("a")]));

        let (status, body) = get(&fixture, "/api/v1/order/a").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["order_uid"], "a");
        assert_eq!(fixture.store.get_calls(), 1);
        assert_eq!(fixture.cache.size(), 1);
    }

    #[actix_web::test]
    async fn test_metrics_exposition_includes_read_path_counters() {
        let fixture = Fixture::new(MemoryStore::with_orders([sample_order("a")]));
        get(&fixture, "/order/a").await;
        get(&fixture, "/order/a").await;

        let (status, body) = get(&fixture, "/metrics").await;
        let text = String::from_utf8(body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("cache_lookups_total{result=\"hit\"} 1"));
        assert!(text.contains("cache_lookups_total{result=\"miss\"} 1"));
        assert!(text.contains("cache_entries 1"));
    }
}
