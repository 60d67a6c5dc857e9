//! 指标读路径
//!
//! 管理端按应用分页查询历史推送；响应头带进程本地的滚动计数。

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::Encoder;
use serde::Deserialize;
use tracing::{error, info};

use crate::domain::repository::{InstallationRepository, MetricsStore, SortOrder};
use crate::error::Result;
use crate::infrastructure::cache::{MetricsCache, KIND_APP_OPENED, KIND_RECEIVERS};
use crate::metrics::PushServerMetrics;

const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn MetricsStore>,
    pub installations: Arc<dyn InstallationRepository>,
    pub cache: Arc<MetricsCache>,
    pub metrics: Arc<PushServerMetrics>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(process_metrics))
        .route(
            "/rest/metrics/messages/application/:id",
            get(push_message_information_per_application),
        )
        .with_state(state)
}

pub async fn serve(addr: &str, state: HttpState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| crate::error::PushServerError::Config(err.to_string()))?;
    info!(addr, "http interface listening");
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| crate::error::PushServerError::Config(err.to_string()))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn process_metrics(State(state): State<HttpState>) -> Response {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&state.metrics.registry().gather(), &mut buffer) {
        error!(error = %err, "failed to encode process metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    String::from_utf8(buffer).unwrap_or_default().into_response()
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<usize>,
    per_page: Option<usize>,
    sort: Option<String>,
    search: Option<String>,
}

async fn push_message_information_per_application(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    match state.installations.find_application(&id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Could not find requested information")
                .into_response()
        }
        Err(err) => {
            error!(error = %err, app_id = %id, "application lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let page = params.page.unwrap_or(0);
    let sorting = SortOrder::from_query_param(params.sort.as_deref());

    let (items, total) = match state.store.find_all_for_application(
        &id,
        params.search.as_deref(),
        sorting,
        page,
        per_page,
    ) {
        Ok(found) => found,
        Err(err) => {
            error!(error = %err, app_id = %id, "metrics lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = Json(items).into_response();
    let headers = response.headers_mut();
    insert_counter_header(headers, "total", total as i64);
    insert_counter_header(headers, "receivers", state.cache.get(&id, KIND_RECEIVERS));
    insert_counter_header(
        headers,
        "appOpenedCounter",
        state.cache.get(&id, KIND_APP_OPENED),
    );
    response
}

fn insert_counter_header(headers: &mut axum::http::HeaderMap, name: &str, value: i64) {
    let name = match axum::http::HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => name,
        Err(_) => return,
    };
    if let Ok(header_value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, header_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{PushApplication, PushMessageInformation};
    use crate::infrastructure::persistence::{InMemoryInstallationStore, InMemoryMetricsStore};
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn state_with_app() -> HttpState {
        let installations = InMemoryInstallationStore::new();
        installations.add_application(PushApplication {
            id: "app-1".to_string(),
            name: "Demo".to_string(),
            variants: Vec::new(),
        });

        let store = InMemoryMetricsStore::new();
        for index in 0..3 {
            let mut info = PushMessageInformation::new(
                format!("job-{}", index),
                "app-1",
                format!("{{\"alert\":\"hello {}\"}}", index),
                1,
            );
            info.submit_date = chrono::Utc::now() + chrono::Duration::seconds(index);
            store.create_push_message_information(&info).unwrap();
        }

        let cache = MetricsCache::new();
        cache.increment_total("app-1");
        cache.add_receivers("app-1", 12);

        HttpState {
            store: Arc::new(store),
            installations: Arc::new(installations),
            cache: Arc::new(cache),
            metrics: Arc::new(PushServerMetrics::new()),
        }
    }

    async fn get(state: HttpState, uri: &str) -> Response {
        build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_application_returns_404() {
        let response = get(
            state_with_app(),
            "/rest/metrics/messages/application/missing",
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_lists_push_messages_with_counter_headers() {
        let response = get(state_with_app(), "/rest/metrics/messages/application/app-1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("total").unwrap(), "3");
        assert_eq!(response.headers().get("receivers").unwrap(), "12");
        assert_eq!(response.headers().get("appOpenedCounter").unwrap(), "0");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let items: Vec<PushMessageInformation> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "job-0");
    }

    #[tokio::test]
    async fn test_paging_sorting_and_search() {
        let response = get(
            state_with_app(),
            "/rest/metrics/messages/application/app-1?per_page=2&sort=desc",
        )
        .await;
        assert_eq!(response.headers().get("total").unwrap(), "3");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let items: Vec<PushMessageInformation> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "job-2");

        let response = get(
            state_with_app(),
            "/rest/metrics/messages/application/app-1?search=hello%201",
        )
        .await;
        assert_eq!(response.headers().get("total").unwrap(), "1");

        // 非法排序值回退为升序
        let response = get(
            state_with_app(),
            "/rest/metrics/messages/application/app-1?sort=bogus&per_page=1",
        )
        .await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let items: Vec<PushMessageInformation> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items[0].id, "job-0");
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = get(state_with_app(), "/healthz").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
