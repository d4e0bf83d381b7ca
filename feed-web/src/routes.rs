use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::{Html, Redirect};
use axum::routing::get;
use axum::Router;
use feed_core::{FeedCacheManager, FeedDescriptor};

use crate::page::compose;
use crate::render::remove_trailing_slash;

const FORWARDED_URI_HEADER: &str = "x-forwarded-request-uri";

pub struct AppState {
    pub manager: FeedCacheManager,
    pub feeds: Vec<FeedDescriptor>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/robots.txt", get(robots))
        .fallback(redirect_home)
        .with_state(state)
}

async fn index(State(state): State<Arc<AppState>>, headers: HeaderMap, uri: Uri) -> Html<String> {
    let request_uri = headers
        .get(FORWARDED_URI_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| {
            uri.path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| uri.path().to_owned())
        });
    let path = remove_trailing_slash(&request_uri);

    let page = compose(&state.manager, &state.feeds, path).await;
    Html(page.render())
}

async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /"
}

async fn redirect_home() -> Redirect {
    Redirect::to("/")
}
