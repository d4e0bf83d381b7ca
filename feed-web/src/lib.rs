pub mod page;
pub mod render;
pub mod routes;

pub use page::{compose, FeedSection, Page, APP_TITLE};
pub use routes::{create_router, AppState};
