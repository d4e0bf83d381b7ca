use std::fmt::Write;

use feed_core::{FeedCacheManager, FeedDescriptor, FeedError, ParsedFeed};
use futures_util::future::join_all;
use tracing::warn;

use crate::render::{clean, enumerate, escape, find_url, first_line, timestamp, uppercase};

pub const APP_TITLE: &str = "What's up, Lëtzebuerg?";

/// Entries shown per feed.
const MAX_ENTRIES: usize = 10;

pub struct FeedSection {
    pub feed: FeedDescriptor,
    pub result: Result<ParsedFeed, FeedError>,
}

pub struct Page {
    pub path: String,
    pub sections: Vec<FeedSection>,
}

/// Reads every configured feed through the cache concurrently, in config order.
pub async fn compose(manager: &FeedCacheManager, feeds: &[FeedDescriptor], path: &str) -> Page {
    let reads = feeds.iter().map(|feed| async move {
        let result = manager.get(&feed.url).await;
        if let Err(err) = &result {
            warn!(feed = %feed.id, url = %feed.url, error = %err, "feed unavailable");
        }
        FeedSection {
            feed: feed.clone(),
            result,
        }
    });

    Page {
        path: path.to_owned(),
        sections: join_all(reads).await,
    }
}

impl FeedSection {
    pub fn heading(&self) -> String {
        match &self.feed.title {
            Some(title) => title.clone(),
            None => uppercase(Some(self.feed.id.as_str())),
        }
    }
}

impl Page {
    pub fn render(&self) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html lang=\"lb\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>{title}</title>\n<link rel=\"canonical\" href=\"{path}/\">\n</head>\n<body>\n\
             <h1>{title}</h1>\n<main>\n",
            title = escape(APP_TITLE),
            path = escape(&self.path),
        );
        for section in &self.sections {
            render_section(&mut html, section);
        }
        html.push_str("</main>\n</body>\n</html>\n");
        html
    }
}

fn render_section(html: &mut String, section: &FeedSection) {
    let _ = write!(
        html,
        "<section id=\"{id}\">\n<h2>{heading}</h2>\n",
        id = escape(&section.feed.id),
        heading = escape(&section.heading()),
    );

    match &section.result {
        Ok(feed) => {
            html.push_str("<ul>\n");
            for entry in feed.entries.iter().take(MAX_ENTRIES) {
                let title = first_line(&entry.title).unwrap_or(&entry.title);
                let _ = write!(
                    html,
                    "<li><a href=\"{href}\">{title}</a> <time>{when}</time>",
                    href = escape(find_url(entry)),
                    title = clean(title),
                    when = escape(timestamp(entry.published_at).trim()),
                );
                match entry.summary.as_deref() {
                    // tab-indented show notes keep their line structure
                    Some(summary) if summary.contains("\n\t") => {
                        let _ = write!(html, "<pre>{}</pre>", escape(&enumerate(summary)));
                    }
                    Some(summary) => {
                        let summary = clean(summary);
                        if !summary.is_empty() {
                            let _ = write!(html, "<p>{summary}</p>");
                        }
                    }
                    None => {}
                }
                html.push_str("</li>\n");
            }
            html.push_str("</ul>\n");
        }
        Err(err) => {
            let _ = write!(
                html,
                "<p class=\"unavailable\">Feed unavailable ({kind})</p>\n",
                kind = err.kind(),
            );
        }
    }
    html.push_str("</section>\n");
}
