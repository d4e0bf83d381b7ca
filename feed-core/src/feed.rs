use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// One configured feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FeedDescriptor {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: Option<String>,
    pub id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: Option<String>,
    pub entries: Vec<FeedEntry>,
}

impl FeedEntry {
    pub fn from_rss_item(item: &rss::Item) -> Self {
        let published_at = item
            .pub_date()
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|dt| dt.with_timezone(&Utc));

        // Dublin Core creator wins over the plain author field
        let author = item
            .dublin_core_ext()
            .and_then(|dc| dc.creators().first().map(|s| s.to_string()))
            .or_else(|| item.author().map(|s| s.to_string()));

        Self {
            title: item.title().unwrap_or_default().to_owned(),
            link: item.link().map(ToOwned::to_owned),
            id: item.guid().map(|guid| guid.value().to_owned()),
            published_at,
            summary: item.description().map(ToOwned::to_owned),
            author,
        }
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Self {
        let published_at = entry
            .published()
            .unwrap_or_else(|| entry.updated())
            .with_timezone(&Utc);

        let link = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .or_else(|| entry.links().first())
            .map(|link| link.href().to_owned());

        let summary = entry
            .summary()
            .map(|text| text.value.clone())
            .or_else(|| entry.content().and_then(|c| c.value()).map(ToOwned::to_owned));

        Self {
            title: entry.title().value.clone(),
            link,
            id: Some(entry.id().to_owned()).filter(|id| !id.is_empty()),
            published_at: Some(published_at),
            summary,
            author: entry.authors().first().map(|p| p.name().to_owned()),
        }
    }
}

/// Parses raw feed bytes, trying RSS 2.0 first and Atom second.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let rss_err = match rss::Channel::read_from(bytes) {
        Ok(channel) => {
            return Ok(ParsedFeed {
                title: channel.title().to_owned(),
                link: Some(channel.link().to_owned()).filter(|l| !l.is_empty()),
                entries: channel.items().iter().map(FeedEntry::from_rss_item).collect(),
            })
        }
        Err(err) => err,
    };

    match atom_syndication::Feed::read_from(bytes) {
        Ok(feed) => Ok(ParsedFeed {
            title: feed.title().value.clone(),
            link: feed.links().first().map(|link| link.href().to_owned()),
            entries: feed.entries().iter().map(FeedEntry::from_atom_entry).collect(),
        }),
        Err(atom_err) => Err(ParseError(format!("rss: {rss_err}; atom: {atom_err}"))),
    }
}
