use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;

use crate::collect::{Collector, ParsedFeed};
use crate::config::Config;
use crate::error::Result;
use crate::models::{Enclosure, FeedConfig, Guid, ItemCategory, ItemSource, NewFeed, NewItem};

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;
        Ok(parsed_feed(feed))
    }
}

#[async_trait]
impl Collector for FeedFetcher {
    async fn collect(&self, config: &FeedConfig) -> Result<ParsedFeed> {
        self.fetch_feed(&config.url).await
    }
}

pub(crate) fn parsed_feed(feed: Feed) -> ParsedFeed {
    let metadata = NewFeed {
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|d| d.content),
        link: feed.links.first().map(|l| l.href.clone()),
        language: feed.language,
        updated_at: feed.updated,
    };
    let items = feed.entries.into_iter().map(new_item).collect();

    ParsedFeed { metadata, items }
}

fn new_item(entry: Entry) -> NewItem {
    // Try the summary first, then fall back to full content
    let description = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));

    let enclosure = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|content| {
            content.url.as_ref().map(|url| Enclosure {
                url: url.to_string(),
                length: content.size,
                mime_type: content.content_type.as_ref().map(|m| m.to_string()),
            })
        });

    let link = entry.links.first().map(|l| l.href.clone());

    NewItem {
        guid: Some(Guid {
            value: entry.id.clone(),
            is_permalink: link.as_deref() == Some(entry.id.as_str()),
        }),
        item_id: entry.id,
        title: entry.title.map(|t| t.content),
        description,
        link,
        author: entry.authors.first().map(|a| a.name.clone()),
        categories: entry
            .categories
            .into_iter()
            .map(|c| ItemCategory {
                name: c.label.unwrap_or(c.term),
                domain: c.scheme,
            })
            .collect(),
        comments: None,
        pub_date: entry.published.or(entry.updated),
        enclosure,
        source: entry.source.map(|url| ItemSource { url, title: None }),
    }
}
