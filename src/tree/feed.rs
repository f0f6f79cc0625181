//! Web feeds and remote streams

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::node::ChildSpec;
use crate::context::LibraryContext;
use crate::media::MediaKind;

/// A web feed shown as a folder of its items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub kind: MediaKind,
    pub thumbnail: Option<String>,
}

/// A remote resource shown as a leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLeaf {
    pub name: String,
    pub url: String,
    pub kind: MediaKind,
    pub thumbnail: Option<String>,
}

/// Rewrite a YouTube channel page URL to the channel's feed
pub fn youtube_feed_url(uri: &str) -> String {
    const CHANNEL: &str = "youtube.com/channel/";
    match uri.find(CHANNEL) {
        Some(pos) => {
            let id = uri[pos + CHANNEL.len()..]
                .split(['/', '?'])
                .next()
                .unwrap_or_default();
            format!(
                "{}youtube.com/feeds/videos.xml?channel_id={}",
                &uri[..pos],
                id
            )
        }
        None => uri.to_string(),
    }
}

/// Fetch and parse a feed into stream candidates
pub(crate) async fn stage_feed(ctx: &LibraryContext, feed: &FeedSource) -> Vec<ChildSpec> {
    if !ctx.config.external_network {
        debug!("External network disabled, not fetching {}", feed.url);
        return Vec::new();
    }

    match fetch(ctx, &feed.url).await {
        Ok(xml) => parse_feed(&xml, feed.kind)
            .into_iter()
            .map(ChildSpec::Stream)
            .collect(),
        Err(e) => {
            warn!("Failed to load feed {}: {:#}", feed.url, e);
            Vec::new()
        }
    }
}

async fn fetch(ctx: &LibraryContext, url: &str) -> Result<String> {
    let response = ctx
        .http
        .get(url)
        .send()
        .await
        .context("Request failed")?
        .error_for_status()
        .context("Server returned an error")?;
    response.text().await.context("Failed to read body")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseStatus {
    None,
    InItem,
    InTitle,
    InLink,
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: String,
    enclosure: Option<String>,
    content: Option<String>,
    link: Option<String>,
    thumbnail: Option<String>,
}

impl ItemBuilder {
    fn build(self, kind: MediaKind) -> Option<StreamLeaf> {
        let url = self.enclosure.or(self.content).or(self.link)?;
        let title = self.title.trim();
        Some(StreamLeaf {
            name: if title.is_empty() {
                url.clone()
            } else {
                title.to_string()
            },
            url,
            kind,
            thumbnail: self.thumbnail,
        })
    }
}

/// Parse RSS or Atom items
///
/// The item URL is the enclosure, then `media:content`, then the link.
/// Items without any URL are dropped.
pub fn parse_feed(xml: &str, kind: MediaKind) -> Vec<StreamLeaf> {
    use quick_xml::{Reader, events::Event};

    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::with_capacity(256);
    let mut status = ParseStatus::None;
    let mut item = ItemBuilder::default();
    let mut items = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name();
                let attr = |key: &[u8]| {
                    e.attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == key)
                        .map(|a| String::from_utf8_lossy(&a.value).to_string())
                };

                match name.as_ref() {
                    b"item" | b"entry" => {
                        status = ParseStatus::InItem;
                        item = ItemBuilder::default();
                    }
                    b"title" if status == ParseStatus::InItem => status = ParseStatus::InTitle,
                    b"link" if status == ParseStatus::InItem => match attr(b"href") {
                        // Atom links carry the target in an attribute
                        Some(href) => match attr(b"rel").as_deref() {
                            Some("enclosure") => item.enclosure = Some(href),
                            None | Some("alternate") => {
                                item.link.get_or_insert(href);
                            }
                            _ => {}
                        },
                        None => status = ParseStatus::InLink,
                    },
                    b"enclosure" if status == ParseStatus::InItem => {
                        if let Some(url) = attr(b"url") {
                            item.enclosure.get_or_insert(url);
                        }
                    }
                    b"media:content" if status == ParseStatus::InItem => {
                        if let Some(url) = attr(b"url") {
                            item.content.get_or_insert(url);
                        }
                    }
                    b"media:thumbnail" if status == ParseStatus::InItem => {
                        if let Some(url) = attr(b"url") {
                            item.thumbnail.get_or_insert(url);
                        }
                    }
                    b"itunes:image" if status == ParseStatus::InItem => {
                        if let Some(href) = attr(b"href") {
                            item.thumbnail.get_or_insert(href);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if let Ok(txt) = e.unescape() {
                    match status {
                        ParseStatus::InTitle => item.title.push_str(&txt),
                        ParseStatus::InLink => {
                            let link = txt.trim();
                            if !link.is_empty() {
                                item.link.get_or_insert(link.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if status == ParseStatus::InTitle {
                    item.title.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    if status != ParseStatus::None {
                        items.extend(std::mem::take(&mut item).build(kind));
                    }
                    status = ParseStatus::None;
                }
                b"title" if status == ParseStatus::InTitle => status = ParseStatus::InItem,
                b"link" if status == ParseStatus::InLink => status = ParseStatus::InItem,
                _ => {}
            },
            Err(e) => {
                warn!(
                    "Feed parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    items
}
