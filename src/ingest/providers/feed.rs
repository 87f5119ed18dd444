// src/ingest/providers/feed.rs
//! RSS 2.0 / RSS 1.0 (RDF) / Atom feed parser.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;

use crate::ingest::types::{DocumentParser, RawEntry};

/// Element text, ignoring attributes such as Atom's `type="html"`.
#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    text: String,
}

fn text_of(n: Option<TextNode>) -> Option<String> {
    n.map(|t| t.text).filter(|t| !t.trim().is_empty())
}

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<TextNode>,
    link: Option<TextNode>,
    guid: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    /// `dc:date`; quick-xml matches on the local name.
    #[serde(rename = "date")]
    dc_date: Option<String>,
    description: Option<TextNode>,
}

impl RssItem {
    fn into_entry(self) -> RawEntry {
        let link = text_of(self.link).or_else(|| text_of(self.guid).filter(|g| g.contains("://")));
        RawEntry {
            title: text_of(self.title),
            summary: text_of(self.description),
            link,
            published: self.pub_date.or(self.dc_date),
        }
    }
}

// --- RSS 1.0 ---

/// `rdf:RDF` root; items are siblings of `channel`.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

// --- Atom ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    /// `rel="alternate"` (or no rel) wins over other link relations.
    fn best_link(&self) -> Option<String> {
        self.link
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.link.first())
            .and_then(|l| l.href.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rss,
    Rdf,
    Atom,
}

static RE_ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(rss|feed|rdf:RDF)[\s>]").expect("feed root regex"));

fn detect(xml: &str) -> Option<Dialect> {
    RE_ROOT.captures(xml).map(|c| match &c[1] {
        "feed" => Dialect::Atom,
        "rdf:RDF" => Dialect::Rdf,
        _ => Dialect::Rss,
    })
}

/// Parser for `type = "feed"` sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedParser;

impl FeedParser {
    fn parse_rss(xml: &str) -> Result<Vec<RawEntry>> {
        let rss: Rss = from_str(xml).context("parsing rss xml")?;
        Ok(rss.channel.item.into_iter().map(RssItem::into_entry).collect())
    }

    fn parse_rdf(xml: &str) -> Result<Vec<RawEntry>> {
        let rdf: Rdf = from_str(xml).context("parsing rss 1.0 xml")?;
        Ok(rdf.item.into_iter().map(RssItem::into_entry).collect())
    }

    fn parse_atom(xml: &str) -> Result<Vec<RawEntry>> {
        let feed: AtomFeed = from_str(xml).context("parsing atom xml")?;
        Ok(feed
            .entry
            .into_iter()
            .map(|e| {
                let link = e.best_link();
                RawEntry {
                    title: text_of(e.title),
                    summary: text_of(e.summary).or_else(|| text_of(e.content)),
                    link,
                    published: e.published.or(e.updated),
                }
            })
            .collect())
    }
}

impl DocumentParser for FeedParser {
    fn parse(&self, body: &str) -> Result<Vec<RawEntry>> {
        let xml = scrub_html_entities_for_xml(body);
        match detect(&xml) {
            Some(Dialect::Atom) => Self::parse_atom(&xml),
            Some(Dialect::Rss) => Self::parse_rss(&xml),
            Some(Dialect::Rdf) => Self::parse_rdf(&xml),
            None => anyhow::bail!("not an rss or atom document"),
        }
    }

    fn name(&self) -> &'static str {
        "feed"
    }
}

/// HTML named entities are not valid XML; map the common ones before parsing.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&laquo;", "\"")
        .replace("&raquo;", "\"")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
