//! Mediathek show page scanner.
//!
//! The show page is server-side rendered: the listing of recent episodes and
//! each episode's guest block are plain HTML, so a GET plus a handful of
//! regexes is enough. Any element the scanner cannot find means the markup has
//! changed, which is reported as `AppError::ElementMissing` and ends the run.
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, Result},
    models::{BroadcastDate, EpisodeRecord, EpisodeStore},
};

pub struct ScanOptions<'a> {
    pub show_url: &'a str,
    pub max_episodes: usize,
    pub proxy: Option<&'a str>,
    pub timeout: Duration,
}

/// One teaser tile of the listing, before its detail page has been visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingTile {
    pub date_text: String,
    pub synopsis: String,
    pub detail_url: String,
}

/// Scan the show page and every listed episode page into an `EpisodeStore`.
pub async fn scan(opts: ScanOptions<'_>) -> Result<EpisodeStore> {
    let client = crate::http::client(opts.proxy, opts.timeout)?;
    let page_url = Url::parse(opts.show_url)
        .with_context(|| format!("invalid show URL {:?}", opts.show_url))?;

    info!("Retrieving episode information from {page_url}");
    let html = fetch_page(&client, page_url.as_str()).await?;
    let tiles = parse_listing(&html, &page_url)?;
    debug!("Listing has {} tile(s)", tiles.len());

    let mut store = EpisodeStore::new();
    for (i, tile) in tiles.into_iter().take(opts.max_episodes).enumerate() {
        let date = BroadcastDate::from_display_text(&tile.date_text)
            .ok_or(AppError::ElementMissing("broadcast date"))?;

        let detail = fetch_page(&client, &tile.detail_url).await?;
        // The leading newline keeps the first guest on its own line, matching
        // how the listing prints the block.
        let guest_text = format!("\n{}", parse_guest_text(&detail)?);

        let record = EpisodeRecord::new(date, i + 1, tile.synopsis, guest_text);
        debug!(
            "Episode {} from {date}: {} guest(s)",
            record.episode_index,
            record.guest_names.len()
        );
        if !store.insert(record) {
            warn!("Skipping tile {}: {date} is already listed", i + 1);
        }
    }

    info!("Found {} episode(s)", store.len());
    Ok(store)
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request {url}"))?;
    if !resp.status().is_success() {
        return Err(anyhow::anyhow!("{url} returned HTTP {}", resp.status()).into());
    }
    let html = resp
        .text()
        .await
        .with_context(|| format!("read body of {url}"))?;
    debug!("{url}: {} chars", html.len());
    Ok(html)
}

// ── Markup parsing ────────────────────────────────────────────────────────────

static RE_LISTING: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r#"class="[^"]*\btile-box-wrap\b[^"]*\bshowmore-wrapper\b[^"]*""#).unwrap()
});
static RE_TILE: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r#"<[a-z]+\b[^>]*class="[^"]*\bb-cluster-teaser\b[^"]*\bb-vertical-teaser\b[^"]*""#)
        .unwrap()
});
static RE_DATE: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r#"(?s)class="[^"]*\bteaser-extended-info\b[^"]*"[^>]*>(.*?)</(?:dd|dt|p|div|span)>"#)
        .unwrap()
});
static RE_SYNOPSIS: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r#"(?s)class="[^"]*\bteaser-extended-text\b[^"]*"[^>]*>(.*?)</(?:p|div)>"#).unwrap()
});
static RE_PLAY_LINK: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r#"<a\b[^>]*class="[^"]*\bteaser-play-btn\b[^"]*"[^>]*>"#).unwrap()
});
static RE_HREF: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r#"\bhref="([^"]+)""#).unwrap());
static RE_POST_CONTENT: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r#"class="[^"]*\bb-post-content\b[^"]*""#).unwrap()
});
static RE_ELEMENT_TAG: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*?(/?)>").unwrap()
});

/// Inner HTML of the element whose opening tag contains byte offset `at`.
/// Nested elements with the same tag name are balanced, so the cut ends at the
/// element's own closing tag. An unclosed element runs to the end of `html`.
fn element_inner(html: &str, at: usize) -> Option<&str> {
    let open_start = html[..at].rfind('<')?;
    let open_tag = RE_ELEMENT_TAG.captures(&html[open_start..])?;
    let whole = open_tag.get(0)?;
    if whole.start() != 0 {
        return None;
    }
    let name = &open_tag[2];
    let body_start = open_start + whole.end();
    let body = &html[body_start..];

    let mut depth = 1usize;
    for tag in RE_ELEMENT_TAG.captures_iter(body) {
        if !tag[2].eq_ignore_ascii_case(name) || !tag[3].is_empty() {
            continue;
        }
        if tag[1].is_empty() {
            depth += 1;
            continue;
        }
        depth -= 1;
        if depth == 0 {
            return Some(&body[..tag.get(0)?.start()]);
        }
    }
    Some(body)
}

/// Split the listing container into tiles and pull date, synopsis and detail
/// link out of each.
pub fn parse_listing(html: &str, page_url: &Url) -> Result<Vec<ListingTile>> {
    let listing = RE_LISTING
        .find(html)
        .and_then(|m| element_inner(html, m.start()))
        .ok_or(AppError::ElementMissing("episode listing"))?;

    let starts: Vec<usize> = RE_TILE.find_iter(listing).map(|m| m.start()).collect();
    let mut tiles = Vec::with_capacity(starts.len());

    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(listing.len());
        tiles.push(parse_tile(&listing[start..end], page_url)?);
    }

    Ok(tiles)
}

fn parse_tile(tile: &str, page_url: &Url) -> Result<ListingTile> {
    let date_text = RE_DATE
        .captures(tile)
        .map(|c| single_line(&html_to_text(&c[1])))
        .ok_or(AppError::ElementMissing("teaser date"))?;

    let synopsis = RE_SYNOPSIS
        .captures(tile)
        .map(|c| single_line(&html_to_text(&c[1])))
        .ok_or(AppError::ElementMissing("teaser text"))?;

    let link_tag = RE_PLAY_LINK
        .find(tile)
        .ok_or(AppError::ElementMissing("play button"))?
        .as_str();
    let href = RE_HREF
        .captures(link_tag)
        .map(|c| decode_entities(&c[1]))
        .ok_or(AppError::ElementMissing("play button link"))?;
    let detail_url = page_url
        .join(&href)
        .with_context(|| format!("invalid episode link {href:?}"))?
        .to_string();

    Ok(ListingTile {
        date_text,
        synopsis,
        detail_url,
    })
}

/// Text of the guest block on an episode page, one entry per line.
pub fn parse_guest_text(html: &str) -> Result<String> {
    RE_POST_CONTENT
        .find(html)
        .and_then(|m| element_inner(html, m.start()))
        .map(html_to_text)
        .ok_or(AppError::ElementMissing("guest description"))
}

/// Render an HTML fragment as text, keeping block and `<br>` boundaries as line
/// breaks.
fn html_to_text(fragment: &str) -> String {
    static RE_BREAK: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|li|div|h[1-6])>").unwrap()
    });
    static RE_TAG: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

    let with_breaks = RE_BREAK.replace_all(fragment, "\n");
    let plain = RE_TAG.replace_all(&with_breaks, "");
    decode_entities(&plain)
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    static RE_NUMERIC: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").unwrap());

    let numeric = RE_NUMERIC.replace_all(s, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    numeric
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
<html><body>
<header class="b-header">Markus Lanz</header>
<div class="tile-box-wrap showmore-wrapper">
  <article class="b-cluster-teaser b-vertical-teaser">
    <button class="teaser-open-btn">mehr</button>
    <dl><dd class="teaser-extended-info"> 14.03.2024 </dd></dl>
    <p class="teaser-extended-text">Zu Gast: Politik &amp;
       Gesellschaft</p>
    <a class="teaser-play-btn button" href="/gesellschaft/markus-lanz/markus-lanz-vom-14-maerz-2024-100.html">Abspielen</a>
  </article>
  <article class="b-cluster-teaser b-vertical-teaser">
    <dl><dd class="teaser-extended-info"><span>13.03.2024</span></dd></dl>
    <p class="teaser-extended-text">Die Runde diskutiert.</p>
    <a href="https://www.zdf.de/gesellschaft/markus-lanz/lanz-13.html" class="teaser-play-btn button">Abspielen</a>
  </article>
</div>
</body></html>"#;

    fn page_url() -> Url {
        Url::parse("https://www.zdf.de/gesellschaft/markus-lanz").unwrap()
    }

    #[test]
    fn listing_tiles_are_extracted_in_order() {
        let tiles = parse_listing(LISTING, &page_url()).unwrap();
        assert_eq!(
            tiles,
            vec![
                ListingTile {
                    date_text: "14.03.2024".into(),
                    synopsis: "Zu Gast: Politik & Gesellschaft".into(),
                    detail_url:
                        "https://www.zdf.de/gesellschaft/markus-lanz/markus-lanz-vom-14-maerz-2024-100.html"
                            .into(),
                },
                ListingTile {
                    date_text: "13.03.2024".into(),
                    synopsis: "Die Runde diskutiert.".into(),
                    detail_url: "https://www.zdf.de/gesellschaft/markus-lanz/lanz-13.html".into(),
                },
            ]
        );
    }

    #[test]
    fn missing_listing_is_an_environment_failure() {
        let err = parse_listing("<html><body>Wartung</body></html>", &page_url()).unwrap_err();
        assert!(err.is_environment_failure());
    }

    #[test]
    fn tile_without_play_button_is_an_environment_failure() {
        let html = r#"<div class="tile-box-wrap showmore-wrapper">
            <article class="b-cluster-teaser b-vertical-teaser">
              <dd class="teaser-extended-info">14.03.2024</dd>
              <p class="teaser-extended-text">x</p>
            </article></div>"#;
        let err = parse_listing(html, &page_url()).unwrap_err();
        assert!(matches!(err, AppError::ElementMissing("play button")));
    }

    #[test]
    fn guest_block_keeps_one_guest_per_line() {
        let html = r#"<main><div class="b-post-content">
            <p>Jane Doe, Journalistin</p><p>Max Mustermann,&nbsp;Ökonom<br/>Erika M&#252;ller, Virologin</p>
        </div></main>"#;
        let text = parse_guest_text(html).unwrap();
        assert_eq!(
            text,
            "Jane Doe, Journalistin\nMax Mustermann, Ökonom\nErika Müller, Virologin"
        );
        let names = crate::models::extract_guest_names(&format!("\n{text}"));
        assert_eq!(names, vec!["Jane Doe", "Max Mustermann", "Erika Müller"]);
    }

    #[test]
    fn guest_entries_wrapped_in_divs_are_all_kept() {
        let html = r#"<div class="b-post-content"><div class="guest"><p>Jane Doe, Autorin</p></div><div class="guest"><p>Max Muster, Koch</p></div></div><div class="b-footer"><p>Impressum, ZDF</p></div>"#;
        let text = parse_guest_text(html).unwrap();
        assert!(!text.contains("Impressum"), "{text:?}");
        let names = crate::models::extract_guest_names(&format!("\n{text}"));
        assert_eq!(names, vec!["Jane Doe", "Max Muster"]);
    }

    #[test]
    fn teasers_after_the_listing_are_not_episodes() {
        let html = r#"<div class="tile-box-wrap showmore-wrapper">
              <div class="row"><article class="b-cluster-teaser b-vertical-teaser">
                <dd class="teaser-extended-info">14.03.2024</dd>
                <p class="teaser-extended-text">Lanz</p>
                <a class="teaser-play-btn button" href="/ep/1">x</a>
              </article></div>
            </div>
            <section class="related">
              <article class="b-cluster-teaser b-vertical-teaser">
                <dd class="teaser-extended-info">13.03.2024</dd>
                <p class="teaser-extended-text">Andere Sendung</p>
                <a class="teaser-play-btn button" href="/other/1">x</a>
              </article>
            </section>"#;
        let tiles = parse_listing(html, &page_url()).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].synopsis, "Lanz");
    }

    #[test]
    fn element_cut_balances_nested_tags() {
        let html = r#"<p>a</p><div class="x"><div>1</div><br/><div>2</div></div><div>3</div>"#;
        let at = html.find("class").unwrap();
        assert_eq!(
            element_inner(html, at),
            Some("<div>1</div><br/><div>2</div>")
        );
        let unclosed = r#"<div class="x"><p>open"#;
        assert_eq!(element_inner(unclosed, 5), Some("<p>open"));
    }

    #[test]
    fn missing_guest_block_is_an_environment_failure() {
        assert!(parse_guest_text("<p>nothing</p>").unwrap_err().is_environment_failure());
    }

    #[tokio::test]
    async fn scan_follows_detail_links() {
        use axum::{Router, response::Html, routing::get};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let listing = format!(
            r#"<div class="tile-box-wrap showmore-wrapper">
              <article class="b-cluster-teaser b-vertical-teaser">
                <dd class="teaser-extended-info">14.03.2024</dd>
                <p class="teaser-extended-text">Erste</p>
                <a class="teaser-play-btn button" href="/ep/1">x</a>
              </article>
              <article class="b-cluster-teaser b-vertical-teaser">
                <dd class="teaser-extended-info">14.03.2024</dd>
                <p class="teaser-extended-text">Wiederholung</p>
                <a class="teaser-play-btn button" href="http://{addr}/ep/2">x</a>
              </article>
              <article class="b-cluster-teaser b-vertical-teaser">
                <dd class="teaser-extended-info">12.03.2024</dd>
                <p class="teaser-extended-text">Dritte</p>
                <a class="teaser-play-btn button" href="/ep/3">x</a>
              </article>
            </div>"#
        );
        let guests = r#"<div class="b-post-content"><p>Jane Doe, Autorin</p></div>"#;
        let app = Router::new()
            .route("/show/markus-lanz", get(move || async move { Html(listing) }))
            .route("/ep/{n}", get(move || async move { Html(guests) }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let show_url = format!("http://{addr}/show/markus-lanz");
        let store = scan(ScanOptions {
            show_url: &show_url,
            max_episodes: 9,
            proxy: None,
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();

        let records: Vec<_> = store.iter().collect();
        assert_eq!(records.len(), 2, "duplicate date is dropped");
        assert_eq!(records[0].episode_index, 1);
        assert_eq!(records[0].synopsis, "Erste");
        assert_eq!(records[0].guest_text, "\nJane Doe, Autorin");
        assert_eq!(records[0].guest_names, vec!["Jane Doe"]);
        assert_eq!(records[1].episode_index, 3);
        assert_eq!(records[1].broadcast_date.to_string(), "12.03.2024");
    }
}
