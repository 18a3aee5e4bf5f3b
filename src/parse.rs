//! Album and single-item page parsing.
//!
//! The HTML work is pure (`parse_page`); `collect_album` wraps it with the
//! fetch loop that walks pagination page-ascending.

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{Html, Selector};

use crate::consts::selectors;
use crate::error::Result;
use crate::network::HttpEngine;
use crate::utils::{is_date_in_range, sanitize_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// A page hosting exactly one media item.
    Single,
    /// A listing page referencing child items.
    Album,
}

/// A child link as it appears in album markup, prior to resolution.
#[derive(Debug, Clone)]
pub struct ItemLink {
    pub url: String,
    pub name: String,
    /// Timestamp text shown next to the item, if any (`HH:MM:SS DD/MM/YYYY`).
    pub shown_date: Option<String>,
}

/// One parsed page, in document order.
#[derive(Debug)]
pub struct ParsedPage {
    pub is_bunkr: bool,
    pub kind: PageKind,
    /// Sanitized display name, `"album"`/`"file"` when the heading is absent.
    pub title: String,
    pub links: Vec<ItemLink>,
    /// `(current, last)` page numbers when the page carries pagination.
    pub pagination: Option<(u32, u32)>,
}

/// Everything known about one incoming link before per-item resolution.
#[derive(Debug)]
pub struct AlbumContext {
    pub name: String,
    pub is_bunkr: bool,
    pub kind: PageKind,
    pub items: Vec<ItemLink>,
}

/// Optional date window applied to album items.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateFilter {
    pub before: Option<NaiveDateTime>,
    pub after: Option<NaiveDateTime>,
}

impl DateFilter {
    fn is_active(&self) -> bool {
        self.before.is_some() || self.after.is_some()
    }
}

struct PageSelectors {
    page_title: Selector,
    single_video: Selector,
    single_gallery: Selector,
    album_item: Selector,
    item_anchor: Selector,
    item_caption: Selector,
    item_clock: Selector,
    heading_wide: Selector,
    heading_truncate: Selector,
    cyberdrop_title: Selector,
    cyberdrop_item: Selector,
    pagination: Selector,
    pagination_active: Selector,
    pagination_link: Selector,
}

fn sel() -> &'static PageSelectors {
    static SEL: OnceLock<PageSelectors> = OnceLock::new();
    SEL.get_or_init(|| {
        let parse = |s: &str| Selector::parse(s).unwrap();
        PageSelectors {
            page_title: parse(selectors::PAGE_TITLE),
            single_video: parse(selectors::SINGLE_VIDEO),
            single_gallery: parse(selectors::SINGLE_GALLERY),
            album_item: parse(selectors::ALBUM_ITEM),
            item_anchor: parse(selectors::ITEM_ANCHOR),
            item_caption: parse(selectors::ITEM_CAPTION),
            item_clock: parse(selectors::ITEM_CLOCK),
            heading_wide: parse(selectors::HEADING_WIDE),
            heading_truncate: parse(selectors::HEADING_TRUNCATE),
            cyberdrop_title: parse(selectors::CYBERDROP_TITLE),
            cyberdrop_item: parse(selectors::CYBERDROP_ITEM),
            pagination: parse(selectors::PAGINATION),
            pagination_active: parse(selectors::PAGINATION_ACTIVE),
            pagination_link: parse(selectors::PAGINATION_LINK),
        }
    })
}

fn element_text(el: scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Join an anchor href against the page it came from.
fn join_url(base: &str, href: &str) -> String {
    match reqwest::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => href.to_string(),
    }
}

/// Classify a fetched page and enumerate its children in document order.
pub fn parse_page(html: &str, page_url: &str) -> ParsedPage {
    let document = Html::parse_document(html);
    let s = sel();

    let is_bunkr = document
        .select(&s.page_title)
        .next()
        .map(|t| element_text(t).contains(selectors::BUNKR_TITLE_MARKER))
        .unwrap_or(false);

    if !is_bunkr {
        // Cyberdrop layout: flat image-anchor list with an #title heading.
        let title = document
            .select(&s.cyberdrop_title)
            .next()
            .map(|h| sanitize_name(&element_text(h)))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "album".to_string());
        let links = document
            .select(&s.cyberdrop_item)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| ItemLink {
                url: format!("https://cyberdrop.me{href}"),
                name: "file".to_string(),
                shown_date: None,
            })
            .collect();
        return ParsedPage {
            is_bunkr,
            kind: PageKind::Album,
            title,
            links,
            pagination: None,
        };
    }

    let is_single = document.select(&s.single_video).next().is_some()
        || document.select(&s.single_gallery).next().is_some();

    let title = document
        .select(&s.heading_wide)
        .next()
        .or_else(|| document.select(&s.heading_truncate).next())
        .map(|h| sanitize_name(&element_text(h)))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| if is_single { "file" } else { "album" }.to_string());

    if is_single {
        return ParsedPage {
            is_bunkr,
            kind: PageKind::Single,
            links: vec![ItemLink {
                url: page_url.to_string(),
                name: title.clone(),
                shown_date: None,
            }],
            title,
            pagination: None,
        };
    }

    let mut links = Vec::new();
    for item in document.select(&s.album_item) {
        let Some(anchor) = item.select(&s.item_anchor).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let name = item
            .select(&s.item_caption)
            .next()
            .map(element_text)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "file".to_string());
        let shown_date = item.select(&s.item_clock).next().map(element_text);
        links.push(ItemLink {
            url: join_url(page_url, href),
            name,
            shown_date,
        });
    }

    let pagination = document.select(&s.pagination).next().and_then(|nav| {
        let current = nav
            .select(&s.pagination_active)
            .next()
            .and_then(|a| element_text(a).parse::<u32>().ok())?;
        let anchors: Vec<_> = nav.select(&s.pagination_link).collect();
        // Last anchor is the "next" arrow; the one before carries the count.
        let last = anchors
            .get(anchors.len().checked_sub(2)?)
            .and_then(|a| element_text(*a).parse::<u32>().ok())?;
        Some((current, last))
    });

    ParsedPage {
        is_bunkr,
        kind: PageKind::Album,
        title,
        links,
        pagination,
    }
}

fn page_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([?&])page=\d+").unwrap())
}

/// Rewrite or append the `page` query parameter.
pub fn next_page_url(url: &str, page: u32) -> String {
    if page_param_regex().is_match(url) {
        return page_param_regex()
            .replace(url, format!("${{1}}page={page}"))
            .into_owned();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}page={page}")
}

/// Keep a page's items that fall inside the date window (if one is set).
pub fn filter_links(links: Vec<ItemLink>, filter: DateFilter) -> Vec<ItemLink> {
    if !filter.is_active() {
        return links;
    }
    links
        .into_iter()
        .filter(|link| match &link.shown_date {
            Some(shown) => is_date_in_range(shown, filter.before, filter.after),
            None => false,
        })
        .collect()
}

/// Fetch a share link and every pagination page behind it.
///
/// Items arrive page-ascending, document order within a page.
pub async fn collect_album(
    engine: &HttpEngine,
    start_url: &str,
    filter: DateFilter,
) -> Result<AlbumContext> {
    let mut url = start_url.to_string();
    let mut context: Option<AlbumContext> = None;

    loop {
        let html = engine.fetch_page(&url).await?;
        let page = parse_page(&html, &url);
        let pagination = page.pagination;
        let links = filter_links(page.links, filter);

        match context.as_mut() {
            Some(ctx) => ctx.items.extend(links),
            None => {
                context = Some(AlbumContext {
                    name: page.title,
                    is_bunkr: page.is_bunkr,
                    kind: page.kind,
                    items: links,
                })
            }
        }

        match pagination {
            Some((current, last)) if current < last => {
                log::info!("Fetching album page {}/{last}", current + 1);
                url = next_page_url(&url, current + 1);
            }
            _ => break,
        }
    }

    // Unreachable fallback kept simple: the loop always sets the context.
    Ok(context.unwrap_or(AlbumContext {
        name: "album".to_string(),
        is_bunkr: true,
        kind: PageKind::Album,
        items: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bunkr_single_page() -> &'static str {
        r#"<html><head><title>clip one | Bunkr</title></head><body>
            <h1 class="text-[20px] font-bold">clip: one?</h1>
            <span class="ic-videos block"></span>
            <video src="placeholder"></video>
        </body></html>"#
    }

    fn bunkr_album_page() -> &'static str {
        r#"<html><head><title>my album | Bunkr</title></head><body>
            <h1 class="truncate">My:Album</h1>
            <div class="theItem">
                <a class="after:absolute z-10" href="/f/aaa111"></a>
                <p>first.mp4</p>
                <span class="ic-clock mr-1">10:00:00 01/02/2024</span>
            </div>
            <div class="theItem">
                <p>orphan-no-anchor.jpg</p>
            </div>
            <div class="theItem">
                <a class="after:absolute z-10" href="/f/bbb222"></a>
                <p>second.jpg</p>
            </div>
        </body></html>"#
    }

    #[test]
    fn single_item_page_yields_one_link() {
        let page = parse_page(bunkr_single_page(), "https://bunkr.su/v/xyz");
        assert!(page.is_bunkr);
        assert_eq!(page.kind, PageKind::Single);
        assert_eq!(page.links.len(), 1);
        assert_eq!(page.links[0].url, "https://bunkr.su/v/xyz");
        // Heading sanitized for filesystem use.
        assert_eq!(page.title, "clip- one-");
    }

    #[test]
    fn album_page_enumerates_children_in_document_order() {
        let page = parse_page(bunkr_album_page(), "https://bunkr.su/a/alb");
        assert_eq!(page.kind, PageKind::Album);
        assert_eq!(page.title, "My-Album");
        // The anchorless child is dropped; the rest keep document order.
        assert_eq!(page.links.len(), 2);
        assert_eq!(page.links[0].url, "https://bunkr.su/f/aaa111");
        assert_eq!(page.links[0].name, "first.mp4");
        assert_eq!(page.links[1].name, "second.jpg");
    }

    #[test]
    fn missing_heading_falls_back_to_placeholder() {
        let html = r#"<html><head><title>x | Bunkr</title></head>
            <body><div class="theItem"><a class="after:absolute" href="/f/c"></a><p>n</p></div></body></html>"#;
        let page = parse_page(html, "https://bunkr.su/a/alb");
        assert_eq!(page.title, "album");
    }

    #[test]
    fn cyberdrop_album_prefixes_host() {
        let html = r#"<html><head><title>drop</title></head><body>
            <h1 id="title">Drop Set</h1>
            <a class="image" href="/f/one"></a>
            <a class="image" href="/f/two"></a>
        </body></html>"#;
        let page = parse_page(html, "https://cyberdrop.me/a/set");
        assert!(!page.is_bunkr);
        assert_eq!(page.title, "Drop Set");
        assert_eq!(page.links[0].url, "https://cyberdrop.me/f/one");
        assert_eq!(page.links[1].url, "https://cyberdrop.me/f/two");
    }

    fn album_page_n(current: u32, last: u32, slugs: &[&str]) -> String {
        let mut items = String::new();
        for slug in slugs {
            items.push_str(&format!(
                r#"<div class="theItem"><a class="after:absolute" href="/f/{slug}"></a><p>{slug}</p></div>"#
            ));
        }
        format!(
            r##"<html><head><title>a | Bunkr</title></head><body>
                <h1 class="truncate">Paged</h1>{items}
                <nav class="pagination">
                    <a href="#">1</a><span class="active">{current}</span><a href="#">{last}</a><a href="#">→</a>
                </nav>
            </body></html>"##
        )
    }

    #[test]
    fn pagination_numbers_are_extracted() {
        let html = album_page_n(1, 3, &["p1a"]);
        let page = parse_page(&html, "https://bunkr.su/a/alb");
        assert_eq!(page.pagination, Some((1, 3)));
    }

    #[test]
    fn three_pages_aggregate_in_page_ascending_order() {
        let pages = [
            album_page_n(1, 3, &["p1a", "p1b"]),
            album_page_n(2, 3, &["p2a"]),
            album_page_n(3, 3, &["p3a", "p3b"]),
        ];
        let mut collected = Vec::new();
        let mut url = "https://bunkr.su/a/alb".to_string();
        for html in &pages {
            let page = parse_page(html, &url);
            collected.extend(page.links);
            if let Some((current, last)) = page.pagination {
                if current < last {
                    url = next_page_url(&url, current + 1);
                }
            }
        }
        let names: Vec<_> = collected.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["p1a", "p1b", "p2a", "p3a", "p3b"]);
        // No duplicates across pages.
        let mut unique = names.clone();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn next_page_url_substitutes_or_appends() {
        assert_eq!(
            next_page_url("https://h/a/x?page=2", 3),
            "https://h/a/x?page=3"
        );
        assert_eq!(
            next_page_url("https://h/a/x?k=v&page=2", 3),
            "https://h/a/x?k=v&page=3"
        );
        assert_eq!(next_page_url("https://h/a/x", 2), "https://h/a/x?page=2");
        assert_eq!(
            next_page_url("https://h/a/x?k=v", 2),
            "https://h/a/x?k=v&page=2"
        );
    }

    #[test]
    fn date_filter_drops_out_of_window_items() {
        use chrono::NaiveDate;
        let page = parse_page(bunkr_album_page(), "https://bunkr.su/a/alb");
        let after = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let filter = DateFilter {
            before: None,
            after: Some(after),
        };
        let kept = filter_links(page.links, filter);
        // Only the first item carries a timestamp; the undated one is dropped
        // once a window is active.
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "first.mp4");
    }
}
