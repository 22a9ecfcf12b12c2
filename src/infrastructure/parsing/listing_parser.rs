//! Listing page parser
//!
//! Turns one listing document into a [`ListingPage`]: item tiles, the total-result
//! count, the next-page control and the browse filter one level below the target.
//! A page without the expected structure parses to an empty page, never an error;
//! only a sign-in wall is reported as one.

#![allow(clippy::uninlined_format_args)]

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::config::ListingSelectors;
use crate::domain::{FilterNode, Item, ItemId, ListingPage, ListingTarget};
use crate::infrastructure::config::vine;
use crate::infrastructure::parsing_error::{ParsingError, ParsingResult};

static RESULT_TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:of\s+([\d,]+)\s+results?|displaying\s+([\d,]+)\s+results?)")
        .expect("result total pattern is valid")
});

// trailing "(1,234)" annotation on a filter node
static NODE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*([\d,]+)\s*\)\s*$").expect("node count pattern is valid"));

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector is valid"));

/// Parser for listing pages with compiled fallback selectors
pub struct ListingParser {
    marketplace_url: String,
    item_tile: Vec<Selector>,
    item_link: Vec<Selector>,
    item_title: Vec<Selector>,
    item_image: Vec<Selector>,
    result_count: Vec<Selector>,
    next_page: Vec<Selector>,
    category_node: Vec<Selector>,
    subcategory_node: Vec<Selector>,
    sign_in_marker: Vec<Selector>,
}

impl ListingParser {
    /// Create a parser with default selectors
    pub fn new(marketplace_url: impl Into<String>) -> ParsingResult<Self> {
        Self::with_selectors(marketplace_url, &ListingSelectors::default())
    }

    /// Create parser with custom selector configuration
    pub fn with_selectors(marketplace_url: impl Into<String>, selectors: &ListingSelectors) -> ParsingResult<Self> {
        Ok(Self {
            marketplace_url: marketplace_url.into(),
            item_tile: compile_selectors("item_tile", &selectors.item_tile)?,
            item_link: compile_selectors("item_link", &selectors.item_link)?,
            item_title: compile_selectors("item_title", &selectors.item_title)?,
            item_image: compile_selectors("item_image", &selectors.item_image)?,
            result_count: compile_selectors("result_count", &selectors.result_count)?,
            next_page: compile_selectors("next_page", &selectors.next_page)?,
            category_node: compile_selectors("category_node", &selectors.category_node)?,
            subcategory_node: compile_selectors("subcategory_node", &selectors.subcategory_node)?,
            sign_in_marker: compile_selectors("sign_in_marker", &selectors.sign_in_marker)?,
        })
    }

    /// Whether the document is a sign-in form rather than a listing
    pub fn is_sign_in_page(&self, html: &str) -> bool {
        let document = Html::parse_document(html);
        self.sign_in_marker
            .iter()
            .any(|selector| document.select(selector).next().is_some())
    }

    /// Parse page `page` of `target`
    pub fn parse(&self, html: &str, target: &ListingTarget, page: u32) -> ParsingResult<ListingPage> {
        let document = Html::parse_document(html);

        if self
            .sign_in_marker
            .iter()
            .any(|selector| document.select(selector).next().is_some())
        {
            return Err(ParsingError::SignInRequired {
                url: vine::listing_url(&self.marketplace_url, target, page)
                    .map(String::from)
                    .unwrap_or_else(|_| target.to_string()),
            });
        }

        let items = self.extract_items(&document, target, page);
        let total_results = self.extract_total(&document);
        let has_next = self
            .next_page
            .iter()
            .any(|selector| document.select(selector).next().is_some());
        let filter_nodes = self.extract_filter_nodes(&document, target);

        debug!(
            "Parsed {} page {}: {} items, total {:?}, next {}, {} filter nodes",
            target,
            page,
            items.len(),
            total_results,
            has_next,
            filter_nodes.len()
        );

        Ok(ListingPage {
            page_number: page,
            items,
            total_results,
            has_next,
            filter_nodes,
        })
    }

    fn extract_items(&self, document: &Html, target: &ListingTarget, page: u32) -> Vec<Item> {
        let Some(tiles) = self
            .item_tile
            .iter()
            .map(|selector| document.select(selector).collect::<Vec<_>>())
            .find(|tiles| !tiles.is_empty())
        else {
            let err = ParsingError::ListingStructureMissing { page };
            debug!("{} ({})", err, target);
            return Vec::new();
        };

        let mut items = Vec::with_capacity(tiles.len());
        for (index, tile) in tiles.iter().enumerate() {
            match self.extract_item(tile, target) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping tile {} on {} page {}: {}", index, target, page, e),
            }
        }
        items
    }

    fn extract_item(&self, tile: &ElementRef, target: &ListingTarget) -> ParsingResult<Item> {
        let href = self
            .item_link
            .iter()
            .find_map(|selector| tile.select(selector).find_map(|a| a.value().attr("href")))
            .ok_or_else(|| ParsingError::required_field_missing("link", Some("item tile")))?;

        let url = vine::resolve_url(&self.marketplace_url, href).ok_or_else(|| ParsingError::UrlResolutionFailed {
            url: href.to_string(),
            reason: format!("not resolvable against {}", self.marketplace_url),
        })?;

        // the tile's data-asin is a fallback when the link is a redirect
        let id = ItemId::from_product_url(&url)
            .or_else(|| {
                tile.value()
                    .attr("data-asin")
                    .and_then(|raw| ItemId::parse(raw).ok())
            })
            .ok_or_else(|| ParsingError::required_field_missing("asin", Some(href)))?;

        let name = self
            .item_title
            .iter()
            .filter_map(|selector| tile.select(selector).next())
            .map(normalize_text)
            .find(|text| !text.is_empty())
            .ok_or_else(|| ParsingError::required_field_missing("name", Some(id.as_str())))?;

        let image_url = self
            .item_image
            .iter()
            .find_map(|selector| tile.select(selector).find_map(|img| img.value().attr("src")))
            .map(ToString::to_string);

        Ok(Item::new(id, target.section, name, url).with_image(image_url))
    }

    fn extract_total(&self, document: &Html) -> Option<u32> {
        self.result_count
            .iter()
            .flat_map(|selector| document.select(selector))
            .find_map(|el| parse_result_total(&normalize_text(el)))
    }

    fn extract_filter_nodes(&self, document: &Html, target: &ListingTarget) -> Vec<FilterNode> {
        // 하위 분류 페이지에는 더 내려갈 필터가 없음
        if target.subcategory_id.is_some() {
            return Vec::new();
        }

        let selectors = if target.category_id.is_some() {
            &self.subcategory_node
        } else {
            &self.category_node
        };

        let mut nodes: Vec<FilterNode> = Vec::new();
        for element in selectors.iter().flat_map(|selector| document.select(selector)) {
            let Some(parsed) = self.parse_filter_node(&element) else {
                continue;
            };

            let id = match (&target.category_id, parsed.subcategory_id) {
                (None, None) => parsed.category_id,
                (Some(category), Some(sub)) if parsed.category_id.as_deref().is_none_or(|pn| pn == category.as_str()) => {
                    Some(sub)
                }
                _ => None,
            };
            let Some(id) = id else {
                continue;
            };
            if nodes.iter().any(|n| n.id == id) {
                continue;
            }
            nodes.push(FilterNode::new(id, parsed.name, parsed.item_count));
        }
        nodes
    }

    fn parse_filter_node(&self, element: &ElementRef) -> Option<ParsedNode> {
        let href = if element.value().name() == "a" {
            element.value().attr("href")
        } else {
            element.select(&ANCHOR).next().and_then(|a| a.value().attr("href"))
        }?;

        let url = Url::parse(&self.marketplace_url).ok()?.join(href).ok()?;
        let param = |key: &str| {
            url.query_pairs()
                .find(|(k, v)| k == key && !v.is_empty())
                .map(|(_, v)| v.into_owned())
        };

        let text = normalize_text(*element);
        let (name, item_count) = split_count_annotation(&text);
        if name.is_empty() {
            return None;
        }

        Some(ParsedNode {
            category_id: param("pn"),
            subcategory_id: param("cn"),
            name,
            item_count,
        })
    }
}

struct ParsedNode {
    category_id: Option<String>,
    subcategory_id: Option<String>,
    name: String,
    item_count: Option<u32>,
}

/// Compile selector strings, keeping the ones that parse
fn compile_selectors(field: &str, selector_strings: &[String]) -> ParsingResult<Vec<Selector>> {
    let mut selectors = Vec::new();
    let mut errors = Vec::new();

    for selector_str in selector_strings {
        match Selector::parse(selector_str) {
            Ok(selector) => selectors.push(selector),
            Err(e) => {
                let err = ParsingError::invalid_selector(selector_str, &e.to_string());
                warn!("Failed to compile {} selector: {}", field, err);
                errors.push(err.to_string());
            }
        }
    }

    if selectors.is_empty() {
        return Err(ParsingError::NoValidSelectors {
            field: field.to_string(),
            errors: errors.join(", "),
        });
    }
    Ok(selectors)
}

fn normalize_text(element: ElementRef) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn parse_number(raw: &str) -> Option<u32> {
    raw.replace(',', "").parse().ok()
}

/// "Displaying 1-24 of 1,234 results" → 1234
pub fn parse_result_total(text: &str) -> Option<u32> {
    let caps = RESULT_TOTAL.captures(text)?;
    caps.get(1).or_else(|| caps.get(2)).and_then(|m| parse_number(m.as_str()))
}

/// "Accessories & Supplies (1,234)" → ("Accessories & Supplies", Some(1234))
pub fn split_count_annotation(text: &str) -> (String, Option<u32>) {
    match NODE_COUNT.captures(text) {
        Some(caps) => {
            let name_end = caps.get(0).map_or(text.len(), |m| m.start());
            (
                text[..name_end].trim().to_string(),
                caps.get(1).and_then(|m| parse_number(m.as_str())),
            )
        }
        None => (text.trim().to_string(), None),
    }
}
