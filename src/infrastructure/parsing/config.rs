//! Parsing configuration for listing pages
//!
//! Centralized CSS selectors, each with fallbacks tried in order.

use serde::{Deserialize, Serialize};

/// CSS selectors for listing pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    /// Item tile containers
    pub item_tile: Vec<String>,

    /// Product link inside a tile (carries `/dp/<ID>`)
    pub item_link: Vec<String>,

    /// Item title inside a tile
    pub item_title: Vec<String>,

    pub item_image: Vec<String>,

    /// Element whose text reads "Displaying 1-24 of 1,234 results"
    pub result_count: Vec<String>,

    /// Enabled "next page" control
    pub next_page: Vec<String>,

    /// Top-level category nodes of the browse filter
    pub category_node: Vec<String>,

    /// Subcategory nodes, rendered under the selected category
    pub subcategory_node: Vec<String>,

    /// Markers of a sign-in page served in place of the listing
    pub sign_in_marker: Vec<String>,
}

fn owned(selectors: &[&str]) -> Vec<String> {
    selectors.iter().map(ToString::to_string).collect()
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            item_tile: owned(&["#vvp-items .vvp-item-tile", ".vvp-item-tile", "div[data-recommendation-id]"]),
            item_link: owned(&[
                ".vvp-item-product-title-container a[href]",
                "a.a-link-normal[href*='/dp/']",
                "a[href*='/dp/']",
            ]),
            item_title: owned(&[
                ".vvp-item-product-title-container .a-truncate-full",
                ".vvp-item-product-title-container a",
                "a[href*='/dp/']",
            ]),
            item_image: owned(&[".vvp-item-tile-content img", "img"]),
            result_count: owned(&["#vvp-items-grid-container > p", "#vvp-items-grid-container p", ".vvp-items-container p"]),
            next_page: owned(&["ul.a-pagination li.a-last:not(.a-disabled) a[href]", "a[rel='next']"]),
            category_node: owned(&["#vvp-browse-nodes-container .parent-node", "#vvp-browse-nodes-container > div"]),
            subcategory_node: owned(&["#vvp-browse-nodes-container .child-node"]),
            sign_in_marker: owned(&["form[name='signIn']", "#ap_email", "#ap_password"]),
        }
    }
}
