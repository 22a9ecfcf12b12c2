//! Listing parsing error types
//!
//! Most extraction problems are recoverable: the page is treated as empty and the
//! crawl moves on. A sign-in wall is the one condition the session reacts to.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParsingError {
    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No valid selectors for '{field}': {errors}")]
    NoValidSelectors { field: String, errors: String },

    #[error("Required field '{field}' not found in item tile")]
    RequiredFieldMissing {
        field: String,
        context: Option<String>,
    },

    #[error("Listing structure not found on page {page}")]
    ListingStructureMissing { page: u32 },

    #[error("Sign-in page served instead of the listing: {url}")]
    SignInRequired { url: String },

    #[error("URL resolution failed: {url} - {reason}")]
    UrlResolutionFailed { url: String, reason: String },
}

impl ParsingError {
    pub fn required_field_missing(field: &str, context: Option<&str>) -> Self {
        Self::RequiredFieldMissing {
            field: field.to_string(),
            context: context.map(|s| s.to_string()),
        }
    }

    pub fn invalid_selector(selector: &str, reason: &str) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidSelector { .. } => true,
            Self::NoValidSelectors { .. } => false,
            Self::RequiredFieldMissing { .. } => true,
            Self::ListingStructureMissing { .. } => true,
            Self::SignInRequired { .. } => false,
            Self::UrlResolutionFailed { .. } => true,
        }
    }
}

pub type ParsingResult<T> = Result<T, ParsingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_wall_is_not_recoverable() {
        let err = ParsingError::SignInRequired {
            url: "https://www.amazon.com/ap/signin".into(),
        };
        assert!(!err.is_recoverable());
        assert!(ParsingError::required_field_missing("name", Some("tile 3")).is_recoverable());
        assert!(err.to_string().contains("/ap/signin"));
    }
}
