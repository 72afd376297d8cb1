//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

use crate::joiner::AnchorStrategy;

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Maximum number of items per page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default database pool size.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Finder order used when none is configured.
pub const DEFAULT_FINDERS: [&str; 4] = ["filter", "sort", "include", "fields"];

/// Listing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingConfig {
    /// Page size when the request names none (default: 10).
    pub default_page_size: u32,

    /// Upper bound for requested page sizes (default: 100).
    pub max_page_size: u32,

    /// Finder names in execution order.
    pub finders: Vec<String>,

    /// How join anchors are chosen.
    pub join_anchors: AnchorStrategy,

    /// PostgreSQL connection URL. Only needed to run listings.
    pub database_url: Option<String>,

    /// Maximum database connections (default: 5).
    pub database_max_connections: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            finders: DEFAULT_FINDERS.iter().map(|s| s.to_string()).collect(),
            join_anchors: AnchorStrategy::default(),
            database_url: None,
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
        }
    }
}

impl ListingConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default_page_size: u32 = lookup("LISTING_DEFAULT_PAGE_SIZE")
            .unwrap_or_else(|| DEFAULT_PAGE_SIZE.to_string())
            .parse()
            .context("LISTING_DEFAULT_PAGE_SIZE must be a valid u32")?;

        let max_page_size: u32 = lookup("LISTING_MAX_PAGE_SIZE")
            .unwrap_or_else(|| MAX_PAGE_SIZE.to_string())
            .parse()
            .context("LISTING_MAX_PAGE_SIZE must be a valid u32")?;

        if default_page_size == 0 || max_page_size == 0 {
            anyhow::bail!("page sizes must be at least 1");
        }
        if default_page_size > max_page_size {
            anyhow::bail!(
                "LISTING_DEFAULT_PAGE_SIZE ({default_page_size}) exceeds LISTING_MAX_PAGE_SIZE ({max_page_size})"
            );
        }

        let finders = lookup("LISTING_FINDERS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_FINDERS.iter().map(|s| s.to_string()).collect());

        let join_anchors = match lookup("LISTING_JOIN_ANCHORS")
            .unwrap_or_else(|| "declared".to_string())
            .to_lowercase()
            .as_str()
        {
            "declared" => AnchorStrategy::Declared,
            "sequential" => AnchorStrategy::Sequential,
            other => anyhow::bail!(
                "LISTING_JOIN_ANCHORS must be 'declared' or 'sequential', got '{other}'"
            ),
        };

        let database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());

        let database_max_connections: u32 = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| DEFAULT_DATABASE_MAX_CONNECTIONS.to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        Ok(Self {
            default_page_size,
            max_page_size,
            finders,
            join_anchors,
            database_url,
            database_max_connections,
        })
    }
}
