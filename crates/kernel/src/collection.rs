//! Resource collection: runs one index request end to end.
//!
//! The phases always run in this order:
//! 1. base query from the repository, scoped to the root entity
//! 2. field manager primed with schema and root entity
//! 3. finder pipeline (filters, sorts, includes, fields)
//! 4. relation joiner
//! 5. paginator, on the frozen query
//!
//! Pagination is last because the count must see the final filter and join
//! shape. The query is frozen before the paginator sees it, so later phases
//! cannot change what was counted or fetched.

use std::sync::Arc;

use anyhow::Result;
use url::Url;

use crate::config::ListingConfig;
use crate::error::{CollectionError, CollectionResult};
use crate::executor::QueryExecutor;
use crate::field_manager::{FieldManager, ROOT_ALIAS};
use crate::finder::FinderCollection;
use crate::joiner::RelationJoiner;
use crate::paginator::{LinkSet, PageItems, PaginationLinks, Paginator};
use crate::query::FrozenQuery;
use crate::repository::EntityRepository;
use crate::request::ListRequest;

/// One listing request over one repository.
pub struct ResourceCollection {
    repository: EntityRepository,
    request: ListRequest,
    finders: FinderCollection,
    joiner: RelationJoiner,
    paginator: Paginator,
    fields: FieldManager,
    executor: Arc<dyn QueryExecutor>,
    query: Option<FrozenQuery>,
}

impl ResourceCollection {
    /// Wire a collection from configuration.
    pub fn new(
        repository: EntityRepository,
        request: ListRequest,
        config: &ListingConfig,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self> {
        Ok(Self::with_parts(
            repository,
            request,
            FinderCollection::from_names(&config.finders)?,
            RelationJoiner::new(config.join_anchors),
            Paginator::from_config(config),
            executor,
        ))
    }

    pub fn with_parts(
        repository: EntityRepository,
        request: ListRequest,
        finders: FinderCollection,
        joiner: RelationJoiner,
        paginator: Paginator,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            repository,
            request,
            finders,
            joiner,
            paginator,
            fields: FieldManager::new(),
            executor,
            query: None,
        }
    }

    /// Process the index request: filtering, sorting, relations, pagination.
    pub async fn handle_index_request(&mut self) -> CollectionResult<()> {
        if self.query.is_some() {
            return Err(CollectionError::InvalidState(
                "index request already handled".to_string(),
            ));
        }

        // A failed attempt may have left relations behind
        self.fields = FieldManager::new();
        let mut query = self.repository.create_query_builder(ROOT_ALIAS)?;

        self.fields.set_schema(Arc::clone(query.schema()));
        let root = query.root_entities().first().cloned().ok_or_else(|| {
            CollectionError::InvalidState("query has no root entity".to_string())
        })?;
        self.fields.set_root_entity(&root)?;

        self.finders
            .handle_query(&mut query, &self.request, &mut self.fields)?;

        self.joiner.apply(&mut query, &self.fields)?;

        let frozen = query.finalize_filters(&self.fields);
        self.paginator
            .handle_query(&frozen, &self.request, self.executor.as_ref())
            .await?;

        tracing::debug!(
            entity = %root,
            request = %self.request,
            joins = frozen.joins().len(),
            total_items = self.paginator.count().unwrap_or_default(),
            "index request handled"
        );
        self.query = Some(frozen);
        Ok(())
    }

    pub fn repository(&self) -> &EntityRepository {
        &self.repository
    }

    pub fn request(&self) -> &ListRequest {
        &self.request
    }

    /// The frozen query, once the request has been handled.
    pub fn query(&self) -> Option<&FrozenQuery> {
        self.query.as_ref()
    }

    pub fn field_manager(&self) -> &FieldManager {
        &self.fields
    }

    pub fn finders(&self) -> &FinderCollection {
        &self.finders
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn total_items(&self) -> Option<u64> {
        self.paginator.count()
    }

    pub fn page(&self) -> Option<u32> {
        self.paginator.page()
    }

    pub fn size(&self) -> Option<u32> {
        self.paginator.size()
    }

    pub fn links(&self) -> Option<PaginationLinks> {
        self.paginator.links()
    }

    /// Link URLs rooted at `base`.
    pub fn link_urls(&self, base: &Url) -> Option<LinkSet> {
        let links = self.paginator.links()?;
        let size = self.paginator.size()?;
        Some(links.to_urls(base, &self.request, size))
    }

    /// Take the current page's rows. Single pass: `None` the second time.
    pub fn take_items(&mut self) -> Option<PageItems> {
        self.paginator.take_items()
    }
}

impl std::fmt::Debug for ResourceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCollection")
            .field("entity", &self.repository.entity_name())
            .field("request", &self.request)
            .field("finders", &self.finders)
            .field("handled", &self.query.is_some())
            .finish()
    }
}
