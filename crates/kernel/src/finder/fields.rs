//! `fields[Entity]` sparse fieldsets.

use super::Finder;
use crate::error::CollectionResult;
use crate::field_manager::FieldManager;
use crate::query::QueryState;
use crate::request::ListRequest;

/// Records requested output fields per entity.
///
/// Entities must already be part of the relation graph, so this finder runs
/// after the ones that register relations. Only the root's fieldset narrows
/// the page projection. Fieldsets of joined entities are kept on the
/// [`FieldManager`] for whoever serializes included resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldsFinder;

impl Finder for FieldsFinder {
    fn name(&self) -> &'static str {
        "fields"
    }

    fn apply(
        &self,
        _query: &mut QueryState,
        request: &ListRequest,
        fields: &mut FieldManager,
    ) -> CollectionResult<()> {
        for (entity, names) in request.sparse_fields()? {
            for name in &names {
                fields.add_field(&entity, name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::setup;
    use super::*;
    use crate::error::CollectionError;

    #[test]
    fn records_root_fields() {
        let (mut query, mut fields) = setup();
        let request = ListRequest::from_pairs([("fields[Article]", "title,created")]);
        FieldsFinder.apply(&mut query, &request, &mut fields).unwrap();

        assert_eq!(
            fields.requested_fields("Article"),
            Some(&["title".to_string(), "created".to_string()][..])
        );
    }

    #[test]
    fn joined_fieldset_is_recorded_but_not_projected() {
        let (mut query, mut fields) = setup();
        fields.resolve_relation_path("comments").unwrap();
        let alias = fields.alias_of("Comment").unwrap().to_string();
        query.left_join("r", "comments", &alias).unwrap();
        let request = ListRequest::from_pairs([("fields[Comment]", "body")]);
        FieldsFinder.apply(&mut query, &request, &mut fields).unwrap();

        assert_eq!(
            fields.requested_fields("Comment"),
            Some(&["body".to_string()][..])
        );
        let sql = query.finalize_filters(&fields).page_sql(10, 0);
        assert!(!sql.contains(&format!("\"{alias}\".\"body\"")), "{sql}");
        assert!(sql.contains("\"r\".\"title\""), "{sql}");
    }

    #[test]
    fn unjoined_entity_is_unknown_field() {
        let (mut query, mut fields) = setup();
        let request = ListRequest::from_pairs([("fields[Comment]", "body")]);
        let err = FieldsFinder
            .apply(&mut query, &request, &mut fields)
            .unwrap_err();
        assert!(matches!(err, CollectionError::UnknownField(ref f) if f == "Comment.body"));
    }

    #[test]
    fn unknown_column_is_unknown_field() {
        let (mut query, mut fields) = setup();
        let request = ListRequest::from_pairs([("fields[Article]", "title,views")]);
        let err = FieldsFinder
            .apply(&mut query, &request, &mut fields)
            .unwrap_err();
        assert!(matches!(err, CollectionError::UnknownField(ref f) if f == "Article.views"));
    }
}
