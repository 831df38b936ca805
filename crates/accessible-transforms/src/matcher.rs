//! Resolve replacement rules against a live document.

use accessible_core::error::Result;
use accessible_core::model::ReplacementRule;
use accessible_core::surface::LiveDocument;

/// One element to convert, with the element its alt text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTriple<E> {
    pub target: E,
    /// `None`: use the target's own text.
    pub alt_source: Option<E>,
    pub class_name: String,
}

/// Triples in (rule order, document order). The position in the returned
/// list is the 1-based image index minus one.
///
/// Every selector is checked by the document's own engine before anything
/// is queried. The k-th
/// `content` match pairs with the k-th `alt` match; content matches without a
/// counterpart fall back to their own text.
pub async fn resolve<D: LiveDocument>(
    document: &D,
    rules: &[ReplacementRule],
) -> Result<Vec<MatchTriple<D::Element>>> {
    for rule in rules {
        rule.validate()?;
        document.validate_query(&rule.content).await?;
        if let Some(alt) = rule.alt_query() {
            document.validate_query(alt).await?;
        }
    }

    let mut triples = Vec::new();
    for rule in rules {
        let targets = document.query_all(&rule.content).await?;
        if targets.is_empty() {
            continue;
        }
        let alt_sources = match rule.alt_query() {
            Some(query) => document.query_all(query).await?,
            None => Vec::new(),
        };
        if !alt_sources.is_empty() && alt_sources.len() != targets.len() {
            log::debug!(
                "{}: {} match(es) for '{}' but {} for '{}'",
                document.location(),
                targets.len(),
                rule.content,
                alt_sources.len(),
                rule.alt_query().unwrap_or_default()
            );
        }

        let mut alt_sources = alt_sources.into_iter();
        for target in targets {
            triples.push(MatchTriple {
                target,
                alt_source: alt_sources.next(),
                class_name: rule.class_or_default().to_string(),
            });
        }
    }
    Ok(triples)
}
