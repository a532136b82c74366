//! Export envelope
//!
//! For a given source, produce one JSON envelope with the source record,
//! every claim (dimensions, profile scores, tier, ordered evidence), and
//! all entities with their evidence. A separate component ships this to the
//! external knowledge registry; that transport and its rate-limit handling
//! live outside this crate.

use serde_json::json;
use sqlx::Row;

use quarry_core::SourceId;

use crate::claims::ClaimStore;
use crate::StoreError;

/// Build the upload envelope for one source.
pub async fn build_export_envelope(
    store: &ClaimStore,
    source_id: &SourceId,
) -> Result<serde_json::Value, StoreError> {
    let source = store
        .source(source_id)
        .await?
        .ok_or_else(|| StoreError::UnknownSource(source_id.to_string()))?;
    let claims = store.claims_for_source(source_id).await?;

    let pool = store.database().pool();
    let mut entities = serde_json::Map::new();
    for (key, table, evidence_table) in [
        ("jargon", "jargon_terms", "jargon_evidence"),
        ("people", "people", "person_evidence"),
        ("mental_models", "mental_models", "concept_evidence"),
    ] {
        let sql = format!("SELECT * FROM {table} WHERE source_id = ? ORDER BY entity_id");
        let rows = sqlx::query(&sql).bind(source_id.as_str()).fetch_all(pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity_id: String = row.try_get("entity_id")?;
            let evidence_sql = format!(
                "SELECT * FROM {evidence_table} WHERE entity_id = ? ORDER BY sequence"
            );
            let evidence_rows =
                sqlx::query(&evidence_sql).bind(&entity_id).fetch_all(pool).await?;
            let evidence: Vec<serde_json::Value> = evidence_rows
                .iter()
                .map(|e| {
                    Ok(json!({
                        "sequence": e.try_get::<i64, _>("sequence")?,
                        "claim_id": e.try_get::<Option<String>, _>("claim_id")?,
                        "t0": e.try_get::<f64, _>("t0")?,
                        "t1": e.try_get::<f64, _>("t1")?,
                        "quote": e.try_get::<String, _>("quote")?,
                        "context_text": e.try_get::<Option<String>, _>("context_text")?,
                        "context_type": e.try_get::<String, _>("context_type")?,
                    }))
                })
                .collect::<Result<_, StoreError>>()?;

            let aliases: String = row.try_get("aliases")?;
            let mut item = serde_json::Map::new();
            item.insert("entity_id".into(), json!(entity_id));
            item.insert("name".into(), json!(row.try_get::<String, _>("name")?));
            item.insert(
                "aliases".into(),
                serde_json::from_str(&aliases).unwrap_or_else(|_| json!([])),
            );
            if table != "people" {
                item.insert(
                    "definition".into(),
                    json!(row.try_get::<Option<String>, _>("definition")?),
                );
            }
            if table == "jargon_terms" {
                item.insert("domain".into(), json!(row.try_get::<Option<String>, _>("domain")?));
            }
            item.insert(
                "quality_score".into(),
                json!(row.try_get::<Option<f64>, _>("quality_score")?),
            );
            item.insert("evidence".into(), json!(evidence));
            items.push(serde_json::Value::Object(item));
        }
        entities.insert(key.to_string(), json!(items));
    }

    Ok(json!({
        "source": source,
        "claims": claims,
        "entities": entities,
    }))
}
