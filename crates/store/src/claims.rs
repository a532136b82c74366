//! Claim store
//!
//! Takes the complete miner and evaluator output for one source and writes
//! it atomically: source, segments, claims with every evidence span,
//! entities deduplicated by normalized name with every occurrence recorded,
//! and one full-text-search row per claim. Immediately after commit the
//! claim count is re-read and compared with what was submitted; a mismatch
//! aborts the run rather than reporting a silent partial success.

use sqlx::{Row, Sqlite, Transaction};
use tracing::{info, warn};

use quarry_core::{
    entity::normalize_name, Claim, ClaimType, ContextType, EntityEvidence, EvidenceSpan,
    JargonTerm, MentalModel, Person, Segment, Source, SourceId, Temporality, TemporalityJudgment,
    Tier, Timestamp,
};

use crate::db::Database;
use crate::media::fetch_source;
use crate::StoreError;

/// Everything the pipeline produced for one source.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub segments: Vec<Segment>,
    pub claims: Vec<Claim>,
    pub jargon: Vec<JargonTerm>,
    pub people: Vec<Person>,
    pub mental_models: Vec<MentalModel>,
}

/// What one store call wrote.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreReceipt {
    pub claims: usize,
    pub evidence_spans: usize,
    pub segments: usize,
    pub entities: usize,
    pub entity_evidence: usize,
}

#[derive(Clone)]
pub struct ClaimStore {
    db: Database,
}

impl ClaimStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomic write of a source's complete pipeline output. A rerun replaces
    /// the source's previous claims and entities; segments are kept if
    /// already present.
    pub async fn store_pipeline_output(
        &self,
        source: &Source,
        output: &PipelineOutput,
    ) -> Result<StoreReceipt, StoreError> {
        let mut receipt = StoreReceipt::default();
        let mut tx = self.db.pool().begin().await?;

        upsert_source(&mut tx, source).await?;

        // Rerun semantics: fresh claims and entities for this source
        for table in ["claims", "jargon_terms", "people", "mental_models"] {
            let sql = format!("DELETE FROM {table} WHERE source_id = ?");
            sqlx::query(&sql).bind(source.id.as_str()).execute(&mut *tx).await?;
        }
        sqlx::query("DELETE FROM claims_fts WHERE claim_id IN (SELECT claim_id FROM claims WHERE source_id = ?)")
            .bind(source.id.as_str())
            .execute(&mut *tx)
            .await?;

        for segment in &output.segments {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO segments (source_id, segment_id, t0, t1, text) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(segment.source_id.as_str())
            .bind(segment.segment_id)
            .bind(segment.t0.as_seconds())
            .bind(segment.t1.as_seconds())
            .bind(&segment.text)
            .execute(&mut *tx)
            .await?;
            receipt.segments += result.rows_affected() as usize;
        }

        for claim in &output.claims {
            if claim.evidence.is_empty() {
                warn!(claim = %claim.claim_id, "dropping claim with no evidence spans");
                continue;
            }
            insert_claim(&mut tx, claim).await?;
            receipt.claims += 1;
            receipt.evidence_spans += claim.evidence.len();
        }

        receipt.entities += store_jargon(&mut tx, &source.id, &output.jargon, &mut receipt).await?;
        receipt.entities += store_people(&mut tx, &source.id, &output.people, &mut receipt).await?;
        receipt.entities +=
            store_mental_models(&mut tx, &source.id, &output.mental_models, &mut receipt).await?;

        tx.commit().await?;

        // Read-back verification: partial writes must not look like success
        let found: i64 = sqlx::query("SELECT COUNT(*) AS n FROM claims WHERE source_id = ?")
            .bind(source.id.as_str())
            .fetch_one(self.db.pool())
            .await?
            .try_get("n")?;
        let expected = receipt.claims as i64;
        if found != expected {
            return Err(StoreError::VerificationFailed { expected, found });
        }

        info!(
            source = %source.id,
            claims = receipt.claims,
            spans = receipt.evidence_spans,
            entities = receipt.entities,
            "pipeline output stored"
        );
        Ok(receipt)
    }

    /// All claims for a source with their evidence, in insertion order.
    pub async fn claims_for_source(&self, source_id: &SourceId) -> Result<Vec<Claim>, StoreError> {
        let rows = sqlx::query("SELECT * FROM claims WHERE source_id = ? ORDER BY claim_id")
            .bind(source_id.as_str())
            .fetch_all(self.db.pool())
            .await?;

        let mut claims = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut claim = row_to_claim(row)?;
            let span_rows = sqlx::query(
                "SELECT * FROM evidence_spans WHERE claim_id = ? ORDER BY sequence",
            )
            .bind(&claim.claim_id)
            .fetch_all(self.db.pool())
            .await?;
            claim.evidence = span_rows.iter().map(row_to_span).collect::<Result<_, _>>()?;
            claims.push(claim);
        }
        Ok(claims)
    }

    /// Write one claim's evaluation fields in place. Used by the evaluation
    /// stage so it stays independently retryable from mining.
    pub async fn update_claim_evaluation(&self, claim: &Claim) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE claims SET
                 epistemic_value = ?, actionability = ?, novelty = ?, verifiability = ?,
                 temporal_stability = ?, scope = ?, profile_scores = ?, best_profile = ?,
                 importance = ?, tier = ?, temporality = ?, temporality_confidence = ?
               WHERE claim_id = ?"#,
        )
        .bind(claim.dimensions.map(|d| d.epistemic_value))
        .bind(claim.dimensions.map(|d| d.actionability))
        .bind(claim.dimensions.map(|d| d.novelty))
        .bind(claim.dimensions.map(|d| d.verifiability))
        .bind(claim.dimensions.map(|d| d.temporal_stability))
        .bind(claim.dimensions.map(|d| d.scope))
        .bind(
            claim
                .profile_scores
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(&claim.best_profile)
        .bind(claim.importance())
        .bind(claim.tier.map(|t| t.as_str()))
        .bind(claim.temporality.map(|t| t.temporality.as_str()))
        .bind(claim.temporality.map(|t| t.confidence))
        .bind(&claim.claim_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Entities of one source without their evidence, for evaluation passes.
    pub async fn jargon_for_source(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<JargonTerm>, StoreError> {
        let rows = sqlx::query("SELECT * FROM jargon_terms WHERE source_id = ? ORDER BY entity_id")
            .bind(source_id.as_str())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let aliases: String = row.try_get("aliases")?;
                Ok(JargonTerm {
                    entity_id: row.try_get("entity_id")?,
                    source_id: SourceId::new(row.try_get::<String, _>("source_id")?),
                    name: row.try_get("name")?,
                    definition: row.try_get("definition")?,
                    domain: row.try_get("domain")?,
                    aliases: serde_json::from_str(&aliases).unwrap_or_default(),
                    introduced_by: row.try_get("introduced_by")?,
                    evidence: Vec::new(),
                    quality_score: row.try_get("quality_score")?,
                })
            })
            .collect()
    }

    pub async fn people_for_source(&self, source_id: &SourceId) -> Result<Vec<Person>, StoreError> {
        let rows = sqlx::query("SELECT * FROM people WHERE source_id = ? ORDER BY entity_id")
            .bind(source_id.as_str())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let aliases: String = row.try_get("aliases")?;
                Ok(Person {
                    entity_id: row.try_get("entity_id")?,
                    source_id: SourceId::new(row.try_get::<String, _>("source_id")?),
                    name: row.try_get("name")?,
                    aliases: serde_json::from_str(&aliases).unwrap_or_default(),
                    mentioned_by: row.try_get("mentioned_by")?,
                    evidence: Vec::new(),
                    quality_score: row.try_get("quality_score")?,
                })
            })
            .collect()
    }

    pub async fn mental_models_for_source(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<MentalModel>, StoreError> {
        let rows = sqlx::query("SELECT * FROM mental_models WHERE source_id = ? ORDER BY entity_id")
            .bind(source_id.as_str())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let aliases: String = row.try_get("aliases")?;
                Ok(MentalModel {
                    entity_id: row.try_get("entity_id")?,
                    source_id: SourceId::new(row.try_get::<String, _>("source_id")?),
                    name: row.try_get("name")?,
                    definition: row.try_get("definition")?,
                    aliases: serde_json::from_str(&aliases).unwrap_or_default(),
                    advocated_by: row.try_get("advocated_by")?,
                    evidence: Vec::new(),
                    quality_score: row.try_get("quality_score")?,
                })
            })
            .collect()
    }

    /// Write an entity quality score. `table` is one of the three entity
    /// tables.
    pub async fn update_entity_quality(
        &self,
        table: &str,
        entity_id: &str,
        score: Option<f64>,
    ) -> Result<(), StoreError> {
        debug_assert!(matches!(table, "jargon_terms" | "people" | "mental_models"));
        let sql = format!("UPDATE {table} SET quality_score = ? WHERE entity_id = ?");
        sqlx::query(&sql)
            .bind(score)
            .bind(entity_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Full-text search over claim text. Returns matching claim ids.
    pub async fn search_claims(&self, needle: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT claim_id FROM claims_fts WHERE claims_fts MATCH ?")
            .bind(needle)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("claim_id").map_err(StoreError::from))
            .collect()
    }

    /// Delete a source; every dependent row cascades.
    pub async fn delete_source(&self, source_id: &SourceId) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM claims_fts WHERE claim_id IN (SELECT claim_id FROM claims WHERE source_id = ?)")
            .bind(source_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sources WHERE source_id = ?")
            .bind(source_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn source(&self, source_id: &SourceId) -> Result<Option<Source>, StoreError> {
        fetch_source(self.db.pool(), source_id).await
    }

    pub(crate) fn database(&self) -> &Database {
        &self.db
    }
}

async fn upsert_source(tx: &mut Transaction<'_, Sqlite>, source: &Source) -> Result<(), StoreError> {
    let existing = fetch_source(&mut **tx, &source.id).await?;
    let merged = match existing {
        Some(mut current) => {
            current.merge_from(source);
            current
        }
        None => source.clone(),
    };
    sqlx::query(
        r#"INSERT INTO sources (source_id, source_type, url, file_path, title, duration_seconds,
             uploader, upload_date, description, tags, chapters, thumbnail_local_path, checksum,
             audio_file_path, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(source_id) DO UPDATE SET
             title = excluded.title,
             duration_seconds = excluded.duration_seconds,
             uploader = excluded.uploader,
             upload_date = excluded.upload_date,
             description = excluded.description,
             tags = excluded.tags,
             chapters = excluded.chapters,
             thumbnail_local_path = excluded.thumbnail_local_path,
             checksum = excluded.checksum,
             audio_file_path = excluded.audio_file_path"#,
    )
    .bind(merged.id.as_str())
    .bind(merged.source_type.as_str())
    .bind(&merged.url)
    .bind(&merged.file_path)
    .bind(&merged.title)
    .bind(merged.duration_seconds)
    .bind(&merged.uploader)
    .bind(&merged.upload_date)
    .bind(&merged.description)
    .bind(serde_json::to_string(&merged.tags)?)
    .bind(serde_json::to_string(&merged.chapters)?)
    .bind(&merged.thumbnail_local_path)
    .bind(&merged.checksum)
    .bind(&merged.audio_file_path)
    .bind(merged.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_claim(tx: &mut Transaction<'_, Sqlite>, claim: &Claim) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO claims (claim_id, source_id, canonical_text, claim_type, speaker,
             epistemic_value, actionability, novelty, verifiability, temporal_stability, scope,
             profile_scores, best_profile, importance, tier, temporality, temporality_confidence)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&claim.claim_id)
    .bind(claim.source_id.as_str())
    .bind(&claim.canonical_text)
    .bind(claim.claim_type.as_str())
    .bind(&claim.speaker)
    .bind(claim.dimensions.map(|d| d.epistemic_value))
    .bind(claim.dimensions.map(|d| d.actionability))
    .bind(claim.dimensions.map(|d| d.novelty))
    .bind(claim.dimensions.map(|d| d.verifiability))
    .bind(claim.dimensions.map(|d| d.temporal_stability))
    .bind(claim.dimensions.map(|d| d.scope))
    .bind(
        claim
            .profile_scores
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(&claim.best_profile)
    .bind(claim.importance())
    .bind(claim.tier.map(|t| t.as_str()))
    .bind(claim.temporality.map(|t| t.temporality.as_str()))
    .bind(claim.temporality.map(|t| t.confidence))
    .execute(&mut **tx)
    .await?;

    for span in &claim.evidence {
        sqlx::query(
            r#"INSERT INTO evidence_spans (claim_id, sequence, t0, t1, quote, context_text, context_type)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&claim.claim_id)
        .bind(span.sequence)
        .bind(span.t0.as_seconds().min(span.t1.as_seconds()))
        .bind(span.t1.as_seconds().max(span.t0.as_seconds()))
        .bind(&span.quote)
        .bind(&span.context_text)
        .bind(span.context_type.as_str())
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query("INSERT INTO claims_fts (claim_id, canonical_text) VALUES (?, ?)")
        .bind(&claim.claim_id)
        .bind(&claim.canonical_text)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Insert or merge one entity row, returning the id the evidence attaches
/// to. Dedup key is `(source_id, normalized_name)`.
async fn upsert_entity(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    source_id: &SourceId,
    entity_id: &str,
    name: &str,
    definition: Option<&str>,
    domain: Option<&str>,
    aliases: &[String],
    attribution_column: &str,
    attribution: Option<&str>,
    quality_score: Option<f64>,
) -> Result<String, StoreError> {
    let normalized = normalize_name(name);
    let lookup_sql =
        format!("SELECT entity_id FROM {table} WHERE source_id = ? AND normalized_name = ?");
    let existing: Option<String> = sqlx::query(&lookup_sql)
        .bind(source_id.as_str())
        .bind(&normalized)
        .fetch_optional(&mut **tx)
        .await?
        .map(|r| r.try_get("entity_id"))
        .transpose()?;

    if let Some(existing_id) = existing {
        // Merge: fill definition/score when absent
        let update_sql = format!(
            "UPDATE {table} SET definition = COALESCE(definition, ?), quality_score = COALESCE(?, quality_score) WHERE entity_id = ?"
        );
        if table == "people" {
            let update_sql =
                format!("UPDATE {table} SET quality_score = COALESCE(?, quality_score) WHERE entity_id = ?");
            sqlx::query(&update_sql)
                .bind(quality_score)
                .bind(&existing_id)
                .execute(&mut **tx)
                .await?;
        } else {
            sqlx::query(&update_sql)
                .bind(definition)
                .bind(quality_score)
                .bind(&existing_id)
                .execute(&mut **tx)
                .await?;
        }
        return Ok(existing_id);
    }

    let insert_sql = if table == "people" {
        format!(
            "INSERT INTO {table} (entity_id, source_id, name, normalized_name, aliases, {attribution_column}, quality_score)
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
    } else {
        format!(
            "INSERT INTO {table} (entity_id, source_id, name, normalized_name, definition, domain, aliases, {attribution_column}, quality_score)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
    };

    let mut query = sqlx::query(&insert_sql)
        .bind(entity_id)
        .bind(source_id.as_str())
        .bind(name)
        .bind(&normalized);
    if table != "people" {
        query = query.bind(definition).bind(domain);
    }
    query = query
        .bind(serde_json::to_string(aliases)?)
        .bind(attribution)
        .bind(quality_score);
    query.execute(&mut **tx).await?;
    Ok(entity_id.to_string())
}

async fn append_entity_evidence(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    entity_id: &str,
    evidence: &[EntityEvidence],
) -> Result<usize, StoreError> {
    let seq_sql = format!("SELECT COALESCE(MAX(sequence) + 1, 0) AS next FROM {table} WHERE entity_id = ?");
    let mut next: i64 = sqlx::query(&seq_sql)
        .bind(entity_id)
        .fetch_one(&mut **tx)
        .await?
        .try_get("next")?;

    let insert_sql = format!(
        "INSERT INTO {table} (entity_id, claim_id, sequence, t0, t1, quote, context_text, context_type)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    );
    for span in evidence {
        sqlx::query(&insert_sql)
            .bind(entity_id)
            .bind(&span.claim_id)
            .bind(next)
            .bind(span.t0.as_seconds().min(span.t1.as_seconds()))
            .bind(span.t1.as_seconds().max(span.t0.as_seconds()))
            .bind(&span.quote)
            .bind(&span.context_text)
            .bind(span.context_type.as_str())
            .execute(&mut **tx)
            .await?;
        next += 1;
    }
    Ok(evidence.len())
}

async fn store_jargon(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: &SourceId,
    terms: &[JargonTerm],
    receipt: &mut StoreReceipt,
) -> Result<usize, StoreError> {
    let mut written = 0;
    for term in terms {
        let id = upsert_entity(
            tx,
            "jargon_terms",
            source_id,
            &term.entity_id,
            &term.name,
            term.definition.as_deref(),
            term.domain.as_deref(),
            &term.aliases,
            "introduced_by",
            term.introduced_by.as_deref(),
            term.quality_score,
        )
        .await?;
        receipt.entity_evidence +=
            append_entity_evidence(tx, "jargon_evidence", &id, &term.evidence).await?;
        written += 1;
    }
    Ok(written)
}

async fn store_people(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: &SourceId,
    people: &[Person],
    receipt: &mut StoreReceipt,
) -> Result<usize, StoreError> {
    let mut written = 0;
    for person in people {
        let id = upsert_entity(
            tx,
            "people",
            source_id,
            &person.entity_id,
            &person.name,
            None,
            None,
            &person.aliases,
            "mentioned_by",
            person.mentioned_by.as_deref(),
            person.quality_score,
        )
        .await?;
        receipt.entity_evidence +=
            append_entity_evidence(tx, "person_evidence", &id, &person.evidence).await?;
        written += 1;
    }
    Ok(written)
}

async fn store_mental_models(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: &SourceId,
    models: &[MentalModel],
    receipt: &mut StoreReceipt,
) -> Result<usize, StoreError> {
    let mut written = 0;
    for model in models {
        let id = upsert_entity(
            tx,
            "mental_models",
            source_id,
            &model.entity_id,
            &model.name,
            model.definition.as_deref(),
            None,
            &model.aliases,
            "advocated_by",
            model.advocated_by.as_deref(),
            model.quality_score,
        )
        .await?;
        receipt.entity_evidence +=
            append_entity_evidence(tx, "concept_evidence", &id, &model.evidence).await?;
        written += 1;
    }
    Ok(written)
}

fn row_to_claim(row: &sqlx::sqlite::SqliteRow) -> Result<Claim, StoreError> {
    let claim_type: String = row.try_get("claim_type")?;
    let profile_scores: Option<String> = row.try_get("profile_scores")?;
    let tier: Option<String> = row.try_get("tier")?;
    let temporality: Option<String> = row.try_get("temporality")?;

    let dimensions = match (
        row.try_get::<Option<f64>, _>("epistemic_value")?,
        row.try_get::<Option<f64>, _>("actionability")?,
        row.try_get::<Option<f64>, _>("novelty")?,
        row.try_get::<Option<f64>, _>("verifiability")?,
        row.try_get::<Option<f64>, _>("temporal_stability")?,
        row.try_get::<Option<f64>, _>("scope")?,
    ) {
        (Some(e), Some(a), Some(n), Some(v), Some(t), Some(s)) => {
            Some(quarry_core::DimensionScores::new(e, a, n, v, t, s))
        }
        _ => None,
    };

    Ok(Claim {
        claim_id: row.try_get("claim_id")?,
        source_id: SourceId::new(row.try_get::<String, _>("source_id")?),
        canonical_text: row.try_get("canonical_text")?,
        claim_type: ClaimType::parse(&claim_type).unwrap_or(ClaimType::Factual),
        speaker: row.try_get("speaker")?,
        evidence: Vec::new(),
        dimensions,
        profile_scores: profile_scores.and_then(|p| serde_json::from_str(&p).ok()),
        best_profile: row.try_get("best_profile")?,
        tier: tier.as_deref().and_then(Tier::parse),
        temporality: match (temporality, row.try_get::<Option<f64>, _>("temporality_confidence")?)
        {
            (Some(t), confidence) => parse_temporality(&t).map(|temporality| TemporalityJudgment {
                temporality,
                confidence: confidence.unwrap_or(0.5),
            }),
            _ => None,
        },
    })
}

fn parse_temporality(raw: &str) -> Option<Temporality> {
    match raw {
        "immediate" => Some(Temporality::Immediate),
        "short-term" => Some(Temporality::ShortTerm),
        "medium-term" => Some(Temporality::MediumTerm),
        "long-term" => Some(Temporality::LongTerm),
        "timeless" => Some(Temporality::Timeless),
        _ => None,
    }
}

fn row_to_span(row: &sqlx::sqlite::SqliteRow) -> Result<EvidenceSpan, StoreError> {
    let context_type: String = row.try_get("context_type")?;
    Ok(EvidenceSpan {
        sequence: row.try_get("sequence")?,
        t0: Timestamp::from_seconds(row.try_get("t0")?),
        t1: Timestamp::from_seconds(row.try_get("t1")?),
        quote: row.try_get("quote")?,
        context_text: row.try_get("context_text")?,
        context_type: ContextType::parse(&context_type).unwrap_or(ContextType::Exact),
    })
}
