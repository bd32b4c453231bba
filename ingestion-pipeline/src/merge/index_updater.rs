//! Phase 3 of the knowledge-graph merge: records which entity names and
//! relation pairs this document touched, independent of the unlimited
//! per-entity/per-relation chunk-id histories kept in `entity_chunks` and
//! `relation_chunks`.

use std::collections::HashMap;
use std::sync::Arc;

use common::domain::{EntityReferenceIndexEntry, RelationReferenceIndexEntry};
use common::error::AppError;
use common::kv::KvStore;

pub struct IndexUpdater {
    full_entities: Arc<dyn KvStore<EntityReferenceIndexEntry>>,
    full_relations: Arc<dyn KvStore<RelationReferenceIndexEntry>>,
}

impl IndexUpdater {
    pub fn new(
        full_entities: Arc<dyn KvStore<EntityReferenceIndexEntry>>,
        full_relations: Arc<dyn KvStore<RelationReferenceIndexEntry>>,
    ) -> Self {
        Self {
            full_entities,
            full_relations,
        }
    }

    pub async fn update(
        &self,
        doc_id: &str,
        entity_names: Vec<String>,
        relation_pairs: Vec<(String, String)>,
    ) -> Result<(), AppError> {
        let entity_entry = EntityReferenceIndexEntry {
            count: entity_names.len(),
            items: entity_names,
        };
        let relation_entry = RelationReferenceIndexEntry {
            count: relation_pairs.len(),
            items: relation_pairs,
        };

        self.full_entities
            .upsert(HashMap::from([(doc_id.to_string(), entity_entry)]))
            .await?;
        self.full_relations
            .upsert(HashMap::from([(doc_id.to_string(), relation_entry)]))
            .await?;
        Ok(())
    }
}
