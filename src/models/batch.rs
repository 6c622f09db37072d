//! Write operations queued for one atomic batch.

use crate::models::entity::{Entity, EntityMetadata};
use crate::queue::Queue;
use std::sync::Arc;

/// Kind of write applied by a batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One tagged write: what to do, to which table, with which record.
#[derive(Clone)]
pub struct BatchOp {
    pub kind: OpKind,
    pub metadata: Arc<dyn EntityMetadata>,
    pub entity: Arc<dyn Entity>,
}

impl BatchOp {
    pub fn new(kind: OpKind, metadata: Arc<dyn EntityMetadata>, entity: Arc<dyn Entity>) -> Self {
        Self {
            kind,
            metadata,
            entity,
        }
    }

    pub fn add(metadata: Arc<dyn EntityMetadata>, entity: Arc<dyn Entity>) -> Self {
        Self::new(OpKind::Add, metadata, entity)
    }

    pub fn update(metadata: Arc<dyn EntityMetadata>, entity: Arc<dyn Entity>) -> Self {
        Self::new(OpKind::Update, metadata, entity)
    }

    pub fn delete(metadata: Arc<dyn EntityMetadata>, entity: Arc<dyn Entity>) -> Self {
        Self::new(OpKind::Delete, metadata, entity)
    }
}

impl std::fmt::Debug for BatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOp")
            .field("kind", &self.kind)
            .field("table", &self.metadata.table_name())
            .finish_non_exhaustive()
    }
}

/// Ordered unit of work. Executing it leaves the queue intact.
pub type TransactionBatch = Queue<BatchOp>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::TableMetadata;
    use crate::models::query::Row;
    use serde_json::json;

    #[test]
    fn test_batch_preserves_enqueue_order() {
        let meta: Arc<dyn EntityMetadata> = Arc::new(TableMetadata::new("T", "ID"));
        let row: Row = json!({"ID": 1}).as_object().unwrap().clone();
        let entity: Arc<dyn Entity> = Arc::new(row);

        let mut batch = TransactionBatch::new();
        batch.enqueue(BatchOp::add(meta.clone(), entity.clone()));
        batch.enqueue(BatchOp::update(meta.clone(), entity.clone()));
        batch.enqueue(BatchOp::delete(meta, entity));

        let kinds: Vec<OpKind> = batch.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OpKind::Add, OpKind::Update, OpKind::Delete]);
        assert_eq!(batch.size(), 3);
    }

    #[test]
    fn test_op_kind_display() {
        assert_eq!(OpKind::Add.to_string(), "add");
        assert_eq!(OpKind::Delete.to_string(), "delete");
    }
}
