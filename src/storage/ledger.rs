//! Collection counter reservation and primary/derived record commits.
//!
//! A batch reserves one item in its destination collection before doing any
//! expensive work ([`Ledger::reserve`]), and gives it back with
//! [`Ledger::compensate`] if anything later fails. The only caller of
//! `compensate` is the orchestrator's failure path.

use crate::error::{IngestError, StoreError};
use crate::model::{CollectionId, FileId, FileLink, NewFileRecord};
use crate::storage::DocumentDatabase;
use std::sync::Arc;
use tracing::{debug, warn};

/// Proof that a batch holds one reserved item in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub collection_id: CollectionId,
    pub owner: String,
    pub collection: String,
}

/// Ids of a committed audio/PDF record pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedPair {
    pub primary: FileId,
    pub derived: FileId,
}

#[derive(Clone)]
pub struct Ledger {
    db: Arc<dyn DocumentDatabase>,
}

impl Ledger {
    pub fn new(db: Arc<dyn DocumentDatabase>) -> Self {
        Self { db }
    }

    /// Atomically add one item to the destination collection.
    ///
    /// # Errors
    /// * [`IngestError::NotFound`]: the collection does not exist for `owner`
    /// * [`IngestError::Storage`]: any other database failure
    pub async fn reserve(&self, owner: &str, collection: &str) -> Result<Reservation, IngestError> {
        let collection_id = self
            .db
            .increment_counter(owner, collection, 1)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => IngestError::NotFound {
                    what: format!("collection '{collection}'"),
                },
                StoreError::Backend(msg) => {
                    IngestError::Storage(format!("counter increment failed: {msg}"))
                }
            })?;
        debug!("Reserved one item in '{}' ({})", collection, collection_id);

        Ok(Reservation {
            collection_id,
            owner: owner.to_string(),
            collection: collection.to_string(),
        })
    }

    /// Undo a [`reserve`](Self::reserve). Consumes the reservation so it can
    /// only be given back once.
    pub async fn compensate(&self, reservation: Reservation) -> Result<(), IngestError> {
        self.db
            .increment_counter(&reservation.owner, &reservation.collection, -1)
            .await
            .map_err(|e| {
                warn!(
                    "Compensating decrement failed for '{}': {}",
                    reservation.collection, e
                );
                IngestError::Storage(format!("counter decrement failed: {e}"))
            })?;
        debug!("Released reservation in '{}'", reservation.collection);
        Ok(())
    }

    /// Write `primary`, then `derived` pointing at it.
    ///
    /// The link fields of both records are overwritten here. If the derived
    /// write fails the primary stays in the database and the error is
    /// [`IngestError::StorageInconsistency`] carrying its id.
    pub async fn commit_pair(
        &self,
        mut primary: NewFileRecord,
        mut derived: NewFileRecord,
    ) -> Result<CommittedPair, IngestError> {
        primary.link = FileLink::Primary;
        let primary_id = self
            .db
            .insert_file(primary)
            .await
            .map_err(|e| IngestError::Storage(format!("primary record insert failed: {e}")))?;

        derived.link = FileLink::Derived {
            primary_id: primary_id.clone(),
        };
        let derived_id = match self.db.insert_file(derived).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Derived record insert failed; primary {} left in place", primary_id);
                return Err(IngestError::StorageInconsistency {
                    primary_id: primary_id.0,
                    detail: e.to_string(),
                });
            }
        };

        Ok(CommittedPair {
            primary: primary_id,
            derived: derived_id,
        })
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}
