//! Idempotent copy of a legacy document into the inventory schema.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, ShelfError};
use crate::storage::inventory::{
    NewPrice, NewProduct, NewStore, find_product, find_store, ledger_entry, record_ledger,
    upsert_category, upsert_price, upsert_product, upsert_store,
};
use crate::storage::sqlite::is_connectivity_loss;
use crate::storage::{Database, OperationKind, OperationLock};

use super::legacy::{
    LegacyDocument, LegacyPrice, LegacyProduct, LegacyStore, RecordKind, SkippedRecord,
};

/// Totals for one migration run.
///
/// Store, category and product counts include records that matched an
/// existing row, so re-running the same file reports the same totals.
/// `prices_upserted` only counts rows written by this run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub stores_upserted: usize,
    pub categories_upserted: usize,
    pub products_upserted: usize,
    pub prices_upserted: usize,
    /// Prices skipped because the ledger already has them
    pub already_migrated: usize,
    pub skipped: usize,
    pub skipped_records: Vec<SkippedRecord>,
}

impl MigrationSummary {
    fn skip(&mut self, record: SkippedRecord) {
        warn!(
            kind = %record.kind,
            key = %record.key,
            reason = %record.reason,
            "skipping legacy record"
        );
        self.skipped += 1;
        self.skipped_records.push(record);
    }
}

/// Copies legacy inventory into the relational schema.
#[derive(Debug)]
pub struct MigrationEngine {
    db: Database,
    lock_dir: PathBuf,
}

impl MigrationEngine {
    pub fn new(db: Database) -> Self {
        let lock_dir = db
            .path()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self { db, lock_dir }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Migrate the legacy file at `source`.
    pub fn migrate(&mut self, source: &Path) -> Result<MigrationSummary> {
        let raw = std::fs::read_to_string(source).map_err(|err| {
            ShelfError::SourceUnreadable(format!("{}: {err}", source.display()))
        })?;
        let doc = LegacyDocument::parse(&raw)?;
        info!(source = %source.display(), "migrating legacy inventory");
        self.migrate_document(&doc)
    }

    /// Migrate an already decoded document under the migration lock.
    pub fn migrate_document(&mut self, doc: &LegacyDocument) -> Result<MigrationSummary> {
        let _lock = OperationLock::try_acquire(&self.lock_dir, OperationKind::Migration, None)?;

        let mut summary = MigrationSummary::default();
        for record in &doc.rejected {
            summary.skip(record.clone());
        }

        for store in &doc.stores {
            let outcome = self.migrate_store(store);
            if self.settle(outcome, RecordKind::Store, &store.name, &mut summary)? {
                summary.stores_upserted += 1;
            }
        }
        for category in &doc.categories {
            let outcome = upsert_category(self.db.conn(), category).map(|_| ());
            if self.settle(outcome, RecordKind::Category, category, &mut summary)? {
                summary.categories_upserted += 1;
            }
        }
        for product in &doc.products {
            let outcome = self.migrate_product(product);
            if self.settle(outcome, RecordKind::Product, &product.name, &mut summary)? {
                summary.products_upserted += 1;
            }
        }
        for price in &doc.prices {
            let key = price.source_key();
            match self.migrate_price(price, &key) {
                Ok(PriceOutcome::Written(row_id)) => {
                    debug!(key = %key, row_id, "price migrated");
                    summary.prices_upserted += 1;
                }
                Ok(PriceOutcome::AlreadyMigrated) => summary.already_migrated += 1,
                Err(err) => {
                    self.settle(Err(err), RecordKind::Price, &key, &mut summary)?;
                }
            }
        }

        info!(
            stores = summary.stores_upserted,
            categories = summary.categories_upserted,
            products = summary.products_upserted,
            prices = summary.prices_upserted,
            already_migrated = summary.already_migrated,
            skipped = summary.skipped,
            "migration finished"
        );
        Ok(summary)
    }

    /// Turn a per-record failure into a skip, or abort the run when the
    /// database itself is gone. Returns whether the record went through.
    fn settle(
        &self,
        outcome: Result<()>,
        kind: RecordKind,
        key: &str,
        summary: &mut MigrationSummary,
    ) -> Result<bool> {
        match outcome {
            Ok(()) => Ok(true),
            Err(ShelfError::Database(err)) if is_connectivity_loss(&err) => {
                Err(ShelfError::MigrationAborted(format!(
                    "database unavailable while migrating {kind} '{key}': {err}"
                )))
            }
            Err(ShelfError::Io(err)) => Err(ShelfError::MigrationAborted(format!(
                "I/O failure while migrating {kind} '{key}': {err}"
            ))),
            Err(ShelfError::MalformedRecord { reason, .. }) => {
                summary.skip(SkippedRecord::new(kind, key, reason));
                Ok(false)
            }
            Err(err) => {
                summary.skip(SkippedRecord::new(kind, key, err.to_string()));
                Ok(false)
            }
        }
    }

    fn migrate_store(&self, store: &LegacyStore) -> Result<()> {
        upsert_store(
            self.db.conn(),
            &NewStore {
                name: &store.name,
                location: store.location.as_deref(),
                website: store.website.as_deref(),
            },
        )?;
        Ok(())
    }

    fn migrate_product(&mut self, product: &LegacyProduct) -> Result<()> {
        let tx = self.db.transaction()?;
        let category_id = match &product.category {
            Some(name) => Some(upsert_category(&tx, name)?.id),
            None => None,
        };
        upsert_product(
            &tx,
            &NewProduct {
                name: &product.name,
                category_id,
                brands: &product.brands,
                synonyms: &product.synonyms,
            },
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Ledger check, upsert and ledger write commit together or not at all.
    fn migrate_price(&mut self, price: &LegacyPrice, key: &str) -> Result<PriceOutcome> {
        let tx = self
            .db
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if ledger_entry(&tx, key)?.is_some() {
            return Ok(PriceOutcome::AlreadyMigrated);
        }

        let store_id = find_store(&tx, &price.store)?
            .ok_or_else(|| malformed(key, format!("unknown store '{}'", price.store)))?;
        let product_id = find_product(&tx, &price.product)?
            .ok_or_else(|| malformed(key, format!("unknown product '{}'", price.product)))?;

        let last_updated = price
            .last_updated
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        let row_id = upsert_price(
            &tx,
            &NewPrice {
                store_id,
                product_id,
                unit: price.unit.trim(),
                price: price.price,
                in_stock: price.in_stock,
                last_updated: &last_updated,
            },
        )?;
        record_ledger(&tx, key, row_id)?;
        tx.commit()?;
        Ok(PriceOutcome::Written(row_id))
    }
}

enum PriceOutcome {
    Written(i64),
    AlreadyMigrated,
}

fn malformed(key: &str, reason: String) -> ShelfError {
    ShelfError::MalformedRecord {
        kind: RecordKind::Price.to_string(),
        key: key.to_string(),
        reason,
    }
}
