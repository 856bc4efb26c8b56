//! Natural-key upserts over the inventory tables and the migration ledger.
//!
//! Every function takes a plain `&Connection` so it can run either on the
//! database handle directly or inside a `Transaction` (which derefs to one).

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::error::Result;

/// Outcome of a natural-key upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: i64,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStore<'a> {
    pub name: &'a str,
    pub location: Option<&'a str>,
    pub website: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct<'a> {
    pub name: &'a str,
    pub category_id: Option<i64>,
    pub brands: &'a [String],
    pub synonyms: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPrice<'a> {
    pub store_id: i64,
    pub product_id: i64,
    pub unit: &'a str,
    pub price: f64,
    pub in_stock: bool,
    pub last_updated: &'a str,
}

/// One row of `migration_ledger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationLedgerEntry {
    pub source_key: String,
    pub target_row_id: i64,
    pub migrated_at: String,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

pub fn find_store(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM stores WHERE name = ?", [name], |row| row.get(0))
        .optional()?)
}

pub fn find_product(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM products WHERE name = ?", [name], |row| row.get(0))
        .optional()?)
}

/// Insert the store if no store has this name. An existing row is never
/// modified.
pub fn upsert_store(conn: &Connection, store: &NewStore<'_>) -> Result<Upserted> {
    if let Some(id) = find_store(conn, store.name)? {
        return Ok(Upserted { id, created: false });
    }
    conn.execute(
        "INSERT INTO stores (name, location, website, created_at) VALUES (?, ?, ?, ?)",
        params![store.name, store.location, store.website, now()],
    )?;
    Ok(Upserted {
        id: conn.last_insert_rowid(),
        created: true,
    })
}

pub fn upsert_category(conn: &Connection, name: &str) -> Result<Upserted> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM categories WHERE name = ?", [name], |row| row.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(Upserted { id, created: false });
    }
    conn.execute(
        "INSERT INTO categories (name, created_at) VALUES (?, ?)",
        params![name, now()],
    )?;
    Ok(Upserted {
        id: conn.last_insert_rowid(),
        created: true,
    })
}

/// Insert the product, or merge brand and synonym lists into the existing
/// row as a set union. Existing list order is kept and a category set after
/// import is left alone.
pub fn upsert_product(conn: &Connection, product: &NewProduct<'_>) -> Result<Upserted> {
    let existing: Option<(i64, Option<i64>, String, String)> = conn
        .query_row(
            "SELECT id, category_id, brands_json, synonyms_json FROM products WHERE name = ?",
            [product.name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((id, category_id, brands_json, synonyms_json)) = existing else {
        conn.execute(
            "INSERT INTO products (name, category_id, brands_json, synonyms_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                product.name,
                product.category_id,
                serde_json::to_string(&union(&[], product.brands))?,
                serde_json::to_string(&union(&[], product.synonyms))?,
                now(),
                now(),
            ],
        )?;
        return Ok(Upserted {
            id: conn.last_insert_rowid(),
            created: true,
        });
    };

    let old_brands = decode_list(&brands_json);
    let old_synonyms = decode_list(&synonyms_json);
    let brands = union(&old_brands, product.brands);
    let synonyms = union(&old_synonyms, product.synonyms);
    let category = category_id.or(product.category_id);

    if brands != old_brands || synonyms != old_synonyms || category != category_id {
        conn.execute(
            "UPDATE products SET brands_json = ?, synonyms_json = ?, category_id = ?, updated_at = ? \
             WHERE id = ?",
            params![
                serde_json::to_string(&brands)?,
                serde_json::to_string(&synonyms)?,
                category,
                now(),
                id,
            ],
        )?;
    }

    Ok(Upserted { id, created: false })
}

/// Insert or update the `(store, product, unit)` price row, returning its id.
pub fn upsert_price(conn: &Connection, price: &NewPrice<'_>) -> Result<i64> {
    let id = conn.query_row(
        "INSERT INTO store_products (store_id, product_id, unit, price, in_stock, last_updated) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (store_id, product_id, unit) DO UPDATE SET \
             price = excluded.price, \
             in_stock = excluded.in_stock, \
             last_updated = excluded.last_updated \
         RETURNING id",
        params![
            price.store_id,
            price.product_id,
            price.unit,
            price.price,
            price.in_stock,
            price.last_updated,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn ledger_entry(conn: &Connection, source_key: &str) -> Result<Option<MigrationLedgerEntry>> {
    Ok(conn
        .query_row(
            "SELECT source_key, target_row_id, migrated_at FROM migration_ledger WHERE source_key = ?",
            [source_key],
            |row| {
                Ok(MigrationLedgerEntry {
                    source_key: row.get(0)?,
                    target_row_id: row.get(1)?,
                    migrated_at: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn record_ledger(
    conn: &Connection,
    source_key: &str,
    target_row_id: i64,
) -> Result<MigrationLedgerEntry> {
    let entry = MigrationLedgerEntry {
        source_key: source_key.to_string(),
        target_row_id,
        migrated_at: now(),
    };
    conn.execute(
        "INSERT INTO migration_ledger (source_key, target_row_id, migrated_at) VALUES (?, ?, ?)",
        params![entry.source_key, entry.target_row_id, entry.migrated_at],
    )?;
    Ok(entry)
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Case-insensitive set union keeping `existing` order, then new entries in
/// input order. Blank entries are dropped.
fn union(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(existing.len() + incoming.len());
    for value in existing.iter().chain(incoming) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(value)) {
            out.push(value.to_string());
        }
    }
    out
}
