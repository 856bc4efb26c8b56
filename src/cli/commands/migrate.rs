//! shelf migrate - copy a legacy JSON export into the database.

use std::path::PathBuf;

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_ok};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Legacy inventory export (JSON)
    pub source: PathBuf,
}

pub fn run(ctx: &AppContext, args: &MigrateArgs) -> Result<()> {
    let mut engine = ctx.migration_engine()?;
    let summary = engine.migrate(&args.source)?;

    if ctx.json {
        return emit_ok(&summary);
    }

    let mut layout = HumanLayout::new();
    layout
        .title("Migration complete")
        .kv("Source", &args.source.display().to_string())
        .kv("Stores", &summary.stores_upserted.to_string())
        .kv("Categories", &summary.categories_upserted.to_string())
        .kv("Products", &summary.products_upserted.to_string())
        .kv("Prices", &summary.prices_upserted.to_string())
        .kv("Already migrated", &summary.already_migrated.to_string())
        .kv("Skipped", &summary.skipped.to_string());
    for record in &summary.skipped_records {
        layout.bullet(&format!("{} {}: {}", record.kind, record.key, record.reason));
    }
    emit_human(layout);
    Ok(())
}
