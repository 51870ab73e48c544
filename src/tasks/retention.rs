//! Cleanup of old raw rasters.

use crate::config::RetentionParams;
use crate::store::Store;
use crate::types::{AqResult, RasterRef};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionSummary {
    pub examined: usize,
    pub deleted: usize,
    /// Old rasters kept because a corrected grid exists
    pub kept_corrected: usize,
    pub failed: usize,
}

/// Delete raw raster records (and files) older than the retention window
///
/// A raster with a corrected output is never deleted.
pub fn cleanup_raw_rasters(store: &dyn Store, params: &RetentionParams, today: NaiveDate) -> AqResult<RetentionSummary> {
    let cutoff = today
        .checked_sub_days(Days::new(u64::from(params.raw_retention_days)))
        .unwrap_or(NaiveDate::MIN);
    let mut summary = RetentionSummary::default();

    for raster in store.rasters_before(cutoff)? {
        summary.examined += 1;
        if raster.corrected().is_some() {
            summary.kept_corrected += 1;
            continue;
        }

        if params.delete_files {
            if let RasterRef::Path(path) = &raster.raw {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        log::warn!("Could not delete {}: {}", path.display(), e);
                        summary.failed += 1;
                        continue;
                    }
                }
            }
        }
        if store.delete_raster(raster.id)? {
            summary.deleted += 1;
        }
    }

    log::info!(
        "Retention before {}: {} examined, {} deleted, {} kept (corrected), {} failed",
        cutoff,
        summary.examined,
        summary.deleted,
        summary.kept_corrected,
        summary.failed
    );
    Ok(summary)
}
