use tracing::{info, warn};

use crate::{
    models::EpisodeRecord,
    resolver::{self, ArchiveLayout, Probe, SearchWindow},
};

/// Resolve every selected record in order. Records with no archive file in the
/// window are logged and left out; they are not retried.
pub async fn resolve_all<'a, P: Probe>(
    selected: &[&'a EpisodeRecord],
    probe: &P,
    layout: &ArchiveLayout,
    window: SearchWindow,
) -> Vec<(&'a EpisodeRecord, String)> {
    let mut resolved = Vec::with_capacity(selected.len());

    for record in selected {
        let date = record.broadcast_date;
        info!("Looking for the archive file of {date}");
        match resolver::resolve(date, probe, layout, window).await {
            Some(url) => {
                if !record.set_resolved_url(url) {
                    warn!("{date} was already resolved, keeping the earlier URL");
                }
                if let Some(url) = record.resolved_url() {
                    resolved.push((*record, url.to_string()));
                }
            }
            None => warn!("No download found for the episode of the {date}, skipping it"),
        }
    }

    resolved
}
