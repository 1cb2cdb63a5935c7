use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use super::ingestion_queue::PipelineEvent;

/// Counts of the events seen by the handler, returned when the channel closes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineEventsSummary {
    pub nb_position_updates: usize,
    pub nb_failed: usize,
    pub nb_skipped: usize,
}

/// Consumes the events emitted by the ingestion queue until every queue handle is dropped
///
/// Handles events one by one, in emission order.
#[tracing::instrument(name = "Handling pipeline events", skip(events))]
pub async fn register_handler(mut events: UnboundedReceiver<PipelineEvent>) -> PipelineEventsSummary {
    let mut summary = PipelineEventsSummary::default();

    info!("📡 Waiting for pipeline events ...");

    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::PositionsUpdated {
                generation,
                decision,
                updates,
            } => {
                summary.nb_position_updates += updates.len();
                info!(
                    generation,
                    ?decision,
                    nb_updates = updates.len(),
                    "Positions updated"
                );
            }
            PipelineEvent::ItemFailed {
                sequence_index,
                item_id,
                error,
            } => {
                summary.nb_failed += 1;
                error!(sequence_index, %item_id, %error, "Item could not be ingested");
            }
            PipelineEvent::ItemSkipped {
                sequence_index,
                item_id,
                reason,
            } => {
                summary.nb_skipped += 1;
                warn!(sequence_index, %item_id, %reason, "Item skipped");
            }
        }
    }

    info!(?summary, "Pipeline events channel closed");
    summary
}
