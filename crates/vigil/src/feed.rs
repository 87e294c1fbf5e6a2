// ── Stdin feeder ──
//
// One `Inbound` JSON object per line, e.g.
// {"type":"heartbeat","alive_id":101,"timestamp":"2026-01-01T00:00:00Z"}

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use vigil_core::{Inbound, IngestHandle};

/// Forward every parsable line of `reader` to the ingest pool until EOF
/// or until the engine stops accepting input. Returns the number of
/// messages queued.
pub async fn feed_lines<R>(reader: R, ingest: IngestHandle) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(queued, "input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "reading input failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: Inbound = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "ignoring malformed input line");
                continue;
            }
        };
        if let Err(e) = ingest.send(message).await {
            debug!(error = %e, "ingest closed, stop reading input");
            break;
        }
        queued += 1;
    }
    queued
}
