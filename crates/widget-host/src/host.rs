//! Frame loop: line-delimited `CommMessage` JSON in, outbound frames out.

use crate::config::HostConfig;
use crate::router::CommRouter;
use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use widget_core::{BaseWidget, CommManager, CommMessage};

/// Run the host until `input` is exhausted.
///
/// Startup widgets are opened first. Each input line is one frame from the
/// front end; frames that fail to parse or to apply are logged and skipped.
/// On end of input every widget is closed and the remaining frames flushed.
pub async fn run<R, W>(config: &HostConfig, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (manager, mut outbound) = CommManager::new();
    let mut router = CommRouter::new(manager, config.accept_remote);

    for _ in 0..config.widgets {
        let comm_id = router.open_widget(BaseWidget, config.display)?;
        info!("Widget {} ready", comm_id);
    }

    let mut lines = input.lines();
    loop {
        tokio::select! {
            biased;

            // Outbound frames go out before the next inbound line is read
            Some(frame) = outbound.recv() => {
                write_frame(&mut output, &frame).await?;
            }

            line = lines.next_line() => {
                match line? {
                    Some(line) => handle_line(&mut router, &line),
                    None => {
                        info!("Input closed");
                        break;
                    }
                }
            }
        }
    }

    let closed = router.close_all();
    info!("Closed {} widget(s)", closed);
    while let Ok(frame) = outbound.try_recv() {
        write_frame(&mut output, &frame).await?;
    }
    output.flush().await?;
    Ok(())
}

fn handle_line(router: &mut CommRouter, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let Some(frame) = CommMessage::from_json(line.as_bytes()) else {
        warn!("Ignoring malformed frame: {}", line);
        return;
    };

    let msg_type = frame.msg_type();
    let comm_id = frame.comm_id().clone();
    debug!("Inbound {} for {}", msg_type, comm_id);
    if let Err(e) = router.dispatch(frame) {
        warn!("Failed to handle {} for {}: {}", msg_type, comm_id, e);
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(output: &mut W, frame: &CommMessage) -> Result<()> {
    let mut line = frame.to_json()?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
