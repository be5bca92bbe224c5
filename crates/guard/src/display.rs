//! Display sink
//!
//! The detection worker publishes annotated frames into a watch channel; the
//! UI side only ever reads snapshots from it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::annotate::AnnotatedFrame;

/// What the display shows right now
#[derive(Debug, Clone, Default)]
pub struct DisplayFrame {
    /// Run that produced the frame
    pub run: u64,
    pub frame: Option<Arc<AnnotatedFrame>>,
}

pub type DisplayReceiver = watch::Receiver<DisplayFrame>;

/// Write side of the display channel
#[derive(Debug, Clone)]
pub struct DisplayPublisher {
    tx: Arc<watch::Sender<DisplayFrame>>,
}

impl DisplayPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DisplayFrame::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> DisplayReceiver {
        self.tx.subscribe()
    }

    /// Replace the displayed frame
    pub fn publish(&self, run: u64, frame: AnnotatedFrame) {
        self.tx.send_replace(DisplayFrame {
            run,
            frame: Some(Arc::new(frame)),
        });
    }

    /// Clear the display if it still shows a frame from `run`
    pub fn clear(&self, run: u64) -> bool {
        self.tx.send_if_modified(|current| {
            if current.run == run && current.frame.is_some() {
                current.frame = None;
                true
            } else {
                false
            }
        })
    }

    pub fn current(&self) -> DisplayFrame {
        self.tx.borrow().clone()
    }
}

impl Default for DisplayPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirror the display into an image file until the channel closes.
///
/// Writes at most once per `interval`; a cleared display removes the file.
pub async fn write_previews(mut rx: DisplayReceiver, path: PathBuf, interval: Duration) {
    while rx.changed().await.is_ok() {
        let frame = rx.borrow_and_update().frame.clone();
        match frame {
            Some(frame) => {
                let target = path.clone();
                let result =
                    tokio::task::spawn_blocking(move || frame.image.save(&target)).await;
                match result {
                    Ok(Ok(())) => debug!("Preview written to {}", path.display()),
                    Ok(Err(e)) => warn!("Failed to write preview {}: {}", path.display(), e),
                    Err(e) => warn!("Preview writer task failed: {}", e),
                }
            }
            None => match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Preview cleared"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to clear preview {}: {}", path.display(), e),
            },
        }
        tokio::time::sleep(interval).await;
    }
}
