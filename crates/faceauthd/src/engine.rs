use faceauth_core::{EncodeError, FaceEncoder, FeatureVector};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Encode {
        image: PathBuf,
        reply: oneshot::Sender<Result<FeatureVector, EncodeError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Encode the image stored at `image`. The file must stay in place until
    /// this returns.
    pub async fn encode(&self, image: PathBuf) -> Result<FeatureVector, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Run `encoder` on a dedicated OS thread.
///
/// Encoders hold inference sessions that need exclusive access, so every
/// encode is serialized through one bounded queue.
pub fn spawn_engine(
    mut encoder: Box<dyn FaceEncoder>,
    queue_depth: usize,
) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("faceauth-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { image, reply } => {
                        let started = std::time::Instant::now();
                        let result = encoder.encode_file(&image);
                        tracing::debug!(
                            path = %image.display(),
                            ok = result.is_ok(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "encode finished"
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
