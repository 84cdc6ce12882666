//! Amazon Bedrock bidirectional stream transport.
//!
//! Opens `InvokeModelWithBidirectionalStream` against the configured model.
//! Outbound events become input chunks; output chunks are delivered as UTF-8
//! JSON text. A stream that fails to start surfaces as the first receive
//! error.
//!
//! # Authentication
//!
//! Explicit keys are used when both the access key id and the secret are
//! set. Otherwise the default AWS credential chain applies (environment,
//! profile, IAM role).

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use aws_config::BehaviorVersion;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_bedrockruntime::types::{
    BidirectionalInputPayloadPart, InvokeModelWithBidirectionalStreamInput,
    InvokeModelWithBidirectionalStreamOutput,
};
use aws_smithy_types::Blob;

use super::{
    CONNECTION_TIMEOUT, DuplexChannel, EventSink, EventSource, TransportConnector, TransportError,
    TransportResult,
};

/// Settings for the Bedrock connector.
#[derive(Debug, Clone)]
pub struct BedrockSettings {
    pub region: String,
    pub model_id: String,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
}

/// Connector for the Bedrock runtime.
#[derive(Debug, Clone)]
pub struct BedrockConnector {
    settings: BedrockSettings,
}

impl BedrockConnector {
    pub fn new(settings: BedrockSettings) -> Self {
        Self { settings }
    }

    async fn load_sdk_config(&self) -> aws_types::SdkConfig {
        let region = aws_config::Region::new(self.settings.region.clone());
        match (
            &self.settings.aws_access_key_id,
            &self.settings.aws_secret_access_key,
        ) {
            (Some(key_id), Some(secret)) => {
                let credentials = aws_credential_types::Credentials::new(
                    key_id,
                    secret,
                    self.settings.aws_session_token.clone(),
                    None,
                    "sonic-bridge",
                );
                aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials)
                    .load()
                    .await
            }
            _ => {
                aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await
            }
        }
    }
}

#[async_trait]
impl TransportConnector for BedrockConnector {
    async fn open(&self) -> TransportResult<DuplexChannel> {
        let sdk_config = self.load_sdk_config().await;
        let client = BedrockClient::new(&sdk_config);
        let model_id = self.settings.model_id.clone();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportResult<String>>();

        tokio::spawn(async move {
            // Ends when the sink's sender is dropped on close.
            let input_stream = async_stream::stream! {
                while let Some(event) = out_rx.recv().await {
                    let part = BidirectionalInputPayloadPart::builder()
                        .bytes(Blob::new(event.into_bytes()))
                        .build();
                    yield Ok(InvokeModelWithBidirectionalStreamInput::Chunk(part));
                }
                debug!("Bedrock input stream finished");
            };

            // The service answers only once input flows, so events queued by
            // the session before this resolves are buffered in `out_rx`.
            let response = tokio::time::timeout(
                CONNECTION_TIMEOUT,
                client
                    .invoke_model_with_bidirectional_stream()
                    .model_id(model_id)
                    .body(input_stream.into())
                    .send(),
            )
            .await;

            let mut output = match response {
                Ok(Ok(output)) => {
                    info!("Bedrock bidirectional stream open");
                    output
                }
                Ok(Err(e)) => {
                    let err = TransportError::ConnectionFailed(format!(
                        "Bedrock stream failed to start: {}",
                        e
                    ));
                    error!("{}", err);
                    let _ = in_tx.send(Err(err));
                    return;
                }
                Err(_) => {
                    error!("Timed out waiting for Bedrock stream");
                    let _ = in_tx.send(Err(TransportError::Timeout(
                        "waiting for Bedrock stream".to_string(),
                    )));
                    return;
                }
            };

            loop {
                match output.body.recv().await {
                    Ok(Some(InvokeModelWithBidirectionalStreamOutput::Chunk(part))) => {
                        let Some(bytes) = part.bytes() else {
                            continue;
                        };
                        match String::from_utf8(bytes.as_ref().to_vec()) {
                            Ok(text) => {
                                if in_tx.send(Ok(text)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = in_tx.send(Err(TransportError::ReceiveFailed(format!(
                                    "non UTF-8 chunk: {}",
                                    e
                                ))));
                                break;
                            }
                        }
                    }
                    Ok(Some(_)) => {
                        debug!("Received unknown event type from Bedrock");
                    }
                    Ok(None) => {
                        info!("Bedrock stream ended");
                        break;
                    }
                    Err(e) => {
                        error!("Bedrock stream error: {}", e);
                        let _ = in_tx.send(Err(TransportError::ReceiveFailed(e.to_string())));
                        break;
                    }
                }
            }
        });

        debug!(
            "Bedrock stream requested (model {}, region {})",
            self.settings.model_id, self.settings.region
        );

        Ok(DuplexChannel {
            sink: Arc::new(BedrockSink {
                tx: parking_lot::Mutex::new(Some(out_tx)),
                closed: AtomicBool::new(false),
            }),
            source: Box::new(BedrockSource { rx: in_rx }),
        })
    }

    fn name(&self) -> &'static str {
        "bedrock"
    }
}

struct BedrockSink {
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    closed: AtomicBool,
}

#[async_trait]
impl EventSink for BedrockSink {
    async fn send(&self, event: String) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.tx.lock().as_ref() {
            Some(tx) => tx
                .send(event)
                .map_err(|_| TransportError::SendFailed("input stream stopped".to_string())),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        // Dropping the sender ends the input stream.
        self.tx.lock().take();
        Ok(())
    }
}

struct BedrockSource {
    rx: mpsc::UnboundedReceiver<TransportResult<String>>,
}

#[async_trait]
impl EventSource for BedrockSource {
    async fn receive(&mut self) -> TransportResult<Option<String>> {
        self.rx.recv().await.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_name() {
        let connector = BedrockConnector::new(BedrockSettings {
            region: "us-east-1".to_string(),
            model_id: "amazon.nova-sonic-v1:0".to_string(),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_session_token: None,
        });
        assert_eq!(connector.name(), "bedrock");
    }
}
