//! Subxt-backed extrinsic submitter.

use crate::{
    AssetSpec, ChainError, ChainEvent, ChainResult, CreateVideoRequest, ExtrinsicOutcome,
    TxFailureKind, VideoCreator,
};
use async_trait::async_trait;
use sp_core::sr25519;
use std::collections::HashMap;
use std::sync::Arc;
use subxt::{
    dynamic::{tx, Value},
    tx::PairSigner,
    OnlineClient, PolkadotConfig,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the chain submitter.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Chain RPC WebSocket endpoint.
    pub rpc_url: String,
    /// Overall deadline per transaction, milliseconds.
    pub tx_timeout_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "ws://127.0.0.1:9944".to_string(),
            tx_timeout_ms: 60_000,
        }
    }
}

/// One collaborator signer plus the lock serializing its submissions.
struct SignerSlot {
    signer: PairSigner<PolkadotConfig, sr25519::Pair>,
    lock: Mutex<()>,
}

/// Subxt implementation of [`VideoCreator`].
///
/// Holds one signer per collaborator account; submissions for the same
/// collaborator queue on that signer's lock so nonces stay sequential.
pub struct SubxtVideoCreator {
    config: ChainConfig,
    client: RwLock<Option<OnlineClient<PolkadotConfig>>>,
    signers: HashMap<String, Arc<SignerSlot>>,
}

impl SubxtVideoCreator {
    /// Create a submitter with the given collaborator keypairs.
    pub fn new(config: ChainConfig, collaborators: Vec<(String, sr25519::Pair)>) -> Self {
        let signers = collaborators
            .into_iter()
            .map(|(account, pair)| {
                (
                    account,
                    Arc::new(SignerSlot {
                        signer: PairSigner::new(pair),
                        lock: Mutex::new(()),
                    }),
                )
            })
            .collect();

        Self {
            config,
            client: RwLock::new(None),
            signers,
        }
    }

    /// Collaborator accounts with a loaded signer.
    pub fn collaborators(&self) -> Vec<&str> {
        self.signers.keys().map(String::as_str).collect()
    }

    /// Connect lazily, reusing an existing client.
    async fn client(&self) -> ChainResult<OnlineClient<PolkadotConfig>> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }

        info!(rpc_url = %self.config.rpc_url, "Connecting to chain");
        let client = OnlineClient::<PolkadotConfig>::from_url(&self.config.rpc_url)
            .await
            .map_err(|e| ChainError::ApiNotConnected(e.to_string()))?;

        *self.client.write().await = Some(client.clone());
        Ok(client)
    }

    /// Drop the cached client so the next call reconnects.
    pub async fn disconnect(&self) {
        *self.client.write().await = None;
    }

    fn build_call(request: &CreateVideoRequest) -> impl subxt::tx::TxPayload {
        let assets = Value::named_composite([
            (
                "expected_data_size_fee",
                Value::u128(request.expected_data_object_state_bloat_bond),
            ),
            (
                "object_creation_list",
                Value::unnamed_composite([
                    asset_value(&request.media),
                    asset_value(&request.thumbnail),
                ]),
            ),
        ]);

        let meta = Value::named_composite([
            ("title", Value::from_bytes(request.title.as_bytes())),
            ("description", Value::from_bytes(request.description.as_bytes())),
            (
                "language",
                option_value(request.language.as_deref().map(|l| Value::from_bytes(l.as_bytes()))),
            ),
            (
                "category",
                option_value(
                    request.category_id.as_deref().map(|c| Value::from_bytes(c.as_bytes())),
                ),
            ),
            ("is_public", Value::bool(request.is_public)),
        ]);

        tx(
            "Content",
            "create_video",
            vec![
                // Collaborator acts through the channel's collaborator set.
                Value::unnamed_variant("Collaborator", vec![]),
                Value::u128(request.joystream_channel_id as u128),
                Value::named_composite([("assets", assets), ("meta", meta)]),
            ],
        )
    }
}

fn asset_value(asset: &AssetSpec) -> Value {
    Value::named_composite([
        ("size", Value::u128(asset.size as u128)),
        ("ipfs_content_id", Value::from_bytes(asset.content_hash.as_bytes())),
    ])
}

fn option_value(value: Option<Value>) -> Value {
    match value {
        Some(v) => Value::unnamed_variant("Some", vec![v]),
        None => Value::unnamed_variant("None", vec![]),
    }
}

/// Classify a dispatch error message into a failure kind.
fn classify_dispatch_error(message: &str) -> TxFailureKind {
    if message.contains("VoucherSizeLimitExceeded") {
        TxFailureKind::VoucherLimit
    } else {
        TxFailureKind::Other
    }
}

/// Whether a submission error never reached the transaction pool.
fn is_rejection(message: &str) -> bool {
    message.contains("Invalid Transaction")
        || message.contains("Transaction is outdated")
        || message.contains("Priority is too low")
        || message.contains("signature")
}

#[async_trait]
impl VideoCreator for SubxtVideoCreator {
    async fn create_video(&self, request: &CreateVideoRequest) -> ChainResult<ExtrinsicOutcome> {
        let slot = self
            .signers
            .get(&request.collaborator)
            .ok_or_else(|| ChainError::CollaboratorNotFound(request.collaborator.clone()))?
            .clone();

        let client = self.client().await?;
        let call = Self::build_call(request);

        // Serialize by signer: the chain nonce is sequential per account.
        let _guard = slot.lock.lock().await;

        debug!(
            channel_id = request.joystream_channel_id,
            collaborator = %request.collaborator,
            media_size = request.media.size,
            "Submitting create_video extrinsic"
        );

        let progress = match client
            .tx()
            .sign_and_submit_then_watch_default(&call, &slot.signer)
            .await
        {
            Ok(progress) => progress,
            Err(e) => {
                let message = e.to_string();
                if is_rejection(&message) {
                    warn!(error = %message, "create_video rejected before inclusion");
                    return Ok(ExtrinsicOutcome::Rejected { reason: message });
                }
                self.disconnect().await;
                return Err(ChainError::ApiNotConnected(message));
            }
        };

        let timeout = std::time::Duration::from_millis(self.config.tx_timeout_ms);
        let in_block = match tokio::time::timeout(timeout, progress.wait_for_finalized()).await {
            Ok(Ok(in_block)) => in_block,
            Ok(Err(e)) => {
                self.disconnect().await;
                return Err(ChainError::ApiNotConnected(e.to_string()));
            }
            Err(_) => {
                // The deadline cancels our watch, not the extrinsic; the
                // caller retries after re-reading state.
                return Ok(ExtrinsicOutcome::Rejected {
                    reason: format!("finalization watch timed out after {:?}", timeout),
                });
            }
        };

        match in_block.wait_for_success().await {
            Ok(events) => {
                let events = decode_events(&events);
                info!(
                    channel_id = request.joystream_channel_id,
                    events = events.len(),
                    "create_video finalized"
                );
                Ok(ExtrinsicOutcome::Finalized { events })
            }
            Err(subxt::Error::Runtime(dispatch_error)) => {
                let message = dispatch_error.to_string();
                warn!(
                    channel_id = request.joystream_channel_id,
                    error = %message,
                    "create_video dispatch failed"
                );
                Ok(ExtrinsicOutcome::Failed {
                    kind: classify_dispatch_error(&message),
                    message,
                })
            }
            Err(e) => {
                self.disconnect().await;
                Err(ChainError::Unknown(e.to_string()))
            }
        }
    }
}

/// Decode the events we care about from a finalized extrinsic.
fn decode_events(events: &subxt::blocks::ExtrinsicEvents<PolkadotConfig>) -> Vec<ChainEvent> {
    let mut decoded = Vec::new();
    for event in events.iter() {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable event");
                continue;
            }
        };

        let pallet = event.pallet_name().to_string();
        let variant = event.variant_name().to_string();
        let numbers: Vec<u64> = event
            .field_values()
            .map(|fields| fields.values().flat_map(unsigned_fields).collect())
            .unwrap_or_default();

        decoded.push(match (pallet.as_str(), variant.as_str()) {
            // Field layout: actor member id, channel id, video id, params,
            // then the registered data object ids.
            ("Content", "VideoCreated") if numbers.len() >= 3 => ChainEvent::VideoCreated {
                channel_id: numbers[1],
                video_id: numbers[2],
                data_object_ids: numbers[3..].to_vec(),
            },
            ("Storage", "DataObjectsUploaded") => ChainEvent::DataObjectsUploaded {
                object_ids: numbers,
            },
            _ => ChainEvent::Other { pallet, variant },
        });
    }
    decoded
}

/// Flatten every unsigned integer out of a dynamic value, in field order.
fn unsigned_fields(value: &subxt::dynamic::Value<u32>) -> Vec<u64> {
    use subxt::ext::scale_value::{Primitive, ValueDef};

    let mut out = Vec::new();
    match &value.value {
        ValueDef::Primitive(Primitive::U128(n)) => out.push(*n as u64),
        ValueDef::Composite(composite) => {
            for inner in composite.values() {
                out.extend(unsigned_fields(inner));
            }
        }
        ValueDef::Variant(variant) => {
            for inner in variant.values.values() {
                out.extend(unsigned_fields(inner));
            }
        }
        _ => {}
    }
    out
}
