// Copyright (C) 2023 Felix Huettner
//
// This file is part of DTRD.
//
// DTRD is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DTRD is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Per-connection IPC state machine (§5, §6). One task per client, spawned
//! by `agent::Daemon`, talking directly to `registrationagent` and
//! `bundlestorageagent` over their `SystemService` registries the same way
//! `tcpclconverganceagent::session_agent` talks to `bundlestorageagent` from
//! a convergence-layer session.
//!
//! `recv`/`peek` block this task on the client's timeout the way the spec
//! describes ("suspends the IPC worker for this session, not the whole
//! daemon"); `begin-poll` is the one request that does not block here, so a
//! `cancel-poll` racing a delivery can still be observed and answered.

use std::collections::VecDeque;
use std::time::Duration;

use actix::prelude::*;
use actix::MailboxError;
use bp7::block::{payload_block::PayloadBlock, Block, CanonicalBlock};
use bp7::blockflags::BlockFlags;
use bp7::bundle::Bundle;
use bp7::bundleflags::BundleFlags;
use bp7::crc::CRCType;
use bp7::endpoint::Endpoint;
use bp7::primaryblock::PrimaryBlock;
use bp7::time::{CreationTimestamp, DtnTime};
use futures_util::stream::SelectAll;
use futures_util::{SinkExt, StreamExt};
use log::warn;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bundlestorageagent::messages::{GetBundle, StoreNewBundle, UpdateBundle};
use crate::bundlestorageagent::State;
use crate::common::error::{AgentError, IpcStatus};
use crate::common::settings::Settings;
use crate::registrationagent::messages::{
    AckBundle, BindRegistration, DeliverBundle, FindRegistration, RegisterEndpoint,
    UnbindRegistration, UnregisterEndpoint,
};

use super::codec::IpcCodec;
use super::messages::{PayloadSpec, Request, Response};

/// A `begin-poll` waiting on a delivery or its own timeout to fire.
struct PendingPoll {
    deadline: Instant,
}

pub async fn run(stream: TcpStream, payload_memory_limit_bytes: u64, mut close_rx: oneshot::Receiver<()>) {
    let local_eid = match Endpoint::new(&Settings::from_env().my_node_id) {
        Some(eid) => eid,
        None => {
            warn!("my_node_id is not a valid endpoint, refusing IPC session");
            return;
        }
    };

    let (read_half, write_half) = stream.into_split();
    let mut framed_in = FramedRead::new(read_half, IpcCodec::new(payload_memory_limit_bytes));
    let mut framed_out = FramedWrite::new(write_half, IpcCodec::new(payload_memory_limit_bytes));

    let mut bound: Vec<u64> = Vec::new();
    let mut deliveries: SelectAll<ReceiverStream<DeliverBundle>> = SelectAll::new();
    let mut queue: VecDeque<DeliverBundle> = VecDeque::new();
    let mut pending_poll: Option<PendingPoll> = None;

    loop {
        let sleep = tokio::time::sleep_until(
            pending_poll
                .as_ref()
                .map(|p| p.deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(365 * 24 * 60 * 60)),
        );
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut close_rx => {
                break;
            }
            incoming = framed_in.next() => {
                match incoming {
                    Some(Ok(request)) => {
                        let frames = handle_request(
                            request,
                            &local_eid,
                            &mut bound,
                            &mut deliveries,
                            &mut queue,
                            &mut pending_poll,
                            payload_memory_limit_bytes,
                        )
                        .await;
                        if send_all(&mut framed_out, frames).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("IPC frame error, closing session: {:?}", e);
                        let _ = framed_out
                            .send((IpcStatus::CodecError, Response::Unit))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            delivery = deliveries.next(), if !deliveries.is_empty() => {
                if let Some(delivery) = delivery {
                    queue.push_back(delivery);
                    if pending_poll.take().is_some()
                        && send_all(&mut framed_out, vec![(IpcStatus::Success, Response::PollReady)])
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
            }
            () = &mut sleep, if pending_poll.is_some() => {
                pending_poll = None;
                if send_all(&mut framed_out, vec![(IpcStatus::Success, Response::PollTimedOut)])
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

async fn send_all(
    out: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, IpcCodec>,
    frames: Vec<(IpcStatus, Response)>,
) -> Result<(), super::codec::Errors> {
    for frame in frames {
        out.send(frame).await?;
    }
    Ok(())
}

/// Is this request one of the four legal during a poll wait (§5)?
fn legal_during_poll(request: &Request) -> bool {
    matches!(
        request,
        Request::Recv { .. } | Request::Peek { .. } | Request::SessionUpdate | Request::CancelPoll
    )
}

#[allow(clippy::too_many_arguments)]
async fn handle_request(
    request: Request,
    local_eid: &Endpoint,
    bound: &mut Vec<u64>,
    deliveries: &mut SelectAll<ReceiverStream<DeliverBundle>>,
    queue: &mut VecDeque<DeliverBundle>,
    pending_poll: &mut Option<PendingPoll>,
    payload_memory_limit_bytes: u64,
) -> Vec<(IpcStatus, Response)> {
    if pending_poll.is_some() && !legal_during_poll(&request) {
        return vec![(IpcStatus::IllegalAfterPoll, Response::Unit)];
    }

    match request {
        Request::LocalEid => vec![(
            IpcStatus::Success,
            Response::LocalEid {
                eid: local_eid.to_string(),
                service_tag: None,
            },
        )],

        Request::Register {
            pattern,
            pattern_kind,
            delivery_policy,
            replay_policy,
            bundle_ack_required,
            expiration,
            reg_token,
        } => {
            let msg = RegisterEndpoint {
                pattern: pattern_kind.into_pattern(pattern),
                delivery_policy: delivery_policy.into(),
                replay_policy: replay_policy.into(),
                bundle_ack_required,
                expiration,
                reg_token,
            };
            match crate::registrationagent::agent::Daemon::from_registry()
                .send(msg)
                .await
            {
                Ok(Ok(registration_id)) => {
                    vec![(IpcStatus::Success, Response::Registered { registration_id })]
                }
                Ok(Err(e)) => vec![(IpcStatus::from(&e), Response::Unit)],
                Err(_) => vec![(IpcStatus::InternalError, Response::Unit)],
            }
        }

        Request::Unregister { registration_id } => {
            agent_result(
                crate::registrationagent::agent::Daemon::from_registry()
                    .send(UnregisterEndpoint { registration_id })
                    .await,
                Response::Unit,
            )
        }

        Request::FindRegistration {
            destination,
            reg_token,
        } => {
            let Some(destination) = Endpoint::new(&destination) else {
                return vec![(IpcStatus::InvalidArgument, Response::Unit)];
            };
            match crate::registrationagent::agent::Daemon::from_registry()
                .send(FindRegistration {
                    destination,
                    reg_token,
                })
                .await
            {
                Ok(Ok(registration_id)) => vec![(
                    IpcStatus::Success,
                    Response::FoundRegistration { registration_id },
                )],
                Ok(Err(e)) => vec![(IpcStatus::from(&e), Response::Unit)],
                Err(_) => vec![(IpcStatus::InternalError, Response::Unit)],
            }
        }

        Request::Bind { registration_id } => {
            let (tx, rx) = mpsc::channel(64);
            match crate::registrationagent::agent::Daemon::from_registry()
                .send(BindRegistration {
                    registration_id,
                    sender: tx,
                })
                .await
            {
                Ok(Ok(())) => {
                    deliveries.push(ReceiverStream::new(rx));
                    bound.push(registration_id);
                    vec![(IpcStatus::Success, Response::Unit)]
                }
                Ok(Err(e)) => vec![(IpcStatus::from(&e), Response::Unit)],
                Err(_) => vec![(IpcStatus::InternalError, Response::Unit)],
            }
        }

        Request::Unbind { registration_id } => {
            bound.retain(|id| *id != registration_id);
            agent_result(
                crate::registrationagent::agent::Daemon::from_registry()
                    .send(UnbindRegistration { registration_id })
                    .await,
                Response::Unit,
            )
        }

        Request::Send {
            registration_id: _,
            destination,
            lifetime_ms,
            custody_requested,
            payload,
        } => handle_send(local_eid, destination, lifetime_ms, custody_requested, payload).await,

        Request::Recv { timeout_ms } => {
            handle_recv_or_peek(deliveries, queue, timeout_ms, true, payload_memory_limit_bytes).await
        }

        Request::Peek { timeout_ms } => {
            handle_recv_or_peek(deliveries, queue, timeout_ms, false, payload_memory_limit_bytes).await
        }

        Request::Ack {
            registration_id,
            bundle_id,
        } => agent_result(
            crate::registrationagent::agent::Daemon::from_registry()
                .send(AckBundle {
                    registration_id,
                    bundle_id,
                })
                .await,
            Response::Unit,
        ),

        Request::Cancel { bundle_id } => handle_cancel(bundle_id).await,

        Request::BeginPoll { timeout_ms } => {
            // pending_poll is always None here: a second begin-poll while one
            // is outstanding is already rejected by the legal_during_poll
            // guard above.
            if !queue.is_empty() {
                vec![(IpcStatus::Success, Response::PollReady)]
            } else {
                *pending_poll = Some(PendingPoll {
                    deadline: Instant::now() + Duration::from_millis(timeout_ms),
                });
                vec![]
            }
        }

        Request::CancelPoll => {
            let mut frames = Vec::new();
            if pending_poll.take().is_some() {
                frames.push((IpcStatus::Success, Response::PollCancelled));
            }
            frames.push((IpcStatus::Success, Response::Unit));
            frames
        }

        Request::SessionUpdate => vec![(
            IpcStatus::Success,
            Response::SessionUpdate {
                pending_poll: pending_poll.is_some(),
                bound_registrations: bound.clone(),
            },
        )],
    }
}

fn agent_result<T>(
    result: Result<Result<T, AgentError>, MailboxError>,
    ok: Response,
) -> Vec<(IpcStatus, Response)> {
    match result {
        Ok(Ok(_)) => vec![(IpcStatus::Success, ok)],
        Ok(Err(e)) => vec![(IpcStatus::from(&e), Response::Unit)],
        Err(_) => vec![(IpcStatus::InternalError, Response::Unit)],
    }
}

async fn handle_send(
    local_eid: &Endpoint,
    destination: String,
    lifetime_ms: u64,
    custody_requested: bool,
    payload: PayloadSpec,
) -> Vec<(IpcStatus, Response)> {
    let Some(destination_endpoint) = Endpoint::new(&destination) else {
        return vec![(IpcStatus::InvalidArgument, Response::Unit)];
    };

    let data = match payload {
        PayloadSpec::Inline(data) => data,
        PayloadSpec::TempFile(path) => match tokio::fs::read(&path).await {
            Ok(data) => {
                let _ = tokio::fs::remove_file(&path).await;
                data
            }
            Err(e) => {
                warn!("failed to read spilled send payload {path}: {e}");
                return vec![(IpcStatus::InvalidArgument, Response::Unit)];
            }
        },
    };

    let mut flags = BundleFlags::DESTINATION_IS_SINGLETON;
    if custody_requested {
        flags |= BundleFlags::CUSTODY_TRANSFER_REQUESTED;
    }

    let bundle = Bundle {
        primary_block: PrimaryBlock {
            version: 7,
            bundle_processing_flags: flags,
            crc: CRCType::NoCRC,
            destination_endpoint,
            source_node: local_eid.clone(),
            report_to: local_eid.clone(),
            creation_timestamp: CreationTimestamp {
                creation_time: DtnTime::now(),
                sequence_number: 0,
            },
            lifetime: lifetime_ms,
            fragment_offset: None,
            total_data_length: None,
        },
        blocks: vec![CanonicalBlock {
            block: Block::Payload(PayloadBlock { data: data.as_slice() }),
            block_flags: BlockFlags::empty(),
            block_number: 1,
            crc: CRCType::NoCRC,
        }],
    };

    let bundle_data = match TryInto::<Vec<u8>>::try_into(bundle) {
        Ok(data) => data,
        Err(e) => {
            warn!("failed to encode outgoing bundle: {e:?}");
            return vec![(IpcStatus::InvalidArgument, Response::Unit)];
        }
    };

    match crate::bundlestorageagent::agent::Daemon::from_registry()
        .send(StoreNewBundle { bundle_data })
        .await
    {
        Ok(Ok(bundle_id)) => vec![(IpcStatus::Success, Response::BundleId { bundle_id })],
        Ok(Err(())) => vec![(IpcStatus::NoStorageSpace, Response::Unit)],
        Err(_) => vec![(IpcStatus::InternalError, Response::Unit)],
    }
}

async fn handle_recv_or_peek(
    deliveries: &mut SelectAll<ReceiverStream<DeliverBundle>>,
    queue: &mut VecDeque<DeliverBundle>,
    timeout_ms: u64,
    consume: bool,
    payload_memory_limit_bytes: u64,
) -> Vec<(IpcStatus, Response)> {
    if queue.is_empty() {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), deliveries.next()).await {
            Ok(Some(delivery)) => queue.push_back(delivery),
            Ok(None) => return vec![(IpcStatus::TimedOut, Response::Unit)],
            Err(_) => return vec![(IpcStatus::TimedOut, Response::Unit)],
        }
    }

    let delivery = if consume {
        queue.pop_front()
    } else {
        queue.front().cloned()
    };

    match delivery {
        Some(delivery) => build_delivery_response(delivery, payload_memory_limit_bytes),
        None => vec![(IpcStatus::TimedOut, Response::Unit)],
    }
}

fn build_delivery_response(
    delivery: DeliverBundle,
    payload_memory_limit_bytes: u64,
) -> Vec<(IpcStatus, Response)> {
    let primary = delivery.bundle.get_primary_block().clone();
    let bundle_id = delivery.bundle.bundle_id();

    let payload_bytes = match delivery.bundle.decode_bundle() {
        Ok(decoded) => decoded
            .blocks
            .iter()
            .find_map(|block| match &block.block {
                Block::Payload(p) => Some(p.data.to_vec()),
                _ => None,
            })
            .unwrap_or_default(),
        Err(e) => {
            warn!("failed to decode delivered bundle {bundle_id}: {e}");
            Vec::new()
        }
    };

    let payload = if (payload_bytes.len() as u64) > payload_memory_limit_bytes {
        match tempfile::NamedTempFile::new() {
            Ok(file) => match spill_to_tempfile(file, &payload_bytes) {
                Ok(path) => PayloadSpec::TempFile(path),
                Err(e) => {
                    warn!("failed to spill delivery payload to disk: {e}");
                    PayloadSpec::Inline(payload_bytes)
                }
            },
            Err(e) => {
                warn!("failed to create temp file for delivery payload: {e}");
                PayloadSpec::Inline(payload_bytes)
            }
        }
    } else {
        PayloadSpec::Inline(payload_bytes)
    };

    vec![(
        IpcStatus::Success,
        Response::Delivery {
            source: primary.source_node.to_string(),
            destination: primary.destination_endpoint.to_string(),
            bundle_id,
            payload,
        },
    )]
}

fn spill_to_tempfile(file: tempfile::NamedTempFile, data: &[u8]) -> std::io::Result<String> {
    use std::io::Write;
    let mut file = file;
    file.write_all(data)?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path.to_string_lossy().into_owned())
}

async fn handle_cancel(bundle_id: u64) -> Vec<(IpcStatus, Response)> {
    let bundleref = match crate::bundlestorageagent::agent::Daemon::from_registry()
        .send(GetBundle { bundle_id })
        .await
    {
        Ok(Some(bundleref)) => bundleref,
        Ok(None) => return vec![(IpcStatus::NotFound, Response::Unit)],
        Err(_) => return vec![(IpcStatus::InternalError, Response::Unit)],
    };

    if matches!(
        bundleref.get_state(),
        State::Delivered | State::Forwarded | State::Invalid
    ) {
        return vec![(IpcStatus::Success, Response::Unit)];
    }

    crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
        bundleref,
        new_state: State::Invalid,
        new_data: None,
    });
    vec![(IpcStatus::Success, Response::Unit)]
}
