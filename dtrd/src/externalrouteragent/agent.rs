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

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
};

use actix::prelude::*;
use bp7::endpoint::Endpoint;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use url::Url;

use crate::{
    bundlestorageagent::{
        messages::{EnumerateBundles, GetBundle, UpdateBundle},
        State as BundleState,
    },
    common::settings::Settings,
    forwardingagent::messages::{CancelQueuedBundle, ForceTransmitBundle},
    linkagent::messages::{ListLinks, SetLinkEnabled, SetLinkThrottle},
    routingagent::messages::{AddRoute, ListRoutes, RemoveRoute, RouteType},
};

use super::{
    codec::RecordCodec,
    messages::{
        BundleSnapshot, Command, ContactSnapshot, Event, GetBundleStats, GetLinkStats,
        GetUsedBytes, LinkSnapshot, NewExternalRouterConnection, PublishEvent, Query, QueryResult,
        Record, SessionClosed, TrafficCounters,
    },
};

/// Upper 16 bits of the handshake word (§6): fixed opcode identifying an
/// external-router session-open, mirrored back by the peer.
const OPEN_OPCODE: u16 = 0x4552; // "ER"
const PROTOCOL_VERSION: u16 = 1;

pub async fn external_router_listener(
    mut shutdown: broadcast::Receiver<()>,
    _shutdown_complete_sender: mpsc::Sender<()>,
    daemon: Addr<Daemon>,
) -> Result<JoinHandle<()>, io::Error> {
    let settings = Settings::from_env();
    let socket: SocketAddr = settings.external_router_listen_address.parse().unwrap();
    info!("External router channel listening on {}", socket);
    let listener = TcpListener::bind(&socket).await?;

    let joinhandle = tokio::spawn(async move {
        loop {
            tokio::select! {
                conn = listener.accept() => {
                    match conn {
                        Ok((stream, address)) => {
                            daemon.do_send(NewExternalRouterConnection { stream, address });
                        }
                        Err(e) => {
                            error!("Error accepting external-router connection: {:?}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown message, stopping the external-router socket");
                    break;
                }
            }
        }
        drop(listener);
        info!("External router socket has shut down.");
    });
    Ok(joinhandle)
}

/// External Router Channel (component 7). Models one connected router
/// process at a time, matching the spec's "a duplex framed channel to an
/// out-of-process router process" (singular); a new connection replaces
/// whatever session was active, same as `tcpclconverganceagent`'s
/// per-peer-url replace semantics but simplified to a single slot since
/// there is exactly one router, not one per remote node.
#[derive(Default)]
pub struct Daemon {
    session: Option<(SocketAddr, mpsc::Sender<Record>)>,
    max_frame_bytes: u64,
    /// bundle_id -> (source, destination, size), for bundles admitted and
    /// not yet freed; backs both `QuotaStats` and attributing a later
    /// `BundleTransmitted` event back to its source-destination pair.
    bundle_index: HashMap<u64, (String, String, u64)>,
    /// Keyed by (source, destination): (cumulative, interval) counters.
    stats: HashMap<(String, String), (TrafficCounters, TrafficCounters)>,
    /// Keyed by link url: (cumulative, interval) counters.
    link_stats: HashMap<String, (TrafficCounters, TrafficCounters)>,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        self.max_frame_bytes = Settings::from_env().external_router_max_frame_bytes;
    }
}

impl actix::Supervised for Daemon {}
impl SystemService for Daemon {}

impl Handler<NewExternalRouterConnection> for Daemon {
    type Result = ();

    fn handle(
        &mut self,
        msg: NewExternalRouterConnection,
        ctx: &mut Context<Self>,
    ) -> Self::Result {
        let NewExternalRouterConnection { stream, address } = msg;
        info!("External router connected from {}", address);
        let (tx, rx) = mpsc::channel(1024);
        self.session = Some((address, tx));
        let max_frame_bytes = self.max_frame_bytes;
        let self_addr = ctx.address();
        tokio::spawn(async move {
            run_session(stream, rx, max_frame_bytes).await;
            self_addr.do_send(SessionClosed { address });
        });
    }
}

impl Handler<PublishEvent> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: PublishEvent, _ctx: &mut Context<Self>) -> Self::Result {
        self.record_stats(&msg.event);
        if let Some((_, tx)) = &self.session {
            if tx.try_send(Record::Event(msg.event)).is_err() {
                warn!("External router event channel full or closed; dropping event");
            }
        }
    }
}

impl Handler<GetBundleStats> for Daemon {
    type Result = (TrafficCounters, TrafficCounters);

    fn handle(&mut self, msg: GetBundleStats, _ctx: &mut Context<Self>) -> Self::Result {
        let key = (msg.source, msg.destination);
        match self.stats.get_mut(&key) {
            Some((cumulative, interval)) => (cumulative.clone(), std::mem::take(interval)),
            None => Default::default(),
        }
    }
}

impl Handler<GetLinkStats> for Daemon {
    type Result = (TrafficCounters, TrafficCounters);

    fn handle(&mut self, msg: GetLinkStats, _ctx: &mut Context<Self>) -> Self::Result {
        match self.link_stats.get_mut(&msg.url) {
            Some((cumulative, interval)) => (cumulative.clone(), std::mem::take(interval)),
            None => Default::default(),
        }
    }
}

impl Handler<GetUsedBytes> for Daemon {
    type Result = u64;

    fn handle(&mut self, _msg: GetUsedBytes, _ctx: &mut Context<Self>) -> Self::Result {
        self.bundle_index.values().map(|(_, _, size)| size).sum()
    }
}

impl Daemon {
    /// Statistics interval (§4.7): feeds both the cumulative and interval
    /// counters per source-destination pair and per link from the same
    /// events already pushed to the router, regardless of whether a router
    /// is actually connected to see them.
    fn record_stats(&mut self, event: &Event) {
        match event {
            Event::BundleAdmitted(snapshot) => {
                self.bundle_index.insert(
                    snapshot.bundle_id,
                    (
                        snapshot.source.clone(),
                        snapshot.destination.clone(),
                        snapshot.size,
                    ),
                );
                let key = (snapshot.source.clone(), snapshot.destination.clone());
                let (cumulative, interval) = self.stats.entry(key).or_default();
                cumulative.received += 1;
                cumulative.bytes_received += snapshot.size;
                interval.received += 1;
                interval.bytes_received += snapshot.size;
            }
            Event::BundleTransmitted { bundle_id, link } => {
                if let Some((source, destination, size)) =
                    self.bundle_index.get(bundle_id).cloned()
                {
                    let key = (source, destination);
                    let (cumulative, interval) = self.stats.entry(key).or_default();
                    cumulative.transmitted += 1;
                    cumulative.bytes_transmitted += size;
                    interval.transmitted += 1;
                    interval.bytes_transmitted += size;

                    let (link_cumulative, link_interval) =
                        self.link_stats.entry(link.clone()).or_default();
                    link_cumulative.transmitted += 1;
                    link_cumulative.bytes_transmitted += size;
                    link_interval.transmitted += 1;
                    link_interval.bytes_transmitted += size;
                }
            }
            Event::BundleFreed { bundle_id } => {
                self.bundle_index.remove(bundle_id);
            }
            _ => {}
        }
    }
}

impl Handler<SessionClosed> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: SessionClosed, _ctx: &mut Context<Self>) -> Self::Result {
        if matches!(&self.session, Some((addr, _)) if *addr == msg.address) {
            info!("External router session from {} closed", msg.address);
            self.session = None;
        }
    }
}

async fn run_session(mut stream: TcpStream, mut rx: mpsc::Receiver<Record>, max_frame_bytes: u64) {
    if !handshake(&mut stream).await {
        return;
    }

    let (read_half, write_half) = stream.into_split();
    let mut framed_in = FramedRead::new(read_half, RecordCodec::new(max_frame_bytes));
    let mut framed_out = FramedWrite::new(write_half, RecordCodec::new(max_frame_bytes));

    if send_full_snapshot(&mut framed_out).await.is_err() {
        warn!("Error sending initial external-router snapshot");
        return;
    }

    loop {
        tokio::select! {
            incoming = framed_in.next() => {
                match incoming {
                    Some(Ok(record)) => {
                        if handle_incoming(record, &mut framed_out).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("External router frame error: {:?}", e);
                        break;
                    }
                    None => break,
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(record) => {
                        if framed_out.send(record).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    debug!("External router session ended");
}

async fn handshake(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 4];
    if stream.read_exact(&mut buf).await.is_err() {
        return false;
    }
    let word = u32::from_be_bytes(buf);
    let opcode = (word >> 16) as u16;
    let version = (word & 0xffff) as u16;

    let reply = ((OPEN_OPCODE as u32) << 16) | PROTOCOL_VERSION as u32;
    if stream.write_all(&reply.to_be_bytes()).await.is_err() {
        return false;
    }

    if opcode != OPEN_OPCODE || version != PROTOCOL_VERSION {
        warn!(
            "External router handshake mismatch: opcode={:#x} version={}",
            opcode, version
        );
        return false;
    }
    true
}

async fn send_full_snapshot(
    out: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, RecordCodec>,
) -> Result<(), super::codec::Errors> {
    out.send(Record::ReconcileStart).await?;

    let bundles = crate::bundlestorageagent::agent::Daemon::from_registry()
        .send(EnumerateBundles {})
        .await
        .unwrap_or_default();
    for bundle in bundles {
        let primary = bundle.get_primary_block();
        out.send(Record::Bundle(BundleSnapshot {
            bundle_id: bundle.bundle_id(),
            source: primary.source_node.to_string(),
            destination: primary.destination_endpoint.to_string(),
            size: bundle.get_bundle_size(),
        }))
        .await?;
    }

    let links = crate::linkagent::agent::Daemon::from_registry()
        .send(ListLinks {})
        .await
        .unwrap_or_default();
    for link in links {
        out.send(Record::Link(LinkSnapshot {
            url: link.url.to_string(),
            connection_status: link.connection_status.to_string(),
            remote_endpoint: link.remote_endpoint.map(|e| e.to_string()),
        }))
        .await?;
    }

    let routes = crate::routingagent::agent::Daemon::from_registry()
        .send(ListRoutes {})
        .await
        .unwrap_or_default();
    for route in routes {
        out.send(Record::Contact(ContactSnapshot {
            target: route.target.to_string(),
            next_hop: route.next_hop.to_string(),
            available: route.available,
            max_bundle_size: route.max_bundle_size,
        }))
        .await?;
    }

    out.send(Record::ReconcileEnd).await
}

async fn handle_incoming(
    record: Record,
    out: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, RecordCodec>,
) -> Result<(), super::codec::Errors> {
    match record {
        Record::Command(cmd) => handle_command(cmd, out).await,
        Record::Query(q) => handle_query(q, out).await,
        other => {
            debug!("Ignoring unexpected external-router record: {:?}", other);
            Ok(())
        }
    }
}

async fn handle_command(
    cmd: Command,
    out: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, RecordCodec>,
) -> Result<(), super::codec::Errors> {
    match cmd {
        Command::AddRoute {
            target,
            next_hop,
            max_bundle_size,
        } => match (Endpoint::new(&target), Endpoint::new(&next_hop)) {
            (Some(target), Some(next_hop)) => {
                crate::routingagent::agent::Daemon::from_registry().do_send(AddRoute {
                    target,
                    route_type: RouteType::Static,
                    next_hop,
                    max_bundle_size,
                });
                Ok(())
            }
            _ => {
                out.send(Record::CommandNack {
                    reason: "invalid endpoint in add-route".into(),
                })
                .await
            }
        },
        Command::DeleteRoute { target, next_hop } => {
            match (Endpoint::new(&target), Endpoint::new(&next_hop)) {
                (Some(target), Some(next_hop)) => {
                    crate::routingagent::agent::Daemon::from_registry().do_send(RemoveRoute {
                        target,
                        route_type: RouteType::Static,
                        next_hop,
                    });
                    Ok(())
                }
                _ => {
                    out.send(Record::CommandNack {
                        reason: "invalid endpoint in delete-route".into(),
                    })
                    .await
                }
            }
        }
        Command::SetLinkEnabled { url, enabled } => match Url::parse(&url) {
            Ok(parsed) => {
                crate::linkagent::agent::Daemon::from_registry()
                    .do_send(SetLinkEnabled { url: parsed, enabled });
                Ok(())
            }
            Err(e) => {
                out.send(Record::CommandNack {
                    reason: format!("invalid link url {}: {}", url, e),
                })
                .await
            }
        },
        // Acquisition/loss-of-signal are treated as the same admission gate
        // as an explicit enable/disable (see `SetLinkEnabled` on
        // `linkagent::messages::Link`).
        Command::Aos { url } => match Url::parse(&url) {
            Ok(parsed) => {
                crate::linkagent::agent::Daemon::from_registry().do_send(SetLinkEnabled {
                    url: parsed,
                    enabled: true,
                });
                Ok(())
            }
            Err(e) => {
                out.send(Record::CommandNack {
                    reason: format!("invalid link url {}: {}", url, e),
                })
                .await
            }
        },
        Command::Los { url } => match Url::parse(&url) {
            Ok(parsed) => {
                crate::linkagent::agent::Daemon::from_registry().do_send(SetLinkEnabled {
                    url: parsed,
                    enabled: false,
                });
                Ok(())
            }
            Err(e) => {
                out.send(Record::CommandNack {
                    reason: format!("invalid link url {}: {}", url, e),
                })
                .await
            }
        },
        Command::SetThrottle { url, bits_per_second } => match Url::parse(&url) {
            Ok(parsed) => {
                crate::linkagent::agent::Daemon::from_registry().do_send(SetLinkThrottle {
                    url: parsed,
                    bits_per_second,
                });
                Ok(())
            }
            Err(e) => {
                out.send(Record::CommandNack {
                    reason: format!("invalid link url {}: {}", url, e),
                })
                .await
            }
        },
        Command::ForceTransmit { bundle_id } => {
            crate::forwardingagent::agent::Daemon::from_registry()
                .do_send(ForceTransmitBundle { bundle_id });
            Ok(())
        }
        Command::CancelBundle { bundle_id } => {
            cancel_bundle(bundle_id).await;
            Ok(())
        }
        Command::DeleteBundleBySourceDestination { source, destination } => {
            let bundles = crate::bundlestorageagent::agent::Daemon::from_registry()
                .send(EnumerateBundles {})
                .await
                .unwrap_or_default();
            for bundle in bundles {
                let primary = bundle.get_primary_block();
                if primary.source_node.to_string() == source
                    && primary.destination_endpoint.to_string() == destination
                {
                    cancel_bundle(bundle.bundle_id()).await;
                }
            }
            Ok(())
        }
    }
}

/// Shared tail of `CancelBundle`/`DeleteBundleBySourceDestination`: pull the
/// bundle out of the Forwarding Engine's queues if it is there, then mark it
/// administratively invalid so the Bundle Store frees it once nothing else
/// still references it.
async fn cancel_bundle(bundle_id: u64) {
    crate::forwardingagent::agent::Daemon::from_registry()
        .send(CancelQueuedBundle { bundle_id })
        .await
        .ok();
    let Ok(Some(bundleref)) = crate::bundlestorageagent::agent::Daemon::from_registry()
        .send(GetBundle { bundle_id })
        .await
    else {
        return;
    };
    crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
        bundleref,
        new_state: BundleState::Invalid,
        new_data: None,
    });
}

async fn handle_query(
    query: Query,
    out: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, RecordCodec>,
) -> Result<(), super::codec::Errors> {
    match query {
        Query::BundleStats { source, destination } => {
            let (cumulative, interval) = crate::externalrouteragent::agent::Daemon::from_registry()
                .send(GetBundleStats { source, destination })
                .await
                .unwrap_or_default();
            out.send(Record::QueryResult(QueryResult::BundleStats {
                cumulative,
                interval,
            }))
            .await
        }
        Query::LinkStats { url } => {
            let (cumulative, interval) = crate::externalrouteragent::agent::Daemon::from_registry()
                .send(GetLinkStats { url })
                .await
                .unwrap_or_default();
            out.send(Record::QueryResult(QueryResult::LinkStats {
                cumulative,
                interval,
            }))
            .await
        }
        Query::QuotaStats => {
            let used_bytes = crate::externalrouteragent::agent::Daemon::from_registry()
                .send(GetUsedBytes {})
                .await
                .unwrap_or(0);
            out.send(Record::QueryResult(QueryResult::QuotaStats {
                used_bytes,
                capacity_bytes: None,
            }))
            .await
        }
    }
}
