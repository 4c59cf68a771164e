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

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;

use actix::prelude::*;
use bp7::block::Block;
use bp7::bundleflags::BundleFlags;
use bp7::endpoint::Endpoint;
use log::{debug, warn};

use crate::bundlestorageagent::messages::{
    FragmentBundle, GetBundle, RefKind, ReleaseBundle, ReserveBundle,
};
use crate::bundlestorageagent::StoredBundleRef;
use crate::common::settings::Settings;
use crate::converganceagent::messages::{
    AgentForwardBundle, EventBundleForwarded as ClEventBundleForwarded,
    EventBundleForwardingFailed as ClEventBundleForwardingFailed,
};
use crate::externalrouteragent::messages::{Event as ExternalEvent, PublishEvent};
use crate::routingagent::messages::{EventRoutingTableUpdate, NexthopInfo};

use super::messages::{
    ApplyLinkThrottle, CancelQueuedBundle, EventBundleForwarded, EventBundleForwardingFailed,
    ForceTransmitBundle, ForwardBundle, LinkAvailable, LinkUnavailable, RequestRetryForward,
};

/// Priority class derived from `BundleFlags`, widened to 3 so "critical"
/// ECOS bundles can be promoted above ordinary expedited traffic.
fn priority_key(bundle: &StoredBundleRef) -> (u8, u8) {
    let flags = bundle.get_primary_block().bundle_processing_flags;
    let mut priority_class = if flags.contains(BundleFlags::PRIORITY_EXPEDITED) {
        2
    } else if flags.contains(BundleFlags::PRIORITY_BULK) {
        0
    } else {
        1
    };
    let mut ecos_ordinal = 0u8;
    if let Ok(decoded) = bundle.decode_bundle() {
        for block in &decoded.blocks {
            if let Block::Ecos(ecos) = &block.block {
                ecos_ordinal = ecos.ordinal;
                if ecos.critical {
                    // Fixed Open Question resolution: critical always promotes
                    // to expedited, ordinal 254 (see SPEC_FULL.md §9).
                    priority_class = 2;
                    ecos_ordinal = 254;
                }
            }
        }
    }
    (priority_class, ecos_ordinal)
}

struct QueuedBundle {
    priority_class: u8,
    ecos_ordinal: u8,
    bundle_id: u64,
    destination: Endpoint,
    bundle: StoredBundleRef,
}

impl PartialEq for QueuedBundle {
    fn eq(&self, other: &Self) -> bool {
        self.bundle_id == other.bundle_id
    }
}
impl Eq for QueuedBundle {}
impl PartialOrd for QueuedBundle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedBundle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority_class, self.ecos_ordinal, Reverse(self.bundle_id)).cmp(&(
            other.priority_class,
            other.ecos_ordinal,
            Reverse(other.bundle_id),
        ))
    }
}

#[derive(Default)]
struct LinkQueue {
    sender: Option<Recipient<AgentForwardBundle>>,
    max_bundle_size: Option<u64>,
    queue: BinaryHeap<QueuedBundle>,
    in_flight: HashSet<u64>,
    /// External-router `SetThrottle`: a byte budget refilled once a second,
    /// consumed as bundles are handed to the convergence layer. `None`
    /// means unthrottled.
    throttle_bps: Option<u64>,
    tokens_bytes: u64,
}

#[derive(Default)]
pub struct Daemon {
    /// Keyed by next-hop node endpoint: the per-link priority queue itself.
    links: HashMap<Endpoint, LinkQueue>,
    /// Keyed by destination node endpoint, as handed out by the routing
    /// oracle's last `EventRoutingTableUpdate`.
    routes: HashMap<Endpoint, NexthopInfo>,
    /// Bundles whose destination had no route at all when they arrived.
    awaiting_route: HashMap<Endpoint, Vec<StoredBundleRef>>,
    /// Consecutive transmission failures observed per bundle, reset on
    /// success or once the threshold sends it back through routing.
    failure_counts: HashMap<u64, u32>,
    forwarding_failure_threshold: u32,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.forwarding_failure_threshold = Settings::from_env().forwarding_failure_threshold;
        ctx.run_interval(Duration::from_secs(1), |act, ctx| {
            act.refill_tokens(ctx);
        });
    }
}
impl actix::Supervised for Daemon {}
impl SystemService for Daemon {}

impl Handler<ForwardBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ForwardBundle, ctx: &mut Self::Context) -> Self::Result {
        self.enqueue(msg.bundle, ctx);
    }
}

impl Handler<RequestRetryForward> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: RequestRetryForward, ctx: &mut Self::Context) -> Self::Result {
        let bundle_id = msg.bundle_id;
        crate::bundlestorageagent::agent::Daemon::from_registry()
            .send(GetBundle { bundle_id })
            .into_actor(self)
            .then(move |res, act, ctx| {
                match res {
                    Ok(Some(bundle)) => act.enqueue(bundle, ctx),
                    Ok(None) => debug!("retry-forward for unknown bundle {bundle_id}, ignoring"),
                    Err(e) => warn!("mailbox error fetching bundle {bundle_id} for retry: {e}"),
                }
                fut::ready(())
            })
            .wait(ctx);
    }
}

impl Handler<LinkAvailable> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: LinkAvailable, ctx: &mut Self::Context) -> Self::Result {
        let link = self.links.entry(msg.next_hop.clone()).or_default();
        link.sender = Some(msg.sender);
        link.max_bundle_size = msg.max_bundle_size;
        self.drain_link(&msg.next_hop, ctx);
    }
}

impl Handler<LinkUnavailable> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: LinkUnavailable, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(link) = self.links.get_mut(&msg.next_hop) {
            link.sender = None;
        }
    }
}

impl Handler<EventRoutingTableUpdate> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: EventRoutingTableUpdate, ctx: &mut Self::Context) -> Self::Result {
        self.routes = msg.routes;
        let destinations: Vec<Endpoint> = self.awaiting_route.keys().cloned().collect();
        for destination in destinations {
            let Some(next_hop) = self.routes.get(&destination).map(|i| i.next_hop.clone()) else {
                continue;
            };
            let Some(bundles) = self.awaiting_route.remove(&destination) else {
                continue;
            };
            for bundle in bundles {
                self.push_to_link(next_hop.clone(), destination.clone(), bundle);
            }
        }
        let next_hops: Vec<Endpoint> = self.links.keys().cloned().collect();
        for next_hop in next_hops {
            self.drain_link(&next_hop, ctx);
        }
    }
}

impl Handler<ClEventBundleForwarded> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ClEventBundleForwarded, ctx: &mut Self::Context) -> Self::Result {
        let ClEventBundleForwarded { endpoint, bundle } = msg;
        let next_hop = endpoint.get_node_endpoint();
        if let Some(link) = self.links.get_mut(&next_hop) {
            link.in_flight.remove(&bundle.bundle_id());
        }
        self.failure_counts.remove(&bundle.bundle_id());
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReleaseBundle {
            bundle_id: bundle.bundle_id(),
            kind: RefKind::LinkReservation,
        });
        crate::externalrouteragent::agent::Daemon::from_registry().do_send(PublishEvent {
            event: ExternalEvent::BundleTransmitted {
                bundle_id: bundle.bundle_id(),
                link: next_hop.to_string(),
            },
        });
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(EventBundleForwarded {
            endpoint: next_hop.clone(),
            bundle,
        });
        self.drain_link(&next_hop, ctx);
    }
}

impl Handler<ClEventBundleForwardingFailed> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ClEventBundleForwardingFailed, ctx: &mut Self::Context) -> Self::Result {
        let ClEventBundleForwardingFailed { endpoint, bundle } = msg;
        let next_hop = endpoint.get_node_endpoint();
        warn!(
            "forwarding bundle {} to {next_hop} failed, requeueing",
            bundle.bundle_id()
        );
        if let Some(link) = self.links.get_mut(&next_hop) {
            link.in_flight.remove(&bundle.bundle_id());
        }
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(
            EventBundleForwardingFailed {
                endpoint: next_hop.clone(),
                bundle: bundle.clone(),
            },
        );
        let bundle_id = bundle.bundle_id();
        let failures = self.failure_counts.entry(bundle_id).or_insert(0);
        *failures += 1;
        if *failures >= self.forwarding_failure_threshold {
            self.failure_counts.remove(&bundle_id);
            warn!(
                "bundle {bundle_id} exceeded the forwarding failure threshold on {next_hop}, re-consulting the routing oracle"
            );
            self.route_and_push(bundle, ctx);
        } else {
            let destination = bundle.get_primary_block().destination_endpoint.get_node_endpoint();
            self.push_to_link(next_hop.clone(), destination, bundle);
        }
        self.drain_link(&next_hop, ctx);
    }
}

impl Handler<ApplyLinkThrottle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ApplyLinkThrottle, _ctx: &mut Self::Context) -> Self::Result {
        let link = self.links.entry(msg.next_hop).or_default();
        link.throttle_bps = msg.bits_per_second;
        link.tokens_bytes = msg.bits_per_second.map(|bps| bps / 8).unwrap_or(0);
    }
}

impl Handler<ForceTransmitBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ForceTransmitBundle, ctx: &mut Self::Context) -> Self::Result {
        let Some((next_hop, destination, bundle)) = self.remove_from_link_queues(msg.bundle_id)
        else {
            warn!(
                "force-transmit for bundle {} that is not currently queued on any link",
                msg.bundle_id
            );
            return;
        };
        let link = self.links.entry(next_hop.clone()).or_default();
        link.queue.push(QueuedBundle {
            priority_class: u8::MAX,
            ecos_ordinal: u8::MAX,
            bundle_id: bundle.bundle_id(),
            destination,
            bundle,
        });
        self.drain_link(&next_hop, ctx);
    }
}

impl Handler<CancelQueuedBundle> for Daemon {
    type Result = bool;

    fn handle(&mut self, msg: CancelQueuedBundle, _ctx: &mut Self::Context) -> Self::Result {
        if let Some((_, _, bundle)) = self.remove_from_link_queues(msg.bundle_id) {
            crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReleaseBundle {
                bundle_id: bundle.bundle_id(),
                kind: RefKind::LinkReservation,
            });
            return true;
        }
        for bundles in self.awaiting_route.values_mut() {
            if let Some(pos) = bundles.iter().position(|b| b.bundle_id() == msg.bundle_id) {
                bundles.remove(pos);
                crate::bundlestorageagent::agent::Daemon::from_registry().do_send(
                    ReleaseBundle {
                        bundle_id: msg.bundle_id,
                        kind: RefKind::LinkReservation,
                    },
                );
                return true;
            }
        }
        false
    }
}

impl Daemon {
    fn enqueue(&mut self, bundle: StoredBundleRef, ctx: &mut Context<Self>) {
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReserveBundle {
            bundle_id: bundle.bundle_id(),
            kind: RefKind::LinkReservation,
        });
        self.route_and_push(bundle, ctx);
    }

    /// Looks the bundle's destination up in the routing oracle's last
    /// pushed table and either queues it on the resulting link or, if no
    /// route exists at all, parks it in `awaiting_route` until one arrives.
    /// Does not touch the link reservation, so this alone is also what a
    /// failed bundle re-enters through once it has exhausted its retries on
    /// the link that just rejected it.
    fn route_and_push(&mut self, bundle: StoredBundleRef, ctx: &mut Context<Self>) {
        let destination = bundle
            .get_primary_block()
            .destination_endpoint
            .get_node_endpoint();
        match self.routes.get(&destination).map(|i| i.next_hop.clone()) {
            Some(next_hop) => {
                self.push_to_link(next_hop.clone(), destination, bundle);
                self.drain_link(&next_hop, ctx);
            }
            None => {
                self.awaiting_route.entry(destination).or_default().push(bundle);
            }
        }
    }

    fn push_to_link(&mut self, next_hop: Endpoint, destination: Endpoint, bundle: StoredBundleRef) {
        let (priority_class, ecos_ordinal) = priority_key(&bundle);
        let link = self.links.entry(next_hop).or_default();
        link.queue.push(QueuedBundle {
            priority_class,
            ecos_ordinal,
            bundle_id: bundle.bundle_id(),
            destination,
            bundle,
        });
    }

    /// Pulls a bundle out of whichever link queue currently holds it, for
    /// `ForceTransmitBundle`/`CancelQueuedBundle`. `BinaryHeap` has no
    /// targeted removal, so the queue is rebuilt from everything but the
    /// match; fine for an administrative, non-hot-path operation.
    fn remove_from_link_queues(&mut self, bundle_id: u64) -> Option<(Endpoint, Endpoint, StoredBundleRef)> {
        for (next_hop, link) in self.links.iter_mut() {
            if !link.queue.iter().any(|qb| qb.bundle_id == bundle_id) {
                continue;
            }
            let mut found = None;
            let mut rest = BinaryHeap::new();
            for qb in std::mem::take(&mut link.queue).into_iter() {
                if qb.bundle_id == bundle_id {
                    found = Some((qb.destination, qb.bundle));
                } else {
                    rest.push(qb);
                }
            }
            link.queue = rest;
            if let Some((destination, bundle)) = found {
                return Some((next_hop.clone(), destination, bundle));
            }
        }
        None
    }

    fn refill_tokens(&mut self, ctx: &mut Context<Self>) {
        let next_hops: Vec<Endpoint> = self.links.keys().cloned().collect();
        for next_hop in next_hops {
            if let Some(link) = self.links.get_mut(&next_hop) {
                if let Some(bps) = link.throttle_bps {
                    link.tokens_bytes = bps / 8;
                } else {
                    continue;
                }
            }
            self.drain_link(&next_hop, ctx);
        }
    }

    fn drain_link(&mut self, next_hop: &Endpoint, ctx: &mut Context<Self>) {
        let Some(link) = self.links.get_mut(next_hop) else {
            return;
        };
        let Some(sender) = link.sender.clone() else {
            return;
        };
        let mut stuck = Vec::new();
        while let Some(qb) = link.queue.pop() {
            if let Some(bps) = link.throttle_bps {
                let budget = bps / 8;
                let cost = qb.bundle.get_bundle_size();
                // A bundle bigger than one second's budget would starve
                // forever waiting to "fit"; let it through once the bucket
                // is fully refilled instead, consuming the whole window.
                let needed = cost.min(budget);
                if link.tokens_bytes < needed {
                    stuck.push(qb);
                    break;
                }
                link.tokens_bytes = link.tokens_bytes.saturating_sub(cost);
            }
            let route_max = self.routes.get(&qb.destination).and_then(|r| r.max_size);
            let max_bundle_size = match (route_max, link.max_bundle_size) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, b) => b,
            };
            if let Some(mbs) = max_bundle_size {
                if qb.bundle.get_bundle_size() > mbs {
                    let cannot_fragment = qb
                        .bundle
                        .get_primary_block()
                        .bundle_processing_flags
                        .contains(BundleFlags::MUST_NOT_FRAGMENT)
                        || qb.bundle.get_bundle_min_size().is_some_and(|m| m > mbs);
                    if cannot_fragment {
                        debug!(
                            "bundle {} can not be fragmented down to {mbs}, leaving it queued",
                            qb.bundle_id
                        );
                        stuck.push(qb);
                        continue;
                    }
                    crate::bundlestorageagent::agent::Daemon::from_registry().do_send(
                        ReleaseBundle {
                            bundle_id: qb.bundle_id,
                            kind: RefKind::LinkReservation,
                        },
                    );
                    crate::bundlestorageagent::agent::Daemon::from_registry().do_send(
                        FragmentBundle {
                            bundleref: qb.bundle,
                            target_size: mbs,
                        },
                    );
                    continue;
                }
            }
            match sender.try_send(AgentForwardBundle {
                bundle: qb.bundle.clone(),
                responder: ctx.address().recipient(),
            }) {
                Ok(()) => {
                    link.in_flight.insert(qb.bundle_id);
                }
                Err(SendError::Full(afb)) => {
                    drop(afb);
                    stuck.push(qb);
                    break;
                }
                Err(SendError::Closed(_)) => {
                    link.sender = None;
                    stuck.push(qb);
                    break;
                }
            }
        }
        for qb in stuck {
            link.queue.push(qb);
        }
    }
}
