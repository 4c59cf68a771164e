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

use std::collections::HashMap;
use std::time::Duration;

use bp7::bundleflags::BundleFlags;
use bp7::endpoint::Endpoint;
use bp7::time::DtnTime;
use log::{debug, error, warn};

use crate::{
    common::{error::AgentError, settings::Settings},
    custodyagent::messages::{DischargeLocal, DischargeReason},
    externalrouteragent::messages::{
        BundleSnapshot, Event as ExternalEvent, PublishEvent,
    },
    pendingindex::{GbofId, InsertOutcome, PendingEntry, PendingIndex},
};

use super::{
    State, StoredBundleRef,
    messages::{
        EnumerateBundles, EventBundleUpdated, EventNewBundleStored, FragmentBundle, GetBundle,
        GetBundleForDestination, GetBundleForNode, RefKind, ReleaseBundle, ReserveBundle,
        StoreBundle, StoreNewBundle, UpdateBundle,
    },
    store::Store,
};

use actix::prelude::*;

#[derive(Debug, Default, Clone, Copy)]
struct Refcounts {
    registration_pending: u32,
    link_reservations: u32,
    custody_obligations: u32,
    external_router_refs: u32,
}

impl Refcounts {
    fn is_free(self) -> bool {
        self.registration_pending == 0
            && self.link_reservations == 0
            && self.custody_obligations == 0
            && self.external_router_refs == 0
    }

    fn adjust(&mut self, kind: RefKind, delta: i32) {
        let field = match kind {
            RefKind::RegistrationPending => &mut self.registration_pending,
            RefKind::LinkReservation => &mut self.link_reservations,
            RefKind::CustodyObligation => &mut self.custody_obligations,
            RefKind::ExternalRouterRef => &mut self.external_router_refs,
        };
        *field = field.saturating_add_signed(delta);
    }
}

/// A bundle still live in the arena: its current snapshot plus the four
/// I2/P4 obligation counters that gate freeing it. Keyed by bundle-id, per
/// the "arena, not pointers" design note (spec §9).
struct BundleRecord {
    bundleref: StoredBundleRef,
    refcounts: Refcounts,
}

/// Durable Bundle Store (component 2) plus the in-memory Pending Bundle
/// Index (component 3) it owns exclusively.
pub struct Daemon {
    store: Option<Store>,
    records: HashMap<u64, BundleRecord>,
    pending: PendingIndex,
    expiry_scan_interval_ms: u64,
}

impl Default for Daemon {
    fn default() -> Self {
        Self {
            store: None,
            records: HashMap::new(),
            pending: PendingIndex::new(),
            expiry_scan_interval_ms: Settings::default().bundle_expiry_scan_interval_ms,
        }
    }
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let settings = Settings::from_env();
        let store = match Store::open(&settings) {
            Ok(store) => store,
            Err(e) => {
                error!("Fatal: could not open bundle store: {e}");
                panic!("bundle store is unavailable: {e}");
            }
        };
        self.reload(&store);
        self.store = Some(store);
        self.expiry_scan_interval_ms = settings.bundle_expiry_scan_interval_ms;
        ctx.run_interval(Duration::from_millis(self.expiry_scan_interval_ms), |act, ctx| {
            act.scan_expired(ctx);
        });
    }
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<StoreNewBundle> for Daemon {
    type Result = Result<u64, ()>;

    fn handle(&mut self, msg: StoreNewBundle, ctx: &mut Self::Context) -> Self::Result {
        self.admit(msg.bundle_data, ctx).map_err(|e| {
            warn!("admit failed: {e}");
        })
    }
}

impl Handler<StoreBundle> for Daemon {
    type Result = Result<u64, ()>;

    fn handle(&mut self, msg: StoreBundle, ctx: &mut Self::Context) -> Self::Result {
        self.admit(msg.bundle_data, ctx).map_err(|e| {
            warn!("admit of received bundle failed: {e}");
        })
    }
}

impl Handler<UpdateBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: UpdateBundle, ctx: &mut Self::Context) -> Self::Result {
        let UpdateBundle {
            bundleref,
            new_state,
            new_data,
        } = msg;
        let id = bundleref.bundle_id();
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Some(data) = &new_data {
            if let Err(e) = store.put(id, data) {
                error!("failed to persist updated bundle {id}: {e}");
                return;
            }
        }
        let Some(record) = self.records.get_mut(&id) else {
            warn!("UpdateBundle for unknown bundle {id}, ignoring");
            return;
        };
        record.bundleref = bundleref.with_state(new_state, new_data);
        let updated = record.bundleref.clone();
        debug!("bundle {id} transitioned to {new_state:?}");
        crate::bundleprotocolagent::agent::Daemon::from_registry()
            .do_send(EventBundleUpdated { bundle: updated });
        self.maybe_free(id, new_state, ctx);
    }
}

impl Handler<FragmentBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: FragmentBundle, ctx: &mut Self::Context) -> Self::Result {
        let FragmentBundle {
            bundleref,
            target_size,
        } = msg;
        let fragments = match bundleref
            .decode_bundle()
            .map_err(|e| e.to_string())
            .and_then(|b| b.fragment(target_size).map_err(|e| e.to_string()))
        {
            Ok(f) => f,
            Err(e) => {
                warn!("fragmenting bundle {} failed: {e}", bundleref.bundle_id());
                return;
            }
        };
        for fragment in fragments {
            let data: Result<Vec<u8>, _> = (&fragment).try_into();
            match data {
                Ok(data) => {
                    if let Err(e) = self.admit(data, ctx) {
                        warn!(
                            "admitting fragment of bundle {} failed: {e}",
                            bundleref.bundle_id()
                        );
                    }
                }
                Err(e) => warn!("encoding fragment failed: {e:?}"),
            }
        }
        // The original, now fragmented, bundle is done with from our side.
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
            bundleref,
            new_state: State::Forwarded,
            new_data: None,
        });
    }
}

impl Handler<GetBundleForDestination> for Daemon {
    type Result = Result<Vec<StoredBundleRef>, String>;

    fn handle(&mut self, msg: GetBundleForDestination, _ctx: &mut Self::Context) -> Self::Result {
        let GetBundleForDestination { destination } = msg;
        Ok(self
            .pending
            .iter_filtered(|e| e.destination == destination.to_string())
            .filter_map(|e| self.records.get(&e.bundle_id))
            .map(|r| r.bundleref.clone())
            .collect())
    }
}

impl Handler<GetBundleForNode> for Daemon {
    type Result = Result<Vec<StoredBundleRef>, String>;

    fn handle(&mut self, msg: GetBundleForNode, _ctx: &mut Self::Context) -> Self::Result {
        let GetBundleForNode { destination } = msg;
        let node = destination.get_node_endpoint();
        Ok(self
            .pending
            .iter_filtered(|e| {
                Endpoint::new(&e.destination)
                    .map(|d| d.get_node_endpoint() == node)
                    .unwrap_or(false)
            })
            .filter_map(|e| self.records.get(&e.bundle_id))
            .map(|r| r.bundleref.clone())
            .collect())
    }
}

impl Handler<GetBundle> for Daemon {
    type Result = Option<StoredBundleRef>;

    fn handle(&mut self, msg: GetBundle, _ctx: &mut Self::Context) -> Self::Result {
        self.records
            .get(&msg.bundle_id)
            .map(|r| r.bundleref.clone())
    }
}

impl Handler<EnumerateBundles> for Daemon {
    type Result = Vec<StoredBundleRef>;

    fn handle(&mut self, _msg: EnumerateBundles, _ctx: &mut Self::Context) -> Self::Result {
        self.records
            .values()
            .map(|r| r.bundleref.clone())
            .collect()
    }
}

impl Handler<ReserveBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ReserveBundle, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(record) = self.records.get_mut(&msg.bundle_id) {
            record.refcounts.adjust(msg.kind, 1);
        }
    }
}

impl Handler<ReleaseBundle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: ReleaseBundle, ctx: &mut Self::Context) -> Self::Result {
        let ReleaseBundle { bundle_id, kind } = msg;
        let Some(record) = self.records.get_mut(&bundle_id) else {
            return;
        };
        record.refcounts.adjust(kind, -1);
        let state = record.bundleref.get_state();
        self.maybe_free(bundle_id, state, ctx);
    }
}

impl Daemon {
    fn reload(&mut self, store: &Store) {
        let rows = match store.scan_ids() {
            Ok(rows) => rows,
            Err(e) => {
                error!("Fatal: could not enumerate bundle store at startup: {e}");
                panic!("bundle store reload failed: {e}");
            }
        };
        for (id, data) in rows {
            let bundle: bp7::bundle::Bundle = match data.as_slice().try_into() {
                Ok(b) => b,
                Err(e) => {
                    warn!("dropping corrupt bundle {id} found on reload: {e:?}");
                    let _ = store.delete(id);
                    continue;
                }
            };
            let primary_block = bundle.primary_block.clone();
            let gbof = GbofId::from_primary_block(&primary_block);
            let destination = primary_block.destination_endpoint.to_string();
            let size = data.len() as u64;
            let bundleref =
                StoredBundleRef::new(id, primary_block, size, None, State::Valid, Some(data));
            match self.pending.insert(PendingEntry {
                bundle_id: id,
                gbof,
                destination,
            }) {
                InsertOutcome::Ok => {}
                InsertOutcome::DuplicateGbof => {
                    warn!(
                        "bundle {id} shares a GBoF-id with an already-reloaded bundle, dropping"
                    );
                    let _ = store.delete(id);
                    continue;
                }
            }
            self.records.insert(
                id,
                BundleRecord {
                    bundleref,
                    refcounts: Refcounts::default(),
                },
            );
        }
        debug!("reloaded {} bundles from the store", self.pending.size());
    }

    /// `admit` (§4.2): assigns a bundle-id, persists the bundle, and inserts
    /// it into the Pending Index. A GBoF collision with a still-pending
    /// bundle is resolved reject-second-admit (§9 Open Question): treated
    /// as a no-op success without assigning a new id.
    fn admit(&mut self, data: Vec<u8>, ctx: &mut Context<Self>) -> Result<u64, AgentError> {
        let bundle: bp7::bundle::Bundle = data
            .as_slice()
            .try_into()
            .map_err(|e: bp7::SerializationError| AgentError::MalformedBundle(e.to_string()))?;
        let primary_block = bundle.primary_block.clone();
        let already_expired = primary_block.creation_timestamp.creation_time.timestamp
            + primary_block.lifetime
            < DtnTime::now().timestamp;
        if already_expired
            && primary_block
                .bundle_processing_flags
                .contains(BundleFlags::CUSTODY_TRANSFER_REQUESTED)
        {
            debug!(
                "rejecting admit of already-expired, custody-requested bundle from {}",
                primary_block.source_node
            );
            return Err(AgentError::BundleExpired);
        }
        let gbof = GbofId::from_primary_block(&primary_block);
        if let Some(existing) = self.pending.lookup_gbof(&gbof) {
            debug!("rejecting admit of duplicate GBoF-id {gbof:?}");
            return Ok(existing.bundle_id);
        }
        let Some(store) = self.store.as_ref() else {
            return Err(AgentError::Internal("bundle store not yet open".into()));
        };
        let id = store.next_bundle_id()?;
        store.put(id, &data)?;
        let destination = primary_block.destination_endpoint.to_string();
        let size = data.len() as u64;
        let bundleref =
            StoredBundleRef::new(id, primary_block, size, None, State::Received, Some(data));
        match self.pending.insert(PendingEntry {
            bundle_id: id,
            gbof,
            destination,
        }) {
            InsertOutcome::Ok => {}
            InsertOutcome::DuplicateGbof => {
                // The store's writer mailbox is the only place the pending
                // index is mutated, and we just checked this GBoF-id is
                // free, so a concurrent insert is impossible here.
                unreachable!("pending index is only mutated from this actor's mailbox");
            }
        }
        self.records.insert(
            id,
            BundleRecord {
                bundleref: bundleref.clone(),
                refcounts: Refcounts::default(),
            },
        );
        crate::bundleprotocolagent::agent::Daemon::from_registry()
            .do_send(EventNewBundleStored { bundle: bundleref.clone() });
        crate::externalrouteragent::agent::Daemon::from_registry().do_send(PublishEvent {
            event: ExternalEvent::BundleAdmitted(BundleSnapshot {
                bundle_id: id,
                source: bundleref.get_primary_block().source_node.to_string(),
                destination: bundleref
                    .get_primary_block()
                    .destination_endpoint
                    .to_string(),
                size,
            }),
        });
        let _ = ctx;
        Ok(id)
    }

    /// Checked at every refcount change and every terminal state transition
    /// (P4): once all four obligation counters are zero and the bundle is
    /// in a terminal lifecycle state, it is unlinked from the store.
    fn maybe_free(&mut self, id: u64, state: State, _ctx: &mut Context<Self>) {
        let terminal = matches!(
            state,
            State::Delivered | State::Forwarded | State::Invalid | State::Expired
        );
        let Some(record) = self.records.get(&id) else {
            return;
        };
        if !terminal || !record.refcounts.is_free() {
            return;
        }
        self.records.remove(&id);
        self.pending.remove(id);
        if let Some(store) = self.store.as_ref() {
            if let Err(e) = store.delete(id) {
                error!("failed to delete freed bundle {id}: {e}");
            }
        }
        crate::externalrouteragent::agent::Daemon::from_registry().do_send(PublishEvent {
            event: ExternalEvent::BundleFreed { bundle_id: id },
        });
        debug!("bundle {id} freed");
    }

    /// Periodic sweep (§3 *expired* lifecycle state, §4.5): any bundle still
    /// in a non-terminal state whose creation-time plus lifetime has passed
    /// transitions to `Expired` and has its custody obligation, if any,
    /// discharged locally without waiting for an ACS.
    fn scan_expired(&mut self, ctx: &mut Context<Self>) {
        let now = DtnTime::now().timestamp;
        let expired_ids: Vec<u64> = self
            .records
            .iter()
            .filter(|(_, record)| {
                !matches!(
                    record.bundleref.get_state(),
                    State::Delivered | State::Forwarded | State::Invalid | State::Expired
                )
            })
            .filter(|(_, record)| {
                let pb = record.bundleref.get_primary_block();
                pb.creation_timestamp.creation_time.timestamp + pb.lifetime < now
            })
            .map(|(&id, _)| id)
            .collect();
        for id in expired_ids {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            debug!("bundle {id} expired");
            record.bundleref = record.bundleref.with_state(State::Expired, None);
            let updated = record.bundleref.clone();
            crate::bundleprotocolagent::agent::Daemon::from_registry()
                .do_send(EventBundleUpdated { bundle: updated });
            crate::custodyagent::agent::Daemon::from_registry().do_send(DischargeLocal {
                bundle_id: id,
                reason: DischargeReason::LifetimeExpired,
            });
            self.maybe_free(id, State::Expired, ctx);
        }
    }
}
