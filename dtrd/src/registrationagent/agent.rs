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

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, error, info, warn};

use crate::{
    bundlestorageagent::{
        StoredBundleRef,
        messages::{EnumerateBundles, RefKind, ReleaseBundle, ReserveBundle},
    },
    common::{canceltoken::CancelToken, error::AgentError, settings::Settings},
    pendingindex::GbofId,
};

use super::{
    DeliveryPolicy, ReplayPolicy,
    messages::{
        AckBundle, BindRegistration, Deliver, DeliverBundle, EventBundleDelivered,
        EventBundleDeliveryFailed, FindRegistration, RegisterEndpoint, UnbindRegistration,
        UnregisterEndpoint,
    },
    store::{PersistedRegistration, Store},
};

use actix::prelude::*;

struct RuntimeRegistration {
    persisted: PersistedRegistration,
    active: bool,
    sender: Option<tokio::sync::mpsc::Sender<DeliverBundle>>,
    delivery_queue: VecDeque<StoredBundleRef>,
    /// GBoF-ids already handed to this registration's queue, so a second
    /// admission of the same bundle-or-fragment is not redelivered (I4 as
    /// it applies per-registration, §4.4).
    dedupe_cache: HashSet<GbofId>,
    /// Bundles delivered but awaiting an explicit `dtn_ack` because this
    /// registration's `bundle_ack_required` is set.
    pending_ack: HashMap<u64, StoredBundleRef>,
    load_cancel: Option<CancelToken>,
}

impl RuntimeRegistration {
    fn new(persisted: PersistedRegistration) -> Self {
        Self {
            persisted,
            active: false,
            sender: None,
            delivery_queue: VecDeque::new(),
            dedupe_cache: HashSet::new(),
            pending_ack: HashMap::new(),
            load_cancel: None,
        }
    }
}

#[derive(Default)]
pub struct Daemon {
    store: Option<Store>,
    registrations: HashMap<u64, RuntimeRegistration>,
    insertion_order: Vec<u64>,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let settings = Settings::from_env();
        let store = match Store::open(&settings) {
            Ok(s) => s,
            Err(e) => {
                error!("Could not open registration store: {e}");
                panic!("Could not open registration store: {e}");
            }
        };
        match store.scan_all() {
            Ok(persisted) => {
                for reg in persisted {
                    let id = reg.id;
                    let replay_all = reg.replay_policy == ReplayPolicy::AllQueued;
                    self.registrations.insert(id, RuntimeRegistration::new(reg));
                    self.insertion_order.push(id);
                    if replay_all {
                        self.spawn_initial_load(id, ctx);
                    }
                }
            }
            Err(e) => warn!("Failed reloading registrations from store: {e}"),
        }
        self.store = Some(store);
    }
}

impl actix::Supervised for Daemon {}
impl SystemService for Daemon {}

impl Handler<RegisterEndpoint> for Daemon {
    type Result = Result<u64, AgentError>;

    fn handle(&mut self, msg: RegisterEndpoint, ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.as_ref().ok_or(AgentError::NotFound)?;
        let id = store.next_id()?;
        let persisted = PersistedRegistration {
            id,
            pattern: msg.pattern,
            delivery_policy: msg.delivery_policy,
            replay_policy: msg.replay_policy,
            bundle_ack_required: msg.bundle_ack_required,
            expiration: msg.expiration,
            reg_token: msg.reg_token,
        };
        store.put(&persisted)?;
        info!("Registered new registration {id} for {:?}", persisted.pattern);
        self.registrations.insert(id, RuntimeRegistration::new(persisted));
        self.insertion_order.push(id);
        // `NewOnly` must see only bundles that arrive after this point, not
        // whatever is already sitting in the Pending Index (§4.4); only
        // `AllQueued` gets the background replay scan. `None` gets neither.
        if self.registrations[&id].persisted.replay_policy == ReplayPolicy::AllQueued {
            self.spawn_initial_load(id, ctx);
        }
        Ok(id)
    }
}

impl Handler<UnregisterEndpoint> for Daemon {
    type Result = Result<(), AgentError>;

    fn handle(&mut self, msg: UnregisterEndpoint, _ctx: &mut Self::Context) -> Self::Result {
        let Some(mut reg) = self.registrations.remove(&msg.registration_id) else {
            return Err(AgentError::NotFound);
        };
        self.insertion_order.retain(|id| *id != msg.registration_id);
        if let Some(mut token) = reg.load_cancel.take() {
            token.cancel();
        }
        if let Some(store) = &self.store {
            store.delete(msg.registration_id)?;
        }
        for bundle in reg.delivery_queue.drain(..).chain(reg.pending_ack.drain().map(|(_, b)| b)) {
            crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReleaseBundle {
                bundle_id: bundle.bundle_id(),
                kind: RefKind::RegistrationPending,
            });
        }
        info!("Removed registration {}", msg.registration_id);
        Ok(())
    }
}

impl Handler<FindRegistration> for Daemon {
    type Result = Result<Option<u64>, AgentError>;

    fn handle(&mut self, msg: FindRegistration, _ctx: &mut Self::Context) -> Self::Result {
        for id in &self.insertion_order {
            let reg = &self.registrations[id];
            if msg.reg_token.is_some() && reg.persisted.reg_token != msg.reg_token {
                continue;
            }
            if reg.persisted.pattern.matches(&msg.destination) {
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }
}

impl Handler<BindRegistration> for Daemon {
    type Result = Result<(), AgentError>;

    fn handle(&mut self, msg: BindRegistration, ctx: &mut Self::Context) -> Self::Result {
        let reg = self
            .registrations
            .get_mut(&msg.registration_id)
            .ok_or(AgentError::NotFound)?;
        if reg.active {
            return Err(AgentError::RegistrationInUse);
        }
        reg.active = true;
        reg.sender = Some(msg.sender);
        self.drain_queue(msg.registration_id, ctx);
        Ok(())
    }
}

impl Handler<UnbindRegistration> for Daemon {
    type Result = Result<(), AgentError>;

    fn handle(&mut self, msg: UnbindRegistration, _ctx: &mut Self::Context) -> Self::Result {
        let reg = self
            .registrations
            .get_mut(&msg.registration_id)
            .ok_or(AgentError::NotFound)?;
        reg.active = false;
        reg.sender = None;
        Ok(())
    }
}

impl Handler<AckBundle> for Daemon {
    type Result = Result<(), AgentError>;

    fn handle(&mut self, msg: AckBundle, _ctx: &mut Self::Context) -> Self::Result {
        let reg = self
            .registrations
            .get_mut(&msg.registration_id)
            .ok_or(AgentError::NotFound)?;
        let Some(bundle) = reg.pending_ack.remove(&msg.bundle_id) else {
            return Err(AgentError::NotFound);
        };
        debug!(
            "Registration {} acked bundle {}",
            msg.registration_id, msg.bundle_id
        );
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReleaseBundle {
            bundle_id: msg.bundle_id,
            kind: RefKind::RegistrationPending,
        });
        crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(EventBundleDelivered {
            endpoint: bundle.get_primary_block().destination_endpoint.clone(),
            bundle,
        });
        Ok(())
    }
}

impl Handler<Deliver> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) -> Self::Result {
        let destination = msg.bundle.get_primary_block().destination_endpoint.clone();
        let ids: Vec<u64> = self.insertion_order.clone();
        for id in ids {
            if self.registrations[&id].persisted.pattern.matches(&destination) {
                self.queue_for_registration(id, msg.bundle.clone(), ctx);
            }
        }
    }
}

/// Internal: one bundle from the registration-initial-load scan matched
/// against a single freshly-added registration.
#[derive(Message)]
#[rtype(result = "()")]
struct InitialLoadMatch {
    registration_id: u64,
    bundle: StoredBundleRef,
    cancel: CancelToken,
}

impl Handler<InitialLoadMatch> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: InitialLoadMatch, ctx: &mut Self::Context) -> Self::Result {
        if msg.cancel.is_canceled() {
            return;
        }
        if !self.registrations.contains_key(&msg.registration_id) {
            return;
        }
        self.queue_for_registration(msg.registration_id, msg.bundle, ctx);
    }
}

/// Internal: attempt to hand the head of a registration's queue to its
/// bound IPC session, then continue draining on success.
#[derive(Message)]
#[rtype(result = "()")]
struct DrainQueue {
    registration_id: u64,
}

impl Handler<DrainQueue> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: DrainQueue, ctx: &mut Self::Context) -> Self::Result {
        self.drain_queue(msg.registration_id, ctx);
    }
}

impl Daemon {
    /// Registration Table `deliver(bundle)`, steps (a)-(d) of §4.4 for one
    /// already-matched registration.
    fn queue_for_registration(
        &mut self,
        registration_id: u64,
        bundle: StoredBundleRef,
        ctx: &mut Context<Self>,
    ) {
        let Some(reg) = self.registrations.get_mut(&registration_id) else {
            return;
        };
        if bundle.get_primary_block().fragment_offset.is_some() {
            return;
        }
        let gbof = GbofId::from_primary_block(bundle.get_primary_block());
        if reg.dedupe_cache.contains(&gbof) {
            return;
        }
        if !reg.active && reg.persisted.delivery_policy == DeliveryPolicy::Drop {
            return;
        }
        reg.dedupe_cache.insert(gbof);
        reg.delivery_queue.push_back(bundle.clone());
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReserveBundle {
            bundle_id: bundle.bundle_id(),
            kind: RefKind::RegistrationPending,
        });
        self.drain_queue(registration_id, ctx);
    }

    fn drain_queue(&mut self, registration_id: u64, ctx: &mut Context<Self>) {
        let Some(reg) = self.registrations.get_mut(&registration_id) else {
            return;
        };
        if !reg.active {
            return;
        }
        let Some(sender) = reg.sender.clone() else {
            return;
        };
        let Some(bundle) = reg.delivery_queue.pop_front() else {
            return;
        };
        let bundle_ack_required = reg.persisted.bundle_ack_required;
        let endpoint = bundle.get_primary_block().destination_endpoint.clone();
        let bundle_id = bundle.bundle_id();
        let event_bundle = bundle.clone();
        if bundle_ack_required {
            reg.pending_ack.insert(bundle_id, bundle.clone());
        }

        let fut = async move {
            sender
                .send(DeliverBundle {
                    registration_id,
                    bundle,
                })
                .await
        };
        fut.into_actor(self)
            .then(move |res, act, ctx| {
                match res {
                    Ok(()) => {
                        if !bundle_ack_required {
                            crate::bundlestorageagent::agent::Daemon::from_registry().do_send(
                                ReleaseBundle {
                                    bundle_id,
                                    kind: RefKind::RegistrationPending,
                                },
                            );
                            crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(
                                EventBundleDelivered {
                                    endpoint,
                                    bundle: event_bundle,
                                },
                            );
                        }
                        ctx.address().do_send(DrainQueue { registration_id });
                    }
                    Err(e) => {
                        warn!("Delivery channel for registration {registration_id} closed: {e}");
                        if let Some(reg) = act.registrations.get_mut(&registration_id) {
                            reg.active = false;
                            reg.sender = None;
                            reg.pending_ack.remove(&bundle_id);
                        }
                        crate::bundleprotocolagent::agent::Daemon::from_registry()
                            .do_send(EventBundleDeliveryFailed {
                                endpoint,
                                bundle: event_bundle,
                            });
                    }
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn spawn_initial_load(&mut self, registration_id: u64, ctx: &mut Context<Self>) {
        let cancel = CancelToken::new();
        if let Some(reg) = self.registrations.get_mut(&registration_id) {
            reg.load_cancel = Some(cancel.clone());
        }
        let self_addr = ctx.address();
        let fut = async move {
            let bundles = crate::bundlestorageagent::agent::Daemon::from_registry()
                .send(EnumerateBundles {})
                .await
                .unwrap_or_default();
            for bundle in bundles {
                if cancel.is_canceled() {
                    return;
                }
                self_addr.do_send(InitialLoadMatch {
                    registration_id,
                    bundle,
                    cancel: cancel.clone(),
                });
            }
        };
        tokio::spawn(fut);
    }
}
