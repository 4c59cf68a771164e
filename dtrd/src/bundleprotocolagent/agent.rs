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

use crate::{
    bundlestorageagent::{
        State, StoredBundleRef,
        messages::{EventBundleUpdated, EventNewBundleStored, StoreNewBundle, UpdateBundle},
    },
    common::settings::Settings,
    custodyagent::messages::{
        AcceptCustodyIfRequested, AggregateCustodySignalReceived, CustodySignalReceived,
        DischargeLocal,
    },
    forwardingagent::messages::{
        EventBundleForwarded, EventBundleForwardingFailed, ForwardBundle,
    },
    registrationagent::messages::{self, Deliver},
};
use bp7::{
    administrative_record::{
        AdministrativeRecord,
        bundle_status_report::{
            BundleStatusInformation, BundleStatusItem, BundleStatusReason, BundleStatusReport,
        },
    },
    block::{
        Block, CanonicalBlock, hop_count_block::HopCountBlock, payload_block::PayloadBlock,
        previous_custodian_id_block::PreviousCustodianIdBlock,
        previous_node_block::PreviousNodeBlock,
    },
    blockflags::BlockFlags,
    bundle::Bundle,
    bundleflags::BundleFlags,
    crc::CRCType,
    endpoint::Endpoint,
    primaryblock::PrimaryBlock,
    time::{CreationTimestamp, DtnTime},
};
use log::{debug, warn};

use actix::prelude::*;

const HOP_LIMIT_DEFAULT: u64 = 16;

/// The Event Dispatcher (component 1): every other component only ever
/// reports a state change or asks for a decision ("was custody requested",
/// "where does this go"); it holds no bundle queues of its own any more
/// (those live in the Registration Table and the Forwarding Engine), just
/// this node's own endpoint.
#[derive(Default)]
pub struct Daemon {
    endpoint: Option<Endpoint>,
}

impl Actor for Daemon {
    type Context = Context<Self>;
    fn started(&mut self, _ctx: &mut Context<Self>) {
        let settings = Settings::from_env();
        self.endpoint = Some(Endpoint::new(&settings.my_node_id).unwrap());
    }
}
impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<EventNewBundleStored> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: EventNewBundleStored, _ctx: &mut Self::Context) -> Self::Result {
        let EventNewBundleStored { bundle } = msg;
        if !bundle
            .get_primary_block()
            .source_node
            .matches_node(self.endpoint.as_ref().unwrap())
        {
            self.send_status_report_received(&bundle);
        }
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
            bundleref: bundle,
            new_state: State::Valid,
            new_data: None,
        });
    }
}

impl Handler<EventBundleUpdated> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: EventBundleUpdated, ctx: &mut Self::Context) -> Self::Result {
        let EventBundleUpdated { bundle } = msg;
        let destination = bundle.get_primary_block().destination_endpoint.clone();
        match bundle.get_state() {
            State::Received => unreachable!(),
            State::Valid => self.handle_valid_bundle(bundle, destination, ctx),
            State::DeliveryQueued => {
                crate::registrationagent::agent::Daemon::from_registry()
                    .do_send(Deliver { bundle });
            }
            State::ForwardingQueued => {
                crate::forwardingagent::agent::Daemon::from_registry()
                    .do_send(ForwardBundle { bundle });
            }
            State::Expired => {
                self.send_status_report_deleted(&bundle, BundleStatusReason::LifetimeExpired);
            }
            State::Delivered | State::Forwarded | State::Invalid => {
                // Terminal: nothing further for the dispatcher to do.
            }
        }
    }
}

impl Handler<messages::EventBundleDelivered> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: messages::EventBundleDelivered, _ctx: &mut Self::Context) -> Self::Result {
        let messages::EventBundleDelivered { bundle, .. } = msg;
        self.send_status_report_delivered(&bundle);
        crate::custodyagent::agent::Daemon::from_registry().do_send(DischargeLocal {
            bundle_id: bundle.bundle_id(),
            reason: crate::custodyagent::messages::DischargeReason::Delivered,
        });
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
            bundleref: bundle,
            new_state: State::Delivered,
            new_data: None,
        });
    }
}

impl Handler<messages::EventBundleDeliveryFailed> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: messages::EventBundleDeliveryFailed, _ctx: &mut Self::Context) -> Self::Result {
        warn!(
            "local delivery of bundle {} to {} failed; it stays reserved until the registration reactivates",
            msg.bundle.bundle_id(),
            msg.endpoint
        );
    }
}

impl Handler<EventBundleForwarded> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: EventBundleForwarded, _ctx: &mut Self::Context) -> Self::Result {
        let EventBundleForwarded { bundle, .. } = msg;
        self.send_status_report_forwarded(&bundle);
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
            bundleref: bundle,
            new_state: State::Forwarded,
            new_data: None,
        });
    }
}

impl Handler<EventBundleForwardingFailed> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: EventBundleForwardingFailed, _ctx: &mut Self::Context) -> Self::Result {
        debug!(
            "forwarding bundle {} towards {} failed; the Forwarding Engine has already requeued it",
            msg.bundle.bundle_id(),
            msg.endpoint
        );
    }
}

impl Daemon {
    fn handle_valid_bundle(
        &mut self,
        bundle: StoredBundleRef,
        destination: Endpoint,
        ctx: &mut Context<Self>,
    ) {
        let my_endpoint = self.endpoint.as_ref().unwrap();
        if my_endpoint.matches_node(&destination) {
            if bundle
                .get_primary_block()
                .bundle_processing_flags
                .contains(BundleFlags::ADMINISTRATIVE_RECORD)
            {
                self.handle_administrative_record(&bundle);
                crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
                    bundleref: bundle,
                    new_state: State::Delivered,
                    new_data: None,
                });
                return;
            }
            crate::custodyagent::agent::Daemon::from_registry()
                .do_send(AcceptCustodyIfRequested {
                    bundle: bundle.clone(),
                });
            crate::bundlestorageagent::agent::Daemon::from_registry().do_send(UpdateBundle {
                bundleref: bundle,
                new_state: State::DeliveryQueued,
                new_data: None,
            });
            return;
        }

        // The custody-id this node ends up holding the obligation under (if
        // any) has to be known before `forward_bundle` stamps it onto the
        // outgoing `PreviousCustodianIdBlock`, so the decision is awaited
        // here instead of fired with `do_send`.
        crate::custodyagent::agent::Daemon::from_registry()
            .send(AcceptCustodyIfRequested {
                bundle: bundle.clone(),
            })
            .into_actor(self)
            .then(move |res, act, _ctx| {
                let custody_id = res.unwrap_or(None);
                match act.forward_bundle(&bundle, custody_id) {
                    Ok(new_data) => {
                        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(
                            UpdateBundle {
                                bundleref: bundle,
                                new_state: State::ForwardingQueued,
                                new_data: Some(new_data),
                            },
                        );
                    }
                    Err(reason) => {
                        warn!("can not forward bundle {}: {reason:?}", bundle.bundle_id());
                        act.send_status_report_deleted(&bundle, reason);
                        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(
                            UpdateBundle {
                                bundleref: bundle,
                                new_state: State::Invalid,
                                new_data: None,
                            },
                        );
                    }
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn handle_administrative_record(&self, bundle: &StoredBundleRef) {
        let Some(data) = bundle.get_bundle_data() else {
            warn!("administrative record bundle {} has no data", bundle.bundle_id());
            return;
        };
        let decoded: Bundle = match data.as_slice().try_into() {
            Ok(b) => b,
            Err(e) => {
                warn!("could not decode administrative record bundle: {e:?}");
                return;
            }
        };
        let payload = decoded.payload_block();
        let ar: AdministrativeRecord = match payload.data.to_vec().try_into() {
            Ok(ar) => ar,
            Err(e) => {
                warn!("could not decode administrative record: {e:?}");
                return;
            }
        };
        match ar {
            AdministrativeRecord::CustodySignal(signal) => {
                crate::custodyagent::agent::Daemon::from_registry()
                    .do_send(CustodySignalReceived { signal });
            }
            AdministrativeRecord::AggregateCustodySignal(signal) => {
                crate::custodyagent::agent::Daemon::from_registry()
                    .do_send(AggregateCustodySignalReceived { signal });
            }
            AdministrativeRecord::BundleStatusReport(report) => {
                debug!("received bundle status report: {report:?}");
            }
        }
    }

    fn send_status_report(
        &self,
        bundle: &StoredBundleRef,
        reason: BundleStatusReason,
        is_received: bool,
        is_forwarded: bool,
        is_delivered: bool,
        is_deleted: bool,
    ) {
        let now = DtnTime::now();
        let item = |asserted: bool| BundleStatusItem {
            is_asserted: asserted,
            timestamp: if asserted { Some(now) } else { None },
        };
        let pb = bundle.get_primary_block();
        let ar = AdministrativeRecord::BundleStatusReport(BundleStatusReport {
            status_information: BundleStatusInformation {
                received_bundle: item(is_received),
                forwarded_bundle: item(is_forwarded),
                delivered_bundle: item(is_delivered),
                deleted_bundle: item(is_deleted),
            },
            reason,
            bundle_source: pb.source_node.clone(),
            bundle_creation_timestamp: pb.creation_timestamp.clone(),
            fragment_offset: pb.fragment_offset,
            fragment_length: pb.total_data_length,
        });
        let data: Vec<u8> = match ar.try_into() {
            Ok(d) => d,
            Err(e) => {
                warn!("error serializing bundle status report: {e:?}");
                return;
            }
        };
        let my_endpoint = self.endpoint.as_ref().unwrap().clone();
        let bundle_data: Result<Vec<u8>, _> = Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::ADMINISTRATIVE_RECORD,
                crc: CRCType::NoCRC,
                destination_endpoint: pb.report_to.clone(),
                source_node: my_endpoint.clone(),
                report_to: my_endpoint,
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime::now(),
                    sequence_number: 0,
                },
                lifetime: pb.lifetime,
                fragment_offset: None,
                total_data_length: None,
            },
            blocks: vec![CanonicalBlock {
                block: Block::Payload(PayloadBlock { data: data.as_slice() }),
                block_flags: BlockFlags::empty(),
                block_number: 1,
                crc: CRCType::NoCRC,
            }],
        }
        .try_into();
        match bundle_data {
            Ok(bundle_data) => {
                debug!("dispatching bundle status report for {pb:?}");
                crate::bundlestorageagent::agent::Daemon::from_registry()
                    .do_send(StoreNewBundle { bundle_data });
            }
            Err(e) => warn!("error encoding bundle status report bundle: {e:?}"),
        }
    }

    fn send_status_report_delivered(&self, bundle: &StoredBundleRef) {
        if !bundle
            .get_primary_block()
            .bundle_processing_flags
            .contains(BundleFlags::BUNDLE_DELIVERY_STATUS_REQUESTED)
        {
            return;
        }
        self.send_status_report(
            bundle,
            BundleStatusReason::NoAdditionalInformation,
            false,
            false,
            true,
            false,
        );
    }

    fn send_status_report_forwarded(&self, bundle: &StoredBundleRef) {
        if !bundle
            .get_primary_block()
            .bundle_processing_flags
            .contains(BundleFlags::BUNDLE_FORWARDING_STATUS_REQUEST)
        {
            return;
        }
        self.send_status_report(
            bundle,
            BundleStatusReason::NoAdditionalInformation,
            false,
            true,
            false,
            false,
        );
    }

    fn send_status_report_received(&self, bundle: &StoredBundleRef) {
        if !bundle
            .get_primary_block()
            .bundle_processing_flags
            .contains(BundleFlags::BUNDLE_RECEIPTION_STATUS_REQUESTED)
        {
            return;
        }
        self.send_status_report(
            bundle,
            BundleStatusReason::NoAdditionalInformation,
            true,
            false,
            false,
            false,
        );
    }

    fn send_status_report_deleted(&self, bundle: &StoredBundleRef, reason: BundleStatusReason) {
        if !bundle
            .get_primary_block()
            .bundle_processing_flags
            .contains(BundleFlags::BUNDLE_DELETION_STATUS_REQUESTED)
        {
            return;
        }
        self.send_status_report(bundle, reason, false, false, false, true);
    }

    /// Stamps the previous-node block and increments (or creates) the
    /// hop-count block ahead of handing a bundle to the Forwarding Engine.
    /// When `custody_id` is `Some` (we hold a custody obligation for this
    /// bundle), also (re-)stamps the previous-custodian-id block with our
    /// own id, so the next custodian can echo it back in its signal.
    // TODO: support Bundle Age as an alternative to hop count for sourceless clocks
    fn forward_bundle(
        &self,
        sbr: &StoredBundleRef,
        custody_id: Option<u64>,
    ) -> Result<Vec<u8>, BundleStatusReason> {
        let my_endpoint = self.endpoint.as_ref().unwrap();
        let mut bundle: Bundle = sbr
            .get_bundle_data()
            .expect("forwarding-eligible bundle always has data")
            .as_slice()
            .try_into()
            .expect("validation already happened");

        if !my_endpoint.matches_node(&bundle.primary_block.source_node) {
            bundle
                .blocks
                .retain(|b| !matches!(b.block, Block::PreviousNode(_)));
            let block_number = next_block_number(&bundle);
            bundle.blocks.push(CanonicalBlock {
                block: Block::PreviousNode(PreviousNodeBlock {
                    previous_node: my_endpoint.clone(),
                }),
                block_flags: BlockFlags::empty(),
                block_number,
                crc: CRCType::NoCRC,
            });
        }

        if let Some(custody_id) = custody_id {
            bundle
                .blocks
                .retain(|b| !matches!(b.block, Block::PreviousCustodianId(_)));
            let block_number = next_block_number(&bundle);
            bundle.blocks.push(CanonicalBlock {
                block: Block::PreviousCustodianId(PreviousCustodianIdBlock { custody_id }),
                block_flags: BlockFlags::empty(),
                block_number,
                crc: CRCType::NoCRC,
            });
        }

        let hop_limit_exceeded = match bundle
            .blocks
            .iter_mut()
            .find_map(|b| match &mut b.block {
                Block::HopCount(h) => Some(h),
                _ => None,
            }) {
            Some(hop_count) => {
                hop_count.count += 1;
                hop_count.count > hop_count.limit
            }
            None => {
                let block_number = next_block_number(&bundle);
                bundle.blocks.push(CanonicalBlock {
                    block: Block::HopCount(HopCountBlock {
                        limit: HOP_LIMIT_DEFAULT,
                        count: 1,
                    }),
                    block_flags: BlockFlags::empty(),
                    block_number,
                    crc: CRCType::NoCRC,
                });
                false
            }
        };
        if hop_limit_exceeded {
            return Err(BundleStatusReason::HopLimitExceeded);
        }
        Ok(bundle.try_into().expect("re-encoding a just-decoded bundle never fails"))
    }
}

fn next_block_number(bundle: &Bundle) -> u64 {
    bundle.blocks.iter().map(|b| b.block_number).max().unwrap_or(0) + 1
}
