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

use actix::prelude::*;
use bp7::administrative_record::AdministrativeRecord;
use bp7::administrative_record::aggregate_custody_signal::{
    AggregateCustodySignal, CustodyIdRun,
};
use bp7::administrative_record::custody_signal::{CustodySignal, CustodySignalReason};
use bp7::block::{Block, CanonicalBlock, payload_block::PayloadBlock};
use bp7::blockflags::BlockFlags;
use bp7::bundle::Bundle;
use bp7::bundleflags::BundleFlags;
use bp7::crc::CRCType;
use bp7::endpoint::Endpoint;
use bp7::primaryblock::PrimaryBlock;
use bp7::time::{CreationTimestamp, DtnTime};
use log::{debug, info, warn};

use crate::bundlestorageagent::messages::{RefKind, ReleaseBundle, ReserveBundle, StoreNewBundle};
use crate::common::error::AgentError;
use crate::common::settings::Settings;

use super::messages::{
    AcceptCustodyIfRequested, AggregateCustodySignalReceived, CustodySignalReceived,
    DischargeLocal, FlushAcsTimeout, ForceFlushAll, RetryTimeout,
};
use super::store::Store;
use super::{CustodyEntry, PendingAcs};

fn bucket_key(previous_custodian: &Endpoint, reason: CustodySignalReason) -> (String, u8) {
    (previous_custodian.to_string(), reason as u8)
}

#[derive(Default)]
pub struct Daemon {
    store: Option<Store>,
    my_endpoint: Option<Endpoint>,
    /// Keyed by `local_custody_id`, the same number stamped on the bundle's
    /// `PreviousCustodianIdBlock` when we forward it onward, so an incoming
    /// custody signal echoing that number back matches directly.
    entries: HashMap<u64, CustodyEntry>,
    pending_acs: HashMap<(String, u8), PendingAcs>,
    settings: Settings,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let settings = Settings::from_env();
        self.my_endpoint = Some(Endpoint::new(&settings.my_node_id).unwrap());
        let store = match Store::open(&settings) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Could not open custody store: {e}");
                panic!("Could not open custody store: {e}");
            }
        };
        match store.scan_all() {
            Ok(entries) => {
                for entry in entries {
                    let id = entry.local_custody_id;
                    ctx.run_later(Duration::from_millis(entry.retry_backoff_ms), move |_, ctx| {
                        ctx.address().do_send(RetryTimeout {
                            local_custody_id: id,
                        });
                    });
                    self.entries.insert(id, entry);
                }
            }
            Err(e) => warn!("Failed reloading custody entries from store: {e}"),
        }
        self.store = Some(store);
        self.settings = settings;
    }
}

impl actix::Supervised for Daemon {}
impl SystemService for Daemon {}

impl Handler<AcceptCustodyIfRequested> for Daemon {
    /// The `local_custody_id` this node now holds the obligation under, if
    /// custody was requested (freshly assigned, or the existing one on a
    /// duplicate delivery) — `None` if custody transfer was not requested.
    /// The caller stamps this onto the bundle's `PreviousCustodianIdBlock`
    /// before handing it to the Forwarding Engine.
    type Result = Option<u64>;

    fn handle(&mut self, msg: AcceptCustodyIfRequested, ctx: &mut Self::Context) -> Self::Result {
        let bundle = msg.bundle;
        let pb = bundle.get_primary_block();
        if !pb
            .bundle_processing_flags
            .contains(BundleFlags::CUSTODY_TRANSFER_REQUESTED)
        {
            return None;
        }
        if let Some(existing) = self
            .entries
            .values()
            .find(|e| e.bundle_id == bundle.bundle_id())
        {
            return Some(existing.local_custody_id);
        }
        let previous_custodian = previous_custodian_of(&bundle);
        let Some(store) = self.store.as_ref() else {
            return None;
        };
        let local_custody_id = match store.next_id() {
            Ok(v) => v,
            Err(e) => {
                warn!("Could not assign local custody id: {e}");
                return None;
            }
        };
        // Echo back the id the previous custodian stamped on the bundle, if
        // it tracked one; otherwise this is the bundle's originator
        // accepting custody from itself on first admission, so echo the id
        // just assigned above instead.
        let ack_id = previous_custodian_id_of(&bundle).unwrap_or(local_custody_id);
        let entry = CustodyEntry {
            local_custody_id,
            bundle_id: bundle.bundle_id(),
            previous_custodian: previous_custodian.clone(),
            bundle_source: pb.source_node.clone(),
            bundle_creation_time: pb.creation_timestamp.creation_time.timestamp,
            bundle_creation_sequence: pb.creation_timestamp.sequence_number,
            fragment_offset: pb.fragment_offset,
            fragment_length: pb.total_data_length,
            expires_at_dtntime: pb.creation_timestamp.creation_time.timestamp + pb.lifetime,
            retry_backoff_ms: self.settings.custody_retry_backoff_min_ms,
        };
        if let Err(e) = store.put(&entry) {
            warn!("Could not persist custody entry: {e}");
            return None;
        }
        info!(
            "Accepted custody of bundle {} on behalf of {previous_custodian}",
            bundle.bundle_id()
        );
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReserveBundle {
            bundle_id: bundle.bundle_id(),
            kind: RefKind::CustodyObligation,
        });
        self.queue_signal(previous_custodian, CustodySignalReason::NoAdditionalInformation, true, ack_id, ctx);
        self.schedule_retry(local_custody_id, entry.retry_backoff_ms, ctx);
        self.entries.insert(local_custody_id, entry);
        Some(local_custody_id)
    }
}

impl Handler<DischargeLocal> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: DischargeLocal, _ctx: &mut Self::Context) -> Self::Result {
        let Some((&id, _)) = self
            .entries
            .iter()
            .find(|(_, e)| e.bundle_id == msg.bundle_id)
        else {
            return;
        };
        debug!(
            "discharging custody entry {id} for bundle {} ({:?})",
            msg.bundle_id, msg.reason
        );
        self.discharge(id);
    }
}

impl Handler<CustodySignalReceived> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: CustodySignalReceived, _ctx: &mut Self::Context) -> Self::Result {
        let signal = msg.signal;
        let id = signal.custody_id;
        if self.entries.contains_key(&id) {
            debug!(
                "Custody for transfer {id} {} by next custodian ({:?})",
                if signal.succeeded { "accepted" } else { "refused" },
                signal.reason
            );
            self.discharge(id);
        } else {
            debug!("Dropping custody signal for unknown transfer {id}");
        }
    }
}

impl Handler<AggregateCustodySignalReceived> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: AggregateCustodySignalReceived, _ctx: &mut Self::Context) -> Self::Result {
        for run in msg.signal.runs {
            for id in run.first_id..run.first_id + run.count {
                if self.entries.contains_key(&id) {
                    self.discharge(id);
                } else {
                    debug!("Dropping aggregate custody signal entry for unknown transfer {id}");
                }
            }
        }
    }
}

impl Handler<RetryTimeout> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: RetryTimeout, ctx: &mut Self::Context) -> Self::Result {
        let Some(entry) = self.entries.get_mut(&msg.local_custody_id) else {
            return;
        };
        let bundle_id = entry.bundle_id;
        let backoff = (entry.retry_backoff_ms * 2).min(self.settings.custody_retry_backoff_max_ms);
        entry.retry_backoff_ms = backoff;
        if let Some(store) = &self.store {
            let _ = store.put(entry);
        }
        debug!("Custody retry timeout for bundle {bundle_id}, re-forwarding (next backoff {backoff}ms)");
        crate::forwardingagent::agent::Daemon::from_registry().do_send(
            crate::forwardingagent::messages::RequestRetryForward { bundle_id },
        );
        self.schedule_retry(msg.local_custody_id, backoff, ctx);
    }
}

impl Handler<FlushAcsTimeout> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: FlushAcsTimeout, _ctx: &mut Self::Context) -> Self::Result {
        self.flush_bucket(&msg.bucket_key);
    }
}

impl Handler<ForceFlushAll> for Daemon {
    type Result = Result<(), AgentError>;

    fn handle(&mut self, _msg: ForceFlushAll, _ctx: &mut Self::Context) -> Self::Result {
        let keys: Vec<(String, u8)> = self.pending_acs.keys().cloned().collect();
        for key in keys {
            self.flush_bucket(&key);
        }
        Ok(())
    }
}

impl Daemon {
    fn schedule_retry(&self, id: u64, backoff_ms: u64, ctx: &mut Context<Self>) {
        ctx.run_later(Duration::from_millis(backoff_ms), move |_, ctx| {
            ctx.address().do_send(RetryTimeout {
                local_custody_id: id,
            });
        });
    }

    fn discharge(&mut self, id: u64) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        if let Some(store) = &self.store {
            let _ = store.delete(entry.local_custody_id);
        }
        crate::bundlestorageagent::agent::Daemon::from_registry().do_send(ReleaseBundle {
            bundle_id: entry.bundle_id,
            kind: RefKind::CustodyObligation,
        });
    }

    fn queue_signal(
        &mut self,
        previous_custodian: Endpoint,
        reason: CustodySignalReason,
        succeeded: bool,
        custody_id: u64,
        ctx: &mut Context<Self>,
    ) {
        let key = bucket_key(&previous_custodian, reason);
        let window = self.settings.acs_accumulation_window_ms;
        let soft_cap = self.settings.acs_soft_cap;
        let bucket = self.pending_acs.entry(key.clone()).or_insert_with(|| {
            let opened_at = DtnTime::now().timestamp;
            ctx.run_later(Duration::from_millis(window), {
                let key = key.clone();
                move |_, ctx| {
                    ctx.address().do_send(FlushAcsTimeout {
                        bucket_key: key.clone(),
                    });
                }
            });
            PendingAcs::new(previous_custodian, reason, succeeded, opened_at)
        });
        bucket.custody_ids.push(custody_id);
        if bucket.custody_ids.len() >= soft_cap {
            self.flush_bucket(&key);
        }
    }

    fn flush_bucket(&mut self, key: &(String, u8)) {
        let Some(bucket) = self.pending_acs.remove(key) else {
            return;
        };
        if bucket.custody_ids.is_empty() {
            return;
        }
        let runs = merge_runs(&bucket.custody_ids);
        let ar = AdministrativeRecord::AggregateCustodySignal(AggregateCustodySignal {
            succeeded: bucket.succeeded,
            reason: bucket.reason,
            previous_custodian: bucket.previous_custodian.clone(),
            signal_time: DtnTime::now(),
            runs,
        });
        self.dispatch_admin_record(ar, bucket.previous_custodian);
    }

    fn dispatch_admin_record(&self, ar: AdministrativeRecord, destination: Endpoint) {
        let Some(my_endpoint) = self.my_endpoint.clone() else {
            return;
        };
        let data: Vec<u8> = match ar.try_into() {
            Ok(d) => d,
            Err(e) => {
                warn!("Error serializing custody signal: {e:?}");
                return;
            }
        };
        let bundle = Bundle {
            primary_block: PrimaryBlock {
                version: 7,
                bundle_processing_flags: BundleFlags::ADMINISTRATIVE_RECORD,
                crc: CRCType::NoCRC,
                destination_endpoint: destination,
                source_node: my_endpoint.clone(),
                report_to: my_endpoint,
                creation_timestamp: CreationTimestamp {
                    creation_time: DtnTime::now(),
                    sequence_number: 0,
                },
                lifetime: 24 * 60 * 60 * 1000,
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
        match TryInto::<Vec<u8>>::try_into(bundle) {
            Ok(bundle_data) => {
                crate::bundlestorageagent::agent::Daemon::from_registry()
                    .do_send(StoreNewBundle { bundle_data });
            }
            Err(e) => warn!("Error encoding custody signal bundle: {e:?}"),
        }
    }
}

fn previous_custodian_of(bundle: &crate::bundlestorageagent::StoredBundleRef) -> Endpoint {
    if let Ok(decoded) = bundle.decode_bundle() {
        for block in &decoded.blocks {
            if let Block::PreviousNode(pn) = &block.block {
                return pn.previous_node.clone();
            }
        }
    }
    bundle.get_primary_block().source_node.clone()
}

/// The `local_custody_id` the previous custodian assigned itself and
/// stamped on the bundle before forwarding it here, if any.
fn previous_custodian_id_of(bundle: &crate::bundlestorageagent::StoredBundleRef) -> Option<u64> {
    let decoded = bundle.decode_bundle().ok()?;
    for block in &decoded.blocks {
        if let Block::PreviousCustodianId(p) = &block.block {
            return Some(p.custody_id);
        }
    }
    None
}

/// Sorts and merges a set of custody-ids into the minimal set of
/// consecutive runs `encode_runs` expects. Custody-ids are assigned
/// monotonically per custodian, so bundles forwarded onward in a batch to
/// the same next hop typically coalesce into one or a few runs.
fn merge_runs(ids: &[u64]) -> Vec<CustodyIdRun> {
    let mut sorted: Vec<u64> = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut runs = Vec::new();
    for id in sorted {
        if let Some(last) = runs.last_mut() {
            let CustodyIdRun { first_id, count } = last;
            if *first_id + *count == id {
                *count += 1;
                continue;
            }
        }
        runs.push(CustodyIdRun {
            first_id: id,
            count: 1,
        });
    }
    runs
}
