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

use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub my_node_id: String,
    pub tcpcl_listen_address: String,
    pub tcpcl_certificate_path: Option<String>,
    pub tcpcl_key_path: Option<String>,
    pub tcpcl_trusted_certs_path: Option<String>,
    pub tokio_tracing_port: Option<String>,

    /// Directory the Bundle Store keeps its rocksdb metadata database and
    /// content-addressed payload files under.
    pub storage_path: String,
    /// Payloads at or above this size are written to the content-addressed
    /// store as their own file rather than inlined into the metadata record.
    pub payload_spill_threshold_bytes: u64,

    /// How long the Custody Manager accumulates signals for one
    /// (previous-custodian, reason) pair before flushing a Pending ACS.
    pub acs_accumulation_window_ms: u64,
    /// Flush a Pending ACS early once it holds this many custody-ids.
    pub acs_soft_cap: usize,
    /// Lower bound of the custody retransmission exponential backoff.
    pub custody_retry_backoff_min_ms: u64,
    /// Upper bound of the custody retransmission exponential backoff.
    pub custody_retry_backoff_max_ms: u64,

    /// How often the Bundle Store scans for bundles whose lifetime has
    /// elapsed.
    pub bundle_expiry_scan_interval_ms: u64,
    /// Consecutive transmission failures to the same link before the
    /// Forwarding Engine falls back to re-consulting the routing oracle
    /// instead of retrying that link again.
    pub forwarding_failure_threshold: u32,

    /// Listen address for the External Router Channel.
    pub external_router_listen_address: String,
    /// Largest frame the External Router Channel accepts from a peer.
    pub external_router_max_frame_bytes: u64,

    /// Listen address for the IPC Layer (replaces the teacher's gRPC
    /// client API address; the wire protocol is a bit-exact framed codec
    /// now, not gRPC).
    pub ipc_listen_address: String,
    /// Bundle payloads above this size are spilled to a temp file and
    /// streamed rather than held in an IPC session's memory.
    pub ipc_payload_memory_limit_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            my_node_id: "dtn://defaultnodeid".into(),
            tcpcl_listen_address: "[::1]:4556".into(),
            tcpcl_certificate_path: None,
            tcpcl_key_path: None,
            tcpcl_trusted_certs_path: None,
            tokio_tracing_port: None,

            storage_path: "/var/lib/dtrd".into(),
            payload_spill_threshold_bytes: 64 * 1024,

            acs_accumulation_window_ms: 5_000,
            acs_soft_cap: 256,
            custody_retry_backoff_min_ms: 1_000,
            custody_retry_backoff_max_ms: 300_000,
            bundle_expiry_scan_interval_ms: 1_000,
            forwarding_failure_threshold: 3,

            external_router_listen_address: "[::1]:4557".into(),
            external_router_max_frame_bytes: 16 * 1024 * 1024,

            ipc_listen_address: "[::1]:50051".into(),
            ipc_payload_memory_limit_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Ok(setting) = env::var("NODE_ID") {
            settings.my_node_id = setting;
        }
        if let Ok(setting) = env::var("TCPCL_LISTEN_ADDRESS") {
            settings.tcpcl_listen_address = setting;
        }
        if let Ok(setting) = env::var("TCPCL_CERTIFICATE_PATH") {
            settings.tcpcl_certificate_path = Some(setting);
        }
        if let Ok(setting) = env::var("TCPCL_KEY_PATH") {
            settings.tcpcl_key_path = Some(setting);
        }
        if let Ok(setting) = env::var("TCPCL_TRUSTED_CERTS_PATH") {
            settings.tcpcl_trusted_certs_path = Some(setting);
        }
        if let Ok(setting) = env::var("TOKIO_TRACING_PORT") {
            settings.tokio_tracing_port = Some(setting);
        }
        if let Ok(setting) = env::var("STORAGE_PATH") {
            settings.storage_path = setting;
        }
        if let Ok(setting) = env::var("PAYLOAD_SPILL_THRESHOLD_BYTES") {
            if let Ok(parsed) = setting.parse() {
                settings.payload_spill_threshold_bytes = parsed;
            }
        }
        if let Ok(setting) = env::var("ACS_ACCUMULATION_WINDOW_MS") {
            if let Ok(parsed) = setting.parse() {
                settings.acs_accumulation_window_ms = parsed;
            }
        }
        if let Ok(setting) = env::var("ACS_SOFT_CAP") {
            if let Ok(parsed) = setting.parse() {
                settings.acs_soft_cap = parsed;
            }
        }
        if let Ok(setting) = env::var("CUSTODY_RETRY_BACKOFF_MIN_MS") {
            if let Ok(parsed) = setting.parse() {
                settings.custody_retry_backoff_min_ms = parsed;
            }
        }
        if let Ok(setting) = env::var("CUSTODY_RETRY_BACKOFF_MAX_MS") {
            if let Ok(parsed) = setting.parse() {
                settings.custody_retry_backoff_max_ms = parsed;
            }
        }
        if let Ok(setting) = env::var("BUNDLE_EXPIRY_SCAN_INTERVAL_MS") {
            if let Ok(parsed) = setting.parse() {
                settings.bundle_expiry_scan_interval_ms = parsed;
            }
        }
        if let Ok(setting) = env::var("FORWARDING_FAILURE_THRESHOLD") {
            if let Ok(parsed) = setting.parse() {
                settings.forwarding_failure_threshold = parsed;
            }
        }
        if let Ok(setting) = env::var("EXTERNAL_ROUTER_LISTEN_ADDRESS") {
            settings.external_router_listen_address = setting;
        }
        if let Ok(setting) = env::var("EXTERNAL_ROUTER_MAX_FRAME_BYTES") {
            if let Ok(parsed) = setting.parse() {
                settings.external_router_max_frame_bytes = parsed;
            }
        }
        if let Ok(setting) = env::var("IPC_LISTEN_ADDRESS") {
            settings.ipc_listen_address = setting;
        }
        if let Ok(setting) = env::var("IPC_PAYLOAD_MEMORY_LIMIT_BYTES") {
            if let Ok(parsed) = setting.parse() {
                settings.ipc_payload_memory_limit_bytes = parsed;
            }
        }
        settings
    }
}
