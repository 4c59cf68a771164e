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

use log::{error, info};
use tokio::sync::{broadcast, mpsc};

mod bundleprotocolagent;
mod bundlestorageagent;
mod common;
mod converganceagent;
mod custodyagent;
mod externalrouteragent;
mod forwardingagent;
mod ipcagent;
mod linkagent;
mod pendingindex;
mod registrationagent;
mod routingagent;
mod tcpclconverganceagent;

use crate::common::{messages::Shutdown, settings::Settings};

use actix::{Actor, SystemService};

#[actix_rt::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting up");
    let settings: Settings = Settings::from_env();
    info!("Starting with settings: {settings:?}");
    if let Some(tokio_tracing_port) = settings.tokio_tracing_port.clone() {
        info!("Initializing tokio tracing on port {tokio_tracing_port}");
        console_subscriber::ConsoleLayer::builder()
            .server_addr(([127, 0, 0, 1], tokio_tracing_port.parse().unwrap()))
            .init();
    }

    let (notify_shutdown, _) = broadcast::channel::<()>(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    // Force every background-driven `SystemService` to start now rather
    // than lazily on first message, so their `ctx.run_interval` timers
    // (retry sweeps, ACS flush, initial-load replay, ...) are live before
    // the first bundle can possibly arrive.
    bundlestorageagent::agent::Daemon::from_registry();
    bundleprotocolagent::agent::Daemon::from_registry();
    registrationagent::agent::Daemon::from_registry();
    custodyagent::agent::Daemon::from_registry();
    forwardingagent::agent::Daemon::from_registry();
    linkagent::agent::Daemon::from_registry();
    routingagent::agent::Daemon::from_registry();
    converganceagent::agent::Daemon::from_registry();

    let tcpcl_server_addr = tcpclconverganceagent::server_agent::TCPCLServer::default().start();

    let tcpcl_listener_shutdown_notifier = notify_shutdown.subscribe();
    let tcpcl_listener_shutdown_complete_tx_task = shutdown_complete_tx.clone();
    let tcpcl_listener = tcpclconverganceagent::server_agent::tcpcl_listener(
        tcpcl_listener_shutdown_notifier,
        tcpcl_listener_shutdown_complete_tx_task,
        tcpcl_server_addr.clone(),
    )
    .await
    .unwrap();

    let ipc_listener_shutdown_notifier = notify_shutdown.subscribe();
    let ipc_listener_shutdown_complete_tx_task = shutdown_complete_tx.clone();
    let ipc_daemon_addr = ipcagent::agent::Daemon::from_registry();
    let ipc_listener = ipcagent::agent::ipc_listener(
        ipc_listener_shutdown_notifier,
        ipc_listener_shutdown_complete_tx_task,
        ipc_daemon_addr.clone(),
    )
    .await
    .unwrap();

    let external_router_listener_shutdown_notifier = notify_shutdown.subscribe();
    let external_router_listener_shutdown_complete_tx_task = shutdown_complete_tx.clone();
    let external_router_daemon_addr = externalrouteragent::agent::Daemon::from_registry();
    let external_router_listener = externalrouteragent::agent::external_router_listener(
        external_router_listener_shutdown_notifier,
        external_router_listener_shutdown_complete_tx_task,
        external_router_daemon_addr,
    )
    .await
    .unwrap();

    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        res = tcpcl_listener => {
            if res.is_err() {
                error!("something bad happened with the tcpcl listener. Aborting...");
            }
        }
        res = ipc_listener => {
            if res.is_err() {
                error!("something bad happened with the ipc listener. Aborting...");
            }
        }
        res = external_router_listener => {
            if res.is_err() {
                error!("something bad happened with the external router listener. Aborting...");
            }
        }
        _ = ctrl_c => {
            info!("Shutting down");
        }
    }

    info!("Stopping external connections");
    // Stolen from: https://github.com/tokio-rs/mini-redis/blob/master/src/server.rs
    // When `notify_shutdown` is dropped, all tasks which have `subscribe`d will
    // receive the shutdown signal and can exit
    drop(notify_shutdown);
    // Drop final `Sender` so the `Receiver` below can complete
    drop(shutdown_complete_tx);

    info!("Stopping individual actors");
    tcpcl_server_addr.do_send(Shutdown {});
    ipc_daemon_addr.do_send(Shutdown {});

    info!("Now stopping actor system");
    actix::System::current().stop();

    // Wait for all active connections to finish processing. As the `Sender`
    // handle held by the listener has been dropped above, the only remaining
    // `Sender` instances are held by connection handler tasks. When those drop,
    // the `mpsc` channel will close and `recv()` will return `None`.
    let _ = shutdown_complete_rx.recv().await;

    info!("All done, see you");
}
