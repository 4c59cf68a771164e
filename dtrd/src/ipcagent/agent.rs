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

use std::{collections::HashMap, io, net::SocketAddr};

use actix::prelude::*;
use log::{error, info};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::common::{messages::Shutdown, settings::Settings};

use super::{messages::NewIpcConnection, session};

/// Upper 16 bits of the session-open handshake word (§6), mirrored back by
/// the client; version mismatch aborts the session.
const OPEN_OPCODE: u16 = 0x4950; // "IP"
const PROTOCOL_VERSION: u16 = 1;

pub async fn ipc_listener(
    mut shutdown: broadcast::Receiver<()>,
    _shutdown_complete_sender: mpsc::Sender<()>,
    daemon: Addr<Daemon>,
) -> Result<JoinHandle<()>, io::Error> {
    let settings = Settings::from_env();
    let socket: SocketAddr = settings.ipc_listen_address.parse().unwrap();
    info!("IPC layer listening on {}", socket);
    let listener = TcpListener::bind(&socket).await?;

    let joinhandle = tokio::spawn(async move {
        loop {
            tokio::select! {
                conn = listener.accept() => {
                    match conn {
                        Ok((stream, address)) => {
                            daemon.do_send(NewIpcConnection { stream, address });
                        }
                        Err(e) => {
                            error!("Error accepting IPC connection: {:?}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown message, stopping the IPC socket");
                    break;
                }
            }
        }
        drop(listener);
        info!("IPC socket has shut down.");
    });
    Ok(joinhandle)
}

/// IPC Layer (component 8). Holds no session state of its own beyond a
/// shutdown handle per connection; each session is a self-contained tokio
/// task (`session::run`) talking to `registrationagent`/`bundlestorageagent`
/// directly over their `SystemService` registries, the same division of
/// labor `tcpclconverganceagent::server_agent` uses for its sessions.
#[derive(Default)]
pub struct Daemon {
    sessions: HashMap<SocketAddr, oneshot::Sender<()>>,
    payload_memory_limit_bytes: u64,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        self.payload_memory_limit_bytes = Settings::from_env().ipc_payload_memory_limit_bytes;
    }
}

impl actix::Supervised for Daemon {}
impl SystemService for Daemon {}

impl Handler<NewIpcConnection> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: NewIpcConnection, _ctx: &mut Context<Self>) -> Self::Result {
        let NewIpcConnection { stream, address } = msg;
        info!("IPC client connected from {}", address);
        let (close_tx, close_rx) = oneshot::channel();
        self.sessions.insert(address, close_tx);
        let payload_memory_limit_bytes = self.payload_memory_limit_bytes;
        tokio::spawn(async move {
            let Some(stream) = handshake(stream).await else {
                return;
            };
            session::run(stream, payload_memory_limit_bytes, close_rx).await;
            info!("IPC session from {} ended", address);
        });
    }
}

impl Handler<Shutdown> for Daemon {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, _ctx: &mut Context<Self>) -> Self::Result {
        for (_, close_tx) in self.sessions.drain() {
            let _ = close_tx.send(());
        }
    }
}

async fn handshake(mut stream: tokio::net::TcpStream) -> Option<tokio::net::TcpStream> {
    let mut buf = [0u8; 4];
    if stream.read_exact(&mut buf).await.is_err() {
        return None;
    }
    let word = u32::from_be_bytes(buf);
    let opcode = (word >> 16) as u16;
    let version = (word & 0xffff) as u16;

    let reply = ((OPEN_OPCODE as u32) << 16) | PROTOCOL_VERSION as u32;
    if stream.write_all(&reply.to_be_bytes()).await.is_err() {
        return None;
    }
    if opcode != OPEN_OPCODE || version != PROTOCOL_VERSION {
        return None;
    }
    Some(stream)
}
