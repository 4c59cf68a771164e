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

use std::time::Duration;

use actix::prelude::*;
use log::{info, warn};

use crate::{
    converganceagent::messages::{AgentConnectNode, AgentDisconnectNode},
    forwardingagent::messages::{ApplyLinkThrottle, LinkUnavailable},
    routingagent::messages::{AddRoute, RemoveRoute, RouteType},
};

use super::messages::{
    AddLink, Link, LinkConnectionStatus, ListLinks, NotifyLinkConnected, NotifyLinkDisconnected,
    RemoveLink, SetLinkEnabled, SetLinkThrottle, TryConnect,
};

#[derive(Default)]
pub struct Daemon {
    links: Vec<Link>,
}

impl Actor for Daemon {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(Duration::from_secs(60), |_, ctx| {
            ctx.notify(TryConnect {});
        });
    }
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<ListLinks> for Daemon {
    type Result = Vec<Link>;

    fn handle(&mut self, _msg: ListLinks, _ctx: &mut Context<Self>) -> Self::Result {
        self.links.clone()
    }
}

impl Handler<AddLink> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: AddLink, _ctx: &mut Context<Self>) -> Self::Result {
        let AddLink { url } = msg;
        let mut link = Link {
            url: url.clone(),
            connection_status: LinkConnectionStatus::Disconnected,
            remote_endpoint: None,
            temporary: false,
            enabled: true,
            throttle_bps: None,
        };
        if !self.links.contains(&link) {
            link.connection_status = LinkConnectionStatus::Connecting;
            self.links.push(link);
            crate::converganceagent::agent::Daemon::from_registry()
                .do_send(AgentConnectNode { url });
        }
    }
}

impl Handler<RemoveLink> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: RemoveLink, _ctx: &mut Context<Self>) -> Self::Result {
        let RemoveLink { url } = msg;
        let link = Link {
            url: url.clone(),
            connection_status: LinkConnectionStatus::Disconnected,
            remote_endpoint: None,
            temporary: false,
            enabled: true,
            throttle_bps: None,
        };
        if let Some(pos) = self.links.iter().position(|x| x == &link) {
            let link = &mut self.links[pos];
            link.temporary = true;
            link.connection_status = LinkConnectionStatus::Disconnecting;

            crate::converganceagent::agent::Daemon::from_registry()
                .do_send(AgentDisconnectNode { url });
        }
    }
}

impl Handler<NotifyLinkConnected> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: NotifyLinkConnected, _ctx: &mut Context<Self>) -> Self::Result {
        let NotifyLinkConnected {
            url,
            endpoint,
            max_bundle_size,
        } = msg;
        match self.links.iter().position(|n| n.url == url) {
            Some(pos) => {
                let link = &mut self.links[pos];
                link.connection_status = LinkConnectionStatus::Connected;
                link.remote_endpoint = Some(endpoint.clone());
            }
            None => {
                self.links.push(Link {
                    url,
                    connection_status: LinkConnectionStatus::Connected,
                    remote_endpoint: Some(endpoint.clone()),
                    temporary: true,
                    enabled: true,
                    throttle_bps: None,
                });
            }
        }
        crate::routingagent::agent::Daemon::from_registry().do_send(AddRoute {
            target: endpoint.clone(),
            route_type: RouteType::Connected,
            next_hop: endpoint,
            max_bundle_size: Some(max_bundle_size),
        });
    }
}

impl Handler<NotifyLinkDisconnected> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: NotifyLinkDisconnected, _ctx: &mut Context<Self>) -> Self::Result {
        let NotifyLinkDisconnected { url } = msg;
        match self.links.iter().position(|n| n.url == url) {
            Some(pos) => {
                let link = &mut self.links[pos];

                if let Some(remote_endpoint) = link.remote_endpoint.clone() {
                    crate::routingagent::agent::Daemon::from_registry().do_send(RemoveRoute {
                        target: remote_endpoint.clone(),
                        route_type: RouteType::Connected,
                        next_hop: remote_endpoint.clone(),
                    });
                    crate::forwardingagent::agent::Daemon::from_registry().do_send(
                        LinkUnavailable {
                            next_hop: remote_endpoint,
                        },
                    );
                }

                if link.temporary {
                    self.links.remove(pos);
                } else {
                    link.connection_status = LinkConnectionStatus::Disconnected;
                    link.remote_endpoint = None;
                }
            }
            None => {
                warn!("We received a link disconnect info, but dont know about the link: {url}");
            }
        }
    }
}

impl Handler<TryConnect> for Daemon {
    type Result = ();

    fn handle(&mut self, _msg: TryConnect, _ctx: &mut Context<Self>) -> Self::Result {
        for link in &mut self.links {
            if link.connection_status == LinkConnectionStatus::Disconnected
                && !link.temporary
                && link.enabled
            {
                info!("Trying to reconnect to {}", link.url);
                link.connection_status = LinkConnectionStatus::Connecting;
                crate::converganceagent::agent::Daemon::from_registry().do_send(
                    AgentConnectNode {
                        url: link.url.clone(),
                    },
                );
            }
        }
    }
}

impl Handler<SetLinkEnabled> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: SetLinkEnabled, _ctx: &mut Context<Self>) -> Self::Result {
        let SetLinkEnabled { url, enabled } = msg;
        let Some(link) = self.links.iter_mut().find(|l| l.url == url) else {
            warn!("SetLinkEnabled for unknown link {url}");
            return;
        };
        link.enabled = enabled;
        if !enabled {
            if matches!(
                link.connection_status,
                LinkConnectionStatus::Connected | LinkConnectionStatus::Connecting
            ) {
                link.connection_status = LinkConnectionStatus::Disconnecting;
                crate::converganceagent::agent::Daemon::from_registry()
                    .do_send(AgentDisconnectNode { url });
            }
        } else if link.connection_status == LinkConnectionStatus::Disconnected {
            info!("Link {url} re-enabled, reconnecting");
            link.connection_status = LinkConnectionStatus::Connecting;
            crate::converganceagent::agent::Daemon::from_registry().do_send(AgentConnectNode {
                url,
            });
        }
    }
}

impl Handler<SetLinkThrottle> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: SetLinkThrottle, _ctx: &mut Context<Self>) -> Self::Result {
        let SetLinkThrottle { url, bits_per_second } = msg;
        let Some(link) = self.links.iter_mut().find(|l| l.url == url) else {
            warn!("SetLinkThrottle for unknown link {url}");
            return;
        };
        link.throttle_bps = bits_per_second;
        if let Some(next_hop) = link.remote_endpoint.clone() {
            crate::forwardingagent::agent::Daemon::from_registry().do_send(ApplyLinkThrottle {
                next_hop,
                bits_per_second,
            });
        }
    }
}
