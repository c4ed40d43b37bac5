//! Connection-control handler, RID 0.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::connection::WireService;
use super::packet::Packet;
use super::{VERSION_MAJOR, VERSION_MINOR, types};
use crate::error::{PacketError, ProtocolError};

/// Host and application ids handed out to front ends.
///
/// Registering the same host or application again returns the id it
/// already has, so every connection agrees on them.
#[derive(Debug, Default)]
pub struct Deployments {
    inner: Mutex<DeploymentTable>,
}

#[derive(Debug, Default)]
struct DeploymentTable {
    hosts: HashMap<(String, u16), i32>,
    apps: HashMap<(i32, String), Application>,
    next_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub id: i32,
    pub name: String,
    pub path: String,
    pub host_id: i32,
}

impl Deployments {
    pub fn register_host(&self, name: &str, port: u16) -> i32 {
        let mut t = self.inner.lock();
        let key = (name.to_ascii_lowercase(), port);
        if let Some(id) = t.hosts.get(&key) {
            return *id;
        }
        let id = t.next_id;
        t.next_id += 1;
        t.hosts.insert(key, id);
        id
    }

    pub fn register_app(&self, name: &str, path: &str, host_id: i32) -> i32 {
        let mut t = self.inner.lock();
        let key = (host_id, path.to_string());
        if let Some(app) = t.apps.get(&key) {
            return app.id;
        }
        let id = t.next_id;
        t.next_id += 1;
        t.apps.insert(
            key,
            Application {
                id,
                name: name.to_string(),
                path: path.to_string(),
                host_id,
            },
        );
        id
    }

    pub fn application(&self, id: i32) -> Option<Application> {
        self.inner.lock().apps.values().find(|a| a.id == id).cloned()
    }
}

/// What the connection should do after a control packet.
#[derive(Debug)]
pub enum ControlAction {
    None,
    Reply(Packet),
    /// Allocate a RID, start a request handler and answer REQUEST_RID.
    NewRequest,
}

/// Handles the connection-control exchange. Any packet type it does not
/// expect is a protocol violation.
pub struct ConnectionHandler {
    service: Arc<WireService>,
    closed: bool,
}

impl ConnectionHandler {
    pub fn new(service: Arc<WireService>) -> Self {
        Self {
            service,
            closed: false,
        }
    }

    /// Whether the peer ended the connection with a FATAL packet.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn welcome(&self) -> Result<Packet, PacketError> {
        let mut p = Packet::new(types::WELCOME);
        p.write_u16(VERSION_MAJOR)?;
        p.write_u16(VERSION_MINOR)?;
        p.write_i32(self.service.server_id)?;
        Ok(p)
    }

    pub fn process(&mut self, mut packet: Packet) -> Result<ControlAction, ProtocolError> {
        match packet.typ() {
            types::HOST_REGISTER => {
                let host = packet.read_string()?;
                let port = packet.read_u16()?;
                let id = self.service.deployments.register_host(&host, port);
                info!(host = %host, port, id, "Host registered");
                let mut reply = Packet::new(types::HOST_ID);
                reply.write_i32(id)?;
                Ok(ControlAction::Reply(reply))
            }
            types::APP_REGISTER => {
                let name = packet.read_string()?;
                let path = packet.read_string()?;
                let host_id = packet.read_i32()?;
                let id = self.service.deployments.register_app(&name, &path, host_id);
                info!(app = %name, path = %path, host_id, id, "Application registered");
                let mut reply = Packet::new(types::APP_ID);
                reply.write_i32(id)?;
                Ok(ControlAction::Reply(reply))
            }
            types::NEW_REQUEST => {
                debug!("New request");
                Ok(ControlAction::NewRequest)
            }
            types::ERROR => {
                let msg = packet.read_string().unwrap_or_default();
                warn!(message = %msg, "Peer reported error");
                Ok(ControlAction::None)
            }
            types::FATAL => {
                let msg = packet.read_string().unwrap_or_default();
                warn!(message = %msg, "Peer reported fatal error");
                self.closed = true;
                Ok(ControlAction::None)
            }
            typ => Err(ProtocolError::UnexpectedControl { typ }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::dispatch::Pipeline;

    fn handler() -> ConnectionHandler {
        let mut cfg = ConnectorConfig::default();
        cfg.server_id = 42;
        ConnectionHandler::new(Arc::new(WireService::new(Arc::new(Pipeline::new()), &cfg)))
    }

    #[test]
    fn welcome_layout() {
        let w = handler().welcome().unwrap();
        assert_eq!(w.typ(), types::WELCOME);
        assert_eq!(w.payload(), &[0, 0, 0, 10, 0, 0, 0, 42]);
    }

    #[test]
    fn host_and_app_ids_are_stable() {
        let mut h = handler();
        let mut reg = Packet::new(types::HOST_REGISTER);
        reg.write_string("example.com").unwrap();
        reg.write_u16(80).unwrap();

        let first = match h.process(reg.clone()).unwrap() {
            ControlAction::Reply(mut p) => p.read_i32().unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        let again = match h.process(reg).unwrap() {
            ControlAction::Reply(mut p) => p.read_i32().unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(first, again);

        let mut app = Packet::new(types::APP_REGISTER);
        app.write_string("shop").unwrap();
        app.write_string("/shop").unwrap();
        app.write_i32(first).unwrap();
        match h.process(app).unwrap() {
            ControlAction::Reply(p) => assert_eq!(p.typ(), types::APP_ID),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unexpected_type_is_fatal() {
        let mut h = handler();
        assert_eq!(
            h.process(Packet::new(types::METHOD)).unwrap_err(),
            ProtocolError::UnexpectedControl { typ: types::METHOD }
        );
    }

    #[test]
    fn truncated_register_is_malformed() {
        let mut h = handler();
        let p = Packet::from_payload(types::HOST_REGISTER, &[0, 5, b'a']).unwrap();
        assert!(matches!(h.process(p), Err(ProtocolError::Malformed(_))));
    }
}
