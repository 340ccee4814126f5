#![allow(clippy::unwrap_used, dead_code)]
// Scripted in-memory Ryder device shared by the integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ryder_proto::{Command, Connector, DeviceErrorCode, Error, Response, Transport, opcode};

use ryder_core::{DeviceClient, DeviceService, DeviceSession};
use tokio_util::sync::CancellationToken;

/// INFO reply of a healthy, initialised 0.0.1 device.
pub fn info_reply(major: u8, minor: u8, patch: u8) -> Vec<u8> {
    let mut bytes = b"ryder".to_vec();
    bytes.extend_from_slice(&[major, minor, patch, 0, 1]);
    bytes
}

pub fn address_of(number: u8) -> String {
    format!("1RyderIdentity{number}")
}

#[derive(Debug)]
pub struct FakeState {
    pub info: Vec<u8>,
    /// Reply to the domain step of an app key export. `None` declines.
    pub bundle: Option<String>,
    /// Every command written, in order.
    pub log: Vec<Vec<u8>>,
    pub connects: usize,
    /// Fail this many upcoming connects.
    pub failing_connects: usize,
    /// Fail the next exchange with a disconnect.
    pub drop_next_exchange: bool,
    pub closes: usize,
    pub exchange_delay: Option<Duration>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            info: info_reply(0, 0, 1),
            bundle: Some("\u{1}\u{2}app.example.com,02aa,bbbb,cccc".into()),
            log: Vec::new(),
            connects: 0,
            failing_connects: 0,
            drop_next_exchange: false,
            closes: 0,
            exchange_delay: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeRyder {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeRyder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_info(info: Vec<u8>) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().info = info;
        fake
    }

    pub fn with_bundle(bundle: Option<String>) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().bundle = bundle;
        fake
    }

    pub fn log(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn drop_next_exchange(&self) {
        self.state.lock().unwrap().drop_next_exchange = true;
    }

    pub fn fail_connects(&self, count: usize) {
        self.state.lock().unwrap().failing_connects = count;
    }
}

pub struct FakeTransport {
    device: FakeRyder,
    awaiting_domain: bool,
}

impl Transport for FakeTransport {
    async fn exchange(&mut self, command: &Command) -> Result<Response, Error> {
        let delay = {
            let mut state = self.device.state.lock().unwrap();
            state.log.push(command.as_bytes().to_vec());
            if state.drop_next_exchange {
                state.drop_next_exchange = false;
                return Err(Error::Disconnected);
            }
            state.exchange_delay
        };
        // Give other tasks a chance to interleave if the session lets them.
        tokio::task::yield_now().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.device.state.lock().unwrap();
        let bytes = command.as_bytes();
        if self.awaiting_domain {
            self.awaiting_domain = false;
            return Ok(match &state.bundle {
                Some(bundle) => Response::Output(bundle.clone().into_bytes()),
                None => Response::Rejected,
            });
        }
        Ok(match bytes {
            [opcode::INFO] => Response::Output(state.info.clone()),
            [opcode::EXPORT_PUBLIC_IDENTITY, number] => {
                Response::Output(address_of(*number).into_bytes())
            }
            [opcode::EXPORT_OWNER_APP_KEY_PRIVATE_KEY, _] => {
                self.awaiting_domain = true;
                Response::SendInput
            }
            _ => Response::Error(DeviceErrorCode::UnknownCommand),
        })
    }

    async fn close(&mut self) {
        self.device.state.lock().unwrap().closes += 1;
    }
}

impl Connector for FakeRyder {
    type Transport = FakeTransport;

    async fn connect(&self) -> Result<FakeTransport, Error> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        Ok(FakeTransport {
            device: self.clone(),
            awaiting_domain: false,
        })
    }

    fn describe(&self) -> String {
        "fake-ryder".into()
    }
}

pub fn session(fake: &FakeRyder) -> DeviceSession<FakeRyder> {
    DeviceSession::new(
        fake.clone(),
        ryder_core::config::SUPPORTED_FIRMWARE,
        Duration::from_secs(2),
    )
}

/// Open a session on `fake` and serve it through a device service.
pub async fn device_client(fake: &FakeRyder) -> (DeviceClient, DeviceSession<FakeRyder>, CancellationToken) {
    let session = session(fake);
    session.open().await.unwrap();
    let cancel = CancellationToken::new();
    let (client, _handle) = DeviceService::spawn(session.clone(), cancel.clone(), None);
    (client, session, cancel)
}
