// ── Identity export operations ──
//
// The two device-command recipes the bridge needs, built on
// `DeviceSession`: public identity export and app-scoped private key
// export (the latter is a two-step sequence with a user confirmation on
// the device).

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ryder_proto::{Command, Connector, Response, opcode};

use crate::error::CoreError;
use crate::session::DeviceSession;

/// Length of the marker the device prepends to the first bundle field.
const BUNDLE_PREFIX_LEN: usize = 2;

/// A public identity held on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub number: u8,
    pub address: String,
}

/// Keys released by the device for one identity and app domain.
#[derive(Debug, Clone)]
pub struct PrivateKeyBundle {
    pub app_domain: String,
    pub app_public_key: String,
    pub app_private_key: SecretString,
    pub owner_private_key: SecretString,
}

/// Outcome of an app key request. A decline on the device is a normal
/// result, not an error.
#[derive(Debug, Clone)]
pub enum AppKeyExport {
    Exported(PrivateKeyBundle),
    Rejected,
}

impl<C: Connector> DeviceSession<C> {
    /// Export the address of identity `number`.
    pub async fn export_public_identity(&self, number: u8) -> Result<PublicIdentity, CoreError> {
        let command = Command::with_arg(opcode::EXPORT_PUBLIC_IDENTITY, number);
        match self.send(&command).await? {
            Response::Output(bytes) => {
                let address = String::from_utf8_lossy(&bytes).into_owned();
                debug!(number, %address, "exported public identity");
                Ok(PublicIdentity { number, address })
            }
            other => Err(CoreError::protocol(format!(
                "export public identity {number}: expected output, got {other}"
            ))),
        }
    }

    /// Ask the device to release the owner and app keys of identity
    /// `number` for `app_domain`. The user confirms or declines on the
    /// device.
    pub async fn request_app_private_key(
        &self,
        number: u8,
        app_domain: String,
    ) -> Result<AppKeyExport, CoreError> {
        self.sequence(|mut seq| async move {
            let command = Command::with_arg(opcode::EXPORT_OWNER_APP_KEY_PRIVATE_KEY, number);
            match seq.send(&command).await? {
                Response::SendInput => {}
                other => {
                    return Err(CoreError::protocol(format!(
                        "app key export: expected input request, got {other}"
                    )));
                }
            }

            match seq.send(&Command::input(&app_domain)).await? {
                Response::Rejected => {
                    info!(number, domain = %app_domain, "app key request declined on device");
                    Ok(AppKeyExport::Rejected)
                }
                Response::Output(bytes) => {
                    parse_key_bundle(&String::from_utf8_lossy(&bytes)).map(AppKeyExport::Exported)
                }
                other => Err(CoreError::protocol(format!(
                    "app key export: expected key bundle, got {other}"
                ))),
            }
        })
        .await
    }
}

/// Parse the comma-delimited `domain, app public, app private, owner
/// private` reply.
pub fn parse_key_bundle(text: &str) -> Result<PrivateKeyBundle, CoreError> {
    let fields: Vec<&str> = text.split(',').collect();
    let [app_domain, app_public, app_private, owner_private, ..] = fields.as_slice() else {
        return Err(CoreError::protocol(format!(
            "key bundle has {} fields, expected 4",
            fields.len()
        )));
    };
    let app_domain = app_domain
        .get(BUNDLE_PREFIX_LEN..)
        .ok_or_else(|| CoreError::protocol("key bundle domain field is truncated"))?;

    Ok(PrivateKeyBundle {
        app_domain: app_domain.to_owned(),
        app_public_key: (*app_public).to_owned(),
        app_private_key: SecretString::from((*app_private).to_owned()),
        owner_private_key: SecretString::from((*owner_private).to_owned()),
    })
}
