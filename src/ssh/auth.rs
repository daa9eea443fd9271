//! Hop authentication

use super::{handshake_error, HopHandler};
use crate::chain::{Credential, HopSpec};
use crate::error::ChainError;
use russh::client::Handle;
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;

/// Authenticate `hop.username` with the hop's credential
pub(super) async fn authenticate(
    handle: &mut Handle<HopHandler>,
    index: usize,
    hop: &HopSpec,
) -> Result<(), ChainError> {
    let (method, result) = match &hop.credential {
        Credential::Password(password) => (
            "password",
            handle
                .authenticate_password(&hop.username, password.as_str())
                .await,
        ),
        Credential::PrivateKey {
            key_data,
            passphrase,
        } => {
            let key = russh::keys::decode_secret_key(key_data, passphrase.as_deref()).map_err(
                |e| ChainError::AuthenticationFailed {
                    index,
                    cause: format!("unusable private key: {}", e),
                },
            )?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(|e| handshake_error(index, e))?
                .flatten();
            (
                "public key",
                handle
                    .authenticate_publickey(
                        &hop.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await,
            )
        }
    };

    let result = result.map_err(|e| handshake_error(index, e))?;
    if result.success() {
        Ok(())
    } else {
        Err(ChainError::AuthenticationFailed {
            index,
            cause: format!("{} authentication rejected for {}", method, hop),
        })
    }
}
