//! JSON shapes of the OS Login REST API and the OAuth token endpoint.
//!
//! The API encodes int64 fields as JSON strings; responses are accepted with
//! either encoding.

use std::collections::HashMap;

use ephemeral_keys::{AccountBinding, KeyMetadata, PosixAccount};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Body of `users.importSshPublicKey`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SshPublicKeyRequest<'a> {
    pub key: &'a str,
    #[serde(serialize_with = "int64_as_string")]
    pub expiration_time_usec: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportSshPublicKeyResponse {
    pub login_profile: Option<LoginProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginProfile {
    #[serde(default)]
    pub posix_accounts: Vec<WirePosixAccount>,
    #[serde(default)]
    pub ssh_public_keys: HashMap<String, WireSshPublicKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePosixAccount {
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default, deserialize_with = "optional_int64")]
    pub uid: Option<i64>,
    #[serde(default, deserialize_with = "optional_int64")]
    pub gid: Option<i64>,
    #[serde(default)]
    pub home_directory: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireSshPublicKey {
    #[serde(default)]
    pub key: String,
    #[serde(default, deserialize_with = "optional_int64")]
    pub expiration_time_usec: Option<i64>,
}

impl From<LoginProfile> for AccountBinding {
    fn from(profile: LoginProfile) -> Self {
        let posix_accounts = profile
            .posix_accounts
            .into_iter()
            .map(|account| PosixAccount {
                username: account.username,
                uid: account.uid,
                gid: account.gid,
                home_directory: account.home_directory,
                shell: account.shell,
                primary: account.primary,
            })
            .collect();

        // Map keys are the fingerprints the server computed.
        let ssh_public_keys = profile
            .ssh_public_keys
            .into_iter()
            .map(|(fingerprint, key)| {
                (
                    fingerprint,
                    KeyMetadata { key: key.key, expiration_time_usec: key.expiration_time_usec },
                )
            })
            .collect();

        AccountBinding { posix_accounts, ssh_public_keys }
    }
}

/// OAuth 2.0 JWT-bearer assertion claims.
#[derive(Debug, Serialize)]
pub(crate) struct JwtBearerClaims<'a> {
    pub iss: &'a str,
    pub scope: &'a str,
    pub aud: &'a str,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

fn int64_as_string<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Int64Repr {
    Number(i64),
    Text(String),
}

fn optional_int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Int64Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Int64Repr::Number(n)) => Ok(Some(n)),
        Some(Int64Repr::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encodes_expiry_as_string() {
        let body = SshPublicKeyRequest { key: "ssh-ed25519 AAAA", expiration_time_usec: 1_700_000_000_000_000 };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["key"], "ssh-ed25519 AAAA");
        assert_eq!(json["expirationTimeUsec"], "1700000000000000");
    }

    #[test]
    fn test_login_profile_accepts_string_and_number_int64() {
        let json = r#"{
            "loginProfile": {
                "name": "users/svc@proj.iam",
                "posixAccounts": [
                    {"primary": true, "username": "svc_proj_iam", "uid": "4001", "gid": 4001,
                     "homeDirectory": "/home/svc_proj_iam", "shell": "/bin/bash",
                     "operatingSystemType": "LINUX", "accountId": "proj"}
                ],
                "sshPublicKeys": {
                    "abc": {"key": "ssh-rsa AAAA", "expirationTimeUsec": "1700000000000000", "fingerprint": "abc"},
                    "def": {"key": "ssh-rsa BBBB", "fingerprint": "def"}
                }
            }
        }"#;

        let response: ImportSshPublicKeyResponse = serde_json::from_str(json).unwrap();
        let binding = AccountBinding::from(response.login_profile.unwrap());

        let account = &binding.posix_accounts[0];
        assert_eq!(account.username, "svc_proj_iam");
        assert_eq!(account.uid, Some(4001));
        assert_eq!(account.gid, Some(4001));
        assert!(account.primary);
        assert_eq!(binding.ssh_public_keys["abc"].expiration_time_usec, Some(1_700_000_000_000_000));
        assert_eq!(binding.ssh_public_keys["def"].expiration_time_usec, None);
    }

    #[test]
    fn test_empty_login_profile() {
        let response: ImportSshPublicKeyResponse =
            serde_json::from_str(r#"{"loginProfile": {"name": "users/x"}}"#).unwrap();
        let binding = AccountBinding::from(response.login_profile.unwrap());
        assert!(binding.posix_accounts.is_empty());
        assert!(binding.ssh_public_keys.is_empty());
    }

    #[test]
    fn test_invalid_int64_string_is_rejected() {
        let result: Result<WireSshPublicKey, _> =
            serde_json::from_str(r#"{"key": "k", "expirationTimeUsec": "soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_token_response_default_lifetime() {
        let token: TokenResponse = serde_json::from_str(r#"{"access_token": "ya29.x"}"#).unwrap();
        assert_eq!(token.expires_in, 3600);
    }
}
