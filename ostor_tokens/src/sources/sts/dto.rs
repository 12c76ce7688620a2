//! Wire documents exchanged with the security token service

use ostor_clock::DurationSecs;
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    AccessTokenRef, AccountId, AccountSecret, DelegationTokenRef, IdentityTokenRef,
    RefreshHandleRef,
};

/// Long-lived account credentials presented during a secret exchange
#[derive(Debug)]
pub struct AccountCredentials {
    /// The account identifier
    pub account_id: AccountId,

    /// The account secret
    pub account_secret: AccountSecret,
}

/// The grant document for exchanging an account secret
pub(super) struct SecretExchangeGrant<'a> {
    pub credentials: &'a AccountCredentials,
}

impl Serialize for SecretExchangeGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("SecretExchangeGrant", 3)?;
        ser.serialize_field("grant_type", "secret_exchange")?;
        ser.serialize_field("account_id", &self.credentials.account_id)?;
        ser.serialize_field("account_secret", &self.credentials.account_secret)?;
        ser.end()
    }
}

/// The grant document for redeeming a refresh handle
pub(super) struct RefreshGrant<'a> {
    pub refresh_handle: &'a RefreshHandleRef,
}

impl Serialize for RefreshGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshGrant", 2)?;
        ser.serialize_field("grant_type", "refresh")?;
        ser.serialize_field("refresh_handle", self.refresh_handle)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse<'a> {
    #[serde(borrow, default)]
    pub access_token: Option<&'a AccessTokenRef>,
    #[serde(borrow, default)]
    pub delegation_token: Option<&'a DelegationTokenRef>,
    #[serde(borrow, default)]
    pub identity_token: Option<&'a IdentityTokenRef>,
    #[serde(borrow, default)]
    pub refresh_handle: Option<&'a RefreshHandleRef>,
    pub expires_in: DurationSecs,
}
