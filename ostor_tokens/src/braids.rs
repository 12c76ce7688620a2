use aliri_braid::braid;
use std::fmt;

macro_rules! redacted {
    ($ty:ty => $label:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $label, "***"))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $label, "***"))
            }
        }
    };
}

/// An account identifier known to the identity service
#[braid(serde)]
pub struct AccountId;

/// A long-lived account secret, exchanged for short-lived token sets
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccountSecret;

redacted!(AccountSecretRef => "ACCOUNT SECRET");

/// A short-lived bearer access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef => "ACCESS TOKEN");

/// A delegation token issued when acting on behalf of another account
#[braid(serde, debug = "owned", display = "owned")]
pub struct DelegationToken;

redacted!(DelegationTokenRef => "DELEGATION TOKEN");

/// An identity token describing the authenticated principal
#[braid(serde)]
pub struct IdentityToken;

/// A refresh handle, redeemable for a new token set without re-presenting
/// the account secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshHandle;

redacted!(RefreshHandleRef => "REFRESH HANDLE");
