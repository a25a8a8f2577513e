// Credentials supplied to the SMB client during authentication
//
// The client asks for credentials synchronously, on the worker thread, each
// time it needs to authenticate against a server. The answer comes from the
// credentials configured at construction; with none configured the client
// falls back to an anonymous (guest) session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Workgroup, username and optional password for a share.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareCredentials {
    #[serde(default)]
    pub workgroup: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl ShareCredentials {
    pub fn new(workgroup: impl Into<String>, username: impl Into<String>) -> Self {
        Self { workgroup: workgroup.into(), username: username.into(), password: None }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for ShareCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareCredentials")
            .field("workgroup", &self.workgroup)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The answer handed back to the client's authentication callback.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthCredentials {
    pub workgroup: String,
    pub username: String,
    pub password: String,
}

impl AuthCredentials {
    /// Empty credentials request a guest session
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("workgroup", &self.workgroup)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Callback consulted by the SMB client whenever it needs credentials.
pub trait CredentialSource: Send {
    fn credentials(&mut self, server: &str, share: &str) -> AuthCredentials;
}

impl<F> CredentialSource for F
where
    F: FnMut(&str, &str) -> AuthCredentials + Send,
{
    fn credentials(&mut self, server: &str, share: &str) -> AuthCredentials {
        self(server, share)
    }
}

/// Serves the credentials the filesystem was constructed with.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: Option<ShareCredentials>,
}

impl StaticCredentials {
    pub fn new(credentials: Option<ShareCredentials>) -> Self {
        Self { credentials }
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&mut self, server: &str, share: &str) -> AuthCredentials {
        match &self.credentials {
            Some(creds) => {
                tracing::debug!(server, share, username = %creds.username, "Supplying credentials");
                AuthCredentials {
                    workgroup: creds.workgroup.clone(),
                    username: creds.username.clone(),
                    password: creds.password.clone().unwrap_or_default(),
                }
            }
            None => {
                tracing::debug!(server, share, "No credentials configured, using guest session");
                AuthCredentials::default()
            }
        }
    }
}

/// How the client may authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Try Kerberos before anything else
    pub use_kerberos: bool,
    /// Fall back to NTLM when Kerberos fails
    pub allow_ntlm: bool,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self { use_kerberos: false, allow_ntlm: true }
    }
}

/// Everything a client needs to authenticate: the policy and the callback.
pub struct Authenticator {
    policy: AuthPolicy,
    source: Box<dyn CredentialSource>,
}

impl Authenticator {
    pub fn new(policy: AuthPolicy, source: Box<dyn CredentialSource>) -> Self {
        Self { policy, source }
    }

    pub fn policy(&self) -> AuthPolicy {
        self.policy
    }

    pub fn credentials(&mut self, server: &str, share: &str) -> AuthCredentials {
        self.source.credentials(server, share)
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator").field("policy", &self.policy).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials_supplies_configured_user() {
        let creds = ShareCredentials::new("WORKGROUP", "alice").with_password("secret");
        let mut source = StaticCredentials::new(Some(creds));

        let auth = source.credentials("fileserver", "docs");
        assert_eq!(auth.workgroup, "WORKGROUP");
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "secret");
        assert!(!auth.is_anonymous());
    }

    #[test]
    fn test_static_credentials_without_password() {
        let mut source = StaticCredentials::new(Some(ShareCredentials::new("", "bob")));
        let auth = source.credentials("fileserver", "docs");
        assert_eq!(auth.username, "bob");
        assert!(auth.password.is_empty());
    }

    #[test]
    fn test_missing_credentials_are_anonymous() {
        let mut source = StaticCredentials::default();
        assert!(source.credentials("fileserver", "docs").is_anonymous());
    }

    #[test]
    fn test_closure_credential_source() {
        let mut auth = Authenticator::new(
            AuthPolicy::default(),
            Box::new(|server: &str, _share: &str| AuthCredentials {
                workgroup: String::new(),
                username: format!("user@{}", server),
                password: String::new(),
            }),
        );
        assert_eq!(auth.credentials("host", "share").username, "user@host");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = ShareCredentials::new("WG", "alice").with_password("hunter2");
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("alice"));

        let auth = AuthCredentials { password: "hunter2".into(), ..Default::default() };
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }

    #[test]
    fn test_auth_policy_default_is_permissive() {
        let policy = AuthPolicy::default();
        assert!(policy.allow_ntlm);
        assert!(!policy.use_kerberos);
    }
}
