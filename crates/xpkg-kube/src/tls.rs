//! TLS secret naming for revisions
//!
//! Certificates are currently issued per revision, so each revision carries
//! the names of the secrets holding its material. Names come from a
//! [`TlsSecretNamer`]; the revision reconciler only stores what it returns.

use crate::apis::TlsSecretNames;

/// What the revision's package asks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsRequirements {
    /// The package runs a controller
    pub controller: bool,
    /// The controller serves webhooks
    pub webhooks: bool,
    /// External secret stores are enabled
    pub ess: bool,
}

/// Fills in the TLS secret names a revision needs
pub trait TlsSecretNamer: Send + Sync {
    /// Assign names that are required and unset. Returns whether any changed.
    fn assign(
        &self,
        package: &str,
        requirements: TlsRequirements,
        names: &mut dyn TlsSecretNames,
    ) -> bool;
}

/// Names derived from the package name, stable across revisions
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageScopedNames;

impl TlsSecretNamer for PackageScopedNames {
    fn assign(
        &self,
        package: &str,
        requirements: TlsRequirements,
        names: &mut dyn TlsSecretNames,
    ) -> bool {
        let mut changed = false;

        if requirements.controller {
            if names.tls_server_secret_name().is_none() {
                names.set_tls_server_secret_name(Some(format!("{}-tls-server", package)));
                changed = true;
            }
            if names.tls_client_secret_name().is_none() {
                names.set_tls_client_secret_name(Some(format!("{}-tls-client", package)));
                changed = true;
            }
        }

        if requirements.webhooks && names.webhook_tls_secret_name().is_none() {
            names.set_webhook_tls_secret_name(Some(format!("webhook-tls-secret-{}", package)));
            changed = true;
        }

        if requirements.ess && names.ess_tls_secret_name().is_none() {
            names.set_ess_tls_secret_name(Some(format!("ess-tls-secret-{}", package)));
            changed = true;
        }

        changed
    }
}

/// Copy every set name from one revision to another
pub fn carry_forward(from: &dyn TlsSecretNames, to: &mut dyn TlsSecretNames) {
    if let Some(name) = from.webhook_tls_secret_name() {
        to.set_webhook_tls_secret_name(Some(name.to_string()));
    }
    if let Some(name) = from.ess_tls_secret_name() {
        to.set_ess_tls_secret_name(Some(name.to_string()));
    }
    if let Some(name) = from.tls_server_secret_name() {
        to.set_tls_server_secret_name(Some(name.to_string()));
    }
    if let Some(name) = from.tls_client_secret_name() {
        to.set_tls_client_secret_name(Some(name.to_string()));
    }
}
