//! Tenant token checks.

use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// Whether `token` is valid for `cluster_id`.
///
/// A per-cluster secret, when configured, replaces the shared secret for
/// that cluster. An empty expected secret never matches.
pub fn authorize(config: &AuthConfig, cluster_id: &str, token: &str) -> bool {
    let expected = config
        .cluster_secrets
        .get(cluster_id)
        .unwrap_or(&config.shared_secret);
    if expected.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(token.as_bytes()).into()
}
