//! Sticky weighted version resolution.
//!
//! Given a consumer view and a stable user id, pick exactly one version.
//! The choice depends only on the ordered version list and the user id,
//! so a user keeps seeing the same version for as long as the list is
//! unchanged, while the population as a whole splits according to the
//! configured traffic shares.
//!
//! Resolution never fails: on inconsistent data it falls back to the
//! version flagged `default` and logs the anomaly.

use frontgrid_state::{ConsumerView, ViewVersion};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("view has no versions")]
    Empty,

    #[error("traffic shares total {total}, no version covers position {position}")]
    Uncovered { total: u32, position: i64 },
}

/// 32-bit string hash over UTF-16 code units (`h = 31*h + c`, wrapping).
pub fn hash_code(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

/// Identity of a version list: the microfrontend name followed by
/// `-{version}` for every entry, in list order.
pub fn versions_signature(mfe_name: &str, versions: &[ViewVersion]) -> String {
    versions.iter().fold(mfe_name.to_string(), |mut sig, v| {
        sig.push('-');
        sig.push_str(&v.payload.metadata.version);
        sig
    })
}

/// Bucket in `[0, 100)` for a user against a version list.
pub fn position(signature: &str, user_id: &str) -> i64 {
    let sum = i64::from(hash_code(signature)) + i64::from(hash_code(user_id));
    (sum % 100).abs()
}

/// Pick the version `user_id` should receive.
///
/// Returns `None` only when resolution fails and no version is flagged
/// default.
pub fn resolve<'a>(view: &'a ConsumerView, user_id: &str) -> Option<&'a ViewVersion> {
    match try_resolve(&view.mfe_name, &view.versions, user_id) {
        Ok(version) => Some(version),
        Err(e) => {
            error!(
                project_id = %view.project_id,
                micro_frontend_id = %view.micro_frontend_id,
                user = %user_id,
                error = %e,
                "version resolution failed, using default"
            );
            default_version(&view.versions)
        }
    }
}

/// The strict form of [`resolve`]: report why no version was picked
/// instead of falling back.
pub fn try_resolve<'a>(
    mfe_name: &str,
    versions: &'a [ViewVersion],
    user_id: &str,
) -> Result<&'a ViewVersion, ResolveError> {
    match versions {
        [] => return Err(ResolveError::Empty),
        [only] => return Ok(only),
        _ => {}
    }

    let position = position(&versions_signature(mfe_name, versions), user_id);
    let mut cumulative: u32 = 0;
    for version in versions {
        cumulative = cumulative.saturating_add(version.deployment.traffic);
        if i64::from(cumulative) >= position {
            return Ok(version);
        }
    }

    Err(ResolveError::Uncovered {
        total: cumulative,
        position,
    })
}

fn default_version(versions: &[ViewVersion]) -> Option<&ViewVersion> {
    versions.iter().find(|v| v.deployment.default)
}
