//! Lease TTL calculation bounded by the mount's ceilings.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, Utc};

use crate::context::Context;
use crate::error::{FrameworkError, Result};
use crate::field::FieldData;
use crate::path::{operation_fn, OperationFunc};
use crate::request::Request;
use crate::response::Response;
use crate::system_view::SystemView;

/// Parameters for [`calculate_ttl`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlRequest {
    /// Requested extension, e.g. the renew increment.
    pub increment: Duration,
    /// The backend's own TTL for this lease.
    pub backend_ttl: Duration,
    /// Periodic leases renew to this value indefinitely.
    pub period: Duration,
    pub backend_max_ttl: Duration,
    pub explicit_max_ttl: Duration,
    /// Issue time of the lease; now when absent.
    pub start: Option<DateTime<Utc>>,
}

fn truncate_secs(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(chrono::Duration::seconds(1)).unwrap_or(t)
}

fn human(d: Duration) -> String {
    humantime::format_duration(Duration::from_secs(d.as_secs())).to_string()
}

/// Computes the TTL for a new or renewed lease.
///
/// The effective maximum is the smallest of the mount max, the backend max
/// and the explicit max. Returns the TTL and any warnings about capping.
///
/// # Errors
///
/// Fails when the effective maximum is zero or the lease is already past it.
pub fn calculate_ttl(
    sys_view: &dyn SystemView,
    params: TtlRequest,
    now: DateTime<Utc>,
) -> Result<(Duration, Vec<String>)> {
    let now = truncate_secs(now);
    let start = params.start.map(truncate_secs).unwrap_or(now);
    let mut warnings = Vec::new();

    let mut max_ttl = sys_view.max_lease_ttl();
    if !params.backend_max_ttl.is_zero() && params.backend_max_ttl < max_ttl {
        max_ttl = params.backend_max_ttl;
    }
    if !params.explicit_max_ttl.is_zero() && params.explicit_max_ttl < max_ttl {
        max_ttl = params.explicit_max_ttl;
    }
    if max_ttl.is_zero() {
        return Err(FrameworkError::InvalidRequest(
            "max TTL must be greater than zero".to_string(),
        ));
    }

    let mut ttl;
    let mut max_valid_time = None;
    if !params.period.is_zero() {
        let mut period = params.period;
        if period > max_ttl {
            warnings.push(format!(
                "period of {:?} exceeded the effective max_ttl of {:?}; period value is capped accordingly",
                human(period),
                human(max_ttl)
            ));
            period = max_ttl;
        }
        ttl = period;
        if !params.explicit_max_ttl.is_zero() {
            max_valid_time = start.checked_add_signed(chrono_duration(params.explicit_max_ttl));
        }
    } else {
        ttl = if !params.increment.is_zero() {
            params.increment
        } else if !params.backend_ttl.is_zero() {
            params.backend_ttl
        } else {
            sys_view.default_lease_ttl()
        };
        max_valid_time = start.checked_add_signed(chrono_duration(max_ttl));
    }

    if let Some(max_valid_time) = max_valid_time {
        let remaining = (max_valid_time - now).num_seconds();
        if remaining <= 0 {
            return Err(FrameworkError::InvalidRequest(
                "past the max TTL, cannot renew".to_string(),
            ));
        }
        let remaining = Duration::from_secs(remaining.unsigned_abs());
        if remaining < ttl {
            warnings.push(format!(
                "TTL of {:?} exceeded the effective max_ttl of {:?}; TTL value is capped accordingly",
                human(ttl),
                human(remaining)
            ));
            ttl = remaining;
        }
    }

    Ok((ttl, warnings))
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// A renew handler that extends the request's lease within the ceilings.
///
/// Use as the renew callback of a [`crate::Secret`] or as a backend's auth
/// renew callback.
pub fn lease_extend(
    backend_increment: Duration,
    backend_max: Duration,
    sys_view: Arc<dyn SystemView>,
) -> OperationFunc {
    operation_fn(move |_ctx: Context, req: Request, _data: FieldData| {
        let sys_view = sys_view.clone();
        async move {
            let lease = match (&req.auth, &req.secret) {
                (Some(auth), _) => &auth.lease_options,
                (None, Some(secret)) => &secret.lease_options,
                (None, None) => {
                    return Err(FrameworkError::InvalidRequest(
                        "no lease options for request".to_string(),
                    ))
                }
            };

            let (ttl, warnings) = calculate_ttl(
                sys_view.as_ref(),
                TtlRequest {
                    increment: lease.increment,
                    backend_ttl: backend_increment,
                    backend_max_ttl: backend_max,
                    start: lease.issue_time,
                    ..TtlRequest::default()
                },
                Utc::now(),
            )?;

            let mut resp = Response {
                auth: req.auth.clone(),
                secret: if req.auth.is_some() { None } else { req.secret.clone() },
                warnings,
                ..Response::default()
            };
            if let Some(auth) = resp.auth.as_mut() {
                auth.lease_options.ttl = ttl;
            } else if let Some(secret) = resp.secret.as_mut() {
                secret.lease_options.ttl = ttl;
            }
            Ok(Some(resp))
        }
    })
}
