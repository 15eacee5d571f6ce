use std::sync::{LockResult, Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the guard when a previous holder panicked.
///
/// Cache state is advisory: a poisoned lock still holds usable data, and the
/// persistent tier remains the authority.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), target, op)
}

fn recover<G>(result: LockResult<G>, target: &'static str, op: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}
