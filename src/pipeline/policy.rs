//! Staleness policy: does an indexed entity need fetching again?

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CatalogEntity, LifecycleState};

/// Decide whether `entity` must be re-fetched and re-indexed.
///
/// An unrecognized lifecycle state is an error even when the entity was never
/// indexed, so malformed upstream data stops the loop instead of being stored.
pub fn should_reindex<E: CatalogEntity>(
    entity: &E,
    last_indexed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let state = entity.lifecycle()?;
    Ok(is_stale(state, last_indexed_at, now))
}

/// Staleness for an already-parsed lifecycle state.
pub fn is_stale(
    state: LifecycleState,
    last_indexed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_indexed_at else {
        return true;
    };
    match state.reindex_interval() {
        None => false,
        Some(interval) => now - last >= interval,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::models::BeatmapSet;

    fn set(status: &str) -> BeatmapSet {
        serde_json::from_value(json!({"id": 1, "status": status})).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn never_indexed_is_always_stale() {
        for state in LifecycleState::ALL {
            assert!(should_reindex(&set(state.as_str()), None, now()).unwrap());
        }
    }

    #[test]
    fn terminal_states_never_reindex() {
        for status in ["ranked", "approved"] {
            for age in [Duration::zero(), Duration::days(1), Duration::days(3650)] {
                let last = Some(now() - age);
                assert!(!should_reindex(&set(status), last, now()).unwrap());
            }
            // A clock skewed into the future changes nothing.
            let future = Some(now() + Duration::hours(1));
            assert!(!should_reindex(&set(status), future, now()).unwrap());
        }
    }

    #[test]
    fn interval_boundary_is_inclusive() {
        let cases = [
            ("qualified", Duration::minutes(5)),
            ("wip", Duration::minutes(5)),
            ("pending", Duration::minutes(10)),
            ("loved", Duration::days(1)),
            ("graveyard", Duration::days(1)),
        ];
        for (status, interval) in cases {
            let entity = set(status);
            let just_before = Some(now() - interval + Duration::seconds(1));
            let exactly = Some(now() - interval);
            assert!(!should_reindex(&entity, just_before, now()).unwrap(), "{status}");
            assert!(should_reindex(&entity, exactly, now()).unwrap(), "{status}");
        }
    }

    #[test]
    fn unknown_state_fails_even_when_never_indexed() {
        assert!(should_reindex(&set("frozen"), None, now()).is_err());
        assert!(should_reindex(&set("frozen"), Some(now()), now()).is_err());
    }
}
