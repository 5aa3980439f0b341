//! Status ids as stored in the `build_statuses` lookup table.
//!
//! The enum itself lives in `commitreel-core`; its discriminants are the
//! seed-row ids, so conversion is a cast.

pub use commitreel_core::build_status::BuildStatus;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Ids for a list of statuses, for `status_id = ANY($n)` binds.
pub fn status_ids(statuses: &[BuildStatus]) -> Vec<StatusId> {
    statuses.iter().map(|s| s.id()).collect()
}

/// Statuses that mean a build is still in flight for its project.
pub const ACTIVE_STATUSES: [BuildStatus; 3] = [
    BuildStatus::Pending,
    BuildStatus::Queued,
    BuildStatus::Running,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_seed_order() {
        assert_eq!(
            status_ids(&BuildStatus::ALL),
            vec![1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn active_statuses_are_not_finished() {
        assert!(ACTIVE_STATUSES.iter().all(|s| !s.is_finished()));
    }
}
