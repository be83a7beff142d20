use serde::{Deserialize, Serialize};

/// lifecycle phase of one cluster
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumIter,
    Serialize,
    Deserialize,
)]
pub enum Phase {
    /// no data directory written by this run
    #[default]
    Uninitialized,
    /// `initdb` succeeded
    Initialized,
    /// `postgresql.conf` has been edited
    Configured,
    Running,
    Stopped,
}

impl Phase {
    /// Whether a cluster in this phase may move to `next`.  Reinitialization is the only
    /// way back from `Stopped`.
    pub fn can_become(&self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Running, Phase::Initialized) => false,
            (_, Phase::Initialized) => true,
            (Phase::Initialized, Phase::Configured) => true,
            (Phase::Configured, Phase::Configured) => true,
            (Phase::Configured, Phase::Running) => true,
            (Phase::Stopped, Phase::Running) => true,
            (Phase::Running, Phase::Stopped) => true,
            _ => false,
        }
    }

    /// a replica goes straight from `Uninitialized` to `Running` through its base backup
    pub fn can_bootstrap(&self) -> bool {
        *self == Phase::Uninitialized
    }
}

#[cfg(test)]
pub mod test {
    use crate::cluster::status::Phase;
    use strum::IntoEnumIterator;

    #[test]
    pub fn forward_path() {
        assert!(Phase::Uninitialized.can_become(Phase::Initialized));
        assert!(Phase::Initialized.can_become(Phase::Configured));
        assert!(Phase::Configured.can_become(Phase::Configured));
        assert!(Phase::Configured.can_become(Phase::Running));
        assert!(Phase::Running.can_become(Phase::Stopped));
        assert!(Phase::Stopped.can_become(Phase::Initialized));
    }

    #[test]
    pub fn shortcuts_are_rejected() {
        assert!(!Phase::Uninitialized.can_become(Phase::Configured));
        assert!(!Phase::Initialized.can_become(Phase::Stopped));
        assert!(!Phase::Running.can_become(Phase::Initialized));
        assert!(!Phase::Stopped.can_become(Phase::Configured));
        assert!(!Phase::Uninitialized.can_become(Phase::Running));
        assert!(!Phase::Initialized.can_become(Phase::Running));
        for phase in Phase::iter() {
            assert!(!phase.can_become(Phase::Uninitialized));
        }
    }

    #[test]
    pub fn only_a_fresh_cluster_bootstraps() {
        let bootstrappable: Vec<Phase> = Phase::iter().filter(Phase::can_bootstrap).collect();
        assert_eq!(bootstrappable, vec![Phase::Uninitialized]);
    }
}
