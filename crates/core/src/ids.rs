use std::fmt;

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }

            /// The successor value. Counters only move forward.
            #[must_use]
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

counter_id!(
    /// Identifies a tab for the lifetime of the process.
    TabId
);
counter_id!(
    /// Per-tab counter bumped once per execution request.
    RunId
);
counter_id!(
    /// Process-wide counter bumped once per installed connection.
    Generation
);
counter_id!(
    /// Bumped per `connect` call. Only the latest attempt may install or
    /// report a failure.
    ConnectAttempt
);
counter_id!(
    /// Bumped per schema load, including refreshes within a generation.
    SchemaLoadId
);

/// Identifiers captured when a run is submitted. Results carrying a stamp
/// that no longer matches the live state are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunStamp {
    pub tab: TabId,
    pub run: RunId,
    pub generation: Generation,
}

impl fmt::Display for RunStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tab={} run={} gen={}",
            self.tab, self.run, self.generation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Generation, RunId, RunStamp, TabId};

    #[test]
    fn counters_start_at_zero_and_strictly_increase() {
        let first = Generation::default();
        let second = first.next();
        let third = second.next();

        assert_eq!(first.get(), 0);
        assert!(first < second && second < third);
        assert_eq!(RunId::default().next().next().get(), 2);
    }

    #[test]
    fn stamp_display_names_every_identifier() {
        let stamp = RunStamp {
            tab: TabId::default().next(),
            run: RunId::default().next(),
            generation: Generation::default().next().next(),
        };
        assert_eq!(stamp.to_string(), "tab=1 run=1 gen=2");
    }
}
