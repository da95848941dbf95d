//! Selection and ordering of the units a run will execute.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::resolver::VersionState;
use crate::unit::{Domain, MigrationUnit};
use crate::version::Version;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "upgrade" => Ok(Direction::Up),
            "down" | "downgrade" => Ok(Direction::Down),
            other => Err(format!("unknown direction '{}': expected up or down", other)),
        }
    }
}

/// The ordered units selected for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub direction: Direction,
    pub units: Vec<MigrationUnit>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Units of one domain, in plan order.
    pub fn for_domain(&self, domain: Domain) -> impl Iterator<Item = &MigrationUnit> {
        self.units.iter().filter(move |u| u.domain == domain)
    }

    pub fn touches(&self, domain: Domain) -> bool {
        self.units.iter().any(|u| u.domain == domain)
    }
}

/// Filter and order `units` for a run.
///
/// A unit is kept when its version lies in `(current, target]` for an
/// upgrade or `(target, current]` for a downgrade, where `current` is the
/// marker of the unit's own domain. Downgrades keep only reversible units.
/// The result is ordered by timestamp ascending in both directions.
pub fn plan(
    units: &[MigrationUnit],
    state: &VersionState,
    direction: Direction,
    domain_filter: Option<Domain>,
) -> Plan {
    let target = &state.target_version;
    let mut selected: Vec<MigrationUnit> = units
        .iter()
        .filter(|u| domain_filter.map_or(true, |d| u.domain == d))
        .filter(|u| in_interval(&u.version, state.current_for(u.domain), target, direction))
        .filter(|u| {
            if direction == Direction::Down && !u.reversible {
                tracing::debug!(
                    identifier = %u.identifier,
                    "excluded from downgrade plan: no down handler"
                );
                return false;
            }
            true
        })
        .cloned()
        .collect();

    selected.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });

    Plan {
        direction,
        units: selected,
    }
}

fn in_interval(
    version: &Version,
    current: &Version,
    target: &Version,
    direction: Direction,
) -> bool {
    match direction {
        Direction::Up => current < version && version <= target,
        Direction::Down => target < version && version <= current,
    }
}
