//! Operator-facing rendering of a plan.

use std::fmt;

use serde::Serialize;

use crate::resolver::VersionState;
use crate::scheduler::{Direction, Plan};
use crate::unit::Domain;
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedUnit {
    pub identifier: String,
    pub scope: String,
    pub reversible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainGroup {
    pub domain: Domain,
    /// The domain's marker before the run.
    pub from: Version,
    pub units: Vec<PlannedUnit>,
}

/// The plan as shown before execution. Dry runs and real runs render the
/// same summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub from: Version,
    pub to: Version,
    pub direction: Direction,
    pub total: usize,
    pub groups: Vec<DomainGroup>,
}

impl PlanSummary {
    pub fn new(state: &VersionState, plan: &Plan) -> Self {
        let groups = Domain::ALL
            .into_iter()
            .filter(|d| plan.touches(*d))
            .map(|domain| DomainGroup {
                domain,
                from: state.current_for(domain).clone(),
                units: plan
                    .for_domain(domain)
                    .map(|u| PlannedUnit {
                        identifier: u.identifier.clone(),
                        scope: u.scope.to_string(),
                        reversible: u.reversible,
                    })
                    .collect(),
            })
            .collect();

        PlanSummary {
            from: state.config_version.clone(),
            to: state.target_version.clone(),
            direction: plan.direction,
            total: plan.len(),
            groups,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Migration plan: {} -> {} ({})",
            self.from, self.to, self.direction
        )?;
        if self.groups.is_empty() {
            return write!(f, "  nothing to do");
        }
        for (i, group) in self.groups.iter().enumerate() {
            writeln!(
                f,
                "{} (from {}, {} unit(s)):",
                group.domain,
                group.from,
                group.units.len()
            )?;
            for (j, unit) in group.units.iter().enumerate() {
                write!(f, "  - {} [{}]", unit.identifier, unit.scope)?;
                if i + 1 < self.groups.len() || j + 1 < group.units.len() {
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}
