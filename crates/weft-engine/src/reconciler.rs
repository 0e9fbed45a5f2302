//! Removal reconciliation
//!
//! Deleting a resource may orphan the glue its operational rules created.
//! The reconciler removes a resource (when allowed) and then sweeps any
//! side-effect resources nothing else depends on.

use tracing::{debug, info};

use weft_construct::ResourceId;
use weft_kb::{layers, Functionality};

use crate::error::Result;
use crate::solution::SolutionContext;

/// Remove `id` from the solution. Non-explicit removal is a no-op while
/// anything still depends on the resource; explicit removal severs edges
/// first. Orphaned glue downstream of the removed resource is swept.
pub fn remove_resource(sol: &mut SolutionContext, id: &ResourceId, explicit: bool) -> Result<()> {
    if !sol.graph().contains(id) {
        return Ok(());
    }
    let dependents = sol.graph().upstream(id);
    if !dependents.is_empty() && !explicit {
        debug!(resource = %id, dependents = dependents.len(),
            "skipping removal, resource still in use");
        return Ok(());
    }

    let downstream = sol.graph().downstream(id);
    let side_effects: Vec<ResourceId> = downstream
        .into_iter()
        .filter(|d| layers::is_operational_side_effect(sol.graph(), sol.kb(), id, d))
        .collect();

    info!(resource = %id, "removing resource");
    sol.raw_view().remove_resource(id);

    for orphan in side_effects {
        if sol.graph().upstream(&orphan).is_empty()
            && sol.kb().get_functionality(&orphan) == Functionality::Unknown
        {
            remove_resource(sol, &orphan, false)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintList;
    use weft_construct::Resource;
    use weft_kb::{KnowledgeBase, ResourceTemplate};

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn test_remove_skipped_while_in_use() {
        let mut kb = KnowledgeBase::new();
        kb.add_resource_template(ResourceTemplate::new("p:t"));
        let mut sol = SolutionContext::new(kb, ConstraintList::default());
        sol.raw_view().add_resource(Resource::new(id("p:t:a"))).unwrap();
        sol.raw_view().add_resource(Resource::new(id("p:t:b"))).unwrap();
        sol.raw_view().add_edge(&id("p:t:a"), &id("p:t:b")).unwrap();

        remove_resource(&mut sol, &id("p:t:b"), false).unwrap();
        assert!(sol.graph().contains(&id("p:t:b")));

        remove_resource(&mut sol, &id("p:t:b"), true).unwrap();
        assert!(!sol.graph().contains(&id("p:t:b")));
    }
}
