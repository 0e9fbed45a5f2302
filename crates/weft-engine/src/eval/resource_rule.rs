//! Resource-rule vertex behavior
//!
//! Templates may carry resource-level operational rules that are not tied
//! to any one property; each evaluates as its own vertex keyed by the
//! rule's stable hash.

use weft_kb::DynamicData;

use crate::error::Result;
use crate::eval::key::Key;
use crate::eval::property::capture_rule;
use crate::eval::vertex::{Changes, ResourceRuleVertex};
use crate::eval::Evaluator;
use crate::rule::RuleContext;

impl Evaluator {
    pub(crate) fn resource_rule_dependencies(
        &mut self,
        v: &ResourceRuleVertex,
    ) -> Result<Changes> {
        let mut changes = Changes::new();
        if !self.sol.graph().contains(&v.resource) {
            return Ok(changes);
        }
        let own = Key::ResourceRule {
            resource: v.resource.clone(),
            rule_hash: v.rule_hash.clone(),
        };
        let ctx = self.sol.capture_ctx();
        let data = DynamicData::for_resource(v.resource.clone());
        capture_rule(&ctx, &data, &v.rule);
        for r in ctx.captured().refs {
            changes.add_edge(own.clone(), Key::Property(r));
        }
        Ok(changes)
    }

    pub(crate) fn evaluate_resource_rule(&mut self, v: ResourceRuleVertex) -> Result<()> {
        if !self.sol.graph().contains(&v.resource) {
            return Ok(());
        }
        let mut ctx = RuleContext::new(DynamicData::for_resource(v.resource.clone()));
        ctx.handle_operational_rule(&mut self.sol, &v.rule)?;
        if let Some((old, new)) = ctx.pending_id_update.take() {
            self.update_id(&old, &new)?;
        }
        Ok(())
    }
}
