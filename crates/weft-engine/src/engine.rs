//! The solve driver
//!
//! Builds the solution context from the inputs, translates constraints
//! into initial work, runs the evaluator to exhaustion, then verifies the
//! constraints that can only be judged on the final graph.

use tracing::{info, instrument};

use weft_construct::{Resource, ResourceId, SimpleEdge};
use weft_kb::KnowledgeBase;

use crate::constraints::{
    Constraint, ConstraintList, ConstraintOperator, ResourceConstraint,
};
use crate::decisions::Decision;
use crate::error::{Error, Result};
use crate::eval::{Evaluator, Key};
use crate::reconciler;
use crate::solution::SolutionContext;

/// The inputs of one solve: the initial graph plus the constraint list.
#[derive(Debug, Default, Clone)]
pub struct SolveRequest {
    pub resources: Vec<Resource>,
    pub edges: Vec<SimpleEdge>,
    pub constraints: Vec<Constraint>,
}

/// A finished solve: the solution (graph + decision log), the group order
/// the evaluator ran in, and any non-fatal errors to surface.
#[derive(Debug)]
pub struct SolveOutcome {
    pub solution: SolutionContext,
    pub evaluated_groups: Vec<Vec<Key>>,
    pub errors: Vec<Error>,
}

impl SolveOutcome {
    pub fn into_result(self) -> Result<SolutionContext> {
        match self.errors.into_iter().next() {
            None => Ok(self.solution),
            Some(first) => Err(first),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    kb: KnowledgeBase,
}

impl Engine {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self { kb }
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Run a full solve. Fatal failures (group errors, circular
    /// dependencies) return `Err`; constraint violations and validation
    /// failures are collected in the outcome.
    #[instrument(skip_all, fields(resources = request.resources.len(), constraints = request.constraints.len()))]
    pub fn solve(&self, request: SolveRequest) -> Result<SolveOutcome> {
        let constraints = ConstraintList::from(request.constraints);
        let mut sol = SolutionContext::new(self.kb.clone(), constraints);

        for resource in request.resources {
            sol.raw_view().add_resource(resource)?;
        }
        for edge in &request.edges {
            sol.raw_view().add_edge(&edge.source, &edge.target)?;
        }

        let mut errors = Vec::new();
        self.apply_application_constraints(&mut sol, &mut errors)?;
        self.apply_construct_constraints(&mut sol, &mut errors)?;
        self.apply_edge_constraints(&mut sol, &mut errors)?;

        let mut evaluator = Evaluator::new(sol);
        let ids = evaluator.solution().graph().resource_ids();
        evaluator.add_resources(&ids)?;
        let edges = evaluator.solution().graph().edges();
        evaluator.add_edges(&edges)?;

        info!(resources = ids.len(), edges = edges.len(), "starting solve");
        evaluator.evaluate()?;

        let evaluated_groups = evaluator.evaluated_order().to_vec();
        let mut solution = evaluator.into_solution();

        errors.extend(solution.transform_all_values());
        self.verify_constraints(&mut solution, &mut errors);
        info!(groups = evaluated_groups.len(), errors = errors.len(), "solve finished");

        Ok(SolveOutcome {
            solution,
            evaluated_groups,
            errors,
        })
    }

    fn apply_application_constraints(
        &self,
        sol: &mut SolutionContext,
        errors: &mut Vec<Error>,
    ) -> Result<()> {
        let constraints = sol.constraints().application.clone();
        for c in constraints {
            let outcome: Result<()> = (|| {
                match c.operator {
                    ConstraintOperator::Add | ConstraintOperator::MustExist => {
                        if !sol.graph().contains(&c.node) {
                            sol.raw_view().add_resource(Resource::new(c.node.clone()))?;
                        }
                        Ok(())
                    }
                    ConstraintOperator::Remove | ConstraintOperator::MustNotExist => {
                        reconciler::remove_resource(sol, &c.node, true)
                    }
                    ConstraintOperator::Replace => {
                        let replacement = c.replacement_node.clone().ok_or_else(|| {
                            Error::Constraint(format!(
                                "replace constraint for {} has no replacement node",
                                c.node
                            ))
                        })?;
                        sol.update_id(&c.node, &replacement)
                    }
                    other => Err(Error::Constraint(format!(
                        "operator {other:?} is not valid for application constraints"
                    ))),
                }
            })();
            record_constraint(
                sol,
                errors,
                Constraint::Application(c),
                outcome,
            );
        }
        Ok(())
    }

    /// Bind abstract resources to their concrete type: rename the node and
    /// rewrite the attributes as equals-constraints so property evaluation
    /// applies them in order.
    fn apply_construct_constraints(
        &self,
        sol: &mut SolutionContext,
        errors: &mut Vec<Error>,
    ) -> Result<()> {
        let constraints = sol.constraints().construct.clone();
        for c in constraints {
            let outcome: Result<ResourceId> = (|| {
                let concrete_type: ResourceId = c
                    .r#type
                    .parse()
                    .map_err(|_| Error::Constraint(format!("invalid type '{}'", c.r#type)))?;
                let concrete = ResourceId::new(
                    &concrete_type.provider,
                    &concrete_type.r#type,
                    &c.target.name,
                );
                if !sol.graph().contains(&c.target) {
                    sol.raw_view().add_resource(Resource::new(c.target.clone()))?;
                }
                sol.update_id(&c.target, &concrete)?;
                Ok(concrete)
            })();
            match outcome {
                Ok(concrete) => {
                    for (field, value) in &c.attributes {
                        sol.constraints_mut().resource.push(ResourceConstraint {
                            operator: ConstraintOperator::Equals,
                            target: concrete.clone(),
                            property: field.clone(),
                            value: value.clone(),
                        });
                    }
                    record_constraint(sol, errors, Constraint::Construct(c), Ok(()));
                }
                Err(e) => {
                    record_constraint(sol, errors, Constraint::Construct(c), Err(e));
                }
            }
        }
        Ok(())
    }

    fn apply_edge_constraints(
        &self,
        sol: &mut SolutionContext,
        errors: &mut Vec<Error>,
    ) -> Result<()> {
        let constraints = sol.constraints().edge.clone();
        for c in constraints {
            let outcome: Result<()> = (|| {
                match c.operator {
                    ConstraintOperator::MustExist => {
                        for endpoint in [&c.target.source, &c.target.target] {
                            if !sol.graph().contains(endpoint) {
                                sol.raw_view()
                                    .add_resource(Resource::new(endpoint.clone()))?;
                            }
                        }
                        sol.raw_view().add_edge(&c.target.source, &c.target.target)?;
                        Ok(())
                    }
                    ConstraintOperator::MustNotExist => {
                        sol.raw_view().remove_edge(&c.target.source, &c.target.target);
                        sol.forbid_edge(c.target.clone());
                        Ok(())
                    }
                    // contain constraints are judged on the final graph
                    ConstraintOperator::MustContain | ConstraintOperator::MustNotContain => {
                        Ok(())
                    }
                    other => Err(Error::Constraint(format!(
                        "operator {other:?} is not valid for edge constraints"
                    ))),
                }
            })();
            record_constraint(sol, errors, Constraint::Edge(c), outcome);
        }
        Ok(())
    }

    /// Judge the constraints that only the final graph can answer.
    fn verify_constraints(&self, sol: &mut SolutionContext, errors: &mut Vec<Error>) {
        let application = sol.constraints().application.clone();
        for c in application {
            let violated = match c.operator {
                ConstraintOperator::MustExist | ConstraintOperator::Add => {
                    !sol.graph().contains(&c.node)
                }
                ConstraintOperator::MustNotExist | ConstraintOperator::Remove => {
                    sol.graph().contains(&c.node)
                }
                _ => false,
            };
            if violated {
                let error = Error::Constraint(format!(
                    "application constraint {:?} {} not satisfied by the final graph",
                    c.operator, c.node
                ));
                sol.record_decision(Decision::Constraint {
                    constraint: Constraint::Application(c),
                    applied: false,
                    error: Some(error.to_string()),
                });
                errors.push(error);
            }
        }

        let edge_constraints = sol.constraints().edge.clone();
        for c in edge_constraints {
            let path = sol.graph().shortest_path(&c.target.source, &c.target.target);
            let violated = match c.operator {
                ConstraintOperator::MustExist => path.is_none(),
                ConstraintOperator::MustNotExist => {
                    sol.graph().has_edge(&c.target.source, &c.target.target)
                }
                ConstraintOperator::MustContain => match (&path, &c.node) {
                    (Some(path), Some(node)) => !path.contains(node),
                    _ => true,
                },
                ConstraintOperator::MustNotContain => match (&path, &c.node) {
                    (Some(path), Some(node)) => path.contains(node),
                    _ => false,
                },
                _ => false,
            };
            if violated {
                let error = Error::Constraint(format!(
                    "edge constraint {:?} {} not satisfied by the final graph",
                    c.operator, c.target
                ));
                sol.record_decision(Decision::Constraint {
                    constraint: Constraint::Edge(c),
                    applied: false,
                    error: Some(error.to_string()),
                });
                errors.push(error);
            }
        }

        for record in sol.decisions() {
            if let Decision::Constraint {
                applied: false,
                error: Some(message),
                ..
            } = &record.decision
            {
                let already = errors
                    .iter()
                    .any(|e| e.to_string() == *message);
                if !already {
                    errors.push(Error::Constraint(message.clone()));
                }
            }
        }
    }
}

fn record_constraint(
    sol: &mut SolutionContext,
    errors: &mut Vec<Error>,
    constraint: Constraint,
    outcome: Result<()>,
) {
    match outcome {
        Ok(()) => sol.record_decision(Decision::Constraint {
            constraint,
            applied: true,
            error: None,
        }),
        Err(e) => {
            sol.record_decision(Decision::Constraint {
                constraint,
                applied: false,
                error: Some(e.to_string()),
            });
            errors.push(e);
        }
    }
}
