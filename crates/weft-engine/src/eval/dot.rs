//! Work-graph diagnostics
//!
//! When `WEFT_DEBUG_DIR` is set, the evaluator dumps the work graph at
//! solver exit: which group evaluated each vertex, which vertices erred,
//! and the dependency edges between them.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, warn};

use crate::eval::Evaluator;

pub const DEBUG_DIR_ENV: &str = "WEFT_DEBUG_DIR";

pub fn write_debug_graph(eval: &Evaluator) {
    let Ok(dir) = std::env::var(DEBUG_DIR_ENV) else {
        return;
    };
    if dir.is_empty() {
        return;
    }
    let rendered = render(eval);
    let path = Path::new(&dir).join("property_deps.gv");
    if let Err(e) = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, rendered)) {
        warn!(path = %path.display(), error = %e, "could not write debug graph");
        return;
    }
    debug!(path = %path.display(), "wrote work-graph dump");
}

fn render(eval: &Evaluator) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph property_deps {{");
    let _ = writeln!(out, "  rankdir = LR;");

    let group_of = |key: &crate::eval::Key| -> Option<usize> {
        eval.evaluated_order()
            .iter()
            .position(|group| group.contains(key))
            .map(|i| i + 1)
    };

    for key in eval.work_graph().keys() {
        let mut attrs = Vec::new();
        match group_of(&key) {
            Some(group) => attrs.push(format!("label=\"{key}\\ngroup {group}\"")),
            None => attrs.push(format!("label=\"{key}\\nunevaluated\"")),
        }
        if eval.errored().contains(&key) {
            attrs.push("color=red".to_string());
        }
        let _ = writeln!(out, "  \"{key}\" [{}];", attrs.join(", "));
    }
    for key in eval.work_graph().keys() {
        for dep in eval.work_graph().dependencies_of(&key) {
            let _ = writeln!(out, "  \"{key}\" -> \"{dep}\";");
        }
    }
    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintList;
    use crate::solution::SolutionContext;
    use weft_kb::KnowledgeBase;

    #[test]
    fn test_render_empty_graph() {
        let eval = Evaluator::new(SolutionContext::new(
            KnowledgeBase::new(),
            ConstraintList::default(),
        ));
        let text = render(&eval);
        assert!(text.starts_with("digraph"));
        assert!(text.ends_with("}\n"));
    }
}
