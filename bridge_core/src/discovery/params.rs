//! Parameter names for signature records.

use crate::guest::ast::Param;
use std::collections::HashSet;

/// Assigns a name to every parameter. Plain identifiers keep their name;
/// destructured, defaulted and rest parameters are named `arg<index>`,
/// suffixed `_1`, `_2`, ... while that name is already taken.
pub fn parameter_names(params: &[Param]) -> Vec<String> {
    let declared: Vec<Option<&str>> = params.iter().map(Param::simple_name).collect();
    synthesize(&declared)
}

/// Fills the gaps in a list of declared names.
pub fn synthesize(declared: &[Option<&str>]) -> Vec<String> {
    let mut used: HashSet<String> = declared.iter().flatten().map(|name| name.to_string()).collect();
    declared
        .iter()
        .enumerate()
        .map(|(index, name)| match name {
            Some(name) => name.to_string(),
            None => {
                let base = format!("arg{}", index);
                let mut candidate = base.clone();
                let mut counter = 0;
                while used.contains(&candidate) {
                    counter += 1;
                    candidate = format!("{}_{}", base, counter);
                }
                used.insert(candidate.clone());
                candidate
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::ast::{ExprKind, FunctionBody, Stmt};
    use crate::guest::{parse, Dialect};

    fn params_of(source: &str) -> Vec<String> {
        let program = parse(source, Dialect::Script).unwrap();
        match program.body.first() {
            Some(Stmt::Function(function)) => parameter_names(&function.params),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_simple_names_kept() {
        assert_eq!(params_of("function add(left, right) {}"), vec!["left", "right"]);
    }

    #[test]
    fn test_destructured_param_synthesized() {
        assert_eq!(params_of("function g({ x }, y) {}"), vec!["arg0", "y"]);
        assert_eq!(params_of("function h(a, [b, c], ...rest) {}"), vec!["a", "arg1", "arg2"]);
        assert_eq!(params_of("function d(a, b = 2) {}"), vec!["a", "arg1"]);
    }

    #[test]
    fn test_collisions_get_counter() {
        assert_eq!(params_of("function g({ x }, arg0) {}"), vec!["arg0_1", "arg0"]);
        assert_eq!(
            synthesize(&[None, Some("arg0"), Some("arg0_1")]),
            vec!["arg0_2", "arg0", "arg0_1"]
        );
    }

    #[test]
    fn test_arrow_params() {
        let program = parse("const f = (x, { y }) => x;", Dialect::Script).unwrap();
        let Some(Stmt::Var { decls, .. }) = program.body.first() else {
            panic!("expected a declaration");
        };
        let Some(init) = decls.first().and_then(|d| d.init.as_ref()) else {
            panic!("expected an initializer");
        };
        let ExprKind::Function(function) = &init.kind else {
            panic!("expected a function");
        };
        assert!(matches!(function.body, Some(FunctionBody::Expr(_))));
        assert_eq!(parameter_names(&function.params), vec!["x", "arg1"]);
    }
}
