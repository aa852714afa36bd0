use std::collections::BTreeMap;

use rhai::{Dynamic, Engine, Scope, AST};
use sp_core::{PropertyId, ScriptPlayError, Value};

/// Boolean predicate over explicitly bound properties, authored as
/// `(name=propertyId, name2=propertyId2) <expression>`. The body is a rhai
/// expression compiled once and cached; parameters are re-bound on every
/// evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    source: String,
    params: Vec<(String, PropertyId)>,
    ast: AST,
}

impl CompiledPredicate {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parameter bindings in declaration order.
    pub fn params(&self) -> &[(String, PropertyId)] {
        &self.params
    }

    /// Evaluate against values in `params()` order. The result must be a
    /// boolean.
    pub(crate) fn evaluate(
        &self,
        engine: &Engine,
        values: &[Value],
    ) -> Result<bool, ScriptPlayError> {
        let mut scope = Scope::new();
        for ((name, _), value) in self.params.iter().zip(values) {
            scope.push_dynamic(name.clone(), value_to_dynamic(value));
        }

        let result = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
            .map_err(|error| {
                ScriptPlayError::new(
                    "EXPR_EVAL",
                    format!("Formula error: {} ({})", error, self.source),
                )
            })?;

        result.as_bool().map_err(|actual| {
            ScriptPlayError::new(
                "EXPR_NOT_BOOLEAN",
                format!(
                    "Formula result must be boolean, got {} ({})",
                    actual, self.source
                ),
            )
        })
    }
}

/// Compiles predicate sources at definition-build time. Strict-variables
/// mode rejects any identifier outside the declared bindings.
pub(crate) struct PredicateCompiler {
    engine: Engine,
}

impl PredicateCompiler {
    pub(crate) fn new() -> Self {
        Self {
            engine: evaluator(),
        }
    }

    pub(crate) fn compile(
        &self,
        source: &str,
        known_properties: &BTreeMap<PropertyId, String>,
    ) -> Result<CompiledPredicate, ScriptPlayError> {
        let open = source.find('(').ok_or_else(|| {
            ScriptPlayError::new(
                "EXPR_BINDING",
                format!("Formula error: first bracket not found ({})", source),
            )
        })?;
        let close = source[open + 1..].find(')').map(|i| open + 1 + i).ok_or_else(|| {
            ScriptPlayError::new(
                "EXPR_BINDING",
                format!("Formula error: second bracket not found ({})", source),
            )
        })?;

        let header: String = source[open + 1..close]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let mut params = Vec::new();
        for pair in header.split(',') {
            let mut parts = pair.splitn(2, '=');
            let name = parts.next().unwrap_or_default();
            let id_text = parts.next().ok_or_else(|| {
                ScriptPlayError::new(
                    "EXPR_BINDING",
                    format!("Formula error: bad parameters ({})", source),
                )
            })?;
            if name.is_empty() {
                return Err(ScriptPlayError::new(
                    "EXPR_BINDING",
                    format!("Formula error: bad parameters ({})", source),
                ));
            }

            let id = id_text
                .parse::<u32>()
                .ok()
                .filter(|id| *id > 0)
                .map(PropertyId::new)
                .ok_or_else(|| {
                    ScriptPlayError::new(
                        "EXPR_BINDING",
                        format!(
                            "Formula error: bad parameter code [{}] ({})",
                            id_text, source
                        ),
                    )
                })?;
            if !known_properties.contains_key(&id) {
                return Err(ScriptPlayError::new(
                    "EXPR_UNKNOWN_PROPERTY",
                    format!("Formula error: unknown property code [{}] ({})", id, source),
                ));
            }

            params.push((name.to_string(), id));
        }

        let body = source[close + 1..].trim();
        let mut scope = Scope::new();
        for (name, _) in &params {
            scope.push_dynamic(name.clone(), Dynamic::UNIT);
        }

        let ast = self
            .engine
            .compile_expression_with_scope(&scope, body)
            .map_err(|error| {
                ScriptPlayError::new(
                    "EXPR_COMPILE",
                    format!("Formula error: {} ({})", error, source),
                )
            })?;

        Ok(CompiledPredicate {
            source: source.to_string(),
            params,
            ast,
        })
    }
}

/// Evaluation engine shared by predicate compilation and the player.
pub(crate) fn evaluator() -> Engine {
    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    engine
}

pub(crate) fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(value) => Dynamic::from_bool(*value),
        Value::Int(value) => Dynamic::from_int(*value),
        Value::Float(value) => Dynamic::from_float(*value),
        Value::String(value) => Dynamic::from(value.clone()),
    }
}
