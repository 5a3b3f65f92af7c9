use anyhow::{Result, anyhow};
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;

/// Sandboxed evaluator for user transform scripts. The script text becomes
/// the body of a single-use function whose parameter names match the bound
/// value keys; it runs in a fresh scope with no access to anything beyond
/// those parameters. Errors propagate to the caller untouched.
pub struct ScriptHost {
    engine: Engine,
}

impl ScriptHost {
    pub fn new() -> ScriptHost {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(128, 64);
        engine.set_max_call_levels(128);
        engine.set_max_operations(10_000_000);
        ScriptHost { engine }
    }

    /// Evaluate `body` with the given bound values and return whatever the
    /// script computed, converted back to plain JSON. A unit result maps to
    /// `Value::Null` (the "script returned nothing" case).
    pub fn evaluate(&self, body: &str, bindings: &[(&str, Value)]) -> Result<Value> {
        let parameters = bindings
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let source = format!("fn transform({parameters}) {{\n{body}\n}}\n");
        let ast = self
            .engine
            .compile(&source)
            .map_err(|err| anyhow!("script compile error: {err}"))?;

        let mut arguments = Vec::with_capacity(bindings.len());
        for (name, value) in bindings {
            let dynamic = rhai::serde::to_dynamic(value)
                .map_err(|err| anyhow!("binding '{name}' is not representable: {err}"))?;
            arguments.push(dynamic);
        }

        let result: Dynamic = self
            .engine
            .call_fn(&mut Scope::new(), &ast, "transform", arguments)
            .map_err(|err| anyhow!("script error: {err}"))?;

        if result.is_unit() {
            return Ok(Value::Null);
        }
        rhai::serde::from_dynamic(&result)
            .map_err(|err| anyhow!("script returned an unusable value: {err}"))
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        ScriptHost::new()
    }
}
