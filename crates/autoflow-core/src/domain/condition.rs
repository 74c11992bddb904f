use crate::CoreError;
use serde_json::Value;

/// Evaluates condition-step predicates against a run context
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate the predicate within the given context
    fn evaluate(&self, expression: &str, language: &str, context: &Value)
        -> Result<bool, CoreError>;
}

/// Condition evaluator backed by JMESPath
///
/// The predicate holds when the search result is truthy: not null, not
/// `false`, and not an empty string, array or object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JmesPathEvaluator;

impl ConditionEvaluator for JmesPathEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        language: &str,
        context: &Value,
    ) -> Result<bool, CoreError> {
        if language != "jmespath" {
            return Err(CoreError::ExpressionError(format!(
                "Unsupported condition language: {}",
                language
            )));
        }

        let compiled = jmespath::compile(expression).map_err(|e| {
            CoreError::ExpressionError(format!(
                "Failed to compile JMESPath expression: {}: {}",
                expression, e
            ))
        })?;
        let result = compiled.search(context).map_err(|e| {
            CoreError::ExpressionError(format!(
                "Failed to evaluate JMESPath expression: {}: {}",
                expression, e
            ))
        })?;

        Ok(result.is_truthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "trigger": {"priority": "high", "score": 7, "tags": []},
            "steps": {
                "analyze": {"status": "succeeded", "output": {"sentiment": "positive"}}
            },
            "workflow": {"id": "wf-1", "name": "Support triage"}
        })
    }

    #[test]
    fn test_comparisons() {
        let evaluator = JmesPathEvaluator;
        assert!(evaluator
            .evaluate("trigger.priority == 'high'", "jmespath", &context())
            .unwrap());
        assert!(evaluator
            .evaluate("trigger.score > `5`", "jmespath", &context())
            .unwrap());
        assert!(!evaluator
            .evaluate("trigger.score > `10`", "jmespath", &context())
            .unwrap());
    }

    #[test]
    fn test_truthiness() {
        let evaluator = JmesPathEvaluator;
        assert!(evaluator
            .evaluate("steps.analyze.output.sentiment", "jmespath", &context())
            .unwrap());
        assert!(!evaluator
            .evaluate("trigger.missing", "jmespath", &context())
            .unwrap());
        assert!(!evaluator
            .evaluate("trigger.tags", "jmespath", &context())
            .unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let result = JmesPathEvaluator.evaluate("trigger.[", "jmespath", &context());
        assert!(matches!(result, Err(CoreError::ExpressionError(_))));
    }

    #[test]
    fn test_unsupported_language() {
        let result = JmesPathEvaluator.evaluate("trigger.priority", "jq", &context());
        assert!(matches!(result, Err(CoreError::ExpressionError(_))));
    }
}
