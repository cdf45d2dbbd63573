//! `AWS::CloudFormation::Stack`: the stack resource itself
//!
//! Only the template location may change on the parent's side; the nested template is
//! compared separately by the nested stack resolver. A changed `Parameters` block would
//! change the values every child resource is evaluated against, so it blocks.

use super::{blocked_properties, blocked_reason};
use crate::app::hotswap::changes::{Classification, ResourceChange};
use crate::app::hotswap::classifier::ClassificationContext;
use crate::app::hotswap::error::EvaluationError;

const HOTSWAPPABLE_PROPERTIES: &[&str] = &["TemplateURL"];

pub fn classify(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<Classification, EvaluationError> {
    if change.changed_properties().contains("Parameters") {
        return Ok(ctx.non_hotswappable(change, "nested stack Parameters changed"));
    }
    let blocked = blocked_properties(change, HOTSWAPPABLE_PROPERTIES);
    if !blocked.is_empty() {
        return Ok(ctx.non_hotswappable(change, blocked_reason(change, &blocked)));
    }
    Ok(Classification::NoOp)
}

#[cfg(test)]
mod tests {
    use crate::app::hotswap::changes::Classification;
    use crate::app::hotswap::classifier::test_support::*;
    use serde_json::json;

    fn stack(url: &str, timeout: u32, param: &str) -> crate::app::cfn_template::RenderedTemplate {
        template(json!({"Resources": {"Nested": {
            "Type": "AWS::CloudFormation::Stack",
            "Properties": {
                "TemplateURL": url,
                "TimeoutInMinutes": timeout,
                "Parameters": {"Stage": param}
            }
        }}}))
    }

    #[test]
    fn test_template_url_change_is_noop_at_parent_level() {
        assert_eq!(
            classify_single(&stack("a", 5, "dev"), &stack("b", 5, "dev"), &source(vec![])).unwrap(),
            Classification::NoOp
        );
    }

    #[test]
    fn test_other_changes_block() {
        assert!(classify_single(&stack("a", 5, "dev"), &stack("a", 10, "dev"), &source(vec![]))
            .unwrap()
            .is_blocking());
        assert!(classify_single(&stack("a", 5, "dev"), &stack("a", 5, "prod"), &source(vec![]))
            .unwrap()
            .is_blocking());
    }
}
