//! End-to-end behaviour of `try_hotswap` against in-memory collaborators.

mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use cfn_hotswap::app::hotswap::{
        HotswapConfig, HotswapDeployer, HotswapError, HotswapResult, LambdaCode, LiveResource,
        NonHotswappableChange, OperationOutcome, OperationStatus, TargetStack,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const NESTED_NAME: &str = "root-NestedStack-1ABC";

    fn deployer(templates: FakeTemplateSource, env: &Arc<RecordingEnvironment>) -> HotswapDeployer {
        HotswapDeployer::new(Arc::new(templates), env.clone(), environment()).with_config(
            HotswapConfig {
                lambda_poll_interval_millis: 1,
                ..HotswapConfig::default()
            },
        )
    }

    fn function(key: &str) -> Value {
        json!({
            "Type": "AWS::Lambda::Function",
            "Properties": {
                "Code": {"S3Bucket": "assets", "S3Key": key},
                "Handler": "index.handler",
                "Runtime": "nodejs18.x"
            }
        })
    }

    fn nested_stack(url: &str) -> Value {
        json!({
            "Type": "AWS::CloudFormation::Stack",
            "Properties": {"TemplateURL": url}
        })
    }

    fn queue(timeout: u32) -> Value {
        json!({
            "Type": "AWS::SQS::Queue",
            "Properties": {"VisibilityTimeout": timeout}
        })
    }

    fn resources(entries: Value) -> cfn_hotswap::app::cfn_template::RenderedTemplate {
        template(json!({ "Resources": entries }))
    }

    fn applied(result: HotswapResult) -> Vec<OperationOutcome> {
        match result {
            HotswapResult::Applied(outcomes) => outcomes,
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    fn blockers(result: HotswapResult) -> Vec<NonHotswappableChange> {
        match result {
            HotswapResult::FullDeploymentRequired(blockers) => blockers,
            other => panic!("expected FullDeploymentRequired, got {:?}", other),
        }
    }

    fn error(result: HotswapResult) -> HotswapError {
        match result {
            HotswapResult::Error(e) => e,
            other => panic!("expected Error, got {:?}", other),
        }
    }

    /// Root stack with one nested stack holding `Func`
    fn nested_function_setup(
        old_key: &str,
        new_key: &str,
    ) -> (FakeTemplateSource, TargetStack) {
        let templates = FakeTemplateSource::new()
            .with_stack(
                "root",
                resources(json!({"NestedStack": nested_stack("https://s3/nested-old.json")})),
                vec![LiveResource::new(
                    "NestedStack",
                    "AWS::CloudFormation::Stack",
                    stack_arn(NESTED_NAME),
                )],
            )
            .with_stack(
                NESTED_NAME,
                resources(json!({"Func": function(old_key)})),
                vec![LiveResource::new(
                    "Func",
                    "AWS::Lambda::Function",
                    "root-NestedStack-Func-XYZ",
                )],
            );

        let target = TargetStack::new(resources(
            json!({"NestedStack": nested_stack("https://s3/nested-new.json")}),
        ))
        .with_nested(
            "NestedStack",
            TargetStack::new(resources(json!({"Func": function(new_key)}))),
        );
        (templates, target)
    }

    #[tokio::test]
    async fn test_identical_templates_apply_nothing() {
        let (templates, _) = nested_function_setup("key", "key");
        let target = TargetStack::new(resources(
            json!({"NestedStack": nested_stack("https://s3/nested-old.json")}),
        ))
        .with_nested(
            "NestedStack",
            TargetStack::new(resources(json!({"Func": function("key")}))),
        );
        let env = Arc::new(RecordingEnvironment::new());

        let result = deployer(templates, &env)
            .try_hotswap("root", &target, &BTreeMap::new())
            .await;

        assert!(applied(result).is_empty());
        assert!(env.calls().is_empty());
    }

    #[tokio::test]
    async fn test_nested_code_only_change_updates_function_code() {
        let (templates, target) = nested_function_setup("old-key", "new-key");
        let env = Arc::new(RecordingEnvironment::new());

        let outcomes = applied(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].stack_name, NESTED_NAME);
        assert_eq!(outcomes[0].logical_id, "Func");
        assert_eq!(outcomes[0].status, OperationStatus::Succeeded);
        assert_eq!(
            env.calls(),
            vec![Call::UpdateFunctionCode {
                function_name: "root-NestedStack-Func-XYZ".to_string(),
                code: LambdaCode::S3 {
                    bucket: "assets".to_string(),
                    key: "new-key".to_string(),
                    object_version: None,
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_results_are_deterministic() {
        let env = Arc::new(RecordingEnvironment::new());
        let mut reasons = Vec::new();
        for _ in 0..3 {
            let templates = FakeTemplateSource::new().with_stack(
                "root",
                resources(json!({"Queue": queue(30), "Other": queue(10)})),
                vec![
                    LiveResource::new("Queue", "AWS::SQS::Queue", "https://sqs/q1"),
                    LiveResource::new("Other", "AWS::SQS::Queue", "https://sqs/q2"),
                ],
            );
            let target = TargetStack::new(resources(json!({"Queue": queue(60), "Other": queue(20)})));
            let result = deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await;
            reasons.push(blockers(result));
        }

        assert_eq!(reasons[0], reasons[1]);
        assert_eq!(reasons[1], reasons[2]);
        let ids: Vec<_> = reasons[0].iter().map(|b| b.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["Other", "Queue"]);
    }

    #[tokio::test]
    async fn test_unsupported_type_requires_full_deployment() {
        let templates = FakeTemplateSource::new().with_stack(
            "root",
            resources(json!({"Queue": queue(30)})),
            vec![LiveResource::new("Queue", "AWS::SQS::Queue", "https://sqs/q1")],
        );
        let target = TargetStack::new(resources(json!({"Queue": queue(60)})));
        let env = Arc::new(RecordingEnvironment::new());

        let blockers = blockers(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        assert_eq!(blockers.len(), 1);
        assert!(blockers[0].reason.contains("AWS::SQS::Queue"));
        assert!(env.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sibling_blocker_prevents_all_operations() {
        let child_a = "root-ChildA-1";
        let child_b = "root-ChildB-2";
        let templates = FakeTemplateSource::new()
            .with_stack(
                "root",
                resources(json!({
                    "ChildA": nested_stack("https://s3/a.json"),
                    "ChildB": nested_stack("https://s3/b.json")
                })),
                vec![
                    LiveResource::new("ChildA", "AWS::CloudFormation::Stack", stack_arn(child_a)),
                    LiveResource::new("ChildB", "AWS::CloudFormation::Stack", stack_arn(child_b)),
                ],
            )
            .with_stack(
                child_a,
                resources(json!({"Func": function("old-key")})),
                vec![LiveResource::new("Func", "AWS::Lambda::Function", "child-a-func")],
            )
            .with_stack(
                child_b,
                resources(json!({"Queue": queue(30)})),
                vec![LiveResource::new("Queue", "AWS::SQS::Queue", "https://sqs/q")],
            );

        let target = TargetStack::new(resources(json!({
            "ChildA": nested_stack("https://s3/a.json"),
            "ChildB": nested_stack("https://s3/b.json")
        })))
        .with_nested(
            "ChildA",
            TargetStack::new(resources(json!({"Func": function("new-key")}))),
        )
        .with_nested("ChildB", TargetStack::new(resources(json!({"Queue": queue(60)}))));
        let env = Arc::new(RecordingEnvironment::new());

        let blockers = blockers(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].stack_name, child_b);
        assert_eq!(blockers[0].logical_id, "Queue");
        assert!(env.calls().is_empty());
    }

    #[tokio::test]
    async fn test_blocker_deep_in_the_tree_vetoes_root_changes() {
        let child = "root-Child-1";
        let grandchild = "root-Child-1-Grandchild-2";
        let state_machine = |definition: &str| {
            json!({
                "Type": "AWS::StepFunctions::StateMachine",
                "Properties": {"DefinitionString": definition}
            })
        };
        let templates = FakeTemplateSource::new()
            .with_stack(
                "root",
                resources(json!({
                    "Machine": state_machine("{\"StartAt\":\"A\"}"),
                    "Child": nested_stack("https://s3/child.json")
                })),
                vec![
                    LiveResource::new(
                        "Machine",
                        "AWS::StepFunctions::StateMachine",
                        "arn:aws:states:us-east-1:123456789012:stateMachine:m",
                    ),
                    LiveResource::new("Child", "AWS::CloudFormation::Stack", stack_arn(child)),
                ],
            )
            .with_stack(
                child,
                resources(json!({"Grandchild": nested_stack("https://s3/gc.json")})),
                vec![LiveResource::new(
                    "Grandchild",
                    "AWS::CloudFormation::Stack",
                    stack_arn(grandchild),
                )],
            )
            .with_stack(
                grandchild,
                resources(json!({"Queue": queue(30)})),
                vec![LiveResource::new("Queue", "AWS::SQS::Queue", "https://sqs/q")],
            );

        let target = TargetStack::new(resources(json!({
            "Machine": state_machine("{\"StartAt\":\"B\"}"),
            "Child": nested_stack("https://s3/child.json")
        })))
        .with_nested(
            "Child",
            TargetStack::new(resources(json!({"Grandchild": nested_stack("https://s3/gc.json")})))
                .with_nested("Grandchild", TargetStack::new(resources(json!({"Queue": queue(90)})))),
        );
        let env = Arc::new(RecordingEnvironment::new());

        let blockers = blockers(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].stack_name, grandchild);
        assert!(env.calls().is_empty());
    }

    #[tokio::test]
    async fn test_new_nested_stack_requires_full_deployment() {
        let (templates, _) = nested_function_setup("key", "key");
        let target = TargetStack::new(resources(json!({
            "NestedStack": nested_stack("https://s3/nested-old.json"),
            "NewStack": nested_stack("https://s3/new.json")
        })))
        .with_nested(
            "NestedStack",
            TargetStack::new(resources(json!({"Func": function("key")}))),
        );
        let env = Arc::new(RecordingEnvironment::new());

        let blockers = blockers(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].logical_id, "NewStack");
        assert_eq!(blockers[0].reason, "creating a nested stack is not supported");
    }

    #[tokio::test]
    async fn test_parameter_without_value_is_an_error() {
        let stack = |key: &str| {
            template(json!({
                "Parameters": {"BucketParam": {"Type": "String"}},
                "Resources": {"Func": {
                    "Type": "AWS::Lambda::Function",
                    "Properties": {
                        "Code": {"S3Bucket": {"Fn::Sub": "${BucketParam}"}, "S3Key": key},
                        "Runtime": "nodejs18.x"
                    }
                }}
            }))
        };
        let templates = FakeTemplateSource::new().with_stack(
            "root",
            stack("old-key"),
            vec![LiveResource::new("Func", "AWS::Lambda::Function", "root-func")],
        );
        let env = Arc::new(RecordingEnvironment::new());

        let error = error(
            deployer(templates, &env)
                .try_hotswap("root", &TargetStack::new(stack("new-key")), &BTreeMap::new())
                .await,
        );

        assert!(matches!(error, HotswapError::UnresolvableParameter { .. }));
        assert!(error.to_string().contains("BucketParam"));
        assert!(env.calls().is_empty());
    }

    #[tokio::test]
    async fn test_parameter_override_resolves_value() {
        let stack = |key: &str| {
            template(json!({
                "Parameters": {"BucketParam": {"Type": "String"}},
                "Resources": {"Func": {
                    "Type": "AWS::Lambda::Function",
                    "Properties": {
                        "Code": {"S3Bucket": {"Ref": "BucketParam"}, "S3Key": key},
                        "Runtime": "nodejs18.x"
                    }
                }}
            }))
        };
        let templates = FakeTemplateSource::new().with_stack(
            "root",
            stack("old-key"),
            vec![LiveResource::new("Func", "AWS::Lambda::Function", "root-func")],
        );
        let env = Arc::new(RecordingEnvironment::new());
        let overrides = BTreeMap::from([("BucketParam".to_string(), "override-bucket".to_string())]);

        applied(
            deployer(templates, &env)
                .try_hotswap("root", &TargetStack::new(stack("new-key")), &overrides)
                .await,
        );

        let calls = env.calls();
        let [Call::UpdateFunctionCode { code, .. }] = calls.as_slice() else {
            panic!("expected one code update");
        };
        assert_eq!(
            code,
            &LambdaCode::S3 {
                bucket: "override-bucket".to_string(),
                key: "new-key".to_string(),
                object_version: None,
            }
        );
    }

    #[tokio::test]
    async fn test_nested_stack_parameters_flow_into_child() {
        let child_name = "root-Assets-1";
        let parent = |url: &str| {
            template(json!({
                "Parameters": {"AssetBucket": {"Type": "String", "Default": "root-assets"}},
                "Resources": {
                    "Assets": {
                        "Type": "AWS::CloudFormation::Stack",
                        "Properties": {
                            "TemplateURL": url,
                            "Parameters": {"Bucket": {"Ref": "AssetBucket"}}
                        }
                    }
                }
            }))
        };
        let child = |key: &str| {
            template(json!({
                "Parameters": {"Bucket": {"Type": "String"}},
                "Resources": {"Func": {
                    "Type": "AWS::Lambda::Function",
                    "Properties": {"Code": {"S3Bucket": {"Ref": "Bucket"}, "S3Key": key}}
                }}
            }))
        };
        let templates = FakeTemplateSource::new()
            .with_stack(
                "root",
                parent("https://s3/a.json"),
                vec![LiveResource::new("Assets", "AWS::CloudFormation::Stack", stack_arn(child_name))],
            )
            .with_stack(
                child_name,
                child("old-key"),
                vec![LiveResource::new("Func", "AWS::Lambda::Function", "assets-func")],
            );
        let target = TargetStack::new(parent("https://s3/b.json"))
            .with_nested("Assets", TargetStack::new(child("new-key")));
        let env = Arc::new(RecordingEnvironment::new());

        applied(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        let calls = env.calls();
        let [Call::UpdateFunctionCode { function_name, code }] = calls.as_slice() else {
            panic!("expected one code update");
        };
        assert_eq!(function_name, "assets-func");
        assert!(matches!(code, LambdaCode::S3 { bucket, .. } if bucket == "root-assets"));
    }

    #[tokio::test]
    async fn test_unresolvable_nested_parameter_is_an_error() {
        let child_name = "root-Assets-1";
        let parent = template(json!({
            "Resources": {
                "Assets": {
                    "Type": "AWS::CloudFormation::Stack",
                    "Properties": {
                        "TemplateURL": "https://s3/a.json",
                        "Parameters": {"Bucket": {"Ref": "Missing"}}
                    }
                }
            }
        }));
        let child = resources(json!({"Func": function("old-key")}));
        let templates = FakeTemplateSource::new()
            .with_stack(
                "root",
                parent.clone(),
                vec![LiveResource::new("Assets", "AWS::CloudFormation::Stack", stack_arn(child_name))],
            )
            .with_stack(
                child_name,
                child,
                vec![LiveResource::new("Func", "AWS::Lambda::Function", "assets-func")],
            );
        let target = TargetStack::new(parent)
            .with_nested("Assets", TargetStack::new(resources(json!({"Func": function("new-key")}))));
        let env = Arc::new(RecordingEnvironment::new());

        let error = error(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        let HotswapError::UnresolvableNestedParameter {
            ref stack_name,
            ref logical_id,
            ref parameter,
            ..
        } = error
        else {
            panic!("expected UnresolvableNestedParameter, got {:?}", error);
        };
        assert_eq!(
            (stack_name.as_str(), logical_id.as_str(), parameter.as_str()),
            ("root", "Assets", "Bucket")
        );
        assert!(env.calls().is_empty());
    }

    #[tokio::test]
    async fn test_nested_stack_output_resolves_through_describe_stack() {
        let child_name = "root-Storage-1";
        let parent = |key: &str| {
            resources(json!({
                "Storage": nested_stack("https://s3/storage.json"),
                "Func": {
                    "Type": "AWS::Lambda::Function",
                    "Properties": {"Code": {
                        "S3Bucket": {"Fn::GetAtt": ["Storage", "Outputs.BucketName"]},
                        "S3Key": key
                    }}
                }
            }))
        };
        let storage = resources(json!({"Queue": queue(30)}));
        let templates = FakeTemplateSource::new()
            .with_stack(
                "root",
                parent("old-key"),
                vec![
                    LiveResource::new("Storage", "AWS::CloudFormation::Stack", stack_arn(child_name)),
                    LiveResource::new("Func", "AWS::Lambda::Function", "root-func"),
                ],
            )
            .with_stack_details(
                child_name,
                storage.clone(),
                vec![LiveResource::new("Queue", "AWS::SQS::Queue", "storage-queue")],
                BTreeMap::new(),
                BTreeMap::from([("BucketName".to_string(), "storage-bucket".to_string())]),
            );
        let target =
            TargetStack::new(parent("new-key")).with_nested("Storage", TargetStack::new(storage));
        let env = Arc::new(RecordingEnvironment::new());

        let outcomes = applied(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            env.calls(),
            vec![Call::UpdateFunctionCode {
                function_name: "root-func".to_string(),
                code: LambdaCode::S3 {
                    bucket: "storage-bucket".to_string(),
                    key: "new-key".to_string(),
                    object_version: None,
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_nested_target_template_is_an_error() {
        let (templates, _) = nested_function_setup("old-key", "new-key");
        let target = TargetStack::new(resources(
            json!({"NestedStack": nested_stack("https://s3/nested-new.json")}),
        ));
        let env = Arc::new(RecordingEnvironment::new());

        let error = error(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        assert!(matches!(error, HotswapError::MissingNestedTemplate { ref logical_id, .. } if logical_id == "NestedStack"));
    }

    #[tokio::test]
    async fn test_unknown_stack_is_an_error() {
        let env = Arc::new(RecordingEnvironment::new());
        let error = error(
            deployer(FakeTemplateSource::new(), &env)
                .try_hotswap("missing", &TargetStack::default(), &BTreeMap::new())
                .await,
        );
        assert!(matches!(error, HotswapError::StackNotFound(ref name) if name == "missing"));
    }

    fn two_functions() -> (FakeTemplateSource, TargetStack) {
        let templates = FakeTemplateSource::new().with_stack(
            "root",
            resources(json!({"Alpha": function("a1"), "Beta": function("b1")})),
            vec![
                LiveResource::new("Alpha", "AWS::Lambda::Function", "alpha-fn"),
                LiveResource::new("Beta", "AWS::Lambda::Function", "beta-fn"),
            ],
        );
        let target = TargetStack::new(resources(
            json!({"Alpha": function("a2"), "Beta": function("b2")}),
        ));
        (templates, target)
    }

    #[tokio::test]
    async fn test_executor_failure_is_reported_per_operation() {
        let (templates, target) = two_functions();
        let env = Arc::new(RecordingEnvironment::new().failing("alpha-fn"));

        let outcomes = applied(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        let statuses: Vec<_> = outcomes
            .iter()
            .map(|o| (o.logical_id.as_str(), matches!(o.status, OperationStatus::Failed(_))))
            .collect();
        assert_eq!(statuses, vec![("Alpha", true), ("Beta", false)]);
        assert_eq!(outcomes[1].status, OperationStatus::Succeeded);
        assert_eq!(env.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_every_operation() {
        let (templates, target) = two_functions();
        let env = Arc::new(RecordingEnvironment::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = applied(
            deployer(templates, &env)
                .try_hotswap_with_cancellation("root", &target, &BTreeMap::new(), &cancel)
                .await,
        );

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == OperationStatus::Skipped));
        assert!(env.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bucket_deployment_invokes_provider_with_update_event() {
        let provider_arn = "arn:aws:lambda:us-east-1:123456789012:function:root-Provider";
        let deployment = |key: &str| {
            json!({
                "Type": "Custom::CDKBucketDeployment",
                "Properties": {
                    "ServiceToken": {"Fn::GetAtt": ["Provider", "Arn"]},
                    "SourceBucketNames": ["assets"],
                    "SourceObjectKeys": [key],
                    "DestinationBucketName": "site"
                }
            })
        };
        let provider = json!({
            "Type": "AWS::Lambda::Function",
            "Properties": {"Code": {"S3Bucket": "assets", "S3Key": "provider.zip"}}
        });
        let templates = FakeTemplateSource::new().with_stack(
            "root",
            resources(json!({"Deploy": deployment("v1.zip"), "Provider": provider})),
            vec![
                LiveResource::new("Deploy", "Custom::CDKBucketDeployment", "aws.cdk.s3deployment.abc"),
                LiveResource::new("Provider", "AWS::Lambda::Function", "root-Provider"),
            ],
        );
        let target = TargetStack::new(resources(
            json!({"Deploy": deployment("v2.zip"), "Provider": provider}),
        ));
        let env = Arc::new(RecordingEnvironment::new());

        applied(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        let calls = env.calls();
        let [Call::Invoke { function_name, payload }] = calls.as_slice() else {
            panic!("expected one invocation");
        };
        assert_eq!(function_name, provider_arn);
        assert_eq!(payload["RequestType"], "Update");
        assert_eq!(payload["ResourceProperties"]["SourceObjectKeys"], json!(["v2.zip"]));
        assert_eq!(payload["OldResourceProperties"]["SourceObjectKeys"], json!(["v1.zip"]));
        assert!(payload["RequestId"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn test_provider_function_error_fails_the_operation() {
        let deployment = |key: &str| {
            json!({
                "Type": "Custom::CDKBucketDeployment",
                "Properties": {"ServiceToken": "provider-fn", "SourceObjectKeys": [key]}
            })
        };
        let templates = FakeTemplateSource::new().with_stack(
            "root",
            resources(json!({"Deploy": deployment("v1.zip")})),
            vec![LiveResource::new("Deploy", "Custom::CDKBucketDeployment", "deploy-id")],
        );
        let target = TargetStack::new(resources(json!({"Deploy": deployment("v2.zip")})));
        let env = Arc::new(RecordingEnvironment::new().with_function_error("provider-fn"));

        let outcomes = applied(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        let OperationStatus::Failed(reason) = &outcomes[0].status else {
            panic!("expected a failed invocation");
        };
        assert!(reason.contains("Unhandled"));
    }

    #[tokio::test]
    async fn test_task_definition_change_rolls_services() {
        let task = |image: &str| {
            json!({
                "Type": "AWS::ECS::TaskDefinition",
                "Properties": {
                    "Family": "web",
                    "ContainerDefinitions": [{"Name": "app", "Image": image}]
                }
            })
        };
        let service = json!({
            "Type": "AWS::ECS::Service",
            "Properties": {"Cluster": "prod", "TaskDefinition": {"Ref": "Task"}}
        });
        let templates = FakeTemplateSource::new().with_stack(
            "root",
            resources(json!({"Task": task("app:v1"), "Service": service})),
            vec![
                LiveResource::new(
                    "Task",
                    "AWS::ECS::TaskDefinition",
                    "arn:aws:ecs:us-east-1:123456789012:task-definition/web:3",
                ),
                LiveResource::new("Service", "AWS::ECS::Service", "web-service"),
            ],
        );
        let target = TargetStack::new(resources(json!({"Task": task("app:v2"), "Service": service})));
        let env = Arc::new(RecordingEnvironment::new());

        applied(
            deployer(templates, &env)
                .try_hotswap("root", &target, &BTreeMap::new())
                .await,
        );

        let calls = env.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], Call::RegisterTaskDefinition { family, properties }
            if family == "web" && properties["ContainerDefinitions"][0]["Image"] == "app:v2"));
        assert_eq!(
            calls[1],
            Call::UpdateService {
                cluster: "prod".to_string(),
                service: "web-service".to_string(),
                task_definition_arn: "arn:aws:ecs:us-east-1:123456789012:task-definition/web:4"
                    .to_string(),
            }
        );
    }
}
