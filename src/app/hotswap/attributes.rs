//! `Fn::GetAtt` attribute formats derived from a resource's physical ID.
//!
//! The live resource listing of a stack only carries physical IDs, so an attribute can be
//! resolved without an extra API call only when it is a fixed function of the physical ID
//! and the deployment environment. Anything not listed here is reported as unsupported.

use super::value_source::DeploymentEnvironment;

/// Compute `attribute` of a resource of `resource_type` from its physical ID.
///
/// Returns `None` when the attribute is not derivable for that type.
pub fn format_attribute(
    resource_type: &str,
    attribute: &str,
    physical_id: &str,
    env: &DeploymentEnvironment,
) -> Option<String> {
    let partition = &env.partition;
    let region = &env.region;
    let account = &env.account_id;
    let suffix = &env.url_suffix;

    let value = match (resource_type, attribute) {
        ("AWS::IAM::Role", "Arn") => format!("arn:{partition}:iam::{account}:role/{physical_id}"),
        ("AWS::IAM::User", "Arn") => format!("arn:{partition}:iam::{account}:user/{physical_id}"),
        ("AWS::IAM::Group", "Arn") => {
            format!("arn:{partition}:iam::{account}:group/{physical_id}")
        }
        ("AWS::S3::Bucket", "Arn") => format!("arn:{partition}:s3:::{physical_id}"),
        ("AWS::S3::Bucket", "DomainName") => format!("{physical_id}.s3.{suffix}"),
        ("AWS::S3::Bucket", "RegionalDomainName") => format!("{physical_id}.s3.{region}.{suffix}"),
        ("AWS::S3::Bucket", "WebsiteURL") => {
            format!("http://{physical_id}.s3-website-{region}.{suffix}")
        }
        // Queues are identified by URL; the name is its last path segment
        ("AWS::SQS::Queue", "Arn") => format!(
            "arn:{partition}:sqs:{region}:{account}:{}",
            last_segment(physical_id, '/')
        ),
        ("AWS::SQS::Queue", "QueueName") => last_segment(physical_id, '/').to_string(),
        ("AWS::SQS::Queue", "QueueUrl") => physical_id.to_string(),
        ("AWS::SNS::Topic", "TopicArn") => physical_id.to_string(),
        ("AWS::SNS::Topic", "TopicName") => last_segment(physical_id, ':').to_string(),
        ("AWS::DynamoDB::Table", "Arn") => {
            format!("arn:{partition}:dynamodb:{region}:{account}:table/{physical_id}")
        }
        ("AWS::Lambda::Function", "Arn") => {
            format!("arn:{partition}:lambda:{region}:{account}:function:{physical_id}")
        }
        ("AWS::StepFunctions::StateMachine", "Arn") => physical_id.to_string(),
        ("AWS::StepFunctions::StateMachine", "Name") => last_segment(physical_id, ':').to_string(),
        ("AWS::Events::EventBus", "Arn") => {
            format!("arn:{partition}:events:{region}:{account}:event-bus/{physical_id}")
        }
        ("AWS::Events::EventBus", "Name") => physical_id.to_string(),
        ("AWS::Kinesis::Stream", "Arn") => {
            format!("arn:{partition}:kinesis:{region}:{account}:stream/{physical_id}")
        }
        ("AWS::KMS::Key", "Arn") => {
            format!("arn:{partition}:kms:{region}:{account}:key/{physical_id}")
        }
        ("AWS::KMS::Key", "KeyId") => physical_id.to_string(),
        ("AWS::ECS::Cluster", "Arn") => {
            format!("arn:{partition}:ecs:{region}:{account}:cluster/{physical_id}")
        }
        ("AWS::ECR::Repository", "Arn") => {
            format!("arn:{partition}:ecr:{region}:{account}:repository/{physical_id}")
        }
        ("AWS::Logs::LogGroup", "Arn") => {
            format!("arn:{partition}:logs:{region}:{account}:log-group:{physical_id}:*")
        }
        _ => return None,
    };

    Some(value)
}

fn last_segment(value: &str, separator: char) -> &str {
    value
        .trim_end_matches(separator)
        .rsplit(separator)
        .next()
        .unwrap_or(value)
}
