//! Change records flowing from the diff engine through classification to the executors.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::app::cfn_intrinsic_functions::Expression;
use crate::app::cfn_template::Resource;

/// How a logical ID differs between the deployed and the target template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Added,
    Removed,
    /// Same type on both sides; properties or resource attributes differ
    PropertiesModified,
    TypeChanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::PropertiesModified => "modified",
            ChangeKind::TypeChanged => "type changed",
        };
        write!(f, "{}", text)
    }
}

/// One resource-level difference, borrowed from the two templates it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceChange<'a> {
    pub logical_id: &'a str,
    pub kind: ChangeKind,
    /// The target type, or the deployed type for a removed resource
    pub resource_type: &'a str,
    pub old: Option<&'a Resource>,
    pub new: Option<&'a Resource>,
}

impl<'a> ResourceChange<'a> {
    pub fn old_type(&self) -> Option<&'a str> {
        self.old.map(|r| r.resource_type.as_str())
    }

    pub fn new_type(&self) -> Option<&'a str> {
        self.new.map(|r| r.resource_type.as_str())
    }

    pub fn old_property(&self, name: &str) -> Option<&'a Expression> {
        self.old.and_then(|r| r.properties.get(name))
    }

    pub fn new_property(&self, name: &str) -> Option<&'a Expression> {
        self.new.and_then(|r| r.properties.get(name))
    }

    /// Names of properties whose unevaluated expressions differ, including properties
    /// present on only one side
    pub fn changed_properties(&self) -> BTreeSet<&'a str> {
        let mut names = BTreeSet::new();
        for resource in self.old.iter().chain(self.new.iter()) {
            names.extend(resource.properties.keys().map(String::as_str));
        }
        names.retain(|name| self.old_property(name) != self.new_property(name));
        names
    }

    /// Resource attributes besides `Properties` and `Metadata` that differ
    pub fn changed_attributes(&self) -> Vec<&'static str> {
        match (self.old, self.new) {
            (Some(old), Some(new)) => old.changed_attributes(new),
            _ => Vec::new(),
        }
    }
}

/// Code source for a Lambda code update
#[derive(Clone, PartialEq, Eq)]
pub enum LambdaCode {
    S3 {
        bucket: String,
        key: String,
        object_version: Option<String>,
    },
    Image {
        image_uri: String,
    },
    /// Inline source already packaged as a deployment zip
    ZipFile(Vec<u8>),
}

impl fmt::Debug for LambdaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LambdaCode::S3 {
                bucket,
                key,
                object_version,
            } => f
                .debug_struct("S3")
                .field("bucket", bucket)
                .field("key", key)
                .field("object_version", object_version)
                .finish(),
            LambdaCode::Image { image_uri } => {
                f.debug_struct("Image").field("image_uri", image_uri).finish()
            }
            LambdaCode::ZipFile(bytes) => write!(f, "ZipFile({} bytes)", bytes.len()),
        }
    }
}

/// Configuration fields updated by `UpdateFunctionConfiguration`; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LambdaConfigurationUpdate {
    pub description: Option<String>,
    pub environment: Option<BTreeMap<String, String>>,
}

/// ECS service to roll onto a new task definition revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcsServiceTarget {
    pub logical_id: String,
    pub cluster: String,
    pub service: String,
}

/// A single executor instruction
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOperation {
    UpdateLambdaCode {
        function_name: String,
        code: LambdaCode,
    },
    UpdateLambdaConfiguration {
        function_name: String,
        update: LambdaConfigurationUpdate,
    },
    UpdateStateMachine {
        state_machine_arn: String,
        definition: String,
    },
    RegisterTaskDefinitionAndUpdateServices {
        family: String,
        /// Evaluated task definition properties, as in the template
        task_definition: Value,
        services: Vec<EcsServiceTarget>,
    },
    /// Invoke a custom resource provider function with a lifecycle event
    InvokeCustomResource {
        function_name: String,
        /// Event without `RequestId`, which is assigned per invocation
        event: Value,
    },
}

impl ResourceOperation {
    /// Short human readable description used in logs and outcomes
    pub fn describe(&self) -> String {
        match self {
            ResourceOperation::UpdateLambdaCode { function_name, .. } => {
                format!("update code of Lambda function '{}'", function_name)
            }
            ResourceOperation::UpdateLambdaConfiguration { function_name, .. } => {
                format!("update configuration of Lambda function '{}'", function_name)
            }
            ResourceOperation::UpdateStateMachine {
                state_machine_arn, ..
            } => format!("update definition of state machine '{}'", state_machine_arn),
            ResourceOperation::RegisterTaskDefinitionAndUpdateServices {
                family,
                services,
                ..
            } => format!(
                "register task definition '{}' and update {} service(s)",
                family,
                services.len()
            ),
            ResourceOperation::InvokeCustomResource { function_name, .. } => {
                format!("invoke custom resource provider '{}'", function_name)
            }
        }
    }
}

/// A resource change that can be applied through direct API calls
#[derive(Debug, Clone, PartialEq)]
pub struct HotswappableChange {
    pub stack_name: String,
    pub logical_id: String,
    pub resource_type: String,
    pub operations: Vec<ResourceOperation>,
}

/// A resource change that requires a full CloudFormation deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonHotswappableChange {
    pub stack_name: String,
    pub logical_id: String,
    pub resource_type: String,
    pub reason: String,
}

impl fmt::Display for NonHotswappableChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}): {}",
            self.stack_name, self.logical_id, self.resource_type, self.reason
        )
    }
}

/// Classifier verdict for one resource change
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    NoOp,
    Hotswappable(HotswappableChange),
    NonHotswappable(NonHotswappableChange),
}

impl Classification {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Classification::NonHotswappable(_))
    }
}
