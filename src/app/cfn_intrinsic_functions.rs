//! CloudFormation intrinsic function expression trees
//!
//! Resource property values in a rendered template are plain JSON, where an object with a
//! single `Ref` or `Fn::*` key is an intrinsic function call. This module parses such values
//! into an [`Expression`] tree so that diffing and evaluation work on a typed structure
//! instead of loosely-typed nested maps.
//!
//! Parsing is total: an intrinsic with a malformed argument shape becomes
//! [`Expression::Malformed`] and only fails when it is evaluated, so a template with an
//! unusual property in an untouched resource can still be diffed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Represents the type of CloudFormation intrinsic function detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntrinsicFunctionType {
    /// Simple reference: {"Ref": "ResourceName"}
    Ref,
    /// Get attribute: {"Fn::GetAtt": ["Resource", "Attribute"]}
    GetAtt,
    /// String substitution: {"Fn::Sub": "text ${var}"}
    Sub,
    /// Join array elements: {"Fn::Join": [",", ["a", "b"]]}
    Join,
    /// Select from array: {"Fn::Select": [0, array]}
    Select,
    /// Split string: {"Fn::Split": [",", "a,b,c"]}
    Split,
    /// Base64 encode: {"Fn::Base64": "text"}
    Base64,
    /// Find in map: {"Fn::FindInMap": ["Map", "Key1", "Key2"]}
    FindInMap,
    /// Import value: {"Fn::ImportValue": "ExportName"}
    ImportValue,
    /// Get availability zones: {"Fn::GetAZs": "region"}
    GetAZs,
    /// Calculate CIDR: {"Fn::Cidr": ["10.0.0.0/16", 256, 8]}
    Cidr,
    /// Get length: {"Fn::Length": array}
    Length,
    /// Convert to JSON string: {"Fn::ToJsonString": object}
    ToJsonString,
    /// Transform: {"Fn::Transform": {...}}
    Transform,
    /// If condition: {"Fn::If": ["ConditionName", "TrueValue", "FalseValue"]}
    If,
    /// And condition: {"Fn::And": [condition1, condition2]}
    And,
    /// Or condition: {"Fn::Or": [condition1, condition2]}
    Or,
    /// Not condition: {"Fn::Not": \[condition\]}
    Not,
    /// Equals condition: {"Fn::Equals": [value1, value2]}
    Equals,
    /// ForEach loop: {"Fn::ForEach": [...]}
    ForEach,
}

impl IntrinsicFunctionType {
    const ALL: [IntrinsicFunctionType; 20] = [
        IntrinsicFunctionType::Ref,
        IntrinsicFunctionType::GetAtt,
        IntrinsicFunctionType::Sub,
        IntrinsicFunctionType::Join,
        IntrinsicFunctionType::Select,
        IntrinsicFunctionType::Split,
        IntrinsicFunctionType::Base64,
        IntrinsicFunctionType::FindInMap,
        IntrinsicFunctionType::ImportValue,
        IntrinsicFunctionType::GetAZs,
        IntrinsicFunctionType::Cidr,
        IntrinsicFunctionType::Length,
        IntrinsicFunctionType::ToJsonString,
        IntrinsicFunctionType::Transform,
        IntrinsicFunctionType::If,
        IntrinsicFunctionType::And,
        IntrinsicFunctionType::Or,
        IntrinsicFunctionType::Not,
        IntrinsicFunctionType::Equals,
        IntrinsicFunctionType::ForEach,
    ];

    /// Get the JSON function name for this intrinsic function
    pub fn json_name(&self) -> &'static str {
        match self {
            IntrinsicFunctionType::Ref => "Ref",
            IntrinsicFunctionType::GetAtt => "Fn::GetAtt",
            IntrinsicFunctionType::Sub => "Fn::Sub",
            IntrinsicFunctionType::Join => "Fn::Join",
            IntrinsicFunctionType::Select => "Fn::Select",
            IntrinsicFunctionType::Split => "Fn::Split",
            IntrinsicFunctionType::Base64 => "Fn::Base64",
            IntrinsicFunctionType::FindInMap => "Fn::FindInMap",
            IntrinsicFunctionType::ImportValue => "Fn::ImportValue",
            IntrinsicFunctionType::GetAZs => "Fn::GetAZs",
            IntrinsicFunctionType::Cidr => "Fn::Cidr",
            IntrinsicFunctionType::Length => "Fn::Length",
            IntrinsicFunctionType::ToJsonString => "Fn::ToJsonString",
            IntrinsicFunctionType::Transform => "Fn::Transform",
            IntrinsicFunctionType::If => "Fn::If",
            IntrinsicFunctionType::And => "Fn::And",
            IntrinsicFunctionType::Or => "Fn::Or",
            IntrinsicFunctionType::Not => "Fn::Not",
            IntrinsicFunctionType::Equals => "Fn::Equals",
            IntrinsicFunctionType::ForEach => "Fn::ForEach",
        }
    }

    /// Look up an intrinsic function by its JSON key
    pub fn from_json_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.json_name() == name)
    }

    /// Whether the evaluator can compute a concrete value for this function
    pub fn is_evaluable(&self) -> bool {
        matches!(
            self,
            IntrinsicFunctionType::Ref
                | IntrinsicFunctionType::GetAtt
                | IntrinsicFunctionType::Sub
                | IntrinsicFunctionType::Join
                | IntrinsicFunctionType::Select
                | IntrinsicFunctionType::Split
                | IntrinsicFunctionType::Base64
                | IntrinsicFunctionType::FindInMap
                | IntrinsicFunctionType::ImportValue
        )
    }
}

impl fmt::Display for IntrinsicFunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.json_name())
    }
}

/// Detect if a JSON value is a CloudFormation intrinsic function call.
///
/// Only single-key objects count: `{"Ref": "X", "Other": 1}` is a plain map.
pub fn detect_intrinsic_function(value: &Value) -> Option<IntrinsicFunctionType> {
    match value {
        Value::Object(obj) if obj.len() == 1 => obj
            .keys()
            .next()
            .and_then(|key| IntrinsicFunctionType::from_json_name(key)),
        _ => None,
    }
}

/// A property value of a rendered template.
///
/// Literal lists and maps keep their children as expressions, since an intrinsic can
/// appear at any depth. Equality is structural over the unevaluated tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Expression>),
    Map(BTreeMap<String, Expression>),
    Ref(String),
    GetAtt {
        logical_id: String,
        attribute: String,
    },
    Join {
        delimiter: String,
        parts: Box<Expression>,
    },
    Select {
        index: Box<Expression>,
        list: Box<Expression>,
    },
    Split {
        delimiter: String,
        source: Box<Expression>,
    },
    Sub {
        template: String,
        variables: BTreeMap<String, Expression>,
    },
    FindInMap {
        map_name: Box<Expression>,
        top_level_key: Box<Expression>,
        second_level_key: Box<Expression>,
    },
    Base64(Box<Expression>),
    ImportValue(Box<Expression>),
    /// A recognised intrinsic the evaluator does not compute (`Fn::If`, `Fn::GetAZs`, ...)
    Unsupported {
        function: IntrinsicFunctionType,
        argument: Box<Expression>,
    },
    /// A recognised intrinsic whose argument has the wrong shape
    Malformed {
        function: IntrinsicFunctionType,
        raw: Value,
    },
}

impl Default for Expression {
    fn default() -> Self {
        Expression::Null
    }
}

impl Expression {
    /// Parse a template JSON value into an expression tree.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Expression::Null,
            Value::Bool(b) => Expression::Bool(*b),
            Value::Number(n) => Expression::Number(n.clone()),
            Value::String(s) => Expression::String(s.clone()),
            Value::Array(items) => Expression::List(items.iter().map(Self::from_value).collect()),
            Value::Object(obj) => match detect_intrinsic_function(value) {
                Some(function) => {
                    // detect_intrinsic_function guarantees exactly one entry
                    let argument = obj.values().next().unwrap_or(&Value::Null);
                    Self::parse_intrinsic(function, argument)
                }
                None => Expression::Map(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), Self::from_value(v)))
                        .collect(),
                ),
            },
        }
    }

    fn parse_intrinsic(function: IntrinsicFunctionType, argument: &Value) -> Self {
        let malformed = || Expression::Malformed {
            function,
            raw: argument.clone(),
        };

        match function {
            IntrinsicFunctionType::Ref => match argument {
                Value::String(name) => Expression::Ref(name.clone()),
                _ => malformed(),
            },
            IntrinsicFunctionType::GetAtt => match argument {
                Value::Array(items) => match items.as_slice() {
                    [Value::String(logical_id), Value::String(attribute)] => Expression::GetAtt {
                        logical_id: logical_id.clone(),
                        attribute: attribute.clone(),
                    },
                    _ => malformed(),
                },
                // Short form "Resource.Attribute"; the attribute itself may contain dots
                Value::String(dotted) => match dotted.split_once('.') {
                    Some((logical_id, attribute)) if !logical_id.is_empty() => {
                        Expression::GetAtt {
                            logical_id: logical_id.to_string(),
                            attribute: attribute.to_string(),
                        }
                    }
                    _ => malformed(),
                },
                _ => malformed(),
            },
            IntrinsicFunctionType::Join => match argument {
                Value::Array(items) => match items.as_slice() {
                    [Value::String(delimiter), parts] => Expression::Join {
                        delimiter: delimiter.clone(),
                        parts: Box::new(Self::from_value(parts)),
                    },
                    _ => malformed(),
                },
                _ => malformed(),
            },
            IntrinsicFunctionType::Select => match argument {
                Value::Array(items) => match items.as_slice() {
                    [index, list] => Expression::Select {
                        index: Box::new(Self::from_value(index)),
                        list: Box::new(Self::from_value(list)),
                    },
                    _ => malformed(),
                },
                _ => malformed(),
            },
            IntrinsicFunctionType::Split => match argument {
                Value::Array(items) => match items.as_slice() {
                    [Value::String(delimiter), source] => Expression::Split {
                        delimiter: delimiter.clone(),
                        source: Box::new(Self::from_value(source)),
                    },
                    _ => malformed(),
                },
                _ => malformed(),
            },
            IntrinsicFunctionType::Sub => match argument {
                Value::String(template) => Expression::Sub {
                    template: template.clone(),
                    variables: BTreeMap::new(),
                },
                Value::Array(items) => match items.as_slice() {
                    [Value::String(template), Value::Object(vars)] => Expression::Sub {
                        template: template.clone(),
                        variables: vars
                            .iter()
                            .map(|(k, v)| (k.clone(), Self::from_value(v)))
                            .collect(),
                    },
                    _ => malformed(),
                },
                _ => malformed(),
            },
            IntrinsicFunctionType::FindInMap => match argument {
                // A fourth element (DefaultValue from the language extensions) is ignored
                Value::Array(items) if items.len() == 3 || items.len() == 4 => {
                    Expression::FindInMap {
                        map_name: Box::new(Self::from_value(&items[0])),
                        top_level_key: Box::new(Self::from_value(&items[1])),
                        second_level_key: Box::new(Self::from_value(&items[2])),
                    }
                }
                _ => malformed(),
            },
            IntrinsicFunctionType::Base64 => Expression::Base64(Box::new(Self::from_value(argument))),
            IntrinsicFunctionType::ImportValue => {
                Expression::ImportValue(Box::new(Self::from_value(argument)))
            }
            other => Expression::Unsupported {
                function: other,
                argument: Box::new(Self::from_value(argument)),
            },
        }
    }

    /// Render the expression back into template JSON.
    pub fn to_value(&self) -> Value {
        fn call(function: IntrinsicFunctionType, argument: Value) -> Value {
            let mut obj = Map::new();
            obj.insert(function.json_name().to_string(), argument);
            Value::Object(obj)
        }

        match self {
            Expression::Null => Value::Null,
            Expression::Bool(b) => Value::Bool(*b),
            Expression::Number(n) => Value::Number(n.clone()),
            Expression::String(s) => Value::String(s.clone()),
            Expression::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Expression::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Expression::Ref(name) => call(IntrinsicFunctionType::Ref, Value::String(name.clone())),
            Expression::GetAtt {
                logical_id,
                attribute,
            } => call(
                IntrinsicFunctionType::GetAtt,
                Value::Array(vec![
                    Value::String(logical_id.clone()),
                    Value::String(attribute.clone()),
                ]),
            ),
            Expression::Join { delimiter, parts } => call(
                IntrinsicFunctionType::Join,
                Value::Array(vec![Value::String(delimiter.clone()), parts.to_value()]),
            ),
            Expression::Select { index, list } => call(
                IntrinsicFunctionType::Select,
                Value::Array(vec![index.to_value(), list.to_value()]),
            ),
            Expression::Split { delimiter, source } => call(
                IntrinsicFunctionType::Split,
                Value::Array(vec![Value::String(delimiter.clone()), source.to_value()]),
            ),
            Expression::Sub {
                template,
                variables,
            } => {
                if variables.is_empty() {
                    call(IntrinsicFunctionType::Sub, Value::String(template.clone()))
                } else {
                    let vars: Map<String, Value> = variables
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_value()))
                        .collect();
                    call(
                        IntrinsicFunctionType::Sub,
                        Value::Array(vec![Value::String(template.clone()), Value::Object(vars)]),
                    )
                }
            }
            Expression::FindInMap {
                map_name,
                top_level_key,
                second_level_key,
            } => call(
                IntrinsicFunctionType::FindInMap,
                Value::Array(vec![
                    map_name.to_value(),
                    top_level_key.to_value(),
                    second_level_key.to_value(),
                ]),
            ),
            Expression::Base64(inner) => call(IntrinsicFunctionType::Base64, inner.to_value()),
            Expression::ImportValue(inner) => {
                call(IntrinsicFunctionType::ImportValue, inner.to_value())
            }
            Expression::Unsupported { function, argument } => call(*function, argument.to_value()),
            Expression::Malformed { function, raw } => call(*function, raw.clone()),
        }
    }

    /// The intrinsic function at the root of this expression, if any
    pub fn intrinsic_type(&self) -> Option<IntrinsicFunctionType> {
        match self {
            Expression::Ref(_) => Some(IntrinsicFunctionType::Ref),
            Expression::GetAtt { .. } => Some(IntrinsicFunctionType::GetAtt),
            Expression::Join { .. } => Some(IntrinsicFunctionType::Join),
            Expression::Select { .. } => Some(IntrinsicFunctionType::Select),
            Expression::Split { .. } => Some(IntrinsicFunctionType::Split),
            Expression::Sub { .. } => Some(IntrinsicFunctionType::Sub),
            Expression::FindInMap { .. } => Some(IntrinsicFunctionType::FindInMap),
            Expression::Base64(_) => Some(IntrinsicFunctionType::Base64),
            Expression::ImportValue(_) => Some(IntrinsicFunctionType::ImportValue),
            Expression::Unsupported { function, .. } | Expression::Malformed { function, .. } => {
                Some(*function)
            }
            _ => None,
        }
    }

    /// Literal string content, if this is a plain string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expression::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collect every logical ID (or parameter name) this expression refers to through
    /// `Ref`, `Fn::GetAtt` or `Fn::Sub` placeholders.
    pub fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Ref(name) => {
                out.insert(name.clone());
            }
            Expression::GetAtt { logical_id, .. } => {
                out.insert(logical_id.clone());
            }
            Expression::Sub {
                template,
                variables,
            } => {
                for part in parse_sub_template(template) {
                    if let SubTemplatePart::Placeholder(token) = part {
                        let name = token.split('.').next().unwrap_or(&token);
                        if !variables.contains_key(name) {
                            out.insert(name.to_string());
                        }
                    }
                }
                for value in variables.values() {
                    value.collect_references(out);
                }
            }
            Expression::List(items) => items.iter().for_each(|item| item.collect_references(out)),
            Expression::Map(entries) => entries
                .values()
                .for_each(|value| value.collect_references(out)),
            Expression::Join { parts, .. } => parts.collect_references(out),
            Expression::Select { index, list } => {
                index.collect_references(out);
                list.collect_references(out);
            }
            Expression::Split { source, .. } => source.collect_references(out),
            Expression::FindInMap {
                map_name,
                top_level_key,
                second_level_key,
            } => {
                map_name.collect_references(out);
                top_level_key.collect_references(out);
                second_level_key.collect_references(out);
            }
            Expression::Base64(inner) | Expression::ImportValue(inner) => {
                inner.collect_references(out)
            }
            Expression::Unsupported { argument, .. } => argument.collect_references(out),
            Expression::Null
            | Expression::Bool(_)
            | Expression::Number(_)
            | Expression::String(_)
            | Expression::Malformed { .. } => {}
        }
    }

    /// Whether this expression refers to `logical_id` anywhere in its tree
    pub fn references(&self, logical_id: &str) -> bool {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs.contains(logical_id)
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::from_value(&value)
    }
}

impl Serialize for Expression {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Expression::from_value(&value))
    }
}

/// One piece of an `Fn::Sub` template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubTemplatePart {
    /// Text copied verbatim
    Literal(String),
    /// `${Token}` - a parameter, logical ID, `Resource.Attribute` or `AWS::` pseudo parameter
    Placeholder(String),
}

/// Split an `Fn::Sub` template into literal text and `${...}` placeholders.
///
/// `${!Token}` is the escape for a literal `${Token}`. An unterminated `${` is kept as text.
pub fn parse_sub_template(template: &str) -> Vec<SubTemplatePart> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        if let Some(escaped) = after.strip_prefix('!') {
            literal.push_str("${");
            rest = escaped;
            continue;
        }

        match after.find('}') {
            Some(end) => {
                if !literal.is_empty() {
                    parts.push(SubTemplatePart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(SubTemplatePart::Placeholder(after[..end].trim().to_string()));
                rest = &after[end + 1..];
            }
            None => {
                literal.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(SubTemplatePart::Literal(literal));
    }
    parts
}
