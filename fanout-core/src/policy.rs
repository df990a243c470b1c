//! Queue access policy documents
//!
//! A bound queue carries one policy document. Each statement written here
//! lets a single topic deliver into the queue:
//!
//! ```json
//! {"Version":"2012-10-17",
//!  "Statement":[{"Effect":"Allow","Principal":{"AWS":"*"},
//!                "Action":"sqs:SendMessage","Resource":"<queue-url>",
//!                "Condition":{"ArnEquals":{"aws:SourceArn":"<topic-arn>"}}}]}
//! ```
//!
//! Documents written by other tools are read too. `Principal`, `Action` and
//! `Resource` may be a string or a list, `Statement` may be a single object,
//! and elements this module does not evaluate (`NotAction`, `StringEquals`
//! conditions and so on) are kept verbatim so a merged document writes them
//! back unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const SEND_MESSAGE_ACTION: &str = "sqs:SendMessage";
pub const SOURCE_ARN_KEY: &str = "aws:SourceArn";

/// Service principal that topics deliver as
pub const TOPIC_SERVICE_PRINCIPAL: &str = "sns.amazonaws.com";

const ANY: &str = "*";
const ANY_QUEUE_ACTION: &str = "sqs:*";
const AWS_PRINCIPAL: &str = "AWS";
const SERVICE_PRINCIPAL: &str = "Service";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(deserialize_with = "one_or_many_statements")]
    pub statement: Vec<Statement>,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

fn one_or_many_statements<'de, D>(deserializer: D) -> Result<Vec<Statement>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Statements {
        Many(Vec<Statement>),
        One(Box<Statement>),
    }

    Ok(match Statements::deserialize(deserializer)? {
        Statements::Many(statements) => statements,
        Statements::One(statement) => vec![*statement],
    })
}

/// A policy value written either as one string or as a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values = match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values.as_slice(),
        };
        values.iter().map(String::as_str)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.iter().any(|v| v == value)
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Elements not evaluated here, such as `NotPrincipal` or `NotAction`
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// `"Principal": "*"`
    Wildcard(String),
    /// `"Principal": {"AWS": ..., "Service": ...}`
    Typed(BTreeMap<String, OneOrMany>),
}

impl Principal {
    pub fn anyone() -> Self {
        let mut principals = BTreeMap::new();
        principals.insert(AWS_PRINCIPAL.to_string(), OneOrMany::from(ANY));
        Self::Typed(principals)
    }

    fn admits_topic_delivery(&self) -> bool {
        match self {
            Self::Wildcard(principal) => principal == ANY,
            Self::Typed(principals) => principals.iter().any(|(kind, ids)| match kind.as_str() {
                AWS_PRINCIPAL => ids.contains(ANY),
                SERVICE_PRINCIPAL => ids.contains(TOPIC_SERVICE_PRINCIPAL),
                _ => false,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(
        rename = "ArnEquals",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub arn_equals: BTreeMap<String, OneOrMany>,
    /// Operators other than `ArnEquals`
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl Condition {
    pub fn source_arn(topic_arn: &str) -> Self {
        let mut arn_equals = BTreeMap::new();
        arn_equals.insert(SOURCE_ARN_KEY.to_string(), OneOrMany::from(topic_arn));
        Self {
            arn_equals,
            other: BTreeMap::new(),
        }
    }

    /// Condition keys are case-insensitive
    fn matches_source(&self, source_arn: &str) -> bool {
        self.other.is_empty()
            && self.arn_equals.iter().all(|(key, values)| {
                key.eq_ignore_ascii_case(SOURCE_ARN_KEY) && values.contains(source_arn)
            })
    }
}

impl Statement {
    /// Allow `topic_arn` to send messages into the queue at `queue_url`
    pub fn allow_topic(queue_url: &str, topic_arn: &str) -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: Some(Principal::anyone()),
            action: Some(OneOrMany::from(SEND_MESSAGE_ACTION)),
            resource: Some(OneOrMany::from(queue_url)),
            condition: Some(Condition::source_arn(topic_arn)),
            other: BTreeMap::new(),
        }
    }

    /// False when the statement carries an element or condition operator
    /// this module cannot decide
    pub fn is_evaluable(&self) -> bool {
        self.other.is_empty() && self.condition.as_ref().map_or(true, |c| c.other.is_empty())
    }

    fn grants_action(&self, action: &str) -> bool {
        self.action.as_ref().is_some_and(|actions| {
            actions.iter().any(|a| {
                a == ANY
                    || a.eq_ignore_ascii_case(action)
                    || a.eq_ignore_ascii_case(ANY_QUEUE_ACTION)
            })
        })
    }

    fn applies_to(&self, action: &str, resources: &[&str], source_arn: &str) -> bool {
        let principal_matches = self
            .principal
            .as_ref()
            .is_some_and(Principal::admits_topic_delivery);
        let resource_matches = self
            .resource
            .as_ref()
            .is_some_and(|rs| rs.iter().any(|r| r == ANY || resources.contains(&r)));
        let condition_matches = self
            .condition
            .as_ref()
            .map_or(true, |c| c.matches_source(source_arn));

        principal_matches && self.grants_action(action) && resource_matches && condition_matches
    }
}

impl PolicyDocument {
    /// A document holding the single statement authorizing `topic_arn`
    pub fn allow_topic(queue_url: &str, topic_arn: &str) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            id: None,
            statement: vec![Statement::allow_topic(queue_url, topic_arn)],
            other: BTreeMap::new(),
        }
    }

    /// Whether some allow statement names `topic_arn` as its source
    pub fn authorizes_topic(&self, topic_arn: &str) -> bool {
        self.statement.iter().any(|s| {
            s.effect == Effect::Allow
                && s.is_evaluable()
                && s.grants_action(SEND_MESSAGE_ACTION)
                && s.condition
                    .as_ref()
                    .is_some_and(|c| !c.arn_equals.is_empty() && c.matches_source(topic_arn))
        })
    }

    /// Append a statement for `topic_arn` unless one exists. Existing
    /// statements are left as they are. Returns true if the document changed.
    pub fn merge_topic(&mut self, queue_url: &str, topic_arn: &str) -> bool {
        if self.authorizes_topic(topic_arn) {
            return false;
        }
        self.statement
            .push(Statement::allow_topic(queue_url, topic_arn));
        true
    }

    /// Evaluate the document for a request from `source_arn`. Any matching
    /// deny wins over allows. A statement that cannot be evaluated never
    /// allows, and denies if its effect is deny.
    pub fn allows(&self, action: &str, resources: &[&str], source_arn: &str) -> bool {
        let mut allowed = false;
        for statement in &self.statement {
            if !statement.is_evaluable() {
                if statement.effect == Effect::Deny {
                    return false;
                }
                continue;
            }
            if !statement.applies_to(action, resources, source_arn) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return false,
                Effect::Allow => allowed = true,
            }
        }
        allowed
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl FromStr for PolicyDocument {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}
