//! Rule definitions handed to the external matching engine
//!
//! Rules here are parsed and validated only; evaluating them against a
//! connection is the job of a [`RuleMatcher`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::Metadata;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    Domain,
    DomainSuffix,
    DomainKeyword,
    GeoIp,
    IpCidr,
    SrcIpCidr,
    SrcPort,
    DstPort,
    ProcessName,
    Script,
    RuleSet,
    Match,
}

impl FromStr for RuleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "DOMAIN" => RuleType::Domain,
            "DOMAIN-SUFFIX" => RuleType::DomainSuffix,
            "DOMAIN-KEYWORD" => RuleType::DomainKeyword,
            "GEOIP" => RuleType::GeoIp,
            "IP-CIDR" | "IP-CIDR6" => RuleType::IpCidr,
            "SRC-IP-CIDR" => RuleType::SrcIpCidr,
            "SRC-PORT" => RuleType::SrcPort,
            "DST-PORT" => RuleType::DstPort,
            "PROCESS-NAME" => RuleType::ProcessName,
            "SCRIPT" => RuleType::Script,
            "RULE-SET" => RuleType::RuleSet,
            "MATCH" => RuleType::Match,
            other => return Err(Error::ConfigParse(format!("unsupported rule type {}", other))),
        })
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleType::Domain => "DOMAIN",
            RuleType::DomainSuffix => "DOMAIN-SUFFIX",
            RuleType::DomainKeyword => "DOMAIN-KEYWORD",
            RuleType::GeoIp => "GEOIP",
            RuleType::IpCidr => "IP-CIDR",
            RuleType::SrcIpCidr => "SRC-IP-CIDR",
            RuleType::SrcPort => "SRC-PORT",
            RuleType::DstPort => "DST-PORT",
            RuleType::ProcessName => "PROCESS-NAME",
            RuleType::Script => "SCRIPT",
            RuleType::RuleSet => "RULE-SET",
            RuleType::Match => "MATCH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub rule_type: RuleType,
    pub payload: String,
    pub target: String,
    pub params: Vec<String>,
}

impl Rule {
    /// Parse `TYPE,PAYLOAD,TARGET[,PARAM...]` or `MATCH,TARGET`.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let malformed = || Error::ConfigParse(format!("malformed rule {:?}", line));

        let rule_type: RuleType = parts.first().ok_or_else(malformed)?.parse()?;
        if rule_type == RuleType::Match {
            return match parts.as_slice() {
                [_, target] if !target.is_empty() => Ok(Rule {
                    rule_type,
                    payload: String::new(),
                    target: target.to_string(),
                    params: Vec::new(),
                }),
                _ => Err(malformed()),
            };
        }

        match parts.as_slice() {
            [_, payload, target, params @ ..] if !payload.is_empty() && !target.is_empty() => {
                Ok(Rule {
                    rule_type,
                    payload: payload.to_string(),
                    target: target.to_string(),
                    params: params.iter().map(|p| p.to_string()).collect(),
                })
            }
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rule_type == RuleType::Match {
            write!(f, "{},{}", self.rule_type, self.target)
        } else {
            write!(f, "{},{},{}", self.rule_type, self.payload, self.target)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleBehavior {
    Domain,
    Ipcidr,
    Classical,
}

/// A named rule set referenced by `RULE-SET` rules and scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleProvider {
    #[serde(default)]
    pub name: String,
    pub behavior: RuleBehavior,
    #[serde(default)]
    pub payload: Vec<String>,
}

/// Script source evaluated in `script` mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainMatcher {
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteAction {
    Reject,
    #[serde(rename = "reject-200")]
    Reject200,
    #[serde(rename = "302")]
    Redirect302,
    #[serde(rename = "307")]
    Redirect307,
    RequestHeader,
    ResponseHeader,
    RequestBody,
    ResponseBody,
}

/// MITM URL rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub url: String,
    pub action: RewriteAction,
    #[serde(default)]
    pub replacement: String,
}

/// Rule evaluation, supplied by the routing engine
pub trait RuleMatcher: Send + Sync {
    /// Target proxy name for `metadata`, `None` when no rule applies.
    fn matches(&self, metadata: &Metadata, rules: &[Rule]) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule() {
        let rule = Rule::parse("DOMAIN-SUFFIX,google.com,Proxy").unwrap();
        assert_eq!(rule.rule_type, RuleType::DomainSuffix);
        assert_eq!(rule.payload, "google.com");
        assert_eq!(rule.target, "Proxy");

        let rule = Rule::parse("IP-CIDR, 10.0.0.0/8, DIRECT, no-resolve").unwrap();
        assert_eq!(rule.params, vec!["no-resolve"]);
        assert_eq!(rule.to_string(), "IP-CIDR,10.0.0.0/8,DIRECT");
    }

    #[test]
    fn test_parse_match() {
        let rule = Rule::parse("MATCH,DIRECT").unwrap();
        assert_eq!(rule.rule_type, RuleType::Match);
        assert_eq!(rule.to_string(), "MATCH,DIRECT");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Rule::parse("DOMAIN,example.com").is_err());
        assert!(Rule::parse("MATCH").is_err());
        assert!(Rule::parse("NOPE,a,b").is_err());
        assert!(Rule::parse("").is_err());
    }

    #[test]
    fn test_rewrite_serde() {
        let rule: RewriteRule = serde_json::from_str(
            r#"{"url":"^https?://ad\\.example\\.com","action":"reject-200"}"#,
        )
        .unwrap();
        assert_eq!(rule.action, RewriteAction::Reject200);
    }
}
