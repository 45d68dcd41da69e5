mod wait;

pub use wait::{WaitTime, WaitUnit};

use crate::Error;
use std::collections::HashMap;
use std::time::Duration;

/// Name of the policy guarding comment listing and comment creation.
pub const COMMENTS: &str = "comments";

/// A rate limit policy: how many requests a single key may make per window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Policy {
    /// The rate limiting interval.
    pub interval: Duration,
    /// The total requests to be allowed within the interval.
    pub max_requests: u64,
    /// Unit used when reporting the wait time of a throttled request.
    pub wait_unit: WaitUnit,
}

impl Policy {
    pub fn new(interval: Duration, max_requests: u64) -> Self {
        Self {
            interval,
            max_requests,
            wait_unit: WaitUnit::Seconds,
        }
    }

    /// Report wait times in the given unit instead of seconds.
    pub fn with_wait_unit(mut self, unit: WaitUnit) -> Self {
        self.wait_unit = unit;
        self
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.interval.is_zero() {
            return Err("interval must be non-zero");
        }
        if self.max_requests == 0 {
            return Err("max_requests must be at least 1");
        }
        Ok(())
    }
}

/// Named rate limit policies.
///
/// The registry is handed to a [RateLimiter](crate::RateLimiter) when it is built, so tests and
/// embedding applications can supply their own table. [PolicyRegistry::default] contains the
/// compiled-in policies.
#[derive(Clone, Debug)]
pub struct PolicyRegistry {
    policies: HashMap<String, Policy>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder {
            policies: Vec::new(),
        }
    }

    /// Look up a policy by name.
    ///
    /// Unknown names are a configuration error and never fall back to another policy.
    pub fn get(&self, name: &str) -> Result<&Policy, Error> {
        self.policies
            .get(name)
            .ok_or_else(|| Error::UnknownPolicy(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

impl Default for PolicyRegistry {
    /// `comments`: 50 requests per hour, waits reported in minutes.
    fn default() -> Self {
        let comments =
            Policy::new(Duration::from_secs(60 * 60), 50).with_wait_unit(WaitUnit::Minutes);
        let mut policies = HashMap::new();
        policies.insert(COMMENTS.to_owned(), comments);
        Self { policies }
    }
}

pub struct PolicyRegistryBuilder {
    policies: Vec<(String, Policy)>,
}

impl PolicyRegistryBuilder {
    /// Register a policy, replacing any earlier policy with the same name.
    pub fn policy(mut self, name: &str, policy: Policy) -> Self {
        self.policies.push((name.to_owned(), policy));
        self
    }

    /// Add the compiled-in policies, see [PolicyRegistry::default].
    pub fn with_defaults(mut self) -> Self {
        let mut merged: Vec<_> = PolicyRegistry::default().policies.into_iter().collect();
        merged.append(&mut self.policies);
        self.policies = merged;
        self
    }

    pub fn build(self) -> Result<PolicyRegistry, Error> {
        let mut policies = HashMap::with_capacity(self.policies.len());
        for (name, policy) in self.policies {
            if name.is_empty() {
                return Err(Error::InvalidPolicy {
                    name,
                    reason: "policy name must not be empty",
                });
            }
            if let Err(reason) = policy.validate() {
                return Err(Error::InvalidPolicy { name, reason });
            }
            policies.insert(name, policy);
        }
        Ok(PolicyRegistry { policies })
    }
}
