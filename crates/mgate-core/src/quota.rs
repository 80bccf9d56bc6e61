use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Per-caller usage counters over two horizons: lifetime since the
/// current billing period started, and the current day.
///
/// Mutated only by the external usage recorder; the enforcer reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_projects: u64,
    #[serde(default)]
    pub today_tokens: u64,
    #[serde(default)]
    pub today_requests: u64,
    #[serde(default)]
    pub today_projects: u64,
}

/// The unit a caller's plan is metered by. Exactly one method is active
/// at a time; only its counters are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMethod {
    Tokens,
    Requests,
    Projects,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitPolicy {
    pub limit_method: LimitMethod,
    #[serde(default)]
    pub daily_tokens: u64,
    #[serde(default)]
    pub monthly_tokens: u64,
    #[serde(default)]
    pub daily_requests: u64,
    #[serde(default)]
    pub monthly_requests: u64,
    #[serde(default)]
    pub daily_projects: u64,
    #[serde(default)]
    pub monthly_projects: u64,
}

/// The specific counter/limit pair a rejection names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDimension {
    DailyTokens,
    MonthlyTokens,
    DailyRequests,
    MonthlyRequests,
    DailyProjects,
    MonthlyProjects,
}

impl QuotaDimension {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaDimension::DailyTokens => "dailyTokens",
            QuotaDimension::MonthlyTokens => "monthlyTokens",
            QuotaDimension::DailyRequests => "dailyRequests",
            QuotaDimension::MonthlyRequests => "monthlyRequests",
            QuotaDimension::DailyProjects => "dailyProjects",
            QuotaDimension::MonthlyProjects => "monthlyProjects",
        }
    }
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QuotaDimension::DailyTokens => "daily token",
            QuotaDimension::MonthlyTokens => "monthly token",
            QuotaDimension::DailyRequests => "daily request",
            QuotaDimension::MonthlyRequests => "monthly request",
            QuotaDimension::DailyProjects => "daily project",
            QuotaDimension::MonthlyProjects => "monthly project",
        };
        f.write_str(label)
    }
}

/// Pre-flight quota gate. Metering is opt-in per caller: a missing
/// snapshot or policy passes. Otherwise the active limit method selects
/// its two counters, the day horizon checked before the period horizon,
/// and the first counter at or over its limit rejects the call. Pure;
/// runs strictly before any upstream dispatch.
pub fn check_usage(
    snapshot: Option<&UsageSnapshot>,
    policy: Option<&LimitPolicy>,
) -> RelayResult<()> {
    let (Some(usage), Some(limit)) = (snapshot, policy) else {
        return Ok(());
    };

    let checks = match limit.limit_method {
        LimitMethod::Tokens => [
            (usage.today_tokens, limit.daily_tokens, QuotaDimension::DailyTokens),
            (usage.total_tokens, limit.monthly_tokens, QuotaDimension::MonthlyTokens),
        ],
        LimitMethod::Requests => [
            (usage.today_requests, limit.daily_requests, QuotaDimension::DailyRequests),
            (usage.total_requests, limit.monthly_requests, QuotaDimension::MonthlyRequests),
        ],
        LimitMethod::Projects => [
            (usage.today_projects, limit.daily_projects, QuotaDimension::DailyProjects),
            (usage.total_projects, limit.monthly_projects, QuotaDimension::MonthlyProjects),
        ],
    };

    for (used, cap, dimension) in checks {
        if used >= cap {
            return Err(RelayError::QuotaExceeded {
                dimension,
                used,
                limit: cap,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_policy(daily: u64, monthly: u64) -> LimitPolicy {
        LimitPolicy {
            limit_method: LimitMethod::Tokens,
            daily_tokens: daily,
            monthly_tokens: monthly,
            daily_requests: 0,
            monthly_requests: 0,
            daily_projects: 0,
            monthly_projects: 0,
        }
    }

    #[test]
    fn absent_snapshot_or_policy_passes() {
        let usage = UsageSnapshot::default();
        let policy = token_policy(1, 1);
        assert!(check_usage(None, None).is_ok());
        assert!(check_usage(Some(&usage), None).is_ok());
        assert!(check_usage(None, Some(&policy)).is_ok());
    }

    #[test]
    fn daily_tokens_at_limit_rejects_with_that_dimension() {
        let usage = UsageSnapshot {
            today_tokens: 100,
            ..Default::default()
        };
        let policy = token_policy(100, 10_000);
        match check_usage(Some(&usage), Some(&policy)) {
            Err(RelayError::QuotaExceeded {
                dimension,
                used,
                limit,
            }) => {
                assert_eq!(dimension, QuotaDimension::DailyTokens);
                assert_eq!((used, limit), (100, 100));
            }
            other => panic!("expected quota rejection, got {other:?}"),
        }
    }

    #[test]
    fn daily_dimension_is_checked_before_monthly() {
        let usage = UsageSnapshot {
            today_tokens: 50,
            total_tokens: 500,
            ..Default::default()
        };
        let policy = token_policy(50, 500);
        match check_usage(Some(&usage), Some(&policy)) {
            Err(RelayError::QuotaExceeded { dimension, .. }) => {
                assert_eq!(dimension, QuotaDimension::DailyTokens);
            }
            other => panic!("expected quota rejection, got {other:?}"),
        }
    }

    #[test]
    fn only_the_active_method_counters_are_checked() {
        // Request counters way over, but the method is tokens.
        let usage = UsageSnapshot {
            today_requests: 1_000_000,
            total_requests: 1_000_000,
            today_tokens: 1,
            total_tokens: 1,
            ..Default::default()
        };
        let policy = token_policy(100, 100);
        assert!(check_usage(Some(&usage), Some(&policy)).is_ok());
    }

    #[test]
    fn monthly_rejection_names_monthly_dimension() {
        let usage = UsageSnapshot {
            today_requests: 1,
            total_requests: 200,
            ..Default::default()
        };
        let policy = LimitPolicy {
            limit_method: LimitMethod::Requests,
            daily_requests: 10,
            monthly_requests: 200,
            ..token_policy(0, 0)
        };
        match check_usage(Some(&usage), Some(&policy)) {
            Err(RelayError::QuotaExceeded { dimension, .. }) => {
                assert_eq!(dimension, QuotaDimension::MonthlyRequests);
            }
            other => panic!("expected quota rejection, got {other:?}"),
        }
    }

    #[test]
    fn verdict_is_idempotent_for_unchanged_inputs() {
        let usage = UsageSnapshot {
            today_tokens: 100,
            ..Default::default()
        };
        let policy = token_policy(100, 10_000);
        let first = check_usage(Some(&usage), Some(&policy));
        let second = check_usage(Some(&usage), Some(&policy));
        assert_eq!(first.is_err(), second.is_err());
        assert_eq!(
            format!("{:?}", first.err()),
            format!("{:?}", second.err())
        );
    }
}
