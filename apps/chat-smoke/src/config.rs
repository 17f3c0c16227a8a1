//! Environment-backed configuration for `chat-smoke`.

use std::{env, time::Duration};

use chat_core::{ConversationRef, DisplaySettings, HourCycle};
use chat_rest::{DEFAULT_API_BASE_URL, default_realtime_url};
use thiserror::Error;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20_000;
/// Largest offset accepted by a fixed UTC offset, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 24 * 60 - 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub api_base_url: Url,
    pub realtime_url: Url,
    /// Bearer token seeded into the session store.
    pub auth_token: Option<String>,
    /// Viewer id seeded into the session store.
    pub user_id: Option<String>,
    pub role: Option<String>,
    /// Conversation to open; the smoke run only checks connectivity without one.
    pub conversation: Option<ConversationRef>,
    pub display: DisplaySettings,
    pub request_timeout: Duration,
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_base_url = parse_url(
            "ACADEMY_API_BASE_URL",
            optional_trimmed_env("ACADEMY_API_BASE_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned()),
        )?;
        let realtime_url = match optional_trimmed_env("ACADEMY_REALTIME_URL", &mut lookup) {
            Some(value) => parse_url("ACADEMY_REALTIME_URL", value)?,
            None => default_realtime_url(&api_base_url).map_err(|err| {
                ConfigError::InvalidValue {
                    key: "ACADEMY_API_BASE_URL",
                    value: api_base_url.to_string(),
                    reason: format!("cannot derive realtime url: {err}"),
                }
            })?,
        };

        let auth_token = optional_trimmed_env("ACADEMY_AUTH_TOKEN", &mut lookup);
        let user_id = optional_trimmed_env("ACADEMY_USER_ID", &mut lookup);
        let role = optional_trimmed_env("ACADEMY_ROLE", &mut lookup);

        let conversation_kind = optional_trimmed_env("ACADEMY_CONVERSATION_KIND", &mut lookup);
        let conversation = match optional_trimmed_env("ACADEMY_CONVERSATION_ID", &mut lookup) {
            None => None,
            Some(id) => Some(match conversation_kind.as_deref() {
                None | Some("direct") => ConversationRef::direct(id),
                Some("group") => ConversationRef::group(id),
                Some(other) => {
                    return Err(ConfigError::InvalidValue {
                        key: "ACADEMY_CONVERSATION_KIND",
                        value: other.to_owned(),
                        reason: "expected 'direct' or 'group'".to_owned(),
                    });
                }
            }),
        };

        let utc_offset_minutes =
            match optional_trimmed_env("ACADEMY_UTC_OFFSET_MINUTES", &mut lookup) {
                None => 0,
                Some(value) => {
                    let minutes = value
                        .parse::<i32>()
                        .map_err(|err| ConfigError::InvalidValue {
                            key: "ACADEMY_UTC_OFFSET_MINUTES",
                            value: value.clone(),
                            reason: err.to_string(),
                        })?;
                    if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
                        return Err(ConfigError::InvalidValue {
                            key: "ACADEMY_UTC_OFFSET_MINUTES",
                            value,
                            reason: format!("must be within +/-{MAX_UTC_OFFSET_MINUTES}"),
                        });
                    }
                    minutes
                }
            };
        let hour_cycle = match optional_trimmed_env("ACADEMY_HOUR_CYCLE", &mut lookup).as_deref() {
            None | Some("h23") => HourCycle::H23,
            Some("h12") => HourCycle::H12,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ACADEMY_HOUR_CYCLE",
                    value: other.to_owned(),
                    reason: "expected 'h12' or 'h23'".to_owned(),
                });
            }
        };

        let request_timeout_ms =
            match optional_trimmed_env("ACADEMY_REQUEST_TIMEOUT_MS", &mut lookup) {
                None => DEFAULT_REQUEST_TIMEOUT_MS,
                Some(value) => match value.parse::<u64>() {
                    Ok(0) => {
                        return Err(ConfigError::InvalidValue {
                            key: "ACADEMY_REQUEST_TIMEOUT_MS",
                            value,
                            reason: "must be at least 1".to_owned(),
                        });
                    }
                    Ok(ms) => ms,
                    Err(err) => {
                        return Err(ConfigError::InvalidValue {
                            key: "ACADEMY_REQUEST_TIMEOUT_MS",
                            value,
                            reason: err.to_string(),
                        });
                    }
                },
            };

        Ok(Self {
            api_base_url,
            realtime_url,
            auth_token,
            user_id,
            role,
            conversation,
            display: DisplaySettings {
                utc_offset_minutes,
                hour_cycle,
            },
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_url(key: &'static str, value: String) -> Result<Url, ConfigError> {
    Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}
